//! Billing collaborator abstraction
//!
//! The cache never talks to a database itself. Whatever persistence layer
//! backs the application implements this trait.

use crate::billing::model::{
    AnalyticsResult, ClientBillingSummary, DateRange, MatterSummary, NewTimeEntry, TimeEntry,
    TimeEntryFilters, TimeEntryId, TimeEntryPatch,
};
use crate::error::{BillingError, BillingResult};
use async_trait::async_trait;

/// Abstract billing backend interface
///
/// Reads must be safe to retry. Writes are called exactly once per
/// mutation.
#[async_trait]
pub trait BillingService: Send + Sync {
    /// List time entries matching `filters`
    async fn get_time_entries(&self, filters: &TimeEntryFilters) -> BillingResult<Vec<TimeEntry>>;

    /// Fetch one time entry
    ///
    /// The default scans the unfiltered list; backends with a direct lookup
    /// should override it.
    async fn get_time_entry(&self, id: &TimeEntryId) -> BillingResult<TimeEntry> {
        self.get_time_entries(&TimeEntryFilters::default())
            .await?
            .into_iter()
            .find(|e| &e.id == id)
            .ok_or_else(|| BillingError::NotFound(format!("time entry {id}")))
    }

    /// Create a time entry; the backend assigns id and timestamps
    async fn create_time_entry(&self, data: &NewTimeEntry) -> BillingResult<TimeEntry>;

    /// Apply a partial update
    async fn update_time_entry(
        &self,
        id: &TimeEntryId,
        patch: &TimeEntryPatch,
    ) -> BillingResult<TimeEntry>;

    /// Delete a time entry
    async fn delete_time_entry(&self, id: &TimeEntryId) -> BillingResult<()>;

    /// Submit a batch of entries for approval
    async fn submit_time_entries(&self, ids: &[TimeEntryId]) -> BillingResult<()>;

    /// Entries not yet submitted
    async fn get_unsubmitted_entries(&self) -> BillingResult<Vec<TimeEntry>>;

    /// The `limit` most recently worked entries, newest first
    async fn get_recent_time_entries(&self, limit: u32) -> BillingResult<Vec<TimeEntry>>;

    /// Matters selectable on the time entry form
    async fn get_matters_for_time_entry(&self) -> BillingResult<Vec<MatterSummary>>;

    /// Billing totals for one client
    async fn get_client_billing_info(&self, client_id: &str)
        -> BillingResult<ClientBillingSummary>;

    /// Aggregate analytics, optionally restricted to a date range
    async fn get_billing_analytics(
        &self,
        range: Option<DateRange>,
    ) -> BillingResult<AnalyticsResult>;

    /// Get the human-readable backend name for logs
    fn service_name(&self) -> &'static str;
}
