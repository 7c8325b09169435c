//! Query executors
//!
//! Each read resolves a key, serves fresh values straight from the cache,
//! serves stale values while a background task revalidates them, and blocks
//! on the collaborator only when nothing usable is cached. Failed fetches
//! are never cached.

use crate::billing::model::{
    AnalyticsResult, ClientBillingSummary, DateRange, MatterSummary, TimeEntry, TimeEntryFilters,
    TimeEntryId,
};
use crate::billing::service::BillingService;
use crate::cache::key::{self, CacheKey};
use crate::cache::scope::ListScope;
use crate::cache::store::{CachedValue, FetchTicket, Lookup, TimeEntryList};
use crate::error::BillingResult;
use crate::queries::client::BillingQueries;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

impl BillingQueries {
    /// Time entries matching `filters`
    ///
    /// Only the highest-precedence filter is honoured: matter, then client,
    /// then status, then date range.
    pub async fn time_entries(&self, filters: &TimeEntryFilters) -> BillingResult<Vec<TimeEntry>> {
        self.entry_list(ListScope::from_filters(filters)).await
    }

    /// Entries not yet submitted
    pub async fn unsubmitted_entries(&self) -> BillingResult<Vec<TimeEntry>> {
        self.entry_list(ListScope::Unsubmitted).await
    }

    /// The `limit` most recent entries
    pub async fn recent_time_entries(&self, limit: u32) -> BillingResult<Vec<TimeEntry>> {
        self.entry_list(ListScope::Recent(limit)).await
    }

    /// One time entry by id
    pub async fn time_entry(&self, id: &TimeEntryId) -> BillingResult<TimeEntry> {
        let id = id.clone();
        self.fetch_query(key::time_entry(&id), move |service| {
            let id = id.clone();
            async move {
                let entry = service.get_time_entry(&id).await?;
                Ok(CachedValue::Entry(Arc::new(entry)))
            }
        })
        .await?
        .into_entry()
    }

    /// Matters offered on the time entry form
    pub async fn matters_for_entry_form(&self) -> BillingResult<Vec<MatterSummary>> {
        self.fetch_query(key::matters_for_entry_form(), |service| async move {
            let matters = service.get_matters_for_time_entry().await?;
            Ok(CachedValue::Matters(Arc::new(matters)))
        })
        .await?
        .into_matters()
    }

    /// Billing totals for one client
    pub async fn client_billing(&self, client_id: &str) -> BillingResult<ClientBillingSummary> {
        let client_id = client_id.to_string();
        self.fetch_query(key::client_billing(&client_id), move |service| {
            let client_id = client_id.clone();
            async move {
                let summary = service.get_client_billing_info(&client_id).await?;
                Ok(CachedValue::ClientBilling(Arc::new(summary)))
            }
        })
        .await?
        .into_client_billing()
    }

    /// Aggregate analytics over `range`, or over everything
    pub async fn billing_analytics(
        &self,
        range: Option<DateRange>,
    ) -> BillingResult<AnalyticsResult> {
        self.fetch_query(key::analytics(range.as_ref()), move |service| async move {
            let result = service.get_billing_analytics(range).await?;
            Ok(CachedValue::Analytics(Arc::new(result)))
        })
        .await?
        .into_analytics()
    }

    async fn entry_list(&self, scope: ListScope) -> BillingResult<Vec<TimeEntry>> {
        let key = scope.key();
        self.fetch_query(key, move |service| {
            let scope = scope.clone();
            async move {
                let entries = match &scope {
                    ListScope::Unsubmitted => service.get_unsubmitted_entries().await?,
                    ListScope::Recent(limit) => service.get_recent_time_entries(*limit).await?,
                    _ => service.get_time_entries(&scope.filters()).await?,
                };
                Ok(CachedValue::TimeEntries(TimeEntryList::new(scope, entries)))
            }
        })
        .await?
        .into_time_entries()
    }

    /// Read `key` through the cache, fetching with `fetch` when needed
    pub(crate) async fn fetch_query<F, Fut>(
        &self,
        key: CacheKey,
        fetch: F,
    ) -> BillingResult<CachedValue>
    where
        F: Fn(Arc<dyn BillingService>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = BillingResult<CachedValue>> + Send + 'static,
    {
        match self.cache.lookup(&key) {
            Lookup::Fresh(value) => {
                debug!("Cache hit for {}", key);
                Ok(value)
            }
            Lookup::Stale { value, revalidate } => {
                debug!("Serving stale {}", key);
                if let Some(ticket) = revalidate {
                    self.spawn_revalidation(ticket, fetch);
                }
                Ok(value)
            }
            Lookup::Miss(ticket) => {
                debug!("Cache miss for {}, fetching from {}", key, self.service.service_name());
                self.run_fetch(&ticket, &fetch).await
            }
        }
    }

    fn spawn_revalidation<F, Fut>(&self, ticket: FetchTicket, fetch: F)
    where
        F: Fn(Arc<dyn BillingService>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = BillingResult<CachedValue>> + Send + 'static,
    {
        let queries = self.clone();
        tokio::spawn(async move {
            if let Err(e) = queries.run_fetch(&ticket, &fetch).await {
                debug!("Background revalidation of {} failed: {}", ticket.key(), e);
            }
        });
    }

    async fn run_fetch<F, Fut>(&self, ticket: &FetchTicket, fetch: &F) -> BillingResult<CachedValue>
    where
        F: Fn(Arc<dyn BillingService>) -> Fut,
        Fut: Future<Output = BillingResult<CachedValue>>,
    {
        let what = ticket.key().to_string();
        let result = self
            .retry
            .run(&what, || fetch(Arc::clone(&self.service)))
            .await;

        match result {
            Ok(value) => {
                self.cache.complete(ticket, value.clone());
                Ok(value)
            }
            Err(e) => {
                self.cache.abandon(ticket);
                Err(e)
            }
        }
    }
}
