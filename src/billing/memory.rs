//! In-process billing backend
//!
//! Keeps records in memory, computes aggregates on demand, and lets callers
//! script failures and hold writes open. Useful for demos, local
//! development and tests that need a collaborator with real semantics.

use crate::billing::model::{
    AnalyticsResult, ClientBillingSummary, DateRange, EntryStatus, MatterBreakdown, MatterSummary,
    NewTimeEntry, TimeEntry, TimeEntryFilters, TimeEntryId, TimeEntryPatch,
};
use crate::billing::service::BillingService;
use crate::error::{BillingError, BillingResult};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::debug;

/// Collaborator operations, used to script failures and count calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    GetTimeEntries,
    GetTimeEntry,
    CreateTimeEntry,
    UpdateTimeEntry,
    DeleteTimeEntry,
    SubmitTimeEntries,
    GetUnsubmitted,
    GetRecent,
    GetMatters,
    GetClientBilling,
    GetAnalytics,
}

impl Operation {
    fn is_write(&self) -> bool {
        matches!(
            self,
            Self::CreateTimeEntry
                | Self::UpdateTimeEntry
                | Self::DeleteTimeEntry
                | Self::SubmitTimeEntries
        )
    }
}

#[derive(Default)]
struct State {
    entries: Vec<TimeEntry>,
    matters: Vec<MatterSummary>,
    next_id: u64,
    calls: HashMap<Operation, usize>,
    failures: HashMap<Operation, VecDeque<BillingError>>,
    pending_writes: usize,
    pending_reads: usize,
}

impl State {
    fn pending(&mut self, write: bool) -> &mut usize {
        if write {
            &mut self.pending_writes
        } else {
            &mut self.pending_reads
        }
    }
}

/// Billing backend held entirely in memory
pub struct InMemoryBillingService {
    state: Mutex<State>,
    writes_paused: watch::Sender<bool>,
    reads_paused: watch::Sender<bool>,
}

impl InMemoryBillingService {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            writes_paused: watch::Sender::new(false),
            reads_paused: watch::Sender::new(false),
        }
    }

    /// Seed the backend with existing entries
    pub fn with_entries(self, entries: Vec<TimeEntry>) -> Self {
        {
            let mut state = self.state();
            state.entries.extend(entries);
        }
        self
    }

    /// Seed the matters offered on the entry form
    pub fn with_matters(self, matters: Vec<MatterSummary>) -> Self {
        self.state().matters = matters;
        self
    }

    /// Insert or replace an entry behind the cache's back
    pub fn upsert_entry(&self, entry: TimeEntry) {
        let mut state = self.state();
        match state.entries.iter_mut().find(|e| e.id == entry.id) {
            Some(existing) => *existing = entry,
            None => state.entries.push(entry),
        }
    }

    /// Snapshot of the stored entries
    pub fn entries(&self) -> Vec<TimeEntry> {
        self.state().entries.clone()
    }

    /// Make the next call to `op` fail with `error`
    ///
    /// Calling this repeatedly queues failures for consecutive calls.
    pub fn fail_next(&self, op: Operation, error: BillingError) {
        self.state().failures.entry(op).or_default().push_back(error);
    }

    /// Number of times `op` has been invoked
    pub fn calls(&self, op: Operation) -> usize {
        self.state().calls.get(&op).copied().unwrap_or(0)
    }

    /// Hold every write at its entry point until [`resume_writes`] is called
    ///
    /// [`resume_writes`]: Self::resume_writes
    pub fn pause_writes(&self) {
        self.writes_paused.send_replace(true);
    }

    pub fn resume_writes(&self) {
        self.writes_paused.send_replace(false);
    }

    /// Writes currently held by [`pause_writes`](Self::pause_writes)
    pub fn pending_writes(&self) -> usize {
        self.state().pending_writes
    }

    /// Hold every read at its entry point until [`resume_reads`] is called
    ///
    /// [`resume_reads`]: Self::resume_reads
    pub fn pause_reads(&self) {
        self.reads_paused.send_replace(true);
    }

    pub fn resume_reads(&self) {
        self.reads_paused.send_replace(false);
    }

    pub fn pending_reads(&self) -> usize {
        self.state().pending_reads
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn enter(&self, op: Operation) -> BillingResult<()> {
        let write = op.is_write();
        let gate = if write {
            &self.writes_paused
        } else {
            &self.reads_paused
        };
        *self.state().pending(write) += 1;
        let mut paused = gate.subscribe();
        let _ = paused.wait_for(|paused| !*paused).await;
        *self.state().pending(write) -= 1;

        let mut state = self.state();
        *state.calls.entry(op).or_default() += 1;
        if let Some(error) = state.failures.get_mut(&op).and_then(VecDeque::pop_front) {
            debug!("Scripted failure for {:?}: {}", op, error);
            return Err(error);
        }
        Ok(())
    }
}

impl Default for InMemoryBillingService {
    fn default() -> Self {
        Self::new()
    }
}

fn newest_first(entries: &mut [TimeEntry]) {
    entries.sort_by(|a, b| b.date.cmp(&a.date).then(b.created_at.cmp(&a.created_at)));
}

#[async_trait]
impl BillingService for InMemoryBillingService {
    async fn get_time_entries(&self, filters: &TimeEntryFilters) -> BillingResult<Vec<TimeEntry>> {
        self.enter(Operation::GetTimeEntries).await?;
        let mut entries: Vec<_> = self
            .state()
            .entries
            .iter()
            .filter(|e| filters.matches(e))
            .cloned()
            .collect();
        newest_first(&mut entries);
        Ok(entries)
    }

    async fn get_time_entry(&self, id: &TimeEntryId) -> BillingResult<TimeEntry> {
        self.enter(Operation::GetTimeEntry).await?;
        self.state()
            .entries
            .iter()
            .find(|e| &e.id == id)
            .cloned()
            .ok_or_else(|| BillingError::NotFound(format!("time entry {id}")))
    }

    async fn create_time_entry(&self, data: &NewTimeEntry) -> BillingResult<TimeEntry> {
        self.enter(Operation::CreateTimeEntry).await?;
        data.validate()?;

        let mut state = self.state();
        state.next_id += 1;
        let now = Utc::now();
        let entry = TimeEntry {
            id: TimeEntryId::new(format!("te_{}", state.next_id)),
            matter_id: data.matter_id.clone(),
            client_id: data.client_id.clone(),
            description: data.description.clone(),
            hours: data.hours,
            rate: data.rate,
            date: data.date,
            billable: data.billable,
            status: EntryStatus::Draft,
            created_at: now,
            updated_at: now,
        };
        state.entries.push(entry.clone());
        Ok(entry)
    }

    async fn update_time_entry(
        &self,
        id: &TimeEntryId,
        patch: &TimeEntryPatch,
    ) -> BillingResult<TimeEntry> {
        self.enter(Operation::UpdateTimeEntry).await?;
        patch.validate()?;

        let mut state = self.state();
        let entry = state
            .entries
            .iter_mut()
            .find(|e| &e.id == id)
            .ok_or_else(|| BillingError::NotFound(format!("time entry {id}")))?;
        entry.apply(patch);
        Ok(entry.clone())
    }

    async fn delete_time_entry(&self, id: &TimeEntryId) -> BillingResult<()> {
        self.enter(Operation::DeleteTimeEntry).await?;

        let mut state = self.state();
        let before = state.entries.len();
        state.entries.retain(|e| &e.id != id);
        if state.entries.len() == before {
            return Err(BillingError::NotFound(format!("time entry {id}")));
        }
        Ok(())
    }

    async fn submit_time_entries(&self, ids: &[TimeEntryId]) -> BillingResult<()> {
        self.enter(Operation::SubmitTimeEntries).await?;

        let mut state = self.state();
        if let Some(missing) = ids.iter().find(|id| !state.entries.iter().any(|e| &e.id == *id)) {
            return Err(BillingError::NotFound(format!("time entry {missing}")));
        }

        let now = Utc::now();
        for entry in state.entries.iter_mut().filter(|e| ids.contains(&e.id)) {
            entry.status = EntryStatus::Submitted;
            entry.updated_at = now;
        }
        Ok(())
    }

    async fn get_unsubmitted_entries(&self) -> BillingResult<Vec<TimeEntry>> {
        self.enter(Operation::GetUnsubmitted).await?;
        let mut entries: Vec<_> = self
            .state()
            .entries
            .iter()
            .filter(|e| e.status.is_unsubmitted())
            .cloned()
            .collect();
        newest_first(&mut entries);
        Ok(entries)
    }

    async fn get_recent_time_entries(&self, limit: u32) -> BillingResult<Vec<TimeEntry>> {
        self.enter(Operation::GetRecent).await?;
        let mut entries = self.state().entries.clone();
        newest_first(&mut entries);
        entries.truncate(limit as usize);
        Ok(entries)
    }

    async fn get_matters_for_time_entry(&self) -> BillingResult<Vec<MatterSummary>> {
        self.enter(Operation::GetMatters).await?;
        Ok(self.state().matters.clone())
    }

    async fn get_client_billing_info(
        &self,
        client_id: &str,
    ) -> BillingResult<ClientBillingSummary> {
        self.enter(Operation::GetClientBilling).await?;

        let state = self.state();
        let mut summary = ClientBillingSummary {
            client_id: client_id.to_string(),
            total_hours: Decimal::ZERO,
            billed_amount: Decimal::ZERO,
            unbilled_amount: Decimal::ZERO,
            unsubmitted_count: 0,
        };
        for entry in state
            .entries
            .iter()
            .filter(|e| e.client_id.as_deref() == Some(client_id))
        {
            summary.total_hours += entry.hours;
            if !entry.billable {
                continue;
            }
            match entry.status {
                EntryStatus::Billed => summary.billed_amount += entry.amount(),
                EntryStatus::Draft => {
                    summary.unbilled_amount += entry.amount();
                    summary.unsubmitted_count += 1;
                }
                EntryStatus::Submitted | EntryStatus::Approved => {
                    summary.unbilled_amount += entry.amount()
                }
            }
        }
        Ok(summary)
    }

    async fn get_billing_analytics(
        &self,
        range: Option<DateRange>,
    ) -> BillingResult<AnalyticsResult> {
        self.enter(Operation::GetAnalytics).await?;

        let state = self.state();
        let mut result = AnalyticsResult {
            range,
            entry_count: 0,
            total_hours: Decimal::ZERO,
            billable_hours: Decimal::ZERO,
            total_amount: Decimal::ZERO,
            by_matter: Vec::new(),
        };
        let mut by_matter: BTreeMap<&str, (Decimal, Decimal)> = BTreeMap::new();

        for entry in state
            .entries
            .iter()
            .filter(|e| range.is_none_or(|r| r.contains(e.date)))
        {
            result.entry_count += 1;
            result.total_hours += entry.hours;
            let slot = by_matter.entry(entry.matter_id.as_str()).or_default();
            slot.0 += entry.hours;
            if entry.billable {
                result.billable_hours += entry.hours;
                result.total_amount += entry.amount();
                slot.1 += entry.amount();
            }
        }

        result.by_matter = by_matter
            .into_iter()
            .map(|(matter_id, (hours, amount))| MatterBreakdown {
                matter_id: matter_id.to_string(),
                hours,
                amount,
            })
            .collect();
        Ok(result)
    }

    fn service_name(&self) -> &'static str {
        "in-memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_entry(matter: &str, client: &str, hours: i64) -> NewTimeEntry {
        NewTimeEntry::new(matter, "Drafting", Decimal::new(hours, 0), Decimal::new(200, 0))
            .with_client(client)
    }

    #[tokio::test]
    async fn create_assigns_real_ids() {
        let service = InMemoryBillingService::new();
        let a = service.create_time_entry(&new_entry("M1", "C1", 1)).await.unwrap();
        let b = service.create_time_entry(&new_entry("M1", "C1", 2)).await.unwrap();

        assert_ne!(a.id, b.id);
        assert!(!a.id.is_temporary());
        assert_eq!(service.entries().len(), 2);
    }

    #[tokio::test]
    async fn scripted_failures_are_consumed_in_order() {
        let service = InMemoryBillingService::new();
        service.fail_next(Operation::GetMatters, BillingError::Network("reset".into()));

        assert!(service.get_matters_for_time_entry().await.is_err());
        assert!(service.get_matters_for_time_entry().await.is_ok());
        assert_eq!(service.calls(Operation::GetMatters), 2);
    }

    #[tokio::test]
    async fn paused_reads_wait_and_writes_pass() {
        let service = std::sync::Arc::new(InMemoryBillingService::new());
        service.pause_reads();

        let reader = std::sync::Arc::clone(&service);
        let read = tokio::spawn(async move { reader.get_unsubmitted_entries().await });
        while service.pending_reads() == 0 {
            tokio::task::yield_now().await;
        }

        service.create_time_entry(&new_entry("M1", "C1", 1)).await.unwrap();
        assert_eq!(service.pending_reads(), 1);

        service.resume_reads();
        let unsubmitted = read.await.unwrap().unwrap();
        assert_eq!(unsubmitted.len(), 1);
        assert_eq!(service.pending_reads(), 0);
    }

    #[tokio::test]
    async fn submit_moves_entries_out_of_unsubmitted() {
        let service = InMemoryBillingService::new();
        let a = service.create_time_entry(&new_entry("M1", "C1", 1)).await.unwrap();
        service.create_time_entry(&new_entry("M2", "C1", 1)).await.unwrap();

        service.submit_time_entries(&[a.id.clone()]).await.unwrap();

        let unsubmitted = service.get_unsubmitted_entries().await.unwrap();
        assert_eq!(unsubmitted.len(), 1);
        assert_ne!(unsubmitted[0].id, a.id);
    }

    #[tokio::test]
    async fn submit_unknown_id_changes_nothing() {
        let service = InMemoryBillingService::new();
        let a = service.create_time_entry(&new_entry("M1", "C1", 1)).await.unwrap();

        let err = service
            .submit_time_entries(&[a.id.clone(), TimeEntryId::new("missing")])
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::NotFound(_)));
        assert_eq!(service.entries()[0].status, EntryStatus::Draft);
    }

    #[tokio::test]
    async fn aggregates_follow_entries() {
        let service = InMemoryBillingService::new();
        service.create_time_entry(&new_entry("M1", "C1", 2)).await.unwrap();
        service.create_time_entry(&new_entry("M2", "C1", 3)).await.unwrap();

        let summary = service.get_client_billing_info("C1").await.unwrap();
        assert_eq!(summary.total_hours, Decimal::new(5, 0));
        assert_eq!(summary.unbilled_amount, Decimal::new(1000, 0));
        assert_eq!(summary.unsubmitted_count, 2);

        let analytics = service.get_billing_analytics(None).await.unwrap();
        assert_eq!(analytics.entry_count, 2);
        assert_eq!(analytics.by_matter.len(), 2);
        assert_eq!(analytics.total_amount, Decimal::new(1000, 0));
    }

    #[tokio::test]
    async fn recent_is_limited() {
        let service = InMemoryBillingService::new();
        for hours in 1..=4 {
            service.create_time_entry(&new_entry("M1", "C1", hours)).await.unwrap();
        }
        let recent = service.get_recent_time_entries(3).await.unwrap();
        assert_eq!(recent.len(), 3);
    }
}
