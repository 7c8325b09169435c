//! Mutation executors
//!
//! Every mutation runs the same protocol:
//!
//! 1. supersede in-flight revalidations for every key it may affect
//! 2. snapshot those keys
//! 3. write the expected outcome into the cache
//! 4. call the collaborator exactly once
//! 5. on failure restore the snapshot and mark every restored key stale; in
//!    all cases apply the invalidation row so the next read goes back to
//!    the source of truth
//!
//! Steps 1-3 run in a single cache transaction.

use crate::billing::model::{EntryStatus, NewTimeEntry, TimeEntry, TimeEntryId, TimeEntryPatch};
use crate::cache::key::{self, CacheKey};
use crate::cache::scope::ListScope;
use crate::cache::store::{CacheTxn, CachedValue, Snapshot, TimeEntryList};
use crate::error::{BillingError, BillingResult};
use crate::queries::client::BillingQueries;
use crate::queries::invalidation::{self, MutationKind};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// State carried from the start of a mutation to its settlement
#[derive(Debug)]
pub(crate) struct MutationContext {
    kind: MutationKind,
    target: Option<TimeEntryId>,
    snapshot: Snapshot,
    status_changed: bool,
}

impl BillingQueries {
    /// Create a time entry
    ///
    /// A provisional entry with a temporary id shows up in cached lists
    /// immediately; the real one replaces it on the next read after the
    /// collaborator responds.
    pub async fn create_time_entry(&self, data: NewTimeEntry) -> BillingResult<TimeEntry> {
        data.validate()?;

        let provisional = TimeEntry::provisional(&data);
        debug!("Optimistically creating {}", provisional.id);
        let context = self.begin(MutationKind::Create, None, |txn| {
            insert_optimistic(txn, &provisional);
            false
        });

        let result = self.service.create_time_entry(&data).await;
        self.settle(context, result.as_ref().err());
        result
    }

    /// Apply a partial update to a time entry
    pub async fn update_time_entry(
        &self,
        id: &TimeEntryId,
        patch: TimeEntryPatch,
    ) -> BillingResult<TimeEntry> {
        reject_temporary(id)?;
        patch.validate()?;

        let context = self.begin(MutationKind::Update, Some(id), |txn| {
            let status_changed = match patch.status {
                Some(status) => known_status(txn, id) != Some(status),
                None => false,
            };
            update_optimistic(txn, id, &patch);
            status_changed
        });

        let result = self.service.update_time_entry(id, &patch).await;
        self.settle(context, result.as_ref().err());
        result
    }

    /// Delete a time entry
    pub async fn delete_time_entry(&self, id: &TimeEntryId) -> BillingResult<()> {
        reject_temporary(id)?;

        let context = self.begin(MutationKind::Delete, Some(id), |txn| {
            remove_optimistic(txn, id);
            false
        });

        let result = self.service.delete_time_entry(id).await;
        self.settle(context, result.as_ref().err());
        result
    }

    /// Submit a batch of entries
    ///
    /// Submission semantics belong to the collaborator, so nothing is
    /// written optimistically.
    pub async fn submit_time_entries(&self, ids: &[TimeEntryId]) -> BillingResult<()> {
        for id in ids {
            reject_temporary(id)?;
        }

        let context = self.begin(MutationKind::Submit, None, |_| false);

        let result = self.service.submit_time_entries(ids).await;
        self.settle(context, result.as_ref().err());
        result
    }

    /// Phases 1-3; `apply` performs the optimistic write and reports
    /// whether the entry's status changes
    fn begin(
        &self,
        kind: MutationKind,
        target: Option<&TimeEntryId>,
        apply: impl FnOnce(&mut CacheTxn<'_>) -> bool,
    ) -> MutationContext {
        let prefixes = invalidation::affected_prefixes(kind, target);

        self.cache.txn(|txn| {
            let cancelled: usize = prefixes.iter().map(|p| txn.cancel(p)).sum();
            debug!("{}: superseded {} cached keys", kind.name(), cancelled);

            let snapshot = if kind.is_optimistic() {
                let mut keys: Vec<CacheKey> = prefixes.clone();
                for prefix in &prefixes {
                    keys.extend(txn.keys_under(prefix));
                }
                txn.snapshot(&keys)
            } else {
                Snapshot::default()
            };

            let status_changed = apply(txn);

            MutationContext {
                kind,
                target: target.cloned(),
                snapshot,
                status_changed,
            }
        })
    }

    /// Phase 5
    fn settle(&self, context: MutationContext, error: Option<&BillingError>) {
        let MutationContext {
            kind,
            target,
            snapshot,
            status_changed,
        } = context;

        let invalidated = self.cache.txn(|txn| {
            let mut rolled_back = 0;
            if let Some(e) = error {
                warn!(
                    "{} failed, rolling back {} cached keys: {}",
                    kind.name(),
                    snapshot.len(),
                    e
                );
                // restored values may predate writes made while this call was
                // in flight; none of them may be served as fresh
                let restored: Vec<CacheKey> = snapshot.keys().cloned().collect();
                txn.restore(snapshot);
                rolled_back = restored.iter().map(|k| txn.invalidate(k)).sum::<usize>();
            }
            rolled_back + invalidation::apply(txn, kind, target.as_ref(), status_changed)
        });

        if error.is_none() {
            info!("{} settled, invalidated {} cached values", kind.name(), invalidated);
        }
    }
}

fn reject_temporary(id: &TimeEntryId) -> BillingResult<()> {
    if id.is_temporary() {
        return Err(BillingError::validation(format!(
            "time entry {id} has not been saved yet"
        )));
    }
    Ok(())
}

/// Cached lists that may hold individual entries
fn list_keys(txn: &CacheTxn<'_>) -> Vec<CacheKey> {
    let mut keys = txn.keys_under(&key::time_entries());
    keys.extend(txn.keys_under(&key::unsubmitted_entries()));
    keys
}

fn cached_list(txn: &CacheTxn<'_>, key: &CacheKey) -> Option<TimeEntryList> {
    match txn.get(key) {
        Some(CachedValue::TimeEntries(list)) => Some(list.clone()),
        _ => None,
    }
}

/// Last status the cache knows for `id`, if any
fn known_status(txn: &CacheTxn<'_>, id: &TimeEntryId) -> Option<EntryStatus> {
    if let Some(CachedValue::Entry(entry)) = txn.get(&key::time_entry(id)) {
        return Some(entry.status);
    }
    list_keys(txn).iter().find_map(|k| {
        cached_list(txn, k)?
            .entries
            .iter()
            .find(|e| &e.id == id)
            .map(|e| e.status)
    })
}

fn insert_optimistic(txn: &mut CacheTxn<'_>, entry: &TimeEntry) {
    let all = key::time_entries();
    if txn.get(&all).is_none() {
        txn.set(&all, CachedValue::TimeEntries(TimeEntryList::new(ListScope::All, Vec::new())));
    }

    for key in list_keys(txn) {
        let Some(list) = cached_list(txn, &key) else {
            continue;
        };
        if !list.scope.admits(entry) {
            continue;
        }
        let mut entries = Vec::clone(&list.entries);
        match list.scope {
            ListScope::Recent(limit) => {
                entries.insert(0, entry.clone());
                entries.truncate(limit as usize);
            }
            _ => entries.push(entry.clone()),
        }
        txn.set(&key, CachedValue::TimeEntries(TimeEntryList::new(list.scope, entries)));
    }
}

fn update_optimistic(txn: &mut CacheTxn<'_>, id: &TimeEntryId, patch: &TimeEntryPatch) {
    let entry_key = key::time_entry(id);
    if let Some(CachedValue::Entry(entry)) = txn.get(&entry_key) {
        let mut merged = TimeEntry::clone(entry);
        merged.apply(patch);
        txn.set(&entry_key, CachedValue::Entry(Arc::new(merged)));
    }

    for key in list_keys(txn) {
        let Some(list) = cached_list(txn, &key) else {
            continue;
        };
        if !list.entries.iter().any(|e| &e.id == id) {
            continue;
        }
        let entries = list
            .entries
            .iter()
            .filter_map(|e| {
                if &e.id != id {
                    return Some(e.clone());
                }
                let mut merged = e.clone();
                merged.apply(patch);
                list.scope.admits(&merged).then_some(merged)
            })
            .collect();
        txn.set(&key, CachedValue::TimeEntries(TimeEntryList::new(list.scope, entries)));
    }
}

fn remove_optimistic(txn: &mut CacheTxn<'_>, id: &TimeEntryId) {
    txn.evict(&key::time_entry(id));

    for key in list_keys(txn) {
        let Some(list) = cached_list(txn, &key) else {
            continue;
        };
        if !list.entries.iter().any(|e| &e.id == id) {
            continue;
        }
        let entries = list
            .entries
            .iter()
            .filter(|e| &e.id != id)
            .cloned()
            .collect();
        txn.set(&key, CachedValue::TimeEntries(TimeEntryList::new(list.scope, entries)));
    }
}
