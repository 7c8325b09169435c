//! In-memory query cache
//!
//! Holds the last known value per key together with its staleness window.
//! Every key also carries a generation number drawn from a cache-wide
//! counter. Any write, cancel, invalidation or eviction moves a key to a new
//! generation, and a fetch may only store its result if the generation it
//! started under is still current. This is how late responses are
//! discarded without cancelling network calls.
//!
//! | State | Read behaviour |
//! |-------|----------------|
//! | Fresh | served, no fetch |
//! | Stale | served, background revalidation |
//! | Invalidated / Missing / past gc | blocking fetch |

use crate::billing::model::{AnalyticsResult, ClientBillingSummary, MatterSummary, TimeEntry};
use crate::cache::key::CacheKey;
use crate::cache::scope::ListScope;
use crate::config::schema::CacheConfig;
use crate::error::{BillingError, BillingResult};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Resource classes with their own staleness window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceClass {
    TimeEntries,
    Unsubmitted,
    Recent,
    Entry,
    Matters,
    ClientBilling,
    Analytics,
}

impl ResourceClass {
    const COUNT: usize = 7;

    fn index(self) -> usize {
        self as usize
    }
}

/// How long a value stays fresh, and how long it is kept at all
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Staleness {
    pub fresh_for: Duration,
    pub gc_after: Duration,
}

impl Staleness {
    pub fn new(fresh_for: Duration, gc_after: Duration) -> Self {
        Self {
            fresh_for,
            gc_after: gc_after.max(fresh_for),
        }
    }
}

/// Staleness window per resource class
#[derive(Debug, Clone)]
pub struct StalenessTable {
    windows: [Staleness; ResourceClass::COUNT],
}

impl StalenessTable {
    /// Same window for every class
    pub fn uniform(window: Staleness) -> Self {
        Self {
            windows: [window; ResourceClass::COUNT],
        }
    }

    pub fn with(mut self, class: ResourceClass, window: Staleness) -> Self {
        self.windows[class.index()] = window;
        self
    }

    pub fn get(&self, class: ResourceClass) -> Staleness {
        self.windows[class.index()]
    }
}

impl Default for StalenessTable {
    fn default() -> Self {
        CacheConfig::default().staleness_table()
    }
}

/// Cached time entry list together with the scope it was fetched for
#[derive(Debug, Clone)]
pub struct TimeEntryList {
    pub scope: ListScope,
    pub entries: Arc<Vec<TimeEntry>>,
}

impl TimeEntryList {
    pub fn new(scope: ListScope, entries: Vec<TimeEntry>) -> Self {
        Self {
            scope,
            entries: Arc::new(entries),
        }
    }
}

/// A cached result
///
/// Payloads are reference counted so snapshots are pointer copies and an
/// optimistic write replaces the pointer rather than mutating in place.
#[derive(Debug, Clone)]
pub enum CachedValue {
    TimeEntries(TimeEntryList),
    Entry(Arc<TimeEntry>),
    Matters(Arc<Vec<MatterSummary>>),
    ClientBilling(Arc<ClientBillingSummary>),
    Analytics(Arc<AnalyticsResult>),
}

impl CachedValue {
    pub fn class(&self) -> ResourceClass {
        match self {
            Self::TimeEntries(list) => list.scope.class(),
            Self::Entry(_) => ResourceClass::Entry,
            Self::Matters(_) => ResourceClass::Matters,
            Self::ClientBilling(_) => ResourceClass::ClientBilling,
            Self::Analytics(_) => ResourceClass::Analytics,
        }
    }

    pub fn into_time_entries(self) -> BillingResult<Vec<TimeEntry>> {
        match self {
            Self::TimeEntries(list) => Ok(Arc::unwrap_or_clone(list.entries)),
            other => Err(other.mismatch("time entry list")),
        }
    }

    pub fn into_entry(self) -> BillingResult<TimeEntry> {
        match self {
            Self::Entry(entry) => Ok(Arc::unwrap_or_clone(entry)),
            other => Err(other.mismatch("time entry")),
        }
    }

    pub fn into_matters(self) -> BillingResult<Vec<MatterSummary>> {
        match self {
            Self::Matters(matters) => Ok(Arc::unwrap_or_clone(matters)),
            other => Err(other.mismatch("matter list")),
        }
    }

    pub fn into_client_billing(self) -> BillingResult<ClientBillingSummary> {
        match self {
            Self::ClientBilling(summary) => Ok(Arc::unwrap_or_clone(summary)),
            other => Err(other.mismatch("client billing summary")),
        }
    }

    pub fn into_analytics(self) -> BillingResult<AnalyticsResult> {
        match self {
            Self::Analytics(result) => Ok(Arc::unwrap_or_clone(result)),
            other => Err(other.mismatch("analytics")),
        }
    }

    fn mismatch(&self, expected: &str) -> BillingError {
        BillingError::Internal(format!(
            "cache entry holds {:?} data, expected {}",
            self.class(),
            expected
        ))
    }
}

/// Value plus timing metadata for one key
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: CachedValue,
    pub updated_at: Instant,
    pub fresh_until: Instant,
    pub gc_at: Instant,
    pub invalidated: bool,
}

impl CacheEntry {
    fn new(value: CachedValue, window: Staleness, now: Instant) -> Self {
        Self {
            value,
            updated_at: now,
            fresh_until: now + window.fresh_for,
            gc_at: now + window.gc_after,
            invalidated: false,
        }
    }

    fn state(&self, now: Instant) -> EntryState {
        if now >= self.gc_at {
            EntryState::Expired
        } else if self.invalidated {
            EntryState::Invalidated
        } else if now < self.fresh_until {
            EntryState::Fresh
        } else {
            EntryState::Stale
        }
    }
}

/// Observable state of a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Missing,
    Fresh,
    Stale,
    Invalidated,
    Expired,
}

impl EntryState {
    pub fn is_fresh(&self) -> bool {
        matches!(self, Self::Fresh)
    }
}

/// Permission to store the result of one fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket {
    key: CacheKey,
    generation: u64,
}

impl FetchTicket {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }
}

/// Outcome of a read
#[derive(Debug)]
pub enum Lookup {
    /// Serve as is
    Fresh(CachedValue),
    /// Serve as is; revalidate in the background if a ticket was issued
    Stale {
        value: CachedValue,
        revalidate: Option<FetchTicket>,
    },
    /// Fetch and wait
    Miss(FetchTicket),
}

/// Prior values of a set of keys, absence included
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    entries: Vec<(CacheKey, Option<CacheEntry>)>,
}

impl Snapshot {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &CacheKey> {
        self.entries.iter().map(|(key, _)| key)
    }
}

#[derive(Debug, Default)]
struct Slot {
    entry: Option<CacheEntry>,
    generation: u64,
    revalidating: bool,
}

#[derive(Debug, Default)]
struct Slots {
    slots: HashMap<CacheKey, Slot>,
    epoch: u64,
}

/// Exclusive access to the cache for a group of operations
///
/// Everything done through one transaction is observed atomically by other
/// tasks.
pub struct CacheTxn<'a> {
    inner: &'a mut Slots,
    staleness: &'a StalenessTable,
    now: Instant,
}

impl CacheTxn<'_> {
    fn next_generation(&mut self) -> u64 {
        self.inner.epoch += 1;
        self.inner.epoch
    }

    fn slot(&mut self, key: &CacheKey) -> &mut Slot {
        let inner = &mut *self.inner;
        inner.slots.entry(key.clone()).or_insert_with(|| {
            inner.epoch += 1;
            Slot {
                generation: inner.epoch,
                ..Slot::default()
            }
        })
    }

    fn bump(&mut self, key: &CacheKey) {
        let generation = self.next_generation();
        if let Some(slot) = self.inner.slots.get_mut(key) {
            slot.generation = generation;
            slot.revalidating = false;
        }
    }

    fn matching(&self, prefix: &CacheKey) -> Vec<CacheKey> {
        self.inner
            .slots
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Decide how a read of `key` is served
    pub fn lookup(&mut self, key: &CacheKey) -> Lookup {
        let now = self.now;
        let slot = self.slot(key);

        let state = slot
            .entry
            .as_ref()
            .map_or(EntryState::Missing, |e| e.state(now));
        if state == EntryState::Expired {
            debug!("Evicting expired entry {}", key);
            slot.entry = None;
        }

        let ticket = FetchTicket {
            key: key.clone(),
            generation: slot.generation,
        };
        match (state, &slot.entry) {
            (EntryState::Fresh, Some(entry)) => Lookup::Fresh(entry.value.clone()),
            (EntryState::Stale, Some(entry)) => {
                let value = entry.value.clone();
                let revalidate = if slot.revalidating {
                    None
                } else {
                    slot.revalidating = true;
                    Some(ticket)
                };
                Lookup::Stale { value, revalidate }
            }
            _ => Lookup::Miss(ticket),
        }
    }

    /// Store a fetch result if its ticket is still current
    pub fn complete(&mut self, ticket: &FetchTicket, value: CachedValue) -> bool {
        let window = self.staleness.get(value.class());
        let now = self.now;
        match self.inner.slots.get_mut(&ticket.key) {
            Some(slot) if slot.generation == ticket.generation => {
                slot.entry = Some(CacheEntry::new(value, window, now));
                slot.revalidating = false;
                true
            }
            _ => {
                debug!("Discarding superseded result for {}", ticket.key);
                false
            }
        }
    }

    /// Release a ticket whose fetch failed; the cache is left untouched
    pub fn abandon(&mut self, ticket: &FetchTicket) {
        if let Some(slot) = self.inner.slots.get_mut(&ticket.key) {
            if slot.generation == ticket.generation {
                slot.revalidating = false;
            }
        }
    }

    /// Current value of `key`, whatever its state
    pub fn get(&self, key: &CacheKey) -> Option<&CachedValue> {
        self.inner
            .slots
            .get(key)
            .and_then(|s| s.entry.as_ref())
            .map(|e| &e.value)
    }

    pub fn state(&self, key: &CacheKey) -> EntryState {
        self.inner
            .slots
            .get(key)
            .and_then(|s| s.entry.as_ref())
            .map_or(EntryState::Missing, |e| e.state(self.now))
    }

    /// Write `value` as fresh, superseding any fetch in flight
    pub fn set(&mut self, key: &CacheKey, value: CachedValue) {
        let window = self.staleness.get(value.class());
        let now = self.now;
        let generation = self.next_generation();
        let slot = self.slot(key);
        slot.entry = Some(CacheEntry::new(value, window, now));
        slot.generation = generation;
        slot.revalidating = false;
    }

    /// Keys under `prefix` currently holding a value
    pub fn keys_under(&self, prefix: &CacheKey) -> Vec<CacheKey> {
        self.inner
            .slots
            .iter()
            .filter(|(k, s)| s.entry.is_some() && k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Supersede every fetch in flight under `prefix`
    pub fn cancel(&mut self, prefix: &CacheKey) -> usize {
        let keys = self.matching(prefix);
        for key in &keys {
            self.bump(key);
        }
        keys.len()
    }

    /// Mark every value under `prefix` as needing a fetch on next read
    pub fn invalidate(&mut self, prefix: &CacheKey) -> usize {
        let keys = self.matching(prefix);
        let mut marked = 0;
        for key in &keys {
            self.bump(key);
            if let Some(entry) = self.inner.slots.get_mut(key).and_then(|s| s.entry.as_mut()) {
                entry.invalidated = true;
                marked += 1;
            }
        }
        marked
    }

    /// Drop the value of `key` entirely
    pub fn evict(&mut self, key: &CacheKey) -> bool {
        self.bump(key);
        self.inner
            .slots
            .get_mut(key)
            .and_then(|s| s.entry.take())
            .is_some()
    }

    /// Drop every value under `prefix`
    pub fn evict_prefix(&mut self, prefix: &CacheKey) -> usize {
        self.matching(prefix)
            .iter()
            .filter(|key| self.evict(key))
            .count()
    }

    /// Record the current value of each key, absence included
    pub fn snapshot<'k>(&self, keys: impl IntoIterator<Item = &'k CacheKey>) -> Snapshot {
        let mut entries: Vec<(CacheKey, Option<CacheEntry>)> = Vec::new();
        for key in keys {
            if entries.iter().any(|(k, _)| k == key) {
                continue;
            }
            let prior = self.inner.slots.get(key).and_then(|s| s.entry.clone());
            entries.push((key.clone(), prior));
        }
        Snapshot { entries }
    }

    /// Put every key in `snapshot` back exactly as recorded
    pub fn restore(&mut self, snapshot: Snapshot) {
        for (key, prior) in snapshot.entries {
            let generation = self.next_generation();
            let slot = self.slot(&key);
            slot.entry = prior;
            slot.generation = generation;
            slot.revalidating = false;
        }
    }
}

/// Session-scoped query cache
///
/// Constructed once per application session and shared by reference; drop
/// it to tear the session down.
#[derive(Debug)]
pub struct QueryCache {
    inner: Mutex<Slots>,
    staleness: StalenessTable,
}

impl QueryCache {
    pub fn new(staleness: StalenessTable) -> Self {
        Self {
            inner: Mutex::new(Slots::default()),
            staleness,
        }
    }

    pub fn staleness(&self) -> &StalenessTable {
        &self.staleness
    }

    /// Run `f` with exclusive access to the cache
    ///
    /// `f` must not block; it runs under the cache lock.
    pub fn txn<R>(&self, f: impl FnOnce(&mut CacheTxn<'_>) -> R) -> R {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let mut txn = CacheTxn {
            inner: &mut inner,
            staleness: &self.staleness,
            now: Instant::now(),
        };
        f(&mut txn)
    }

    pub fn lookup(&self, key: &CacheKey) -> Lookup {
        self.txn(|t| t.lookup(key))
    }

    pub fn complete(&self, ticket: &FetchTicket, value: CachedValue) -> bool {
        self.txn(|t| t.complete(ticket, value))
    }

    pub fn abandon(&self, ticket: &FetchTicket) {
        self.txn(|t| t.abandon(ticket))
    }

    /// Current value of `key`, whatever its state
    pub fn get_query_data(&self, key: &CacheKey) -> Option<CachedValue> {
        self.txn(|t| t.get(key).cloned())
    }

    /// Seed or overwrite `key` with a fresh value
    pub fn set_query_data(&self, key: &CacheKey, value: CachedValue) {
        self.txn(|t| t.set(key, value))
    }

    pub fn state(&self, key: &CacheKey) -> EntryState {
        self.txn(|t| t.state(key))
    }

    pub fn is_fresh(&self, key: &CacheKey) -> bool {
        self.state(key).is_fresh()
    }

    pub fn invalidate(&self, prefix: &CacheKey) -> usize {
        self.txn(|t| t.invalidate(prefix))
    }

    pub fn evict_prefix(&self, prefix: &CacheKey) -> usize {
        self.txn(|t| t.evict_prefix(prefix))
    }

    /// Number of keys currently holding a value
    pub fn len(&self) -> usize {
        self.txn(|t| t.inner.slots.values().filter(|s| s.entry.is_some()).count())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop values past their gc deadline and forget idle keys
    ///
    /// Reads already evict expired values lazily; this sweep bounds memory
    /// for keys that are never read again.
    pub fn collect_garbage(&self) -> usize {
        self.txn(|t| {
            let now = t.now;
            let mut collected = 0;
            t.inner.slots.retain(|_, slot| {
                if slot.entry.as_ref().is_some_and(|e| now >= e.gc_at) {
                    slot.entry = None;
                    collected += 1;
                }
                slot.entry.is_some() || slot.revalidating
            });
            if collected > 0 {
                debug!("Collected {} expired cache entries", collected);
            }
            collected
        })
    }
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new(StalenessTable::default())
    }
}
