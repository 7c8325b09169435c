//! Session-scoped read-through cache
//!
//! Keys are hierarchical so whole scopes can be invalidated by prefix.
//! Values carry fresh and gc deadlines; every key has a generation that
//! late fetch results must match before they are stored.

pub mod key;
pub mod retry;
pub mod scope;
pub mod store;

pub use key::{CacheKey, KeySegment};
pub use retry::RetryPolicy;
pub use scope::ListScope;
pub use store::{
    CacheEntry, CacheTxn, CachedValue, EntryState, FetchTicket, Lookup, QueryCache,
    ResourceClass, Snapshot, Staleness, StalenessTable, TimeEntryList,
};
