//! Which time entries a cached list holds

use crate::billing::model::{DateRange, EntryStatus, TimeEntry, TimeEntryFilters};
use crate::cache::key::{self, CacheKey};
use crate::cache::store::ResourceClass;

/// The population a cached time entry list was fetched for
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ListScope {
    All,
    Matter(String),
    Client(String),
    Status(EntryStatus),
    DateRange(DateRange),
    Unsubmitted,
    Recent(u32),
}

impl ListScope {
    /// Pick the scope for a filter set
    ///
    /// Precedence is matter, client, status, date range, then unscoped.
    /// Lower-precedence filters are dropped so that the key and the remote
    /// query always agree.
    pub fn from_filters(filters: &TimeEntryFilters) -> Self {
        if let Some(matter_id) = &filters.matter_id {
            Self::Matter(matter_id.clone())
        } else if let Some(client_id) = &filters.client_id {
            Self::Client(client_id.clone())
        } else if let Some(status) = filters.status {
            Self::Status(status)
        } else if let Some(range) = filters.date_range {
            Self::DateRange(range)
        } else {
            Self::All
        }
    }

    pub fn key(&self) -> CacheKey {
        match self {
            Self::All => key::time_entries(),
            Self::Matter(id) => key::time_entries_by_matter(id),
            Self::Client(id) => key::time_entries_by_client(id),
            Self::Status(status) => key::time_entries_by_status(*status),
            Self::DateRange(range) => key::time_entries_by_range(range),
            Self::Unsubmitted => key::unsubmitted_entries(),
            Self::Recent(limit) => key::recent_time_entries(*limit),
        }
    }

    pub fn class(&self) -> ResourceClass {
        match self {
            Self::Unsubmitted => ResourceClass::Unsubmitted,
            Self::Recent(_) => ResourceClass::Recent,
            _ => ResourceClass::TimeEntries,
        }
    }

    /// Filters to send to the collaborator's list call
    pub fn filters(&self) -> TimeEntryFilters {
        match self {
            Self::Matter(id) => TimeEntryFilters::matter(id.clone()),
            Self::Client(id) => TimeEntryFilters::client(id.clone()),
            Self::Status(status) => TimeEntryFilters::status(*status),
            Self::DateRange(range) => TimeEntryFilters::date_range(*range),
            Self::All | Self::Unsubmitted | Self::Recent(_) => TimeEntryFilters::default(),
        }
    }

    /// Whether `entry` belongs in a list of this scope
    pub fn admits(&self, entry: &TimeEntry) -> bool {
        match self {
            Self::Unsubmitted => entry.status.is_unsubmitted(),
            Self::All | Self::Recent(_) => true,
            _ => self.filters().matches(entry),
        }
    }
}
