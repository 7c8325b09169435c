//! Hierarchical cache keys
//!
//! Every cached result set is named by a tuple of segments rooted at
//! `billing`. A key that is a prefix of another names a broader scope, so
//! invalidating `billing/timeEntries` reaches every time entry list.

use crate::billing::model::{DateRange, EntryStatus, TimeEntryId};
use std::fmt;

const ROOT: &str = "billing";
const TIME_ENTRIES: &str = "timeEntries";
const TIME_ENTRY: &str = "timeEntry";
const UNSUBMITTED: &str = "unsubmitted";
const RECENT: &str = "recent";
const MATTERS: &str = "matters";
const CLIENT: &str = "client";
const ANALYTICS: &str = "analytics";
const UNBOUNDED: &str = "all";

/// One key segment
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeySegment {
    Text(String),
    Number(u64),
}

impl fmt::Display for KeySegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Number(n) => write!(f, "{n}"),
        }
    }
}

impl From<&str> for KeySegment {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for KeySegment {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<u64> for KeySegment {
    fn from(n: u64) -> Self {
        Self::Number(n)
    }
}

/// Ordered sequence of segments naming one cached result set
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(Vec<KeySegment>);

impl CacheKey {
    pub fn new(segments: Vec<KeySegment>) -> Self {
        Self(segments)
    }

    pub fn segments(&self) -> &[KeySegment] {
        &self.0
    }

    /// Whether `prefix` names this key or a scope containing it
    pub fn starts_with(&self, prefix: &CacheKey) -> bool {
        self.0.starts_with(&prefix.0)
    }

    fn child(&self, segment: impl Into<KeySegment>) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        Self(segments)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}

pub fn billing_root() -> CacheKey {
    CacheKey(vec![ROOT.into()])
}

/// Every time entry list, including by-scope and recent lists
pub fn time_entries() -> CacheKey {
    billing_root().child(TIME_ENTRIES)
}

pub fn time_entries_by_matter(matter_id: &str) -> CacheKey {
    time_entries().child("matter").child(matter_id)
}

pub fn time_entries_by_client(client_id: &str) -> CacheKey {
    time_entries().child("client").child(client_id)
}

pub fn time_entries_by_status(status: EntryStatus) -> CacheKey {
    time_entries().child("status").child(status.as_str())
}

pub fn time_entries_by_range(range: &DateRange) -> CacheKey {
    time_entries()
        .child("range")
        .child(range.start.to_string())
        .child(range.end.to_string())
}

pub fn recent_time_entries_root() -> CacheKey {
    time_entries().child(RECENT)
}

pub fn recent_time_entries(limit: u32) -> CacheKey {
    recent_time_entries_root().child(u64::from(limit))
}

/// Every single-entry key
pub fn time_entry_root() -> CacheKey {
    billing_root().child(TIME_ENTRY)
}

pub fn time_entry(id: &TimeEntryId) -> CacheKey {
    time_entry_root().child(id.as_str())
}

pub fn unsubmitted_entries() -> CacheKey {
    billing_root().child(UNSUBMITTED)
}

pub fn matters_for_entry_form() -> CacheKey {
    billing_root().child(MATTERS).child("forTimeEntry")
}

pub fn client_billing(client_id: &str) -> CacheKey {
    billing_root().child(CLIENT).child(client_id)
}

pub fn analytics_root() -> CacheKey {
    billing_root().child(ANALYTICS)
}

pub fn analytics(range: Option<&DateRange>) -> CacheKey {
    match range {
        Some(r) => analytics_root()
            .child(r.start.to_string())
            .child(r.end.to_string()),
        None => analytics_root().child(UNBOUNDED).child(UNBOUNDED),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn range(start: u32, end: u32) -> DateRange {
        DateRange::new(
            NaiveDate::from_ymd_opt(2024, 3, start).unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, end).unwrap(),
        )
    }

    #[test]
    fn keys_are_deterministic() {
        assert_eq!(time_entries_by_matter("M1"), time_entries_by_matter("M1"));
        assert_eq!(analytics(Some(&range(1, 31))), analytics(Some(&range(1, 31))));
        assert_eq!(recent_time_entries(10), recent_time_entries(10));
    }

    #[test]
    fn differing_parameters_give_distinct_keys() {
        let keys = [
            time_entries(),
            time_entries_by_matter("M1"),
            time_entries_by_matter("M2"),
            time_entries_by_client("M1"),
            time_entries_by_status(EntryStatus::Draft),
            time_entries_by_status(EntryStatus::Submitted),
            time_entries_by_range(&range(1, 15)),
            time_entries_by_range(&range(1, 16)),
            recent_time_entries(5),
            recent_time_entries(10),
            time_entry(&TimeEntryId::new("M1")),
            unsubmitted_entries(),
            matters_for_entry_form(),
            client_billing("M1"),
            analytics(None),
            analytics(Some(&range(1, 31))),
        ];
        for (i, a) in keys.iter().enumerate() {
            for b in &keys[i + 1..] {
                assert_ne!(a, b, "{a} collides with {b}");
            }
        }
    }

    #[test]
    fn everything_lives_under_billing() {
        let root = billing_root();
        assert!(time_entries_by_client("C1").starts_with(&root));
        assert!(analytics(None).starts_with(&root));
        assert!(matters_for_entry_form().starts_with(&root));
    }

    #[test]
    fn prefix_scopes_cascade() {
        assert!(time_entries_by_matter("M1").starts_with(&time_entries()));
        assert!(recent_time_entries(5).starts_with(&time_entries()));
        assert!(recent_time_entries(5).starts_with(&recent_time_entries_root()));
        assert!(analytics(Some(&range(1, 2))).starts_with(&analytics_root()));
        assert!(!unsubmitted_entries().starts_with(&time_entries()));
        assert!(!time_entry(&TimeEntryId::new("x")).starts_with(&time_entries()));
    }

    #[test]
    fn display_joins_segments() {
        assert_eq!(recent_time_entries(7).to_string(), "billing/timeEntries/recent/7");
        assert_eq!(analytics(None).to_string(), "billing/analytics/all/all");
    }
}
