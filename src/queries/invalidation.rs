//! Which cached scopes each mutation makes untrustworthy
//!
//! The table is the single source of truth: mutation executors consult it
//! both to cancel in-flight revalidations before writing optimistically and
//! to invalidate after the collaborator call settles.
//!
//! | Mutation | Rules |
//! |----------|-------|
//! | create | time entries, unsubmitted, recent, analytics |
//! | update | entry, time entries, unsubmitted if status changed, analytics |
//! | delete | time entries, unsubmitted, analytics, evict entry |
//! | submit | time entries, unsubmitted, analytics |

use crate::billing::model::TimeEntryId;
use crate::cache::key::{self, CacheKey};
use crate::cache::store::CacheTxn;

/// Kinds of mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationKind {
    Create,
    Update,
    Delete,
    Submit,
}

impl MutationKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Create => "create time entry",
            Self::Update => "update time entry",
            Self::Delete => "delete time entry",
            Self::Submit => "submit time entries",
        }
    }

    /// Whether the mutation writes to cached lists before the remote call
    pub fn is_optimistic(&self) -> bool {
        !matches!(self, Self::Submit)
    }
}

/// Group of keys sharing a prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFamily {
    /// Every time entry list, including scoped and recent lists
    TimeEntries,
    Unsubmitted,
    Recent,
    Analytics,
    /// The single-entry key of the mutated entry
    Entry,
}

impl KeyFamily {
    /// Prefix naming this family; `Entry` needs a target id
    pub fn prefix(&self, target: Option<&TimeEntryId>) -> Option<CacheKey> {
        match self {
            Self::TimeEntries => Some(key::time_entries()),
            Self::Unsubmitted => Some(key::unsubmitted_entries()),
            Self::Recent => Some(key::recent_time_entries_root()),
            Self::Analytics => Some(key::analytics_root()),
            Self::Entry => target.map(key::time_entry),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Lazy: keep the value, force a fetch on next read
    Invalidate,
    /// Drop the value
    Evict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    Always,
    /// Only when the mutation changed the entry's submission status
    StatusChanged,
}

/// One rule of a policy row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Invalidation {
    pub family: KeyFamily,
    pub action: Action,
    pub condition: Condition,
}

const fn always(family: KeyFamily) -> Invalidation {
    Invalidation {
        family,
        action: Action::Invalidate,
        condition: Condition::Always,
    }
}

const fn on_status_change(family: KeyFamily) -> Invalidation {
    Invalidation {
        family,
        action: Action::Invalidate,
        condition: Condition::StatusChanged,
    }
}

const fn evict(family: KeyFamily) -> Invalidation {
    Invalidation {
        family,
        action: Action::Evict,
        condition: Condition::Always,
    }
}

/// Rules for one mutation kind
#[derive(Debug)]
pub struct PolicyRow {
    pub mutation: MutationKind,
    pub rules: &'static [Invalidation],
}

pub static INVALIDATION_POLICY: [PolicyRow; 4] = [
    PolicyRow {
        mutation: MutationKind::Create,
        rules: &[
            always(KeyFamily::TimeEntries),
            always(KeyFamily::Unsubmitted),
            always(KeyFamily::Recent),
            always(KeyFamily::Analytics),
        ],
    },
    PolicyRow {
        mutation: MutationKind::Update,
        rules: &[
            always(KeyFamily::Entry),
            always(KeyFamily::TimeEntries),
            on_status_change(KeyFamily::Unsubmitted),
            always(KeyFamily::Analytics),
        ],
    },
    PolicyRow {
        mutation: MutationKind::Delete,
        rules: &[
            always(KeyFamily::TimeEntries),
            always(KeyFamily::Unsubmitted),
            always(KeyFamily::Analytics),
            evict(KeyFamily::Entry),
        ],
    },
    PolicyRow {
        mutation: MutationKind::Submit,
        rules: &[
            always(KeyFamily::TimeEntries),
            always(KeyFamily::Unsubmitted),
            always(KeyFamily::Analytics),
        ],
    },
];

pub fn rules_for(kind: MutationKind) -> &'static [Invalidation] {
    INVALIDATION_POLICY
        .iter()
        .find(|row| row.mutation == kind)
        .map(|row| row.rules)
        .unwrap_or(&[])
}

/// Every prefix `kind` may touch, conditions ignored
pub fn affected_prefixes(kind: MutationKind, target: Option<&TimeEntryId>) -> Vec<CacheKey> {
    rules_for(kind)
        .iter()
        .filter_map(|rule| rule.family.prefix(target))
        .collect()
}

/// Apply the row for `kind`; returns the number of values touched
pub fn apply(
    txn: &mut CacheTxn<'_>,
    kind: MutationKind,
    target: Option<&TimeEntryId>,
    status_changed: bool,
) -> usize {
    let mut touched = 0;
    for rule in rules_for(kind) {
        if rule.condition == Condition::StatusChanged && !status_changed {
            continue;
        }
        let Some(prefix) = rule.family.prefix(target) else {
            continue;
        };
        touched += match rule.action {
            Action::Invalidate => txn.invalidate(&prefix),
            Action::Evict => txn.evict_prefix(&prefix),
        };
    }
    touched
}
