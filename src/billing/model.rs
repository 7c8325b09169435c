//! Billing records as seen by the cache
//!
//! The collaborator is the system of record; everything here is a copy.

use crate::error::{BillingError, BillingResult};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

const TEMP_PREFIX: &str = "temp-";

/// Time entry identifier
///
/// Real identifiers are assigned by the collaborator. Identifiers minted
/// locally for optimistic creates carry a `temp-` prefix followed by a v4
/// UUID and never reach the collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimeEntryId(String);

impl TimeEntryId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Mint a placeholder identifier for an optimistic create
    pub fn temporary() -> Self {
        Self(format!("{}{}", TEMP_PREFIX, Uuid::new_v4()))
    }

    pub fn is_temporary(&self) -> bool {
        self.0.starts_with(TEMP_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TimeEntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TimeEntryId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Submission status of a time entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    #[default]
    Draft,
    Submitted,
    Approved,
    Billed,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Submitted => "submitted",
            Self::Approved => "approved",
            Self::Billed => "billed",
        }
    }

    /// Whether the entry still belongs on the unsubmitted list
    pub fn is_unsubmitted(&self) -> bool {
        matches!(self, Self::Draft)
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inclusive calendar date range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

/// One billable unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeEntry {
    pub id: TimeEntryId,
    pub matter_id: String,
    pub client_id: Option<String>,
    pub description: String,
    pub hours: Decimal,
    pub rate: Decimal,
    pub date: NaiveDate,
    pub billable: bool,
    pub status: EntryStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TimeEntry {
    /// Build the optimistic stand-in for an entry the collaborator has not
    /// confirmed yet
    pub fn provisional(new: &NewTimeEntry) -> Self {
        let now = Utc::now();
        Self {
            id: TimeEntryId::temporary(),
            matter_id: new.matter_id.clone(),
            client_id: new.client_id.clone(),
            description: new.description.clone(),
            hours: new.hours,
            rate: new.rate,
            date: new.date,
            billable: new.billable,
            status: EntryStatus::Draft,
            created_at: now,
            updated_at: now,
        }
    }

    /// Billed amount, hours times rate
    pub fn amount(&self) -> Decimal {
        self.hours * self.rate
    }

    /// Merge the fields present in `patch` and bump `updated_at`
    pub fn apply(&mut self, patch: &TimeEntryPatch) {
        if let Some(matter_id) = &patch.matter_id {
            self.matter_id = matter_id.clone();
        }
        if let Some(client_id) = &patch.client_id {
            self.client_id = Some(client_id.clone());
        }
        if let Some(description) = &patch.description {
            self.description = description.clone();
        }
        if let Some(hours) = patch.hours {
            self.hours = hours;
        }
        if let Some(rate) = patch.rate {
            self.rate = rate;
        }
        if let Some(date) = patch.date {
            self.date = date;
        }
        if let Some(billable) = patch.billable {
            self.billable = billable;
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        self.updated_at = Utc::now();
    }
}

/// Fields submitted to create a time entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTimeEntry {
    pub matter_id: String,
    pub client_id: Option<String>,
    pub description: String,
    pub hours: Decimal,
    pub rate: Decimal,
    pub date: NaiveDate,
    pub billable: bool,
}

impl NewTimeEntry {
    /// Billable entry for `matter_id` dated today
    pub fn new(
        matter_id: impl Into<String>,
        description: impl Into<String>,
        hours: Decimal,
        rate: Decimal,
    ) -> Self {
        Self {
            matter_id: matter_id.into(),
            client_id: None,
            description: description.into(),
            hours,
            rate,
            date: Utc::now().date_naive(),
            billable: true,
        }
    }

    pub fn with_client(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.date = date;
        self
    }

    /// Reject input the collaborator would refuse anyway
    pub fn validate(&self) -> BillingResult<()> {
        if self.matter_id.trim().is_empty() {
            return Err(BillingError::validation("matter is required"));
        }
        if self.description.trim().is_empty() {
            return Err(BillingError::validation("description is required"));
        }
        validate_hours(self.hours)?;
        validate_rate(self.rate)
    }
}

/// Partial update of a time entry; `None` leaves a field untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeEntryPatch {
    pub matter_id: Option<String>,
    pub client_id: Option<String>,
    pub description: Option<String>,
    pub hours: Option<Decimal>,
    pub rate: Option<Decimal>,
    pub date: Option<NaiveDate>,
    pub billable: Option<bool>,
    pub status: Option<EntryStatus>,
}

impl TimeEntryPatch {
    pub fn hours(hours: Decimal) -> Self {
        Self {
            hours: Some(hours),
            ..Self::default()
        }
    }

    pub fn status(status: EntryStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> BillingResult<()> {
        if let Some(hours) = self.hours {
            validate_hours(hours)?;
        }
        if let Some(rate) = self.rate {
            validate_rate(rate)?;
        }
        if self.description.as_deref().is_some_and(|d| d.trim().is_empty()) {
            return Err(BillingError::validation("description is required"));
        }
        Ok(())
    }
}

fn validate_hours(hours: Decimal) -> BillingResult<()> {
    if hours <= Decimal::ZERO {
        return Err(BillingError::validation("hours must be positive"));
    }
    Ok(())
}

fn validate_rate(rate: Decimal) -> BillingResult<()> {
    if rate < Decimal::ZERO {
        return Err(BillingError::validation("rate must not be negative"));
    }
    Ok(())
}

/// Filters accepted by the time entry list query
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeEntryFilters {
    pub matter_id: Option<String>,
    pub client_id: Option<String>,
    pub status: Option<EntryStatus>,
    pub date_range: Option<DateRange>,
}

impl TimeEntryFilters {
    pub fn matter(id: impl Into<String>) -> Self {
        Self {
            matter_id: Some(id.into()),
            ..Self::default()
        }
    }

    pub fn client(id: impl Into<String>) -> Self {
        Self {
            client_id: Some(id.into()),
            ..Self::default()
        }
    }

    pub fn status(status: EntryStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn date_range(range: DateRange) -> Self {
        Self {
            date_range: Some(range),
            ..Self::default()
        }
    }

    /// Whether `entry` satisfies every filter that is set
    pub fn matches(&self, entry: &TimeEntry) -> bool {
        self.matter_id.as_ref().is_none_or(|m| *m == entry.matter_id)
            && self
                .client_id
                .as_ref()
                .is_none_or(|c| entry.client_id.as_ref() == Some(c))
            && self.status.is_none_or(|s| s == entry.status)
            && self.date_range.is_none_or(|r| r.contains(entry.date))
    }
}

/// Matter option offered on the time entry form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatterSummary {
    pub id: String,
    pub name: String,
    pub matter_number: Option<String>,
    pub client_id: String,
    pub client_name: String,
    pub default_rate: Option<Decimal>,
}

/// Billing totals for one client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientBillingSummary {
    pub client_id: String,
    pub total_hours: Decimal,
    pub billed_amount: Decimal,
    pub unbilled_amount: Decimal,
    pub unsubmitted_count: u32,
}

/// Per-matter slice of the analytics aggregate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatterBreakdown {
    pub matter_id: String,
    pub hours: Decimal,
    pub amount: Decimal,
}

/// Billing analytics aggregate over an optional date range
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsResult {
    pub range: Option<DateRange>,
    pub entry_count: u32,
    pub total_hours: Decimal,
    pub billable_hours: Decimal,
    pub total_amount: Decimal,
    pub by_matter: Vec<MatterBreakdown>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TimeEntry {
        TimeEntry::provisional(
            &NewTimeEntry::new("M1", "Research", Decimal::new(2, 0), Decimal::new(300, 0))
                .with_client("C1"),
        )
    }

    #[test]
    fn temporary_ids_are_unique_and_marked() {
        let a = TimeEntryId::temporary();
        let b = TimeEntryId::temporary();
        assert_ne!(a, b);
        assert!(a.is_temporary());
        assert!(!TimeEntryId::new("te_1").is_temporary());
    }

    #[test]
    fn provisional_entry_is_draft() {
        let entry = sample();
        assert!(entry.id.is_temporary());
        assert_eq!(entry.status, EntryStatus::Draft);
        assert_eq!(entry.created_at, entry.updated_at);
        assert_eq!(entry.amount(), Decimal::new(600, 0));
    }

    #[test]
    fn apply_merges_only_present_fields() {
        let mut entry = sample();
        let before = entry.updated_at;
        entry.apply(&TimeEntryPatch::hours(Decimal::new(5, 0)));

        assert_eq!(entry.hours, Decimal::new(5, 0));
        assert_eq!(entry.description, "Research");
        assert!(entry.updated_at >= before);
    }

    #[test]
    fn validation_rejects_bad_input() {
        let zero = NewTimeEntry::new("M1", "Call", Decimal::ZERO, Decimal::new(100, 0));
        assert!(zero.validate().unwrap_err().is_client_error());

        let negative_rate = NewTimeEntry::new("M1", "Call", Decimal::ONE, Decimal::new(-1, 0));
        assert!(negative_rate.validate().is_err());

        let no_matter = NewTimeEntry::new(" ", "Call", Decimal::ONE, Decimal::ZERO);
        assert!(no_matter.validate().is_err());

        let ok = NewTimeEntry::new("M1", "Call", Decimal::ONE, Decimal::ZERO);
        assert!(ok.validate().is_ok());

        assert!(TimeEntryPatch::hours(Decimal::new(-2, 0)).validate().is_err());
    }

    #[test]
    fn filters_match_all_set_fields() {
        let entry = sample();
        assert!(TimeEntryFilters::default().matches(&entry));
        assert!(TimeEntryFilters::matter("M1").matches(&entry));
        assert!(!TimeEntryFilters::matter("M2").matches(&entry));
        assert!(TimeEntryFilters::client("C1").matches(&entry));
        assert!(!TimeEntryFilters::status(EntryStatus::Billed).matches(&entry));

        let today = entry.date;
        let range = DateRange::new(today, today);
        assert!(TimeEntryFilters::date_range(range).matches(&entry));
    }

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&EntryStatus::Submitted).unwrap();
        assert_eq!(json, "\"submitted\"");
    }
}
