//! Billing domain records and the collaborator that owns them

pub mod memory;
pub mod model;
pub mod service;

pub use memory::{InMemoryBillingService, Operation};
pub use model::{
    AnalyticsResult, ClientBillingSummary, DateRange, EntryStatus, MatterBreakdown,
    MatterSummary, NewTimeEntry, TimeEntry, TimeEntryFilters, TimeEntryId, TimeEntryPatch,
};
pub use service::BillingService;
