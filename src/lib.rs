//! Billing Cache - time entry query layer
//!
//! Read-through cache over a billing backend with optimistic writes,
//! snapshot rollback, and a fixed invalidation policy keeping dependent
//! views (unsubmitted, recent, analytics) consistent with the backend.

pub mod billing;
pub mod cache;
pub mod config;
pub mod error;
pub mod logging;
pub mod queries;

pub use billing::BillingService;
pub use error::{BillingError, BillingResult};
pub use queries::BillingQueries;
