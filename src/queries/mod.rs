//! Billing query and mutation executors
//!
//! [`BillingQueries`] is the entry point. Reads live in `read`, writes in
//! `mutate`, the post-mutation invalidation table in `invalidation`, and
//! cache warmers in `prefetch`.

pub mod client;
pub mod invalidation;
pub mod mutate;
pub mod prefetch;
pub mod read;

pub use client::BillingQueries;
pub use invalidation::{MutationKind, INVALIDATION_POLICY};
