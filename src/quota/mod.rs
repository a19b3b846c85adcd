//! Quota module
//!
//! Per-user daily prediction quota tied to the subscription plan.

pub mod gate;

pub use gate::{DenyReason, QuotaDecision, QuotaGate, QuotaPolicy, QuotaStatus};
