//! Subscription relay module
//!
//! Consumes subscription-change events and applies them to usage records.

pub mod consumer;
pub mod event;

pub use consumer::{RelayOutcome, RelayStats, SubscriptionRelay};
pub use event::{parse_event, DropReason};
