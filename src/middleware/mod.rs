//! Middleware module
//!
//! Tower middleware identifying the caller of quota-gated routes.

pub mod identity;
