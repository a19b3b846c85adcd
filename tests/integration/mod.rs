//! Integration tests for the Augur prediction API
//!
//! Each test runs the real router over in-memory backends, with the
//! forecasting service mocked by wiremock. The Redis backends have their own
//! suite, skipped when no Redis is reachable.

mod prediction;
mod relay;
