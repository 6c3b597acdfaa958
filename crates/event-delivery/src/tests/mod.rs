//! Scenario tests for the assembled pipeline.
//!
//! - `harness.rs`  - Mock transport, connection, store, callback and HTTP collector
//! - `backoff.rs`  - Lockdown growth and recovery seen through the full chain
//! - `crash_safety.rs` - Store traffic on the write path and across a restart
//! - `outage.rs`   - Collector outages against a mock HTTP collector
//! - `shutdown.rs` - Bounded shutdown and hook ordering

mod backoff;
mod crash_safety;
mod outage;
mod shutdown;
