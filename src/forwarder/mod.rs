//! Publish loop and process lifecycle
//!
//! - [`scheduler`] - Fixed-period sample, build and publish cycle
//! - [`lifecycle`] - Wiring of session, sensor and loop; shutdown handling

pub mod lifecycle;
pub mod scheduler;

pub use lifecycle::{build_sensor, supervise, Forwarder};
pub use scheduler::{CycleOutcome, CycleStats, CycleStatsSnapshot, PublishScheduler};
