//! Observability for the telemetry forwarder
//!
//! Structured logging with span macros for the broker session and the
//! publish cycle.

pub mod logging;

// Re-export for convenience
pub use logging::{init_default_logging, init_logging, LogFormat};

// Span macros for structured logging
pub use logging::{cycle_span, session_span};
