//! Logging utilities.
//!
//! Structured logging itself goes through `tracing`; this module carries the
//! rate-limiting helpers used on hot keeper paths.

pub mod throttle;

pub use throttle::LogThrottle;
