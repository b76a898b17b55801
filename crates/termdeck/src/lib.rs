//! Shared pieces of the termdeck binary.

pub mod telemetry;
