//! Domain model and pure helpers for the vidfleet control plane.
//!
//! Nothing in this crate performs I/O. Node and job records, status
//! transition rules, progress-marker parsing, log-based output resolution,
//! remote command construction and backoff arithmetic all live here so the
//! store, transport and engine crates share a single definition.

pub mod backoff;
pub mod error;
pub mod job;
pub mod lenient;
pub mod node;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod types;
