//! Shared utilities for spad
//!
//! This crate provides:
//! - ID types (TargetId, ScheduleId, RunId)
//! - Time utilities (mock clock, wall-clock and date formats)
//! - Per-key retry backoff
//! - Default paths for config and data directories

mod backoff;
mod ids;
mod paths;
mod time;

pub use backoff::*;
pub use ids::*;
pub use paths::*;
pub use time::*;
