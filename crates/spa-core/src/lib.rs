//! Core scheduling logic for spad
//!
//! This crate contains:
//! - Window evaluation (is a schedule in effect right now?)
//! - Aggregation of active schedules into effective replica bounds
//! - Lifecycle status tracking for schedules and targets
//! - The per-target reconciliation pass driving the store
//! - A deduplicating work queue for reconciliation requests
//! - Manifest synchronisation into the store

mod aggregate;
mod events;
mod queue;
mod reconcile;
mod status;
mod sync;
mod window;

pub use aggregate::*;
pub use events::*;
pub use queue::*;
pub use reconcile::*;
pub use status::*;
pub use sync::*;
pub use window::*;
