//! Data model shared by the spad crates
//!
//! This crate defines:
//! - Schedule definitions and their window types
//! - Replica bounds (target baseline and scheduled overrides)
//! - Status conditions for schedules and targets

mod conditions;
mod types;

pub use conditions::*;
pub use types::*;
