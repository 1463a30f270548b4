//! # Simcore Library
//!
//! Shared types and utilities for the simulated robot control stack.
//! This library is used by every crate in the workspace: pose algebra,
//! per-tick state snapshots, targets/commands/gains, device registry,
//! scene configuration, log records and the error taxonomy.

pub mod types;
pub mod utils;

// Re-export everything for convenience
pub use types::*;
pub use utils::*;
