//! Centralized security module for Coreward.
//!
//! See [`coreward`] for the module overview, architecture diagram,
//! and public API documentation.

mod audit;
mod coreward;
mod policy;
mod protected_files;
mod signing;
mod suffix;

// The coreward.rs facade controls the entire public API surface.
pub use self::coreward::*;
