//! stage_cache Library
//!
//! Stages paired index/data datasets from eventually-consistent object
//! stores onto local disk, shares each staged copy between readers, and
//! deletes it only once no reader is using it.

pub mod app;
pub mod cli;
pub mod config;
pub mod constants;
pub mod errors;
pub mod prelude;

// Re-export commonly used types for convenience
pub use errors::{AppError, Result};
