//! Error types for curriculum-trainer-rs.
//!
//! Three failure classes cross this crate's boundaries, and they are
//! deliberately not interchangeable:
//!
//! - [`TrainError::Config`] — invalid or inconsistent parameters. Raised
//!   before any loop iteration executes, never retried.
//! - [`TrainError::Persistence`] — an unreadable or corrupt checkpoint or
//!   spooled chunk. Fatal: once a checkpoint file exists but cannot be
//!   decoded, the run must not silently fall back to a fresh start.
//! - [`TrainError::Step`] — the model adapter failed during a train or
//!   evaluation step. Fatal and propagated immediately; a repeated
//!   identical input would fail identically, so there is no retry.
//!
//! # Example
//!
//! ```rust
//! use curriculum_trainer_rs::{Result, TrainError};
//!
//! fn require_run_id(run_id: &str) -> Result<()> {
//!     if run_id.is_empty() {
//!         return Err(TrainError::Config("run id must not be empty".into()));
//!     }
//!     Ok(())
//! }
//!
//! assert!(require_run_id("").is_err());
//! assert!(require_run_id("exp-7").is_ok());
//! ```

use thiserror::Error;

/// Result type alias for curriculum-trainer-rs operations.
pub type Result<T> = std::result::Result<T, TrainError>;

/// Errors that can occur while orchestrating a training run.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TrainError {
    /// Configuration error: mismatched stage lists, unknown strategy,
    /// missing required parameter. Detected before any training starts.
    #[error("configuration error: {0}")]
    Config(String),

    /// Invalid configuration file.
    #[error("invalid config file: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    /// Unreadable or corrupt checkpoint or chunk file.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Model adapter failure during a train or evaluation step.
    #[error("step error: {0}")]
    Step(String),

    /// Data source failure.
    #[error("data error: {0}")]
    Data(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
