//! # Execution
//!
//! Classified processor errors, progress reporting, and the [`Worker`] that
//! drives one queue.

pub mod errors;
pub mod progress;
pub mod worker;

pub use errors::ExecutionError;
pub use progress::ProgressReporter;
pub use worker::{Worker, WorkerStats};
