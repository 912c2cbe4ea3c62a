//! # Control Surface Handlers
//!
//! Grouped by concern: engine health and statistics, job listings and bulk
//! job operations, queue control.

pub mod health;
pub mod jobs;
pub mod queues;
