//! # Job State Machine
//!
//! Lifecycle states of a job and the events that move it between them:
//!
//! ```text
//! waiting ──claim──▶ active ──complete──▶ completed
//!    ▲                 │  └────fail─────▶ failed ──retry_failed──▶ waiting
//!    │                 └──retry──▶ delayed ──claim──▶ active
//!    └────stalled──────┘
//! ```
//!
//! Stores apply transitions through [`JobState::transition`] so an illegal
//! move (completing a job nobody claimed, claiming a finished job) is rejected
//! the same way by every backend.

pub mod events;
pub mod states;

pub use events::JobEvent;
pub use states::JobState;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateMachineError {
    #[error("Invalid transition from {from} on event {event}")]
    InvalidTransition { from: JobState, event: JobEvent },
}
