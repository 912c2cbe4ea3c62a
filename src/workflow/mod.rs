//! # Workflow Interpretation
//!
//! Workflows are ordered step lists executed on the workflow queue. Steps
//! share a JSON context seeded from the job and extended with each step's
//! output under `steps.<id>`, which later step conditions can read by dot
//! path.

pub mod conditions;
pub mod context;
pub mod interpreter;

pub use conditions::{all_hold, evaluate};
pub use context::{WorkflowContext, STEP_OUTPUTS_KEY};
pub use interpreter::{StepEffects, WorkflowInterpreter, WorkflowOutcome, WorkflowState};
