//! # Workflow Interpreter
//!
//! Runs a workflow's steps strictly in order against one shared
//! [`WorkflowContext`]:
//!
//! ```text
//! Running(0) ──step ok / skipped──▶ Running(i+1) ──…──▶ Completed(completed)
//!      │
//!      └──step failed──▶ Failed(completed, failed_step_id)
//! ```
//!
//! A step whose conditions do not all hold is skipped and recorded in
//! neither list. The first failing step aborts the run; later steps are never
//! attempted. Side effects other than `delay` and `branch` are delegated to a
//! [`StepEffects`] implementation so the interpreter itself stays pure
//! control flow.

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::conditions::all_hold;
use super::context::WorkflowContext;
use crate::constants::events;
use crate::execution::{ExecutionError, ProgressReporter};
use crate::logging::log_workflow_step;
use crate::models::{
    DeliveryJob, DocumentJob, MediaJob, NotificationJob, StepAction, WorkflowJob, WorkflowStep,
};

/// Side effects a workflow step can trigger
#[async_trait]
pub trait StepEffects: Send + Sync + std::fmt::Debug {
    async fn notify(&self, job: &NotificationJob) -> Result<Value, ExecutionError>;

    async fn deliver(&self, job: &DeliveryJob) -> Result<Value, ExecutionError>;

    async fn transform_media(&self, job: &MediaJob) -> Result<Value, ExecutionError>;

    async fn generate_document(&self, job: &DocumentJob) -> Result<Value, ExecutionError>;
}

/// Where a run currently stands
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum WorkflowState {
    Running {
        step_index: usize,
    },
    Completed {
        completed_steps: Vec<String>,
    },
    Failed {
        completed_steps: Vec<String>,
        failed_step_id: String,
    },
}

/// Result of a workflow that ran to the end
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowOutcome {
    pub workflow_id: String,
    pub completed_steps: Vec<String>,
    pub skipped_steps: Vec<String>,
    pub context: Map<String, Value>,
}

#[derive(Debug)]
struct WorkflowRun<'a> {
    workflow_id: &'a str,
    context: WorkflowContext,
    completed: Vec<String>,
    failed: Vec<String>,
    skipped: Vec<String>,
    state: WorkflowState,
}

#[derive(Debug, Clone)]
pub struct WorkflowInterpreter {
    effects: Arc<dyn StepEffects>,
}

impl WorkflowInterpreter {
    pub fn new(effects: Arc<dyn StepEffects>) -> Self {
        Self { effects }
    }

    pub async fn run(
        &self,
        workflow: &WorkflowJob,
        progress: Option<&ProgressReporter>,
    ) -> Result<WorkflowOutcome, ExecutionError> {
        let mut run = WorkflowRun {
            workflow_id: &workflow.workflow_id,
            context: WorkflowContext::new(workflow.context.clone()),
            completed: Vec::new(),
            failed: Vec::new(),
            skipped: Vec::new(),
            state: WorkflowState::Running { step_index: 0 },
        };
        let total = workflow.steps.len();

        for (index, step) in workflow.steps.iter().enumerate() {
            run.state = WorkflowState::Running { step_index: index };
            if let Err(abort) = self.run_step(step, &mut run).await {
                run.state = WorkflowState::Failed {
                    completed_steps: run.completed.clone(),
                    failed_step_id: run.failed.last().cloned().unwrap_or_default(),
                };
                debug!(workflow_id = %workflow.workflow_id, state = ?run.state, "workflow aborted");
                return Err(abort);
            }
            if let Some(progress) = progress {
                progress.update(((index + 1) * 100 / total) as u8).await;
            }
        }

        run.state = WorkflowState::Completed {
            completed_steps: run.completed.clone(),
        };
        debug!(workflow_id = %workflow.workflow_id, state = ?run.state, "workflow finished");

        Ok(WorkflowOutcome {
            workflow_id: workflow.workflow_id.clone(),
            completed_steps: run.completed,
            skipped_steps: run.skipped,
            context: run.context.into_inner(),
        })
    }

    fn run_steps<'a>(
        &'a self,
        steps: &'a [WorkflowStep],
        run: &'a mut WorkflowRun<'_>,
    ) -> BoxFuture<'a, Result<(), ExecutionError>> {
        Box::pin(async move {
            for step in steps {
                self.run_step(step, run).await?;
            }
            Ok(())
        })
    }

    async fn run_step(
        &self,
        step: &WorkflowStep,
        run: &mut WorkflowRun<'_>,
    ) -> Result<(), ExecutionError> {
        let kind = step.kind().to_string();

        if !all_hold(&step.conditions, &run.context) {
            run.skipped.push(step.id.clone());
            log_workflow_step(events::WORKFLOW_STEP_SKIPPED, run.workflow_id, &step.id, &kind, None);
            return Ok(());
        }

        let result = match &step.action {
            StepAction::Notify(job) => self.effects.notify(job).await,
            StepAction::Deliver(job) => self.effects.deliver(job).await,
            StepAction::Delay(delay) => {
                tokio::time::sleep(Duration::from_millis(delay.duration_ms)).await;
                Ok(json!({ "delayedMs": delay.duration_ms }))
            }
            StepAction::Branch(branch) => {
                let taken = all_hold(&branch.conditions, &run.context);
                let steps = if taken { &branch.on_true } else { &branch.on_false };
                // A nested failure is already recorded and wrapped
                self.run_steps(steps, run).await?;
                Ok(json!({
                    "branch": if taken { "on_true" } else { "on_false" },
                    "steps": steps.len(),
                }))
            }
            StepAction::TransformMedia(job) => self.effects.transform_media(job).await,
            StepAction::GenerateDocument(job) => self.effects.generate_document(job).await,
        };

        match result {
            Ok(output) => {
                run.completed.push(step.id.clone());
                run.context.record_step_output(&step.id, output);
                log_workflow_step(events::WORKFLOW_STEP_COMPLETED, run.workflow_id, &step.id, &kind, None);
                Ok(())
            }
            Err(cause) => {
                run.failed.push(step.id.clone());
                let cause = cause.to_string();
                log_workflow_step(
                    events::WORKFLOW_STEP_FAILED,
                    run.workflow_id,
                    &step.id,
                    &kind,
                    Some(&cause),
                );
                Err(ExecutionError::WorkflowAbort {
                    step_id: step.id.clone(),
                    cause,
                    completed_steps: run.completed.clone(),
                    failed_steps: run.failed.clone(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BranchConfig, ConditionOperator, DelayConfig, WorkflowCondition};
    use parking_lot::Mutex;

    /// Records every notification; recipients starting with `fail` error out
    #[derive(Debug, Default)]
    struct RecordingEffects {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl StepEffects for RecordingEffects {
        async fn notify(&self, job: &NotificationJob) -> Result<Value, ExecutionError> {
            self.calls.lock().push(job.to.clone());
            if job.to.starts_with("fail") {
                return Err(ExecutionError::permanent(format!("{} bounced", job.to)));
            }
            Ok(json!({"messageId": format!("msg-{}", job.to)}))
        }

        async fn deliver(&self, _job: &DeliveryJob) -> Result<Value, ExecutionError> {
            Ok(json!({"status": 200}))
        }

        async fn transform_media(&self, _job: &MediaJob) -> Result<Value, ExecutionError> {
            Ok(json!({}))
        }

        async fn generate_document(&self, _job: &DocumentJob) -> Result<Value, ExecutionError> {
            Ok(json!({}))
        }
    }

    fn notify(id: &str, to: &str) -> WorkflowStep {
        WorkflowStep::new(
            id,
            StepAction::Notify(NotificationJob {
                to: to.to_string(),
                template: "t".to_string(),
                variables: Map::new(),
                attachments: vec![],
            }),
        )
    }

    fn workflow(steps: Vec<WorkflowStep>, context: Value) -> WorkflowJob {
        WorkflowJob {
            workflow_id: "wf-1".to_string(),
            name: None,
            steps,
            context: context.as_object().cloned().unwrap_or_default(),
        }
    }

    fn interpreter() -> (Arc<RecordingEffects>, WorkflowInterpreter) {
        let effects = Arc::new(RecordingEffects::default());
        (effects.clone(), WorkflowInterpreter::new(effects))
    }

    #[tokio::test]
    async fn test_fail_fast_stops_later_steps() {
        let (effects, interpreter) = interpreter();
        let wf = workflow(
            vec![notify("A", "a"), notify("B", "fail-b"), notify("C", "c")],
            json!({}),
        );

        let err = interpreter.run(&wf, None).await.unwrap_err();
        match err {
            ExecutionError::WorkflowAbort {
                step_id,
                completed_steps,
                failed_steps,
                ..
            } => {
                assert_eq!(step_id, "B");
                assert_eq!(completed_steps, vec!["A"]);
                assert_eq!(failed_steps, vec!["B"]);
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(*effects.calls.lock(), vec!["a", "fail-b"]);
    }

    #[tokio::test]
    async fn test_abort_message_names_step() {
        let (_, interpreter) = interpreter();
        let wf = workflow(vec![notify("send", "fail-x")], json!({}));
        let err = interpreter.run(&wf, None).await.unwrap_err();
        assert_eq!(err.to_string(), "workflow failed at step send: fail-x bounced");
    }

    #[tokio::test]
    async fn test_skipped_steps_are_not_recorded() {
        let (effects, interpreter) = interpreter();
        let wf = workflow(
            vec![
                notify("gold-only", "vip").with_condition(WorkflowCondition::new(
                    "client.tier",
                    ConditionOperator::Equals,
                    json!("gold"),
                )),
                notify("everyone", "all"),
            ],
            json!({"client": {"tier": "silver"}}),
        );

        let outcome = interpreter.run(&wf, None).await.unwrap();
        assert_eq!(outcome.completed_steps, vec!["everyone"]);
        assert_eq!(outcome.skipped_steps, vec!["gold-only"]);
        assert_eq!(*effects.calls.lock(), vec!["all"]);
    }

    #[tokio::test]
    async fn test_step_outputs_feed_later_conditions() {
        let (effects, interpreter) = interpreter();
        let wf = workflow(
            vec![
                notify("first", "a"),
                notify("second", "b").with_condition(WorkflowCondition::new(
                    "steps.first.messageId",
                    ConditionOperator::Contains,
                    json!("msg-a"),
                )),
            ],
            json!({}),
        );

        let outcome = interpreter.run(&wf, None).await.unwrap();
        assert_eq!(outcome.completed_steps, vec!["first", "second"]);
        assert_eq!(effects.calls.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_branch_runs_chosen_list() {
        let (effects, interpreter) = interpreter();
        let branch = WorkflowStep::new(
            "route",
            StepAction::Branch(BranchConfig {
                conditions: vec![WorkflowCondition::new(
                    "paid",
                    ConditionOperator::Equals,
                    json!(true),
                )],
                on_true: vec![notify("thanks", "client")],
                on_false: vec![notify("reminder", "client-late")],
            }),
        );
        let wf = workflow(vec![branch], json!({"paid": false}));

        let outcome = interpreter.run(&wf, None).await.unwrap();
        assert_eq!(outcome.completed_steps, vec!["reminder", "route"]);
        assert_eq!(*effects.calls.lock(), vec!["client-late"]);
        assert_eq!(outcome.context["steps"]["route"]["branch"], json!("on_false"));
    }

    #[tokio::test]
    async fn test_nested_failure_aborts_with_nested_id() {
        let (_, interpreter) = interpreter();
        let branch = WorkflowStep::new(
            "route",
            StepAction::Branch(BranchConfig {
                conditions: vec![],
                on_true: vec![notify("inner", "fail-inner")],
                on_false: vec![],
            }),
        );
        let wf = workflow(vec![branch, notify("after", "x")], json!({}));

        let err = interpreter.run(&wf, None).await.unwrap_err();
        match err {
            ExecutionError::WorkflowAbort {
                step_id,
                failed_steps,
                ..
            } => {
                assert_eq!(step_id, "inner");
                assert_eq!(failed_steps, vec!["inner"]);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_and_progress() {
        let (_, interpreter) = interpreter();
        let wf = workflow(
            vec![
                WorkflowStep::new("wait", StepAction::Delay(DelayConfig { duration_ms: 5_000 })),
                notify("ping", "a"),
                notify("skip", "b").with_condition(WorkflowCondition::new(
                    "never",
                    ConditionOperator::Equals,
                    json!(1),
                )),
            ],
            json!({}),
        );
        let progress = ProgressReporter::detached(crate::models::JobId::new());

        let started = tokio::time::Instant::now();
        let outcome = interpreter.run(&wf, Some(&progress)).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(5_000));
        assert_eq!(outcome.completed_steps, vec!["wait", "ping"]);
        assert_eq!(progress.last_reported(), 100);
    }
}
