//! Workflow definitions: ordered steps, their typed actions and guard conditions.
//!
//! On the wire a step is `{id, type, config, conditions?}`. The `type` tag picks
//! the [`StepAction`] variant and `config` is decoded into that variant's
//! payload, so an unknown type or a malformed config is rejected when the
//! workflow job is deserialized rather than when the step runs.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use super::payloads::{DeliveryJob, DocumentJob, MediaJob, NotificationJob};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowJob {
    pub workflow_id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub steps: Vec<WorkflowStep>,
    /// Initial shared context
    #[serde(default)]
    pub context: Map<String, Value>,
}

/// Step type tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepKind {
    Notify,
    Deliver,
    Delay,
    Branch,
    TransformMedia,
    GenerateDocument,
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StepKind::Notify => "notify",
            StepKind::Deliver => "deliver",
            StepKind::Delay => "delay",
            StepKind::Branch => "branch",
            StepKind::TransformMedia => "transform-media",
            StepKind::GenerateDocument => "generate-document",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayConfig {
    pub duration_ms: u64,
}

/// Nested step lists chosen by re-evaluating `conditions`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchConfig {
    #[serde(default)]
    pub conditions: Vec<WorkflowCondition>,
    #[serde(default, alias = "onTrue")]
    pub on_true: Vec<WorkflowStep>,
    #[serde(default, alias = "onFalse")]
    pub on_false: Vec<WorkflowStep>,
}

/// Side effect of a step
#[derive(Debug, Clone, PartialEq)]
pub enum StepAction {
    Notify(NotificationJob),
    Deliver(DeliveryJob),
    Delay(DelayConfig),
    Branch(BranchConfig),
    TransformMedia(MediaJob),
    GenerateDocument(DocumentJob),
}

impl StepAction {
    pub fn kind(&self) -> StepKind {
        match self {
            StepAction::Notify(_) => StepKind::Notify,
            StepAction::Deliver(_) => StepKind::Deliver,
            StepAction::Delay(_) => StepKind::Delay,
            StepAction::Branch(_) => StepKind::Branch,
            StepAction::TransformMedia(_) => StepKind::TransformMedia,
            StepAction::GenerateDocument(_) => StepKind::GenerateDocument,
        }
    }
}

/// One step of a workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StepDefinition", into = "StepDefinition")]
pub struct WorkflowStep {
    pub id: String,
    pub action: StepAction,
    /// ANDed; an empty list always holds
    pub conditions: Vec<WorkflowCondition>,
}

impl WorkflowStep {
    pub fn new(id: impl Into<String>, action: StepAction) -> Self {
        Self {
            id: id.into(),
            action,
            conditions: Vec::new(),
        }
    }

    pub fn with_condition(mut self, condition: WorkflowCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn kind(&self) -> StepKind {
        self.action.kind()
    }
}

/// Wire shape of a [`WorkflowStep`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    id: String,
    #[serde(rename = "type")]
    kind: StepKind,
    #[serde(default)]
    config: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    conditions: Option<Vec<WorkflowCondition>>,
}

impl TryFrom<StepDefinition> for WorkflowStep {
    type Error = String;

    fn try_from(definition: StepDefinition) -> Result<Self, Self::Error> {
        fn decode<T: serde::de::DeserializeOwned>(
            id: &str,
            kind: StepKind,
            config: Value,
        ) -> Result<T, String> {
            serde_json::from_value(config)
                .map_err(|e| format!("invalid config for {kind} step '{id}': {e}"))
        }

        let StepDefinition {
            id,
            kind,
            config,
            conditions,
        } = definition;

        let action = match kind {
            StepKind::Notify => StepAction::Notify(decode(&id, kind, config)?),
            StepKind::Deliver => StepAction::Deliver(decode(&id, kind, config)?),
            StepKind::Delay => StepAction::Delay(decode(&id, kind, config)?),
            StepKind::Branch => StepAction::Branch(decode(&id, kind, config)?),
            StepKind::TransformMedia => StepAction::TransformMedia(decode(&id, kind, config)?),
            StepKind::GenerateDocument => {
                StepAction::GenerateDocument(decode(&id, kind, config)?)
            }
        };

        Ok(WorkflowStep {
            id,
            action,
            conditions: conditions.unwrap_or_default(),
        })
    }
}

impl From<WorkflowStep> for StepDefinition {
    fn from(step: WorkflowStep) -> Self {
        let kind = step.kind();
        let config = match step.action {
            StepAction::Notify(job) => serde_json::to_value(job),
            StepAction::Deliver(job) => serde_json::to_value(job),
            StepAction::Delay(delay) => serde_json::to_value(delay),
            StepAction::Branch(branch) => serde_json::to_value(branch),
            StepAction::TransformMedia(job) => serde_json::to_value(job),
            StepAction::GenerateDocument(job) => serde_json::to_value(job),
        }
        .unwrap_or(Value::Null);

        StepDefinition {
            id: step.id,
            kind,
            config,
            conditions: (!step.conditions.is_empty()).then_some(step.conditions),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    Contains,
    GreaterThan,
    LessThan,
}

/// `{field: dot.path, operator, value}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowCondition {
    pub field: String,
    pub operator: ConditionOperator,
    #[serde(default)]
    pub value: Value,
}

impl WorkflowCondition {
    pub fn new(field: impl Into<String>, operator: ConditionOperator, value: Value) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
        }
    }
}
