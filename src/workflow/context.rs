use serde_json::{Map, Value};

/// Key under which step outputs are collected
pub const STEP_OUTPUTS_KEY: &str = "steps";

/// Shared key-value state of one workflow run
///
/// Conditions read it through dot-path [`lookup`](Self::lookup); steps write
/// to it only through [`record_step_output`](Self::record_step_output).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkflowContext {
    values: Map<String, Value>,
}

impl WorkflowContext {
    pub fn new(initial: Map<String, Value>) -> Self {
        Self { values: initial }
    }

    /// Resolve `a.b.c`; `None` when any segment is missing or its parent is
    /// not an object
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut current = self.values.get(first)?;
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    /// Store a step's output under `steps.<step_id>`
    pub fn record_step_output(&mut self, step_id: &str, output: Value) {
        let steps = self
            .values
            .entry(STEP_OUTPUTS_KEY)
            .or_insert_with(|| Value::Object(Map::new()));
        if !steps.is_object() {
            *steps = Value::Object(Map::new());
        }
        if let Value::Object(steps) = steps {
            steps.insert(step_id.to_string(), output);
        }
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.values
    }
}
