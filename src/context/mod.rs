// Module: Context
// Per-event execution state: variable environment, step results, resources.

use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::protocol::{ExecutionError, StepResult};

/// Environment roots maintained by the context itself.
pub const ROOT_METADATA: &str = "metadata";
pub const ROOT_ADAPTER: &str = "adapter";
pub const ROOT_RESOURCES: &str = "resources";

/// Holds the mutable state of a single event execution.
///
/// Created at event start, filled monotonically (bindings are added,
/// never replaced - step names are unique and a step never reruns),
/// and discarded when the event completes. Not shared across events.
#[derive(Debug)]
pub struct ExecutionContext {
    /// Variable environment visible to templates and expressions.
    variables: HashMap<String, Value>,

    /// Parsed event payload. Addressable only through `event.<path>`
    /// param sources, not as an environment root.
    event: Value,

    /// Step results in execution order.
    step_order: Vec<String>,

    /// Step results by name.
    step_results: HashMap<String, StepResult>,
}

impl ExecutionContext {
    /// Creates a context for one event.
    ///
    /// `metadata` is the adapter config metadata bound under the
    /// `metadata` root. The `adapter` root starts with
    /// `executionStatus: "success"` so that guards like
    /// `adapter.executionStatus == "success"` hold until a failure
    /// flips it.
    pub fn new(metadata: Value, event: Value) -> Self {
        let mut variables = HashMap::new();
        variables.insert(ROOT_METADATA.to_string(), metadata);

        let mut adapter = Map::new();
        adapter.insert(
            "executionStatus".to_string(),
            Value::String("success".to_string()),
        );
        variables.insert(ROOT_ADAPTER.to_string(), Value::Object(adapter));
        variables.insert(ROOT_RESOURCES.to_string(), Value::Object(Map::new()));

        Self {
            variables,
            event,
            step_order: Vec::new(),
            step_results: HashMap::new(),
        }
    }

    /// The event payload this execution is processing.
    pub fn event(&self) -> &Value {
        &self.event
    }

    /// Read access to the whole environment.
    pub fn variables(&self) -> &HashMap<String, Value> {
        &self.variables
    }

    /// Looks up a root binding.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    /// Binds a value at the top level of the environment.
    pub fn bind(&mut self, name: impl Into<String>, value: Value) {
        self.variables.insert(name.into(), value);
    }

    /// Binds a reconciled object under `resources.<step>`.
    pub fn bind_resource(&mut self, step_name: &str, object: Value) {
        if let Some(Value::Object(resources)) = self.variables.get_mut(ROOT_RESOURCES) {
            resources.insert(step_name.to_string(), object);
        }
    }

    /// Records a step result in both the ordered list and the by-name map.
    pub fn record_result(&mut self, result: StepResult) {
        self.step_order.push(result.name.clone());
        self.step_results.insert(result.name.clone(), result);
    }

    /// The result of a previously executed step, by name.
    pub fn result(&self, name: &str) -> Option<&StepResult> {
        self.step_results.get(name)
    }

    /// All recorded results in execution order.
    pub fn results_in_order(&self) -> Vec<StepResult> {
        self.step_order
            .iter()
            .filter_map(|name| self.step_results.get(name).cloned())
            .collect()
    }

    /// Flips `adapter.executionStatus` to failed and records the first
    /// error under `adapter.errorReason` / `adapter.errorMessage` /
    /// `adapter.executionError`.
    pub fn mark_failed(&mut self, error: &ExecutionError, reason: &str) {
        if let Some(Value::Object(adapter)) = self.variables.get_mut(ROOT_ADAPTER) {
            adapter.insert(
                "executionStatus".to_string(),
                Value::String("failed".to_string()),
            );
            adapter.insert(
                "errorReason".to_string(),
                Value::String(reason.to_string()),
            );
            adapter.insert(
                "errorMessage".to_string(),
                Value::String(error.message.clone()),
            );
            let mut exec_error = Map::new();
            exec_error.insert("step".to_string(), Value::String(error.step.clone()));
            exec_error.insert("message".to_string(), Value::String(error.message.clone()));
            adapter.insert("executionError".to_string(), Value::Object(exec_error));
        }
    }

    /// Snapshot of the environment for the execution result.
    pub fn environment_snapshot(&self) -> Map<String, Value> {
        self.variables
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}
