//! Workflow definitions.
//!
//! A workflow is an ordered list of steps. Each step names an agent, an
//! operation, and optionally which earlier steps feed which of its input
//! keys. Definitions are static: a run never mutates them.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One step of a workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct WorkflowStep {
    /// Step name, unique within the workflow
    pub name: String,
    /// Registered agent to invoke
    pub agent: String,
    /// Operation identifier passed to the agent as `operation`
    pub operation: String,
    /// Prior step name -> input key its output is placed under
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub inputs_from: IndexMap<String, String>,
    /// Static parameters merged into the payload
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub params: Map<String, Value>,
    /// Per-step deadline
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl WorkflowStep {
    /// Create a step
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        agent: impl Into<String>,
        operation: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            agent: agent.into(),
            operation: operation.into(),
            inputs_from: IndexMap::new(),
            params: Map::new(),
            timeout_ms: None,
        }
    }

    /// Feed the output of `step` into input key `key`
    #[must_use]
    pub fn with_input(mut self, step: impl Into<String>, key: impl Into<String>) -> Self {
        self.inputs_from.insert(step.into(), key.into());
        self
    }

    /// Add a static parameter
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Set deadline
    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Names of steps this one reads from
    pub fn dependencies(&self) -> impl Iterator<Item = &str> {
        self.inputs_from.keys().map(String::as_str)
    }
}

/// A static workflow definition
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct WorkflowDefinition {
    /// Human-readable summary
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Steps in execution order
    pub steps: Vec<WorkflowStep>,
}

impl WorkflowDefinition {
    /// Create an empty definition
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step
    #[must_use]
    pub fn step(mut self, step: WorkflowStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Set description
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Look up a step by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Agents referenced by any step, first occurrence order
    #[must_use]
    pub fn agents(&self) -> Vec<&str> {
        let mut agents: Vec<&str> = Vec::new();
        for step in &self.steps {
            if !agents.contains(&step.agent.as_str()) {
                agents.push(&step.agent);
            }
        }
        agents
    }

    /// Number of steps
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Check if there are no steps
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn segment_report() -> WorkflowDefinition {
        WorkflowDefinition::new()
            .with_description("Segment analysis to PDF")
            .step(WorkflowStep::new("fetch", "sql", "query").with_param("segment", "enterprise"))
            .step(WorkflowStep::new("chart", "viz", "render").with_input("fetch", "rows"))
            .step(
                WorkflowStep::new("pdf", "pdf", "compose")
                    .with_input("fetch", "rows")
                    .with_input("chart", "figures")
                    .with_timeout_ms(60_000),
            )
    }

    #[test]
    fn test_builder() {
        let wf = segment_report();
        assert_eq!(wf.len(), 3);
        assert_eq!(wf.agents(), vec!["sql", "viz", "pdf"]);
        let deps: Vec<_> = wf.get("pdf").unwrap().dependencies().collect();
        assert_eq!(deps, vec!["fetch", "chart"]);
        assert!(wf.get("missing").is_none());
    }

    #[test]
    fn test_deserialize() {
        let wf: WorkflowDefinition = serde_json::from_value(json!({
            "steps": [
                {"name": "a", "agent": "sql", "operation": "query", "params": {"limit": 5}},
                {"name": "b", "agent": "viz", "operation": "plot", "inputsFrom": {"a": "data"}, "timeoutMs": 100}
            ]
        }))
        .unwrap();
        assert_eq!(wf.steps[0].params.get("limit"), Some(&json!(5)));
        assert_eq!(wf.steps[1].inputs_from.get("a").map(String::as_str), Some("data"));
        assert_eq!(wf.steps[1].timeout_ms, Some(100));
    }

    #[test]
    fn test_deserialize_rejects_unknown_keys() {
        let result = serde_json::from_value::<WorkflowDefinition>(json!({
            "steps": [{"name": "a", "agent": "x", "operation": "y", "retry": 3}]
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_serialize_roundtrip() {
        let wf = segment_report();
        let json = serde_json::to_value(&wf).unwrap();
        assert!(json["steps"][1].get("inputsFrom").is_some());
        assert!(json["steps"][0].get("inputsFrom").is_none());
        let back: WorkflowDefinition = serde_json::from_value(json).unwrap();
        assert_eq!(back, wf);
    }
}
