//! Workflow orchestration.
//!
//! Steps run strictly in declaration order. A step whose input mapping
//! names a step that has not completed is skipped without being invoked;
//! a failure never aborts later independent steps. The run ends `Failed`
//! if any step failed or was skipped.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ferry_core::{BridgeError, BridgeResult, ErrorKind, ExecutionId, Payload, RunId};
use ferry_plan::{Validator, WorkflowDefinition, WorkflowStep};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::bridge::StructuredResult;

/// Something that can run one step
#[async_trait]
pub trait StepExecutor: Send + Sync {
    /// Invoke `agent` with `payload`
    ///
    /// # Errors
    ///
    /// Any execution error; the orchestrator records it against the step
    async fn execute_step(
        &self,
        agent: &str,
        payload: Payload,
        timeout: Option<Duration>,
    ) -> BridgeResult<StructuredResult>;

    /// Registered agent names, if the executor knows them
    fn known_agents(&self) -> Option<Vec<String>> {
        None
    }
}

/// Lifecycle of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Created, not started
    Pending,
    /// Steps executing
    Running,
    /// Every step completed
    Completed,
    /// At least one step failed or was skipped
    Failed,
}

impl RunState {
    /// Move to `next`
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` for anything but `Pending -> Running` and
    /// `Running -> Completed | Failed`
    pub fn transition(self, next: Self) -> BridgeResult<Self> {
        match (self, next) {
            (Self::Pending, Self::Running)
            | (Self::Running, Self::Completed)
            | (Self::Running, Self::Failed) => Ok(next),
            _ => Err(BridgeError::InvalidTransition {
                from: self.to_string(),
                to: next.to_string(),
            }),
        }
    }

    /// Check if the run has finished
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Outcome of one step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Agent produced a result
    Completed,
    /// Agent was invoked and failed
    Failed,
    /// Not invoked because an input was unavailable
    SkippedDueToDependencyFailure,
}

/// Per-step entry of a run report
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepReport {
    /// Step name
    pub name: String,
    /// Agent invoked
    pub agent: String,
    /// Operation identifier
    pub operation: String,
    /// Outcome
    pub status: StepStatus,
    /// Execution id, when the agent was invoked and produced a result
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<ExecutionId>,
    /// Output payload, also kept when the agent reported failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Payload>,
    /// Error kind on failure or skip
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
    /// Error message on failure or skip
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Wall-clock time spent on the step
    pub duration_ms: u64,
}

impl StepReport {
    /// A result the agent itself marked unsuccessful counts as a failed step
    fn finished(step: &WorkflowStep, result: StructuredResult, elapsed: Duration) -> Self {
        let (status, error, message) = if result.success {
            (StepStatus::Completed, None, None)
        } else {
            let message = match result.payload.get("exitCode").and_then(Value::as_i64) {
                Some(code) => format!("agent {} exited with status {}", result.agent, code),
                None => format!("agent {} reported failure", result.agent),
            };
            (StepStatus::Failed, Some(ErrorKind::NonZeroExit), Some(message))
        };
        Self {
            name: step.name.clone(),
            agent: step.agent.clone(),
            operation: step.operation.clone(),
            status,
            execution_id: Some(result.execution_id),
            output: Some(result.payload),
            error,
            message,
            duration_ms: millis(elapsed),
        }
    }

    fn errored(step: &WorkflowStep, status: StepStatus, error: &BridgeError, elapsed: Duration) -> Self {
        Self {
            name: step.name.clone(),
            agent: step.agent.clone(),
            operation: step.operation.clone(),
            status,
            execution_id: error.execution_id(),
            output: None,
            error: Some(error.kind()),
            message: Some(error.to_string()),
            duration_ms: millis(elapsed),
        }
    }
}

/// Result of one workflow run
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRunReport {
    /// Run id
    pub run_id: RunId,
    /// Workflow name
    pub workflow: String,
    /// Terminal state
    pub state: RunState,
    /// One entry per step, in declaration order
    pub steps: Vec<StepReport>,
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// When the run finished
    pub finished_at: DateTime<Utc>,
}

impl WorkflowRunReport {
    /// Entry for a step
    #[must_use]
    pub fn step(&self, name: &str) -> Option<&StepReport> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Check if every step completed
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.state == RunState::Completed
    }
}

/// Workflow orchestrator
pub struct WorkflowOrchestrator<E: ?Sized> {
    executor: Arc<E>,
    workflows: IndexMap<String, WorkflowDefinition>,
}

impl<E: StepExecutor + ?Sized> WorkflowOrchestrator<E> {
    /// Create an orchestrator with no workflows
    #[must_use]
    pub fn new(executor: Arc<E>) -> Self {
        Self {
            executor,
            workflows: IndexMap::new(),
        }
    }

    /// Register a workflow under `name`
    ///
    /// # Errors
    ///
    /// Returns `InvalidWorkflow` if the name is taken or the definition has
    /// structural errors
    pub fn define_workflow(
        &mut self,
        name: impl Into<String>,
        definition: WorkflowDefinition,
    ) -> BridgeResult<()> {
        let name = name.into();
        if self.workflows.contains_key(&name) {
            return Err(BridgeError::InvalidWorkflow {
                name,
                reason: "a workflow with this name is already defined".to_string(),
            });
        }

        let mut validator = Validator::new();
        if let Some(agents) = self.executor.known_agents() {
            validator = validator.with_known_agents(agents);
        }
        let warnings = validator.validate(&definition).map_err(|errors| {
            BridgeError::InvalidWorkflow {
                name: name.clone(),
                reason: errors
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; "),
            }
        })?;
        for warning in &warnings {
            tracing::warn!(workflow = %name, "{}", warning);
        }

        tracing::info!(workflow = %name, steps = definition.len(), "defined workflow");
        self.workflows.insert(name, definition);
        Ok(())
    }

    /// Names of defined workflows, in definition order
    #[must_use]
    pub fn list_workflows(&self) -> Vec<String> {
        self.workflows.keys().cloned().collect()
    }

    /// Definition of a workflow
    #[must_use]
    pub fn describe(&self, name: &str) -> Option<&WorkflowDefinition> {
        self.workflows.get(name)
    }

    /// Run a workflow with no run-level parameters
    ///
    /// # Errors
    ///
    /// Returns `UnknownWorkflow` if no workflow has this name. Step failures
    /// are recorded in the report, not returned.
    pub async fn run_workflow(&self, name: &str) -> BridgeResult<WorkflowRunReport> {
        self.run_workflow_with(name, Map::new()).await
    }

    /// Run a workflow, merging `params` into every step payload
    ///
    /// Step parameters win over run parameters.
    ///
    /// # Errors
    ///
    /// Returns `UnknownWorkflow` if no workflow has this name
    pub async fn run_workflow_with(
        &self,
        name: &str,
        params: Map<String, Value>,
    ) -> BridgeResult<WorkflowRunReport> {
        let definition = self
            .workflows
            .get(name)
            .ok_or_else(|| BridgeError::UnknownWorkflow {
                name: name.to_string(),
            })?;

        let run_id = RunId::new();
        let started_at = Utc::now();
        let mut state = RunState::Pending.transition(RunState::Running)?;
        tracing::info!(workflow = name, %run_id, steps = definition.len(), "workflow started");

        let mut outputs: HashMap<&str, Payload> = HashMap::new();
        let mut steps = Vec::with_capacity(definition.len());

        for step in &definition.steps {
            let began = Instant::now();
            let payload = match step_payload(step, &params, &outputs) {
                Ok(payload) => payload,
                Err(skip) => {
                    tracing::warn!(workflow = name, %run_id, step = %step.name, "{}", skip);
                    steps.push(StepReport::errored(
                        step,
                        StepStatus::SkippedDueToDependencyFailure,
                        &skip,
                        began.elapsed(),
                    ));
                    continue;
                }
            };

            let timeout = step.timeout_ms.map(Duration::from_millis);
            match self.executor.execute_step(&step.agent, payload, timeout).await {
                Ok(result) if result.success => {
                    tracing::debug!(workflow = name, %run_id, step = %step.name, "step completed");
                    outputs.insert(step.name.as_str(), result.payload.clone());
                    steps.push(StepReport::finished(step, result, began.elapsed()));
                }
                Ok(result) => {
                    tracing::warn!(workflow = name, %run_id, step = %step.name, "agent reported failure");
                    steps.push(StepReport::finished(step, result, began.elapsed()));
                }
                Err(e) => {
                    tracing::warn!(workflow = name, %run_id, step = %step.name, error = %e, "step failed");
                    steps.push(StepReport::errored(step, StepStatus::Failed, &e, began.elapsed()));
                }
            }
        }

        let all_completed = steps.iter().all(|s| s.status == StepStatus::Completed);
        state = state.transition(if all_completed {
            RunState::Completed
        } else {
            RunState::Failed
        })?;
        tracing::info!(workflow = name, %run_id, state = %state, "workflow finished");

        Ok(WorkflowRunReport {
            run_id,
            workflow: name.to_string(),
            state,
            steps,
            started_at,
            finished_at: Utc::now(),
        })
    }
}

/// Run params, then step params, then `operation`, then mapped inputs
fn step_payload(
    step: &WorkflowStep,
    run_params: &Map<String, Value>,
    outputs: &HashMap<&str, Payload>,
) -> BridgeResult<Payload> {
    let mut payload = run_params.clone();
    payload.extend(step.params.iter().map(|(k, v)| (k.clone(), v.clone())));
    payload.insert("operation".to_string(), Value::String(step.operation.clone()));

    for (dependency, key) in &step.inputs_from {
        let Some(output) = outputs.get(dependency.as_str()) else {
            return Err(BridgeError::SkippedDueToDependencyFailure {
                step: step.name.clone(),
                dependency: dependency.clone(),
            });
        };
        payload.insert(key.clone(), output.clone());
    }
    Ok(Value::Object(payload))
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    /// Echoes its payload unless the agent name is listed as failing
    #[derive(Default)]
    struct FakeExecutor {
        failing: Vec<String>,
        unsuccessful: Vec<String>,
        calls: Mutex<Vec<(String, Payload)>>,
    }

    impl FakeExecutor {
        fn failing(agents: &[&str]) -> Self {
            Self {
                failing: agents.iter().map(ToString::to_string).collect(),
                ..Self::default()
            }
        }

        fn calls(&self) -> Vec<(String, Payload)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl StepExecutor for FakeExecutor {
        async fn execute_step(
            &self,
            agent: &str,
            payload: Payload,
            _timeout: Option<Duration>,
        ) -> BridgeResult<StructuredResult> {
            self.calls.lock().unwrap().push((agent.to_string(), payload.clone()));
            let execution_id = ExecutionId::new();
            if self.failing.iter().any(|a| a == agent) {
                return Err(BridgeError::NonZeroExit {
                    agent: agent.to_string(),
                    execution_id,
                    exit_code: Some(1),
                    stderr: "boom".to_string(),
                });
            }
            if self.unsuccessful.iter().any(|a| a == agent) {
                return Ok(StructuredResult {
                    execution_id,
                    agent: agent.to_string(),
                    payload: json!({"stdout": "", "stderr": "bad", "exitCode": 9, "success": false}),
                    success: false,
                    stderr: "bad".to_string(),
                    duration_ms: 1,
                    completed_at: Utc::now(),
                });
            }
            Ok(StructuredResult {
                execution_id,
                agent: agent.to_string(),
                payload: json!({"from": agent, "got": payload}),
                success: true,
                stderr: String::new(),
                duration_ms: 1,
                completed_at: Utc::now(),
            })
        }
    }

    fn three_steps() -> WorkflowDefinition {
        WorkflowDefinition::new()
            .step(WorkflowStep::new("A", "a", "fetch"))
            .step(WorkflowStep::new("B", "b", "analyze"))
            .step(WorkflowStep::new("C", "c", "report"))
    }

    #[test]
    fn test_run_state_transitions() {
        assert_eq!(RunState::Pending.transition(RunState::Running).unwrap(), RunState::Running);
        assert_eq!(RunState::Running.transition(RunState::Failed).unwrap(), RunState::Failed);
        assert!(RunState::Pending.transition(RunState::Completed).is_err());
        assert!(RunState::Completed.transition(RunState::Running).is_err());
        let err = RunState::Failed.transition(RunState::Completed).unwrap_err();
        assert!(matches!(err, BridgeError::InvalidTransition { ref from, ref to } if from == "failed" && to == "completed"));
        assert!(RunState::Failed.is_terminal());
    }

    #[tokio::test]
    async fn test_failure_does_not_abort_independent_steps() {
        let executor = Arc::new(FakeExecutor::failing(&["b"]));
        let mut orchestrator = WorkflowOrchestrator::new(Arc::clone(&executor));
        orchestrator.define_workflow("abc", three_steps()).unwrap();

        let report = orchestrator.run_workflow("abc").await.unwrap();
        assert_eq!(report.state, RunState::Failed);
        assert_eq!(report.steps.len(), 3);
        assert_eq!(report.steps[0].status, StepStatus::Completed);
        assert_eq!(report.steps[1].status, StepStatus::Failed);
        assert_eq!(report.steps[1].error, Some(ErrorKind::NonZeroExit));
        assert_eq!(report.steps[2].status, StepStatus::Completed);

        let agents: Vec<String> = executor.calls().into_iter().map(|(a, _)| a).collect();
        assert_eq!(agents, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_unsuccessful_result_fails_the_step() {
        let executor = Arc::new(FakeExecutor {
            unsuccessful: vec!["b".to_string()],
            ..FakeExecutor::default()
        });
        let mut orchestrator = WorkflowOrchestrator::new(Arc::clone(&executor));
        let definition = WorkflowDefinition::new()
            .step(WorkflowStep::new("A", "a", "fetch"))
            .step(WorkflowStep::new("B", "b", "shell"))
            .step(WorkflowStep::new("C", "c", "report").with_input("B", "log"));
        orchestrator.define_workflow("raw", definition).unwrap();

        let report = orchestrator.run_workflow("raw").await.unwrap();
        assert_eq!(report.state, RunState::Failed);
        let b = report.step("B").unwrap();
        assert_eq!(b.status, StepStatus::Failed);
        assert_eq!(b.error, Some(ErrorKind::NonZeroExit));
        assert_eq!(b.output.as_ref().unwrap()["exitCode"], json!(9));
        assert!(b.message.as_deref().unwrap().contains("status 9"));
        assert_eq!(
            report.step("C").unwrap().status,
            StepStatus::SkippedDueToDependencyFailure
        );
        assert_eq!(executor.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_dependent_of_failed_step_is_skipped() {
        let executor = Arc::new(FakeExecutor::failing(&["b"]));
        let mut orchestrator = WorkflowOrchestrator::new(Arc::clone(&executor));
        let definition = WorkflowDefinition::new()
            .step(WorkflowStep::new("A", "a", "fetch"))
            .step(WorkflowStep::new("B", "b", "analyze").with_input("A", "data"))
            .step(WorkflowStep::new("C", "c", "report").with_input("B", "analysis"));
        orchestrator.define_workflow("chain", definition).unwrap();

        let report = orchestrator.run_workflow("chain").await.unwrap();
        assert_eq!(report.state, RunState::Failed);
        let c = report.step("C").unwrap();
        assert_eq!(c.status, StepStatus::SkippedDueToDependencyFailure);
        assert_eq!(c.error, Some(ErrorKind::SkippedDueToDependencyFailure));
        assert_eq!(executor.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_payload_composition() {
        let executor = Arc::new(FakeExecutor::default());
        let mut orchestrator = WorkflowOrchestrator::new(Arc::clone(&executor));
        let definition = WorkflowDefinition::new()
            .step(WorkflowStep::new("A", "a", "fetch").with_param("region", "eu"))
            .step(WorkflowStep::new("B", "b", "analyze").with_input("A", "source"));
        orchestrator.define_workflow("flow", definition).unwrap();

        let mut params = Map::new();
        params.insert("region".to_string(), json!("us"));
        params.insert("tenant".to_string(), json!("acme"));
        let report = orchestrator.run_workflow_with("flow", params).await.unwrap();
        assert!(report.succeeded());

        let calls = executor.calls();
        assert_eq!(
            calls[0].1,
            json!({"region": "eu", "tenant": "acme", "operation": "fetch"})
        );
        assert_eq!(calls[1].1["operation"], json!("analyze"));
        assert_eq!(calls[1].1["source"]["from"], json!("a"));
        assert_eq!(calls[1].1["region"], json!("us"));
    }

    #[tokio::test]
    async fn test_forward_reference_is_skipped_at_run_time() {
        let executor = Arc::new(FakeExecutor::default());
        let mut orchestrator = WorkflowOrchestrator::new(Arc::clone(&executor));
        let definition = WorkflowDefinition::new()
            .step(WorkflowStep::new("A", "a", "fetch").with_input("B", "later"))
            .step(WorkflowStep::new("B", "b", "analyze"));
        orchestrator.define_workflow("fwd", definition).unwrap();

        let report = orchestrator.run_workflow("fwd").await.unwrap();
        assert_eq!(report.steps[0].status, StepStatus::SkippedDueToDependencyFailure);
        assert_eq!(report.steps[1].status, StepStatus::Completed);
        assert_eq!(report.state, RunState::Failed);
    }

    #[test]
    fn test_define_rejects_duplicates_and_invalid() {
        let mut orchestrator = WorkflowOrchestrator::new(Arc::new(FakeExecutor::default()));
        orchestrator.define_workflow("abc", three_steps()).unwrap();
        assert!(matches!(
            orchestrator.define_workflow("abc", three_steps()),
            Err(BridgeError::InvalidWorkflow { .. })
        ));
        assert!(orchestrator.define_workflow("empty", WorkflowDefinition::new()).is_err());

        let selfref = WorkflowDefinition::new()
            .step(WorkflowStep::new("A", "a", "fetch").with_input("A", "me"));
        assert!(orchestrator.define_workflow("self", selfref).is_err());

        assert_eq!(orchestrator.list_workflows(), vec!["abc"]);
        assert_eq!(orchestrator.describe("abc").map(WorkflowDefinition::len), Some(3));
    }

    #[tokio::test]
    async fn test_unknown_workflow() {
        let orchestrator = WorkflowOrchestrator::new(Arc::new(FakeExecutor::default()));
        let err = orchestrator.run_workflow("nope").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownWorkflow);
    }

    #[tokio::test]
    async fn test_report_serializes() {
        let mut orchestrator = WorkflowOrchestrator::new(Arc::new(FakeExecutor::failing(&["b"])));
        orchestrator.define_workflow("abc", three_steps()).unwrap();
        let report = orchestrator.run_workflow("abc").await.unwrap();

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["state"], "failed");
        assert_eq!(json["steps"][1]["status"], "failed");
        assert_eq!(json["steps"][1]["error"], "non_zero_exit");
        assert!(json["runId"].is_string());
        assert!(json["steps"][0].get("error").is_none());
    }
}
