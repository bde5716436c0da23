//! Request and raw outcome of a single agent invocation.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::id::ExecutionId;
use crate::Payload;

/// A request to run one agent once
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// Registered agent name
    pub agent: String,
    /// Structured input payload
    pub payload: Payload,
    /// Unique id namespacing this invocation's artifacts
    pub execution_id: ExecutionId,
}

impl ExecutionRequest {
    /// Create a request with a fresh execution id
    #[must_use]
    pub fn new(agent: impl Into<String>, payload: Payload) -> Self {
        Self {
            agent: agent.into(),
            payload,
            execution_id: ExecutionId::new(),
        }
    }
}

/// What the process supervisor observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawExecutionResult {
    /// Captured stdout, lossily decoded
    pub stdout: String,
    /// Captured stderr, lossily decoded
    pub stderr: String,
    /// Exit code, `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
    /// Whether the deadline fired before exit
    pub timed_out: bool,
    /// Deadline the process ran under
    pub deadline: Duration,
    /// Wall-clock time from spawn to exit or kill
    pub elapsed: Duration,
}

impl RawExecutionResult {
    /// Exited normally with status zero
    #[must_use]
    pub fn succeeded(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}
