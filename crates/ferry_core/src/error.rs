//! Error taxonomy for the FERRY bridge.
//!
//! Every failure that can surface from registering, marshaling, running or
//! demarshaling an agent maps onto one [`BridgeError`] variant. Process
//! failures carry the agent name, the execution id and captured stderr so a
//! caller can diagnose without re-running.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::sync::Arc;

use crate::id::ExecutionId;

/// Bridge result type
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Bridge error type
///
/// Cloneable so one failure can be handed to every caller waiting on the
/// same computation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BridgeError {
    /// No agent registered under this name
    #[error("Unknown agent: {name}")]
    UnknownAgent {
        /// Requested agent name
        name: String,
    },

    /// An agent with this name is already registered
    #[error("Agent already registered: {name}")]
    AlreadyRegistered {
        /// Conflicting agent name
        name: String,
    },

    /// Descriptor rejected at registration time
    #[error("Invalid descriptor for agent {name}: {reason}")]
    InvalidDescriptor {
        /// Agent name
        name: String,
        /// Why the descriptor was rejected
        reason: String,
    },

    /// The agent declares an encoding the bridge cannot produce or consume
    #[error("Unsupported encoding for agent {agent}: {encoding}")]
    UnsupportedEncoding {
        /// Agent name
        agent: String,
        /// Encoding as declared
        encoding: String,
    },

    /// The payload cannot be expressed in the agent's input encoding
    #[error("Invalid argument `{key}` for agent {agent}: {reason}")]
    InvalidArgument {
        /// Agent name
        agent: String,
        /// Offending payload key
        key: String,
        /// Why it was rejected
        reason: String,
    },

    /// The program could not be started
    #[error("Failed to spawn agent {agent} ({program}) for execution {execution_id}: {source}")]
    SpawnFailure {
        /// Agent name
        agent: String,
        /// Execution id
        execution_id: ExecutionId,
        /// Program that failed to start
        program: String,
        /// Underlying OS error
        #[source]
        source: Arc<io::Error>,
    },

    /// The deadline fired before the program exited
    #[error("Agent {agent} timed out after {timeout_ms}ms (execution {execution_id})")]
    Timeout {
        /// Agent name
        agent: String,
        /// Execution id
        execution_id: ExecutionId,
        /// Deadline that expired
        timeout_ms: u64,
        /// Stdout captured before termination
        stdout: String,
        /// Stderr captured before termination
        stderr: String,
    },

    /// The program exited with a non-zero status
    #[error("Agent {agent} exited with {} (execution {execution_id}): {stderr}", ExitDisplay(*.exit_code))]
    NonZeroExit {
        /// Agent name
        agent: String,
        /// Execution id
        execution_id: ExecutionId,
        /// Exit code, `None` when terminated by a signal
        exit_code: Option<i32>,
        /// Captured stderr
        stderr: String,
    },

    /// Output could not be parsed as declared
    #[error("Malformed output from agent {agent} (execution {execution_id}): {reason}")]
    MalformedOutput {
        /// Agent name
        agent: String,
        /// Execution id
        execution_id: ExecutionId,
        /// Parser message
        reason: String,
        /// Raw text that failed to parse
        raw: String,
    },

    /// The sidecar output file was never written
    #[error("Missing output artifact for agent {agent} (execution {execution_id}): {path}")]
    MissingOutputArtifact {
        /// Agent name
        agent: String,
        /// Execution id
        execution_id: ExecutionId,
        /// Expected sidecar path
        path: String,
    },

    /// A workflow step was not attempted because an input it needs is unavailable
    #[error("Step {step} skipped: dependency {dependency} did not complete")]
    SkippedDueToDependencyFailure {
        /// Skipped step
        step: String,
        /// Dependency that was missing or failed
        dependency: String,
    },

    /// No workflow defined under this name
    #[error("Unknown workflow: {name}")]
    UnknownWorkflow {
        /// Requested workflow name
        name: String,
    },

    /// Workflow definition rejected
    #[error("Invalid workflow {name}: {reason}")]
    InvalidWorkflow {
        /// Workflow name
        name: String,
        /// Why it was rejected
        reason: String,
    },

    /// Illegal run state transition
    #[error("Invalid run state transition: {from} -> {to}")]
    InvalidTransition {
        /// Current state
        from: String,
        /// Requested state
        to: String,
    },

    /// Invalid identifier
    #[error("Invalid execution id: {raw}")]
    InvalidId {
        /// Raw input
        raw: String,
    },

    /// Filesystem error outside of a specific agent failure
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path involved
        path: String,
        /// Underlying error
        #[source]
        source: Arc<io::Error>,
    },
}

struct ExitDisplay(Option<i32>);

impl fmt::Display for ExitDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(code) => write!(f, "status {}", code),
            None => write!(f, "a signal"),
        }
    }
}

/// Serializable discriminant of [`BridgeError`], used in reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// See [`BridgeError::UnknownAgent`]
    UnknownAgent,
    /// See [`BridgeError::AlreadyRegistered`]
    AlreadyRegistered,
    /// See [`BridgeError::InvalidDescriptor`]
    InvalidDescriptor,
    /// See [`BridgeError::UnsupportedEncoding`]
    UnsupportedEncoding,
    /// See [`BridgeError::InvalidArgument`]
    InvalidArgument,
    /// See [`BridgeError::SpawnFailure`]
    SpawnFailure,
    /// See [`BridgeError::Timeout`]
    Timeout,
    /// See [`BridgeError::NonZeroExit`]
    NonZeroExit,
    /// See [`BridgeError::MalformedOutput`]
    MalformedOutput,
    /// See [`BridgeError::MissingOutputArtifact`]
    MissingOutputArtifact,
    /// See [`BridgeError::SkippedDueToDependencyFailure`]
    SkippedDueToDependencyFailure,
    /// See [`BridgeError::UnknownWorkflow`]
    UnknownWorkflow,
    /// See [`BridgeError::InvalidWorkflow`]
    InvalidWorkflow,
    /// See [`BridgeError::InvalidTransition`]
    InvalidTransition,
    /// See [`BridgeError::InvalidId`]
    InvalidId,
    /// See [`BridgeError::Io`]
    Io,
}

impl BridgeError {
    /// Get the serializable kind of this error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownAgent { .. } => ErrorKind::UnknownAgent,
            Self::AlreadyRegistered { .. } => ErrorKind::AlreadyRegistered,
            Self::InvalidDescriptor { .. } => ErrorKind::InvalidDescriptor,
            Self::UnsupportedEncoding { .. } => ErrorKind::UnsupportedEncoding,
            Self::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            Self::SpawnFailure { .. } => ErrorKind::SpawnFailure,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::NonZeroExit { .. } => ErrorKind::NonZeroExit,
            Self::MalformedOutput { .. } => ErrorKind::MalformedOutput,
            Self::MissingOutputArtifact { .. } => ErrorKind::MissingOutputArtifact,
            Self::SkippedDueToDependencyFailure { .. } => {
                ErrorKind::SkippedDueToDependencyFailure
            }
            Self::UnknownWorkflow { .. } => ErrorKind::UnknownWorkflow,
            Self::InvalidWorkflow { .. } => ErrorKind::InvalidWorkflow,
            Self::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            Self::InvalidId { .. } => ErrorKind::InvalidId,
            Self::Io { .. } => ErrorKind::Io,
        }
    }

    /// Whether retrying with a longer deadline could succeed
    ///
    /// Only timeouts qualify; a non-zero exit is treated as deterministic.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Execution id the error belongs to, if it came from an invocation
    #[must_use]
    pub fn execution_id(&self) -> Option<ExecutionId> {
        match self {
            Self::SpawnFailure { execution_id, .. }
            | Self::Timeout { execution_id, .. }
            | Self::NonZeroExit { execution_id, .. }
            | Self::MalformedOutput { execution_id, .. }
            | Self::MissingOutputArtifact { execution_id, .. } => Some(*execution_id),
            _ => None,
        }
    }

    /// Captured stderr, if the process got far enough to produce any
    #[must_use]
    pub fn stderr(&self) -> Option<&str> {
        match self {
            Self::Timeout { stderr, .. } | Self::NonZeroExit { stderr, .. } => Some(stderr),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exec() -> ExecutionId {
        ExecutionId::from_bytes([9u8; 16])
    }

    #[test]
    fn test_error_display() {
        let err = BridgeError::UnknownAgent {
            name: "sql_agent".to_string(),
        };
        assert_eq!(format!("{}", err), "Unknown agent: sql_agent");
    }

    #[test]
    fn test_non_zero_exit_display_includes_stderr() {
        let err = BridgeError::NonZeroExit {
            agent: "pdf".to_string(),
            execution_id: exec(),
            exit_code: Some(17),
            stderr: "boom".to_string(),
        };
        let s = err.to_string();
        assert!(s.contains("status 17"));
        assert!(s.contains("boom"));
        assert!(s.contains(&exec().to_string()));
    }

    #[test]
    fn test_non_zero_exit_by_signal() {
        let err = BridgeError::NonZeroExit {
            agent: "pdf".to_string(),
            execution_id: exec(),
            exit_code: None,
            stderr: String::new(),
        };
        assert!(err.to_string().contains("a signal"));
    }

    #[test]
    fn test_only_timeout_is_retryable() {
        let timeout = BridgeError::Timeout {
            agent: "a".to_string(),
            execution_id: exec(),
            timeout_ms: 100,
            stdout: String::new(),
            stderr: "partial".to_string(),
        };
        let exit = BridgeError::NonZeroExit {
            agent: "a".to_string(),
            execution_id: exec(),
            exit_code: Some(1),
            stderr: String::new(),
        };
        assert!(timeout.is_retryable());
        assert!(!exit.is_retryable());
        assert_eq!(timeout.stderr(), Some("partial"));
    }

    #[test]
    fn test_kind_and_context() {
        let err = BridgeError::MissingOutputArtifact {
            agent: "chart".to_string(),
            execution_id: exec(),
            path: "/tmp/x".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::MissingOutputArtifact);
        assert_eq!(err.execution_id(), Some(exec()));

        let err = BridgeError::UnknownWorkflow {
            name: "w".to_string(),
        };
        assert_eq!(err.execution_id(), None);
        assert_eq!(err.stderr(), None);
    }

    #[test]
    fn test_error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::SkippedDueToDependencyFailure).unwrap();
        assert_eq!(json, "\"skipped_due_to_dependency_failure\"");
    }
}
