//! Classify a finished process and parse its declared output.

use ferry_core::{BridgeError, BridgeResult, ExecutionId, Payload, RawExecutionResult};
use serde_json::json;
use std::io;
use std::sync::Arc;

use crate::artifact::ArtifactGuard;
use crate::descriptor::OutputEncoding;

/// Parsed output of a finished execution
#[derive(Debug, Clone, PartialEq)]
pub struct Demarshaled {
    /// Structured payload
    pub payload: Payload,
    /// False only for raw-stream agents that exited non-zero
    pub success: bool,
}

/// Turn what the supervisor observed into a payload or an error
///
/// A fired deadline is always `Timeout`. A non-zero exit is `NonZeroExit`
/// except for raw-stream agents, whose payload reports the exit status.
///
/// # Errors
///
/// `Timeout`, `NonZeroExit`, `MalformedOutput`, `MissingOutputArtifact`, or
/// `Io` if the sidecar exists but cannot be read
pub fn demarshal(
    agent: &str,
    execution_id: ExecutionId,
    encoding: &OutputEncoding,
    raw: RawExecutionResult,
    artifacts: &ArtifactGuard,
) -> BridgeResult<Demarshaled> {
    if raw.timed_out {
        return Err(BridgeError::Timeout {
            agent: agent.to_string(),
            execution_id,
            timeout_ms: u64::try_from(raw.deadline.as_millis()).unwrap_or(u64::MAX),
            stdout: raw.stdout,
            stderr: raw.stderr,
        });
    }

    let payload = match encoding {
        OutputEncoding::RawStream => {
            let success = raw.exit_code == Some(0);
            return Ok(Demarshaled {
                payload: json!({
                    "stdout": raw.stdout,
                    "stderr": raw.stderr,
                    "exitCode": raw.exit_code,
                    "success": success,
                }),
                success,
            });
        }
        OutputEncoding::Unrecognized(encoding) => {
            return Err(BridgeError::UnsupportedEncoding {
                agent: agent.to_string(),
                encoding: encoding.clone(),
            });
        }
        _ if raw.exit_code != Some(0) => {
            return Err(BridgeError::NonZeroExit {
                agent: agent.to_string(),
                execution_id,
                exit_code: raw.exit_code,
                stderr: raw.stderr,
            });
        }
        OutputEncoding::StructuredStream => parse(agent, execution_id, raw.stdout)?,
        OutputEncoding::StructuredFile => {
            let Some(path) = artifacts.output_path() else {
                return Err(BridgeError::MissingOutputArtifact {
                    agent: agent.to_string(),
                    execution_id,
                    path: String::new(),
                });
            };
            let text = match std::fs::read_to_string(path) {
                Ok(text) => text,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    return Err(BridgeError::MissingOutputArtifact {
                        agent: agent.to_string(),
                        execution_id,
                        path: path.display().to_string(),
                    });
                }
                Err(source) => {
                    return Err(BridgeError::Io {
                        path: path.display().to_string(),
                        source: Arc::new(source),
                    });
                }
            };
            parse(agent, execution_id, text)?
        }
    };

    Ok(Demarshaled {
        payload,
        success: true,
    })
}

fn parse(agent: &str, execution_id: ExecutionId, text: String) -> BridgeResult<Payload> {
    serde_json::from_str(&text).map_err(|e| BridgeError::MalformedOutput {
        agent: agent.to_string(),
        execution_id,
        reason: e.to_string(),
        raw: text,
    })
}
