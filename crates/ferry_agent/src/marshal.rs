//! Turn a payload into something a process can be started with.

use ferry_core::{BridgeError, BridgeResult, ExecutionId, Payload};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::artifact::{self, ArtifactGuard, ArtifactKind};
use crate::descriptor::{AgentDescriptor, InputEncoding, OutputEncoding};
use crate::{ENV_AGENT, ENV_EXECUTION_ID, ENV_OUTPUT_FILE, INPUT_FILE_FLAG};

/// Invocation-ready form of one execution
#[derive(Debug)]
pub struct Invocation {
    /// Program to start
    pub program: PathBuf,
    /// Descriptor args followed by marshaled args
    pub args: Vec<String>,
    /// Bytes written once to stdin, `None` closes stdin immediately
    pub stdin: Option<Vec<u8>>,
    /// Variables set on top of the host environment
    pub env: Vec<(String, String)>,
    /// Working directory
    pub working_dir: Option<PathBuf>,
    /// Files owned by this execution
    pub artifacts: ArtifactGuard,
}

/// Marshal `payload` for `agent` according to its input encoding
///
/// Files are created under `artifact_dir` and owned by the returned
/// invocation's guard; if marshaling fails part way nothing is left behind.
///
/// # Errors
///
/// - `UnsupportedEncoding` for an unrecognized input or output encoding
/// - `InvalidArgument` if the payload cannot be flattened into arguments
/// - `Io` if the input file cannot be written
pub fn marshal(
    agent: &str,
    descriptor: &AgentDescriptor,
    payload: &Payload,
    execution_id: ExecutionId,
    artifact_dir: &Path,
) -> BridgeResult<Invocation> {
    if let OutputEncoding::Unrecognized(encoding) = &descriptor.output_encoding {
        return Err(BridgeError::UnsupportedEncoding {
            agent: agent.to_string(),
            encoding: encoding.clone(),
        });
    }

    let mut artifacts = ArtifactGuard::new();
    let mut args = descriptor.args.clone();
    let mut stdin = None;

    let mut env: Vec<(String, String)> = descriptor
        .env_overrides
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    env.push((ENV_EXECUTION_ID.to_string(), execution_id.to_string()));
    env.push((ENV_AGENT.to_string(), agent.to_string()));

    // Agents may run in another working directory, so they only ever see
    // absolute artifact paths.
    let needs_files = descriptor.input_encoding == InputEncoding::StructuredFile
        || descriptor.output_encoding == OutputEncoding::StructuredFile;
    let artifact_dir = if needs_files {
        artifact::prepare_dir(artifact_dir)?
    } else {
        artifact_dir.to_path_buf()
    };

    match &descriptor.input_encoding {
        InputEncoding::StructuredFile => {
            let path = artifact::artifact_path(&artifact_dir, execution_id, ArtifactKind::Input);
            let bytes = to_json_bytes(agent, payload)?;
            // Tracked before writing so a partial file is still removed.
            artifacts.track(ArtifactKind::Input, path.clone());
            std::fs::write(&path, bytes).map_err(|source| BridgeError::Io {
                path: path.display().to_string(),
                source: Arc::new(source),
            })?;
            args.push(INPUT_FILE_FLAG.to_string());
            args.push(path.display().to_string());
        }
        InputEncoding::ArgumentList => {
            args.extend(to_argument_list(agent, payload)?);
        }
        InputEncoding::SingleStream => {
            stdin = Some(to_json_bytes(agent, payload)?);
        }
        InputEncoding::Unrecognized(encoding) => {
            return Err(BridgeError::UnsupportedEncoding {
                agent: agent.to_string(),
                encoding: encoding.clone(),
            });
        }
    }

    if descriptor.output_encoding == OutputEncoding::StructuredFile {
        let path = artifact::artifact_path(&artifact_dir, execution_id, ArtifactKind::Output);
        env.push((ENV_OUTPUT_FILE.to_string(), path.display().to_string()));
        artifacts.track(ArtifactKind::Output, path);
    }

    tracing::debug!(
        agent,
        %execution_id,
        encoding = %descriptor.input_encoding,
        argc = args.len(),
        "marshaled input"
    );

    Ok(Invocation {
        program: descriptor.executable_path.clone(),
        args,
        stdin,
        env,
        working_dir: descriptor.working_dir.clone(),
        artifacts,
    })
}

fn to_json_bytes(agent: &str, payload: &Payload) -> BridgeResult<Vec<u8>> {
    serde_json::to_vec(payload).map_err(|e| BridgeError::InvalidArgument {
        agent: agent.to_string(),
        key: String::new(),
        reason: e.to_string(),
    })
}

/// Flatten a payload object into `--key value` arguments
///
/// `true` emits the bare flag; `false` and `null` emit nothing. Strings are
/// passed verbatim, numbers in their JSON form. Nested values are rejected
/// rather than silently stringified.
///
/// # Errors
///
/// Returns `InvalidArgument` naming the key for nested values, or with an
/// empty key when the payload is not an object
pub fn to_argument_list(agent: &str, payload: &Payload) -> BridgeResult<Vec<String>> {
    let Value::Object(map) = payload else {
        return Err(BridgeError::InvalidArgument {
            agent: agent.to_string(),
            key: String::new(),
            reason: format!("argument-list input must be an object, got {}", kind_of(payload)),
        });
    };

    let mut args = Vec::with_capacity(map.len() * 2);
    for (key, value) in map {
        let flag = format!("--{}", key);
        match value {
            Value::Null | Value::Bool(false) => {}
            Value::Bool(true) => args.push(flag),
            Value::Number(n) => {
                args.push(flag);
                args.push(n.to_string());
            }
            Value::String(s) => {
                args.push(flag);
                args.push(s.clone());
            }
            Value::Array(_) | Value::Object(_) => {
                return Err(BridgeError::InvalidArgument {
                    agent: agent.to_string(),
                    key: key.clone(),
                    reason: format!("{} values cannot be passed as arguments", kind_of(value)),
                });
            }
        }
    }
    Ok(args)
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
