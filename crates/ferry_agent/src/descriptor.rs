//! Agent descriptors.
//!
//! A descriptor is everything the bridge needs to start an agent and talk to
//! it. Descriptors are built once at startup and never mutated afterwards.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// How the payload reaches the agent
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InputEncoding {
    /// JSON written to a file passed as `--input-file <path>`
    StructuredFile,
    /// Top-level keys flattened into `--key value` arguments
    ArgumentList,
    /// JSON written once to stdin, then stdin is closed
    SingleStream,
    /// Anything else found in a manifest
    #[serde(untagged)]
    Unrecognized(String),
}

impl InputEncoding {
    /// Canonical name
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::StructuredFile => "structured-file",
            Self::ArgumentList => "argument-list",
            Self::SingleStream => "single-stream",
            Self::Unrecognized(raw) => raw,
        }
    }
}

impl fmt::Display for InputEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the agent reports its result
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputEncoding {
    /// JSON on stdout
    StructuredStream,
    /// JSON in the sidecar file named by `FERRY_OUTPUT_FILE`
    StructuredFile,
    /// Unparsed stdout/stderr plus exit status
    RawStream,
    /// Anything else found in a manifest
    #[serde(untagged)]
    Unrecognized(String),
}

impl OutputEncoding {
    /// Canonical name
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::StructuredStream => "structured-stream",
            Self::StructuredFile => "structured-file",
            Self::RawStream => "raw-stream",
            Self::Unrecognized(raw) => raw,
        }
    }
}

impl fmt::Display for OutputEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration of one external agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AgentDescriptor {
    /// Program to run; bare names are looked up on `PATH`
    pub executable_path: PathBuf,
    /// Fixed leading arguments, e.g. a script path for an interpreter
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Working directory, inherited when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
    /// Environment overrides applied on top of the host environment
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub env_overrides: IndexMap<String, String>,
    /// Input encoding
    pub input_encoding: InputEncoding,
    /// Output encoding
    pub output_encoding: OutputEncoding,
    /// Arguments for a cheap liveness invocation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smoke_test_args: Option<Vec<String>>,
    /// Agent needs external credentials to do anything useful
    #[serde(default)]
    pub requires_credentials: bool,
    /// Human-readable summary
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Operations this agent serves
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<String>,
    /// Deadline used when the caller gives none
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_timeout_ms: Option<u64>,
}

impl AgentDescriptor {
    /// Create a descriptor with the required fields
    #[must_use]
    pub fn new(
        executable_path: impl Into<PathBuf>,
        input_encoding: InputEncoding,
        output_encoding: OutputEncoding,
    ) -> Self {
        Self {
            executable_path: executable_path.into(),
            args: Vec::new(),
            working_dir: None,
            env_overrides: IndexMap::new(),
            input_encoding,
            output_encoding,
            smoke_test_args: None,
            requires_credentials: false,
            description: None,
            capabilities: Vec::new(),
            default_timeout_ms: None,
        }
    }

    /// Set fixed leading arguments
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Set working directory
    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Add an environment override; a repeated key replaces the earlier value
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_overrides.insert(key.into(), value.into());
        self
    }

    /// Declare a smoke-test invocation
    #[must_use]
    pub fn with_smoke_test<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.smoke_test_args = Some(args.into_iter().map(Into::into).collect());
        self
    }

    /// Mark as needing credentials
    #[must_use]
    pub fn with_credentials(mut self, required: bool) -> Self {
        self.requires_credentials = required;
        self
    }

    /// Set description
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Add a capability
    #[must_use]
    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.push(capability.into());
        self
    }

    /// Set default deadline
    #[must_use]
    pub fn with_default_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.default_timeout_ms = Some(timeout_ms);
        self
    }

    /// Whether this agent serves `capability`
    #[must_use]
    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }

    /// Problems that make this descriptor unusable, empty when valid
    #[must_use]
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.executable_path.as_os_str().is_empty() {
            problems.push("executable path is empty".to_string());
        }
        for key in self.env_overrides.keys() {
            if key.is_empty() || key.contains('=') || key.contains('\0') {
                problems.push(format!("invalid environment variable name {:?}", key));
            }
        }
        if self.default_timeout_ms == Some(0) {
            problems.push("default timeout must be greater than zero".to_string());
        }
        problems
    }
}
