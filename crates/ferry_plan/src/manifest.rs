//! JSON manifest declaring bridge settings, agents and workflows.
//!
//! ```json
//! {
//!   "config": { "defaultTimeoutMs": 30000, "cacheCapacity": 64 },
//!   "agents": {
//!     "sql": { "executablePath": "python3", "args": ["agents/sql.py"],
//!              "inputEncoding": "structured-file", "outputEncoding": "structured-stream" }
//!   },
//!   "workflows": {
//!     "report": { "steps": [ { "name": "fetch", "agent": "sql", "operation": "query" } ] }
//!   }
//! }
//! ```

use ferry_agent::{AgentDescriptor, AgentRegistry};
use ferry_core::BridgeError;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::validate::{ValidationError, ValidationWarning, Validator};
use crate::workflow::WorkflowDefinition;

/// Manifest loading errors
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    /// File could not be read
    #[error("cannot read manifest {path}: {source}")]
    Read {
        /// Manifest path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
    /// Not valid manifest JSON
    #[error("cannot parse manifest: {0}")]
    Parse(#[from] serde_json::Error),
    /// An agent entry was rejected by the registry
    #[error(transparent)]
    Agent(#[from] BridgeError),
    /// A workflow failed validation
    #[error("invalid workflow {name}: {}", join(.errors))]
    Workflow {
        /// Workflow name
        name: String,
        /// Every problem found
        errors: Vec<ValidationError>,
    },
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Bridge settings; absent fields keep the bridge defaults
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ManifestConfig {
    /// Where input/output artifacts are written
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_dir: Option<PathBuf>,
    /// Deadline when neither caller nor agent sets one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_timeout_ms: Option<u64>,
    /// Deadline for smoke tests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smoke_timeout_ms: Option<u64>,
    /// Result cache capacity, 0 for unbounded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_capacity: Option<usize>,
    /// Cap on concurrent subprocesses
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrent: Option<usize>,
    /// Run smoke tests of agents that need credentials
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_credentialed_smoke_tests: Option<bool>,
}

/// Agents and workflows declared together
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Manifest {
    /// Bridge settings
    #[serde(default)]
    pub config: ManifestConfig,
    /// Agents by name
    #[serde(default)]
    pub agents: IndexMap<String, AgentDescriptor>,
    /// Workflows by name
    #[serde(default)]
    pub workflows: IndexMap<String, WorkflowDefinition>,
}

impl Manifest {
    /// Parse manifest JSON
    ///
    /// # Errors
    ///
    /// Returns `Parse` for malformed JSON or unknown keys
    pub fn parse(json: &str) -> Result<Self, ManifestError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read a manifest file
    ///
    /// Relative `workingDir` and `artifactDir` entries are resolved against
    /// the manifest's directory.
    ///
    /// # Errors
    ///
    /// Returns `Read` or `Parse`
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let text = std::fs::read_to_string(path).map_err(|source| ManifestError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut manifest = Self::parse(&text)?;
        let parent = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        let base = std::path::absolute(parent).unwrap_or_else(|_| parent.to_path_buf());
        manifest.rebase(&base);
        tracing::debug!(
            path = %path.display(),
            agents = manifest.agents.len(),
            workflows = manifest.workflows.len(),
            "loaded manifest"
        );
        Ok(manifest)
    }

    fn rebase(&mut self, base: &Path) {
        if let Some(dir) = self.config.artifact_dir.as_mut().filter(|d| d.is_relative()) {
            *dir = base.join(&*dir);
        }
        for descriptor in self.agents.values_mut() {
            if let Some(dir) = descriptor.working_dir.as_mut().filter(|d| d.is_relative()) {
                *dir = base.join(&*dir);
            }
        }
    }

    /// Build a registry holding every declared agent
    ///
    /// # Errors
    ///
    /// Returns `Agent` with the first descriptor the registry rejects
    pub fn registry(&self) -> Result<AgentRegistry, ManifestError> {
        let mut registry = AgentRegistry::new();
        for (name, descriptor) in &self.agents {
            registry.register(name.clone(), descriptor.clone())?;
        }
        Ok(registry)
    }

    /// Validate every workflow against the declared agents
    ///
    /// # Errors
    ///
    /// Returns `Workflow` for the first definition with structural errors
    pub fn validate_workflows(&self) -> Result<Vec<(String, ValidationWarning)>, ManifestError> {
        let validator = Validator::new().with_known_agents(self.agents.keys().cloned());
        let mut warnings = Vec::new();
        for (name, definition) in &self.workflows {
            let found = validator
                .validate(definition)
                .map_err(|errors| ManifestError::Workflow {
                    name: name.clone(),
                    errors,
                })?;
            warnings.extend(found.into_iter().map(|w| (name.clone(), w)));
        }
        Ok(warnings)
    }
}
