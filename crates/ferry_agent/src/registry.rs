//! Agent registry.
//!
//! The registry is populated once at startup and shared read-only behind an
//! `Arc` afterwards. Registration never runs the agent.

use ferry_core::{BridgeError, BridgeResult};
use indexmap::IndexMap;
use std::path::{Path, PathBuf};

use crate::descriptor::AgentDescriptor;

/// Registry of agents by name, in registration order
#[derive(Debug, Clone, Default)]
pub struct AgentRegistry {
    agents: IndexMap<String, AgentDescriptor>,
}

impl AgentRegistry {
    /// Create a new empty registry
    #[must_use]
    pub fn new() -> Self {
        Self {
            agents: IndexMap::new(),
        }
    }

    /// Register an agent
    ///
    /// # Errors
    ///
    /// Returns `AlreadyRegistered` if the name is taken (the existing entry
    /// is kept) or `InvalidDescriptor` if the descriptor is unusable
    pub fn register(
        &mut self,
        name: impl Into<String>,
        descriptor: AgentDescriptor,
    ) -> BridgeResult<()> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(BridgeError::InvalidDescriptor {
                name,
                reason: "agent name is empty".to_string(),
            });
        }
        if self.agents.contains_key(&name) {
            return Err(BridgeError::AlreadyRegistered { name });
        }
        let problems = descriptor.problems();
        if !problems.is_empty() {
            return Err(BridgeError::InvalidDescriptor {
                name,
                reason: problems.join("; "),
            });
        }

        tracing::debug!(agent = %name, program = %descriptor.executable_path.display(), "registered agent");
        self.agents.insert(name, descriptor);
        Ok(())
    }

    /// Resolve an agent by name
    ///
    /// # Errors
    ///
    /// Returns `UnknownAgent` if nothing is registered under `name`
    pub fn resolve(&self, name: &str) -> BridgeResult<&AgentDescriptor> {
        self.agents.get(name).ok_or_else(|| BridgeError::UnknownAgent {
            name: name.to_string(),
        })
    }

    /// All registered agents in registration order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &AgentDescriptor)> {
        self.agents.iter().map(|(name, d)| (name.as_str(), d))
    }

    /// List registered names in registration order
    #[must_use]
    pub fn list(&self) -> Vec<String> {
        self.agents.keys().cloned().collect()
    }

    /// Names of agents declaring `capability`
    #[must_use]
    pub fn find_by_capability(&self, capability: &str) -> Vec<String> {
        self.agents
            .iter()
            .filter(|(_, d)| d.has_capability(capability))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Check if an agent is registered
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.agents.contains_key(name)
    }

    /// Number of registered agents
    #[must_use]
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// Check if registry is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

/// Find the file the OS would execute for a descriptor
///
/// Paths with a directory component are taken as given (relative ones
/// against the working directory); bare names are searched on `PATH`.
#[must_use]
pub fn locate_executable(descriptor: &AgentDescriptor) -> Option<PathBuf> {
    let program = &descriptor.executable_path;
    if program.components().count() > 1 || program.is_absolute() {
        let candidate = match (&descriptor.working_dir, program.is_relative()) {
            (Some(dir), true) => dir.join(program),
            _ => program.clone(),
        };
        return is_executable(&candidate).then_some(candidate);
    }

    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{InputEncoding, OutputEncoding};
    use proptest::prelude::*;

    fn descriptor(program: &str) -> AgentDescriptor {
        AgentDescriptor::new(
            program,
            InputEncoding::SingleStream,
            OutputEncoding::StructuredStream,
        )
    }

    #[test]
    fn test_registry_new() {
        let registry = AgentRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_register_and_resolve() {
        let mut registry = AgentRegistry::new();
        let d = descriptor("/bin/cat");
        registry.register("echo", d.clone()).unwrap();
        assert!(registry.contains("echo"));
        assert_eq!(registry.resolve("echo").unwrap(), &d);
    }

    #[test]
    fn test_register_duplicate_keeps_original() {
        let mut registry = AgentRegistry::new();
        registry.register("echo", descriptor("/bin/cat")).unwrap();

        let err = registry
            .register("echo", descriptor("/bin/other"))
            .expect_err("duplicate must fail");
        assert!(matches!(err, BridgeError::AlreadyRegistered { ref name } if name == "echo"));
        assert_eq!(
            registry.resolve("echo").unwrap().executable_path,
            PathBuf::from("/bin/cat")
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_register_empty_path() {
        let mut registry = AgentRegistry::new();
        let err = registry.register("broken", descriptor("")).unwrap_err();
        assert!(matches!(err, BridgeError::InvalidDescriptor { .. }));
        assert!(!registry.contains("broken"));
    }

    #[test]
    fn test_register_empty_name() {
        let mut registry = AgentRegistry::new();
        let err = registry.register("  ", descriptor("/bin/cat")).unwrap_err();
        assert!(matches!(err, BridgeError::InvalidDescriptor { .. }));
    }

    #[test]
    fn test_resolve_unknown() {
        let registry = AgentRegistry::new();
        let err = registry.resolve("nope").unwrap_err();
        assert!(matches!(err, BridgeError::UnknownAgent { ref name } if name == "nope"));
    }

    #[test]
    fn test_list_preserves_order_and_capabilities() {
        let mut registry = AgentRegistry::new();
        registry
            .register("sql", descriptor("/bin/a").with_capability("query"))
            .unwrap();
        registry
            .register("chart", descriptor("/bin/b").with_capability("render"))
            .unwrap();
        registry
            .register("pdf", descriptor("/bin/c").with_capability("render"))
            .unwrap();

        assert_eq!(registry.list(), vec!["sql", "chart", "pdf"]);
        assert_eq!(registry.find_by_capability("render"), vec!["chart", "pdf"]);
        assert!(registry.find_by_capability("email").is_empty());
    }

    #[test]
    fn test_locate_bare_name_on_path() {
        assert!(locate_executable(&descriptor("sh")).is_some());
        assert!(locate_executable(&descriptor("definitely-not-a-real-binary-xyz")).is_none());
    }

    #[test]
    fn test_locate_relative_to_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("agent.sh");
        std::fs::write(&script, "#!/bin/sh\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let d = descriptor("./agent.sh").with_working_dir(dir.path());
        assert_eq!(locate_executable(&d), Some(dir.path().join("./agent.sh")));
        assert!(locate_executable(&descriptor("./agent.sh")).is_none());
    }

    proptest! {
        #[test]
        fn prop_resolve_returns_registered(
            name in "[a-z][a-z0-9_]{0,12}",
            program in "/[a-z]{1,8}/[a-z]{1,8}",
            args in proptest::collection::vec("[a-z-]{1,6}", 0..4),
            creds in any::<bool>(),
        ) {
            let d = descriptor(&program).with_args(args).with_credentials(creds);
            let mut registry = AgentRegistry::new();
            registry.register(name.clone(), d.clone()).unwrap();
            prop_assert_eq!(registry.resolve(&name).unwrap(), &d);
            prop_assert!(registry.register(name.clone(), descriptor("/x")).is_err());
            prop_assert_eq!(registry.resolve(&name).unwrap(), &d);
        }
    }
}
