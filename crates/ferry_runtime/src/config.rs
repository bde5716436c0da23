//! Bridge configuration.

use ferry_plan::ManifestConfig;
use std::path::PathBuf;
use std::time::Duration;

/// Default deadline for an execution
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);
/// Default deadline for a smoke test
pub const DEFAULT_SMOKE_TIMEOUT: Duration = Duration::from_secs(10);
/// Default result cache capacity
pub const DEFAULT_CACHE_CAPACITY: usize = 256;

/// Bridge configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Directory for input and output artifacts
    pub artifact_dir: PathBuf,
    /// Deadline when neither caller nor descriptor sets one
    pub default_timeout: Duration,
    /// Deadline for smoke tests
    pub smoke_timeout: Duration,
    /// Result cache capacity, 0 for unbounded
    pub cache_capacity: usize,
    /// Cap on concurrently running subprocesses, `None` for unbounded
    pub max_concurrent: Option<usize>,
    /// Run smoke tests of agents that need credentials
    pub allow_credentialed_smoke_tests: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            artifact_dir: std::env::temp_dir().join("ferry"),
            default_timeout: DEFAULT_TIMEOUT,
            smoke_timeout: DEFAULT_SMOKE_TIMEOUT,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            max_concurrent: None,
            allow_credentialed_smoke_tests: false,
        }
    }
}

impl BridgeConfig {
    /// Create config with defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by whatever a manifest sets
    #[must_use]
    pub fn from_manifest(manifest: &ManifestConfig) -> Self {
        let mut config = Self::default();
        if let Some(dir) = &manifest.artifact_dir {
            config.artifact_dir = dir.clone();
        }
        if let Some(ms) = manifest.default_timeout_ms {
            config.default_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = manifest.smoke_timeout_ms {
            config.smoke_timeout = Duration::from_millis(ms);
        }
        if let Some(capacity) = manifest.cache_capacity {
            config.cache_capacity = capacity;
        }
        config.max_concurrent = manifest.max_concurrent.filter(|&n| n > 0);
        if let Some(allow) = manifest.allow_credentialed_smoke_tests {
            config.allow_credentialed_smoke_tests = allow;
        }
        config
    }

    /// Set artifact directory
    #[must_use]
    pub fn with_artifact_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.artifact_dir = dir.into();
        self
    }

    /// Set default timeout
    #[must_use]
    pub const fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Set smoke-test timeout
    #[must_use]
    pub const fn with_smoke_timeout(mut self, timeout: Duration) -> Self {
        self.smoke_timeout = timeout;
        self
    }

    /// Set cache capacity
    #[must_use]
    pub const fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    /// Cap concurrent subprocesses; 0 removes the cap
    #[must_use]
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = (max > 0).then_some(max);
        self
    }

    /// Allow smoke tests of agents that need credentials
    #[must_use]
    pub const fn with_credentialed_smoke_tests(mut self, allow: bool) -> Self {
        self.allow_credentialed_smoke_tests = allow;
        self
    }
}
