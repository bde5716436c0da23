//! On-disk artifacts of an invocation.
//!
//! Every file an invocation creates is named `ferry-<execution-id>.<kind>.json`
//! so concurrent invocations never collide and leftovers from a crashed host
//! can be recognised and swept.

use ferry_core::{BridgeError, BridgeResult, ExecutionId};
use once_cell::sync::Lazy;
use regex::Regex;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

static ARTIFACT_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^ferry-[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}\.(input|output)\.json$",
    )
    .expect("Invalid artifact name regex")
});

/// Role of an artifact file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    /// Marshaled input written before spawn
    Input,
    /// Sidecar output written by the agent
    Output,
}

impl ArtifactKind {
    fn suffix(self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Output => "output",
        }
    }
}

/// Path of the `kind` artifact for `execution_id` inside `dir`
#[must_use]
pub fn artifact_path(dir: &Path, execution_id: ExecutionId, kind: ArtifactKind) -> PathBuf {
    dir.join(format!("ferry-{}.{}.json", execution_id, kind.suffix()))
}

/// Whether a file name looks like something this crate produced
#[must_use]
pub fn is_artifact_name(name: &str) -> bool {
    ARTIFACT_NAME.is_match(name)
}

/// Create the artifact directory if needed
///
/// # Errors
///
/// Returns `Io` if the directory cannot be created
pub fn ensure_dir(dir: &Path) -> BridgeResult<()> {
    std::fs::create_dir_all(dir).map_err(|source| BridgeError::Io {
        path: dir.display().to_string(),
        source: Arc::new(source),
    })
}

/// Create the artifact directory and return it as an absolute path
///
/// # Errors
///
/// Returns `Io` if the directory cannot be created or the current
/// directory cannot be determined
pub fn prepare_dir(dir: &Path) -> BridgeResult<PathBuf> {
    ensure_dir(dir)?;
    std::path::absolute(dir).map_err(|source| BridgeError::Io {
        path: dir.display().to_string(),
        source: Arc::new(source),
    })
}

/// Owns the artifact paths of one invocation and removes them on drop
///
/// Dropping covers every exit path, including a caller abandoning the
/// future mid-execution.
#[derive(Debug, Default)]
pub struct ArtifactGuard {
    input: Option<PathBuf>,
    output: Option<PathBuf>,
}

impl ArtifactGuard {
    /// Guard with nothing tracked
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a path; a later call for the same kind replaces it
    pub fn track(&mut self, kind: ArtifactKind, path: PathBuf) {
        match kind {
            ArtifactKind::Input => self.input = Some(path),
            ArtifactKind::Output => self.output = Some(path),
        }
    }

    /// Input file, if the encoding uses one
    #[must_use]
    pub fn input_path(&self) -> Option<&Path> {
        self.input.as_deref()
    }

    /// Sidecar output file, if the encoding uses one
    #[must_use]
    pub fn output_path(&self) -> Option<&Path> {
        self.output.as_deref()
    }

    /// All tracked paths
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.input.iter().chain(self.output.iter()).map(PathBuf::as_path)
    }

    /// Remove every tracked file now
    ///
    /// Missing files are fine. Other failures are logged and swallowed.
    pub fn cleanup(&mut self) {
        for path in self.input.take().into_iter().chain(self.output.take()) {
            match std::fs::remove_file(&path) {
                Ok(()) => tracing::trace!(path = %path.display(), "removed artifact"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to remove artifact")
                }
            }
        }
    }
}

impl Drop for ArtifactGuard {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Outcome of a sweep
#[derive(Debug, Default)]
pub struct SweepReport {
    /// Files removed
    pub removed: Vec<PathBuf>,
    /// Files that matched but could not be removed
    pub failed: Vec<(PathBuf, io::Error)>,
}

/// Remove leftover artifacts in `dir` older than `min_age`
///
/// Only names matching the artifact pattern are considered, so sweeping a
/// shared temp directory never touches foreign files. A zero `min_age`
/// removes every match, which is only safe when nothing is in flight.
///
/// # Errors
///
/// Returns `Io` if `dir` cannot be listed. A missing directory is an empty
/// sweep.
pub fn sweep_artifacts(dir: &Path, min_age: Duration) -> BridgeResult<SweepReport> {
    let mut report = SweepReport::default();
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(report),
        Err(source) => {
            return Err(BridgeError::Io {
                path: dir.display().to_string(),
                source: Arc::new(source),
            });
        }
    };

    let now = SystemTime::now();
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !is_artifact_name(name) {
            continue;
        }

        let path = entry.path();
        let old_enough = entry
            .metadata()
            .and_then(|m| m.modified())
            .map(|modified| now.duration_since(modified).unwrap_or_default() >= min_age)
            .unwrap_or(true);
        if !old_enough {
            continue;
        }

        match std::fs::remove_file(&path) {
            Ok(()) => report.removed.push(path),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "sweep could not remove artifact");
                report.failed.push((path, e));
            }
        }
    }

    tracing::info!(
        dir = %dir.display(),
        removed = report.removed.len(),
        failed = report.failed.len(),
        "artifact sweep finished"
    );
    Ok(report)
}
