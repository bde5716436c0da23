//! Agent liveness checks.
//!
//! A check never fails: every problem ends up in the [`HealthReport`].

use ferry_agent::registry::locate_executable;
use ferry_agent::{AgentDescriptor, ArtifactGuard, ENV_AGENT, ENV_EXECUTION_ID, Invocation};
use ferry_core::ExecutionId;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::supervisor::supervise;

/// Outcome of a smoke test
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SmokeTest {
    /// Exited 0 within the deadline
    Passed {
        /// Wall-clock time
        duration_ms: u64,
    },
    /// Did not start, exited non-zero or timed out
    Failed {
        /// What went wrong
        reason: String,
    },
    /// Declared but not run
    Skipped {
        /// Why it was not run
        reason: String,
    },
    /// The descriptor declares no smoke test
    NotDeclared,
}

/// Liveness of one agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    /// Agent name
    pub agent: String,
    /// Resolved executable, if found
    pub executable: Option<PathBuf>,
    /// Whether the executable was found
    pub exists: bool,
    /// Smoke test outcome
    pub smoke_test: SmokeTest,
}

impl HealthReport {
    /// Executable found and smoke test not failed
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.exists && !matches!(self.smoke_test, SmokeTest::Failed { .. })
    }

    pub(crate) fn unknown(agent: &str) -> Self {
        Self {
            agent: agent.to_string(),
            executable: None,
            exists: false,
            smoke_test: SmokeTest::Skipped {
                reason: "agent is not registered".to_string(),
            },
        }
    }
}

/// Check one agent
pub(crate) async fn check(
    agent: &str,
    descriptor: &AgentDescriptor,
    smoke_timeout: Duration,
    allow_credentialed: bool,
) -> HealthReport {
    let executable = locate_executable(descriptor);
    let exists = executable.is_some();

    let smoke_test = match &descriptor.smoke_test_args {
        None => SmokeTest::NotDeclared,
        Some(_) if !exists => SmokeTest::Skipped {
            reason: "executable not found".to_string(),
        },
        Some(_) if descriptor.requires_credentials && !allow_credentialed => SmokeTest::Skipped {
            reason: "agent requires credentials".to_string(),
        },
        Some(args) => run_smoke_test(agent, descriptor, args, smoke_timeout).await,
    };

    match &smoke_test {
        SmokeTest::Failed { reason } => {
            tracing::warn!(agent, reason = %reason, "smoke test failed");
        }
        _ if !exists => {
            tracing::warn!(agent, program = %descriptor.executable_path.display(), "executable not found");
        }
        other => tracing::debug!(agent, result = ?other, "agent checked"),
    }

    HealthReport {
        agent: agent.to_string(),
        executable,
        exists,
        smoke_test,
    }
}

async fn run_smoke_test(
    agent: &str,
    descriptor: &AgentDescriptor,
    smoke_args: &[String],
    deadline: Duration,
) -> SmokeTest {
    let execution_id = ExecutionId::new();
    let mut env: Vec<(String, String)> = descriptor
        .env_overrides
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    env.push((ENV_EXECUTION_ID.to_string(), execution_id.to_string()));
    env.push((ENV_AGENT.to_string(), agent.to_string()));

    let invocation = Invocation {
        program: descriptor.executable_path.clone(),
        args: descriptor.args.iter().chain(smoke_args).cloned().collect(),
        stdin: None,
        env,
        working_dir: descriptor.working_dir.clone(),
        artifacts: ArtifactGuard::new(),
    };

    match supervise(agent, execution_id, &invocation, deadline).await {
        Err(e) => SmokeTest::Failed {
            reason: e.to_string(),
        },
        Ok(raw) if raw.timed_out => SmokeTest::Failed {
            reason: format!("timed out after {}ms", deadline.as_millis()),
        },
        Ok(raw) if !raw.succeeded() => SmokeTest::Failed {
            reason: match raw.exit_code {
                Some(code) => format!("exited with status {}: {}", code, raw.stderr.trim()),
                None => "terminated by a signal".to_string(),
            },
        },
        Ok(raw) => SmokeTest::Passed {
            duration_ms: u64::try_from(raw.elapsed.as_millis()).unwrap_or(u64::MAX),
        },
    }
}
