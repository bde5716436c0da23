//! Process supervision.
//!
//! Each execution is its own process group. Output is drained on background
//! tasks as it is produced, so a deadline kill still returns everything the
//! agent wrote up to that point.

use command_group::{AsyncCommandGroup, AsyncGroupChild};
use ferry_agent::Invocation;
use ferry_core::{BridgeError, BridgeResult, ExecutionId, RawExecutionResult};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::task::JoinHandle;

/// How long to keep draining pipes after the process is gone
///
/// Grandchildren that inherited a pipe can hold it open indefinitely.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

type Sink = Arc<Mutex<Vec<u8>>>;

/// Kills the process group if dropped before the process was reaped
struct GroupGuard {
    child: AsyncGroupChild,
    reaped: bool,
}

impl Drop for GroupGuard {
    fn drop(&mut self) {
        if !self.reaped {
            if let Err(e) = self.child.start_kill() {
                tracing::debug!(error = %e, "process group already gone");
            }
        }
    }
}

/// Run one invocation to completion or until `deadline` fires
///
/// The returned result records a timeout rather than failing, so the caller
/// can classify it together with the captured output.
///
/// # Errors
///
/// - `SpawnFailure` if the program cannot be started
/// - `Io` if waiting on the process fails
pub async fn supervise(
    agent: &str,
    execution_id: ExecutionId,
    invocation: &Invocation,
    deadline: Duration,
) -> BridgeResult<RawExecutionResult> {
    let program = program_path(invocation);
    let mut command = Command::new(&program);
    command
        .args(&invocation.args)
        .envs(invocation.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(if invocation.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = &invocation.working_dir {
        command.current_dir(dir);
    }

    let started = Instant::now();
    let child = command
        .group_spawn()
        .map_err(|source| BridgeError::SpawnFailure {
            agent: agent.to_string(),
            execution_id,
            program: program.display().to_string(),
            source: Arc::new(source),
        })?;
    let mut guard = GroupGuard {
        child,
        reaped: false,
    };
    tracing::debug!(
        agent,
        %execution_id,
        program = %program.display(),
        pid = ?guard.child.id(),
        deadline_ms = deadline.as_millis() as u64,
        "spawned agent"
    );

    let stdout: Sink = Arc::default();
    let stderr: Sink = Arc::default();
    let readers = [
        tokio::spawn(drain(guard.child.inner().stdout.take(), Arc::clone(&stdout))),
        tokio::spawn(drain(guard.child.inner().stderr.take(), Arc::clone(&stderr))),
    ];

    let pipe = guard.child.inner().stdin.take();
    if let (Some(bytes), Some(mut pipe)) = (invocation.stdin.clone(), pipe) {
        let agent = agent.to_string();
        tokio::spawn(async move {
            if let Err(e) = pipe.write_all(&bytes).await {
                // The agent may legitimately exit without reading its input.
                tracing::debug!(agent = %agent, error = %e, "stdin write ended early");
            }
            let _ = pipe.shutdown().await;
        });
    }

    let (exit_code, timed_out) = match tokio::time::timeout(deadline, guard.child.wait()).await {
        Ok(Ok(status)) => (status.code(), false),
        Ok(Err(source)) => {
            return Err(BridgeError::Io {
                path: program.display().to_string(),
                source: Arc::new(source),
            });
        }
        Err(_) => {
            tracing::warn!(
                agent,
                %execution_id,
                deadline_ms = deadline.as_millis() as u64,
                "agent exceeded deadline, killing process group"
            );
            if let Err(e) = guard.child.start_kill() {
                tracing::warn!(agent, %execution_id, error = %e, "failed to kill process group");
            }
            if let Err(e) = guard.child.wait().await {
                tracing::debug!(agent, %execution_id, error = %e, "failed to reap killed agent");
            }
            (None, true)
        }
    };
    guard.reaped = true;
    let elapsed = started.elapsed();

    finish_readers(readers).await;

    let result = RawExecutionResult {
        stdout: take_text(&stdout),
        stderr: take_text(&stderr),
        exit_code,
        timed_out,
        deadline,
        elapsed,
    };
    tracing::debug!(
        agent,
        %execution_id,
        exit_code = ?result.exit_code,
        timed_out,
        elapsed_ms = elapsed.as_millis() as u64,
        "agent finished"
    );
    Ok(result)
}

/// Relative programs with a directory component are taken relative to the
/// agent's working directory, matching how they are located for checks
fn program_path(invocation: &Invocation) -> PathBuf {
    let program = &invocation.program;
    match &invocation.working_dir {
        Some(dir) if program.is_relative() && program.components().count() > 1 => {
            dir.join(program)
        }
        _ => program.clone(),
    }
}

async fn drain<R: AsyncRead + Unpin>(reader: Option<R>, sink: Sink) {
    let Some(mut reader) = reader else { return };
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => sink
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .extend_from_slice(&chunk[..n]),
            Err(e) => {
                tracing::debug!(error = %e, "output pipe read failed");
                break;
            }
        }
    }
}

async fn finish_readers(readers: [JoinHandle<()>; 2]) {
    let handles: Vec<_> = readers.iter().map(JoinHandle::abort_handle).collect();
    let joined = futures::future::join_all(readers);
    if tokio::time::timeout(DRAIN_GRACE, joined).await.is_err() {
        tracing::debug!("output pipes still open after exit, abandoning");
        for handle in handles {
            handle.abort();
        }
    }
}

fn take_text(sink: &Sink) -> String {
    let bytes = std::mem::take(&mut *sink.lock().unwrap_or_else(PoisonError::into_inner));
    String::from_utf8_lossy(&bytes).into_owned()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use ferry_agent::ArtifactGuard;

    fn sh(script: &str, stdin: Option<&str>) -> Invocation {
        Invocation {
            program: PathBuf::from("sh"),
            args: vec!["-c".to_string(), script.to_string()],
            stdin: stdin.map(|s| s.as_bytes().to_vec()),
            env: vec![("GREETING".to_string(), "hello".to_string())],
            working_dir: None,
            artifacts: ArtifactGuard::new(),
        }
    }

    #[tokio::test]
    async fn test_captures_stdout_and_stderr() {
        let inv = sh("echo \"$GREETING\"; echo oops >&2", None);
        let raw = supervise("t", ExecutionId::new(), &inv, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(raw.stdout, "hello\n");
        assert_eq!(raw.stderr, "oops\n");
        assert_eq!(raw.exit_code, Some(0));
        assert!(!raw.timed_out);
    }

    #[tokio::test]
    async fn test_stdin_is_written_and_closed() {
        let inv = sh("cat", Some("{\"k\":1}"));
        let raw = supervise("t", ExecutionId::new(), &inv, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(raw.stdout, "{\"k\":1}");
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_reported() {
        let inv = sh("echo bad >&2; exit 7", None);
        let raw = supervise("t", ExecutionId::new(), &inv, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(raw.exit_code, Some(7));
        assert_eq!(raw.stderr, "bad\n");
    }

    #[tokio::test]
    async fn test_agent_ignoring_stdin_does_not_fail() {
        let big = "x".repeat(1 << 20);
        let inv = sh("exit 0", Some(&big));
        let raw = supervise("t", ExecutionId::new(), &inv, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(raw.exit_code, Some(0));
    }

    #[tokio::test]
    async fn test_timeout_keeps_partial_output() {
        let inv = sh("echo started; sleep 5; echo never", None);
        let begin = Instant::now();
        let raw = supervise("t", ExecutionId::new(), &inv, Duration::from_millis(300))
            .await
            .unwrap();
        assert!(raw.timed_out);
        assert_eq!(raw.exit_code, None);
        assert_eq!(raw.stdout, "started\n");
        assert!(begin.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let mut inv = sh("", None);
        inv.program = PathBuf::from("/nonexistent/ferry-agent");
        let err = supervise("ghost", ExecutionId::new(), &inv, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::SpawnFailure { ref agent, .. } if agent == "ghost"));
    }

    #[test]
    fn test_program_path() {
        let mut inv = sh("", None);
        inv.program = PathBuf::from("./agent.sh");
        inv.working_dir = Some(PathBuf::from("/srv/agents"));
        assert_eq!(program_path(&inv), PathBuf::from("/srv/agents/./agent.sh"));

        inv.program = PathBuf::from("python3");
        assert_eq!(program_path(&inv), PathBuf::from("python3"));
    }
}
