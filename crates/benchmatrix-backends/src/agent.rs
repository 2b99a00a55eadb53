//! Shared subprocess runner for the CLI agent backends.
//!
//! Each call gets a fresh scratch directory under the system temp dir, so
//! the agent has no project tree around it to go exploring. The child runs
//! in its own process group, bounded by the item deadline; on expiry the
//! group gets SIGTERM, a short grace period, then SIGKILL, and only then
//! does the timeout error surface.

use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use benchmatrix_core::error::BackendError;

#[cfg(unix)]
use nix::sys::signal::{killpg, Signal};
#[cfg(unix)]
use nix::unistd::Pid;

/// Output shorter than this (trimmed) counts as an empty completion.
pub const MIN_OUTPUT_CHARS: usize = 20;

/// Time a child gets to exit after SIGTERM before it is killed.
pub const STOP_GRACE: Duration = Duration::from_secs(3);

/// Cap on the stderr tail carried in error messages.
const STDERR_TAIL_CHARS: usize = 2000;

const VERSION_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// One agent invocation.
#[derive(Debug, Clone, Default)]
pub struct AgentCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    /// Written to the child's stdin, which is then closed.
    pub stdin: Option<String>,
}

/// What a finished agent process left behind.
#[derive(Debug)]
pub struct AgentOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

/// Run an agent to completion within `deadline`.
pub async fn run_agent(command: &AgentCommand, deadline: Duration) -> Result<AgentOutput, BackendError> {
    let spawn_error = |source: std::io::Error| BackendError::Spawn {
        program: command.program.clone(),
        source,
    };

    let scratch = tempfile::Builder::new()
        .prefix("benchmatrix-agent-")
        .tempdir()
        .map_err(spawn_error)?;

    let start = Instant::now();
    let mut builder = Command::new(&command.program);
    builder
        .args(&command.args)
        .envs(command.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .current_dir(scratch.path())
        .stdin(if command.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    // Own group, so helpers the agent starts are stopped along with it
    #[cfg(unix)]
    builder.process_group(0);
    let mut child = builder.spawn().map_err(spawn_error)?;
    let pgid = child.id();

    tracing::debug!(program = %command.program, pid = ?pgid, "agent spawned");

    if let (Some(input), Some(mut stdin)) = (command.stdin.clone(), child.stdin.take()) {
        tokio::spawn(async move {
            // A child that exits without reading its input is not our problem here
            let _ = stdin.write_all(input.as_bytes()).await;
            let _ = stdin.shutdown().await;
        });
    }

    let mut stdout_reader = child.stdout.take().map(|mut out| {
        tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = out.read_to_end(&mut buf).await;
            buf
        })
    });
    let mut stderr_reader = child.stderr.take().map(|mut err| {
        tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = err.read_to_end(&mut buf).await;
            buf
        })
    });

    // The pipes stay open as long as any descendant holds them, so draining
    // them counts against the deadline too.
    let finished = tokio::time::timeout(deadline, async {
        let status = child.wait().await?;
        let stdout = collect(stdout_reader.as_mut()).await;
        let stderr = collect(stderr_reader.as_mut()).await;
        Ok::<_, std::io::Error>((status, stdout, stderr))
    })
    .await;

    match finished {
        Ok(Ok((status, stdout, stderr))) => Ok(AgentOutput {
            status,
            stdout,
            stderr,
            elapsed: start.elapsed(),
        }),
        Ok(Err(e)) => {
            abort_readers([stdout_reader, stderr_reader]);
            Err(BackendError::ProcessFailed {
                program: command.program.clone(),
                status: "an unknown status".into(),
                stderr: e.to_string(),
            })
        }
        Err(_) => {
            tracing::warn!(program = %command.program, deadline_ms = deadline.as_millis() as u64, "agent exceeded deadline; terminating");
            stop_child(&mut child, pgid, STOP_GRACE).await;
            abort_readers([stdout_reader, stderr_reader]);
            Err(BackendError::Timeout {
                after_ms: deadline.as_millis() as u64,
            })
        }
    }
}

fn abort_readers(readers: [Option<JoinHandle<Vec<u8>>>; 2]) {
    for reader in readers.into_iter().flatten() {
        reader.abort();
    }
}

async fn collect(reader: Option<&mut JoinHandle<Vec<u8>>>) -> String {
    match reader {
        Some(handle) => String::from_utf8_lossy(&handle.await.unwrap_or_default()).into_owned(),
        None => String::new(),
    }
}

/// Decide whether an agent's output is a real completion.
///
/// A zero exit code is not enough: these tools regularly exit cleanly with
/// nothing to show. Stderr stands in for stdout when stdout is too short
/// and stderr is not.
pub fn evaluate_output(program: &str, output: &AgentOutput, min_chars: usize) -> Result<String, BackendError> {
    if !output.status.success() {
        return Err(BackendError::ProcessFailed {
            program: program.to_string(),
            status: output.status.to_string(),
            stderr: tail(output.stderr.trim(), STDERR_TAIL_CHARS),
        });
    }

    let stdout_chars = output.stdout.trim().chars().count();
    if stdout_chars >= min_chars {
        return Ok(output.stdout.clone());
    }

    if output.stderr.trim().chars().count() >= min_chars {
        tracing::warn!(%program, stdout_chars, "stdout too short; using stderr as output");
        return Ok(output.stderr.clone());
    }

    Err(BackendError::EmptyOutput {
        chars: stdout_chars,
        min: min_chars,
    })
}

/// Whether `program` can be started at all.
pub async fn program_available(program: &str) -> bool {
    let child = Command::new(program)
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn();
    match child {
        Ok(mut child) => matches!(
            tokio::time::timeout(VERSION_PROBE_TIMEOUT, child.wait()).await,
            Ok(Ok(status)) if status.success()
        ),
        Err(e) => {
            tracing::debug!(%program, "not runnable: {e}");
            false
        }
    }
}

/// SIGTERM the child's process group, wait up to `grace`, then SIGKILL.
///
/// `pgid` is the pid recorded at spawn, when the child was made leader of
/// its own group. It stays usable after the child itself has been reaped,
/// as long as any member of the group is alive.
pub(crate) async fn stop_child(child: &mut Child, pgid: Option<u32>, grace: Duration) {
    #[cfg(unix)]
    {
        if let Some(pgid) = pgid {
            let group = Pid::from_raw(pgid as i32);
            let _ = killpg(group, Signal::SIGTERM);
            let exited = tokio::time::timeout(grace, child.wait()).await;
            // Sweep descendants that ignored SIGTERM or outlived the leader
            let _ = killpg(group, Signal::SIGKILL);
            if let Ok(Ok(status)) = exited {
                tracing::debug!(pgid, %status, "child exited after SIGTERM");
                return;
            }
        }
    }
    #[cfg(not(unix))]
    let _ = (pgid, grace);

    if let Err(e) = child.kill().await {
        tracing::debug!("kill failed (child likely gone): {e}");
    }
}

fn tail(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    if count <= max_chars {
        return text.to_string();
    }
    let skip = count - max_chars;
    let start = text.char_indices().nth(skip).map(|(i, _)| i).unwrap_or(0);
    format!("...{}", &text[start..])
}
