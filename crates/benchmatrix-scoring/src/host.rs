//! Client side of the module host protocol.
//!
//! The host is a JavaScript runtime process running [`crate::sandbox::HOST_SCRIPT`].
//! Requests go out as JSON lines on its stdin; replies come back on stdout
//! as JSON lines prefixed with [`MARKER`]. Any other stdout line is noise
//! and is skipped. Every request carries its own time budget, and a host
//! that misses one is killed on the spot.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use benchmatrix_core::value::Value;

/// Prefix that marks a protocol reply line.
pub const MARKER: &str = "\u{0}benchmatrix\u{0}";

const STDERR_TAIL_BYTES: usize = 4096;

/// Errors talking to the module host.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("failed to start scoring host `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{op} timed out after {after_ms}ms")]
    Timeout { op: &'static str, after_ms: u64 },

    #[error("scoring host exited unexpectedly{}", stderr_suffix(.stderr))]
    Exited { stderr: String },

    #[error("scoring host protocol error: {0}")]
    Protocol(String),

    /// An exception thrown inside the host, formatted `Name: message`.
    #[error("{0}")]
    Thrown(String),

    #[error("scoring host I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn stderr_suffix(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(": {trimmed}")
    }
}

impl HostError {
    /// Whether the host process is still usable after this error.
    pub fn host_survives(&self) -> bool {
        matches!(self, HostError::Thrown(_))
    }
}

#[derive(Debug, Deserialize)]
struct Reply {
    #[serde(default)]
    id: Option<u64>,
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    exports: Option<BTreeMap<String, String>>,
    /// Kept as-is so that a JSON `null` stays `null`.
    #[serde(default)]
    value: serde_json::Value,
}

/// A running module host.
pub struct ModuleHost {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    stderr_tail: Arc<Mutex<String>>,
    next_id: u64,
    alive: bool,
}

impl ModuleHost {
    /// Start the runtime on the host script.
    pub async fn spawn(
        program: &str,
        args: &[String],
        script: &Path,
        work_dir: &Path,
        env: &[(String, String)],
    ) -> Result<Self, HostError> {
        let mut child = Command::new(program)
            .args(args)
            .arg(script)
            .current_dir(work_dir)
            .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| HostError::Spawn {
                program: program.to_string(),
                source,
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| HostError::Protocol("host stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| HostError::Protocol("host stdout unavailable".into()))?;

        let stderr_tail = Arc::new(Mutex::new(String::new()));
        if let Some(stderr) = child.stderr.take() {
            let tail = Arc::clone(&stderr_tail);
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let mut tail = tail.lock().unwrap_or_else(|p| p.into_inner());
                    tail.push_str(&line);
                    tail.push('\n');
                    if tail.len() > STDERR_TAIL_BYTES {
                        let mut cut = tail.len() - STDERR_TAIL_BYTES;
                        while !tail.is_char_boundary(cut) {
                            cut += 1;
                        }
                        tail.drain(..cut);
                    }
                }
            });
        }

        tracing::debug!(%program, pid = ?child.id(), "scoring host started");
        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
            stderr_tail,
            next_id: 0,
            alive: true,
        })
    }

    /// Import the module and report each export's kind.
    pub async fn load(&mut self, path: &Path, budget: Duration) -> Result<BTreeMap<String, String>, HostError> {
        let body = serde_json::json!({ "op": "load", "path": path });
        let reply = self.request(body, "module load", budget).await?;
        reply
            .exports
            .ok_or_else(|| HostError::Protocol("load reply without exports".into()))
    }

    /// Build the instance test cases run against.
    pub async fn instantiate(&mut self, factory: &str, budget: Duration) -> Result<(), HostError> {
        let body = serde_json::json!({ "op": "instantiate", "factory": factory });
        self.request(body, "instance construction", budget).await?;
        Ok(())
    }

    /// Call an instance method or export and return what it produced.
    pub async fn call(&mut self, target: &str, args: &[Value], budget: Duration) -> Result<Value, HostError> {
        let args: Vec<serde_json::Value> = args.iter().map(Value::to_json).collect();
        let body = serde_json::json!({ "op": "call", "target": target, "args": args });
        let reply = self.request(body, "call", budget).await?;
        Ok(Value::from_json(reply.value))
    }

    /// Stop the host. Generated code may have left timers running, so the
    /// process is killed rather than waited on.
    pub async fn shutdown(mut self) {
        if let Err(e) = self.child.kill().await {
            tracing::debug!("scoring host already gone: {e}");
        }
    }

    async fn request(&mut self, mut body: serde_json::Value, op: &'static str, budget: Duration) -> Result<Reply, HostError> {
        if !self.alive {
            return Err(HostError::Exited {
                stderr: self.stderr_tail(),
            });
        }

        self.next_id += 1;
        let id = self.next_id;
        body["id"] = serde_json::json!(id);
        let mut line = serde_json::to_string(&body)
            .map_err(|e| HostError::Protocol(format!("could not encode request: {e}")))?;
        line.push('\n');

        let exchange = async {
            self.stdin.write_all(line.as_bytes()).await?;
            self.stdin.flush().await?;
            read_reply(&mut self.stdout, id).await
        };

        match tokio::time::timeout(budget, exchange).await {
            Ok(Ok(reply)) if reply.ok => Ok(reply),
            Ok(Ok(reply)) => Err(HostError::Thrown(
                reply.error.unwrap_or_else(|| "unknown error".into()),
            )),
            Ok(Err(HostError::Io(e))) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                self.mark_dead().await;
                Err(HostError::Exited {
                    stderr: self.stderr_tail(),
                })
            }
            Ok(Err(HostError::Exited { .. })) => {
                self.mark_dead().await;
                Err(HostError::Exited {
                    stderr: self.stderr_tail(),
                })
            }
            Ok(Err(e)) => {
                self.mark_dead().await;
                Err(e)
            }
            Err(_) => {
                tracing::warn!(op, budget_ms = budget.as_millis() as u64, "scoring host over budget; killing it");
                self.mark_dead().await;
                Err(HostError::Timeout {
                    op,
                    after_ms: budget.as_millis() as u64,
                })
            }
        }
    }

    async fn mark_dead(&mut self) {
        self.alive = false;
        let _ = self.child.kill().await;
        // Give the stderr reader a moment to drain what the runtime printed
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    fn stderr_tail(&self) -> String {
        self.stderr_tail
            .lock()
            .map(|t| t.clone())
            .unwrap_or_default()
    }
}

async fn read_reply(stdout: &mut Lines<BufReader<ChildStdout>>, id: u64) -> Result<Reply, HostError> {
    loop {
        let Some(line) = stdout.next_line().await? else {
            return Err(HostError::Exited {
                stderr: String::new(),
            });
        };
        // Unterminated writes from generated code can share the line
        let Some(start) = line.find(MARKER) else {
            continue;
        };
        let payload = &line[start + MARKER.len()..];
        let reply: Reply = serde_json::from_str(payload)
            .map_err(|e| HostError::Protocol(format!("bad reply: {e}")))?;
        match reply.id {
            Some(reply_id) if reply_id == id => return Ok(reply),
            Some(_) => continue,
            None => {
                return Err(HostError::Protocol(
                    reply.error.unwrap_or_else(|| "reply without id".into()),
                ))
            }
        }
    }
}
