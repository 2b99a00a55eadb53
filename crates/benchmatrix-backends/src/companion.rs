//! Companion server lifecycle for the server-attached backend.
//!
//! One `CompanionServer` owns at most one child process. Health is always
//! decided by a live probe of the port, never by the cached handle, so a
//! server that someone else started (or that survived a crashed earlier
//! run) is reused instead of colliding with a second one.

use std::process::Stdio;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use benchmatrix_core::error::BackendError;
use benchmatrix_core::traits::CompanionService;

use crate::agent::{stop_child, STOP_GRACE};

pub const DEFAULT_PORT: u16 = 4096;
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(30);
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);
const INITIAL_BACKOFF: Duration = Duration::from_millis(100);
const MAX_BACKOFF: Duration = Duration::from_millis(500);
const BACKOFF_FACTOR: f64 = 1.5;

/// Placeholder in serve arguments replaced by the port number.
pub const PORT_PLACEHOLDER: &str = "{port}";

/// Default arguments for `opencode serve`.
pub fn default_serve_args() -> Vec<String> {
    ["serve", "--port", PORT_PLACEHOLDER, "--hostname", "127.0.0.1"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[derive(Default)]
struct CompanionState {
    child: Option<Child>,
    url: Option<String>,
}

/// Supervisor for a long-lived companion server.
pub struct CompanionServer {
    program: String,
    serve_args: Vec<String>,
    port: u16,
    startup_timeout: Duration,
    client: reqwest::Client,
    state: Mutex<CompanionState>,
    spawns: AtomicU32,
}

impl CompanionServer {
    pub fn new(program: &str, serve_args: Vec<String>, port: u16) -> Self {
        Self {
            program: program.to_string(),
            serve_args,
            port,
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            client: reqwest::Client::new(),
            state: Mutex::new(CompanionState::default()),
            spawns: AtomicU32::new(0),
        }
    }

    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    /// URL of the last server seen healthy, if any.
    pub async fn url(&self) -> Option<String> {
        self.state.lock().await.url.clone()
    }

    /// Whether this handle currently owns a child process.
    pub async fn owns_process(&self) -> bool {
        self.state.lock().await.child.is_some()
    }

    /// Number of processes this handle has spawned.
    pub fn spawn_count(&self) -> u32 {
        self.spawns.load(Ordering::SeqCst)
    }

    /// Healthy iff the server answers with a status below 500.
    pub async fn probe(&self) -> bool {
        match self
            .client
            .get(self.base_url())
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
        {
            Ok(response) => response.status().as_u16() < 500,
            Err(_) => false,
        }
    }

    fn startup_error(&self, detail: String) -> BackendError {
        BackendError::CompanionStartup(format!("`{}` on port {}: {detail}", self.program, self.port))
    }

    async fn spawn_and_wait(&self) -> Result<Child, BackendError> {
        let port = self.port.to_string();
        let args: Vec<String> = self
            .serve_args
            .iter()
            .map(|a| a.replace(PORT_PLACEHOLDER, &port))
            .collect();

        tracing::info!(program = %self.program, port = self.port, "starting companion server");
        let mut builder = Command::new(&self.program);
        builder
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        #[cfg(unix)]
        builder.process_group(0);
        let mut child = builder
            .spawn()
            .map_err(|e| self.startup_error(format!("spawn failed: {e}")))?;
        let pgid = child.id();
        self.spawns.fetch_add(1, Ordering::SeqCst);

        let start = Instant::now();
        let mut delay = INITIAL_BACKOFF;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    return Err(self.startup_error(format!("exited during startup with {status}")));
                }
                Ok(None) => {}
                Err(e) => {
                    stop_child(&mut child, pgid, STOP_GRACE).await;
                    return Err(self.startup_error(format!("could not poll process: {e}")));
                }
            }

            if self.probe().await {
                tracing::info!(
                    port = self.port,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "companion server healthy"
                );
                return Ok(child);
            }

            let elapsed = start.elapsed();
            if elapsed >= self.startup_timeout {
                stop_child(&mut child, pgid, STOP_GRACE).await;
                return Err(self.startup_error(format!(
                    "not healthy after {}ms",
                    elapsed.as_millis()
                )));
            }

            tokio::time::sleep(delay.min(self.startup_timeout - elapsed)).await;
            delay = delay.mul_f64(BACKOFF_FACTOR).min(MAX_BACKOFF);
        }
    }
}

#[async_trait]
impl CompanionService for CompanionServer {
    async fn ensure_running(&self) -> Result<String, BackendError> {
        let mut state = self.state.lock().await;
        let url = self.base_url();

        if self.probe().await {
            if state.child.is_none() {
                tracing::debug!(%url, "reusing companion server already listening");
            }
            state.url = Some(url.clone());
            return Ok(url);
        }

        // Our own child stopped answering: clear it out before replacing it
        if let Some(mut stale) = state.child.take() {
            tracing::warn!(%url, "companion server stopped responding; restarting");
            let pgid = stale.id();
            stop_child(&mut stale, pgid, STOP_GRACE).await;
        }
        state.url = None;

        let child = self.spawn_and_wait().await?;
        state.child = Some(child);
        state.url = Some(url.clone());
        Ok(url)
    }

    async fn stop(&self) {
        let mut state = self.state.lock().await;
        if let Some(mut child) = state.child.take() {
            tracing::info!(port = self.port, "stopping companion server");
            let pgid = child.id();
            stop_child(&mut child, pgid, STOP_GRACE).await;
        }
        state.url = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn free_port() -> u16 {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn reuses_healthy_server_without_spawning() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let port = server.address().port();
        let companion = CompanionServer::new("benchmatrix-definitely-not-installed", default_serve_args(), port);

        let first = companion.ensure_running().await.unwrap();
        let second = companion.ensure_running().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first, format!("http://127.0.0.1:{port}"));
        assert_eq!(companion.spawn_count(), 0);
        assert!(!companion.owns_process().await);
    }

    #[tokio::test]
    async fn server_error_status_is_unhealthy() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let companion = CompanionServer::new(
            "benchmatrix-definitely-not-installed",
            default_serve_args(),
            server.address().port(),
        );
        assert!(!companion.probe().await);
        let err = companion.ensure_running().await.unwrap_err();
        assert!(matches!(err, BackendError::CompanionStartup(_)));
    }

    #[tokio::test]
    async fn missing_program_fails_startup() {
        let companion = CompanionServer::new("benchmatrix-definitely-not-installed", default_serve_args(), free_port());
        let err = companion.ensure_running().await.unwrap_err();
        assert!(err.to_string().contains("companion server failed to start"));
        assert!(companion.url().await.is_none());
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let companion = CompanionServer::new("opencode", default_serve_args(), free_port());
        companion.stop().await;
        companion.stop().await;
        assert!(companion.url().await.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn early_exit_fails_startup() {
        let companion = CompanionServer::new("true", vec![], free_port());
        let err = companion.ensure_running().await.unwrap_err();
        assert!(err.to_string().contains("exited during startup"));
        assert_eq!(companion.spawn_count(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unhealthy_server_times_out_and_is_killed() {
        let companion = CompanionServer::new("sleep", vec!["30".into()], free_port())
            .with_startup_timeout(Duration::from_millis(400));
        let start = Instant::now();
        let err = companion.ensure_running().await.unwrap_err();
        assert!(err.to_string().contains("not healthy after"));
        assert!(start.elapsed() < Duration::from_secs(10));
        assert!(!companion.owns_process().await);
    }

    #[test]
    fn serve_args_carry_port_placeholder() {
        let args = default_serve_args();
        assert!(args.contains(&PORT_PLACEHOLDER.to_string()));
        assert_eq!(args[0], "serve");
    }
}
