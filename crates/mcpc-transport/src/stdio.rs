//! Child-process stdio transport.
//!
//! One NDJSON record per line on both stdin and stdout; stderr is forwarded
//! to the logger. A dead child is treated as a transient failure: the
//! reader sleeps one second and respawns the process rather than
//! propagating the death to every waiting caller.

use std::process::Stdio as StdStdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex as TokioMutex;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use mcpc_protocol::{Error, JsonRpcResult, Result};

use crate::core::{Dispatcher, Transport, DEFAULT_REQUEST_TIMEOUT};
use crate::pending::PendingTable;

/// Configuration for spawning the MCP server subprocess.
#[derive(Debug, Clone)]
pub struct StdioConfig {
    pub command: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub request_timeout: Duration,
}

impl StdioConfig {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            env: Vec::new(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

pub struct StdioTransport {
    config: StdioConfig,
    child: TokioMutex<Option<Child>>,
    stdin: TokioMutex<Option<ChildStdin>>,
    stdout_slot: TokioMutex<Option<ChildStdout>>,
    stderr_slot: TokioMutex<Option<ChildStderr>>,
    pending: Arc<PendingTable>,
    dispatcher: std::sync::Mutex<Option<Weak<dyn Dispatcher>>>,
    running: AtomicBool,
    generation: AtomicU64,
    restart_lock: TokioMutex<()>,
    local_ids: AtomicU64,
    self_ref: Weak<Self>,
}

impl StdioTransport {
    pub fn new(config: StdioConfig) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            config,
            child: TokioMutex::new(None),
            stdin: TokioMutex::new(None),
            stdout_slot: TokioMutex::new(None),
            stderr_slot: TokioMutex::new(None),
            pending: Arc::new(PendingTable::new()),
            dispatcher: std::sync::Mutex::new(None),
            running: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            restart_lock: TokioMutex::new(()),
            local_ids: AtomicU64::new(1),
            self_ref: self_ref.clone(),
        })
    }

    fn dispatcher(&self) -> Option<Weak<dyn Dispatcher>> {
        self.dispatcher.lock().unwrap().clone()
    }

    async fn spawn_child(&self) -> Result<(ChildStdin, ChildStdout, ChildStderr)> {
        let mut command = Command::new(&self.config.command);
        command
            .args(&self.config.args)
            .stdin(StdStdio::piped())
            .stdout(StdStdio::piped())
            .stderr(StdStdio::piped())
            .kill_on_drop(true);
        for (key, value) in &self.config.env {
            command.env(key, value);
        }

        let mut child = command
            .spawn()
            .map_err(|e| Error::transport(format!("failed to spawn `{}`: {e}", self.config.command)))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::transport("child stdin not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::transport("child stdout not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::transport("child stderr not captured"))?;

        *self.child.lock().await = Some(child);
        Ok((stdin, stdout, stderr))
    }

    /// Tear down the previous process (if any) and spawn a fresh one under
    /// the original command/args/env. Only one restart happens per
    /// generation, even if both the reader and stderr loop notice the dead
    /// process at the same time.
    async fn restart_if_needed(&self, observed_generation: u64) -> Result<u64> {
        let _guard = self.restart_lock.lock().await;
        if self.generation.load(Ordering::SeqCst) != observed_generation {
            // Another loop already restarted after we observed failure.
            return Ok(self.generation.load(Ordering::SeqCst));
        }

        info!(command = %self.config.command, "restarting MCP stdio child process");
        if let Some(mut child) = self.child.lock().await.take() {
            let _ = child.start_kill();
        }
        self.pending.clear().await;
        *self.stdin.lock().await = None;

        let (stdin, stdout, stderr) = self.spawn_child().await?;
        *self.stdin.lock().await = Some(stdin);
        *self.stdout_slot.lock().await = Some(stdout);
        *self.stderr_slot.lock().await = Some(stderr);
        self.generation.fetch_add(1, Ordering::SeqCst);
        Ok(self.generation.load(Ordering::SeqCst))
    }

    async fn route_incoming(self: &Arc<Self>, line: &str) {
        let result = match JsonRpcResult::parse(line.as_bytes(), None) {
            Ok(r) => r,
            Err(e) => {
                debug!(error = %e, line, "dropping unparseable stdio line");
                return;
            }
        };

        if result.is_response() {
            if let Some(id) = &result.id {
                if !self.pending.complete(id, result.clone()).await {
                    warn!(id, "no pending request found for stdio response");
                }
            }
            return;
        }

        let Some(dispatcher) = self.dispatcher().and_then(|d| d.upgrade()) else {
            debug!("dropping message: no dispatcher attached");
            return;
        };
        if result.is_notification() {
            dispatcher.process_notification(result).await;
        } else if result.is_request() {
            dispatcher.process_request(result).await;
        } else {
            debug!(?result, "dropping unclassifiable stdio message");
        }
    }

    fn spawn_reader(self: &Arc<Self>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut generation = 0u64;
            let mut lines = loop {
                if let Some(stdout) = this.stdout_slot.lock().await.take() {
                    break BufReader::new(stdout).lines();
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            };

            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        this.route_incoming(&line).await;
                    }
                    Ok(None) | Err(_) => {
                        if !this.running.load(Ordering::SeqCst) {
                            break;
                        }
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        match this.restart_if_needed(generation).await {
                            Ok(new_generation) => generation = new_generation,
                            Err(e) => {
                                error!(error = %e, "failed to restart stdio child process");
                                continue;
                            }
                        }
                        if let Some(stdout) = this.stdout_slot.lock().await.take() {
                            lines = BufReader::new(stdout).lines();
                        }
                    }
                }
            }
        });
    }

    fn spawn_stderr_reader(self: &Arc<Self>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut generation = 0u64;
            let mut lines = loop {
                if let Some(stderr) = this.stderr_slot.lock().await.take() {
                    break BufReader::new(stderr).lines();
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            };

            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => info!(target: "mcp_server_stderr", "{line}"),
                    Ok(None) | Err(_) => {
                        if !this.running.load(Ordering::SeqCst) {
                            break;
                        }
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        match this.restart_if_needed(generation).await {
                            Ok(new_generation) => generation = new_generation,
                            Err(_) => continue,
                        }
                        if let Some(stderr) = this.stderr_slot.lock().await.take() {
                            lines = BufReader::new(stderr).lines();
                        }
                    }
                }
            }
        });
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn start(&self) -> Result<()> {
        let (stdin, stdout, stderr) = self.spawn_child().await?;
        *self.stdin.lock().await = Some(stdin);
        *self.stdout_slot.lock().await = Some(stdout);
        *self.stderr_slot.lock().await = Some(stderr);
        self.running.store(true, Ordering::SeqCst);

        let this = self
            .self_ref
            .upgrade()
            .expect("transport outlives its own start() call");
        this.spawn_reader();
        this.spawn_stderr_reader();
        Ok(())
    }

    async fn send(
        &self,
        mut envelope: Value,
        add_id: bool,
        wait_for_response: bool,
    ) -> Result<Option<JsonRpcResult>> {
        if add_id {
            let id = self.local_ids.fetch_add(1, Ordering::Relaxed);
            if let Some(map) = envelope.as_object_mut() {
                map.insert("id".to_string(), Value::from(id));
            }
        }
        let id_string = envelope.get("id").map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        });

        let rx = if wait_for_response {
            let id = id_string
                .clone()
                .ok_or_else(|| Error::transport("wait_for_response requires an id"))?;
            Some(self.pending.register(id).await)
        } else {
            None
        };

        let mut payload = serde_json::to_vec(&envelope)
            .map_err(|e| Error::transport(format!("failed to serialize envelope: {e}")))?;
        payload.push(b'\n');

        let write_result = {
            let mut guard = self.stdin.lock().await;
            match guard.as_mut() {
                Some(stdin) => stdin.write_all(&payload).await,
                None => {
                    return Err(Error::transport("stdio transport not started"));
                }
            }
        };

        if let Err(e) = write_result {
            if let Some(id) = &id_string {
                self.pending.remove(id).await;
            }
            return Err(Error::transport(format!("failed to write to child stdin: {e}")));
        }

        match rx {
            None => Ok(None),
            Some(rx) => {
                let id = id_string.expect("checked above");
                match timeout(self.config.request_timeout, rx).await {
                    Ok(Ok(result)) => Ok(Some(result)),
                    Ok(Err(_)) => Err(Error::transport("stdio transport restarted before a reply arrived")),
                    Err(_) => {
                        self.pending.remove(&id).await;
                        Err(Error::timeout(id))
                    }
                }
            }
        }
    }

    async fn alive(&self) -> bool {
        match self.child.lock().await.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    async fn set_protocol_version(&self, _version: String) {
        // Stdio carries no out-of-band headers; the version lives only in
        // the initialize request/response bodies.
    }

    fn set_dispatcher(&self, dispatcher: Weak<dyn Dispatcher>) {
        *self.dispatcher.lock().unwrap() = Some(dispatcher);
    }

    async fn close(&self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        self.pending.clear().await;
        if let Some(mut child) = self.child.lock().await.take() {
            let _ = child.start_kill();
        }
        Ok(())
    }
}
