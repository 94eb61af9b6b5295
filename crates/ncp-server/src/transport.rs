// crates/ncp-server/src/transport.rs
// Child-process stdio transport (C2): newline-delimited JSON-RPC to a spawned MCP server

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{Mutex, oneshot};
use tracing::{debug, warn};

use crate::config::{McpDescriptor, TransportKind};
use crate::error::{NcpError, Result};
use crate::rpc::{self, Frame, JsonRpcRequest};

/// How long `start()` waits for the initialize response.
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(20);

/// Grace period between closing stdin and killing the child.
const CLOSE_GRACE: Duration = Duration::from_secs(3);

/// Session lifecycle. `Ready` is the terminal happy-path state; a `Failed`
/// session is never reused — the manager builds a fresh one on retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Starting,
    Initializing,
    Ready,
    Failed,
    Stopped,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionState::Starting => "starting",
            SessionState::Initializing => "initializing",
            SessionState::Ready => "ready",
            SessionState::Failed => "failed",
            SessionState::Stopped => "stopped",
        };
        write!(f, "{s}")
    }
}

/// Outcome delivered to a parked caller when its response arrives.
#[derive(Debug)]
enum CallOutcome {
    Result(Value),
    RpcError { code: i64, message: String },
    Lost(String),
}

type PendingMap = Arc<Mutex<HashMap<i64, oneshot::Sender<CallOutcome>>>>;

/// What the downstream told us during the handshake.
#[derive(Debug, Clone, Default)]
pub struct HandshakeInfo {
    pub protocol_version: String,
    pub capabilities: Value,
    pub server_info: Value,
}

/// Shared mutable session status, readable without touching the transport.
#[derive(Debug)]
struct Status {
    state: std::sync::RwLock<SessionState>,
    last_error: std::sync::RwLock<Option<String>>,
}

impl Status {
    fn new() -> Self {
        Self {
            state: std::sync::RwLock::new(SessionState::Starting),
            last_error: std::sync::RwLock::new(None),
        }
    }

    fn get(&self) -> SessionState {
        *self.state.read().expect("state lock poisoned")
    }

    fn set(&self, next: SessionState) {
        *self.state.write().expect("state lock poisoned") = next;
    }

    /// Transition to Failed unless the manager already stopped the session.
    fn fail(&self, reason: &str) {
        let mut state = self.state.write().expect("state lock poisoned");
        if *state != SessionState::Stopped {
            *state = SessionState::Failed;
        }
        *self.last_error.write().expect("error lock poisoned") = Some(reason.to_string());
    }
}

/// A live stdio channel to one downstream MCP child process.
///
/// Concurrency contract: any number of concurrent `call`s; responses are
/// demultiplexed by id by a single reader task. Writes are serialized by the
/// stdin mutex so frames never interleave.
#[derive(Debug)]
pub struct ChildTransport {
    mcp_name: String,
    next_id: AtomicI64,
    pending: PendingMap,
    stdin: Arc<Mutex<Option<ChildStdin>>>,
    child: Mutex<Option<Child>>,
    status: Arc<Status>,
    pid: Option<u32>,
    started_at: DateTime<Utc>,
    handshake: HandshakeInfo,
}

impl ChildTransport {
    /// Spawn the descriptor's command and complete the MCP handshake.
    ///
    /// Fails with StartupFailed when the child cannot be spawned or answers
    /// with an error, StartupTimeout when no initialize response arrives in
    /// time, and Protocol when the first response is malformed.
    pub async fn start(
        descriptor: &McpDescriptor,
        client_info: Value,
        startup_timeout: Duration,
    ) -> Result<Self> {
        if descriptor.transport != TransportKind::Stdio {
            return Err(NcpError::StartupFailed {
                mcp: descriptor.name.clone(),
                reason: format!("unsupported transport '{}'", descriptor.transport),
            });
        }
        if descriptor.command.is_empty() {
            return Err(NcpError::StartupFailed {
                mcp: descriptor.name.clone(),
                reason: "descriptor has no command".to_string(),
            });
        }

        let mut cmd = Command::new(&descriptor.command);
        cmd.args(&descriptor.args)
            .envs(&descriptor.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &descriptor.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| NcpError::StartupFailed {
            mcp: descriptor.name.clone(),
            reason: format!("spawn failed: {e}"),
        })?;

        let stdin = child.stdin.take().ok_or_else(|| NcpError::StartupFailed {
            mcp: descriptor.name.clone(),
            reason: "failed to capture child stdin".to_string(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| NcpError::StartupFailed {
            mcp: descriptor.name.clone(),
            reason: "failed to capture child stdout".to_string(),
        })?;
        let stderr = child.stderr.take();

        let pid = child.id();
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let status = Arc::new(Status::new());

        // Stderr is attributed to the MCP in logs and never touches the
        // protocol stream.
        if let Some(stderr) = stderr {
            let name = descriptor.name.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(mcp = %name, "stderr: {line}");
                }
            });
        }

        // Single reader task per session: demultiplex responses by id.
        {
            let name = descriptor.name.clone();
            let pending = pending.clone();
            let status = status.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                loop {
                    match lines.next_line().await {
                        Ok(Some(line)) => {
                            if line.trim().is_empty() {
                                continue;
                            }
                            Self::dispatch_line(&name, &line, &pending).await;
                        }
                        Ok(None) => {
                            Self::on_reader_exit(&name, "EOF on stdout", &pending, &status).await;
                            break;
                        }
                        Err(e) => {
                            let reason = format!("read error: {e}");
                            Self::on_reader_exit(&name, &reason, &pending, &status).await;
                            break;
                        }
                    }
                }
            });
        }

        let transport = Self {
            mcp_name: descriptor.name.clone(),
            next_id: AtomicI64::new(1),
            pending,
            stdin: Arc::new(Mutex::new(Some(stdin))),
            child: Mutex::new(Some(child)),
            status,
            pid,
            started_at: Utc::now(),
            handshake: HandshakeInfo::default(),
        };

        transport.status.set(SessionState::Initializing);

        let init_params = json!({
            "protocolVersion": rpc::PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": client_info,
        });
        let mut transport = transport;
        let init_result = transport
            .call("initialize", Some(init_params), startup_timeout)
            .await
            .map_err(|e| match e {
                NcpError::CallTimeout { .. } => NcpError::StartupTimeout {
                    mcp: transport.mcp_name.clone(),
                    timeout_secs: startup_timeout.as_secs(),
                },
                NcpError::SessionLost { mcp, reason } => NcpError::StartupFailed {
                    mcp,
                    reason: format!("exited before ready: {reason}"),
                },
                NcpError::Downstream { code, message } => NcpError::StartupFailed {
                    mcp: transport.mcp_name.clone(),
                    reason: format!("initialize rejected ({code}): {message}"),
                },
                other => other,
            })?;

        let obj = init_result
            .as_object()
            .ok_or_else(|| NcpError::Protocol {
                mcp: transport.mcp_name.clone(),
                reason: "initialize result is not an object".to_string(),
            })?;
        transport.handshake = HandshakeInfo {
            protocol_version: obj
                .get("protocolVersion")
                .and_then(|v| v.as_str())
                .unwrap_or(rpc::PROTOCOL_VERSION)
                .to_string(),
            capabilities: obj.get("capabilities").cloned().unwrap_or(json!({})),
            server_info: obj.get("serverInfo").cloned().unwrap_or(json!({})),
        };

        transport.notify("notifications/initialized", None).await?;
        transport.status.set(SessionState::Ready);
        debug!(mcp = %transport.mcp_name, pid = ?pid, "Downstream session ready");
        Ok(transport)
    }

    async fn dispatch_line(name: &str, line: &str, pending: &PendingMap) {
        match rpc::parse_frame(line) {
            Ok(Frame::Response(resp)) => {
                let Some(id) = resp.id.as_ref().and_then(|v| v.as_i64()) else {
                    warn!(mcp = %name, "Response without usable id, dropping");
                    return;
                };
                let waiter = pending.lock().await.remove(&id);
                let Some(tx) = waiter else {
                    // Caller already timed out; slot was retired.
                    debug!(mcp = %name, id, "Late response dropped");
                    return;
                };
                let outcome = match (resp.result, resp.error) {
                    (Some(result), None) => CallOutcome::Result(result),
                    (None, Some(err)) => CallOutcome::RpcError {
                        code: err.code,
                        message: err.message,
                    },
                    _ => CallOutcome::RpcError {
                        code: rpc::INTERNAL_ERROR,
                        message: "response carried neither result nor error".to_string(),
                    },
                };
                let _ = tx.send(outcome);
            }
            Ok(Frame::Request(req)) if req.is_notification() => {
                debug!(mcp = %name, method = %req.method, "Downstream notification");
            }
            Ok(Frame::Request(req)) => {
                debug!(mcp = %name, method = %req.method, "Unexpected downstream request, ignoring");
            }
            Err(e) => {
                warn!(mcp = %name, error = %e, "Unparseable frame from downstream");
            }
        }
    }

    /// Reader terminated: mark the session failed and fail every pending call.
    async fn on_reader_exit(name: &str, reason: &str, pending: &PendingMap, status: &Arc<Status>) {
        status.fail(reason);
        let waiters: Vec<_> = pending.lock().await.drain().collect();
        if !waiters.is_empty() {
            debug!(mcp = %name, count = waiters.len(), "Failing pending calls: {reason}");
        }
        for (_, tx) in waiters {
            let _ = tx.send(CallOutcome::Lost(reason.to_string()));
        }
    }

    /// Issue a request and wait for its response, up to `timeout`.
    pub async fn call(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value> {
        let state = self.status.get();
        if matches!(state, SessionState::Failed | SessionState::Stopped) {
            return Err(NcpError::SessionLost {
                mcp: self.mcp_name.clone(),
                reason: self.last_error().unwrap_or_else(|| format!("session {state}")),
            });
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let request = JsonRpcRequest::new(id, method, params);
        if let Err(e) = self.write_frame(&request).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(CallOutcome::Result(value))) => Ok(value),
            Ok(Ok(CallOutcome::RpcError { code, message })) => {
                Err(NcpError::Downstream { code, message })
            }
            Ok(Ok(CallOutcome::Lost(reason))) => Err(NcpError::SessionLost {
                mcp: self.mcp_name.clone(),
                reason,
            }),
            Ok(Err(_)) => Err(NcpError::SessionLost {
                mcp: self.mcp_name.clone(),
                reason: "completion slot dropped".to_string(),
            }),
            Err(_) => {
                // Retire the slot; a late response will be dropped by the reader.
                self.pending.lock().await.remove(&id);
                warn!(mcp = %self.mcp_name, method, id, "Call timed out");
                Err(NcpError::CallTimeout {
                    mcp: self.mcp_name.clone(),
                    timeout_secs: timeout.as_secs(),
                })
            }
        }
    }

    /// One-way frame, no response expected.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        let request = JsonRpcRequest::notification(method, params);
        self.write_frame(&request).await
    }

    async fn write_frame(&self, request: &JsonRpcRequest) -> Result<()> {
        let mut line = serde_json::to_string(request)?;
        line.push('\n');
        let mut guard = self.stdin.lock().await;
        let Some(stdin) = guard.as_mut() else {
            return Err(NcpError::SessionLost {
                mcp: self.mcp_name.clone(),
                reason: "stdin closed".to_string(),
            });
        };
        if let Err(e) = stdin.write_all(line.as_bytes()).await {
            let reason = format!("write failed: {e}");
            self.status.fail(&reason);
            return Err(NcpError::SessionLost {
                mcp: self.mcp_name.clone(),
                reason,
            });
        }
        Ok(())
    }

    /// Close stdin, give the child a grace period, then kill it.
    pub async fn close(&self) {
        self.status.set(SessionState::Stopped);
        // Dropping stdin signals EOF; well-behaved servers exit on their own.
        self.stdin.lock().await.take();

        let child = self.child.lock().await.take();
        if let Some(mut child) = child {
            match tokio::time::timeout(CLOSE_GRACE, child.wait()).await {
                Ok(Ok(exit)) => {
                    debug!(mcp = %self.mcp_name, status = ?exit.code(), "Downstream exited");
                }
                Ok(Err(e)) => warn!(mcp = %self.mcp_name, error = %e, "Wait failed"),
                Err(_) => {
                    warn!(mcp = %self.mcp_name, "Grace period elapsed, killing child");
                    let _ = child.kill().await;
                }
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.mcp_name
    }

    pub fn state(&self) -> SessionState {
        self.status.get()
    }

    pub fn is_ready(&self) -> bool {
        self.status.get() == SessionState::Ready
    }

    pub fn last_error(&self) -> Option<String> {
        self.status
            .last_error
            .read()
            .expect("error lock poisoned")
            .clone()
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn handshake(&self) -> &HandshakeInfo {
        &self.handshake
    }
}
