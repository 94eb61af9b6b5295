// crates/ncp-server/src/registry.rs
// Connection manager (C3): pool of downstream sessions keyed by MCP name

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value, json};
use tokio::sync::{Mutex, Notify, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ProfileStore;
use crate::error::{NcpError, Result};
use crate::transport::{ChildTransport, DEFAULT_STARTUP_TIMEOUT, SessionState};

/// Default deadline for a forwarded downstream call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(60);

/// Discovery methods that are safe to retry once on a fresh session after
/// SessionLost. `tools/call` is never in this list: it may have side effects.
const IDEMPOTENT_METHODS: &[&str] = &["tools/list", "resources/list", "prompts/list"];

/// One healthy (or once-healthy) downstream session. Owned by the registry
/// and never shared outside it; other components go through `forward_call`.
#[derive(Debug)]
pub struct McpSession {
    transport: ChildTransport,
    tools: RwLock<Option<Vec<Value>>>,
}

impl McpSession {
    fn new(transport: ChildTransport) -> Self {
        Self {
            transport,
            tools: RwLock::new(None),
        }
    }

    /// Cached `tools/list`, fetched once per session.
    pub async fn tools(&self, timeout: Duration) -> Result<Vec<Value>> {
        if let Some(tools) = self.tools.read().await.clone() {
            return Ok(tools);
        }
        let result = self.transport.call("tools/list", None, timeout).await?;
        let tools = result
            .get("tools")
            .and_then(|t| t.as_array())
            .cloned()
            .unwrap_or_default();
        *self.tools.write().await = Some(tools.clone());
        Ok(tools)
    }

    pub fn state(&self) -> SessionState {
        self.transport.state()
    }
}

/// Health of one configured downstream, for `ncp://status/health`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct McpHealth {
    pub name: String,
    pub enabled: bool,
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
}

/// Pool of downstream sessions. Starts are coalesced per name so concurrent
/// callers share one spawn; failed sessions are replaced, never reused.
pub struct Registry {
    profile: Arc<ProfileStore>,
    sessions: RwLock<HashMap<String, Arc<McpSession>>>,
    connecting: Mutex<HashMap<String, Arc<Notify>>>,
    client_info: std::sync::RwLock<Value>,
    client_name: std::sync::RwLock<String>,
    tracking_id: Uuid,
    call_timeout: Duration,
    startup_timeout: Duration,
}

impl Registry {
    pub fn new(profile: Arc<ProfileStore>) -> Self {
        Self {
            profile,
            sessions: RwLock::new(HashMap::new()),
            connecting: Mutex::new(HashMap::new()),
            client_info: std::sync::RwLock::new(json!({
                "name": "ncp",
                "version": env!("CARGO_PKG_VERSION"),
            })),
            client_name: std::sync::RwLock::new("unknown".to_string()),
            tracking_id: Uuid::new_v4(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
        }
    }

    pub fn with_timeouts(mut self, call: Duration, startup: Duration) -> Self {
        self.call_timeout = call;
        self.startup_timeout = startup;
        self
    }

    /// Tracking id assigned to this upstream connection, used for log
    /// correlation and the `_meta.ncp_tracking_id` field.
    pub fn tracking_id(&self) -> Uuid {
        self.tracking_id
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// Record the upstream client identity. Sessions already running keep the
    /// handshake they were started with; only future initializes change.
    pub fn set_client_info(&self, info: Value) {
        if let Some(name) = info.get("name").and_then(|n| n.as_str()) {
            *self.client_name.write().expect("client name lock poisoned") = name.to_string();
        }
        *self.client_info.write().expect("client info lock poisoned") = info;
    }

    pub fn client_name(&self) -> String {
        self.client_name
            .read()
            .expect("client name lock poisoned")
            .clone()
    }

    /// Configured MCP names, whether or not a session exists.
    pub fn list(&self) -> Vec<String> {
        self.profile.mcp_names()
    }

    pub fn profile(&self) -> &Arc<ProfileStore> {
        &self.profile
    }

    /// Existing Ready session, or a freshly started one. Concurrent starts
    /// for the same name coalesce behind a per-name guard.
    pub async fn get_session(&self, name: &str) -> Result<Arc<McpSession>> {
        // Fast path
        if let Some(session) = self.sessions.read().await.get(name)
            && session.transport.is_ready()
        {
            return Ok(session.clone());
        }

        let notify = {
            let mut connecting = self.connecting.lock().await;
            match connecting.get(name) {
                Some(notify) => Some(notify.clone()),
                None => {
                    connecting.insert(name.to_string(), Arc::new(Notify::new()));
                    None
                }
            }
        };

        // Another task is starting this MCP; wait for it and re-check. The
        // wakeup can be missed if the starter finishes first, so a timed-out
        // wait is not itself an error — the pool is consulted either way.
        if let Some(notify) = notify {
            let _ = tokio::time::timeout(
                self.startup_timeout + Duration::from_secs(5),
                notify.notified(),
            )
            .await;
            if let Some(session) = self.sessions.read().await.get(name)
                && session.transport.is_ready()
            {
                return Ok(session.clone());
            }
            return Err(NcpError::StartupFailed {
                mcp: name.to_string(),
                reason: "concurrent start failed".to_string(),
            });
        }

        // We own the guard; double-check before spawning.
        let result = {
            if let Some(session) = self.sessions.read().await.get(name).cloned()
                && session.transport.is_ready()
            {
                Ok(session)
            } else {
                self.start_session(name).await
            }
        };

        let mut connecting = self.connecting.lock().await;
        if let Some(notify) = connecting.remove(name) {
            notify.notify_waiters();
        }
        result
    }

    async fn start_session(&self, name: &str) -> Result<Arc<McpSession>> {
        let descriptor = self.profile.get(name).ok_or_else(|| NcpError::ToolNotFound {
            tool: name.to_string(),
            suggestions: crate::util::suggestions(
                name,
                self.profile.mcp_names().iter().map(|s| s.as_str()),
            ),
        })?;
        if !descriptor.enabled {
            return Err(NcpError::StartupFailed {
                mcp: name.to_string(),
                reason: "descriptor is disabled".to_string(),
            });
        }

        // A Failed session is never reused; drop it and build a new object.
        if let Some(old) = self.sessions.write().await.remove(name) {
            debug!(mcp = %name, state = %old.state(), "Replacing stale session");
            old.transport.close().await;
        }

        let client_info = self
            .client_info
            .read()
            .expect("client info lock poisoned")
            .clone();
        info!(mcp = %name, command = %descriptor.command, "Starting downstream MCP");
        let transport =
            ChildTransport::start(&descriptor, client_info, self.startup_timeout).await?;
        let session = Arc::new(McpSession::new(transport));
        self.sessions
            .write()
            .await
            .insert(name.to_string(), session.clone());
        Ok(session)
    }

    /// Attach `_meta` to forwarded params: the upstream caller's fields pass
    /// through verbatim, plus NCP tracking fields in the reserved namespace.
    /// A client-supplied `session_id` is never overwritten.
    fn enrich_params(&self, params: Option<Value>, meta: Option<Value>) -> Value {
        let mut params = match params {
            Some(Value::Object(map)) => map,
            Some(other) => {
                // Non-object params are passed through untouched; there is
                // nowhere to hang _meta.
                return other;
            }
            None => Map::new(),
        };

        let mut meta = match meta {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        };
        meta.insert("ncp_tracking_id".to_string(), json!(self.tracking_id.to_string()));
        meta.insert("ncp_client".to_string(), json!(self.client_name()));
        params.insert("_meta".to_string(), Value::Object(meta));
        Value::Object(params)
    }

    /// Forward a call to a named downstream, with `_meta` passthrough and the
    /// idempotent-discovery retry policy.
    pub async fn forward_call(
        &self,
        name: &str,
        method: &str,
        params: Option<Value>,
        meta: Option<Value>,
    ) -> Result<Value> {
        let params = Some(self.enrich_params(params, meta));
        let session = self.get_session(name).await?;

        match session
            .transport
            .call(method, params.clone(), self.call_timeout)
            .await
        {
            Err(NcpError::SessionLost { reason, .. })
                if IDEMPOTENT_METHODS.contains(&method)
                    && self.profile.get(name).map(|d| d.enabled).unwrap_or(false) =>
            {
                warn!(
                    mcp = %name, method, tracking_id = %self.tracking_id,
                    "Session lost ({reason}), retrying once on a fresh session"
                );
                let session = self.get_session(name).await?;
                session.transport.call(method, params, self.call_timeout).await
            }
            other => other,
        }
    }

    /// Cached tool list of one downstream.
    pub async fn tools_of(&self, name: &str) -> Result<Vec<Value>> {
        let session = self.get_session(name).await?;
        session.tools(self.call_timeout).await
    }

    /// Health of every configured descriptor, connected or not.
    pub async fn health_snapshot(&self) -> Vec<McpHealth> {
        let sessions = self.sessions.read().await;
        self.profile
            .descriptors()
            .into_iter()
            .map(|desc| match sessions.get(&desc.name) {
                Some(session) => McpHealth {
                    name: desc.name.clone(),
                    enabled: desc.enabled,
                    state: session.transport.state().to_string(),
                    pid: session.transport.pid(),
                    last_error: session.transport.last_error(),
                    started_at: Some(session.transport.started_at().to_rfc3339()),
                },
                None => McpHealth {
                    name: desc.name.clone(),
                    enabled: desc.enabled,
                    state: "not-started".to_string(),
                    pid: None,
                    last_error: None,
                    started_at: None,
                },
            })
            .collect()
    }

    /// Close every session, each within the transport's grace period.
    pub async fn close_all(&self) {
        let sessions: Vec<Arc<McpSession>> = {
            let mut map = self.sessions.write().await;
            map.drain().map(|(_, s)| s).collect()
        };
        let closers = sessions.iter().map(|s| s.transport.close());
        futures::future::join_all(closers).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{McpDescriptor, TransportKind};
    use std::collections::BTreeMap;

    fn registry_with(descriptors: Vec<McpDescriptor>) -> (tempfile::TempDir, Arc<Registry>) {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::load(dir.path().join("all.json"), "all").unwrap();
        for d in descriptors {
            store.upsert(d, true).unwrap();
        }
        let registry = Arc::new(
            Registry::new(Arc::new(store))
                .with_timeouts(Duration::from_secs(5), Duration::from_secs(5)),
        );
        (dir, registry)
    }

    fn script_descriptor(name: &str, script: String) -> McpDescriptor {
        McpDescriptor {
            name: name.to_string(),
            transport: TransportKind::Stdio,
            command: "/bin/sh".to_string(),
            args: vec!["-c".to_string(), script],
            env: BTreeMap::new(),
            working_dir: None,
            enabled: true,
        }
    }

    /// Server that completes the handshake and answers one tools/list.
    fn serving_script(spawn_log: &std::path::Path) -> String {
        format!(
            r#"
echo spawned >> {log}
read line
printf '%s\n' '{{"jsonrpc":"2.0","id":1,"result":{{"protocolVersion":"2024-11-05","capabilities":{{}},"serverInfo":{{"name":"fake","version":"0"}}}}}}'
read notif
read req
printf '%s\n' '{{"jsonrpc":"2.0","id":2,"result":{{"tools":[{{"name":"greet","description":"hi","inputSchema":{{}}}}]}}}}'
read req2
printf '%s\n' '{{"jsonrpc":"2.0","id":3,"result":{{"tools":[{{"name":"greet","description":"hi","inputSchema":{{}}}}]}}}}'
read wait
"#,
            log = spawn_log.display()
        )
    }

    #[test]
    fn meta_enrichment_preserves_upstream_fields() {
        let (_dir, registry) = registry_with(vec![]);
        let params = json!({"name": "read_file", "arguments": {"path": "/tmp/x"}});
        let meta = json!({"session_id": "S", "custom": 42});
        let enriched = registry.enrich_params(Some(params), Some(meta));

        assert_eq!(enriched["name"], "read_file");
        assert_eq!(enriched["arguments"]["path"], "/tmp/x");
        assert_eq!(enriched["_meta"]["session_id"], "S");
        assert_eq!(enriched["_meta"]["custom"], 42);
        assert_eq!(
            enriched["_meta"]["ncp_tracking_id"],
            registry.tracking_id().to_string()
        );
        assert!(enriched["_meta"]["ncp_client"].is_string());
    }

    #[test]
    fn meta_added_even_without_params() {
        let (_dir, registry) = registry_with(vec![]);
        let enriched = registry.enrich_params(None, None);
        assert!(enriched["_meta"]["ncp_tracking_id"].is_string());
    }

    #[tokio::test]
    async fn concurrent_get_session_coalesces_to_one_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("spawns");
        let (_pdir, registry) =
            registry_with(vec![script_descriptor("fake", serving_script(&log))]);

        let (a, b) = tokio::join!(registry.get_session("fake"), registry.get_session("fake"));
        let (a, b) = (a.unwrap(), b.unwrap());
        assert!(Arc::ptr_eq(&a, &b));

        let spawns = std::fs::read_to_string(&log).unwrap_or_default();
        assert_eq!(spawns.lines().count(), 1, "expected a single spawn");
        registry.close_all().await;
    }

    #[tokio::test]
    async fn tools_call_is_never_auto_retried() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("spawns");
        // Handshake, then exit: the forwarded call observes SessionLost.
        let script = format!(
            r#"
echo spawned >> {log}
read line
printf '%s\n' '{{"jsonrpc":"2.0","id":1,"result":{{"protocolVersion":"2024-11-05","capabilities":{{}},"serverInfo":{{"name":"fake","version":"0"}}}}}}'
read notif
"#,
            log = log.display()
        );
        let (_pdir, registry) = registry_with(vec![script_descriptor("fake", script)]);

        let err = registry
            .forward_call("fake", "tools/call", Some(json!({"name": "greet"})), None)
            .await
            .unwrap_err();
        assert!(matches!(err, NcpError::SessionLost { .. }), "got {err:?}");

        let spawns = std::fs::read_to_string(&log).unwrap_or_default();
        assert_eq!(spawns.lines().count(), 1, "tools/call must not respawn");
    }

    #[tokio::test]
    async fn discovery_is_retried_once_after_session_lost() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("spawns");
        let marker = dir.path().join("first-run");
        // First spawn handshakes, then exits as soon as it receives the next
        // request without answering it — the in-flight call observes
        // SessionLost while the session still looked Ready at dispatch time.
        // Later spawns serve tools/list normally.
        let script = format!(
            r#"
echo spawned >> {log}
if [ ! -f {marker} ]; then
  touch {marker}
  read line
  printf '%s\n' '{{"jsonrpc":"2.0","id":1,"result":{{"protocolVersion":"2024-11-05","capabilities":{{}},"serverInfo":{{"name":"fake","version":"0"}}}}}}'
  read notif
  read req
  exit 0
fi
read line
printf '%s\n' '{{"jsonrpc":"2.0","id":1,"result":{{"protocolVersion":"2024-11-05","capabilities":{{}},"serverInfo":{{"name":"fake","version":"0"}}}}}}'
read notif
read req
printf '%s\n' '{{"jsonrpc":"2.0","id":2,"result":{{"tools":[{{"name":"greet","description":"hi","inputSchema":{{}}}}]}}}}'
read wait
"#,
            log = log.display(),
            marker = marker.display()
        );
        let (_pdir, registry) = registry_with(vec![script_descriptor("fake", script)]);

        let result = registry
            .forward_call("fake", "tools/list", None, None)
            .await
            .unwrap();
        assert_eq!(result["tools"][0]["name"], "greet");

        let spawns = std::fs::read_to_string(&log).unwrap_or_default();
        assert_eq!(spawns.lines().count(), 2, "expected exactly one retry spawn");
        registry.close_all().await;
    }

    #[tokio::test]
    async fn health_snapshot_covers_unstarted_descriptors() {
        let (_dir, registry) = registry_with(vec![script_descriptor(
            "never-started",
            "read line".to_string(),
        )]);
        let health = registry.health_snapshot().await;
        assert_eq!(health.len(), 1);
        assert_eq!(health[0].state, "not-started");
        assert!(health[0].pid.is_none());
    }

    #[tokio::test]
    async fn unknown_mcp_yields_tool_not_found_with_suggestions() {
        let (_dir, registry) = registry_with(vec![script_descriptor(
            "files",
            "read line".to_string(),
        )]);
        let err = registry.get_session("file").await.unwrap_err();
        match err {
            NcpError::ToolNotFound { suggestions, .. } => {
                assert_eq!(suggestions, vec!["files".to_string()]);
            }
            other => panic!("expected ToolNotFound, got {other:?}"),
        }
    }
}
