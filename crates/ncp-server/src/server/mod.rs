// crates/ncp-server/src/server/mod.rs
// Upstream MCP server (C9): stdio JSON-RPC endpoint exposing exactly `find` and `run`

mod render;
mod resources;
mod router;

pub use render::INDEXING_PREFIX;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::autoimport::{self, AutoImportSummary};
use crate::config::{BaseDirs, ProfileStore, SettingsStore};
use crate::embeddings::{EmbeddingProvider, provider_from_env};
use crate::error::{NcpError, Result};
use crate::finder::{
    DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_DEPTH, FindRequest, Finder,
};
use crate::gate::ConfirmationGate;
use crate::index::VectorIndex;
use crate::indexer::{IndexProgress, Indexer};
use crate::notify::Notifier;
use crate::registry::Registry;
use crate::rpc::{self, Frame, JsonRpcRequest, JsonRpcResponse};
use crate::scheduler::{JobStore, Scheduler};

/// Pending request handlers get this long to finish after upstream EOF.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Resource URIs the upstream client subscribed to. Shared between the
/// request handlers (which mutate it) and the outgoing notifier (which
/// filters `notifications/resources/updated` against it).
pub type SubscriptionSet = Arc<std::sync::Mutex<HashSet<String>>>;

/// Everything a request handler can reach. One of each component, owned
/// here; background workers hold capabilities (Arcs), never the state.
pub struct ServerState {
    pub profile: Arc<ProfileStore>,
    pub settings: Arc<SettingsStore>,
    pub registry: Arc<Registry>,
    pub index: Arc<VectorIndex>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub progress: Arc<IndexProgress>,
    pub finder: Finder,
    pub gate: ConfirmationGate,
    pub jobs: Arc<JobStore>,
    pub notifier: Arc<dyn Notifier>,
    pub aggregate: resources::AggregateCache,
    pub auto_import: std::sync::RwLock<Option<AutoImportSummary>>,
    pub subscriptions: SubscriptionSet,
}

impl ServerState {
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        profile: Arc<ProfileStore>,
        settings: Arc<SettingsStore>,
        registry: Arc<Registry>,
        index: Arc<VectorIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
        progress: Arc<IndexProgress>,
        jobs: Arc<JobStore>,
        notifier: Arc<dyn Notifier>,
        subscriptions: SubscriptionSet,
    ) -> Arc<Self> {
        let finder = Finder::new(
            index.clone(),
            embedder.clone(),
            progress.clone(),
            profile.clone(),
        );
        let gate = ConfirmationGate::new(settings.clone(), embedder.clone());
        Arc::new(Self {
            profile,
            settings,
            registry,
            index,
            embedder,
            progress,
            finder,
            gate,
            jobs,
            notifier,
            aggregate: resources::AggregateCache::new(),
            auto_import: std::sync::RwLock::new(None),
            subscriptions,
        })
    }
}

/// Notifier backed by the single outgoing frame channel. The writer task is
/// the only thing touching stdout, so frames never interleave.
///
/// `notifications/resources/updated` is delivered only for URIs the client
/// subscribed to; list-level notifications are governed by the `listChanged`
/// capability and always pass through.
struct ChannelNotifier {
    tx: mpsc::UnboundedSender<String>,
    subscriptions: SubscriptionSet,
}

impl Notifier for ChannelNotifier {
    fn notify(&self, method: &str, params: Option<Value>) {
        if method == "notifications/resources/updated"
            && let Some(uri) = params.as_ref().and_then(|p| p.get("uri")).and_then(|u| u.as_str())
            && !self
                .subscriptions
                .lock()
                .expect("subscriptions lock poisoned")
                .contains(uri)
        {
            debug!(uri = %uri, "Dropping resource update for unsubscribed uri");
            return;
        }
        let frame = JsonRpcRequest::notification(method, params);
        if let Ok(line) = serde_json::to_string(&frame) {
            let _ = self.tx.send(line);
        }
    }
}

/// Composition root: build every component, spawn the background workers and
/// run the stdio loop until upstream EOF.
pub async fn serve(dirs: BaseDirs, profile_name: &str) -> anyhow::Result<()> {
    dirs.ensure()?;

    let profile = Arc::new(ProfileStore::load(
        dirs.profile_file(profile_name),
        profile_name,
    )?);
    let settings = Arc::new(SettingsStore::load(dirs.settings())?);
    let embedder = provider_from_env();
    let index = Arc::new(VectorIndex::open(
        dirs.index_snapshot(),
        dirs.index_journal(),
        embedder.model_id().to_string(),
    )?);
    let registry = Arc::new(Registry::new(profile.clone()));
    let progress = Arc::new(IndexProgress::new());
    let jobs = Arc::new(JobStore::load(dirs.scheduled_jobs())?);

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    let subscriptions: SubscriptionSet = Arc::new(std::sync::Mutex::new(HashSet::new()));
    let notifier: Arc<dyn Notifier> = Arc::new(ChannelNotifier {
        tx: out_tx.clone(),
        subscriptions: subscriptions.clone(),
    });

    let state = ServerState::build(
        profile,
        settings,
        registry.clone(),
        index.clone(),
        embedder.clone(),
        progress.clone(),
        jobs.clone(),
        notifier.clone(),
        subscriptions,
    );

    // Single writer owns stdout.
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(line) = out_rx.recv().await {
            if stdout.write_all(line.as_bytes()).await.is_err() {
                break;
            }
            if stdout.write_all(b"\n").await.is_err() {
                break;
            }
            let _ = stdout.flush().await;
        }
    });

    // Background indexing: find/run are accepted before it completes.
    {
        let indexer = Indexer::new(registry.clone(), index, embedder, progress, notifier.clone());
        tokio::spawn(async move { indexer.run().await });
    }

    // Scheduler dispatcher.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(Scheduler::new(jobs, notifier).run(shutdown_rx));

    info!(tracking_id = %registry.tracking_id(), "NCP server on stdio");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut handlers: JoinSet<()> = JoinSet::new();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        match rpc::parse_frame(&line) {
            Err(e) => {
                let response =
                    JsonRpcResponse::error(None, rpc::PARSE_ERROR, format!("parse error: {e}"));
                send_response(&out_tx, &response);
            }
            Ok(Frame::Response(_)) => {
                debug!("Ignoring unexpected response frame from upstream");
            }
            Ok(Frame::Request(request)) if request.is_notification() => {
                handle_notification(&request);
            }
            Ok(Frame::Request(request)) => {
                let state = state.clone();
                let tx = out_tx.clone();
                // Handlers run concurrently; each writes its one response
                // through the single writer channel.
                handlers.spawn(async move {
                    let response = handle_request(&state, request).await;
                    send_response(&tx, &response);
                });
            }
        }
    }

    // Upstream EOF: graceful shutdown. Pending responses are written within
    // a bounded grace; then sessions close and the process exits.
    info!("Upstream EOF, shutting down");
    let _ = shutdown_tx.send(true);
    let drain = async {
        while handlers.join_next().await.is_some() {}
    };
    if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
        warn!("Shutdown grace elapsed with handlers still pending");
        handlers.abort_all();
    }
    registry.close_all().await;
    drop(out_tx);
    let _ = tokio::time::timeout(Duration::from_secs(2), writer).await;
    Ok(())
}

fn send_response(tx: &mpsc::UnboundedSender<String>, response: &JsonRpcResponse) {
    match serde_json::to_string(response) {
        Ok(line) => {
            let _ = tx.send(line);
        }
        Err(e) => warn!(error = %e, "Failed to serialize response"),
    }
}

fn handle_notification(request: &JsonRpcRequest) {
    match request.method.as_str() {
        // Forwarded silently.
        "notifications/initialized" => debug!("Upstream initialized"),
        "notifications/cancelled" => {
            debug!(params = ?request.params, "Upstream cancelled a request")
        }
        other => debug!(method = %other, "Ignoring upstream notification"),
    }
}

/// Dispatch one upstream request. Exactly one response per id.
pub async fn handle_request(state: &Arc<ServerState>, request: JsonRpcRequest) -> JsonRpcResponse {
    let id = request.id.clone();
    let params = request.params.clone().unwrap_or(Value::Null);

    let result: Result<Value> = match request.method.as_str() {
        "initialize" => handle_initialize(state, &params),
        "ping" => Ok(json!({})),
        "tools/list" => Ok(tools_list()),
        "tools/call" => handle_tools_call(state, &params).await,
        "prompts/list" => resources::prompts_list(state).await,
        "prompts/get" => resources::prompts_get(state, &params).await,
        "resources/list" => resources::resources_list(state).await,
        "resources/read" => resources::resources_read(state, &params).await,
        "resources/subscribe" => handle_subscribe(state, &params, true),
        "resources/unsubscribe" => handle_subscribe(state, &params, false),
        other => {
            let known = [
                "initialize",
                "ping",
                "tools/list",
                "tools/call",
                "prompts/list",
                "prompts/get",
                "resources/list",
                "resources/read",
                "resources/subscribe",
                "resources/unsubscribe",
            ];
            Err(NcpError::ToolNotFound {
                tool: other.to_string(),
                suggestions: crate::util::suggestions(other, known.iter().copied()),
            })
        }
    };

    match result {
        Ok(value) => JsonRpcResponse::success(id, value),
        Err(err) => {
            // The raw error stays in logs keyed by tracking id; upstream gets
            // the summarized boundary message.
            warn!(
                tracking_id = %state.registry.tracking_id(),
                method = %request.method,
                error = %err,
                "Request failed"
            );
            JsonRpcResponse::error_with_data(
                id,
                err.rpc_code(),
                err.boundary_message(),
                err.rpc_data(),
            )
        }
    }
}

fn handle_initialize(state: &Arc<ServerState>, params: &Value) -> Result<Value> {
    if let Some(client_info) = params.get("clientInfo") {
        state.registry.set_client_info(client_info.clone());
    }

    // Auto-import runs asynchronously; the handshake never waits for it.
    {
        let state = state.clone();
        tokio::spawn(async move {
            let client_name = state.registry.client_name();
            let summary = autoimport::run(&client_name, &state.profile);
            info!(
                imported = summary.count,
                skipped = summary.skipped,
                client = %summary.source_client,
                "Auto-import finished"
            );
            let changed = summary.count > 0;
            *state.auto_import.write().expect("auto-import lock poisoned") = Some(summary);
            if changed {
                state.aggregate.invalidate().await;
                state
                    .notifier
                    .notify("notifications/resources/list_changed", None);
            }
        });
    }

    let mut result = json!({
        "protocolVersion": rpc::PROTOCOL_VERSION,
        "capabilities": {
            "tools": { "listChanged": true },
            "prompts": {},
            "resources": { "subscribe": true, "listChanged": true },
        },
        "serverInfo": {
            "name": "ncp",
            "version": env!("CARGO_PKG_VERSION"),
        },
    });

    // The client's session_id is echoed back through _meta untouched.
    if let Some(session_id) = params.get("_meta").and_then(|m| m.get("session_id")) {
        result["_meta"] = json!({ "session_id": session_id });
    }
    Ok(result)
}

/// The entire upstream tool surface: exactly `find` and `run`.
fn tools_list() -> Value {
    json!({
        "tools": [
            {
                "name": "find",
                "description": "Discover federated tools. Describe what you want to do, or pass no description to list everything.",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "description": {
                            "type": "string",
                            "description": "What you want to do, e.g. 'write a file'. Omit to list all tools."
                        },
                        "limit": { "type": "integer", "minimum": 1 },
                        "page": { "type": "integer", "minimum": 1 },
                        "confidence_threshold": {
                            "type": "number", "minimum": 0.0, "maximum": 1.0,
                            "description": "Minimum cosine similarity, default 0.35"
                        },
                        "depth": {
                            "type": "integer", "enum": [0, 1, 2],
                            "description": "0 = names, 1 = +descriptions, 2 = +schemas (default)"
                        }
                    }
                }
            },
            {
                "name": "run",
                "description": "Run a federated tool by qualified name ('mcp:tool').",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "tool": { "type": "string", "description": "Qualified name, e.g. 'fs:read_file'" },
                        "parameters": { "type": "object", "description": "Arguments forwarded verbatim" },
                        "dry_run": { "type": "boolean", "description": "Preview without executing" },
                        "_userResponse": {
                            "type": "string", "enum": ["yes", "always", "no"],
                            "description": "Answer to a confirmation request"
                        }
                    },
                    "required": ["tool"]
                }
            }
        ]
    })
}

async fn handle_tools_call(state: &Arc<ServerState>, params: &Value) -> Result<Value> {
    let name = params
        .get("name")
        .and_then(|n| n.as_str())
        .ok_or_else(|| NcpError::InvalidArguments("missing tool name".to_string()))?;
    let arguments = params.get("arguments").cloned().unwrap_or(json!({}));
    let meta = params.get("_meta").cloned();

    match name {
        "find" => {
            let request = parse_find_request(&arguments)?;
            let response = state.finder.find(request).await?;
            Ok(json!({
                "content": [ rpc::TextContent::text(render::render_find(&response)) ],
            }))
        }
        "run" => router::run(state, &arguments, meta).await,
        other => Err(NcpError::ToolNotFound {
            tool: other.to_string(),
            suggestions: crate::util::suggestions(other, ["find", "run"].into_iter()),
        }),
    }
}

fn parse_find_request(arguments: &Value) -> Result<FindRequest> {
    let query = arguments
        .get("description")
        .and_then(|d| d.as_str())
        .map(str::to_string);

    let page = match arguments.get("page") {
        None | Some(Value::Null) => 1,
        Some(v) => {
            let page = v
                .as_u64()
                .ok_or_else(|| NcpError::InvalidArguments("page must be an integer".to_string()))?;
            if page < 1 {
                return Err(NcpError::InvalidArguments("page must be >= 1".to_string()));
            }
            page as usize
        }
    };

    let limit = arguments
        .get("limit")
        .and_then(|v| v.as_u64())
        .map(|l| l as usize);

    let confidence_threshold = match arguments.get("confidence_threshold") {
        None | Some(Value::Null) => DEFAULT_CONFIDENCE_THRESHOLD,
        Some(v) => {
            let t = v.as_f64().ok_or_else(|| {
                NcpError::InvalidArguments("confidence_threshold must be a number".to_string())
            })? as f32;
            if !(0.0..=1.0).contains(&t) {
                return Err(NcpError::InvalidArguments(
                    "confidence_threshold must be within [0, 1]".to_string(),
                ));
            }
            t
        }
    };

    let depth = match arguments.get("depth") {
        None | Some(Value::Null) => DEFAULT_DEPTH,
        Some(v) => match v.as_u64() {
            Some(d @ 0..=2) => d as u8,
            _ => {
                return Err(NcpError::InvalidArguments(
                    "depth must be 0, 1 or 2".to_string(),
                ));
            }
        },
    };

    Ok(FindRequest {
        query,
        page,
        limit,
        depth,
        confidence_threshold,
        mcp_filter: None,
    })
}

fn handle_subscribe(state: &Arc<ServerState>, params: &Value, subscribe: bool) -> Result<Value> {
    let uri = params
        .get("uri")
        .and_then(|u| u.as_str())
        .ok_or_else(|| NcpError::InvalidArguments("missing uri".to_string()))?;
    let mut subscriptions = state
        .subscriptions
        .lock()
        .expect("subscriptions lock poisoned");
    if subscribe {
        subscriptions.insert(uri.to_string());
    } else {
        subscriptions.remove(uri);
    }
    Ok(json!({}))
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::embeddings::HashingEmbeddings;
    use crate::notify::RecordingNotifier;

    /// A fully wired state over temp dirs, a hashing embedder and a
    /// recording notifier. Descriptors can be added through the profile.
    pub fn state_in(dir: &std::path::Path) -> (Arc<ServerState>, Arc<RecordingNotifier>) {
        let profile =
            Arc::new(ProfileStore::load(dir.join("profiles/all.json"), "all").unwrap());
        let settings = Arc::new(SettingsStore::load(dir.join("settings.json")).unwrap());
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(HashingEmbeddings::default());
        let index = Arc::new(VectorIndex::in_memory(embedder.model_id().to_string()));
        let registry = Arc::new(
            Registry::new(profile.clone())
                .with_timeouts(Duration::from_secs(5), Duration::from_secs(5)),
        );
        let progress = Arc::new(IndexProgress::new());
        let jobs = Arc::new(JobStore::load(dir.join("scheduled-jobs.json")).unwrap());
        let notifier = Arc::new(RecordingNotifier::new());

        let state = ServerState::build(
            profile,
            settings,
            registry,
            index,
            embedder,
            progress,
            jobs,
            notifier.clone(),
            Arc::new(std::sync::Mutex::new(HashSet::new())),
        );
        (state, notifier)
    }

    pub fn request(method: &str, params: Value) -> JsonRpcRequest {
        JsonRpcRequest::new(1, method, Some(params))
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[tokio::test]
    async fn tools_list_returns_exactly_find_and_run() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _) = state_in(dir.path());
        let response = handle_request(&state, request("tools/list", json!({}))).await;
        let tools = response.result.unwrap()["tools"].as_array().unwrap().clone();
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0]["name"], "find");
        assert_eq!(tools[1]["name"], "run");
    }

    #[tokio::test]
    async fn initialize_echoes_session_id_through_meta() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _) = state_in(dir.path());
        let response = handle_request(
            &state,
            request(
                "initialize",
                json!({
                    "protocolVersion": "2024-11-05",
                    "clientInfo": {"name": "claude", "version": "1.0"},
                    "_meta": {"session_id": "S-123"},
                }),
            ),
        )
        .await;
        let result = response.result.unwrap();
        assert_eq!(result["_meta"]["session_id"], "S-123");
        assert_eq!(result["serverInfo"]["name"], "ncp");
        assert!(result["capabilities"]["resources"]["subscribe"].as_bool().unwrap());
        assert_eq!(state.registry.client_name(), "claude");
    }

    #[tokio::test]
    async fn unknown_method_gets_minus_32601() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _) = state_in(dir.path());
        let response = handle_request(&state, request("tools/lost", json!({}))).await;
        let error = response.error.unwrap();
        assert_eq!(error.code, -32601);
        // Fuzzy suggestion within edit distance 2
        assert_eq!(error.data.unwrap()["suggestions"][0], "tools/list");
    }

    #[tokio::test]
    async fn unknown_tool_name_gets_suggestions() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _) = state_in(dir.path());
        let response = handle_request(
            &state,
            request("tools/call", json!({"name": "fnd", "arguments": {}})),
        )
        .await;
        let error = response.error.unwrap();
        assert_eq!(error.code, -32601);
        assert_eq!(error.data.unwrap()["suggestions"][0], "find");
    }

    #[tokio::test]
    async fn find_rejects_bad_depth_and_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _) = state_in(dir.path());

        let response = handle_request(
            &state,
            request("tools/call", json!({"name": "find", "arguments": {"depth": 7}})),
        )
        .await;
        assert_eq!(response.error.unwrap().code, -32602);

        let response = handle_request(
            &state,
            request(
                "tools/call",
                json!({"name": "find", "arguments": {"confidence_threshold": 1.5}}),
            ),
        )
        .await;
        assert_eq!(response.error.unwrap().code, -32602);
    }

    #[tokio::test]
    async fn list_mode_find_is_lexicographic_without_confidence() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _) = state_in(dir.path());
        for (qualified, description) in [("beta:farewell", "Say goodbye"), ("alpha:greet", "Say hello")]
        {
            let (mcp, local) = qualified.split_once(':').unwrap();
            let vector = state.embedder.embed(description).await.unwrap();
            state
                .index
                .upsert(crate::index::CacheRecord {
                    qualified_name: qualified.to_string(),
                    mcp_name: mcp.to_string(),
                    local_name: local.to_string(),
                    description: description.to_string(),
                    input_schema: json!({"type": "object"}),
                    embedding_model_id: state.embedder.model_id().to_string(),
                    text_hash: "h".to_string(),
                    input_schema_hash: "s".to_string(),
                    vector,
                    last_seen: chrono::Utc::now(),
                })
                .unwrap();
        }

        let response =
            handle_request(&state, request("tools/call", json!({"name": "find", "arguments": {}})))
                .await;
        let text = response.result.unwrap()["content"][0]["text"]
            .as_str()
            .unwrap()
            .to_string();
        let alpha = text.find("alpha:greet").expect("alpha:greet listed");
        let beta = text.find("beta:farewell").expect("beta:farewell listed");
        assert!(alpha < beta, "lexicographic order expected:\n{text}");
        assert!(!text.contains('%'), "listing must hide confidence:\n{text}");
    }

    #[tokio::test]
    async fn find_on_empty_index_mentions_no_matches() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _) = state_in(dir.path());
        let response =
            handle_request(&state, request("tools/call", json!({"name": "find", "arguments": {}})))
                .await;
        let text = response.result.unwrap()["content"][0]["text"]
            .as_str()
            .unwrap()
            .to_string();
        assert!(text.contains("No tools matched"));
    }

    #[tokio::test]
    async fn subscribe_tracks_uris() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _) = state_in(dir.path());
        handle_request(
            &state,
            request("resources/subscribe", json!({"uri": "ncp://scheduler/abc"})),
        )
        .await;
        assert!(state.subscriptions.lock().unwrap().contains("ncp://scheduler/abc"));

        handle_request(
            &state,
            request("resources/unsubscribe", json!({"uri": "ncp://scheduler/abc"})),
        )
        .await;
        assert!(state.subscriptions.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn resource_updates_are_filtered_by_subscription() {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let subscriptions: SubscriptionSet = Arc::new(std::sync::Mutex::new(HashSet::new()));
        let notifier = ChannelNotifier {
            tx,
            subscriptions: subscriptions.clone(),
        };

        // Not subscribed: the update is dropped.
        notifier.notify(
            "notifications/resources/updated",
            Some(json!({"uri": "ncp://scheduler/job-1"})),
        );
        assert!(rx.try_recv().is_err());

        // List-level notifications always pass through.
        notifier.notify("notifications/resources/list_changed", None);
        let line = rx.try_recv().unwrap();
        assert!(line.contains("list_changed"));

        // Subscribed: the update is delivered.
        subscriptions
            .lock()
            .unwrap()
            .insert("ncp://scheduler/job-1".to_string());
        notifier.notify(
            "notifications/resources/updated",
            Some(json!({"uri": "ncp://scheduler/job-1"})),
        );
        let line = rx.try_recv().unwrap();
        let frame: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(frame["method"], "notifications/resources/updated");
        assert_eq!(frame["params"]["uri"], "ncp://scheduler/job-1");

        // Unsubscribing silences it again.
        subscriptions.lock().unwrap().clear();
        notifier.notify(
            "notifications/resources/updated",
            Some(json!({"uri": "ncp://scheduler/job-1"})),
        );
        assert!(rx.try_recv().is_err());
    }
}
