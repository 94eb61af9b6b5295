// crates/ncp-server/src/server/resources.rs
// prompts/* and resources/* handlers: NCP-internal entries merged with every
// downstream's, behind a short-TTL cache

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tracing::debug;

use super::{ServerState, render};
use crate::error::{NcpError, Result};

/// How long an aggregated downstream listing stays fresh.
const AGGREGATE_TTL: Duration = Duration::from_secs(30);

/// One downstream listing entry, tagged with its owning MCP.
type Tagged = (String, Value);

/// Short-TTL cache over the merged downstream prompt/resource listings.
pub struct AggregateCache {
    cache: moka::future::Cache<String, Arc<Vec<Tagged>>>,
}

impl AggregateCache {
    pub fn new() -> Self {
        Self {
            cache: moka::future::Cache::builder()
                .time_to_live(AGGREGATE_TTL)
                .max_capacity(8)
                .build(),
        }
    }

    pub async fn invalidate(&self) {
        self.cache.invalidate_all();
    }

    /// Merged listing of `method` ("prompts/list" or "resources/list") across
    /// every enabled downstream, in MCP-name order. Unreachable downstreams
    /// contribute nothing.
    async fn fetch(&self, state: &Arc<ServerState>, method: &str, field: &str) -> Arc<Vec<Tagged>> {
        let key = method.to_string();
        let state = state.clone();
        let method = method.to_string();
        let field = field.to_string();
        self.cache
            .get_with(key, async move {
                let mut merged: Vec<Tagged> = Vec::new();
                let mut names: Vec<String> = state
                    .profile
                    .enabled_descriptors()
                    .into_iter()
                    .map(|d| d.name)
                    .collect();
                names.sort();
                for name in names {
                    match state.registry.forward_call(&name, &method, None, None).await {
                        Ok(result) => {
                            if let Some(items) = result.get(&field).and_then(|v| v.as_array()) {
                                merged.extend(items.iter().map(|i| (name.clone(), i.clone())));
                            }
                        }
                        Err(e) => debug!(mcp = %name, method = %method, error = %e, "Skipping in aggregation"),
                    }
                }
                Arc::new(merged)
            })
            .await
    }
}

impl Default for AggregateCache {
    fn default() -> Self {
        Self::new()
    }
}

/// `prompts/list`: downstream prompts, names qualified as "mcp:prompt".
pub async fn prompts_list(state: &Arc<ServerState>) -> Result<Value> {
    let tagged = state.aggregate.fetch(state, "prompts/list", "prompts").await;
    let prompts: Vec<Value> = tagged
        .iter()
        .map(|(mcp, prompt)| {
            let mut prompt = prompt.clone();
            if let Some(name) = prompt.get("name").and_then(|n| n.as_str()) {
                prompt["name"] = json!(format!("{mcp}:{name}"));
            }
            prompt
        })
        .collect();
    Ok(json!({ "prompts": prompts }))
}

/// `prompts/get`: resolve the "mcp:prompt" name and forward.
pub async fn prompts_get(state: &Arc<ServerState>, params: &Value) -> Result<Value> {
    let name = params
        .get("name")
        .and_then(|n| n.as_str())
        .ok_or_else(|| NcpError::InvalidArguments("missing prompt name".to_string()))?;
    let (mcp, local) = name.split_once(':').ok_or_else(|| {
        NcpError::InvalidArguments(format!("unknown prompt '{name}'"))
    })?;

    let mut forward = json!({ "name": local });
    if let Some(arguments) = params.get("arguments") {
        forward["arguments"] = arguments.clone();
    }
    state
        .registry
        .forward_call(mcp, "prompts/get", Some(forward), None)
        .await
}

/// NCP's own resources: help, status pages and one entry per scheduled job.
fn internal_resources(state: &Arc<ServerState>) -> Vec<Value> {
    let mut resources = vec![
        json!({
            "uri": "ncp://help/getting-started",
            "name": "getting-started",
            "description": "How to discover and run federated tools",
            "mimeType": "text/markdown",
        }),
        json!({
            "uri": "ncp://status/health",
            "name": "health",
            "description": "Downstream MCP health and indexing status",
            "mimeType": "text/markdown",
        }),
        json!({
            "uri": "ncp://status/auto-import",
            "name": "auto-import",
            "description": "Result of the last client-config auto-import",
            "mimeType": "text/markdown",
        }),
    ];
    // Finished jobs stay discoverable until removed.
    for job in state.jobs.list() {
        resources.push(json!({
            "uri": job.resource_uri(),
            "name": format!("job: {}", job.name),
            "description": job.description,
            "mimeType": "application/json",
        }));
    }
    resources
}

/// `resources/list`: internal entries first, then each downstream's,
/// in stable order.
pub async fn resources_list(state: &Arc<ServerState>) -> Result<Value> {
    let mut resources = internal_resources(state);
    let tagged = state
        .aggregate
        .fetch(state, "resources/list", "resources")
        .await;
    resources.extend(tagged.iter().map(|(_, r)| r.clone()));
    Ok(json!({ "resources": resources }))
}

/// `resources/read`: internal URIs are rendered locally; downstream URIs are
/// routed to the MCP that listed them.
pub async fn resources_read(state: &Arc<ServerState>, params: &Value) -> Result<Value> {
    let uri = params
        .get("uri")
        .and_then(|u| u.as_str())
        .ok_or_else(|| NcpError::InvalidArguments("missing uri".to_string()))?;

    if let Some(rest) = uri.strip_prefix("ncp://") {
        let (text, mime) = match rest {
            "help/getting-started" => (render::render_help(), "text/markdown"),
            "status/health" => {
                let health = state.registry.health_snapshot().await;
                let progress = state.progress.snapshot();
                (
                    render::render_health(&health, &progress, state.index.len()),
                    "text/markdown",
                )
            }
            "status/auto-import" => {
                let summary = state
                    .auto_import
                    .read()
                    .expect("auto-import lock poisoned")
                    .clone();
                (render::render_auto_import(summary.as_ref()), "text/markdown")
            }
            _ => match rest.strip_prefix("scheduler/") {
                Some(job_id) => {
                    let job = state.jobs.get(job_id).ok_or_else(|| {
                        NcpError::InvalidArguments(format!("no job with id '{job_id}'"))
                    })?;
                    (serde_json::to_string_pretty(&job)?, "application/json")
                }
                None => {
                    return Err(NcpError::InvalidArguments(format!(
                        "unknown resource '{uri}'"
                    )));
                }
            },
        };
        return Ok(json!({
            "contents": [{ "uri": uri, "mimeType": mime, "text": text }],
        }));
    }

    // Downstream resource: route to whichever MCP listed this URI.
    let tagged = state
        .aggregate
        .fetch(state, "resources/list", "resources")
        .await;
    let owner = tagged
        .iter()
        .find(|(_, r)| r.get("uri").and_then(|u| u.as_str()) == Some(uri))
        .map(|(mcp, _)| mcp.clone())
        .ok_or_else(|| NcpError::InvalidArguments(format!("unknown resource '{uri}'")))?;

    state
        .registry
        .forward_call(&owner, "resources/read", Some(json!({ "uri": uri })), None)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{McpDescriptor, TransportKind};
    use crate::scheduler::{JobAction, JobConstraints};
    use crate::server::test_support::state_in;
    use chrono::Utc;
    use std::collections::BTreeMap;

    /// Downstream answering prompts/list, resources/list, prompts/get and
    /// resources/read in that order after the handshake.
    fn aggregating_descriptor(name: &str) -> McpDescriptor {
        let script = format!(
            r#"
read line
printf '%s\n' '{{"jsonrpc":"2.0","id":1,"result":{{"protocolVersion":"2024-11-05","capabilities":{{}},"serverInfo":{{"name":"{name}","version":"0"}}}}}}'
read notif
read req
printf '%s\n' '{{"jsonrpc":"2.0","id":2,"result":{{"prompts":[{{"name":"summarize","description":"Summarize things"}}]}}}}'
read req2
printf '%s\n' '{{"jsonrpc":"2.0","id":3,"result":{{"resources":[{{"uri":"file:///notes.txt","name":"notes"}}]}}}}'
read req3
printf '%s\n' '{{"jsonrpc":"2.0","id":4,"result":{{"messages":[{{"role":"user","content":{{"type":"text","text":"hi"}}}}]}}}}'
read req4
printf '%s\n' '{{"jsonrpc":"2.0","id":5,"result":{{"contents":[{{"uri":"file:///notes.txt","text":"note body"}}]}}}}'
read wait
"#
        );
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

    #[tokio::test]
    async fn internal_resources_are_always_listed() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _) = state_in(dir.path());
        let result = resources_list(&state).await.unwrap();
        let uris: Vec<&str> = result["resources"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|r| r["uri"].as_str())
            .collect();
        assert!(uris.contains(&"ncp://help/getting-started"));
        assert!(uris.contains(&"ncp://status/health"));
        assert!(uris.contains(&"ncp://status/auto-import"));
    }

    #[tokio::test]
    async fn scheduled_jobs_appear_as_resources() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _) = state_in(dir.path());
        let job = state
            .jobs
            .create("nightly", "every day at 6:30", None,
                JobAction::ResourceUpdate, JobConstraints::default(), Utc::now())
            .unwrap();

        let result = resources_list(&state).await.unwrap();
        let uris: Vec<&str> = result["resources"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|r| r["uri"].as_str())
            .collect();
        assert!(uris.contains(&job.resource_uri().as_str()));

        let read = resources_read(&state, &json!({"uri": job.resource_uri()}))
            .await
            .unwrap();
        let body: Value =
            serde_json::from_str(read["contents"][0]["text"].as_str().unwrap()).unwrap();
        assert_eq!(body["id"], job.id);
        assert_eq!(body["status"], "active");
    }

    #[tokio::test]
    async fn help_and_health_render_as_markdown() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _) = state_in(dir.path());

        let help = resources_read(&state, &json!({"uri": "ncp://help/getting-started"}))
            .await
            .unwrap();
        assert!(help["contents"][0]["text"].as_str().unwrap().contains("find"));
        assert_eq!(help["contents"][0]["mimeType"], "text/markdown");

        let health = resources_read(&state, &json!({"uri": "ncp://status/health"}))
            .await
            .unwrap();
        assert!(health["contents"][0]["text"].as_str().unwrap().contains("NCP health"));
    }

    #[tokio::test]
    async fn unknown_uris_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _) = state_in(dir.path());
        for uri in ["ncp://nope", "ncp://scheduler/ghost", "file:///unlisted.txt"] {
            let err = resources_read(&state, &json!({"uri": uri})).await.unwrap_err();
            assert!(matches!(err, NcpError::InvalidArguments(_)), "for {uri}");
        }
    }

    #[tokio::test]
    async fn downstream_prompts_and_resources_are_merged_and_routed() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _) = state_in(dir.path());
        state
            .profile
            .upsert(aggregating_descriptor("files"), true)
            .unwrap();

        // Prompts are namespaced with the MCP name.
        let prompts = prompts_list(&state).await.unwrap();
        assert_eq!(prompts["prompts"][0]["name"], "files:summarize");

        // Downstream resources are merged after the internal ones.
        let resources = resources_list(&state).await.unwrap();
        let uris: Vec<&str> = resources["resources"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|r| r["uri"].as_str())
            .collect();
        assert!(uris.contains(&"file:///notes.txt"));

        // prompts/get resolves the namespace and forwards.
        let got = prompts_get(&state, &json!({"name": "files:summarize"}))
            .await
            .unwrap();
        assert_eq!(got["messages"][0]["role"], "user");

        // resources/read routes to the listing owner.
        let read = resources_read(&state, &json!({"uri": "file:///notes.txt"}))
            .await
            .unwrap();
        assert_eq!(read["contents"][0]["text"], "note body");
        state.registry.close_all().await;
    }
}
