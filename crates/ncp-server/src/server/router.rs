// crates/ncp-server/src/server/router.rs
// Run dispatch (C9a): resolve "mcp:tool", gate, forward, relay verbatim

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use tracing::debug;

use super::{ServerState, render};
use crate::error::{NcpError, Result};
use crate::gate::{GateDecision, UserResponse};
use crate::rpc::{TextContent, normalize_tool_result};
use crate::scheduler::{JobAction, JobConstraints, JobStatus};

/// MCP name reserved for NCP's own management tools (scheduling).
const INTERNAL_MCP: &str = "ncp";

/// Execute `run(tool, parameters, …)`.
pub async fn run(state: &Arc<ServerState>, arguments: &Value, meta: Option<Value>) -> Result<Value> {
    let tool = arguments
        .get("tool")
        .and_then(|t| t.as_str())
        .ok_or_else(|| NcpError::InvalidArguments("missing required 'tool'".to_string()))?;
    let (mcp_name, local_name) = tool.split_once(':').ok_or_else(|| {
        NcpError::InvalidArguments(format!(
            "tool must be qualified as 'mcp:tool', got '{tool}'"
        ))
    })?;
    if mcp_name.is_empty() || local_name.is_empty() {
        return Err(NcpError::InvalidArguments(format!(
            "tool must be qualified as 'mcp:tool', got '{tool}'"
        )));
    }

    let parameters = arguments.get("parameters").cloned().unwrap_or(json!({}));

    // Preview: synthesized locally, nothing is forwarded and no gate runs.
    if arguments.get("dry_run").and_then(|d| d.as_bool()) == Some(true) {
        let preview = render::render_dry_run(mcp_name, local_name, &parameters);
        return Ok(json!({ "content": [TextContent::text(preview)] }));
    }

    if mcp_name == INTERNAL_MCP {
        return run_internal(state, local_name, &parameters).await;
    }

    if !state.profile.contains(mcp_name) {
        let known: Vec<String> = state
            .index
            .all_records()
            .into_iter()
            .map(|r| r.qualified_name)
            .collect();
        return Err(NcpError::ToolNotFound {
            tool: tool.to_string(),
            suggestions: crate::util::suggestions(tool, known.iter().map(|s| s.as_str())),
        });
    }

    // Confirmation gate. A matching, non-whitelisted tool is forwarded only
    // when this very request carries consent.
    let description = state
        .index
        .get(tool)
        .map(|r| r.description)
        .unwrap_or_default();
    match state.gate.check(tool, &description, &parameters).await? {
        GateDecision::Allowed => {}
        GateDecision::Confirm(details) => {
            let raw_response = arguments.get("_userResponse").and_then(|r| r.as_str());
            match UserResponse::parse(raw_response) {
                Some(response) => state.gate.apply_user_response(tool, response)?,
                None if raw_response.is_some() => return Err(NcpError::OperationCancelled),
                None => return Err(NcpError::ConfirmationRequired(Box::new(details))),
            }
        }
    }

    debug!(tool = %tool, "Forwarding tools/call");
    let result = state
        .registry
        .forward_call(
            mcp_name,
            "tools/call",
            Some(json!({ "name": local_name, "arguments": parameters })),
            meta,
        )
        .await?;

    // Relay `content` verbatim; bare strings are wrapped for compatibility.
    Ok(normalize_tool_result(result))
}

/// Scheduler management, reachable as `run("ncp:schedule_*")`. Never
/// forwarded downstream and never gated.
async fn run_internal(state: &Arc<ServerState>, tool: &str, parameters: &Value) -> Result<Value> {
    match tool {
        "schedule_create" => {
            let name = required_str(parameters, "name")?;
            let schedule = required_str(parameters, "schedule")?;
            let description = parameters
                .get("description")
                .and_then(|d| d.as_str())
                .map(str::to_string);
            let end_date = match parameters.get("end_date").and_then(|d| d.as_str()) {
                Some(raw) => Some(
                    raw.parse::<DateTime<Utc>>()
                        .map_err(|e| NcpError::InvalidArguments(format!("bad end_date: {e}")))?,
                ),
                None => None,
            };
            let constraints = JobConstraints {
                fire_once: parameters
                    .get("fire_once")
                    .and_then(|f| f.as_bool())
                    .unwrap_or(false),
                max_executions: parameters
                    .get("max_executions")
                    .and_then(|m| m.as_u64())
                    .map(|m| m as u32),
                end_date,
                execution_count: 0,
            };

            let job = state.jobs.create(
                name,
                schedule,
                description,
                JobAction::ResourceUpdate,
                constraints,
                Utc::now(),
            )?;
            // The resource set changed; the next resources/list reflects it.
            state.aggregate.invalidate().await;
            state
                .notifier
                .notify("notifications/resources/list_changed", None);
            text_result(&json!({
                "jobId": job.id,
                "name": job.name,
                "schedule": job.schedule,
                "cron": job.cron,
                "nextRun": job.next_run,
                "status": job.status.to_string(),
                "resource": job.resource_uri(),
            }))
        }
        "schedule_list" => {
            let jobs: Vec<Value> = state
                .jobs
                .list()
                .into_iter()
                .map(|j| {
                    json!({
                        "jobId": j.id,
                        "name": j.name,
                        "schedule": j.schedule,
                        "status": j.status.to_string(),
                        "executionCount": j.constraints.execution_count,
                        "lastRun": j.last_run,
                        "nextRun": j.next_run,
                    })
                })
                .collect();
            text_result(&json!({ "jobs": jobs }))
        }
        "schedule_remove" => {
            let id = required_str(parameters, "job_id")?;
            if !state.jobs.remove(id)? {
                return Err(NcpError::InvalidArguments(format!("no job with id '{id}'")));
            }
            state.aggregate.invalidate().await;
            state
                .notifier
                .notify("notifications/resources/list_changed", None);
            text_result(&json!({ "removed": id }))
        }
        "schedule_pause" | "schedule_resume" => {
            let id = required_str(parameters, "job_id")?;
            let status = if tool == "schedule_pause" {
                JobStatus::Paused
            } else {
                JobStatus::Active
            };
            if !state.jobs.set_status(id, status, Utc::now())? {
                return Err(NcpError::InvalidArguments(format!("no job with id '{id}'")));
            }
            text_result(&json!({ "jobId": id, "status": status.to_string() }))
        }
        other => {
            let known = [
                "schedule_create",
                "schedule_list",
                "schedule_remove",
                "schedule_pause",
                "schedule_resume",
            ];
            Err(NcpError::ToolNotFound {
                tool: format!("{INTERNAL_MCP}:{other}"),
                suggestions: crate::util::suggestions(other, known.iter().copied())
                    .into_iter()
                    .map(|s| format!("{INTERNAL_MCP}:{s}"))
                    .collect(),
            })
        }
    }
}

fn required_str<'a>(parameters: &'a Value, key: &str) -> Result<&'a str> {
    parameters
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| NcpError::InvalidArguments(format!("missing required '{key}'")))
}

fn text_result(value: &Value) -> Result<Value> {
    let text = serde_json::to_string_pretty(value)?;
    Ok(json!({ "content": [TextContent::text(text)] }))
}
