// crates/ncp-server/src/server/render.rs
// Text rendering for find results, previews and the internal markdown resources

use serde_json::Value;

use crate::autoimport::AutoImportSummary;
use crate::finder::FindResponse;
use crate::indexer::ProgressSnapshot;
use crate::registry::McpHealth;

pub const INDEXING_PREFIX: &str = "⏳ Indexing in progress — results may be partial.";

/// Render a find response as the single text content part returned upstream.
/// Depth controls presentation only: 0 = name, 1 = name+description,
/// 2 = name+description+input schema. Listing mode hides confidence.
pub fn render_find(response: &FindResponse) -> String {
    let mut out = String::new();
    if response.indexing_in_progress {
        out.push_str(INDEXING_PREFIX);
        out.push_str("\n\n");
    }

    if response.entries.is_empty() {
        out.push_str("No tools matched. Try a broader description or a lower confidence_threshold.");
        return out;
    }

    for entry in &response.entries {
        if response.listing {
            out.push_str(&entry.qualified_name);
        } else {
            out.push_str(&format!(
                "{} ({}% match)",
                entry.qualified_name,
                (entry.score * 100.0).round() as i64
            ));
        }
        out.push('\n');

        if response.depth >= 1 && !entry.description.is_empty() {
            out.push_str("  ");
            out.push_str(&entry.description);
            out.push('\n');
        }
        if response.depth >= 2 && !entry.input_schema.is_null() {
            out.push_str("  schema: ");
            out.push_str(&entry.input_schema.to_string());
            out.push('\n');
        }
    }

    let pages = response.total.div_ceil(response.limit).max(1);
    out.push_str(&format!(
        "\nPage {} of {} ({} tool{})",
        response.page,
        pages,
        response.total,
        if response.total == 1 { "" } else { "s" }
    ));
    out
}

/// Preview for `run(..., dry_run: true)`: nothing is forwarded.
pub fn render_dry_run(mcp: &str, tool: &str, parameters: &Value) -> String {
    format!("[dry run] Would call '{tool}' on '{mcp}' with parameters: {parameters}")
}

/// `ncp://help/getting-started`
pub fn render_help() -> String {
    "# NCP — getting started\n\
     \n\
     NCP federates your MCP servers behind two tools:\n\
     \n\
     - `find` — describe what you want to do (`find(\"write a file\")`) or\n\
       call it with no arguments to list everything that is available.\n\
     - `run` — execute a discovered tool by its qualified name:\n\
       `run(tool: \"fs:read_file\", parameters: {\"path\": \"/tmp/x\"})`.\n\
     \n\
     Scheduling lives under the reserved `ncp` name: `run(\"ncp:schedule_create\",\n\
     {\"name\": \"nightly\", \"schedule\": \"every day at 6:30\"})`. Jobs appear as\n\
     `ncp://scheduler/<id>` resources and emit update notifications when they fire.\n"
        .to_string()
}

/// `ncp://status/health`
pub fn render_health(
    health: &[McpHealth],
    progress: &ProgressSnapshot,
    indexed_tools: usize,
) -> String {
    let mut out = String::from("# NCP health\n\n");

    if progress.active {
        out.push_str(&format!(
            "Indexing in progress: {}/{} tools",
            progress.indexed, progress.total
        ));
        if let Some(current) = &progress.current {
            out.push_str(&format!(" (currently {current})"));
        }
        out.push_str("\n\n");
    } else {
        out.push_str(&format!("Index ready: {indexed_tools} tools\n\n"));
    }

    if health.is_empty() {
        out.push_str("No downstream MCPs configured.\n");
        return out;
    }

    out.push_str("| MCP | enabled | state | pid | error |\n");
    out.push_str("|---|---|---|---|---|\n");
    for entry in health {
        out.push_str(&format!(
            "| {} | {} | {} | {} | {} |\n",
            entry.name,
            entry.enabled,
            entry.state,
            entry.pid.map_or("-".to_string(), |p| p.to_string()),
            entry.last_error.as_deref().unwrap_or("-"),
        ));
    }
    out
}

/// `ncp://status/auto-import`
pub fn render_auto_import(summary: Option<&AutoImportSummary>) -> String {
    match summary {
        Some(s) => format!(
            "# Auto-import\n\nLast run: {}\nSource client: {}\nImported: {}\nSkipped: {}\n",
            s.timestamp.to_rfc3339(),
            s.source_client,
            s.count,
            s.skipped
        ),
        None => "# Auto-import\n\nNo auto-import has run yet.\n".to_string(),
    }
}
