// crates/ncp-server/src/autoimport.rs
// Auto-import (C11): scan known client config files and merge MCP entries into the profile

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{McpDescriptor, ProfileStore, TransportKind};

/// Snapshot of the last auto-import run, rendered at
/// `ncp://status/auto-import`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoImportSummary {
    pub count: usize,
    pub skipped: usize,
    pub source_client: String,
    pub timestamp: DateTime<Utc>,
}

/// Root of a `.mcp.json`-style file.
#[derive(Deserialize)]
struct McpJsonRoot {
    #[serde(rename = "mcpServers", default)]
    mcp_servers: HashMap<String, ServerEntry>,
}

/// Root of a Codex-style `config.toml`.
#[derive(Deserialize)]
struct CodexTomlRoot {
    #[serde(default)]
    mcp_servers: HashMap<String, ServerEntry>,
}

/// A single server entry, shared between the JSON and TOML formats. Only
/// stdio (`command`) entries are importable; url-only entries are counted
/// as skipped.
#[derive(Deserialize)]
struct ServerEntry {
    command: Option<String>,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: BTreeMap<String, String>,
    cwd: Option<String>,
    #[allow(dead_code)]
    url: Option<String>,
}

impl ServerEntry {
    fn into_descriptor(self, name: &str) -> Option<McpDescriptor> {
        let command = self.command?;
        Some(McpDescriptor {
            name: name.to_string(),
            transport: TransportKind::Stdio,
            command,
            args: self.args,
            env: self.env,
            working_dir: self.cwd,
            enabled: true,
        })
    }
}

/// Well-known config locations for the connecting client, most specific
/// first. Unknown clients fall back to the generic `.mcp.json` locations.
pub fn config_paths_for(client_name: &str) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    let lower = client_name.to_lowercase();
    let home = dirs::home_dir();

    if let Some(home) = &home {
        if lower.contains("claude") {
            paths.push(home.join(".claude/mcp.json"));
            paths.push(home.join(".config/Claude/claude_desktop_config.json"));
            paths.push(home.join("Library/Application Support/Claude/claude_desktop_config.json"));
        }
        if lower.contains("cursor") {
            paths.push(home.join(".cursor/mcp.json"));
        }
        if lower.contains("codex") {
            paths.push(home.join(".codex/config.toml"));
        }
        // Generic fallbacks, always scanned last.
        paths.push(home.join(".mcp.json"));
    }
    if let Ok(cwd) = std::env::current_dir() {
        paths.push(cwd.join(".mcp.json"));
    }
    paths
}

/// Scan the given config files and merge every MCP entry not already present
/// in the profile. NCP itself is never imported (self-recursion guard).
/// Failures are logged, never fatal.
pub fn scan_paths(
    paths: &[PathBuf],
    client_name: &str,
    profile: &ProfileStore,
) -> AutoImportSummary {
    let mut imported = 0usize;
    let mut skipped = 0usize;

    for path in paths {
        let entries = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => load_codex_toml(path),
            _ => load_mcp_json(path),
        };
        let Some(entries) = entries else { continue };

        for (name, entry) in entries {
            if is_ncp_entry(&name, entry.command.as_deref(), &entry.args) {
                debug!(source = %path.display(), entry = %name, "Skipping NCP itself");
                skipped += 1;
                continue;
            }
            if profile.contains(&name) {
                skipped += 1;
                continue;
            }
            let Some(descriptor) = entry.into_descriptor(&name) else {
                skipped += 1;
                continue;
            };
            match profile.upsert(descriptor, false) {
                Ok(true) => {
                    info!(source = %path.display(), mcp = %name, "Auto-imported MCP");
                    imported += 1;
                }
                Ok(false) => skipped += 1,
                Err(e) => {
                    warn!(mcp = %name, error = %e, "Failed to import MCP");
                    skipped += 1;
                }
            }
        }
    }

    AutoImportSummary {
        count: imported,
        skipped,
        source_client: client_name.to_string(),
        timestamp: Utc::now(),
    }
}

/// Convenience entry point: scan the well-known locations for this client.
pub fn run(client_name: &str, profile: &ProfileStore) -> AutoImportSummary {
    let paths = config_paths_for(client_name);
    scan_paths(&paths, client_name, profile)
}

fn load_mcp_json(path: &Path) -> Option<HashMap<String, ServerEntry>> {
    let content = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str::<McpJsonRoot>(&content) {
        Ok(root) => Some(root.mcp_servers),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Unparseable MCP config, skipping");
            None
        }
    }
}

fn load_codex_toml(path: &Path) -> Option<HashMap<String, ServerEntry>> {
    let content = std::fs::read_to_string(path).ok()?;
    match toml::from_str::<CodexTomlRoot>(&content) {
        Ok(root) => Some(root.mcp_servers),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Unparseable Codex config, skipping");
            None
        }
    }
}

/// Self-recursion guard: an entry that would spawn NCP itself.
fn is_ncp_entry(name: &str, command: Option<&str>, args: &[String]) -> bool {
    if name.eq_ignore_ascii_case("ncp") {
        return true;
    }
    let command_is_ncp = command
        .map(|c| {
            Path::new(c)
                .file_stem()
                .and_then(|s| s.to_str())
                .is_some_and(|s| s.eq_ignore_ascii_case("ncp"))
        })
        .unwrap_or(false);
    command_is_ncp || args.iter().any(|a| a == "ncp")
}
