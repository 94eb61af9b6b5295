// crates/ncp-server/src/config/profile.rs
// Profile store: the set of configured downstream MCP descriptors

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{NcpError, Result};
use crate::util::write_atomic;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Stdio,
    Http,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Stdio => write!(f, "stdio"),
            TransportKind::Http => write!(f, "http"),
        }
    }
}

/// A configured downstream MCP server. Immutable for the lifetime of a
/// session; `name` is unique within a profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpDescriptor {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub transport: TransportKind,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// On-disk profile document: `profiles/<name>.json`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub mcp_servers: BTreeMap<String, McpDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl Profile {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }
}

/// Loads and persists a single profile. Mutations rewrite the file
/// atomically so a crash never leaves a torn document.
pub struct ProfileStore {
    path: PathBuf,
    profile: RwLock<Profile>,
}

impl ProfileStore {
    /// Load `profiles/<name>.json`, creating an empty profile when the file
    /// does not exist yet.
    pub fn load(path: PathBuf, name: &str) -> Result<Self> {
        let profile = match std::fs::read_to_string(&path) {
            Ok(contents) => {
                let mut profile: Profile = serde_json::from_str(&contents)
                    .map_err(|e| NcpError::Config(format!("profile {}: {e}", path.display())))?;
                if profile.name.is_empty() {
                    profile.name = name.to_string();
                }
                // Map keys are authoritative for descriptor names
                for (key, desc) in profile.mcp_servers.iter_mut() {
                    desc.name = key.clone();
                }
                debug!(path = %path.display(), mcps = profile.mcp_servers.len(), "Loaded profile");
                profile
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "Profile not found, starting empty");
                Profile::named(name)
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            profile: RwLock::new(profile),
        })
    }

    /// All descriptors, enabled or not, in name order.
    pub fn descriptors(&self) -> Vec<McpDescriptor> {
        self.profile
            .read()
            .expect("profile lock poisoned")
            .mcp_servers
            .values()
            .cloned()
            .collect()
    }

    /// Enabled descriptors only.
    pub fn enabled_descriptors(&self) -> Vec<McpDescriptor> {
        self.descriptors().into_iter().filter(|d| d.enabled).collect()
    }

    pub fn get(&self, name: &str) -> Option<McpDescriptor> {
        self.profile
            .read()
            .expect("profile lock poisoned")
            .mcp_servers
            .get(name)
            .cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn mcp_names(&self) -> Vec<String> {
        self.profile
            .read()
            .expect("profile lock poisoned")
            .mcp_servers
            .keys()
            .cloned()
            .collect()
    }

    /// Insert or replace a descriptor and persist. Returns false when an
    /// identical name already existed and `overwrite` was not requested.
    pub fn upsert(&self, descriptor: McpDescriptor, overwrite: bool) -> Result<bool> {
        {
            let mut profile = self.profile.write().expect("profile lock poisoned");
            if !overwrite && profile.mcp_servers.contains_key(&descriptor.name) {
                return Ok(false);
            }
            profile
                .mcp_servers
                .insert(descriptor.name.clone(), descriptor);
        }
        self.persist()?;
        Ok(true)
    }

    pub fn remove(&self, name: &str) -> Result<bool> {
        let removed = {
            let mut profile = self.profile.write().expect("profile lock poisoned");
            profile.mcp_servers.remove(name).is_some()
        };
        if removed {
            self.persist()?;
        }
        Ok(removed)
    }

    fn persist(&self) -> Result<()> {
        let json = {
            let profile = self.profile.read().expect("profile lock poisoned");
            serde_json::to_vec_pretty(&*profile)?
        };
        write_atomic(&self.path, &json).map_err(|e| {
            warn!(path = %self.path.display(), error = %e, "Failed to persist profile");
            NcpError::Io(e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(name: &str) -> McpDescriptor {
        McpDescriptor {
            name: name.to_string(),
            transport: TransportKind::Stdio,
            command: "mcp-server".to_string(),
            args: vec!["--flag".to_string()],
            env: BTreeMap::new(),
            working_dir: None,
            enabled: true,
        }
    }

    #[test]
    fn missing_file_yields_empty_profile() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::load(dir.path().join("all.json"), "all").unwrap();
        assert!(store.descriptors().is_empty());
    }

    #[test]
    fn upsert_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("all.json");

        let store = ProfileStore::load(path.clone(), "all").unwrap();
        assert!(store.upsert(descriptor("fs"), false).unwrap());
        assert!(!store.upsert(descriptor("fs"), false).unwrap());

        let reloaded = ProfileStore::load(path, "all").unwrap();
        let descs = reloaded.descriptors();
        assert_eq!(descs.len(), 1);
        assert_eq!(descs[0].name, "fs");
        assert_eq!(descs[0].command, "mcp-server");
        assert!(descs[0].enabled);
    }

    #[test]
    fn disabled_descriptors_are_filtered() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::load(dir.path().join("all.json"), "all").unwrap();
        let mut off = descriptor("off");
        off.enabled = false;
        store.upsert(descriptor("on"), false).unwrap();
        store.upsert(off, false).unwrap();
        let enabled = store.enabled_descriptors();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].name, "on");
    }

    #[test]
    fn map_key_wins_over_embedded_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("all.json");
        let json = r#"{
            "name": "all",
            "mcpServers": {
                "shell": { "command": "sh-mcp", "args": [] }
            }
        }"#;
        std::fs::write(&path, json).unwrap();
        let store = ProfileStore::load(path, "all").unwrap();
        assert_eq!(store.get("shell").unwrap().name, "shell");
    }
}
