// crates/ncp-server/src/config/settings.rs
// Global settings, including the confirm-before-run gate configuration

use std::path::PathBuf;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{NcpError, Result};
use crate::util::write_atomic;

/// Configuration of the execution confirmation gate (C8).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmBeforeRun {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "ConfirmBeforeRun::default_pattern")]
    pub modifier_pattern: String,
    #[serde(default = "ConfirmBeforeRun::default_threshold")]
    pub vector_threshold: f32,
    #[serde(default)]
    pub whitelist: Vec<String>,
}

impl ConfirmBeforeRun {
    fn default_pattern() -> String {
        "delete remove overwrite modify write update destroy kill terminate".to_string()
    }

    fn default_threshold() -> f32 {
        0.7
    }
}

impl Default for ConfirmBeforeRun {
    fn default() -> Self {
        Self {
            enabled: false,
            modifier_pattern: Self::default_pattern(),
            vector_threshold: Self::default_threshold(),
            whitelist: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct GlobalSettings {
    #[serde(default)]
    pub confirm_before_run: ConfirmBeforeRun,
}

/// settings.json accessor. Whitelist mutations persist synchronously before
/// the caller proceeds, so a crash can never forget a granted "always".
pub struct SettingsStore {
    path: PathBuf,
    inner: RwLock<GlobalSettings>,
}

impl SettingsStore {
    pub fn load(path: PathBuf) -> Result<Self> {
        let settings = match std::fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents)
                .map_err(|e| NcpError::Config(format!("settings {}: {e}", path.display())))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "Settings not found, using defaults");
                GlobalSettings::default()
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            inner: RwLock::new(settings),
        })
    }

    pub fn confirm_before_run(&self) -> ConfirmBeforeRun {
        self.inner
            .read()
            .expect("settings lock poisoned")
            .confirm_before_run
            .clone()
    }

    pub fn is_whitelisted(&self, tool_id: &str) -> bool {
        self.inner
            .read()
            .expect("settings lock poisoned")
            .confirm_before_run
            .whitelist
            .iter()
            .any(|t| t == tool_id)
    }

    /// Add a tool to the whitelist and write settings.json before returning.
    pub fn add_to_whitelist(&self, tool_id: &str) -> Result<()> {
        {
            let mut settings = self.inner.write().expect("settings lock poisoned");
            let whitelist = &mut settings.confirm_before_run.whitelist;
            if !whitelist.iter().any(|t| t == tool_id) {
                whitelist.push(tool_id.to_string());
                whitelist.sort();
            }
        }
        self.persist()
    }

    pub fn set_confirm_before_run(&self, config: ConfirmBeforeRun) -> Result<()> {
        {
            let mut settings = self.inner.write().expect("settings lock poisoned");
            settings.confirm_before_run = config;
        }
        self.persist()
    }

    pub fn snapshot(&self) -> GlobalSettings {
        self.inner.read().expect("settings lock poisoned").clone()
    }

    fn persist(&self) -> Result<()> {
        let json = {
            let settings = self.inner.read().expect("settings lock poisoned");
            serde_json::to_vec_pretty(&*settings)?
        };
        write_atomic(&self.path, &json)?;
        Ok(())
    }
}
