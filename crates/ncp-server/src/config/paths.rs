// crates/ncp-server/src/config/paths.rs
// Filesystem layout under the NCP base directory (default ~/.ncp)

use std::path::{Path, PathBuf};

/// Resolved locations of every persisted file the engine touches.
#[derive(Debug, Clone)]
pub struct BaseDirs {
    root: PathBuf,
}

impl BaseDirs {
    /// Resolve the base directory: explicit flag, then NCP_WORKING_DIR,
    /// then `$HOME/.ncp`.
    pub fn resolve(working_dir: Option<PathBuf>) -> Self {
        let root = working_dir
            .or_else(|| std::env::var("NCP_WORKING_DIR").ok().map(PathBuf::from))
            .or_else(|| dirs::home_dir().map(|h| h.join(".ncp")))
            .unwrap_or_else(|| PathBuf::from(".ncp"));
        Self { root }
    }

    /// Base directory rooted at an explicit path (tests, --working-dir).
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn profiles_dir(&self) -> PathBuf {
        self.root.join("profiles")
    }

    pub fn profile_file(&self, name: &str) -> PathBuf {
        self.profiles_dir().join(format!("{name}.json"))
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.root.join("cache")
    }

    pub fn index_snapshot(&self) -> PathBuf {
        self.cache_dir().join("index.snapshot")
    }

    pub fn index_journal(&self) -> PathBuf {
        self.cache_dir().join("index.journal")
    }

    pub fn scheduled_jobs(&self) -> PathBuf {
        self.root.join("scheduled-jobs.json")
    }

    pub fn settings(&self) -> PathBuf {
        self.root.join("settings.json")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// Create the directory tree. Idempotent.
    pub fn ensure(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.profiles_dir())?;
        std::fs::create_dir_all(self.cache_dir())?;
        std::fs::create_dir_all(self.logs_dir())?;
        Ok(())
    }
}
