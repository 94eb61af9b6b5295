// crates/ncp-server/src/index/store.rs
// On-disk persistence for the vector index: snapshot + append-only journal

use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::CacheRecord;
use crate::error::Result;
use crate::util::write_atomic;

/// Journal grows to this many bytes before a compaction folds it into the
/// snapshot.
pub const DEFAULT_COMPACT_THRESHOLD: u64 = 512 * 1024;

/// One mutation, appended to the journal as a JSON line.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum JournalEntry {
    Upsert(CacheRecord),
    Remove { qualified_name: String },
}

struct JournalState {
    len: u64,
}

/// Snapshot + journal pair. The snapshot is rewritten atomically (temp +
/// rename); the journal is append-only between compactions. A torn tail
/// line after a crash is skipped on load.
pub struct DiskStore {
    snapshot_path: PathBuf,
    journal_path: PathBuf,
    journal: Mutex<JournalState>,
    compact_threshold: u64,
}

impl DiskStore {
    pub fn open(snapshot_path: PathBuf, journal_path: PathBuf) -> Self {
        let len = std::fs::metadata(&journal_path).map(|m| m.len()).unwrap_or(0);
        Self {
            snapshot_path,
            journal_path,
            journal: Mutex::new(JournalState { len }),
            compact_threshold: DEFAULT_COMPACT_THRESHOLD,
        }
    }

    pub fn with_compact_threshold(mut self, bytes: u64) -> Self {
        self.compact_threshold = bytes;
        self
    }

    /// Load the snapshot and replay the journal over it.
    pub fn load(&self) -> Result<BTreeMap<String, CacheRecord>> {
        let mut records: BTreeMap<String, CacheRecord> = BTreeMap::new();

        match std::fs::read_to_string(&self.snapshot_path) {
            Ok(contents) => {
                let list: Vec<CacheRecord> = serde_json::from_str(&contents)?;
                for record in list {
                    records.insert(record.qualified_name.clone(), record);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        match std::fs::read_to_string(&self.journal_path) {
            Ok(contents) => {
                for line in contents.lines() {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<JournalEntry>(line) {
                        Ok(JournalEntry::Upsert(record)) => {
                            records.insert(record.qualified_name.clone(), record);
                        }
                        Ok(JournalEntry::Remove { qualified_name }) => {
                            records.remove(&qualified_name);
                        }
                        Err(e) => {
                            // Most likely a partial write at the tail from a
                            // crash mid-append; everything before it is valid.
                            warn!(error = %e, "Skipping unreadable journal line");
                        }
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        debug!(
            records = records.len(),
            path = %self.snapshot_path.display(),
            "Loaded vector index"
        );
        Ok(records)
    }

    /// Append one mutation. Returns true when the journal has outgrown the
    /// threshold and the caller should invoke `compact` with full state.
    pub fn append(&self, entry: &JournalEntry) -> Result<bool> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let mut state = self.journal.lock().expect("journal lock poisoned");
        if let Some(parent) = self.journal_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.journal_path)?;
        file.write_all(line.as_bytes())?;
        state.len += line.len() as u64;

        Ok(state.len > self.compact_threshold)
    }

    /// Rewrite the snapshot from full state and truncate the journal.
    pub fn compact(&self, full_state: &BTreeMap<String, CacheRecord>) -> Result<()> {
        let mut state = self.journal.lock().expect("journal lock poisoned");
        self.compact_locked(&mut state, full_state)
    }

    fn compact_locked(
        &self,
        state: &mut JournalState,
        full_state: &BTreeMap<String, CacheRecord>,
    ) -> Result<()> {
        let list: Vec<&CacheRecord> = full_state.values().collect();
        let json = serde_json::to_vec(&list)?;
        write_atomic(&self.snapshot_path, &json)?;
        std::fs::write(&self.journal_path, b"")?;
        state.len = 0;
        debug!(records = list.len(), "Compacted vector index snapshot");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn record(name: &str) -> CacheRecord {
        CacheRecord {
            qualified_name: name.to_string(),
            mcp_name: name.split(':').next().unwrap_or("").to_string(),
            local_name: name.split(':').nth(1).unwrap_or("").to_string(),
            description: "a tool".to_string(),
            input_schema: json!({"type": "object"}),
            embedding_model_id: "ncp-hash-256/1".to_string(),
            text_hash: "abc".to_string(),
            input_schema_hash: "def".to_string(),
            vector: vec![1.0, 0.0],
            last_seen: Utc::now(),
        }
    }

    fn store_in(dir: &std::path::Path) -> DiskStore {
        DiskStore::open(dir.join("index.snapshot"), dir.join("index.journal"))
    }

    #[test]
    fn journal_replays_over_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());

        store.append(&JournalEntry::Upsert(record("fs:read"))).unwrap();
        store.append(&JournalEntry::Upsert(record("fs:write"))).unwrap();
        store
            .append(&JournalEntry::Remove { qualified_name: "fs:read".to_string() })
            .unwrap();

        let loaded = store_in(dir.path()).load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded.contains_key("fs:write"));
    }

    #[test]
    fn torn_tail_line_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());

        store.append(&JournalEntry::Upsert(record("fs:read"))).unwrap();

        // Simulate a crash mid-append
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(dir.path().join("index.journal"))
            .unwrap();
        file.write_all(b"{\"op\":\"upsert\",\"qualifiedNa").unwrap();

        let loaded = store_in(dir.path()).load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded.contains_key("fs:read"));
    }

    #[test]
    fn compaction_truncates_journal_and_keeps_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path()).with_compact_threshold(1);

        let mut state = BTreeMap::new();
        state.insert("fs:read".to_string(), record("fs:read"));
        // Threshold of one byte: the append reports compaction due.
        let needs_compact = store.append(&JournalEntry::Upsert(record("fs:read"))).unwrap();
        assert!(needs_compact);
        store.compact(&state).unwrap();

        let journal = std::fs::read_to_string(dir.path().join("index.journal")).unwrap();
        assert!(journal.is_empty());

        let loaded = store_in(dir.path()).load().unwrap();
        assert_eq!(loaded.len(), 1);
    }
}
