// crates/ncp-server/src/index/mod.rs
// Vector index (C5): persistent map from qualified tool name to embedding + metadata

mod store;

pub use store::{DEFAULT_COMPACT_THRESHOLD, DiskStore, JournalEntry};

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::util::cosine;

/// Persistent form of one indexed tool. A record is reused only when both
/// `embedding_model_id` and `text_hash` still match; otherwise the tool is
/// re-embedded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheRecord {
    pub qualified_name: String,
    pub mcp_name: String,
    pub local_name: String,
    pub description: String,
    pub input_schema: Value,
    pub embedding_model_id: String,
    pub text_hash: String,
    pub input_schema_hash: String,
    pub vector: Vec<f32>,
    pub last_seen: DateTime<Utc>,
}

/// One k-NN hit.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryHit {
    pub qualified_name: String,
    pub score: f32,
}

/// In-memory array of cache records with cosine k-NN, backed by a journaled
/// snapshot on disk. Readers never block each other; writers hold the lock
/// only for the map mutation, never across disk I/O suspensions.
pub struct VectorIndex {
    records: RwLock<BTreeMap<String, CacheRecord>>,
    store: Option<DiskStore>,
    model_id: String,
}

impl VectorIndex {
    /// Open the on-disk index, loading the snapshot and replaying the journal.
    pub fn open(snapshot: PathBuf, journal: PathBuf, model_id: String) -> Result<Self> {
        let store = DiskStore::open(snapshot, journal);
        let records = store.load()?;
        Ok(Self {
            records: RwLock::new(records),
            store: Some(store),
            model_id,
        })
    }

    /// Volatile index with no persistence, for tests.
    pub fn in_memory(model_id: String) -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
            store: None,
            model_id,
        }
    }

    /// Active embedding model id. Records from other models are invisible to
    /// `query` and reported as stale by `has_current`.
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn len(&self) -> usize {
        self.records.read().expect("index lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replace-by-qualified-name insert, journaled to disk.
    pub fn upsert(&self, record: CacheRecord) -> Result<()> {
        {
            let mut records = self.records.write().expect("index lock poisoned");
            records.insert(record.qualified_name.clone(), record.clone());
        }
        self.journal(JournalEntry::Upsert(record))
    }

    pub fn remove(&self, qualified_name: &str) -> Result<bool> {
        let removed = {
            let mut records = self.records.write().expect("index lock poisoned");
            records.remove(qualified_name).is_some()
        };
        if removed {
            self.journal(JournalEntry::Remove {
                qualified_name: qualified_name.to_string(),
            })?;
        }
        Ok(removed)
    }

    /// Append to the journal; fold into the snapshot when the journal has
    /// outgrown its threshold. The map lock is never held across disk I/O.
    fn journal(&self, entry: JournalEntry) -> Result<()> {
        let Some(store) = self.store.as_ref() else {
            return Ok(());
        };
        if store.append(&entry)? {
            let snapshot = self.records.read().expect("index lock poisoned").clone();
            store.compact(&snapshot)?;
        }
        Ok(())
    }

    /// Drop records of `mcp_name` whose local name is not in `keep`. Used by
    /// the indexer after a fresh `tools/list` so vanished tools stop matching.
    pub fn prune_mcp(&self, mcp_name: &str, keep: &[String]) -> Result<usize> {
        let stale: Vec<String> = {
            let records = self.records.read().expect("index lock poisoned");
            records
                .values()
                .filter(|r| r.mcp_name == mcp_name && !keep.contains(&r.local_name))
                .map(|r| r.qualified_name.clone())
                .collect()
        };
        for name in &stale {
            self.remove(name)?;
        }
        Ok(stale.len())
    }

    pub fn get(&self, qualified_name: &str) -> Option<CacheRecord> {
        self.records
            .read()
            .expect("index lock poisoned")
            .get(qualified_name)
            .cloned()
    }

    /// Whether a record can be reused without re-embedding.
    pub fn has_current(&self, qualified_name: &str, text_hash: &str) -> bool {
        self.records
            .read()
            .expect("index lock poisoned")
            .get(qualified_name)
            .map(|r| r.text_hash == text_hash && r.embedding_model_id == self.model_id)
            .unwrap_or(false)
    }

    /// Top-k records with cosine similarity ≥ threshold, score descending,
    /// ties broken by qualified name ascending for determinism.
    pub fn query(&self, query_vector: &[f32], k: usize, threshold: f32) -> Vec<QueryHit> {
        let records = self.records.read().expect("index lock poisoned");
        let mut hits: Vec<QueryHit> = records
            .values()
            .filter(|r| r.embedding_model_id == self.model_id)
            .filter_map(|r| {
                let score = cosine(query_vector, &r.vector);
                (score >= threshold).then(|| QueryHit {
                    qualified_name: r.qualified_name.clone(),
                    score,
                })
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.qualified_name.cmp(&b.qualified_name))
        });
        hits.truncate(k);
        hits
    }

    /// Every record, ordered by qualified name.
    pub fn all_records(&self) -> Vec<CacheRecord> {
        self.records
            .read()
            .expect("index lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// Names of all MCPs present in the index.
    pub fn mcp_names(&self) -> Vec<String> {
        let records = self.records.read().expect("index lock poisoned");
        let mut names: Vec<String> = records.values().map(|r| r.mcp_name.clone()).collect();
        names.sort();
        names.dedup();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::normalize;
    use serde_json::json;

    const MODEL: &str = "ncp-hash-256/1";

    fn record(name: &str, vector: Vec<f32>) -> CacheRecord {
        let mut vector = vector;
        normalize(&mut vector);
        CacheRecord {
            qualified_name: name.to_string(),
            mcp_name: name.split(':').next().unwrap().to_string(),
            local_name: name.split(':').nth(1).unwrap().to_string(),
            description: format!("tool {name}"),
            input_schema: json!({"type": "object"}),
            embedding_model_id: MODEL.to_string(),
            text_hash: "h".to_string(),
            input_schema_hash: "s".to_string(),
            vector,
            last_seen: Utc::now(),
        }
    }

    #[test]
    fn query_orders_by_score_then_name() {
        let index = VectorIndex::in_memory(MODEL.to_string());
        index.upsert(record("fs:write_file", vec![1.0, 0.0])).unwrap();
        index.upsert(record("fs:read_file", vec![0.8, 0.6])).unwrap();
        // Same vector as write_file: tie broken by name.
        index.upsert(record("fs:append_file", vec![1.0, 0.0])).unwrap();

        let hits = index.query(&[1.0, 0.0], 10, 0.0);
        let names: Vec<&str> = hits.iter().map(|h| h.qualified_name.as_str()).collect();
        assert_eq!(names, vec!["fs:append_file", "fs:write_file", "fs:read_file"]);
    }

    #[test]
    fn threshold_excludes_weak_matches() {
        let index = VectorIndex::in_memory(MODEL.to_string());
        index.upsert(record("fs:write_file", vec![1.0, 0.0])).unwrap();
        index.upsert(record("fs:read_file", vec![0.0, 1.0])).unwrap();

        let hits = index.query(&[1.0, 0.0], 10, 0.4);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].qualified_name, "fs:write_file");
        assert!(hits[0].score > 0.99);
    }

    #[test]
    fn mismatched_model_records_are_invisible() {
        let index = VectorIndex::in_memory(MODEL.to_string());
        let mut stale = record("fs:old_tool", vec![1.0, 0.0]);
        stale.embedding_model_id = "another-model/2".to_string();
        index.upsert(stale).unwrap();

        assert!(index.query(&[1.0, 0.0], 10, 0.0).is_empty());
        assert!(!index.has_current("fs:old_tool", "h"));
    }

    #[test]
    fn has_current_requires_matching_hash() {
        let index = VectorIndex::in_memory(MODEL.to_string());
        index.upsert(record("fs:read_file", vec![1.0, 0.0])).unwrap();
        assert!(index.has_current("fs:read_file", "h"));
        assert!(!index.has_current("fs:read_file", "changed"));
        assert!(!index.has_current("fs:missing", "h"));
    }

    #[test]
    fn persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = dir.path().join("index.snapshot");
        let journal = dir.path().join("index.journal");

        {
            let index =
                VectorIndex::open(snapshot.clone(), journal.clone(), MODEL.to_string()).unwrap();
            index.upsert(record("fs:read_file", vec![1.0, 0.0])).unwrap();
            index.upsert(record("web:fetch", vec![0.0, 1.0])).unwrap();
            index.remove("web:fetch").unwrap();
        }

        let reloaded = VectorIndex::open(snapshot, journal, MODEL.to_string()).unwrap();
        assert_eq!(reloaded.len(), 1);
        let rec = reloaded.get("fs:read_file").unwrap();
        assert_eq!(rec.description, "tool fs:read_file");
        assert_eq!(rec.vector.len(), 2);
    }

    #[test]
    fn prune_drops_vanished_tools_only() {
        let index = VectorIndex::in_memory(MODEL.to_string());
        index.upsert(record("fs:read_file", vec![1.0, 0.0])).unwrap();
        index.upsert(record("fs:write_file", vec![0.0, 1.0])).unwrap();
        index.upsert(record("web:fetch", vec![0.5, 0.5])).unwrap();

        let pruned = index.prune_mcp("fs", &["read_file".to_string()]).unwrap();
        assert_eq!(pruned, 1);
        assert!(index.get("fs:write_file").is_none());
        assert!(index.get("fs:read_file").is_some());
        assert!(index.get("web:fetch").is_some());
    }
}
