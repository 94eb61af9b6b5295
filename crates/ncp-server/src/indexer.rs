// crates/ncp-server/src/indexer.rs
// Background tool indexer (C6): enumerate downstream tools, embed, populate the index

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use chrono::Utc;
use futures::StreamExt;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::embeddings::EmbeddingProvider;
use crate::error::{NcpError, Result};
use crate::index::{CacheRecord, VectorIndex};
use crate::notify::Notifier;
use crate::registry::Registry;
use crate::util::sha256_hex;

/// At most this many downstreams are indexed at a time.
const MAX_CONCURRENT_MCPS: usize = 4;

/// Shared indexing progress, readable by the finder and the health resource.
pub struct IndexProgress {
    total: AtomicUsize,
    indexed: AtomicUsize,
    active: AtomicBool,
    current: std::sync::RwLock<Option<String>>,
}

#[derive(Debug, Clone)]
pub struct ProgressSnapshot {
    pub total: usize,
    pub indexed: usize,
    pub active: bool,
    pub current: Option<String>,
}

impl IndexProgress {
    pub fn new() -> Self {
        Self {
            total: AtomicUsize::new(0),
            indexed: AtomicUsize::new(0),
            active: AtomicBool::new(false),
            current: std::sync::RwLock::new(None),
        }
    }

    /// Whether an indexing run has not yet finished. `find` output carries an
    /// "indexing in progress" prefix while this holds.
    pub fn in_progress(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            total: self.total.load(Ordering::SeqCst),
            indexed: self.indexed.load(Ordering::SeqCst),
            active: self.active.load(Ordering::SeqCst),
            current: self.current.read().expect("progress lock poisoned").clone(),
        }
    }

    fn start(&self) {
        self.active.store(true, Ordering::SeqCst);
        self.total.store(0, Ordering::SeqCst);
        self.indexed.store(0, Ordering::SeqCst);
    }

    fn finish(&self) {
        self.active.store(false, Ordering::SeqCst);
        *self.current.write().expect("progress lock poisoned") = None;
    }

    fn set_current(&self, label: &str) {
        *self.current.write().expect("progress lock poisoned") = Some(label.to_string());
    }
}

impl Default for IndexProgress {
    fn default() -> Self {
        Self::new()
    }
}

/// Indexes every enabled downstream. Holds capabilities, not owners: the
/// session provider (registry), the index, the embedder and a notifier.
pub struct Indexer {
    registry: Arc<Registry>,
    index: Arc<VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    progress: Arc<IndexProgress>,
    notifier: Arc<dyn Notifier>,
}

impl Indexer {
    pub fn new(
        registry: Arc<Registry>,
        index: Arc<VectorIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
        progress: Arc<IndexProgress>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            registry,
            index,
            embedder,
            progress,
            notifier,
        }
    }

    /// Hash gating reuse of a cached embedding: description ∥ qualified name.
    pub fn text_hash(description: &str, qualified_name: &str) -> String {
        sha256_hex(&[description, qualified_name])
    }

    /// Run one full indexing pass. Unreachable MCPs contribute zero tools and
    /// show up in the health snapshot; they never abort the pass.
    pub async fn run(&self) {
        self.progress.start();
        let descriptors = self.registry.profile().enabled_descriptors();
        info!(mcps = descriptors.len(), "Indexing started");

        let results: Vec<(String, Result<usize>)> = futures::stream::iter(descriptors)
            .map(|desc| async move {
                let count = self.index_mcp(&desc.name).await;
                (desc.name, count)
            })
            .buffer_unordered(MAX_CONCURRENT_MCPS)
            .collect()
            .await;

        let mut indexed_mcps = 0usize;
        for (name, result) in results {
            match result {
                Ok(count) => {
                    indexed_mcps += 1;
                    debug!(mcp = %name, tools = count, "Indexed");
                }
                Err(e) => warn!(mcp = %name, error = %e, "Indexing failed, skipping"),
            }
        }

        self.progress.finish();
        info!(
            mcps = indexed_mcps,
            tools = self.index.len(),
            "Indexing finished"
        );
        self.notifier
            .notify("notifications/resources/list_changed", None);
    }

    /// Index one downstream: list its tools, embed what changed, prune what
    /// vanished. A tool is fully upserted before it can appear in `find`.
    async fn index_mcp(&self, mcp_name: &str) -> Result<usize> {
        let tools = self.registry.tools_of(mcp_name).await?;
        self.progress.total.fetch_add(tools.len(), Ordering::SeqCst);

        let mut kept: Vec<String> = Vec::with_capacity(tools.len());
        for tool in &tools {
            let Some(local_name) = tool.get("name").and_then(|n| n.as_str()) else {
                warn!(mcp = %mcp_name, "Tool without a name, skipping");
                continue;
            };
            let qualified = format!("{mcp_name}:{local_name}");
            self.progress.set_current(&qualified);

            let description = tool
                .get("description")
                .and_then(|d| d.as_str())
                .unwrap_or("")
                .to_string();
            let input_schema = tool.get("inputSchema").cloned().unwrap_or(json!({}));

            if let Err(e) = self
                .index_tool(mcp_name, local_name, &qualified, &description, input_schema)
                .await
            {
                // EmbeddingUnavailable: the tool stays absent from search
                // until the next run.
                warn!(tool = %qualified, error = %e, "Skipping tool");
                continue;
            }
            kept.push(local_name.to_string());
            self.progress.indexed.fetch_add(1, Ordering::SeqCst);
        }

        let pruned = self.index.prune_mcp(mcp_name, &kept)?;
        if pruned > 0 {
            debug!(mcp = %mcp_name, pruned, "Pruned vanished tools");
        }
        Ok(kept.len())
    }

    async fn index_tool(
        &self,
        mcp_name: &str,
        local_name: &str,
        qualified: &str,
        description: &str,
        input_schema: Value,
    ) -> Result<()> {
        let text_hash = Self::text_hash(description, qualified);
        if self.index.has_current(qualified, &text_hash) {
            return Ok(());
        }

        // The embedded text carries the qualified name as a context hint so
        // queries naming the tool directly rank it well.
        let embed_text = format!("{description} {qualified}");
        let vector = self
            .embedder
            .embed(&embed_text)
            .await
            .map_err(|e| NcpError::EmbeddingUnavailable(e.to_string()))?;

        let schema_text = serde_json::to_string(&input_schema)?;
        self.index.upsert(CacheRecord {
            qualified_name: qualified.to_string(),
            mcp_name: mcp_name.to_string(),
            local_name: local_name.to_string(),
            description: description.to_string(),
            input_schema,
            embedding_model_id: self.embedder.model_id().to_string(),
            text_hash,
            input_schema_hash: sha256_hex(&[&schema_text]),
            vector,
            last_seen: Utc::now(),
        })
    }
}
