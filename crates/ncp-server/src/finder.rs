// crates/ncp-server/src/finder.rs
// Semantic discovery (C7): translate a query into a ranked tool list

use std::sync::Arc;

use serde_json::Value;

use crate::config::ProfileStore;
use crate::embeddings::EmbeddingProvider;
use crate::error::Result;
use crate::index::VectorIndex;
use crate::indexer::IndexProgress;

/// Extra candidates fetched beyond `limit × page` so late pages stay stable
/// under score ties.
const SEARCH_HEADROOM: usize = 16;

pub const DEFAULT_SEARCH_LIMIT: usize = 5;
pub const DEFAULT_LISTING_LIMIT: usize = 20;
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.35;
pub const DEFAULT_DEPTH: u8 = 2;

#[derive(Debug, Clone)]
pub struct FindRequest {
    pub query: Option<String>,
    pub page: usize,
    pub limit: Option<usize>,
    pub depth: u8,
    pub confidence_threshold: f32,
    pub mcp_filter: Option<String>,
}

impl Default for FindRequest {
    fn default() -> Self {
        Self {
            query: None,
            page: 1,
            limit: None,
            depth: DEFAULT_DEPTH,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            mcp_filter: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FindEntry {
    pub qualified_name: String,
    pub description: String,
    pub input_schema: Value,
    pub score: f32,
}

#[derive(Debug, Clone)]
pub struct FindResponse {
    pub entries: Vec<FindEntry>,
    /// Candidates before pagination.
    pub total: usize,
    pub page: usize,
    pub limit: usize,
    pub depth: u8,
    /// Listing mode hides confidence in the rendered output.
    pub listing: bool,
    pub indexing_in_progress: bool,
}

/// Discovery over the vector index. Holds the index, the embedder, the
/// indexing progress and the profile (for known MCP names) as capabilities.
pub struct Finder {
    index: Arc<VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    progress: Arc<IndexProgress>,
    profile: Arc<ProfileStore>,
}

impl Finder {
    pub fn new(
        index: Arc<VectorIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
        progress: Arc<IndexProgress>,
        profile: Arc<ProfileStore>,
    ) -> Self {
        Self {
            index,
            embedder,
            progress,
            profile,
        }
    }

    pub async fn find(&self, request: FindRequest) -> Result<FindResponse> {
        let page = request.page.max(1);

        match request.query.as_deref().map(str::trim) {
            None | Some("") => self.listing(request.mcp_filter.as_deref(), page, &request),
            Some(query) => {
                // A query naming a known MCP degenerates to a listing of it.
                if let Some(mcp) = self.known_mcp(query) {
                    return self.listing(Some(&mcp), page, &request);
                }
                self.search(query, page, &request).await
            }
        }
    }

    fn known_mcp(&self, query: &str) -> Option<String> {
        self.profile
            .mcp_names()
            .into_iter()
            .chain(self.index.mcp_names())
            .find(|name| name.eq_ignore_ascii_case(query))
    }

    /// Deterministic ordering of all indexed tools: mcp name ascending, then
    /// local name ascending. Confidence is 1.0 but hidden when rendered.
    fn listing(
        &self,
        mcp_filter: Option<&str>,
        page: usize,
        request: &FindRequest,
    ) -> Result<FindResponse> {
        let limit = request.limit.unwrap_or(DEFAULT_LISTING_LIMIT).max(1);

        let mut records = self.index.all_records();
        if let Some(filter) = mcp_filter {
            records.retain(|r| {
                r.mcp_name.eq_ignore_ascii_case(filter)
                    || r.mcp_name.to_lowercase().starts_with(&filter.to_lowercase())
            });
        }
        records.sort_by(|a, b| {
            a.mcp_name
                .cmp(&b.mcp_name)
                .then_with(|| a.local_name.cmp(&b.local_name))
        });

        let total = records.len();
        let entries = records
            .into_iter()
            .skip((page - 1) * limit)
            .take(limit)
            .map(|r| FindEntry {
                qualified_name: r.qualified_name,
                description: r.description,
                input_schema: r.input_schema,
                score: 1.0,
            })
            .collect();

        Ok(FindResponse {
            entries,
            total,
            page,
            limit,
            depth: request.depth,
            listing: true,
            indexing_in_progress: self.progress.in_progress(),
        })
    }

    async fn search(&self, query: &str, page: usize, request: &FindRequest) -> Result<FindResponse> {
        let limit = request.limit.unwrap_or(DEFAULT_SEARCH_LIMIT).max(1);
        let query_vector = self.embedder.embed(query).await?;

        let k = limit * page + SEARCH_HEADROOM;
        let hits = self
            .index
            .query(&query_vector, k, request.confidence_threshold);
        let total = hits.len();

        // Pagination applies after ranking; depth never changes the
        // candidate set.
        let entries = hits
            .into_iter()
            .skip((page - 1) * limit)
            .take(limit)
            .filter_map(|hit| {
                self.index.get(&hit.qualified_name).map(|r| FindEntry {
                    qualified_name: r.qualified_name,
                    description: r.description,
                    input_schema: r.input_schema,
                    score: hit.score,
                })
            })
            .collect();

        Ok(FindResponse {
            entries,
            total,
            page,
            limit,
            depth: request.depth,
            listing: false,
            indexing_in_progress: self.progress.in_progress(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::HashingEmbeddings;
    use crate::index::CacheRecord;
    use chrono::Utc;
    use serde_json::json;

    async fn seeded_finder() -> (tempfile::TempDir, Finder) {
        let dir = tempfile::tempdir().unwrap();
        let profile =
            Arc::new(ProfileStore::load(dir.path().join("all.json"), "all").unwrap());
        let embedder = Arc::new(HashingEmbeddings::default());
        let index = Arc::new(VectorIndex::in_memory(embedder.model_id().to_string()));

        for (qualified, description) in [
            ("beta:farewell", "Say goodbye politely"),
            ("alpha:greet", "Say hello to someone"),
            ("fs:write_file", "Write content into a file on disk"),
            ("fs:read_file", "Read a file from disk"),
        ] {
            let (mcp, local) = qualified.split_once(':').unwrap();
            let vector = embedder
                .embed(&format!("{description} {qualified}"))
                .await
                .unwrap();
            index
                .upsert(CacheRecord {
                    qualified_name: qualified.to_string(),
                    mcp_name: mcp.to_string(),
                    local_name: local.to_string(),
                    description: description.to_string(),
                    input_schema: json!({"type": "object"}),
                    embedding_model_id: embedder.model_id().to_string(),
                    text_hash: "h".to_string(),
                    input_schema_hash: "s".to_string(),
                    vector,
                    last_seen: Utc::now(),
                })
                .unwrap();
        }

        let finder = Finder::new(
            index,
            embedder,
            Arc::new(IndexProgress::new()),
            profile,
        );
        (dir, finder)
    }

    #[tokio::test]
    async fn listing_is_lexicographic_by_mcp_then_tool() {
        let (_dir, finder) = seeded_finder().await;
        let response = finder.find(FindRequest::default()).await.unwrap();

        assert!(response.listing);
        let names: Vec<&str> = response
            .entries
            .iter()
            .map(|e| e.qualified_name.as_str())
            .collect();
        assert_eq!(
            names,
            vec!["alpha:greet", "beta:farewell", "fs:read_file", "fs:write_file"]
        );
        assert_eq!(response.total, 4);
    }

    #[tokio::test]
    async fn mcp_filter_restricts_listing() {
        let (_dir, finder) = seeded_finder().await;
        let response = finder
            .find(FindRequest {
                mcp_filter: Some("fs".to_string()),
                ..FindRequest::default()
            })
            .await
            .unwrap();
        assert_eq!(response.entries.len(), 2);
        assert!(response.entries.iter().all(|e| e.qualified_name.starts_with("fs:")));
    }

    #[tokio::test]
    async fn query_matching_mcp_name_degenerates_to_listing() {
        let (_dir, finder) = seeded_finder().await;
        let response = finder
            .find(FindRequest {
                query: Some("FS".to_string()),
                ..FindRequest::default()
            })
            .await
            .unwrap();
        assert!(response.listing);
        assert_eq!(response.entries.len(), 2);
        assert_eq!(response.entries[0].qualified_name, "fs:read_file");
    }

    #[tokio::test]
    async fn search_ranks_relevant_tool_first() {
        let (_dir, finder) = seeded_finder().await;
        let response = finder
            .find(FindRequest {
                query: Some("write a file".to_string()),
                confidence_threshold: 0.1,
                ..FindRequest::default()
            })
            .await
            .unwrap();
        assert!(!response.listing);
        assert!(!response.entries.is_empty());
        assert_eq!(response.entries[0].qualified_name, "fs:write_file");
        assert!(response.entries[0].score > 0.1);
    }

    #[tokio::test]
    async fn high_threshold_filters_everything() {
        let (_dir, finder) = seeded_finder().await;
        let response = finder
            .find(FindRequest {
                query: Some("launch a rocket into orbit".to_string()),
                confidence_threshold: 0.95,
                ..FindRequest::default()
            })
            .await
            .unwrap();
        assert!(response.entries.is_empty());
    }

    #[tokio::test]
    async fn pagination_applies_after_ranking() {
        let (_dir, finder) = seeded_finder().await;
        let page1 = finder
            .find(FindRequest {
                limit: Some(2),
                ..FindRequest::default()
            })
            .await
            .unwrap();
        let page2 = finder
            .find(FindRequest {
                limit: Some(2),
                page: 2,
                ..FindRequest::default()
            })
            .await
            .unwrap();
        assert_eq!(page1.entries.len(), 2);
        assert_eq!(page2.entries.len(), 2);
        assert_ne!(
            page1.entries[0].qualified_name,
            page2.entries[0].qualified_name
        );
    }
}
