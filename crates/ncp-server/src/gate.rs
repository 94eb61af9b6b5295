// crates/ncp-server/src/gate.rs
// Confirmation gate (C8): score a tool against the modifier pattern before running it

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

use crate::config::SettingsStore;
use crate::embeddings::EmbeddingProvider;
use crate::error::{ConfirmationDetails, NcpError, Result};
use crate::util::cosine;

/// Longest parameter preview embedded in a confirmation message.
const PREVIEW_MAX_CHARS: usize = 200;

#[derive(Debug)]
pub enum GateDecision {
    Allowed,
    Confirm(ConfirmationDetails),
}

/// What the upstream answered when re-calling `run` after -32001.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserResponse {
    Yes,
    Always,
    No,
}

impl UserResponse {
    pub fn parse(raw: Option<&str>) -> Option<Self> {
        match raw?.trim().to_lowercase().as_str() {
            "yes" => Some(UserResponse::Yes),
            "always" => Some(UserResponse::Always),
            "no" => Some(UserResponse::No),
            _ => None,
        }
    }
}

/// Decides whether a `run` needs user consent. Holds the settings store and
/// the embedder as capabilities; the modifier-pattern vector is cached per
/// pattern text.
pub struct ConfirmationGate {
    settings: Arc<SettingsStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    pattern_cache: RwLock<Option<(String, Vec<f32>)>>,
}

impl ConfirmationGate {
    pub fn new(settings: Arc<SettingsStore>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            settings,
            embedder,
            pattern_cache: RwLock::new(None),
        }
    }

    /// Score the target tool against the modifier pattern. Whitelisted tools
    /// and a disabled gate pass straight through.
    pub async fn check(
        &self,
        tool_id: &str,
        description: &str,
        parameters: &Value,
    ) -> Result<GateDecision> {
        let config = self.settings.confirm_before_run();
        if !config.enabled || self.settings.is_whitelisted(tool_id) {
            return Ok(GateDecision::Allowed);
        }

        let pattern_vector = self.pattern_vector(&config.modifier_pattern).await?;
        let tool_vector = self
            .embedder
            .embed(&format!("{tool_id} {description}"))
            .await?;
        let similarity = cosine(&pattern_vector, &tool_vector);
        debug!(tool = %tool_id, similarity, threshold = config.vector_threshold, "Gate check");

        if similarity >= config.vector_threshold {
            let mut preview = parameters.to_string();
            if preview.len() > PREVIEW_MAX_CHARS {
                let mut end = PREVIEW_MAX_CHARS;
                while !preview.is_char_boundary(end) {
                    end -= 1;
                }
                preview.truncate(end);
                preview.push('…');
            }
            return Ok(GateDecision::Confirm(ConfirmationDetails {
                tool: tool_id.to_string(),
                description: description.to_string(),
                parameters_preview: preview,
                pattern: config.modifier_pattern.clone(),
                confidence: similarity,
            }));
        }
        Ok(GateDecision::Allowed)
    }

    /// Apply a `_userResponse` answer. "always" persists the whitelist before
    /// returning, so execution only proceeds once the grant is durable.
    pub fn apply_user_response(&self, tool_id: &str, response: UserResponse) -> Result<()> {
        match response {
            UserResponse::Yes => Ok(()),
            UserResponse::Always => {
                self.settings.add_to_whitelist(tool_id)?;
                Ok(())
            }
            UserResponse::No => Err(NcpError::OperationCancelled),
        }
    }

    async fn pattern_vector(&self, pattern: &str) -> Result<Vec<f32>> {
        if let Some((cached_pattern, vector)) = self.pattern_cache.read().await.as_ref()
            && cached_pattern == pattern
        {
            return Ok(vector.clone());
        }
        let vector = self.embedder.embed(pattern).await?;
        *self.pattern_cache.write().await = Some((pattern.to_string(), vector.clone()));
        Ok(vector)
    }
}
