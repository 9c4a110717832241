//! Semantic enrichment decorator: wraps another store and threads a
//! best-effort free-text supplement from an external retrieval service.
//!
//! The local store stays the source of truth. Every semantic call is
//! bounded by a timeout and every failure degrades to "no supplement";
//! nothing in this module ever surfaces an error to its caller.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::SemanticConfig;
use crate::error::Result;
use crate::model::{CallerMemory, ExtractedMemories, SessionRecord, Speaker, Turn};
use crate::storage::CallerStore;
use crate::timeline::Timeline;

/// Agent id reported to the retrieval service for read queries
const RETRIEVE_AGENT_ID: &str = "crisis-memory-bridge";

/// HTTP client for the external retrieval service
#[derive(Clone)]
pub struct SemanticClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl SemanticClient {
    pub fn new(config: &SemanticConfig) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    /// Query the service for a natural-language summary about a caller.
    /// None on any failure.
    pub async fn retrieve_summary(&self, caller_id: &str) -> Option<String> {
        let query = format!(
            "Get all known information about caller {}: triggers, effective strategies, \
             safety plan, warnings, situation, emotional patterns, and anything else \
             relevant for a counselor.",
            caller_id
        );

        let response = self
            .http
            .post(format!("{}/api/v3/memory/retrieve", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&json!({
                "user_id": caller_id,
                "agent_id": RETRIEVE_AGENT_ID,
                "query": query,
            }))
            .send()
            .await;

        let response = match response {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                tracing::warn!(caller_id, status = %r.status(), "semantic retrieval rejected");
                return None;
            }
            Err(e) => {
                tracing::warn!(caller_id, error = %e, "semantic retrieval failed");
                return None;
            }
        };

        match response.json::<Value>().await {
            Ok(data) => format_summary(&data),
            Err(e) => {
                tracing::warn!(caller_id, error = %e, "semantic response unreadable");
                None
            }
        }
    }

    /// Feed a raw conversation to the service. Failures are logged and
    /// swallowed.
    pub async fn memorize(&self, caller_id: &str, volunteer_name: &str, conversation: &[Turn]) {
        let formatted: Vec<Value> = conversation
            .iter()
            .map(|turn| {
                let role = match turn.speaker {
                    Speaker::Caller => "user",
                    Speaker::Volunteer => "assistant",
                };
                json!({"role": role, "content": turn.text})
            })
            .collect();

        let result = self
            .http
            .post(format!("{}/api/v3/memory/memorize", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&json!({
                "user_id": caller_id,
                "agent_id": format!("volunteer_{}", volunteer_name),
                "conversation": formatted,
            }))
            .send()
            .await;

        match result {
            Ok(r) if r.status().is_success() => {
                let task = r
                    .json::<Value>()
                    .await
                    .ok()
                    .and_then(|v| v["task_id"].as_str().map(|s| s.to_string()))
                    .unwrap_or_else(|| "unknown".to_string());
                tracing::debug!(caller_id, task_id = %task, "semantic memorize accepted");
            }
            Ok(r) => {
                tracing::warn!(caller_id, status = %r.status(), "semantic memorize rejected, structured data saved locally");
            }
            Err(e) => {
                tracing::warn!(caller_id, error = %e, "semantic memorize failed, structured data saved locally");
            }
        }
    }
}

/// Flatten the retrieval response into readable context for prompts.
/// None when nothing usable is present.
fn format_summary(data: &Value) -> Option<String> {
    let mut parts = Vec::new();

    if let Some(items) = data["items"].as_array() {
        let facts: Vec<&str> = items
            .iter()
            .filter_map(|item| item["content"].as_str())
            .filter(|s| !s.is_empty())
            .collect();
        if !facts.is_empty() {
            parts.push(format!("Key facts: {}", facts.join("; ")));
        }
    }

    if let Some(categories) = data["categories"].as_array() {
        for category in categories {
            if let Some(summary) = category["summary"].as_str() {
                if !summary.is_empty() {
                    parts.push(summary.to_string());
                }
            }
        }
    }

    if let Some(resources) = data["resources"].as_array() {
        for resource in resources {
            if let Some(caption) = resource["caption"].as_str() {
                if !caption.is_empty() {
                    parts.push(format!("Session note: {}", caption));
                }
            }
        }
    }

    if parts.is_empty() {
        None
    } else {
        Some(parts.join("\n"))
    }
}

/// Decorator adding semantic enrichment to any [`CallerStore`]
pub struct SemanticStore {
    inner: Arc<dyn CallerStore>,
    client: SemanticClient,
}

impl SemanticStore {
    pub fn new(inner: Arc<dyn CallerStore>, config: &SemanticConfig) -> Result<Self> {
        Ok(Self {
            inner,
            client: SemanticClient::new(config)?,
        })
    }
}

#[async_trait]
impl CallerStore for SemanticStore {
    async fn get(&self, caller_id: &str) -> Result<Option<CallerMemory>> {
        let memory = self.inner.get(caller_id).await?;
        match memory {
            Some(mut memory) => {
                memory.supplementary = self.client.retrieve_summary(caller_id).await;
                Ok(Some(memory))
            }
            None => Ok(None),
        }
    }

    async fn merge_and_archive(
        &self,
        caller_id: &str,
        volunteer_name: &str,
        conversation: &[Turn],
        extracted: &ExtractedMemories,
    ) -> Result<SessionRecord> {
        // Local write first; its failure is the only one that matters
        let record = self
            .inner
            .merge_and_archive(caller_id, volunteer_name, conversation, extracted)
            .await?;

        // Fire-and-forget: the semantic layer may lag or be absent entirely
        let client = self.client.clone();
        let caller_id = caller_id.to_string();
        let volunteer_name = volunteer_name.to_string();
        let conversation = conversation.to_vec();
        tokio::spawn(async move {
            client
                .memorize(&caller_id, &volunteer_name, &conversation)
                .await;
        });

        Ok(record)
    }

    async fn list_callers(&self) -> Result<Vec<String>> {
        self.inner.list_callers().await
    }

    async fn purge(&self, caller_id: &str) -> Result<()> {
        self.inner.purge(caller_id).await
    }

    async fn timeline(&self, caller_id: &str) -> Result<Option<Timeline>> {
        self.inner.timeline(caller_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn format_summary_collects_all_sections() {
        let data = json!({
            "items": [
                {"content": "Dog named Max"},
                {"content": ""},
                {"content": "Recently evicted"}
            ],
            "categories": [{"summary": "Caller struggles with sleep"}],
            "resources": [{"caption": "First call, guarded"}]
        });

        let summary = format_summary(&data).unwrap();
        assert!(summary.contains("Key facts: Dog named Max; Recently evicted"));
        assert!(summary.contains("Caller struggles with sleep"));
        assert!(summary.contains("Session note: First call, guarded"));
    }

    #[test]
    fn format_summary_empty_response_is_none() {
        assert!(format_summary(&json!({})).is_none());
        assert!(format_summary(&json!({"items": [], "categories": []})).is_none());
    }
}
