//! Storage backends for caller memory

pub mod local;
pub mod semantic;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::Config;
use crate::error::Result;
use crate::model::{CallerMemory, ExtractedMemories, SessionRecord, Turn};
use crate::timeline::{self, SessionDiff, Timeline};

pub use local::LocalStore;
pub use semantic::SemanticStore;

/// Capability interface for caller memory storage.
///
/// One interface, two concrete implementations: the local JSON store and a
/// decorator that adds semantic enrichment on top of it. Selected once at
/// startup by configuration.
#[async_trait]
pub trait CallerStore: Send + Sync {
    /// Read the merged memory view for a caller. None for a first-time
    /// caller with nothing stored.
    async fn get(&self, caller_id: &str) -> Result<Option<CallerMemory>>;

    /// Merge extracted fields into stored state and append a session record.
    /// Called exactly once at session end.
    async fn merge_and_archive(
        &self,
        caller_id: &str,
        volunteer_name: &str,
        conversation: &[Turn],
        extracted: &ExtractedMemories,
    ) -> Result<SessionRecord>;

    /// All callers with any stored data
    async fn list_callers(&self) -> Result<Vec<String>>;

    /// Irreversibly delete everything stored for one caller
    async fn purge(&self, caller_id: &str) -> Result<()>;

    /// Derived chronological view of a caller's sessions, or None when no
    /// sessions exist
    async fn timeline(&self, caller_id: &str) -> Result<Option<Timeline>>;

    /// Diff fields of the most recent session plus a running session count
    async fn session_diff(&self, caller_id: &str) -> Result<Option<SessionDiff>> {
        let timeline = self.timeline(caller_id).await?;
        Ok(timeline.as_ref().and_then(timeline::latest_diff))
    }
}

/// Build the store the configuration asks for: semantic-enriched when the
/// semantic layer is configured, plain local otherwise.
pub fn create_store(config: &Config) -> Result<Arc<dyn CallerStore>> {
    let local = LocalStore::new(config)?;
    match &config.semantic {
        Some(semantic_config) => {
            tracing::info!(base_url = %semantic_config.base_url, "semantic layer enabled");
            Ok(Arc::new(SemanticStore::new(Arc::new(local), semantic_config)?))
        }
        None => {
            tracing::info!("semantic layer not configured, running local-only");
            Ok(Arc::new(local))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ExtractedMemories, RiskLevel};
    use tempfile::TempDir;

    #[tokio::test]
    async fn local_only_store_never_attaches_supplement() {
        let dir = TempDir::new().unwrap();
        let config = Config::with_data_dir(dir.path());
        assert!(config.semantic.is_none());

        let store = create_store(&config).unwrap();
        store
            .merge_and_archive(
                "c1",
                "dana",
                &[],
                &ExtractedMemories {
                    triggers: vec!["X".to_string()],
                    session_summary: "summary".to_string(),
                    risk_level: RiskLevel::Low,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let memory = store.get("c1").await.unwrap().unwrap();
        assert!(memory.supplementary.is_none());
        assert_eq!(memory.triggers, vec!["X"]);
    }
}
