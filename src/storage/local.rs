//! Local JSON storage: one directory per caller, one file per memory field,
//! plus an append-only sessions directory.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::{
    CallerMemory, ExtractedMemories, SessionRecord, SessionSnapshot, Situation, Turn,
};
use crate::storage::CallerStore;
use crate::timeline::{self, Timeline};

/// Local JSON-backed caller store
pub struct LocalStore {
    data_dir: PathBuf,
    // Per-caller write exclusion: merge_and_archive and purge for the same
    // caller must not interleave.
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl LocalStore {
    pub fn new(config: &Config) -> Result<Self> {
        config.ensure_dirs()?;
        Ok(Self {
            data_dir: config.data_dir.clone(),
            locks: Mutex::new(HashMap::new()),
        })
    }

    async fn caller_lock(&self, caller_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(caller_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn caller_dir(&self, caller_id: &str) -> Result<PathBuf> {
        if caller_id.is_empty()
            || caller_id.contains('/')
            || caller_id.contains('\\')
            || caller_id.contains("..")
        {
            return Err(Error::invalid_input(format!(
                "invalid caller id: {:?}",
                caller_id
            )));
        }
        Ok(self.data_dir.join(caller_id))
    }

    fn sessions_dir(&self, caller_id: &str) -> Result<PathBuf> {
        Ok(self.caller_dir(caller_id)?.join("sessions"))
    }

    fn read_sessions(&self, caller_id: &str) -> Result<Vec<SessionRecord>> {
        let dir = self.sessions_dir(caller_id)?;
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut files: Vec<PathBuf> = std::fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().map(|e| e == "json").unwrap_or(false))
            .collect();
        // Zero-padded names sort lexicographically in session order
        files.sort();

        let mut sessions = Vec::with_capacity(files.len());
        for path in files {
            sessions.push(read_json(&path)?);
        }
        Ok(sessions)
    }
}

#[async_trait]
impl CallerStore for LocalStore {
    async fn get(&self, caller_id: &str) -> Result<Option<CallerMemory>> {
        let caller_dir = self.caller_dir(caller_id)?;
        if !caller_dir.exists() {
            return Ok(None);
        }

        let memory = CallerMemory {
            triggers: read_json_opt(&caller_dir.join("triggers.json"))?.unwrap_or_default(),
            effective_strategies: read_json_opt(&caller_dir.join("effective_strategies.json"))?
                .unwrap_or_default(),
            safety_plan: read_json_opt(&caller_dir.join("safety_plan.json"))?.unwrap_or_default(),
            warnings: read_json_opt(&caller_dir.join("warnings.json"))?.unwrap_or_default(),
            situation: read_json_opt(&caller_dir.join("situation.json"))?,
            sessions: self.read_sessions(caller_id)?,
            supplementary: None,
        };

        if memory.is_empty() {
            return Ok(None);
        }
        Ok(Some(memory))
    }

    async fn merge_and_archive(
        &self,
        caller_id: &str,
        volunteer_name: &str,
        conversation: &[Turn],
        extracted: &ExtractedMemories,
    ) -> Result<SessionRecord> {
        let lock = self.caller_lock(caller_id).await;
        let _guard = lock.lock().await;

        let caller_dir = self.caller_dir(caller_id)?;
        std::fs::create_dir_all(&caller_dir)?;

        // Stage every field merge before writing anything, so an I/O failure
        // cannot leave a half-computed merge behind.
        let mut staged_lists: Vec<(&str, Vec<String>)> = Vec::new();
        for (name, new_values) in [
            ("triggers", &extracted.triggers),
            ("effective_strategies", &extracted.effective_strategies),
            ("safety_plan", &extracted.safety_plan),
            ("warnings", &extracted.warnings),
        ] {
            if new_values.is_empty() {
                continue;
            }
            let existing: Vec<String> =
                read_json_opt(&caller_dir.join(format!("{}.json", name)))?.unwrap_or_default();
            staged_lists.push((name, merge_lists(existing, new_values)));
        }

        // Situation is shallow-merged key by key: keys the extraction omits
        // keep their stored value, keys it includes are overwritten, so
        // earlier key_events are replaced rather than accumulated here.
        // Historical key_events live in each session's snapshot and surface
        // through timeline diffs.
        let staged_situation: Option<Situation> = match &extracted.situation {
            Some(update) => {
                let existing: Option<Situation> =
                    read_json_opt(&caller_dir.join("situation.json"))?;
                Some(update.apply(existing))
            }
            None => None,
        };

        // Commit field files. Per-field commits are acceptable since fields
        // are independent; the session record comes strictly last.
        for (name, merged) in &staged_lists {
            write_json(&caller_dir.join(format!("{}.json", name)), merged)?;
        }
        if let Some(situation) = &staged_situation {
            write_json(&caller_dir.join("situation.json"), situation)?;
        }

        let sessions_dir = caller_dir.join("sessions");
        std::fs::create_dir_all(&sessions_dir)?;
        let session_count = std::fs::read_dir(&sessions_dir)?
            .filter_map(|entry| entry.ok())
            .filter(|e| {
                e.path()
                    .extension()
                    .map(|ext| ext == "json")
                    .unwrap_or(false)
            })
            .count();

        let record = SessionRecord {
            session_number: session_count as u32 + 1,
            volunteer: volunteer_name.to_string(),
            date: Utc::now(),
            summary: extracted.session_summary.clone(),
            risk_level: extracted.risk_level,
            message_count: conversation.len(),
            conversation: conversation.to_vec(),
            extracted: SessionSnapshot::from(extracted),
        };

        let session_path = sessions_dir.join(format!("session_{:03}.json", record.session_number));
        write_json(&session_path, &record)?;

        tracing::info!(
            caller_id,
            session_number = record.session_number,
            risk_level = %record.risk_level,
            "session archived"
        );

        Ok(record)
    }

    async fn list_callers(&self) -> Result<Vec<String>> {
        if !self.data_dir.exists() {
            return Ok(Vec::new());
        }
        let mut callers = Vec::new();
        for entry in std::fs::read_dir(&self.data_dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                callers.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        callers.sort();
        Ok(callers)
    }

    async fn purge(&self, caller_id: &str) -> Result<()> {
        let caller_dir = self.caller_dir(caller_id)?;
        let lock = self.caller_lock(caller_id).await;
        {
            let _guard = lock.lock().await;
            if caller_dir.exists() {
                std::fs::remove_dir_all(&caller_dir)?;
                tracing::info!(caller_id, "caller purged");
            }
        }
        drop(lock);

        // Drop the lock entry once no concurrent operation holds it, so the
        // map does not grow unboundedly across purged callers.
        let mut locks = self.locks.lock().await;
        if locks
            .get(caller_id)
            .is_some_and(|l| Arc::strong_count(l) == 1)
        {
            locks.remove(caller_id);
        }
        Ok(())
    }

    async fn timeline(&self, caller_id: &str) -> Result<Option<Timeline>> {
        let sessions = self.read_sessions(caller_id)?;
        if sessions.is_empty() {
            return Ok(None);
        }
        Ok(Some(timeline::build(caller_id, &sessions)))
    }
}

/// Union with dedupe by exact equality: existing order kept, unseen new
/// values appended in order.
fn merge_lists(existing: Vec<String>, new_values: &[String]) -> Vec<String> {
    let mut merged = existing;
    for value in new_values {
        if !merged.contains(value) {
            merged.push(value.clone());
        }
    }
    merged
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path)
        .map_err(|e| Error::storage(format!("open {}: {}", path.display(), e)))?;
    serde_json::from_reader(BufReader::new(file))
        .map_err(|e| Error::storage(format!("parse {}: {}", path.display(), e)))
}

fn read_json_opt<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    read_json(path).map(Some)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let file = File::create(path)
        .map_err(|e| Error::storage(format!("create {}: {}", path.display(), e)))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value)?;
    use std::io::Write;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RiskLevel, SituationUpdate};
    use tempfile::TempDir;

    fn store() -> (TempDir, LocalStore) {
        let dir = TempDir::new().unwrap();
        let config = Config::with_data_dir(dir.path());
        let store = LocalStore::new(&config).unwrap();
        (dir, store)
    }

    fn extracted(triggers: &[&str], risk: RiskLevel) -> ExtractedMemories {
        ExtractedMemories {
            triggers: triggers.iter().map(|s| s.to_string()).collect(),
            session_summary: "summary".to_string(),
            risk_level: risk,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn fresh_caller_is_absent() {
        let (_dir, store) = store();
        assert!(store.get("caller-42").await.unwrap().is_none());
        assert!(store.session_diff("caller-42").await.unwrap().is_none());
        assert!(store.timeline("caller-42").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn merge_unions_lists_without_duplicates() {
        let (_dir, store) = store();
        store
            .merge_and_archive("c1", "dana", &[], &extracted(&["B", "C"], RiskLevel::Low))
            .await
            .unwrap();
        store
            .merge_and_archive("c1", "dana", &[], &extracted(&["A", "B"], RiskLevel::Low))
            .await
            .unwrap();

        let memory = store.get("c1").await.unwrap().unwrap();
        let set: std::collections::HashSet<_> = memory.triggers.iter().cloned().collect();
        assert_eq!(memory.triggers.len(), 3);
        assert_eq!(
            set,
            ["A", "B", "C"].iter().map(|s| s.to_string()).collect()
        );
    }

    #[tokio::test]
    async fn session_numbers_are_dense_and_ordered() {
        let (_dir, store) = store();
        for i in 0..4 {
            let record = store
                .merge_and_archive("c1", "dana", &[], &extracted(&[], RiskLevel::Low))
                .await
                .unwrap();
            assert_eq!(record.session_number, i + 1);
        }

        let memory = store.get("c1").await.unwrap().unwrap();
        let numbers: Vec<u32> = memory.sessions.iter().map(|s| s.session_number).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn repeated_get_is_identical() {
        let (_dir, store) = store();
        store
            .merge_and_archive(
                "c1",
                "dana",
                &[Turn::volunteer("hi"), Turn::caller("hey")],
                &extracted(&["X"], RiskLevel::Moderate),
            )
            .await
            .unwrap();

        let first = store.get("c1").await.unwrap().unwrap();
        let second = store.get("c1").await.unwrap().unwrap();
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[tokio::test]
    async fn session_record_snapshots_that_session_only() {
        let (_dir, store) = store();
        store
            .merge_and_archive("c1", "dana", &[], &extracted(&["A"], RiskLevel::Low))
            .await
            .unwrap();
        let record = store
            .merge_and_archive("c1", "dana", &[], &extracted(&["B"], RiskLevel::Low))
            .await
            .unwrap();

        // Snapshot holds only the second session's extraction, merged state
        // holds both
        assert_eq!(record.extracted.triggers, vec!["B"]);
        let memory = store.get("c1").await.unwrap().unwrap();
        assert_eq!(memory.triggers.len(), 2);
    }

    #[tokio::test]
    async fn situation_is_shallow_overwritten() {
        let (_dir, store) = store();

        let mut first = extracted(&[], RiskLevel::Low);
        first.situation = Some(SituationUpdate {
            description: Some("lost job".to_string()),
            key_events: Some(vec!["job loss".to_string()]),
        });
        store
            .merge_and_archive("c1", "dana", &[], &first)
            .await
            .unwrap();

        let mut second = extracted(&[], RiskLevel::Low);
        second.situation = Some(SituationUpdate {
            description: Some("eviction notice".to_string()),
            key_events: Some(vec!["eviction".to_string()]),
        });
        store
            .merge_and_archive("c1", "dana", &[], &second)
            .await
            .unwrap();

        let memory = store.get("c1").await.unwrap().unwrap();
        let situation = memory.situation.unwrap();
        assert_eq!(situation.description, "eviction notice");
        // Earlier key events are not accumulated here; they live in each
        // session's snapshot and in timeline diffs
        assert_eq!(situation.key_events, vec!["eviction"]);
        assert_eq!(
            memory.sessions[0].extracted.situation.as_ref().unwrap().key_events,
            vec!["job loss"]
        );
    }

    #[tokio::test]
    async fn situation_keys_omitted_by_extraction_are_kept() {
        let (_dir, store) = store();

        let mut first = extracted(&[], RiskLevel::Low);
        first.situation = Some(SituationUpdate {
            description: Some("lost job".to_string()),
            key_events: Some(vec!["job loss".to_string()]),
        });
        store
            .merge_and_archive("c1", "dana", &[], &first)
            .await
            .unwrap();

        // Model output carrying only a description, as in
        // {"situation": {"description": "eviction notice"}}
        let mut second = extracted(&[], RiskLevel::Low);
        second.situation = Some(SituationUpdate {
            description: Some("eviction notice".to_string()),
            key_events: None,
        });
        store
            .merge_and_archive("c1", "dana", &[], &second)
            .await
            .unwrap();

        let situation = store.get("c1").await.unwrap().unwrap().situation.unwrap();
        assert_eq!(situation.description, "eviction notice");
        assert_eq!(situation.key_events, vec!["job loss"]);
    }

    #[tokio::test]
    async fn empty_fields_are_not_stored() {
        let (_dir, store) = store();
        store
            .merge_and_archive("c1", "dana", &[], &extracted(&[], RiskLevel::Unknown))
            .await
            .unwrap();

        let memory = store.get("c1").await.unwrap().unwrap();
        assert!(memory.triggers.is_empty());
        assert_eq!(memory.sessions.len(), 1);
    }

    #[tokio::test]
    async fn session_diff_reports_latest_session() {
        let (_dir, store) = store();
        store
            .merge_and_archive("c1", "dana", &[], &extracted(&["X"], RiskLevel::Moderate))
            .await
            .unwrap();

        let diff = store.session_diff("c1").await.unwrap().unwrap();
        assert_eq!(diff.session_count, 1);
        assert_eq!(diff.risk_level, RiskLevel::Moderate);
        assert_eq!(diff.new_info, vec!["X"]);
    }

    #[tokio::test]
    async fn timeline_flags_escalation() {
        let (_dir, store) = store();
        store
            .merge_and_archive("c1", "dana", &[], &extracted(&[], RiskLevel::Moderate))
            .await
            .unwrap();
        store
            .merge_and_archive("c1", "lee", &[], &extracted(&[], RiskLevel::High))
            .await
            .unwrap();

        let timeline = store.timeline("c1").await.unwrap().unwrap();
        assert_eq!(
            timeline.sessions[1].escalations,
            vec!["Risk moderate → high"]
        );
    }

    #[tokio::test]
    async fn purge_removes_everything() {
        let (_dir, store) = store();
        store
            .merge_and_archive("c1", "dana", &[], &extracted(&["X"], RiskLevel::Low))
            .await
            .unwrap();
        assert!(store.get("c1").await.unwrap().is_some());

        store.purge("c1").await.unwrap();
        assert!(store.get("c1").await.unwrap().is_none());
        assert!(store.list_callers().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn purge_releases_caller_lock_entry() {
        let (_dir, store) = store();
        store
            .merge_and_archive("c1", "dana", &[], &extracted(&["X"], RiskLevel::Low))
            .await
            .unwrap();
        store.purge("c1").await.unwrap();
        assert!(!store.locks.lock().await.contains_key("c1"));

        // The caller can come back cleanly afterwards
        store
            .merge_and_archive("c1", "dana", &[], &extracted(&["Y"], RiskLevel::Low))
            .await
            .unwrap();
        assert!(store.get("c1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn list_callers_enumerates_partitions() {
        let (_dir, store) = store();
        store
            .merge_and_archive("alpha", "dana", &[], &extracted(&[], RiskLevel::Low))
            .await
            .unwrap();
        store
            .merge_and_archive("beta", "dana", &[], &extracted(&[], RiskLevel::Low))
            .await
            .unwrap();

        assert_eq!(store.list_callers().await.unwrap(), vec!["alpha", "beta"]);
    }

    #[tokio::test]
    async fn path_traversal_caller_ids_rejected() {
        let (_dir, store) = store();
        assert!(store.get("../evil").await.is_err());
        assert!(store.purge("a/b").await.is_err());
    }
}
