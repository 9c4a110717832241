//! Live session orchestration: session registry, streamed turns, risk
//! escalation tracking.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex, RwLock};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::llm::AnalysisAdapter;
use crate::model::{
    CallerMemory, Coaching, ExtractedMemories, LiveContext, RiskAlert, RiskLevel, Turn,
};
use crate::prompts;
use crate::storage::CallerStore;
use crate::timeline::SessionDiff;

/// Ephemeral state for one active conversation.
///
/// The caller memory is a snapshot taken at session start and is never
/// re-fetched mid-session.
#[derive(Debug)]
pub struct LiveSession {
    pub caller_id: String,
    pub volunteer_name: String,
    pub language: String,
    pub turns: Vec<Turn>,
    pub caller_memory: Option<CallerMemory>,
    pub prev_risk: Option<RiskLevel>,
}

/// Process-lifetime mapping of session id to live session. Entries are
/// inserted on start and removed on end; each session is behind its own
/// mutex so operations on one session serialize.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<Mutex<LiveSession>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, session_id: String, session: LiveSession) {
        self.sessions
            .write()
            .await
            .insert(session_id, Arc::new(Mutex::new(session)));
    }

    pub async fn get(&self, session_id: &str) -> Option<Arc<Mutex<LiveSession>>> {
        self.sessions.read().await.get(session_id).cloned()
    }

    pub async fn remove(&self, session_id: &str) -> Option<Arc<Mutex<LiveSession>>> {
        self.sessions.write().await.remove(session_id)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}

/// Everything the client needs to begin a session
#[derive(Debug, Serialize, Deserialize)]
pub struct StartedSession {
    pub session_id: String,
    pub is_returning: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub briefing: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caller_memory: Option<CallerMemory>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_diff: Option<SessionDiff>,
    pub suggestions: Vec<String>,
}

/// Events emitted over the turn stream, in order: zero or more tokens, one
/// stream_end, one done. An error event terminates the turn instead.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    Token {
        content: String,
    },
    StreamEnd {
        caller_response: String,
    },
    Done {
        caller_response: String,
        live_context: LiveContext,
        coaching: Option<Coaching>,
        risk_alert: Option<RiskAlert>,
        suggestions: Vec<String>,
    },
    Error {
        message: String,
    },
}

/// Alert only when both levels are known ordinals and risk strictly
/// increased. An unknown extraction never fires and never clears history.
pub fn detect_escalation(prev: Option<RiskLevel>, current: RiskLevel) -> Option<RiskAlert> {
    let prev = prev?;
    if prev.is_known() && current.is_known() && current.ordinal() > prev.ordinal() {
        Some(RiskAlert {
            from: prev,
            to: current,
        })
    } else {
        None
    }
}

/// Coordinates live sessions: streamed caller replies, post-turn analysis
/// fan-out, and end-of-session archival.
pub struct Orchestrator {
    store: Arc<dyn CallerStore>,
    llm: Arc<dyn AnalysisAdapter>,
    registry: SessionRegistry,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn CallerStore>, llm: Arc<dyn AnalysisAdapter>) -> Self {
        Self {
            store,
            llm,
            registry: SessionRegistry::new(),
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Begin a session. For a returning caller the briefing and opener
    /// suggestions are requested concurrently and both complete before the
    /// session is considered started; either branch failing degrades to its
    /// default without aborting the other.
    pub async fn start(
        &self,
        caller_id: &str,
        volunteer_name: &str,
        language: &str,
    ) -> Result<StartedSession> {
        let caller_memory = self.store.get(caller_id).await?;

        let (briefing, suggestions, session_diff) = match &caller_memory {
            Some(memory) => {
                let (briefing, openers) = tokio::join!(
                    self.llm.briefing(memory, language),
                    self.llm.opener_suggestions(memory, language),
                );
                let briefing = match briefing {
                    Ok(text) => Some(text),
                    Err(e) => {
                        tracing::warn!(caller_id, error = %e, "briefing generation failed");
                        None
                    }
                };
                let openers = openers.unwrap_or_else(|e| {
                    tracing::warn!(caller_id, error = %e, "opener suggestions failed");
                    Vec::new()
                });
                let diff = self.store.session_diff(caller_id).await?;
                (briefing, openers, diff)
            }
            None => (None, prompts::default_openers(language), None),
        };

        // Last known risk seeds escalation detection for this session
        let prev_risk = session_diff.as_ref().map(|d| d.risk_level);

        let session_id = short_session_id();
        self.registry
            .insert(
                session_id.clone(),
                LiveSession {
                    caller_id: caller_id.to_string(),
                    volunteer_name: volunteer_name.to_string(),
                    language: language.to_string(),
                    turns: Vec::new(),
                    caller_memory: caller_memory.clone(),
                    prev_risk,
                },
            )
            .await;

        tracing::info!(
            caller_id,
            session_id,
            is_returning = caller_memory.is_some(),
            "session started"
        );

        Ok(StartedSession {
            session_id,
            is_returning: caller_memory.is_some(),
            briefing,
            caller_memory,
            session_diff,
            suggestions,
        })
    }

    /// Process one volunteer turn, streaming the caller's reply.
    ///
    /// Ordering guarantees to the consumer: tokens arrive in generation
    /// order; `stream_end` is emitted the moment the reply completes, before
    /// any analysis starts; the three analysis calls then fan out
    /// concurrently and one `done` event carries their joined results. If
    /// the receiver is dropped mid-stream the generation is abandoned and
    /// the partial reply is never committed to the transcript.
    pub async fn send_turn(
        &self,
        session_id: &str,
        volunteer_text: String,
    ) -> Result<mpsc::Receiver<TurnEvent>> {
        let session = self
            .registry
            .get(session_id)
            .await
            .ok_or_else(|| Error::not_found(format!("session {}", session_id)))?;

        let (tx, rx) = mpsc::channel(64);
        let llm = Arc::clone(&self.llm);
        let session_id = session_id.to_string();

        tokio::spawn(async move {
            // Holding the lock for the whole turn serializes operations on
            // this session.
            let mut session = session.lock().await;
            session.turns.push(Turn::volunteer(volunteer_text));

            let mut tokens = llm.caller_reply_stream(
                &session.turns,
                session.caller_memory.as_ref(),
                &session.language,
            );

            let mut caller_response = String::new();
            while let Some(item) = tokens.recv().await {
                match item {
                    Ok(fragment) => {
                        caller_response.push_str(&fragment);
                        if tx.send(TurnEvent::Token { content: fragment }).await.is_err() {
                            tracing::debug!(session_id, "client disconnected mid-stream, turn abandoned");
                            return;
                        }
                    }
                    Err(e) => {
                        // No caller reply means no meaningful training turn
                        tracing::error!(session_id, error = %e, "caller reply generation failed");
                        let _ = tx
                            .send(TurnEvent::Error {
                                message: e.to_string(),
                            })
                            .await;
                        return;
                    }
                }
            }

            // Generation terminated: commit the full reply, then signal the
            // client before any analysis so the volunteer can type again.
            session.turns.push(Turn::caller(caller_response.clone()));
            if tx
                .send(TurnEvent::StreamEnd {
                    caller_response: caller_response.clone(),
                })
                .await
                .is_err()
            {
                return;
            }

            let turns = session.turns.clone();
            let language = session.language.clone();
            let memory = session.caller_memory.clone();

            let (live_context, coaching, suggestions) = tokio::join!(
                async {
                    llm.extract_live_context(&turns, &language)
                        .await
                        .unwrap_or_else(|e| {
                            tracing::warn!(error = %e, "live context extraction failed");
                            LiveContext::fallback()
                        })
                },
                async {
                    llm.score_volunteer(&turns, &language)
                        .await
                        .unwrap_or_else(|e| {
                            tracing::warn!(error = %e, "coaching score failed");
                            None
                        })
                },
                async {
                    llm.reply_suggestions(&turns, memory.as_ref(), &language)
                        .await
                        .unwrap_or_else(|e| {
                            tracing::warn!(error = %e, "reply suggestions failed");
                            Vec::new()
                        })
                },
            );

            let risk_alert = detect_escalation(session.prev_risk, live_context.risk_level);
            if let Some(alert) = &risk_alert {
                tracing::warn!(
                    session_id,
                    from = %alert.from,
                    to = %alert.to,
                    "risk escalation detected"
                );
            }
            if live_context.risk_level.is_known() {
                session.prev_risk = Some(live_context.risk_level);
            }

            let _ = tx
                .send(TurnEvent::Done {
                    caller_response,
                    live_context,
                    coaching,
                    risk_alert,
                    suggestions,
                })
                .await;
        });

        Ok(rx)
    }

    /// End a session: extract memories from the whole transcript, merge and
    /// archive them, then discard the live session.
    pub async fn end(&self, session_id: &str) -> Result<ExtractedMemories> {
        let session = self
            .registry
            .get(session_id)
            .await
            .ok_or_else(|| Error::not_found(format!("session {}", session_id)))?;

        let extracted = {
            let session = session.lock().await;
            let extracted = self
                .llm
                .extract_memories(&session.turns, &session.language)
                .await?;

            self.store
                .merge_and_archive(
                    &session.caller_id,
                    &session.volunteer_name,
                    &session.turns,
                    &extracted,
                )
                .await?;

            tracing::info!(
                session_id,
                caller_id = %session.caller_id,
                risk_level = %extracted.risk_level,
                "session ended and archived"
            );
            extracted
        };

        self.registry.remove(session_id).await;
        Ok(extracted)
    }
}

fn short_session_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}
