//! Analysis Extraction Adapter: boundary to the external generation model.
//!
//! All structured calls are parsed defensively — the model's output is never
//! trusted to be well-formed JSON. Parse failures degrade to component
//! defaults; transport failures surface as errors and are isolated by the
//! caller where the turn can still proceed without them.

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::{
    CallerMemory, Coaching, ExtractedMemories, LiveContext, RiskLevel, Speaker, Turn,
};
use crate::prompts;

/// Thin interface to the external generative model.
///
/// The orchestrator depends on this rather than on a concrete client so a
/// scripted adapter can stand in during tests.
#[async_trait]
pub trait AnalysisAdapter: Send + Sync {
    /// Stream the simulated caller's next reply as text fragments.
    ///
    /// The channel closes when generation terminates; dropping the receiver
    /// cancels the in-flight call. Transport errors arrive as an `Err` item
    /// and are fatal to the turn.
    fn caller_reply_stream(
        &self,
        conversation: &[Turn],
        caller_memory: Option<&CallerMemory>,
        language: &str,
    ) -> mpsc::Receiver<Result<String>>;

    /// Extract live clinical context from the conversation so far.
    /// Unparseable output degrades to [`LiveContext::fallback`].
    async fn extract_live_context(&self, conversation: &[Turn], language: &str)
        -> Result<LiveContext>;

    /// End-of-session extraction over the whole transcript
    async fn extract_memories(
        &self,
        conversation: &[Turn],
        language: &str,
    ) -> Result<ExtractedMemories>;

    /// Score the volunteer's latest message. None when the conversation is
    /// too short or the output is unusable.
    async fn score_volunteer(
        &self,
        conversation: &[Turn],
        language: &str,
    ) -> Result<Option<Coaching>>;

    /// Suggest 2-3 short replies the volunteer could say next
    async fn reply_suggestions(
        &self,
        conversation: &[Turn],
        caller_memory: Option<&CallerMemory>,
        language: &str,
    ) -> Result<Vec<String>>;

    /// Suggest context-aware opening lines for a returning caller
    async fn opener_suggestions(
        &self,
        caller_memory: &CallerMemory,
        language: &str,
    ) -> Result<Vec<String>>;

    /// Plain-text briefing for a volunteer taking a returning caller
    async fn briefing(&self, caller_memory: &CallerMemory, language: &str) -> Result<String>;
}

/// Client for the Anthropic-style messages API
pub struct LlmClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl LlmClient {
    pub fn new(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.model_timeout)
            .build()?;

        Ok(Self {
            http,
            base_url: config.model_base_url.trim_end_matches('/').to_string(),
            api_key: config.model_api_key.clone(),
            model: config.model_name.clone(),
        })
    }

    /// One non-streaming completion. Returns the first text block.
    async fn chat(
        &self,
        system: &str,
        messages: Vec<Value>,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String> {
        let body = json!({
            "model": self.model,
            "max_tokens": max_tokens,
            "temperature": temperature,
            "system": system,
            "messages": messages,
        });

        let response = self
            .http
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let payload: Value = response.json().await?;
        if !status.is_success() {
            return Err(Error::upstream(format!(
                "model call failed ({}): {}",
                status,
                payload["error"]["message"].as_str().unwrap_or("unknown")
            )));
        }

        payload["content"][0]["text"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| Error::upstream("model response had no text content"))
    }
}

#[async_trait]
impl AnalysisAdapter for LlmClient {
    fn caller_reply_stream(
        &self,
        conversation: &[Turn],
        caller_memory: Option<&CallerMemory>,
        language: &str,
    ) -> mpsc::Receiver<Result<String>> {
        let (tx, rx) = mpsc::channel(64);

        let mut system = roleplay_system(caller_memory);
        system.push_str(prompts::roleplay_language(language));

        let body = json!({
            "model": self.model,
            "max_tokens": 500,
            "temperature": 0.7,
            "system": system,
            "messages": role_messages(conversation),
            "stream": true,
        });

        let request = self
            .http
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body);

        tokio::spawn(async move {
            let response = match request.send().await {
                Ok(r) if r.status().is_success() => r,
                Ok(r) => {
                    let _ = tx
                        .send(Err(Error::upstream(format!(
                            "stream request failed ({})",
                            r.status()
                        ))))
                        .await;
                    return;
                }
                Err(e) => {
                    let _ = tx.send(Err(e.into())).await;
                    return;
                }
            };

            let mut stream = response.bytes_stream();
            let mut buffer = String::new();

            while let Some(chunk) = stream.next().await {
                let bytes = match chunk {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx.send(Err(e.into())).await;
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&bytes));

                // SSE events are separated by blank lines
                while let Some(pos) = buffer.find("\n\n") {
                    let event: String = buffer.drain(..pos + 2).collect();
                    for text in parse_sse_deltas(&event) {
                        if tx.send(Ok(text)).await.is_err() {
                            // Receiver dropped: client disconnected, abandon
                            return;
                        }
                    }
                }
            }
        });

        rx
    }

    async fn extract_live_context(
        &self,
        conversation: &[Turn],
        language: &str,
    ) -> Result<LiveContext> {
        let prompt = prompts::live_context_prompt(&transcript_text(conversation), language);
        let raw = self
            .chat(
                prompts::LIVE_CONTEXT_SYSTEM,
                vec![json!({"role": "user", "content": prompt})],
                0.2,
                1500,
            )
            .await?;

        Ok(extract_json(&raw)
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_else(LiveContext::fallback))
    }

    /// When the output is not valid JSON, the raw text is kept as the
    /// session summary with risk unknown, so the session is still archived.
    async fn extract_memories(
        &self,
        conversation: &[Turn],
        language: &str,
    ) -> Result<ExtractedMemories> {
        let prompt = prompts::extraction_prompt(&transcript_text(conversation), language);
        let raw = self
            .chat(
                prompts::EXTRACTION_SYSTEM,
                vec![json!({"role": "user", "content": prompt})],
                0.2,
                2000,
            )
            .await?;

        Ok(extract_json(&raw)
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_else(|| ExtractedMemories {
                session_summary: raw,
                risk_level: RiskLevel::Unknown,
                ..Default::default()
            }))
    }

    async fn score_volunteer(
        &self,
        conversation: &[Turn],
        language: &str,
    ) -> Result<Option<Coaching>> {
        if conversation.len() < 2 {
            return Ok(None);
        }

        let prompt = prompts::coaching_prompt(&transcript_text(conversation), language);
        let raw = self
            .chat(
                prompts::COACHING_SYSTEM,
                vec![json!({"role": "user", "content": prompt})],
                0.2,
                300,
            )
            .await?;

        Ok(extract_json(&raw).and_then(|v| serde_json::from_value(v).ok()))
    }

    async fn reply_suggestions(
        &self,
        conversation: &[Turn],
        caller_memory: Option<&CallerMemory>,
        language: &str,
    ) -> Result<Vec<String>> {
        if conversation.is_empty() {
            return Ok(Vec::new());
        }

        let mut memory_hint = String::new();
        if let Some(memory) = caller_memory {
            memory_hint = format!(
                "\n\nCaller memory from previous sessions:\n{}",
                memory_json(memory)
            );
            if let Some(supplement) = &memory.supplementary {
                memory_hint.push_str(&format!(
                    "\n\nAdditional semantic context:\n{}",
                    supplement
                ));
            }
        }

        let prompt = prompts::reply_suggestions_prompt(
            &transcript_text(conversation),
            &memory_hint,
            language,
        );
        let raw = self
            .chat(
                prompts::SUGGESTIONS_SYSTEM,
                vec![json!({"role": "user", "content": prompt})],
                0.4,
                300,
            )
            .await?;

        Ok(parse_suggestions(&raw))
    }

    async fn opener_suggestions(
        &self,
        caller_memory: &CallerMemory,
        language: &str,
    ) -> Result<Vec<String>> {
        let prompt = prompts::opener_suggestions_prompt(
            &memory_json(caller_memory),
            &supplement_section(caller_memory),
            language,
        );
        let raw = self
            .chat(
                prompts::SUGGESTIONS_SYSTEM,
                vec![json!({"role": "user", "content": prompt})],
                0.4,
                300,
            )
            .await?;

        Ok(parse_suggestions(&raw))
    }

    async fn briefing(&self, caller_memory: &CallerMemory, language: &str) -> Result<String> {
        let prompt = prompts::briefing_prompt(
            &memory_json(caller_memory),
            &supplement_section(caller_memory),
            language,
        );
        self.chat(
            prompts::BRIEFING_SYSTEM,
            vec![json!({"role": "user", "content": prompt})],
            0.3,
            500,
        )
        .await
    }
}

fn roleplay_system(caller_memory: Option<&CallerMemory>) -> String {
    match caller_memory {
        Some(memory) => {
            prompts::CALLER_RETURNING_PROMPT.replace("{memory_context}", &memory_json(memory))
        }
        None => prompts::CALLER_SYSTEM_PROMPT.to_string(),
    }
}

/// Structured memory as pretty JSON for prompts, without the semantic
/// supplement — that is injected separately where a prompt wants it.
fn memory_json(memory: &CallerMemory) -> String {
    serde_json::to_string_pretty(&memory.structured()).unwrap_or_else(|_| "{}".to_string())
}

fn supplement_section(memory: &CallerMemory) -> String {
    match &memory.supplementary {
        Some(text) => format!(
            "\n\nAdditional context from semantic memory (may contain details not in structured data above):\n{}",
            text
        ),
        None => String::new(),
    }
}

/// Map the transcript into model roles: the simulated caller is the
/// assistant, the volunteer is the user.
fn role_messages(conversation: &[Turn]) -> Vec<Value> {
    conversation
        .iter()
        .map(|turn| {
            let role = match turn.speaker {
                Speaker::Caller => "assistant",
                Speaker::Volunteer => "user",
            };
            json!({"role": role, "content": turn.text})
        })
        .collect()
}

fn transcript_text(conversation: &[Turn]) -> String {
    let mut text = String::new();
    for turn in conversation {
        text.push('\n');
        text.push_str(&turn.speaker.to_string().to_uppercase());
        text.push_str(": ");
        text.push_str(&turn.text);
    }
    text
}

/// Pull text deltas out of one SSE event block
fn parse_sse_deltas(event: &str) -> Vec<String> {
    let mut deltas = Vec::new();
    for line in event.lines() {
        let Some(data) = line.strip_prefix("data: ") else {
            continue;
        };
        let Ok(value) = serde_json::from_str::<Value>(data) else {
            continue;
        };
        if value["type"] == "content_block_delta" {
            if let Some(text) = value["delta"]["text"].as_str() {
                deltas.push(text.to_string());
            }
        }
    }
    deltas
}

/// Lenient JSON extraction from model output.
///
/// Tries the raw text, then strips markdown fences, then scans for the
/// outermost object or array.
pub fn extract_json(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }

    if trimmed.starts_with("```") {
        let inner = trimmed
            .split_once('\n')
            .map(|(_, rest)| rest)
            .unwrap_or(trimmed);
        let inner = inner.rsplit_once("```").map(|(body, _)| body).unwrap_or(inner);
        if let Ok(value) = serde_json::from_str::<Value>(inner.trim()) {
            return Some(value);
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if end > start {
            if let Ok(value) = serde_json::from_str::<Value>(&trimmed[start..=end]) {
                return Some(value);
            }
        }
    }
    if let (Some(start), Some(end)) = (trimmed.find('['), trimmed.rfind(']')) {
        if end > start {
            if let Ok(value) = serde_json::from_str::<Value>(&trimmed[start..=end]) {
                return Some(value);
            }
        }
    }
    None
}

/// Parse a suggestion array, capped at 3 entries; anything else is empty
fn parse_suggestions(raw: &str) -> Vec<String> {
    extract_json(raw)
        .and_then(|v| serde_json::from_value::<Vec<String>>(v).ok())
        .map(|mut list| {
            list.truncate(3);
            list
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_json_handles_plain_object() {
        let value = extract_json(r#"{"risk_level": "high"}"#).unwrap();
        assert_eq!(value["risk_level"], "high");
    }

    #[test]
    fn extract_json_strips_markdown_fences() {
        let raw = "```json\n{\"triggers\": [\"eviction\"]}\n```";
        let value = extract_json(raw).unwrap();
        assert_eq!(value["triggers"][0], "eviction");
    }

    #[test]
    fn extract_json_scans_surrounding_prose() {
        let raw = "Here is the analysis you asked for: {\"score\": \"good\"} hope it helps";
        let value = extract_json(raw).unwrap();
        assert_eq!(value["score"], "good");
    }

    #[test]
    fn extract_json_rejects_garbage() {
        assert!(extract_json("the caller seems upset").is_none());
    }

    #[test]
    fn malformed_live_context_degrades_to_fallback() {
        let parsed: LiveContext = extract_json("not json at all")
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_else(LiveContext::fallback);
        assert_eq!(parsed.risk_level, RiskLevel::Unknown);
        assert!(parsed.triggers.is_empty());
        assert!(parsed.warnings.is_empty());
    }

    #[test]
    fn partial_extraction_fills_defaults() {
        let value = extract_json(r#"{"triggers": ["job loss"], "risk_level": "moderate"}"#).unwrap();
        let extracted: ExtractedMemories = serde_json::from_value(value).unwrap();
        assert_eq!(extracted.triggers, vec!["job loss"]);
        assert_eq!(extracted.risk_level, RiskLevel::Moderate);
        assert!(extracted.safety_plan.is_empty());
        assert!(extracted.situation.is_none());
    }

    #[test]
    fn partial_situation_keeps_omitted_keys_unset() {
        let value = extract_json(r#"{"situation": {"description": "evicted"}}"#).unwrap();
        let extracted: ExtractedMemories = serde_json::from_value(value).unwrap();
        let situation = extracted.situation.unwrap();
        assert_eq!(situation.description.as_deref(), Some("evicted"));
        assert!(situation.key_events.is_none());
    }

    #[test]
    fn suggestions_capped_at_three() {
        let raw = r#"["a", "b", "c", "d"]"#;
        assert_eq!(parse_suggestions(raw), vec!["a", "b", "c"]);
        assert!(parse_suggestions("no list here").is_empty());
    }

    #[test]
    fn sse_deltas_extract_text_fragments() {
        let event = concat!(
            "event: content_block_delta\n",
            "data: {\"type\":\"content_block_delta\",\"delta\":{\"type\":\"text_delta\",\"text\":\"Hel\"}}\n",
        );
        assert_eq!(parse_sse_deltas(event), vec!["Hel"]);

        let ping = "event: ping\ndata: {\"type\":\"ping\"}\n";
        assert!(parse_sse_deltas(ping).is_empty());
    }

    #[test]
    fn role_messages_map_speakers() {
        let conversation = vec![Turn::volunteer("hi"), Turn::caller("...hey")];
        let messages = role_messages(&conversation);
        assert_eq!(messages[0]["role"], "user");
        assert_eq!(messages[1]["role"], "assistant");
    }

    #[test]
    fn returning_system_embeds_memory() {
        let memory = CallerMemory {
            triggers: vec!["eviction".to_string()],
            supplementary: Some("semantic blob".to_string()),
            ..Default::default()
        };
        let system = roleplay_system(Some(&memory));
        assert!(system.contains("eviction"));
        // The supplement is never serialized into the structured context
        assert!(!system.contains("semantic blob"));
    }
}
