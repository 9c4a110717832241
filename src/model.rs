//! Core data model: callers, transcripts, extracted memories, session records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Risk level assessed for a caller during or after a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Moderate,
    High,
    #[default]
    Unknown,
}

impl RiskLevel {
    /// Ordinal used for escalation comparisons. Unknown sorts below low and
    /// never participates in a fired transition.
    pub fn ordinal(self) -> i8 {
        match self {
            RiskLevel::Low => 0,
            RiskLevel::Moderate => 1,
            RiskLevel::High => 2,
            RiskLevel::Unknown => -1,
        }
    }

    /// Whether this level is one of the known ordinals (low/moderate/high)
    pub fn is_known(self) -> bool {
        self != RiskLevel::Unknown
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "low"),
            RiskLevel::Moderate => write!(f, "moderate"),
            RiskLevel::High => write!(f, "high"),
            RiskLevel::Unknown => write!(f, "unknown"),
        }
    }
}

/// Who produced a transcript turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    Volunteer,
    Caller,
}

impl std::fmt::Display for Speaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Speaker::Volunteer => write!(f, "volunteer"),
            Speaker::Caller => write!(f, "caller"),
        }
    }
}

/// A single turn in a conversation transcript
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub speaker: Speaker,
    pub text: String,
}

impl Turn {
    pub fn volunteer(text: impl Into<String>) -> Self {
        Self {
            speaker: Speaker::Volunteer,
            text: text.into(),
        }
    }

    pub fn caller(text: impl Into<String>) -> Self {
        Self {
            speaker: Speaker::Caller,
            text: text.into(),
        }
    }
}

/// The caller's life situation as extracted at session end
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Situation {
    /// Summary of the caller's current circumstances
    #[serde(default)]
    pub description: String,

    /// Significant events mentioned during the session
    #[serde(default)]
    pub key_events: Vec<String>,
}

/// Situation fields as they appear in model output, where each key may be
/// omitted independently. An absent key means "leave the stored value
/// alone"; an empty list means "the stored value is now empty".
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SituationUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_events: Option<Vec<String>>,
}

impl SituationUpdate {
    /// Merge this update over an existing record, key by key. Keys the
    /// update omits keep their stored value.
    pub fn apply(&self, existing: Option<Situation>) -> Situation {
        let existing = existing.unwrap_or_default();
        Situation {
            description: self.description.clone().unwrap_or(existing.description),
            key_events: self.key_events.clone().unwrap_or(existing.key_events),
        }
    }

    /// The update read as a standalone record, with omitted keys defaulted
    pub fn to_situation(&self) -> Situation {
        self.apply(None)
    }
}

/// Structured memories extracted from a complete session.
///
/// Every field is defaulted so that partial or sloppy model output still
/// deserializes into something usable.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ExtractedMemories {
    #[serde(default)]
    pub triggers: Vec<String>,

    #[serde(default)]
    pub effective_strategies: Vec<String>,

    #[serde(default)]
    pub safety_plan: Vec<String>,

    #[serde(default)]
    pub warnings: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub situation: Option<SituationUpdate>,

    #[serde(default)]
    pub session_summary: String,

    #[serde(default)]
    pub risk_level: RiskLevel,
}

/// Per-session snapshot of extracted fields, embedded in the session record.
///
/// This is what was extracted from that session only, never the merged
/// cross-session state. Timeline diffs are computed from these snapshots.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SessionSnapshot {
    #[serde(default)]
    pub triggers: Vec<String>,

    #[serde(default)]
    pub effective_strategies: Vec<String>,

    #[serde(default)]
    pub safety_plan: Vec<String>,

    #[serde(default)]
    pub warnings: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub situation: Option<Situation>,
}

impl From<&ExtractedMemories> for SessionSnapshot {
    fn from(extracted: &ExtractedMemories) -> Self {
        Self {
            triggers: extracted.triggers.clone(),
            effective_strategies: extracted.effective_strategies.clone(),
            safety_plan: extracted.safety_plan.clone(),
            warnings: extracted.warnings.clone(),
            situation: extracted.situation.as_ref().map(SituationUpdate::to_situation),
        }
    }
}

/// Immutable archival record of one completed session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    /// 1-based, strictly increasing per caller, assigned at write time
    pub session_number: u32,

    /// Name of the volunteer who handled this session
    pub volunteer: String,

    /// When the session was archived
    pub date: DateTime<Utc>,

    /// 2-3 sentence summary of the session
    #[serde(default)]
    pub summary: String,

    #[serde(default)]
    pub risk_level: RiskLevel,

    pub message_count: usize,

    /// Full transcript, in order
    pub conversation: Vec<Turn>,

    /// Extracted fields for this session only
    #[serde(default)]
    pub extracted: SessionSnapshot,
}

/// Merged, current view of a caller: field values plus session history
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CallerMemory {
    #[serde(default)]
    pub triggers: Vec<String>,

    #[serde(default)]
    pub effective_strategies: Vec<String>,

    #[serde(default)]
    pub safety_plan: Vec<String>,

    #[serde(default)]
    pub warnings: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub situation: Option<Situation>,

    #[serde(default)]
    pub sessions: Vec<SessionRecord>,

    /// Opaque free-text supplement from the semantic layer, when enriched.
    /// Threaded through to prompts; never parsed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supplementary: Option<String>,
}

impl CallerMemory {
    /// Whether anything at all is stored for this caller
    pub fn is_empty(&self) -> bool {
        self.triggers.is_empty()
            && self.effective_strategies.is_empty()
            && self.safety_plan.is_empty()
            && self.warnings.is_empty()
            && self.situation.is_none()
            && self.sessions.is_empty()
    }

    /// The structured view without the semantic supplement, for prompts
    /// that should only see locally verified fields.
    pub fn structured(&self) -> CallerMemory {
        let mut copy = self.clone();
        copy.supplementary = None;
        copy
    }
}

/// Context extracted live from an in-progress conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveContext {
    #[serde(default)]
    pub triggers: Vec<String>,

    #[serde(default)]
    pub effective_strategies: Vec<String>,

    #[serde(default)]
    pub current_mood: String,

    #[serde(default)]
    pub risk_level: RiskLevel,

    #[serde(default)]
    pub key_facts: Vec<String>,

    #[serde(default)]
    pub warnings: Vec<String>,

    #[serde(default)]
    pub addressed_items: Vec<String>,
}

impl LiveContext {
    /// Safe default used when the model returns unparseable output
    pub fn fallback() -> Self {
        Self {
            triggers: Vec::new(),
            effective_strategies: Vec::new(),
            current_mood: "Unknown".to_string(),
            risk_level: RiskLevel::Unknown,
            key_facts: Vec::new(),
            warnings: Vec::new(),
            addressed_items: Vec::new(),
        }
    }
}

/// Grade for a volunteer's latest message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoachingScore {
    Good,
    NeedsImprovement,
    Caution,
}

/// Coaching feedback on the volunteer's latest message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Coaching {
    pub score: CoachingScore,
    pub feedback: String,
    pub technique: String,
}

/// Emitted when a turn's extracted risk strictly exceeds the remembered risk
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RiskAlert {
    pub from: RiskLevel,
    pub to: RiskLevel,
}
