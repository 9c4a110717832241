//! Bridgeline: persistent caller memory and live session orchestration for
//! crisis-line volunteer training.
//!
//! A simulated caller (played by a language model) talks to a volunteer
//! across multiple sessions. Everything learned about the caller is merged
//! into a per-caller store, replayed into later sessions, and summarized as
//! a chronological timeline so volunteers can see how the caller's story
//! and risk level evolve.
//!
//! Main pieces:
//! - [`storage`]: the [`storage::CallerStore`] trait with a local JSON
//!   backend and an optional semantic enrichment decorator
//! - [`timeline`]: deterministic cross-session diffing and escalation
//!   detection
//! - [`llm`]: the [`llm::AnalysisAdapter`] trait and its HTTP
//!   implementation for roleplay streaming and structured extraction
//! - [`session`]: the live session [`session::Orchestrator`]

pub mod config;
pub mod error;
pub mod llm;
pub mod model;
pub mod prompts;
pub mod session;
pub mod storage;
pub mod timeline;

pub use config::Config;
pub use error::{Error, Result};
pub use llm::{AnalysisAdapter, LlmClient};
pub use model::{CallerMemory, ExtractedMemories, RiskLevel, Turn};
pub use session::{Orchestrator, TurnEvent};
pub use storage::{create_store, CallerStore};
