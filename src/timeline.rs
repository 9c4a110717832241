//! Timeline reconstruction: per-session diffs derived from archived sessions

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{RiskLevel, SessionRecord};

/// Derived per-session view with diffs against everything that came before
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub session_number: u32,
    pub volunteer: String,
    pub date: DateTime<Utc>,
    pub summary: String,
    pub risk_level: RiskLevel,

    /// Triggers not seen in any earlier session, plus this session's
    /// situation key events
    pub new_info: Vec<String>,

    /// Human-readable risk transitions, at most one per session
    pub escalations: Vec<String>,

    /// Strategies not seen in any earlier session
    pub new_strategies: Vec<String>,

    /// This session's snapshot warnings
    pub warnings: Vec<String>,
}

/// Chronological view of a caller's sessions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Timeline {
    pub caller_id: String,
    pub total_sessions: usize,
    pub sessions: Vec<TimelineEntry>,
}

/// Diff fields of the most recent session, for "what's new" briefings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDiff {
    pub new_info: Vec<String>,
    pub escalations: Vec<String>,
    pub new_strategies: Vec<String>,
    pub risk_level: RiskLevel,
    pub session_count: usize,
}

/// Build a timeline from a caller's sessions in stored order.
///
/// Sessions arrive ordered by session_number, which is authoritative; the
/// fold never re-sorts by timestamp. This recomputes from scratch on every
/// call since fields can be re-merged between reads.
pub fn build(caller_id: &str, sessions: &[SessionRecord]) -> Timeline {
    let mut seen_triggers: HashSet<String> = HashSet::new();
    let mut seen_strategies: HashSet<String> = HashSet::new();
    let mut prev_risk: Option<RiskLevel> = None;

    let mut entries = Vec::with_capacity(sessions.len());

    for session in sessions {
        let extracted = &session.extracted;

        // New triggers first, then key events. Key events are included
        // unconditionally and never deduplicated against history.
        let mut new_info: Vec<String> = extracted
            .triggers
            .iter()
            .filter(|t| !seen_triggers.contains(*t))
            .cloned()
            .collect();
        if let Some(situation) = &extracted.situation {
            new_info.extend(situation.key_events.iter().cloned());
        }

        let mut escalations = Vec::new();
        if let Some(prev) = prev_risk {
            if prev.ordinal() >= 0 && session.risk_level.ordinal() > prev.ordinal() {
                escalations.push(format!("Risk {} → {}", prev, session.risk_level));
            }
        }

        let new_strategies: Vec<String> = extracted
            .effective_strategies
            .iter()
            .filter(|s| !seen_strategies.contains(*s))
            .cloned()
            .collect();

        entries.push(TimelineEntry {
            session_number: session.session_number,
            volunteer: session.volunteer.clone(),
            date: session.date,
            summary: session.summary.clone(),
            risk_level: session.risk_level,
            new_info,
            escalations,
            new_strategies,
            warnings: extracted.warnings.clone(),
        });

        seen_triggers.extend(extracted.triggers.iter().cloned());
        seen_strategies.extend(extracted.effective_strategies.iter().cloned());
        prev_risk = Some(session.risk_level);
    }

    Timeline {
        caller_id: caller_id.to_string(),
        total_sessions: sessions.len(),
        sessions: entries,
    }
}

/// Diff summary for the most recent session, or None when no sessions exist
pub fn latest_diff(timeline: &Timeline) -> Option<SessionDiff> {
    let latest = timeline.sessions.last()?;
    Some(SessionDiff {
        new_info: latest.new_info.clone(),
        escalations: latest.escalations.clone(),
        new_strategies: latest.new_strategies.clone(),
        risk_level: latest.risk_level,
        session_count: timeline.sessions.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{SessionSnapshot, Situation};
    use chrono::Utc;

    fn session(
        number: u32,
        risk: RiskLevel,
        triggers: &[&str],
        strategies: &[&str],
        key_events: &[&str],
    ) -> SessionRecord {
        SessionRecord {
            session_number: number,
            volunteer: format!("vol-{}", number),
            date: Utc::now(),
            summary: format!("session {}", number),
            risk_level: risk,
            message_count: 0,
            conversation: Vec::new(),
            extracted: SessionSnapshot {
                triggers: triggers.iter().map(|s| s.to_string()).collect(),
                effective_strategies: strategies.iter().map(|s| s.to_string()).collect(),
                safety_plan: Vec::new(),
                warnings: Vec::new(),
                situation: if key_events.is_empty() {
                    None
                } else {
                    Some(Situation {
                        description: String::new(),
                        key_events: key_events.iter().map(|s| s.to_string()).collect(),
                    })
                },
            },
        }
    }

    #[test]
    fn empty_sessions_give_empty_timeline() {
        let timeline = build("c1", &[]);
        assert_eq!(timeline.total_sessions, 0);
        assert!(timeline.sessions.is_empty());
        assert!(latest_diff(&timeline).is_none());
    }

    #[test]
    fn new_info_excludes_seen_triggers_but_keeps_key_events() {
        let sessions = vec![
            session(1, RiskLevel::Low, &["job loss"], &[], &["lost job"]),
            session(2, RiskLevel::Low, &["job loss", "eviction"], &[], &["lost job"]),
        ];
        let timeline = build("c1", &sessions);

        assert_eq!(
            timeline.sessions[0].new_info,
            vec!["job loss".to_string(), "lost job".to_string()]
        );
        // "job loss" already seen; the repeated key event still appears
        assert_eq!(
            timeline.sessions[1].new_info,
            vec!["eviction".to_string(), "lost job".to_string()]
        );
    }

    #[test]
    fn escalations_flag_only_strict_increases() {
        let sessions = vec![
            session(1, RiskLevel::Low, &[], &[], &[]),
            session(2, RiskLevel::Moderate, &[], &[], &[]),
            session(3, RiskLevel::High, &[], &[], &[]),
            session(4, RiskLevel::Moderate, &[], &[], &[]),
        ];
        let timeline = build("c1", &sessions);

        assert!(timeline.sessions[0].escalations.is_empty());
        assert_eq!(timeline.sessions[1].escalations, vec!["Risk low → moderate"]);
        assert_eq!(
            timeline.sessions[2].escalations,
            vec!["Risk moderate → high"]
        );
        assert!(timeline.sessions[3].escalations.is_empty());
    }

    #[test]
    fn unknown_prior_risk_never_fires() {
        let sessions = vec![
            session(1, RiskLevel::Unknown, &[], &[], &[]),
            session(2, RiskLevel::High, &[], &[], &[]),
        ];
        let timeline = build("c1", &sessions);
        assert!(timeline.sessions[1].escalations.is_empty());
    }

    #[test]
    fn new_strategies_diff_against_all_prior_sessions() {
        let sessions = vec![
            session(1, RiskLevel::Low, &[], &["breathing"], &[]),
            session(2, RiskLevel::Low, &[], &["breathing", "grounding"], &[]),
            session(3, RiskLevel::Low, &[], &["breathing"], &[]),
        ];
        let timeline = build("c1", &sessions);
        assert_eq!(timeline.sessions[0].new_strategies, vec!["breathing"]);
        assert_eq!(timeline.sessions[1].new_strategies, vec!["grounding"]);
        assert!(timeline.sessions[2].new_strategies.is_empty());
    }

    #[test]
    fn build_is_deterministic_and_order_dependent() {
        let a = session(1, RiskLevel::Moderate, &["x"], &[], &[]);
        let b = session(2, RiskLevel::High, &["x", "y"], &[], &[]);

        let forward = build("c1", &[a.clone(), b.clone()]);
        let forward_again = build("c1", &[a.clone(), b.clone()]);
        assert_eq!(
            serde_json::to_string(&forward).unwrap(),
            serde_json::to_string(&forward_again).unwrap()
        );

        // Reversed order changes both escalation detection and new_info
        let reversed = build("c1", &[b, a]);
        assert_eq!(forward.sessions[1].escalations, vec!["Risk moderate → high"]);
        assert!(reversed.sessions[1].escalations.is_empty());
        assert_eq!(reversed.sessions[1].new_info, Vec::<String>::new());
    }

    #[test]
    fn latest_diff_reports_session_count() {
        let sessions = vec![
            session(1, RiskLevel::Moderate, &["x"], &[], &[]),
            session(2, RiskLevel::High, &["y"], &["grounding"], &[]),
        ];
        let timeline = build("c1", &sessions);
        let diff = latest_diff(&timeline).unwrap();
        assert_eq!(diff.session_count, 2);
        assert_eq!(diff.risk_level, RiskLevel::High);
        assert_eq!(diff.new_info, vec!["y"]);
        assert_eq!(diff.new_strategies, vec!["grounding"]);
        assert_eq!(diff.escalations, vec!["Risk moderate → high"]);
    }
}
