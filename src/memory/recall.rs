//! Recall pipeline stages.
//!
//! The synchronous, store-free stages live here (merge, filter, rank,
//! format) so they can be tested without an engine. The async orchestration,
//! which adds the trigger check, candidate generation, oracle validation and
//! usage tracking, lives in [`crate::engine::MemoryEngine::recall`].

use std::cmp::Ordering;
use std::collections::HashSet;

use serde::Serialize;

use super::store::AtomRecord;
use super::truncate_chars;
use crate::memory::types::{AtomSummary, MemoryAtom};

// ── Public types ──────────────────────────────────────────────────────────────

/// Pipeline states, used as the `stage` field in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecallStage {
    TriggerCheck,
    Suppressed,
    CandidateGen,
    Filter,
    Validate,
    Rank,
    Format,
    Done,
}

impl RecallStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TriggerCheck => "trigger_check",
            Self::Suppressed => "suppressed",
            Self::CandidateGen => "candidate_gen",
            Self::Filter => "filter",
            Self::Validate => "validate",
            Self::Rank => "rank",
            Self::Format => "format",
            Self::Done => "done",
        }
    }
}

/// What happened during one recall, for callers that want more than the results.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RecallTrace {
    pub suppressed: bool,
    pub cache_hit: bool,
    pub tag_candidates: usize,
    pub vector_candidates: usize,
    pub filtered_out: usize,
    pub rejected: usize,
    /// Candidates passed through because the oracle was unavailable.
    pub unvalidated: usize,
    /// A store failure emptied the result.
    pub degraded: bool,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RecallOutcome {
    pub results: Vec<AtomSummary>,
    pub trace: RecallTrace,
}

// ── Stages ────────────────────────────────────────────────────────────────────

/// Union of the tag and vector candidate ids, first occurrence wins.
pub fn merge_candidate_ids(tag_ids: Vec<String>, vector_ids: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    tag_ids
        .into_iter()
        .chain(vector_ids)
        .filter(|id| seen.insert(id.clone()))
        .collect()
}

/// Drop records with a missing/unparseable timestamp or a blank response.
///
/// Returns the survivors and how many were dropped. Drops are logged, never surfaced.
pub fn filter_candidates(records: Vec<AtomRecord>) -> (Vec<MemoryAtom>, usize) {
    let total = records.len();
    let survivors: Vec<MemoryAtom> = records
        .into_iter()
        .filter_map(|record| {
            let id = record.id.clone();
            match record.into_atom() {
                Ok(atom) if atom.response.trim().is_empty() => {
                    tracing::debug!(atom_id = %id, stage = "filter", "blank response, dropped");
                    None
                }
                Ok(atom) => Some(atom),
                Err(e) => {
                    tracing::warn!(
                        atom_id = %id,
                        stage = "filter",
                        error = %e,
                        "malformed candidate dropped"
                    );
                    None
                }
            }
        })
        .collect();
    let dropped = total - survivors.len();
    (survivors, dropped)
}

/// Resonance desc, importance desc, timestamp desc, then id.
pub fn rank_ordering(a: &MemoryAtom, b: &MemoryAtom) -> Ordering {
    b.resonance_score
        .partial_cmp(&a.resonance_score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.importance.partial_cmp(&a.importance).unwrap_or(Ordering::Equal))
        .then_with(|| b.timestamp.cmp(&a.timestamp))
        .then_with(|| a.id.cmp(&b.id))
}

pub fn rank(atoms: &mut [MemoryAtom]) {
    atoms.sort_by(rank_ordering);
}

/// `"user_input → response"`, truncated to `max_chars`.
pub fn summarize(atom: &MemoryAtom, max_chars: usize) -> String {
    let text = match (atom.user_input.trim(), atom.response.trim()) {
        ("", response) => response.to_string(),
        (input, "") => input.to_string(),
        (input, response) => format!("{input} → {response}"),
    };
    truncate_chars(&text, max_chars)
}

/// Apply the result budget. The first ranked atom is always returned;
/// later ones stop at `result_limit` or when the summed summary length
/// would exceed `char_budget`.
pub fn format_results(
    ranked: &[MemoryAtom],
    result_limit: usize,
    char_budget: usize,
    summary_chars: usize,
) -> Vec<AtomSummary> {
    let mut out = Vec::new();
    let mut used = 0usize;

    for atom in ranked {
        if out.len() >= result_limit.max(1) {
            break;
        }
        let summary = summarize(atom, summary_chars);
        let len = summary.chars().count();
        if !out.is_empty() && used + len > char_budget {
            break;
        }
        used += len;
        out.push(AtomSummary {
            id: atom.id.clone(),
            summary,
            topic: atom.topic.clone(),
            emotion_label: atom.emotion_label.clone(),
            resonance_score: atom.resonance_score,
            importance: atom.importance,
            timestamp: atom.timestamp,
        });
    }
    out
}
