//! Core memory type definitions.
//!
//! Defines [`MemoryAtom`] (the single persistent record), [`NewAtom`] (the
//! write-side shape accepted by the store), [`ChainLink`] (a directed edge
//! between atoms), [`EmotionReading`], and the request/response shapes of the
//! ingest and recall APIs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Length of every belief vector.
pub const BELIEF_DIM: usize = 10;

/// Fixed-length keyword summary of an atom; every component is in `[0, 1]`.
pub type BeliefVector = [f32; BELIEF_DIM];

/// Emotion label for text with no recognizable emotion.
pub const NEUTRAL_LABEL: &str = "neutral";

/// Emotion code used when no lexicon entry matched.
pub const SENTINEL_EMOTION_CODE: &str = "EXXX";

/// Output of the Scorer's emotion estimate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotionReading {
    pub label: String,
    pub code: String,
    /// Intensity in `[0, 1]`.
    pub score: f32,
}

impl EmotionReading {
    pub fn neutral() -> Self {
        Self {
            label: NEUTRAL_LABEL.to_string(),
            code: SENTINEL_EMOTION_CODE.to_string(),
            score: 0.0,
        }
    }

    pub fn is_neutral(&self) -> bool {
        self.label == NEUTRAL_LABEL
    }
}

/// A directed, reasoned, weighted edge from one atom to another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainLink {
    pub target_id: String,
    /// Human-readable justification for the link.
    pub reason: String,
    /// Link weight in `[0, 1]`.
    pub strength: f64,
}

/// A stored memory atom, matching the `atoms` table plus its tags and connections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryAtom {
    /// UUID v7 (time-sortable) primary key.
    pub id: String,
    pub user_input: String,
    pub response: String,
    pub tags: Vec<String>,
    pub emotion_label: String,
    pub emotion_code: String,
    pub emotion_score: f32,
    pub belief_vector: BeliefVector,
    /// Retention weight, kept inside the policy's importance range.
    pub importance: f64,
    /// Recall preference in `[0, 100]`.
    pub resonance_score: f64,
    /// Empty when the embedder was unavailable at ingestion.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub embedding: Vec<f32>,
    /// Append-only, capped edge list. May contain dangling targets.
    pub connections: Vec<ChainLink>,
    pub timestamp: DateTime<Utc>,
    pub last_used: Option<DateTime<Utc>>,
    pub used_count: u32,
    pub session_id: String,
    pub topic: String,
    pub sub_topic: String,
    pub chain_id: String,
    /// Owning user; `None` means the atom is shared.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl MemoryAtom {
    /// When the atom was last useful: `last_used`, falling back to creation time.
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_used.unwrap_or(self.timestamp)
    }
}

/// Write-side shape of an atom. Mutable-later fields start from here.
#[derive(Debug, Clone)]
pub struct NewAtom {
    /// Caller-supplied id; a UUID v7 is generated when `None`.
    pub id: Option<String>,
    pub user_input: String,
    pub response: String,
    pub tags: Vec<String>,
    pub emotion: EmotionReading,
    pub belief_vector: BeliefVector,
    pub importance: f64,
    pub resonance_score: f64,
    pub embedding: Vec<f32>,
    /// Creation time; `now` when `None`.
    pub timestamp: Option<DateTime<Utc>>,
    pub session_id: String,
    pub topic: String,
    pub sub_topic: String,
    /// Derived from session and topic when `None`.
    pub chain_id: Option<String>,
    pub user_id: Option<String>,
}

impl NewAtom {
    pub fn new(
        user_input: impl Into<String>,
        response: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            user_input: user_input.into(),
            response: response.into(),
            tags: Vec::new(),
            emotion: EmotionReading::neutral(),
            belief_vector: [0.0; BELIEF_DIM],
            importance: 5000.0,
            resonance_score: 50.0,
            embedding: Vec::new(),
            timestamp: None,
            session_id: session_id.into(),
            topic: String::new(),
            sub_topic: String::new(),
            chain_id: None,
            user_id: None,
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_resonance(mut self, resonance: f64) -> Self {
        self.resonance_score = resonance;
        self
    }

    pub fn with_importance(mut self, importance: f64) -> Self {
        self.importance = importance;
        self
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = embedding;
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// `"{session}-{topic with spaces replaced}"`, the default chain grouping.
    pub fn derived_chain_id(&self) -> String {
        format!("{}-{}", self.session_id, self.topic.trim().replace(' ', "_"))
    }
}

/// Optional time window, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Store search filter. Empty/`None` fields do not constrain the search.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    /// Atom must carry at least one of these tags.
    pub tags: Vec<String>,
    /// Atom must carry a tag (2+ chars) that occurs inside this text.
    pub mentioned_in: Option<String>,
    pub session_id: Option<String>,
    /// Restrict to atoms owned by this user or shared.
    pub visible_to: Option<String>,
    pub time_range: Option<TimeRange>,
}

/// Ingest API input: one conversational exchange.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Exchange {
    pub user_input: String,
    pub response: String,
    pub session_id: String,
    /// Extracted from the user input when absent.
    pub tags: Option<Vec<String>>,
    pub topic: Option<String>,
    pub sub_topic: Option<String>,
    pub user_id: Option<String>,
}

/// Recall API input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecallRequest {
    pub query: String,
    pub user_id: String,
    pub result_limit: usize,
    /// Upper bound on the summed summary length, in characters.
    pub char_budget: usize,
}

/// Compact recall result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtomSummary {
    pub id: String,
    pub summary: String,
    pub topic: String,
    pub emotion_label: String,
    pub resonance_score: f64,
    pub importance: f64,
    pub timestamp: DateTime<Utc>,
}
