#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use memoria::config::MemoriaConfig;
use memoria::db;
use memoria::engine::MemoryEngine;
use memoria::error::{MemoryError, Result};
use memoria::memory::format_timestamp;
use memoria::memory::store;
use memoria::memory::types::NewAtom;
use memoria::oracle::local::HashEmbedder;
use memoria::oracle::{Embedder, Oracle, SharedEmbedder, SharedOracle};
use rusqlite::{params, Connection};

pub const DIMS: usize = 64;

/// Open a fresh in-memory database with schema and migrations applied.
pub fn test_db() -> Connection {
    db::open_memory_database().unwrap()
}

/// Defaults, with embedding dimensions matching [`DIMS`].
pub fn test_config() -> MemoriaConfig {
    let mut config = MemoriaConfig::default();
    config.embedding.dimensions = DIMS;
    config
}

pub fn engine_with(
    conn: Connection,
    embedder: SharedEmbedder,
    oracle: SharedOracle,
    config: MemoriaConfig,
) -> MemoryEngine {
    MemoryEngine::new(conn, embedder, oracle, config).unwrap()
}

/// Deterministic embedding with a spike at position `seed`.
pub fn test_embedding(seed: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; DIMS];
    v[seed % DIMS] = 1.0;
    v
}

/// Insert an atom directly via the store. Returns the atom id.
pub fn insert_atom(
    conn: &mut Connection,
    user_input: &str,
    response: &str,
    tags: &[&str],
    resonance: f64,
    importance: f64,
) -> String {
    let atom = NewAtom::new(user_input, response, "test-session")
        .with_tags(tags.iter().copied())
        .with_resonance(resonance)
        .with_importance(importance);
    store::store_atom(conn, &atom).unwrap()
}

pub fn set_last_used(conn: &Connection, id: &str, at: DateTime<Utc>) {
    conn.execute(
        "UPDATE atoms SET last_used = ?1 WHERE id = ?2",
        params![format_timestamp(at), id],
    )
    .unwrap();
}

pub fn set_used_count(conn: &Connection, id: &str, count: u32) {
    conn.execute(
        "UPDATE atoms SET used_count = ?1 WHERE id = ?2",
        params![count, id],
    )
    .unwrap();
}

// ── Fake embedders ───────────────────────────────────────────────────────────

/// The offline hash embedder, counting calls.
pub struct CountingEmbedder {
    inner: HashEmbedder,
    pub calls: AtomicUsize,
}

impl CountingEmbedder {
    pub fn new() -> Self {
        Self {
            inner: HashEmbedder::new(DIMS),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embedder for CountingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.embed(text).await
    }

    fn dimensions(&self) -> usize {
        DIMS
    }

    fn name(&self) -> &str {
        "hash"
    }
}

/// An embedder that is always down.
pub struct FailingEmbedder;

#[async_trait]
impl Embedder for FailingEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(MemoryError::OracleUnavailable("embedder down".into()))
    }

    fn dimensions(&self) -> usize {
        DIMS
    }

    fn name(&self) -> &str {
        "failing"
    }
}

// ── Fake oracle ──────────────────────────────────────────────────────────────

/// Scripted oracle with call counters.
pub struct FakeOracle {
    pub emotion: Option<String>,
    pub related: bool,
    pub valid: bool,
    /// Every call fails with `OracleUnavailable`.
    pub fail: bool,
    /// Every call sleeps this long first.
    pub delay: Option<Duration>,
    pub classify_calls: AtomicUsize,
    pub judge_calls: AtomicUsize,
    pub validate_calls: AtomicUsize,
}

impl FakeOracle {
    pub fn new() -> Self {
        Self {
            emotion: None,
            related: true,
            valid: true,
            fail: false,
            delay: None,
            classify_calls: AtomicUsize::new(0),
            judge_calls: AtomicUsize::new(0),
            validate_calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::new()
        }
    }

    pub fn with_related(mut self, related: bool) -> Self {
        self.related = related;
        self
    }

    pub fn with_valid(mut self, valid: bool) -> Self {
        self.valid = valid;
        self
    }

    pub fn with_emotion(mut self, label: &str) -> Self {
        self.emotion = Some(label.to_string());
        self
    }

    pub fn judge_calls(&self) -> usize {
        self.judge_calls.load(Ordering::SeqCst)
    }

    pub fn validate_calls(&self) -> usize {
        self.validate_calls.load(Ordering::SeqCst)
    }

    pub fn classify_calls(&self) -> usize {
        self.classify_calls.load(Ordering::SeqCst)
    }

    async fn answer<T>(&self, value: T) -> Result<T> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(MemoryError::OracleUnavailable("oracle down".into()));
        }
        Ok(value)
    }
}

#[async_trait]
impl Oracle for FakeOracle {
    async fn classify_emotion(&self, _text: &str) -> Result<Option<String>> {
        self.classify_calls.fetch_add(1, Ordering::SeqCst);
        self.answer(self.emotion.clone()).await
    }

    async fn judge_related(&self, _topic_a: &str, _topic_b: &str) -> Result<bool> {
        self.judge_calls.fetch_add(1, Ordering::SeqCst);
        self.answer(self.related).await
    }

    async fn validate_context(&self, _utterance: &str, _summary: &str) -> Result<bool> {
        self.validate_calls.fetch_add(1, Ordering::SeqCst);
        self.answer(self.valid).await
    }

    fn name(&self) -> &str {
        "fake"
    }
}

/// Engine over `conn` with a counting embedder and the given oracle.
pub fn engine_with_fakes(
    conn: Connection,
    oracle: Arc<FakeOracle>,
    config: MemoriaConfig,
) -> (MemoryEngine, Arc<CountingEmbedder>) {
    let embedder = Arc::new(CountingEmbedder::new());
    let engine = engine_with(conn, embedder.clone(), oracle, config);
    (engine, embedder)
}
