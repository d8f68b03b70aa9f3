//! External judgment capabilities.
//!
//! The [`Oracle`] answers three questions the heuristics cannot (emotion
//! label, topic relatedness, contextual relevance) and the [`Embedder`] turns
//! text into vectors. Both are created from configuration via
//! [`create_oracle`] / [`create_embedder`]; tests substitute deterministic fakes.
//!
//! Every call goes through an [`OracleGate`], which applies the timeout and
//! keeps a share of the concurrency budget free for the recall path.

pub mod http;
pub mod local;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::config::{EmbeddingConfig, OracleConfig};
use crate::error::{MemoryError, Result};

#[async_trait]
pub trait Oracle: Send + Sync {
    /// Emotion label for `text`, or `None` when the oracle has no opinion.
    async fn classify_emotion(&self, text: &str) -> Result<Option<String>>;

    /// Whether two topics are related.
    async fn judge_related(&self, topic_a: &str, topic_b: &str) -> Result<bool>;

    /// Whether a stored memory summary is relevant to the current utterance.
    async fn validate_context(&self, utterance: &str, summary: &str) -> Result<bool>;

    fn name(&self) -> &str;
}

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Length of every vector this embedder returns.
    fn dimensions(&self) -> usize;

    fn name(&self) -> &str;

    /// `name:dimensions`, stored with the database to detect model changes.
    fn signature(&self) -> String {
        format!("{}:{}", self.name(), self.dimensions())
    }
}

pub type SharedOracle = Arc<dyn Oracle>;
pub type SharedEmbedder = Arc<dyn Embedder>;

/// Who is asking. Background work can never take the recall reserve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Recall,
    Background,
}

/// Concurrency and deadline control for oracle calls.
pub struct OracleGate {
    total: Arc<Semaphore>,
    background: Arc<Semaphore>,
    timeout: Duration,
}

impl OracleGate {
    /// `max_concurrency` permits overall, of which `reserved_for_recall` are
    /// closed to background callers. At least one permit always stays
    /// available to background work.
    pub fn new(max_concurrency: usize, reserved_for_recall: usize, timeout: Duration) -> Self {
        let total = max_concurrency.max(1);
        let background = total.saturating_sub(reserved_for_recall).max(1);
        Self {
            total: Arc::new(Semaphore::new(total)),
            background: Arc::new(Semaphore::new(background)),
            timeout,
        }
    }

    pub fn from_config(config: &OracleConfig) -> Self {
        Self::new(
            config.max_concurrency,
            config.reserved_for_recall,
            Duration::from_millis(config.timeout_ms),
        )
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `call` under a permit and the gate's deadline (permit wait included).
    pub async fn run<T, F>(&self, priority: Priority, stage: &'static str, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let guarded = async {
            let _background = match priority {
                Priority::Background => Some(
                    self.background
                        .acquire()
                        .await
                        .map_err(|_| MemoryError::OracleUnavailable("oracle gate closed".into()))?,
                ),
                Priority::Recall => None,
            };
            let _permit = self
                .total
                .acquire()
                .await
                .map_err(|_| MemoryError::OracleUnavailable("oracle gate closed".into()))?;
            call.await
        };

        match tokio::time::timeout(self.timeout, guarded).await {
            Ok(result) => result,
            Err(_) => Err(MemoryError::OracleTimeout(stage)),
        }
    }
}

/// Build the oracle named by `config.provider`.
pub fn create_oracle(config: &OracleConfig) -> anyhow::Result<SharedOracle> {
    match config.provider.as_str() {
        "keyword" => Ok(Arc::new(local::KeywordOracle)),
        "http" => Ok(Arc::new(http::HttpOracle::new(config)?)),
        other => anyhow::bail!("unknown oracle provider: {other}. Supported: keyword, http"),
    }
}

/// Build the embedder named by `config.provider`.
pub fn create_embedder(config: &EmbeddingConfig) -> anyhow::Result<SharedEmbedder> {
    match config.provider.as_str() {
        "hash" => Ok(Arc::new(local::HashEmbedder::new(config.dimensions))),
        "http" => Ok(Arc::new(http::HttpEmbedder::new(config)?)),
        other => anyhow::bail!("unknown embedding provider: {other}. Supported: hash, http"),
    }
}
