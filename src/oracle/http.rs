//! OpenAI-compatible HTTP oracle and embedder.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{Embedder, Oracle};
use crate::config::{EmbeddingConfig, OracleConfig};
use crate::error::{MemoryError, Result};

const EMOTION_LABELS: &[&str] = &[
    "joy", "sadness", "anger", "fear", "surprise", "disgust", "curious", "love", "neutral",
];

fn build_client(timeout_ms: u64) -> anyhow::Result<Client> {
    Ok(Client::builder()
        .timeout(Duration::from_millis(timeout_ms))
        .build()?)
}

fn api_key(env_var: &str) -> Option<String> {
    if env_var.is_empty() {
        return None;
    }
    std::env::var(env_var).ok().filter(|k| !k.is_empty())
}

fn map_transport(stage: &'static str, e: reqwest::Error) -> MemoryError {
    if e.is_timeout() {
        MemoryError::OracleTimeout(stage)
    } else {
        MemoryError::OracleUnavailable(format!("{stage}: {e}"))
    }
}

const YES_WORDS: &[&str] = &["yes", "yeah", "yep", "y", "네", "예"];
const NO_WORDS: &[&str] = &["no", "nope", "nah", "n", "아니", "아니요", "아니오", "아뇨"];

/// Interpret a free-text yes/no answer by its first whole word. Anything else
/// is an error, not a "no".
pub(crate) fn parse_yes_no(answer: &str) -> Option<bool> {
    let first = answer
        .split(|c: char| !c.is_alphanumeric())
        .find(|w| !w.is_empty())?
        .to_lowercase();
    if YES_WORDS.contains(&first.as_str()) {
        Some(true)
    } else if NO_WORDS.contains(&first.as_str()) {
        Some(false)
    } else {
        None
    }
}

// ── Oracle ───────────────────────────────────────────────────────────────────

pub struct HttpOracle {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatContent,
}

#[derive(Deserialize)]
struct ChatContent {
    content: Option<String>,
}

impl HttpOracle {
    pub fn new(config: &OracleConfig) -> anyhow::Result<Self> {
        Ok(Self {
            client: build_client(config.timeout_ms)?,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            api_key: api_key(&config.api_key_env),
        })
    }

    async fn ask(&self, stage: &'static str, system: &str, user: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage { role: "system", content: system },
                ChatMessage { role: "user", content: user },
            ],
            temperature: 0.0,
            max_tokens: 8,
        };

        let mut builder = self.client.post(&self.endpoint).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder.send().await.map_err(|e| map_transport(stage, e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(MemoryError::OracleUnavailable(format!(
                "{stage}: HTTP {status} - {body}"
            )));
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| map_transport(stage, e))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| MemoryError::OracleUnavailable(format!("{stage}: empty completion")))
    }

    async fn ask_yes_no(&self, stage: &'static str, system: &str, user: &str) -> Result<bool> {
        let answer = self.ask(stage, system, user).await?;
        parse_yes_no(&answer).ok_or_else(|| {
            MemoryError::OracleUnavailable(format!("{stage}: unparseable answer {answer:?}"))
        })
    }
}

#[async_trait]
impl Oracle for HttpOracle {
    async fn classify_emotion(&self, text: &str) -> Result<Option<String>> {
        let system = format!(
            "Classify the dominant emotion of the user's text. Answer with exactly one word from: {}.",
            EMOTION_LABELS.join(", ")
        );
        let answer = self.ask("classify_emotion", &system, text).await?;
        let label = answer.trim().trim_matches(|c: char| !c.is_alphabetic()).to_lowercase();
        Ok(EMOTION_LABELS
            .iter()
            .find(|l| **l == label)
            .filter(|l| **l != "neutral")
            .map(|l| l.to_string()))
    }

    async fn judge_related(&self, topic_a: &str, topic_b: &str) -> Result<bool> {
        self.ask_yes_no(
            "judge_related",
            "You decide whether two conversation topics are related. Answer only Yes or No.",
            &format!("Topic A: {topic_a}\nTopic B: {topic_b}\nAre these topics related?"),
        )
        .await
    }

    async fn validate_context(&self, utterance: &str, summary: &str) -> Result<bool> {
        self.ask_yes_no(
            "validate_context",
            "You decide whether a stored memory is relevant to what the user just said. \
             Answer only Yes or No.",
            &format!("User said: {utterance}\nMemory: {summary}\nIs the memory relevant?"),
        )
        .await
    }

    fn name(&self) -> &str {
        "http"
    }
}

// ── Embedder ─────────────────────────────────────────────────────────────────

pub struct HttpEmbedder {
    client: Client,
    endpoint: String,
    model: String,
    dimensions: usize,
    api_key: Option<String>,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: [&'a str; 1],
    dimensions: usize,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl HttpEmbedder {
    pub fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        anyhow::ensure!(config.dimensions > 0, "embedding dimensions must be positive");
        Ok(Self {
            client: build_client(config.timeout_ms)?,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            dimensions: config.dimensions,
            api_key: api_key(&config.api_key_env),
        })
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let request = EmbeddingRequest {
            model: &self.model,
            input: [text],
            dimensions: self.dimensions,
        };
        let mut builder = self.client.post(&self.endpoint).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder.send().await.map_err(|e| map_transport("embed", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(MemoryError::OracleUnavailable(format!(
                "embed: HTTP {status} - {body}"
            )));
        }

        let parsed: EmbeddingResponse =
            response.json().await.map_err(|e| map_transport("embed", e))?;
        let embedding = parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| MemoryError::OracleUnavailable("embed: no embedding returned".into()))?;

        if embedding.len() != self.dimensions {
            return Err(MemoryError::OracleUnavailable(format!(
                "embed: expected {} dimensions, got {}",
                self.dimensions,
                embedding.len()
            )));
        }
        Ok(embedding)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yes_no_parsing() {
        assert_eq!(parse_yes_no("Yes."), Some(true));
        assert_eq!(parse_yes_no("  no, they are unrelated"), Some(false));
        assert_eq!(parse_yes_no("\"YES\""), Some(true));
        assert_eq!(parse_yes_no("네, 관련 있습니다"), Some(true));
        assert_eq!(parse_yes_no("아니요"), Some(false));
        assert_eq!(parse_yes_no("maybe"), None);
        assert_eq!(parse_yes_no(""), None);
    }

    #[test]
    fn yes_no_matches_whole_words_only() {
        assert_eq!(parse_yes_no("No."), Some(false));
        assert_eq!(parse_yes_no("nope"), Some(false));
        assert_eq!(parse_yes_no("not sure"), None);
        assert_eq!(parse_yes_no("None of them"), None);
        assert_eq!(parse_yes_no("nothing in common"), None);
        assert_eq!(parse_yes_no("yesterday"), None);
    }

    #[test]
    fn embedder_rejects_zero_dimensions() {
        let config = EmbeddingConfig {
            dimensions: 0,
            ..EmbeddingConfig::default()
        };
        assert!(HttpEmbedder::new(&config).is_err());
    }

    #[test]
    fn embedder_signature_uses_model() {
        let embedder = HttpEmbedder::new(&EmbeddingConfig::default()).unwrap();
        assert_eq!(embedder.signature(), "text-embedding-3-small:256");
    }
}
