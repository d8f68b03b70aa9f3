//! Offline, deterministic oracle and embedder.
//!
//! Neither does any I/O. They keep the engine fully usable without network
//! access and make end-to-end runs reproducible.

use std::collections::HashSet;

use async_trait::async_trait;

use super::{Embedder, Oracle};
use crate::error::Result;
use crate::memory::scorer;

/// Keywords plus their character bigrams, so inflected Korean forms
/// ("일정이", "일정을") still share features with the stem.
fn features(text: &str) -> Vec<(String, f32)> {
    let mut out = Vec::new();
    for keyword in scorer::extract_keywords(text, 64) {
        let chars: Vec<char> = keyword.chars().collect();
        for pair in chars.windows(2) {
            out.push((pair.iter().collect(), 0.5));
        }
        out.push((keyword, 1.0));
    }
    out
}

fn fnv1a(s: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in s.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

/// Signed feature hashing into a fixed number of buckets, L2-normalized.
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        for (feature, weight) in features(text) {
            let h = fnv1a(&feature);
            let bucket = (h % self.dimensions as u64) as usize;
            let sign = if (h >> 63) == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign * weight;
        }
        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        vector
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_sync(text))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        "hash"
    }
}

/// Heuristic oracle built on the scorer's lexicon and keyword overlap.
pub struct KeywordOracle;

fn feature_set(text: &str) -> HashSet<String> {
    features(text).into_iter().map(|(f, _)| f).collect()
}

#[async_trait]
impl Oracle for KeywordOracle {
    async fn classify_emotion(&self, text: &str) -> Result<Option<String>> {
        let reading = scorer::estimate_emotion(text);
        Ok((!reading.is_neutral()).then_some(reading.label))
    }

    async fn judge_related(&self, topic_a: &str, topic_b: &str) -> Result<bool> {
        let (a, b) = (topic_a.trim().to_lowercase(), topic_b.trim().to_lowercase());
        if a.is_empty() || b.is_empty() {
            return Ok(false);
        }
        if a == b || a.contains(&b) || b.contains(&a) {
            return Ok(true);
        }
        let (fa, fb) = (feature_set(&a), feature_set(&b));
        Ok(fa.intersection(&fb).next().is_some())
    }

    /// Without a language model there is no basis for rejecting a candidate
    /// that already matched by tag or vector, so only blank summaries fail.
    async fn validate_context(&self, _utterance: &str, summary: &str) -> Result<bool> {
        Ok(!summary.trim().is_empty())
    }

    fn name(&self) -> &str {
        "keyword"
    }
}
