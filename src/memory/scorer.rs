//! Pure scoring functions applied at ingestion.
//!
//! Nothing here performs I/O: emotion estimation is a keyword lexicon,
//! the belief vector is a fixed fill rule over extracted keywords, and the
//! event score is a clipped weighted sum. The engine seeds `resonance_score`
//! and `importance` from the event score.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::config::DecayPolicy;
use crate::memory::types::{BeliefVector, EmotionReading, BELIEF_DIM};

/// Emotion lexicon: `(label, code, keywords)`. Order breaks ties between equal hit counts.
pub(crate) const EMOTION_LEXICON: &[(&str, &str, &[&str])] = &[
    ("joy", "E101", &["기쁨", "기뻐", "행복", "즐거", "웃음", "환희", "만족", "희망", "happy", "glad", "joy"]),
    (
        "sadness",
        "E201",
        &[
            "슬픔", "슬퍼", "우울", "절망", "비통", "허전", "외로", "실망", "sad", "lonely", "depressed",
        ],
    ),
    (
        "anger",
        "E301",
        &["분노", "화남", "화나", "짜증", "열받", "격분", "증오", "원망", "angry", "furious", "annoyed"],
    ),
    (
        "fear",
        "E401",
        &["두려", "공포", "불안", "걱정", "겁나", "무서", "긴장", "afraid", "scared", "worried", "anxious"],
    ),
    ("surprise", "E501", &["놀람", "놀라", "충격", "의외", "예상밖", "깜짝", "surprised", "shocked"]),
    ("disgust", "E601", &["역겨", "혐오", "싫어", "구역질", "메스껍", "지겨", "disgusting", "gross"]),
    ("curious", "E701", &["호기심", "궁금", "관심", "의문", "탐구", "알고싶", "curious", "wonder"]),
    ("love", "E801", &["사랑", "애정", "따뜻", "애착", "그리움", "그리워", "love", "adore"]),
];

const QUESTION_WORDS: &[&str] = &[
    "뭐", "무엇", "언제", "어디", "누구", "왜", "어떻게", "몇", "what", "when", "where", "who",
    "why", "how", "which",
];

const INTENSIFIERS: &[&str] = &["정말", "진짜", "너무", "매우", "really", "very", "so much"];

static KEYWORD_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"[가-힣]{2,}").expect("hangul keyword pattern"),
        Regex::new(r"\b[a-zA-Z]{3,}\b").expect("latin keyword pattern"),
        Regex::new(r"\d+").expect("digit keyword pattern"),
    ]
});

/// Estimate the dominant emotion of `text`. Never fails.
pub fn estimate_emotion(text: &str) -> EmotionReading {
    let lowered = text.trim().to_lowercase();
    if lowered.is_empty() {
        return EmotionReading::neutral();
    }

    let mut best: Option<(&str, &str, usize)> = None;
    for (label, code, keywords) in EMOTION_LEXICON {
        let hits = keywords.iter().filter(|k| lowered.contains(*k)).count();
        if hits > 0 && best.map_or(true, |(_, _, h)| hits > h) {
            best = Some((label, code, hits));
        }
    }

    match best {
        Some((label, code, hits)) => EmotionReading {
            label: label.to_string(),
            code: code.to_string(),
            score: (0.5 + 0.1 * hits.min(5) as f32).min(1.0),
        },
        None => EmotionReading::neutral(),
    }
}

/// Lexicon code for a label, used when an externally classified label is adopted.
pub fn emotion_code_for(label: &str) -> Option<&'static str> {
    EMOTION_LEXICON
        .iter()
        .find(|(l, _, _)| *l == label)
        .map(|(_, code, _)| *code)
}

/// Up to `max` keywords ranked by frequency, then by first occurrence.
///
/// Hangul runs of two or more syllables, Latin words of three or more letters
/// (lower-cased) and digit runs.
pub fn extract_keywords(text: &str, max: usize) -> Vec<String> {
    let mut found: Vec<(usize, String)> = KEYWORD_PATTERNS
        .iter()
        .flat_map(|re| re.find_iter(text).map(|m| (m.start(), m.as_str().to_lowercase())))
        .collect();
    found.sort_by_key(|(pos, _)| *pos);

    let mut counts: HashMap<&str, (usize, usize)> = HashMap::new();
    for (order, (_, word)) in found.iter().enumerate() {
        counts.entry(word.as_str()).or_insert((0, order)).0 += 1;
    }

    let mut ranked: Vec<(&str, usize, usize)> =
        counts.into_iter().map(|(w, (n, first))| (w, n, first)).collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));
    ranked.into_iter().take(max).map(|(w, _, _)| w.to_string()).collect()
}

/// Ingestion tags for an exchange with no caller-supplied tags.
pub fn extract_tags(user_input: &str) -> Vec<String> {
    extract_keywords(user_input, 5)
}

/// Component `i` is `0.1 + 0.05 * i` when the text has an `i`-th keyword.
pub fn extract_belief_vector(text: &str) -> BeliefVector {
    let mut vector = [0.0f32; BELIEF_DIM];
    let keywords = extract_keywords(text, BELIEF_DIM);
    for (i, slot) in vector.iter_mut().enumerate().take(keywords.len()) {
        *slot = 0.1 + 0.05 * i as f32;
    }
    vector
}

pub fn emotion_weight(label: &str) -> f32 {
    match label {
        "joy" => 0.3,
        "sadness" | "anger" | "fear" => 0.4,
        "surprise" | "disgust" => 0.3,
        "love" => 0.35,
        "curious" => 0.25,
        _ => 0.1,
    }
}

pub fn is_interrogative(text: &str) -> bool {
    if text.contains('?') || text.contains('？') {
        return true;
    }
    let lowered = text.to_lowercase();
    QUESTION_WORDS.iter().any(|w| {
        if w.is_ascii() {
            lowered.split(|c: char| !c.is_alphanumeric()).any(|tok| tok == *w)
        } else {
            lowered.contains(w)
        }
    })
}

/// `!` characters plus intensifier occurrences.
pub fn count_emphasis_markers(text: &str) -> usize {
    let lowered = text.to_lowercase();
    let bangs = lowered.chars().filter(|c| *c == '!' || *c == '！').count();
    let words: usize = INTENSIFIERS.iter().map(|w| lowered.matches(w).count()).sum();
    bangs + words
}

/// Weighted event score in `[0, 1]`.
pub fn compute_event_score(
    user_msg: &str,
    _response: &str,
    emotion: &EmotionReading,
    belief_tags: &[String],
) -> f32 {
    let mut score = emotion_weight(&emotion.label);
    score += 0.05 * belief_tags.len() as f32;
    if is_interrogative(user_msg) {
        score += 0.1;
    }
    score += 0.05 * count_emphasis_markers(user_msg) as f32;
    score.clamp(0.0, 1.0)
}

pub fn resonance_from_event_score(score: f32) -> f64 {
    (f64::from(score) * 115.0).clamp(20.0, 100.0)
}

/// Starting importance: the event score picks a point in the upper half of the range.
pub fn initial_importance(score: f32, policy: &DecayPolicy) -> f64 {
    let (min, max) = (policy.min_importance(), policy.max_importance());
    policy.clamp_importance(min + (max - min) * (0.5 + 0.5 * f64::from(score.clamp(0.0, 1.0))))
}
