//! Recall trigger: decides whether an utterance refers to the past (or to a
//! planned future) closely enough to be worth a recall.
//!
//! Three signals, any one of which fires: a temporal-reference keyword, a
//! past-tense question form, or a relative-date pattern. Plain present-tense
//! words such as "오늘" deliberately do not fire on their own.

use std::sync::LazyLock;

use regex::Regex;

const TEMPORAL_KEYWORDS: &[&str] = &[
    "어제", "그제", "그저께", "지난주", "지난번", "저번", "이전에", "예전", "아까", "다음주",
    "이번주", "지난달", "다음달", "작년", "재작년", "내년", "일정", "약속", "기억", "회상",
    "yesterday", "last week", "next week", "last month", "last year", "remember", "earlier",
    "previously", "last time", "schedule", "appointment", "recall",
];

const PAST_TENSE_FORMS: &[&str] = &["했었", "했던", "말했", "얘기했", "이야기했", "물어봤", "갔었", "봤었"];

static RELATIVE_DATE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"\d+\s*(일|주|달|개월|년)\s*(전|후|뒤)").expect("korean relative date"),
        Regex::new(r"(?i)\b\d+\s*(day|week|month|year)s?\s+(ago|later)\b")
            .expect("english relative date"),
        Regex::new(r"지난\s*(월|화|수|목|금|토|일)요일").expect("korean last weekday"),
        Regex::new(r"(?i)\blast\s+(monday|tuesday|wednesday|thursday|friday|saturday|sunday)\b")
            .expect("english last weekday"),
    ]
});

/// Which signal fired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    Keyword(&'static str),
    PastTense(&'static str),
    RelativeDate,
}

/// Detect a recall trigger in `text`.
pub fn detect(text: &str) -> Option<Trigger> {
    let lowered = text.to_lowercase();
    if lowered.trim().is_empty() {
        return None;
    }
    if let Some(kw) = TEMPORAL_KEYWORDS.iter().find(|kw| lowered.contains(*kw)) {
        return Some(Trigger::Keyword(*kw));
    }
    if let Some(form) = PAST_TENSE_FORMS.iter().find(|f| lowered.contains(*f)) {
        return Some(Trigger::PastTense(*form));
    }
    if RELATIVE_DATE_PATTERNS.iter().any(|re| re.is_match(&lowered)) {
        return Some(Trigger::RelativeDate);
    }
    None
}

pub fn is_recall_trigger(text: &str) -> bool {
    detect(text).is_some()
}
