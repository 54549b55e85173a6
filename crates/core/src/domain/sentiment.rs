use serde::{Deserialize, Serialize};

/// Tone of a single user message, kept on the session for analytics.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
    Frustrated,
    Excited,
    Confused,
}

const POSITIVE_KEYWORDS: &[&str] = &[
    "great",
    "excellent",
    "amazing",
    "love",
    "perfect",
    "wonderful",
    "fantastic",
    "awesome",
    "good",
    "yes",
    "sure",
    "interested",
    "happy",
    "pleased",
    "satisfied",
];
const NEGATIVE_KEYWORDS: &[&str] = &[
    "bad",
    "terrible",
    "awful",
    "hate",
    "worst",
    "disappointed",
    "angry",
    "upset",
    "no",
    "not",
    "don't",
    "won't",
    "can't",
    "unhappy",
    "dissatisfied",
];
const FRUSTRATED_KEYWORDS: &[&str] = &[
    "frustrated",
    "frustrating",
    "annoyed",
    "irritated",
    "fed up",
    "tired of",
    "sick of",
    "enough",
    "ridiculous",
];
const EXCITED_KEYWORDS: &[&str] = &[
    "excited",
    "thrilled",
    "can't wait",
    "looking forward",
    "eager",
    "enthusiastic",
    "pumped",
];
const CONFUSED_KEYWORDS: &[&str] = &[
    "confused",
    "confusing",
    "don't understand",
    "unclear",
    "not sure",
    "what do you mean",
    "help me understand",
];

impl Sentiment {
    /// Keyword classifier over whole words. Frustration, excitement and
    /// confusion win outright in that order; otherwise positive and negative
    /// keyword counts are compared.
    pub fn classify(message: &str) -> Self {
        let lowered = message.to_lowercase().replace('\u{2019}', "'");
        let words = lowered
            .split(|c: char| !(c.is_alphanumeric() || c == '\''))
            .filter(|word| !word.is_empty())
            .collect::<Vec<_>>();
        if words.is_empty() {
            return Self::Neutral;
        }

        let padded = format!(" {} ", words.join(" "));
        let hits = |keywords: &[&str]| {
            keywords.iter().filter(|keyword| padded.contains(&format!(" {keyword} "))).count()
        };

        if hits(FRUSTRATED_KEYWORDS) > 0 {
            return Self::Frustrated;
        }
        if hits(EXCITED_KEYWORDS) > 0 {
            return Self::Excited;
        }
        if hits(CONFUSED_KEYWORDS) > 0 {
            return Self::Confused;
        }

        let (positive, negative) = (hits(POSITIVE_KEYWORDS), hits(NEGATIVE_KEYWORDS));
        match positive.cmp(&negative) {
            std::cmp::Ordering::Greater => Self::Positive,
            std::cmp::Ordering::Less => Self::Negative,
            std::cmp::Ordering::Equal => Self::Neutral,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Positive => "positive",
            Self::Neutral => "neutral",
            Self::Negative => "negative",
            Self::Frustrated => "frustrated",
            Self::Excited => "excited",
            Self::Confused => "confused",
        }
    }
}
