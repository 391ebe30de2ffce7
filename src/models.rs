use std::fmt;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::ResponderError;

// ── Tool Parameters ──

#[derive(Debug, Deserialize, JsonSchema)]
pub struct RespondParams {
    /// The customer review text
    pub text: String,
    /// Star rating from 1 to 5, if the review has one
    pub rating: Option<i64>,
    /// Brand voice: professional, friendly, supportive or enthusiastic
    pub brand_voice: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SearchFaqsParams {
    /// Text to match against FAQ questions
    pub query: String,
    /// Maximum number of matches (default: 3)
    pub k: Option<usize>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ReloadFaqsParams {}

// ── Domain Records ──

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaqEntry {
    pub question: String,
    pub answer: String,
}

impl FaqEntry {
    pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            answer: answer.into(),
        }
    }
}

/// A star rating, always within 1..=5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Rating(u8);

impl Rating {
    pub fn new(value: i64) -> Result<Self, ResponderError> {
        if (1..=5).contains(&value) {
            Ok(Rating(value as u8))
        } else {
            Err(ResponderError::invalid(format!(
                "rating must be between 1 and 5, got {value}"
            )))
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl fmt::Display for Rating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
}

impl Sentiment {
    pub fn as_str(self) -> &'static str {
        match self {
            Sentiment::Positive => "positive",
            Sentiment::Neutral => "neutral",
            Sentiment::Negative => "negative",
        }
    }
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrandVoice {
    Professional,
    #[default]
    Friendly,
    Supportive,
    Enthusiastic,
}

impl BrandVoice {
    pub const ALL: [BrandVoice; 4] = [
        BrandVoice::Professional,
        BrandVoice::Friendly,
        BrandVoice::Supportive,
        BrandVoice::Enthusiastic,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            BrandVoice::Professional => "professional",
            BrandVoice::Friendly => "friendly",
            BrandVoice::Supportive => "supportive",
            BrandVoice::Enthusiastic => "enthusiastic",
        }
    }
}

impl FromStr for BrandVoice {
    type Err = ResponderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        BrandVoice::ALL
            .into_iter()
            .find(|v| v.as_str() == wanted)
            .ok_or_else(|| {
                ResponderError::invalid(format!(
                    "unknown brand voice '{s}' (expected professional, friendly, supportive or enthusiastic)"
                ))
            })
    }
}

#[derive(Debug, Clone)]
pub struct ReviewInput {
    pub text: String,
    pub rating: Option<Rating>,
    pub sentiment: Sentiment,
}

#[derive(Debug, Clone, Serialize)]
pub struct FaqMatch {
    pub entry: FaqEntry,
    pub score: f32,
}

/// Matches ordered by descending score.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct RetrievalResult {
    pub matches: Vec<FaqMatch>,
}

impl RetrievalResult {
    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn top(&self) -> Option<&FaqMatch> {
        self.matches.first()
    }
}

#[derive(Debug, Clone)]
pub struct ResponseRequest {
    pub review: ReviewInput,
    pub faq_context: RetrievalResult,
    pub brand_voice: BrandVoice,
}

#[derive(Debug, Clone, Serialize)]
pub struct GeneratedResponse {
    pub text: String,
    /// Set when the configured template fallback produced the text.
    pub fallback: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponseOutcome {
    pub reply: GeneratedResponse,
    pub sentiment: Sentiment,
    pub rating: Option<Rating>,
    pub brand_voice: BrandVoice,
    pub references: RetrievalResult,
}

// ── Constants ──
pub const DEFAULT_TOP_K: usize = 3;
pub const DEFAULT_MIN_SIMILARITY: f32 = 0.10;
pub const MAX_PROMPT_FAQS: usize = 3;
pub const EMBED_BATCH_SIZE: usize = 50;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rating_rejects_out_of_range() {
        assert!(Rating::new(0).is_err());
        assert!(Rating::new(6).is_err());
        assert!(Rating::new(-3).is_err());
        assert_eq!(Rating::new(5).unwrap().get(), 5);
    }

    #[test]
    fn brand_voice_parses_case_insensitively() {
        assert_eq!("Professional".parse::<BrandVoice>().unwrap(), BrandVoice::Professional);
        assert_eq!(" enthusiastic ".parse::<BrandVoice>().unwrap(), BrandVoice::Enthusiastic);
        assert!(matches!(
            "sarcastic".parse::<BrandVoice>(),
            Err(ResponderError::InvalidInput(_))
        ));
    }

    #[test]
    fn default_voice_is_friendly() {
        assert_eq!(BrandVoice::default(), BrandVoice::Friendly);
    }
}
