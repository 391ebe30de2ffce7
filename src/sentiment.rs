use std::sync::Arc;

use crate::error::{ResponderError, ResponderResult};
use crate::generation::{ChatMessage, CompletionRequest, Generate};
use crate::models::{Rating, ReviewInput, Sentiment};

/// Cue stems matched as token prefixes, so "crash" also covers "crashes"
/// and "crashing".
const POSITIVE_CUES: &[&str] = &[
    "amaz", "awesome", "best", "brilliant", "easy", "excellent", "fantastic", "fast", "good",
    "great", "happy", "helpful", "love", "nice", "perfect", "recommend", "smooth", "thank",
    "useful", "wonderful",
];

const NEGATIVE_CUES: &[&str] = &[
    "annoy", "awful", "bad", "broke", "bug", "crash", "declin", "disappoint", "error", "fail",
    "fraud", "frustrat", "hack", "hate", "horrible", "issue", "poor", "problem", "scam", "slow",
    "stuck", "terrible", "useless", "worst",
];

const NEGATORS: &[&str] = &["not", "no", "never", "dont", "doesnt", "didnt", "isnt", "cant", "wont"];

const CLASSIFY_PROMPT: &str = "Analyze the sentiment of this review text. \
     Respond ONLY with one word: 'positive', 'neutral', or 'negative'.";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SentimentMode {
    /// Lexicon heuristic when the review carries no rating.
    #[default]
    Lexicon,
    /// Ask the generation service when the review carries no rating.
    Model,
}

/// Fixed rating table: 4-5 positive, 3 neutral, 1-2 negative.
pub fn from_rating(rating: Rating) -> Sentiment {
    match rating.get() {
        4..=5 => Sentiment::Positive,
        3 => Sentiment::Neutral,
        _ => Sentiment::Negative,
    }
}

/// Lexicon reading of the text alone, independent of any rating.
pub fn text_lean(text: &str) -> Sentiment {
    let mut score = 0i32;
    let mut negate = false;

    for token in tokens(text) {
        if NEGATORS.contains(&token.as_str()) {
            negate = true;
            continue;
        }
        let polarity = if POSITIVE_CUES.iter().any(|cue| token.starts_with(cue)) {
            1
        } else if NEGATIVE_CUES.iter().any(|cue| token.starts_with(cue)) {
            -1
        } else {
            0
        };
        if polarity != 0 {
            score += if negate { -polarity } else { polarity };
            negate = false;
        }
    }

    match score.signum() {
        1 => Sentiment::Positive,
        -1 => Sentiment::Negative,
        _ => Sentiment::Neutral,
    }
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| c.is_whitespace() || (c.is_ascii_punctuation() && c != '\''))
        .map(|t| t.chars().filter(|c| c.is_alphanumeric()).collect::<String>().to_lowercase())
        .filter(|t| !t.is_empty())
}

/// Map a one-word model answer onto a sentiment. Anything unrecognised is
/// read as neutral.
pub fn parse_label(answer: &str) -> Sentiment {
    let word = answer
        .trim()
        .trim_matches(|c: char| !c.is_alphabetic())
        .to_ascii_lowercase();
    match word.as_str() {
        "positive" => Sentiment::Positive,
        "negative" => Sentiment::Negative,
        _ => Sentiment::Neutral,
    }
}

#[derive(Clone, Default)]
pub struct SentimentClassifier {
    mode: SentimentMode,
    generator: Option<Arc<dyn Generate>>,
}

impl SentimentClassifier {
    pub fn lexicon() -> Self {
        Self::default()
    }

    pub fn with_model(generator: Arc<dyn Generate>) -> Self {
        Self {
            mode: SentimentMode::Model,
            generator: Some(generator),
        }
    }

    /// Validate the raw rating and derive the review's sentiment.
    pub async fn classify(&self, text: &str, rating: Option<i64>) -> ResponderResult<ReviewInput> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ResponderError::invalid("review text must not be empty"));
        }
        let rating = rating.map(Rating::new).transpose()?;

        let sentiment = match (rating, self.mode, &self.generator) {
            (Some(r), _, _) => from_rating(r),
            (None, SentimentMode::Model, Some(generator)) => {
                let request = CompletionRequest::classification(vec![
                    ChatMessage::system(CLASSIFY_PROMPT),
                    ChatMessage::user(text),
                ]);
                let answer = generator.complete(&request).await?;
                let sentiment = parse_label(&answer);
                tracing::debug!(answer = %answer.trim(), %sentiment, "model sentiment");
                sentiment
            }
            (None, _, _) => text_lean(text),
        };

        Ok(ReviewInput {
            text: text.to_string(),
            rating,
            sentiment,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServiceFailure;
    use async_trait::async_trait;

    struct FixedAnswer(&'static str);

    #[async_trait]
    impl Generate for FixedAnswer {
        async fn complete(&self, _request: &CompletionRequest) -> ResponderResult<String> {
            Ok(self.0.to_string())
        }
    }

    struct Unreachable;

    #[async_trait]
    impl Generate for Unreachable {
        async fn complete(&self, _request: &CompletionRequest) -> ResponderResult<String> {
            Err(ResponderError::external("generation", ServiceFailure::Timeout, "deadline"))
        }
    }

    #[tokio::test]
    async fn rating_table_is_fixed() {
        let classifier = SentimentClassifier::lexicon();
        let expected = [
            (1, Sentiment::Negative),
            (2, Sentiment::Negative),
            (3, Sentiment::Neutral),
            (4, Sentiment::Positive),
            (5, Sentiment::Positive),
        ];
        for (rating, sentiment) in expected {
            // Text deliberately disagrees; the rating wins.
            let review = classifier.classify("worst app ever", Some(rating)).await.unwrap();
            assert_eq!(review.sentiment, sentiment, "rating {rating}");
            assert_eq!(review.rating.map(Rating::get), Some(rating as u8));
        }
    }

    #[tokio::test]
    async fn out_of_range_rating_is_invalid_input() {
        let classifier = SentimentClassifier::lexicon();
        for rating in [0, 6, -1, 100] {
            let err = classifier.classify("fine", Some(rating)).await.unwrap_err();
            assert!(matches!(err, ResponderError::InvalidInput(_)), "rating {rating}");
        }
    }

    #[tokio::test]
    async fn empty_text_is_invalid_input() {
        let err = SentimentClassifier::lexicon()
            .classify("   ", Some(4))
            .await
            .unwrap_err();
        assert!(matches!(err, ResponderError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn lexicon_used_without_rating() {
        let classifier = SentimentClassifier::lexicon();
        let review = classifier.classify("Great app!", None).await.unwrap();
        assert_eq!(review.sentiment, Sentiment::Positive);
        assert_eq!(review.rating, None);
    }

    #[test]
    fn lexicon_handles_negation_and_stems() {
        assert_eq!(text_lean("Crashes constantly"), Sentiment::Negative);
        assert_eq!(text_lean("The app is not good"), Sentiment::Negative);
        assert_eq!(text_lean("Never had a problem, love it"), Sentiment::Positive);
        assert_eq!(text_lean("How do I update my mobile number?"), Sentiment::Neutral);
    }

    #[tokio::test]
    async fn model_mode_parses_one_word_answer() {
        let classifier = SentimentClassifier::with_model(Arc::new(FixedAnswer(" Negative.\n")));
        let review = classifier.classify("my card was declined", None).await.unwrap();
        assert_eq!(review.sentiment, Sentiment::Negative);
    }

    #[tokio::test]
    async fn model_mode_unrecognised_answer_is_neutral() {
        let classifier = SentimentClassifier::with_model(Arc::new(FixedAnswer("mixed feelings")));
        let review = classifier.classify("it is what it is", None).await.unwrap();
        assert_eq!(review.sentiment, Sentiment::Neutral);
    }

    #[tokio::test]
    async fn model_mode_failure_propagates() {
        let classifier = SentimentClassifier::with_model(Arc::new(Unreachable));
        let err = classifier.classify("hmm", None).await.unwrap_err();
        assert!(err.is_external());
    }

    #[tokio::test]
    async fn model_mode_skips_call_when_rated() {
        let classifier = SentimentClassifier::with_model(Arc::new(Unreachable));
        let review = classifier.classify("hmm", Some(3)).await.unwrap();
        assert_eq!(review.sentiment, Sentiment::Neutral);
    }
}
