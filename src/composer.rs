use std::fmt::Write as _;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{ResponderError, ResponderResult, ServiceFailure};
use crate::generation::{ChatMessage, CompletionRequest, Generate};
use crate::models::{
    BrandVoice, GeneratedResponse, MAX_PROMPT_FAQS, Rating, ResponseRequest, RetrievalResult,
    Sentiment,
};
use crate::sentiment;

/// What to do when the generation call fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Surface the error to the caller.
    #[default]
    Propagate,
    /// Answer with a rating-keyed holding reply plus the top FAQ answers.
    Template,
}

impl FromStr for FailurePolicy {
    type Err = ResponderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "propagate" | "error" => Ok(FailurePolicy::Propagate),
            "template" => Ok(FailurePolicy::Template),
            other => Err(ResponderError::invalid(format!(
                "unknown failure policy '{other}' (expected propagate or template)"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToneRules {
    pub opening: &'static str,
    pub closing: &'static str,
    pub style: &'static str,
}

/// Rating used for tone when the review has none.
fn tone_rating(rating: Option<Rating>, sentiment: Sentiment) -> u8 {
    match (rating, sentiment) {
        (Some(r), _) => r.get(),
        (None, Sentiment::Positive) => 4,
        (None, Sentiment::Neutral) => 3,
        (None, Sentiment::Negative) => 2,
    }
}

/// Tone per rating, adjusted when the text pulls the other way.
pub fn tone_rules(rating: Option<Rating>, sentiment: Sentiment, text_signal: Sentiment) -> ToneRules {
    let stars = tone_rating(rating, sentiment);
    let mut rules = match stars {
        5 => ToneRules {
            opening: "We're thrilled to hear about your experience!",
            closing: "We appreciate you being a valued customer!",
            style: "enthusiastic and appreciative",
        },
        4 => ToneRules {
            opening: "Thank you for your positive feedback!",
            closing: "We're glad you had a good experience with us.",
            style: "warm and professional",
        },
        2 => ToneRules {
            opening: "We appreciate you bringing this to our attention.",
            closing: "Please don't hesitate to reach out if you need further assistance.",
            style: "solution-focused",
        },
        1 => ToneRules {
            opening: "We sincerely apologize for your experience.",
            closing: "Our support team is ready to help resolve this for you.",
            style: "empathetic and action-oriented",
        },
        _ => ToneRules {
            opening: "Thanks for sharing your feedback with us.",
            closing: "Let us know if there's anything else we can assist with.",
            style: "neutral and helpful",
        },
    };

    match text_signal {
        Sentiment::Negative => {
            if stars >= 4 {
                rules.opening = "We appreciate your honest feedback.";
                rules.style = "empathetic and solution-focused";
            }
            rules.closing = "We're committed to improving your experience.";
        }
        Sentiment::Positive if stars <= 2 => {
            rules.opening = "We appreciate your kind words and take your feedback seriously.";
            rules.style = "appreciative and solution-focused";
        }
        _ => {}
    }
    rules
}

pub fn voice_guidance(voice: BrandVoice) -> &'static str {
    match voice {
        BrandVoice::Professional => {
            "Professional: courteous, precise and composed. Plain language, no slang, no exclamation marks."
        }
        BrandVoice::Friendly => {
            "Friendly: warm and conversational, like a helpful person on the team. Contractions are fine."
        }
        BrandVoice::Supportive => {
            "Supportive: patient and reassuring. Acknowledge the customer's feelings before practical help."
        }
        BrandVoice::Enthusiastic => {
            "Enthusiastic: upbeat and energetic, celebrating what went well. At most one exclamation mark per paragraph."
        }
    }
}

fn format_faq_context(context: &RetrievalResult) -> String {
    if context.is_empty() {
        return "None apply. Reply generically and do not invent policies, fixes, timelines or contact details."
            .to_string();
    }
    let mut out = String::from("Use only what is relevant to the review:\n");
    for (i, m) in context.matches.iter().take(MAX_PROMPT_FAQS).enumerate() {
        let _ = writeln!(out, "{}. {}\n   → {}", i + 1, m.entry.question, m.entry.answer);
    }
    out
}

pub fn build_messages(request: &ResponseRequest, brand_name: &str) -> Vec<ChatMessage> {
    let review = &request.review;
    let text_signal = match review.rating {
        Some(_) => sentiment::text_lean(&review.text),
        None => review.sentiment,
    };
    let rules = tone_rules(review.rating, review.sentiment, text_signal);
    let rating_line = match review.rating {
        Some(r) => format!("{r} stars"),
        None => "not given".to_string(),
    };

    let system = format!(
        "You are crafting the official {brand} reply to a public customer review.\n\
         \n\
         REVIEW DETAILS:\n\
         Rating: {rating_line}\n\
         Sentiment: {sentiment}\n\
         \n\
         TONE:\n\
         - Style: {style}\n\
         - Open in the spirit of: \"{opening}\"\n\
         - Close in the spirit of: \"{closing}\"\n\
         - Brand voice: {voice}\n\
         - Match the {sentiment} sentiment; avoid corporate jargon\n\
         \n\
         REFERENCE ANSWERS:\n\
         {faqs}\n\
         \n\
         FORMAT:\n\
         - Respond directly to the review, with no greeting and no sign-off\n\
         - Exactly 3 paragraphs separated by blank lines, 2-4 sentences each\n\
         - First paragraph acknowledges the feedback, second addresses the main issue, third gives next steps\n\
         - Never use bullet points, numbered lists or email signatures\n\
         - No contact information unless the review is about reaching support",
        brand = brand_name,
        sentiment = review.sentiment,
        style = rules.style,
        opening = rules.opening,
        closing = rules.closing,
        voice = voice_guidance(request.brand_voice),
        faqs = format_faq_context(&request.faq_context).trim_end(),
    );

    vec![ChatMessage::system(system), ChatMessage::user(review.text.clone())]
}

const GREETING_PREFIXES: &[&str] = &["dear", "hi ", "hello"];
const SIGN_OFF_PREFIXES: &[&str] =
    &["best", "kind regards", "warm regards", "regards", "sincerely"];

/// Normalise a completion into at most three plain paragraphs. Greeting
/// lines are dropped; a sign-off line ends the reply, taking the signature
/// under it along. `None` when nothing usable remains.
pub fn format_reply(raw: &str) -> Option<String> {
    let mut paragraphs: Vec<String> = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in raw.lines().map(str::trim) {
        if line.is_empty() {
            if !current.is_empty() {
                paragraphs.push(current.join(" "));
                current.clear();
            }
            continue;
        }
        let lower = line.to_lowercase();
        if SIGN_OFF_PREFIXES.iter().any(|p| lower.starts_with(p)) {
            break;
        }
        if GREETING_PREFIXES.iter().any(|p| lower.starts_with(p)) {
            continue;
        }
        current.push(line);
    }
    if !current.is_empty() {
        paragraphs.push(current.join(" "));
    }

    paragraphs.truncate(3);
    if paragraphs.is_empty() {
        None
    } else {
        Some(paragraphs.join("\n\n"))
    }
}

/// Holding reply used only under [`FailurePolicy::Template`].
pub fn fallback_reply(rating: Option<Rating>, sentiment: Sentiment, context: &RetrievalResult) -> String {
    let base = match tone_rating(rating, sentiment) {
        5 => "Thank you! We're experiencing high volume but will respond soon.",
        4 => "Thanks for your patience. Our team is reviewing your feedback.",
        2 => "We're working to resolve this.",
        1 => "We're prioritizing this issue.",
        _ => "We've noted your feedback.",
    };
    if context.is_empty() {
        return base.to_string();
    }
    let solutions: Vec<String> = context
        .matches
        .iter()
        .take(2)
        .map(|m| format!("- {}", m.entry.answer))
        .collect();
    format!("{base}\n\nTry these solutions:\n{}", solutions.join("\n"))
}

#[derive(Clone)]
pub struct ResponseComposer {
    generator: Arc<dyn Generate>,
    brand_name: String,
    policy: FailurePolicy,
}

impl ResponseComposer {
    pub fn new(generator: Arc<dyn Generate>, brand_name: impl Into<String>) -> Self {
        Self {
            generator,
            brand_name: brand_name.into(),
            policy: FailurePolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub async fn compose(&self, request: &ResponseRequest) -> ResponderResult<GeneratedResponse> {
        let messages = build_messages(request, &self.brand_name);
        let completion = CompletionRequest::reply(messages);

        let outcome = match self.generator.complete(&completion).await {
            Ok(raw) => format_reply(&raw).ok_or_else(|| {
                ResponderError::external(
                    "generation",
                    ServiceFailure::Malformed,
                    "completion contained no usable reply text",
                )
            }),
            Err(e) => Err(e),
        };

        match (outcome, self.policy) {
            (Ok(text), _) => Ok(GeneratedResponse {
                text,
                fallback: false,
            }),
            (Err(e), FailurePolicy::Template) if e.is_external() => {
                tracing::warn!("Generation failed, using template reply: {}", e);
                Ok(GeneratedResponse {
                    text: fallback_reply(
                        request.review.rating,
                        request.review.sentiment,
                        &request.faq_context,
                    ),
                    fallback: true,
                })
            }
            (Err(e), _) => Err(e),
        }
    }
}
