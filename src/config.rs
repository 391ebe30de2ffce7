use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Result, anyhow};

use crate::cache::CACHE_FILENAME;
use crate::composer::FailurePolicy;
use crate::embedding::DEFAULT_EMBEDDING_MODEL;
use crate::generation::DEFAULT_CHAT_MODEL;
use crate::models::{BrandVoice, DEFAULT_MIN_SIMILARITY, DEFAULT_TOP_K};
use crate::openai::DEFAULT_BASE_URL;
use crate::retrieval::RetrievalSettings;
use crate::sentiment::SentimentMode;

pub const DEFAULT_PORT: u16 = 19540;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedderKind {
    OpenAi,
    Onnx,
    Hash,
}

impl FromStr for EmbedderKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(EmbedderKind::OpenAi),
            "onnx" => Ok(EmbedderKind::Onnx),
            "hash" => Ok(EmbedderKind::Hash),
            other => Err(anyhow!("unknown embedder '{}' (expected openai, onnx or hash)", other)),
        }
    }
}

pub fn parse_sentiment_mode(s: &str) -> Result<SentimentMode> {
    match s.trim().to_ascii_lowercase().as_str() {
        "lexicon" => Ok(SentimentMode::Lexicon),
        "model" => Ok(SentimentMode::Model),
        other => Err(anyhow!("unknown sentiment mode '{}' (expected lexicon or model)", other)),
    }
}

/// Runtime settings. Environment first, then command-line flags on top.
#[derive(Debug, Clone)]
pub struct Settings {
    pub transport: String,
    pub port: u16,
    pub faq_path: Option<PathBuf>,
    pub embedder: EmbedderKind,
    pub model_dir: String,
    pub cache_path: Option<PathBuf>,
    pub top_k: usize,
    pub min_similarity: f32,
    pub voice: BrandVoice,
    pub brand_name: String,
    pub fallback: FailurePolicy,
    pub sentiment: SentimentMode,
    pub watch: bool,
    pub debug: bool,
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub chat_model: String,
    pub embedding_model: String,
    pub review: Option<String>,
    pub rating: Option<i64>,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from any key lookup; `from_env` passes the process
    /// environment.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| get(key).filter(|v| !v.trim().is_empty());

        let openai_api_key = var("OPENAI_API_KEY");
        let embedder = match var("REVIEW_EMBEDDER") {
            Some(v) => v.parse()?,
            None if openai_api_key.is_some() => EmbedderKind::OpenAi,
            None => EmbedderKind::Hash,
        };
        let model_dir = var("REVIEW_MODEL_DIR").unwrap_or_else(|| {
            std::env::current_exe()
                .ok()
                .and_then(|p| p.parent().map(|d| d.join("embedding_model")))
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_else(|| "./embedding_model".to_string())
        });

        Ok(Self {
            transport: var("REVIEW_TRANSPORT").unwrap_or_else(|| "stdio".to_string()),
            port: parse_var(&var, "REVIEW_PORT")?.unwrap_or(DEFAULT_PORT),
            faq_path: var("REVIEW_FAQ_PATH").map(PathBuf::from),
            embedder,
            model_dir,
            cache_path: var("REVIEW_CACHE_PATH").map(PathBuf::from),
            top_k: parse_var(&var, "REVIEW_TOP_K")?.unwrap_or(DEFAULT_TOP_K),
            min_similarity: parse_var(&var, "REVIEW_MIN_SIMILARITY")?
                .unwrap_or(DEFAULT_MIN_SIMILARITY),
            voice: match var("REVIEW_BRAND_VOICE") {
                Some(v) => v.parse()?,
                None => BrandVoice::default(),
            },
            brand_name: var("REVIEW_BRAND_NAME").unwrap_or_else(|| "our team".to_string()),
            fallback: match var("REVIEW_FALLBACK") {
                Some(v) => v.parse()?,
                None => FailurePolicy::default(),
            },
            sentiment: match var("REVIEW_SENTIMENT") {
                Some(v) => parse_sentiment_mode(&v)?,
                None => SentimentMode::default(),
            },
            watch: false,
            debug: false,
            openai_api_key,
            openai_base_url: var("OPENAI_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            chat_model: var("REVIEW_CHAT_MODEL").unwrap_or_else(|| DEFAULT_CHAT_MODEL.to_string()),
            embedding_model: var("REVIEW_EMBEDDING_MODEL")
                .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string()),
            review: None,
            rating: None,
        })
    }

    pub fn retrieval(&self) -> RetrievalSettings {
        RetrievalSettings {
            top_k: self.top_k,
            min_similarity: self.min_similarity,
            ..RetrievalSettings::default()
        }
    }

    /// Explicit cache path, else a cache file beside the dataset.
    pub fn resolved_cache_path(&self) -> Option<PathBuf> {
        if let Some(p) = &self.cache_path {
            return Some(p.clone());
        }
        let faq = self.faq_path.as_ref()?;
        Some(match faq.parent().filter(|d| !d.as_os_str().is_empty()) {
            Some(dir) => dir.join(CACHE_FILENAME),
            None => PathBuf::from(CACHE_FILENAME),
        })
    }

    pub fn require_api_key(&self) -> Result<&str> {
        self.openai_api_key
            .as_deref()
            .ok_or_else(|| anyhow!("OPENAI_API_KEY is required but not set"))
    }
}

fn parse_var<T>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    var(key)
        .map(|v| {
            v.trim()
                .parse::<T>()
                .map_err(|e| anyhow!("invalid {}: {}", key, e))
        })
        .transpose()
}
