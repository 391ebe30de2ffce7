use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use crate::composer::ResponseComposer;
use crate::dataset;
use crate::embedding::Embed;
use crate::error::{ResponderError, ResponderResult};
use crate::models::{BrandVoice, FaqEntry, ResponseOutcome, ResponseRequest, RetrievalResult};
use crate::retrieval::{FaqIndex, RetrievalSettings};
use crate::sentiment::SentimentClassifier;

/// The review pipeline: classify, retrieve against the current FAQ
/// snapshot, compose.
pub struct Responder {
    embedder: Arc<dyn Embed>,
    classifier: SentimentClassifier,
    composer: ResponseComposer,
    settings: RetrievalSettings,
    default_voice: BrandVoice,
    dataset_path: Option<PathBuf>,
    index: RwLock<Arc<FaqIndex>>,
    gate: Mutex<()>,
    /// Held across read, build and swap so snapshots install in the order
    /// their sources were read.
    reload_lock: Mutex<()>,
}

impl Responder {
    pub fn new(
        embedder: Arc<dyn Embed>,
        classifier: SentimentClassifier,
        composer: ResponseComposer,
    ) -> Self {
        let index = Arc::new(FaqIndex::empty(embedder.clone()));
        Self {
            embedder,
            classifier,
            composer,
            settings: RetrievalSettings::default(),
            default_voice: BrandVoice::default(),
            dataset_path: None,
            index: RwLock::new(index),
            gate: Mutex::new(()),
            reload_lock: Mutex::new(()),
        }
    }

    pub fn with_settings(mut self, settings: RetrievalSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_default_voice(mut self, voice: BrandVoice) -> Self {
        self.default_voice = voice;
        self
    }

    pub fn with_dataset_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.dataset_path = Some(path.into());
        self
    }

    pub fn dataset_path(&self) -> Option<&std::path::Path> {
        self.dataset_path.as_deref()
    }

    /// The snapshot currently serving requests.
    pub async fn snapshot(&self) -> Arc<FaqIndex> {
        self.index.read().await.clone()
    }

    /// Build a new snapshot from `entries` and swap it in. On failure the
    /// previous snapshot keeps serving.
    pub async fn install(&self, entries: Vec<FaqEntry>) -> ResponderResult<usize> {
        let _building = self.reload_lock.lock().await;
        self.build_and_swap(entries).await
    }

    async fn build_and_swap(&self, entries: Vec<FaqEntry>) -> ResponderResult<usize> {
        let index = FaqIndex::build(entries, self.embedder.clone()).await?;
        let count = index.len();
        *self.index.write().await = Arc::new(index);
        Ok(count)
    }

    /// Re-read the configured dataset file and install it.
    pub async fn reload(&self) -> ResponderResult<usize> {
        let path = self
            .dataset_path
            .as_ref()
            .ok_or_else(|| ResponderError::dataset("no FAQ dataset path configured"))?;
        let _building = self.reload_lock.lock().await;
        let loaded = match dataset::load_faqs(path) {
            Ok(entries) => self.build_and_swap(entries).await,
            Err(e) => Err(e),
        };
        match loaded {
            Ok(count) => {
                tracing::info!("Reloaded {} FAQ entries from {}", count, path.display());
                Ok(count)
            }
            Err(e) => {
                tracing::warn!("FAQ reload failed, keeping previous index: {}", e);
                Err(e)
            }
        }
    }

    /// Plain top-k lookup against the current snapshot.
    pub async fn search(&self, query: &str, k: Option<usize>) -> ResponderResult<RetrievalResult> {
        if query.trim().is_empty() {
            return Err(ResponderError::invalid("search query must not be empty"));
        }
        let index = self.snapshot().await;
        index.query(query, k.unwrap_or(self.settings.top_k)).await
    }

    pub async fn respond(
        &self,
        text: &str,
        rating: Option<i64>,
        brand_voice: Option<&str>,
    ) -> ResponderResult<ResponseOutcome> {
        let brand_voice = match brand_voice {
            Some(v) => v.parse::<BrandVoice>()?,
            None => self.default_voice,
        };

        let _turn = self.gate.lock().await;
        let review = self.classifier.classify(text, rating).await?;
        let index = self.snapshot().await;
        let faq_context = index.query_review(&review.text, &self.settings).await?;
        tracing::info!(
            sentiment = %review.sentiment,
            matches = faq_context.len(),
            voice = brand_voice.as_str(),
            "composing reply"
        );

        let request = ResponseRequest {
            review,
            faq_context,
            brand_voice,
        };
        let generated = self.composer.compose(&request).await?;

        Ok(ResponseOutcome {
            reply: generated,
            sentiment: request.review.sentiment,
            rating: request.review.rating,
            brand_voice,
            references: request.faq_context,
        })
    }
}
