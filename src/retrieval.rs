use std::collections::HashMap;
use std::sync::Arc;

use crate::embedding::Embed;
use crate::error::{ResponderError, ResponderResult, ServiceFailure};
use crate::models::{DEFAULT_MIN_SIMILARITY, DEFAULT_TOP_K, FaqEntry, FaqMatch, RetrievalResult};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrievalSettings {
    pub top_k: usize,
    pub min_similarity: f32,
    /// Split compound reviews into sub-questions before matching.
    pub split_questions: bool,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            min_similarity: DEFAULT_MIN_SIMILARITY,
            split_questions: true,
        }
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let (dot, na, nb) = a
        .iter()
        .zip(b)
        .fold((0.0f32, 0.0f32, 0.0f32), |(d, aa, bb), (x, y)| {
            (d + x * y, aa + x * x, bb + y * y)
        });
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na.sqrt() * nb.sqrt())
    }
}

/// Split a compound review into sub-questions at question marks and at the
/// words "and"/"also". Falls back to the whole text.
pub fn split_questions(text: &str) -> Vec<String> {
    let mut parts = Vec::new();
    for chunk in text.split('?') {
        let mut current: Vec<&str> = Vec::new();
        for word in chunk.split_whitespace() {
            let bare = word
                .trim_matches(|c: char| !c.is_alphanumeric())
                .to_ascii_lowercase();
            if bare == "and" || bare == "also" {
                push_part(&mut parts, &current);
                current.clear();
            } else {
                current.push(word);
            }
        }
        push_part(&mut parts, &current);
    }
    if parts.is_empty() {
        vec![text.trim().to_string()]
    } else {
        parts
    }
}

fn push_part(parts: &mut Vec<String>, words: &[&str]) {
    let joined = words.join(" ");
    let part = joined.trim().trim_end_matches([',', '.', ';', '!']).trim();
    if part.chars().any(char::is_alphabetic) {
        parts.push(format!("{part}?"));
    }
}

/// Immutable similarity index over FAQ question embeddings. Built once per
/// dataset load and shared behind an `Arc`; reloads build a new one.
pub struct FaqIndex {
    entries: Vec<FaqEntry>,
    vectors: Vec<Vec<f32>>,
    dim: Option<usize>,
    embedder: Arc<dyn Embed>,
}

impl FaqIndex {
    pub fn empty(embedder: Arc<dyn Embed>) -> Self {
        Self {
            entries: Vec::new(),
            vectors: Vec::new(),
            dim: None,
            embedder,
        }
    }

    /// Embed every FAQ question with `embedder`. The same embedder is kept
    /// and used for every query against this index.
    pub async fn build(entries: Vec<FaqEntry>, embedder: Arc<dyn Embed>) -> ResponderResult<Self> {
        if entries.is_empty() {
            tracing::info!("Built empty FAQ index");
            return Ok(Self::empty(embedder));
        }

        let questions: Vec<String> = entries.iter().map(|e| e.question.clone()).collect();
        let vectors = embedder.embed_batch(&questions).await?;
        if vectors.len() != entries.len() {
            return Err(ResponderError::external(
                "embedding",
                ServiceFailure::Malformed,
                format!("{} FAQ questions but {} vectors", entries.len(), vectors.len()),
            ));
        }

        let dim = vectors[0].len();
        if let Some(bad) = vectors.iter().position(|v| v.len() != dim) {
            return Err(ResponderError::external(
                "embedding",
                ServiceFailure::Malformed,
                format!("vector {} has dimension {}, expected {}", bad, vectors[bad].len(), dim),
            ));
        }

        tracing::info!(
            "Built FAQ index with {} entries (model {}, dim {})",
            entries.len(),
            embedder.model_id(),
            dim
        );
        Ok(Self {
            entries,
            vectors,
            dim: Some(dim),
            embedder,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn model_id(&self) -> &str {
        self.embedder.model_id()
    }

    /// Top-k nearest entries for `text`, best first, without a threshold.
    pub async fn query(&self, text: &str, k: usize) -> ResponderResult<RetrievalResult> {
        if self.is_empty() || k == 0 {
            return Ok(RetrievalResult::default());
        }
        let vector = self.embedder.embed_query(text).await?;
        let hits = self.search(&vector, k, f32::NEG_INFINITY)?;
        Ok(self.to_result(hits))
    }

    /// Match a review, optionally question by question, keeping each FAQ
    /// entry once at its best score. Matches below `min_similarity` are
    /// dropped.
    pub async fn query_review(
        &self,
        text: &str,
        settings: &RetrievalSettings,
    ) -> ResponderResult<RetrievalResult> {
        if self.is_empty() || settings.top_k == 0 {
            return Ok(RetrievalResult::default());
        }

        let parts: Vec<String> = if settings.split_questions {
            split_questions(text)
        } else {
            vec![text.to_string()]
        }
        .into_iter()
        .map(|p| p.trim().to_lowercase())
        .collect();
        tracing::debug!(parts = ?parts, "matching review against FAQs");

        let vectors = self.embedder.embed_queries(&parts).await?;
        let mut best: HashMap<usize, f32> = HashMap::new();
        for vector in &vectors {
            for (idx, score) in self.search(vector, settings.top_k, settings.min_similarity)? {
                let slot = best.entry(idx).or_insert(score);
                if score > *slot {
                    *slot = score;
                }
            }
        }

        let mut hits: Vec<(usize, f32)> = best.into_iter().collect();
        rank(&mut hits);
        hits.truncate(settings.top_k);
        Ok(self.to_result(hits))
    }

    /// Exact cosine search over the snapshot. Entries with an empty answer
    /// are skipped.
    pub fn search(
        &self,
        vector: &[f32],
        k: usize,
        min_similarity: f32,
    ) -> ResponderResult<Vec<(usize, f32)>> {
        let Some(dim) = self.dim else {
            return Ok(Vec::new());
        };
        if vector.len() != dim {
            return Err(ResponderError::invalid(format!(
                "query vector has dimension {}, index uses {} ({})",
                vector.len(),
                dim,
                self.model_id()
            )));
        }

        let mut hits: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .filter(|(idx, _)| !self.entries[*idx].answer.is_empty())
            .map(|(idx, v)| (idx, cosine_similarity(vector, v)))
            .filter(|(_, score)| *score >= min_similarity)
            .collect();
        rank(&mut hits);
        hits.truncate(k);
        Ok(hits)
    }

    fn to_result(&self, hits: Vec<(usize, f32)>) -> RetrievalResult {
        RetrievalResult {
            matches: hits
                .into_iter()
                .map(|(idx, score)| FaqMatch {
                    entry: self.entries[idx].clone(),
                    score,
                })
                .collect(),
        }
    }
}

/// Descending score, ties broken by dataset position.
fn rank(hits: &mut [(usize, f32)]) {
    hits.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
}
