use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::embedding::Embed;
use crate::error::ResponderResult;

const CACHE_VERSION: u32 = 1;
pub const CACHE_FILENAME: &str = "faq_embeddings_cache.json";

#[derive(Serialize, Deserialize)]
struct CacheSnapshot {
    version: u32,
    model_id: String,
    entries: HashMap<String, Vec<f32>>,
}

/// Memoizes another embedder's vectors, optionally persisting them to a
/// JSON file so a restart does not re-embed an unchanged dataset.
pub struct CachedEmbedder {
    inner: Arc<dyn Embed>,
    path: Option<PathBuf>,
    entries: Mutex<HashMap<String, Vec<f32>>>,
}

impl CachedEmbedder {
    pub fn in_memory(inner: Arc<dyn Embed>) -> Self {
        Self {
            inner,
            path: None,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Open a file-backed cache. A missing file starts empty; an unreadable
    /// one, or one written for another model, is logged and ignored.
    pub fn open(inner: Arc<dyn Embed>, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match load_snapshot(&path, inner.model_id()) {
            Ok(entries) => {
                tracing::info!("Loaded {} cached embeddings from {}", entries.len(), path.display());
                entries
            }
            Err(e) => {
                tracing::warn!("Ignoring embedding cache {}: {}", path.display(), e);
                HashMap::new()
            }
        };
        Self {
            inner,
            path: Some(path),
            entries: Mutex::new(entries),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn key(&self, text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.inner.model_id().as_bytes());
        hasher.update([0u8]);
        hasher.update(text.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    fn lookup(&self, key: &str) -> Option<Vec<f32>> {
        self.entries.lock().ok()?.get(key).cloned()
    }

    fn store(&self, fresh: Vec<(String, Vec<f32>)>) {
        if fresh.is_empty() {
            return;
        }
        if let Ok(mut entries) = self.entries.lock() {
            entries.extend(fresh);
        }
        if let Err(e) = self.save() {
            tracing::warn!("Embedding cache save failed: {}", e);
        }
    }

    /// Write the cache to disk through a temp file and an atomic rename.
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let snapshot = {
            let entries = self
                .entries
                .lock()
                .map_err(|e| anyhow!("cache lock poisoned: {}", e))?;
            CacheSnapshot {
                version: CACHE_VERSION,
                model_id: self.inner.model_id().to_string(),
                entries: entries.clone(),
            }
        };

        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string(&snapshot)
            .map_err(|e| anyhow!("Failed to serialize embedding cache: {}", e))?;
        std::fs::write(&tmp, json)
            .map_err(|e| anyhow!("Failed to write {}: {}", tmp.display(), e))?;
        std::fs::rename(&tmp, path)
            .map_err(|e| anyhow!("Failed to replace {}: {}", path.display(), e))?;

        tracing::debug!("Saved {} embeddings to {}", snapshot.entries.len(), path.display());
        Ok(())
    }
}

fn load_snapshot(path: &Path, model_id: &str) -> Result<HashMap<String, Vec<f32>>> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let json = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("Failed to read {}: {}", path.display(), e))?;
    let snapshot: CacheSnapshot = serde_json::from_str(&json)
        .map_err(|e| anyhow!("Failed to parse {}: {}", path.display(), e))?;
    if snapshot.version != CACHE_VERSION {
        return Err(anyhow!("unsupported cache version {}", snapshot.version));
    }
    if snapshot.model_id != model_id {
        return Err(anyhow!(
            "cache was built with '{}', current model is '{}'",
            snapshot.model_id,
            model_id
        ));
    }
    Ok(snapshot.entries)
}

impl CachedEmbedder {
    /// Cached vectors for `texts`, embedding the misses. Misses are stored
    /// only when `keep` is set.
    async fn resolve(&self, texts: &[String], keep: bool) -> ResponderResult<Vec<Vec<f32>>> {
        let keys: Vec<String> = texts.iter().map(|t| self.key(t)).collect();
        let mut out: Vec<Option<Vec<f32>>> = keys.iter().map(|k| self.lookup(k)).collect();

        let missing: Vec<usize> = (0..texts.len()).filter(|&i| out[i].is_none()).collect();
        tracing::debug!(
            "Embedding {} texts ({} cached, {} new)",
            texts.len(),
            texts.len() - missing.len(),
            missing.len()
        );

        if !missing.is_empty() {
            let pending: Vec<String> = missing.iter().map(|&i| texts[i].clone()).collect();
            let vectors = self.inner.embed_batch(&pending).await?;
            let mut fresh = Vec::with_capacity(vectors.len());
            for (&i, vector) in missing.iter().zip(vectors) {
                if keep {
                    fresh.push((keys[i].clone(), vector.clone()));
                }
                out[i] = Some(vector);
            }
            self.store(fresh);
        }

        Ok(out.into_iter().flatten().collect())
    }
}

#[async_trait]
impl Embed for CachedEmbedder {
    fn model_id(&self) -> &str {
        self.inner.model_id()
    }

    async fn embed(&self, text: &str) -> ResponderResult<Vec<f32>> {
        let key = self.key(text);
        if let Some(hit) = self.lookup(&key) {
            return Ok(hit);
        }
        let vector = self.inner.embed(text).await?;
        self.store(vec![(key, vector.clone())]);
        Ok(vector)
    }

    async fn embed_batch(&self, texts: &[String]) -> ResponderResult<Vec<Vec<f32>>> {
        self.resolve(texts, true).await
    }

    async fn embed_query(&self, text: &str) -> ResponderResult<Vec<f32>> {
        match self.lookup(&self.key(text)) {
            Some(hit) => Ok(hit),
            None => self.inner.embed(text).await,
        }
    }

    async fn embed_queries(&self, texts: &[String]) -> ResponderResult<Vec<Vec<f32>>> {
        self.resolve(texts, false).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use crate::models::FaqEntry;
    use crate::retrieval::{FaqIndex, RetrievalSettings};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts how many texts reach the wrapped embedder.
    struct Counting {
        inner: HashEmbedder,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Embed for Counting {
        fn model_id(&self) -> &str {
            self.inner.model_id()
        }

        async fn embed(&self, text: &str) -> ResponderResult<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.embed(text).await
        }
    }

    fn counting() -> Arc<Counting> {
        Arc::new(Counting {
            inner: HashEmbedder::new(32),
            calls: AtomicUsize::new(0),
        })
    }

    #[tokio::test]
    async fn repeated_text_hits_cache() {
        let inner = counting();
        let cache = CachedEmbedder::in_memory(inner.clone());
        let a = cache.embed("reset my pin").await.unwrap();
        let b = cache.embed("reset my pin").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn batch_only_embeds_misses_in_order() {
        let inner = counting();
        let cache = CachedEmbedder::in_memory(inner.clone());
        cache.embed("b").await.unwrap();

        let texts: Vec<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        let vectors = cache.embed_batch(&texts).await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
        assert_eq!(vectors.len(), 3);
        assert_eq!(vectors[2], HashEmbedder::new(32).embed_sync("c"));
    }

    #[tokio::test]
    async fn persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache").join(CACHE_FILENAME);

        let first = CachedEmbedder::open(counting(), &path);
        first.embed("card blocked").await.unwrap();
        assert!(path.exists());

        let inner = counting();
        let second = CachedEmbedder::open(inner.clone(), &path);
        assert_eq!(second.len(), 1);
        second.embed("card blocked").await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CACHE_FILENAME);
        std::fs::write(&path, "{ not json").unwrap();

        let cache = CachedEmbedder::open(counting(), &path);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn cache_for_other_model_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CACHE_FILENAME);
        CachedEmbedder::open(Arc::new(HashEmbedder::new(16)), &path)
            .embed("x")
            .await
            .unwrap();

        let cache = CachedEmbedder::open(counting(), &path);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn queries_are_not_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CACHE_FILENAME);

        let inner = counting();
        let cache = CachedEmbedder::open(inner.clone(), &path);
        cache.embed_batch(&["Freeze card".to_string()]).await.unwrap();
        for i in 0..50 {
            cache.embed_query(&format!("review number {i}")).await.unwrap();
        }
        let reviews: Vec<String> = (0..5).map(|i| format!("another review {i}")).collect();
        cache.embed_queries(&reviews).await.unwrap();

        assert_eq!(cache.len(), 1);
        assert_eq!(CachedEmbedder::open(counting(), &path).len(), 1);

        // Known FAQ text is still served from the cache.
        let before = inner.calls.load(Ordering::SeqCst);
        cache.embed_query("Freeze card").await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), before);
    }

    #[tokio::test]
    async fn review_matching_keeps_only_faq_vectors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CACHE_FILENAME);
        let cache: Arc<dyn Embed> = Arc::new(CachedEmbedder::open(counting(), &path));

        let index = FaqIndex::build(
            vec![
                FaqEntry::new("App crashing", "Update the app."),
                FaqEntry::new("Reset password", "Use Forgot password."),
            ],
            cache,
        )
        .await
        .unwrap();
        let settings = RetrievalSettings::default();
        for text in ["It crashes. Also how do I reset my password?", "Love it", "Too slow"] {
            index.query_review(text, &settings).await.unwrap();
        }
        index.query("anything else", 2).await.unwrap();

        assert_eq!(CachedEmbedder::open(counting(), &path).len(), 2);
    }
}
