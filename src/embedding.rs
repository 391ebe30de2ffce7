use std::sync::{Mutex, OnceLock};

use async_trait::async_trait;
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::TensorRef;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokenizers::Tokenizer;

use crate::error::{ResponderError, ResponderResult, ServiceFailure};
use crate::models::EMBED_BATCH_SIZE;
use crate::openai::{ApiClient, OpenAiSettings};

pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
pub const DEFAULT_HASH_DIM: usize = 1024;

/// Text → fixed-length vector. One implementation is used for both the FAQ
/// questions and the incoming reviews of a session.
#[async_trait]
pub trait Embed: Send + Sync {
    /// Identifies the embedding space. Vectors from different ids are not
    /// comparable.
    fn model_id(&self) -> &str;

    async fn embed(&self, text: &str) -> ResponderResult<Vec<f32>>;

    async fn embed_batch(&self, texts: &[String]) -> ResponderResult<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    /// Embed one-off query text. Caching embedders do not keep these.
    async fn embed_query(&self, text: &str) -> ResponderResult<Vec<f32>> {
        self.embed(text).await
    }

    async fn embed_queries(&self, texts: &[String]) -> ResponderResult<Vec<Vec<f32>>> {
        self.embed_batch(texts).await
    }
}

pub fn l2_normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm >= 1e-12 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
    v
}

// ── Hashing embedder ──

/// Deterministic bag-of-words embedder. Tokens are lower-cased, lightly
/// stemmed and hashed into a fixed number of buckets.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dim: usize,
    model_id: String,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        let dim = dim.max(8);
        Self {
            dim,
            model_id: format!("hash-{dim}"),
        }
    }

    fn bucket(&self, token: &str) -> usize {
        let digest = Sha256::digest(token.as_bytes());
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        (u64::from_le_bytes(head) % self.dim as u64) as usize
    }

    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dim];
        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            v[self.bucket(stem(token))] += 1.0;
        }
        l2_normalize(v)
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_HASH_DIM)
    }
}

fn stem(token: &str) -> &str {
    for suffix in ["ing", "es", "ed", "s"] {
        if token.len() > suffix.len() + 3 {
            if let Some(root) = token.strip_suffix(suffix) {
                return root;
            }
        }
    }
    token
}

#[async_trait]
impl Embed for HashEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn embed(&self, text: &str) -> ResponderResult<Vec<f32>> {
        Ok(self.embed_sync(text))
    }
}

// ── Local ONNX sentence embedder ──

static ORT_INIT: OnceLock<Result<(), String>> = OnceLock::new();

fn ensure_ort_init() -> ResponderResult<()> {
    ORT_INIT
        .get_or_init(|| {
            let path = find_onnxruntime_lib()?;
            ort::init_from(&path)
                .map_err(|e| format!("failed to load {}: {}", path, e))?
                .commit();
            Ok(())
        })
        .clone()
        .map_err(|e| onnx_error(ServiceFailure::Transport, e))
}

fn ort_lib_name() -> &'static str {
    if cfg!(target_os = "windows") {
        "onnxruntime.dll"
    } else if cfg!(target_os = "macos") {
        "libonnxruntime.dylib"
    } else {
        "libonnxruntime.so"
    }
}

fn find_onnxruntime_lib() -> Result<String, String> {
    let lib_name = ort_lib_name();

    if let Ok(path) = std::env::var("ORT_DYLIB_PATH") {
        if std::path::Path::new(&path).exists() {
            return Ok(path);
        }
    }

    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            let candidate = dir.join(lib_name);
            if candidate.exists() {
                return Ok(candidate.to_string_lossy().to_string());
            }
        }
    }

    Err(format!(
        "ONNX Runtime library ({lib_name}) not found: set ORT_DYLIB_PATH or place it next to the executable"
    ))
}

fn onnx_error(failure: ServiceFailure, msg: impl Into<String>) -> ResponderError {
    ResponderError::external("embedding", failure, msg)
}

pub struct OnnxEmbedder {
    session: Mutex<Session>,
    tokenizer: Tokenizer,
    model_id: String,
}

impl OnnxEmbedder {
    pub fn load(model_path: &str, tokenizer_path: &str) -> ResponderResult<Self> {
        ensure_ort_init()?;
        let fail = |what: &str, e: &dyn std::fmt::Display| {
            onnx_error(ServiceFailure::Transport, format!("{what}: {e}"))
        };
        let session = Session::builder()
            .map_err(|e| fail("failed to create session builder", &e))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| fail("failed to set optimization level", &e))?
            .with_intra_threads(4)
            .map_err(|e| fail("failed to set threads", &e))?
            .commit_from_file(model_path)
            .map_err(|e| fail("failed to load ONNX model", &e))?;
        let tokenizer =
            Tokenizer::from_file(tokenizer_path).map_err(|e| fail("failed to load tokenizer", &e))?;
        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
            model_id: format!("onnx:{model_path}"),
        })
    }

    fn embed_blocking(&self, text: &str) -> ResponderResult<Vec<f32>> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| onnx_error(ServiceFailure::Malformed, format!("tokenization failed: {e}")))?;

        let ids: Vec<i64> = encoding.get_ids().iter().map(|&id| id as i64).collect();
        let mask: Vec<i64> = encoding
            .get_attention_mask()
            .iter()
            .map(|&m| m as i64)
            .collect();
        let seq_len = ids.len();

        let input_ids = TensorRef::from_array_view(([1usize, seq_len], &*ids))
            .map_err(|e| onnx_error(ServiceFailure::Malformed, format!("input_ids tensor: {e}")))?;
        let attention_mask = TensorRef::from_array_view(([1usize, seq_len], &*mask))
            .map_err(|e| onnx_error(ServiceFailure::Malformed, format!("attention_mask tensor: {e}")))?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| onnx_error(ServiceFailure::Transport, format!("session lock poisoned: {e}")))?;
        let outputs = session
            .run(ort::inputs![input_ids, attention_mask])
            .map_err(|e| onnx_error(ServiceFailure::Transport, format!("inference failed: {e}")))?;

        // outputs[1] is the pooled sentence embedding, [1, dim].
        let (_, view) = outputs[1]
            .try_extract_tensor::<f32>()
            .map_err(|e| onnx_error(ServiceFailure::Malformed, format!("bad embedding output: {e}")))?;

        Ok(l2_normalize(view.iter().copied().collect()))
    }
}

#[async_trait]
impl Embed for OnnxEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn embed(&self, text: &str) -> ResponderResult<Vec<f32>> {
        self.embed_blocking(text)
    }
}

// ── Hosted embeddings endpoint ──

#[derive(Serialize)]
struct EmbeddingsBody<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingsReply {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    index: usize,
    embedding: Vec<f32>,
}

pub struct OpenAiEmbedder {
    api: ApiClient,
    model: String,
}

impl OpenAiEmbedder {
    pub fn new(settings: OpenAiSettings, model: impl Into<String>) -> ResponderResult<Self> {
        Ok(Self {
            api: ApiClient::new(settings, "embedding")?,
            model: model.into(),
        })
    }

    async fn request(&self, texts: &[String]) -> ResponderResult<Vec<Vec<f32>>> {
        let body = EmbeddingsBody {
            model: &self.model,
            input: texts,
        };
        let reply: EmbeddingsReply = self.api.post_json("embeddings", &body).await?;
        if reply.data.len() != texts.len() {
            return Err(ResponderError::external(
                "embedding",
                ServiceFailure::Malformed,
                format!("asked for {} embeddings, got {}", texts.len(), reply.data.len()),
            ));
        }
        let mut items = reply.data;
        items.sort_by_key(|item| item.index);
        Ok(items.into_iter().map(|item| item.embedding).collect())
    }
}

#[async_trait]
impl Embed for OpenAiEmbedder {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> ResponderResult<Vec<f32>> {
        let input = [text.to_string()];
        let mut vectors = self.request(&input).await?;
        vectors.pop().ok_or_else(|| {
            ResponderError::external("embedding", ServiceFailure::Malformed, "empty embeddings reply")
        })
    }

    async fn embed_batch(&self, texts: &[String]) -> ResponderResult<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(EMBED_BATCH_SIZE) {
            tracing::debug!(batch = chunk.len(), model = %self.model, "embedding batch");
            out.extend(self.request(chunk).await?);
        }
        Ok(out)
    }
}
