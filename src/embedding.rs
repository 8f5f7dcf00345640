//! Embedding provider implementations.
//!
//! Concrete backends for [`pdf_rag_core::embedding::EmbeddingProvider`]:
//! - **hash**: [`HashingEmbedder`], deterministic and offline
//! - **[`HttpProvider`]**: Ollama's `/api/embed` or the OpenAI embeddings API
//! - **`LocalProvider`**: runs models locally via fastembed (feature `local-embeddings-fastembed`)
//! - **[`DisabledProvider`]**: returns errors; used when embeddings are not configured
//!
//! HTTP providers retry transient failures with exponential backoff; see
//! [`crate::http_retry`].
//!
//! # Provider Selection
//!
//! ```rust,no_run
//! # use pdf_rag::config::EmbeddingConfig;
//! # use pdf_rag::embedding::create_provider;
//! let config = EmbeddingConfig::default(); // provider = "disabled"
//! let provider = create_provider(&config).unwrap();
//! assert_eq!(provider.model_name(), "disabled");
//! ```

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use pdf_rag_core::embedding::{EmbeddingProvider, HashingEmbedder};

use crate::config::EmbeddingConfig;
use crate::http_retry;

const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
const OPENAI_EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";

// ============ Disabled Provider ============

/// A no-op embedding provider that always returns errors.
pub struct DisabledProvider;

#[async_trait]
impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        bail!("Embedding provider is disabled")
    }
}

// ============ HTTP Providers ============

/// Wire format of a remote embeddings API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpApi {
    /// `POST {url}/api/embed` with `{model, input}`; answers `{embeddings: [[..]]}`.
    Ollama,
    /// `POST /v1/embeddings` with a bearer key; answers `{data: [{index, embedding}]}`.
    OpenAI,
}

impl HttpApi {
    fn service(self) -> &'static str {
        match self {
            HttpApi::Ollama => "Ollama",
            HttpApi::OpenAI => "OpenAI",
        }
    }

    fn parse(self, json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
        match self {
            HttpApi::Ollama => parse_ollama_response(json),
            HttpApi::OpenAI => parse_openai_response(json),
        }
    }
}

/// Embedding provider backed by a remote HTTP API.
///
/// Requests carry the whole batch; transient failures are retried by
/// [`http_retry::post_json`]. Responses are checked against the batch size
/// and the configured dimension so a misconfigured model fails the build
/// instead of corrupting the index.
pub struct HttpProvider {
    api: HttpApi,
    model: String,
    dims: usize,
    endpoint: String,
    api_key: Option<String>,
    max_retries: u32,
    client: reqwest::Client,
}

impl HttpProvider {
    /// Ollama at `embedding.url` (default `http://localhost:11434`).
    pub fn ollama(config: &EmbeddingConfig) -> Result<Self> {
        let base = config.url.as_deref().unwrap_or(DEFAULT_OLLAMA_URL);
        let endpoint = format!("{}/api/embed", base.trim_end_matches('/'));
        Self::build(HttpApi::Ollama, config, endpoint, None)
    }

    /// OpenAI, keyed by the `OPENAI_API_KEY` environment variable.
    pub fn openai(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        Self::build(
            HttpApi::OpenAI,
            config,
            OPENAI_EMBEDDINGS_URL.to_string(),
            Some(api_key),
        )
    }

    fn build(
        api: HttpApi,
        config: &EmbeddingConfig,
        endpoint: String,
        api_key: Option<String>,
    ) -> Result<Self> {
        let Some(model) = config.model.clone() else {
            bail!("embedding.model required for {} provider", api.service());
        };
        let Some(dims) = config.dims.filter(|d| *d > 0) else {
            bail!("embedding.dims required for {} provider", api.service());
        };
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            api,
            model,
            dims,
            endpoint,
            api_key,
            max_retries: config.max_retries,
            client,
        })
    }

    pub fn api(&self) -> HttpApi {
        self.api
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl EmbeddingProvider for HttpProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({ "model": self.model, "input": texts });
        let json = http_retry::post_json(
            &self.client,
            &self.endpoint,
            self.api_key.as_deref(),
            &body,
            self.max_retries,
            self.api.service(),
        )
        .await?;
        let vectors = self.api.parse(&json)?;
        check_shape(&vectors, texts.len(), self.dims)?;
        Ok(vectors)
    }
}

/// One vector per input, each of the configured dimension.
fn check_shape(vectors: &[Vec<f32>], expected: usize, dims: usize) -> Result<()> {
    if vectors.len() != expected {
        bail!(
            "embedding service returned {} vectors for {} inputs",
            vectors.len(),
            expected
        );
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
        bail!(
            "embedding dimension mismatch: got {}, configured {}",
            bad.len(),
            dims
        );
    }
    Ok(())
}

fn floats(values: &[serde_json::Value]) -> Result<Vec<f32>> {
    values
        .iter()
        .map(|v| match v.as_f64() {
            Some(x) => Ok(x as f32),
            None => bail!("Invalid embedding response: non-numeric value {}", v),
        })
        .collect()
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let Some(embeddings) = json.get("embeddings").and_then(|e| e.as_array()) else {
        bail!("Invalid Ollama response: missing embeddings array");
    };
    embeddings
        .iter()
        .map(|e| match e.as_array() {
            Some(values) => floats(values),
            None => bail!("Invalid Ollama response: embedding is not an array"),
        })
        .collect()
}

/// Extract `data[].embedding`, ordered by each item's `index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let Some(data) = json.get("data").and_then(|d| d.as_array()) else {
        bail!("Invalid OpenAI response: missing data array");
    };
    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let Some(values) = item.get("embedding").and_then(|e| e.as_array()) else {
            bail!("Invalid OpenAI response: missing embedding at {}", position);
        };
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map_or(position, |i| i as usize);
        indexed.push((index, floats(values)?));
    }
    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Local Provider (fastembed) ============

/// Supported local models: config name, fastembed model, output dimension.
#[cfg(feature = "local-embeddings-fastembed")]
const LOCAL_MODELS: &[(&str, fastembed::EmbeddingModel, usize)] = &[
    ("all-minilm-l6-v2", fastembed::EmbeddingModel::AllMiniLML6V2, 384),
    ("bge-small-en-v1.5", fastembed::EmbeddingModel::BGESmallENV15, 384),
    ("bge-base-en-v1.5", fastembed::EmbeddingModel::BGEBaseENV15, 768),
    ("bge-large-en-v1.5", fastembed::EmbeddingModel::BGELargeENV15, 1024),
    ("multilingual-e5-small", fastembed::EmbeddingModel::MultilingualE5Small, 384),
    ("multilingual-e5-base", fastembed::EmbeddingModel::MultilingualE5Base, 768),
    ("multilingual-e5-large", fastembed::EmbeddingModel::MultilingualE5Large, 1024),
];

/// In-process embeddings via fastembed.
///
/// The model is downloaded from Hugging Face on first use and loaded once.
#[cfg(feature = "local-embeddings-fastembed")]
pub struct LocalProvider {
    name: String,
    model: fastembed::EmbeddingModel,
    dims: usize,
    batch_size: usize,
    loaded: Arc<std::sync::Mutex<Option<fastembed::TextEmbedding>>>,
}

#[cfg(feature = "local-embeddings-fastembed")]
impl LocalProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let name = config.model.as_deref().unwrap_or("bge-small-en-v1.5");
        let Some((_, model, native_dims)) = LOCAL_MODELS.iter().find(|(n, _, _)| *n == name)
        else {
            let known: Vec<&str> = LOCAL_MODELS.iter().map(|(n, _, _)| *n).collect();
            bail!(
                "Unknown local embedding model: '{}'. Supported: {}",
                name,
                known.join(", ")
            );
        };
        if let Some(dims) = config.dims.filter(|d| d != native_dims) {
            bail!("{} produces {}-dimensional vectors, not {}", name, native_dims, dims);
        }
        Ok(Self {
            name: name.to_string(),
            model: model.clone(),
            dims: *native_dims,
            batch_size: config.batch_size,
            loaded: Arc::new(std::sync::Mutex::new(None)),
        })
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
#[async_trait]
impl EmbeddingProvider for LocalProvider {
    fn model_name(&self) -> &str {
        &self.name
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let model = self.model.clone();
        let loaded = self.loaded.clone();
        let batch_size = self.batch_size;
        let texts = texts.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut guard = loaded
                .lock()
                .map_err(|_| anyhow::anyhow!("local embedding model lock poisoned"))?;
            if guard.is_none() {
                tracing::info!(model = ?model, "loading local embedding model");
                let options = fastembed::InitOptions::new(model).with_show_download_progress(false);
                let embedder = fastembed::TextEmbedding::try_new(options)
                    .map_err(|e| anyhow::anyhow!("Failed to load local embedding model: {}", e))?;
                *guard = Some(embedder);
            }
            let Some(embedder) = guard.as_mut() else {
                bail!("local embedding model not loaded");
            };
            embedder
                .embed(texts, Some(batch_size))
                .map_err(|e| anyhow::anyhow!("Local embedding failed: {}", e))
        })
        .await?
    }
}

/// Create the appropriate [`EmbeddingProvider`] based on configuration.
///
/// # Supported Providers
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledProvider`] |
/// | `"hash"` | [`HashingEmbedder`] |
/// | `"ollama"` | [`HttpProvider::ollama`] |
/// | `"openai"` | [`HttpProvider::openai`] |
/// | `"local"` | `LocalProvider` (feature `local-embeddings-fastembed`) |
pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledProvider)),
        "hash" => {
            let dims = config
                .dims
                .ok_or_else(|| anyhow::anyhow!("embedding.dims required for hash provider"))?;
            Ok(Arc::new(HashingEmbedder::new(dims)))
        }
        "ollama" => Ok(Arc::new(HttpProvider::ollama(config)?)),
        "openai" => Ok(Arc::new(HttpProvider::openai(config)?)),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Arc::new(LocalProvider::new(config)?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => bail!("Local embedding provider requires --features local-embeddings-fastembed"),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ollama_response() {
        let json = serde_json::json!({ "embeddings": [[0.5, -1.0], [0.0, 2.0]] });
        let out = parse_ollama_response(&json).unwrap();
        assert_eq!(out, vec![vec![0.5, -1.0], vec![0.0, 2.0]]);
        assert!(parse_ollama_response(&serde_json::json!({})).is_err());
    }

    #[test]
    fn test_parse_openai_response_orders_by_index() {
        let json = serde_json::json!({
            "data": [
                { "index": 1, "embedding": [2.0] },
                { "index": 0, "embedding": [1.0] }
            ]
        });
        let out = parse_openai_response(&json).unwrap();
        assert_eq!(out, vec![vec![1.0], vec![2.0]]);
    }

    #[test]
    fn test_non_numeric_values_rejected() {
        let ollama = serde_json::json!({ "embeddings": [[0.5, "x"]] });
        assert!(parse_ollama_response(&ollama).is_err());

        let openai = serde_json::json!({ "data": [{ "index": 0, "embedding": [1.0, null] }] });
        assert!(parse_openai_response(&openai).is_err());
    }

    #[tokio::test]
    async fn test_disabled_provider_errors() {
        let provider = create_provider(&EmbeddingConfig::default()).unwrap();
        assert_eq!(provider.model_name(), "disabled");
        assert!(provider.embed(&["x".to_string()]).await.is_err());
    }

    #[test]
    fn test_hash_provider_from_config() {
        let config = EmbeddingConfig {
            provider: "hash".to_string(),
            dims: Some(64),
            ..EmbeddingConfig::default()
        };
        let provider = create_provider(&config).unwrap();
        assert_eq!(provider.model_name(), HashingEmbedder::MODEL_NAME);
        assert_eq!(provider.dims(), 64);
    }

    #[test]
    fn test_ollama_endpoint_from_url() {
        let config = EmbeddingConfig {
            provider: "ollama".to_string(),
            model: Some("bge-m3".to_string()),
            dims: Some(1024),
            url: Some("http://gpu-box:11434/".to_string()),
            ..EmbeddingConfig::default()
        };
        let provider = HttpProvider::ollama(&config).unwrap();
        assert_eq!(provider.api(), HttpApi::Ollama);
        assert_eq!(provider.endpoint(), "http://gpu-box:11434/api/embed");
        assert_eq!(provider.dims(), 1024);

        let missing_model = EmbeddingConfig { model: None, ..config };
        assert!(HttpProvider::ollama(&missing_model).is_err());
    }

    #[test]
    fn test_check_shape() {
        let vectors = vec![vec![0.0; 3], vec![0.0; 3]];
        assert!(check_shape(&vectors, 2, 3).is_ok());
        assert!(check_shape(&vectors, 3, 3).is_err());
        let err = check_shape(&vectors, 2, 4).unwrap_err();
        assert!(err.to_string().contains("dimension mismatch"));
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let config = EmbeddingConfig {
            provider: "word2vec".to_string(),
            ..EmbeddingConfig::default()
        };
        assert!(create_provider(&config).is_err());
    }
}
