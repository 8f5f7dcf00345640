//! TOML configuration parsing and validation.
//!
//! Every section except `[context]` has defaults, so a minimal file only
//! names the directive. [`load_config`] rejects invalid values up front;
//! nothing downstream re-validates them.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use pdf_rag_core::chunk::ChunkParams;
use pdf_rag_core::retrieve::{RetrievalParams, Strategy};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub documents: DocumentsConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    pub context: ContextConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// SQLite file holding collections, sessions, and the generation cache.
    #[serde(default = "default_index_path")]
    pub path: PathBuf,
    #[serde(default = "default_collection")]
    pub collection: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: default_index_path(),
            collection: default_collection(),
        }
    }
}

fn default_index_path() -> PathBuf {
    PathBuf::from("./data/index.sqlite")
}
fn default_collection() -> String {
    "documents".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct DocumentsConfig {
    #[serde(default = "default_documents_root")]
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

impl Default for DocumentsConfig {
    fn default() -> Self {
        Self {
            root: default_documents_root(),
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
        }
    }
}

fn default_documents_root() -> PathBuf {
    PathBuf::from("./documents/sources")
}
fn default_include_globs() -> Vec<String> {
    vec!["**/*.pdf".to_string(), "**/*.txt".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

impl ChunkingConfig {
    pub fn params(&self) -> pdf_rag_core::error::Result<ChunkParams> {
        ChunkParams::new(self.chunk_size, self.chunk_overlap)
    }
}

fn default_chunk_size() -> usize {
    800
}
fn default_chunk_overlap() -> usize {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_strategy")]
    pub strategy: String,
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default = "default_fetch_k")]
    pub fetch_k: usize,
    #[serde(default = "default_mmr_lambda")]
    pub mmr_lambda: f32,
    /// `0.0` disables the filter.
    #[serde(default)]
    pub score_threshold: f32,
    /// `0` disables preview truncation.
    #[serde(default = "default_preview_chars")]
    pub preview_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            k: default_k(),
            fetch_k: default_fetch_k(),
            mmr_lambda: default_mmr_lambda(),
            score_threshold: 0.0,
            preview_chars: default_preview_chars(),
        }
    }
}

impl RetrievalConfig {
    pub fn strategy(&self) -> pdf_rag_core::error::Result<Strategy> {
        Strategy::parse(&self.strategy, self.fetch_k, self.mmr_lambda)
    }

    /// Retrieval parameters with optional per-request overrides.
    pub fn params(
        &self,
        k: Option<usize>,
        strategy: Option<&str>,
    ) -> pdf_rag_core::error::Result<RetrievalParams> {
        let strategy = match strategy {
            Some(name) => Strategy::parse(name, self.fetch_k, self.mmr_lambda)?,
            None => self.strategy()?,
        };
        Ok(RetrievalParams {
            k: k.unwrap_or(self.k),
            strategy,
            score_threshold: (self.score_threshold > 0.0).then_some(self.score_threshold),
        })
    }
}

fn default_strategy() -> String {
    "similarity".to_string()
}
fn default_k() -> usize {
    4
}
fn default_fetch_k() -> usize {
    20
}
fn default_mmr_lambda() -> f32 {
    pdf_rag_core::retrieve::DEFAULT_MMR_LAMBDA
}
fn default_preview_chars() -> usize {
    600
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ContextConfig {
    /// Plain-text or JSON directive file.
    #[serde(default)]
    pub directive_path: Option<PathBuf>,
    /// Inline directive text; takes precedence over `directive_path`.
    #[serde(default)]
    pub directive: Option<String>,
    /// `0` disables budget trimming.
    #[serde(default = "default_max_prompt_tokens")]
    pub max_prompt_tokens: usize,
}

fn default_max_prompt_tokens() -> usize {
    6000
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    #[serde(default = "default_session_backend")]
    pub backend: String,
    #[serde(default = "default_memory_depth")]
    pub memory_depth: usize,
    /// Idle expiry for the sqlite backend; `0` keeps sessions forever.
    #[serde(default = "default_session_ttl")]
    pub ttl_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            backend: default_session_backend(),
            memory_depth: default_memory_depth(),
            ttl_secs: default_session_ttl(),
        }
    }
}

fn default_session_backend() -> String {
    "memory".to_string()
}
fn default_memory_depth() -> usize {
    5
}
fn default_session_ttl() -> u64 {
    86_400
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            url: None,
            batch_size: 32,
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    32
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_generation_retries")]
    pub max_retries: u32,
    /// `0` disables the result cache.
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_provider(),
            model: None,
            url: None,
            timeout_secs: default_generation_timeout(),
            max_retries: default_generation_retries(),
            cache_ttl_secs: default_cache_ttl(),
        }
    }
}

impl GenerationConfig {
    pub fn model_name(&self) -> &str {
        self.model.as_deref().unwrap_or("disabled")
    }
}

fn default_generation_provider() -> String {
    "disabled".to_string()
}
fn default_generation_timeout() -> u64 {
    120
}
fn default_generation_retries() -> u32 {
    2
}
fn default_cache_ttl() -> u64 {
    3600
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Check cross-field constraints that serde cannot express.
pub fn validate(config: &Config) -> Result<()> {
    // Validate chunking
    config.chunking.params()?;

    // Validate retrieval
    config.retrieval.strategy()?;
    if !(0.0..=1.0).contains(&config.retrieval.score_threshold) {
        anyhow::bail!("retrieval.score_threshold must be in [0.0, 1.0]");
    }

    // Validate context
    if config.context.directive.is_none() && config.context.directive_path.is_none() {
        anyhow::bail!("context.directive or context.directive_path must be set");
    }

    // Validate session
    if config.session.memory_depth == 0 {
        anyhow::bail!("session.memory_depth must be >= 1");
    }
    match config.session.backend.as_str() {
        "memory" | "sqlite" => {}
        other => anyhow::bail!(
            "Unknown session backend: '{}'. Must be memory or sqlite.",
            other
        ),
    }

    // Validate embedding
    match config.embedding.provider.as_str() {
        "disabled" | "local" => {}
        "hash" | "ollama" | "openai" => {
            if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
                anyhow::bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    config.embedding.provider
                );
            }
        }
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be hash, ollama, openai, local, or disabled.",
            other
        ),
    }
    if matches!(config.embedding.provider.as_str(), "ollama" | "openai")
        && config.embedding.model.is_none()
    {
        anyhow::bail!(
            "embedding.model must be specified when provider is '{}'",
            config.embedding.provider
        );
    }

    // Validate generation
    match config.generation.provider.as_str() {
        "disabled" => {}
        "ollama" => {
            if config.generation.model.is_none() {
                anyhow::bail!("generation.model must be specified when provider is 'ollama'");
            }
        }
        other => anyhow::bail!(
            "Unknown generation provider: '{}'. Must be ollama or disabled.",
            other
        ),
    }

    Ok(())
}
