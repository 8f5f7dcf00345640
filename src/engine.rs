//! The request handle: one explicit object owning the index, collaborators,
//! and settings, shared by the CLI and the HTTP server.
//!
//! # Request flow (`ask`)
//!
//! ```text
//! session history ──┐
//! query ─▶ retrieve ─┼─▶ assemble ─▶ generate (deadline) ─▶ append exchange
//! directive ────────┘
//! ```
//!
//! Failures follow the core taxonomy in [`RagError`]. A failing session
//! store degrades to an empty history; an unavailable index degrades to
//! empty retrieval. Everything else fails the request with a typed error.
//!
//! Rebuilds and clears hold an exclusive async mutex and swap the index
//! handle only after the new collection is committed, so concurrent
//! requests keep reading the previous collection until then.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, RwLock};

use pdf_rag_core::assemble::assemble;
use pdf_rag_core::chunk::ChunkParams;
use pdf_rag_core::embedding::EmbeddingProvider;
use pdf_rag_core::error::{RagError, Result};
use pdf_rag_core::generate::Generator;
use pdf_rag_core::index::{
    ensure_index, BuildOptions, CollectionInfo, DocumentSource, IndexHandle, VectorIndex,
};
use pdf_rag_core::models::{ConversationTurn, RetrievedChunk};
use pdf_rag_core::retrieve::{retrieve, RetrievalParams};
use pdf_rag_core::session::memory::InMemorySessionStore;
use pdf_rag_core::session::{cap_history, SessionStore};

use crate::config::{Config, RetrievalConfig};
use crate::db;
use crate::directive::load_directive;
use crate::documents::FolderSource;
use crate::embedding::create_provider;
use crate::generation::create_generator;
use crate::migrate;
use crate::sqlite_index::SqliteIndex;
use crate::sqlite_session::SqliteSessionStore;

/// A cited passage as returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceRef {
    pub rank: usize,
    pub score: f32,
    pub source: String,
    /// `None` when the page is unknown.
    pub page: Option<u32>,
    /// Passage text, truncated to the configured preview length.
    pub content: String,
}

impl SourceRef {
    fn from_chunk(chunk: &RetrievedChunk, preview_chars: usize) -> Self {
        Self {
            rank: chunk.rank,
            score: chunk.score,
            source: chunk.passage.source_document.clone(),
            page: chunk.passage.page,
            content: chunk.preview(preview_chars),
        }
    }

    /// `[Source rank | document | Page p]`, with `?` for an unknown page.
    pub fn citation(&self) -> String {
        let page = self
            .page
            .map(|p| p.to_string())
            .unwrap_or_else(|| "?".to_string());
        format!("[Source {} | {} | Page {}]", self.rank, self.source, page)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AskResponse {
    /// `None` for single-shot answers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub answer: String,
    pub sources: Vec<SourceRef>,
    /// Session history after this exchange, oldest first.
    pub history: Vec<ConversationTurn>,
    /// Estimated tokens of the prompt sent to generation.
    pub prompt_tokens: usize,
}

/// Tunables for request handling.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub collection: String,
    pub chunking: ChunkParams,
    pub batch_size: usize,
    pub retrieval: RetrievalConfig,
    /// `None` disables budget trimming.
    pub max_prompt_tokens: Option<usize>,
    pub generation_model: String,
    /// `None` disables the deadline.
    pub generation_timeout: Option<Duration>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            collection: "documents".to_string(),
            chunking: ChunkParams::default(),
            batch_size: 32,
            retrieval: RetrievalConfig::default(),
            max_prompt_tokens: None,
            generation_model: "disabled".to_string(),
            generation_timeout: Some(Duration::from_secs(120)),
        }
    }
}

impl EngineSettings {
    pub fn from_config(config: &Config) -> Result<Self> {
        // Reject bad strategy names before the first request does.
        config.retrieval.strategy()?;
        Ok(Self {
            collection: config.index.collection.clone(),
            chunking: config.chunking.params()?,
            batch_size: config.embedding.batch_size,
            retrieval: config.retrieval.clone(),
            max_prompt_tokens: (config.context.max_prompt_tokens > 0)
                .then_some(config.context.max_prompt_tokens),
            generation_model: config.generation.model_name().to_string(),
            generation_timeout: (config.generation.timeout_secs > 0)
                .then(|| Duration::from_secs(config.generation.timeout_secs)),
        })
    }
}

/// Everything [`RagEngine::open`] needs.
pub struct EngineParts {
    pub index: Arc<dyn VectorIndex>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub generator: Arc<dyn Generator>,
    pub sessions: Arc<dyn SessionStore>,
    pub source: Arc<dyn DocumentSource>,
    pub directive: String,
    pub settings: EngineSettings,
}

pub struct RagEngine {
    index: Arc<dyn VectorIndex>,
    handle: RwLock<IndexHandle>,
    rebuild_lock: Mutex<()>,
    embedder: Arc<dyn EmbeddingProvider>,
    generator: Arc<dyn Generator>,
    sessions: Arc<dyn SessionStore>,
    source: Arc<dyn DocumentSource>,
    directive: String,
    settings: EngineSettings,
}

impl RagEngine {
    /// Wire up every collaborator from config and open (or build) the index.
    pub async fn from_config(config: &Config, force_rebuild: bool) -> Result<Self> {
        let directive = load_directive(&config.context)?;
        let settings = EngineSettings::from_config(config)?;

        let pool = db::connect(config).await.map_err(RagError::index)?;
        migrate::migrate(&pool).await.map_err(RagError::index)?;

        let embedder = create_provider(&config.embedding)
            .map_err(|e| RagError::Configuration(format!("{:#}", e)))?;
        let generator = create_generator(&config.generation, &pool)
            .map_err(|e| RagError::Configuration(format!("{:#}", e)))?;

        let sessions: Arc<dyn SessionStore> = match config.session.backend.as_str() {
            "sqlite" => Arc::new(SqliteSessionStore::new(
                pool.clone(),
                config.session.memory_depth,
                config.session.ttl_secs,
            )),
            _ => Arc::new(InMemorySessionStore::new(config.session.memory_depth)),
        };

        let parts = EngineParts {
            index: Arc::new(SqliteIndex::new(pool)),
            embedder,
            generator,
            sessions,
            source: Arc::new(FolderSource::new(&config.documents)),
            directive,
            settings,
        };
        Self::open(parts, force_rebuild).await
    }

    /// Reuse the persisted collection or build it.
    ///
    /// An unreadable document source degrades to an empty index rather
    /// than failing startup.
    pub async fn open(parts: EngineParts, force_rebuild: bool) -> Result<Self> {
        if parts.directive.trim().is_empty() {
            return Err(RagError::Configuration(
                "system directive is empty".to_string(),
            ));
        }

        let opts = BuildOptions {
            collection: parts.settings.collection.clone(),
            chunking: parts.settings.chunking,
            batch_size: parts.settings.batch_size,
            force_rebuild,
        };
        let handle = match ensure_index(
            parts.index.clone(),
            parts.embedder.as_ref(),
            parts.source.as_ref(),
            &opts,
        )
        .await
        {
            Ok(handle) => handle,
            Err(RagError::IndexUnavailable(reason)) => {
                tracing::warn!(%reason, "index unavailable; answering without documents");
                IndexHandle::empty(parts.index.clone(), &opts.collection)
            }
            Err(e) => return Err(e),
        };
        log_handle(&handle);

        Ok(Self {
            index: parts.index,
            handle: RwLock::new(handle),
            rebuild_lock: Mutex::new(()),
            embedder: parts.embedder,
            generator: parts.generator,
            sessions: parts.sessions,
            source: parts.source,
            directive: parts.directive,
            settings: parts.settings,
        })
    }

    /// Metadata of the collection currently served.
    pub async fn collection_info(&self) -> CollectionInfo {
        self.handle.read().await.info().clone()
    }

    /// Answer `query` within `session_id`, updating its history.
    pub async fn ask(&self, session_id: &str, query: &str) -> Result<AskResponse> {
        if session_id.trim().is_empty() {
            return Err(RagError::InvalidRequest(
                "session_id must not be empty".to_string(),
            ));
        }
        self.answer(Some(session_id), query).await
    }

    /// Answer `query` without reading or writing any session.
    pub async fn ask_once(&self, query: &str) -> Result<AskResponse> {
        self.answer(None, query).await
    }

    async fn answer(&self, session_id: Option<&str>, query: &str) -> Result<AskResponse> {
        if query.trim().is_empty() {
            return Err(RagError::InvalidRequest(
                "query must not be empty".to_string(),
            ));
        }

        let history = match session_id {
            Some(id) => self.load_history(id).await,
            None => Vec::new(),
        };

        let params = self.settings.retrieval.params(None, None)?;
        let chunks = self.retrieve_chunks(query, &params).await?;
        let prompt = assemble(
            &self.directive,
            &history,
            &chunks,
            query,
            self.settings.max_prompt_tokens,
        );
        if prompt.history_dropped > 0 {
            tracing::debug!(
                dropped = prompt.history_dropped,
                tokens = prompt.estimated_tokens,
                "trimmed history to fit prompt budget"
            );
        }
        if prompt.over_budget {
            tracing::warn!(
                tokens = prompt.estimated_tokens,
                "prompt exceeds token budget after dropping all history"
            );
        }

        let answer = self.generate(&prompt.text).await?;

        let history = match session_id {
            Some(id) => self.record_exchange(id, history, query, &answer).await,
            None => Vec::new(),
        };

        let preview = self.settings.retrieval.preview_chars;
        Ok(AskResponse {
            session_id: session_id.map(str::to_string),
            answer,
            sources: chunks
                .iter()
                .map(|c| SourceRef::from_chunk(c, preview))
                .collect(),
            history,
            prompt_tokens: prompt.estimated_tokens,
        })
    }

    /// Forget a session's history. Unknown ids succeed.
    pub async fn reset(&self, session_id: &str) -> Result<()> {
        self.sessions
            .reset(session_id)
            .await
            .map_err(|e| RagError::SessionStore(format!("{:#}", e)))
    }

    /// Current history for a session; store failures read as empty.
    pub async fn history(&self, session_id: &str) -> Vec<ConversationTurn> {
        self.load_history(session_id).await
    }

    /// Retrieval only, with optional per-request overrides.
    pub async fn search(
        &self,
        query: &str,
        k: Option<usize>,
        strategy: Option<&str>,
    ) -> Result<Vec<SourceRef>> {
        if query.trim().is_empty() {
            return Err(RagError::InvalidRequest(
                "query must not be empty".to_string(),
            ));
        }
        // Bad overrides are the caller's fault, not a configuration error.
        let params = self
            .settings
            .retrieval
            .params(k, strategy)
            .map_err(|e| match e {
                RagError::Configuration(msg) => RagError::InvalidRequest(msg),
                other => other,
            })?;
        let chunks = self.retrieve_chunks(query, &params).await?;
        let preview = self.settings.retrieval.preview_chars;
        Ok(chunks
            .iter()
            .map(|c| SourceRef::from_chunk(c, preview))
            .collect())
    }

    /// Re-chunk and re-embed every document, then swap the served collection.
    pub async fn rebuild(&self) -> Result<CollectionInfo> {
        let _guard = self.rebuild_lock.lock().await;
        let opts = BuildOptions {
            collection: self.settings.collection.clone(),
            chunking: self.settings.chunking,
            batch_size: self.settings.batch_size,
            force_rebuild: true,
        };
        tracing::info!(source = %self.source.describe(), "rebuilding index");
        let handle = ensure_index(
            self.index.clone(),
            self.embedder.as_ref(),
            self.source.as_ref(),
            &opts,
        )
        .await?;
        log_handle(&handle);
        let info = handle.info().clone();
        *self.handle.write().await = handle;
        Ok(info)
    }

    /// Drop the persisted collection and serve an empty index.
    pub async fn clear(&self) -> Result<bool> {
        let _guard = self.rebuild_lock.lock().await;
        let existed = self
            .index
            .drop_collection(&self.settings.collection)
            .await
            .map_err(RagError::index)?;
        *self.handle.write().await = IndexHandle::empty(self.index.clone(), &self.settings.collection);
        tracing::info!(collection = %self.settings.collection, existed, "index cleared");
        Ok(existed)
    }

    async fn retrieve_chunks(
        &self,
        query: &str,
        params: &RetrievalParams,
    ) -> Result<Vec<RetrievedChunk>> {
        let handle = self.handle.read().await.clone();
        if handle.is_empty() {
            tracing::debug!("index is empty; retrieval returns no passages");
        }
        let chunks = retrieve(&handle, self.embedder.as_ref(), query, params).await?;
        tracing::debug!(
            strategy = params.strategy.name(),
            k = params.k,
            returned = chunks.len(),
            top_score = chunks.first().map(|c| c.score).unwrap_or(0.0),
            "retrieval complete"
        );
        Ok(chunks)
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let model = self.settings.generation_model.as_str();
        let call = self.generator.complete(prompt, model);
        let result = match self.settings.generation_timeout {
            Some(deadline) => tokio::time::timeout(deadline, call)
                .await
                .map_err(|_| RagError::Timeout {
                    secs: deadline.as_secs(),
                })?,
            None => call.await,
        };
        let answer = result.map_err(RagError::generation)?;
        if answer.trim().is_empty() {
            return Err(RagError::Generation(
                "model returned an empty answer".to_string(),
            ));
        }
        Ok(answer)
    }

    async fn load_history(&self, session_id: &str) -> Vec<ConversationTurn> {
        match self.sessions.get(session_id).await {
            Ok(history) => history,
            Err(e) => {
                tracing::warn!(session_id, error = %format!("{:#}", e), "session store read failed; using empty history");
                Vec::new()
            }
        }
    }

    async fn record_exchange(
        &self,
        session_id: &str,
        mut history: Vec<ConversationTurn>,
        query: &str,
        answer: &str,
    ) -> Vec<ConversationTurn> {
        let user = ConversationTurn::user(query);
        let assistant = ConversationTurn::assistant(answer);
        match self
            .sessions
            .append(session_id, user.clone(), assistant.clone())
            .await
        {
            Ok(updated) => updated,
            Err(e) => {
                tracing::warn!(session_id, error = %format!("{:#}", e), "session store write failed; history not saved");
                history.push(user);
                history.push(assistant);
                cap_history(&mut history, self.sessions.memory_depth());
                history
            }
        }
    }
}

fn log_handle(handle: &IndexHandle) {
    let info = handle.info();
    if handle.was_rebuilt() {
        tracing::info!(
            collection = %info.name,
            reason = %handle.reason(),
            passages = info.passage_count,
            documents = info.document_count,
            "index built"
        );
    } else {
        tracing::info!(
            collection = %info.name,
            passages = info.passage_count,
            documents = info.document_count,
            model = %info.model,
            "index reused"
        );
    }
    if handle.is_empty() {
        tracing::warn!(collection = %info.name, "index is empty; answers will cite no documents");
    }
}
