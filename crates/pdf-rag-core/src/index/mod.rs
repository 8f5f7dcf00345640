//! Vector index abstraction and the build-or-reopen lifecycle.
//!
//! The [`VectorIndex`] trait is the boundary to the nearest-neighbour
//! service: it stores passages with their embeddings under a collection
//! name and answers cosine-similarity queries. [`ensure_index`] reuses a
//! non-empty persisted collection, or chunks, embeds, and atomically
//! replaces it.
//!
//! Rebuilds are not designed to run concurrently against the same
//! location; callers serialise them.

pub mod memory;

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use anyhow::Result as AnyResult;
use async_trait::async_trait;

use crate::chunk::{chunk_documents, ChunkParams};
use crate::embedding::{cosine_similarity, EmbeddingProvider};
use crate::error::{RagError, Result};
use crate::models::{DocumentPages, IndexedPassage, Passage};

/// Metadata recorded alongside a collection.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionInfo {
    pub name: String,
    /// Embedding model used at build time.
    pub model: String,
    pub dims: usize,
    pub passage_count: usize,
    pub document_count: usize,
    /// Unix timestamp of the last build.
    pub built_at: i64,
}

impl CollectionInfo {
    fn empty(name: &str, model: &str, dims: usize) -> Self {
        Self {
            name: name.to_string(),
            model: model.to_string(),
            dims,
            passage_count: 0,
            document_count: 0,
            built_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// A candidate returned from a similarity query.
#[derive(Debug, Clone)]
pub struct IndexHit {
    pub passage: Passage,
    pub embedding: Vec<f32>,
    /// Cosine similarity used by the index for ranking.
    pub raw_score: f32,
}

/// Persistent store of passages and embeddings, keyed by collection.
///
/// Implementations must be `Send + Sync`; reads may run concurrently.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Metadata for a collection, or `None` if it was never built.
    async fn collection_info(&self, collection: &str) -> AnyResult<Option<CollectionInfo>>;

    /// Replace the whole collection in one all-or-nothing write.
    async fn replace_collection(
        &self,
        info: &CollectionInfo,
        entries: &[IndexedPassage],
    ) -> AnyResult<()>;

    /// Top `limit` passages by cosine similarity, best first, ties by id ascending.
    async fn query(
        &self,
        collection: &str,
        query_vec: &[f32],
        limit: usize,
    ) -> AnyResult<Vec<IndexHit>>;

    /// Remove a collection. Returns `false` if it did not exist.
    async fn drop_collection(&self, collection: &str) -> AnyResult<bool>;
}

/// Supplies page texts for an index build.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Human-readable location, for logs.
    fn describe(&self) -> String;
    /// Load every document, in a stable order.
    async fn load(&self) -> AnyResult<Vec<DocumentPages>>;
}

/// A fixed, in-memory set of documents.
pub struct StaticDocuments(pub Vec<DocumentPages>);

#[async_trait]
impl DocumentSource for StaticDocuments {
    fn describe(&self) -> String {
        format!("{} in-memory documents", self.0.len())
    }
    async fn load(&self) -> AnyResult<Vec<DocumentPages>> {
        Ok(self.0.clone())
    }
}

/// Why [`ensure_index`] produced the handle it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildReason {
    /// A non-empty collection was reopened without re-embedding.
    Reused,
    /// No collection existed at the location.
    Missing,
    /// The collection existed but held no passages.
    Empty,
    /// The caller forced a rebuild.
    Forced,
    /// The collection was built with a different embedding model or dimension.
    ModelChanged,
}

impl fmt::Display for BuildReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BuildReason::Reused => "reused",
            BuildReason::Missing => "missing",
            BuildReason::Empty => "empty",
            BuildReason::Forced => "forced",
            BuildReason::ModelChanged => "model changed",
        };
        f.write_str(s)
    }
}

/// Inputs for [`ensure_index`].
#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub collection: String,
    pub chunking: ChunkParams,
    /// Texts per embedding call.
    pub batch_size: usize,
    pub force_rebuild: bool,
}

/// An opened collection, ready for queries.
///
/// Cheap to clone; the underlying index is shared.
#[derive(Clone)]
pub struct IndexHandle {
    index: Arc<dyn VectorIndex>,
    info: CollectionInfo,
    reason: BuildReason,
}

impl IndexHandle {
    /// A handle over a collection with no passages. Retrieval returns nothing.
    pub fn empty(index: Arc<dyn VectorIndex>, collection: &str) -> Self {
        Self {
            index,
            info: CollectionInfo::empty(collection, "", 0),
            reason: BuildReason::Empty,
        }
    }

    pub fn info(&self) -> &CollectionInfo {
        &self.info
    }

    pub fn passage_count(&self) -> usize {
        self.info.passage_count
    }

    pub fn is_empty(&self) -> bool {
        self.info.passage_count == 0
    }

    pub fn reason(&self) -> BuildReason {
        self.reason
    }

    pub fn was_rebuilt(&self) -> bool {
        self.reason != BuildReason::Reused
    }

    /// Similarity query against this handle's collection.
    pub async fn query(&self, query_vec: &[f32], limit: usize) -> Result<Vec<IndexHit>> {
        if limit == 0 || self.is_empty() {
            return Ok(Vec::new());
        }
        self.index
            .query(&self.info.name, query_vec, limit)
            .await
            .map_err(RagError::index)
    }
}

/// Reopen the collection if it is usable, otherwise rebuild it.
///
/// A collection is reused when `force_rebuild` is false, it holds at least
/// one passage, and it was built with the embedder's model and dimension.
/// Reuse never calls the embedder or the document source.
///
/// # Errors
///
/// - [`RagError::IndexUnavailable`] if the document source cannot be read.
/// - [`RagError::Embedding`] if any embedding batch fails; the persisted
///   collection is left untouched.
/// - [`RagError::Index`] if the index cannot be read or written.
pub async fn ensure_index(
    index: Arc<dyn VectorIndex>,
    embedder: &dyn EmbeddingProvider,
    source: &dyn DocumentSource,
    opts: &BuildOptions,
) -> Result<IndexHandle> {
    let existing = index
        .collection_info(&opts.collection)
        .await
        .map_err(RagError::index)?;

    let reason = match existing {
        _ if opts.force_rebuild => BuildReason::Forced,
        None => BuildReason::Missing,
        Some(ref info) if info.passage_count == 0 => BuildReason::Empty,
        Some(ref info) if info.model != embedder.model_name() || info.dims != embedder.dims() => {
            BuildReason::ModelChanged
        }
        Some(info) => {
            return Ok(IndexHandle {
                index,
                info,
                reason: BuildReason::Reused,
            })
        }
    };

    let info = build_collection(index.as_ref(), embedder, source, opts).await?;
    Ok(IndexHandle {
        index,
        info,
        reason,
    })
}

/// Chunk, embed, and replace the collection unconditionally.
pub async fn build_collection(
    index: &dyn VectorIndex,
    embedder: &dyn EmbeddingProvider,
    source: &dyn DocumentSource,
    opts: &BuildOptions,
) -> Result<CollectionInfo> {
    let docs = source.load().await.map_err(|e| {
        RagError::IndexUnavailable(format!("cannot read {}: {:#}", source.describe(), e))
    })?;

    let passages = chunk_documents(&docs, &opts.chunking);
    let document_count = passages
        .iter()
        .map(|p| p.source_document.as_str())
        .collect::<BTreeSet<_>>()
        .len();

    let mut entries = Vec::with_capacity(passages.len());
    for batch in passages.chunks(opts.batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|p| p.text.clone()).collect();
        let vectors = embedder.embed(&texts).await.map_err(RagError::embedding)?;
        if vectors.len() != batch.len() {
            return Err(RagError::Embedding(format!(
                "expected {} embeddings, got {}",
                batch.len(),
                vectors.len()
            )));
        }
        for (passage, embedding) in batch.iter().zip(vectors) {
            if embedder.dims() > 0 && embedding.len() != embedder.dims() {
                return Err(RagError::Embedding(format!(
                    "embedding for passage {} has {} dims, expected {}",
                    passage.id,
                    embedding.len(),
                    embedder.dims()
                )));
            }
            entries.push(IndexedPassage {
                passage: passage.clone(),
                embedding,
            });
        }
    }

    let info = CollectionInfo {
        passage_count: entries.len(),
        document_count,
        ..CollectionInfo::empty(&opts.collection, embedder.model_name(), embedder.dims())
    };

    index
        .replace_collection(&info, &entries)
        .await
        .map_err(RagError::index)?;

    Ok(info)
}

/// Rank entries by cosine similarity to `query_vec`, best first, ties by id.
///
/// Shared by index implementations that scan stored vectors.
pub fn top_k_by_cosine<I>(query_vec: &[f32], entries: I, limit: usize) -> Vec<IndexHit>
where
    I: IntoIterator<Item = IndexedPassage>,
{
    let mut hits: Vec<IndexHit> = entries
        .into_iter()
        .map(|e| IndexHit {
            raw_score: cosine_similarity(query_vec, &e.embedding),
            passage: e.passage,
            embedding: e.embedding,
        })
        .collect();
    hits.sort_by(|a, b| {
        b.raw_score
            .partial_cmp(&a.raw_score)
            .unwrap_or(Ordering::Equal)
            .then(a.passage.id.cmp(&b.passage.id))
    });
    hits.truncate(limit);
    hits
}
