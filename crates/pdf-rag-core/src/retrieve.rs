//! Query-time retrieval with similarity and diversity-aware (MMR) strategies.
//!
//! # Algorithm
//!
//! 1. Embed the query once.
//! 2. Fetch candidates from the index:
//!    - [`Strategy::Similarity`]: the top `k` by cosine similarity.
//!    - [`Strategy::Mmr`]: the top `fetch_k` (at least `k`), then greedily
//!      pick `k` maximising `λ·relevance − (1−λ)·max_sim_to_selected`.
//! 3. Re-embed each selected passage's text and score it against the query
//!    embedding. This display score is the same function for both
//!    strategies, so scores are comparable across them.
//! 4. Drop results under `score_threshold`, sort by score (desc) then
//!    passage id (asc), and assign 1-based ranks.
//!
//! `k = 0`, a blank query, and an empty index all yield an empty result.

use std::cmp::Ordering;
use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::embedding::{cosine_similarity, embed_one, relevance_score, EmbeddingProvider};
use crate::error::{RagError, Result};
use crate::index::{IndexHandle, IndexHit};
use crate::models::RetrievedChunk;

/// Default MMR trade-off between relevance and novelty.
pub const DEFAULT_MMR_LAMBDA: f32 = 0.5;

/// Candidate selection strategy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Strategy {
    /// Rank by cosine similarity.
    Similarity,
    /// Maximal Marginal Relevance over a larger candidate pool.
    Mmr {
        /// Candidate pool size; raised to `k` when smaller.
        fetch_k: usize,
        /// `1.0` is pure relevance, `0.0` is pure novelty.
        lambda: f32,
    },
}

impl Strategy {
    /// Parse a strategy name (`"similarity"` or `"mmr"`).
    pub fn parse(name: &str, fetch_k: usize, lambda: f32) -> Result<Strategy> {
        match name {
            "similarity" => Ok(Strategy::Similarity),
            "mmr" => {
                if !(0.0..=1.0).contains(&lambda) {
                    return Err(RagError::Configuration(format!(
                        "mmr lambda must be in [0.0, 1.0], got {}",
                        lambda
                    )));
                }
                Ok(Strategy::Mmr { fetch_k, lambda })
            }
            other => Err(RagError::Configuration(format!(
                "Unknown retrieval strategy: '{}'. Use similarity or mmr.",
                other
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Strategy::Similarity => "similarity",
            Strategy::Mmr { .. } => "mmr",
        }
    }
}

/// Retrieval tuning parameters, decoupled from application config.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalParams {
    /// Maximum results to return.
    pub k: usize,
    pub strategy: Strategy,
    /// Minimum display score; `None` keeps everything.
    pub score_threshold: Option<f32>,
}

/// Retrieve up to `k` passages for `query`, best first.
///
/// # Errors
///
/// - [`RagError::Embedding`] if embedding the query or re-embedding a
///   candidate fails. No partial scores are returned.
/// - [`RagError::Index`] if the index query fails. The index is never written.
pub async fn retrieve(
    handle: &IndexHandle,
    embedder: &dyn EmbeddingProvider,
    query: &str,
    params: &RetrievalParams,
) -> Result<Vec<RetrievedChunk>> {
    if params.k == 0 || handle.is_empty() || query.trim().is_empty() {
        return Ok(Vec::new());
    }

    let query_vec = embed_one(embedder, query)
        .await
        .map_err(RagError::embedding)?;

    let selected = match params.strategy {
        Strategy::Similarity => handle.query(&query_vec, params.k).await?,
        Strategy::Mmr { fetch_k, lambda } => {
            let pool = handle.query(&query_vec, fetch_k.max(params.k)).await?;
            mmr_select(&query_vec, pool, params.k, lambda)
        }
    };

    let mut chunks = rescore(embedder, &query_vec, selected).await?;

    if let Some(threshold) = params.score_threshold {
        chunks.retain(|c| c.score >= threshold);
    }

    let mut seen = HashSet::new();
    chunks.retain(|c| seen.insert(c.passage.id));

    chunks.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then(a.passage.id.cmp(&b.passage.id))
    });
    chunks.truncate(params.k);
    for (i, chunk) in chunks.iter_mut().enumerate() {
        chunk.rank = i + 1;
    }

    Ok(chunks)
}

/// Score each hit by re-embedding its text against the query embedding.
async fn rescore(
    embedder: &dyn EmbeddingProvider,
    query_vec: &[f32],
    hits: Vec<IndexHit>,
) -> Result<Vec<RetrievedChunk>> {
    if hits.is_empty() {
        return Ok(Vec::new());
    }
    let texts: Vec<String> = hits.iter().map(|h| h.passage.text.clone()).collect();
    let vectors = embedder.embed(&texts).await.map_err(RagError::embedding)?;
    if vectors.len() != hits.len() {
        return Err(RagError::Embedding(format!(
            "expected {} embeddings while scoring, got {}",
            hits.len(),
            vectors.len()
        )));
    }

    Ok(hits
        .into_iter()
        .zip(vectors)
        .map(|(hit, vec)| RetrievedChunk {
            rank: 0,
            score: relevance_score(query_vec, &vec),
            passage: hit.passage,
        })
        .collect())
}

/// Greedy Maximal Marginal Relevance selection.
///
/// Returns up to `k` candidates in selection order. Ties go to the lower
/// passage id.
pub fn mmr_select(query_vec: &[f32], candidates: Vec<IndexHit>, k: usize, lambda: f32) -> Vec<IndexHit> {
    let lambda = lambda.clamp(0.0, 1.0);
    let relevance: Vec<f32> = candidates
        .iter()
        .map(|c| cosine_similarity(query_vec, &c.embedding))
        .collect();

    let mut remaining: Vec<usize> = (0..candidates.len()).collect();
    let mut picked: Vec<usize> = Vec::with_capacity(k.min(candidates.len()));

    while picked.len() < k && !remaining.is_empty() {
        let mut best: Option<(usize, f32)> = None;
        for (pos, &i) in remaining.iter().enumerate() {
            let redundancy = picked
                .iter()
                .map(|&j| cosine_similarity(&candidates[i].embedding, &candidates[j].embedding))
                .fold(None, |acc: Option<f32>, s| Some(acc.map_or(s, |a| a.max(s))))
                .unwrap_or(0.0);
            let score = lambda * relevance[i] - (1.0 - lambda) * redundancy;
            let better = match best {
                None => true,
                Some((best_pos, best_score)) => {
                    score > best_score
                        || (score == best_score
                            && candidates[i].passage.id
                                < candidates[remaining[best_pos]].passage.id)
                }
            };
            if better {
                best = Some((pos, score));
            }
        }
        if let Some((pos, _)) = best {
            picked.push(remaining.remove(pos));
        }
    }

    let mut slots: Vec<Option<IndexHit>> = candidates.into_iter().map(Some).collect();
    picked
        .into_iter()
        .filter_map(|i| slots[i].take())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::ChunkParams;
    use crate::embedding::HashingEmbedder;
    use crate::index::memory::InMemoryIndex;
    use crate::index::{ensure_index, BuildOptions, CollectionInfo, StaticDocuments, VectorIndex};
    use crate::models::{DocumentPages, IndexedPassage, Passage};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Arc;

    /// Maps known texts to fixed vectors; unknown texts get `fallback`.
    struct FixedEmbedder {
        vectors: HashMap<String, Vec<f32>>,
        fallback: Vec<f32>,
        fail: bool,
    }

    #[async_trait]
    impl EmbeddingProvider for FixedEmbedder {
        fn model_name(&self) -> &str {
            "fixed"
        }
        fn dims(&self) -> usize {
            self.fallback.len()
        }
        async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            if self.fail {
                anyhow::bail!("embedding service unavailable");
            }
            Ok(texts
                .iter()
                .map(|t| self.vectors.get(t).cloned().unwrap_or_else(|| self.fallback.clone()))
                .collect())
        }
    }

    fn passage(id: i64, text: &str) -> Passage {
        Passage {
            id,
            text: text.to_string(),
            source_document: "doc.pdf".to_string(),
            page: Some(1),
            chunk_index: id,
            start_offset: 0,
            hash: String::new(),
        }
    }

    fn hit(id: i64, embedding: Vec<f32>) -> IndexHit {
        IndexHit {
            passage: passage(id, &format!("p{}", id)),
            raw_score: 0.0,
            embedding,
        }
    }

    /// Index with a passage `a`, a near duplicate `a2`, and a distinct `b`.
    async fn redundant_fixture() -> (IndexHandle, FixedEmbedder) {
        let a = vec![1.0, 0.0, 0.0];
        let a2 = vec![0.99, 0.1, 0.0];
        let b = vec![0.6, 0.0, 0.8];
        let entries = vec![
            IndexedPassage { passage: passage(0, "a"), embedding: a.clone() },
            IndexedPassage { passage: passage(1, "a2"), embedding: a2.clone() },
            IndexedPassage { passage: passage(2, "b"), embedding: b.clone() },
        ];
        let index = Arc::new(InMemoryIndex::new());
        let info = CollectionInfo {
            name: "c".to_string(),
            model: "fixed".to_string(),
            dims: 3,
            passage_count: 3,
            document_count: 1,
            built_at: 0,
        };
        index.replace_collection(&info, &entries).await.unwrap();

        let embedder = FixedEmbedder {
            vectors: HashMap::from([
                ("query".to_string(), vec![1.0, 0.0, 0.0]),
                ("a".to_string(), a),
                ("a2".to_string(), a2),
                ("b".to_string(), b),
            ]),
            fallback: vec![0.0, 0.0, 1.0],
            fail: false,
        };
        let handle = ensure_index(
            index,
            &embedder,
            &StaticDocuments(vec![]),
            &BuildOptions {
                collection: "c".to_string(),
                chunking: ChunkParams::new(10, 1).unwrap(),
                batch_size: 8,
                force_rebuild: false,
            },
        )
        .await
        .unwrap();
        (handle, embedder)
    }

    fn params(k: usize, strategy: Strategy) -> RetrievalParams {
        RetrievalParams {
            k,
            strategy,
            score_threshold: None,
        }
    }

    #[tokio::test]
    async fn test_k_zero_is_empty() {
        let (handle, embedder) = redundant_fixture().await;
        let out = retrieve(&handle, &embedder, "query", &params(0, Strategy::Similarity))
            .await
            .unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_empty_index_is_empty() {
        let handle = IndexHandle::empty(Arc::new(InMemoryIndex::new()), "c");
        let embedder = HashingEmbedder::new(16);
        let out = retrieve(&handle, &embedder, "anything", &params(5, Strategy::Similarity))
            .await
            .unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_similarity_keeps_near_duplicates() {
        let (handle, embedder) = redundant_fixture().await;
        let out = retrieve(&handle, &embedder, "query", &params(2, Strategy::Similarity))
            .await
            .unwrap();
        let texts: Vec<&str> = out.iter().map(|c| c.passage.text.as_str()).collect();
        assert_eq!(texts, vec!["a", "a2"]);
    }

    #[tokio::test]
    async fn test_mmr_prefers_diverse_passage() {
        let (handle, embedder) = redundant_fixture().await;
        let strategy = Strategy::Mmr { fetch_k: 3, lambda: 0.3 };
        let out = retrieve(&handle, &embedder, "query", &params(2, strategy))
            .await
            .unwrap();
        let texts: Vec<&str> = out.iter().map(|c| c.passage.text.as_str()).collect();
        assert_eq!(texts, vec!["a", "b"]);
        assert_eq!(out[0].rank, 1);
        assert_eq!(out[1].rank, 2);
    }

    #[tokio::test]
    async fn test_scores_comparable_across_strategies() {
        let (handle, embedder) = redundant_fixture().await;
        let sim = retrieve(&handle, &embedder, "query", &params(3, Strategy::Similarity))
            .await
            .unwrap();
        let mmr = retrieve(
            &handle,
            &embedder,
            "query",
            &params(3, Strategy::Mmr { fetch_k: 3, lambda: 0.3 }),
        )
        .await
        .unwrap();
        for chunk in &mmr {
            let same = sim.iter().find(|c| c.passage.id == chunk.passage.id).unwrap();
            assert!((same.score - chunk.score).abs() < 1e-6);
        }
    }

    #[tokio::test]
    async fn test_results_ordered_and_unique() {
        let (handle, embedder) = redundant_fixture().await;
        let out = retrieve(
            &handle,
            &embedder,
            "query",
            &params(10, Strategy::Mmr { fetch_k: 2, lambda: 0.5 }),
        )
        .await
        .unwrap();
        assert!(out.len() <= 10);
        for pair in out.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
        let ids: HashSet<i64> = out.iter().map(|c| c.passage.id).collect();
        assert_eq!(ids.len(), out.len());
    }

    #[tokio::test]
    async fn test_score_threshold_filters() {
        let (handle, embedder) = redundant_fixture().await;
        let mut p = params(3, Strategy::Similarity);
        p.score_threshold = Some(0.9);
        let out = retrieve(&handle, &embedder, "query", &p).await.unwrap();
        assert!(out.iter().all(|c| c.score >= 0.9));
        assert!(out.iter().all(|c| c.passage.text != "b"));
    }

    #[tokio::test]
    async fn test_display_score_comes_from_reembedding() {
        let (handle, mut embedder) = redundant_fixture().await;
        // The stored vector for "b" still says 0.6; the live model now disagrees.
        embedder.vectors.insert("b".to_string(), vec![0.0, 1.0, 0.0]);
        let out = retrieve(&handle, &embedder, "query", &params(3, Strategy::Similarity))
            .await
            .unwrap();
        let b = out.iter().find(|c| c.passage.text == "b").unwrap();
        assert!(b.score.abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_embedding_failure_is_typed() {
        let (handle, mut embedder) = redundant_fixture().await;
        embedder.fail = true;
        let err = retrieve(&handle, &embedder, "query", &params(2, Strategy::Similarity))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, RagError::Embedding(_)));
    }

    #[tokio::test]
    async fn test_ties_ordered_by_id() {
        let docs = StaticDocuments(vec![
            DocumentPages::from_pages("one.pdf", ["alpha beta"]),
            DocumentPages::from_pages("two.pdf", ["alpha beta"]),
        ]);
        let embedder = HashingEmbedder::new(128);
        let handle = ensure_index(
            Arc::new(InMemoryIndex::new()),
            &embedder,
            &docs,
            &BuildOptions {
                collection: "c".to_string(),
                chunking: ChunkParams::new(10, 0).unwrap(),
                batch_size: 8,
                force_rebuild: false,
            },
        )
        .await
        .unwrap();
        let out = retrieve(&handle, &embedder, "alpha beta", &params(5, Strategy::Similarity))
            .await
            .unwrap();
        let tied: Vec<i64> = out
            .iter()
            .filter(|c| c.passage.text == "alpha beta")
            .map(|c| c.passage.id)
            .collect();
        assert!(tied.len() >= 2);
        assert!(tied.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_mmr_lambda_one_is_pure_relevance() {
        let query = vec![1.0, 0.0];
        let candidates = vec![hit(0, vec![0.5, 0.5]), hit(1, vec![1.0, 0.0]), hit(2, vec![0.9, 0.1])];
        let picked = mmr_select(&query, candidates, 3, 1.0);
        let ids: Vec<i64> = picked.iter().map(|h| h.passage.id).collect();
        assert_eq!(ids, vec![1, 2, 0]);
    }

    #[test]
    fn test_mmr_k_larger_than_pool() {
        let picked = mmr_select(&[1.0, 0.0], vec![hit(0, vec![1.0, 0.0])], 5, 0.5);
        assert_eq!(picked.len(), 1);
    }

    #[test]
    fn test_strategy_parse() {
        assert_eq!(Strategy::parse("similarity", 10, 0.5).unwrap(), Strategy::Similarity);
        assert_eq!(
            Strategy::parse("mmr", 20, 0.25).unwrap(),
            Strategy::Mmr { fetch_k: 20, lambda: 0.25 }
        );
        assert!(Strategy::parse("mmr", 20, 1.5).is_err());
        assert!(Strategy::parse("hybrid", 20, 0.5).is_err());
    }
}
