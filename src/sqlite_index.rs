//! SQLite-backed [`VectorIndex`].
//!
//! Passages and their embeddings live in the `passages` table, one row per
//! passage, with embeddings stored as little-endian `f32` BLOBs. Queries
//! load every vector of the collection and rank them with cosine similarity
//! in Rust; there is no ANN structure.
//!
//! [`VectorIndex::replace_collection`] deletes and re-inserts the whole
//! collection inside one transaction, so a failed or interrupted build
//! leaves the previous collection intact.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use pdf_rag_core::embedding::{blob_to_vec, vec_to_blob};
use pdf_rag_core::index::{top_k_by_cosine, CollectionInfo, IndexHit, VectorIndex};
use pdf_rag_core::models::{IndexedPassage, Passage};

pub struct SqliteIndex {
    pool: SqlitePool,
}

impl SqliteIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VectorIndex for SqliteIndex {
    async fn collection_info(&self, collection: &str) -> Result<Option<CollectionInfo>> {
        let row = sqlx::query(
            "SELECT name, model, dims, passage_count, document_count, built_at \
             FROM collections WHERE name = ?",
        )
        .bind(collection)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| CollectionInfo {
            name: row.get("name"),
            model: row.get("model"),
            dims: row.get::<i64, _>("dims") as usize,
            passage_count: row.get::<i64, _>("passage_count") as usize,
            document_count: row.get::<i64, _>("document_count") as usize,
            built_at: row.get("built_at"),
        }))
    }

    async fn replace_collection(
        &self,
        info: &CollectionInfo,
        entries: &[IndexedPassage],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM passages WHERE collection = ?")
            .bind(&info.name)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO collections (name, model, dims, passage_count, document_count, built_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                model = excluded.model,
                dims = excluded.dims,
                passage_count = excluded.passage_count,
                document_count = excluded.document_count,
                built_at = excluded.built_at
            "#,
        )
        .bind(&info.name)
        .bind(&info.model)
        .bind(info.dims as i64)
        .bind(info.passage_count as i64)
        .bind(info.document_count as i64)
        .bind(info.built_at)
        .execute(&mut *tx)
        .await?;

        for entry in entries {
            let p = &entry.passage;
            sqlx::query(
                r#"
                INSERT INTO passages
                    (collection, id, source_document, page, chunk_index, start_offset, text, hash, embedding)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&info.name)
            .bind(p.id)
            .bind(&p.source_document)
            .bind(p.page.map(i64::from))
            .bind(p.chunk_index)
            .bind(p.start_offset as i64)
            .bind(&p.text)
            .bind(&p.hash)
            .bind(vec_to_blob(&entry.embedding))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn query(
        &self,
        collection: &str,
        query_vec: &[f32],
        limit: usize,
    ) -> Result<Vec<IndexHit>> {
        // Fetch all vectors and compute cosine similarity in Rust
        let rows = sqlx::query(
            r#"
            SELECT id, source_document, page, chunk_index, start_offset, text, hash, embedding
            FROM passages
            WHERE collection = ?
            "#,
        )
        .bind(collection)
        .fetch_all(&self.pool)
        .await?;

        let entries = rows.iter().map(|row| {
            let blob: Vec<u8> = row.get("embedding");
            IndexedPassage {
                passage: Passage {
                    id: row.get("id"),
                    text: row.get("text"),
                    source_document: row.get("source_document"),
                    page: row.get::<Option<i64>, _>("page").map(|p| p as u32),
                    chunk_index: row.get("chunk_index"),
                    start_offset: row.get::<i64, _>("start_offset") as usize,
                    hash: row.get("hash"),
                },
                embedding: blob_to_vec(&blob),
            }
        });

        Ok(top_k_by_cosine(query_vec, entries, limit))
    }

    async fn drop_collection(&self, collection: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM passages WHERE collection = ?")
            .bind(collection)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM collections WHERE name = ?")
            .bind(collection)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }
}
