//! SQLite-backed [`SessionStore`] with idle expiry.
//!
//! Turns are numbered per session by a monotonically increasing `seq`.
//! Each `append` runs in one transaction: both turns are inserted and
//! turns older than the most recent `2 × memory_depth` are deleted. The
//! transaction takes the write lock up front (`BEGIN IMMEDIATE`), so
//! concurrent appends wait on the busy timeout instead of failing; for the
//! same id both exchanges land whole, the later commit's turns newest.
//!
//! A session idle for longer than `ttl_secs` reads as absent and is
//! removed on the next access.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use pdf_rag_core::models::{ConversationTurn, Role};
use pdf_rag_core::session::SessionStore;

pub struct SqliteSessionStore {
    pool: SqlitePool,
    memory_depth: usize,
    /// `0` disables expiry.
    ttl_secs: u64,
}

impl SqliteSessionStore {
    pub fn new(pool: SqlitePool, memory_depth: usize, ttl_secs: u64) -> Self {
        Self {
            pool,
            memory_depth,
            ttl_secs,
        }
    }

    fn is_expired(&self, updated_at: i64, now: i64) -> bool {
        self.ttl_secs > 0 && now - updated_at > self.ttl_secs as i64
    }

    async fn load_turns(&self, session_id: &str) -> Result<Vec<ConversationTurn>> {
        let rows = sqlx::query("SELECT role, text FROM session_turns WHERE session_id = ? ORDER BY seq")
            .bind(session_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                let role: String = row.get("role");
                Ok(ConversationTurn {
                    role: Role::parse(&role)
                        .ok_or_else(|| anyhow!("invalid role in session store: {}", role))?,
                    text: row.get("text"),
                })
            })
            .collect()
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    fn memory_depth(&self) -> usize {
        self.memory_depth
    }

    async fn get(&self, session_id: &str) -> Result<Vec<ConversationTurn>> {
        let updated_at: Option<i64> =
            sqlx::query_scalar("SELECT updated_at FROM sessions WHERE session_id = ?")
                .bind(session_id)
                .fetch_optional(&self.pool)
                .await?;

        match updated_at {
            None => Ok(Vec::new()),
            Some(ts) if self.is_expired(ts, chrono::Utc::now().timestamp()) => {
                self.reset(session_id).await?;
                Ok(Vec::new())
            }
            Some(_) => self.load_turns(session_id).await,
        }
    }

    async fn append(
        &self,
        session_id: &str,
        user_turn: ConversationTurn,
        assistant_turn: ConversationTurn,
    ) -> Result<Vec<ConversationTurn>> {
        let now = chrono::Utc::now().timestamp();
        // A deferred transaction that reads first cannot upgrade once another
        // writer commits; SQLite reports SQLITE_BUSY without waiting.
        let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;

        let previous: Option<i64> =
            sqlx::query_scalar("SELECT updated_at FROM sessions WHERE session_id = ?")
                .bind(session_id)
                .fetch_optional(&mut *tx)
                .await?;
        if matches!(previous, Some(ts) if self.is_expired(ts, now)) {
            sqlx::query("DELETE FROM session_turns WHERE session_id = ?")
                .bind(session_id)
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query(
            "INSERT INTO sessions (session_id, updated_at) VALUES (?, ?) \
             ON CONFLICT(session_id) DO UPDATE SET updated_at = excluded.updated_at",
        )
        .bind(session_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let max_seq: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(seq), 0) FROM session_turns WHERE session_id = ?",
        )
        .bind(session_id)
        .fetch_one(&mut *tx)
        .await?;

        for (offset, turn) in [user_turn, assistant_turn].iter().enumerate() {
            sqlx::query("INSERT INTO session_turns (session_id, seq, role, text) VALUES (?, ?, ?, ?)")
                .bind(session_id)
                .bind(max_seq + 1 + offset as i64)
                .bind(turn.role.as_str())
                .bind(&turn.text)
                .execute(&mut *tx)
                .await?;
        }

        // Keep only the newest 2N turns
        let newest = max_seq + 2;
        sqlx::query("DELETE FROM session_turns WHERE session_id = ? AND seq <= ?")
            .bind(session_id)
            .bind(newest - (self.memory_depth as i64 * 2))
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        self.load_turns(session_id).await
    }

    async fn reset(&self, session_id: &str) -> Result<()> {
        let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;
        sqlx::query("DELETE FROM session_turns WHERE session_id = ?")
            .bind(session_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM sessions WHERE session_id = ?")
            .bind(session_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}
