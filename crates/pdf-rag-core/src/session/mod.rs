//! Bounded per-session conversation history.
//!
//! The [`SessionStore`] trait is the capability the request handler needs
//! (`get`, `append`, `reset`); backends are swappable. Every backend keeps
//! at most `2 × memory_depth` turns per session, dropping the oldest first.
//!
//! A session id moves from absent to active on its first `append`, stays
//! active while exchanges are appended, and returns to absent on `reset`
//! or backend expiry.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::ConversationTurn;

/// Storage for conversation history keyed by session id.
///
/// `append` adds the user and assistant turns of one exchange atomically,
/// so concurrent requests never interleave halves of two exchanges.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Number of exchanges (user + assistant pairs) retained per session.
    fn memory_depth(&self) -> usize;

    /// History for `session_id`, oldest first. Unknown ids yield an empty history.
    async fn get(&self, session_id: &str) -> Result<Vec<ConversationTurn>>;

    /// Append one exchange and return the capped history.
    async fn append(
        &self,
        session_id: &str,
        user_turn: ConversationTurn,
        assistant_turn: ConversationTurn,
    ) -> Result<Vec<ConversationTurn>>;

    /// Forget a session. Resetting an unknown id is a no-op.
    async fn reset(&self, session_id: &str) -> Result<()>;
}

/// Drop the oldest turns so at most `2 × memory_depth` remain.
pub fn cap_history(turns: &mut Vec<ConversationTurn>, memory_depth: usize) {
    let max_turns = memory_depth * 2;
    if turns.len() > max_turns {
        let excess = turns.len() - max_turns;
        turns.drain(..excess);
    }
}
