//! In-process [`SessionStore`] backed by a `HashMap`.
//!
//! History is lost on restart. Each `append` runs under the write lock, so
//! an exchange is always stored whole.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::models::ConversationTurn;

use super::{cap_history, SessionStore};

pub struct InMemorySessionStore {
    memory_depth: usize,
    sessions: RwLock<HashMap<String, Vec<ConversationTurn>>>,
}

impl InMemorySessionStore {
    pub fn new(memory_depth: usize) -> Self {
        Self {
            memory_depth,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Number of active sessions.
    pub fn len(&self) -> usize {
        self.sessions.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned() -> anyhow::Error {
    anyhow!("session map lock poisoned")
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    fn memory_depth(&self) -> usize {
        self.memory_depth
    }

    async fn get(&self, session_id: &str) -> Result<Vec<ConversationTurn>> {
        let sessions = self.sessions.read().map_err(|_| poisoned())?;
        Ok(sessions.get(session_id).cloned().unwrap_or_default())
    }

    async fn append(
        &self,
        session_id: &str,
        user_turn: ConversationTurn,
        assistant_turn: ConversationTurn,
    ) -> Result<Vec<ConversationTurn>> {
        let mut sessions = self.sessions.write().map_err(|_| poisoned())?;
        let turns = sessions.entry(session_id.to_string()).or_default();
        turns.push(user_turn);
        turns.push(assistant_turn);
        cap_history(turns, self.memory_depth);
        Ok(turns.clone())
    }

    async fn reset(&self, session_id: &str) -> Result<()> {
        let mut sessions = self.sessions.write().map_err(|_| poisoned())?;
        sessions.remove(session_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unknown_session_is_empty() {
        let store = InMemorySessionStore::new(3);
        assert!(store.get("nobody").await.unwrap().is_empty());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_history_cap() {
        let store = InMemorySessionStore::new(2);
        for i in 0..5 {
            store
                .append(
                    "s1",
                    ConversationTurn::user(format!("q{}", i)),
                    ConversationTurn::assistant(format!("a{}", i)),
                )
                .await
                .unwrap();
        }
        let history = store.get("s1").await.unwrap();
        assert_eq!(history.len(), 4);
        assert_eq!(history[0].text, "q3");
        assert_eq!(history[3].text, "a4");
    }

    #[tokio::test]
    async fn test_reset_unknown_is_noop() {
        let store = InMemorySessionStore::new(2);
        store.reset("never-seen").await.unwrap();
        assert!(store.get("never-seen").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reset_clears_only_that_session() {
        let store = InMemorySessionStore::new(2);
        store
            .append("a", ConversationTurn::user("q"), ConversationTurn::assistant("r"))
            .await
            .unwrap();
        store
            .append("b", ConversationTurn::user("q"), ConversationTurn::assistant("r"))
            .await
            .unwrap();
        store.reset("a").await.unwrap();
        assert!(store.get("a").await.unwrap().is_empty());
        assert_eq!(store.get("b").await.unwrap().len(), 2);
        assert_eq!(store.len(), 1);
    }
}
