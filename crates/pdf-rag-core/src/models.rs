//! Core data models shared by the index, retriever, assembler, and sessions.

use serde::{Deserialize, Serialize};

/// One page of extracted document text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    /// 1-based page number, or `None` when the source has no page structure.
    pub page: Option<u32>,
    pub text: String,
}

/// A source document as a sequence of pages, in reading order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentPages {
    /// File name or identifier, used for provenance and citations.
    pub source: String,
    pub pages: Vec<PageText>,
}

impl DocumentPages {
    pub fn new(source: impl Into<String>, pages: Vec<PageText>) -> Self {
        Self {
            source: source.into(),
            pages,
        }
    }

    /// Build a document from page texts numbered from 1.
    pub fn from_pages<I, S>(source: impl Into<String>, pages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let pages = pages
            .into_iter()
            .enumerate()
            .map(|(i, text)| PageText {
                page: Some(i as u32 + 1),
                text: text.into(),
            })
            .collect();
        Self::new(source, pages)
    }
}

/// An immutable span of document text with provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    /// Sequential id, unique within a collection build.
    pub id: i64,
    pub text: String,
    pub source_document: String,
    /// 1-based page containing the passage's first character.
    pub page: Option<u32>,
    /// Position of this passage within its document.
    pub chunk_index: i64,
    /// Character offset of the passage in the document's concatenated text.
    pub start_offset: usize,
    /// SHA-256 of `text`, hex encoded.
    pub hash: String,
}

impl Passage {
    /// Page label for display and prompts; `?` when unknown.
    pub fn page_label(&self) -> String {
        page_label(self.page)
    }
}

pub(crate) fn page_label(page: Option<u32>) -> String {
    match page {
        Some(p) => p.to_string(),
        None => "?".to_string(),
    }
}

/// A passage together with its stored embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedPassage {
    pub passage: Passage,
    pub embedding: Vec<f32>,
}

/// A per-query view of a passage: its rank and query-specific score.
///
/// `score` is recomputed on every query and never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedChunk {
    /// 1-based position in this query's result set.
    pub rank: usize,
    /// Cosine similarity between the query and the passage, clamped to `[0, 1]`.
    pub score: f32,
    pub passage: Passage,
}

impl RetrievedChunk {
    /// Passage text cut to at most `max_chars` characters for UI display.
    ///
    /// `max_chars == 0` disables truncation. The full text stays on
    /// [`RetrievedChunk::passage`] and is what the assembler uses.
    pub fn preview(&self, max_chars: usize) -> String {
        let text = &self.passage.text;
        if max_chars == 0 || text.chars().count() <= max_chars {
            return text.clone();
        }
        let mut out: String = text.chars().take(max_chars).collect();
        out.push('…');
        out
    }
}

/// Speaker of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

/// One message in a session's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub text: String,
}

impl ConversationTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(text: &str) -> RetrievedChunk {
        RetrievedChunk {
            rank: 1,
            score: 0.5,
            passage: Passage {
                id: 0,
                text: text.to_string(),
                source_document: "a.pdf".to_string(),
                page: None,
                chunk_index: 0,
                start_offset: 0,
                hash: String::new(),
            },
        }
    }

    #[test]
    fn test_preview_truncates_on_chars() {
        let c = chunk("äöüäöü");
        assert_eq!(c.preview(3), "äöü…");
        assert_eq!(c.passage.text, "äöüäöü");
    }

    #[test]
    fn test_preview_disabled() {
        let c = chunk("short text");
        assert_eq!(c.preview(0), "short text");
        assert_eq!(c.preview(100), "short text");
    }

    #[test]
    fn test_unknown_page_label() {
        assert_eq!(chunk("x").passage.page_label(), "?");
    }

    #[test]
    fn test_from_pages_numbers_from_one() {
        let doc = DocumentPages::from_pages("a.pdf", ["one", "two"]);
        assert_eq!(doc.pages[0].page, Some(1));
        assert_eq!(doc.pages[1].page, Some(2));
    }

    #[test]
    fn test_role_roundtrip() {
        assert_eq!(Role::parse(Role::User.as_str()), Some(Role::User));
        assert_eq!(Role::parse("system"), None);
    }
}
