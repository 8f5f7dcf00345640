//! Sliding-window text chunker.
//!
//! Splits each document's page texts into overlapping, fixed-size
//! [`Passage`]s. Pages are concatenated per document (whitespace-only pages
//! are skipped) and a window of `chunk_size` characters advances by
//! `chunk_size - chunk_overlap` characters until it reaches the end of the
//! text.
//!
//! Each passage records the page that contains its first character, its
//! character offset, and a SHA-256 hash of its text.
//!
//! # Guarantees
//!
//! - Deterministic: identical input and parameters yield identical passages.
//! - Every passage except the last of a document has exactly `chunk_size`
//!   characters, and consecutive passages overlap by `chunk_overlap`.
//! - Passage ids are contiguous across documents, in input order.
//!
//! # Example
//!
//! ```rust
//! use pdf_rag_core::chunk::{chunk_documents, ChunkParams};
//! use pdf_rag_core::models::DocumentPages;
//!
//! let params = ChunkParams::new(10, 2).unwrap();
//! let doc = DocumentPages::from_pages("a.pdf", ["abcdefghijklmnop"]);
//! let passages = chunk_documents(&[doc], &params);
//! assert_eq!(passages[0].text, "abcdefghij");
//! assert_eq!(passages[1].text, "ijklmnop");
//! ```

use sha2::{Digest, Sha256};

use crate::error::{RagError, Result};
use crate::models::{DocumentPages, Passage};

/// Inserted between consecutive pages of one document.
const PAGE_SEPARATOR: char = '\n';

/// Window size and overlap, both in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkParams {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl ChunkParams {
    /// Validate and build chunking parameters.
    ///
    /// # Errors
    ///
    /// [`RagError::Configuration`] if `chunk_size` is zero or
    /// `chunk_overlap >= chunk_size` (the window would never advance).
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(RagError::Configuration(
                "chunking.chunk_size must be > 0".to_string(),
            ));
        }
        if chunk_overlap >= chunk_size {
            return Err(RagError::Configuration(format!(
                "chunking.chunk_overlap ({}) must be smaller than chunk_size ({})",
                chunk_overlap, chunk_size
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    fn step(&self) -> usize {
        self.chunk_size - self.chunk_overlap
    }
}

impl Default for ChunkParams {
    /// 800-character windows with 120 characters of overlap.
    fn default() -> Self {
        Self {
            chunk_size: 800,
            chunk_overlap: 120,
        }
    }
}

/// Chunk every document in order, assigning ids from 0.
pub fn chunk_documents(docs: &[DocumentPages], params: &ChunkParams) -> Vec<Passage> {
    let mut passages = Vec::new();
    for doc in docs {
        let next_id = passages.len() as i64;
        passages.extend(chunk_document(doc, params, next_id));
    }
    passages
}

/// Chunk a single document, numbering passages from `first_id`.
pub fn chunk_document(doc: &DocumentPages, params: &ChunkParams, first_id: i64) -> Vec<Passage> {
    let (chars, page_starts) = concat_pages(doc);
    if chars.is_empty() {
        return Vec::new();
    }

    let mut passages = Vec::new();
    let mut start = 0usize;
    loop {
        let end = (start + params.chunk_size).min(chars.len());
        let text: String = chars[start..end].iter().collect();

        if !text.trim().is_empty() {
            let chunk_index = passages.len() as i64;
            passages.push(make_passage(
                first_id + chunk_index,
                doc,
                page_at(&page_starts, start),
                chunk_index,
                start,
                text,
            ));
        }

        if end == chars.len() {
            break;
        }
        start += params.step();
    }

    passages
}

/// Concatenate non-blank pages, returning the characters and each page's
/// starting character offset.
fn concat_pages(doc: &DocumentPages) -> (Vec<char>, Vec<(usize, Option<u32>)>) {
    let mut chars: Vec<char> = Vec::new();
    let mut page_starts = Vec::new();

    for page in &doc.pages {
        if page.text.trim().is_empty() {
            continue;
        }
        if !chars.is_empty() {
            chars.push(PAGE_SEPARATOR);
        }
        page_starts.push((chars.len(), page.page));
        chars.extend(page.text.chars());
    }

    (chars, page_starts)
}

/// The page whose span contains `offset`. A separator belongs to the page before it.
fn page_at(page_starts: &[(usize, Option<u32>)], offset: usize) -> Option<u32> {
    page_starts
        .iter()
        .take_while(|(start, _)| *start <= offset)
        .last()
        .and_then(|(_, page)| *page)
}

fn make_passage(
    id: i64,
    doc: &DocumentPages,
    page: Option<u32>,
    chunk_index: i64,
    start_offset: usize,
    text: String,
) -> Passage {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Passage {
        id,
        text,
        source_document: doc.source.clone(),
        page,
        chunk_index,
        start_offset,
        hash,
    }
}
