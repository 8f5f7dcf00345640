//! Deterministic prompt assembly.
//!
//! Sections, in fixed order:
//!
//! 1. the system directive
//! 2. `## Conversation History` (omitted when there is no history)
//! 3. `## Retrieved Information`, one numbered entry per chunk with source,
//!    page, and full text; or the [`NO_DOCUMENTS_MARKER`] when empty
//! 4. `## User Question`, the query verbatim
//! 5. `## Answer`, the instruction to answer and cite sources
//!
//! The token estimate is `ceil(words × 1.3)`. When a budget is given and
//! exceeded, history is dropped an exchange at a time from the oldest end.
//! Retrieved information is never trimmed.

use serde::Serialize;

use crate::models::{ConversationTurn, RetrievedChunk, Role};

/// Literal placed in the information block when retrieval found nothing.
pub const NO_DOCUMENTS_MARKER: &str = "no relevant documents found";

/// Approximate tokens per whitespace-separated word.
pub const TOKENS_PER_WORD: f64 = 1.3;

const ANSWER_INSTRUCTION: &str = "Answer the user question using the retrieved information above. \
If it does not contain the answer, say so. End your answer with a \"Sources\" list citing each \
passage you used as [n] document, page X.";

/// The assembled prompt and its size accounting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssembledPrompt {
    pub text: String,
    pub estimated_tokens: usize,
    /// History turns included in `text`.
    pub history_turns: usize,
    /// History turns dropped to fit the budget.
    pub history_dropped: usize,
    /// Still over budget after all history was dropped.
    pub over_budget: bool,
}

/// Estimate the token count of `text` as `ceil(words × 1.3)`.
pub fn estimate_tokens(text: &str) -> usize {
    let words = text.split_whitespace().count();
    (words as f64 * TOKENS_PER_WORD).ceil() as usize
}

/// Build the generation prompt.
///
/// `max_tokens = None` disables budget trimming.
pub fn assemble(
    directive: &str,
    history: &[ConversationTurn],
    chunks: &[RetrievedChunk],
    query: &str,
    max_tokens: Option<usize>,
) -> AssembledPrompt {
    let mut kept = history;
    loop {
        let text = render(directive, kept, chunks, query);
        let estimated_tokens = estimate_tokens(&text);
        let fits = max_tokens.map_or(true, |max| estimated_tokens <= max);
        if fits || kept.is_empty() {
            return AssembledPrompt {
                text,
                estimated_tokens,
                history_turns: kept.len(),
                history_dropped: history.len() - kept.len(),
                over_budget: !fits,
            };
        }
        kept = &kept[kept.len().min(2)..];
    }
}

fn render(
    directive: &str,
    history: &[ConversationTurn],
    chunks: &[RetrievedChunk],
    query: &str,
) -> String {
    let mut sections: Vec<String> = vec![directive.trim_end().to_string()];

    if !history.is_empty() {
        let lines: Vec<String> = history
            .iter()
            .map(|turn| {
                let speaker = match turn.role {
                    Role::User => "User",
                    Role::Assistant => "Assistant",
                };
                format!("{}: {}", speaker, turn.text)
            })
            .collect();
        sections.push(format!("## Conversation History\n{}", lines.join("\n")));
    }

    let information = if chunks.is_empty() {
        format!("[{}]", NO_DOCUMENTS_MARKER)
    } else {
        chunks
            .iter()
            .enumerate()
            .map(|(i, c)| {
                format!(
                    "[{}] {}, page {}\n{}",
                    i + 1,
                    c.passage.source_document,
                    c.passage.page_label(),
                    c.passage.text
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    };
    sections.push(format!("## Retrieved Information\n{}", information));
    sections.push(format!("## User Question\n{}", query));
    sections.push(format!("## Answer\n{}", ANSWER_INSTRUCTION));

    sections.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Passage;

    fn chunk(rank: usize, source: &str, page: Option<u32>, text: &str) -> RetrievedChunk {
        RetrievedChunk {
            rank,
            score: 0.8,
            passage: Passage {
                id: rank as i64,
                text: text.to_string(),
                source_document: source.to_string(),
                page,
                chunk_index: 0,
                start_offset: 0,
                hash: String::new(),
            },
        }
    }

    fn history(exchanges: usize) -> Vec<ConversationTurn> {
        (0..exchanges)
            .flat_map(|i| {
                [
                    ConversationTurn::user(format!("question number {}", i)),
                    ConversationTurn::assistant(format!("answer number {}", i)),
                ]
            })
            .collect()
    }

    #[test]
    fn test_sections_in_fixed_order() {
        let chunks = vec![chunk(1, "policy.pdf", Some(2), "Dogs are allowed.")];
        let out = assemble("You are helpful.", &history(1), &chunks, "Are dogs allowed?", None);
        let t = &out.text;
        let positions = [
            t.find("You are helpful.").unwrap(),
            t.find("## Conversation History").unwrap(),
            t.find("## Retrieved Information").unwrap(),
            t.find("## User Question").unwrap(),
            t.find("## Answer").unwrap(),
        ];
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
        assert!(t.contains("[1] policy.pdf, page 2\nDogs are allowed."));
        assert!(t.contains("User: question number 0\nAssistant: answer number 0"));
    }

    #[test]
    fn test_no_history_section_when_empty() {
        let out = assemble("D", &[], &[chunk(1, "a.pdf", Some(1), "x")], "q", None);
        assert!(!out.text.contains("## Conversation History"));
        assert_eq!(out.history_turns, 0);
    }

    #[test]
    fn test_empty_context_marker_and_verbatim_query() {
        let query = "What about  \"cats\" on page 2?";
        let out = assemble("Directive", &[], &[], query, None);
        assert!(out.text.contains(NO_DOCUMENTS_MARKER));
        assert!(out.text.contains(query));
    }

    #[test]
    fn test_full_chunk_text_used() {
        let long = "word ".repeat(500);
        let out = assemble("D", &[], &[chunk(1, "a.pdf", None, &long)], "q", None);
        assert!(out.text.contains(&long));
        assert!(out.text.contains("a.pdf, page ?"));
    }

    #[test]
    fn test_deterministic() {
        let chunks = vec![
            chunk(1, "a.pdf", Some(1), "first"),
            chunk(2, "b.pdf", Some(3), "second"),
        ];
        let a = assemble("D", &history(2), &chunks, "q", Some(1000));
        let b = assemble("D", &history(2), &chunks, "q", Some(1000));
        assert_eq!(a, b);
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("one two three four five six seven eight nine ten"), 13);
        assert_eq!(estimate_tokens("one"), 2);
    }

    #[test]
    fn test_budget_trims_oldest_history_first() {
        let chunks = vec![chunk(1, "a.pdf", Some(1), "retrieved passage text")];
        let full = assemble("D", &history(3), &chunks, "q", None);
        let without_one = assemble("D", &history(3)[2..], &chunks, "q", None);

        let out = assemble("D", &history(3), &chunks, "q", Some(without_one.estimated_tokens));
        assert!(full.estimated_tokens > without_one.estimated_tokens);
        assert_eq!(out.history_dropped, 2);
        assert_eq!(out.history_turns, 4);
        assert!(!out.text.contains("question number 0"));
        assert!(out.text.contains("question number 1"));
        assert!(out.text.contains("question number 2"));
        assert!(!out.over_budget);
    }

    #[test]
    fn test_budget_never_trims_context() {
        let text = "important ".repeat(200);
        let chunks = vec![chunk(1, "a.pdf", Some(1), &text)];
        let out = assemble("D", &history(2), &chunks, "q", Some(10));
        assert!(out.text.contains(&text));
        assert_eq!(out.history_turns, 0);
        assert_eq!(out.history_dropped, 4);
        assert!(out.over_budget);
    }
}
