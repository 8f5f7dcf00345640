//! # pdf-rag
//!
//! Question answering over a fixed folder of PDF documents: passages are
//! retrieved from a persisted vector index and woven into a deterministic
//! prompt with bounded conversation history before calling a language
//! model.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌─────────────┐   ┌──────────────┐
//! │ PDF folder │──▶│ Chunk+Embed │──▶│ SQLite index │
//! └────────────┘   └─────────────┘   └──────┬───────┘
//!                                           │
//!                  ┌────────────────────────┤
//!                  ▼                        ▼
//!             ┌──────────┐  retrieve  ┌───────────┐   ┌──────────┐
//!             │   CLI    │──────────▶ │ RagEngine │──▶│  Ollama  │
//!             │ (prag)   │  HTTP API  │           │   │ generate │
//!             └──────────┘            └───────────┘   └──────────┘
//! ```
//!
//! The retrieval, assembly, and session logic lives in `pdf-rag-core`;
//! this crate supplies the I/O-bound collaborators.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_index`] | Persisted vector index |
//! | [`sqlite_session`] | Persisted session history |
//! | [`documents`] | PDF and text folder source |
//! | [`embedding`] | Embedding providers |
//! | [`generation`] | Ollama client and result cache |
//! | [`directive`] | System directive loading |
//! | [`engine`] | Request handle |
//! | [`server`] | HTTP API |
//! | [`commands`] | CLI command implementations |

pub mod commands;
pub mod config;
pub mod db;
pub mod directive;
pub mod documents;
pub mod embedding;
pub mod engine;
pub mod generation;
pub mod http_retry;
pub mod migrate;
pub mod server;
pub mod sqlite_index;
pub mod sqlite_session;
