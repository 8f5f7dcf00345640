//! # pdf-rag core
//!
//! Target-agnostic retrieval-and-context-assembly logic for pdf-rag: the
//! passage model, chunking, the vector index abstraction, index building,
//! retrieval strategies, prompt assembly, and session history.
//!
//! This crate contains no tokio, sqlx, filesystem I/O, or HTTP clients.
//! Collaborators (embedding service, vector index, generation service,
//! session store, document source) are traits implemented by the
//! application crate; in-memory implementations live here for tests.

pub mod assemble;
pub mod chunk;
pub mod embedding;
pub mod error;
pub mod generate;
pub mod index;
pub mod models;
pub mod retrieve;
pub mod session;
