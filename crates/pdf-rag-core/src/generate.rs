//! Generation service boundary.
//!
//! A [`Generator`] turns an assembled prompt into an answer. Timeouts,
//! retries, and result caching are applied by implementations and callers
//! in the application crate.

use anyhow::Result;
use async_trait::async_trait;

/// A stateless text-generation call.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Short backend name for logs (e.g. `"ollama"`).
    fn backend(&self) -> &str;

    /// Complete `prompt` with `model`, returning the raw answer text.
    async fn complete(&self, prompt: &str, model: &str) -> Result<String>;
}
