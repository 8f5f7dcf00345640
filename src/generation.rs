//! Generation service clients.
//!
//! - [`OllamaGenerator`] calls `POST {url}/api/generate` with
//!   `{model, prompt, stream: false}` and returns the trimmed `response`
//!   field. Transient failures are retried with backoff.
//! - [`CachedGenerator`] wraps any [`Generator`] with a TTL-bounded result
//!   cache in the `generation_cache` table, keyed by
//!   `sha256(model || "||" || prompt)`. Cache failures never fail a request.
//! - [`DisabledGenerator`] always errors.
//!
//! The request deadline is applied by the caller, not here.

use anyhow::{bail, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;

use pdf_rag_core::generate::Generator;

use crate::config::GenerationConfig;
use crate::http_retry;

const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

// ============ Ollama ============

pub struct OllamaGenerator {
    url: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string());
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = attempt_timeout(config.timeout_secs, config.max_retries) {
            builder = builder.timeout(timeout);
        }
        let client = builder.build()?;
        Ok(Self {
            url: url.trim_end_matches('/').to_string(),
            max_retries: config.max_retries,
            client,
        })
    }
}

/// Per-request timeout for one generation attempt.
///
/// The engine deadline covers the whole call, retries included, so each
/// attempt gets an even share of it. `None` when the deadline is disabled.
pub fn attempt_timeout(timeout_secs: u64, max_retries: u32) -> Option<Duration> {
    if timeout_secs == 0 {
        return None;
    }
    let share = timeout_secs / (u64::from(max_retries) + 1);
    Some(Duration::from_secs(share.max(1)))
}

#[async_trait]
impl Generator for OllamaGenerator {
    fn backend(&self) -> &str {
        "ollama"
    }

    async fn complete(&self, prompt: &str, model: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": model,
            "prompt": prompt,
            "stream": false,
        });
        let json = http_retry::post_json(
            &self.client,
            &format!("{}/api/generate", self.url),
            None,
            &body,
            self.max_retries,
            "Ollama",
        )
        .await?;
        parse_generate_response(&json)
    }
}

fn parse_generate_response(json: &serde_json::Value) -> Result<String> {
    let text = json
        .get("response")
        .and_then(|r| r.as_str())
        .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing response field"))?
        .trim();
    if text.is_empty() {
        bail!("Ollama returned an empty answer");
    }
    Ok(text.to_string())
}

// ============ Disabled ============

pub struct DisabledGenerator;

#[async_trait]
impl Generator for DisabledGenerator {
    fn backend(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _prompt: &str, _model: &str) -> Result<String> {
        bail!("Generation provider is disabled")
    }
}

// ============ Result cache ============

/// Cache key for a `(model, prompt)` pair.
pub fn cache_key(model: &str, prompt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update((model.len() as u64).to_le_bytes());
    hasher.update(model.as_bytes());
    hasher.update(prompt.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub struct CachedGenerator {
    inner: Arc<dyn Generator>,
    pool: SqlitePool,
    ttl_secs: u64,
}

impl CachedGenerator {
    pub fn new(inner: Arc<dyn Generator>, pool: SqlitePool, ttl_secs: u64) -> Self {
        Self {
            inner,
            pool,
            ttl_secs,
        }
    }

    async fn lookup(&self, key: &str) -> Result<Option<String>> {
        let cached: Option<String> = sqlx::query_scalar(
            "SELECT response FROM generation_cache WHERE key = ? AND expires_at > ?",
        )
        .bind(key)
        .bind(chrono::Utc::now().timestamp())
        .fetch_optional(&self.pool)
        .await?;
        Ok(cached)
    }

    async fn store(&self, key: &str, model: &str, response: &str) -> Result<()> {
        let expires_at = chrono::Utc::now().timestamp() + self.ttl_secs as i64;
        sqlx::query(
            "INSERT INTO generation_cache (key, model, response, expires_at) VALUES (?, ?, ?, ?) \
             ON CONFLICT(key) DO UPDATE SET response = excluded.response, expires_at = excluded.expires_at",
        )
        .bind(key)
        .bind(model)
        .bind(response)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl Generator for CachedGenerator {
    fn backend(&self) -> &str {
        self.inner.backend()
    }

    async fn complete(&self, prompt: &str, model: &str) -> Result<String> {
        let key = cache_key(model, prompt);

        match self.lookup(&key).await {
            Ok(Some(response)) => {
                tracing::debug!(model, "generation cache hit");
                return Ok(response);
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "generation cache read failed"),
        }

        let response = self.inner.complete(prompt, model).await?;

        if let Err(e) = self.store(&key, model, &response).await {
            tracing::warn!(error = %e, "generation cache write failed");
        }
        Ok(response)
    }
}

/// Delete every cached generation result. Returns the number of rows removed.
pub async fn clear_cache(pool: &SqlitePool) -> Result<u64> {
    let result = sqlx::query("DELETE FROM generation_cache")
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

/// Build the configured generator, wrapping it in the result cache when enabled.
pub fn create_generator(config: &GenerationConfig, pool: &SqlitePool) -> Result<Arc<dyn Generator>> {
    let base: Arc<dyn Generator> = match config.provider.as_str() {
        "disabled" => return Ok(Arc::new(DisabledGenerator)),
        "ollama" => Arc::new(OllamaGenerator::new(config)?),
        other => bail!("Unknown generation provider: {}", other),
    };
    if config.cache_ttl_secs == 0 {
        return Ok(base);
    }
    Ok(Arc::new(CachedGenerator::new(
        base,
        pool.clone(),
        config.cache_ttl_secs,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::migrate;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingGenerator {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Generator for CountingGenerator {
        fn backend(&self) -> &str {
            "counting"
        }
        async fn complete(&self, prompt: &str, model: &str) -> Result<String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("{}:{}:{}", model, prompt.len(), n))
        }
    }

    async fn pool(dir: &tempfile::TempDir) -> SqlitePool {
        let pool = db::connect_path(&dir.path().join("cache.sqlite"))
            .await
            .unwrap();
        migrate::migrate(&pool).await.unwrap();
        pool
    }

    #[test]
    fn test_cache_key_depends_on_model_and_prompt() {
        assert_eq!(cache_key("m", "p"), cache_key("m", "p"));
        assert_ne!(cache_key("m", "p"), cache_key("n", "p"));
        assert_ne!(cache_key("m|", "|p"), cache_key("m", "||p"));
        assert_ne!(cache_key("ab", "c"), cache_key("a", "bc"));
        assert_eq!(cache_key("m", "p").len(), 64);
    }

    #[test]
    fn test_attempt_timeout_leaves_room_for_retries() {
        assert_eq!(attempt_timeout(120, 3), Some(Duration::from_secs(30)));
        assert_eq!(attempt_timeout(120, 0), Some(Duration::from_secs(120)));
        assert_eq!(attempt_timeout(2, 5), Some(Duration::from_secs(1)));
        assert_eq!(attempt_timeout(0, 3), None);
    }

    #[test]
    fn test_parse_generate_response() {
        let json = serde_json::json!({ "response": "  Dogs are allowed.\n" });
        assert_eq!(parse_generate_response(&json).unwrap(), "Dogs are allowed.");
        assert!(parse_generate_response(&serde_json::json!({ "response": "  " })).is_err());
        assert!(parse_generate_response(&serde_json::json!({})).is_err());
    }

    #[tokio::test]
    async fn test_cached_generator_hits_and_expires() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool(&dir).await;
        let inner = Arc::new(CountingGenerator {
            calls: AtomicUsize::new(0),
        });
        let cached = CachedGenerator::new(inner.clone(), pool.clone(), 3600);

        let first = cached.complete("prompt", "m").await.unwrap();
        let second = cached.complete("prompt", "m").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);

        cached.complete("prompt", "other").await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);

        sqlx::query("UPDATE generation_cache SET expires_at = 0")
            .execute(&pool)
            .await
            .unwrap();
        cached.complete("prompt", "m").await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);

        assert_eq!(clear_cache(&pool).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_disabled_generator_errors() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool(&dir).await;
        let generator = create_generator(&GenerationConfig::default(), &pool).unwrap();
        assert_eq!(generator.backend(), "disabled");
        assert!(generator.complete("p", "m").await.is_err());
    }
}
