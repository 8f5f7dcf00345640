//! CLI command implementations. Results go to stdout; logs go to stderr.

use anyhow::Result;

use pdf_rag_core::index::VectorIndex;
use pdf_rag_core::session::SessionStore;

use crate::config::Config;
use crate::db;
use crate::engine::{RagEngine, SourceRef};
use crate::generation;
use crate::migrate;
use crate::sqlite_index::SqliteIndex;
use crate::sqlite_session::SqliteSessionStore;

/// Open the index, building it when missing or when `rebuild` is set.
pub async fn run_index(config: &Config, rebuild: bool) -> Result<()> {
    let engine = RagEngine::from_config(config, rebuild).await?;
    let info = engine.collection_info().await;
    println!(
        "Index '{}': {} passages from {} documents (model: {}).",
        info.name,
        info.passage_count,
        info.document_count,
        if info.model.is_empty() { "none" } else { &info.model }
    );
    Ok(())
}

pub async fn run_search(
    config: &Config,
    query: &str,
    k: Option<usize>,
    strategy: Option<&str>,
    json: bool,
) -> Result<()> {
    let engine = RagEngine::from_config(config, false).await?;
    let results = engine.search(query, k, strategy).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for result in &results {
        print_source(result);
    }
    Ok(())
}

pub async fn run_ask(config: &Config, query: &str, session: Option<&str>, json: bool) -> Result<()> {
    let engine = RagEngine::from_config(config, false).await?;
    let response = match session {
        Some(id) => engine.ask(id, query).await?,
        None => engine.ask_once(query).await?,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    println!("{}", response.answer);
    println!();
    if response.sources.is_empty() {
        println!("Sources: none");
    } else {
        println!("Sources:");
        for source in &response.sources {
            println!("  {} (score {:.2})", source.citation(), source.score);
        }
    }
    Ok(())
}

/// Clear a persisted session. Only the sqlite backend outlives the process.
pub async fn run_reset(config: &Config, session_id: &str) -> Result<()> {
    if config.session.backend != "sqlite" {
        println!(
            "Session backend is '{}'; nothing persisted for {}.",
            config.session.backend, session_id
        );
        return Ok(());
    }
    let pool = db::connect(config).await?;
    migrate::migrate(&pool).await?;
    let store = SqliteSessionStore::new(pool.clone(), config.session.memory_depth, config.session.ttl_secs);
    store.reset(session_id).await?;
    pool.close().await;
    println!("Session {} reset.", session_id);
    Ok(())
}

/// Drop the collection and the generation cache, forcing a fresh build next time.
pub async fn run_clear(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate::migrate(&pool).await?;

    let index = SqliteIndex::new(pool.clone());
    if index.drop_collection(&config.index.collection).await? {
        println!("Index '{}' cleared.", config.index.collection);
    } else {
        println!("No index '{}' to clear.", config.index.collection);
    }

    let removed = generation::clear_cache(&pool).await?;
    println!("Cleared {} cached generations.", removed);

    pool.close().await;
    Ok(())
}

fn print_source(result: &SourceRef) {
    let page = result
        .page
        .map(|p| p.to_string())
        .unwrap_or_else(|| "?".to_string());
    println!(
        "{}. [{:.2}] {}, page {}",
        result.rank, result.score, result.source, page
    );
    println!("    {}", result.content.replace('\n', " "));
    println!();
}
