//! Folder-of-documents source for index builds.
//!
//! Walks the configured root, keeps files matching the include globs and
//! none of the exclude globs, and extracts page text:
//!
//! - `.pdf`: one page per PDF page via `pdf-extract`
//! - anything else: read as UTF-8 and split into pages on form feed (`\f`)
//!
//! Files are returned sorted by their path relative to the root, which is
//! also the passage `source_document`. A file that cannot be read or
//! extracted is skipped with a warning. A missing root yields no documents.

use anyhow::Result;
use async_trait::async_trait;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use pdf_rag_core::index::DocumentSource;
use pdf_rag_core::models::DocumentPages;

use crate::config::DocumentsConfig;

pub struct FolderSource {
    root: PathBuf,
    include_globs: Vec<String>,
    exclude_globs: Vec<String>,
}

impl FolderSource {
    pub fn new(config: &DocumentsConfig) -> Self {
        Self {
            root: config.root.clone(),
            include_globs: config.include_globs.clone(),
            exclude_globs: config.exclude_globs.clone(),
        }
    }
}

#[async_trait]
impl DocumentSource for FolderSource {
    fn describe(&self) -> String {
        self.root.display().to_string()
    }

    async fn load(&self) -> Result<Vec<DocumentPages>> {
        let root = self.root.clone();
        let include = build_globset(&self.include_globs)?;
        let exclude = build_globset(&self.exclude_globs)?;
        tokio::task::spawn_blocking(move || scan_folder(&root, &include, &exclude)).await?
    }
}

/// Collect and extract every matching file under `root`.
pub fn scan_folder(root: &Path, include: &GlobSet, exclude: &GlobSet) -> Result<Vec<DocumentPages>> {
    if !root.exists() {
        tracing::warn!(root = %root.display(), "document root does not exist");
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().replace('\\', "/");

        // Apply exclude patterns
        if exclude.is_match(&rel_str) {
            continue;
        }

        // Apply include patterns
        if !include.is_match(&rel_str) {
            continue;
        }

        files.push((rel_str, path.to_path_buf()));
    }

    // Sort for deterministic ordering
    files.sort_by(|a, b| a.0.cmp(&b.0));

    let mut docs = Vec::with_capacity(files.len());
    for (rel_str, path) in files {
        match read_pages(&path) {
            Ok(pages) => docs.push(DocumentPages::from_pages(rel_str, pages)),
            Err(e) => tracing::warn!(file = %rel_str, error = %format!("{:#}", e), "skipping unreadable document"),
        }
    }

    Ok(docs)
}

fn read_pages(path: &Path) -> Result<Vec<String>> {
    let bytes = std::fs::read(path)?;
    let is_pdf = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false);

    if is_pdf {
        // pdf-extract can panic on malformed input; contain it to this file.
        std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem_by_pages(&bytes))
            .map_err(|_| anyhow::anyhow!("PDF extraction panicked"))?
            .map_err(|e| anyhow::anyhow!("PDF extraction failed: {}", e))
    } else {
        let text = String::from_utf8(bytes)?;
        Ok(split_form_feeds(&text))
    }
}

/// Split plain text into pages on form feed characters.
pub fn split_form_feeds(text: &str) -> Vec<String> {
    text.split('\u{000C}').map(str::to_string).collect()
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DocumentsConfig;

    fn source(root: &Path, exclude: &[&str]) -> FolderSource {
        FolderSource::new(&DocumentsConfig {
            root: root.to_path_buf(),
            include_globs: vec!["**/*.txt".to_string(), "**/*.pdf".to_string()],
            exclude_globs: exclude.iter().map(|s| s.to_string()).collect(),
        })
    }

    #[test]
    fn test_split_form_feeds() {
        assert_eq!(split_form_feeds("one\u{000C}two"), vec!["one", "two"]);
        assert_eq!(split_form_feeds("single"), vec!["single"]);
    }

    #[tokio::test]
    async fn test_missing_root_yields_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let docs = source(&dir.path().join("nope"), &[]).load().await.unwrap();
        assert!(docs.is_empty());
    }

    #[tokio::test]
    async fn test_sorted_filtered_and_paged() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("b.txt"), "page one\u{000C}page two").unwrap();
        std::fs::write(dir.path().join("sub/a.txt"), "nested").unwrap();
        std::fs::write(dir.path().join("notes.md"), "ignored").unwrap();
        std::fs::write(dir.path().join("draft.txt"), "excluded").unwrap();

        let docs = source(dir.path(), &["draft.txt"]).load().await.unwrap();
        let names: Vec<&str> = docs.iter().map(|d| d.source.as_str()).collect();
        assert_eq!(names, vec!["b.txt", "sub/a.txt"]);

        assert_eq!(docs[0].pages.len(), 2);
        assert_eq!(docs[0].pages[1].page, Some(2));
        assert_eq!(docs[0].pages[1].text, "page two");
    }

    #[tokio::test]
    async fn test_broken_pdf_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.pdf"), b"not a pdf at all").unwrap();
        std::fs::write(dir.path().join("ok.txt"), "fine").unwrap();

        let docs = source(dir.path(), &[]).load().await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].source, "ok.txt");
    }
}
