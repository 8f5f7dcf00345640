//! System directive loading.
//!
//! A directive file is either plain text, used verbatim, or a JSON object
//! flattened into markdown sections in a fixed order:
//!
//! | Key | Heading | Items |
//! |-----|---------|-------|
//! | `goal` | Goal | values |
//! | `format_rules` | Format Rules | values |
//! | `restrictions` | Restrictions | `key: value`, `_` in keys shown as spaces |
//! | `planning_guidance` | Planning Guidance | array entries |
//! | `output_guidance` | Output Guidance | values |
//! | `style_guidance` | Style Guidance | `key: value` |
//! | `session_context` | Session Context | `key: value` |
//! | `example` | Example | `User: …` / `Assistant: …` |
//!
//! Keys outside this table are ignored. Object key order is preserved.

use std::path::Path;

use pdf_rag_core::error::{RagError, Result};
use serde_json::{Map, Value};

use crate::config::ContextConfig;

/// How a section's entries are rendered.
#[derive(Clone, Copy)]
enum Items {
    Values,
    KeyValues { humanize_keys: bool },
}

const SECTIONS: &[(&str, &str, Items)] = &[
    ("goal", "Goal", Items::Values),
    ("format_rules", "Format Rules", Items::Values),
    ("restrictions", "Restrictions", Items::KeyValues { humanize_keys: true }),
    ("planning_guidance", "Planning Guidance", Items::Values),
    ("output_guidance", "Output Guidance", Items::Values),
    ("style_guidance", "Style Guidance", Items::KeyValues { humanize_keys: false }),
    ("session_context", "Session Context", Items::KeyValues { humanize_keys: false }),
];

/// Resolve the directive from config: inline text wins over a file path.
pub fn load_directive(config: &ContextConfig) -> Result<String> {
    let directive = match (&config.directive, &config.directive_path) {
        (Some(inline), _) => inline.clone(),
        (None, Some(path)) => load_directive_file(path)?,
        (None, None) => {
            return Err(RagError::Configuration(
                "no system directive configured".to_string(),
            ))
        }
    };
    if directive.trim().is_empty() {
        return Err(RagError::Configuration(
            "system directive is empty".to_string(),
        ));
    }
    Ok(directive)
}

/// Read a directive file; `.json` files are flattened.
pub fn load_directive_file(path: &Path) -> Result<String> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        RagError::Configuration(format!(
            "cannot read system directive {}: {}",
            path.display(),
            e
        ))
    })?;

    let is_json = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if !is_json {
        return Ok(content);
    }

    let value: Value = serde_json::from_str(&content).map_err(|e| {
        RagError::Configuration(format!(
            "invalid JSON in system directive {}: {}",
            path.display(),
            e
        ))
    })?;
    let flattened = flatten_directive(&value)?;
    if flattened.is_empty() {
        return Err(RagError::Configuration(format!(
            "system directive {} has no recognised sections",
            path.display()
        )));
    }
    Ok(flattened)
}

/// Flatten a structured directive into markdown sections.
pub fn flatten_directive(value: &Value) -> Result<String> {
    let object = value.as_object().ok_or_else(|| {
        RagError::Configuration("system directive JSON must be an object".to_string())
    })?;

    let mut parts = Vec::new();
    for (key, title, items) in SECTIONS {
        let Some(section) = object.get(*key) else {
            continue;
        };
        let lines = match items {
            Items::Values => value_items(section),
            Items::KeyValues { humanize_keys } => key_value_items(section, *humanize_keys),
        };
        parts.push(format!("## {}\n{}", title, lines.join("\n")));
    }

    if let Some(example) = object.get("example").and_then(Value::as_object) {
        parts.push(format!(
            "## Example\nUser: {}\nAssistant: {}",
            field(example, "user"),
            field(example, "assistant")
        ));
    }

    Ok(parts.join("\n\n"))
}

fn value_items(section: &Value) -> Vec<String> {
    match section {
        Value::Object(map) => map.values().map(|v| format!("- {}", text(v))).collect(),
        Value::Array(items) => items.iter().map(|v| format!("- {}", text(v))).collect(),
        other => vec![format!("- {}", text(other))],
    }
}

fn key_value_items(section: &Value, humanize_keys: bool) -> Vec<String> {
    match section {
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| {
                let key = if humanize_keys {
                    k.replace('_', " ")
                } else {
                    k.clone()
                };
                format!("- {}: {}", key, text(v))
            })
            .collect(),
        other => value_items(other),
    }
}

fn field(map: &Map<String, Value>, key: &str) -> String {
    map.get(key).map(text).unwrap_or_default()
}

fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_flatten_sections_in_fixed_order() {
        let value = json!({
            "example": { "user": "Are dogs allowed?", "assistant": "Yes [1]." },
            "restrictions": { "no_speculation": "Only use the documents." },
            "goal": { "primary": "Answer questions", "secondary": "Cite sources" },
            "planning_guidance": ["Read the context", "Draft the answer"],
            "style_guidance": { "tone": "neutral" },
        });
        let out = flatten_directive(&value).unwrap();
        assert_eq!(
            out,
            "## Goal\n- Answer questions\n- Cite sources\n\n\
             ## Restrictions\n- no speculation: Only use the documents.\n\n\
             ## Planning Guidance\n- Read the context\n- Draft the answer\n\n\
             ## Style Guidance\n- tone: neutral\n\n\
             ## Example\nUser: Are dogs allowed?\nAssistant: Yes [1]."
        );
    }

    #[test]
    fn test_unknown_keys_ignored() {
        let out = flatten_directive(&json!({ "misc": "x" })).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_non_object_rejected() {
        let err = flatten_directive(&json!(["a"])).unwrap_err();
        assert_eq!(err.code(), "configuration_error");
    }

    #[test]
    fn test_load_plain_text_and_json_files() {
        let dir = tempfile::tempdir().unwrap();
        let txt = dir.path().join("prompt.txt");
        std::fs::write(&txt, "You answer from documents.").unwrap();
        assert_eq!(
            load_directive_file(&txt).unwrap(),
            "You answer from documents."
        );

        let js = dir.path().join("prompt.json");
        std::fs::write(&js, r#"{"goal": {"a": "Be precise"}}"#).unwrap();
        assert_eq!(load_directive_file(&js).unwrap(), "## Goal\n- Be precise");

        std::fs::write(&js, "{ not json").unwrap();
        assert!(matches!(
            load_directive_file(&js),
            Err(RagError::Configuration(_))
        ));
    }

    #[test]
    fn test_missing_file_is_configuration_error() {
        let config = ContextConfig {
            directive_path: Some("/nonexistent/prompt.json".into()),
            directive: None,
            max_prompt_tokens: 0,
        };
        assert!(matches!(
            load_directive(&config),
            Err(RagError::Configuration(_))
        ));
    }

    #[test]
    fn test_shipped_directive_flattens() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/system_prompt.json");
        let out = load_directive_file(&path).unwrap();
        assert!(out.starts_with("## Goal\n"));
        assert!(out.contains("## Restrictions\n- no speculation: "));
        assert!(out.contains("## Example\nUser: "));
    }

    #[test]
    fn test_inline_directive_wins() {
        let config = ContextConfig {
            directive_path: Some("/nonexistent/prompt.json".into()),
            directive: Some("Inline".to_string()),
            max_prompt_tokens: 0,
        };
        assert_eq!(load_directive(&config).unwrap(), "Inline");

        let blank = ContextConfig {
            directive: Some("   ".to_string()),
            ..config
        };
        assert!(load_directive(&blank).is_err());
    }
}
