//! Subcommand implementations and the helpers they share.

pub mod config_cmd;
pub mod graph;
pub mod process;
pub mod score;
pub mod select;
pub mod stats;

use ctxkit_cache::CacheRegistry;
use ctxkit_config::AppConfig;
use ctxkit_core::message::Message;
use ctxkit_core::token::HeuristicTokenCounter;
use ctxkit_engine::{ContextManager, ProcessedContext};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncReadExt;

pub type CmdResult = Result<(), Box<dyn std::error::Error>>;

/// Load the config from `path`, or from the default location.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, Box<dyn std::error::Error>> {
    let config = match path {
        Some(path) => AppConfig::load_file(path),
        None => AppConfig::load(),
    };
    Ok(config.map_err(|e| format!("Failed to load config: {e}"))?)
}

/// Read a JSON array of messages from a file, or stdin for `-`.
pub async fn read_conversation(path: &Path) -> Result<Vec<Message>, Box<dyn std::error::Error>> {
    let raw = if path == Path::new("-") {
        let mut buf = String::new();
        tokio::io::stdin().read_to_string(&mut buf).await?;
        buf
    } else {
        tokio::fs::read_to_string(path)
            .await
            .map_err(|e| format!("Failed to read {}: {e}", path.display()))?
    };
    let messages: Vec<Message> = serde_json::from_str(&raw)
        .map_err(|e| format!("Invalid conversation JSON in {}: {e}", path.display()))?;
    tracing::debug!(count = messages.len(), "Loaded conversation");
    Ok(messages)
}

pub fn build_manager(config: AppConfig, registry: &CacheRegistry<ProcessedContext>) -> ContextManager {
    ContextManager::new(config, Arc::new(HeuristicTokenCounter), registry)
}

pub fn print_json<T: Serialize>(value: &T) -> CmdResult {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Single-line preview of message content.
pub fn preview(content: &str, max_chars: usize) -> String {
    let flat = content.split_whitespace().collect::<Vec<_>>().join(" ");
    match flat.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}…", &flat[..cut]),
        None => flat,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_flattens_and_truncates() {
        assert_eq!(preview("a\n  b\tc", 10), "a b c");
        assert_eq!(preview("abcdef", 3), "abc…");
    }

    #[tokio::test]
    async fn reads_conversation_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conv.json");
        std::fs::write(
            &path,
            r#"[{"role":"user","content":"hi","timestamp":5},{"role":"assistant","content":"hello"}]"#,
        )
        .unwrap();
        let messages = read_conversation(&path).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].timestamp, 5);
        assert!(!messages[1].id.is_empty());
    }

    #[tokio::test]
    async fn rejects_malformed_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(read_conversation(&path).await.is_err());
    }

    #[test]
    fn explicit_config_path_is_used() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "default_model = \"openai/gpt-4o\"\n").unwrap();
        let config = load_config(Some(&path)).unwrap();
        // CTXKIT_MODEL may override in the environment
        if std::env::var("CTXKIT_MODEL").is_err() {
            assert_eq!(config.default_model, "openai/gpt-4o");
        }
    }
}
