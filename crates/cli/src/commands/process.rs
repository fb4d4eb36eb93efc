//! `ctxkit process`: Run the context pipeline over a conversation.

use super::{CmdResult, build_manager, load_config, preview, print_json, read_conversation};
use ctxkit_cache::CacheRegistry;
use ctxkit_engine::{ProcessedContext, ProcessingOptions};
use std::path::Path;

pub async fn run(
    config_path: Option<&Path>,
    registry: &CacheRegistry<ProcessedContext>,
    file: &Path,
    model: Option<String>,
    options: ProcessingOptions,
    json: bool,
) -> CmdResult {
    let config = load_config(config_path)?;
    let model = model.unwrap_or_else(|| config.default_model.clone());
    let messages = read_conversation(file).await?;

    let manager = build_manager(config, registry);
    let result = manager.process_conversation_with_options(&messages, &model, &options)?;

    if json {
        return print_json(&result);
    }

    println!("📦 Processed Context");
    println!("─────────────────────────────────────");
    println!("  Model:        {model}");
    println!("  Messages:     {} → {}", result.original_count, result.final_count);
    println!("  Tokens:       {} → {}", result.original_tokens, result.final_tokens);
    println!("  Ratio:        {:.2}", result.compression_ratio);
    println!("  Cache key:    {}", result.cache_key);
    if result.applied_steps.is_empty() {
        println!("  Steps:        (none)");
    } else {
        println!("  Steps:        {}", result.applied_steps.join(" → "));
    }

    if let Some(summary) = &result.summary {
        println!(
            "  Summary:      {} messages → {} tokens ({:.0}%)",
            summary.messages_summarized,
            summary.summary_tokens,
            summary.compression_ratio * 100.0
        );
    }
    if let Some(window) = result.window.as_ref().filter(|w| w.applied) {
        println!(
            "  Window:       kept {} of {}, {} overlap tokens",
            window.final_count, window.original_count, window.overlap_tokens
        );
    }
    if let Some(compression) = &result.compression {
        println!(
            "  Compression:  level {} ({}), {} → {} bytes",
            compression.level, compression.method, compression.original_bytes, compression.compressed_bytes
        );
    }

    println!();
    for message in &result.messages {
        let marker = if message.is_summary() { "*" } else { " " };
        println!("{marker} [{:<9}] {}", message.role, preview(&message.content, 80));
    }

    Ok(())
}
