//! `ctxkit stats`: Token usage against the model's budget.

use super::{CmdResult, build_manager, load_config, print_json, read_conversation};
use ctxkit_cache::CacheRegistry;
use ctxkit_engine::ProcessedContext;
use std::path::Path;

pub async fn run(
    config_path: Option<&Path>,
    registry: &CacheRegistry<ProcessedContext>,
    file: &Path,
    model: Option<String>,
    json: bool,
) -> CmdResult {
    let config = load_config(config_path)?;
    let model = model.unwrap_or_else(|| config.default_model.clone());
    let messages = read_conversation(file).await?;

    let manager = build_manager(config, registry);
    let stats = manager.context_stats(&messages, &model)?;

    if json {
        return print_json(&stats);
    }

    let on_off = |b: bool| if b { "enabled" } else { "disabled" };

    println!("📊 Context Stats");
    println!("─────────────────────────────────────");
    println!("  Model:          {}", stats.model);
    println!("  Messages:       {}", stats.message_count);
    println!(
        "  Tokens:         {} (input {}, output {})",
        stats.total_tokens, stats.input_tokens, stats.output_tokens
    );
    println!("  Context window: {}", stats.context_window);
    println!("  Utilization:    {:.1}%", stats.utilization * 100.0);
    println!(
        "  Summarize at:   {} tokens{}",
        stats.summarize_threshold,
        if stats.needs_summary { " (needed)" } else { "" }
    );
    println!();
    println!("  Auto-summarize: {}", on_off(stats.flags.auto_summarize));
    println!("  Sliding window: {}", on_off(stats.flags.sliding_window));
    println!("  Compression:    level {}", stats.flags.compression_level);
    println!("  Cache:          {}", on_off(stats.flags.cache_enabled));
    if let Some(cache) = &stats.cache {
        println!(
            "                  {}/{} entries, hit rate {:.1}%",
            cache.size,
            cache.max_size,
            cache.hit_rate * 100.0
        );
    }

    Ok(())
}
