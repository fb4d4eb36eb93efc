//! `ctxkit select`: Query-aware context selection.

use super::{CmdResult, build_manager, load_config, preview, print_json, read_conversation};
use ctxkit_cache::CacheRegistry;
use ctxkit_engine::ProcessedContext;
use std::path::Path;

pub async fn run(
    config_path: Option<&Path>,
    registry: &CacheRegistry<ProcessedContext>,
    file: &Path,
    query: &str,
    model: Option<String>,
    json: bool,
) -> CmdResult {
    let config = load_config(config_path)?;
    let model = model.unwrap_or_else(|| config.default_model.clone());
    let messages = read_conversation(file).await?;

    let manager = build_manager(config, registry);
    let selection = manager.select_context(&messages, query, &model)?;

    if json {
        return print_json(&selection);
    }

    let strategy = &selection.strategy;
    let stats = &selection.stats;
    let kinds: Vec<String> = selection
        .profile
        .kinds()
        .iter()
        .map(|k| format!("{k:?}").to_lowercase())
        .collect();

    println!("🧭 Context Selection");
    println!("─────────────────────────────────────");
    println!("  Query:        \"{query}\"");
    println!(
        "  Kind:         {}",
        if kinds.is_empty() { "general".to_string() } else { kinds.join(", ") }
    );
    println!("  Budget:       {} tokens", strategy.max_tokens);
    println!("  Threshold:    {:.2}", strategy.relevance_threshold);
    println!(
        "  Candidates:   {} relevant → {} with deps → {} with recent → {} balanced",
        stats.relevant_count, stats.after_dependencies, stats.after_recent, stats.after_balance
    );
    println!(
        "  Packed:       {} (+{} second pass), {} tokens ({:.1}%)",
        stats.first_pass_admitted,
        stats.second_pass_admitted,
        stats.total_tokens,
        stats.utilization * 100.0
    );
    println!("  Coverage:     {:.1}%", selection.coverage * 100.0);

    println!();
    for message in &selection.messages {
        println!("  [{:<9}] {}", message.role, preview(&message.content, 80));
    }

    Ok(())
}
