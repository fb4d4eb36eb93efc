//! `ctxkit score`: Rank messages by relevance to a query.

use super::{CmdResult, build_manager, load_config, preview, print_json, read_conversation};
use ctxkit_cache::CacheRegistry;
use ctxkit_engine::ProcessedContext;
use std::path::Path;

pub async fn run(
    config_path: Option<&Path>,
    registry: &CacheRegistry<ProcessedContext>,
    file: &Path,
    query: &str,
    max: usize,
    threshold: Option<f64>,
    json: bool,
) -> CmdResult {
    let mut config = load_config(config_path)?;
    if let Some(threshold) = threshold {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(format!("--threshold must be between 0 and 1, got {threshold}").into());
        }
        config.context.relevance_threshold = threshold;
    }
    let messages = read_conversation(file).await?;

    let manager = build_manager(config, registry);
    let (kept, result) = manager.filter_messages_by_relevance(&messages, query, max);

    if json {
        return print_json(&result);
    }

    println!("🎯 Relevance for: \"{query}\"");
    println!("─────────────────────────────────────────────────────");
    println!("{:>4} {:>6} {:<10} {}", "#", "Score", "Role", "Reasoning");
    for score in &result.scores {
        let message = &messages[score.message_index];
        let mark = if kept.iter().any(|k| k.id == message.id) { "✓" } else { " " };
        println!(
            "{:>4} {:>6.3} {:<10} {} {}",
            score.message_index, score.score, message.role, mark, score.reasoning
        );
        println!("{:>22}{}", "", preview(&message.content, 60));
    }

    println!();
    println!(
        "  {} of {} messages kept (threshold {:.2}, max {max})",
        kept.len(),
        result.original_count,
        result.threshold
    );

    Ok(())
}
