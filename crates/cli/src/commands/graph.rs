//! `ctxkit graph`: Show message dependencies and clusters.

use super::{CmdResult, preview, print_json, read_conversation};
use ctxkit_engine::DependencyGraphBuilder;
use std::collections::HashMap;
use std::path::Path;

pub async fn run(file: &Path, json: bool) -> CmdResult {
    let messages = read_conversation(file).await?;
    let graph = DependencyGraphBuilder::new().build(&messages);

    if json {
        return print_json(&graph);
    }

    let position: HashMap<&str, usize> = messages
        .iter()
        .enumerate()
        .map(|(i, m)| (m.id.as_str(), i))
        .collect();
    let label = |id: &str| position.get(id).map_or_else(|| id.to_string(), |i| format!("#{i}"));

    println!("🕸️  Dependencies ({})", graph.dependencies.len());
    println!("─────────────────────────────────────────────────────");
    for dep in &graph.dependencies {
        println!(
            "  {:>5} → {:<5} {:<18} {:.2}  {}",
            label(dep.from_id.as_str()),
            label(dep.to_id.as_str()),
            dep.kind,
            dep.strength,
            dep.reason
        );
    }

    println!();
    println!("🧩 Clusters ({})", graph.clusters.len());
    for cluster in &graph.clusters {
        let members: Vec<String> = cluster.message_ids.iter().map(|id| label(id.as_str())).collect();
        println!(
            "  {} [{}] strength {:.2}: {}",
            cluster.id,
            cluster.topic,
            cluster.strength,
            members.join(", ")
        );
    }

    let order = graph.sort_by_dependencies(&messages);
    if !order.unresolved.is_empty() {
        println!();
        println!("  ⚠️  {} messages in a dependency cycle", order.unresolved.len());
    }

    if !graph.entities.is_empty() {
        println!();
        println!("🏷️  Entities ({})", graph.entities.len());
        for (entity, ids) in &graph.entities {
            let members: Vec<String> = ids.iter().map(|id| label(id.as_str())).collect();
            println!("  {:<30} {}", preview(entity, 30), members.join(", "));
        }
    }

    Ok(())
}
