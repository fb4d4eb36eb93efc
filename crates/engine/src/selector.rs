//! Strategy-driven context selection.
//!
//! The selector classifies the query, derives a [`SelectionStrategy`],
//! narrows the conversation to a candidate set and then greedily packs
//! candidates into the token budget by a 0–100 priority score.
//!
//! # Pipeline
//!
//! 1. Keep messages at or above the relevance threshold.
//! 2. Add one hop of required messages from the dependency graph.
//! 3. Add the most recent messages.
//! 4. Cap the larger of the user/assistant groups at the smaller's size.
//! 5. Move code-bearing messages to the front.
//! 6. Pack by priority, then a second pass over small rejected messages.

use crate::classify::{self, QueryProfile};
use crate::graph::DependencyGraphBuilder;
use crate::relevance::{RelevanceResult, RelevanceScorer};
use ctxkit_config::{AppConfig, PackingConfig, PriorityWeights, StrategyConfig};
use ctxkit_core::error::TokenError;
use ctxkit_core::message::{Message, Role};
use ctxkit_core::model::ModelCatalog;
use ctxkit_core::token::TokenCounter;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

// ── Types ─────────────────────────────────────────────────────────────────

/// Parameters for one selection run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectionStrategy {
    /// Token budget; never above the model's context window.
    pub max_tokens: usize,
    pub relevance_threshold: f64,
    pub include_dependencies: bool,
    /// Re-sort the output by timestamp.
    pub preserve_order: bool,
    pub include_recent: bool,
    pub recent_count: usize,
    pub balance_roles: bool,
    pub prioritize_code: bool,
}

impl SelectionStrategy {
    /// Base strategy for a model window.
    pub fn base(context_window: usize, config: &StrategyConfig) -> Self {
        Self {
            max_tokens: budget(context_window, config.base_budget_ratio),
            relevance_threshold: config.base_threshold,
            include_dependencies: true,
            preserve_order: true,
            include_recent: true,
            recent_count: config.base_recent_count,
            balance_roles: true,
            prioritize_code: false,
        }
    }
}

fn budget(context_window: usize, ratio: f64) -> usize {
    ((context_window as f64 * ratio).round() as usize).min(context_window)
}

/// Adjust the base strategy for each category the query falls into.
/// Later categories override earlier ones.
pub fn derive_strategy(
    profile: &QueryProfile,
    context_window: usize,
    config: &StrategyConfig,
) -> SelectionStrategy {
    let mut strategy = SelectionStrategy::base(context_window, config);

    if profile.code {
        strategy.relevance_threshold = config.code_threshold;
        strategy.include_dependencies = true;
    }
    if profile.question {
        strategy.recent_count = strategy.recent_count.max(config.question_recent_count);
    }
    if profile.debugging {
        strategy.relevance_threshold = config.debugging_threshold;
        strategy.prioritize_code = true;
    }
    if profile.summary {
        strategy.relevance_threshold = config.summary_threshold;
        strategy.include_dependencies = false;
    }
    if profile.whole_conversation {
        strategy.max_tokens = budget(context_window, config.whole_conversation_budget_ratio);
        strategy.relevance_threshold = config.whole_conversation_threshold;
        strategy.recent_count = config.whole_conversation_recent_count;
    }

    strategy
}

/// Candidate counts after each pipeline stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SelectionStats {
    pub original_count: usize,
    pub relevant_count: usize,
    pub after_dependencies: usize,
    pub after_recent: usize,
    pub after_balance: usize,
    pub user_after_balance: usize,
    pub assistant_after_balance: usize,
    pub first_pass_admitted: usize,
    pub second_pass_admitted: usize,
    pub selected_count: usize,
    pub total_tokens: usize,
    pub max_tokens: usize,
    /// total_tokens / max_tokens.
    pub utilization: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Selection {
    pub messages: Vec<Message>,
    pub strategy: SelectionStrategy,
    pub profile: QueryProfile,
    pub stats: SelectionStats,
    /// Share of the conversation's relevance mass that was selected.
    pub coverage: f64,
    #[serde(skip)]
    pub relevance: RelevanceResult,
}

// ── Selector ──────────────────────────────────────────────────────────────

pub struct SmartSelector {
    counter: Arc<dyn TokenCounter>,
    catalog: Arc<ModelCatalog>,
    scorer: RelevanceScorer,
    builder: DependencyGraphBuilder,
    strategy: StrategyConfig,
    priority: PriorityWeights,
    packing: PackingConfig,
}

impl SmartSelector {
    pub fn new(counter: Arc<dyn TokenCounter>, catalog: Arc<ModelCatalog>, config: &AppConfig) -> Self {
        Self {
            counter,
            catalog,
            scorer: RelevanceScorer::new(config.scoring.clone()),
            builder: DependencyGraphBuilder::new(),
            strategy: config.strategy.clone(),
            priority: config.priority.clone(),
            packing: config.packing.clone(),
        }
    }

    /// Replace the relevance scorer (e.g. one pinned to a reference time).
    pub fn with_scorer(mut self, scorer: RelevanceScorer) -> Self {
        self.scorer = scorer;
        self
    }

    /// Classify the query and select with the derived strategy.
    pub fn select_smart_context(
        &self,
        messages: &[Message],
        query: &str,
        model: &str,
    ) -> Result<Selection, TokenError> {
        let profile = classify::classify_query(query);
        let window = self.catalog.resolve(model).context_window;
        let strategy = derive_strategy(&profile, window, &self.strategy);
        debug!(model, kinds = ?profile.kinds(), max_tokens = strategy.max_tokens, "Derived selection strategy");
        self.run(messages, query, model, strategy, profile)
    }

    pub fn select_with_strategy(
        &self,
        messages: &[Message],
        query: &str,
        model: &str,
        strategy: &SelectionStrategy,
    ) -> Result<Selection, TokenError> {
        let window = self.catalog.resolve(model).context_window;
        let mut strategy = strategy.clone();
        strategy.max_tokens = strategy.max_tokens.min(window);
        self.run(messages, query, model, strategy, classify::classify_query(query))
    }

    fn run(
        &self,
        messages: &[Message],
        query: &str,
        model: &str,
        strategy: SelectionStrategy,
        profile: QueryProfile,
    ) -> Result<Selection, TokenError> {
        let relevance = self
            .scorer
            .score_relevance(messages, query, strategy.relevance_threshold);
        let mut stats = SelectionStats {
            original_count: messages.len(),
            max_tokens: strategy.max_tokens,
            ..Default::default()
        };

        let candidates = self.candidates(messages, &relevance, &strategy, &mut stats);
        let packed = self.pack(messages, &candidates, &strategy, model, &mut stats)?;

        let mut selected = packed;
        if strategy.preserve_order {
            selected.sort_by_key(|&i| (messages[i].timestamp, i));
        }

        let total_relevance = relevance.total_score();
        let coverage = if total_relevance > 0.0 {
            selected.iter().map(|&i| relevance.scores[i].score).sum::<f64>() / total_relevance
        } else if messages.is_empty() {
            0.0
        } else {
            selected.len() as f64 / messages.len() as f64
        };

        stats.selected_count = selected.len();
        stats.utilization = if strategy.max_tokens == 0 {
            0.0
        } else {
            stats.total_tokens as f64 / strategy.max_tokens as f64
        };

        debug!(
            model,
            original = stats.original_count,
            selected = stats.selected_count,
            tokens = stats.total_tokens,
            coverage,
            "Selected context"
        );

        Ok(Selection {
            messages: selected.iter().map(|&i| messages[i].clone()).collect(),
            strategy,
            profile,
            stats,
            coverage,
            relevance,
        })
    }

    /// Steps 1–5: indices of candidate messages.
    fn candidates(
        &self,
        messages: &[Message],
        relevance: &RelevanceResult,
        strategy: &SelectionStrategy,
        stats: &mut SelectionStats,
    ) -> Vec<usize> {
        let mut kept: Vec<usize> = relevance
            .scores
            .iter()
            .filter(|s| s.include)
            .map(|s| s.message_index)
            .collect();
        let mut present: HashSet<usize> = kept.iter().copied().collect();
        stats.relevant_count = kept.len();

        if strategy.include_dependencies && !kept.is_empty() {
            let graph = self.builder.build(messages);
            let index_of: HashMap<&str, usize> = messages
                .iter()
                .enumerate()
                .map(|(i, m)| (m.id.as_str(), i))
                .collect();
            for i in kept.clone() {
                for required in graph.required_messages(&messages[i].id) {
                    if let Some(&j) = index_of.get(required.as_str())
                        && present.insert(j)
                    {
                        kept.push(j);
                    }
                }
            }
        }
        stats.after_dependencies = kept.len();

        if strategy.include_recent {
            let start = messages.len().saturating_sub(strategy.recent_count);
            for i in start..messages.len() {
                if present.insert(i) {
                    kept.push(i);
                }
            }
        }
        stats.after_recent = kept.len();
        kept.sort_unstable();

        if strategy.balance_roles {
            kept = balance_roles(messages, kept, relevance);
        }
        stats.after_balance = kept.len();
        stats.user_after_balance = kept.iter().filter(|&&i| messages[i].role == Role::User).count();
        stats.assistant_after_balance = kept
            .iter()
            .filter(|&&i| messages[i].role == Role::Assistant)
            .count();

        if strategy.prioritize_code {
            let (code, prose): (Vec<usize>, Vec<usize>) = kept
                .into_iter()
                .partition(|&i| classify::has_code(&messages[i].content));
            kept = code.into_iter().chain(prose).collect();
        }

        kept
    }

    /// Step 6: greedy packing. Returns admitted indices in admission order.
    fn pack(
        &self,
        messages: &[Message],
        candidates: &[usize],
        strategy: &SelectionStrategy,
        model: &str,
        stats: &mut SelectionStats,
    ) -> Result<Vec<usize>, TokenError> {
        let priorities = priority_scores(messages, candidates, &self.priority);
        let mut ranked: Vec<(usize, f64)> = candidates.iter().copied().zip(priorities).collect();
        // Stable: equal priorities keep candidate order.
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

        let mut admitted = Vec::new();
        let mut rejected = Vec::new();
        let mut used = 0usize;
        let mut full = false;
        for (i, _) in ranked {
            let tokens = self.counter.count_message_tokens(&messages[i], model)?;
            // The first pass stops at the first message that does not fit.
            if !full && used + tokens <= strategy.max_tokens {
                used += tokens;
                admitted.push(i);
            } else {
                full = true;
                rejected.push((i, tokens));
            }
        }
        stats.first_pass_admitted = admitted.len();

        let admit_floor = candidates.len() as f64 * self.packing.second_pass_admit_ratio;
        let utilization_floor = strategy.max_tokens as f64 * self.packing.second_pass_utilization;
        if (admitted.len() as f64) < admit_floor && (used as f64) < utilization_floor {
            rejected.sort_by_key(|&(i, tokens)| (tokens, i));
            for (i, tokens) in rejected {
                if used + tokens <= strategy.max_tokens {
                    used += tokens;
                    admitted.push(i);
                    stats.second_pass_admitted += 1;
                }
            }
        }

        stats.total_tokens = used;
        Ok(admitted)
    }
}

/// Cap the larger of the user and assistant groups at the smaller
/// group's size, keeping its most relevant members. Other roles pass
/// through. Skipped when either group is empty.
fn balance_roles(messages: &[Message], kept: Vec<usize>, relevance: &RelevanceResult) -> Vec<usize> {
    let users: Vec<usize> = kept.iter().copied().filter(|&i| messages[i].role == Role::User).collect();
    let assistants: Vec<usize> = kept
        .iter()
        .copied()
        .filter(|&i| messages[i].role == Role::Assistant)
        .collect();
    if users.is_empty() || assistants.is_empty() || users.len() == assistants.len() {
        return kept;
    }

    let (mut larger, cap) = if users.len() > assistants.len() {
        (users, assistants.len())
    } else {
        (assistants, users.len())
    };
    larger.sort_by(|&a, &b| {
        relevance.scores[b]
            .score
            .total_cmp(&relevance.scores[a].score)
            .then(b.cmp(&a))
    });
    let dropped: HashSet<usize> = larger.into_iter().skip(cap).collect();
    kept.into_iter().filter(|i| !dropped.contains(i)).collect()
}

/// 0–100 packing priority per candidate, in candidate order.
fn priority_scores(messages: &[Message], candidates: &[usize], weights: &PriorityWeights) -> Vec<f64> {
    if candidates.is_empty() {
        return Vec::new();
    }

    let timestamps = candidates.iter().map(|&i| messages[i].timestamp);
    let (oldest, newest) = (timestamps.clone().min().unwrap_or(0), timestamps.max().unwrap_or(0));
    let (first, last) = (
        candidates.iter().copied().min().unwrap_or(0),
        candidates.iter().copied().max().unwrap_or(0),
    );
    let avg_len = candidates
        .iter()
        .map(|&i| messages[i].content.chars().count())
        .sum::<usize>() as f64
        / candidates.len() as f64;

    candidates
        .iter()
        .map(|&i| {
            let message = &messages[i];
            let content = &message.content;

            // Position stands in for time when timestamps do not differ.
            let freshness = if newest > oldest {
                1.0 - (newest - message.timestamp) as f64 / (newest - oldest) as f64
            } else if last > first {
                1.0 - (last - i) as f64 / (last - first) as f64
            } else {
                1.0
            };
            let recency = weights.recency_points * freshness;

            let mut bonus = 0.0;
            if classify::has_code(content) {
                bonus += weights.code_bonus;
            }
            if classify::has_error_terms(content) {
                bonus += weights.error_bonus;
            }
            if classify::is_question(content) {
                bonus += weights.question_bonus;
            }
            if classify::has_decision_cue(content) {
                bonus += weights.decision_bonus;
            }
            let content_type = bonus.min(weights.content_points);

            let role = weights.role_points
                * match message.role {
                    Role::User => 1.0,
                    Role::Assistant => 0.8,
                    Role::System => 0.6,
                    Role::Tool => 0.4,
                };

            let len = content.chars().count() as f64;
            let length = if avg_len > 0.0 {
                weights.length_points * (1.0 - (len - avg_len).abs() / len.max(avg_len))
            } else {
                weights.length_points
            };

            let references = classify::reference_cue_count(content) as f64;
            let reference = weights.reference_points * (references * 0.5).min(1.0);

            (recency + content_type + role + length + reference).clamp(0.0, weights.max_score())
        })
        .collect()
}
