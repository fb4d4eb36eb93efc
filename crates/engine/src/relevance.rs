//! Lexical relevance scoring.
//!
//! Each message is scored against a query with six factors normalized to
//! `[0, 1]` and combined with the weights from [`ScoringWeights`]. Nothing
//! here is semantic; all matching is on words and fixed cue lists.

use crate::classify;
use chrono::Utc;
use ctxkit_config::ScoringWeights;
use ctxkit_core::message::{Message, Role};
use serde::Serialize;
use std::collections::HashSet;

const HOUR: i64 = 3_600;
const DAY: i64 = 24 * HOUR;
const WEEK: i64 = 7 * DAY;

// ── Types ─────────────────────────────────────────────────────────────────

/// Per-factor breakdown of a relevance score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RelevanceFactors {
    pub content_similarity: f64,
    pub recency: f64,
    pub role: f64,
    pub length: f64,
    pub code_presence: f64,
    pub qa_pattern: f64,
}

impl RelevanceFactors {
    /// Weighted sum of the factors.
    pub fn combine(&self, weights: &ScoringWeights) -> f64 {
        self.content_similarity * weights.content_similarity
            + self.recency * weights.recency
            + self.role * weights.role
            + self.length * weights.length
            + self.code_presence * weights.code_presence
            + self.qa_pattern * weights.qa_pattern
    }
}

/// Relevance of one message to a query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelevanceScore {
    /// Position in the scored message slice.
    pub message_index: usize,
    pub score: f64,
    pub factors: RelevanceFactors,
    pub reasoning: String,
    /// Whether the score met the threshold.
    pub include: bool,
}

/// Scores for a whole conversation plus the messages that passed.
#[derive(Debug, Clone, Serialize)]
pub struct RelevanceResult {
    /// One entry per input message, in input order.
    pub scores: Vec<RelevanceScore>,
    /// Messages at or above the threshold, in conversation order; after
    /// a top-N filter, in the order that filter returned.
    pub filtered: Vec<Message>,
    pub original_count: usize,
    pub filtered_count: usize,
    pub query: String,
    pub threshold: f64,
}

impl RelevanceResult {
    /// Sum of all scores.
    pub fn total_score(&self) -> f64 {
        self.scores.iter().map(|s| s.score).sum()
    }
}

// ── Scorer ────────────────────────────────────────────────────────────────

/// Scores messages against a query.
#[derive(Debug, Clone)]
pub struct RelevanceScorer {
    weights: ScoringWeights,
    /// Reference time for the recency buckets; `None` uses the wall clock.
    now: Option<i64>,
}

impl RelevanceScorer {
    pub fn new(weights: ScoringWeights) -> Self {
        Self { weights, now: None }
    }

    /// Pin the reference time used for age buckets.
    pub fn at_time(mut self, now: i64) -> Self {
        self.now = Some(now);
        self
    }

    pub fn weights(&self) -> &ScoringWeights {
        &self.weights
    }

    /// Score every message. Messages scoring at or above `threshold` are
    /// returned in `filtered`, in conversation order.
    pub fn score_relevance(
        &self,
        messages: &[Message],
        query: &str,
        threshold: f64,
    ) -> RelevanceResult {
        let context = QueryContext::new(query);
        let now = self.now.unwrap_or_else(|| Utc::now().timestamp());
        let total = messages.len();

        let scores: Vec<RelevanceScore> = messages
            .iter()
            .enumerate()
            .map(|(index, message)| {
                let factors = RelevanceFactors {
                    content_similarity: content_similarity(&message.content, &context),
                    recency: recency(index, total, message.timestamp, now),
                    role: role_score(message.role),
                    length: length_score(&message.content),
                    code_presence: code_presence(&message.content),
                    qa_pattern: qa_pattern(message),
                };
                let score = factors.combine(&self.weights).clamp(0.0, 1.0);
                RelevanceScore {
                    message_index: index,
                    score,
                    reasoning: reasoning(&factors, score),
                    factors,
                    include: score >= threshold,
                }
            })
            .collect();

        let filtered: Vec<Message> = scores
            .iter()
            .filter(|s| s.include)
            .map(|s| messages[s.message_index].clone())
            .collect();

        RelevanceResult {
            original_count: total,
            filtered_count: filtered.len(),
            scores,
            filtered,
            query: query.to_string(),
            threshold,
        }
    }

    /// The `max_messages` highest-scoring messages at or above `threshold`,
    /// highest score first. Equal scores keep conversation order.
    pub fn filter_by_relevance(
        &self,
        messages: &[Message],
        query: &str,
        threshold: f64,
        max_messages: usize,
    ) -> (Vec<Message>, RelevanceResult) {
        self.top_n(messages, query, threshold, max_messages, false)
    }

    /// Same selection as [`filter_by_relevance`](Self::filter_by_relevance),
    /// returned in conversation order.
    pub fn filter_by_relevance_in_order(
        &self,
        messages: &[Message],
        query: &str,
        threshold: f64,
        max_messages: usize,
    ) -> (Vec<Message>, RelevanceResult) {
        self.top_n(messages, query, threshold, max_messages, true)
    }

    fn top_n(
        &self,
        messages: &[Message],
        query: &str,
        threshold: f64,
        max_messages: usize,
        conversation_order: bool,
    ) -> (Vec<Message>, RelevanceResult) {
        let mut result = self.score_relevance(messages, query, threshold);

        let mut ranked: Vec<&RelevanceScore> = result.scores.iter().filter(|s| s.include).collect();
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
        ranked.truncate(max_messages);

        let mut kept: Vec<usize> = ranked.iter().map(|s| s.message_index).collect();
        if conversation_order {
            kept.sort_unstable();
        }

        let filtered: Vec<Message> = kept.iter().map(|&i| messages[i].clone()).collect();
        result.filtered = filtered.clone();
        result.filtered_count = filtered.len();
        (filtered, result)
    }
}

impl Default for RelevanceScorer {
    fn default() -> Self {
        Self::new(ScoringWeights::default())
    }
}

// ── Factors ───────────────────────────────────────────────────────────────

struct QueryContext {
    normalized: String,
    terms: Vec<String>,
}

impl QueryContext {
    fn new(query: &str) -> Self {
        Self {
            normalized: query.trim().to_lowercase(),
            terms: classify::extract_query_terms(query),
        }
    }
}

fn content_similarity(content: &str, query: &QueryContext) -> f64 {
    if query.normalized.is_empty() {
        return 0.0;
    }
    let lower = content.to_lowercase();
    if lower.contains(&query.normalized) {
        return 1.0;
    }
    if query.terms.is_empty() {
        return 0.0;
    }

    let words: HashSet<String> = classify::words(&lower).into_iter().collect();
    let (mut exact, mut partial) = (0usize, 0usize);
    for term in &query.terms {
        if words.contains(term) {
            exact += 1;
        } else if lower.contains(term.as_str()) {
            partial += 1;
        }
    }

    let n = query.terms.len() as f64;
    (exact as f64 / n + 0.3 * partial as f64 / n).min(1.0)
}

fn recency(index: usize, total: usize, timestamp: i64, now: i64) -> f64 {
    let position = if total == 0 {
        0.0
    } else {
        (index + 1) as f64 / total as f64
    };

    let age_bucket = if timestamp <= 0 {
        0.5
    } else {
        match now.saturating_sub(timestamp) {
            age if age < HOUR => 1.0,
            age if age < DAY => 0.8,
            age if age < WEEK => 0.6,
            _ => 0.4,
        }
    };

    (position + age_bucket) / 2.0
}

fn role_score(role: Role) -> f64 {
    match role {
        Role::User => 0.9,
        Role::Assistant => 0.8,
        Role::System => 0.6,
        Role::Tool => 0.5,
    }
}

fn length_score(content: &str) -> f64 {
    let len = content.chars().count() as f64;
    if len < 50.0 {
        0.3
    } else if len < 200.0 {
        0.3 + 0.7 * (len - 50.0) / 150.0
    } else if len <= 1000.0 {
        1.0
    } else {
        (1.0 - (len - 1000.0) / 4000.0).max(0.4)
    }
}

fn code_presence(content: &str) -> f64 {
    match classify::code_indicator_count(content) {
        0 => 0.3,
        1..=2 => 0.6,
        3..=4 => 0.9,
        _ => 1.0,
    }
}

fn qa_pattern(message: &Message) -> f64 {
    let word_count = classify::words(&message.content).len().max(1) as f64;
    let density = |cues: usize| (cues as f64 / word_count * 10.0).min(1.0);
    match message.role {
        Role::User => density(classify::question_cue_count(&message.content)),
        Role::Assistant => density(classify::answer_cue_count(&message.content)) * 0.8,
        _ => 0.0,
    }
}

fn reasoning(factors: &RelevanceFactors, score: f64) -> String {
    let mut reasons = Vec::new();
    if factors.content_similarity > 0.7 {
        reasons.push("high content similarity");
    } else if factors.content_similarity > 0.3 {
        reasons.push("partial content match");
    }
    if factors.recency > 0.8 {
        reasons.push("recent message");
    }
    if factors.code_presence > 0.8 {
        reasons.push("contains code");
    }
    if factors.qa_pattern > 0.5 {
        reasons.push("question/answer exchange");
    }

    if !reasons.is_empty() {
        return reasons.join(", ");
    }
    match score {
        s if s >= 0.7 => "strong overall relevance".into(),
        s if s >= 0.4 => "moderate relevance".into(),
        _ => "low relevance".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000;

    fn scorer() -> RelevanceScorer {
        RelevanceScorer::default().at_time(NOW)
    }

    #[test]
    fn empty_conversation_yields_empty_result() {
        let result = scorer().score_relevance(&[], "anything", 0.3);
        assert_eq!(result.original_count, 0);
        assert_eq!(result.filtered_count, 0);
        assert!(result.scores.is_empty());
    }

    #[test]
    fn empty_query_has_zero_similarity() {
        let messages = vec![Message::user("How does the LRU cache evict entries?").at(NOW)];
        let result = scorer().score_relevance(&messages, "", 0.0);
        assert_eq!(result.scores[0].factors.content_similarity, 0.0);
    }

    #[test]
    fn verbatim_query_has_full_similarity() {
        let text = "Refactor the token counter";
        let messages = vec![Message::assistant(text).at(NOW)];
        let result = scorer().score_relevance(&messages, text, 0.0);
        assert_eq!(result.scores[0].factors.content_similarity, 1.0);
    }

    #[test]
    fn partial_terms_weigh_less_than_exact() {
        let query = QueryContext::new("cache eviction");
        let exact = content_similarity("the cache handles eviction quickly", &query);
        let partial = content_similarity("caches and evictions", &query);
        assert_eq!(exact, 1.0);
        assert!((partial - 0.3).abs() < 1e-9);
    }

    #[test]
    fn recency_buckets() {
        assert_eq!(recency(0, 1, NOW - 10, NOW), 1.0);
        assert_eq!(recency(0, 2, NOW - 2 * HOUR, NOW), (0.5 + 0.8) / 2.0);
        assert_eq!(recency(1, 2, 0, NOW), (1.0 + 0.5) / 2.0);
        assert_eq!(recency(0, 1, NOW - 30 * DAY, NOW), (1.0 + 0.4) / 2.0);
    }

    #[test]
    fn length_curve_peaks_in_middle() {
        assert_eq!(length_score("short"), 0.3);
        assert_eq!(length_score(&"x".repeat(500)), 1.0);
        assert!(length_score(&"x".repeat(120)) > 0.3);
        assert!(length_score(&"x".repeat(3000)) < 1.0);
        assert_eq!(length_score(&"x".repeat(100_000)), 0.4);
    }

    #[test]
    fn code_buckets() {
        assert_eq!(code_presence("no code here"), 0.3);
        assert_eq!(code_presence("x => y"), 0.6);
        assert_eq!(
            code_presence("```\nfn main() { let x = 1; return x; }\n```"),
            1.0
        );
    }

    #[test]
    fn qa_pattern_depends_on_role() {
        let question = Message::user("Why?");
        let answer = Message::assistant("Because.");
        assert_eq!(qa_pattern(&question), 1.0);
        assert!((qa_pattern(&answer) - 0.8).abs() < 1e-9);
        assert_eq!(qa_pattern(&Message::system("Why?")), 0.0);
    }

    #[test]
    fn score_is_convex_combination() {
        let messages = vec![
            Message::user("How do I configure the cache TTL?").at(NOW - 60),
            Message::assistant("Set ttl_secs in the [cache] section.").at(NOW - 30),
        ];
        let result = scorer().score_relevance(&messages, "cache ttl", 0.0);
        for s in &result.scores {
            let expected = s.factors.combine(&ScoringWeights::default());
            assert!((s.score - expected).abs() < 1e-9);
            assert!((0.0..=1.0).contains(&s.score));
            assert!(!s.reasoning.is_empty());
        }
    }

    #[test]
    fn filter_returns_top_n_highest_first() {
        let messages = vec![
            Message::user("cache eviction policy details").at(NOW),
            Message::assistant("unrelated weather chat").at(NOW),
            Message::user("more about cache eviction").at(NOW),
            Message::assistant("cache eviction uses LRU").at(NOW),
        ];
        let (kept, result) = scorer().filter_by_relevance(&messages, "cache eviction", 0.0, 2);
        assert_eq!(kept.len(), 2);
        assert_eq!(result.filtered_count, 2);
        assert_eq!(result.filtered, kept);
        let scores: Vec<f64> = kept
            .iter()
            .map(|m| {
                let i = messages.iter().position(|o| o.id == m.id).unwrap();
                result.scores[i].score
            })
            .collect();
        assert!(scores.windows(2).all(|w| w[0] >= w[1]));
        assert!(!kept.iter().any(|m| m.content.contains("weather")));
    }

    #[test]
    fn exact_match_ranks_ahead_of_earlier_partial_match() {
        let messages = vec![
            Message::user("weather chat with cache").at(NOW),
            Message::user("cache eviction").at(NOW),
        ];
        let (kept, _) = scorer().filter_by_relevance(&messages, "cache eviction", 0.0, 2);
        let contents: Vec<&str> = kept.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["cache eviction", "weather chat with cache"]);

        let (in_order, result) =
            scorer().filter_by_relevance_in_order(&messages, "cache eviction", 0.0, 2);
        let contents: Vec<&str> = in_order.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["weather chat with cache", "cache eviction"]);
        assert_eq!(result.filtered, in_order);
    }

    #[test]
    fn threshold_excludes_low_scores() {
        let messages = vec![Message::tool("ok").at(NOW - 90 * DAY)];
        let result = scorer().score_relevance(&messages, "database migration", 0.9);
        assert_eq!(result.filtered_count, 0);
        assert!(!result.scores[0].include);
    }
}
