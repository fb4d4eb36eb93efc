//! Message dependency graph.
//!
//! Edges point from a message to an earlier message it depends on.
//! Strong edges (above the cluster threshold) are grouped into connected
//! components that become [`MessageCluster`]s.

use crate::classify;
use ctxkit_core::message::{Message, Role};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use tracing::{debug, warn};

/// Edges at or below this strength do not join clusters.
pub const DEFAULT_CLUSTER_THRESHOLD: f64 = 0.5;

const REFERENCE_STRENGTH: f64 = 0.8;
const ANSWER_STRENGTH: f64 = 0.9;
const CUED_ANSWER_STRENGTH: f64 = 1.0;
const CONTINUATION_STRENGTH: f64 = 0.7;

// ── Types ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyKind {
    Reference,
    Answer,
    CodeDependency,
    EntityDependency,
    Continuation,
}

impl DependencyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reference => "reference",
            Self::Answer => "answer",
            Self::CodeDependency => "code_dependency",
            Self::EntityDependency => "entity_dependency",
            Self::Continuation => "continuation",
        }
    }
}

impl std::fmt::Display for DependencyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// `from_id` depends on `to_id`; `to_id` always precedes it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dependency {
    pub from_id: String,
    pub to_id: String,
    pub kind: DependencyKind,
    pub strength: f64,
    pub reason: String,
}

/// A connected group of strongly linked messages.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageCluster {
    pub id: String,
    /// Member ids in conversation order.
    pub message_ids: Vec<String>,
    pub topic: String,
    /// Share of the conversation in this cluster.
    pub strength: f64,
}

/// Messages ordered so dependencies precede their dependents.
#[derive(Debug, Clone)]
pub struct DependencyOrder {
    pub messages: Vec<Message>,
    /// Ids caught in a cycle, appended to `messages` in conversation order.
    pub unresolved: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DependencyGraph {
    pub dependencies: Vec<Dependency>,
    /// Entity name to the ids of messages mentioning it.
    pub entities: BTreeMap<String, Vec<String>>,
    pub clusters: Vec<MessageCluster>,
}

impl DependencyGraph {
    /// Messages that depend on `message_id`.
    pub fn dependent_messages(&self, message_id: &str) -> Vec<String> {
        unique(
            self.dependencies
                .iter()
                .filter(|d| d.to_id == message_id)
                .map(|d| d.from_id.clone()),
        )
    }

    /// Messages `message_id` depends on.
    pub fn required_messages(&self, message_id: &str) -> Vec<String> {
        unique(
            self.dependencies
                .iter()
                .filter(|d| d.from_id == message_id)
                .map(|d| d.to_id.clone()),
        )
    }

    /// Kahn topological sort: every message follows the messages it
    /// depends on. Independent messages keep their input order.
    ///
    /// Messages that never become free (a cycle, only possible with
    /// hand-built edges) are appended in input order and reported in
    /// [`DependencyOrder::unresolved`].
    pub fn sort_by_dependencies(&self, messages: &[Message]) -> DependencyOrder {
        let mut index_of: HashMap<&str, usize> = HashMap::new();
        for (i, m) in messages.iter().enumerate() {
            index_of.entry(m.id.as_str()).or_insert(i);
        }

        // In-degree counts unmet dependencies; adjacency runs dependency -> dependents.
        let mut in_degree = vec![0usize; messages.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); messages.len()];
        for dep in &self.dependencies {
            let (Some(&from), Some(&to)) = (
                index_of.get(dep.from_id.as_str()),
                index_of.get(dep.to_id.as_str()),
            ) else {
                continue;
            };
            in_degree[from] += 1;
            dependents[to].push(from);
        }

        let mut queue: VecDeque<usize> = (0..messages.len()).filter(|&i| in_degree[i] == 0).collect();
        let mut placed = vec![false; messages.len()];
        let mut ordered = Vec::with_capacity(messages.len());

        while let Some(node) = queue.pop_front() {
            placed[node] = true;
            ordered.push(messages[node].clone());
            for &next in &dependents[node] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    queue.push_back(next);
                }
            }
        }

        let mut unresolved = Vec::new();
        for (i, message) in messages.iter().enumerate() {
            if !placed[i] {
                unresolved.push(message.id.clone());
                ordered.push(message.clone());
            }
        }
        if !unresolved.is_empty() {
            warn!(count = unresolved.len(), "Dependency cycle; appending in conversation order");
        }

        DependencyOrder {
            messages: ordered,
            unresolved,
        }
    }
}

fn unique(ids: impl Iterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.filter(|id| seen.insert(id.clone())).collect()
}

// ── Builder ───────────────────────────────────────────────────────────────

/// Per-message features computed once per build.
struct Features {
    identifiers: BTreeSet<String>,
    entities: Vec<String>,
    is_question: bool,
    has_answer_cue: bool,
    has_back_reference: bool,
    starts_with_continuation: bool,
}

impl Features {
    fn of(message: &Message) -> Self {
        let content = &message.content;
        Self {
            identifiers: classify::extract_code_identifiers(content),
            entities: classify::extract_entities(content),
            is_question: classify::is_question(content),
            has_answer_cue: classify::has_answer_cue(content),
            has_back_reference: classify::has_back_reference(content),
            starts_with_continuation: classify::starts_with_continuation(content),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DependencyGraphBuilder {
    cluster_threshold: f64,
}

impl DependencyGraphBuilder {
    pub fn new() -> Self {
        Self {
            cluster_threshold: DEFAULT_CLUSTER_THRESHOLD,
        }
    }

    pub fn with_cluster_threshold(mut self, threshold: f64) -> Self {
        self.cluster_threshold = threshold;
        self
    }

    pub fn build(&self, messages: &[Message]) -> DependencyGraph {
        let features: Vec<Features> = messages.iter().map(Features::of).collect();

        let mut dependencies = Vec::new();
        for i in 1..messages.len() {
            for j in 0..i {
                let pair = Pair {
                    current: &messages[i],
                    previous: &messages[j],
                    cur: &features[i],
                    prev: &features[j],
                };
                if pair.current.id == pair.previous.id {
                    continue;
                }
                dependencies.extend(pair.reference());
                dependencies.extend(pair.answer());
                dependencies.extend(pair.code_dependency());
                dependencies.extend(pair.entity_dependency());
                dependencies.extend(pair.continuation());
            }
        }

        let mut entities: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (message, f) in messages.iter().zip(&features) {
            for entity in &f.entities {
                let ids = entities.entry(entity.clone()).or_default();
                if !ids.contains(&message.id) {
                    ids.push(message.id.clone());
                }
            }
        }

        let clusters = self.cluster(messages, &dependencies);
        debug!(
            messages = messages.len(),
            dependencies = dependencies.len(),
            clusters = clusters.len(),
            "Built dependency graph"
        );

        DependencyGraph {
            dependencies,
            entities,
            clusters,
        }
    }

    /// Connected components over strong edges, singletons dropped.
    fn cluster(&self, messages: &[Message], dependencies: &[Dependency]) -> Vec<MessageCluster> {
        let index_of: HashMap<&str, usize> = messages
            .iter()
            .enumerate()
            .map(|(i, m)| (m.id.as_str(), i))
            .collect();

        let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); messages.len()];
        for dep in dependencies.iter().filter(|d| d.strength > self.cluster_threshold) {
            if let (Some(&a), Some(&b)) = (
                index_of.get(dep.from_id.as_str()),
                index_of.get(dep.to_id.as_str()),
            ) {
                adjacency[a].push(b);
                adjacency[b].push(a);
            }
        }

        let mut visited = vec![false; messages.len()];
        let mut clusters = Vec::new();
        for start in 0..messages.len() {
            if visited[start] {
                continue;
            }
            let mut component = Vec::new();
            let mut stack = vec![start];
            visited[start] = true;
            while let Some(node) = stack.pop() {
                component.push(node);
                for &next in &adjacency[node] {
                    if !visited[next] {
                        visited[next] = true;
                        stack.push(next);
                    }
                }
            }
            if component.len() < 2 {
                continue;
            }
            component.sort_unstable();

            clusters.push(MessageCluster {
                id: format!("cluster-{}", clusters.len() + 1),
                topic: dominant_topic(component.iter().map(|&i| messages[i].content.as_str())),
                strength: component.len() as f64 / messages.len() as f64,
                message_ids: component.iter().map(|&i| messages[i].id.clone()).collect(),
            });
        }
        clusters
    }
}

impl Default for DependencyGraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Most frequent member topic; ties go to the topic seen first.
fn dominant_topic<'a>(contents: impl Iterator<Item = &'a str>) -> String {
    let mut counts: Vec<(&'static str, usize)> = Vec::new();
    for topic in contents.filter_map(classify::detect_topic) {
        match counts.iter_mut().find(|(t, _)| *t == topic) {
            Some((_, n)) => *n += 1,
            None => counts.push((topic, 1)),
        }
    }
    let mut best: Option<(&str, usize)> = None;
    for (topic, n) in counts {
        if best.is_none_or(|(_, top)| n > top) {
            best = Some((topic, n));
        }
    }
    best.map_or(classify::DEFAULT_TOPIC, |(topic, _)| topic)
        .to_string()
}

// ── Detectors ─────────────────────────────────────────────────────────────

struct Pair<'a> {
    current: &'a Message,
    previous: &'a Message,
    cur: &'a Features,
    prev: &'a Features,
}

impl Pair<'_> {
    fn edge(&self, kind: DependencyKind, strength: f64, reason: String) -> Dependency {
        Dependency {
            from_id: self.current.id.clone(),
            to_id: self.previous.id.clone(),
            kind,
            strength,
            reason,
        }
    }

    fn reference(&self) -> Option<Dependency> {
        self.cur.has_back_reference.then(|| {
            self.edge(
                DependencyKind::Reference,
                REFERENCE_STRENGTH,
                "refers back to earlier discussion".into(),
            )
        })
    }

    fn answer(&self) -> Option<Dependency> {
        if self.previous.role != Role::User
            || self.current.role != Role::Assistant
            || !self.prev.is_question
        {
            return None;
        }
        let strength = if self.cur.has_answer_cue {
            CUED_ANSWER_STRENGTH
        } else {
            ANSWER_STRENGTH
        };
        Some(self.edge(DependencyKind::Answer, strength, "answers question".into()))
    }

    fn code_dependency(&self) -> Option<Dependency> {
        let shared: Vec<&String> = self.cur.identifiers.intersection(&self.prev.identifiers).collect();
        if shared.is_empty() {
            return None;
        }
        let strength = (shared.len() as f64 / self.cur.identifiers.len() as f64).min(1.0);
        Some(self.edge(
            DependencyKind::CodeDependency,
            strength,
            format!("shares code identifiers: {}", join(&shared)),
        ))
    }

    fn entity_dependency(&self) -> Option<Dependency> {
        let shared: Vec<&String> = self
            .cur
            .entities
            .iter()
            .filter(|e| self.prev.entities.contains(e))
            .collect();
        if shared.is_empty() {
            return None;
        }
        let strength = (shared.len() as f64 / self.cur.entities.len() as f64).min(1.0);
        Some(self.edge(
            DependencyKind::EntityDependency,
            strength,
            format!("shares entities: {}", join(&shared)),
        ))
    }

    fn continuation(&self) -> Option<Dependency> {
        (self.cur.starts_with_continuation && self.current.role == self.previous.role).then(|| {
            self.edge(
                DependencyKind::Continuation,
                CONTINUATION_STRENGTH,
                "continues previous message".into(),
            )
        })
    }
}

fn join(items: &[&String]) -> String {
    items.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")
}
