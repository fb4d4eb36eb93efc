//! Lexical classification heuristics.
//!
//! Every keyword table and regex family the engine relies on lives here
//! so the scorer, graph builder, selector and summarizer all agree on
//! what counts as code, a question, an entity or a topic. All functions
//! are pure.

use regex::Regex;
use std::collections::{BTreeSet, HashSet};
use std::sync::LazyLock;

// ── Word lists ────────────────────────────────────────────────────────────

/// Words ignored when extracting query terms and entities.
pub const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "are", "but", "not", "you", "all", "any", "can", "had", "her", "was",
    "one", "our", "out", "has", "have", "him", "his", "how", "its", "may", "new", "now", "old",
    "see", "two", "way", "who", "did", "get", "got", "let", "put", "say", "she", "too", "use",
    "that", "this", "with", "from", "they", "them", "then", "than", "there", "their", "what",
    "when", "where", "which", "while", "will", "would", "could", "should", "been", "being",
    "were", "does", "into", "about", "also", "just", "some", "very", "here", "your", "yours",
    "these", "those", "because", "after", "before", "each", "other", "such", "only", "same",
    "over", "under", "again", "more", "most", "much", "many", "why", "like", "make", "made",
];

const WH_WORDS: &[&str] = &["what", "how", "why", "when", "where", "which", "who"];

const ANSWER_CUES: &[&str] = &[
    "because",
    "therefore",
    "the answer",
    "you can",
    "you should",
    "to do this",
    "here's",
    "here is",
    "the solution",
    "this means",
    "the reason",
    "in short",
    "try this",
];

const BACK_REFERENCES: &[&str] = &[
    "as mentioned",
    "as discussed",
    "as i said",
    "as you said",
    "as noted",
    "mentioned earlier",
    "mentioned before",
    "mentioned above",
    "you mentioned",
    "i mentioned",
    "the previous",
    "previously",
    "earlier",
    "above",
    "that code",
    "this code",
    "the code above",
    "like before",
    "referring to",
    "going back to",
];

const CONTINUATIONS: &[&str] = &[
    "also",
    "however",
    "next",
    "additionally",
    "furthermore",
    "moreover",
    "then",
    "and",
    "but",
    "finally",
    "another",
    "besides",
    "plus",
];

/// Tokens whose presence suggests source code.
pub const CODE_INDICATORS: &[&str] = &[
    "```", "fn ", "func ", "def ", "function ", "class ", "struct ", "impl ", "import ",
    "return ", "const ", "let ", "var ", "pub ", "=>", "->", "();", "{", "}", "==", "!=", "&&",
    "||", "#include", "package ", "interface ",
];

const ERROR_TERMS: &[&str] = &[
    "error",
    "exception",
    "panic",
    "failed",
    "failure",
    "traceback",
    "stack trace",
    "segfault",
    "crash",
    "bug",
];

const DECISION_CUES: &[&str] = &[
    "decided",
    "decision",
    "we will",
    "let's go with",
    "resolved",
    "fixed",
    "solution",
    "works now",
    "the fix",
    "conclusion",
    "agreed",
];

const CODE_QUERY_KEYWORDS: &[&str] = &[
    "code",
    "function",
    "method",
    "class",
    "implement",
    "variable",
    "api",
    "syntax",
    "compile",
    "refactor",
    "struct",
    "module",
];

const DEBUG_QUERY_KEYWORDS: &[&str] = &[
    "error",
    "bug",
    "debug",
    "fix",
    "issue",
    "crash",
    "exception",
    "fail",
    "broken",
    "not working",
    "stack trace",
    "panic",
];

const SUMMARY_QUERY_KEYWORDS: &[&str] = &[
    "summar",
    "overview",
    "recap",
    "tl;dr",
    "tldr",
    "what did we",
    "brief",
];

const WHOLE_CONVERSATION_KEYWORDS: &[&str] = &[
    "entire conversation",
    "whole conversation",
    "full conversation",
    "everything we",
    "all messages",
    "full context",
    "from the beginning",
    "all of our",
];

/// Ordered topic table: the first keyword found in a message names its topic.
const TOPICS: &[(&str, &str)] = &[
    ("error", "Debugging"),
    ("bug", "Debugging"),
    ("exception", "Debugging"),
    ("crash", "Debugging"),
    ("test", "Testing"),
    ("deploy", "Deployment"),
    ("docker", "Deployment"),
    ("database", "Database"),
    ("sql", "Database"),
    ("api", "API Design"),
    ("endpoint", "API Design"),
    ("performance", "Performance"),
    ("optimiz", "Performance"),
    ("security", "Security"),
    ("auth", "Security"),
    ("config", "Configuration"),
    ("refactor", "Refactoring"),
    ("function", "Implementation"),
    ("implement", "Implementation"),
    ("code", "Implementation"),
];

/// Topic used when no member of a cluster matches the topic table.
pub const DEFAULT_TOPIC: &str = "General Discussion";

/// Call-like names that are language keywords rather than identifiers.
const CALL_KEYWORDS: &[&str] = &[
    "if", "for", "while", "switch", "match", "return", "catch", "fn", "func", "function", "def",
    "elif", "and", "or", "not", "in", "with", "sizeof", "typeof",
];

// ── Regex families ────────────────────────────────────────────────────────

static CALL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)*)\(").expect("valid regex")
});

static IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:import|from|require\(?)\s*["']([^"']+)["']"#).expect("valid regex")
});

static FUNCTION_DEF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:fn|func|function|def)\s+([A-Za-z_][A-Za-z0-9_]*)").expect("valid regex")
});

static TYPE_DEF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:class|struct|enum|trait|interface|type)\s+([A-Z][A-Za-z0-9_]*)")
        .expect("valid regex")
});

static VARIABLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:let|var|const)\s+(?:mut\s+)?([A-Za-z_][A-Za-z0-9_]*)").expect("valid regex")
});

static FILE_PATH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[\w./\-]+\.(rs|ts|js|py|go|java|toml|json|yaml|yml|md|sql|sh|css|html|tsx|jsx|c|h|cpp)\b")
        .expect("valid regex")
});

static BACKTICK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"`([^`\s]{3,})`").expect("valid regex"));

static CAMEL_CASE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([A-Z][a-z]+(?:[A-Z][a-z0-9]+)+)\b").expect("valid regex"));

static SNAKE_CASE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([a-z][a-z0-9]*(?:_[a-z0-9]+)+)\b").expect("valid regex"));

// ── Word helpers ──────────────────────────────────────────────────────────

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Lowercase word tokens with non-word characters stripped.
pub fn words(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|token| {
            token
                .chars()
                .filter(|c| is_word_char(*c))
                .flat_map(char::to_lowercase)
                .collect::<String>()
        })
        .filter(|w| !w.is_empty())
        .collect()
}

pub fn is_stop_word(word: &str) -> bool {
    STOP_WORDS.contains(&word)
}

/// Significant query terms: lowercase, stripped, longer than two
/// characters and not a stop word. Order-preserving, deduplicated.
pub fn extract_query_terms(query: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    words(query)
        .into_iter()
        .filter(|w| w.chars().count() > 2 && !is_stop_word(w))
        .filter(|w| seen.insert(w.clone()))
        .collect()
}

/// Whether `needle` occurs in `haystack` bounded by non-word characters
/// on both sides. Both arguments are expected to be lowercase.
pub fn contains_word(haystack: &str, needle: &str) -> bool {
    count_word(haystack, needle) > 0
}

fn count_word(haystack: &str, needle: &str) -> usize {
    if needle.is_empty() {
        return 0;
    }
    haystack
        .match_indices(needle)
        .filter(|(start, _)| {
            let before = haystack[..*start].chars().next_back();
            let after = haystack[start + needle.len()..].chars().next();
            !before.is_some_and(is_word_char) && !after.is_some_and(is_word_char)
        })
        .count()
}

/// Whether `needle` starts a word somewhere in `haystack`.
fn contains_word_prefix(haystack: &str, needle: &str) -> bool {
    haystack.match_indices(needle).any(|(start, _)| {
        !haystack[..start]
            .chars()
            .next_back()
            .is_some_and(is_word_char)
    })
}

fn count_phrases(lower: &str, phrases: &[&str]) -> usize {
    phrases.iter().map(|p| count_word(lower, p)).sum()
}

fn any_phrase(lower: &str, phrases: &[&str]) -> bool {
    phrases.iter().any(|p| contains_word(lower, p))
}

// ── Message cues ──────────────────────────────────────────────────────────

/// Number of distinct code indicators present.
pub fn code_indicator_count(text: &str) -> usize {
    CODE_INDICATORS
        .iter()
        .filter(|indicator| text.contains(**indicator))
        .count()
}

/// Fenced code or at least two independent code indicators.
pub fn has_code(text: &str) -> bool {
    text.contains("```") || code_indicator_count(text) >= 2
}

/// Contains a question mark or a wh-word.
pub fn is_question(text: &str) -> bool {
    text.contains('?') || any_phrase(&text.to_lowercase(), WH_WORDS)
}

/// Question marks plus wh-word occurrences.
pub fn question_cue_count(text: &str) -> usize {
    text.matches('?').count() + count_phrases(&text.to_lowercase(), WH_WORDS)
}

pub fn answer_cue_count(text: &str) -> usize {
    count_phrases(&text.to_lowercase(), ANSWER_CUES)
}

pub fn has_answer_cue(text: &str) -> bool {
    any_phrase(&text.to_lowercase(), ANSWER_CUES)
}

/// Phrases that point back at earlier conversation content.
pub fn reference_cue_count(text: &str) -> usize {
    count_phrases(&text.to_lowercase(), BACK_REFERENCES)
}

pub fn has_back_reference(text: &str) -> bool {
    any_phrase(&text.to_lowercase(), BACK_REFERENCES)
}

/// Whether the first word is a continuation connective.
pub fn starts_with_continuation(text: &str) -> bool {
    words(text)
        .first()
        .is_some_and(|first| CONTINUATIONS.contains(&first.as_str()))
}

pub fn has_error_terms(text: &str) -> bool {
    let lower = text.to_lowercase();
    ERROR_TERMS.iter().any(|t| contains_word_prefix(&lower, t))
}

pub fn has_decision_cue(text: &str) -> bool {
    any_phrase(&text.to_lowercase(), DECISION_CUES)
}

/// The topic of the first topic-table keyword found in `text`.
pub fn detect_topic(text: &str) -> Option<&'static str> {
    let lower = text.to_lowercase();
    TOPICS
        .iter()
        .find(|(keyword, _)| contains_word_prefix(&lower, keyword))
        .map(|(_, topic)| *topic)
}

// ── Identifier and entity extraction ──────────────────────────────────────

/// Function-call-like names and quoted import targets.
pub fn extract_code_identifiers(text: &str) -> BTreeSet<String> {
    let mut identifiers = BTreeSet::new();

    for cap in CALL_RE.captures_iter(text) {
        let name = &cap[1];
        let last_segment = name.rsplit('.').next().unwrap_or(name);
        if name.len() >= 2 && !CALL_KEYWORDS.contains(&last_segment) {
            identifiers.insert(name.to_string());
        }
    }

    for cap in IMPORT_RE.captures_iter(text) {
        identifiers.insert(cap[1].to_string());
    }

    identifiers
}

/// Named entities: defined functions, types, variables, file paths,
/// backtick references and compound identifiers. Deduplicated, in
/// discovery order.
pub fn extract_entities(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut entities = Vec::new();

    let captured = [
        &*FUNCTION_DEF_RE,
        &*TYPE_DEF_RE,
        &*VARIABLE_RE,
        &*BACKTICK_RE,
        &*CAMEL_CASE_RE,
        &*SNAKE_CASE_RE,
    ];

    let mut push = |raw: &str| {
        let name = raw.trim_end_matches("()").trim_matches('`');
        if name.chars().count() < 3 || is_stop_word(&name.to_lowercase()) {
            return;
        }
        if seen.insert(name.to_string()) {
            entities.push(name.to_string());
        }
    };

    for m in FILE_PATH_RE.find_iter(text) {
        push(m.as_str());
    }
    for re in captured {
        for cap in re.captures_iter(text) {
            push(&cap[1]);
        }
    }

    entities
}

// ── Query classification ──────────────────────────────────────────────────

/// A single query category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    Code,
    Question,
    Debugging,
    Summary,
    WholeConversation,
}

/// Which categories a query falls into. Categories are not exclusive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct QueryProfile {
    pub code: bool,
    pub question: bool,
    pub debugging: bool,
    pub summary: bool,
    pub whole_conversation: bool,
}

impl QueryProfile {
    pub fn kinds(&self) -> Vec<QueryKind> {
        [
            (self.code, QueryKind::Code),
            (self.question, QueryKind::Question),
            (self.debugging, QueryKind::Debugging),
            (self.summary, QueryKind::Summary),
            (self.whole_conversation, QueryKind::WholeConversation),
        ]
        .into_iter()
        .filter_map(|(on, kind)| on.then_some(kind))
        .collect()
    }

    pub fn is_general(&self) -> bool {
        self.kinds().is_empty()
    }
}

/// Classify a query by keyword and prefix matching.
pub fn classify_query(query: &str) -> QueryProfile {
    let lower = query.trim().to_lowercase();
    if lower.is_empty() {
        return QueryProfile::default();
    }

    let first_word = words(&lower).into_iter().next().unwrap_or_default();
    let has_prefix_keyword =
        |keywords: &[&str]| keywords.iter().any(|k| contains_word_prefix(&lower, k));

    QueryProfile {
        code: has_prefix_keyword(CODE_QUERY_KEYWORDS) || has_code(query),
        question: lower.ends_with('?') || WH_WORDS.contains(&first_word.as_str()),
        debugging: has_prefix_keyword(DEBUG_QUERY_KEYWORDS),
        summary: has_prefix_keyword(SUMMARY_QUERY_KEYWORDS),
        whole_conversation: WHOLE_CONVERSATION_KEYWORDS
            .iter()
            .any(|k| lower.contains(k)),
    }
}
