//! Leveled lexical compression.
//!
//! Levels are cumulative:
//!
//! | Level | Adds |
//! |-------|------|
//! | 0 | nothing (identity) |
//! | 1 | whitespace collapse, empty lines dropped |
//! | 2 | repeated punctuation collapsed |
//! | 3 | phrase shortening |
//! | 4 | filler words removed |
//! | 5 | articles and prepositions removed, technical nouns abbreviated |
//!
//! Lines inside fenced code blocks are never touched. Output is never
//! longer than input.

use ctxkit_core::error::{CompressionError, Result};
use ctxkit_core::message::Message;
use ctxkit_core::token::TokenCounter;
use regex::Regex;
use serde::Serialize;
use std::sync::{Arc, LazyLock};
use tracing::debug;

pub const MAX_LEVEL: u8 = 5;

/// Every replacement is shorter than the shortest text its pattern matches.
const PHRASES: &[(&str, &str)] = &[
    ("do not", "don't"),
    ("does not", "doesn't"),
    ("did not", "didn't"),
    ("cannot", "can't"),
    ("can not", "can't"),
    ("will not", "won't"),
    ("is not", "isn't"),
    ("are not", "aren't"),
    ("it is", "it's"),
    ("that is to say", "i.e."),
    ("that is", "that's"),
    ("you are", "you're"),
    ("we are", "we're"),
    ("i am", "I'm"),
    ("in order to", "to"),
    ("due to the fact that", "because"),
    ("at this point in time", "now"),
    ("for example", "e.g."),
    ("as well as", "and"),
    ("a lot of", "many"),
    ("in addition", "also"),
    ("with regard to", "re"),
];

const FILLERS: &[&str] = &[
    "basically",
    "actually",
    "really",
    "very",
    "just",
    "quite",
    "simply",
    "literally",
    "essentially",
    "totally",
    "definitely",
    "certainly",
    "probably",
    "perhaps",
    "somewhat",
    "rather",
    "kind of",
    "sort of",
];

const ARTICLES_AND_PREPOSITIONS: &[&str] = &[
    "a", "an", "the", "of", "to", "in", "for", "on", "at", "by", "with", "from", "into", "onto",
];

const ABBREVIATIONS: &[(&str, &str)] = &[
    ("function", "func"),
    ("functions", "funcs"),
    ("implementation", "impl"),
    ("configuration", "config"),
    ("application", "app"),
    ("database", "db"),
    ("directory", "dir"),
    ("parameter", "param"),
    ("parameters", "params"),
    ("argument", "arg"),
    ("arguments", "args"),
    ("information", "info"),
    ("environment", "env"),
    ("repository", "repo"),
    ("documentation", "docs"),
    ("message", "msg"),
    ("messages", "msgs"),
    ("variable", "var"),
    ("reference", "ref"),
    ("authentication", "auth"),
    ("temporary", "tmp"),
    ("number", "num"),
];

fn word_pattern(words: &str) -> String {
    format!(r"(?i)\b(?:{words})\b")
}

fn alternation<'a>(words: impl Iterator<Item = &'a str>) -> String {
    words.map(regex::escape).collect::<Vec<_>>().join("|")
}

static REPEATED_PUNCT_RE: LazyLock<[(Regex, &'static str); 5]> = LazyLock::new(|| {
    [
        (Regex::new(r"\.{2,}").expect("valid regex"), "."),
        (Regex::new(r"!{2,}").expect("valid regex"), "!"),
        (Regex::new(r"\?{2,}").expect("valid regex"), "?"),
        (Regex::new(r",{2,}").expect("valid regex"), ","),
        (Regex::new(r"-{3,}").expect("valid regex"), "-"),
    ]
});

static PHRASE_RES: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    PHRASES
        .iter()
        .map(|(from, to)| {
            let pattern = word_pattern(&regex::escape(from).replace(' ', r"\s+"));
            (Regex::new(&pattern).expect("valid regex"), *to)
        })
        .collect()
});

static FILLER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&word_pattern(&alternation(FILLERS.iter().copied()))).expect("valid regex")
});

static ARTICLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&word_pattern(&alternation(ARTICLES_AND_PREPOSITIONS.iter().copied())))
        .expect("valid regex")
});

static ABBREVIATION_RES: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    ABBREVIATIONS
        .iter()
        .map(|(from, to)| (Regex::new(&word_pattern(from)).expect("valid regex"), *to))
        .collect()
});

/// Name of the strongest technique applied at `level`.
pub fn method_name(level: u8) -> &'static str {
    match level {
        0 => "none",
        1 => "whitespace",
        2 => "punctuation",
        3 => "phrase_shortening",
        4 => "filler_removal",
        _ => "aggressive",
    }
}

/// Compress one text at `level`.
pub fn compress_text(text: &str, level: u8) -> std::result::Result<String, CompressionError> {
    if level > MAX_LEVEL {
        return Err(CompressionError::InvalidLevel(level));
    }
    if level == 0 {
        return Ok(text.to_string());
    }

    let mut out: Vec<String> = Vec::new();
    let mut in_fence = false;
    for line in text.lines() {
        let is_fence = line.trim_start().starts_with("```");
        if in_fence || is_fence {
            out.push(line.to_string());
            if is_fence {
                in_fence = !in_fence;
            }
            continue;
        }
        let compressed = compress_line(line, level);
        if !compressed.is_empty() {
            out.push(compressed);
        }
    }
    Ok(out.join("\n"))
}

fn compress_line(line: &str, level: u8) -> String {
    let mut line = collapse_whitespace(line);

    if level >= 2 {
        for (re, single) in REPEATED_PUNCT_RE.iter() {
            line = re.replace_all(&line, *single).into_owned();
        }
    }
    if level >= 3 {
        for (re, short) in PHRASE_RES.iter() {
            line = re.replace_all(&line, *short).into_owned();
        }
    }
    if level >= 4 {
        line = collapse_whitespace(&FILLER_RE.replace_all(&line, ""));
    }
    if level >= 5 {
        line = ARTICLE_RE.replace_all(&line, "").into_owned();
        for (re, short) in ABBREVIATION_RES.iter() {
            line = re.replace_all(&line, *short).into_owned();
        }
        line = collapse_whitespace(&line);
    }
    line
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Debug, Clone, Serialize)]
pub struct CompressionResult {
    pub messages: Vec<Message>,
    pub level: u8,
    pub method: String,
    pub original_bytes: usize,
    pub compressed_bytes: usize,
    pub original_tokens: usize,
    pub compressed_tokens: usize,
    /// compressed_bytes / original_bytes, 1.0 for empty input.
    pub compression_ratio: f64,
    /// Byte ratio per message, in input order.
    pub message_ratios: Vec<f64>,
}

pub struct Compressor {
    counter: Arc<dyn TokenCounter>,
}

impl Compressor {
    pub fn new(counter: Arc<dyn TokenCounter>) -> Self {
        Self { counter }
    }

    pub fn compress_messages(&self, messages: &[Message], model: &str, level: u8) -> Result<CompressionResult> {
        if level > MAX_LEVEL {
            return Err(CompressionError::InvalidLevel(level).into());
        }
        let original_tokens = self.counter.count_conversation_tokens(messages, model)?.total;

        let mut compressed = Vec::with_capacity(messages.len());
        let mut message_ratios = Vec::with_capacity(messages.len());
        let (mut original_bytes, mut compressed_bytes) = (0, 0);

        for message in messages {
            let content = compress_text(&message.content, level)?;
            original_bytes += message.content.len();
            compressed_bytes += content.len();
            message_ratios.push(ratio(content.len(), message.content.len()));
            compressed.push(Message {
                content,
                ..message.clone()
            });
        }

        let compressed_tokens = self.counter.count_conversation_tokens(&compressed, model)?.total;
        debug!(
            model,
            level,
            original_bytes,
            compressed_bytes,
            "Compressed messages"
        );

        Ok(CompressionResult {
            messages: compressed,
            level,
            method: method_name(level).to_string(),
            original_bytes,
            compressed_bytes,
            original_tokens,
            compressed_tokens,
            compression_ratio: ratio(compressed_bytes, original_bytes),
            message_ratios,
        })
    }
}

fn ratio(compressed: usize, original: usize) -> f64 {
    if original == 0 {
        1.0
    } else {
        compressed as f64 / original as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctxkit_core::token::HeuristicTokenCounter;
    use proptest::prelude::*;

    #[test]
    fn level_zero_is_identity() {
        let text = "  Keep   this\n\n  exactly... as is!!  ";
        assert_eq!(compress_text(text, 0).unwrap(), text);
    }

    #[test]
    fn invalid_level_rejected() {
        assert!(matches!(compress_text("x", 6), Err(CompressionError::InvalidLevel(6))));
    }

    #[test]
    fn whitespace_level() {
        let out = compress_text("hello    world\n\n\n  second   line  ", 1).unwrap();
        assert_eq!(out, "hello world\nsecond line");
    }

    #[test]
    fn punctuation_level() {
        let out = compress_text("Wait... what?? Really!!!", 2).unwrap();
        assert_eq!(out, "Wait. what? Really!");
    }

    #[test]
    fn phrase_level() {
        let out = compress_text("We do not need it in order to ship", 3).unwrap();
        assert_eq!(out, "We don't need it to ship");
    }

    #[test]
    fn filler_level() {
        let out = compress_text("This is basically just a really simple fix", 4).unwrap();
        assert_eq!(out, "This is a simple fix");
    }

    #[test]
    fn aggressive_level() {
        let out = compress_text("Update the configuration of the database function", 5).unwrap();
        assert_eq!(out, "Update config db func");
    }

    #[test]
    fn fenced_code_is_verbatim() {
        let text = "Look   at   this:\n```rust\nfn  main()  {\n\n    let the = 1;\n}\n```\nThe   end";
        let out = compress_text(text, 5).unwrap();
        assert!(out.contains("```rust\nfn  main()  {\n\n    let the = 1;\n}\n```"));
        assert!(out.starts_with("Look this:"));
        assert!(out.ends_with("end"));
    }

    #[test]
    fn compress_messages_reports_ratios() {
        let compressor = Compressor::new(Arc::new(HeuristicTokenCounter));
        let messages = vec![
            Message::user("a    lot    of    spaces"),
            Message::assistant("tidy"),
        ];
        let result = compressor.compress_messages(&messages, "m", 1).unwrap();
        assert_eq!(result.method, "whitespace");
        assert_eq!(result.messages[0].content, "a lot of spaces");
        assert_eq!(result.messages[0].id, messages[0].id);
        assert_eq!(result.message_ratios[1], 1.0);
        assert!(result.compression_ratio < 1.0);
        assert!(result.compressed_tokens <= result.original_tokens);
    }

    proptest! {
        #[test]
        fn level_zero_identity(text in ".{0,200}") {
            prop_assert_eq!(compress_text(&text, 0).unwrap(), text);
        }

        #[test]
        fn never_grows(text in "[a-zA-Z .,!?\n\t`]{0,300}", level in 1u8..=5) {
            let out = compress_text(&text, level).unwrap();
            prop_assert!(out.len() <= text.len());
        }

        #[test]
        fn deterministic(text in ".{0,200}", level in 0u8..=5) {
            prop_assert_eq!(compress_text(&text, level).unwrap(), compress_text(&text, level).unwrap());
        }
    }
}
