//! Rule-based cleaning and tagging.
//!
//! Cleaning steps, in order:
//! 1. Whitespace normalization
//! 2. Filler word removal ("um", "uh", ...)
//! 3. Collapsing of immediately repeated words ("the the" -> "the")
//! 4. Capitalization of the first letter
//! 5. Terminal punctuation when missing

use crate::{EnrichError, Enricher, Enrichment, Result};

/// Filler words dropped during cleaning. Compared case-insensitively, ignoring
/// surrounding punctuation.
pub const DEFAULT_FILLER_WORDS: &[&str] = &["um", "umm", "uh", "uhm", "er", "erm", "hmm", "mm"];

const QUESTION_WORDS: &[&str] = &[
    "who", "what", "when", "where", "why", "how", "which", "is", "are", "am", "do", "does",
    "did", "can", "could", "would", "will", "should", "shall",
];

pub const TAG_QUESTION: &str = "question";
pub const TAG_EXCLAMATION: &str = "exclamation";
pub const TAG_STATEMENT: &str = "statement";

/// Local enricher that needs no model or network.
pub struct RuleEnricher {
    fillers: Vec<String>,
}

impl Default for RuleEnricher {
    fn default() -> Self {
        Self::with_fillers(DEFAULT_FILLER_WORDS.iter().map(|w| w.to_string()))
    }
}

impl RuleEnricher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fillers(fillers: impl IntoIterator<Item = String>) -> Self {
        Self {
            fillers: fillers.into_iter().map(|w| w.to_lowercase()).collect(),
        }
    }

    fn is_filler(&self, word: &str) -> bool {
        let bare = bare_word(word);
        !bare.is_empty() && self.fillers.iter().any(|f| *f == bare)
    }

    /// Clean `text` without tagging it. Returns `None` if nothing is left.
    pub fn clean(&self, text: &str) -> Option<String> {
        let mut words: Vec<&str> = Vec::new();
        for word in text.split_whitespace() {
            if self.is_filler(word) {
                continue;
            }
            if let Some(prev) = words.last() {
                if bare_word(prev) == bare_word(word) && !bare_word(word).is_empty() {
                    // Keep the later occurrence; it carries any trailing punctuation.
                    words.pop();
                }
            }
            words.push(word);
        }

        if words.is_empty() {
            return None;
        }

        let mut cleaned = capitalize_first(&words.join(" "));
        let question = is_question(&cleaned);
        if !cleaned.ends_with(['.', '?', '!']) {
            cleaned.push(if question { '?' } else { '.' });
        }
        Some(cleaned)
    }
}

impl Enricher for RuleEnricher {
    fn name(&self) -> &'static str {
        "rules"
    }

    fn enrich(&self, text: &str) -> Result<Enrichment> {
        let cleaned_text = self.clean(text).ok_or(EnrichError::EmptyText)?;
        let tag = classify(&cleaned_text);
        Ok(Enrichment {
            tag: tag.to_string(),
            cleaned_text,
        })
    }
}

/// Tag for an already cleaned line.
pub fn classify(cleaned: &str) -> &'static str {
    if cleaned.ends_with('?') {
        TAG_QUESTION
    } else if cleaned.ends_with('!') {
        TAG_EXCLAMATION
    } else {
        TAG_STATEMENT
    }
}

fn is_question(text: &str) -> bool {
    if text.ends_with('?') {
        return true;
    }
    text.split_whitespace()
        .next()
        .map(|first| QUESTION_WORDS.contains(&bare_word(first).as_str()))
        .unwrap_or(false)
}

fn bare_word(word: &str) -> String {
    word.trim_matches(|c: char| !c.is_alphanumeric() && c != '\'')
        .to_lowercase()
}

fn capitalize_first(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
