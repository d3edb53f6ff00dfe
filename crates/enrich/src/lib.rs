//! Enrichment of finalized lines.
//!
//! An [`Enricher`] turns the raw merged text of a line into a tag and a
//! cleaned variant. Enrichment is best effort: callers keep the raw text when
//! it fails.

mod rules;

pub use rules::{
    classify, RuleEnricher, DEFAULT_FILLER_WORDS, TAG_EXCLAMATION, TAG_QUESTION, TAG_STATEMENT,
};

use serde::{Deserialize, Serialize};

/// Result of a successful enrichment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enrichment {
    pub tag: String,
    pub cleaned_text: String,
}

#[derive(Debug, thiserror::Error)]
pub enum EnrichError {
    #[error("enrichment disabled")]
    Disabled,
    #[error("nothing left to enrich after cleaning")]
    EmptyText,
    #[error("enrichment failed: {0}")]
    Failed(String),
}

pub type Result<T> = std::result::Result<T, EnrichError>;

pub trait Enricher: Send + Sync {
    fn name(&self) -> &'static str;
    fn enrich(&self, text: &str) -> Result<Enrichment>;
}

/// Enricher used when no capability is configured. Always reports
/// [`EnrichError::Disabled`].
pub struct NullEnricher;

impl Enricher for NullEnricher {
    fn name(&self) -> &'static str {
        "null"
    }

    fn enrich(&self, _text: &str) -> Result<Enrichment> {
        Err(EnrichError::Disabled)
    }
}
