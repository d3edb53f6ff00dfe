//! Domain types for merged transcript lines.
//!
//! A [`Fragment`] is one speech-to-text snippet as produced by the live
//! transcription source. Fragments are merged into lines, which are persisted
//! as [`LineRecord`]s through a [`LineSink`] under a key derived from the
//! timestamp of the fragment that opened the line (see [`line_key`]).

mod sink;

pub use sink::{InMemorySink, LineSink, SinkWrite};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Prefix of every sink key. The full key is `cleaned:<base_timestamp>`.
pub const LINE_KEY_PREFIX: &str = "cleaned:";

/// Build the sink key for a line opened at `base_timestamp`.
pub fn line_key(base_timestamp: i64) -> String {
    format!("{LINE_KEY_PREFIX}{base_timestamp}")
}

/// Speaker identity as assigned by the transcription source.
///
/// Producers send either numeric player ids or string names; both are kept
/// in the form they arrived in so records round-trip unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SpeakerId {
    Number(i64),
    Name(String),
}

impl fmt::Display for SpeakerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpeakerId::Number(n) => write!(f, "{n}"),
            SpeakerId::Name(name) => f.write_str(name),
        }
    }
}

impl From<i64> for SpeakerId {
    fn from(n: i64) -> Self {
        SpeakerId::Number(n)
    }
}

impl From<&str> for SpeakerId {
    fn from(name: &str) -> Self {
        SpeakerId::Name(name.to_string())
    }
}

impl From<String> for SpeakerId {
    fn from(name: String) -> Self {
        SpeakerId::Name(name)
    }
}

/// A single transcribed snippet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    /// Older producers call this field `player_id`.
    #[serde(alias = "player_id")]
    pub speaker_id: SpeakerId,
    /// Start of the snippet in producer clock units.
    pub start_timestamp: i64,
    pub text: String,
}

impl Fragment {
    pub fn new(
        speaker_id: impl Into<SpeakerId>,
        start_timestamp: i64,
        text: impl Into<String>,
    ) -> Self {
        Self {
            speaker_id: speaker_id.into(),
            start_timestamp,
            text: text.into(),
        }
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// How a record is written to the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// In-progress text of a line that is still being merged.
    Progressive,
    /// Complete text, plus enrichment fields when available.
    Final,
}

impl WriteMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteMode::Progressive => "progressive",
            WriteMode::Final => "final",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "progressive" => Some(WriteMode::Progressive),
            "final" => Some(WriteMode::Final),
            _ => None,
        }
    }
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The serialized value stored under [`line_key`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRecord {
    pub speaker_id: SpeakerId,
    pub text: String,
    pub start_timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleaned_text: Option<String>,
}

impl LineRecord {
    /// Record without enrichment fields.
    pub fn plain(speaker_id: SpeakerId, start_timestamp: i64, text: impl Into<String>) -> Self {
        Self {
            speaker_id,
            text: text.into(),
            start_timestamp,
            tag: None,
            cleaned_text: None,
        }
    }

    pub fn key(&self) -> String {
        line_key(self.start_timestamp)
    }

    pub fn is_enriched(&self) -> bool {
        self.tag.is_some() || self.cleaned_text.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_key() {
        assert_eq!(line_key(0), "cleaned:0");
        assert_eq!(line_key(1000), "cleaned:1000");
        assert_eq!(line_key(-5), "cleaned:-5");
    }

    #[test]
    fn test_fragment_deserialize_legacy_player_id() {
        let json = r#"{"player_id": 1, "start_timestamp": 3000, "text": "world"}"#;
        let fragment = Fragment::from_json(json).unwrap();
        assert_eq!(fragment.speaker_id, SpeakerId::Number(1));
        assert_eq!(fragment.start_timestamp, 3000);
        assert_eq!(fragment.text, "world");
    }

    #[test]
    fn test_fragment_deserialize_string_speaker() {
        let json = r#"{"speaker_id": "alice", "start_timestamp": 0, "text": "hi"}"#;
        let fragment = Fragment::from_json(json).unwrap();
        assert_eq!(fragment.speaker_id, SpeakerId::from("alice"));
    }

    #[test]
    fn test_fragment_missing_text_is_error() {
        let json = r#"{"speaker_id": 1, "start_timestamp": 0}"#;
        assert!(Fragment::from_json(json).is_err());
    }

    #[test]
    fn test_numeric_and_string_speakers_differ() {
        assert_ne!(SpeakerId::from(1), SpeakerId::from("1"));
        assert_eq!(SpeakerId::from(1).to_string(), "1");
    }

    #[test]
    fn test_plain_record_omits_enrichment_fields() {
        let record = LineRecord::plain(SpeakerId::from(1), 0, "hello world");
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"speaker_id": 1, "text": "hello world", "start_timestamp": 0})
        );
        assert!(!record.is_enriched());
        assert_eq!(record.key(), "cleaned:0");
    }

    #[test]
    fn test_enriched_record_serializes_fields() {
        let record = LineRecord {
            tag: Some("question".to_string()),
            cleaned_text: Some("Hi?".to_string()),
            ..LineRecord::plain(SpeakerId::from("bob"), 42, "hi")
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["tag"], "question");
        assert_eq!(value["cleaned_text"], "Hi?");
        assert!(record.is_enriched());
    }

    #[test]
    fn test_write_mode_strings() {
        assert_eq!(WriteMode::Progressive.as_str(), "progressive");
        assert_eq!(WriteMode::parse("final"), Some(WriteMode::Final));
        assert_eq!(WriteMode::parse("other"), None);
    }
}
