//! Closing of merge threads.

use crate::engine::MergeThread;
use std::fmt;
use std::sync::Arc;
use utter_enrich::{EnrichError, Enricher};
use utter_transcript::{LineRecord, LineSink, WriteMode};

/// Why a thread was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeReason {
    /// A fragment from another speaker arrived.
    SpeakerChanged,
    /// A same-speaker fragment arrived after the merge window had passed.
    WindowExpired,
    /// No fragment arrived within the idle threshold.
    Idle,
    /// The driver is stopping.
    Shutdown,
}

impl FinalizeReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FinalizeReason::SpeakerChanged => "speaker_changed",
            FinalizeReason::WindowExpired => "window_expired",
            FinalizeReason::Idle => "idle",
            FinalizeReason::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for FinalizeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to enrichment during finalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnrichmentStatus {
    Applied,
    /// No enrichment capability is configured.
    Disabled,
    Failed(String),
}

/// A closed line and how its finalization went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizedLine {
    pub record: LineRecord,
    pub reason: FinalizeReason,
    pub enrichment: EnrichmentStatus,
    /// Whether the final write reached the sink.
    pub persisted: bool,
}

impl FinalizedLine {
    pub fn key(&self) -> String {
        self.record.key()
    }
}

/// Enriches a closed thread best-effort and writes its final record.
///
/// Never fails: enrichment and sink errors are logged and reported in the
/// returned [`FinalizedLine`].
pub struct Finalizer<S> {
    sink: Arc<S>,
    enricher: Arc<dyn Enricher>,
}

impl<S: LineSink> Finalizer<S> {
    pub fn new(sink: Arc<S>, enricher: Arc<dyn Enricher>) -> Self {
        Self { sink, enricher }
    }

    pub fn finalize(&self, thread: MergeThread, reason: FinalizeReason) -> FinalizedLine {
        let fragments = thread.fragment_count();
        let mut record = thread.into_record();
        let key = record.key();

        let enrichment = match self.enricher.enrich(&record.text) {
            Ok(enrichment) => {
                record.tag = Some(enrichment.tag);
                record.cleaned_text = Some(enrichment.cleaned_text);
                EnrichmentStatus::Applied
            }
            Err(EnrichError::Disabled) => {
                tracing::debug!(key = %key, "Enrichment disabled, finalizing raw text");
                EnrichmentStatus::Disabled
            }
            Err(e) => {
                tracing::warn!(
                    key = %key,
                    enricher = self.enricher.name(),
                    error = %e,
                    "Enrichment failed, finalizing raw text"
                );
                EnrichmentStatus::Failed(e.to_string())
            }
        };

        let persisted = match self.sink.write(&record, WriteMode::Final) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Final write failed");
                false
            }
        };

        tracing::info!(
            key = %key,
            speaker = %record.speaker_id,
            reason = %reason,
            fragments,
            tag = record.tag.as_deref().unwrap_or("-"),
            persisted,
            "Finalized line: {}",
            record.text
        );

        FinalizedLine {
            record,
            reason,
            enrichment,
            persisted,
        }
    }
}
