//! Merge/finalize state machine.
//!
//! The engine is either Idle (no open thread) or Active (exactly one open
//! thread). Per fragment, in arrival order:
//!
//! | State  | Fragment                                  | Result                         |
//! |--------|-------------------------------------------|--------------------------------|
//! | Idle   | any                                       | open thread, progressive write |
//! | Active | same speaker, within window               | append, progressive write      |
//! | Active | other speaker, or window passed           | finalize, then open            |
//!
//! Without fragments, an Active engine is finalized once the idle threshold
//! has passed since its last activity.
//!
//! The window is measured on the engine's clock since the last merge, never
//! from the difference between fragment timestamps.

use crate::clock::Clock;
use crate::finalizer::{EnrichmentStatus, FinalizeReason, FinalizedLine, Finalizer};
use crate::settings::MergeSettings;
use crate::stats::MergeStats;
use std::sync::Arc;
use std::time::{Duration, Instant};
use utter_enrich::Enricher;
use utter_transcript::{Fragment, LineRecord, LineSink, SpeakerId, WriteMode};

/// The single in-progress line.
#[derive(Debug, Clone)]
pub struct MergeThread {
    speaker_id: SpeakerId,
    base_timestamp: i64,
    text: String,
    opened_at: Instant,
    last_activity: Instant,
    fragment_count: usize,
}

impl MergeThread {
    fn open(fragment: Fragment, now: Instant) -> Self {
        Self {
            speaker_id: fragment.speaker_id,
            base_timestamp: fragment.start_timestamp,
            text: fragment.text,
            opened_at: now,
            last_activity: now,
            fragment_count: 1,
        }
    }

    /// Fragment text is kept verbatim, joined by exactly one space.
    fn append(&mut self, text: &str, now: Instant) {
        self.text.push(' ');
        self.text.push_str(text);
        self.last_activity = now;
        self.fragment_count += 1;
    }

    pub fn speaker_id(&self) -> &SpeakerId {
        &self.speaker_id
    }

    /// Timestamp of the fragment that opened this thread. Never changes.
    pub fn base_timestamp(&self) -> i64 {
        self.base_timestamp
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn fragment_count(&self) -> usize {
        self.fragment_count
    }

    /// Time between opening and the most recent merge.
    pub fn span(&self) -> Duration {
        self.last_activity.saturating_duration_since(self.opened_at)
    }

    pub fn key(&self) -> String {
        utter_transcript::line_key(self.base_timestamp)
    }

    pub fn to_record(&self) -> LineRecord {
        LineRecord::plain(self.speaker_id.clone(), self.base_timestamp, self.text.clone())
    }

    pub fn into_record(self) -> LineRecord {
        LineRecord::plain(self.speaker_id, self.base_timestamp, self.text)
    }
}

/// What processing one fragment did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The engine was idle; the fragment opened a thread.
    Opened,
    /// The fragment was appended to the open thread.
    Extended,
    /// The open thread was finalized and the fragment opened a new one.
    Rotated(FinalizedLine),
}

pub struct MergeEngine<S> {
    settings: MergeSettings,
    clock: Arc<dyn Clock>,
    sink: Arc<S>,
    finalizer: Finalizer<S>,
    current: Option<MergeThread>,
    last_finalized: Option<i64>,
    stats: MergeStats,
}

impl<S: LineSink> MergeEngine<S> {
    pub fn new(
        settings: MergeSettings,
        sink: Arc<S>,
        enricher: Arc<dyn Enricher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let finalizer = Finalizer::new(Arc::clone(&sink), enricher);
        Self {
            settings,
            clock,
            sink,
            finalizer,
            current: None,
            last_finalized: None,
            stats: MergeStats::default(),
        }
    }

    pub fn settings(&self) -> &MergeSettings {
        &self.settings
    }

    pub fn current(&self) -> Option<&MergeThread> {
        self.current.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.current.is_some()
    }

    pub fn stats(&self) -> MergeStats {
        self.stats
    }

    pub(crate) fn stats_mut(&mut self) -> &mut MergeStats {
        &mut self.stats
    }

    /// Process a single fragment.
    pub fn process(&mut self, fragment: Fragment) -> MergeOutcome {
        self.stats.fragments_received += 1;
        let now = self.clock.now();
        let window = self.settings.merge_window();

        let Some(current) = self.current.as_mut() else {
            self.open(fragment, now);
            return MergeOutcome::Opened;
        };

        let same_speaker = current.speaker_id == fragment.speaker_id;
        let elapsed = now.saturating_duration_since(current.last_activity);

        if same_speaker && elapsed <= window {
            current.append(&fragment.text, now);
            let record = current.to_record();
            self.stats.fragments_merged += 1;
            tracing::debug!(
                key = %record.key(),
                speaker = %record.speaker_id,
                elapsed_ms = elapsed.as_millis() as u64,
                "Merged fragment"
            );
            self.write_progressive(&record);
            return MergeOutcome::Extended;
        }

        let reason = if same_speaker {
            FinalizeReason::WindowExpired
        } else {
            FinalizeReason::SpeakerChanged
        };
        let finalized = self.finalize(reason);
        self.open(fragment, now);

        match finalized {
            Some(line) => MergeOutcome::Rotated(line),
            None => MergeOutcome::Opened,
        }
    }

    /// Process fragments in order. Returns the lines finalized on the way.
    pub fn process_batch(
        &mut self,
        fragments: impl IntoIterator<Item = Fragment>,
    ) -> Vec<FinalizedLine> {
        fragments
            .into_iter()
            .filter_map(|fragment| match self.process(fragment) {
                MergeOutcome::Rotated(line) => Some(line),
                _ => None,
            })
            .collect()
    }

    /// Time since the open thread was last extended, if there is one.
    pub fn idle_elapsed(&self) -> Option<Duration> {
        let current = self.current.as_ref()?;
        Some(self.clock.now().saturating_duration_since(current.last_activity))
    }

    /// Finalize the open thread if it has been inactive for longer than the
    /// idle threshold. A no-op when idle.
    pub fn finalize_if_idle(&mut self) -> Option<FinalizedLine> {
        let elapsed = self.idle_elapsed()?;
        if elapsed <= self.settings.idle_threshold() {
            return None;
        }
        tracing::debug!(
            idle_ms = elapsed.as_millis() as u64,
            "Idle timeout, finalizing lingering line"
        );
        let line = self.finalize(FinalizeReason::Idle)?;
        self.stats.idle_finalizations += 1;
        Some(line)
    }

    /// Close the open thread, if any. The engine is Idle afterwards whatever
    /// happens to enrichment or the final write.
    pub fn finalize(&mut self, reason: FinalizeReason) -> Option<FinalizedLine> {
        let thread = self.current.take()?;
        let base_timestamp = thread.base_timestamp;
        let line = self.finalizer.finalize(thread, reason);

        self.last_finalized = Some(base_timestamp);
        self.stats.lines_finalized += 1;
        if matches!(line.enrichment, EnrichmentStatus::Failed(_)) {
            self.stats.enrichment_failures += 1;
        }
        if !line.persisted {
            self.stats.sink_write_failures += 1;
        }
        Some(line)
    }

    fn open(&mut self, fragment: Fragment, now: Instant) {
        if self.last_finalized == Some(fragment.start_timestamp) {
            tracing::warn!(
                base_timestamp = fragment.start_timestamp,
                "New line reuses the key of the line just finalized; its final record will be overwritten"
            );
        }

        let thread = MergeThread::open(fragment, now);
        let record = thread.to_record();
        tracing::debug!(key = %record.key(), speaker = %record.speaker_id, "Opened line");

        self.current = Some(thread);
        self.stats.threads_opened += 1;
        self.write_progressive(&record);
    }

    fn write_progressive(&mut self, record: &LineRecord) {
        if let Err(e) = self.sink.write(record, WriteMode::Progressive) {
            self.stats.sink_write_failures += 1;
            tracing::warn!(key = %record.key(), error = %e, "Progressive write failed");
        }
    }
}
