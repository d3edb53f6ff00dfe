//! Poll driver - drains the ingestion queue into the merge engine.

use crate::engine::{MergeEngine, MergeOutcome};
use crate::finalizer::{FinalizeReason, FinalizedLine};
use crate::settings::DriverSettings;
use crate::stats::MergeStats;
use std::sync::Arc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use utter_queue::{decode_batch, FragmentQueue};
use utter_transcript::LineSink;

/// Longest prefix of a malformed entry included in logs.
const MAX_LOGGED_RAW_LEN: usize = 120;

/// What a single tick did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    /// Entries removed from the queue, valid or not.
    pub drained: usize,
    /// Entries fed to the engine.
    pub processed: usize,
    /// Entries dropped as undecodable.
    pub dropped: usize,
    /// Lines closed during this tick.
    pub finalized: Vec<FinalizedLine>,
    /// The queue could not be read; nothing else happened.
    pub queue_error: bool,
}

/// Single-threaded cooperative loop around a [`MergeEngine`].
///
/// Ticks never overlap. Each one drains the queue atomically and feeds the
/// fragments to the engine in arrival order; a tick with nothing to process
/// runs the idle check instead.
pub struct PollDriver<Q, S> {
    queue: Arc<Q>,
    engine: MergeEngine<S>,
    settings: DriverSettings,
}

impl<Q, S> PollDriver<Q, S>
where
    Q: FragmentQueue,
    S: LineSink,
{
    pub fn new(queue: Arc<Q>, engine: MergeEngine<S>, settings: DriverSettings) -> Self {
        Self {
            queue,
            engine,
            settings,
        }
    }

    pub fn engine(&self) -> &MergeEngine<S> {
        &self.engine
    }

    pub fn stats(&self) -> MergeStats {
        self.engine.stats()
    }

    /// Run one tick.
    #[tracing::instrument(level = "trace", skip(self))]
    pub fn tick(&mut self) -> TickReport {
        let mut report = TickReport::default();

        let raws = match self.queue.drain() {
            Ok(raws) => raws,
            Err(e) => {
                self.engine.stats_mut().queue_read_failures += 1;
                tracing::warn!(error = %e, "Queue drain failed, retrying next tick");
                report.queue_error = true;
                return report;
            }
        };
        report.drained = raws.len();

        let batch = decode_batch(raws);
        for failure in &batch.failures {
            tracing::warn!(
                index = failure.index,
                error = %failure.error,
                raw = %truncate(&failure.raw, MAX_LOGGED_RAW_LEN),
                "Dropping malformed fragment"
            );
        }
        report.dropped = batch.failures.len();
        self.engine.stats_mut().fragments_dropped += report.dropped as u64;

        if batch.fragments.is_empty() {
            // Undecodable entries are not activity.
            if let Some(line) = self.engine.finalize_if_idle() {
                report.finalized.push(line);
            }
            return report;
        }

        tracing::debug!(count = batch.fragments.len(), "Processing fragments");
        report.processed = batch.fragments.len();
        for fragment in batch.fragments {
            if let MergeOutcome::Rotated(line) = self.engine.process(fragment) {
                report.finalized.push(line);
            }
        }

        report
    }

    /// Finalize whatever is still open. Used when stopping.
    pub fn shutdown(&mut self) -> Option<FinalizedLine> {
        self.engine.finalize(FinalizeReason::Shutdown)
    }

    /// Tick every poll interval until `cancel` fires, then finalize the open
    /// line and hand the driver back.
    pub async fn run(mut self, cancel: CancellationToken) -> Self {
        let interval = self.settings.poll_interval();
        tracing::info!(
            poll_interval_ms = self.settings.poll_interval_ms,
            merge_window_ms = self.engine.settings().merge_window_ms,
            idle_threshold_ms = self.engine.settings().idle_threshold().as_millis() as u64,
            "Merger started"
        );

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!("Merger cancelled");
                    break;
                }
                _ = ticker.tick() => {
                    let report = self.tick();
                    if report.drained > 0 {
                        tracing::trace!(
                            drained = report.drained,
                            finalized = report.finalized.len(),
                            "Tick completed"
                        );
                    }
                }
            }
        }

        if let Some(line) = self.shutdown() {
            tracing::info!(key = %line.key(), "Finalized open line on shutdown");
        }

        let stats = self.stats();
        tracing::info!(
            fragments = stats.fragments_received,
            lines = stats.lines_finalized,
            dropped = stats.fragments_dropped,
            enrichment_failures = stats.enrichment_failures,
            sink_write_failures = stats.sink_write_failures,
            "Merger stopped"
        );
        self
    }
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::settings::MergeSettings;
    use std::time::Duration;
    use utter_enrich::NullEnricher;
    use utter_queue::{InMemoryQueue, QueueError};
    use utter_transcript::{Fragment, InMemorySink, WriteMode};

    fn driver() -> (
        PollDriver<InMemoryQueue, InMemorySink>,
        Arc<InMemoryQueue>,
        Arc<InMemorySink>,
        Arc<ManualClock>,
    ) {
        let queue = Arc::new(InMemoryQueue::new());
        let sink = Arc::new(InMemorySink::new());
        let clock = Arc::new(ManualClock::new());
        let engine = MergeEngine::new(
            MergeSettings::with_merge_window_ms(8000),
            Arc::clone(&sink),
            Arc::new(NullEnricher),
            clock.clone(),
        );
        let driver = PollDriver::new(
            Arc::clone(&queue),
            engine,
            DriverSettings {
                poll_interval_ms: 10,
            },
        );
        (driver, queue, sink, clock)
    }

    struct BrokenQueue;

    impl FragmentQueue for BrokenQueue {
        type Error = QueueError;

        fn push(&self, _raw: String) -> Result<(), QueueError> {
            Err(QueueError::Closed)
        }

        fn drain(&self) -> Result<Vec<String>, QueueError> {
            Err(QueueError::Closed)
        }

        fn len(&self) -> Result<usize, QueueError> {
            Err(QueueError::Closed)
        }
    }

    #[test]
    fn test_tick_processes_batch_in_order() {
        let (mut driver, queue, sink, _clock) = driver();
        queue.push_fragment(&Fragment::new(1, 0, "hello")).unwrap();
        queue.push_fragment(&Fragment::new(1, 3000, "world")).unwrap();

        let report = driver.tick();
        assert_eq!(report.drained, 2);
        assert_eq!(report.processed, 2);
        assert!(report.finalized.is_empty());
        assert!(queue.is_empty().unwrap());
        assert_eq!(sink.get("cleaned:0").unwrap().text, "hello world");
    }

    #[test]
    fn test_tick_drops_malformed_and_continues() {
        let (mut driver, queue, sink, _clock) = driver();
        queue.push_fragment(&Fragment::new(1, 0, "hello")).unwrap();
        queue.push("{broken".to_string()).unwrap();
        queue.push_fragment(&Fragment::new(1, 10, "again")).unwrap();

        let report = driver.tick();
        assert_eq!(report.drained, 3);
        assert_eq!(report.processed, 2);
        assert_eq!(report.dropped, 1);
        assert_eq!(sink.get("cleaned:0").unwrap().text, "hello again");
        assert_eq!(driver.stats().fragments_dropped, 1);
    }

    #[test]
    fn test_empty_tick_runs_idle_check() {
        let (mut driver, queue, sink, clock) = driver();
        queue.push_fragment(&Fragment::new(1, 0, "hi")).unwrap();
        driver.tick();

        clock.advance_ms(5000);
        assert!(driver.tick().finalized.is_empty());

        clock.advance_ms(4000);
        let report = driver.tick();
        assert_eq!(report.finalized.len(), 1);
        assert_eq!(report.finalized[0].reason, FinalizeReason::Idle);
        assert_eq!(sink.mode_of("cleaned:0"), Some(WriteMode::Final));

        assert!(driver.tick().finalized.is_empty());
    }

    #[test]
    fn test_malformed_only_batch_does_not_keep_line_alive() {
        let (mut driver, queue, _sink, clock) = driver();
        queue.push_fragment(&Fragment::new(1, 0, "hi")).unwrap();
        driver.tick();

        clock.advance_ms(9000);
        queue.push("garbage".to_string()).unwrap();
        let report = driver.tick();
        assert_eq!(report.dropped, 1);
        assert_eq!(report.finalized.len(), 1);
        assert!(!driver.engine().is_active());
    }

    #[test]
    fn test_queue_failure_is_reported_not_fatal() {
        let sink = Arc::new(InMemorySink::new());
        let engine = MergeEngine::new(
            MergeSettings::default(),
            Arc::clone(&sink),
            Arc::new(NullEnricher),
            Arc::new(ManualClock::new()),
        );
        let mut driver = PollDriver::new(Arc::new(BrokenQueue), engine, DriverSettings::default());

        assert!(driver.tick().queue_error);
        assert!(driver.tick().queue_error);
        assert_eq!(driver.stats().queue_read_failures, 2);
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello", 3), "hel");
        assert_eq!(truncate("héllo", 2), "h");
    }

    #[tokio::test]
    async fn test_run_finalizes_open_line_on_cancel() {
        let (driver, queue, sink, _clock) = driver();
        queue.push_fragment(&Fragment::new(1, 0, "hello")).unwrap();
        queue.push_fragment(&Fragment::new(1, 3000, "world")).unwrap();

        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        let queue_for_producer = Arc::clone(&queue);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            queue_for_producer
                .push_fragment(&Fragment::new(2, 4000, "bye"))
                .unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let driver = driver.run(cancel).await;
        assert!(!driver.engine().is_active());

        let finals = sink.writes_in(WriteMode::Final);
        let texts: Vec<_> = finals.iter().map(|w| w.record.text.as_str()).collect();
        assert_eq!(texts, vec!["hello world", "bye"]);
        assert_eq!(driver.stats().lines_finalized, 2);
    }

    #[tokio::test]
    async fn test_run_stops_immediately_when_already_cancelled() {
        let (driver, queue, sink, _clock) = driver();
        queue.push_fragment(&Fragment::new(1, 0, "never")).unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let driver = driver.run(cancel).await;

        assert!(sink.is_empty());
        assert_eq!(queue.len().unwrap(), 1);
        assert_eq!(driver.stats().fragments_received, 0);
    }
}
