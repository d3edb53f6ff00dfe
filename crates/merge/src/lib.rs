//! Merging of fragmented transcript snippets into lines of dialogue.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────┐  drain   ┌──────────────┐  per fragment  ┌──────────────┐
//! │ FragmentQueue │ ───────▶ │  PollDriver  │ ─────────────▶ │ MergeEngine  │
//! └───────────────┘          └──────────────┘                └──────┬───────┘
//!                                                                   │
//!                             progressive write ◀───────────────────┤
//!                                                                   ▼
//!                                                            ┌──────────────┐
//!                                      final write ◀──────── │  Finalizer   │ ──▶ Enricher
//!                                                            └──────────────┘
//! ```
//!
//! - `engine.rs`    - MergeThread and the merge/finalize state machine
//! - `finalizer.rs` - best-effort enrichment and final writes
//! - `driver.rs`    - the cooperative poll loop
//! - `clock.rs`     - wall-clock abstraction for window checks
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use utter_merge::{DriverSettings, MergeEngine, MergeSettings, PollDriver, SystemClock};
//!
//! let engine = MergeEngine::new(
//!     MergeSettings::default(),
//!     sink,
//!     Arc::new(utter_enrich::RuleEnricher::new()),
//!     Arc::new(SystemClock),
//! );
//! let driver = PollDriver::new(queue, engine, DriverSettings::default());
//! let driver = driver.run(cancel_token).await;
//! println!("{:?}", driver.stats());
//! ```

mod clock;
mod driver;
mod engine;
mod finalizer;
mod settings;
mod stats;

pub use clock::{Clock, ManualClock, SystemClock};
pub use driver::{PollDriver, TickReport};
pub use engine::{MergeEngine, MergeOutcome, MergeThread};
pub use finalizer::{EnrichmentStatus, FinalizeReason, FinalizedLine, Finalizer};
pub use settings::{
    DriverSettings, MergeSettings, SettingsError, DEFAULT_MERGE_WINDOW_MS,
    DEFAULT_POLL_INTERVAL_MS,
};
pub use stats::MergeStats;
