//! `extract-core` — the metadata-extraction core of a local file-content
//! indexer daemon: a graph-change-driven scheduler that discovers files
//! needing deep content extraction, dispatches format-specific handlers
//! under a hard per-file deadline, and survives individual-file crashes
//! without losing global progress.
//!
//! The crate is organized the way the Decorator architecture itself is
//! laid out: a [`graph_store`] boundary trait, a [`registry`] of
//! format handlers, an [`engine`] that dispatches one file at a time, a
//! [`queue`] that streams candidate rows, a [`scheduler`] state machine
//! tying queue and engine together with commit/retry semantics, and a
//! [`controller`] that is the only part meant to be held by an outer
//! system. [`persistence`] and [`hints`] are narrow OS-facing concerns
//! kept out of the scheduler's own code. [`http`] is an optional ambient
//! status surface for supervisors that can't hold a live channel.

pub mod config;
pub mod controller;
pub mod engine;
pub mod error;
pub mod graph_store;
pub mod hints;
pub mod http;
pub mod persistence;
pub mod queue;
pub mod registry;
pub mod scheduler;
pub mod stats;
pub mod types;

pub use config::IndexerConfig;
pub use controller::{Controller, ControllerEvent, ErrorReportStore, NullErrorReportStore};
pub use engine::ExtractionEngine;
pub use error::{ExtractError, SchedulerError};
pub use graph_store::{Batch, ChangeEvent, ChangeKind, GraphStore, Operation, Param};
pub use hints::{FileHinting, NoopHinting};
pub use persistence::PersistenceSlot;
pub use queue::{DecoratorQueue, QueuePolicy};
pub use registry::{ExtractorHandler, ExtractorRegistry, HandlerFactory, RegistryEntry};
pub use scheduler::{DecoratorScheduler, SchedulerState};
pub use stats::ExtractorStats;
pub use types::{ExtractItem, ExtractResult, Resource, Triple, Value};

use std::path::Path;
use std::sync::Arc;

use tokio::sync::Mutex;

/// Wires the pieces above into a running core, following the teacher's
/// `RuntimeBuilder`-style top-level constructor: one call that owns
/// startup ordering so `bins/extractd` (and tests) don't have to
/// replicate it.
pub struct IndexerCore {
    pub controller: Controller,
    pub engine: Arc<ExtractionEngine>,
    pub events: tokio::sync::broadcast::Sender<ControllerEvent>,
}

impl IndexerCore {
    pub fn build(
        config: &IndexerConfig,
        store: Arc<dyn GraphStore>,
        registry: Arc<ExtractorRegistry>,
        error_report: Arc<dyn ErrorReportStore>,
        persistence_path: &Path,
        policy: QueuePolicy,
    ) -> anyhow::Result<Self> {
        let persistence = Arc::new(Mutex::new(PersistenceSlot::open_at_path(persistence_path)?));

        let hints: Arc<dyn FileHinting> = default_hinting();

        let engine = Arc::new(ExtractionEngine::new(
            registry.clone(),
            persistence.clone(),
            hints,
            config.deadline,
            config.deadline_disabled,
            config.max_bytes,
        ));

        let (events_tx, _events_rx) = controller::event_channel();

        let mut scheduler = DecoratorScheduler::new(
            policy,
            store,
            engine.clone(),
            registry,
            error_report.clone(),
            events_tx.clone(),
            config.commit_batch_size,
            config.throttle_for(),
        );
        // spec §6: "on-low-battery: when true, pause the scheduler."
        // `resume()` (e.g. once the outer system observes AC power again)
        // lifts this the same way it lifts any other pause.
        if config.on_low_battery {
            scheduler.pause();
        }
        let scheduler = Arc::new(Mutex::new(scheduler));

        let controller = Controller::new(scheduler, persistence, error_report, events_tx.clone());

        Ok(Self {
            controller,
            engine,
            events: events_tx,
        })
    }
}

#[cfg(unix)]
fn default_hinting() -> Arc<dyn FileHinting> {
    Arc::new(hints::PosixFadviseHinting)
}

#[cfg(not(unix))]
fn default_hinting() -> Arc<dyn FileHinting> {
    Arc::new(NoopHinting)
}
