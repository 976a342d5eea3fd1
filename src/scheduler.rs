//! Decorator Scheduler (spec §4.5): the state machine driving count →
//! query → extract → buffer → commit → repeat.
//!
//! The four boolean latches of the source (`querying`, `updating`,
//! `processing`, `extracting`) are collapsed into one [`SchedulerState`]
//! enum, per spec §9's explicit instruction: transitions become total
//! functions and invalid transitions are unrepresentable.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::controller::{ControllerEvent, ErrorReportStore};
use crate::engine::ExtractionEngine;
use crate::error::SchedulerError;
use crate::graph_store::{Batch, ChangeKind, GraphStore, Operation, Param};
use crate::queue::{DecoratorQueue, QueuePolicy};
use crate::registry::ExtractorRegistry;
use crate::types::ExtractResult;

/// Replaces the source's four boolean latches (spec §4.5, §9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Counting,
    Querying,
    Extracting,
    Buffering,
    DrainCommit,
    Finished,
}

struct CommitBuffer {
    results: Vec<PendingResult>,
}

enum PendingResult {
    Ok(ExtractResult),
    /// `hash` is the mime type's *current* extractor hash (spec §4.1;
    /// S2: "the update-hash is still valid for #2 as well"), resolved
    /// at the moment the handler failed — not a placeholder, since a
    /// failed extraction still quarantines under the real versioned
    /// identifier so a later handler upgrade can still re-select it.
    Failed {
        file: String,
        message: String,
        hash: String,
    },
}

/// Progress counters backing the Controller's `progress()` signal (spec
/// §4.6: "fraction is processed / (processed + remaining)").
#[derive(Debug, Clone, Copy, Default)]
pub struct ProgressCounters {
    pub processed: u64,
    pub remaining: u64,
}

pub struct DecoratorScheduler {
    state: SchedulerState,
    queue: DecoratorQueue,
    engine: Arc<ExtractionEngine>,
    registry: Arc<ExtractorRegistry>,
    store: Arc<dyn GraphStore>,
    error_report: Arc<dyn ErrorReportStore>,
    events: tokio::sync::broadcast::Sender<ControllerEvent>,
    sparql_buffer: Vec<PendingResult>,
    commit_in_flight: Option<CommitBuffer>,
    commit_batch_size: usize,
    throttle: Duration,
    paused: bool,
    current_cancel: Option<CancellationToken>,
    progress: ProgressCounters,
    started_at: std::time::Instant,
}

impl DecoratorScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        policy: QueuePolicy,
        store: Arc<dyn GraphStore>,
        engine: Arc<ExtractionEngine>,
        registry: Arc<ExtractorRegistry>,
        error_report: Arc<dyn ErrorReportStore>,
        events: tokio::sync::broadcast::Sender<ControllerEvent>,
        commit_batch_size: usize,
        throttle: Duration,
    ) -> Self {
        Self {
            state: SchedulerState::Idle,
            queue: DecoratorQueue::new(store.clone(), registry.clone(), policy),
            engine,
            registry,
            store,
            error_report,
            events,
            sparql_buffer: Vec::new(),
            commit_in_flight: None,
            commit_batch_size,
            throttle,
            paused: false,
            current_cancel: None,
            progress: ProgressCounters::default(),
            started_at: std::time::Instant::now(),
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn set_throttled(&mut self, throttled: bool, interval: Duration) {
        self.throttle = if throttled { interval } else { Duration::ZERO };
    }

    pub fn set_priority_graphs(&mut self, graphs: Vec<String>) {
        self.queue.set_priority_graphs(graphs);
        self.invalidate();
    }

    /// spec §5: "pause cancels the currently-running handler... item is
    /// not put back into the queue; on rebuild it will be re-discovered."
    pub fn pause(&mut self) {
        self.paused = true;
        if let Some(cancel) = &self.current_cancel {
            cancel.cancel();
        }
    }

    pub fn resume(&mut self) {
        self.paused = false;
        self.invalidate();
    }

    pub fn invalidate(&mut self) {
        self.queue.invalidate();
        if self.state != SchedulerState::DrainCommit {
            self.state = SchedulerState::Idle;
        }
    }

    /// On a `create`/`update` notification: no-op if already querying or
    /// committing (spec §4.4 "Interaction with notifications").
    pub fn maybe_rebuild(&mut self) {
        if matches!(
            self.state,
            SchedulerState::Querying | SchedulerState::DrainCommit
        ) {
            return;
        }
        self.invalidate();
    }

    /// On a `delete` notification: unconditional rebuild (spec §4.4: "the
    /// deletion may have removed current_item or next_item").
    pub fn on_delete(&mut self) {
        self.invalidate();
    }

    pub fn on_change_event(&mut self, kind: ChangeKind) {
        match kind {
            ChangeKind::Delete => self.on_delete(),
            ChangeKind::Create | ChangeKind::Update => self.maybe_rebuild(),
        }
    }

    /// Records a quarantine hash for `file` outside the normal commit
    /// cycle (spec §4.3 startup replay / S4: "its hash is then recorded
    /// so it is excluded from subsequent queries"). Used for the crash
    /// victim found in the Persistence Slot at `start()`, before any
    /// ordinary extraction has run. Resolves the same way
    /// retry-synchronously does (§4.5.A / ADR-0002): quarantine under the
    /// mime type's current hash if it can still be resolved, delete the
    /// record if it can't.
    pub async fn quarantine_file(&self, file: &str) -> Result<(), SchedulerError> {
        let batch = self.companion_batch_for(file).await;
        self.store
            .execute_batch(batch)
            .await
            .map_err(SchedulerError::BatchError)
    }

    fn emit(&self, event: ControllerEvent) {
        let _ = self.events.send(event);
    }

    /// Runs the state machine until it reaches `Finished` (drains all
    /// currently-known work) or the scheduler is paused. Intended to be
    /// called in a loop from the Controller's driving task.
    pub async fn run_until_idle(&mut self) -> Result<(), SchedulerError> {
        loop {
            if self.paused {
                return Ok(());
            }
            match self.state {
                SchedulerState::Idle => {
                    self.state = SchedulerState::Counting;
                }
                SchedulerState::Counting => {
                    let remaining = self
                        .queue
                        .count_remaining()
                        .await
                        .map_err(SchedulerError::QueryFailed)?;
                    self.progress.remaining = remaining;
                    if remaining == 0 {
                        self.state = SchedulerState::Finished;
                    } else {
                        self.state = SchedulerState::Querying;
                    }
                }
                SchedulerState::Querying => {
                    let has_items = self
                        .queue
                        .rebuild()
                        .await
                        .map_err(SchedulerError::QueryFailed)?;
                    if !has_items {
                        self.state = SchedulerState::Finished;
                        continue;
                    }
                    if let Some(next) = self.queue.next_item() {
                        self.engine.advise_next(&next.url);
                    }
                    self.emit(ControllerEvent::ItemsAvailable);
                    self.state = SchedulerState::Extracting;
                }
                SchedulerState::Extracting => {
                    self.do_extract_cycle().await?;
                }
                SchedulerState::Buffering => {
                    if self.sparql_buffer.len() >= self.commit_batch_size
                        || !self.queue.has_work()
                    {
                        self.state = SchedulerState::DrainCommit;
                    } else {
                        if !self.throttle.is_zero() {
                            tokio::time::sleep(self.throttle).await;
                        }
                        self.state = SchedulerState::Extracting;
                    }
                }
                SchedulerState::DrainCommit => {
                    self.commit().await?;
                    if self.queue.has_work() {
                        self.state = SchedulerState::Extracting;
                    } else {
                        self.state = SchedulerState::Finished;
                    }
                }
                SchedulerState::Finished => {
                    self.emit_progress();
                    self.emit(ControllerEvent::Finished);
                    self.state = SchedulerState::Idle;
                    return Ok(());
                }
            }
        }
    }

    async fn do_extract_cycle(&mut self) -> Result<(), SchedulerError> {
        self.queue
            .advance()
            .await
            .map_err(SchedulerError::QueryFailed)?;
        let Some(item) = self.queue.current_item().cloned() else {
            self.state = SchedulerState::DrainCommit;
            return Ok(());
        };

        let cancel = CancellationToken::new();
        self.current_cancel = Some(cancel.clone());
        let outcome = self.engine.extract(&item, cancel).await;
        self.current_cancel = None;

        match outcome {
            Ok(result) => {
                self.progress.processed += 1;
                self.sparql_buffer.push(PendingResult::Ok(result));
            }
            Err(e) if e.quarantines() => {
                self.progress.processed += 1;
                // A `Handler` error only occurs after the engine already
                // resolved a Registry entry for this mime type, so this
                // is Some in every real case; the fallback only guards
                // against the Registry changing underneath a long-running
                // extraction.
                let hash = self.engine.hash_for_mime(&item.mime_type).unwrap_or_else(|| {
                    tracing::warn!(
                        target: "extract_core::scheduler",
                        mime = %item.mime_type,
                        "no current extractor hash for mime type at failure time; quarantining without one"
                    );
                    "failed".to_string()
                });
                self.sparql_buffer.push(PendingResult::Failed {
                    file: item.url.clone(),
                    message: e.to_string(),
                    hash,
                });
            }
            Err(crate::error::ExtractError::Cancelled) => {
                // spec §5: no result appended, item re-enters the queue on
                // the next rebuild. We do nothing further here; `pause()`
                // already requested the invalidation this cycle needs.
            }
            Err(_pre_flight) => {
                // NoMimeType / NoExtractor / InvalidFile: skip, no quarantine.
                self.progress.processed += 1;
            }
        }

        self.emit_progress();
        self.state = SchedulerState::Buffering;
        Ok(())
    }

    fn emit_progress(&self) {
        let total = self.progress.processed + self.progress.remaining;
        let fraction = if total == 0 {
            1.0
        } else {
            self.progress.processed as f64 / total as f64
        };
        let elapsed = self.started_at.elapsed().as_secs_f64();
        let eta = if self.progress.processed == 0 || fraction >= 1.0 {
            0.0
        } else {
            let rate = self.progress.processed as f64 / elapsed.max(0.001);
            (self.progress.remaining as f64 / rate.max(0.001)).max(0.0)
        };
        self.emit(ControllerEvent::Progress {
            status: format!("{:?}", self.state),
            fraction,
            eta_seconds: eta,
        });
    }

    /// Commit protocol (spec §4.5 steps 1-6).
    async fn commit(&mut self) -> Result<(), SchedulerError> {
        if self.sparql_buffer.is_empty() || self.commit_in_flight.is_some() {
            return Ok(());
        }
        let results = std::mem::take(&mut self.sparql_buffer);
        let batch = build_batch(&results);
        self.commit_in_flight = Some(CommitBuffer { results });

        match self.store.execute_batch(batch).await {
            Ok(()) => {
                self.commit_in_flight = None;
            }
            Err(e) => {
                let failed = self.commit_in_flight.take().expect("just set above");
                self.retry_synchronously(failed.results).await;
                // spec §4.5 step 6: "clear the buffer unconditionally" —
                // retry_synchronously already drained it item by item.
                let _ = SchedulerError::BatchError(e); // surfaced via tracing below, not to callers (§7)
                tracing::warn!(
                    target: "extract_core::scheduler",
                    "batch commit failed, isolated via retry-synchronously"
                );
            }
        }
        Ok(())
    }

    /// Retry-synchronously (spec §4.5.A): the most important
    /// failure-isolation mechanism.
    async fn retry_synchronously(&mut self, results: Vec<PendingResult>) {
        for result in results {
            let single = Batch {
                operations: build_operations(std::slice::from_ref(&result)),
            };
            let file = pending_file(&result);
            match self.store.execute_batch(single).await {
                Ok(()) => {
                    let _ = self.error_report.delete(&file).await;
                }
                Err(e) => {
                    self.emit(ControllerEvent::RaiseError {
                        file: file.clone(),
                        message: e.to_string(),
                        extra: None,
                    });
                    let _ = self
                        .error_report
                        .insert(&file, &e.to_string(), None)
                        .await;

                    let companion = self.companion_batch_for(&file).await;
                    if let Err(e) = self.store.execute_batch(companion).await {
                        tracing::error!(
                            target: "extract_core::scheduler",
                            file = %file,
                            error = %e,
                            "companion batch failed too; file remains unextracted and may be retried"
                        );
                    }
                }
            }
        }
    }

    /// Resolves the companion batch for a file whose extraction (or
    /// commit) failed: quarantine it under its mime type's *current*
    /// hash if the mime can still be resolved (spec §4.1), or delete its
    /// record if the mime can no longer be determined (ADR-0002 in
    /// DESIGN.md). An unresolvable `resolve_mime` call itself falls back
    /// to quarantine rather than delete, per that same ADR.
    async fn companion_batch_for(&self, file: &str) -> Batch {
        match self.store.resolve_mime(file).await {
            Ok(Some(mime)) => quarantine_batch(file, &self.hash_for_quarantine(&mime)),
            Ok(None) => delete_file_batch(file),
            Err(_) => quarantine_batch(file, "failed"),
        }
    }

    /// The mime type's current extractor hash, or the `"failed"`
    /// sentinel if the Registry has no entry for it (a mime that was
    /// resolvable via the store but never had a handler registered).
    fn hash_for_quarantine(&self, mime_type: &str) -> String {
        self.registry.lookup(mime_type).map_or_else(
            || {
                tracing::warn!(
                    target: "extract_core::scheduler",
                    mime = %mime_type,
                    "no extractor registered for mime type at quarantine time"
                );
                "failed".to_string()
            },
            |entry| entry.extractor_hash.clone(),
        )
    }
}

fn pending_file(result: &PendingResult) -> String {
    match result {
        PendingResult::Ok(r) => r.file.clone(),
        PendingResult::Failed { file, .. } => file.clone(),
    }
}

fn build_batch(results: &[PendingResult]) -> Batch {
    Batch {
        operations: build_operations(results),
    }
}

fn build_operations(results: &[PendingResult]) -> Vec<Operation> {
    let mut ops = Vec::with_capacity(results.len() * 2);
    for result in results {
        match result {
            PendingResult::Ok(r) => {
                ops.push(Operation {
                    statement: "update-hash",
                    params: vec![
                        ("~parent", Param::Text(r.file.clone())),
                        ("~hash", Param::Text(r.extractor_hash.clone())),
                    ],
                });
                ops.push(Operation {
                    statement: "insert-resource",
                    params: vec![
                        ("~file", Param::Text(r.file.clone())),
                        ("~graph", Param::Text(r.graph.clone())),
                        ("~triples", Param::Triples(r.resource.flatten_triples())),
                    ],
                });
            }
            PendingResult::Failed { file, hash, .. } => {
                ops.push(Operation {
                    statement: "update-hash",
                    params: vec![
                        ("~parent", Param::Text(file.clone())),
                        ("~hash", Param::Text(hash.clone())),
                    ],
                });
            }
        }
    }
    ops
}

fn quarantine_batch(file: &str, hash: &str) -> Batch {
    Batch {
        operations: vec![Operation {
            statement: "update-hash",
            params: vec![
                ("~parent", Param::Text(file.to_string())),
                ("~hash", Param::Text(hash.to_string())),
            ],
        }],
    }
}

fn delete_file_batch(file: &str) -> Batch {
    Batch {
        operations: vec![Operation {
            statement: "delete-file",
            params: vec![("~file", Param::Text(file.to_string()))],
        }],
    }
}

pub type SharedScheduler = Arc<Mutex<DecoratorScheduler>>;
