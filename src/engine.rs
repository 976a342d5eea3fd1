//! Extraction Engine (spec §4.2): per-file dispatch under a hard deadline.
//!
//! The handler runs on a dedicated worker thread with its own
//! single-threaded `tokio` runtime (spec §5: "dedicated worker thread...
//! calling thread must not block"), so a wedged handler cannot starve the
//! scheduler context's executor. The deadline races the handler's result
//! via `tokio::select!`; firing it calls `std::process::exit` directly,
//! per spec §9's "deadline-as-process-exit... do not attempt graceful
//! shutdown" note — that IS the recovery mechanism, the supervisor
//! restarts and reads the Persistence Slot (spec §4.3).

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tokio::sync::{oneshot, Mutex};
use tokio_util::sync::CancellationToken;

use crate::error::ExtractError;
use crate::hints::FileHinting;
use crate::persistence::PersistenceSlot;
use crate::registry::ExtractorRegistry;
use crate::stats::ExtractorStats;
use crate::types::{ExtractItem, ExtractResult, Resource, Value};

type JobFuture = Pin<Box<dyn Future<Output = Result<Resource, ExtractError>> + Send>>;

struct Job {
    future: JobFuture,
    respond_to: oneshot::Sender<Result<Resource, ExtractError>>,
}

/// The dedicated worker thread handlers run on.
struct WorkerHandle {
    tx: tokio::sync::mpsc::UnboundedSender<Job>,
    _thread: JoinHandle<()>,
}

impl WorkerHandle {
    fn spawn() -> Self {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<Job>();
        let thread = std::thread::Builder::new()
            .name("extract-worker".into())
            .spawn(move || {
                let rt = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .expect("build extraction worker runtime");
                rt.block_on(async move {
                    while let Some(job) = rx.recv().await {
                        let Job { future, respond_to } = job;
                        let result = future.await;
                        let _ = respond_to.send(result);
                    }
                });
            })
            .expect("spawn extraction worker thread");
        Self {
            tx,
            _thread: thread,
        }
    }

    fn submit(&self, future: JobFuture) -> oneshot::Receiver<Result<Resource, ExtractError>> {
        let (respond_to, rx) = oneshot::channel();
        // Send failure means the worker thread died; the receiver will
        // simply observe a closed channel, which `extract` maps to a
        // `Handler` error rather than panicking the scheduler context.
        let _ = self.tx.send(Job {
            future,
            respond_to,
        });
        rx
    }
}

pub struct ExtractionEngine {
    registry: Arc<ExtractorRegistry>,
    persistence: Arc<Mutex<PersistenceSlot>>,
    hints: Arc<dyn FileHinting>,
    stats: Arc<Mutex<ExtractorStats>>,
    worker: WorkerHandle,
    default_deadline: Duration,
    deadline_disabled: bool,
    max_text_bytes: usize,
}

impl ExtractionEngine {
    pub fn new(
        registry: Arc<ExtractorRegistry>,
        persistence: Arc<Mutex<PersistenceSlot>>,
        hints: Arc<dyn FileHinting>,
        default_deadline: Duration,
        deadline_disabled: bool,
        max_text_bytes: usize,
    ) -> Self {
        Self {
            registry,
            persistence,
            hints,
            stats: Arc::new(Mutex::new(ExtractorStats::new())),
            worker: WorkerHandle::spawn(),
            default_deadline,
            deadline_disabled,
            max_text_bytes,
        }
    }

    pub fn stats(&self) -> Arc<Mutex<ExtractorStats>> {
        self.stats.clone()
    }

    /// The Registry's current versioned hash for `mime_type`, if a
    /// handler is registered for it (spec §4.1). Used by the Decorator
    /// Scheduler to quarantine a failed or crashed file with its real
    /// per-mime hash rather than a placeholder, so `update-hash`
    /// continues to mean what the Registry currently says it means.
    pub fn hash_for_mime(&self, mime_type: &str) -> Option<String> {
        self.registry.lookup(mime_type).map(|entry| entry.extractor_hash.clone())
    }

    /// Readahead hint issued when an item is queued as "next" (spec §4.2
    /// step 1), before it becomes current.
    pub fn advise_next(&self, url: &str) {
        self.hints.advise_will_need(url);
    }

    /// Dispatch one item. `cancel` is owned by the caller (the Decorator
    /// Scheduler), which triggers it on pause/stop (spec §5).
    pub async fn extract(
        &self,
        item: &ExtractItem,
        cancel: CancellationToken,
    ) -> Result<ExtractResult, ExtractError> {
        if item.mime_type.is_empty() {
            return Err(ExtractError::NoMimeType);
        }
        if !item.url.starts_with("file://") {
            return Err(ExtractError::InvalidFile(item.url.clone()));
        }
        let entry = self
            .registry
            .lookup(&item.mime_type)
            .ok_or_else(|| ExtractError::NoExtractor(item.mime_type.clone()))?
            .clone();

        {
            let mut slot = self.persistence.lock().await;
            if let Err(e) = slot.mark_current(&item.url) {
                tracing::warn!(
                    target: "extract_core::engine",
                    error = %e,
                    "failed to write persistence slot before dispatch"
                );
            }
        }

        let handler = entry.handler.clone();
        let url = item.url.clone();
        let content_id = item.content_id.clone();
        let max_text_bytes = self.max_text_bytes;
        let job_cancel = cancel.clone();

        let future: JobFuture = Box::pin(async move {
            handler
                .extract(&url, &content_id, max_text_bytes, job_cancel)
                .await
        });

        let result_rx = self.worker.submit(future);
        let deadline = entry.deadline.unwrap_or(self.default_deadline);
        let started = Instant::now();

        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                self.finish_slot().await;
                return Err(ExtractError::Cancelled);
            }
            () = sleep_unless_disabled(deadline, self.deadline_disabled) => {
                tracing::error!(
                    target: "extract_core::engine",
                    file = %item.url,
                    mime = %item.mime_type,
                    deadline_secs = deadline.as_secs(),
                    "handler exceeded its deadline; aborting process so the supervisor can quarantine it on restart"
                );
                std::process::exit(1);
            }
            result = result_rx => result,
        };

        self.finish_slot().await;
        self.hints.advise_dont_need(&item.url);

        let handler_result = match outcome {
            Ok(inner) => inner,
            Err(_recv_error) => Err(ExtractError::Handler(
                "extraction worker channel closed before returning a result".to_string(),
            )),
        };

        let elapsed = started.elapsed();
        {
            let mut stats = self.stats.lock().await;
            stats.record(&item.mime_type, elapsed, handler_result.is_ok());
        }

        let resource = handler_result?;
        Ok(self.finalize_result(item, &entry, resource))
    }

    async fn finish_slot(&self) {
        let mut slot = self.persistence.lock().await;
        if let Err(e) = slot.clear() {
            tracing::warn!(target: "extract_core::engine", error = %e, "failed to clear persistence slot");
        }
    }

    /// Ensures the registry-mandated type URIs and the stored-as relation
    /// are present (spec §3 invariant on `ExtractResult::resource`; spec
    /// §4.2 step 5b).
    fn finalize_result(
        &self,
        item: &ExtractItem,
        entry: &crate::registry::RegistryEntry,
        mut resource: Resource,
    ) -> ExtractResult {
        for required_type in &entry.advertised_types {
            if !resource.rdf_types.contains(required_type) {
                resource.rdf_types.push(required_type.clone());
            }
        }
        let already_stored = resource
            .properties
            .get("nie:isStoredAs")
            .is_some_and(|values| {
                values.iter().any(|v| matches!(v, Value::Resource(_)))
            });
        if !already_stored {
            let file_data_object = Resource::new(format!("urn:file-data-object:{}", item.content_id))
                .with_type("nfo:FileDataObject")
                .with_literal("nie:url", item.url.clone());
            resource = resource.with_resource("nie:isStoredAs", file_data_object);
        }

        ExtractResult {
            file: item.url.clone(),
            mime_type: item.mime_type.clone(),
            graph: entry.graph.clone(),
            resource,
            max_text_bytes: self.max_text_bytes,
            extractor_hash: entry.extractor_hash.clone(),
        }
    }
}

async fn sleep_unless_disabled(deadline: Duration, disabled: bool) {
    if disabled {
        std::future::pending::<()>().await;
    } else {
        tokio::time::sleep(deadline).await;
    }
}
