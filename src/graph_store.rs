//! The graph store boundary (spec §1, §6): a SPARQL-style query/update
//! endpoint, treated here purely as an external collaborator. Only the
//! trait contract matters to this crate; concrete backends (an embedded
//! SQLite reference store for tests and the bundled daemon, or a real
//! SPARQL endpoint) live in `extract-sql`.

use crate::types::ExtractItem;
use async_trait::async_trait;
use std::collections::HashMap;

/// One bound parameter of a prepared statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Param {
    Text(String),
    Int(i64),
    /// A resource's flattened `(predicate, object)` triples, as produced
    /// by [`crate::types::Resource::flatten_triples`], carried whole
    /// rather than split across positional params since `insert-resource`
    /// writes one row per triple.
    Triples(Vec<(String, String)>),
}

/// A single `(prepared-statement, parameter-bindings)` pair, the unit a
/// [`Batch`] is built from (spec §6).
#[derive(Debug, Clone)]
pub struct Operation {
    pub statement: &'static str,
    pub params: Vec<(&'static str, Param)>,
}

/// An ordered, atomic set of prepared-statement executions (spec §3,
/// "Commit Buffer"; spec §6, "Batches").
#[derive(Debug, Clone, Default)]
pub struct Batch {
    pub operations: Vec<Operation>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: Operation) {
        self.operations.push(op);
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }
}

/// A row returned by `get-items`, before it is wrapped into an
/// [`ExtractItem`] (the store returns raw rows; the Decorator Queue owns
/// the conversion so the store stays storage-shaped).
pub type ItemRow = ExtractItem;

/// Kind of change a notification describes (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Create,
    Update,
    Delete,
}

/// One graph-change notification (spec §6: "a stream of events
/// `{graph, type, resource-id}`").
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub graph: String,
    pub kind: ChangeKind,
    pub resource_id: i64,
}

/// The graph store contract the Decorator Queue and Scheduler consume.
///
/// Implementations must be safe to call concurrently from any context
/// (spec §5: "graph connection... internally thread-safe"); the scheduler
/// context itself never holds more than one call in flight at a time, but
/// the trait does not assume that of its callers.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Scalar count of items matching "lives in a recognized graph AND
    /// lacks the *current* extractor-hash property for its mime type",
    /// honoring the priority-binding protocol (spec §4.4.A): when
    /// `prioritize` is true, graphs named in `priority_graphs` get an
    /// unbounded limit and all others get zero; when false, the mirrored
    /// binding is used.
    ///
    /// `current_hashes` is the Registry's live mime-type → extractor-hash
    /// map (spec §4.1: "a future handler upgrade will cause
    /// re-extraction"). An item is pending if it has no stored hash at
    /// all, OR its stored hash no longer matches the hash currently
    /// registered for its mime type — not merely "hash is absent".
    async fn count_unextracted(
        &self,
        recognized_graphs: &[String],
        priority_graphs: &[String],
        prioritize: bool,
        current_hashes: &HashMap<String, String>,
    ) -> anyhow::Result<u64>;

    /// The same set as `count_unextracted`, returned as rows, ordered by
    /// internal id, bounded by `limit`.
    async fn fetch_batch(
        &self,
        recognized_graphs: &[String],
        priority_graphs: &[String],
        prioritize: bool,
        limit: u32,
        current_hashes: &HashMap<String, String>,
    ) -> anyhow::Result<Vec<ItemRow>>;

    /// Execute an atomic batch of operations. Either every operation in
    /// the batch lands, or none do (spec §5's per-file atomicity
    /// guarantee generalizes to "per batch" at this boundary).
    async fn execute_batch(&self, batch: Batch) -> anyhow::Result<()>;

    /// Look up a single item's current mime type, if it can still be
    /// resolved. Used by retry-synchronously (spec §4.5.A) to decide
    /// between the update-hash and delete-file companion batches.
    async fn resolve_mime(&self, file: &str) -> anyhow::Result<Option<String>>;

    /// Subscribe to the graph's change-notification stream (spec §6).
    /// Not ordered with respect to extraction (spec §5).
    fn subscribe(&self) -> tokio::sync::broadcast::Receiver<ChangeEvent>;

    /// `subscribe()` adapted into a real `Stream` (via
    /// `tokio_stream::wrappers::BroadcastStream`), for callers that want
    /// to `.next()` the notification stream rather than poll `recv()`
    /// directly — e.g. merging it with other streams via `StreamExt`.
    /// Lagged notifications surface as `Err` items rather than being
    /// silently retried; use [`filter_lagged`] to drop them the way
    /// `bins/extractd` does.
    fn change_stream(&self) -> tokio_stream::wrappers::BroadcastStream<ChangeEvent> {
        tokio_stream::wrappers::BroadcastStream::new(self.subscribe())
    }
}

/// Filters a [`BroadcastStream`](tokio_stream::wrappers::BroadcastStream)
/// of [`ChangeEvent`]s down to the `Ok` items, silently dropping `Lagged`
/// errors (see [`GraphStore::change_stream`]).
pub fn filter_lagged(
    stream: tokio_stream::wrappers::BroadcastStream<ChangeEvent>,
) -> impl tokio_stream::Stream<Item = ChangeEvent> {
    use tokio_stream::StreamExt;
    stream.filter_map(|item| item.ok())
}

/// Whether an item with `mime_type` and `stored_hash` still needs
/// extraction, given the Registry's current per-mime hashes (spec §4.1).
/// Shared by every `GraphStore` implementation so "pending" means the
/// same thing everywhere: no stored hash at all, or a stored hash that a
/// handler upgrade has since made stale. A mime type the Registry no
/// longer has an entry for is treated as pending only if it has never
/// been hashed, matching the pre-fix presence-only behavior for mimes
/// with no registered extractor.
pub fn is_pending(mime_type: &str, stored_hash: Option<&str>, current_hashes: &HashMap<String, String>) -> bool {
    match (stored_hash, current_hashes.get(mime_type)) {
        (None, _) => true,
        (Some(_), None) => false,
        (Some(stored), Some(expected)) => stored != expected,
    }
}
