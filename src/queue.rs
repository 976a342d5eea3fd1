//! Decorator Queue (spec §4.4): a lazy stream of [`ExtractItem`]s ordered
//! by the graph's priority policy, invalidated and rebuilt on graph
//! change.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crate::graph_store::GraphStore;
use crate::registry::ExtractorRegistry;
use crate::types::ExtractItem;

const FETCH_PAGE_SIZE: u32 = 256;

/// Graphs the Decorator recognizes as containing extractable items, and
/// the subset of those to serve first.
#[derive(Debug, Clone, Default)]
pub struct QueuePolicy {
    pub recognized_graphs: Vec<String>,
    pub priority_graphs: Vec<String>,
}

/// The queue's cursor state: a prefetched page of rows plus the one-ahead
/// `next_item` the scheduler always keeps ready (spec §3 invariant:
/// "exactly one 'next' item is prefetched when a cursor exists").
pub struct DecoratorQueue {
    store: Arc<dyn GraphStore>,
    registry: Arc<ExtractorRegistry>,
    policy: QueuePolicy,
    /// Whether the current/most recent rebuild is still serving
    /// prioritized graphs (spec §4.4.A).
    prioritizing: bool,
    page: VecDeque<ExtractItem>,
    next_item: Option<ExtractItem>,
    current_item: Option<ExtractItem>,
    exhausted: bool,
}

impl DecoratorQueue {
    pub fn new(store: Arc<dyn GraphStore>, registry: Arc<ExtractorRegistry>, policy: QueuePolicy) -> Self {
        let prioritizing = !policy.priority_graphs.is_empty();
        Self {
            store,
            registry,
            policy,
            prioritizing,
            page: VecDeque::new(),
            next_item: None,
            current_item: None,
            exhausted: true,
        }
    }

    /// The Registry's current per-mime hashes, recomputed on every call
    /// since the Registry is a cheap immutable map (spec §4.1, §5:
    /// "immutable after init; free to read from any context").
    fn current_hashes(&self) -> HashMap<String, String> {
        self.registry.current_hashes()
    }

    pub fn set_priority_graphs(&mut self, graphs: Vec<String>) {
        self.policy.priority_graphs = graphs;
    }

    pub fn current_item(&self) -> Option<&ExtractItem> {
        self.current_item.as_ref()
    }

    pub fn next_item(&self) -> Option<&ExtractItem> {
        self.next_item.as_ref()
    }

    pub fn has_work(&self) -> bool {
        self.next_item.is_some()
    }

    /// Total pending count across both priority passes, honoring §4.4.A:
    /// count prioritized graphs first; if that's zero, count the rest.
    pub async fn count_remaining(&self) -> anyhow::Result<u64> {
        let current_hashes = self.current_hashes();
        let prioritized = self
            .store
            .count_unextracted(
                &self.policy.recognized_graphs,
                &self.policy.priority_graphs,
                true,
                &current_hashes,
            )
            .await?;
        if prioritized > 0 {
            return Ok(prioritized);
        }
        self.store
            .count_unextracted(
                &self.policy.recognized_graphs,
                &self.policy.priority_graphs,
                false,
                &current_hashes,
            )
            .await
    }

    /// Build: issue the count query; if zero, the stream is finished.
    /// Otherwise open the cursor and prefetch `next_item` (spec §4.4
    /// "Stream lifecycle: Build").
    pub async fn rebuild(&mut self) -> anyhow::Result<bool> {
        self.page.clear();
        self.next_item = None;
        self.current_item = None;
        self.exhausted = false;

        self.prioritizing = !self.policy.priority_graphs.is_empty()
            && self
                .store
                .count_unextracted(
                    &self.policy.recognized_graphs,
                    &self.policy.priority_graphs,
                    true,
                    &self.current_hashes(),
                )
                .await?
                > 0;

        self.fill_page().await?;
        self.next_item = self.page.pop_front();
        if self.next_item.is_none() {
            self.exhausted = true;
        }
        Ok(self.next_item.is_some())
    }

    async fn fill_page(&mut self) -> anyhow::Result<()> {
        if !self.page.is_empty() || self.exhausted {
            return Ok(());
        }
        let current_hashes = self.current_hashes();
        let rows = self
            .store
            .fetch_batch(
                &self.policy.recognized_graphs,
                &self.policy.priority_graphs,
                self.prioritizing,
                FETCH_PAGE_SIZE,
                &current_hashes,
            )
            .await?;
        if rows.is_empty() {
            if self.prioritizing {
                // Priority pass exhausted; fall through to the mirrored
                // binding per spec §4.4.A.
                self.prioritizing = false;
                let rows = self
                    .store
                    .fetch_batch(
                        &self.policy.recognized_graphs,
                        &self.policy.priority_graphs,
                        false,
                        FETCH_PAGE_SIZE,
                        &current_hashes,
                    )
                    .await?;
                if rows.is_empty() {
                    self.exhausted = true;
                } else {
                    self.page.extend(rows);
                }
            } else {
                self.exhausted = true;
            }
        } else {
            self.page.extend(rows);
        }
        Ok(())
    }

    /// Advance: move `next_item -> current_item`, fetch the following row
    /// into `next_item`. When the cursor drains, the stream closes (spec
    /// §4.4 "Stream lifecycle: Advance").
    pub async fn advance(&mut self) -> anyhow::Result<()> {
        self.current_item = self.next_item.take();
        self.fill_page().await?;
        self.next_item = self.page.pop_front();
        Ok(())
    }

    /// Invalidate: release the cursor, clear `next_item`, and mark the
    /// queue so the scheduler knows a rebuild is due (spec §4.4 "Stream
    /// lifecycle: Invalidate").
    pub fn invalidate(&mut self) {
        self.page.clear();
        self.next_item = None;
        self.current_item = None;
        self.exhausted = true;
    }
}
