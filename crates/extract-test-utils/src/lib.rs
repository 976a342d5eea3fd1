//! In-memory [`GraphStore`] test double and scenario builders for the
//! integration tests in `tests/scenarios.rs`, following the teacher's
//! practice of keeping test infrastructure in its own crate rather than
//! behind `#[cfg(test)]` in the library crates that consume it.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::{broadcast, Mutex};

use extract_core::controller::ErrorReportStore;
use extract_core::graph_store::{is_pending, Batch, ChangeEvent, ChangeKind, GraphStore, ItemRow};
use extract_core::types::ExtractItem;

const CHANGE_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct StoredItem {
    pub id: i64,
    pub url: String,
    pub content_id: String,
    /// Empty string simulates a mime type that can no longer be resolved
    /// (spec's S7 scenario: "mime disappears before retry-synchronously").
    pub mime_type: String,
    pub graph: String,
    pub extractor_hash: Option<String>,
}

struct Inner {
    items: Vec<StoredItem>,
    next_id: i64,
    fail_batches_remaining: usize,
    /// File URL -> `(predicate, object)` triples committed via
    /// `insert-resource`, mirroring the `extract-sql` backend's
    /// `resources` table.
    resources: HashMap<String, Vec<(String, String)>>,
}

/// A `GraphStore` backed by a `Vec` behind a `tokio::sync::Mutex`, with a
/// failure-injection knob for exercising retry-synchronously (spec
/// §4.5.A) deterministically.
pub struct InMemoryGraphStore {
    inner: Mutex<Inner>,
    changes: broadcast::Sender<ChangeEvent>,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: Vec::new(),
                next_id: 1,
                fail_batches_remaining: 0,
                resources: HashMap::new(),
            }),
            changes: broadcast::channel(CHANGE_CHANNEL_CAPACITY).0,
        }
    }

    pub async fn insert(&self, url: &str, content_id: &str, mime_type: &str, graph: &str) -> i64 {
        let mut inner = self.inner.lock().await;
        let id = inner.next_id;
        inner.next_id += 1;
        inner.items.push(StoredItem {
            id,
            url: url.to_string(),
            content_id: content_id.to_string(),
            mime_type: mime_type.to_string(),
            graph: graph.to_string(),
            extractor_hash: None,
        });
        let _ = self.changes.send(ChangeEvent {
            graph: graph.to_string(),
            kind: ChangeKind::Create,
            resource_id: id,
        });
        id
    }

    pub async fn delete(&self, url: &str) {
        let mut inner = self.inner.lock().await;
        if let Some(pos) = inner.items.iter().position(|i| i.url == url) {
            let removed = inner.items.remove(pos);
            inner.resources.remove(url);
            let _ = self.changes.send(ChangeEvent {
                graph: removed.graph,
                kind: ChangeKind::Delete,
                resource_id: removed.id,
            });
        }
    }

    /// Simulates the mime type becoming unresolvable for `url` without
    /// removing the item outright (spec S7).
    pub async fn clear_mime(&self, url: &str) {
        let mut inner = self.inner.lock().await;
        if let Some(item) = inner.items.iter_mut().find(|i| i.url == url) {
            item.mime_type.clear();
        }
    }

    /// The next `n` calls to `execute_batch` fail, to drive the
    /// retry-synchronously path deterministically.
    pub async fn fail_next_batches(&self, n: usize) {
        self.inner.lock().await.fail_batches_remaining = n;
    }

    pub async fn snapshot(&self) -> Vec<StoredItem> {
        self.inner.lock().await.items.clone()
    }

    /// The `(predicate, object)` triples committed for `url` via
    /// `insert-resource`, in insertion order.
    pub async fn resource_triples(&self, url: &str) -> Vec<(String, String)> {
        self.inner.lock().await.resources.get(url).cloned().unwrap_or_default()
    }

    pub async fn hash_of(&self, url: &str) -> Option<Option<String>> {
        self.inner
            .lock()
            .await
            .items
            .iter()
            .find(|i| i.url == url)
            .map(|i| i.extractor_hash.clone())
    }

    fn graph_matches(graph: &str, recognized: &[String], priority: &[String], prioritize: bool) -> bool {
        if prioritize {
            priority.iter().any(|g| g == graph)
        } else {
            recognized.iter().any(|g| g == graph) && !priority.iter().any(|g| g == graph)
        }
    }
}

impl Default for InMemoryGraphStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn count_unextracted(
        &self,
        recognized_graphs: &[String],
        priority_graphs: &[String],
        prioritize: bool,
        current_hashes: &HashMap<String, String>,
    ) -> anyhow::Result<u64> {
        let inner = self.inner.lock().await;
        Ok(inner
            .items
            .iter()
            .filter(|i| is_pending(&i.mime_type, i.extractor_hash.as_deref(), current_hashes))
            .filter(|i| Self::graph_matches(&i.graph, recognized_graphs, priority_graphs, prioritize))
            .count() as u64)
    }

    async fn fetch_batch(
        &self,
        recognized_graphs: &[String],
        priority_graphs: &[String],
        prioritize: bool,
        limit: u32,
        current_hashes: &HashMap<String, String>,
    ) -> anyhow::Result<Vec<ItemRow>> {
        let inner = self.inner.lock().await;
        let mut matched: Vec<&StoredItem> = inner
            .items
            .iter()
            .filter(|i| is_pending(&i.mime_type, i.extractor_hash.as_deref(), current_hashes))
            .filter(|i| Self::graph_matches(&i.graph, recognized_graphs, priority_graphs, prioritize))
            .collect();
        matched.sort_by_key(|i| i.id);
        matched.truncate(limit as usize);
        Ok(matched
            .into_iter()
            .map(|i| ExtractItem {
                url: i.url.clone(),
                id: i.id,
                content_id: i.content_id.clone(),
                mime_type: i.mime_type.clone(),
                graph: i.graph.clone(),
            })
            .collect())
    }

    async fn execute_batch(&self, batch: Batch) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.fail_batches_remaining > 0 {
            inner.fail_batches_remaining -= 1;
            anyhow::bail!("injected batch failure");
        }
        for op in &batch.operations {
            match op.statement {
                "update-hash" => {
                    let (file, hash) = text_params(&op.params);
                    if let Some(item) = inner.items.iter_mut().find(|i| i.url == file) {
                        item.extractor_hash = Some(hash.to_string());
                    }
                }
                "delete-file" => {
                    let file = text_param(&op.params, "~file");
                    inner.items.retain(|i| i.url != file);
                }
                "insert-resource" => {
                    let file = text_param(&op.params, "~file");
                    let triples = triples_param(&op.params, "~triples");
                    inner.resources.insert(file.to_string(), triples.to_vec());
                }
                other => anyhow::bail!("unrecognized batch statement: {other}"),
            }
        }
        Ok(())
    }

    async fn resolve_mime(&self, file: &str) -> anyhow::Result<Option<String>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .items
            .iter()
            .find(|i| i.url == file)
            .and_then(|i| (!i.mime_type.is_empty()).then(|| i.mime_type.clone())))
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }
}

fn text_params<'a>(params: &'a [(&'static str, extract_core::graph_store::Param)]) -> (&'a str, &'a str) {
    let mut values = params.iter().filter_map(|(_, v)| match v {
        extract_core::graph_store::Param::Text(s) => Some(s.as_str()),
        extract_core::graph_store::Param::Int(_) | extract_core::graph_store::Param::Triples(_) => None,
    });
    (values.next().unwrap_or_default(), values.next().unwrap_or_default())
}

fn text_param<'a>(params: &'a [(&'static str, extract_core::graph_store::Param)], name: &str) -> &'a str {
    params
        .iter()
        .find(|(n, _)| *n == name)
        .and_then(|(_, v)| match v {
            extract_core::graph_store::Param::Text(s) => Some(s.as_str()),
            extract_core::graph_store::Param::Int(_) | extract_core::graph_store::Param::Triples(_) => None,
        })
        .unwrap_or_default()
}

fn triples_param<'a>(
    params: &'a [(&'static str, extract_core::graph_store::Param)],
    name: &str,
) -> &'a [(String, String)] {
    params
        .iter()
        .find(|(n, _)| *n == name)
        .and_then(|(_, v)| match v {
            extract_core::graph_store::Param::Triples(t) => Some(t.as_slice()),
            extract_core::graph_store::Param::Text(_) | extract_core::graph_store::Param::Int(_) => None,
        })
        .unwrap_or_default()
}

/// An `ErrorReportStore` that records every call instead of persisting
/// anything, so tests can assert on quarantine/unquarantine behavior
/// (spec §4.6.A) without a real database.
#[derive(Default)]
pub struct RecordingErrorReportStore {
    entries: Mutex<Vec<(String, String, Option<String>)>>,
}

impl RecordingErrorReportStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Files currently recorded as quarantined (inserted but not deleted).
    pub async fn quarantined_files(&self) -> Vec<String> {
        self.entries.lock().await.iter().map(|(f, _, _)| f.clone()).collect()
    }
}

#[async_trait]
impl ErrorReportStore for RecordingErrorReportStore {
    async fn insert(&self, file: &str, message: &str, extra: Option<&str>) -> anyhow::Result<()> {
        let mut entries = self.entries.lock().await;
        entries.retain(|(f, _, _)| f != file);
        entries.push((file.to_string(), message.to_string(), extra.map(str::to_string)));
        Ok(())
    }

    async fn delete(&self, file: &str) -> anyhow::Result<()> {
        self.entries.lock().await.retain(|(f, _, _)| f != file);
        Ok(())
    }
}

/// Pre-built scenario stores for the named suite in the spec (S1-S7); kept
/// here so each test only needs to assert behavior, not reconstruct the
/// graph shape.
pub mod scenarios {
    use super::InMemoryGraphStore;

    /// S1: three items, one recognized graph, one mime type.
    pub async fn happy_path() -> InMemoryGraphStore {
        let store = InMemoryGraphStore::new();
        store.insert("file:///a.txt", "c1", "text/plain", "documents").await;
        store.insert("file:///b.txt", "c2", "text/plain", "documents").await;
        store.insert("file:///c.txt", "c3", "text/plain", "documents").await;
        store
    }

    /// A mix of two graphs, used to exercise priority-binding (spec §4.4.A).
    pub async fn two_graphs_one_priority() -> InMemoryGraphStore {
        let store = InMemoryGraphStore::new();
        store.insert("file:///a.txt", "c1", "text/plain", "documents").await;
        store.insert("file:///b.jpg", "c2", "image/jpeg", "pictures").await;
        store.insert("file:///c.jpg", "c3", "image/jpeg", "pictures").await;
        store
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_then_count_then_fetch() {
        let store = InMemoryGraphStore::new();
        store.insert("file:///a.txt", "c1", "text/plain", "documents").await;

        let count = store
            .count_unextracted(&["documents".to_string()], &[], false, &HashMap::new())
            .await
            .unwrap();
        assert_eq!(count, 1);

        let rows = store
            .fetch_batch(&["documents".to_string()], &[], false, 10, &HashMap::new())
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].url, "file:///a.txt");
    }

    #[tokio::test]
    async fn injected_failure_surfaces_then_clears() {
        let store = InMemoryGraphStore::new();
        store.fail_next_batches(1).await;

        let batch = Batch::new();
        assert!(store.execute_batch(batch.clone()).await.is_err());
        assert!(store.execute_batch(batch).await.is_ok());
    }

    #[tokio::test]
    async fn clear_mime_makes_resolve_mime_return_none() {
        let store = InMemoryGraphStore::new();
        store.insert("file:///a.txt", "c1", "text/plain", "documents").await;
        store.clear_mime("file:///a.txt").await;

        let mime = store.resolve_mime("file:///a.txt").await.unwrap();
        assert_eq!(mime, None);
    }

    #[tokio::test]
    async fn happy_path_scenario_has_three_pending_items() {
        let store = scenarios::happy_path().await;
        let count = store
            .count_unextracted(&["documents".to_string()], &[], false, &HashMap::new())
            .await
            .unwrap();
        assert_eq!(count, 3);
    }
}
