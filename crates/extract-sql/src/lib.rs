//! SQLite-backed [`GraphStore`] reference implementation, plus a thin
//! loader for the SPARQL-style `.rq` templates documenting the same
//! queries against a real triple store.
//!
//! Follows the teacher's `EngineDb` construction style: `sqlx`
//! `SqliteConnectOptions` with `create_if_missing`, a pooled connection,
//! PRAGMAs applied up front, and an embedded schema executed
//! statement-by-statement on first connect.

use std::collections::HashMap;
use std::str::FromStr;

use anyhow::{Context, Result};
use async_trait::async_trait;
use itertools::Itertools;
use sqlx::{sqlite::SqliteConnectOptions, sqlite::SqlitePoolOptions, Pool, Row, Sqlite};
use tokio::sync::broadcast;

use extract_core::controller::ErrorReportStore;
use extract_core::graph_store::{Batch, ChangeEvent, ChangeKind, GraphStore, ItemRow, Operation, Param};
use extract_core::types::ExtractItem;

const SCHEMA_SQL: &str = include_str!("../schema.sql");

const CHANGE_CHANNEL_CAPACITY: usize = 1024;

/// An embedded SQLite store implementing the `GraphStore` boundary, used
/// by the bundled daemon and by integration tests that need real
/// persistence rather than an in-memory test double.
pub struct SqliteGraphStore {
    pool: Pool<Sqlite>,
    changes: broadcast::Sender<ChangeEvent>,
}

impl SqliteGraphStore {
    /// `path` follows `sqlx`'s connection-string rules; `:memory:` and
    /// `sqlite::memory:` both work, matching the teacher's `EngineDbConfig`.
    pub async fn new(path: &str) -> Result<Self> {
        let is_memory = path == ":memory:" || path == "sqlite::memory:";
        if !is_memory {
            if let Some(parent) = std::path::Path::new(path).parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .context(format!("failed to create directory: {}", parent.display()))?;
            }
        }

        tracing::debug!(target: "extract_sql::store", path, "connecting to graph store");

        let opts = SqliteConnectOptions::from_str(path)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(opts)
            .await
            .context("failed to connect to graph store")?;

        let store = Self {
            pool,
            changes: broadcast::channel(CHANGE_CHANNEL_CAPACITY).0,
        };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        self.apply_pragmas().await?;
        self.load_schema().await?;
        tracing::info!(target: "extract_sql::store", "graph store schema initialized");
        Ok(())
    }

    async fn apply_pragmas(&self) -> Result<()> {
        sqlx::query("PRAGMA journal_mode=WAL")
            .execute(&self.pool)
            .await?;
        sqlx::query("PRAGMA synchronous=NORMAL")
            .execute(&self.pool)
            .await?;
        sqlx::query("PRAGMA foreign_keys=ON")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn load_schema(&self) -> Result<()> {
        for statement in SCHEMA_SQL.split(';') {
            let clean: String = statement
                .lines()
                .filter(|line| {
                    let trimmed = line.trim();
                    !trimmed.is_empty() && !trimmed.starts_with("--")
                })
                .collect::<Vec<_>>()
                .join("\n");
            if clean.trim().is_empty() {
                continue;
            }
            sqlx::query(&clean)
                .execute(&self.pool)
                .await
                .context(format!("failed to execute schema statement: {clean}"))?;
        }
        Ok(())
    }

    /// Test/seed helper: insert a pending item and notify subscribers of
    /// its creation, mirroring what a real SPARQL store's change feed
    /// would emit on a fresh insert into a recognized graph.
    pub async fn insert_item(
        &self,
        url: &str,
        content_id: &str,
        mime_type: &str,
        graph_name: &str,
    ) -> Result<i64> {
        let row = sqlx::query(
            "INSERT INTO items (url, content_id, mime_type, graph_name, extractor_hash) \
             VALUES (?, ?, ?, ?, NULL) RETURNING id",
        )
        .bind(url)
        .bind(content_id)
        .bind(mime_type)
        .bind(graph_name)
        .fetch_one(&self.pool)
        .await?;
        let id: i64 = row.get(0);
        let _ = self.changes.send(ChangeEvent {
            graph: graph_name.to_string(),
            kind: ChangeKind::Create,
            resource_id: id,
        });
        Ok(id)
    }

    /// Test/seed helper: remove an item and notify subscribers.
    pub async fn delete_item(&self, url: &str) -> Result<()> {
        let row = sqlx::query("SELECT id, graph_name FROM items WHERE url = ?")
            .bind(url)
            .fetch_optional(&self.pool)
            .await?;
        sqlx::query("DELETE FROM items WHERE url = ?")
            .bind(url)
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM resources WHERE file_url = ?")
            .bind(url)
            .execute(&self.pool)
            .await?;
        if let Some(row) = row {
            let id: i64 = row.get(0);
            let graph: String = row.get(1);
            let _ = self.changes.send(ChangeEvent {
                graph,
                kind: ChangeKind::Delete,
                resource_id: id,
            });
        }
        Ok(())
    }

    /// Test helper: the `(predicate, object)` triples committed for a
    /// file via `insert-resource`, in insertion order.
    pub async fn resource_triples(&self, url: &str) -> Result<Vec<(String, String)>> {
        let rows = sqlx::query("SELECT predicate, object FROM resources WHERE file_url = ? ORDER BY rowid")
            .bind(url)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|row| (row.get(0), row.get(1))).collect())
    }

    /// Flattens the Registry's mime → hash map into the same "pending"
    /// predicate `graph_store::is_pending` describes (spec §4.1): no
    /// stored hash at all, or a stored hash that no longer matches the
    /// hash currently registered for the item's mime type. Mime types
    /// absent from `current_hashes` fall back to the presence-only
    /// check, since there is no "current" value to compare against.
    fn hash_filter_sql(current_hashes: &HashMap<String, String>) -> (String, Vec<String>) {
        if current_hashes.is_empty() {
            return ("extractor_hash IS NULL".to_string(), Vec::new());
        }
        let mut clauses = Vec::with_capacity(current_hashes.len() + 1);
        let mut binds = Vec::with_capacity(current_hashes.len() * 2);
        let mut known_mimes = Vec::with_capacity(current_hashes.len());
        for (mime, hash) in current_hashes {
            clauses.push("(mime_type = ? AND (extractor_hash IS NULL OR extractor_hash <> ?))".to_string());
            binds.push(mime.clone());
            binds.push(hash.clone());
            known_mimes.push(mime.clone());
        }
        let known_placeholders = std::iter::repeat("?").take(known_mimes.len()).join(", ");
        clauses.push(format!("(mime_type NOT IN ({known_placeholders}) AND extractor_hash IS NULL)"));
        binds.extend(known_mimes);
        (format!("({})", clauses.join(" OR ")), binds)
    }

    fn graph_filter_sql(recognized: &[String], priority: &[String], prioritize: bool) -> (String, Vec<String>) {
        if prioritize {
            if priority.is_empty() {
                // Nothing is prioritized; the priority pass matches nothing.
                return ("graph_name IN ('')".to_string(), Vec::new());
            }
            let placeholders = std::iter::repeat("?").take(priority.len()).join(", ");
            (format!("graph_name IN ({placeholders})"), priority.to_vec())
        } else {
            let recognized_placeholders =
                std::iter::repeat("?").take(recognized.len()).join(", ");
            if priority.is_empty() {
                (format!("graph_name IN ({recognized_placeholders})"), recognized.to_vec())
            } else {
                let priority_placeholders =
                    std::iter::repeat("?").take(priority.len()).join(", ");
                let sql = format!(
                    "graph_name IN ({recognized_placeholders}) AND graph_name NOT IN ({priority_placeholders})"
                );
                let mut binds = recognized.to_vec();
                binds.extend(priority.to_vec());
                (sql, binds)
            }
        }
    }
}

#[async_trait]
impl GraphStore for SqliteGraphStore {
    async fn count_unextracted(
        &self,
        recognized_graphs: &[String],
        priority_graphs: &[String],
        prioritize: bool,
        current_hashes: &HashMap<String, String>,
    ) -> Result<u64> {
        if recognized_graphs.is_empty() && !prioritize {
            return Ok(0);
        }
        let (hash_filter, hash_binds) = Self::hash_filter_sql(current_hashes);
        let (graph_filter, graph_binds) = Self::graph_filter_sql(recognized_graphs, priority_graphs, prioritize);
        let sql = format!("SELECT COUNT(*) FROM items WHERE {hash_filter} AND {graph_filter}");
        let mut query = sqlx::query(&sql);
        for bind in hash_binds.iter().chain(graph_binds.iter()) {
            query = query.bind(bind);
        }
        let row = query.fetch_one(&self.pool).await?;
        let count: i64 = row.get(0);
        Ok(count as u64)
    }

    async fn fetch_batch(
        &self,
        recognized_graphs: &[String],
        priority_graphs: &[String],
        prioritize: bool,
        limit: u32,
        current_hashes: &HashMap<String, String>,
    ) -> Result<Vec<ItemRow>> {
        if recognized_graphs.is_empty() && !prioritize {
            return Ok(Vec::new());
        }
        let (hash_filter, hash_binds) = Self::hash_filter_sql(current_hashes);
        let (graph_filter, graph_binds) = Self::graph_filter_sql(recognized_graphs, priority_graphs, prioritize);
        let sql = format!(
            "SELECT id, url, content_id, mime_type, graph_name FROM items \
             WHERE {hash_filter} AND {graph_filter} ORDER BY id LIMIT ?"
        );
        let mut query = sqlx::query(&sql);
        for bind in hash_binds.iter().chain(graph_binds.iter()) {
            query = query.bind(bind);
        }
        query = query.bind(i64::from(limit));
        let rows = query.fetch_all(&self.pool).await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let id: i64 = row.get(0);
                let url: String = row.get(1);
                let content_id: String = row.get(2);
                let mime_type: String = row.get(3);
                let graph: String = row.get(4);
                ExtractItem {
                    url,
                    id,
                    content_id,
                    mime_type,
                    graph,
                }
            })
            .collect())
    }

    async fn execute_batch(&self, batch: Batch) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for op in &batch.operations {
            match op.statement {
                "update-hash" => {
                    let (file, hash) = extract_params(&op.params)?;
                    sqlx::query("UPDATE items SET extractor_hash = ? WHERE url = ?")
                        .bind(hash)
                        .bind(file)
                        .execute(&mut *tx)
                        .await?;
                }
                "insert-resource" => {
                    let file = single_param(&op.params, "~file")?;
                    for (predicate, object) in triples_param(&op.params, "~triples")? {
                        sqlx::query("INSERT INTO resources (file_url, predicate, object) VALUES (?, ?, ?)")
                            .bind(file)
                            .bind(predicate.as_str())
                            .bind(object.as_str())
                            .execute(&mut *tx)
                            .await?;
                    }
                }
                "delete-file" => {
                    let file = single_param(&op.params, "~file")?;
                    sqlx::query("DELETE FROM items WHERE url = ?")
                        .bind(file)
                        .execute(&mut *tx)
                        .await?;
                    sqlx::query("DELETE FROM resources WHERE file_url = ?")
                        .bind(file)
                        .execute(&mut *tx)
                        .await?;
                }
                other => {
                    anyhow::bail!("unrecognized batch statement: {other}");
                }
            }
        }
        tx.commit().await?;
        Ok(())
    }

    async fn resolve_mime(&self, file: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT mime_type FROM items WHERE url = ?")
            .bind(file)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get(0)))
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }
}

fn extract_params(params: &[(&'static str, Param)]) -> Result<(&str, &str)> {
    let mut first = None;
    let mut second = None;
    for (name, value) in params {
        let Param::Text(text) = value else {
            anyhow::bail!("expected text parameter for `{name}`");
        };
        if first.is_none() {
            first = Some(text.as_str());
        } else {
            second = Some(text.as_str());
        }
    }
    Ok((
        first.ok_or_else(|| anyhow::anyhow!("missing first parameter"))?,
        second.ok_or_else(|| anyhow::anyhow!("missing second parameter"))?,
    ))
}

fn single_param<'a>(params: &'a [(&'static str, Param)], name: &str) -> Result<&'a str> {
    params
        .iter()
        .find(|(n, _)| *n == name)
        .and_then(|(_, v)| match v {
            Param::Text(text) => Some(text.as_str()),
            Param::Int(_) | Param::Triples(_) => None,
        })
        .ok_or_else(|| anyhow::anyhow!("missing parameter `{name}`"))
}

fn triples_param<'a>(params: &'a [(&'static str, Param)], name: &str) -> Result<&'a [(String, String)]> {
    params
        .iter()
        .find(|(n, _)| *n == name)
        .and_then(|(_, v)| match v {
            Param::Triples(triples) => Some(triples.as_slice()),
            Param::Text(_) | Param::Int(_) => None,
        })
        .ok_or_else(|| anyhow::anyhow!("missing parameter `{name}`"))
}

/// Durable backing for the §4.6.A error-report collaborator, sharing the
/// same pool (and so the same file) as a co-located `SqliteGraphStore`.
pub struct SqliteErrorReportStore {
    pool: Pool<Sqlite>,
}

impl SqliteErrorReportStore {
    /// Shares the pool of an already-initialized `SqliteGraphStore` so
    /// both write to the same database file without a second connection
    /// negotiating its own schema migration.
    pub fn sharing(store: &SqliteGraphStore) -> Self {
        Self {
            pool: store.pool.clone(),
        }
    }
}

#[async_trait]
impl ErrorReportStore for SqliteErrorReportStore {
    async fn insert(&self, file: &str, message: &str, extra: Option<&str>) -> Result<()> {
        sqlx::query(
            "INSERT INTO error_reports (file_url, message, extra_json) VALUES (?, ?, ?) \
             ON CONFLICT(file_url) DO UPDATE SET message = excluded.message, extra_json = excluded.extra_json",
        )
        .bind(file)
        .bind(message)
        .bind(extra)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, file: &str) -> Result<()> {
        sqlx::query("DELETE FROM error_reports WHERE file_url = ?")
            .bind(file)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Loads the SPARQL-style `.rq` templates used to document the same
/// queries `SqliteGraphStore` executes in flattened SQL form, keyed by
/// file stem (e.g. `"item-count"`).
pub struct SparqlTemplateStore {
    templates: HashMap<&'static str, &'static str>,
}

impl SparqlTemplateStore {
    pub fn load() -> Self {
        let mut templates = HashMap::new();
        templates.insert("item-count", include_str!("../../../sql/item-count.rq"));
        templates.insert("get-items", include_str!("../../../sql/get-items.rq"));
        templates.insert("update-hash", include_str!("../../../sql/update-hash.rq"));
        templates.insert("delete-file", include_str!("../../../sql/delete-file.rq"));
        Self { templates }
    }

    pub fn get(&self, name: &str) -> Option<&'static str> {
        self.templates.get(name).copied()
    }
}

impl Default for SparqlTemplateStore {
    fn default() -> Self {
        Self::load()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_store() -> SqliteGraphStore {
        SqliteGraphStore::new(":memory:").await.unwrap()
    }

    #[tokio::test]
    async fn fresh_store_has_no_pending_items() {
        let store = memory_store().await;
        let count = store
            .count_unextracted(&["audio".to_string()], &[], false, &HashMap::new())
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn inserted_item_is_counted_and_fetched() {
        let store = memory_store().await;
        store
            .insert_item("file:///a.mp3", "c1", "audio/mpeg", "audio")
            .await
            .unwrap();

        let count = store
            .count_unextracted(&["audio".to_string()], &[], false, &HashMap::new())
            .await
            .unwrap();
        assert_eq!(count, 1);

        let rows = store
            .fetch_batch(&["audio".to_string()], &[], false, 10, &HashMap::new())
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].url, "file:///a.mp3");
    }

    #[tokio::test]
    async fn priority_graph_is_counted_separately() {
        let store = memory_store().await;
        store
            .insert_item("file:///a.mp3", "c1", "audio/mpeg", "audio")
            .await
            .unwrap();
        store
            .insert_item("file:///b.jpg", "c2", "image/jpeg", "pictures")
            .await
            .unwrap();

        let prioritized = store
            .count_unextracted(
                &["audio".to_string(), "pictures".to_string()],
                &["pictures".to_string()],
                true,
                &HashMap::new(),
            )
            .await
            .unwrap();
        assert_eq!(prioritized, 1);

        let rest = store
            .count_unextracted(
                &["audio".to_string(), "pictures".to_string()],
                &["pictures".to_string()],
                false,
                &HashMap::new(),
            )
            .await
            .unwrap();
        assert_eq!(rest, 1);
    }

    #[tokio::test]
    async fn update_hash_then_count_drops_to_zero() {
        let store = memory_store().await;
        store
            .insert_item("file:///a.mp3", "c1", "audio/mpeg", "audio")
            .await
            .unwrap();

        let batch = Batch {
            operations: vec![Operation {
                statement: "update-hash",
                params: vec![
                    ("~parent", Param::Text("file:///a.mp3".to_string())),
                    ("~hash", Param::Text("handler-v1".to_string())),
                ],
            }],
        };
        store.execute_batch(batch).await.unwrap();

        let count = store
            .count_unextracted(&["audio".to_string()], &[], false, &HashMap::new())
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn handler_upgrade_causes_hash_mismatch_to_reappear() {
        let store = memory_store().await;
        store
            .insert_item("file:///a.mp3", "c1", "audio/mpeg", "audio")
            .await
            .unwrap();

        let batch = Batch {
            operations: vec![Operation {
                statement: "update-hash",
                params: vec![
                    ("~parent", Param::Text("file:///a.mp3".to_string())),
                    ("~hash", Param::Text("handler-v1".to_string())),
                ],
            }],
        };
        store.execute_batch(batch).await.unwrap();

        let current = HashMap::from([("audio/mpeg".to_string(), "handler-v1".to_string())]);
        let count = store
            .count_unextracted(&["audio".to_string()], &[], false, &current)
            .await
            .unwrap();
        assert_eq!(count, 0, "stored hash matches the registered handler's current hash");

        let upgraded = HashMap::from([("audio/mpeg".to_string(), "handler-v2".to_string())]);
        let count = store
            .count_unextracted(&["audio".to_string()], &[], false, &upgraded)
            .await
            .unwrap();
        assert_eq!(count, 1, "a handler version bump re-selects the previously processed file");

        let rows = store
            .fetch_batch(&["audio".to_string()], &[], false, 10, &upgraded)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].url, "file:///a.mp3");
    }

    #[tokio::test]
    async fn delete_file_removes_item_entirely() {
        let store = memory_store().await;
        store
            .insert_item("file:///a.mp3", "c1", "audio/mpeg", "audio")
            .await
            .unwrap();

        let batch = Batch {
            operations: vec![Operation {
                statement: "delete-file",
                params: vec![("~file", Param::Text("file:///a.mp3".to_string()))],
            }],
        };
        store.execute_batch(batch).await.unwrap();

        let mime = store.resolve_mime("file:///a.mp3").await.unwrap();
        assert_eq!(mime, None);
    }

    #[tokio::test]
    async fn error_report_insert_then_delete_roundtrips() {
        let store = memory_store().await;
        let reports = SqliteErrorReportStore::sharing(&store);

        reports
            .insert("file:///a.mp3", "handler timed out", None)
            .await
            .unwrap();

        let row = sqlx::query("SELECT message FROM error_reports WHERE file_url = ?")
            .bind("file:///a.mp3")
            .fetch_optional(&store.pool)
            .await
            .unwrap();
        assert!(row.is_some());

        reports.delete("file:///a.mp3").await.unwrap();

        let row = sqlx::query("SELECT message FROM error_reports WHERE file_url = ?")
            .bind("file:///a.mp3")
            .fetch_optional(&store.pool)
            .await
            .unwrap();
        assert!(row.is_none());
    }

    #[test]
    fn templates_load_for_every_known_statement() {
        let templates = SparqlTemplateStore::load();
        assert!(templates.get("item-count").is_some());
        assert!(templates.get("get-items").is_some());
        assert!(templates.get("update-hash").is_some());
        assert!(templates.get("delete-file").is_some());
        assert!(templates.get("nonexistent").is_none());
    }
}
