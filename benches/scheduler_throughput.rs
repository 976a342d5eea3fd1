//! Throughput benchmark for the Decorator Scheduler, following the
//! teacher's `perf_harness.rs` shape: a `criterion` group driven off a
//! shared multi-thread `Runtime`, building the real pieces (scheduler,
//! engine, an in-memory graph store standing in for the SPARQL endpoint)
//! rather than mocking the hot path.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tokio::runtime::Runtime;

use extract_core::registry::{ExtractorRegistry, RegistryEntry};
use extract_core::{IndexerConfig, IndexerCore, QueuePolicy};
use extract_handlers::PlainTextHandler;
use extract_test_utils::{InMemoryGraphStore, RecordingErrorReportStore};

fn text_registry() -> Arc<ExtractorRegistry> {
    let mut registry = ExtractorRegistry::new();
    registry.register(
        "text/plain".to_string(),
        RegistryEntry {
            handler: Arc::new(PlainTextHandler),
            graph: "documents".to_string(),
            extractor_hash: "plain-text-v1".to_string(),
            advertised_types: vec!["nfo:PlainTextDocument".to_string()],
            deadline: None,
        },
    );
    Arc::new(registry)
}

async fn seeded_core(dir: &std::path::Path, item_count: usize) -> IndexerCore {
    let store = Arc::new(InMemoryGraphStore::new());
    for i in 0..item_count {
        let path = dir.join(format!("f{i}.txt"));
        std::fs::write(&path, format!("contents of file {i}")).unwrap();
        store
            .insert(
                &format!("file://{}", path.display()),
                &format!("c{i}"),
                "text/plain",
                "documents",
            )
            .await;
    }

    let config = IndexerConfig {
        commit_batch_size: 200,
        ..IndexerConfig::default()
    };
    let policy = QueuePolicy {
        recognized_graphs: vec!["documents".to_string()],
        priority_graphs: vec![],
    };
    IndexerCore::build(
        &config,
        store,
        text_registry(),
        Arc::new(RecordingErrorReportStore::new()),
        &dir.join("slot"),
        policy,
    )
    .unwrap()
}

fn benchmark_scheduler_drain(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("scheduler_drain");

    for &item_count in &[10usize, 100, 500] {
        group.throughput(Throughput::Elements(item_count as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(item_count),
            &item_count,
            |b, &item_count| {
                b.to_async(&rt).iter_batched(
                    || {
                        let dir = tempfile::tempdir().unwrap();
                        (dir, item_count)
                    },
                    |(dir, item_count)| async move {
                        let core = seeded_core(dir.path(), item_count).await;
                        black_box(core.controller.start().await.unwrap());
                    },
                    criterion::BatchSize::SmallInput,
                );
            },
        );
    }

    group.finish();
}

criterion_group!(benches, benchmark_scheduler_drain);
criterion_main!(benches);
