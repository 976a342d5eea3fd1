//! Daemon entrypoint: wires a `SqliteGraphStore`, the default extractor
//! registry, the crash-persistence slot, and the `Controller`; installs a
//! `tracing-subscriber` layer; runs until Ctrl-C, draining the scheduler
//! whenever the graph reports a change. Follows the teacher's
//! `simple-app`/`torii-tokens` binaries' shape: a thin `#[tokio::main]`
//! that loads config, builds the runtime's pieces, and loops.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use extract_core::graph_store::{self, GraphStore};
use extract_core::{IndexerConfig, IndexerCore, QueuePolicy};
use extract_handlers::build_default_registry;
use extract_sql::{SqliteErrorReportStore, SqliteGraphStore};

#[derive(Parser, Debug)]
#[command(name = "extractd", about = "Local file-content metadata-extraction daemon")]
struct Args {
    /// Path to a TOML config file; defaults to built-in values plus env vars.
    #[arg(long)]
    config: Option<PathBuf>,

    /// SQLite database path for the bundled graph store.
    #[arg(long, default_value = "extractd.db")]
    db_path: String,

    /// Path to the crash-persistence slot file.
    #[arg(long, default_value = "extractd.slot")]
    persistence_path: PathBuf,

    /// Address the status HTTP surface binds to. Omit to disable it.
    #[arg(long)]
    http_addr: Option<SocketAddr>,

    /// Comma-separated recognized graph names.
    #[arg(long, value_delimiter = ',', default_value = "documents,pictures,audio")]
    recognized_graphs: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let config = IndexerConfig::load(args.config.as_deref())
        .with_context(|| "failed to load indexer configuration")?;
    tracing::info!(target: "extractd::main", ?config, "loaded configuration");

    let store = Arc::new(
        SqliteGraphStore::new(&args.db_path)
            .await
            .context("failed to open graph store")?,
    );
    let error_report = Arc::new(SqliteErrorReportStore::sharing(&store));
    let registry = Arc::new(build_default_registry(config.max_bytes));

    let policy = QueuePolicy {
        recognized_graphs: args.recognized_graphs,
        priority_graphs: config.priority_graphs.clone(),
    };

    let core = IndexerCore::build(
        &config,
        store.clone() as Arc<dyn GraphStore>,
        registry,
        error_report,
        &args.persistence_path,
        policy,
    )
    .context("failed to build indexer core")?;

    if let Some(addr) = args.http_addr {
        let router = extract_core::http::create_http_router(core.events.subscribe());
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind status http listener on {addr}"))?;
        tracing::info!(target: "extractd::main", %addr, "status http surface listening");
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                tracing::error!(target: "extractd::main", error = %e, "status http server exited");
            }
        });
    }

    core.controller
        .start()
        .await
        .context("initial scheduler run failed")?;

    use tokio_stream::StreamExt;
    let mut changes = Box::pin(graph_store::filter_lagged(store.change_stream()));
    let mut shutdown = std::pin::pin!(tokio::signal::ctrl_c());

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!(target: "extractd::main", "shutdown signal received");
                core.controller.stop().await;
                break;
            }
            event = changes.next() => {
                match event {
                    Some(change) => {
                        core.controller.on_change_event(change.kind).await;
                        if let Err(e) = core.controller.drive_until_idle().await {
                            tracing::error!(target: "extractd::main", error = %e, "scheduler run failed");
                        }
                    }
                    None => break,
                }
            }
        }
    }

    core.engine.stats().lock().await.emit();
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("extract_core=info,extract_sql=info,extract_handlers=info,extractd=info,info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .compact()
        .with_target(true)
        .init();
}
