//! archive-dispatch
//!
//! Archives the given URLs through the configured backends and prints one
//! JSON outcome per line, in input order.
//!
//! ```text
//! archive-dispatch --config dispatch.toml https://example.org/a https://example.org/b
//! archive-dispatch --config dispatch.toml --backend internetarchive --input urls.txt
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use archive_dispatch::backend::StaticRegistry;
use archive_dispatch::config::watcher::ConfigWatcher;
use archive_dispatch::config::{load_config, DispatchConfig, SharedPreferences};
use archive_dispatch::dispatch::{ArchiveCoordinator, BatchRequest, ExecutionMode, WorkItem};
use archive_dispatch::memento::{MementoLookup, NoMementoLookup, TimeMapLookup};
use archive_dispatch::observability::{logging, metrics, LogSink};

#[derive(Parser)]
#[command(name = "archive-dispatch")]
#[command(about = "Submit URLs to web archiving services", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Archive only with this backend instead of the fallback chain
    #[arg(short, long)]
    backend: Option<String>,

    /// Archive one item at a time
    #[arg(long)]
    sequential: bool,

    /// Override queue.max_concurrency (clamped to 1..=8)
    #[arg(long)]
    concurrency: Option<usize>,

    /// File with one URL per line; blank lines and lines starting with '#' are ignored
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Reload preferences when the config file changes
    #[arg(long)]
    watch: bool,

    /// URLs to archive
    urls: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => DispatchConfig::default(),
    };
    if let Some(concurrency) = cli.concurrency {
        config.queue.max_concurrency = concurrency;
    }

    logging::init_logging(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "archive-dispatch starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let preferences = Arc::new(SharedPreferences::new(config.preferences.clone()));
    let _watcher = match (&cli.config, cli.watch) {
        (Some(path), true) => {
            let (watcher, mut updates) = ConfigWatcher::new(path, preferences.clone());
            let guard = watcher.run()?;
            tokio::spawn(async move {
                while let Some(updated) = updates.recv().await {
                    tracing::info!(
                        fallback_order = ?updated.preferences.fallback_order,
                        "Preferences reloaded; applies from the next batch"
                    );
                }
            });
            Some(guard)
        }
        _ => None,
    };

    let registry = StaticRegistry::from_config(&config.backends, &config.retries)?;
    if registry.is_empty() {
        tracing::warn!("No backends configured");
    }

    let mementos: Arc<dyn MementoLookup> = if config.memento.enabled {
        Arc::new(TimeMapLookup::new(&config.memento)?)
    } else {
        Arc::new(NoMementoLookup)
    };

    let items = collect_items(&cli)?;
    if items.is_empty() {
        return Err("no URLs to archive; pass them as arguments or with --input".into());
    }

    let coordinator = ArchiveCoordinator::builder(Arc::new(registry))
        .config(config)
        .mementos(mementos)
        .preferences(preferences)
        .sink(Arc::new(LogSink))
        .build();

    let request = BatchRequest {
        backend: cli.backend.clone(),
        mode: if cli.sequential {
            ExecutionMode::Sequential
        } else {
            ExecutionMode::Concurrent
        },
    };

    let outcomes = coordinator.archive_items(&items, request).await;
    for outcome in &outcomes {
        println!("{}", serde_json::to_string(outcome)?);
    }

    for snapshot in coordinator.breakers().snapshots() {
        tracing::debug!(
            backend_id = %snapshot.backend_id,
            state = %snapshot.state,
            total_calls = snapshot.total_calls,
            total_failures = snapshot.total_failures,
            "Circuit breaker summary"
        );
    }

    let failed = outcomes.iter().filter(|o| !o.success).count();
    if failed > 0 {
        tracing::warn!(failed, total = outcomes.len(), "Some items were not archived");
        std::process::exit(2);
    }
    Ok(())
}

fn collect_items(cli: &Cli) -> Result<Vec<WorkItem>, std::io::Error> {
    let mut urls = cli.urls.clone();
    if let Some(path) = &cli.input {
        let contents = std::fs::read_to_string(path)?;
        urls.extend(
            contents
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .map(str::to_string),
        );
    }

    Ok(urls
        .into_iter()
        .enumerate()
        .map(|(index, url)| WorkItem::new((index + 1).to_string(), url))
        .collect())
}
