mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use dcdn_protocol::{ItemState, SigningContext, StaticIdentity};
use dcdn_registry::MemoryRegistry;
use dcdn_transfer::{MemoryContentStore, RetrievalReconstructor, SessionManager};
use dcdn_upload::{
    DEFAULT_TARGET_PREFIX, UploadEvent, UploadItem, UploadOrchestrator, UploadOutcome,
    items_from_paths, scan_items,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use config::AppConfig;

#[derive(Parser, Debug)]
#[command(name = "dcdn")]
#[command(about = "Chunked ingest and read-back for a content CDN")]
struct Args {
    /// Path to config file
    #[arg(short, long, env = "DCDN_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload files and directories, then register them
    Upload {
        /// Files or directories to upload
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Target path prefix
        #[arg(long, default_value = DEFAULT_TARGET_PREFIX)]
        prefix: String,

        /// Maximum items in flight
        #[arg(long)]
        concurrency: Option<usize>,

        /// Bytes per chunk
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Principal to act as
        #[arg(long, env = "DCDN_PRINCIPAL")]
        principal: Option<String>,

        /// Read every registered object back and compare sizes
        #[arg(long)]
        verify: bool,
    },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,dcdn=debug")),
        )
        .init();

    let args = Args::parse();
    let mut config = AppConfig::load(args.config.as_deref())?;

    match args.command {
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Command::Upload {
            paths,
            prefix,
            concurrency,
            chunk_size,
            principal,
            verify,
        } => {
            // Apply CLI overrides
            if let Some(n) = concurrency {
                config.upload.concurrency = n;
            }
            if let Some(size) = chunk_size {
                config.upload.chunk_size = size;
            }
            if let Some(p) = principal {
                config.principal = p;
            }
            upload(&config, &paths, &prefix, verify).await
        }
    }
}

fn collect_items(paths: &[PathBuf], prefix: &str) -> anyhow::Result<Vec<UploadItem>> {
    let mut items = Vec::new();
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            items.extend(
                scan_items(path, prefix).with_context(|| format!("scanning {}", path.display()))?,
            );
        } else {
            files.push(path.clone());
        }
    }
    items.extend(items_from_paths(&files, prefix)?);
    Ok(items)
}

async fn upload(
    config: &AppConfig,
    paths: &[PathBuf],
    prefix: &str,
    verify: bool,
) -> anyhow::Result<()> {
    let items = collect_items(paths, prefix)?;
    if items.is_empty() {
        warn!("nothing to upload");
        return Ok(());
    }

    // Local backend.
    let store = Arc::new(MemoryContentStore::new(
        "mem://dcdn",
        config.read.chunk_size,
    ));
    let manager = Arc::new(SessionManager::new(store.clone(), config.session.clone()));
    let registry = Arc::new(MemoryRegistry::new(store.clone()));

    let shutdown = CancellationToken::new();
    let sweeper = manager.spawn_sweeper(shutdown.clone());

    let mut orchestrator = UploadOrchestrator::new(manager.clone(), registry, config.upload.clone());
    let mut events = orchestrator
        .take_events()
        .context("event receiver already taken")?;
    let orchestrator = Arc::new(orchestrator);

    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                UploadEvent::Started {
                    target_path,
                    total_bytes,
                    ..
                } => info!(path = %target_path, bytes = total_bytes, "uploading"),
                UploadEvent::Progress {
                    item_id,
                    transferred_bytes,
                    total_bytes,
                } => debug!(item = %item_id, transferred_bytes, total_bytes, "progress"),
                _ => {}
            }
        }
    });

    // Ctrl-C cancels the whole batch; registered items stay registered.
    let ctrl_c = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted, cancelling batch");
                orchestrator.cancel_all();
            }
        })
    };

    let identity = StaticIdentity(SigningContext::anonymous(config.principal.clone()));
    let outcomes = orchestrator.run(items, &identity).await?;
    ctrl_c.abort();
    let _ = ctrl_c.await;

    print_outcomes(&outcomes);
    println!("{}", orchestrator.status());

    if let Some(reflector) = orchestrator.reflector() {
        let stats = reflector.stats();
        println!("{} assets, {} bytes registered", stats.count, stats.total_bytes);
    }

    let mut verify_failures = 0;
    if verify {
        let reconstructor = RetrievalReconstructor::new(store.clone(), &config.read);
        for outcome in outcomes.iter().filter(|o| o.state == ItemState::Registered) {
            let Some(record) = &outcome.record else {
                continue;
            };
            match reconstructor.fetch_record(record).await {
                Ok(bytes) => println!("verified {} ({} bytes)", outcome.target_path, bytes.len()),
                Err(e) => {
                    verify_failures += 1;
                    println!("verify failed {}: {e}", outcome.target_path);
                }
            }
        }
    }

    shutdown.cancel();
    let _ = sweeper.await;
    drop(orchestrator);
    let _ = printer.await;

    let failed = outcomes
        .iter()
        .filter(|o| o.state == ItemState::Failed)
        .count();
    if failed > 0 || verify_failures > 0 {
        anyhow::bail!("{failed} item(s) failed, {verify_failures} verification failure(s)");
    }
    Ok(())
}

fn print_outcomes(outcomes: &[UploadOutcome]) {
    for outcome in outcomes {
        match (&outcome.state, &outcome.record, &outcome.error) {
            (ItemState::Registered, Some(record), _) => println!(
                "registered {} -> {} ({} bytes)",
                outcome.target_path, record.content_ref, record.size
            ),
            (ItemState::Failed, _, Some(error)) => {
                println!("failed {}: {error}", outcome.target_path)
            }
            (state, _, _) => println!("{state} {}", outcome.target_path),
        }
    }
}
