mod catalog;
mod config;
mod gateway;
mod net;
mod offline;
mod store;
mod sync;
mod worker;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use catalog::CatalogClient;
use config::Config;
use gateway::Gateway;
use net::ConnectivityMonitor;
use offline::OfflineCatalog;
use store::{SnapshotStore, SqliteSnapshotStore};
use worker::cache::SqliteResponseCache;
use worker::protocol::{WorkerEvent, WorkerHandle};
use worker::{CacheWorker, Registration};

#[derive(Parser, Debug)]
#[command(name = "karpet")]
#[command(about = "Offline-first sync and cache engine for a carpet storefront catalog")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/karpet/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Run one full catalog sync cycle
  Sync,
  /// Show the persisted snapshot summary
  Status,
  /// Fetch and print a single product by id
  Product { id: i64 },
  /// Delete the persisted snapshot (debug)
  Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "karpet=info".into()))
    .with_writer(std::io::stderr)
    .init();

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;

  match args.command {
    Command::Sync => run_sync(&config).await,
    Command::Status => show_status(&config),
    Command::Product { id } => show_product(&config, id).await,
    Command::Clear => clear_snapshot(&config),
  }
}

async fn run_sync(config: &Config) -> Result<()> {
  let gateway = Gateway::new()?;
  let client = CatalogClient::new(gateway.clone(), config.api.url.as_str());
  let store = Arc::new(SqliteSnapshotStore::open_at(&config.snapshot_db_path()?)?);

  let (worker_handle, events) = register_worker(config, gateway).await;

  let facade = OfflineCatalog::new(
    client,
    store,
    ConnectivityMonitor::new(true),
    worker_handle,
    events,
  );

  let mut rx = facade.subscribe();
  let owned_cycle = facade.sync_data().await;

  if !owned_cycle && facade.state().error.is_none() {
    // The cold-start auto-sync owns the in-flight cycle; wait for it.
    loop {
      let state = facade.state();
      if state.data.is_some() || state.error.is_some() {
        break;
      }
      if rx.changed().await.is_err() {
        break;
      }
    }
  }

  let state = facade.state();
  match state.data {
    Some(snapshot) if state.error.is_none() => {
      println!(
        "synced {} categories, {} products, {} banners, {} portfolio items",
        snapshot.categories.len(),
        snapshot.product_count(),
        snapshot.banners.len(),
        snapshot.portfolios.len()
      );
      Ok(())
    }
    _ => Err(eyre!(
      "sync failed: {}",
      state.error.unwrap_or_else(|| "unknown error".to_string())
    )),
  }
}

/// Install and activate the cache worker. The catalog sync is useful even
/// when the shell origin is unreachable, so a failed install downgrades to
/// a disconnected handle instead of failing the run.
async fn register_worker(
  config: &Config,
  gateway: Gateway,
) -> (WorkerHandle, broadcast::Receiver<WorkerEvent>) {
  match try_register_worker(config, gateway).await {
    Ok(pair) => pair,
    Err(e) => {
      warn!("continuing without cache worker: {}", e);
      let (_tx, rx) = broadcast::channel(16);
      (WorkerHandle::disconnected(), rx)
    }
  }
}

async fn try_register_worker(
  config: &Config,
  gateway: Gateway,
) -> Result<(WorkerHandle, broadcast::Receiver<WorkerEvent>)> {
  let cache = SqliteResponseCache::open(&config.response_cache_db_path()?)?;

  let mut registration = Registration::new();
  let worker = CacheWorker::new(
    gateway,
    cache,
    config.app.origin.as_str(),
    registration.events_sender(),
  );
  registration.register(worker).await?;

  Ok(registration.spawn())
}

fn show_status(config: &Config) -> Result<()> {
  let store = SqliteSnapshotStore::open_at(&config.snapshot_db_path()?)?;

  match store.load()? {
    Some(snapshot) => {
      let synced = chrono::DateTime::from_timestamp_millis(snapshot.last_synced)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| snapshot.last_synced.to_string());
      println!(
        "snapshot: {} categories, {} products, {} banners, {} portfolio items",
        snapshot.categories.len(),
        snapshot.product_count(),
        snapshot.banners.len(),
        snapshot.portfolios.len()
      );
      println!("last synced: {}", synced);
    }
    None => println!("no snapshot stored"),
  }

  Ok(())
}

async fn show_product(config: &Config, id: i64) -> Result<()> {
  let gateway = Gateway::new()?;
  let client = CatalogClient::new(gateway, config.api.url.as_str());

  match client.product_by_id(id).await {
    Some(product) => {
      println!("{} (id {})", product.name, product.id);
      if product.is_best_seller {
        println!("best seller");
      }
      if let Some(description) = product.description {
        println!("{}", description);
      }
      for image in product.images {
        println!("image: {}", image.url);
      }
    }
    None => println!("product {} not found", id),
  }

  Ok(())
}

fn clear_snapshot(config: &Config) -> Result<()> {
  let store = SqliteSnapshotStore::open_at(&config.snapshot_db_path()?)?;
  store.clear()?;
  println!("snapshot cleared");
  Ok(())
}
