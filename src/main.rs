use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use fieldsync::api::{classify_response, HttpRequest, ReqwestTransport, Transport};
use fieldsync::bootstrap::{default_targets, CacheBootstrap};
use fieldsync::bus::InvalidationBus;
use fieldsync::cache::{ReadCache, ReadCacheStore};
use fieldsync::config::Config;
use fieldsync::dispatch::{ApiRequest, DispatchOutcome, RequestDispatcher};
use fieldsync::net::Connectivity;
use fieldsync::queue::WriteQueueStore;
use fieldsync::scheduler::SyncScheduler;
use fieldsync::sync::SyncEngine;

#[derive(Parser, Debug)]
#[command(name = "fieldsync")]
#[command(about = "Offline-first mutation queue and sync engine for field clients")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/fieldsync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Show the queue
  Status,
  /// Run one sync pass now
  Sync,
  /// Sweep completed entries past the retention window
  Purge,
  /// Warm the read cache and keep syncing on the configured interval
  Watch,
  /// Dispatch a call: direct when possible, queued when not
  Send {
    /// HTTP method (GET, POST, PUT, PATCH, DELETE)
    method: String,
    /// Path relative to the API base URL
    url: String,
    /// JSON body for state-changing methods
    payload: Option<String>,
    /// Treat the call as session-critical: always direct, never queued
    #[arg(long)]
    skip_queue: bool,
  },
  /// Cache-first read of a logical key
  Fetch {
    /// Logical cache key (e.g. accounts, categoryTree:income)
    key: String,
    /// Path fetched on a cache miss or background refresh
    url: String,
  },
}

struct Services {
  queue: Arc<WriteQueueStore>,
  engine: Arc<SyncEngine>,
  bus: Arc<InvalidationBus>,
  transport: Arc<dyn Transport>,
  cache: ReadCache,
  net: Connectivity,
}

/// Construct the process-wide stores and engine once, up front, and inject
/// them everywhere instead of reaching for globals.
fn build_services(config: &Config) -> Result<Services> {
  let data_dir = config.data_dir()?;

  let queue = Arc::new(WriteQueueStore::open_default(&data_dir)?);
  let cache_store = Arc::new(ReadCacheStore::open_default(&data_dir)?);
  let bus = Arc::new(InvalidationBus::new());
  let net = Connectivity::new(true);
  let transport: Arc<dyn Transport> = Arc::new(ReqwestTransport::new(config)?);

  let engine = Arc::new(SyncEngine::new(
    Arc::clone(&transport),
    Arc::clone(&queue),
    Arc::clone(&bus),
    config.sync_timeout(),
    config.max_permanent_retries,
  )?);

  let cache = ReadCache::new(cache_store, net.clone());

  Ok(Services {
    queue,
    engine,
    bus,
    transport,
    cache,
    net,
  })
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .with_writer(std::io::stderr)
    .init();

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;
  let services = build_services(&config)?;

  match args.command {
    Command::Status => {
      println!("{} pending", services.queue.pending_count()?);
      for entry in services.queue.list_all()? {
        println!(
          "{}  {:<9}  {:<6}  {}  retries={}  {}",
          entry.id,
          entry.status.as_str(),
          entry.method,
          entry.url,
          entry.retry_count,
          entry.last_error.as_deref().unwrap_or("-"),
        );
      }
    }
    Command::Sync => match services.engine.run_pass().await? {
      Some(report) => println!(
        "{} attempted, {} completed, {} failed, {} abandoned",
        report.attempted, report.completed, report.failed, report.abandoned
      ),
      None => println!("a sync pass is already running"),
    },
    Command::Purge => {
      let removed = services.queue.purge_completed_older_than(config.retention())?;
      println!("removed {} completed entries", removed);
    }
    Command::Watch => {
      let warm = CacheBootstrap::new(
        Arc::clone(&services.transport),
        services.cache.clone(),
        services.net.clone(),
        config.sync_timeout(),
      );
      let warmed = warm.refresh(&default_targets()).await;
      println!("warmed {} cache entries", warmed);

      let scheduler = SyncScheduler::new(
        Arc::clone(&services.engine),
        config.sync_interval(),
        config.api.token_env.clone(),
      );
      if let Some(rx) = services.bus.subscribe_enqueued() {
        SyncScheduler::bridge_enqueued(scheduler.handle(), rx);
      }
      scheduler.run().await?;
    }
    Command::Send {
      method,
      url,
      payload,
      skip_queue,
    } => {
      let payload: Option<Value> = payload
        .map(|p| serde_json::from_str(&p))
        .transpose()
        .map_err(|e| eyre!("Payload is not valid JSON: {}", e))?;

      let dispatcher = RequestDispatcher::new(
        Arc::clone(&services.transport),
        Arc::clone(&services.queue),
        Arc::clone(&services.bus),
        services.net.clone(),
        config.interactive_timeout(),
      );

      let mut request = ApiRequest::new(&method, url, payload);
      if skip_queue {
        request = request.skip_queue();
      }

      match dispatcher.dispatch(request).await {
        Ok(DispatchOutcome::Done(data)) => println!("{}", data),
        Ok(DispatchOutcome::Queued(receipt)) => println!("queued {}", receipt.id),
        Err(err) => return Err(eyre!(err)),
      }
    }
    Command::Fetch { key, url } => {
      let transport = Arc::clone(&services.transport);
      let timeout = config.sync_timeout();
      let data = services
        .cache
        .get_with_cache(&key, move || async move {
          let resp = transport
            .send(HttpRequest {
              method: "GET".to_string(),
              url,
              body: None,
              headers: Vec::new(),
              timeout,
            })
            .await
            .map_err(|e| eyre!("{}", e))?;
          classify_response(resp).map_err(|e| eyre!(e))
        })
        .await?;
      println!("{}", data);
    }
  }

  Ok(())
}
