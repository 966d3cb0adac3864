use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use portal_sync::cache::{CacheManager, MemoryStorage};
use portal_sync::config::Config;
use portal_sync::entities::{self, remote, Mcq, Mcqs, Years};
use portal_sync::{CollectionSync, ConnectivityMonitor, Entity, MemoryStore, SyncState};

#[derive(Parser, Debug)]
#[command(name = "portal-sync")]
#[command(about = "Inspect and manage the portal's local collection cache")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/portal-sync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Also log to stderr
  #[arg(short, long)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// List cached collections with size, age and validity
  Stats,
  /// Print the cached payload of one collection
  Show { type_name: String },
  /// Remove one cached collection
  Clear { type_name: String },
  /// Remove every cached collection
  ClearAll,
  /// Walk an MCQ sync through an outage against an in-memory store
  Demo,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _guard = init_tracing(args.verbose)?;

  let config = Config::load(args.config.as_deref())?;

  match args.command {
    Command::Stats => print_stats(&config.cache.open()?),
    Command::Show { type_name } => show(&config.cache.open()?, &type_name),
    Command::Clear { type_name } => {
      if !entities::CACHE_TYPES.contains(&type_name.as_str()) {
        warn!(%type_name, "not a known collection");
      }
      config.cache.open()?.clear(&type_name);
      println!("cleared {}", type_name);
      Ok(())
    }
    Command::ClearAll => {
      config.cache.open()?.clear_all();
      println!("cleared all cached collections");
      Ok(())
    }
    Command::Demo => demo(&config).await,
  }
}

/// Log to a daily file under the data directory; `verbose` adds stderr.
fn init_tracing(verbose: bool) -> Result<WorkerGuard> {
  let log_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?
    .join("portal-sync")
    .join("logs");
  std::fs::create_dir_all(&log_dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;

  let (writer, guard) =
    tracing_appender::non_blocking(tracing_appender::rolling::daily(&log_dir, "portal-sync.log"));
  let filter =
    EnvFilter::try_from_env("PORTAL_SYNC_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

  tracing_subscriber::registry()
    .with(filter)
    .with(fmt::layer().with_writer(writer).with_ansi(false))
    .with(verbose.then(|| fmt::layer().with_writer(std::io::stderr)))
    .init();

  Ok(guard)
}

fn print_stats(cache: &CacheManager) -> Result<()> {
  let stats = cache.stats();
  if stats.is_empty() {
    println!("cache is empty");
    return Ok(());
  }

  println!(
    "{:<14} {:>10} {:>10} {:>8} {:>6}",
    "TYPE", "BYTES", "AGE", "VERSION", "VALID"
  );
  for stat in stats {
    let age = stat
      .age_millis
      .map(|ms| format!("{}s", ms / 1000))
      .unwrap_or_else(|| "?".to_string());
    let version = stat
      .version
      .map(|v| v.to_string())
      .unwrap_or_else(|| "?".to_string());
    println!(
      "{:<14} {:>10} {:>10} {:>8} {:>6}",
      stat.type_name,
      stat.size_bytes,
      age,
      version,
      if stat.valid { "yes" } else { "no" }
    );
  }
  Ok(())
}

fn show(cache: &CacheManager, type_name: &str) -> Result<()> {
  match cache.get_entry::<Value>(type_name) {
    Some(entry) => {
      println!("{}", serde_json::to_string_pretty(&entry)?);
      Ok(())
    }
    None => Err(eyre!("no cached entry for {}", type_name)),
  }
}

async fn wait_for<E: Entity>(
  sync: &CollectionSync<E>,
  what: &str,
  pred: impl Fn(&SyncState<E::Record>) -> bool,
) -> Result<SyncState<E::Record>> {
  let mut rx = sync.watch();
  let state = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| pred(s)))
    .await
    .map_err(|_| eyre!("timed out waiting for {}", what))?
    .map_err(|e| eyre!("sync stopped while waiting for {}: {}", what, e))?
    .clone();
  Ok(state)
}

fn describe<R>(label: &str, state: &SyncState<R>) {
  println!(
    "[{}] status={} offline={} loading={} records={}",
    label,
    state.status,
    state.offline,
    state.loading,
    state.records.len()
  );
}

async fn demo(config: &Config) -> Result<()> {
  let store = MemoryStore::new();
  for (id, question, created_at) in [
    ("m1", "Which nerve supplies the deltoid?", 3),
    ("m2", "Normal adult resting heart rate?", 2),
    ("m3", "Site of erythropoiesis in adults?", 1),
  ] {
    store.insert(
      "mcqs",
      id,
      remote::fields_of(json!({
        "question": question,
        "options": ["A", "B", "C", "D"],
        "correctAnswer": 0,
        "createdAt": created_at,
      })),
    );
  }

  let cache = CacheManager::new(MemoryStorage::new())
    .with_ttl_millis(config.cache.ttl_ms)
    .with_version(config.cache.version);
  let monitor = ConnectivityMonitor::new();
  let options = config.sync.options();

  let mcqs = CollectionSync::<Mcqs>::mount_with(
    Arc::new(store.clone()),
    cache.clone(),
    monitor.clone(),
    options,
  );
  let years = CollectionSync::<Years>::mount_with(
    Arc::new(store.clone()),
    cache.clone(),
    monitor.clone(),
    options,
  );

  describe("mcqs", &wait_for(&mcqs, "mcqs", |s| s.is_connected()).await?);
  describe("years", &wait_for(&years, "years", |s| !s.loading).await?);

  info!("simulating outage");
  store.set_available(false);
  describe("mcqs", &wait_for(&mcqs, "offline", |s| s.offline).await?);

  let draft = Mcq {
    question: "Drafted while offline".into(),
    options: vec!["Yes".into(), "No".into()],
    ..Default::default()
  };
  let local_id = mcqs.create(draft).await?;
  println!("created {} locally", local_id);
  describe("mcqs", &mcqs.state());

  info!("restoring connection");
  store.set_available(true);
  mcqs.retry();
  let state = wait_for(&mcqs, "reconnect", |s| {
    s.is_connected() && s.records.len() == 4 && s.records.iter().all(|r| !r.id.is_pending())
  })
  .await?;
  describe("mcqs", &state);
  for mcq in &state.records {
    println!("  {} {}", mcq.id, mcq.question);
  }

  print_stats(&cache)
}
