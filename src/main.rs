use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use spiritualgram_offline::cache::BucketStorage;
use spiritualgram_offline::queue::SqliteJobStore;
use spiritualgram_offline::queue::JobStore;
use spiritualgram_offline::{Config, OfflineClient};

#[derive(Parser, Debug)]
#[command(name = "gramq")]
#[command(about = "Inspect and drain the Spiritualgram offline queue and caches")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/spiritualgram/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Pending-request queue operations
  Queue {
    #[command(subcommand)]
    command: QueueCommand,
  },
  /// Cache bucket operations
  Cache {
    #[command(subcommand)]
    command: CacheCommand,
  },
  /// Install the app shell and activate the configured cache version
  Install,
}

#[derive(Subcommand, Debug)]
enum QueueCommand {
  /// Print every pending job in replay order
  List,
  /// Run one replay pass against the live API
  Flush,
  /// Drop every pending job
  Clear,
}

#[derive(Subcommand, Debug)]
enum CacheCommand {
  /// Print every cache bucket name
  List,
  /// Delete buckets left behind by other versions
  Purge,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;

  let log_dir = config
    .queue_db_path()?
    .parent()
    .map(PathBuf::from)
    .unwrap_or_else(|| PathBuf::from("."));
  let file_appender = tracing_appender::rolling::never(log_dir, "gramq.log");
  let (writer, _guard) = tracing_appender::non_blocking(file_appender);
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .with_writer(writer)
    .with_ansi(false)
    .init();

  match args.command {
    Command::Queue { command } => queue_command(&config, command).await,
    Command::Cache { command } => cache_command(&config, command).await,
    Command::Install => {
      let client = OfflineClient::new(config)?;
      client.install().await?;
      client.activate().await?;
      println!("app shell installed, version {} active", client.cache().version());
      Ok(())
    }
  }
}

async fn queue_command(config: &Config, command: QueueCommand) -> Result<()> {
  match command {
    QueueCommand::List => {
      let store = SqliteJobStore::open_at(&config.queue_db_path()?)?;
      let jobs = store.snapshot()?;
      if jobs.is_empty() {
        println!("queue is empty");
        return Ok(());
      }
      for job in jobs {
        println!(
          "{}  {}  {} {}",
          job.id,
          job.created_at.format("%Y-%m-%d %H:%M:%S"),
          job.request.method.as_str(),
          job.request.url
        );
      }
      Ok(())
    }
    QueueCommand::Flush => {
      let client = OfflineClient::new(config.clone())?;
      let report = client.flush().await?;
      println!(
        "attempted {}, replayed {}, retained {}",
        report.attempted, report.replayed, report.retained
      );
      Ok(())
    }
    QueueCommand::Clear => {
      let store = SqliteJobStore::open_at(&config.queue_db_path()?)?;
      let dropped = store.len()?;
      store.clear()?;
      println!("dropped {} pending job(s)", dropped);
      Ok(())
    }
  }
}

async fn cache_command(config: &Config, command: CacheCommand) -> Result<()> {
  match command {
    CacheCommand::List => {
      let storage = spiritualgram_offline::cache::SqliteBuckets::open_at(&config.cache_db_path()?)?;
      let names = storage.bucket_names()?;
      if names.is_empty() {
        println!("no cache buckets");
        return Ok(());
      }
      for name in names {
        let marker = if name.contains(&config.cache.version) {
          "live"
        } else {
          "stale"
        };
        println!("{}  [{}]", name, marker);
      }
      Ok(())
    }
    CacheCommand::Purge => {
      let client = OfflineClient::new(config.clone())?;
      client.activate().await?;
      println!("stale buckets purged, version {} active", config.cache.version);
      Ok(())
    }
  }
}
