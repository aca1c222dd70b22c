use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use newsmill::config::Config;
use newsmill::pipeline::Pipeline;
use newsmill::runner::{self, FeedSource, FeedSpec, HttpFeedSource};
use newsmill::storage::{Database, DatabaseError};

#[derive(Parser, Debug)]
#[command(name = "newsmill", about = "Content intelligence pipeline for syndicated feeds")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(long, value_name = "FILE", default_value = "newsmill.toml")]
    config: PathBuf,

    /// SQLite database path
    #[arg(long, default_value = "newsmill.db")]
    database: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch the given feeds once, process the batch, and exit
    Once {
        /// Feeds as NAME=URL or bare URLs (name taken from the host)
        #[arg(required = true)]
        feeds: Vec<String>,
    },
    /// Poll the given feeds on an interval until interrupted
    Watch {
        /// Seconds between polling cycles
        #[arg(long, default_value_t = 300)]
        every: u64,

        /// Feeds as NAME=URL or bare URLs (name taken from the host)
        #[arg(required = true)]
        feeds: Vec<String>,
    },
}

fn parse_feeds(raw: &[String]) -> Result<Vec<FeedSpec>> {
    raw.iter()
        .map(|s| FeedSpec::parse(s).with_context(|| format!("Invalid feed spec: {}", s)))
        .collect()
}

fn load_config(path: &PathBuf) -> Result<Config> {
    if path.exists() {
        Ok(Config::load(path)?)
    } else {
        tracing::debug!(path = %path.display(), "No config file, using defaults");
        Ok(Config::default())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let cfg = load_config(&args.config)?;

    let db = match Database::open(&args.database).await {
        Ok(db) => db,
        Err(DatabaseError::InstanceLocked) => {
            eprintln!(
                "Error: Another instance of newsmill appears to be running. Please close it and try again."
            );
            std::process::exit(1);
        }
        Err(e) => {
            return Err(anyhow::anyhow!("Failed to open database: {}", e));
        }
    };

    let user_agent = cfg.extraction.user_agent.clone();
    let pipeline = Pipeline::new(cfg, db).context("Failed to build pipeline")?;

    match args.command {
        Command::Once { feeds } => {
            let source = HttpFeedSource::new(&user_agent, parse_feeds(&feeds)?)?;
            let items = source.collect().await?;
            if items.is_empty() {
                println!("No items collected.");
                return Ok(());
            }
            let outcome = pipeline
                .process_batch(items)
                .await
                .context("Batch processing failed")?;
            println!(
                "Processed {} items: {} stored, {} spam-rejected, {} images cached, {} stories touched",
                outcome.stats.items,
                outcome.stats.stored,
                outcome.stats.spam_rejected,
                outcome.stats.images_cached,
                outcome.stats.stories_touched,
            );
            for (entry_id, reason) in &outcome.failures {
                eprintln!("  failed {}: {}", entry_id, reason);
            }
        }
        Command::Watch { every, feeds } => {
            let source = HttpFeedSource::new(&user_agent, parse_feeds(&feeds)?)?;
            let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    let _ = shutdown_tx.send(true);
                }
            });
            println!("Polling {} feed(s) every {}s. Ctrl-C to stop.", feeds.len(), every);
            runner::run_interval(&pipeline, &source, Duration::from_secs(every), shutdown_rx)
                .await?;
        }
    }

    Ok(())
}
