//! ficbot CLI entry point.

use ficbot::config::{Config, Overrides};
use ficbot::dispatch::Dispatcher;
use ficbot::error::RecommendError;
use ficbot::ledger::Ledger;
use ficbot::platform::RedditClient;
use ficbot::quota::QuotaTracker;
use ficbot::recommend::HttpRecommender;
use ficbot::scheduler::Scheduler;

use anyhow::Context as _;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "ficbot")]
#[command(about = "Answers story recommendation requests on Reddit")]
struct Cli {
    /// Reddit login username
    #[arg(short, long)]
    user: Option<String>,

    /// Reddit login password (prefer FICBOT_PASSWORD)
    #[arg(short, long)]
    password: Option<String>,

    /// Comma-separated subreddits to operate on
    #[arg(short, long)]
    subreddits: Option<String>,

    /// Also operate on the default subreddits
    #[arg(short, long)]
    default: bool,

    /// Request ledger file (defaults to CHECKED_COMMENTS.txt)
    #[arg(short, long)]
    comments: Option<PathBuf>,

    /// Log replies instead of sending them and never write the ledger
    #[arg(short = 'l', long)]
    dry: bool,

    /// Handle posts as they come instead of polling
    #[arg(long)]
    streams: bool,

    /// Default log level; RUST_LOG takes precedence
    #[arg(short, long)]
    verbosity: Option<String>,

    /// Path to config file (optional)
    #[arg(long)]
    config: Option<PathBuf>,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            user: self.user.clone(),
            password: self.password.clone(),
            subreddits: self.subreddits.clone(),
            default_subreddits: self.default,
            ledger_path: self.comments.clone(),
            dry_run: self.dry,
            streams: self.streams,
            verbosity: self.verbosity.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load_from_path(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => Config::load().context("failed to load configuration")?,
    };
    config.apply_env();
    config.apply_overrides(cli.overrides());

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.verbosity.to_lowercase()))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    config.validate().context("invalid configuration")?;
    tracing::info!("starting ficbot");
    if config.dry_run {
        tracing::info!("dry run enabled, nothing will be sent");
    }

    let platform = Arc::new(
        RedditClient::new(config.reddit_credentials()?, config.stream_poll_interval())
            .context("failed to create reddit client")?,
    );
    let recommender_url = config
        .recommender_url
        .clone()
        .ok_or(RecommendError::NotConfigured)
        .context("set FICBOT_RECOMMENDER_URL or recommender_url")?;
    let recommender = Arc::new(HttpRecommender::new(recommender_url));

    let dispatch_settings = config.dispatch_settings();
    tracing::info!(subreddits = ?dispatch_settings.subreddits, "loaded subreddits");

    let dispatcher = Dispatcher::new(
        dispatch_settings,
        platform,
        recommender,
        Ledger::new(&config.ledger_path, config.dry_run),
        QuotaTracker::new(config.quota.limit, config.quota_window()),
    );
    let mut scheduler = Scheduler::new(config.scheduler_settings(), dispatcher);

    tokio::select! {
        _ = scheduler.run_forever() => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }

    tracing::info!("saving ledger");
    scheduler
        .dispatcher()
        .ledger()
        .save()
        .context("failed to save ledger on shutdown")?;

    tracing::info!("ficbot stopped");
    Ok(())
}
