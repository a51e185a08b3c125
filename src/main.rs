//! CLI entry point for the articlesync tool.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use articlesync_core::storage::manifest_path;
use articlesync_core::{
    ApiClient, FsStorage, ItemFetcher, MarkdownConverter, ReqwestTransport, Storage, SyncConfig,
    SyncEngine,
};
use clap::Parser;
use tracing::{debug, info};

mod cli;

use cli::{Args, Command};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    let config = resolve_config(&args)?;
    debug!(?config, "configuration resolved");

    match args.command {
        Command::Status => run_status(&config),
        Command::Sync { .. } => run_sync(&config).await,
        Command::BackfillComments => run_backfill(&config).await,
        Command::CheckAuth => run_check_auth(&config).await,
    }
}

/// Layers CLI flags over file and environment configuration.
fn resolve_config(args: &Args) -> Result<SyncConfig> {
    let mut config =
        SyncConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    if let Some(cookie) = &args.cookie {
        config.cookie = Some(cookie.clone());
    }
    if let Some(data_dir) = &args.data_dir {
        config.data_dir.clone_from(data_dir);
    }
    if let Some(user_id) = &args.user_id {
        config.user_id = Some(user_id.clone());
    }
    if let Command::Sync {
        max_pages,
        skip_comments,
    } = &args.command
    {
        if let Some(max_pages) = max_pages {
            config.max_pages = (*max_pages > 0).then_some(*max_pages);
        }
        if *skip_comments {
            config.skip_comments = true;
        }
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn build_engine(config: &SyncConfig) -> Result<SyncEngine> {
    let cookie = config.require_cookie()?;
    let transport = ReqwestTransport::new(&config.base_url, cookie, config.request_timeout)
        .context("Failed to build HTTP client")?;
    let api = ApiClient::new(Arc::new(transport), config.retry_policy())
        .with_site_url(config.base_url.clone());
    let fetcher = ItemFetcher::new(api.clone(), Arc::new(MarkdownConverter))
        .with_skip_comments(config.skip_comments);
    let storage: Arc<dyn Storage> = Arc::new(FsStorage::new(config.data_dir.clone()));

    Ok(SyncEngine::new(
        api,
        fetcher,
        storage,
        config.pacing(),
        config.sync_options(),
    ))
}

async fn run_sync(config: &SyncConfig) -> Result<()> {
    let user_id = config.require_user_id()?;
    let mut engine = build_engine(config)?;
    info!(user_id, data_dir = %config.data_dir.display(), "Articlesync starting");

    let report = engine.sync(user_id).await.context("Sync failed")?;

    println!("Pages fetched:    {}", report.pages_fetched);
    println!("New articles:     {}", report.new_items);
    println!("Failed articles:  {}", report.failed_items);
    println!("Comments pending: {}", report.comments_pending);
    if let Some(reason) = report.stop_reason {
        println!("Stopped:          {reason}");
    }
    if report.comments_pending > 0 {
        println!("Run `articlesync backfill-comments` to fetch pending comments.");
    }
    Ok(())
}

async fn run_backfill(config: &SyncConfig) -> Result<()> {
    let mut engine = build_engine(config)?;
    let report = engine
        .backfill_comments()
        .await
        .context("Comments backfill failed")?;

    println!("Pending:    {}", report.pending);
    println!("Backfilled: {}", report.backfilled);
    println!("Failed:     {}", report.failed);
    Ok(())
}

async fn run_check_auth(config: &SyncConfig) -> Result<()> {
    let user_id = config.require_user_id()?;
    let mut engine = build_engine(config)?;
    if engine
        .check_auth(user_id)
        .await
        .context("Authentication check failed")?
    {
        println!("Authentication OK");
        Ok(())
    } else {
        bail!("cookie was not accepted by the upstream; refresh it and try again")
    }
}

fn run_status(config: &SyncConfig) -> Result<()> {
    let storage = FsStorage::new(config.data_dir.clone());
    let manifest = storage.load_manifest().with_context(|| {
        format!(
            "Failed to read manifest '{}'",
            manifest_path(&config.data_dir).display()
        )
    })?;
    let summary = manifest.summary();

    println!("Data dir:         {}", config.data_dir.display());
    println!(
        "User id:          {}",
        summary.user_id.as_deref().unwrap_or("(not synced yet)")
    );
    println!("Articles:         {}", summary.total_entries);
    println!("Comments fetched: {}", summary.comments_fetched);
    println!("Pending backfill: {}", summary.pending_backfill);
    match summary.last_sync {
        Some(at) => println!("Last sync:        {}", at.to_rfc3339()),
        None => println!("Last sync:        never"),
    }
    Ok(())
}
