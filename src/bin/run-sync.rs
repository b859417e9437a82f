use clap::Parser;
use listen_sync::enrich::enrich_metadata;
use listen_sync::spotify::SpotifyClient;
use listen_sync::token::TokenPersistence;
use listen_sync::types::format_timestamp_ms;
use listen_sync::{CancellationState, Result, RunConfig, SyncConfig, SyncRunner};
use std::time::Duration;

/// Incrementally sync recently played tracks into the configured sink
#[derive(Parser)]
#[command(
    name = "run-sync",
    about = "Incrementally sync recently played tracks into the configured sink",
    long_about = None
)]
struct Cli {
    /// Show detailed debug information
    #[arg(long)]
    verbose: bool,

    /// Fetch and normalize, but never write the sink or the watermark
    #[arg(long)]
    dry_run: bool,

    /// Do not look up track and artist metadata after committing
    #[arg(long)]
    skip_enrichment: bool,

    /// Items per page request (1-50), overrides SYNC_PAGE_SIZE
    #[arg(long)]
    page_size: Option<u32>,

    /// Pause between page requests, overrides SYNC_MIN_INTERVAL_MS
    #[arg(long)]
    min_interval_ms: Option<u64>,

    /// Abort the fetch after this many seconds, overrides SYNC_RUN_TIMEOUT_SECS
    #[arg(long)]
    timeout_secs: Option<u64>,
}

#[tokio::main]
async fn main() {
    let args = Cli::parse();

    let default_filter = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    if let Err(e) = run(args).await {
        eprintln!("❌ Sync failed: {e}");
        if let listen_sync::SyncError::Config(_) = e {
            eprintln!();
            eprintln!("Required environment variables:");
            eprintln!("  API_CLIENT_ID, API_CLIENT_SECRET, API_REDIRECT_URI, SINK_CONNECTION");
        }
        std::process::exit(e.exit_code());
    }
}

async fn run(args: Cli) -> Result<()> {
    let mut config = SyncConfig::from_env()?;
    if let Some(page_size) = args.page_size {
        config.fetch.page_size = page_size;
    }
    if let Some(ms) = args.min_interval_ms {
        config.fetch.min_interval = Duration::from_millis(ms);
    }
    if let Some(secs) = args.timeout_secs {
        config.run_timeout = Some(Duration::from_secs(secs));
    }
    config.fetch.validate()?;

    let api = SpotifyClient::connect(
        Box::new(http_client::native::NativeClient::new()),
        config.credentials.clone(),
        config.refresh_token.clone(),
        TokenPersistence::for_client(&config.credentials.client_id)?,
    )?;
    let sink = config.sink.connect().await?;
    let store = config.watermark_store()?;
    log::debug!("Watermark file: {}", store.path().display());

    let cancellation = CancellationState::new();
    let on_interrupt = cancellation.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted, cancelling run");
            on_interrupt.cancel();
        }
    });

    let min_interval = config.fetch.min_interval;
    let runner = SyncRunner::new(
        api,
        sink,
        store,
        RunConfig {
            fetch: config.fetch,
            run_timeout: config.run_timeout,
            dry_run: args.dry_run,
        },
    )
    .with_cancellation(cancellation.clone());

    let report = runner.run_once().await?;

    if report.committed && !report.batch.is_empty() && !args.skip_enrichment {
        enrich_metadata(
            runner.api(),
            runner.sink(),
            &report.batch,
            min_interval,
            Some(cancellation.subscribe()),
        )
        .await;
    }

    let prefix = if args.dry_run { "[dry run] " } else { "" };
    println!(
        "{prefix}{} new plays in {} requests, watermark {} -> {}",
        report.events(),
        report.requests,
        format_timestamp_ms(report.old_watermark),
        format_timestamp_ms(report.new_watermark)
    );
    Ok(())
}
