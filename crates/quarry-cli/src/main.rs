mod targets;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use quarry_client::{ClientConfig, HtmdCleaner, build_orchestrator};
use quarry_core::{
    BatchCoordinator, BatchOptions, Method, Orchestrator, ScrapeOptions, ScrapeRequest,
    ServiceConfig,
};

#[derive(Parser)]
#[command(name = "quarry", version, about = "Resource-governed web content extraction")]
struct Cli {
    /// Print the service metrics snapshot to stderr when done
    #[arg(long, global = true, default_value_t = false)]
    stats: bool,

    /// Allow targets on private/loopback networks
    #[arg(long, global = true, default_value_t = false, env = "QUARRY_ALLOW_PRIVATE")]
    allow_private: bool,

    /// Do not launch Chromium even when built with browser support
    #[arg(long, global = true, default_value_t = false)]
    no_browser: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch one page and print the result envelope as JSON
    Scrape {
        /// Target URL
        #[arg(short, long)]
        url: String,

        #[command(flatten)]
        request: RequestArgs,
    },

    /// Fetch every target in a file (.csv or one URL per line)
    Batch {
        /// Path to the target list
        #[arg(short, long)]
        input: PathBuf,

        /// Maximum simultaneous fetches (defaults to QUARRY_BATCH_CONCURRENCY)
        #[arg(short, long)]
        concurrency: Option<usize>,

        #[command(flatten)]
        request: RequestArgs,
    },
}

#[derive(Args)]
struct RequestArgs {
    /// "auto" or one of: simple, framework, browser, stealth
    #[arg(short, long, default_value = "auto")]
    method: Method,

    /// Overall deadline per target, in seconds
    #[arg(short, long)]
    timeout: Option<u64>,

    /// The page needs JavaScript to render
    #[arg(long, default_value_t = false)]
    render_js: bool,

    /// CSS selector a rendering strategy should wait for
    #[arg(long)]
    wait_for: Option<String>,

    /// Only convert the part of the page matching this CSS selector
    #[arg(long)]
    selector: Option<String>,

    /// Include outbound links in the result
    #[arg(long, default_value_t = false)]
    links: bool,

    /// Never try another strategy after the first one fails
    #[arg(long, default_value_t = false)]
    no_fallback: bool,
}

impl RequestArgs {
    fn options(&self) -> ScrapeOptions {
        ScrapeOptions {
            render_js: self.render_js,
            wait_for: self.wait_for.clone(),
            include_links: self.links,
            allow_fallback: self.no_fallback.then_some(false),
            extract_config: self
                .selector
                .as_ref()
                .map(|css| serde_json::json!({ "css_selector": css })),
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("quarry=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut service = ServiceConfig::from_env().context("Invalid QUARRY_* configuration")?;
    if let Commands::Batch {
        concurrency: Some(n),
        ..
    } = &cli.command
    {
        service.batch_concurrency = *n;
    }

    let client = ClientConfig {
        fetch_timeout: service.request_timeout.min(Duration::from_secs(120)),
        allow_private_urls: cli.allow_private,
        enable_browser: !cli.no_browser,
    };
    let orchestrator = Arc::new(
        build_orchestrator(&service, &client)
            .await
            .context("Failed to set up fetch strategies")?,
    );

    let outcome = match cli.command {
        Commands::Scrape { url, request } => cmd_scrape(&orchestrator, url, &request).await,
        Commands::Batch { input, request, .. } => {
            let batch = BatchCoordinator::from_config(Arc::clone(&orchestrator), &service)
                .context("Invalid batch configuration")?;
            cmd_batch(&batch, &input, &request).await
        }
    };

    if cli.stats {
        let metrics = orchestrator.get_metrics().await;
        eprintln!("{}", serde_json::to_string_pretty(&metrics)?);
    }

    outcome
}

async fn cmd_scrape(
    orchestrator: &Orchestrator<HtmdCleaner>,
    url: String,
    args: &RequestArgs,
) -> Result<()> {
    let mut request = ScrapeRequest::new(url)
        .with_method(args.method)
        .with_options(args.options());
    request.timeout_secs = args.timeout;

    let envelope = orchestrator.scrape(&request).await;
    println!("{}", serde_json::to_string_pretty(&envelope)?);

    if let Some(error) = &envelope.error {
        bail!("Scrape failed ({}): {}", error.category, error.message);
    }
    Ok(())
}

async fn cmd_batch(
    batch: &BatchCoordinator<HtmdCleaner>,
    input: &std::path::Path,
    args: &RequestArgs,
) -> Result<()> {
    let targets = targets::read_targets(input)?;
    tracing::info!(count = targets.len(), "Loaded targets from {}", input.display());

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl-C received, finishing in-flight targets");
            on_ctrl_c.cancel();
        }
    });

    let options = BatchOptions {
        method: args.method,
        options: args.options(),
        timeout_secs: args.timeout,
    };
    let report = batch
        .run_batch(&targets, &options, &cancel)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;

    println!("{}", serde_json::to_string_pretty(&report)?);

    tracing::info!(
        succeeded = report.summary.succeeded,
        failed = report.summary.failed,
        cancelled = report.summary.cancelled,
        elapsed_ms = report.elapsed_ms,
        "Batch complete"
    );
    Ok(())
}
