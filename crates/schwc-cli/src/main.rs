mod config;

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use schwc_core::{Actor, SearchCapability};
use schwc_crawl::{resolve, CrawlOrchestrator, ResolveOptions, RunReport, StopSignal};
use schwc_store::{
    AnnotationLedger, CatalogCache, CatalogTable, LedgerSources, SearchHistory,
};
use schwc_sync::{BingCredentials, BingSearch, GoogleCredentials, GoogleSearch, HttpCatalogFetcher};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::{
    existing_folder, load_config, load_credentials, DataHome, FileConfig, Provider,
};

#[derive(Parser)]
#[command(
    name = "schwordcloud",
    version,
    about = "Search the web for certified products that have no word cloud yet"
)]
struct Cli {
    /// Path to config TOML file
    #[arg(long, env = "SCHWC_CONFIG", default_value = "./config.toml", global = true)]
    config: PathBuf,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Also append the log to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Resolve the backlog and search it (default)
    Run(RunArgs),
    /// Print the backlog without searching
    Backlog(BacklogArgs),
}

#[derive(Args, Default)]
struct SelectionArgs {
    /// Product category to search: any, 1, 2 or 3
    #[arg(long)]
    category: Option<String>,

    /// Keep catalog order instead of shuffling
    #[arg(long)]
    no_shuffle: bool,

    /// Download the catalog even if the local copy is fresh
    #[arg(long)]
    force_download: bool,
}

#[derive(Args, Default)]
struct RunArgs {
    #[command(flatten)]
    selection: SelectionArgs,

    /// Stop after this many items
    #[arg(long)]
    max_items: Option<usize>,

    /// Resolve the backlog and exit before searching
    #[arg(long)]
    dry_run: bool,
}

#[derive(Args)]
struct BacklogArgs {
    #[command(flatten)]
    selection: SelectionArgs,

    /// Number of keys to print
    #[arg(long, default_value_t = 20)]
    limit: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_file.as_deref())?;
    info!("schwordcloud v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&cli.config)?;
    match cli.command.unwrap_or_else(|| Command::Run(RunArgs::default())) {
        Command::Run(args) => run(&config, args).await,
        Command::Backlog(args) => backlog(&config, args).await,
    }
}

fn init_tracing(verbose: bool, log_file: Option<&Path>) -> Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file: {}", path.display()))?;
            Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
    Ok(())
}

/// Everything loaded before the backlog can be resolved.
struct Session {
    home: DataHome,
    catalog: CatalogTable,
    ledger: AnnotationLedger,
    resolve: ResolveOptions,
}

async fn prepare(config: &FileConfig, selection: &SelectionArgs) -> Result<Session> {
    let home = DataHome::bootstrap(DataHome::locate(config.data_home.as_deref()))?;
    info!(data_home = %home.root.display(), "data home ready");
    let get_folder = existing_folder(&config.cloud.annotation_get_folder, "annotation get")?;
    let post_folder = existing_folder(&config.cloud.annotation_post_folder, "annotation post")?;

    let mut catalog_opts = config.catalog.options();
    if selection.force_download {
        catalog_opts.force = true;
    }
    let fetcher = HttpCatalogFetcher::new(config.catalog.url.clone(), catalog_opts.timeout)?;
    let catalog = CatalogCache::new(&home.sch, Arc::new(fetcher))
        .load(&catalog_opts)
        .await
        .context("Failed to load the product catalog")?;

    let ledger = AnnotationLedger::load(
        &LedgerSources::in_folder(&get_folder),
        &home.annotation,
        post_folder,
        Actor::from_env(),
    )
    .context("Failed to load the annotation ledger")?;

    let mut resolve = config.search.resolve_options()?;
    if let Some(raw) = &selection.category {
        resolve.category = raw.parse().map_err(anyhow::Error::msg)?;
    }
    if selection.no_shuffle {
        resolve.shuffle = false;
    }

    Ok(Session {
        home,
        catalog,
        ledger,
        resolve,
    })
}

fn search_provider(config: &FileConfig) -> Result<Box<dyn SearchCapability>> {
    let credentials = load_credentials(config.credentials.file.as_deref())?;
    let timeout = Duration::from_secs(config.search.timeout_secs);
    let provider: Box<dyn SearchCapability> = match config.search.provider {
        Provider::Google => {
            let creds: GoogleCredentials = credentials
                .try_into()
                .context("Invalid Google credentials")?;
            Box::new(GoogleSearch::new(creds, timeout)?)
        }
        Provider::Bing => {
            let creds: BingCredentials =
                credentials.try_into().context("Invalid Bing credentials")?;
            Box::new(BingSearch::new(creds, timeout)?)
        }
    };
    Ok(provider)
}

async fn run(config: &FileConfig, args: RunArgs) -> Result<()> {
    let session = prepare(config, &args.selection).await?;
    let mut worklist = resolve(&session.catalog, &session.ledger, &session.resolve);
    println!(
        "{} items in backlog ({} catalog rows, {} ledger rows)",
        worklist.len(),
        session.catalog.len(),
        session.ledger.len()
    );
    if args.dry_run {
        return Ok(());
    }
    if worklist.is_empty() {
        info!("backlog is empty, nothing to search");
        return Ok(());
    }

    let search = search_provider(config)?;
    let mut crawl_opts = config.search.crawl_options();
    if args.max_items.is_some() {
        crawl_opts.max_items = args.max_items;
    }

    let stop = StopSignal::new();
    let handle = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after the current item");
            handle.stop();
        }
    });

    let mut ledger = session.ledger;
    let mut history = SearchHistory::in_folder(&session.home.search_results);
    let outcome = CrawlOrchestrator::new(crawl_opts)
        .run(&mut worklist, search.as_ref(), &mut ledger, &mut history, &stop)
        .await;

    match outcome {
        Ok(report) => {
            print_report(&report);
            Ok(())
        }
        Err(e) => {
            print_report(e.report());
            Err(e.into())
        }
    }
}

async fn backlog(config: &FileConfig, args: BacklogArgs) -> Result<()> {
    let session = prepare(config, &args.selection).await?;
    let worklist = resolve(&session.catalog, &session.ledger, &session.resolve);
    println!(
        "{} items in backlog (category {}, grace period {} days)",
        worklist.len(),
        session.resolve.category,
        session.resolve.grace_period_days
    );
    for key in worklist.iter().take(args.limit) {
        println!("  {}", key.display_form());
    }
    if worklist.len() > args.limit {
        println!("  ... and {} more", worklist.len() - args.limit);
    }
    Ok(())
}

fn print_report(report: &RunReport) {
    println!("Processed:  {}", report.processed);
    println!("  positive: {}", report.positive);
    println!("  null:     {}", report.null);
    println!("  exhausted: {}", report.exhausted);
    println!("Remaining:  {}", report.remaining);
    if let Some(reason) = &report.stopped {
        println!("Stopped early: {reason}");
    }
    if let Some(path) = &report.flush.positive_file {
        println!("Annotations: {}", path.display());
    }
    println!(
        "Saved: {} positive, {} null, {} history rows",
        report.flush.positive_written, report.flush.null_written, report.history_rows
    );
}
