//! NiftyFetch CLI: download, update and inspect Nifty-50 candle data.
//!
//! Commands:
//! - `download`: fetch a fixed window for every symbol and overwrite storage
//! - `update`: extend each persisted series up to now
//! - `symbols`: print the symbol directory and provider identifiers
//! - `status`: report rows and date range per persisted symbol

use anyhow::{bail, Context, Result};
use chrono::{NaiveDateTime, Utc};
use clap::{Args, Parser, Subcommand};
use niftyfetch_core::data::session::ist;
use niftyfetch_core::data::{
    strip_exchange_suffix, Authenticator, CandleProvider, FivePaisaAuthenticator,
    FivePaisaProvider, SymbolDirectory, YahooProvider, NIFTY50, NSE_SUFFIX,
};
use niftyfetch_core::domain::{parse_timestamp, FetchWindow, Granularity, Interval};
use niftyfetch_core::store::{CsvStore, SeriesStore, SqliteStore};
use niftyfetch_runner::{
    download, update, BatchFetcher, LogProgress, ProviderKind, RunConfig, RunReport,
    StorageBackend, UpdatePlan,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "niftyfetch",
    about = "NiftyFetch: batch download of Nifty-50 OHLCV candles"
)]
struct Cli {
    /// TOML config file. Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug-level logging (RUST_LOG takes precedence).
    #[arg(long, short, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by `download` and `update`.
#[derive(Args, Debug, Clone)]
struct FetchArgs {
    /// Symbols (e.g. RELIANCE TCS). Empty means the configured list or the Nifty-50.
    symbols: Vec<String>,

    /// Candle interval: 1m, 5m, 10m, 15m, 30m, 60m, 1d.
    #[arg(long)]
    interval: Option<Interval>,

    /// Data provider: yahoo or fivepaisa.
    #[arg(long)]
    provider: Option<ProviderKind>,

    /// Fetch symbols on a worker pool instead of one at a time.
    #[arg(long, default_value_t = false)]
    concurrent: bool,

    /// Worker threads for --concurrent.
    #[arg(long)]
    workers: Option<usize>,

    /// Calls allowed per rate window before pausing.
    #[arg(long)]
    rate_ceiling: Option<u32>,

    /// One-time password for the brokerage login.
    #[arg(long)]
    totp: Option<String>,

    /// Two-column symbol,scrip-code file for the brokerage.
    #[arg(long)]
    lookup: Option<PathBuf>,

    /// Directory of per-symbol CSV files.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Write to this SQLite database instead of CSV files.
    #[arg(long)]
    sqlite: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Download a fixed window for every symbol, overwriting stored data.
    Download {
        #[command(flatten)]
        fetch: FetchArgs,

        /// Start (YYYY-MM-DD or YYYY-MM-DD HH:MM:SS). Defaults to the history start.
        #[arg(long)]
        start: Option<String>,

        /// Exclusive end. Defaults to now.
        #[arg(long)]
        end: Option<String>,
    },
    /// Append rows newer than each symbol's last stored timestamp.
    Update {
        #[command(flatten)]
        fetch: FetchArgs,

        /// Fetch from here for every symbol that already has data.
        #[arg(long)]
        from: Option<String>,

        /// Read existing CSV series from this directory instead of --data-dir.
        #[arg(long)]
        load_dir: Option<PathBuf>,
    },
    /// Print the symbol directory and provider identifiers.
    Symbols {
        /// Two-column symbol,scrip-code file; defaults to Yahoo tickers.
        #[arg(long)]
        lookup: Option<PathBuf>,
    },
    /// Report rows and date range for every stored symbol.
    Status {
        /// Directory of per-symbol CSV files.
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Inspect this SQLite database instead.
        #[arg(long)]
        sqlite: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = match &cli.config {
        Some(path) => RunConfig::from_file(path)?,
        None => RunConfig::default(),
    };
    config.apply_env();

    match cli.command {
        Commands::Download { fetch, start, end } => run_download(config, fetch, start, end),
        Commands::Update {
            fetch,
            from,
            load_dir,
        } => run_update(config, fetch, from, load_dir),
        Commands::Symbols { lookup } => run_symbols(&config, lookup),
        Commands::Status { data_dir, sqlite } => run_status(config, data_dir, sqlite),
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();
}

fn run_download(
    mut config: RunConfig,
    args: FetchArgs,
    start: Option<String>,
    end: Option<String>,
) -> Result<()> {
    apply_fetch_args(&mut config, &args)?;

    let start = match start.as_deref() {
        Some(s) => parse_cli_time(s, "--start")?,
        None => config.history_start(),
    };
    let end = match end.as_deref() {
        Some(s) => parse_cli_time(s, "--end")?,
        None => exchange_now(),
    };
    let window = FetchWindow::new(start, end, config.fetch.interval)?;

    let symbols = requested_symbols(&config, &args);
    let fetcher = build_fetcher(&config, &symbols, args.totp.as_deref())?;
    let store = open_store(&config, config.storage.data_dir.clone())?;

    tracing::info!(
        provider = fetcher.provider_name(),
        store = %store.describe(),
        symbols = symbols.len(),
        start = %window.start(),
        end = %window.end(),
        interval = %config.fetch.interval,
        "download"
    );
    let report = download(&fetcher, store.as_ref(), &symbols, window, &LogProgress)?;
    finish(report)
}

fn run_update(
    mut config: RunConfig,
    args: FetchArgs,
    from: Option<String>,
    load_dir: Option<PathBuf>,
) -> Result<()> {
    apply_fetch_args(&mut config, &args)?;
    if let Some(dir) = load_dir {
        config.storage.load_dir = Some(dir);
    }
    let update_from = from
        .as_deref()
        .map(|s| parse_cli_time(s, "--from"))
        .transpose()?;

    let symbols = requested_symbols(&config, &args);
    let fetcher = build_fetcher(&config, &symbols, args.totp.as_deref())?;
    let save_store = open_store(&config, config.storage.data_dir.clone())?;
    let load_store: Box<dyn SeriesStore> = match (&config.storage.load_dir, config.storage.backend) {
        (Some(dir), StorageBackend::Csv) => Box::new(CsvStore::new(dir)),
        (Some(_), StorageBackend::Sqlite) => bail!("--load-dir applies to the csv backend only"),
        (None, _) => open_store(&config, config.storage.data_dir.clone())?,
    };

    let plan = UpdatePlan {
        update_from,
        history_start: config.history_start(),
        load_store: load_store.as_ref(),
        ..UpdatePlan::new(
            symbols,
            save_store.as_ref(),
            config.fetch.interval,
            exchange_now(),
        )
    };

    tracing::info!(
        provider = fetcher.provider_name(),
        load = %plan.load_store.describe(),
        save = %plan.save_store.describe(),
        symbols = plan.symbols.len(),
        interval = %config.fetch.interval,
        "update"
    );
    let report = update(&fetcher, &plan, &LogProgress)?;
    finish(report)
}

fn run_symbols(config: &RunConfig, lookup: Option<PathBuf>) -> Result<()> {
    let directory = match lookup.or_else(|| config.symbols.lookup_file.clone()) {
        Some(path) => load_lookup(&path)?,
        None => SymbolDirectory::nifty50_yahoo(),
    };

    println!("{:<14} {:>14}", "Symbol", "Provider ID");
    println!("{}", "-".repeat(29));
    for symbol in directory.symbols() {
        println!("{:<14} {:>14}", symbol, directory.resolve(symbol).unwrap_or("-"));
    }
    println!("\n{} symbols", directory.len());
    Ok(())
}

fn run_status(
    mut config: RunConfig,
    data_dir: Option<PathBuf>,
    sqlite: Option<PathBuf>,
) -> Result<()> {
    if let Some(path) = sqlite {
        config.storage.backend = StorageBackend::Sqlite;
        config.storage.sqlite_path = path;
    }
    let dir = data_dir.unwrap_or_else(|| config.storage.data_dir.clone());
    let store = open_store(&config, dir)?;

    let keys = store.list()?;
    if keys.is_empty() {
        println!("No stored series in {}", store.describe());
        return Ok(());
    }

    println!("Store: {}", store.describe());
    println!(
        "{:<16} {:>8}  {:<20} {:<20}",
        "Symbol", "Rows", "First", "Last"
    );
    println!("{}", "-".repeat(68));
    for key in &keys {
        let series = store
            .load(key, Granularity::Daily)
            .with_context(|| format!("loading {key}"))?;
        let fmt = series.granularity().timestamp_format();
        let show = |t: Option<NaiveDateTime>| {
            t.map(|t| t.format(fmt).to_string())
                .unwrap_or_else(|| "-".into())
        };
        println!(
            "{:<16} {:>8}  {:<20} {:<20}",
            key,
            series.len(),
            show(series.first_timestamp()),
            show(series.last_timestamp())
        );
    }
    Ok(())
}

// ── Helpers ──────────────────────────────────────────────────────────

/// CLI flags win over the config file.
fn apply_fetch_args(config: &mut RunConfig, args: &FetchArgs) -> Result<()> {
    if let Some(interval) = args.interval {
        config.fetch.interval = interval;
    }
    if let Some(provider) = args.provider {
        config.fetch.provider = provider;
    }
    if args.concurrent {
        config.fetch.concurrent = true;
    }
    if let Some(workers) = args.workers {
        config.fetch.workers = workers;
    }
    if args.rate_ceiling.is_some() {
        config.fetch.rate_ceiling = args.rate_ceiling;
    }
    if let Some(path) = &args.lookup {
        config.symbols.lookup_file = Some(path.clone());
    }
    if let Some(dir) = &args.data_dir {
        config.storage.data_dir = dir.clone();
    }
    if let Some(path) = &args.sqlite {
        config.storage.backend = StorageBackend::Sqlite;
        config.storage.sqlite_path = path.clone();
    }
    config.validate()?;
    Ok(())
}

fn requested_symbols(config: &RunConfig, args: &FetchArgs) -> Vec<String> {
    let raw: Vec<String> = if !args.symbols.is_empty() {
        args.symbols.clone()
    } else if !config.symbols.list.is_empty() {
        config.symbols.list.clone()
    } else {
        NIFTY50.iter().map(|s| s.to_string()).collect()
    };
    raw.iter()
        .map(|s| strip_exchange_suffix(s.trim()).to_uppercase())
        .filter(|s| !s.is_empty())
        .collect()
}

fn build_fetcher(config: &RunConfig, symbols: &[String], totp: Option<&str>) -> Result<BatchFetcher> {
    let (provider, directory): (Arc<dyn CandleProvider>, SymbolDirectory) =
        match config.fetch.provider {
            ProviderKind::Yahoo => {
                let provider: Arc<dyn CandleProvider> = Arc::new(YahooProvider::new()?);
                (provider, SymbolDirectory::with_suffix(symbols, NSE_SUFFIX))
            }
            ProviderKind::FivePaisa => {
                let Some(path) = &config.symbols.lookup_file else {
                    bail!("fivepaisa needs a scrip-code lookup file (--lookup or symbols.lookup_file)");
                };
                let Some(otp) = totp else {
                    bail!("fivepaisa needs a one-time password (--totp)");
                };
                let session = FivePaisaAuthenticator::new()?
                    .authenticate(&config.fivepaisa, otp)
                    .context("5paisa login failed")?;
                tracing::info!(
                    client = session.client_code(),
                    expires = %session.expires_at(),
                    "logged in"
                );
                let provider: Arc<dyn CandleProvider> = Arc::new(FivePaisaProvider::new(session)?);
                (provider, load_lookup(path)?)
            }
        };
    Ok(BatchFetcher::new(
        provider,
        Arc::new(directory),
        config.batch_options(),
    ))
}

fn load_lookup(path: &Path) -> Result<SymbolDirectory> {
    SymbolDirectory::from_lookup_file(path)
        .with_context(|| format!("reading lookup file {}", path.display()))
}

fn open_store(config: &RunConfig, data_dir: PathBuf) -> Result<Box<dyn SeriesStore>> {
    let store: Box<dyn SeriesStore> = match config.storage.backend {
        StorageBackend::Csv => Box::new(CsvStore::new(data_dir)),
        StorageBackend::Sqlite => Box::new(SqliteStore::open(&config.storage.sqlite_path)?),
    };
    Ok(store)
}

fn parse_cli_time(raw: &str, flag: &str) -> Result<NaiveDateTime> {
    match parse_timestamp(raw) {
        Some(t) => Ok(t),
        None => bail!("{flag}: expected YYYY-MM-DD or YYYY-MM-DD HH:MM:SS, got '{raw}'"),
    }
}

/// Wall-clock time at the exchange; stored candles use exchange-local time.
fn exchange_now() -> NaiveDateTime {
    Utc::now().with_timezone(&ist()).naive_local()
}

fn finish(report: RunReport) -> Result<()> {
    println!(
        "\n{} saved ({} new, {} updated, {} up to date), {} failed; {} calls, {} rate pauses",
        report.saved.len(),
        report.first_time.len(),
        report.incremental.len(),
        report.up_to_date.len(),
        report.failures.len(),
        report.calls,
        report.pauses
    );

    if !report.all_succeeded() {
        for (symbol, err) in &report.failures {
            tracing::error!(symbol = %symbol, error = %err, "symbol failed");
            eprintln!("Error for {symbol}: {err}");
        }
        std::process::exit(1);
    }
    Ok(())
}
