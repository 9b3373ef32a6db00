//! quantkit CLI: keep a local price history current.
//!
//! Commands:
//! - `update`: fetch missing daily bars for stale (or named) symbols
//! - `bootstrap`: seed the ticker registry from listings, groups, or names
//! - `status`: registry and price store overview
//! - `quality SYMBOL`: print the stored quality record
//! - `clear-bad SYMBOL`: make a bad symbol eligible for updates again

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use quantkit_core::data::{download_listing, load_listing_files, ParquetPriceStore, TickerGroups};
use quantkit_core::registry::{QualityStore, SqliteRegistry, TickerRegistry};
use quantkit_runner::{update_all, UpdateConfig, UpdateError};
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// `EX_TEMPFAIL`: the run was cut short by rate limiting and can be retried.
const EXIT_RATE_LIMITED: i32 = 75;

#[derive(Parser)]
#[command(name = "quantkit", about = "quantkit: daily price history updater")]
struct Cli {
    /// Log at debug level (RUST_LOG overrides).
    #[arg(long, short, global = true, default_value_t = false)]
    verbose: bool,

    /// TOML config file. Flags override its values.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Registry database. Defaults to data/tickers.sqlite.
    #[arg(long, global = true)]
    registry: Option<PathBuf>,

    /// Price data directory. Defaults to data/prices.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch missing bars. Without symbols, every stale registry symbol is updated.
    Update {
        /// Symbols to update (e.g., SPY QQQ AAPL).
        symbols: Vec<String>,

        /// Upper bound on concurrent fetches.
        #[arg(long)]
        max_workers: Option<usize>,

        /// Process symbols one at a time.
        #[arg(long, default_value_t = false)]
        sequential: bool,

        /// Compute the safe-lag date as if today were this date (YYYY-MM-DD).
        #[arg(long)]
        as_of: Option<String>,

        /// Import the exchange listing first if the registry is empty.
        #[arg(long, default_value_t = false)]
        auto_bootstrap: bool,
    },
    /// Seed the registry. Existing symbols are never overwritten.
    Bootstrap {
        /// Ticker groups TOML file.
        #[arg(long, conflicts_with_all = ["nasdaq", "other", "download"])]
        groups: Option<PathBuf>,

        /// Local copy of nasdaqlisted.txt.
        #[arg(long, requires = "other")]
        nasdaq: Option<PathBuf>,

        /// Local copy of otherlisted.txt.
        #[arg(long, requires = "nasdaq")]
        other: Option<PathBuf>,

        /// Download the exchange listing.
        #[arg(long, default_value_t = false)]
        download: bool,

        /// Explicit symbols.
        #[arg(long, num_args = 1..)]
        symbols: Vec<String>,
    },
    /// Registry and price store overview.
    Status,
    /// Print the stored quality record for a symbol as JSON.
    Quality { symbol: String },
    /// Clear the bad flag on a symbol.
    ClearBad { symbol: String },
}

fn init_tracing(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("quantkit_core={level},quantkit_runner={level},quantkit={level}").into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = match &cli.config {
        Some(path) => UpdateConfig::from_file(path)?,
        None => UpdateConfig::default(),
    };
    if let Some(path) = cli.registry {
        config.registry_path = path;
    }
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }
    tracing::debug!(?config, "resolved configuration");

    match cli.command {
        Commands::Update {
            symbols,
            max_workers,
            sequential,
            as_of,
            auto_bootstrap,
        } => {
            if let Some(n) = max_workers {
                config.max_workers = n;
            }
            if sequential {
                config.parallel = false;
            }
            if let Some(s) = as_of {
                config.as_of = Some(parse_date(&s)?);
            }
            config.auto_bootstrap |= auto_bootstrap;
            config.validate()?;
            run_update(symbols, &config)
        }
        Commands::Bootstrap {
            groups,
            nasdaq,
            other,
            download,
            symbols,
        } => run_bootstrap(&config, groups, nasdaq.zip(other), download, symbols),
        Commands::Status => run_status(&config),
        Commands::Quality { symbol } => run_quality(&config, &symbol),
        Commands::ClearBad { symbol } => run_clear_bad(&config, &symbol),
    }
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").with_context(|| format!("invalid date '{s}', expected YYYY-MM-DD"))
}

fn open_registry(config: &UpdateConfig) -> Result<SqliteRegistry> {
    SqliteRegistry::open(&config.registry_path)
        .with_context(|| format!("opening registry {}", config.registry_path.display()))
}

fn run_update(symbols: Vec<String>, config: &UpdateConfig) -> Result<()> {
    let symbols = if symbols.is_empty() {
        None
    } else {
        Some(symbols.into_iter().map(|s| s.trim().to_uppercase()).collect())
    };

    match update_all(symbols, config) {
        Ok(data_dir) => {
            println!("Price data: {}", data_dir.display());
            Ok(())
        }
        Err(UpdateError::RateLimited { summary }) => {
            eprintln!(
                "Rate limited: {} updated, {} not attempted. Retry later.",
                summary.updated, summary.skipped
            );
            std::process::exit(EXIT_RATE_LIMITED);
        }
        Err(e) => Err(e).context("update failed"),
    }
}

fn run_bootstrap(
    config: &UpdateConfig,
    groups: Option<PathBuf>,
    listing_files: Option<(PathBuf, PathBuf)>,
    download: bool,
    symbols: Vec<String>,
) -> Result<()> {
    let mut candidates: Vec<String> = symbols.iter().map(|s| s.trim().to_uppercase()).collect();

    if let Some(path) = groups {
        let groups = TickerGroups::from_file(&path)?;
        candidates.extend(groups.all_symbols());
    }
    if let Some((nasdaq, other)) = listing_files {
        candidates.extend(load_listing_files(&nasdaq, &other)?);
    }
    if download {
        candidates.extend(download_listing(&config.listing)?);
    }
    candidates.retain(|s| !s.is_empty());
    if candidates.is_empty() {
        bail!("nothing to bootstrap: pass --groups, --nasdaq/--other, --download, or --symbols");
    }

    let registry = open_registry(config)?;
    let inserted = registry.bootstrap(&candidates)?;
    println!(
        "Inserted {inserted} new symbols ({} offered) into {}",
        candidates.len(),
        config.registry_path.display()
    );
    Ok(())
}

fn run_status(config: &UpdateConfig) -> Result<()> {
    let registry = open_registry(config)?;
    let stats = registry.stats()?;
    let safe_lag = config.safe_lag_date();
    let stale = registry.list_symbols_needing_update(safe_lag)?;
    let store = ParquetPriceStore::new(&config.data_dir);
    let stored = store.stored_symbols()?;

    let fmt_date = |d: Option<NaiveDate>| d.map(|d| d.to_string()).unwrap_or_else(|| "-".into());

    println!("Registry: {}", config.registry_path.display());
    println!("Price data: {}", config.data_dir.display());
    println!();
    println!("{:<22} {:>10}", "Symbols", stats.total);
    println!("{:<22} {:>10}", "Marked bad", stats.bad);
    println!("{:<22} {:>10}", "With data", stats.with_data);
    println!("{:<22} {:>10}", format!("Stale (< {safe_lag})"), stale.len());
    println!("{:<22} {:>10}", "Stored series", stored.len());
    println!("{:<22} {:>10}", "Oldest last date", fmt_date(stats.earliest_last_date));
    println!("{:<22} {:>10}", "Newest last date", fmt_date(stats.latest_last_date));

    let bad = registry.bad_symbols()?;
    if !bad.is_empty() {
        println!();
        println!("Bad: {}", bad.join(", "));
    }
    Ok(())
}

fn run_quality(config: &UpdateConfig, symbol: &str) -> Result<()> {
    let registry = open_registry(config)?;
    let symbol = symbol.trim().to_uppercase();
    match registry.load_quality(&symbol)? {
        Some(metrics) => {
            println!("{}", serde_json::to_string_pretty(&metrics)?);
            Ok(())
        }
        None => bail!("no quality record for {symbol}"),
    }
}

fn run_clear_bad(config: &UpdateConfig, symbol: &str) -> Result<()> {
    let registry = open_registry(config)?;
    let symbol = symbol.trim().to_uppercase();
    if !registry.clear_bad(&symbol)? {
        bail!("{symbol} is not in the registry");
    }
    println!("{symbol} will be included in the next update");
    Ok(())
}
