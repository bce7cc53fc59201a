//! stockfetch CLI: fetch time series and manage the response cache.
//!
//! Commands:
//! - `fetch`: fetch one series through the cache and print it
//! - `cache status`: report entry counts, freshness and size
//! - `cache clean`: remove stale (or all) entries

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use stockfetch_core::{
    CacheStore, DataClient, FetchConfig, Interval, OhlcvRecord, OutputSize, Query, Series,
    SeriesFunction,
};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(
    name = "stockfetch",
    about = "stockfetch CLI: cached, rate-limit aware market data fetches"
)]
struct Cli {
    /// Path to a TOML config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Cache directory (overrides config and STOCKFETCH_CACHE_DIR).
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Log debug output to stderr (RUST_LOG takes precedence).
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch a time series, using the cache when a fresh entry exists.
    Fetch {
        /// Ticker symbol, 1-5 letters (e.g., AAPL).
        symbol: String,

        /// Series function: daily, daily-adjusted, weekly, weekly-adjusted,
        /// monthly, monthly-adjusted, intraday.
        #[arg(long, default_value = "daily")]
        function: String,

        /// Bar interval for intraday series: 1min, 5min, 15min, 30min, 60min.
        #[arg(long)]
        interval: Option<String>,

        /// Request only the latest 100 points.
        #[arg(long, default_value_t = false)]
        compact: bool,

        /// First date to print (YYYY-MM-DD).
        #[arg(long)]
        start: Option<String>,

        /// Last date to print (YYYY-MM-DD).
        #[arg(long)]
        end: Option<String>,

        /// Ignore any cached entry and fetch from the provider.
        #[arg(long, default_value_t = false)]
        refresh: bool,

        /// Output format.
        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },
    /// Cache management commands.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Report entry counts, freshness and total size.
    Status,
    /// Remove stale and unreadable entries.
    Clean {
        /// Remove every entry, fresh or not.
        #[arg(long, default_value_t = false)]
        all: bool,

        /// Actually delete (without this flag, only previews what would be removed).
        #[arg(long, default_value_t = false)]
        confirm: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Csv,
    Json,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = load_config(cli.config.as_deref(), cli.cache_dir)?;
    tracing::debug!(?config, "loaded configuration");

    match cli.command {
        Commands::Fetch {
            symbol,
            function,
            interval,
            compact,
            start,
            end,
            refresh,
            format,
        } => {
            let query = build_query(&symbol, &function, interval.as_deref(), compact)?;
            let range = parse_range(start.as_deref(), end.as_deref())?;
            run_fetch(&config, &query, range, refresh, format)
        }
        Commands::Cache { action } => {
            let cache = CacheStore::new(&config.cache_dir);
            match action {
                CacheAction::Status => run_cache_status(&cache),
                CacheAction::Clean { all, confirm } => run_cache_clean(&cache, all, confirm),
            }
        }
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr))
        .init();
}

fn load_config(path: Option<&Path>, cache_dir: Option<PathBuf>) -> Result<FetchConfig> {
    let config = match path {
        Some(path) => FetchConfig::from_file(path)?,
        None => FetchConfig::default(),
    };
    let mut config = config.apply_env();
    if let Some(dir) = cache_dir {
        config.cache_dir = dir;
    }
    Ok(config)
}

/// Uppercased 1-5 ASCII letter ticker.
fn validate_symbol(symbol: &str) -> Result<String> {
    let symbol = symbol.trim().to_ascii_uppercase();
    let well_formed = (1..=5).contains(&symbol.len())
        && symbol.chars().all(|c| c.is_ascii_alphabetic());
    if !well_formed {
        bail!("invalid symbol '{symbol}': expected 1-5 letters (e.g., AAPL)");
    }
    Ok(symbol)
}

fn build_query(
    symbol: &str,
    function: &str,
    interval: Option<&str>,
    compact: bool,
) -> Result<Query> {
    let symbol = validate_symbol(symbol)?;
    let function: SeriesFunction = function.parse()?;

    let mut query = Query::new(symbol, function);
    if let Some(interval) = interval {
        query = query.with_interval(interval.parse::<Interval>()?);
    }
    if compact {
        query = query.with_output_size(OutputSize::Compact);
    }
    query.validate()?;
    Ok(query)
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .with_context(|| format!("invalid date '{s}', expected YYYY-MM-DD"))
}

fn parse_range(start: Option<&str>, end: Option<&str>) -> Result<Option<(NaiveDate, NaiveDate)>> {
    if start.is_none() && end.is_none() {
        return Ok(None);
    }
    let start = start.map(parse_date).transpose()?.unwrap_or(NaiveDate::MIN);
    let end = end.map(parse_date).transpose()?.unwrap_or(NaiveDate::MAX);
    if end < start {
        bail!("end date {end} is before start date {start}");
    }
    Ok(Some((start, end)))
}

fn run_fetch(
    config: &FetchConfig,
    query: &Query,
    range: Option<(NaiveDate, NaiveDate)>,
    refresh: bool,
    format: OutputFormat,
) -> Result<()> {
    let client = DataClient::from_config(config)?;

    let outcome = if refresh {
        client.refresh(query)
    } else {
        client.get_series(query)
    };

    let series = match outcome {
        Ok(series) => series,
        Err(e) => {
            eprintln!("Error: {}", e.kind().user_message());
            eprintln!("  {query}: {e}");
            std::process::exit(1);
        }
    };

    let rows = select_rows(&series, range)?;
    match format {
        OutputFormat::Table => print_table(query, &series, rows),
        OutputFormat::Csv => write_csv(rows)?,
        OutputFormat::Json => {
            let stdout = io::stdout();
            let mut out = stdout.lock();
            serde_json::to_writer_pretty(&mut out, rows)?;
            writeln!(out)?;
        }
    }
    Ok(())
}

fn select_rows(series: &Series, range: Option<(NaiveDate, NaiveDate)>) -> Result<&[OhlcvRecord]> {
    match range {
        Some((start, end)) => Ok(series.between(start, end)?),
        None => Ok(series.rows()),
    }
}

fn print_table(query: &Query, series: &Series, rows: &[OhlcvRecord]) {
    let source = if series.served_from_cache() {
        "cache"
    } else {
        "provider"
    };
    println!("{query}: {} row(s) from {source}", rows.len());
    if rows.is_empty() {
        return;
    }

    let adjusted = series.is_adjusted();
    let intraday = query.interval.is_some();
    println!();
    print!(
        "{:<19} {:>10} {:>10} {:>10} {:>10} {:>12}",
        "Timestamp", "Open", "High", "Low", "Close", "Volume"
    );
    if adjusted {
        print!(" {:>10} {:>8}", "Adj Close", "Dividend");
    }
    println!();
    println!("{}", "-".repeat(if adjusted { 95 } else { 76 }));

    for r in rows {
        let stamp = if intraday {
            r.timestamp.format("%Y-%m-%d %H:%M").to_string()
        } else {
            r.date().to_string()
        };
        print!(
            "{:<19} {:>10.2} {:>10.2} {:>10.2} {:>10.2} {:>12}",
            stamp, r.open, r.high, r.low, r.close, r.volume
        );
        if adjusted {
            print!(
                " {:>10.2} {:>8.4}",
                r.adjusted_close.unwrap_or(f64::NAN),
                r.dividend.unwrap_or(0.0)
            );
        }
        println!();
    }
}

fn write_csv(rows: &[OhlcvRecord]) -> Result<()> {
    let mut writer = csv::Writer::from_writer(io::stdout().lock());
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

fn run_cache_status(cache: &CacheStore) -> Result<()> {
    let stats = cache
        .stats(chrono::Utc::now())
        .with_context(|| format!("reading cache {}", cache.dir().display()))?;

    println!("Cache: {}", cache.dir().display());
    println!("Entries: {}", stats.entries);
    println!("  fresh:   {}", stats.fresh);
    println!("  stale:   {}", stats.stale);
    println!("  corrupt: {}", stats.corrupt);
    println!("Total size: {}", format_size(stats.total_bytes));
    if let (Some(oldest), Some(newest)) = (stats.oldest, stats.newest) {
        println!(
            "Stored between {} and {}",
            oldest.format("%Y-%m-%d %H:%M UTC"),
            newest.format("%Y-%m-%d %H:%M UTC")
        );
    }
    Ok(())
}

fn run_cache_clean(cache: &CacheStore, all: bool, confirm: bool) -> Result<()> {
    let now = chrono::Utc::now();
    let stats = cache.stats(now)?;
    let removable = if all {
        stats.entries
    } else {
        stats.stale + stats.corrupt
    };

    if removable == 0 {
        println!("Nothing to remove in {}.", cache.dir().display());
        return Ok(());
    }

    let what = if all { "entries" } else { "stale or unreadable entries" };
    println!("Found {removable} {what} in {}.", cache.dir().display());

    if !confirm {
        println!();
        println!("Dry run; pass --confirm to actually delete.");
        return Ok(());
    }

    let removed = if all {
        cache.clear()?
    } else {
        cache.remove_stale(now)?
    };
    println!("Done. Removed {removed} entr{}.", if removed == 1 { "y" } else { "ies" });
    Ok(())
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
