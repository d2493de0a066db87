//! # Sales Import
//!
//! Re-aggregates POS sales into the daily tables the reports read first.
//!
//! ## Usage
//! ```bash
//! # Import the last 7 days, ending yesterday
//! cargo run -p backoffice-db --bin import-sales
//!
//! # Import an explicit range, replacing days already imported
//! cargo run -p backoffice-db --bin import-sales -- \
//!     --start-date 2025-01-01 --end-date 2025-01-31 --force
//!
//! # Override the database paths from the config file
//! cargo run -p backoffice-db --bin import-sales -- --db ./office.db --pos-db ./pos.db
//! ```

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use backoffice_core::calendar::{Clock, SystemClock};
use backoffice_core::DateRange;
use backoffice_db::aggregation::SalesEngine;
use backoffice_db::pos::SqlitePosSource;
use backoffice_db::pool;
use backoffice_db::{telemetry, BackofficeConfig, Database};
use chrono::{Days, NaiveDate};
use tracing::{error, info};

const DEFAULT_DAYS: u64 = 7;

fn print_usage() {
    println!("Back Office Sales Import");
    println!();
    println!("Usage: import-sales [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --start-date <YYYY-MM-DD>  First day to import");
    println!("  --end-date <YYYY-MM-DD>    Last day to import (default: yesterday)");
    println!("  --days <N>                 Days ending at --end-date (default: 7)");
    println!("  --force                    Replace days that were already imported");
    println!("  --db <PATH>                Back office database path");
    println!("  --pos-db <PATH>            POS database path");
    println!("  --config <PATH>            Config file (default: platform config dir)");
    println!("  -h, --help                 Show this help message");
}

fn parse_date(flag: &str, value: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| format!("{} expects YYYY-MM-DD, got '{}'", flag, value))
}

#[derive(Debug, Default)]
struct Args {
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    days: Option<u64>,
    force: bool,
    db: Option<PathBuf>,
    pos_db: Option<PathBuf>,
    config: Option<PathBuf>,
    help: bool,
}

fn parse_args(args: &[String]) -> Result<Args, String> {
    let mut parsed = Args::default();
    let mut i = 1;

    while i < args.len() {
        let flag = args[i].as_str();
        let value = || {
            args.get(i + 1)
                .cloned()
                .ok_or_else(|| format!("{} requires a value", flag))
        };

        match flag {
            "--start-date" => {
                parsed.start = Some(parse_date(flag, &value()?)?);
                i += 1;
            }
            "--end-date" => {
                parsed.end = Some(parse_date(flag, &value()?)?);
                i += 1;
            }
            "--days" => {
                let raw = value()?;
                let days = raw
                    .parse::<u64>()
                    .ok()
                    .filter(|d| *d > 0)
                    .ok_or_else(|| format!("--days expects a positive number, got '{}'", raw))?;
                parsed.days = Some(days);
                i += 1;
            }
            "--db" => {
                parsed.db = Some(PathBuf::from(value()?));
                i += 1;
            }
            "--pos-db" => {
                parsed.pos_db = Some(PathBuf::from(value()?));
                i += 1;
            }
            "--config" => {
                parsed.config = Some(PathBuf::from(value()?));
                i += 1;
            }
            "--force" => parsed.force = true,
            "--help" | "-h" => parsed.help = true,
            other => return Err(format!("unknown option '{}'", other)),
        }
        i += 1;
    }

    Ok(parsed)
}

/// Resolves the range to import. Without an explicit start, the window is
/// `days` long and ends at `end`, which defaults to yesterday.
fn import_range(args: &Args, today: NaiveDate) -> Result<DateRange, String> {
    let yesterday = today
        .checked_sub_days(Days::new(1))
        .ok_or("date out of range")?;
    let end = args.end.unwrap_or(yesterday);

    let start = match args.start {
        Some(start) => start,
        None => {
            let days = args.days.unwrap_or(DEFAULT_DAYS);
            end.checked_sub_days(Days::new(days - 1))
                .ok_or("date out of range")?
        }
    };

    DateRange::new(start, end).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let raw: Vec<String> = env::args().collect();
    let args = match parse_args(&raw) {
        Ok(args) => args,
        Err(message) => {
            eprintln!("error: {}", message);
            eprintln!();
            print_usage();
            std::process::exit(2);
        }
    };

    if args.help {
        print_usage();
        return Ok(());
    }

    let mut config = BackofficeConfig::load(args.config.clone())?;
    if let Some(path) = &args.db {
        config.database.path = path.clone();
    }
    if let Some(path) = &args.pos_db {
        config.pos.path = path.clone();
    }

    telemetry::init_tracing(&config.logging.filter)
        .map_err(|e| format!("cannot initialize logging: {}", e))?;

    let range = import_range(&args, SystemClock.today())?;
    info!(
        start = %range.start,
        end = %range.end,
        force = args.force,
        db = %config.database.path.display(),
        pos_db = %config.pos.path.display(),
        "Starting sales import"
    );

    let db = Database::new(config.db_config()).await?;
    db.vat_rates().seed_defaults().await?;
    let pos = SqlitePosSource::new(pool::connect(&config.pos_db_config()).await?);
    let engine = SalesEngine::new(db.clone(), Arc::new(pos));

    let report = match engine.import(range, args.force).await {
        Ok(report) => report,
        Err(e) => {
            error!(error = %e, "Sales import failed");
            db.close().await;
            return Err(e.into());
        }
    };

    println!("✓ Imported {} days ({} skipped)", report.days_imported, report.days_skipped);
    println!("  POS lines read: {}", report.lines_read);
    println!("  Aggregate rows written: {}", report.rows_written);

    db.close().await;
    Ok(())
}
