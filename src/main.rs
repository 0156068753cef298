mod batch;
mod enrich;
mod fetcher;
mod launch;
mod oracle;
mod output;
mod paginator;
mod parser;
mod query;
mod settings;
#[cfg(test)]
mod testutil;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use chrono::{Local, Utc};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};

use batch::{collect_pages, parse_pages, targets_from_config, BatchOptions, HttpSessions};
use enrich::rate::fetch_pln_eur_rate;
use enrich::{Enricher, MarketEnricher, RawTable};
use output::{dated_csv_path, write_table, PROCESSED_PREFIX, RAW_PREFIX};
use paginator::{PaginationOptions, Target};
use parser::merge::MatchConfidence;
use query::{build_search_url, parse_manual_url, Filters, Query};
use settings::{ScrapeConfig, Settings};

#[derive(Parser)]
#[command(name = "otomoto_scraper", about = "otomoto.pl car listing scraper")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape every car in the query set (or one search URL) and write the CSVs
    Run {
        /// Paginate this search URL instead of the query set
        #[arg(long)]
        url: Option<String>,
        /// Save every page with listings under html_snapshots/
        #[arg(long)]
        snapshots: bool,
        /// Only write the raw CSV
        #[arg(long)]
        no_enrich: bool,
    },
    /// Save a query set and run the scraper as a child process, relaying its output
    Launch {
        /// Query-set JSON to persist (default: the one already in the data dir)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Print the search URL for a brand/model
    Url {
        #[arg(long)]
        brand: String,
        #[arg(long)]
        model: String,
        #[command(flatten)]
        filters: FilterArgs,
        #[arg(long)]
        page: Option<u32>,
    },
    /// Extract + merge saved HTML snapshots and report record counts
    Parse {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

#[derive(Args)]
struct FilterArgs {
    #[arg(long, default_value_t = 2019)]
    year_from: u32,
    #[arg(long, default_value_t = 2022)]
    year_to: u32,
    #[arg(long, default_value_t = 50000)]
    price_from: u64,
    #[arg(long, default_value_t = 75000)]
    price_to: u64,
    #[arg(long, default_value_t = 150000)]
    mileage_to: u64,
    #[arg(long, default_value = "petrol")]
    fuel_type: String,
    #[arg(long, default_value = "manual")]
    gearbox: String,
    /// Include damaged cars
    #[arg(long)]
    allow_damaged: bool,
}

impl From<FilterArgs> for Filters {
    fn from(a: FilterArgs) -> Self {
        Filters {
            year_from: a.year_from,
            year_to: a.year_to,
            price_from: a.price_from,
            price_to: a.price_to,
            mileage_to: a.mileage_to,
            fuel_type: a.fuel_type,
            gearbox: a.gearbox,
            accident_free: !a.allow_damaged,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            url,
            snapshots,
            no_enrich,
        } => {
            let settings = Settings::load()?;
            run(&settings, url, snapshots, no_enrich).await
        }
        Commands::Launch { config } => {
            let settings = Settings::load()?;
            let path = config.unwrap_or_else(|| settings.query_set_path());
            let query_set = ScrapeConfig::load(&path)?;
            let status = launch::launch(&query_set, &settings).await?;
            if !status.success() {
                bail!("scraper exited with {}", status);
            }
            Ok(())
        }
        Commands::Url {
            brand,
            model,
            filters,
            page,
        } => {
            let q = Query::new(&brand, &model, filters.into())?;
            println!("{}", build_search_url(&q, page));
            Ok(())
        }
        Commands::Parse { files } => {
            parse_snapshots(&files);
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        info!("Done in {}", format_duration(elapsed));
    }

    result
}

async fn run(
    settings: &Settings,
    url: Option<String>,
    snapshots: bool,
    no_enrich: bool,
) -> Result<()> {
    info!("Started at {}", Utc::now().to_rfc3339());
    let save_snapshots = snapshots || settings.save_snapshots;
    info!("HTML snapshots will be saved: {}", save_snapshots);

    let (targets, max_pages) = match url {
        Some(raw) => {
            info!("Scraping single URL: {}", raw);
            (vec![Target::Manual(parse_manual_url(&raw)?)], settings.max_pages_manual)
        }
        None => {
            let path = settings.query_set_path();
            let query_set = ScrapeConfig::load(&path)?;
            info!("Loaded {}: {} cars", path.display(), query_set.cars.len());
            (targets_from_config(&query_set), settings.max_pages)
        }
    };

    let (delay_min, delay_max) = settings.delay_range();
    let sessions = Arc::new(HttpSessions {
        timeout: settings.request_timeout(),
        delay_min,
        delay_max,
    });
    let opts = BatchOptions {
        concurrency: settings.concurrency,
        pagination: PaginationOptions {
            max_pages,
            snapshot_dir: save_snapshots.then(|| settings.snapshot_dir()),
        },
        show_progress: !settings.no_progress,
    };

    let pages = collect_pages(targets, sessions, &opts).await;
    let records = parse_pages(&pages, opts.show_progress);

    let today = Local::now().date_naive();
    let raw = RawTable.enrich(&records)?;
    if raw.is_empty() {
        warn!("No listings collected");
    }
    write_table(&dated_csv_path(&settings.raw_csv_dir(), RAW_PREFIX, today), &raw)?;

    if !no_enrich {
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout())
            .build()
            .context("failed to build HTTP client")?;
        let rate = match fetch_pln_eur_rate(&client).await {
            Ok(rate) => Some(rate),
            Err(e) => {
                warn!(error = %e, "Exchange rate unavailable, EUR columns left empty");
                None
            }
        };
        let enricher = MarketEnricher::new(rate, Local::now().fixed_offset());
        let processed = enricher.enrich(&records)?;
        write_table(
            &dated_csv_path(&settings.processed_csv_dir(), PROCESSED_PREFIX, today),
            &processed,
        )?;
    }

    info!("Done at {}", Utc::now().to_rfc3339());
    Ok(())
}

/// Replay saved pages through extract + merge.
/// Unreadable or malformed files are reported and skipped.
fn parse_snapshots(files: &[PathBuf]) {
    let mut total = 0;
    for file in files {
        let html = match std::fs::read_to_string(file) {
            Ok(html) => html,
            Err(e) => {
                warn!("Cannot read {}: {}", file.display(), e);
                continue;
            }
        };
        match parser::parse_search_page(&html) {
            Ok(records) => {
                let count = |c: MatchConfidence| {
                    records.iter().filter(|r| r.match_confidence == c).count()
                };
                println!(
                    "{}: {} records ({} unique, {} ambiguous, {} unmatched)",
                    file.display(),
                    records.len(),
                    count(MatchConfidence::Unique),
                    count(MatchConfidence::Ambiguous),
                    count(MatchConfidence::Unmatched),
                );
                total += records.len();
            }
            Err(e) => warn!("{}: {}", file.display(), e),
        }
    }
    println!("{} records in {} files", total, files.len());
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
