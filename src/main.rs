mod config;
mod models;
mod pipeline;
mod scraper;
mod storage;
mod utils;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::AppConfig;
use crate::pipeline::{Lookup, Pipeline};
use crate::scraper::{Feed, OnbidClient};
use crate::storage::{ListingQuery, Repository};

#[derive(Parser)]
#[command(name = "onbid-etl", about = "Onbid auction listing ETL", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch every page of a feed and store the canonical listings
    Sync {
        #[arg(short, long, value_enum, default_value = "usage", conflicts_with = "all_feeds")]
        feed: Feed,

        /// Sync the new, discount and usage feeds concurrently
        #[arg(long)]
        all_feeds: bool,

        /// Region filter (SIDO); defaults to pipeline.default_region
        #[arg(short, long)]
        region: Option<String>,
    },

    /// Fetch a single page and print the canonical listings as JSON
    Fetch {
        #[arg(short, long, value_enum, default_value = "usage")]
        feed: Feed,

        #[arg(short, long, default_value_t = 1, conflicts_with = "all")]
        page: u32,

        /// Walk every page and canonicalise them together
        #[arg(long)]
        all: bool,

        #[arg(short, long)]
        region: Option<String>,
    },

    /// Show a stored listing
    Show(ShowArgs),

    /// Browse stored listings, latest bid start first
    List {
        #[arg(short, long, default_value_t = 1)]
        page: usize,

        #[arg(short, long, default_value_t = 50)]
        size: usize,

        /// Address prefix to keep, e.g. 서울특별시
        #[arg(short, long)]
        region: Option<String>,

        /// Only listings first stored in the last 14 days
        #[arg(long)]
        new: bool,
    },

    /// Delete stored listings
    Delete(DeleteArgs),

    /// Show database statistics
    Stats,

    /// Apply schema migrations without loading data
    Migrate,
}

#[derive(Args)]
struct ShowArgs {
    /// Listing id (PLNM_NO)
    #[arg(long, required_unless_present = "management_number", conflicts_with = "management_number")]
    id: Option<i64>,

    /// Management number (CLTR_MNMT_NO)
    #[arg(long)]
    management_number: Option<String>,

    /// Scan the live feeds when the listing is not stored
    #[arg(long)]
    live: bool,

    #[arg(short, long)]
    region: Option<String>,
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct DeleteArgs {
    /// Every stored listing
    #[arg(long)]
    all: bool,

    /// Listings whose address does not start with this region
    #[arg(long)]
    outside_region: Option<String>,

    /// The listing(s) with this management number (CLTR_MNMT_NO)
    #[arg(long)]
    management_number: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "onbid_etl=info,warn",
        1 => "onbid_etl=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(EnvFilter::new(filter))
        .init();

    let config = AppConfig::load()?;

    match cli.command {
        Command::Sync { feed, all_feeds, region } => {
            let region = region.unwrap_or_else(|| config.pipeline.default_region.clone());
            let _t = utils::Timer::start(format!("Sync ({})", region));
            let pipeline = Arc::new(build_pipeline(&config, open_repo(&config)?)?);

            if all_feeds {
                let outcomes = pipeline.sync_feeds(&Feed::ALL, &region).await;
                for (feed, o) in &outcomes {
                    info!(
                        "{}: {} pages, {} fetched, {} saved ({})",
                        feed, o.pages_fetched, o.records_fetched, o.saved, o.stop_reason
                    );
                }
                let saved: usize = outcomes.iter().map(|(_, o)| o.saved).sum();
                info!("Done: {} listings saved across {} feeds", saved, outcomes.len());
            } else {
                let o = pipeline.fetch_and_save(feed, &region).await;
                info!(
                    "Done: {} pages, {} fetched, {} saved ({})",
                    o.pages_fetched, o.records_fetched, o.saved, o.stop_reason
                );
            }
        }

        Command::Fetch { feed, page, all, region } => {
            let region = region.unwrap_or_else(|| config.pipeline.default_region.clone());
            // Nothing is written; the pipeline still wants a store.
            let pipeline = build_pipeline(&config, Arc::new(Repository::open_in_memory()?))?;
            let records = if all {
                let fetched = pipeline.fetch_all(feed, &region).await;
                info!(
                    "[{}] {} pages, {} fetched, {} canonical ({})",
                    feed,
                    fetched.pages_fetched,
                    fetched.records_fetched,
                    fetched.records.len(),
                    fetched.stop_reason
                );
                fetched.records
            } else {
                let records = pipeline.fetch_page(feed, page, &region).await;
                info!("[{}] page {}: {} canonical listings", feed, page, records.len());
                records
            };
            println!("{}", serde_json::to_string_pretty(&records)?);
        }

        Command::Show(args) => {
            let repo = open_repo(&config)?;
            let lookup = match (args.id, args.management_number) {
                (Some(id), _) => Lookup::ListingId(id),
                (None, Some(mn)) => Lookup::ManagementNumber(mn),
                (None, None) => bail!("either --id or --management-number is required"),
            };

            let mut found = match &lookup {
                Lookup::ListingId(id) => repo.find_by_listing_id(*id)?,
                Lookup::ManagementNumber(mn) => repo.find_by_management_number(mn)?,
            };

            if found.is_none() && args.live {
                let region = args
                    .region
                    .unwrap_or_else(|| config.pipeline.default_region.clone());
                found = build_pipeline(&config, repo)?.locate(&lookup, &region).await;
            }

            match found {
                Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
                None => println!("No listing for {:?}", lookup),
            }
        }

        Command::List { page, size, region, new } => {
            let repo = open_repo(&config)?;
            let mut query = region.map(ListingQuery::region).unwrap_or_default();
            if new {
                query = query.new_only();
            }
            let page = page.max(1);
            let size = size.max(1);
            let total = repo.count_listings(&query)?;
            let listings = repo.list_listings(&query, (page - 1) * size, size)?;

            println!(
                "Page {} ({} of {} listings)",
                page,
                listings.len(),
                utils::fmt_number(total)
            );
            for r in &listings {
                println!(
                    "  {:>10}  {:<18}  {:<19}  {:>15}  {}",
                    r.listing_id.map(|id| id.to_string()).unwrap_or_default(),
                    r.management_number.as_deref().unwrap_or("—"),
                    r.bid_start.map(|d| d.to_string()).unwrap_or("—".into()),
                    r.min_bid_price_min.map(utils::fmt_number).unwrap_or("—".into()),
                    r.address.as_deref().unwrap_or("—"),
                );
            }
        }

        Command::Delete(args) => {
            let repo = open_repo(&config)?;
            let deleted = if args.all {
                repo.delete_all()?
            } else if let Some(region) = args.outside_region {
                repo.delete_outside_region(&region)?
            } else if let Some(mn) = args.management_number {
                repo.delete_by_management_number(&mn)?
            } else {
                bail!("nothing to delete: pass --all, --outside-region or --management-number");
            };
            println!("Deleted {} listings.", utils::fmt_number(deleted as i64));
        }

        Command::Stats => {
            let repo = Repository::open(&config.storage.db_path)?;
            let listings = repo.listing_count()?;
            let reposted = repo.reposted_count()?;
            let (min, max) = repo.bid_start_range().unwrap_or((None, None));
            println!("─────────────────────────────────");
            println!("  Onbid ETL — Database Stats");
            println!("─────────────────────────────────");
            println!("  Listings : {}", utils::fmt_number(listings));
            println!("  Reposted : {}", utils::fmt_number(reposted));
            println!("  From     : {}", min.map(|d| d.to_string()).unwrap_or("—".into()));
            println!("  To       : {}", max.map(|d| d.to_string()).unwrap_or("—".into()));
            println!("─────────────────────────────────");
            for run in repo.recent_sync_runs(5)? {
                println!(
                    "  #{:<4} {:<9} {:<8} {:>4} pages {:>7} saved  {}  {}",
                    run.id,
                    run.feed,
                    run.status,
                    run.pages_fetched,
                    utils::fmt_number(run.listings_saved),
                    run.stop_reason.as_deref().unwrap_or("—"),
                    run.started_at,
                );
            }
        }

        Command::Migrate => {
            Repository::open(&config.storage.db_path)?.run_migrations()?;
            println!("Migrations applied.");
        }
    }

    Ok(())
}

fn open_repo(config: &AppConfig) -> Result<Arc<Repository>> {
    let repo = Repository::open(&config.storage.db_path).context("Failed to open DuckDB")?;
    if config.storage.run_migrations {
        repo.run_migrations()?;
    }
    Ok(Arc::new(repo))
}

/// Pipeline over the live provider. Ctrl-C cancels it between pages.
fn build_pipeline(config: &AppConfig, repo: Arc<Repository>) -> Result<Pipeline> {
    let client = OnbidClient::new(&config.provider).context("Failed to build provider client")?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing the current page…");
            on_signal.cancel();
        }
    });

    Ok(Pipeline::new(Arc::new(client), repo, &config.pipeline, cancel))
}
