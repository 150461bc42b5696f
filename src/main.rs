mod cities;
mod db;
mod error;
mod fetcher;
mod parser;
mod pipeline;
mod settings;

use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use cities::CityRegistry;
use db::SqliteStorage;
use fetcher::{HttpTransport, PageFetcher};
use pipeline::{BatchOrchestrator, RunEvent};
use settings::Settings;

#[derive(Parser)]
#[command(name = "realty_scraper", about = "Apartment listings scraper for domofond.ru")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Re-collect all listings of a city (replaces the city's table)
    Scrape {
        /// City key, see `cities`
        city: String,
    },
    /// List known cities
    Cities,
    /// Show when a city's data was collected and how many rows it has
    Status {
        /// City key, see `cities`
        city: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = Settings::load()?;
    let registry = CityRegistry::builtin()?;

    match cli.command {
        Commands::Cities => {
            println!("{:<4} | {:<18} | {:<21} | {}", "Key", "Table", "Center", "Search URL");
            println!("{}", "-".repeat(100));
            for c in registry.iter() {
                let center = format!("{:.4}, {:.4}", c.center.0, c.center.1);
                println!("{:<4} | {:<18} | {:<21} | {}", c.key, c.slug, center, c.search_url);
            }
        }
        Commands::Status { city } => {
            let city = registry.get(&city)?;
            let storage = open_storage(&settings, &registry)?;
            match storage.creation_date(&city.slug)? {
                Some(date) => println!(
                    "{}: {} rows, collected on {}",
                    city.slug,
                    storage.row_count(&city.slug)?,
                    date
                ),
                None => println!("{}: no data collected yet. Run 'scrape {}'.", city.slug, city.key),
            }
        }
        Commands::Scrape { city } => {
            let city = registry.get(&city)?;
            let storage = open_storage(&settings, &registry)?;
            let transport = HttpTransport::new(&settings.user_agent, settings.request_timeout())?;
            let fetcher = PageFetcher::new(transport, settings.retry_policy());
            let mut orchestrator =
                BatchOrchestrator::new(fetcher, storage, settings.workers, settings.batch_size)?;

            let pb = ProgressBar::new(100);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("[{elapsed_precise}] {bar:40} {pos}% {msg}")?
                    .progress_chars("=> "),
            );

            let summary = orchestrator
                .run(city, |event| match event {
                    RunEvent::Discovered { last_page } => {
                        pb.println(format!("{} pages of real estate offers found. Scraping started...", last_page));
                    }
                    RunEvent::Batch(b) => {
                        pb.set_position(b.progress.round().clamp(0.0, 100.0) as u64);
                        pb.set_message(format!(
                            "batch {}/{} (pages {}-{}, {} fetched): {} of {} listings saved",
                            b.index,
                            b.batches,
                            b.pages.start(),
                            b.pages.end(),
                            b.search_pages,
                            b.saved,
                            b.listings
                        ));
                    }
                    RunEvent::Finished(_) => pb.finish_and_clear(),
                })
                .await
                .with_context(|| format!("Scrape of {} aborted", city.slug))?;

            println!(
                "{}: {} of {} listings saved from {} pages in {} batches ({:.2}%).",
                summary.city,
                summary.saved,
                summary.listings,
                summary.total_pages,
                summary.batches,
                summary.progress
            );
            println!(
                "Table {} now holds {} rows.",
                city.slug,
                orchestrator.storage().row_count(&city.slug)?
            );
        }
    }

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    Ok(())
}

fn open_storage(settings: &Settings, registry: &CityRegistry) -> anyhow::Result<SqliteStorage> {
    if let Some(dir) = settings.database_path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    let mut storage = SqliteStorage::open(&settings.database_path)
        .with_context(|| format!("Failed to open {}", settings.database_path.display()))?;
    storage.init_schema(registry.iter().map(|c| c.slug.as_str()))?;
    Ok(storage)
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
