use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use ecotrack_enrich::{AppConfig, Enricher};
use ecotrack_geo::ManualOverrides;
use ecotrack_storage::{connect_pool, run_migrations, PgEventStore, PgRegionStore};

#[derive(Debug, Parser)]
#[command(name = "ecotrack")]
#[command(about = "EcoTrack command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the web API (and the sweep scheduler when enabled).
    Serve,
    /// Enrich every distinct event location once, then exit.
    Sweep,
    /// Apply pending database migrations.
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => ecotrack_web::serve_from_env().await?,
        Commands::Sweep => {
            let config = AppConfig::from_env();
            let pool = connect_pool(&config.database_url).await?;
            run_migrations(&pool).await?;

            let events = PgEventStore::new(pool.clone());
            let regions = PgRegionStore::new(pool);
            let enricher = Enricher::new(
                regions,
                config.geocoder()?,
                ManualOverrides::builtin(),
                config.normalizer(),
            );

            let report = enricher
                .sweep(&events, Some(&config.failed_geocodes_path))
                .await?;
            for (location, outcome) in &report.outcomes {
                println!("{location}: {}", outcome.as_str());
            }
            println!(
                "sweep complete: processed={} enriched={} skipped={} failed={}",
                report.processed,
                report.enriched,
                report.skipped,
                report.failed.len()
            );
            if !report.failed.is_empty() {
                println!(
                    "failed locations written to {}",
                    config.failed_geocodes_path.display()
                );
            }
        }
        Commands::Migrate => {
            let config = AppConfig::from_env();
            let pool = connect_pool(&config.database_url).await?;
            run_migrations(&pool).await?;
            println!("migrations applied");
        }
    }

    Ok(())
}
