#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for the cadastral ingestion pipeline.

use std::path::PathBuf;
use std::time::Instant;

use catastro_cli_utils::IndicatifProgress;
use catastro_config::PipelineConfig;
use catastro_database::{CadastralStore, DuckDbStore};
use catastro_ingest::{Ingestor, enabled_municipalities, municipality_by_name};
use catastro_ingest_models::ExportStatus;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "catastro_ingest", about = "Cadastral parcel and unit ingestion")]
struct Cli {
    /// TOML configuration file (overrides `CATASTRO_CONFIG`)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run both stages for every selected municipality
    Run {
        /// Comma-separated municipality names (overrides
        /// `CATASTRO_MUNICIPALITIES`)
        #[arg(long)]
        municipalities: Option<String>,
        /// Only load parcels
        #[arg(long)]
        skip_units: bool,
    },
    /// Download and load the parcels of one municipality
    Parcels {
        /// Municipality name (e.g., "ALARO")
        name: String,
    },
    /// Look up and load the units of one municipality's pending parcels
    Units {
        /// Municipality name
        name: String,
    },
    /// Print how many parcels of a municipality still need a unit lookup
    Pending {
        /// Municipality name
        name: String,
    },
    /// List the municipality registry
    Municipalities,
    /// Print stored parcel and unit counts per municipality
    Status,
}

fn print_export(name: &str, export: &ExportStatus) {
    match export {
        ExportStatus::Written { path } => println!("{name}: exported to {}", path.display()),
        ExportStatus::Failed { message } => println!("{name}: export failed: {message}"),
        ExportStatus::Skipped => {}
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = catastro_cli_utils::init_logger();
    let cli = Cli::parse();

    if matches!(cli.command, Commands::Municipalities) {
        println!("{:<28} {:<6} {:<16} ENABLED", "NAME", "CODE", "PROVINCE");
        println!("{}", "-".repeat(60));
        for entry in catastro_config::registry::all_municipalities() {
            let m = entry.municipality;
            println!(
                "{:<28} {:<6} {:<16} {}",
                m.name,
                m.code,
                m.province_name,
                if entry.enabled { "yes" } else { "no" }
            );
        }
        return Ok(());
    }

    let config = PipelineConfig::load(cli.config.as_deref())?;
    let store = DuckDbStore::open(&config.storage.db_path)?;
    log::info!("Using store {}", config.storage.db_path.display());

    match cli.command {
        Commands::Municipalities => {}
        Commands::Run {
            municipalities,
            skip_units,
        } => {
            let selected = enabled_municipalities(municipalities);
            log::info!(
                "Ingesting {} municipalities: {}",
                selected.len(),
                selected
                    .iter()
                    .map(|m| m.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            );

            let start = Instant::now();
            let ingestor = Ingestor::new(&store, &config)?;
            let steps = IndicatifProgress::municipalities_bar(&multi, selected.len() as u64);
            let summary = ingestor
                .run_all(&selected, skip_units, steps, |m| {
                    IndicatifProgress::lookups_bar(&multi, &m.name)
                })
                .await;

            for report in &summary.completed {
                print_export(&report.municipality, &report.parcels.export);
            }
            for failure in &summary.failed {
                println!("{}: FAILED: {}", failure.municipality, failure.error);
            }
            log::info!(
                "Run complete: {} parcels appended, {} units written, {} failed, took {:.1}s",
                summary.parcels_appended(),
                summary.units_written(),
                summary.failed.len(),
                start.elapsed().as_secs_f64()
            );

            if !summary.failed.is_empty() {
                return Err(format!("{} municipalities failed", summary.failed.len()).into());
            }
        }
        Commands::Parcels { name } => {
            let municipality = municipality_by_name(&name)?;
            let report = Ingestor::new(&store, &config)?
                .ingest_parcels(&municipality)
                .await?;
            println!(
                "{}: {} fetched, {} repeated, {} already stored, {} appended",
                report.municipality,
                report.fetched,
                report.duplicates_in_batch,
                report.already_stored,
                report.appended
            );
            print_export(&report.municipality, &report.export);
        }
        Commands::Units { name } => {
            let municipality = municipality_by_name(&name)?;
            let progress = IndicatifProgress::lookups_bar(&multi, &municipality.name);
            let report = Ingestor::new(&store, &config)?
                .ingest_units(&municipality, progress)
                .await?;
            println!(
                "{}: {} pending, {} with units, {} empty, {} given up, {} units in {} batches",
                report.municipality,
                report.pending,
                report.with_units,
                report.empty,
                report.given_up,
                report.units_written,
                report.batches
            );
        }
        Commands::Pending { name } => {
            let municipality = municipality_by_name(&name)?;
            let pending = Ingestor::new(&store, &config)?.pending_count(&municipality)?;
            println!("{}: {pending} parcels pending", municipality.name);
        }
        Commands::Status => {
            println!("{:<28} {:>10} {:>10}", "NAME", "PARCELS", "UNITS");
            println!("{}", "-".repeat(50));
            for entry in catastro_config::registry::all_municipalities() {
                let name = &entry.municipality.name;
                let parcels = store.parcel_count(name)?;
                if parcels == 0 && !entry.enabled {
                    continue;
                }
                println!("{name:<28} {parcels:>10} {:>10}", store.unit_count(name)?);
            }
        }
    }

    Ok(())
}
