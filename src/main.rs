mod errors;
mod fetcher;
mod loader;
mod models;
mod pipeline;
mod readers;
mod settings;
mod transformer;
mod utils;

use std::process::ExitCode;
use std::str::FromStr;

use clap::Parser;
use models::{LoadStrategy, Representation};
use settings::Settings;
use tracing::info;
use tracing_subscriber::fmt::format::FmtSpan;

/// Download, transform, and load Eurostat datasets into a database
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Run the full ingestion pipeline for a single Eurostat dataset
    Run {
        /// The Eurostat dataset identifier (e.g. nama_10_gdp)
        #[arg(long, short = 'd')]
        dataset_id: String,

        /// The data representation: coded values or human readable labels
        #[arg(long, short = 'r', value_enum, ignore_case = true, default_value_t = Representation::Standard)]
        representation: Representation,

        /// The load strategy: replace the whole dataset or merge newer data
        #[arg(long, short = 's', value_enum, ignore_case = true, default_value_t = LoadStrategy::Full)]
        load_strategy: LoadStrategy,

        /// Use UNLOGGED staging tables in PostgreSQL
        #[arg(long, overrides_with = "no_use_unlogged_tables")]
        use_unlogged_tables: bool,

        /// Keep staging tables write-ahead logged
        #[arg(long)]
        no_use_unlogged_tables: bool,
    },

    /// Check all managed datasets and ingest the ones with newer source data
    UpdateAll,
}

fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    };

    let level = tracing::Level::from_str(&settings.log.level).unwrap_or(tracing::Level::INFO);
    tracing_subscriber::fmt::fmt()
        .with_span_events(FmtSpan::CLOSE)
        .with_max_level(level)
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            dataset_id,
            representation,
            load_strategy,
            use_unlogged_tables,
            no_use_unlogged_tables,
        } => {
            let mut settings = settings;
            // the CLI flags take precedence over the environment
            if no_use_unlogged_tables {
                settings.db.use_unlogged_tables = false;
            }
            else if use_unlogged_tables {
                settings.db.use_unlogged_tables = true;
            }

            info!(
                dataset = dataset_id,
                representation = %representation,
                load_strategy = %load_strategy,
                unlogged = settings.db.use_unlogged_tables,
                "Starting pipeline"
            );
            pipeline::run_pipeline(&dataset_id, representation, load_strategy, &settings)
        }

        Commands::UpdateAll => {
            let datasets_file = settings.managed_datasets_path.clone();
            info!(file = %datasets_file.display(), "Starting batch update for managed datasets");
            pipeline::run_batch_update(&datasets_file, &settings)
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}
