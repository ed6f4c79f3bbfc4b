use std::collections::HashMap;
use std::fs::File;
use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use tracing::{error, info, warn};

use crate::errors::{Error, ParseError};
use crate::fetcher::Fetcher;
use crate::loader::{create_loader, Loader};
use crate::models::{FinalizeStrategy, IngestionHistory, IngestionStatus, LoadStrategy, Representation};
use crate::readers::inventory::Inventory;
use crate::readers::sdmx;
use crate::readers::tsv::{TsvReader, CHUNK_SIZE};
use crate::settings::Settings;
use crate::transformer::Transformer;
use crate::utils::new_spinner_totals;

pub const DATA_SCHEMA: &str = "eurostat_data";
pub const META_SCHEMA: &str = "eurostat_meta";

#[derive(Debug, Deserialize)]
struct ManagedDatasets {
    #[serde(default)]
    datasets: Vec<String>,
}

/// Run the end-to-end ingestion pipeline for a single dataset.
///
/// Whatever happens inside, a terminal history row is written (including
/// the Delta no-op, which records SUCCESS with zero rows) and the loader is
/// released. A failure to persist history is logged without masking the
/// pipeline error.
pub fn run_pipeline(
    dataset_id: &str,
    representation: Representation,
    load_strategy: LoadStrategy,
    settings: &Settings,
) -> Result<(), Error> {
    let start_time = Utc::now();
    let fetcher = Fetcher::new(settings)?;
    let mut loader = create_loader(settings)?;
    let mut history = IngestionHistory::begin(dataset_id, load_strategy, representation, start_time);

    let result = execute(
        dataset_id,
        representation,
        load_strategy,
        settings,
        &fetcher,
        loader.as_mut(),
        &mut history,
    );

    match &result {
        Ok(()) => {
            history.status = IngestionStatus::Success;
            info!(dataset = dataset_id, "Pipeline completed successfully");
        }
        Err(err) => {
            history.status = IngestionStatus::Failed;
            history.error_details = Some(err.to_string());
            error!(dataset = dataset_id, error = %err, "Pipeline failed");
        }
    }
    history.end_time = Some(Utc::now());

    if let Err(save_err) = loader.save_ingestion_state(&history, META_SCHEMA) {
        error!(error = %save_err, "Failed to save final ingestion state");
    }
    if let Err(close_err) = loader.close_connection() {
        error!(error = %close_err, "Failed to close the database connection");
    }

    result
}

fn execute(
    dataset_id: &str,
    representation: Representation,
    load_strategy: LoadStrategy,
    settings: &Settings,
    fetcher: &Fetcher,
    loader: &mut dyn Loader,
    history: &mut IngestionHistory,
) -> Result<(), Error> {
    info!("Fetching Eurostat data inventory");
    let inventory = Inventory::from_path(&fetcher.get_inventory()?)?;

    let remote_last_update = inventory.last_update(dataset_id);
    let download_url = inventory.download_url(dataset_id).map(str::to_string);
    let (remote_last_update, download_url) = match (remote_last_update, download_url) {
        (Some(last_update), Some(url)) => (last_update, url),
        _ => {
            return Err(Error::NotFound(format!(
                "could not find dataset '{dataset_id}' in Eurostat's inventory"
            )))
        }
    };
    history.source_last_update = Some(remote_last_update);

    let mut last_ingestion = None;
    if load_strategy == LoadStrategy::Delta {
        last_ingestion = loader.get_ingestion_state(dataset_id, META_SCHEMA)?;
        let local_last_update = last_ingestion.as_ref().and_then(|last| last.source_last_update);
        if let Some(local) = local_last_update {
            if local >= remote_last_update {
                info!(dataset = dataset_id, "Local data is up-to-date, skipping");
                history.rows_loaded = Some(0);
                return Ok(());
            }
        }
    }

    info!("Fetching and parsing metadata");
    let dsd = sdmx::parse_dsd(&fetcher.get_dsd_xml(dataset_id)?)?;
    history.dsd_version = Some(dsd.version.clone());

    let mut codelists = HashMap::new();
    for codelist_id in dsd.codelist_ids() {
        let path = fetcher.get_codelist_xml(&codelist_id)?;
        codelists.insert(codelist_id, sdmx::parse_codelist(&path)?);
    }

    // codelist tables first, the data table's foreign keys reference them
    loader.manage_codelists(&codelists, META_SCHEMA)?;

    let table_name = format!("data_{}", dataset_id.to_lowercase());
    loader.prepare_schema(
        &dsd,
        &table_name,
        DATA_SCHEMA,
        representation,
        META_SCHEMA,
        last_ingestion.as_ref(),
    )?;

    info!(url = download_url, "Fetching dataset TSV");
    let tsv_path = fetcher.get_dataset_tsv(dataset_id, &download_url)?;
    let tsv = TsvReader::open(&tsv_path)?;
    let dimension_ids = tsv.dimension_ids.clone();
    let periods = tsv.periods.clone();

    let transformer = Transformer::new(dsd, codelists, representation);
    let stream = transformer.observations(tsv.chunks(CHUNK_SIZE), dimension_ids, periods);

    let progress = new_spinner_totals("Rows loaded");
    progress.enable_steady_tick(Duration::from_millis(200));
    let mut counted = stream.inspect(|_| progress.inc(1));

    let (staging_table, rows_loaded) = loader.bulk_load_staging(
        &table_name,
        DATA_SCHEMA,
        &mut counted,
        settings.db.use_unlogged_tables,
    )?;
    progress.finish();
    history.rows_loaded = Some(rows_loaded as i64);

    let finalize_strategy = match load_strategy {
        LoadStrategy::Delta => FinalizeStrategy::Merge,
        LoadStrategy::Full => FinalizeStrategy::Swap,
    };
    loader.finalize_load(&staging_table, &table_name, DATA_SCHEMA, finalize_strategy)?;

    Ok(())
}

/// Check every managed dataset against the remote inventory and run the
/// pipeline for the ones with newer source data. Per-dataset failures are
/// counted, never propagated.
pub fn run_batch_update(datasets_file: &Path, settings: &Settings) -> Result<(), Error> {
    if !datasets_file.exists() {
        return Err(Error::Config(format!(
            "managed datasets file not found at: {}",
            datasets_file.display()
        )));
    }

    let managed: ManagedDatasets =
        serde_yaml::from_reader(File::open(datasets_file)?).map_err(ParseError::Yaml)?;
    if managed.datasets.is_empty() {
        warn!("No datasets found in the managed datasets file");
        return Ok(());
    }

    info!(datasets = managed.datasets.len(), "Starting batch update for managed datasets");

    let fetcher = Fetcher::new(settings)?;
    let mut loader = create_loader(settings)?;

    info!("Fetching master data inventory");
    let inventory = Inventory::from_path(&fetcher.get_inventory()?)?;

    let mut updated = 0u32;
    let mut skipped = 0u32;
    let mut failed = 0u32;

    for dataset_id in &managed.datasets {
        info!(dataset = %dataset_id, "Processing dataset");

        let Some(remote_last_update) = inventory.last_update(dataset_id) else {
            warn!(dataset = %dataset_id, "Dataset not found in remote inventory, skipping");
            failed += 1;
            continue;
        };

        match loader.get_ingestion_state(dataset_id, META_SCHEMA) {
            Ok(Some(last))
                if last
                    .source_last_update
                    .map_or(false, |local| local >= remote_last_update) =>
            {
                info!(dataset = %dataset_id, "Dataset is already up-to-date, skipping");
                skipped += 1;
                continue;
            }
            Ok(_) => {}
            Err(err) => {
                error!(dataset = %dataset_id, error = %err, "Could not read ingestion state");
                failed += 1;
                continue;
            }
        }

        info!(dataset = %dataset_id, "Update required, running pipeline");
        match run_pipeline(dataset_id, Representation::Standard, LoadStrategy::Delta, settings) {
            Ok(()) => updated += 1,
            Err(err) => {
                error!(dataset = %dataset_id, error = %err, "Error while processing dataset");
                failed += 1;
            }
        }
    }

    if let Err(err) = loader.close_connection() {
        error!(error = %err, "Failed to close the database connection");
    }

    info!(updated, skipped, failed, "Batch update finished");
    Ok(())
}
