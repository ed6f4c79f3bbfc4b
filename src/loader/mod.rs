pub mod postgres;
pub mod sqlite;

use std::collections::HashMap;

use crate::errors::Error;
use crate::models::{Codelist, Dsd, FinalizeStrategy, IngestionHistory, Observation, Representation};
use crate::settings::{DatabaseType, Settings};

/// A database engine that can receive Eurostat datasets.
///
/// The pipeline owns exactly one loader per run and releases it on every
/// exit path. Engines are registered in [`create_loader`] by database tag.
pub trait Loader {
    /// Ensure the data schema and target table exist with the columns the
    /// DSD requires, evolving or rejecting an existing table as needed.
    /// Idempotent; all DDL runs in one transaction.
    fn prepare_schema(
        &mut self,
        dsd: &Dsd,
        table_name: &str,
        schema: &str,
        representation: Representation,
        meta_schema: &str,
        last_ingestion: Option<&IngestionHistory>,
    ) -> Result<(), Error>;

    /// Upsert codelists into the metadata schema, one transaction each.
    fn manage_codelists(&mut self, codelists: &HashMap<String, Codelist>, schema: &str) -> Result<(), Error>;

    /// Stream observations into a fresh staging table cloned from the
    /// target. Returns the staging table name and the loaded row count.
    fn bulk_load_staging(
        &mut self,
        table_name: &str,
        schema: &str,
        observations: &mut dyn Iterator<Item = Result<Observation, Error>>,
        use_unlogged_table: bool,
    ) -> Result<(String, u64), Error>;

    /// Atomically publish the staging table into the target, either by
    /// table swap or by merge-upsert.
    fn finalize_load(
        &mut self,
        staging_table: &str,
        target_table: &str,
        schema: &str,
        strategy: FinalizeStrategy,
    ) -> Result<(), Error>;

    /// The latest SUCCESS history row for a dataset, if any.
    fn get_ingestion_state(&mut self, dataset_id: &str, schema: &str) -> Result<Option<IngestionHistory>, Error>;

    /// Append a history row in its own short transaction, creating the
    /// history table on first use.
    fn save_ingestion_state(&mut self, record: &IngestionHistory, schema: &str) -> Result<(), Error>;

    /// Release the connection. Safe to call more than once.
    fn close_connection(&mut self) -> Result<(), Error>;
}

pub fn create_loader(settings: &Settings) -> Result<Box<dyn Loader>, Error> {
    match settings.db_type {
        DatabaseType::Postgres => Ok(Box::new(postgres::PostgresLoader::connect(&settings.db)?)),
        DatabaseType::Sqlite => Ok(Box::new(sqlite::SqliteLoader::open(&settings.db)?)),
    }
}

/// SDMX semantic type → PostgreSQL column type.
pub(crate) fn sdmx_to_postgres_type(data_type: &str) -> &'static str {
    match data_type {
        "String" | "Text" | "TimePeriod" | "ObservationalTimePeriod" | "Month" | "Day" | "AnyURI" => "TEXT",
        "Double" | "Float" | "Decimal" => "DOUBLE PRECISION",
        "Integer" | "Count" | "Year" => "INTEGER",
        "Long" | "BigInteger" | "PositiveInteger" => "BIGINT",
        "Short" => "SMALLINT",
        "Boolean" => "BOOLEAN",
        "Date" => "DATE",
        "DateTime" => "TIMESTAMPTZ",
        _ => "TEXT",
    }
}

/// SDMX semantic type → SQLite column type. SQLite has no dedicated
/// date/time or boolean storage classes.
pub(crate) fn sdmx_to_sqlite_type(data_type: &str) -> &'static str {
    match data_type {
        "Double" | "Float" | "Decimal" => "REAL",
        "Integer" | "Count" | "Year" | "Long" | "BigInteger" | "PositiveInteger" | "Short" | "Boolean" => "INTEGER",
        _ => "TEXT",
    }
}

/// The columns a dataset table needs, in definition order: dimensions by
/// DSD position, the primary measure, the flag column, `time_period`.
pub(crate) fn required_columns(dsd: &Dsd, type_for: fn(&str) -> &'static str, measure_default: &'static str) -> Vec<(String, String)> {
    let mut columns: Vec<(String, String)> = Vec::new();

    let mut dims: Vec<_> = dsd.dimensions.iter().collect();
    dims.sort_by_key(|d| d.position);
    for dim in dims {
        let sdmx_type = dim.data_type.as_deref().unwrap_or("String");
        columns.push((dim.id.clone(), type_for(sdmx_type).to_string()));
    }

    match dsd.primary_measure() {
        Some(measure) => {
            let sdmx_type = measure.data_type.as_deref().unwrap_or("Double");
            columns.push((measure.id.clone(), type_for(sdmx_type).to_string()));
        }
        None => {
            tracing::warn!(
                measure = dsd.primary_measure_id,
                "Primary measure not found in DSD, defaulting to floating point"
            );
            columns.push((dsd.primary_measure_id.clone(), measure_default.to_string()));
        }
    }

    columns.push((dsd.flag_column(), "TEXT".to_string()));
    columns.push(("time_period".to_string(), "TEXT".to_string()));

    columns
}

/// Primary key of a dataset table: every dimension plus the time period.
pub(crate) fn primary_key_columns(dsd: &Dsd) -> Vec<String> {
    let mut columns = dsd.dimension_ids();
    columns.push("time_period".to_string());
    columns
}

/// Column order used for bulk loading: dimensions by position, time period,
/// primary measure, flag column.
pub(crate) fn copy_columns(dsd: &Dsd) -> Vec<String> {
    let mut columns = dsd.dimension_ids();
    columns.push("time_period".to_string());
    columns.push(dsd.primary_measure_id.clone());
    columns.push(dsd.flag_column());
    columns
}

/// Double-quote an SQL identifier.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
