use std::collections::HashMap;
use std::io::Write;

use postgres::{Client, NoTls};
use tracing::{debug, info, warn};

use super::{copy_columns, primary_key_columns, quote_ident, required_columns, sdmx_to_postgres_type, Loader};
use crate::errors::Error;
use crate::models::{Codelist, Dsd, FinalizeStrategy, IngestionHistory, Observation, Representation};
use crate::settings::DatabaseSettings;

const HISTORY_TABLE: &str = "_ingestion_history";

/// The primary engine: transactional DDL and COPY FROM STDIN bulk loads.
pub struct PostgresLoader {
    conn: Option<Client>,
    dsd: Option<Dsd>,
}

impl PostgresLoader {
    pub fn connect(settings: &DatabaseSettings) -> Result<PostgresLoader, Error> {
        let password = settings
            .password
            .as_deref()
            .ok_or_else(|| Error::Config("database password is required but was not provided".to_string()))?;

        let client = postgres::Config::new()
            .host(&settings.host)
            .port(settings.port)
            .user(&settings.user)
            .password(password)
            .dbname(&settings.name)
            .connect(NoTls)?;

        info!(host = settings.host, database = settings.name, "Connected to PostgreSQL");

        Ok(PostgresLoader {
            conn: Some(client),
            dsd: None,
        })
    }

    fn client(&mut self) -> Result<&mut Client, Error> {
        self.conn
            .as_mut()
            .ok_or_else(|| Error::State("database connection is closed".to_string()))
    }

    fn dsd(&self) -> Result<Dsd, Error> {
        self.dsd
            .clone()
            .ok_or_else(|| Error::State("DSD must be set via prepare_schema before loading".to_string()))
    }
}

impl Loader for PostgresLoader {
    fn prepare_schema(
        &mut self,
        dsd: &Dsd,
        table_name: &str,
        schema: &str,
        representation: Representation,
        meta_schema: &str,
        last_ingestion: Option<&IngestionHistory>,
    ) -> Result<(), Error> {
        self.dsd = Some(dsd.clone());
        info!(schema, table = table_name, "Preparing schema");

        let required = required_columns(dsd, sdmx_to_postgres_type, "DOUBLE PRECISION");
        let fk_dimensions: Vec<(String, String)> = dsd
            .dimensions
            .iter()
            .filter_map(|dim| dim.codelist_id.as_ref().map(|cl| (dim.id.clone(), cl.to_lowercase())))
            .collect();
        let pk = primary_key_columns(dsd);

        let client = self.client()?;
        let mut tx = client.transaction()?;

        tx.execute(&format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(schema)), &[])?;

        if !table_exists(&mut tx, schema, table_name)? {
            info!(schema, table = table_name, "Table does not exist, creating");
            tx.execute(&create_table_sql(schema, table_name, &required, &pk), &[])?;
        }
        else {
            info!(schema, table = table_name, "Table exists, checking for schema evolution");

            if let Some(last) = last_ingestion {
                if last.dsd_version.as_deref() == Some(dsd.version.as_str()) {
                    debug!(version = dsd.version, "DSD version matches last ingestion, skipping check");
                    tx.commit()?;
                    return Ok(());
                }
            }

            let existing = existing_column_types(&mut tx, schema, table_name)?;
            check_type_compatibility(&existing, &required, schema, table_name)?;

            for (column, data_type) in &required {
                if !existing.contains_key(column) {
                    info!(column, data_type, table = table_name, "Adding missing column");
                    tx.execute(
                        &format!(
                            "ALTER TABLE {}.{} ADD COLUMN IF NOT EXISTS {} {}",
                            quote_ident(schema),
                            quote_ident(table_name),
                            quote_ident(column),
                            data_type,
                        ),
                        &[],
                    )?;
                }
            }

            let required_names: Vec<&str> = required.iter().map(|(name, _)| name.as_str()).collect();
            for column in existing.keys() {
                if !required_names.contains(&column.as_str()) {
                    warn!(column, table = table_name, "Column exists in the database but is no longer in the DSD; it will not be dropped");
                }
            }
        }

        if representation == Representation::Standard {
            tx.execute(&format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(meta_schema)), &[])?;

            for (dimension, codelist_table) in &fk_dimensions {
                let fk_name = format!("fk_{table_name}_{dimension}");
                if constraint_exists(&mut tx, schema, table_name, &fk_name)? {
                    debug!(constraint = fk_name, "Foreign key already exists");
                    continue;
                }

                info!(constraint = fk_name, column = dimension, "Adding foreign key");
                tx.execute(
                    &format!(
                        "ALTER TABLE {}.{} ADD CONSTRAINT {} FOREIGN KEY ({}) \
                         REFERENCES {}.{} (code) ON DELETE RESTRICT ON UPDATE CASCADE",
                        quote_ident(schema),
                        quote_ident(table_name),
                        quote_ident(&fk_name),
                        quote_ident(dimension),
                        quote_ident(meta_schema),
                        quote_ident(codelist_table),
                    ),
                    &[],
                )?;
            }
        }

        tx.commit()?;
        info!(schema, table = table_name, "Table is ready");
        Ok(())
    }

    fn manage_codelists(&mut self, codelists: &HashMap<String, Codelist>, schema: &str) -> Result<(), Error> {
        info!(codelists = codelists.len(), schema, "Loading codelists");

        let client = self.client()?;
        client.execute(&format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(schema)), &[])?;

        let mut ids: Vec<&String> = codelists.keys().collect();
        ids.sort();

        for codelist_id in ids {
            let codelist = &codelists[codelist_id];
            let table = codelist_id.to_lowercase();
            let staging = format!("staging_{table}");

            let mut tx = client.transaction()?;
            tx.execute(
                &format!(
                    "CREATE TABLE IF NOT EXISTS {}.{} (\
                     code TEXT PRIMARY KEY, label_en TEXT, description_en TEXT, parent_code TEXT)",
                    quote_ident(schema),
                    quote_ident(&table),
                ),
                &[],
            )?;
            tx.execute(
                &format!(
                    "CREATE TEMP TABLE {} (LIKE {}.{})",
                    quote_ident(&staging),
                    quote_ident(schema),
                    quote_ident(&table),
                ),
                &[],
            )?;

            let mut writer = tx.copy_in(&format!("COPY {} FROM STDIN", quote_ident(&staging)))?;
            let mut line = String::new();
            for code in codelist.codes.values() {
                line.clear();
                push_copy_field(&mut line, Some(&code.id));
                line.push('\t');
                push_copy_field(&mut line, Some(&code.name));
                line.push('\t');
                push_copy_field(&mut line, code.description.as_deref());
                line.push('\t');
                push_copy_field(&mut line, code.parent_id.as_deref());
                line.push('\n');
                writer.write_all(line.as_bytes())?;
            }
            let rows = writer.finish()?;
            debug!(codelist = codelist_id, rows, "Loaded staging table for codelist");

            tx.execute(
                &format!(
                    "INSERT INTO {}.{} SELECT * FROM {} \
                     ON CONFLICT (code) DO UPDATE SET \
                     label_en = EXCLUDED.label_en, \
                     description_en = EXCLUDED.description_en, \
                     parent_code = EXCLUDED.parent_code",
                    quote_ident(schema),
                    quote_ident(&table),
                    quote_ident(&staging),
                ),
                &[],
            )?;
            tx.execute(&format!("DROP TABLE {}", quote_ident(&staging)), &[])?;
            tx.commit()?;
        }

        info!("Codelist loading complete");
        Ok(())
    }

    fn bulk_load_staging(
        &mut self,
        table_name: &str,
        schema: &str,
        observations: &mut dyn Iterator<Item = Result<Observation, Error>>,
        use_unlogged_table: bool,
    ) -> Result<(String, u64), Error> {
        let dsd = self.dsd()?;
        let staging = format!("staging_{}_{}", table_name, dsd.id.to_lowercase());
        let dimension_ids = dsd.dimension_ids();
        let columns = copy_columns(&dsd);

        let client = self.client()?;
        let mut tx = client.transaction()?;

        tx.execute(
            &format!("DROP TABLE IF EXISTS {}.{}", quote_ident(schema), quote_ident(&staging)),
            &[],
        )?;
        let unlogged = if use_unlogged_table { "UNLOGGED " } else { "" };
        tx.execute(
            &format!(
                "CREATE {}TABLE {}.{} (LIKE {}.{} INCLUDING ALL)",
                unlogged,
                quote_ident(schema),
                quote_ident(&staging),
                quote_ident(schema),
                quote_ident(table_name),
            ),
            &[],
        )?;
        info!(schema, staging, "Created staging table, starting COPY");

        let quoted_columns: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
        let copy_sql = format!(
            "COPY {}.{} ({}) FROM STDIN",
            quote_ident(schema),
            quote_ident(&staging),
            quoted_columns.join(", "),
        );

        let mut writer = tx.copy_in(&copy_sql)?;
        let mut line = String::new();
        for observation in observations {
            let observation = observation?;
            copy_row(&observation, &dimension_ids, &mut line);
            writer.write_all(line.as_bytes())?;
        }
        let rows = writer.finish()?;
        tx.commit()?;

        info!(rows, staging, "Finished COPY into staging table");
        Ok((staging, rows))
    }

    fn finalize_load(
        &mut self,
        staging_table: &str,
        target_table: &str,
        schema: &str,
        strategy: FinalizeStrategy,
    ) -> Result<(), Error> {
        match strategy {
            FinalizeStrategy::Swap => self.finalize_swap(staging_table, target_table, schema),
            FinalizeStrategy::Merge => self.finalize_merge(staging_table, target_table, schema),
        }
    }

    fn get_ingestion_state(&mut self, dataset_id: &str, schema: &str) -> Result<Option<IngestionHistory>, Error> {
        debug!(dataset = dataset_id, "Querying ingestion state");
        let client = self.client()?;

        let row = client.query_one(
            "SELECT EXISTS (SELECT FROM information_schema.tables \
             WHERE table_schema = $1 AND table_name = $2)",
            &[&schema, &HISTORY_TABLE],
        )?;
        let exists: bool = row.try_get(0)?;
        if !exists {
            return Ok(None);
        }

        let query = format!(
            "SELECT dataset_id, dsd_version, load_strategy, representation, status, \
             start_time, end_time, rows_loaded, source_last_update, error_details \
             FROM {}.{} WHERE dataset_id = $1 AND status = 'SUCCESS' \
             ORDER BY end_time DESC LIMIT 1",
            quote_ident(schema),
            quote_ident(HISTORY_TABLE),
        );
        let row = match client.query_opt(&query, &[&dataset_id])? {
            Some(row) => row,
            None => return Ok(None),
        };

        let status: String = row.try_get(4)?;
        Ok(Some(IngestionHistory {
            dataset_id: row.try_get(0)?,
            dsd_version: row.try_get(1)?,
            load_strategy: row.try_get::<_, Option<String>>(2)?.unwrap_or_default(),
            representation: row.try_get::<_, Option<String>>(3)?.unwrap_or_default(),
            status: status.parse().map_err(Error::Parsing)?,
            start_time: row.try_get(5)?,
            end_time: row.try_get(6)?,
            rows_loaded: row.try_get(7)?,
            source_last_update: row.try_get(8)?,
            error_details: row.try_get(9)?,
        }))
    }

    fn save_ingestion_state(&mut self, record: &IngestionHistory, schema: &str) -> Result<(), Error> {
        info!(
            dataset = record.dataset_id,
            status = record.status.as_str(),
            "Saving ingestion state"
        );

        let client = self.client()?;
        let mut tx = client.transaction()?;
        tx.execute(&format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(schema)), &[])?;
        tx.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {}.{} (\
                 ingestion_id SERIAL PRIMARY KEY, \
                 dataset_id TEXT NOT NULL, \
                 dsd_version TEXT, \
                 load_strategy TEXT, \
                 representation TEXT, \
                 status TEXT, \
                 start_time TIMESTAMPTZ, \
                 end_time TIMESTAMPTZ, \
                 rows_loaded BIGINT, \
                 source_last_update TIMESTAMPTZ, \
                 error_details TEXT)",
                quote_ident(schema),
                quote_ident(HISTORY_TABLE),
            ),
            &[],
        )?;
        tx.execute(
            &format!(
                "INSERT INTO {}.{} (dataset_id, dsd_version, load_strategy, representation, \
                 status, start_time, end_time, rows_loaded, source_last_update, error_details) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
                quote_ident(schema),
                quote_ident(HISTORY_TABLE),
            ),
            &[
                &record.dataset_id,
                &record.dsd_version,
                &record.load_strategy,
                &record.representation,
                &record.status.as_str(),
                &record.start_time,
                &record.end_time,
                &record.rows_loaded,
                &record.source_last_update,
                &record.error_details,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn close_connection(&mut self) -> Result<(), Error> {
        if let Some(client) = self.conn.take() {
            client.close()?;
            info!("PostgreSQL connection closed");
        }
        Ok(())
    }
}

impl PostgresLoader {
    fn finalize_swap(&mut self, staging: &str, target: &str, schema: &str) -> Result<(), Error> {
        info!(staging, target, "Finalizing load with atomic table swap");
        let backup = format!("{target}_old");

        let client = self.client()?;
        let mut tx = client.transaction()?;
        tx.execute(
            &format!("DROP TABLE IF EXISTS {}.{} CASCADE", quote_ident(schema), quote_ident(&backup)),
            &[],
        )?;
        tx.execute(
            &format!(
                "ALTER TABLE IF EXISTS {}.{} RENAME TO {}",
                quote_ident(schema),
                quote_ident(target),
                quote_ident(&backup),
            ),
            &[],
        )?;
        tx.execute(
            &format!(
                "ALTER TABLE {}.{} RENAME TO {}",
                quote_ident(schema),
                quote_ident(staging),
                quote_ident(target),
            ),
            &[],
        )?;
        tx.execute(
            &format!("DROP TABLE IF EXISTS {}.{} CASCADE", quote_ident(schema), quote_ident(&backup)),
            &[],
        )?;
        tx.commit()?;

        info!("Load finalized, tables swapped");
        Ok(())
    }

    fn finalize_merge(&mut self, staging: &str, target: &str, schema: &str) -> Result<(), Error> {
        let dsd = self.dsd()?;
        info!(staging, target, "Finalizing load with merge");

        let pk = primary_key_columns(&dsd);
        let update_columns = vec![dsd.primary_measure_id.clone(), dsd.flag_column()];
        let sql = merge_sql(schema, staging, target, &pk, &update_columns);

        let client = self.client()?;
        let mut tx = client.transaction()?;
        let rows = tx.execute(&sql, &[]).map_err(integrity_or_database)?;
        debug!(rows, "Merge complete");
        tx.execute(&format!("DROP TABLE {}.{}", quote_ident(schema), quote_ident(staging)), &[])?;
        tx.commit()?;

        info!("Load finalized with merge strategy");
        Ok(())
    }
}

fn table_exists(tx: &mut postgres::Transaction, schema: &str, table: &str) -> Result<bool, Error> {
    let row = tx.query_one(
        "SELECT EXISTS (SELECT FROM information_schema.tables \
         WHERE table_schema = $1 AND table_name = $2)",
        &[&schema, &table],
    )?;
    Ok(row.try_get(0)?)
}

fn constraint_exists(
    tx: &mut postgres::Transaction,
    schema: &str,
    table: &str,
    constraint: &str,
) -> Result<bool, Error> {
    let row = tx.query_opt(
        "SELECT 1 FROM information_schema.table_constraints \
         WHERE constraint_type = 'FOREIGN KEY' \
         AND table_schema = $1 AND table_name = $2 AND constraint_name = $3",
        &[&schema, &table, &constraint],
    )?;
    Ok(row.is_some())
}

fn existing_column_types(
    tx: &mut postgres::Transaction,
    schema: &str,
    table: &str,
) -> Result<HashMap<String, String>, Error> {
    let rows = tx.query(
        "SELECT column_name, data_type FROM information_schema.columns \
         WHERE table_schema = $1 AND table_name = $2",
        &[&schema, &table],
    )?;
    let mut columns = HashMap::new();
    for row in rows {
        columns.insert(row.try_get(0)?, row.try_get(1)?);
    }
    Ok(columns)
}

/// Rejects any shared column whose normalized type differs from the
/// required one; the operator has to do a manual full reload in that case.
fn check_type_compatibility(
    existing: &HashMap<String, String>,
    required: &[(String, String)],
    schema: &str,
    table: &str,
) -> Result<(), Error> {
    for (column, required_type) in required {
        if let Some(existing_type) = existing.get(column) {
            if normalize_pg_type(existing_type) != normalize_pg_type(required_type) {
                return Err(Error::SchemaEvolution(format!(
                    "Data type mismatch for column '{column}' in table '{schema}.{table}'. \
                     Existing type '{existing_type}' is not compatible with required type \
                     '{required_type}'. A full reload is required.",
                )));
            }
        }
    }
    Ok(())
}

/// Collapses the type spellings PostgreSQL reports into one canonical form
/// per storage class.
fn normalize_pg_type(pg_type: &str) -> String {
    let pg_type = pg_type.to_lowercase();
    if pg_type.starts_with("character varying") || pg_type.starts_with("char") {
        return "text".to_string();
    }
    match pg_type.as_str() {
        "float8" => "double precision".to_string(),
        "int8" => "bigint".to_string(),
        "int4" => "integer".to_string(),
        "int2" => "smallint".to_string(),
        other if other.starts_with("timestamp") => "timestamptz".to_string(),
        other => other.to_string(),
    }
}

fn create_table_sql(schema: &str, table: &str, columns: &[(String, String)], primary_key: &[String]) -> String {
    let column_defs: Vec<String> = columns
        .iter()
        .map(|(name, data_type)| format!("{} {}", quote_ident(name), data_type))
        .collect();
    let pk_columns: Vec<String> = primary_key.iter().map(|c| quote_ident(c)).collect();
    format!(
        "CREATE TABLE {}.{} ({}, PRIMARY KEY ({}))",
        quote_ident(schema),
        quote_ident(table),
        column_defs.join(", "),
        pk_columns.join(", "),
    )
}

fn merge_sql(schema: &str, staging: &str, target: &str, pk: &[String], update_columns: &[String]) -> String {
    let pk_columns: Vec<String> = pk.iter().map(|c| quote_ident(c)).collect();
    let set_expressions: Vec<String> = update_columns
        .iter()
        .map(|c| format!("{} = EXCLUDED.{}", quote_ident(c), quote_ident(c)))
        .collect();
    format!(
        "INSERT INTO {}.{} SELECT * FROM {}.{} \
         ON CONFLICT ({}) DO UPDATE SET {}",
        quote_ident(schema),
        quote_ident(target),
        quote_ident(schema),
        quote_ident(staging),
        pk_columns.join(", "),
        set_expressions.join(", "),
    )
}

/// Encodes one observation as a COPY text row: dimensions in position
/// order, time period, value, flags. Absent fields become `\N`.
fn copy_row(observation: &Observation, dimension_ids: &[String], line: &mut String) {
    line.clear();
    for dimension in dimension_ids {
        push_copy_field(line, observation.dimensions.get(dimension).map(String::as_str));
        line.push('\t');
    }
    push_copy_field(line, Some(&observation.time_period));
    line.push('\t');
    match observation.value {
        Some(value) => line.push_str(&value.to_string()),
        None => line.push_str("\\N"),
    }
    line.push('\t');
    push_copy_field(line, observation.flags.as_deref());
    line.push('\n');
}

fn push_copy_field(line: &mut String, value: Option<&str>) {
    match value {
        None => line.push_str("\\N"),
        Some(value) => {
            for ch in value.chars() {
                match ch {
                    '\\' => line.push_str("\\\\"),
                    '\t' => line.push_str("\\t"),
                    '\n' => line.push_str("\\n"),
                    '\r' => line.push_str("\\r"),
                    other => line.push(other),
                }
            }
        }
    }
}

/// Foreign key violations get their own error category so the pipeline can
/// report them as data problems rather than engine failures.
fn integrity_or_database(err: postgres::Error) -> Error {
    if err.code() == Some(&postgres::error::SqlState::FOREIGN_KEY_VIOLATION) {
        let message = err
            .as_db_error()
            .map(|db| {
                let detail = db.detail().map(|d| format!(" {d}")).unwrap_or_default();
                format!("{}{detail}", db.message())
            })
            .unwrap_or_else(|| err.to_string());
        Error::Integrity(message)
    }
    else {
        Error::Database(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_type_spellings() {
        assert_eq!(normalize_pg_type("character varying(255)"), "text");
        assert_eq!(normalize_pg_type("CHARACTER VARYING"), "text");
        assert_eq!(normalize_pg_type("float8"), "double precision");
        assert_eq!(normalize_pg_type("int8"), "bigint");
        assert_eq!(normalize_pg_type("int4"), "integer");
        assert_eq!(normalize_pg_type("int2"), "smallint");
        assert_eq!(normalize_pg_type("timestamp with time zone"), "timestamptz");
        assert_eq!(normalize_pg_type("timestamp without time zone"), "timestamptz");
        assert_eq!(normalize_pg_type("TEXT"), "text");
    }

    #[test]
    fn compatible_types_pass_the_evolution_check() {
        let mut existing = HashMap::new();
        existing.insert("geo".to_string(), "character varying".to_string());
        existing.insert("OBS_VALUE".to_string(), "float8".to_string());
        let required = vec![
            ("geo".to_string(), "TEXT".to_string()),
            ("OBS_VALUE".to_string(), "DOUBLE PRECISION".to_string()),
            ("new_dim".to_string(), "TEXT".to_string()),
        ];
        assert!(check_type_compatibility(&existing, &required, "eurostat_data", "data_t").is_ok());
    }

    #[test]
    fn incompatible_types_fail_with_schema_evolution_error() {
        let mut existing = HashMap::new();
        existing.insert("geo".to_string(), "text".to_string());
        let required = vec![("geo".to_string(), "INTEGER".to_string())];

        let err = check_type_compatibility(&existing, &required, "eurostat_data", "data_t").unwrap_err();
        match err {
            Error::SchemaEvolution(message) => {
                assert!(message.contains("Data type mismatch for column 'geo'"));
                assert!(message.contains("full reload is required"));
            }
            other => panic!("expected SchemaEvolution, got {other:?}"),
        }
    }

    #[test]
    fn builds_create_table_with_primary_key() {
        let columns = vec![
            ("geo".to_string(), "TEXT".to_string()),
            ("OBS_VALUE".to_string(), "DOUBLE PRECISION".to_string()),
            ("time_period".to_string(), "TEXT".to_string()),
        ];
        let pk = vec!["geo".to_string(), "time_period".to_string()];
        let sql = create_table_sql("eurostat_data", "data_t", &columns, &pk);
        assert_eq!(
            sql,
            "CREATE TABLE \"eurostat_data\".\"data_t\" (\"geo\" TEXT, \
             \"OBS_VALUE\" DOUBLE PRECISION, \"time_period\" TEXT, \
             PRIMARY KEY (\"geo\", \"time_period\"))"
        );
    }

    #[test]
    fn builds_merge_upsert() {
        let pk = vec!["geo".to_string(), "time_period".to_string()];
        let update = vec!["OBS_VALUE".to_string(), "OBS_FLAG".to_string()];
        let sql = merge_sql("eurostat_data", "staging_data_t_x", "data_t", &pk, &update);
        assert!(sql.starts_with("INSERT INTO \"eurostat_data\".\"data_t\" SELECT * FROM"));
        assert!(sql.contains("ON CONFLICT (\"geo\", \"time_period\")"));
        assert!(sql.contains("\"OBS_VALUE\" = EXCLUDED.\"OBS_VALUE\""));
        assert!(sql.contains("\"OBS_FLAG\" = EXCLUDED.\"OBS_FLAG\""));
    }

    #[test]
    fn encodes_copy_rows_with_null_markers() {
        let mut dimensions = HashMap::new();
        dimensions.insert("geo".to_string(), "DE".to_string());
        let observation = Observation {
            dimensions,
            time_period: "2022".to_string(),
            value: Some(12.5),
            flags: Some("p".to_string()),
        };

        let mut line = String::new();
        copy_row(
            &observation,
            &["geo".to_string(), "unit".to_string()],
            &mut line,
        );
        assert_eq!(line, "DE\t\\N\t2022\t12.5\tp\n");

        let observation = Observation {
            dimensions: HashMap::new(),
            time_period: "2021".to_string(),
            value: None,
            flags: None,
        };
        copy_row(&observation, &[], &mut line);
        assert_eq!(line, "2021\t\\N\t\\N\n");
    }

    #[test]
    fn escapes_copy_text_framing() {
        let mut line = String::new();
        push_copy_field(&mut line, Some("a\tb\\c\nd"));
        assert_eq!(line, "a\\tb\\\\c\\nd");
    }
}
