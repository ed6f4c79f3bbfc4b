use std::collections::HashMap;

use rusqlite::types::Value;
use rusqlite::Connection;
use tracing::{debug, info, warn};

use super::{copy_columns, primary_key_columns, quote_ident, required_columns, sdmx_to_sqlite_type, Loader};
use crate::errors::Error;
use crate::models::{Codelist, Dsd, FinalizeStrategy, IngestionHistory, Observation, Representation};
use crate::settings::DatabaseSettings;

const INSERT_CHUNK_SIZE: usize = 10_000;

/// The embedded engine for tests and small local loads. SQLite has no
/// schemas, so tables are named `<schema>__<table>`; bulk load is emulated
/// with chunked inserts and only the swap finalize strategy exists.
pub struct SqliteLoader {
    conn: Option<Connection>,
    dsd: Option<Dsd>,
}

impl SqliteLoader {
    /// Opens the database file named by the `name` setting.
    pub fn open(settings: &DatabaseSettings) -> Result<SqliteLoader, Error> {
        let conn = Connection::open(&settings.name)?;
        info!(path = settings.name, "Connected to SQLite database");
        Ok(SqliteLoader {
            conn: Some(conn),
            dsd: None,
        })
    }

    #[cfg(test)]
    fn in_memory() -> SqliteLoader {
        SqliteLoader {
            conn: Some(Connection::open_in_memory().expect("in-memory database")),
            dsd: None,
        }
    }

    fn conn(&mut self) -> Result<&mut Connection, Error> {
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

fn fqn(schema: &str, table: &str) -> String {
    format!("{schema}__{table}")
}

fn table_exists(conn: &Connection, table: &str) -> Result<bool, Error> {
    let mut stmt = conn.prepare("SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1")?;
    Ok(stmt.exists([table])?)
}

fn existing_columns(conn: &Connection, table: &str) -> Result<Vec<String>, Error> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(table)))?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(columns)
}

impl Loader for SqliteLoader {
    fn prepare_schema(
        &mut self,
        dsd: &Dsd,
        table_name: &str,
        schema: &str,
        _representation: Representation,
        _meta_schema: &str,
        _last_ingestion: Option<&IngestionHistory>,
    ) -> Result<(), Error> {
        // representation and last_ingestion only matter to the relational
        // engine; sqlite's loose column affinity has nothing to compare
        self.dsd = Some(dsd.clone());
        let table = fqn(schema, table_name);
        info!(table, "Preparing table");

        let required = required_columns(dsd, sdmx_to_sqlite_type, "REAL");
        let pk = primary_key_columns(dsd);

        let conn = self.conn()?;
        let tx = conn.transaction()?;

        if !table_exists(&tx, &table)? {
            info!(table, "Table does not exist, creating");
            let column_defs: Vec<String> = required
                .iter()
                .map(|(name, data_type)| format!("{} {}", quote_ident(name), data_type))
                .collect();
            let pk_columns: Vec<String> = pk.iter().map(|c| quote_ident(c)).collect();
            tx.execute(
                &format!(
                    "CREATE TABLE {} ({}, PRIMARY KEY ({}))",
                    quote_ident(&table),
                    column_defs.join(", "),
                    pk_columns.join(", "),
                ),
                [],
            )?;
        }
        else {
            info!(table, "Table exists, checking for schema evolution");
            let existing = existing_columns(&tx, &table)?;
            for (column, data_type) in &required {
                if !existing.contains(column) {
                    info!(column, table, "Adding missing column");
                    tx.execute(
                        &format!(
                            "ALTER TABLE {} ADD COLUMN {} {}",
                            quote_ident(&table),
                            quote_ident(column),
                            data_type,
                        ),
                        [],
                    )?;
                }
            }
        }

        tx.commit()?;
        info!(table, "Table is ready");
        Ok(())
    }

    fn manage_codelists(&mut self, codelists: &HashMap<String, Codelist>, schema: &str) -> Result<(), Error> {
        info!(codelists = codelists.len(), schema, "Loading codelists");

        let conn = self.conn()?;
        let mut ids: Vec<&String> = codelists.keys().collect();
        ids.sort();

        for codelist_id in ids {
            let codelist = &codelists[codelist_id];
            let table = fqn(schema, &codelist_id.to_lowercase());

            let tx = conn.transaction()?;
            tx.execute(
                &format!(
                    "CREATE TABLE IF NOT EXISTS {} (\
                     code TEXT PRIMARY KEY, label_en TEXT, description_en TEXT, parent_code TEXT)",
                    quote_ident(&table),
                ),
                [],
            )?;

            if codelist.codes.is_empty() {
                warn!(codelist = codelist_id, "Codelist has no codes to load");
                tx.commit()?;
                continue;
            }

            {
                let mut stmt = tx.prepare(&format!(
                    "INSERT OR REPLACE INTO {} (code, label_en, description_en, parent_code) \
                     VALUES (?1, ?2, ?3, ?4)",
                    quote_ident(&table),
                ))?;
                for code in codelist.codes.values() {
                    stmt.execute(rusqlite::params![
                        code.id,
                        code.name,
                        code.description,
                        code.parent_id
                    ])?;
                }
            }
            tx.commit()?;
            debug!(codelist = codelist_id, rows = codelist.codes.len(), "Loaded codelist");
        }

        info!("Codelist loading complete");
        Ok(())
    }

    fn bulk_load_staging(
        &mut self,
        table_name: &str,
        schema: &str,
        observations: &mut dyn Iterator<Item = Result<Observation, Error>>,
        _use_unlogged_table: bool,
    ) -> Result<(String, u64), Error> {
        let dsd = self.dsd()?;
        let target = fqn(schema, table_name);
        let staging = format!("staging_{target}");
        let dimension_ids = dsd.dimension_ids();
        let columns = copy_columns(&dsd);

        let conn = self.conn()?;
        conn.execute(&format!("DROP TABLE IF EXISTS {}", quote_ident(&staging)), [])?;

        // recreate the staging table from the target's stored DDL
        let ddl: String = conn
            .query_row(
                "SELECT sql FROM sqlite_master WHERE name = ?1",
                [target.as_str()],
                |row| row.get(0),
            )
            .map_err(|_| Error::State(format!("could not find DDL for table '{target}'")))?;
        conn.execute(&ddl.replacen(&target, &staging, 1), [])?;

        let quoted_columns: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
        let insert_sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(&staging),
            quoted_columns.join(", "),
            placeholders.join(", "),
        );

        let mut total_rows: u64 = 0;
        loop {
            let mut chunk = Vec::with_capacity(INSERT_CHUNK_SIZE);
            while chunk.len() < INSERT_CHUNK_SIZE {
                match observations.next() {
                    Some(observation) => chunk.push(observation?),
                    None => break,
                }
            }
            if chunk.is_empty() {
                break;
            }

            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(&insert_sql)?;
                for observation in &chunk {
                    let values = observation_values(observation, &dimension_ids);
                    stmt.execute(rusqlite::params_from_iter(values))?;
                }
            }
            tx.commit()?;

            total_rows += chunk.len() as u64;
            debug!(rows = chunk.len(), total = total_rows, "Inserted chunk into staging table");
        }

        info!(rows = total_rows, staging, "Finished loading staging table");
        Ok((staging, total_rows))
    }

    fn finalize_load(
        &mut self,
        staging_table: &str,
        target_table: &str,
        schema: &str,
        strategy: FinalizeStrategy,
    ) -> Result<(), Error> {
        if strategy != FinalizeStrategy::Swap {
            return Err(Error::State(
                "the SQLite loader only supports the 'swap' finalize strategy".to_string(),
            ));
        }

        let target = fqn(schema, target_table);
        info!(staging = staging_table, target, "Finalizing load with table swap");

        let conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(&format!("DROP TABLE IF EXISTS {}", quote_ident(&target)), [])?;
        tx.execute(
            &format!(
                "ALTER TABLE {} RENAME TO {}",
                quote_ident(staging_table),
                quote_ident(&target),
            ),
            [],
        )?;
        tx.commit()?;

        info!("Load finalized");
        Ok(())
    }

    fn get_ingestion_state(&mut self, dataset_id: &str, schema: &str) -> Result<Option<IngestionHistory>, Error> {
        let table = fqn(schema, "_ingestion_history");
        debug!(dataset = dataset_id, "Querying ingestion state");

        let conn = self.conn()?;
        if !table_exists(conn, &table)? {
            return Ok(None);
        }

        let mut stmt = conn.prepare(&format!(
            "SELECT dataset_id, dsd_version, load_strategy, representation, status, \
             start_time, end_time, rows_loaded, source_last_update, error_details \
             FROM {} WHERE dataset_id = ?1 AND status = 'SUCCESS' \
             ORDER BY end_time DESC LIMIT 1",
            quote_ident(&table),
        ))?;

        let mut rows = stmt.query([dataset_id])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };

        let status: String = row.get(4)?;
        Ok(Some(IngestionHistory {
            dataset_id: row.get(0)?,
            dsd_version: row.get(1)?,
            load_strategy: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
            representation: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
            status: status.parse().map_err(Error::Parsing)?,
            start_time: row.get(5)?,
            end_time: row.get(6)?,
            rows_loaded: row.get(7)?,
            source_last_update: row.get(8)?,
            error_details: row.get(9)?,
        }))
    }

    fn save_ingestion_state(&mut self, record: &IngestionHistory, schema: &str) -> Result<(), Error> {
        let table = fqn(schema, "_ingestion_history");
        info!(
            dataset = record.dataset_id,
            status = record.status.as_str(),
            "Saving ingestion state"
        );

        let conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {} (\
                 ingestion_id INTEGER PRIMARY KEY AUTOINCREMENT, \
                 dataset_id TEXT NOT NULL, \
                 dsd_version TEXT, \
                 load_strategy TEXT, \
                 representation TEXT, \
                 status TEXT, \
                 start_time TEXT, \
                 end_time TEXT, \
                 rows_loaded INTEGER, \
                 source_last_update TEXT, \
                 error_details TEXT)",
                quote_ident(&table),
            ),
            [],
        )?;
        tx.execute(
            &format!(
                "INSERT INTO {} (dataset_id, dsd_version, load_strategy, representation, \
                 status, start_time, end_time, rows_loaded, source_last_update, error_details) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                quote_ident(&table),
            ),
            rusqlite::params![
                record.dataset_id,
                record.dsd_version,
                record.load_strategy,
                record.representation,
                record.status.as_str(),
                record.start_time,
                record.end_time,
                record.rows_loaded,
                record.source_last_update,
                record.error_details,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn close_connection(&mut self) -> Result<(), Error> {
        if let Some(conn) = self.conn.take() {
            conn.close().map_err(|(_, err)| Error::Sqlite(err))?;
            info!("SQLite connection closed");
        }
        Ok(())
    }
}

/// Parameter values in bulk-load column order: dimensions, time period,
/// measure, flags.
fn observation_values(observation: &Observation, dimension_ids: &[String]) -> Vec<Value> {
    let mut values = Vec::with_capacity(dimension_ids.len() + 3);
    for dimension in dimension_ids {
        values.push(match observation.dimensions.get(dimension) {
            Some(value) => Value::Text(value.clone()),
            None => Value::Null,
        });
    }
    values.push(Value::Text(observation.time_period.clone()));
    values.push(match observation.value {
        Some(value) => Value::Real(value),
        None => Value::Null,
    });
    values.push(match &observation.flags {
        Some(flags) => Value::Text(flags.clone()),
        None => Value::Null,
    });
    values
}
