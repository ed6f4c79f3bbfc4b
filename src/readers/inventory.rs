use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::errors::{Error, ParseError};
use crate::utils::parse_date_time;

#[derive(Debug, Clone)]
pub struct InventoryEntry {
    pub last_update: DateTime<Utc>,
    pub download_url: String,
}

/// The parsed bulk-download inventory. Lookups are keyed by lower-cased
/// dataset code so callers can use whatever casing they were given.
pub struct Inventory {
    entries: HashMap<String, InventoryEntry>,
}

impl Inventory {
    pub fn from_path(path: &Path) -> Result<Inventory, Error> {
        info!(path = %path.display(), "Loading and parsing inventory file");

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .quoting(false)
            .flexible(true)
            .from_path(path)?;

        let headers = reader.headers()?.clone();
        let code_idx = column_index(&headers, "Code")?;
        let type_idx = column_index(&headers, "Type")?;
        let update_idx = column_index(&headers, "Last data change")?;
        let url_idx = column_index(&headers, "Data download url (tsv)")?;

        let mut entries = HashMap::new();
        for record in reader.records() {
            let record = record?;
            if record.get(type_idx).map(str::trim) != Some("DATASET") {
                continue;
            }

            // rows missing any of code, timestamp, or url are unusable
            let code = non_empty(record.get(code_idx));
            let last_update = non_empty(record.get(update_idx));
            let download_url = non_empty(record.get(url_idx));
            let (Some(code), Some(last_update), Some(download_url)) = (code, last_update, download_url)
            else {
                continue;
            };

            let last_update = parse_date_time(last_update)?;
            entries.insert(code.to_lowercase(), InventoryEntry {
                last_update,
                download_url: download_url.to_string(),
            });
        }

        info!(datasets = entries.len(), "Parsed dataset entries from inventory");
        Ok(Inventory { entries })
    }

    pub fn last_update(&self, dataset_id: &str) -> Option<DateTime<Utc>> {
        self.entries.get(&dataset_id.to_lowercase()).map(|entry| entry.last_update)
    }

    pub fn download_url(&self, dataset_id: &str) -> Option<&str> {
        self.entries
            .get(&dataset_id.to_lowercase())
            .map(|entry| entry.download_url.as_str())
    }
}

fn column_index(headers: &csv::StringRecord, name: &str) -> Result<usize, Error> {
    headers
        .iter()
        .position(|header| header.trim() == name)
        .ok_or_else(|| Error::Parsing(ParseError::InvalidHeader(format!("inventory column '{name}' missing"))))
}

fn non_empty(field: Option<&str>) -> Option<&str> {
    field.map(str::trim).filter(|value| !value.is_empty())
}
