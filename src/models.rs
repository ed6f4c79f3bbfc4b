use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::errors::ParseError;

/// A single component coordinate of a data structure definition.
#[derive(Debug, Clone, PartialEq)]
pub struct Dimension {
    pub id: String,
    pub name: Option<String>,
    pub codelist_id: Option<String>,
    pub position: usize,
    pub data_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub id: String,
    pub name: Option<String>,
    pub codelist_id: Option<String>,
    pub data_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Measure {
    pub id: String,
    pub name: Option<String>,
    pub data_type: Option<String>,
}

/// A Data Structure Definition as parsed from an SDMX structure message.
///
/// Dimensions are kept sorted by position. The time dimension is not part of
/// the list; observations carry their period in a dedicated `time_period`
/// column managed by the loader.
#[derive(Debug, Clone)]
pub struct Dsd {
    pub id: String,
    pub name: Option<String>,
    pub version: String,
    pub dimensions: Vec<Dimension>,
    pub attributes: Vec<Attribute>,
    pub measures: Vec<Measure>,
    pub primary_measure_id: String,
}

impl Dsd {
    /// The column that stores observation flags. Eurostat DSDs call it
    /// OBS_FLAG; anything containing FLAG qualifies, with a fallback name.
    pub fn flag_column(&self) -> String {
        self.attributes
            .iter()
            .find(|attr| attr.id.to_uppercase().contains("FLAG"))
            .map(|attr| attr.id.clone())
            .unwrap_or_else(|| "obs_flags".to_string())
    }

    pub fn primary_measure(&self) -> Option<&Measure> {
        self.measures.iter().find(|m| m.id == self.primary_measure_id)
    }

    /// Dimension ids in ascending position order.
    pub fn dimension_ids(&self) -> Vec<String> {
        let mut dims: Vec<&Dimension> = self.dimensions.iter().collect();
        dims.sort_by_key(|d| d.position);
        dims.into_iter().map(|d| d.id.clone()).collect()
    }

    pub fn codelist_ids(&self) -> Vec<String> {
        self.dimensions
            .iter()
            .filter_map(|d| d.codelist_id.clone())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Code {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub parent_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Codelist {
    pub id: String,
    pub version: Option<String>,
    pub codes: HashMap<String, Code>,
}

/// One tidy observation: a dimension-key, a period, and a value/flag pair.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub dimensions: HashMap<String, String>,
    pub time_period: String,
    pub value: Option<f64>,
    pub flags: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Representation {
    /// Dimension values stay as codes.
    Standard,
    /// Dimension codes are replaced with codelist labels.
    Full,
}

impl std::fmt::Display for Representation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Representation::Standard => write!(f, "Standard"),
            Representation::Full => write!(f, "Full"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LoadStrategy {
    /// Replace the whole dataset atomically.
    Full,
    /// Merge into the existing dataset, skipping when the source is unchanged.
    Delta,
}

impl std::fmt::Display for LoadStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadStrategy::Full => write!(f, "Full"),
            LoadStrategy::Delta => write!(f, "Delta"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeStrategy {
    Swap,
    Merge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestionStatus {
    Pending,
    Running,
    Success,
    Failed,
}

impl IngestionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestionStatus::Pending => "PENDING",
            IngestionStatus::Running => "RUNNING",
            IngestionStatus::Success => "SUCCESS",
            IngestionStatus::Failed => "FAILED",
        }
    }
}

impl FromStr for IngestionStatus {
    type Err = ParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "PENDING" => Ok(IngestionStatus::Pending),
            "RUNNING" => Ok(IngestionStatus::Running),
            "SUCCESS" => Ok(IngestionStatus::Success),
            "FAILED" => Ok(IngestionStatus::Failed),
            other => Err(ParseError::InvalidValue(other.to_string())),
        }
    }
}

/// One row of the `_ingestion_history` table. The id column is assigned by
/// the database and never travels through this struct.
#[derive(Debug, Clone)]
pub struct IngestionHistory {
    pub dataset_id: String,
    pub dsd_version: Option<String>,
    pub load_strategy: String,
    pub representation: String,
    pub status: IngestionStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub rows_loaded: Option<i64>,
    pub source_last_update: Option<DateTime<Utc>>,
    pub error_details: Option<String>,
}

impl IngestionHistory {
    pub fn begin(
        dataset_id: &str,
        strategy: LoadStrategy,
        representation: Representation,
        start_time: DateTime<Utc>,
    ) -> IngestionHistory {
        IngestionHistory {
            dataset_id: dataset_id.to_string(),
            dsd_version: None,
            load_strategy: strategy.to_string(),
            representation: representation.to_string(),
            status: IngestionStatus::Running,
            start_time,
            end_time: None,
            rows_loaded: None,
            source_last_update: None,
            error_details: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dsd_with_attributes(attrs: Vec<Attribute>) -> Dsd {
        Dsd {
            id: "NAMA_10_GDP".to_string(),
            name: None,
            version: "1.0".to_string(),
            dimensions: vec![],
            attributes: attrs,
            measures: vec![],
            primary_measure_id: "OBS_VALUE".to_string(),
        }
    }

    #[test]
    fn flag_column_prefers_flag_attribute() {
        let dsd = dsd_with_attributes(vec![
            Attribute {
                id: "UNIT_MULT".to_string(),
                name: None,
                codelist_id: None,
                data_type: None,
            },
            Attribute {
                id: "OBS_FLAG".to_string(),
                name: None,
                codelist_id: None,
                data_type: None,
            },
        ]);
        assert_eq!(dsd.flag_column(), "OBS_FLAG");
    }

    #[test]
    fn flag_column_falls_back_when_no_flag_attribute() {
        let dsd = dsd_with_attributes(vec![]);
        assert_eq!(dsd.flag_column(), "obs_flags");
    }

    #[test]
    fn dimension_ids_are_ordered_by_position() {
        let mut dsd = dsd_with_attributes(vec![]);
        dsd.dimensions = vec![
            Dimension {
                id: "geo".to_string(),
                name: None,
                codelist_id: None,
                position: 2,
                data_type: None,
            },
            Dimension {
                id: "freq".to_string(),
                name: None,
                codelist_id: None,
                position: 1,
                data_type: None,
            },
        ];
        assert_eq!(dsd.dimension_ids(), vec!["freq", "geo"]);
    }

    #[test]
    fn ingestion_status_round_trips() {
        for status in [
            IngestionStatus::Pending,
            IngestionStatus::Running,
            IngestionStatus::Success,
            IngestionStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<IngestionStatus>().unwrap(), status);
        }
        assert!("DONE".parse::<IngestionStatus>().is_err());
    }
}
