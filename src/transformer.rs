use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::info;

use crate::errors::Error;
use crate::models::{Codelist, Dsd, Observation, Representation};
use crate::readers::tsv::WideRow;

// Separates a numeric value from optional trailing flags. Handles integers,
// floats, and scientific notation; anything that fails float conversion
// degrades to flags-only.
static VALUE_FLAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(-?[\d.eE+-]+)\s*([a-zA-Z\s]*)\s*$").expect("Invalid value/flag pattern"));

/// Parse a raw observation cell into its numeric value and flags.
///
/// `"123.45 p"` → (123.45, "p"); `"123.45"` → (123.45, ∅); `":"` → (∅, ":").
pub fn parse_value(raw: &str) -> (Option<f64>, Option<String>) {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return (None, None);
    }

    if let Some(captures) = VALUE_FLAG_RE.captures(trimmed) {
        if let Ok(value) = captures[1].parse::<f64>() {
            let flags = captures[2].trim();
            let flags = (!flags.is_empty()).then(|| flags.to_string());
            return (Some(value), flags);
        }
    }

    (None, Some(trimmed.to_string()))
}

/// Turns chunked wide rows into a lazy stream of long observations,
/// optionally replacing dimension codes with codelist labels.
pub struct Transformer {
    dsd: Dsd,
    codelists: HashMap<String, Codelist>,
    representation: Representation,
}

impl Transformer {
    pub fn new(dsd: Dsd, codelists: HashMap<String, Codelist>, representation: Representation) -> Transformer {
        Transformer {
            dsd,
            codelists,
            representation,
        }
    }

    /// A single-pass, non-restartable observation sequence over `chunks`.
    /// `dimension_ids` and `periods` come from the TSV header.
    pub fn observations<I>(
        &self,
        chunks: I,
        dimension_ids: Vec<String>,
        periods: Vec<String>,
    ) -> ObservationStream<'_, I>
    where
        I: Iterator<Item = Result<Vec<WideRow>, Error>>,
    {
        info!(representation = %self.representation, "Starting transformation");

        // DSD dimensions resolved against the TSV column layout once
        let plan = self
            .dsd
            .dimensions
            .iter()
            .map(|dim| DimensionPlan {
                id: dim.id.clone(),
                tsv_index: dimension_ids.iter().position(|col| *col == dim.id),
                codelist_id: dim.codelist_id.clone(),
            })
            .collect();

        ObservationStream {
            transformer: self,
            chunks,
            plan,
            periods,
            buffer: Vec::new().into_iter(),
            failed: false,
        }
    }

    fn label_for(&self, codelist_id: Option<&str>, code: &str) -> Option<String> {
        let codelist = self.codelists.get(codelist_id?)?;
        codelist.codes.get(code).map(|c| c.name.clone())
    }

    fn unpivot(&self, rows: Vec<WideRow>, plan: &[DimensionPlan], periods: &[String]) -> Vec<Observation> {
        let mut observations = Vec::new();

        for row in rows {
            for (period_index, period) in periods.iter().enumerate() {
                let Some(raw) = row.cells.get(period_index).and_then(|cell| cell.as_deref()) else {
                    continue;
                };

                let (value, flags) = parse_value(raw);
                if value.is_none() && flags.is_none() {
                    continue;
                }

                let mut dimensions = HashMap::with_capacity(plan.len());
                for dim in plan {
                    let Some(code) = dim.tsv_index.and_then(|i| row.dims.get(i)) else {
                        continue;
                    };

                    let value = match self.representation {
                        Representation::Standard => code.clone(),
                        // unknown codes pass through unchanged
                        Representation::Full => self
                            .label_for(dim.codelist_id.as_deref(), code)
                            .unwrap_or_else(|| code.clone()),
                    };
                    dimensions.insert(dim.id.clone(), value);
                }

                observations.push(Observation {
                    dimensions,
                    time_period: period.clone(),
                    value,
                    flags,
                });
            }
        }

        observations
    }
}

struct DimensionPlan {
    id: String,
    tsv_index: Option<usize>,
    codelist_id: Option<String>,
}

/// Pull-based pipeline stage: one chunk is unpivoted at a time and drained
/// before the next is requested, so back-pressure from the database sink
/// reaches all the way down to the TSV reader.
pub struct ObservationStream<'a, I> {
    transformer: &'a Transformer,
    chunks: I,
    plan: Vec<DimensionPlan>,
    periods: Vec<String>,
    buffer: std::vec::IntoIter<Observation>,
    failed: bool,
}

impl<'a, I> Iterator for ObservationStream<'a, I>
where
    I: Iterator<Item = Result<Vec<WideRow>, Error>>,
{
    type Item = Result<Observation, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(observation) = self.buffer.next() {
                return Some(Ok(observation));
            }
            if self.failed {
                return None;
            }

            match self.chunks.next() {
                None => return None,
                Some(Err(err)) => {
                    self.failed = true;
                    return Some(Err(err));
                }
                Some(Ok(rows)) => {
                    self.buffer = self
                        .transformer
                        .unpivot(rows, &self.plan, &self.periods)
                        .into_iter();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Code, Dimension, Measure};

    fn test_dsd() -> Dsd {
        Dsd {
            id: "DSD_TPS00001".to_string(),
            name: None,
            version: "1.0".to_string(),
            dimensions: vec![
                Dimension {
                    id: "freq".to_string(),
                    name: None,
                    codelist_id: None,
                    position: 0,
                    data_type: None,
                },
                Dimension {
                    id: "geo".to_string(),
                    name: None,
                    codelist_id: Some("CL_GEO".to_string()),
                    position: 1,
                    data_type: None,
                },
            ],
            attributes: vec![],
            measures: vec![Measure {
                id: "OBS_VALUE".to_string(),
                name: None,
                data_type: Some("Double".to_string()),
            }],
            primary_measure_id: "OBS_VALUE".to_string(),
        }
    }

    fn geo_codelist() -> Codelist {
        let mut codes = HashMap::new();
        for (id, name) in [("DE", "Germany"), ("FR", "France")] {
            codes.insert(id.to_string(), Code {
                id: id.to_string(),
                name: name.to_string(),
                description: None,
                parent_id: None,
            });
        }
        Codelist {
            id: "CL_GEO".to_string(),
            version: None,
            codes,
        }
    }

    fn wide_rows() -> Vec<WideRow> {
        vec![
            WideRow {
                dims: vec!["A".to_string(), "DE".to_string()],
                cells: vec![Some("12.5 p".to_string()), Some("11.8 c".to_string())],
            },
            WideRow {
                dims: vec!["A".to_string(), "FR".to_string()],
                cells: vec![None, Some("8.2".to_string())],
            },
            WideRow {
                dims: vec!["A".to_string(), "EU27_2020".to_string()],
                cells: vec![Some("10.0".to_string()), Some("9.5".to_string())],
            },
        ]
    }

    fn collect(transformer: &Transformer) -> Vec<Observation> {
        let chunks = vec![Ok(wide_rows())].into_iter();
        transformer
            .observations(
                chunks,
                vec!["freq".to_string(), "geo".to_string()],
                vec!["2022".to_string(), "2021".to_string()],
            )
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    #[test]
    fn parses_value_and_flag_pairs() {
        let cases: Vec<(&str, Option<f64>, Option<&str>)> = vec![
            ("12.34 p", Some(12.34), Some("p")),
            ("12.34", Some(12.34), None),
            ("-5.0", Some(-5.0), None),
            (": ", None, Some(":")),
            (":", None, Some(":")),
            ("c", None, Some("c")),
            (" 12.34 p ", Some(12.34), Some("p")),
            ("", None, None),
            ("   ", None, None),
            ("1.2.3 p", None, Some("1.2.3 p")),
            ("1e3", Some(1000.0), None),
        ];
        for (raw, value, flags) in cases {
            let (got_value, got_flags) = parse_value(raw);
            assert_eq!(got_value, value, "value for {raw:?}");
            assert_eq!(got_flags.as_deref(), flags, "flags for {raw:?}");
        }
    }

    // concatenating value and flags reproduces the raw cell modulo whitespace
    #[test]
    fn value_flag_pairs_round_trip() {
        for raw in ["12.5 p", "11.8 c", "8.2", "c", ":", "-5.5 ep"] {
            let (value, flags) = parse_value(raw);
            let rebuilt = match (value, flags) {
                (Some(v), Some(f)) => format!("{v} {f}"),
                (Some(v), None) => format!("{v}"),
                (None, Some(f)) => f,
                (None, None) => continue,
            };
            assert_eq!(rebuilt, raw.trim());
        }
    }

    #[test]
    fn unpivots_and_drops_missing_cells() {
        let transformer = Transformer::new(test_dsd(), HashMap::new(), Representation::Standard);
        let observations = collect(&transformer);

        // 3 rows x 2 periods minus the one missing cell
        assert_eq!(observations.len(), 5);

        let de_2022 = observations
            .iter()
            .find(|o| o.dimensions["geo"] == "DE" && o.time_period == "2022")
            .unwrap();
        assert_eq!(de_2022.value, Some(12.5));
        assert_eq!(de_2022.flags.as_deref(), Some("p"));

        let fr_2021 = observations
            .iter()
            .find(|o| o.dimensions["geo"] == "FR" && o.time_period == "2021")
            .unwrap();
        assert_eq!(fr_2021.value, Some(8.2));
        assert_eq!(fr_2021.flags, None);

        assert!(!observations
            .iter()
            .any(|o| o.dimensions["geo"] == "FR" && o.time_period == "2022"));
    }

    #[test]
    fn order_is_row_major_then_period() {
        let transformer = Transformer::new(test_dsd(), HashMap::new(), Representation::Standard);
        let observations = collect(&transformer);

        let keys: Vec<(String, String)> = observations
            .iter()
            .map(|o| (o.dimensions["geo"].clone(), o.time_period.clone()))
            .collect();
        assert_eq!(keys, vec![
            ("DE".to_string(), "2022".to_string()),
            ("DE".to_string(), "2021".to_string()),
            ("FR".to_string(), "2021".to_string()),
            ("EU27_2020".to_string(), "2022".to_string()),
            ("EU27_2020".to_string(), "2021".to_string()),
        ]);
    }

    #[test]
    fn full_representation_replaces_codes_with_labels() {
        let mut codelists = HashMap::new();
        codelists.insert("CL_GEO".to_string(), geo_codelist());
        let transformer = Transformer::new(test_dsd(), codelists, Representation::Full);
        let observations = collect(&transformer);

        assert_eq!(observations.len(), 5);
        assert!(observations.iter().any(|o| o.dimensions["geo"] == "Germany"));
        assert!(observations.iter().any(|o| o.dimensions["geo"] == "France"));
        // unknown codes pass through unchanged
        assert!(observations.iter().any(|o| o.dimensions["geo"] == "EU27_2020"));
        // freq has no codelist and keeps its code
        assert!(observations.iter().all(|o| o.dimensions["freq"] == "A"));
    }

    #[test]
    fn chunk_errors_end_the_stream() {
        let transformer = Transformer::new(test_dsd(), HashMap::new(), Representation::Standard);
        let chunks = vec![
            Ok(wide_rows()),
            Err(Error::State("boom".to_string())),
            Ok(wide_rows()),
        ]
        .into_iter();

        let results: Vec<_> = transformer
            .observations(
                chunks,
                vec!["freq".to_string(), "geo".to_string()],
                vec!["2022".to_string(), "2021".to_string()],
            )
            .collect();

        assert_eq!(results.len(), 6);
        assert!(results[..5].iter().all(|r| r.is_ok()));
        assert!(results[5].is_err());
    }
}
