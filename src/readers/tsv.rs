use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use flate2::read::GzDecoder;
use tracing::{debug, info};

use crate::errors::{Error, ParseError};

/// Rows per chunk handed to the transformer.
pub const CHUNK_SIZE: usize = 100_000;

/// One wide row: the parsed dimension cells followed by one raw cell per
/// period column. Missing-value sentinels are already mapped to None.
#[derive(Debug, Clone, PartialEq)]
pub struct WideRow {
    pub dims: Vec<String>,
    pub cells: Vec<Option<String>>,
}

/// Streaming reader for Eurostat's gzipped wide TSV format.
///
/// The header looks like `dim1,dim2,...\time<TAB>period1<TAB>period2...`:
/// the first tab field carries the comma-joined dimension ids with a
/// backslash-delimited time suffix, the remaining fields are period labels.
pub struct TsvReader {
    records: csv::StringRecordsIntoIter<GzDecoder<BufReader<File>>>,
    pub dimension_ids: Vec<String>,
    pub periods: Vec<String>,
}

impl TsvReader {
    pub fn open(path: &Path) -> Result<TsvReader, Error> {
        let file = File::open(path)?;
        let reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .flexible(true)
            .quoting(false)
            .from_reader(GzDecoder::new(BufReader::new(file)));

        let mut records = reader.into_records();
        let header = match records.next() {
            Some(record) => record?,
            None => {
                return Err(Error::Parsing(ParseError::InvalidHeader(
                    "TSV file is empty".to_string(),
                )))
            }
        };

        if header.len() < 2 {
            return Err(Error::Parsing(ParseError::InvalidHeader(
                "TSV header has no tab separator".to_string(),
            )));
        }

        let dim_header = header.get(0).unwrap_or_default();
        if !dim_header.contains('\\') {
            return Err(Error::Parsing(ParseError::InvalidHeader(format!(
                "TSV dimension header has no time suffix: {dim_header}"
            ))));
        }

        let dims_only = dim_header.split('\\').next().unwrap_or_default();
        let dimension_ids: Vec<String> = dims_only.split(',').map(|d| d.trim().to_string()).collect();
        let periods: Vec<String> = header.iter().skip(1).map(|p| p.trim().to_string()).collect();

        info!(
            path = %path.display(),
            dimensions = dimension_ids.len(),
            periods = periods.len(),
            "Opened wide TSV"
        );

        Ok(TsvReader {
            records,
            dimension_ids,
            periods,
        })
    }

    /// Lazy sequence of row chunks. Memory stays bounded by
    /// `chunk_size × columns`; the file is never read ahead of the consumer.
    pub fn chunks(self, chunk_size: usize) -> TsvChunks {
        TsvChunks {
            records: self.records,
            n_periods: self.periods.len(),
            chunk_size,
            chunk_index: 0,
        }
    }
}

pub struct TsvChunks {
    records: csv::StringRecordsIntoIter<GzDecoder<BufReader<File>>>,
    n_periods: usize,
    chunk_size: usize,
    chunk_index: usize,
}

impl TsvChunks {
    fn parse_row(&self, record: &csv::StringRecord) -> WideRow {
        let dims = record
            .get(0)
            .unwrap_or_default()
            .split(',')
            .map(|d| d.trim().to_string())
            .collect();

        let cells = (0..self.n_periods)
            .map(|i| match record.get(1 + i) {
                None => None,
                Some(raw) => parse_cell(raw),
            })
            .collect();

        WideRow { dims, cells }
    }
}

/// Maps the missing-value sentinels and blank cells to absent.
fn parse_cell(raw: &str) -> Option<String> {
    if raw == ":" || raw == ": " || raw.trim().is_empty() {
        None
    }
    else {
        Some(raw.to_string())
    }
}

impl Iterator for TsvChunks {
    type Item = Result<Vec<WideRow>, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut rows = Vec::new();
        while rows.len() < self.chunk_size {
            match self.records.next() {
                None => break,
                Some(Err(err)) => return Some(Err(err.into())),
                Some(Ok(record)) => rows.push(self.parse_row(&record)),
            }
        }

        if rows.is_empty() {
            return None;
        }

        debug!(chunk = self.chunk_index, rows = rows.len(), "Processed chunk");
        self.chunk_index += 1;
        Some(Ok(rows))
    }
}
