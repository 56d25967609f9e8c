// reviews.rs - Review table: CSV loading, description cleaning, CSV output.
//
// Rows are kept as raw CSV records so every non-text column survives untouched.
// Positional order is the only link between a row here and its embedding.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use anyhow::{bail, Context};
use csv::{ReaderBuilder, StringRecord, WriterBuilder};

use crate::config;

/// Tabular reviews with one designated free-text column.
#[derive(Debug, Clone)]
pub struct ReviewTable {
    headers: StringRecord,
    text_col: usize,
    rows: Vec<StringRecord>,
}

/// Row counts before and after cleaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanReport {
    pub read: usize,
    pub kept: usize,
}

impl CleanReport {
    pub fn dropped(&self) -> usize {
        self.read - self.kept
    }
}

impl ReviewTable {
    pub fn read_csv(path: &Path, text_column: &str) -> anyhow::Result<Self> {
        let file = File::open(path).with_context(|| format!("open reviews file {}", path.display()))?;
        Self::from_reader(file, text_column).with_context(|| format!("read reviews from {}", path.display()))
    }

    /// Parse CSV with a header row. Short rows are accepted (missing trailing fields are
    /// treated as absent); rows with more fields than the header are rejected.
    pub fn from_reader<R: Read>(reader: R, text_column: &str) -> anyhow::Result<Self> {
        let mut rdr = ReaderBuilder::new().flexible(true).from_reader(reader);
        let headers = rdr.headers().context("read CSV header")?.clone();
        let text_col = headers
            .iter()
            .position(|h| h == text_column)
            .with_context(|| format!("input has no `{text_column}` column"))?;

        let mut rows = Vec::new();
        for (i, record) in rdr.records().enumerate() {
            let record = record.with_context(|| format!("malformed CSV record #{}", i + 1))?;
            if record.len() > headers.len() {
                bail!(
                    "CSV record #{} has {} fields, header has {}",
                    i + 1,
                    record.len(),
                    headers.len()
                );
            }
            rows.push(record);
        }

        log::debug!("Parsed {} rows with {} columns", rows.len(), headers.len());
        Ok(Self { headers, text_col, rows })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Text of row `index`, `None` when the row has no such field.
    pub fn text(&self, index: usize) -> Option<&str> {
        self.rows.get(index).and_then(|r| r.get(self.text_col))
    }

    /// Drop rows whose text is absent or blank. Surviving rows keep their relative
    /// order and are addressed 0..kept afterwards.
    pub fn clean(self) -> (Self, CleanReport) {
        let read = self.rows.len();
        let text_col = self.text_col;
        let rows: Vec<StringRecord> = self
            .rows
            .into_iter()
            .filter(|r| has_text(r.get(text_col)))
            .collect();
        let report = CleanReport { read, kept: rows.len() };
        (
            Self {
                headers: self.headers,
                text_col,
                rows,
            },
            report,
        )
    }

    /// The text column, one entry per row, in row order.
    pub fn texts(&self) -> Vec<String> {
        self.rows
            .iter()
            .map(|r| r.get(self.text_col).unwrap_or_default().to_string())
            .collect()
    }

    pub fn write_csv(&self, path: &Path) -> anyhow::Result<()> {
        let file = File::create(path).with_context(|| format!("create {}", path.display()))?;
        self.to_writer(file).with_context(|| format!("write reviews to {}", path.display()))
    }

    /// Header plus every row, without an index column. Short rows are padded with
    /// empty fields so every line matches the header width.
    pub fn to_writer<W: Write>(&self, writer: W) -> anyhow::Result<()> {
        let mut wtr = WriterBuilder::new().from_writer(writer);
        wtr.write_record(&self.headers)?;

        let width = self.headers.len();
        for row in &self.rows {
            if row.len() == width {
                wtr.write_record(row)?;
            } else {
                let padded = row.iter().chain(std::iter::repeat("").take(width - row.len()));
                wtr.write_record(padded)?;
            }
        }
        wtr.flush().context("flush CSV writer")?;
        Ok(())
    }
}

fn has_text(field: Option<&str>) -> bool {
    match field {
        None => false,
        Some(v) => !config::input::MISSING_MARKERS.contains(&v) && !v.trim().is_empty(),
    }
}
