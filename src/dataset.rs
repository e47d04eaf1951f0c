//! Listing export codec: delimited text <-> ordered, header-keyed records.

use csv::{QuoteStyle, ReaderBuilder, Terminator, WriterBuilder};
use indexmap::IndexMap;
use serde::Serialize;
use thiserror::Error;

pub const ITEM_NUMBER_COLUMN: &str = "Item number";
pub const ITEM_URL_COLUMN: &str = "Item url";
pub const PICTURE_COLUMNS: [&str; 3] = ["Picture1", "Picture2", "Picture3"];

const BOM: char = '\u{feff}';

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("failed to parse csv: {0}")]
    Parse(#[from] csv::Error),
    #[error("failed to serialize csv: {0}")]
    Serialize(String),
}

/// One data line of the export, keyed by column name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    fields: IndexMap<String, String>,
}

impl Record {
    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields.get(column).map(String::as_str)
    }

    pub fn set(&mut self, column: &str, value: impl Into<String>) {
        self.fields.insert(column.to_string(), value.into());
    }

    pub fn has_images(&self) -> bool {
        PICTURE_COLUMNS
            .iter()
            .any(|column| self.get(column).is_some_and(|v| !v.is_empty()))
    }

    /// Writes up to three URLs into the picture columns; unused slots are cleared.
    pub fn set_images(&mut self, images: &[String]) {
        for (slot, column) in PICTURE_COLUMNS.iter().enumerate() {
            let value = images.get(slot).cloned().unwrap_or_default();
            self.set(column, value);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DatasetSummary {
    pub total: usize,
    pub with_images: usize,
    pub pending: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dataset {
    headers: Vec<String>,
    records: Vec<Record>,
}

impl Dataset {
    pub fn parse(text: &str, delimiter: u8) -> Result<Self, DatasetError> {
        let text = text.strip_prefix(BOM).unwrap_or(text);
        if text.trim().is_empty() {
            return Ok(Self::default());
        }

        let mut reader = ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(true)
            .flexible(true)
            .from_reader(text.as_bytes());

        let mut headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        for column in PICTURE_COLUMNS {
            if !headers.iter().any(|h| h == column) {
                headers.push(column.to_string());
            }
        }

        let mut records = Vec::new();
        for row in reader.records() {
            let row = row?;
            if row.iter().all(str::is_empty) {
                continue;
            }
            let mut record = Record::default();
            for (idx, header) in headers.iter().enumerate() {
                record.set(header, row.get(idx).unwrap_or_default());
            }
            records.push(record);
        }

        Ok(Self { headers, records })
    }

    pub fn serialize(&self, delimiter: u8) -> Result<String, DatasetError> {
        if self.headers.is_empty() {
            return Ok(String::new());
        }
        let mut writer = WriterBuilder::new()
            .delimiter(delimiter)
            .quote_style(QuoteStyle::Necessary)
            .terminator(Terminator::Any(b'\n'))
            .from_writer(Vec::new());

        writer.write_record(&self.headers)?;
        for record in &self.records {
            writer.write_record(
                self.headers
                    .iter()
                    .map(|header| record.get(header).unwrap_or_default()),
            )?;
        }

        let bytes = writer
            .into_inner()
            .map_err(|err| DatasetError::Serialize(err.to_string()))?;
        String::from_utf8(bytes).map_err(|err| DatasetError::Serialize(err.to_string()))
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn records_mut(&mut self) -> &mut [Record] {
        &mut self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn summary(&self) -> DatasetSummary {
        let with_images = self.records.iter().filter(|r| r.has_images()).count();
        let pending = self
            .records
            .iter()
            .filter(|r| !r.has_images() && crate::identifier::extract(r).is_some())
            .count();
        DatasetSummary {
            total: self.len(),
            with_images,
            pending,
        }
    }
}
