//! Column-ordered tabular data for transaction record batches.
//!
//! A [`Frame`] is the in-memory form of one landed file: named columns in
//! file order, rows in file order. Column types are inferred on ingest — a
//! column is numeric only if every non-empty cell parses as a float.

use std::io;
use std::path::Path;

use crate::error::PipelineError;

/// One column of a record batch. Missing numeric values are `NaN`; missing
/// text values are `None`.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Float(Vec<f64>),
    Text(Vec<Option<String>>),
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Column::Float(values) => values.len(),
            Column::Text(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_text(&self) -> bool {
        matches!(self, Column::Text(_))
    }
}

/// Ordered table of named columns. Row order is preserved from the source
/// file end to end; row positions double as the prediction index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    names: Vec<String>,
    columns: Vec<Column>,
    nrows: usize,
}

impl Frame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.columns.len()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        let index = self.names.iter().position(|n| n == name)?;
        Some(&self.columns[index])
    }

    /// Columns in frame order.
    pub fn columns(&self) -> impl Iterator<Item = (&str, &Column)> {
        self.names.iter().map(String::as_str).zip(self.columns.iter())
    }

    pub fn columns_mut(&mut self) -> impl Iterator<Item = (&str, &mut Column)> {
        self.names
            .iter()
            .map(String::as_str)
            .zip(self.columns.iter_mut())
    }

    /// Append a column. The first column fixes the frame's row count.
    pub fn push_column(&mut self, name: impl Into<String>, column: Column) {
        if self.columns.is_empty() {
            self.nrows = column.len();
        } else {
            assert_eq!(
                column.len(),
                self.nrows,
                "column length must match frame row count"
            );
        }
        self.names.push(name.into());
        self.columns.push(column);
    }

    /// Remove a column by name, keeping the order of the others.
    pub fn remove_column(&mut self, name: &str) -> Option<Column> {
        let index = self.names.iter().position(|n| n == name)?;
        self.names.remove(index);
        Some(self.columns.remove(index))
    }

    /// Read a delimited text file with a header row into a frame.
    pub fn from_csv_path<P: AsRef<Path>>(path: P) -> Result<Self, PipelineError> {
        let path = path.as_ref();
        let reader = csv::Reader::from_path(path).map_err(|source| PipelineError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_csv(reader).map_err(|source| PipelineError::Read {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Read delimited text with a header row from any reader.
    pub fn from_csv_reader<R: io::Read>(reader: R) -> Result<Self, csv::Error> {
        Self::from_csv(csv::Reader::from_reader(reader))
    }

    fn from_csv<R: io::Read>(mut reader: csv::Reader<R>) -> Result<Self, csv::Error> {
        let headers: Vec<String> = reader
            .headers()?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        let mut cells: Vec<Vec<String>> = vec![Vec::new(); headers.len()];
        for record in reader.records() {
            let record = record?;
            for (index, cell) in record.iter().enumerate().take(cells.len()) {
                cells[index].push(cell.to_string());
            }
        }

        let mut frame = Frame::new();
        for (name, raw) in headers.into_iter().zip(cells) {
            frame.push_column(name, infer_column(raw));
        }
        Ok(frame)
    }
}

/// A column is numeric iff every non-empty cell parses as a float.
fn infer_column(raw: Vec<String>) -> Column {
    let numeric = raw
        .iter()
        .map(|cell| cell.trim())
        .filter(|cell| !cell.is_empty())
        .all(|cell| cell.parse::<f64>().is_ok());

    if numeric {
        Column::Float(
            raw.iter()
                .map(|cell| {
                    let cell = cell.trim();
                    if cell.is_empty() {
                        f64::NAN
                    } else {
                        cell.parse().unwrap_or(f64::NAN)
                    }
                })
                .collect(),
        )
    } else {
        Column::Text(
            raw.into_iter()
                .map(|cell| {
                    let trimmed = cell.trim();
                    if trimmed.is_empty() {
                        None
                    } else {
                        Some(trimmed.to_string())
                    }
                })
                .collect(),
        )
    }
}
