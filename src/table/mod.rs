//! Tabular recipient data.
//!
//! This module provides:
//! - CSV parsing where the first record names the columns
//! - A header index shared by every row of a table
//! - Name-based cell lookup and template context snapshots
//!
//! # Example
//!
//! ```ignore
//! let table = Table::parse("email,name\njohn@doe.com,john doe\n".as_bytes())?;
//!
//! assert!(table.is_header("email"));
//! assert_eq!(table.rows()[0].get_cell("name"), "john doe");
//! ```

mod row;

use std::io::Read;
use std::sync::Arc;

pub use row::{HeaderIndex, Row};

use crate::error::{MailMergeError, Result};

/// Header index plus rows in source order
#[derive(Debug, Clone)]
pub struct Table {
    index: Arc<HeaderIndex>,
    headers: Vec<String>,
    rows: Vec<Row>,
}

impl Table {
    /// Parse a comma-separated source.
    ///
    /// Fails on an empty source and on any malformed record; no partial
    /// table is ever returned.
    pub fn parse<R: Read>(reader: R) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(false)
            .from_reader(reader);

        let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        if headers.is_empty() {
            return Err(MailMergeError::malformed("source has no header record"));
        }

        let index = Arc::new(HeaderIndex::from_headers(headers.iter().cloned()));

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            let fields = record.iter().map(str::to_string).collect();
            rows.push(Row::new(Arc::clone(&index), fields));
        }

        Ok(Self {
            index,
            headers,
            rows,
        })
    }

    /// Check if the header exists
    pub fn is_header(&self, name: &str) -> bool {
        self.index.contains(name)
    }

    /// Header names in column order, duplicates included
    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn row(&self, position: usize) -> Option<&Row> {
        self.rows.get(position)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
