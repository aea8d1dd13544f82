//! Header index and row types

use std::collections::HashMap;
use std::sync::Arc;

/// Column name to zero-based column position for one parsed table.
///
/// Built once per table and shared by every row through an `Arc`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HeaderIndex {
    positions: HashMap<String, usize>,
}

impl HeaderIndex {
    /// Build the index from the header record.
    ///
    /// A name that appears more than once maps to its last column.
    pub fn from_headers<I, S>(headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut positions = HashMap::new();
        for (position, name) in headers.into_iter().enumerate() {
            positions.insert(name.into(), position);
        }
        Self { positions }
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.positions.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.positions.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.positions.keys().map(String::as_str)
    }

    /// Number of distinct header names
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

/// A single data record with name-based field lookup
#[derive(Debug, Clone)]
pub struct Row {
    index: Arc<HeaderIndex>,
    fields: Vec<String>,
}

impl Row {
    pub(crate) fn new(index: Arc<HeaderIndex>, fields: Vec<String>) -> Self {
        Self { index, fields }
    }

    /// Get a cell value by header name.
    ///
    /// Unknown names yield an empty string.
    pub fn get_cell(&self, name: &str) -> &str {
        self.index
            .position(name)
            .and_then(|position| self.fields.get(position))
            .map(String::as_str)
            .unwrap_or("")
    }

    /// Snapshot of every header name mapped to this row's value.
    pub fn as_context(&self) -> HashMap<String, String> {
        self.index
            .names()
            .map(|name| (name.to_string(), self.get_cell(name).to_string()))
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn shares_index(&self, index: &Arc<HeaderIndex>) -> bool {
        Arc::ptr_eq(&self.index, index)
    }
}
