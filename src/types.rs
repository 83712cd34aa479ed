//! Core data types for camb-pipes
//!
//! # Main Types
//!
//! - [`ParameterSet`] - Opaque key/value text handed to the executable
//! - [`Table`] - A dense row-major numeric table decoded from one channel
//! - [`RunResult`] - Everything one invocation produced
//! - [`ChannelWarning`] - A non-fatal problem on a single output channel
//!
//! Parameter values are always text. Booleans travel as sentinel tokens
//! (`T`/`F` for the default executable) and numbers in whatever notation
//! the caller wrote; nothing here interprets them.

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::process::ExitStatus;
use std::time::Duration;

/// Key used for the captured standard output when results are flattened
pub const STDOUT_KEY: &str = "stdout";

/// Case-sensitive mapping from parameter key to its textual value
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterSet {
    entries: BTreeMap<String, String>,
}

impl ParameterSet {
    /// Create an empty parameter set
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the value stored for `key`
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Insert or replace a value, returning the previous one
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.entries.insert(key.into(), value.into())
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.entries.insert(key.into(), value.to_string());
        self
    }

    /// Remove a key
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.entries.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over entries in key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Iterate over keys in order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ParameterSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

impl<K: Into<String>, V: Into<String>, const N: usize> From<[(K, V); N]> for ParameterSet {
    fn from(pairs: [(K, V); N]) -> Self {
        pairs.into_iter().collect()
    }
}

impl<K: Into<String>, V: Into<String>> Extend<(K, V)> for ParameterSet {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (k, v) in iter {
            self.entries.insert(k.into(), v.into());
        }
    }
}

impl IntoIterator for ParameterSet {
    type Item = (String, String);
    type IntoIter = std::collections::btree_map::IntoIter<String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// A dense numeric table, stored row-major
///
/// Column 0 is conventionally the independent variable (multipole `l`,
/// wavenumber `k`). An empty table has zero rows and zero columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: usize,
    data: Vec<f64>,
}

impl Table {
    /// Create a table from row-major data
    ///
    /// Returns `None` if `data` is not a whole number of rows.
    pub fn new(columns: usize, data: Vec<f64>) -> Option<Self> {
        if columns == 0 {
            return data.is_empty().then(Self::empty);
        }
        (data.len() % columns == 0).then_some(Self { columns, data })
    }

    /// A table with no rows
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a table from individual rows; `None` if the rows are ragged
    pub fn from_rows<R: AsRef<[f64]>>(rows: &[R]) -> Option<Self> {
        let columns = rows.first().map(|r| r.as_ref().len()).unwrap_or(0);
        let mut data = Vec::with_capacity(columns * rows.len());
        for row in rows {
            let row = row.as_ref();
            if row.len() != columns {
                return None;
            }
            data.extend_from_slice(row);
        }
        Self::new(columns, data)
    }

    pub fn num_rows(&self) -> usize {
        if self.columns == 0 {
            0
        } else {
            self.data.len() / self.columns
        }
    }

    pub fn num_columns(&self) -> usize {
        self.columns
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// `(rows, columns)`
    pub fn shape(&self) -> (usize, usize) {
        (self.num_rows(), self.columns)
    }

    pub fn get(&self, row: usize, column: usize) -> Option<f64> {
        if column >= self.columns {
            return None;
        }
        self.data.get(row * self.columns + column).copied()
    }

    pub fn row(&self, index: usize) -> Option<&[f64]> {
        let start = index.checked_mul(self.columns)?;
        self.data.get(start..start + self.columns).filter(|_| self.columns > 0)
    }

    /// Iterate over rows
    pub fn rows(&self) -> impl Iterator<Item = &[f64]> {
        self.data.chunks(self.columns.max(1))
    }

    /// Copy out one column
    pub fn column(&self, index: usize) -> Option<Vec<f64>> {
        (index < self.columns).then(|| self.rows().map(|r| r[index]).collect())
    }

    /// Raw row-major storage
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    pub(crate) fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.data
    }
}

impl Serialize for Table {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.rows())
    }
}

/// A non-fatal problem on one output channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelWarning {
    /// Logical result name (`scalar`, `lensed`, ...)
    pub channel: String,
    pub message: String,
}

/// Everything one invocation produced
///
/// `tables` only holds channels that yielded a table; a channel the
/// executable never opened, or whose bytes failed to decode, is absent.
#[derive(Debug, Clone, Default)]
pub struct RunResult {
    pub tables: BTreeMap<String, Table>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Exit status of the executable; `None` if it never ran to completion
    pub status: Option<ExitStatus>,
    pub warnings: Vec<ChannelWarning>,
    /// Channels the orchestrator had to unblock itself
    pub released: Vec<String>,
    pub elapsed: Duration,
}

impl RunResult {
    pub fn get(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    /// Captured standard output as text
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// Whether the executable ran and exited successfully
    pub fn succeeded(&self) -> bool {
        self.status.map(|s| s.success()).unwrap_or(false)
    }
}

impl Serialize for RunResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.tables.len() + 1))?;
        for (name, table) in &self.tables {
            map.serialize_entry(name, table)?;
        }
        map.serialize_entry(STDOUT_KEY, &self.stdout_lossy())?;
        map.end()
    }
}
