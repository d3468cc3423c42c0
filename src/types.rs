//! Row, batch, and mutation types shared by the ingestion pipeline.

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Name of the destination table.
pub const TABLE: &str = "Utterance";

/// Default number of records per write transaction.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Field positions inside a data row.
pub const KEYWORD_FIELD: usize = 0;
pub const KEYWORD_ID_FIELD: usize = 1;
pub const UTTERANCE_FIELD: usize = 2;

/// Minimum number of fields a data row needs to become a [`Mutation`].
pub const MIN_FIELDS: usize = 3;

/// One parsed CSV line. Fields are raw bytes; encoding is checked per row
/// when the row is turned into a [`Mutation`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRecord {
    /// 1-based line number in the source file (the header is line 1).
    pub line: u64,
    pub fields: Vec<Vec<u8>>,
}

impl SourceRecord {
    pub fn new(line: u64, fields: Vec<Vec<u8>>) -> Self {
        Self { line, fields }
    }

    /// Field at `idx` as text.
    ///
    /// # Errors
    /// Returns an error if the row is too short or the field is not UTF-8.
    pub fn text(&self, idx: usize) -> Result<&str> {
        let raw = self
            .fields
            .get(idx)
            .ok_or_else(|| anyhow!("missing field {idx}"))?;
        std::str::from_utf8(raw).with_context(|| format!("field {idx} is not valid UTF-8"))
    }
}

/// A group of records flushed together from one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// 0-based sequence number within the file.
    pub seq: u64,
    pub records: Vec<SourceRecord>,
    /// Set on the batch produced at end of input.
    pub is_final: bool,
}

impl Batch {
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Line range covered by this batch, for log context.
    #[must_use]
    pub fn line_span(&self) -> Option<(u64, u64)> {
        let first = self.records.first()?.line;
        let last = self.records.last()?.line;
        Some((first, last))
    }
}

/// One insert-or-update into [`TABLE`], keyed by `id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Mutation {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Keyword")]
    pub keyword: String,
    #[serde(rename = "Keyword_ID")]
    pub keyword_id: i64,
    #[serde(rename = "Utterance")]
    pub utterance: String,
}

/// One input shard assigned to a worker.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileTask {
    pub index: u64,
    pub path: PathBuf,
}

impl FileTask {
    /// Build the task for shard `index` under `base`.
    pub fn new(base: impl AsRef<Path>, index: u64) -> Self {
        Self {
            index,
            path: shard_path(base, index),
        }
    }
}

impl fmt::Display for FileTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {}", self.index, self.path.display())
    }
}

/// `{base}/utterance-{index:012}.csv`
pub fn shard_path(base: impl AsRef<Path>, index: u64) -> PathBuf {
    base.as_ref().join(format!("utterance-{index:012}.csv"))
}
