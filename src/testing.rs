//! Fixtures for tests that need shard files on disk.
//!
//! ```
//! use utterance_loader::testing::*;
//!
//! # fn main() -> anyhow::Result<()> {
//! let dir = tempfile::tempdir()?;
//! let rows = synthetic_rows("a", 3);
//! let path = write_shard(dir.path(), 0, &rows)?;
//! assert!(path.ends_with("utterance-000000000000.csv"));
//! # Ok(())
//! # }
//! ```

use crate::types::shard_path;
use anyhow::{Context, Result};
use std::fs::{File, create_dir_all};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Header row written by [`write_shard`].
pub const HEADER: [&str; 3] = ["keyword", "keyword_id", "utterance"];

/// A data row as written to a shard: keyword, keyword id, utterance.
pub type ShardRow = [String; 3];

/// Build a row from string slices.
#[must_use]
pub fn row(keyword: &str, keyword_id: &str, utterance: &str) -> ShardRow {
    [
        keyword.to_string(),
        keyword_id.to_string(),
        utterance.to_string(),
    ]
}

/// `n` valid rows whose keyword and utterance carry `tag`, with keyword ids
/// `0..n`.
#[must_use]
pub fn synthetic_rows(tag: &str, n: usize) -> Vec<ShardRow> {
    (0..n)
        .map(|i| row(&format!("{tag}-kw-{i}"), &i.to_string(), &format!("{tag} utterance {i}")))
        .collect()
}

/// Write shard `index` under `dir` with a header and `rows`.
///
/// # Errors
/// Returns an error if the directory or file cannot be written.
pub fn write_shard(dir: impl AsRef<Path>, index: u64, rows: &[ShardRow]) -> Result<PathBuf> {
    let path = shard_path(dir.as_ref(), index);
    if let Some(parent) = path.parent() {
        create_dir_all(parent).with_context(|| format!("mkdir -p {}", parent.display()))?;
    }
    let mut wtr =
        csv::Writer::from_path(&path).with_context(|| format!("create {}", path.display()))?;
    wtr.write_record(HEADER)?;
    for (i, r) in rows.iter().enumerate() {
        wtr.write_record(r)
            .with_context(|| format!("write row #{} to {}", i + 1, path.display()))?;
    }
    wtr.flush()?;
    Ok(path)
}

/// Write shard `index` under `dir` with verbatim `contents`.
///
/// # Errors
/// Returns an error if the file cannot be written.
pub fn write_raw_shard(
    dir: impl AsRef<Path>,
    index: u64,
    contents: impl AsRef<[u8]>,
) -> Result<PathBuf> {
    let path = shard_path(dir.as_ref(), index);
    let mut f = File::create(&path).with_context(|| format!("create {}", path.display()))?;
    f.write_all(contents.as_ref())?;
    Ok(path)
}
