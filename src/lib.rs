//! # utterance-loader
//!
//! Parallel bulk loader for sharded utterance CSV files.
//!
//! A run reads `utterance-000000000000.csv`, `utterance-000000000001.csv`, ...
//! from an input directory, one worker per file, and writes each file's rows
//! into the `Utterance` table in fixed-size atomic batches.
//!
//! ## Pipeline
//!
//! - [`Orchestrator`] computes the shard set and runs one [`FileWorker`] per
//!   shard on a rayon pool, then collects a [`RunReport`]
//! - [`FileWorker`] opens its shard, pulls batches from a [`CsvBatcher`], and
//!   hands each batch to its [`BatchWriter`]
//! - [`BatchWriter`] parses each row, derives a key with its own
//!   [`KeyDeriver`], and applies the batch through a [`DatabaseIO`] client
//!
//! Invalid rows are skipped, failed batches are logged and skipped, and a
//! file that cannot be opened or decoded fails alone. The run itself only
//! fails on invalid configuration.
//!
//! ## Quick Start
//!
//! ```
//! use utterance_loader::*;
//! use utterance_loader::testing::{synthetic_rows, write_shard};
//!
//! # fn main() -> anyhow::Result<()> {
//! let dir = tempfile::tempdir()?;
//! write_shard(dir.path(), 0, &synthetic_rows("a", 5))?;
//! write_shard(dir.path(), 1, &synthetic_rows("b", 5))?;
//!
//! let db = FakeDatabaseIO::new();
//! let config = LoadConfig::new("test-db", dir.path(), 2).with_batch_size(2);
//! let report = Orchestrator::new(config, db.clone()).run()?;
//!
//! assert!(report.is_clean());
//! assert_eq!(db.rows(TABLE).len(), 10);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod io;
pub mod keys;
pub mod metrics;
pub mod orchestrator;
pub mod testing;
pub mod types;
pub mod worker;
pub mod writer;

pub use config::{DEFAULT_TIMEOUT, LoadConfig};
pub use io::cloud::helpers::RetryConfig;
pub use io::cloud::{
    CloudIOError, CloudResult, Connector, DatabaseIO, ErrorKind, FakeDatabaseIO, LocalConnector,
    LocalDatabaseIO,
};
pub use io::csv::{CsvBatcher, TailPolicy};
pub use keys::{KeyDeriver, KeyStrategy};
pub use metrics::MetricsCollector;
pub use orchestrator::{Orchestrator, RunReport, file_tasks};
pub use types::*;
pub use worker::{FileOutcome, FileReport, FileStats, FileWorker, Stage};
pub use writer::{BatchWriter, WriteSummary, parse_grouping_id};
