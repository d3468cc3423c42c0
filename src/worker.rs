//! Per-file worker.
//!
//! A [`FileWorker`] owns one shard end to end:
//!
//! ```text
//! Opening -> Streaming -> (Writing -> Streaming)* -> Draining -> Done
//! ```
//!
//! Failed batches are logged and counted, and streaming continues with the
//! next batch. Connect, open, decode, and deadline failures end this file
//! only; they come back as [`FileOutcome::Failed`] in the [`FileReport`].

use crate::config::LoadConfig;
use crate::io::cloud::traits::Connector;
use crate::io::csv::CsvBatcher;
use crate::keys::KeyDeriver;
use crate::metrics::{MetricsCollector, names};
use crate::types::FileTask;
use crate::writer::BatchWriter;
use anyhow::{Error, anyhow};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{error, info, info_span, warn};

/// Where a file task stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Connecting,
    Opening,
    Streaming,
    Deadline,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Connecting => "connecting",
            Self::Opening => "opening",
            Self::Streaming => "streaming",
            Self::Deadline => "deadline",
        };
        f.write_str(s)
    }
}

#[derive(Debug)]
pub enum FileOutcome {
    /// The file was read to the end. Individual batches may still have failed.
    Completed,
    Failed { stage: Stage, error: Error },
}

impl FileOutcome {
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

/// Counters for one file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileStats {
    pub rows_read: u64,
    pub rows_skipped: u64,
    pub batches_written: u64,
    pub batches_failed: u64,
    pub mutations_applied: u64,
    pub dropped_tail: u64,
}

#[derive(Debug)]
pub struct FileReport {
    pub task: FileTask,
    pub outcome: FileOutcome,
    pub stats: FileStats,
    pub elapsed: Duration,
}

/// Loads a single [`FileTask`].
pub struct FileWorker<'a, K: Connector> {
    task: FileTask,
    connector: &'a K,
    config: &'a LoadConfig,
    metrics: Option<MetricsCollector>,
}

impl<'a, K: Connector> FileWorker<'a, K> {
    pub fn new(task: FileTask, connector: &'a K, config: &'a LoadConfig) -> Self {
        Self {
            task,
            connector,
            config,
            metrics: None,
        }
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Run the task to completion. Never panics on I/O or database errors.
    pub fn run(self) -> FileReport {
        let span = info_span!("file", index = self.task.index);
        let _guard = span.enter();

        let started = Instant::now();
        let deadline = started
            .checked_add(self.config.timeout)
            .unwrap_or_else(|| started + Duration::from_secs(100 * 365 * 24 * 60 * 60));
        let mut stats = FileStats::default();

        let outcome = match self.drive(deadline, &mut stats) {
            Ok(()) => {
                info!(
                    path = %self.task.path.display(),
                    rows = stats.rows_read,
                    batches = stats.batches_written,
                    failed_batches = stats.batches_failed,
                    "file done"
                );
                self.bump(names::FILES_COMPLETED, 1);
                FileOutcome::Completed
            }
            Err((stage, err)) => {
                let chain = format!("{err:#}");
                error!(
                    path = %self.task.path.display(),
                    %stage,
                    error = %chain,
                    "file aborted"
                );
                self.bump(names::FILES_FAILED, 1);
                FileOutcome::Failed { stage, error: err }
            }
        };

        FileReport {
            task: self.task,
            outcome,
            stats,
            elapsed: started.elapsed(),
        }
    }

    fn drive(&self, deadline: Instant, stats: &mut FileStats) -> Result<(), (Stage, Error)> {
        let path = &self.task.path;

        let client = self
            .connector
            .connect(&self.config.database)
            .map_err(|e| (Stage::Connecting, Error::new(e)))?;

        let mut batcher = CsvBatcher::open(path, self.config.batch_size, self.config.tail_policy)
            .map_err(|e| (Stage::Opening, e))?;

        let keys = KeyDeriver::new(self.config.key_strategy);
        let mut writer = BatchWriter::new(client, keys, deadline)
            .with_retry(self.config.retry)
            .with_source(path.display().to_string());

        loop {
            if Instant::now() >= deadline {
                return Err((
                    Stage::Deadline,
                    anyhow!(
                        "deadline of {:?} exceeded after {} rows",
                        self.config.timeout,
                        batcher.rows_read()
                    ),
                ));
            }

            let before = batcher.rows_read();
            let batch = batcher.next_batch().map_err(|e| (Stage::Streaming, e));
            let read = batcher.rows_read() - before;
            stats.rows_read += read;
            self.bump(names::ROWS_READ, read);
            let Some(batch) = batch? else {
                break;
            };

            let skipped_before = writer.rows_skipped();
            let result = writer.write(&batch);
            let skipped = writer.rows_skipped() - skipped_before;
            stats.rows_skipped += skipped;
            self.bump(names::ROWS_SKIPPED, skipped);

            match result {
                Ok(summary) => {
                    stats.batches_written += 1;
                    stats.mutations_applied += summary.applied as u64;
                    self.bump(names::BATCHES_WRITTEN, 1);
                    self.bump(names::MUTATIONS_APPLIED, summary.applied as u64);
                    info!(
                        batch = batch.seq,
                        rows = summary.applied,
                        skipped = summary.skipped,
                        "batch written"
                    );
                }
                Err(err) => {
                    stats.batches_failed += 1;
                    self.bump(names::BATCHES_FAILED, 1);
                    let (first_line, last_line) = batch.line_span().unwrap_or_default();
                    error!(
                        batch = batch.seq,
                        first_line,
                        last_line,
                        error = %err,
                        "batch write failed; continuing"
                    );
                }
            }
        }

        // Draining: the batcher already flushed or dropped the tail.
        stats.dropped_tail = batcher.dropped_tail() as u64;
        if stats.dropped_tail > 0 {
            warn!(rows = stats.dropped_tail, "partial tail batch was not written");
        }
        Ok(())
    }

    fn bump(&self, name: &str, value: u64) {
        if value > 0
            && let Some(m) = &self.metrics
        {
            m.increment_counter(name, value);
        }
    }
}
