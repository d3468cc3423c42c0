//! Fan-out over shard files and fan-in of their reports.

use crate::config::LoadConfig;
use crate::io::cloud::traits::Connector;
use crate::metrics::MetricsCollector;
use crate::types::FileTask;
use crate::worker::{FileReport, FileStats, FileWorker};
use anyhow::Result;
use rayon::prelude::*;
use std::path::Path;
use tracing::{info, warn};

/// Tasks for shards `0..end` under `base`.
pub fn file_tasks(base: impl AsRef<Path>, end: u64) -> Vec<FileTask> {
    let base = base.as_ref();
    (0..end).map(|i| FileTask::new(base, i)).collect()
}

/// Reports of every file in a run, in shard order.
#[derive(Debug, Default)]
pub struct RunReport {
    pub files: Vec<FileReport>,
}

impl RunReport {
    /// Sum of all per-file counters.
    #[must_use]
    pub fn totals(&self) -> FileStats {
        self.files.iter().fold(FileStats::default(), |mut acc, f| {
            acc.rows_read += f.stats.rows_read;
            acc.rows_skipped += f.stats.rows_skipped;
            acc.batches_written += f.stats.batches_written;
            acc.batches_failed += f.stats.batches_failed;
            acc.mutations_applied += f.stats.mutations_applied;
            acc.dropped_tail += f.stats.dropped_tail;
            acc
        })
    }

    /// Files that did not reach the end of input.
    pub fn failed(&self) -> impl Iterator<Item = &FileReport> {
        self.files.iter().filter(|f| !f.outcome.is_completed())
    }

    /// Whether every file completed and every batch was committed.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed().next().is_none() && self.totals().batches_failed == 0
    }
}

/// Runs one [`FileWorker`] per shard on a dedicated thread pool.
pub struct Orchestrator<K: Connector> {
    config: LoadConfig,
    connector: K,
    metrics: MetricsCollector,
}

impl<K: Connector> Orchestrator<K> {
    pub fn new(config: LoadConfig, connector: K) -> Self {
        Self {
            config,
            connector,
            metrics: MetricsCollector::with_builtin(),
        }
    }

    /// Report into `metrics` instead of a private collector.
    #[must_use]
    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = metrics;
        self
    }

    #[must_use]
    pub fn config(&self) -> &LoadConfig {
        &self.config
    }

    #[must_use]
    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    /// Load every shard and wait for all of them.
    ///
    /// Per-file failures are reported in the returned [`RunReport`] and never
    /// fail the run.
    ///
    /// If the dedicated pool cannot be started, files run on the shared rayon
    /// pool instead.
    ///
    /// # Errors
    /// Returns an error only if the configuration is invalid.
    pub fn run(&self) -> Result<RunReport> {
        self.config.validate()?;
        let tasks = file_tasks(&self.config.input_dir, self.config.file_count);
        if tasks.is_empty() {
            warn!("file count is 0; nothing to load");
            return Ok(RunReport::default());
        }

        let threads = self.config.worker_threads();
        info!(
            files = tasks.len(),
            workers = threads,
            batch_size = self.config.batch_size,
            database = %self.config.database,
            "starting load"
        );
        self.metrics.record_start();

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("loader-{i}"))
            .build();
        let files = match pool {
            Ok(pool) => pool.install(|| self.load_all(tasks)),
            Err(err) => {
                warn!(
                    error = %err,
                    requested = threads,
                    "could not start worker pool; using the shared rayon pool"
                );
                self.load_all(tasks)
            }
        };

        self.metrics.record_end();
        let report = RunReport { files };
        let totals = report.totals();
        info!(
            files = report.files.len(),
            failed_files = report.failed().count(),
            rows = totals.rows_read,
            applied = totals.mutations_applied,
            failed_batches = totals.batches_failed,
            elapsed_ms = self
                .metrics
                .elapsed()
                .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            "finish"
        );
        Ok(report)
    }

    /// Run one worker per task on the current rayon pool, keeping task order.
    fn load_all(&self, tasks: Vec<FileTask>) -> Vec<FileReport> {
        // with_max_len(1) keeps rayon from grouping files onto one thread
        // while others sit idle.
        tasks
            .into_par_iter()
            .with_max_len(1)
            .map(|task| {
                FileWorker::new(task, &self.connector, &self.config)
                    .with_metrics(self.metrics.clone())
                    .run()
            })
            .collect()
    }
}
