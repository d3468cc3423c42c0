//! Run configuration.

use crate::io::cloud::helpers::RetryConfig;
use crate::io::csv::TailPolicy;
use crate::keys::KeyStrategy;
use crate::types::DEFAULT_BATCH_SIZE;
use anyhow::{Result, bail};
use std::path::PathBuf;
use std::time::Duration;

/// Per-file deadline applied when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(6 * 60 * 60);

/// Settings for one load run.
///
/// ```
/// use utterance_loader::{LoadConfig, TailPolicy};
///
/// let cfg = LoadConfig::new("db", "/data/shards", 4)
///     .with_batch_size(500)
///     .with_tail_policy(TailPolicy::Drop)
///     .with_max_workers(2);
/// assert!(cfg.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct LoadConfig {
    /// Database identifier handed to the connector.
    pub database: String,
    /// Directory holding `utterance-NNNNNNNNNNNN.csv` shards.
    pub input_dir: PathBuf,
    /// Number of shards; indexes `0..file_count` are loaded.
    pub file_count: u64,
    /// Records per write transaction.
    pub batch_size: usize,
    /// Deadline for each file task, measured from when the task starts.
    pub timeout: Duration,
    pub tail_policy: TailPolicy,
    pub key_strategy: KeyStrategy,
    /// Cap on concurrently running file tasks. `None` runs every file at once.
    pub max_workers: Option<usize>,
    pub retry: RetryConfig,
}

impl LoadConfig {
    pub fn new(
        database: impl Into<String>,
        input_dir: impl Into<PathBuf>,
        file_count: u64,
    ) -> Self {
        Self {
            database: database.into(),
            input_dir: input_dir.into(),
            file_count,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_tail_policy(mut self, tail_policy: TailPolicy) -> Self {
        self.tail_policy = tail_policy;
        self
    }

    #[must_use]
    pub fn with_key_strategy(mut self, key_strategy: KeyStrategy) -> Self {
        self.key_strategy = key_strategy;
        self
    }

    #[must_use]
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = Some(max_workers);
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Number of threads the orchestrator should run.
    #[must_use]
    pub fn worker_threads(&self) -> usize {
        let files = usize::try_from(self.file_count).unwrap_or(usize::MAX).max(1);
        self.max_workers.map_or(files, |cap| cap.min(files))
    }

    /// Check the settings for values no run can use.
    ///
    /// # Errors
    /// Returns an error for a zero batch size or a zero worker cap.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            bail!("batch size must be at least 1");
        }
        if self.max_workers == Some(0) {
            bail!("max workers must be at least 1");
        }
        if self.retry.max_attempts == 0 {
            bail!("retry attempts must be at least 1");
        }
        Ok(())
    }
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            database: String::new(),
            input_dir: PathBuf::from("."),
            file_count: 0,
            batch_size: DEFAULT_BATCH_SIZE,
            timeout: DEFAULT_TIMEOUT,
            tail_policy: TailPolicy::default(),
            key_strategy: KeyStrategy::default(),
            max_workers: None,
            retry: RetryConfig::none(),
        }
    }
}
