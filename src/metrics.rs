//! Metrics collection and reporting for load runs.
//!
//! - [`Metric`] trait defines the interface for a named value
//! - [`MetricsCollector`] manages metric registration and collection
//! - [`CounterMetric`] is a lock-free counter shared between workers
//! - Metrics can be rendered as JSON or saved to a file
//!
//! # Example
//!
//! ```no_run
//! use utterance_loader::metrics::{MetricsCollector, names};
//!
//! # fn main() -> anyhow::Result<()> {
//! let metrics = MetricsCollector::with_builtin();
//! metrics.record_start();
//! metrics.increment_counter(names::ROWS_READ, 1000);
//! metrics.record_end();
//!
//! assert_eq!(metrics.counter(names::ROWS_READ), Some(1000));
//! metrics.save_to_file("metrics.json")?;
//! # Ok(())
//! # }
//! ```

use anyhow::{Context, Result};
use serde_json::{Value, json};
use std::any::Any;
use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Names of the built-in counters.
pub mod names {
    pub const FILES_COMPLETED: &str = "files_completed";
    pub const FILES_FAILED: &str = "files_failed";
    pub const ROWS_READ: &str = "rows_read";
    pub const ROWS_SKIPPED: &str = "rows_skipped";
    pub const BATCHES_WRITTEN: &str = "batches_written";
    pub const BATCHES_FAILED: &str = "batches_failed";
    pub const MUTATIONS_APPLIED: &str = "mutations_applied";
}

const BUILTIN: [(&str, &str); 7] = [
    (names::FILES_COMPLETED, "Files read to the end"),
    (names::FILES_FAILED, "Files aborted by an open, decode, or deadline error"),
    (names::ROWS_READ, "Data rows read, header excluded"),
    (names::ROWS_SKIPPED, "Rows skipped for an invalid keyword id or short row"),
    (names::BATCHES_WRITTEN, "Batches committed"),
    (names::BATCHES_FAILED, "Batches rejected by the database"),
    (names::MUTATIONS_APPLIED, "Upserts committed"),
];

/// Trait for custom metrics.
pub trait Metric: Send + Sync + Any {
    /// The name of this metric (e.g., `rows_read`).
    fn name(&self) -> &str;

    /// The current value of this metric as a JSON value.
    fn value(&self) -> Value;

    /// Optional description of what this metric measures.
    fn description(&self) -> Option<&str> {
        None
    }

    /// Cast to Any for downcasting.
    fn as_any(&self) -> &dyn Any;
}

/// Thread-safe container for run metrics. Clones share state.
#[derive(Clone)]
pub struct MetricsCollector {
    inner: Arc<Mutex<MetricsCollectorInner>>,
}

struct MetricsCollectorInner {
    metrics: HashMap<String, Arc<dyn Metric>>,
    start_time: Option<Instant>,
    end_time: Option<Instant>,
}

impl MetricsCollector {
    /// Create an empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MetricsCollectorInner {
                metrics: HashMap::new(),
                start_time: None,
                end_time: None,
            })),
        }
    }

    /// Create a collector with every built-in counter registered at zero.
    #[must_use]
    pub fn with_builtin() -> Self {
        let collector = Self::new();
        for (name, desc) in BUILTIN {
            collector.register(Arc::new(CounterMetric::new(name).with_description(desc)));
        }
        collector
    }

    fn lock(&self) -> MutexGuard<'_, MetricsCollectorInner> {
        // A poisoned lock still guards valid counters.
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Register a metric, replacing any metric with the same name.
    pub fn register(&self, metric: Arc<dyn Metric>) {
        self.lock().metrics.insert(metric.name().to_string(), metric);
    }

    /// Record the start time of the run.
    pub fn record_start(&self) {
        self.lock().start_time = Some(Instant::now());
    }

    /// Record the end time of the run.
    pub fn record_end(&self) {
        self.lock().end_time = Some(Instant::now());
    }

    /// Get the elapsed execution time, if available.
    #[must_use]
    pub fn elapsed(&self) -> Option<Duration> {
        let inner = self.lock();
        match (inner.start_time, inner.end_time) {
            (Some(start), Some(end)) => Some(end.duration_since(start)),
            _ => None,
        }
    }

    /// Add `value` to the counter `name`, creating it if needed.
    ///
    /// A non-counter metric registered under `name` is left untouched.
    pub fn increment_counter(&self, name: &str, value: u64) {
        let metric = {
            let mut inner = self.lock();
            Arc::clone(
                inner
                    .metrics
                    .entry(name.to_string())
                    .or_insert_with(|| Arc::new(CounterMetric::new(name)) as Arc<dyn Metric>),
            )
        };
        if let Some(counter) = metric.as_any().downcast_ref::<CounterMetric>() {
            counter.add(value);
        }
    }

    /// Current value of counter `name`, if registered.
    #[must_use]
    pub fn counter(&self, name: &str) -> Option<u64> {
        let inner = self.lock();
        inner
            .metrics
            .get(name)?
            .as_any()
            .downcast_ref::<CounterMetric>()
            .map(CounterMetric::get)
    }

    /// Get all metrics as a JSON object.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let inner = self.lock();
        let mut metrics_json = serde_json::Map::new();

        for (name, metric) in &inner.metrics {
            let mut metric_obj = serde_json::Map::new();
            metric_obj.insert("value".to_string(), metric.value());
            if let Some(desc) = metric.description() {
                metric_obj.insert("description".to_string(), json!(desc));
            }
            metrics_json.insert(name.clone(), Value::Object(metric_obj));
        }

        if let (Some(start), Some(end)) = (inner.start_time, inner.end_time) {
            let elapsed_ms = end.duration_since(start).as_millis();
            metrics_json.insert(
                "execution_time_ms".to_string(),
                json!({ "value": elapsed_ms, "description": "Total run time in milliseconds" }),
            );
        }
        drop(inner);
        Value::Object(metrics_json)
    }

    /// Save all metrics to a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created or written to.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let formatted = serde_json::to_string_pretty(&self.to_json())?;
        let mut file = File::create(path).with_context(|| format!("create {}", path.display()))?;
        file.write_all(formatted.as_bytes())
            .with_context(|| format!("write {}", path.display()))?;
        Ok(())
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

// ========== Built-in Metrics ==========

/// A monotonically increasing counter.
pub struct CounterMetric {
    name: String,
    count: AtomicU64,
    description: Option<String>,
}

impl CounterMetric {
    /// Create a new counter metric with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_value(name, 0)
    }

    /// Create a counter metric with an initial value.
    pub fn with_value(name: impl Into<String>, count: u64) -> Self {
        Self {
            name: name.into(),
            count: AtomicU64::new(count),
            description: None,
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn add(&self, value: u64) {
        self.count.fetch_add(value, Ordering::Relaxed);
    }

    #[must_use]
    pub fn get(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

impl Metric for CounterMetric {
    fn name(&self) -> &str {
        &self.name
    }

    fn value(&self) -> Value {
        json!(self.get())
    }

    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
