//! Fake implementations for testing.
//!
//! [`FakeDatabaseIO`] keeps tables in memory, applies upserts keyed by `ID`,
//! and records every `apply` call so tests can assert on batch boundaries.
//! Failures can be injected per call or per connection.

use crate::io::cloud::traits::{CloudIOError, CloudResult, Connector, DatabaseIO, ErrorKind};
use crate::types::Mutation;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

type TableStorage = Arc<Mutex<HashMap<String, BTreeMap<String, Mutation>>>>;
type FailurePredicate = Arc<dyn Fn(&[Mutation]) -> Option<CloudIOError> + Send + Sync>;

/// One recorded `apply` call.
#[derive(Debug, Clone)]
pub struct ApplyCall {
    pub table: String,
    pub mutations: Vec<Mutation>,
    pub committed: bool,
}

/// In-memory transactional table store.
///
/// Clones share the same storage, so one instance can serve as the
/// [`Connector`] for every worker of a run.
#[derive(Clone, Default)]
pub struct FakeDatabaseIO {
    tables: TableStorage,
    calls: Arc<Mutex<Vec<ApplyCall>>>,
    call_counter: Arc<AtomicUsize>,
    failing_calls: Arc<Mutex<HashSet<usize>>>,
    fail_when: Option<FailurePredicate>,
    refuse_connections: bool,
    connections: Arc<AtomicUsize>,
}

impl FakeDatabaseIO {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the `n`-th `apply` call (0-based, counted across all clones).
    #[must_use]
    pub fn fail_call(self, n: usize) -> Self {
        self.failing_calls
            .lock()
            .expect("failing_calls mutex poisoned")
            .insert(n);
        self
    }

    /// Fail every `apply` call for which `predicate` returns an error.
    #[must_use]
    pub fn fail_when<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&[Mutation]) -> Option<CloudIOError> + Send + Sync + 'static,
    {
        self.fail_when = Some(Arc::new(predicate));
        self
    }

    /// Make [`Connector::connect`] fail.
    #[must_use]
    pub fn refuse_connections(mut self) -> Self {
        self.refuse_connections = true;
        self
    }

    /// Every `apply` call seen so far, in arrival order.
    ///
    /// # Panics
    ///
    /// Panics if the mutex protecting the call log is poisoned.
    #[must_use]
    pub fn calls(&self) -> Vec<ApplyCall> {
        self.calls.lock().expect("calls mutex poisoned").clone()
    }

    /// Committed rows of `table`, ordered by `ID`.
    ///
    /// # Panics
    ///
    /// Panics if the mutex protecting the tables is poisoned.
    #[must_use]
    pub fn rows(&self, table: &str) -> Vec<Mutation> {
        self.tables
            .lock()
            .expect("tables mutex poisoned")
            .get(table)
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of clients handed out by [`Connector::connect`].
    #[must_use]
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    fn injected_failure(&self, call: usize, mutations: &[Mutation]) -> Option<CloudIOError> {
        let scheduled = self
            .failing_calls
            .lock()
            .expect("failing_calls mutex poisoned")
            .contains(&call);
        if scheduled {
            return Some(CloudIOError::new(
                ErrorKind::ServiceUnavailable,
                format!("injected failure on call {call}"),
            ));
        }
        self.fail_when.as_ref().and_then(|p| p(mutations))
    }
}

impl DatabaseIO for FakeDatabaseIO {
    fn apply(&self, table: &str, mutations: Vec<Mutation>, deadline: Instant) -> CloudResult<()> {
        let call = self.call_counter.fetch_add(1, Ordering::SeqCst);
        let failure = if Instant::now() >= deadline {
            Some(CloudIOError::deadline_exceeded("apply"))
        } else {
            self.injected_failure(call, &mutations)
        };

        if failure.is_none() {
            let mut tables = self.tables.lock().expect("tables mutex poisoned");
            let rows = tables.entry(table.to_string()).or_default();
            for m in &mutations {
                rows.insert(m.id.clone(), m.clone());
            }
        }

        self.calls
            .lock()
            .expect("calls mutex poisoned")
            .push(ApplyCall {
                table: table.to_string(),
                mutations,
                committed: failure.is_none(),
            });

        failure.map_or(Ok(()), Err)
    }
}

impl Connector for FakeDatabaseIO {
    type Client = Self;

    fn connect(&self, database: &str) -> CloudResult<Self> {
        if self.refuse_connections {
            return Err(CloudIOError::new(
                ErrorKind::Authentication,
                format!("connection to {database} refused"),
            ));
        }
        self.connections.fetch_add(1, Ordering::SeqCst);
        Ok(self.clone())
    }
}
