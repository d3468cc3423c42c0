//! Core traits for the database side of the loader.
//!
//! These traits provide a synchronous interface to a transactional table
//! store. Implementations may drive an async SDK internally but must block
//! until the write is committed or rejected.

use crate::types::Mutation;
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

// ============================================================================
// Core Error Type
// ============================================================================

/// Error returned by a database client.
#[derive(Debug, Clone)]
pub struct CloudIOError {
    pub message: String,
    pub kind: ErrorKind,
    pub source: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Authentication,
    Authorization,
    NotFound,
    InvalidInput,
    Network,
    Timeout,
    ServiceUnavailable,
    RateLimited,
    Aborted,
    InternalError,
    Other,
}

impl ErrorKind {
    /// Kinds worth another attempt with the same mutations.
    #[must_use]
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            Self::Network
                | Self::Timeout
                | Self::ServiceUnavailable
                | Self::RateLimited
                | Self::Aborted
        )
    }
}

impl fmt::Display for CloudIOError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)?;
        if let Some(src) = &self.source {
            write!(f, " ({src})")?;
        }
        Ok(())
    }
}

impl Error for CloudIOError {}

impl CloudIOError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind,
            source: None,
        }
    }

    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Error for an operation that started after its deadline.
    pub fn deadline_exceeded(what: impl fmt::Display) -> Self {
        Self::new(ErrorKind::Timeout, format!("deadline exceeded before {what}"))
    }
}

pub type CloudResult<T> = Result<T, CloudIOError>;

// ============================================================================
// DatabaseIO - Transactional Tables
// ============================================================================

/// A client able to apply a set of mutations atomically.
pub trait DatabaseIO: Send {
    /// Apply every mutation in `mutations` to `table` as one transaction.
    ///
    /// Either all mutations become visible or none do. Each mutation is an
    /// insert-or-update keyed by [`Mutation::id`]. `deadline` bounds the call;
    /// an implementation should fail with [`ErrorKind::Timeout`] rather than
    /// start work after it.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction could not be committed. In that case
    /// none of the mutations were applied.
    fn apply(&self, table: &str, mutations: Vec<Mutation>, deadline: Instant) -> CloudResult<()>;
}

impl<T: DatabaseIO + Sync + ?Sized> DatabaseIO for Arc<T> {
    fn apply(&self, table: &str, mutations: Vec<Mutation>, deadline: Instant) -> CloudResult<()> {
        (**self).apply(table, mutations, deadline)
    }
}

impl<T: DatabaseIO + ?Sized> DatabaseIO for Box<T> {
    fn apply(&self, table: &str, mutations: Vec<Mutation>, deadline: Instant) -> CloudResult<()> {
        (**self).apply(table, mutations, deadline)
    }
}

/// Builds one client per file worker.
pub trait Connector: Send + Sync {
    type Client: DatabaseIO;

    /// Open a client for `database`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be reached or the identifier is
    /// not valid for this backend.
    fn connect(&self, database: &str) -> CloudResult<Self::Client>;
}

impl<F, C> Connector for F
where
    F: Fn(&str) -> CloudResult<C> + Send + Sync,
    C: DatabaseIO,
{
    type Client = C;

    fn connect(&self, database: &str) -> CloudResult<C> {
        self(database)
    }
}
