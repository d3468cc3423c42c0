//! Database client abstractions.
//!
//! The loader only needs one capability from a database: apply a batch of
//! upserts atomically. [`DatabaseIO`] captures that, and [`Connector`] builds
//! one client per file worker.
//!
//! - **Synchronous interface** - workers run on blocking threads, so every
//!   call blocks until the batch is committed or rejected
//! - **Fake implementation** - [`FakeDatabaseIO`] keeps tables in memory and
//!   records every call, with hooks for injecting failures
//! - **Local implementation** - [`LocalDatabaseIO`] commits each batch as one
//!   file under a directory, used by the command-line binary
//!
//! ## Unit Testing with Fakes
//! ```
//! use utterance_loader::io::cloud::*;
//! use utterance_loader::Mutation;
//! use std::time::{Duration, Instant};
//!
//! # fn main() -> CloudResult<()> {
//! let db = FakeDatabaseIO::new();
//! let client = db.connect("projects/p/instances/i/databases/d")?;
//! let row = Mutation {
//!     id: "k1".into(),
//!     keyword: "hello".into(),
//!     keyword_id: 7,
//!     utterance: "hello there".into(),
//! };
//! client.apply("Utterance", vec![row], Instant::now() + Duration::from_secs(5))?;
//! assert_eq!(db.rows("Utterance").len(), 1);
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! Client operations return [`CloudResult<T>`] where the error is
//! [`CloudIOError`], categorized by [`ErrorKind`]. Transient kinds
//! (`Network`, `Timeout`, `ServiceUnavailable`, `RateLimited`, `Aborted`) are
//! retried by [`helpers::retry_with_backoff`] when retries are enabled.

pub mod fake;
pub mod helpers;
pub mod local;
pub mod traits;

pub use fake::*;
pub use local::*;
pub use traits::*;
