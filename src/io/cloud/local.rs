//! Directory-backed table store.
//!
//! Layout: `<root>/<table>/batch-<uuid>.jsonl`, one JSON object per mutation.
//! Each `apply` serializes the whole batch into a temp file in the table
//! directory and renames it into place, so a batch is either fully present or
//! absent. Replaying the files in modification order and keeping the last row
//! per `ID` yields the table's upsert state.

use crate::io::cloud::traits::{CloudIOError, CloudResult, Connector, DatabaseIO, ErrorKind};
use crate::types::Mutation;
use std::fs::create_dir_all;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tempfile::NamedTempFile;
use uuid::Uuid;

fn io_error(what: &str, path: &Path, err: &std::io::Error) -> CloudIOError {
    CloudIOError::new(ErrorKind::InternalError, format!("{what} {}", path.display()))
        .with_source(err.to_string())
}

/// Client writing to a local directory.
#[derive(Debug, Clone)]
pub struct LocalDatabaseIO {
    root: PathBuf,
}

impl LocalDatabaseIO {
    /// Open (creating if needed) the store rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if `root` cannot be created or is not a directory.
    pub fn open(root: impl AsRef<Path>) -> CloudResult<Self> {
        let root = root.as_ref().to_path_buf();
        if root.as_os_str().is_empty() {
            return Err(CloudIOError::new(ErrorKind::InvalidInput, "empty database path"));
        }
        create_dir_all(&root).map_err(|e| io_error("mkdir -p", &root, &e))?;
        if !root.is_dir() {
            return Err(CloudIOError::new(
                ErrorKind::InvalidInput,
                format!("{} is not a directory", root.display()),
            ));
        }
        Ok(Self { root })
    }

    fn table_dir(&self, table: &str) -> CloudResult<PathBuf> {
        let valid = !table.is_empty()
            && table
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(CloudIOError::new(
                ErrorKind::InvalidInput,
                format!("invalid table name {table:?}"),
            ));
        }
        Ok(self.root.join(table))
    }
}

impl DatabaseIO for LocalDatabaseIO {
    fn apply(&self, table: &str, mutations: Vec<Mutation>, deadline: Instant) -> CloudResult<()> {
        if Instant::now() >= deadline {
            return Err(CloudIOError::deadline_exceeded("apply"));
        }
        let dir = self.table_dir(table)?;
        if mutations.is_empty() {
            return Ok(());
        }
        create_dir_all(&dir).map_err(|e| io_error("mkdir -p", &dir, &e))?;

        let tmp =
            NamedTempFile::new_in(&dir).map_err(|e| io_error("create temp file in", &dir, &e))?;
        {
            let mut w = BufWriter::new(tmp.as_file());
            for m in &mutations {
                serde_json::to_writer(&mut w, m).map_err(|e| {
                    CloudIOError::new(ErrorKind::InvalidInput, format!("serialize row {}", m.id))
                        .with_source(e.to_string())
                })?;
                w.write_all(b"\n").map_err(|e| io_error("write", tmp.path(), &e))?;
            }
            w.flush().map_err(|e| io_error("flush", tmp.path(), &e))?;
        }
        tmp.as_file()
            .sync_all()
            .map_err(|e| io_error("sync", tmp.path(), &e))?;

        if Instant::now() >= deadline {
            // Temp file is removed on drop; nothing became visible.
            return Err(CloudIOError::deadline_exceeded("commit"));
        }
        let target = dir.join(format!("batch-{}.jsonl", Uuid::new_v4()));
        tmp.persist(&target)
            .map_err(|e| io_error("commit", &target, &e.error))?;
        Ok(())
    }
}

/// Connector opening a [`LocalDatabaseIO`] at the database path.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalConnector;

impl Connector for LocalConnector {
    type Client = LocalDatabaseIO;

    fn connect(&self, database: &str) -> CloudResult<LocalDatabaseIO> {
        LocalDatabaseIO::open(database)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;

    fn row(id: &str, kid: i64) -> Mutation {
        Mutation {
            id: id.to_string(),
            keyword: "kw".to_string(),
            keyword_id: kid,
            utterance: "hello".to_string(),
        }
    }

    fn batch_files(dir: &Path) -> Vec<PathBuf> {
        let mut files: Vec<_> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        files.sort();
        files
    }

    fn later() -> Instant {
        Instant::now() + Duration::from_secs(60)
    }

    #[test]
    fn apply_commits_one_file_per_batch() {
        let tmp = tempfile::tempdir().unwrap();
        let db = LocalConnector.connect(tmp.path().to_str().unwrap()).unwrap();
        db.apply("Utterance", vec![row("a", 1), row("b", 2)], later())
            .unwrap();
        db.apply("Utterance", vec![row("c", 3)], later()).unwrap();

        let files = batch_files(&tmp.path().join("Utterance"));
        assert_eq!(files.len(), 2);
        let mut ids = Vec::new();
        for f in files {
            for line in fs::read_to_string(f).unwrap().lines() {
                let m: Mutation = serde_json::from_str(line).unwrap();
                ids.push(m.id);
            }
        }
        ids.sort();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn expired_deadline_leaves_nothing_behind() {
        let tmp = tempfile::tempdir().unwrap();
        let db = LocalDatabaseIO::open(tmp.path()).unwrap();
        let err = db
            .apply("Utterance", vec![row("a", 1)], Instant::now())
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Timeout);
        assert!(!tmp.path().join("Utterance").exists());
    }

    #[test]
    fn rejects_path_like_table_names() {
        let tmp = tempfile::tempdir().unwrap();
        let db = LocalDatabaseIO::open(tmp.path()).unwrap();
        let err = db.apply("../x", vec![row("a", 1)], later()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidInput);
    }
}
