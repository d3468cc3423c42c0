//! Streaming CSV batcher.
//!
//! [`CsvBatcher`] reads one shard record by record and hands out fixed-size
//! [`Batch`]es. Nothing beyond the current batch is held in memory.
//!
//! # Design notes
//! - The first record is always skipped as a header. A missing header is
//!   logged, not fatal.
//! - Field count must stay constant within a file; the decoder rejects rows
//!   that differ from the first record.
//! - The partial batch left at end of input is governed by [`TailPolicy`].
//! - Records are read as raw bytes. Encoding is not checked here, so a bad
//!   byte costs only its own row at write time.
//! - A structurally malformed record is returned as an error annotated with
//!   the source and line. The batcher yields nothing after an error.

use crate::types::{Batch, SourceRecord};
use anyhow::{Context, Result};
use csv::{ByteRecord, Position};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{debug, warn};

/// What to do with the last, partially filled batch of a file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TailPolicy {
    /// Write it like any other batch.
    #[default]
    Flush,
    /// Discard it. Only full batches are ever written.
    Drop,
}

/// Lazily groups the records of one CSV source into batches.
pub struct CsvBatcher<R: Read> {
    source: String,
    reader: csv::Reader<R>,
    capacity: usize,
    tail: TailPolicy,
    pending: Vec<SourceRecord>,
    record: ByteRecord,
    header_skipped: bool,
    finished: bool,
    next_seq: u64,
    last_line: u64,
    rows_read: u64,
    dropped_tail: usize,
}

impl CsvBatcher<File> {
    /// Open `path` for batching.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened.
    pub fn open(path: impl AsRef<Path>, capacity: usize, tail: TailPolicy) -> Result<Self> {
        let path = path.as_ref();
        let f = File::open(path).with_context(|| format!("open {}", path.display()))?;
        Ok(Self::with_source(
            f,
            path.display().to_string(),
            capacity,
            tail,
        ))
    }
}

impl<R: Read> CsvBatcher<R> {
    /// Batch records from an arbitrary reader.
    pub fn from_reader(rdr: R, capacity: usize, tail: TailPolicy) -> Self {
        Self::with_source(rdr, "<reader>".to_string(), capacity, tail)
    }

    fn with_source(rdr: R, source: String, capacity: usize, tail: TailPolicy) -> Self {
        let reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .delimiter(b',')
            .flexible(false)
            .from_reader(rdr);
        let capacity = capacity.max(1);
        Self {
            source,
            reader,
            capacity,
            tail,
            pending: Vec::with_capacity(capacity),
            record: ByteRecord::new(),
            header_skipped: false,
            finished: false,
            next_seq: 0,
            last_line: 0,
            rows_read: 0,
            dropped_tail: 0,
        }
    }

    /// Data records read so far (header excluded).
    #[must_use]
    pub fn rows_read(&self) -> u64 {
        self.rows_read
    }

    /// Rows discarded at end of input under [`TailPolicy::Drop`].
    #[must_use]
    pub fn dropped_tail(&self) -> usize {
        self.dropped_tail
    }

    /// Read the next batch.
    ///
    /// Returns `Ok(None)` once the source is exhausted. The batch flushed at end
    /// of input has `is_final` set; a batch that fills up exactly at the last
    /// record is returned as a regular full batch and followed by `Ok(None)`.
    ///
    /// # Errors
    /// Returns an error if a record cannot be decoded.
    pub fn next_batch(&mut self) -> Result<Option<Batch>> {
        if self.finished {
            return Ok(None);
        }
        if !self.header_skipped {
            self.skip_header();
        }

        loop {
            let more = match self.reader.read_byte_record(&mut self.record) {
                Ok(more) => more,
                Err(err) => {
                    self.finished = true;
                    return Err(err).with_context(|| {
                        format!(
                            "read CSV record in {} after line {}",
                            self.source, self.last_line
                        )
                    });
                }
            };
            if !more {
                self.finished = true;
                return Ok(self.drain());
            }

            let line = self
                .record
                .position()
                .map_or(self.last_line + 1, Position::line);
            self.last_line = line;
            self.rows_read += 1;
            self.pending.push(SourceRecord::new(
                line,
                self.record.iter().map(<[u8]>::to_vec).collect(),
            ));

            if self.pending.len() >= self.capacity {
                return Ok(Some(self.flush(false)));
            }
        }
    }

    fn skip_header(&mut self) {
        self.header_skipped = true;
        match self.reader.read_byte_record(&mut self.record) {
            Ok(true) => {
                self.last_line = self.record.position().map_or(1, Position::line);
                debug!(source = %self.source, header = ?self.record, "skipped header");
            }
            Ok(false) => warn!(source = %self.source, "header skip failed: empty input"),
            Err(err) => warn!(source = %self.source, error = %err, "header skip failed"),
        }
    }

    fn drain(&mut self) -> Option<Batch> {
        if self.pending.is_empty() {
            return None;
        }
        match self.tail {
            TailPolicy::Flush => Some(self.flush(true)),
            TailPolicy::Drop => {
                self.dropped_tail = self.pending.len();
                warn!(
                    source = %self.source,
                    rows = self.dropped_tail,
                    "dropping partial batch at end of input"
                );
                self.pending.clear();
                None
            }
        }
    }

    fn flush(&mut self, is_final: bool) -> Batch {
        let records = std::mem::replace(&mut self.pending, Vec::with_capacity(self.capacity));
        let seq = self.next_seq;
        self.next_seq += 1;
        Batch {
            seq,
            records,
            is_final,
        }
    }
}

impl<R: Read> Iterator for CsvBatcher<R> {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_batch().transpose()
    }
}
