//! Batch writer: turns parsed rows into upserts and applies them atomically.

use crate::io::cloud::helpers::{RetryConfig, retry_with_backoff};
use crate::io::cloud::traits::{CloudResult, DatabaseIO};
use crate::keys::KeyDeriver;
use crate::types::{
    Batch, KEYWORD_FIELD, KEYWORD_ID_FIELD, MIN_FIELDS, Mutation, SourceRecord, TABLE,
    UTTERANCE_FIELD,
};
use anyhow::{Result, anyhow, bail};
use std::time::Instant;
use tracing::{debug, warn};

/// Counts for one successfully applied batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteSummary {
    pub applied: usize,
    pub skipped: usize,
}

/// Writes batches of one file through a single client.
///
/// Owns its [`KeyDeriver`], so two writers never share key state.
pub struct BatchWriter<C: DatabaseIO> {
    client: C,
    keys: KeyDeriver,
    table: String,
    retry: RetryConfig,
    deadline: Instant,
    source: String,
    rows_skipped: u64,
}

impl<C: DatabaseIO> BatchWriter<C> {
    pub fn new(client: C, keys: KeyDeriver, deadline: Instant) -> Self {
        Self {
            client,
            keys,
            table: TABLE.to_string(),
            retry: RetryConfig::none(),
            deadline,
            source: String::new(),
            rows_skipped: 0,
        }
    }

    #[must_use]
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Label used in log lines, usually the file path.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Invalid rows skipped across all batches so far.
    #[must_use]
    pub fn rows_skipped(&self) -> u64 {
        self.rows_skipped
    }

    #[must_use]
    pub fn keys(&self) -> &KeyDeriver {
        &self.keys
    }

    /// Build one mutation per valid record. Returns the mutations and the
    /// number of records skipped.
    pub fn build_mutations(&mut self, batch: &Batch) -> (Vec<Mutation>, usize) {
        let mut out = Vec::with_capacity(batch.len());
        let mut skipped = 0;
        for rec in &batch.records {
            match self.to_mutation(rec) {
                Ok(m) => out.push(m),
                Err(err) => {
                    skipped += 1;
                    warn!(
                        source = %self.source,
                        batch = batch.seq,
                        line = rec.line,
                        error = %err,
                        "skipping row"
                    );
                }
            }
        }
        self.rows_skipped += skipped as u64;
        (out, skipped)
    }

    /// Write `batch` as one atomic apply.
    ///
    /// Invalid rows are skipped; the rest are applied together or not at all.
    /// A batch with no valid rows is not sent. Each call starts a fresh key
    /// chain.
    ///
    /// # Errors
    /// Returns the client's error unchanged.
    pub fn write(&mut self, batch: &Batch) -> CloudResult<WriteSummary> {
        self.keys.reset();
        let (mutations, skipped) = self.build_mutations(batch);
        let applied = mutations.len();
        if applied == 0 {
            debug!(source = %self.source, batch = batch.seq, "no valid rows; nothing to apply");
            return Ok(WriteSummary { applied, skipped });
        }

        let (client, table, deadline) = (&self.client, self.table.as_str(), self.deadline);
        retry_with_backoff(&self.retry, deadline, |attempt| {
            if attempt > 1 {
                debug!(batch = batch.seq, attempt, "re-applying batch");
            }
            client.apply(table, mutations.clone(), deadline)
        })?;
        Ok(WriteSummary { applied, skipped })
    }

    fn to_mutation(&mut self, rec: &SourceRecord) -> Result<Mutation> {
        if rec.fields.len() < MIN_FIELDS {
            bail!(
                "expected at least {MIN_FIELDS} fields, found {}",
                rec.fields.len()
            );
        }
        let keyword = rec.text(KEYWORD_FIELD)?;
        let keyword_id = parse_grouping_id(rec.text(KEYWORD_ID_FIELD)?)?;
        let utterance = rec.text(UTTERANCE_FIELD)?;
        Ok(Mutation {
            id: self.keys.next_key(),
            keyword: keyword.to_owned(),
            keyword_id,
            utterance: utterance.to_owned(),
        })
    }
}

/// Parse a grouping identifier.
///
/// Accepts an optional sign, then decimal digits or a base prefix: `0x`/`0X`
/// (hex), `0o`/`0O` or a bare leading `0` (octal), `0b`/`0B` (binary). `_` may
/// separate digits, or follow a base prefix. Surrounding whitespace is not
/// accepted. The value must fit in an `i64`.
///
/// # Errors
/// Returns an error describing why `raw` is not a valid identifier.
pub fn parse_grouping_id(raw: &str) -> Result<i64> {
    let invalid = || anyhow!("invalid keyword id {raw:?}");

    let (negative, unsigned) = match raw.as_bytes().first() {
        Some(b'-') => (true, &raw[1..]),
        Some(b'+') => (false, &raw[1..]),
        Some(_) => (false, raw),
        None => return Err(invalid()),
    };

    let lower = unsigned.get(..2).map(str::to_ascii_lowercase);
    let (radix, digits, prefixed) = match lower.as_deref() {
        Some("0x") => (16, &unsigned[2..], true),
        Some("0o") => (8, &unsigned[2..], true),
        Some("0b") => (2, &unsigned[2..], true),
        _ if unsigned.len() > 1 && unsigned.starts_with('0') => (8, &unsigned[1..], true),
        _ => (10, unsigned, false),
    };

    if !underscores_ok(digits, prefixed) {
        return Err(invalid());
    }
    let cleaned: String = digits.chars().filter(|&c| c != '_').collect();
    if cleaned.is_empty() || !cleaned.chars().all(|c| c.is_digit(radix)) {
        return Err(invalid());
    }

    let magnitude = u64::from_str_radix(&cleaned, radix)
        .map_err(|_| anyhow!("keyword id {raw:?} out of range"))?;
    let signed = if negative {
        -i128::from(magnitude)
    } else {
        i128::from(magnitude)
    };
    i64::try_from(signed).map_err(|_| anyhow!("keyword id {raw:?} out of range"))
}

/// `_` must sit between two digits, or directly after a base prefix and
/// before a digit.
fn underscores_ok(digits: &str, prefixed: bool) -> bool {
    let bytes = digits.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        if b != b'_' {
            continue;
        }
        let before_ok = if i == 0 { prefixed } else { bytes[i - 1] != b'_' };
        let after_ok = bytes.get(i + 1).is_some_and(|&n| n != b'_');
        if !before_ok || !after_ok {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_decimal_and_signs() {
        assert_eq!(parse_grouping_id("42").unwrap(), 42);
        assert_eq!(parse_grouping_id("+7").unwrap(), 7);
        assert_eq!(parse_grouping_id("-13").unwrap(), -13);
        assert_eq!(parse_grouping_id("0").unwrap(), 0);
    }

    #[test]
    fn parses_base_prefixes() {
        assert_eq!(parse_grouping_id("0x1F").unwrap(), 31);
        assert_eq!(parse_grouping_id("0o17").unwrap(), 15);
        assert_eq!(parse_grouping_id("017").unwrap(), 15);
        assert_eq!(parse_grouping_id("0b101").unwrap(), 5);
        assert_eq!(parse_grouping_id("-0x10").unwrap(), -16);
    }

    #[test]
    fn underscores_between_digits_only() {
        assert_eq!(parse_grouping_id("1_000").unwrap(), 1000);
        assert_eq!(parse_grouping_id("0x_ff").unwrap(), 255);
        assert!(parse_grouping_id("_1").is_err());
        assert!(parse_grouping_id("1_").is_err());
        assert!(parse_grouping_id("1__0").is_err());
    }

    #[test]
    fn rejects_garbage() {
        for bad in ["", "-", "abc", " 1", "1 ", "1.5", "0x", "08", "0b2", "+-1"] {
            assert!(parse_grouping_id(bad).is_err(), "{bad:?} should fail");
        }
    }

    #[test]
    fn enforces_i64_range() {
        assert_eq!(parse_grouping_id("9223372036854775807").unwrap(), i64::MAX);
        assert_eq!(parse_grouping_id("-9223372036854775808").unwrap(), i64::MIN);
        assert!(parse_grouping_id("9223372036854775808").is_err());
        assert!(parse_grouping_id("99999999999999999999").is_err());
    }
}
