//! Record source: an ordered, re-scannable sequence of raw records.
//!
//! The two-pass protocol re-reads the same sequence in the same order, so the
//! whole file is materialized up front. A line that fails to parse is kept as
//! a null record rather than dropped: downstream ordinals (and therefore fact
//! rows) stay aligned with the source, and the failure is reported against
//! the true position.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde_json::Value;
use tracing::warn;

use crate::util::sha256_file;

#[derive(Debug)]
pub struct RecordSet {
    pub path: String,
    pub sha256: String,
    pub malformed_line_count: usize,
    pub truncated: bool,
    records: Vec<Value>,
}

impl RecordSet {
    pub fn load(path: &Path, max_records: Option<usize>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let sha256 = sha256_file(path)?;

        let (mut records, malformed_line_count) = parse_records(&raw)
            .with_context(|| format!("failed to parse {}", path.display()))?;

        if records.is_empty() {
            bail!("no records found in {}", path.display());
        }

        let mut truncated = false;
        if let Some(limit) = max_records {
            if records.len() > limit {
                records.truncate(limit);
                truncated = true;
            }
        }

        Ok(Self {
            path: path.display().to_string(),
            sha256,
            malformed_line_count,
            truncated,
            records,
        })
    }

    #[cfg(test)]
    pub(crate) fn from_records(records: Vec<Value>) -> Self {
        Self {
            path: "<inline>".to_string(),
            sha256: String::new(),
            malformed_line_count: 0,
            truncated: false,
            records,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Records with their 1-based source ordinal, in stable order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Value)> {
        self.records
            .iter()
            .enumerate()
            .map(|(index, record)| (index + 1, record))
    }
}

/// A top-level JSON array is taken as-is; anything else is read line by line.
fn parse_records(raw: &str) -> Result<(Vec<Value>, usize)> {
    if raw.trim_start().starts_with('[') {
        let value: Value = serde_json::from_str(raw).context("invalid JSON array")?;
        let Value::Array(records) = value else {
            bail!("expected a JSON array at top level");
        };
        return Ok((records, 0));
    }

    let mut records = Vec::new();
    let mut malformed = 0;

    for (index, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<Value>(line) {
            Ok(record) => records.push(record),
            Err(err) => {
                warn!(line = index + 1, error = %err, "malformed source line kept as null record");
                records.push(Value::Null);
                malformed += 1;
            }
        }
    }

    Ok((records, malformed))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn parses_json_lines_in_order() {
        let raw = "{\"a\":1}\n\n{\"a\":2}\n{\"a\":3}\n";
        let (records, malformed) = parse_records(raw).unwrap();

        assert_eq!(malformed, 0);
        assert_eq!(records.len(), 3);
        assert_eq!(records[0]["a"], json!(1));
        assert_eq!(records[2]["a"], json!(3));
    }

    #[test]
    fn parses_top_level_array() {
        let raw = "[{\"a\":1},{\"a\":2}]";
        let (records, malformed) = parse_records(raw).unwrap();

        assert_eq!(malformed, 0);
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn malformed_line_becomes_null_record_at_same_ordinal() {
        let raw = "{\"a\":1}\nnot json\n{\"a\":3}\n";
        let (records, malformed) = parse_records(raw).unwrap();

        assert_eq!(malformed, 1);
        assert_eq!(records.len(), 3);
        assert!(records[1].is_null());
        assert_eq!(records[2]["a"], json!(3));
    }

    #[test]
    fn iter_yields_one_based_ordinals() {
        let set = RecordSet::from_records(vec![json!({}), json!({})]);
        let ordinals: Vec<usize> = set.iter().map(|(ordinal, _)| ordinal).collect();

        assert_eq!(ordinals, vec![1, 2]);
    }
}
