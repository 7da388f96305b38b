use std::collections::BTreeMap;

use chrono::NaiveDateTime;

use crate::error::{Result, TransferError};

/// Textual timestamp layout shared by the source table and the SQLite
/// target. Lexicographic order matches chronological order, so SQL `MAX`
/// over stored values is correct.
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Latest already-transferred timestamp per metric name, computed once per
/// run and read-only afterwards. A metric without an entry has no prior
/// data in the target.
#[derive(Debug, Default)]
pub struct Watermarks {
    latest: BTreeMap<String, NaiveDateTime>,
}

impl Watermarks {
    pub fn insert(&mut self, metric: String, timestamp: NaiveDateTime) {
        self.latest.insert(metric, timestamp);
    }

    pub fn get(&self, metric: &str) -> Option<NaiveDateTime> {
        self.latest.get(metric).copied()
    }

    pub fn len(&self) -> usize {
        self.latest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.latest.is_empty()
    }

    /// A record is admitted when its metric has no watermark yet, or when
    /// its timestamp is strictly greater than the watermark. An equal
    /// timestamp was already transferred and must not be admitted again.
    pub fn admits(&self, metric: &str, timestamp: NaiveDateTime) -> bool {
        match self.latest.get(metric) {
            Some(last) => timestamp > *last,
            None => true,
        }
    }
}

/// Parse a timestamp read back from the target. A value that does not
/// round-trip means something else wrote the fact table; refuse to
/// continue rather than transfer against a bad baseline.
pub fn parse_stored(metric: &str, value: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value, DATETIME_FORMAT).map_err(|_| {
        TransferError::CorruptWatermark {
            metric: metric.to_string(),
            value: value.to_string(),
        }
    })
}
