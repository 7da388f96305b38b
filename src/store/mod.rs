use chrono::NaiveDateTime;

use crate::{
    aggregate::DayBucket,
    config::{RunOptions, StoreConfig},
    error::{Result, TransferError},
    watermark::{Watermarks, DATETIME_FORMAT},
};

mod postgres;
mod sqlite;

use self::postgres::{PostgresSource, PostgresTarget};
use self::sqlite::{SqliteSource, SqliteTarget};

/// One unprocessed row from the source table. The index is opaque and
/// never inspected beyond iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEvent {
    pub index: i64,
    pub timestamp: NaiveDateTime,
    pub metric: String,
}

pub trait EventSource {
    fn name(&self) -> &'static str;

    /// Drive `apply` over every source row in arrival order without
    /// materializing the set. The cursor is forward-only; calling this a
    /// second time re-runs the query.
    fn for_each_event(&mut self, apply: &mut dyn FnMut(RawEvent) -> Result<()>) -> Result<()>;
}

pub trait TargetStore {
    fn name(&self) -> &'static str;

    /// Create the metric dimension and event fact tables when missing.
    /// Safe to call on every run.
    fn ensure_schema(&mut self) -> Result<()>;

    /// Latest recorded timestamp per metric name. Zero fact rows is an
    /// empty map, not an error.
    fn load_watermarks(&mut self) -> Result<Watermarks>;

    /// Write every bucket inside a single transaction, creating metric
    /// dimension rows on demand. Returns the number of fact rows inserted.
    fn write_buckets(&mut self, buckets: &[DayBucket]) -> Result<u64>;
}

pub fn open_source(config: &StoreConfig, options: RunOptions) -> Result<Box<dyn EventSource>> {
    match config {
        StoreConfig::Sqlite { path } => Ok(Box::new(SqliteSource::open(path, options)?)),
        StoreConfig::Postgres { url } => Ok(Box::new(PostgresSource::connect(url, options)?)),
    }
}

pub fn open_target(config: &StoreConfig, options: RunOptions) -> Result<Box<dyn TargetStore>> {
    match config {
        StoreConfig::Sqlite { path } => Ok(Box::new(SqliteTarget::open(path, options)?)),
        StoreConfig::Postgres { url } => Ok(Box::new(PostgresTarget::connect(url, options)?)),
    }
}

pub(crate) fn parse_source_timestamp(value: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value, DATETIME_FORMAT).map_err(|_| {
        TransferError::SourceTimestamp {
            value: value.to_string(),
        }
    })
}

pub(crate) fn trace_statement(options: RunOptions, sql: &str) {
    if options.log_sql {
        tracing::info!(target: "sql", "{}", sql);
    }
}
