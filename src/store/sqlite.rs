use std::{fs, path::Path};

use rusqlite::{params, Connection, OptionalExtension, Transaction};

use crate::{
    aggregate::DayBucket,
    config::RunOptions,
    error::{Result, TransferError},
    store::{parse_source_timestamp, trace_statement, EventSource, RawEvent, TargetStore},
    watermark::{self, Watermarks, DATETIME_FORMAT},
};

const SELECT_EVENTS_SQL: &str = r#"SELECT "index", "timestamp", "metric" FROM raw_events"#;

const CREATE_METRICS_SQL: &str = "CREATE TABLE IF NOT EXISTS metrics (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE
)";

const CREATE_EVENTS_SQL: &str = "CREATE TABLE IF NOT EXISTS events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    day_last TEXT NOT NULL,
    count INTEGER NOT NULL CHECK (count >= 0),
    metric_id INTEGER NOT NULL REFERENCES metrics (id) ON DELETE CASCADE
)";

const SELECT_WATERMARKS_SQL: &str = "SELECT metrics.name, MAX(events.day_last)
    FROM events
    INNER JOIN metrics ON events.metric_id = metrics.id
    GROUP BY metrics.name";

const SELECT_METRIC_SQL: &str = "SELECT id FROM metrics WHERE name = ?1";

const INSERT_METRIC_SQL: &str =
    "INSERT INTO metrics (name) VALUES (?1) ON CONFLICT (name) DO NOTHING";

const INSERT_EVENT_SQL: &str =
    "INSERT INTO events (day_last, count, metric_id) VALUES (?1, ?2, ?3)";

pub(super) struct SqliteSource {
    conn: Connection,
    options: RunOptions,
}

impl SqliteSource {
    pub(super) fn open(path: &Path, options: RunOptions) -> Result<Self> {
        let conn = open_connection(path)?;
        Ok(Self { conn, options })
    }
}

impl EventSource for SqliteSource {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn for_each_event(&mut self, apply: &mut dyn FnMut(RawEvent) -> Result<()>) -> Result<()> {
        trace_statement(self.options, SELECT_EVENTS_SQL);
        let mut stmt = self.conn.prepare(SELECT_EVENTS_SQL).map_err(storage)?;
        let mut rows = stmt.query([]).map_err(storage)?;
        while let Some(row) = rows.next().map_err(storage)? {
            let index: i64 = row.get(0).map_err(storage)?;
            let raw_timestamp: String = row.get(1).map_err(storage)?;
            let metric: String = row.get(2).map_err(storage)?;
            let timestamp = parse_source_timestamp(&raw_timestamp)?;
            apply(RawEvent {
                index,
                timestamp,
                metric,
            })?;
        }
        Ok(())
    }
}

pub(super) struct SqliteTarget {
    conn: Connection,
    options: RunOptions,
}

impl SqliteTarget {
    pub(super) fn open(path: &Path, options: RunOptions) -> Result<Self> {
        let conn = open_connection(path)?;
        Ok(Self { conn, options })
    }
}

impl TargetStore for SqliteTarget {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn ensure_schema(&mut self) -> Result<()> {
        for (table, sql) in [("metrics", CREATE_METRICS_SQL), ("events", CREATE_EVENTS_SQL)] {
            trace_statement(self.options, sql);
            self.conn
                .execute(sql, [])
                .map_err(|err| TransferError::Schema {
                    table: table.to_string(),
                    message: err.to_string(),
                })?;
        }
        Ok(())
    }

    fn load_watermarks(&mut self) -> Result<Watermarks> {
        trace_statement(self.options, SELECT_WATERMARKS_SQL);
        let mut stmt = self.conn.prepare(SELECT_WATERMARKS_SQL).map_err(storage)?;
        let mut rows = stmt.query([]).map_err(storage)?;
        let mut watermarks = Watermarks::default();
        while let Some(row) = rows.next().map_err(storage)? {
            let name: String = row.get(0).map_err(storage)?;
            let last: String = row.get(1).map_err(storage)?;
            let timestamp = watermark::parse_stored(&name, &last)?;
            watermarks.insert(name, timestamp);
        }
        Ok(watermarks)
    }

    fn write_buckets(&mut self, buckets: &[DayBucket]) -> Result<u64> {
        let tx = self.conn.transaction().map_err(storage)?;
        let mut written = 0;
        for bucket in buckets {
            let metric_id = resolve_metric(&tx, self.options, &bucket.metric)?;
            trace_statement(self.options, INSERT_EVENT_SQL);
            tx.execute(
                INSERT_EVENT_SQL,
                params![
                    bucket.latest.format(DATETIME_FORMAT).to_string(),
                    bucket.count,
                    metric_id
                ],
            )
            .map_err(storage)?;
            written += 1;
        }
        tx.commit().map_err(storage)?;
        Ok(written)
    }
}

/// Bounded get-or-create: select, insert on miss, select again. A second
/// miss means the database is rejecting the row and is surfaced as-is.
fn resolve_metric(tx: &Transaction<'_>, options: RunOptions, name: &str) -> Result<i64> {
    trace_statement(options, SELECT_METRIC_SQL);
    if let Some(id) = lookup_metric(tx, name)? {
        return Ok(id);
    }
    trace_statement(options, INSERT_METRIC_SQL);
    tx.execute(INSERT_METRIC_SQL, params![name]).map_err(storage)?;
    lookup_metric(tx, name)?
        .ok_or_else(|| TransferError::Storage(format!("metric {name:?} missing after insert")))
}

fn lookup_metric(tx: &Transaction<'_>, name: &str) -> Result<Option<i64>> {
    tx.query_row(SELECT_METRIC_SQL, params![name], |row| row.get(0))
        .optional()
        .map_err(storage)
}

fn open_connection(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|err| TransferError::Connect(err.to_string()))?;
        }
    }
    let conn = Connection::open(path).map_err(|err| TransferError::Connect(err.to_string()))?;
    // Cascade on metric removal only takes effect with the pragma on.
    conn.pragma_update(None, "foreign_keys", true)
        .map_err(storage)?;
    Ok(conn)
}

fn storage(err: rusqlite::Error) -> TransferError {
    TransferError::Storage(err.to_string())
}
