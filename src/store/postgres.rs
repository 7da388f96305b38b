use chrono::NaiveDateTime;
use postgres::{Client, NoTls, Transaction};

use crate::{
    aggregate::DayBucket,
    config::RunOptions,
    error::{Result, TransferError},
    store::{parse_source_timestamp, trace_statement, EventSource, RawEvent, TargetStore},
    watermark::Watermarks,
};

const SELECT_EVENTS_SQL: &str = r#"SELECT "index", "timestamp", "metric" FROM raw_events"#;

const CREATE_METRICS_SQL: &str = "CREATE TABLE IF NOT EXISTS metrics (
    id BIGSERIAL PRIMARY KEY,
    name TEXT NOT NULL UNIQUE
)";

const CREATE_EVENTS_SQL: &str = "CREATE TABLE IF NOT EXISTS events (
    id BIGSERIAL PRIMARY KEY,
    day_last TIMESTAMP NOT NULL,
    count BIGINT NOT NULL CHECK (count >= 0),
    metric_id BIGINT NOT NULL REFERENCES metrics (id) ON DELETE CASCADE
)";

const SELECT_WATERMARKS_SQL: &str = "SELECT metrics.name, MAX(events.day_last)
    FROM events
    INNER JOIN metrics ON events.metric_id = metrics.id
    GROUP BY metrics.name";

const SELECT_METRIC_SQL: &str = "SELECT id FROM metrics WHERE name = $1";

const INSERT_METRIC_SQL: &str =
    "INSERT INTO metrics (name) VALUES ($1) ON CONFLICT (name) DO NOTHING";

const INSERT_EVENT_SQL: &str =
    "INSERT INTO events (day_last, count, metric_id) VALUES ($1, $2, $3)";

pub(super) struct PostgresSource {
    client: Client,
    options: RunOptions,
}

impl PostgresSource {
    pub(super) fn connect(url: &str, options: RunOptions) -> Result<Self> {
        let client =
            Client::connect(url, NoTls).map_err(|err| TransferError::Connect(err.to_string()))?;
        Ok(Self { client, options })
    }
}

impl EventSource for PostgresSource {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn for_each_event(&mut self, apply: &mut dyn FnMut(RawEvent) -> Result<()>) -> Result<()> {
        trace_statement(self.options, SELECT_EVENTS_SQL);
        let rows = self.client.query(SELECT_EVENTS_SQL, &[]).map_err(storage)?;
        for row in rows {
            let index: i64 = row.try_get(0).map_err(storage)?;
            let raw_timestamp: String = row.try_get(1).map_err(storage)?;
            let metric: String = row.try_get(2).map_err(storage)?;
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

pub(super) struct PostgresTarget {
    client: Client,
    options: RunOptions,
}

impl PostgresTarget {
    pub(super) fn connect(url: &str, options: RunOptions) -> Result<Self> {
        let client =
            Client::connect(url, NoTls).map_err(|err| TransferError::Connect(err.to_string()))?;
        Ok(Self { client, options })
    }
}

impl TargetStore for PostgresTarget {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn ensure_schema(&mut self) -> Result<()> {
        for (table, sql) in [("metrics", CREATE_METRICS_SQL), ("events", CREATE_EVENTS_SQL)] {
            trace_statement(self.options, sql);
            self.client
                .batch_execute(sql)
                .map_err(|err| TransferError::Schema {
                    table: table.to_string(),
                    message: err.to_string(),
                })?;
        }
        Ok(())
    }

    fn load_watermarks(&mut self) -> Result<Watermarks> {
        trace_statement(self.options, SELECT_WATERMARKS_SQL);
        let rows = self
            .client
            .query(SELECT_WATERMARKS_SQL, &[])
            .map_err(storage)?;
        let mut watermarks = Watermarks::default();
        for row in rows {
            let name: String = row.try_get(0).map_err(storage)?;
            let last: NaiveDateTime = row.try_get(1).map_err(storage)?;
            watermarks.insert(name, last);
        }
        Ok(watermarks)
    }

    fn write_buckets(&mut self, buckets: &[DayBucket]) -> Result<u64> {
        let mut tx = self.client.transaction().map_err(storage)?;
        let mut written = 0;
        for bucket in buckets {
            let metric_id = resolve_metric(&mut tx, self.options, &bucket.metric)?;
            trace_statement(self.options, INSERT_EVENT_SQL);
            tx.execute(
                INSERT_EVENT_SQL,
                &[&bucket.latest, &bucket.count, &metric_id],
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
fn resolve_metric(tx: &mut Transaction<'_>, options: RunOptions, name: &str) -> Result<i64> {
    trace_statement(options, SELECT_METRIC_SQL);
    if let Some(row) = tx.query_opt(SELECT_METRIC_SQL, &[&name]).map_err(storage)? {
        return row.try_get(0).map_err(storage);
    }
    trace_statement(options, INSERT_METRIC_SQL);
    tx.execute(INSERT_METRIC_SQL, &[&name]).map_err(storage)?;
    let row = tx
        .query_opt(SELECT_METRIC_SQL, &[&name])
        .map_err(storage)?
        .ok_or_else(|| TransferError::Storage(format!("metric {name:?} missing after insert")))?;
    row.try_get(0).map_err(storage)
}

fn storage(err: postgres::Error) -> TransferError {
    TransferError::Storage(err.to_string())
}
