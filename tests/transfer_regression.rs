use std::path::PathBuf;

use anyhow::Result;
use chrono::NaiveDateTime;
use rusqlite::{params, Connection};
use tempfile::TempDir;

use daymark::{
    config::{RunOptions, StoreConfig},
    pipeline::{self, TransferSummary},
    store,
    watermark::DATETIME_FORMAT,
};

fn source_path(dir: &TempDir) -> PathBuf {
    dir.path().join("source.db")
}

fn target_path(dir: &TempDir) -> PathBuf {
    dir.path().join("target.db")
}

fn seed_source(dir: &TempDir, rows: &[(i64, &str, &str)]) -> Result<()> {
    let conn = Connection::open(source_path(dir))?;
    conn.execute(
        r#"CREATE TABLE IF NOT EXISTS raw_events ("index" INTEGER, "timestamp" TEXT, "metric" TEXT)"#,
        [],
    )?;
    for (index, timestamp, metric) in rows {
        conn.execute(
            r#"INSERT INTO raw_events ("index", "timestamp", "metric") VALUES (?1, ?2, ?3)"#,
            params![index, timestamp, metric],
        )?;
    }
    Ok(())
}

fn run_transfer(dir: &TempDir) -> Result<TransferSummary> {
    let options = RunOptions::default();
    let mut source = store::open_source(
        &StoreConfig::Sqlite {
            path: source_path(dir),
        },
        options,
    )?;
    let mut target = store::open_target(
        &StoreConfig::Sqlite {
            path: target_path(dir),
        },
        options,
    )?;
    Ok(pipeline::run(source.as_mut(), target.as_mut())?)
}

fn fact_rows(dir: &TempDir) -> Result<i64> {
    let conn = Connection::open(target_path(dir))?;
    Ok(conn.query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?)
}

#[test]
fn transfer_aggregates_per_metric_and_day() -> Result<()> {
    let dir = TempDir::new()?;
    seed_source(
        &dir,
        &[
            (1, "2024-01-02 10:00:00", "signups"),
            (2, "2024-01-02 14:30:00", "signups"),
            (3, "2024-01-02 09:15:00", "logins"),
            (4, "2024-01-03 08:00:00", "signups"),
        ],
    )?;

    let summary = run_transfer(&dir)?;
    assert_eq!(summary.events_scanned, 4);
    assert_eq!(summary.buckets_written, 3);

    let conn = Connection::open(target_path(&dir))?;
    let (count, day_last): (i64, String) = conn.query_row(
        "SELECT events.count, events.day_last
         FROM events
         INNER JOIN metrics ON events.metric_id = metrics.id
         WHERE metrics.name = 'signups' AND events.day_last LIKE '2024-01-02%'",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    assert_eq!(count, 2);
    assert_eq!(day_last, "2024-01-02 14:30:00");

    let metric_rows: i64 =
        conn.query_row("SELECT COUNT(*) FROM metrics", [], |row| row.get(0))?;
    assert_eq!(metric_rows, 2);
    Ok(())
}

#[test]
fn second_run_inserts_nothing() -> Result<()> {
    let dir = TempDir::new()?;
    seed_source(
        &dir,
        &[
            (1, "2024-01-02 10:00:00", "signups"),
            (2, "2024-01-02 14:30:00", "signups"),
            (3, "2024-01-03 08:00:00", "logins"),
        ],
    )?;

    let first = run_transfer(&dir)?;
    assert_eq!(first.buckets_written, 2);

    let second = run_transfer(&dir)?;
    assert_eq!(second.buckets_written, 0);
    assert_eq!(second.events_skipped, second.events_scanned);
    assert_eq!(fact_rows(&dir)?, 2);
    Ok(())
}

#[test]
fn record_at_the_watermark_is_rejected_and_newer_is_admitted() -> Result<()> {
    let dir = TempDir::new()?;
    seed_source(&dir, &[(1, "2024-01-02 14:30:00", "signups")])?;
    run_transfer(&dir)?;

    // Same instant as the watermark: not strictly greater, must not land.
    seed_source(&dir, &[(2, "2024-01-02 14:30:00", "signups")])?;
    let summary = run_transfer(&dir)?;
    assert_eq!(summary.buckets_written, 0);
    assert_eq!(fact_rows(&dir)?, 1);

    seed_source(&dir, &[(3, "2024-01-02 14:31:00", "signups")])?;
    let summary = run_transfer(&dir)?;
    assert_eq!(summary.buckets_written, 1);

    let conn = Connection::open(target_path(&dir))?;
    let count: i64 = conn.query_row(
        "SELECT count FROM events WHERE day_last = '2024-01-02 14:31:00'",
        [],
        |row| row.get(0),
    )?;
    assert_eq!(count, 1);
    Ok(())
}

#[test]
fn empty_source_completes_with_zero_writes() -> Result<()> {
    let dir = TempDir::new()?;
    seed_source(&dir, &[])?;

    let summary = run_transfer(&dir)?;
    assert_eq!(summary.events_scanned, 0);
    assert_eq!(summary.buckets_written, 0);

    let mut target = store::open_target(
        &StoreConfig::Sqlite {
            path: target_path(&dir),
        },
        RunOptions::default(),
    )?;
    assert!(target.load_watermarks()?.is_empty());
    Ok(())
}

#[test]
fn malformed_source_timestamp_aborts_before_any_write() -> Result<()> {
    let dir = TempDir::new()?;
    seed_source(
        &dir,
        &[
            (1, "2024-01-02 10:00:00", "signups"),
            (2, "not-a-timestamp", "signups"),
        ],
    )?;

    let err = run_transfer(&dir).unwrap_err();
    assert!(err.to_string().contains("not-a-timestamp"));
    assert_eq!(fact_rows(&dir)?, 0);
    Ok(())
}

#[test]
fn corrupted_stored_watermark_fails_the_next_run() -> Result<()> {
    let dir = TempDir::new()?;
    seed_source(&dir, &[(1, "2024-01-02 10:00:00", "signups")])?;
    run_transfer(&dir)?;

    let conn = Connection::open(target_path(&dir))?;
    conn.execute("UPDATE events SET day_last = 'garbage'", [])?;
    drop(conn);

    let err = run_transfer(&dir).unwrap_err();
    assert!(err.to_string().contains("signups"));
    Ok(())
}

#[test]
fn watermarks_survive_the_textual_round_trip() -> Result<()> {
    let dir = TempDir::new()?;
    seed_source(&dir, &[(1, "2024-01-02 23:59:59", "signups")])?;
    run_transfer(&dir)?;

    let mut target = store::open_target(
        &StoreConfig::Sqlite {
            path: target_path(&dir),
        },
        RunOptions::default(),
    )?;
    let watermarks = target.load_watermarks()?;
    assert_eq!(
        watermarks.get("signups").unwrap(),
        NaiveDateTime::parse_from_str("2024-01-02 23:59:59", DATETIME_FORMAT)?
    );
    Ok(())
}
