use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime};

use crate::{
    error::Result,
    store::{EventSource, RawEvent},
    watermark::Watermarks,
};

/// All records for one metric on one calendar day, collapsed into a count
/// and the latest timestamp seen before being persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct DayBucket {
    pub metric: String,
    pub day: NaiveDate,
    pub count: i64,
    pub latest: NaiveDateTime,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AggregateStats {
    pub scanned: u64,
    pub skipped: u64,
}

/// Drain the source in one pass, dropping records at or below their
/// metric's watermark and folding the rest into per-(metric, day) buckets.
pub fn aggregate(
    source: &mut dyn EventSource,
    watermarks: &Watermarks,
) -> Result<(Vec<DayBucket>, AggregateStats)> {
    let mut buckets: BTreeMap<(String, NaiveDate), DayBucket> = BTreeMap::new();
    let mut stats = AggregateStats::default();

    source.for_each_event(&mut |event: RawEvent| {
        stats.scanned += 1;
        if !watermarks.admits(&event.metric, event.timestamp) {
            stats.skipped += 1;
            return Ok(());
        }

        let RawEvent {
            timestamp, metric, ..
        } = event;
        let day = timestamp.date();
        buckets
            .entry((metric.clone(), day))
            .and_modify(|bucket| {
                bucket.count += 1;
                bucket.latest = bucket.latest.max(timestamp);
            })
            .or_insert_with(|| DayBucket {
                metric,
                day,
                count: 1,
                latest: timestamp,
            });
        Ok(())
    })?;

    Ok((buckets.into_values().collect(), stats))
}
