use tracing::info;

use crate::{
    aggregate,
    error::Result,
    store::{EventSource, TargetStore},
};

#[derive(Debug, Clone, Copy)]
pub struct TransferSummary {
    pub events_scanned: u64,
    pub events_skipped: u64,
    pub buckets_written: u64,
}

/// One full transfer: bootstrap the target schema, load per-metric
/// watermarks, drain the source once, and write the aggregated buckets.
/// Strictly sequential; any error aborts the run.
pub fn run(source: &mut dyn EventSource, target: &mut dyn TargetStore) -> Result<TransferSummary> {
    target.ensure_schema()?;

    let watermarks = target.load_watermarks()?;
    info!(
        "loaded {} watermark(s) from {} target",
        watermarks.len(),
        target.name()
    );

    let (buckets, stats) = aggregate::aggregate(source, &watermarks)?;
    info!(
        "aggregated {} event(s) from {} source into {} bucket(s), {} at or below watermark",
        stats.scanned,
        source.name(),
        buckets.len(),
        stats.skipped
    );

    let written = target.write_buckets(&buckets)?;
    info!("wrote {written} fact row(s)");

    Ok(TransferSummary {
        events_scanned: stats.scanned,
        events_skipped: stats.skipped,
        buckets_written: written,
    })
}
