//! Incremental migration of time-stamped metric events into per-day
//! aggregates: one fact row per metric per calendar day, append-only,
//! guarded by per-metric watermarks so reruns never rewrite history.

pub mod aggregate;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod store;
pub mod watermark;
