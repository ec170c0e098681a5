//! The materialization engine: schema discovery and migration, query
//! composition, watermark bookkeeping, and the per-domain run orchestrators.
//!
//! Two domains are materialized per campaign: response analytics (wide rows
//! with tenant-defined question and attribute columns) and schedule
//! analytics (distribution schedules correlated with their latest delivery
//! outcome and template metadata).

pub mod backfill;
pub mod config;
pub mod discovery;
pub mod exprs;
pub mod migrate;
pub mod response;
pub mod schedule;
pub mod watermark;

/// Version column shared by every CDC-replicated source relation and every
/// sink table. The sink's `ReplacingMergeTree` keeps the row with the
/// greatest value when logical rows collide, which is what makes re-running
/// a window safe.
pub const SYNC_COLUMN: &str = "_synced_at";

/// Epoch sentinel substituted for absent per-relation sync timestamps.
pub(crate) const SYNC_EPOCH: &str = "1970-01-01 00:00:00";
