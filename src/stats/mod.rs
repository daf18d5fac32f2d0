//! Statistics and metrics

pub mod metrics;

pub use metrics::{ServerStats, ServerStatsSnapshot, ViewerStats};
