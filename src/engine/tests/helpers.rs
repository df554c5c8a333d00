use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

use crate::engine;
use crate::modes::{DownsampleMode, MetricFlags, PadMode};

/// Initializes a tracing subscriber controlled by `RUST_LOG`.
/// Safe to call multiple times — only the first call takes effect.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A temp-dir-backed node ready to write to, with a single `Mean`/`Unknown`
/// metric and no decimation chain unless overridden.
pub fn single_metric_node(
    node_id: u64,
    interval: u32,
    decimation: &[u32],
) -> (TempDir, std::sync::Arc<engine::Context>) {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let flags = vec![MetricFlags::new(PadMode::Unknown, DownsampleMode::Mean)];
    engine::create(dir.path(), node_id, interval, &flags, decimation).unwrap();
    let ctx = engine::open(dir.path(), node_id).unwrap();
    (dir, ctx)
}

pub fn node_with_flags(
    node_id: u64,
    interval: u32,
    flags: &[MetricFlags],
    decimation: &[u32],
) -> (TempDir, std::sync::Arc<engine::Context>) {
    init_tracing();
    let dir = TempDir::new().unwrap();
    engine::create(dir.path(), node_id, interval, flags, decimation).unwrap();
    let ctx = engine::open(dir.path(), node_id).unwrap();
    (dir, ctx)
}
