use crate::engine::tests::helpers::{node_with_flags, single_metric_node};
use crate::engine::NO_TIMESTAMP;
use crate::modes::{DownsampleMode, MetricFlags, PadMode};

#[test]
fn create_write_read_back() {
    let (_dir, ctx) = single_metric_node(0x00CAFE, 30, &[2]);

    let t = ctx.update_values(0, &[10.0]).unwrap();
    assert_eq!(t, 0);

    let (rt, row) = ctx.get_values(0).unwrap();
    assert_eq!(rt, 0);
    assert_eq!(row, vec![10.0]);
    assert_eq!(ctx.get_latest().unwrap(), 0);
}

#[test]
fn latest_is_no_timestamp_when_empty() {
    let (_dir, ctx) = single_metric_node(1, 10, &[]);
    assert_eq!(ctx.get_latest().unwrap(), NO_TIMESTAMP);
}

#[test]
fn per_metric_nan_preserves_prior_value() {
    let flags = vec![
        MetricFlags::new(PadMode::Unknown, DownsampleMode::Mean),
        MetricFlags::new(PadMode::Unknown, DownsampleMode::Mean),
    ];
    let (_dir, ctx) = node_with_flags(2, 10, &flags, &[]);

    ctx.update_values(0, &[1.0, 2.0]).unwrap();
    ctx.update_values(0, &[f64::NAN, 9.0]).unwrap();

    let (_t, row) = ctx.get_values(0).unwrap();
    assert_eq!(row, vec![1.0, 9.0]);
}

#[test]
fn reject_timestamp_before_start() {
    let (_dir, ctx) = single_metric_node(3, 10, &[]);
    ctx.update_values(100, &[1.0]).unwrap();

    let err = ctx.update_values(50, &[2.0]).unwrap_err();
    assert!(matches!(err, crate::error::TimeStoreError::OutOfRange(_)));
}

#[test]
fn round_trip_is_bit_identical() {
    let (_dir, ctx) = single_metric_node(4, 1, &[]);
    let values = [1.5, 2.25, std::f64::consts::PI];
    for (i, &v) in values.iter().enumerate() {
        ctx.update_values(i as i64, &[v]).unwrap();
    }
    for (i, &v) in values.iter().enumerate() {
        let (_t, row) = ctx.get_values(i as i64).unwrap();
        assert_eq!(row[0].to_bits(), v.to_bits());
    }
}

#[test]
fn update_values_is_idempotent() {
    let (_dir, ctx) = single_metric_node(5, 10, &[2]);
    ctx.update_values(0, &[1.0]).unwrap();
    ctx.update_values(30, &[3.0]).unwrap();

    let before = ctx.get_values(0).unwrap();
    ctx.update_values(0, &[1.0]).unwrap();
    let after = ctx.get_values(0).unwrap();
    assert_eq!(before, after);
}

#[test]
fn reopen_preserves_invariants() {
    let dir = tempfile::TempDir::new().unwrap();
    let flags = vec![MetricFlags::new(PadMode::Unknown, DownsampleMode::Mean)];
    crate::engine::create(dir.path(), 6, 10, &flags, &[2]).unwrap();

    {
        let ctx = crate::engine::open(dir.path(), 6).unwrap();
        ctx.update_values(0, &[1.0]).unwrap();
        ctx.update_values(50, &[2.0]).unwrap();
    }

    let ctx = crate::engine::open(dir.path(), 6).unwrap();
    assert_eq!(ctx.get_latest().unwrap(), 50);
    let (_t, row) = ctx.get_values(0).unwrap();
    assert_eq!(row, vec![1.0]);
}
