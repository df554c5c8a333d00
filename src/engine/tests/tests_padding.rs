use crate::engine::tests::helpers::{node_with_flags, single_metric_node};
use crate::modes::{DownsampleMode, MetricFlags, PadMode};

#[test]
fn gap_padding_and_decimation_cascade() {
    let (_dir, ctx) = single_metric_node(0x00CAFE, 30, &[2]);

    ctx.update_values(0, &[10.0]).unwrap();
    ctx.update_values(120, &[20.0]).unwrap();

    assert_eq!(ctx.get_latest().unwrap(), 120);

    let (_t, row) = ctx.get_values(0).unwrap();
    assert_eq!(row, vec![10.0]);
    let row30 = ctx.get_values(30).unwrap().1;
    assert!(row30[0].is_nan());
    let row60 = ctx.get_values(60).unwrap().1;
    assert!(row60[0].is_nan());
    let row90 = ctx.get_values(90).unwrap().1;
    assert!(row90[0].is_nan());
    let row120 = ctx.get_values(120).unwrap().1;
    assert_eq!(row120, vec![20.0]);
}

#[test]
fn pad_mode_last_repeats_most_recent_value() {
    let flags = vec![MetricFlags::new(PadMode::Last, DownsampleMode::Mean)];
    let (_dir, ctx) = node_with_flags(10, 10, &flags, &[]);

    ctx.update_values(0, &[5.0]).unwrap();
    ctx.update_values(40, &[9.0]).unwrap();

    // Points 10, 20, 30 were gapped and should repeat the last known value (5.0).
    for t in [10, 20, 30] {
        let (_t, row) = ctx.get_values(t).unwrap();
        assert_eq!(row, vec![5.0]);
    }
    let (_t, row) = ctx.get_values(40).unwrap();
    assert_eq!(row, vec![9.0]);
}

#[test]
fn pad_mode_last_with_no_prior_value_is_nan() {
    let flags = vec![MetricFlags::new(PadMode::Last, DownsampleMode::Mean)];
    let (_dir, ctx) = node_with_flags(11, 10, &flags, &[]);

    // First write establishes start_time at t=0 directly, so there is no
    // gap to pad here; force a gap by writing the very first point late.
    ctx.update_values(0, &[f64::NAN]).unwrap();
    ctx.update_values(20, &[1.0]).unwrap();

    let (_t, row) = ctx.get_values(10).unwrap();
    assert!(row[0].is_nan());
}
