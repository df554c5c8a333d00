use crate::engine::tests::helpers::single_metric_node;
use crate::error::TimeStoreError;
use crate::metadata::{KEY_SLOT_READ, KEY_SLOT_WRITE};

#[test]
fn key_slot_round_trips() {
    let (_dir, ctx) = single_metric_node(30, 10, &[]);
    let key = [7u8; 32];

    ctx.set_key(KEY_SLOT_WRITE, Some(&key)).unwrap();
    let read_back = ctx.get_key(KEY_SLOT_WRITE).unwrap();
    assert_eq!(read_back, key);
}

#[test]
fn unset_key_slot_is_not_found() {
    let (_dir, ctx) = single_metric_node(31, 10, &[]);
    let err = ctx.get_key(KEY_SLOT_READ).unwrap_err();
    assert!(matches!(err, TimeStoreError::NotFound(_)));
}

#[test]
fn clearing_a_key_slot_makes_it_not_found_again() {
    let (_dir, ctx) = single_metric_node(32, 10, &[]);
    ctx.set_key(KEY_SLOT_READ, Some(&[1u8; 32])).unwrap();
    ctx.set_key(KEY_SLOT_READ, None).unwrap();
    assert!(ctx.get_key(KEY_SLOT_READ).is_err());
}

#[test]
fn key_slot_out_of_range_is_invalid() {
    let (_dir, ctx) = single_metric_node(33, 10, &[]);
    let err = ctx.get_key(99).unwrap_err();
    assert!(matches!(err, TimeStoreError::Invalid(_)));
}
