use pretty_assertions::assert_eq;

use super::{d2i, d2l, dcmp, idiv, irem, ishl, iushr, lcmp, lushr};
use crate::error::VmError;

#[test]
fn division_wraps_at_the_minimum() {
    assert_eq!(idiv(i32::MIN, -1).unwrap(), i32::MIN);
    assert_eq!(irem(i32::MIN, -1).unwrap(), 0);
    assert_eq!(idiv(7, 0), Err(VmError::DivByZero));
}

#[test]
fn shift_counts_are_masked() {
    assert_eq!(ishl(1, 33), 2);
    assert_eq!(iushr(-1, 28), 15);
    assert_eq!(lushr(-1, 60), 15);
}

#[test]
fn double_compares_send_nan_to_the_chosen_side() {
    assert_eq!(dcmp(f64::NAN, 0.0, -1), -1);
    assert_eq!(dcmp(f64::NAN, 0.0, 1), 1);
    assert_eq!(dcmp(1.0, 2.0, -1), -1);
    assert_eq!(dcmp(2.0, 2.0, 1), 0);
}

#[test]
fn double_to_integer_saturates() {
    assert_eq!(d2i(f64::NAN), 0);
    assert_eq!(d2i(1e100), i32::MAX);
    assert_eq!(d2i(-1e100), i32::MIN);
    assert_eq!(d2l(9.9e18), i64::MAX);
    assert_eq!(d2l(-0.9), 0);
}

#[test]
fn long_compare_is_three_way() {
    assert_eq!(lcmp(i64::MIN, i64::MAX), -1);
    assert_eq!(lcmp(3, 3), 0);
    assert_eq!(lcmp(4, 3), 1);
}
