use anvil_bc::{ArrayKind, Value};
use pretty_assertions::assert_eq;

use super::Heap;
use crate::error::VmError;

#[test]
fn alloc_zero_fills_and_reports_length() {
    let mut h = Heap::new();
    let r = h.alloc(ArrayKind::I64, 4).unwrap();
    assert_eq!(h.len(r), 4);
    for i in 0..4 {
        assert_eq!(h.load(r, i).unwrap(), Value::I64(0));
    }
}

#[test]
fn stores_round_trip_per_kind() {
    let mut h = Heap::new();
    let a = h.alloc(ArrayKind::I32, 2).unwrap();
    let b = h.alloc(ArrayKind::F64, 2).unwrap();
    h.store(a, 1, Value::I32(-7)).unwrap();
    h.store(b, 0, Value::F64(2.5)).unwrap();
    assert_eq!(h.load(a, 1).unwrap(), Value::I32(-7));
    assert_eq!(h.load(b, 0).unwrap(), Value::F64(2.5));
    assert_eq!(h.load(a, 0).unwrap(), Value::I32(0));
}

#[test]
fn out_of_bounds_reports_index_and_length() {
    let mut h = Heap::new();
    let r = h.alloc(ArrayKind::I32, 3).unwrap();
    assert_eq!(
        h.load(r, 3),
        Err(VmError::IndexOutOfBounds { index: 3, length: 3 })
    );
    assert_eq!(
        h.store(r, -1, Value::I32(0)),
        Err(VmError::IndexOutOfBounds { index: -1, length: 3 })
    );
}

#[test]
fn negative_size_is_rejected() {
    let mut h = Heap::new();
    assert_eq!(
        h.alloc(ArrayKind::F64, -5),
        Err(VmError::NegativeArraySize { len: -5 })
    );
}

#[test]
fn handles_stay_valid_across_later_allocations() {
    let mut h = Heap::new();
    let first = h.alloc(ArrayKind::I32, 1).unwrap();
    h.store(first, 0, Value::I32(42)).unwrap();
    for _ in 0..100 {
        h.alloc(ArrayKind::I32, 8).unwrap();
    }
    assert_eq!(h.load(first, 0).unwrap(), Value::I32(42));
}
