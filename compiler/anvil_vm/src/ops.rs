//! Numeric semantics shared by the interpreter and the compiled-code
//! runner. Both tiers must agree bit-for-bit: integer arithmetic wraps,
//! shift counts are masked, `MIN / -1` wraps, doubles are IEEE-754 and
//! double-to-integer conversions saturate with NaN going to zero.
//!
//! The kind-projection helpers assume verified bytecode; a mismatch is a
//! verifier bug, not a runtime condition.

use std::cmp::Ordering;

use anvil_bc::{ArrayRef, Value};

use crate::error::VmError;

pub(crate) fn int(v: Value) -> i32 {
    match v {
        Value::I32(x) => x,
        _ => unreachable!("kind checked by the verifier"),
    }
}

pub(crate) fn long(v: Value) -> i64 {
    match v {
        Value::I64(x) => x,
        _ => unreachable!("kind checked by the verifier"),
    }
}

pub(crate) fn dbl(v: Value) -> f64 {
    match v {
        Value::F64(x) => x,
        _ => unreachable!("kind checked by the verifier"),
    }
}

/// Reference or null.
pub(crate) fn refv(v: Value) -> Option<ArrayRef> {
    match v {
        Value::Ref(r) => Some(r),
        Value::Null => None,
        _ => unreachable!("kind checked by the verifier"),
    }
}

/// Reference that is about to be dereferenced.
pub(crate) fn arr(v: Value) -> Result<ArrayRef, VmError> {
    refv(v).ok_or(VmError::NullDeref)
}

pub(crate) fn idiv(a: i32, b: i32) -> Result<i32, VmError> {
    if b == 0 {
        Err(VmError::DivByZero)
    } else {
        Ok(a.wrapping_div(b))
    }
}

pub(crate) fn irem(a: i32, b: i32) -> Result<i32, VmError> {
    if b == 0 {
        Err(VmError::DivByZero)
    } else {
        Ok(a.wrapping_rem(b))
    }
}

pub(crate) fn ldiv(a: i64, b: i64) -> Result<i64, VmError> {
    if b == 0 {
        Err(VmError::DivByZero)
    } else {
        Ok(a.wrapping_div(b))
    }
}

pub(crate) fn lrem(a: i64, b: i64) -> Result<i64, VmError> {
    if b == 0 {
        Err(VmError::DivByZero)
    } else {
        Ok(a.wrapping_rem(b))
    }
}

fn mask32(count: i32) -> u32 {
    u32::try_from(count & 31).unwrap_or(0)
}

fn mask64(count: i32) -> u32 {
    u32::try_from(count & 63).unwrap_or(0)
}

pub(crate) fn ishl(a: i32, count: i32) -> i32 {
    a.wrapping_shl(mask32(count))
}

pub(crate) fn ishr(a: i32, count: i32) -> i32 {
    a.wrapping_shr(mask32(count))
}

pub(crate) fn iushr(a: i32, count: i32) -> i32 {
    ((a as u32).wrapping_shr(mask32(count))) as i32
}

pub(crate) fn lshl(a: i64, count: i32) -> i64 {
    a.wrapping_shl(mask64(count))
}

pub(crate) fn lshr(a: i64, count: i32) -> i64 {
    a.wrapping_shr(mask64(count))
}

pub(crate) fn lushr(a: i64, count: i32) -> i64 {
    ((a as u64).wrapping_shr(mask64(count))) as i64
}

fn ord(o: Ordering) -> i32 {
    match o {
        Ordering::Less => -1,
        Ordering::Equal => 0,
        Ordering::Greater => 1,
    }
}

pub(crate) fn icmp(a: i32, b: i32) -> i32 {
    ord(a.cmp(&b))
}

pub(crate) fn ucmp(a: i32, b: i32) -> i32 {
    ord((a as u32).cmp(&(b as u32)))
}

pub(crate) fn lcmp(a: i64, b: i64) -> i32 {
    ord(a.cmp(&b))
}

/// Three-way double compare; `nan` is the result when either side is NaN.
pub(crate) fn dcmp(a: f64, b: f64, nan: i32) -> i32 {
    a.partial_cmp(&b).map_or(nan, ord)
}

/// Saturating conversion: NaN to 0, out-of-range clamped.
pub(crate) fn d2i(x: f64) -> i32 {
    x as i32
}

/// Saturating conversion: NaN to 0, out-of-range clamped.
pub(crate) fn d2l(x: f64) -> i64 {
    x as i64
}

#[cfg(test)]
#[path = "ops/tests.rs"]
mod tests;
