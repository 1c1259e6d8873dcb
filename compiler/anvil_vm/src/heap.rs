//! The array heap.
//!
//! Arrays live in a flat arena and are addressed through [`ArrayRef`]
//! handles. Nothing is ever freed: a handle stays valid for the life of
//! the VM, so deoptimization never has to relocate references.

use anvil_bc::{ArrayKind, ArrayRef, Value};

use crate::error::VmError;

/// One heap array. Each element kind gets its own storage so loads and
/// stores never re-tag values.
#[derive(Clone, Debug)]
enum TypedArray {
    I32(Vec<i32>),
    I64(Vec<i64>),
    F64(Vec<f64>),
}

impl TypedArray {
    fn len(&self) -> usize {
        match self {
            TypedArray::I32(v) => v.len(),
            TypedArray::I64(v) => v.len(),
            TypedArray::F64(v) => v.len(),
        }
    }
}

/// Arena of typed arrays.
#[derive(Debug, Default)]
pub struct Heap {
    arrays: Vec<TypedArray>,
}

impl Heap {
    pub fn new() -> Heap {
        Heap::default()
    }

    /// Allocate a zero-filled array. `len` comes straight off the operand
    /// stack and may be negative.
    pub fn alloc(&mut self, kind: ArrayKind, len: i32) -> Result<ArrayRef, VmError> {
        let Ok(n) = usize::try_from(len) else {
            return Err(VmError::NegativeArraySize { len });
        };
        let arr = match kind {
            ArrayKind::I32 => TypedArray::I32(vec![0; n]),
            ArrayKind::I64 => TypedArray::I64(vec![0; n]),
            ArrayKind::F64 => TypedArray::F64(vec![0.0; n]),
        };
        let handle = u32::try_from(self.arrays.len()).unwrap_or_else(|_| unreachable!());
        self.arrays.push(arr);
        Ok(ArrayRef(handle))
    }

    pub fn len(&self, r: ArrayRef) -> i32 {
        i32::try_from(self.arrays[r.raw() as usize].len()).unwrap_or(i32::MAX)
    }

    pub fn is_empty(&self, r: ArrayRef) -> bool {
        self.arrays[r.raw() as usize].len() == 0
    }

    /// Bounds-checked element load.
    pub fn load(&self, r: ArrayRef, index: i32) -> Result<Value, VmError> {
        let arr = &self.arrays[r.raw() as usize];
        let at = check(arr, index)?;
        Ok(match arr {
            TypedArray::I32(v) => Value::I32(v[at]),
            TypedArray::I64(v) => Value::I64(v[at]),
            TypedArray::F64(v) => Value::F64(v[at]),
        })
    }

    /// Bounds-checked element store. The value's kind matches the array's
    /// element kind in verified code.
    pub fn store(&mut self, r: ArrayRef, index: i32, value: Value) -> Result<(), VmError> {
        let at = check(&self.arrays[r.raw() as usize], index)?;
        match (&mut self.arrays[r.raw() as usize], value) {
            (TypedArray::I32(v), Value::I32(x)) => v[at] = x,
            (TypedArray::I64(v), Value::I64(x)) => v[at] = x,
            (TypedArray::F64(v), Value::F64(x)) => v[at] = x,
            _ => unreachable!("element kind checked by the verifier"),
        }
        Ok(())
    }

}

fn check(arr: &TypedArray, index: i32) -> Result<usize, VmError> {
    match usize::try_from(index) {
        Ok(at) if at < arr.len() => Ok(at),
        _ => Err(VmError::IndexOutOfBounds {
            index,
            length: i32::try_from(arr.len()).unwrap_or(i32::MAX),
        }),
    }
}

#[cfg(test)]
#[path = "heap/tests.rs"]
mod tests;
