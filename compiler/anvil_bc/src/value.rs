//! Runtime value model shared by the interpreter, the LIR runner and the
//! deopt frame rebuilder.

use std::fmt;
use std::hash::{Hash, Hasher};

use crate::kind::Kind;

/// Handle to a heap array.
///
/// Handles are indices into the VM heap's array table; they are never
/// reclaimed. Null is *not* an `ArrayRef` — it is [`Value::Null`].
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
#[repr(transparent)]
pub struct ArrayRef(pub u32);

impl ArrayRef {
    /// Raw table index.
    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

/// A single runtime value.
///
/// Equality and hashing treat doubles by bit pattern: `0.0 != -0.0` and two
/// NaNs with the same payload compare equal. That is the comparison the
/// differential test oracle wants (a compiled tier that flips a NaN payload
/// or a zero sign is a bug), and it keeps `Value` usable as a hash key.
/// Semantic IEEE comparison is an interpreter operation, never `==` on
/// `Value`.
#[derive(Copy, Clone, Debug)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
pub enum Value {
    I32(i32),
    I64(i64),
    F64(f64),
    Ref(ArrayRef),
    Null,
}

impl Value {
    /// Kind of this value. `Null` belongs to every reference kind, so it has
    /// no kind of its own.
    pub fn kind(&self) -> Option<Kind> {
        match self {
            Value::I32(_) => Some(Kind::I32),
            Value::I64(_) => Some(Kind::I64),
            Value::F64(_) => Some(Kind::F64),
            Value::Ref(_) | Value::Null => None,
        }
    }

    /// Default (zero) value for a kind, used for global and array init.
    pub fn default_of(kind: Kind) -> Value {
        match kind {
            Kind::I32 => Value::I32(0),
            Kind::I64 => Value::I64(0),
            Kind::F64 => Value::F64(0.0),
            Kind::Ref(_) => Value::Null,
        }
    }

    /// Whether this value can initialize a slot of `kind`.
    pub fn fits(&self, kind: Kind) -> bool {
        match (self, kind) {
            (Value::I32(_), Kind::I32)
            | (Value::I64(_), Kind::I64)
            | (Value::F64(_), Kind::F64)
            | (Value::Null, Kind::Ref(_)) => true,
            (Value::Ref(_), Kind::Ref(_)) => true,
            _ => false,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::I32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::I64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::F64(v) => Some(*v),
            _ => None,
        }
    }

    /// Array handle, treating `Null` as `None`.
    pub fn as_ref_or_null(&self) -> Option<Option<ArrayRef>> {
        match self {
            Value::Ref(r) => Some(Some(*r)),
            Value::Null => Some(None),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::I32(a), Value::I32(b)) => a == b,
            (Value::I64(a), Value::I64(b)) => a == b,
            (Value::F64(a), Value::F64(b)) => a.to_bits() == b.to_bits(),
            (Value::Ref(a), Value::Ref(b)) => a == b,
            (Value::Null, Value::Null) => true,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Value::I32(v) => {
                0u8.hash(state);
                v.hash(state);
            }
            Value::I64(v) => {
                1u8.hash(state);
                v.hash(state);
            }
            Value::F64(v) => {
                2u8.hash(state);
                v.to_bits().hash(state);
            }
            Value::Ref(r) => {
                3u8.hash(state);
                r.hash(state);
            }
            Value::Null => 4u8.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::I32(v) => write!(f, "{v}"),
            Value::I64(v) => write!(f, "{v}L"),
            Value::F64(v) => {
                if v.is_nan() {
                    write!(f, "nan(0x{:x})", v.to_bits())
                } else {
                    write!(f, "{v:?}")
                }
            }
            Value::Ref(r) => write!(f, "ref#{}", r.raw()),
            Value::Null => f.write_str("null"),
        }
    }
}
