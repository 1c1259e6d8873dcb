//! Value kinds carried by locals, stack slots, globals and array elements.

use std::fmt;

/// Element kind of a typed array.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, PartialOrd, Ord)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
pub enum ArrayKind {
    /// `int[]`
    I32,
    /// `long[]`
    I64,
    /// `double[]`
    F64,
}

impl ArrayKind {
    /// Kind of a loaded element.
    #[inline]
    pub fn elem_kind(self) -> Kind {
        match self {
            ArrayKind::I32 => Kind::I32,
            ArrayKind::I64 => Kind::I64,
            ArrayKind::F64 => Kind::F64,
        }
    }

    /// Source-form name (`int[]`, `long[]`, `double[]`).
    pub fn name(self) -> &'static str {
        match self {
            ArrayKind::I32 => "int[]",
            ArrayKind::I64 => "long[]",
            ArrayKind::F64 => "double[]",
        }
    }

    /// Bare element name as written after `newarr`.
    pub fn elem_name(self) -> &'static str {
        match self {
            ArrayKind::I32 => "int",
            ArrayKind::I64 => "long",
            ArrayKind::F64 => "double",
        }
    }
}

impl fmt::Display for ArrayKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Kind of a single value slot.
///
/// Unlike the JVM there are no category-2 split slots: a `long` or `double`
/// occupies one local/stack slot.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
pub enum Kind {
    /// 32-bit signed integer.
    I32,
    /// 64-bit signed integer.
    I64,
    /// 64-bit IEEE-754 double.
    F64,
    /// Reference to a typed array (nullable).
    Ref(ArrayKind),
}

impl Kind {
    /// Source-form name.
    pub fn name(self) -> &'static str {
        match self {
            Kind::I32 => "int",
            Kind::I64 => "long",
            Kind::F64 => "double",
            Kind::Ref(ak) => ak.name(),
        }
    }

    /// Whether values of this kind live in a float register class.
    #[inline]
    pub fn is_float(self) -> bool {
        matches!(self, Kind::F64)
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
