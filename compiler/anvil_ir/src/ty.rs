//! The type lattice.
//!
//! Types are hash-consed into a [`TyPool`] and referenced by 32-bit
//! [`TyId`] handles, so type equality is an index compare. A handful of
//! singletons are pre-interned at fixed indices.
//!
//! The lattice is the usual compiler diamond: `Top` above everything,
//! `Bot` below, with per-base sublattices in between (integer ranges, long
//! ranges, double constants, nullable array references, control and memory
//! liveness). `meet` moves down, `join` moves up. Constants are the
//! single-point types (`is_con`).
//!
//! Integer ranges carry a `widen` counter bounding ascent during the
//! optimistic CCP pass: a phi whose range keeps growing gets widened a
//! bounded number of times and then jumps straight to the full range, so
//! the fixpoint terminates.

use anvil_bc::ArrayKind;
use rustc_hash::FxHashMap;

#[cfg(test)]
mod tests;

/// Widen counter ceiling; see [`TyPool::widen`].
pub const WIDEN_MAX: u8 = 3;

/// A 32-bit index into the type pool.
#[derive(Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct TyId(u32);

impl TyId {
    /// Above everything; the optimistic initial type.
    pub const TOP: Self = Self(0);
    /// Below everything; "any value at all".
    pub const BOT: Self = Self(1);
    /// Reachable control.
    pub const CTRL: Self = Self(2);
    /// Unreachable control.
    pub const CTRL_TOP: Self = Self(3);
    /// A memory state.
    pub const MEM: Self = Self(4);
    /// Unreached memory state.
    pub const MEM_TOP: Self = Self(5);
    /// Any `int`.
    pub const INT: Self = Self(6);
    /// Any `long`.
    pub const LONG: Self = Self(7);
    /// Any `double`.
    pub const DOUBLE: Self = Self(8);
    /// Double top (no double yet).
    pub const DOUBLE_TOP: Self = Self(9);
    /// The null constant.
    pub const NULL: Self = Self(10);
    /// `int` in `[0, 1]` (comparison outcomes).
    pub const INT_BOOL: Self = Self(11);
    /// `int` in `[-1, 1]` (three-way compare outcomes).
    pub const INT_CC: Self = Self(12);

    /// First index handed out for dynamically interned types.
    pub const FIRST_DYNAMIC: u32 = 16;

    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    #[allow(dead_code)]
    pub(crate) const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }
}

impl std::fmt::Debug for TyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ty{}", self.0)
    }
}

/// Inclusive signed 32-bit range with a widen counter.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct IntRange {
    pub lo: i32,
    pub hi: i32,
    pub widen: u8,
}

impl IntRange {
    pub const FULL: IntRange = IntRange {
        lo: i32::MIN,
        hi: i32::MAX,
        widen: WIDEN_MAX,
    };

    #[inline]
    pub fn is_con(&self) -> bool {
        self.lo == self.hi
    }

    #[inline]
    pub fn contains(&self, v: i32) -> bool {
        self.lo <= v && v <= self.hi
    }

    #[inline]
    pub fn subset_of(&self, other: &IntRange) -> bool {
        other.lo <= self.lo && self.hi <= other.hi
    }
}

/// Inclusive signed 64-bit range with a widen counter.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct LongRange {
    pub lo: i64,
    pub hi: i64,
    pub widen: u8,
}

impl LongRange {
    pub const FULL: LongRange = LongRange {
        lo: i64::MIN,
        hi: i64::MAX,
        widen: WIDEN_MAX,
    };

    #[inline]
    pub fn is_con(&self) -> bool {
        self.lo == self.hi
    }

    #[inline]
    pub fn subset_of(&self, other: &LongRange) -> bool {
        other.lo <= self.lo && self.hi <= other.hi
    }
}

/// An array reference type: element kind, length range, nullability.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct RefData {
    pub elem: ArrayKind,
    pub len: IntRange,
    pub may_null: bool,
}

/// Interned type representation.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub enum TyData {
    Top,
    Bot,
    Ctrl,
    CtrlTop,
    Mem,
    MemTop,
    Int(IntRange),
    Long(LongRange),
    /// Double constant by bit pattern: two NaNs with equal bits are the
    /// same constant, `0.0` and `-0.0` are different ones.
    DoubleCon(u64),
    /// Any double.
    Double,
    DoubleTop,
    /// The null constant.
    Null,
    Ref(RefData),
    /// Product type for multi-output nodes (`If` successor liveness).
    Tuple(Box<[TyId]>),
}

/// Hash-consing pool of types.
pub struct TyPool {
    data: Vec<TyData>,
    map: FxHashMap<TyData, TyId>,
}

impl Default for TyPool {
    fn default() -> Self {
        Self::new()
    }
}

impl TyPool {
    pub fn new() -> Self {
        let mut pool = TyPool {
            data: Vec::with_capacity(64),
            map: FxHashMap::default(),
        };
        // Order must match the TyId constants.
        let singletons = [
            TyData::Top,
            TyData::Bot,
            TyData::Ctrl,
            TyData::CtrlTop,
            TyData::Mem,
            TyData::MemTop,
            TyData::Int(IntRange::FULL),
            TyData::Long(LongRange::FULL),
            TyData::Double,
            TyData::DoubleTop,
            TyData::Null,
            TyData::Int(IntRange { lo: 0, hi: 1, widen: 0 }),
            TyData::Int(IntRange { lo: -1, hi: 1, widen: 0 }),
        ];
        for s in singletons {
            let id = TyId(u32::try_from(pool.data.len()).unwrap_or(u32::MAX));
            pool.map.insert(s.clone(), id);
            pool.data.push(s);
        }
        // Reserved slots up to FIRST_DYNAMIC.
        while pool.data.len() < TyId::FIRST_DYNAMIC as usize {
            pool.data.push(TyData::Top);
        }
        pool
    }

    #[inline]
    pub fn get(&self, id: TyId) -> &TyData {
        &self.data[id.raw() as usize]
    }

    /// Intern, normalizing range widen counters: constants pin widen to 0,
    /// full ranges to the ceiling.
    pub fn intern(&mut self, data: TyData) -> TyId {
        let data = match data {
            TyData::Int(r) => TyData::Int(Self::norm_int(r)),
            TyData::Long(r) => TyData::Long(Self::norm_long(r)),
            other => other,
        };
        if let Some(&id) = self.map.get(&data) {
            return id;
        }
        let id = TyId(u32::try_from(self.data.len()).unwrap_or(u32::MAX));
        self.map.insert(data.clone(), id);
        self.data.push(data);
        id
    }

    fn norm_int(r: IntRange) -> IntRange {
        debug_assert!(r.lo <= r.hi);
        let widen = if r.lo == r.hi {
            0
        } else if r.lo == i32::MIN && r.hi == i32::MAX {
            WIDEN_MAX
        } else {
            r.widen.min(WIDEN_MAX)
        };
        IntRange { widen, ..r }
    }

    fn norm_long(r: LongRange) -> LongRange {
        debug_assert!(r.lo <= r.hi);
        let widen = if r.lo == r.hi {
            0
        } else if r.lo == i64::MIN && r.hi == i64::MAX {
            WIDEN_MAX
        } else {
            r.widen.min(WIDEN_MAX)
        };
        LongRange { widen, ..r }
    }

    // --- constructors ---

    pub fn int(&mut self, lo: i32, hi: i32) -> TyId {
        self.intern(TyData::Int(IntRange { lo, hi, widen: 0 }))
    }

    pub fn int_con(&mut self, v: i32) -> TyId {
        self.int(v, v)
    }

    pub fn long(&mut self, lo: i64, hi: i64) -> TyId {
        self.intern(TyData::Long(LongRange { lo, hi, widen: 0 }))
    }

    pub fn long_con(&mut self, v: i64) -> TyId {
        self.long(v, v)
    }

    pub fn double_con(&mut self, v: f64) -> TyId {
        self.intern(TyData::DoubleCon(v.to_bits()))
    }

    pub fn double_con_bits(&mut self, bits: u64) -> TyId {
        self.intern(TyData::DoubleCon(bits))
    }

    pub fn array_ref(&mut self, elem: ArrayKind, len: IntRange, may_null: bool) -> TyId {
        self.intern(TyData::Ref(RefData {
            elem,
            len: Self::norm_int(len),
            may_null,
        }))
    }

    pub fn tuple(&mut self, elems: &[TyId]) -> TyId {
        self.intern(TyData::Tuple(elems.into()))
    }

    // --- inspection ---

    pub fn is_con(&self, id: TyId) -> bool {
        match self.get(id) {
            TyData::Int(r) => r.is_con(),
            TyData::Long(r) => r.is_con(),
            TyData::DoubleCon(_) | TyData::Null => true,
            _ => false,
        }
    }

    pub fn as_int_con(&self, id: TyId) -> Option<i32> {
        match self.get(id) {
            TyData::Int(r) if r.is_con() => Some(r.lo),
            _ => None,
        }
    }

    pub fn as_long_con(&self, id: TyId) -> Option<i64> {
        match self.get(id) {
            TyData::Long(r) if r.is_con() => Some(r.lo),
            _ => None,
        }
    }

    pub fn as_double_con_bits(&self, id: TyId) -> Option<u64> {
        match self.get(id) {
            TyData::DoubleCon(bits) => Some(*bits),
            _ => None,
        }
    }

    pub fn int_range(&self, id: TyId) -> Option<IntRange> {
        match self.get(id) {
            TyData::Int(r) => Some(*r),
            _ => None,
        }
    }

    pub fn long_range(&self, id: TyId) -> Option<LongRange> {
        match self.get(id) {
            TyData::Long(r) => Some(*r),
            _ => None,
        }
    }

    pub fn ref_data(&self, id: TyId) -> Option<RefData> {
        match self.get(id) {
            TyData::Ref(r) => Some(*r),
            _ => None,
        }
    }

    /// Tuple component, `BOT` if not a tuple.
    pub fn tuple_elem(&self, id: TyId, i: usize) -> TyId {
        match self.get(id) {
            TyData::Tuple(elems) => elems.get(i).copied().unwrap_or(TyId::BOT),
            _ => TyId::BOT,
        }
    }

    /// `a` is at or above `b` in the lattice.
    pub fn higher_equal(&mut self, a: TyId, b: TyId) -> bool {
        self.meet(a, b) == b
    }

    // --- lattice operations ---

    /// Greatest lower bound.
    #[allow(clippy::too_many_lines)]
    pub fn meet(&mut self, a: TyId, b: TyId) -> TyId {
        if a == b {
            return a;
        }
        if a == TyId::TOP {
            return b;
        }
        if b == TyId::TOP {
            return a;
        }
        if a == TyId::BOT || b == TyId::BOT {
            return TyId::BOT;
        }
        let (da, db) = (self.get(a).clone(), self.get(b).clone());
        match (da, db) {
            (TyData::CtrlTop, TyData::Ctrl) | (TyData::Ctrl, TyData::CtrlTop) => TyId::CTRL,
            (TyData::MemTop, TyData::Mem) | (TyData::Mem, TyData::MemTop) => TyId::MEM,

            (TyData::Int(x), TyData::Int(y)) => self.intern(TyData::Int(IntRange {
                lo: x.lo.min(y.lo),
                hi: x.hi.max(y.hi),
                widen: x.widen.max(y.widen),
            })),
            (TyData::Long(x), TyData::Long(y)) => self.intern(TyData::Long(LongRange {
                lo: x.lo.min(y.lo),
                hi: x.hi.max(y.hi),
                widen: x.widen.max(y.widen),
            })),

            (TyData::DoubleTop, TyData::DoubleCon(x))
            | (TyData::DoubleCon(x), TyData::DoubleTop) => self.intern(TyData::DoubleCon(x)),
            (TyData::DoubleTop, TyData::Double) | (TyData::Double, TyData::DoubleTop) => {
                TyId::DOUBLE
            }
            (TyData::DoubleCon(_), TyData::Double) | (TyData::Double, TyData::DoubleCon(_)) => {
                TyId::DOUBLE
            }
            // Distinct constants (by bits) fall to the double bottom.
            (TyData::DoubleCon(_), TyData::DoubleCon(_)) => TyId::DOUBLE,

            (TyData::Null, TyData::Ref(r)) | (TyData::Ref(r), TyData::Null) => {
                self.intern(TyData::Ref(RefData {
                    may_null: true,
                    ..r
                }))
            }
            (TyData::Ref(x), TyData::Ref(y)) => {
                if x.elem != y.elem {
                    return TyId::BOT;
                }
                self.intern(TyData::Ref(RefData {
                    elem: x.elem,
                    len: Self::norm_int(IntRange {
                        lo: x.len.lo.min(y.len.lo),
                        hi: x.len.hi.max(y.len.hi),
                        widen: x.len.widen.max(y.len.widen),
                    }),
                    may_null: x.may_null || y.may_null,
                }))
            }

            (TyData::Tuple(x), TyData::Tuple(y)) => {
                if x.len() != y.len() {
                    return TyId::BOT;
                }
                let elems: Vec<TyId> =
                    x.iter().zip(y.iter()).map(|(&p, &q)| self.meet(p, q)).collect();
                self.tuple(&elems)
            }

            // Unrelated bases.
            _ => TyId::BOT,
        }
    }

    /// Least upper bound, computed directly per base (intersection for
    /// ranges and refs). Unrelated bases join to `Top`.
    pub fn join(&mut self, a: TyId, b: TyId) -> TyId {
        if a == b {
            return a;
        }
        if a == TyId::BOT {
            return b;
        }
        if b == TyId::BOT {
            return a;
        }
        if a == TyId::TOP || b == TyId::TOP {
            return TyId::TOP;
        }
        let (da, db) = (self.get(a).clone(), self.get(b).clone());
        match (da, db) {
            (TyData::CtrlTop, TyData::Ctrl) | (TyData::Ctrl, TyData::CtrlTop) => TyId::CTRL_TOP,
            (TyData::MemTop, TyData::Mem) | (TyData::Mem, TyData::MemTop) => TyId::MEM_TOP,

            (TyData::Int(x), TyData::Int(y)) => {
                let lo = x.lo.max(y.lo);
                let hi = x.hi.min(y.hi);
                if lo > hi {
                    TyId::TOP
                } else {
                    self.intern(TyData::Int(IntRange {
                        lo,
                        hi,
                        widen: x.widen.min(y.widen),
                    }))
                }
            }
            (TyData::Long(x), TyData::Long(y)) => {
                let lo = x.lo.max(y.lo);
                let hi = x.hi.min(y.hi);
                if lo > hi {
                    TyId::TOP
                } else {
                    self.intern(TyData::Long(LongRange {
                        lo,
                        hi,
                        widen: x.widen.min(y.widen),
                    }))
                }
            }

            (TyData::Double, TyData::DoubleCon(x)) | (TyData::DoubleCon(x), TyData::Double) => {
                self.intern(TyData::DoubleCon(x))
            }
            (TyData::Double, TyData::DoubleTop)
            | (TyData::DoubleTop, TyData::Double)
            | (TyData::DoubleCon(_), TyData::DoubleTop)
            | (TyData::DoubleTop, TyData::DoubleCon(_)) => TyId::DOUBLE_TOP,
            (TyData::DoubleCon(_), TyData::DoubleCon(_)) => TyId::DOUBLE_TOP,

            (TyData::Null, TyData::Ref(r)) | (TyData::Ref(r), TyData::Null) => {
                if r.may_null {
                    TyId::NULL
                } else {
                    TyId::TOP
                }
            }
            (TyData::Ref(x), TyData::Ref(y)) => {
                if x.elem != y.elem {
                    return TyId::TOP;
                }
                let lo = x.len.lo.max(y.len.lo);
                let hi = x.len.hi.min(y.len.hi);
                if lo > hi {
                    return TyId::TOP;
                }
                self.intern(TyData::Ref(RefData {
                    elem: x.elem,
                    len: Self::norm_int(IntRange { lo, hi, widen: 0 }),
                    may_null: x.may_null && y.may_null,
                }))
            }

            _ => TyId::TOP,
        }
    }

    /// Bounded widening for the optimistic CCP fixpoint.
    ///
    /// `new` is the freshly computed type, `old` the node's previous type.
    /// If an integer range keeps growing, let it grow a few times, then
    /// jump the growing bound(s) straight to the limit so ascent
    /// terminates.
    pub fn widen(&mut self, new: TyId, old: TyId) -> TyId {
        match (self.get(new).clone(), self.get(old).clone()) {
            (TyData::Int(n), TyData::Int(o)) => {
                if n.subset_of(&o) || n == o {
                    return new;
                }
                if o.widen < WIDEN_MAX {
                    return self.intern(TyData::Int(IntRange {
                        lo: n.lo,
                        hi: n.hi,
                        widen: o.widen + 1,
                    }));
                }
                let lo = if n.lo < o.lo { i32::MIN } else { n.lo };
                let hi = if n.hi > o.hi { i32::MAX } else { n.hi };
                self.intern(TyData::Int(IntRange {
                    lo,
                    hi,
                    widen: WIDEN_MAX,
                }))
            }
            (TyData::Long(n), TyData::Long(o)) => {
                if n.subset_of(&o) || n == o {
                    return new;
                }
                if o.widen < WIDEN_MAX {
                    return self.intern(TyData::Long(LongRange {
                        lo: n.lo,
                        hi: n.hi,
                        widen: o.widen + 1,
                    }));
                }
                let lo = if n.lo < o.lo { i64::MIN } else { n.lo };
                let hi = if n.hi > o.hi { i64::MAX } else { n.hi };
                self.intern(TyData::Long(LongRange {
                    lo,
                    hi,
                    widen: WIDEN_MAX,
                }))
            }
            _ => new,
        }
    }

    /// Render a type for the graph printer.
    pub fn render(&self, id: TyId) -> String {
        match self.get(id) {
            TyData::Top => "top".into(),
            TyData::Bot => "bot".into(),
            TyData::Ctrl => "ctrl".into(),
            TyData::CtrlTop => "ctrl!".into(),
            TyData::Mem => "mem".into(),
            TyData::MemTop => "mem!".into(),
            TyData::Int(r) if r.is_con() => format!("int:{}", r.lo),
            TyData::Int(r) if *r == IntRange::FULL => "int".into(),
            TyData::Int(r) => format!("int:[{}..{}]", r.lo, r.hi),
            TyData::Long(r) if r.is_con() => format!("long:{}", r.lo),
            TyData::Long(r) if *r == LongRange::FULL => "long".into(),
            TyData::Long(r) => format!("long:[{}..{}]", r.lo, r.hi),
            TyData::DoubleCon(bits) => {
                let v = f64::from_bits(*bits);
                if v.is_nan() {
                    format!("double:nan(0x{bits:x})")
                } else {
                    format!("double:{v}")
                }
            }
            TyData::Double => "double".into(),
            TyData::DoubleTop => "double!".into(),
            TyData::Null => "null".into(),
            TyData::Ref(r) => {
                let null = if r.may_null { "?" } else { "" };
                if r.len == IntRange::FULL {
                    format!("{}{null}", r.elem.name())
                } else {
                    format!("{}{null}:len[{}..{}]", r.elem.name(), r.len.lo, r.len.hi)
                }
            }
            TyData::Tuple(elems) => {
                let parts: Vec<String> = elems.iter().map(|&e| self.render(e)).collect();
                format!("({})", parts.join(", "))
            }
        }
    }
}
