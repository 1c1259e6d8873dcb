use pretty_assertions::assert_eq;
use proptest::prelude::*;

use anvil_bc::ArrayKind;

use super::{IntRange, TyData, TyId, TyPool, WIDEN_MAX};

#[test]
fn singletons_are_pre_interned() {
    let mut pool = TyPool::new();
    assert_eq!(pool.int(i32::MIN, i32::MAX), TyId::INT);
    assert_eq!(pool.int(0, 1), TyId::INT_BOOL);
    assert_eq!(pool.int(-1, 1), TyId::INT_CC);
    assert_eq!(pool.long(i64::MIN, i64::MAX), TyId::LONG);
    assert_eq!(pool.intern(TyData::Null), TyId::NULL);
}

#[test]
fn constants_are_singletons() {
    let mut pool = TyPool::new();
    let a = pool.int_con(42);
    let b = pool.int_con(42);
    assert_eq!(a, b);
    assert!(pool.is_con(a));
    assert_eq!(pool.as_int_con(a), Some(42));
}

#[test]
fn double_constants_compare_by_bits() {
    let mut pool = TyPool::new();
    let pz = pool.double_con(0.0);
    let nz = pool.double_con(-0.0);
    assert_ne!(pz, nz, "0.0 and -0.0 are distinct constants");

    let nan1 = pool.double_con_bits(0x7ff8_0000_0000_0001);
    let nan2 = pool.double_con_bits(0x7ff8_0000_0000_0001);
    let nan3 = pool.double_con_bits(0x7ff8_0000_0000_0002);
    assert_eq!(nan1, nan2, "same NaN payload is the same constant");
    assert_ne!(nan1, nan3);
}

#[test]
fn meet_of_ranges_is_union() {
    let mut pool = TyPool::new();
    let a = pool.int(0, 10);
    let b = pool.int(5, 20);
    let m = pool.meet(a, b);
    assert_eq!(pool.int_range(m).unwrap().lo, 0);
    assert_eq!(pool.int_range(m).unwrap().hi, 20);
}

#[test]
fn join_of_ranges_is_intersection() {
    let mut pool = TyPool::new();
    let a = pool.int(0, 10);
    let b = pool.int(5, 20);
    let j = pool.join(a, b);
    assert_eq!(pool.int_range(j).unwrap().lo, 5);
    assert_eq!(pool.int_range(j).unwrap().hi, 10);

    let c = pool.int(100, 200);
    assert_eq!(pool.join(a, c), TyId::TOP, "disjoint ranges join to top");
}

#[test]
fn null_meets_ref_as_nullable() {
    let mut pool = TyPool::new();
    let arr = pool.array_ref(ArrayKind::I32, IntRange { lo: 0, hi: 10, widen: 0 }, false);
    let m = pool.meet(TyId::NULL, arr);
    let r = pool.ref_data(m).unwrap();
    assert!(r.may_null);
    assert_eq!(r.elem, ArrayKind::I32);
}

#[test]
fn refs_of_different_elem_kinds_meet_to_bot() {
    let mut pool = TyPool::new();
    let a = pool.array_ref(ArrayKind::I32, IntRange::FULL, false);
    let b = pool.array_ref(ArrayKind::F64, IntRange::FULL, false);
    assert_eq!(pool.meet(a, b), TyId::BOT);
}

#[test]
fn widen_ascends_then_saturates() {
    let mut pool = TyPool::new();
    let mut cur = pool.int(0, 0);
    // Simulate a loop phi whose range keeps growing by one.
    for hi in 1..100 {
        let fresh = pool.int(0, hi);
        cur = pool.widen(fresh, cur);
        if pool.int_range(cur).unwrap().hi == i32::MAX {
            break;
        }
    }
    let r = pool.int_range(cur).unwrap();
    assert_eq!(r.hi, i32::MAX, "bounded ascent must saturate");
    assert_eq!(r.lo, 0, "the stable bound is kept");
    assert!(r.widen >= WIDEN_MAX);
}

#[test]
fn ctrl_lattice() {
    let mut pool = TyPool::new();
    assert_eq!(pool.meet(TyId::CTRL_TOP, TyId::CTRL), TyId::CTRL);
    assert_eq!(pool.join(TyId::CTRL_TOP, TyId::CTRL), TyId::CTRL_TOP);
}

fn arb_ty() -> impl Strategy<Value = fn(&mut TyPool) -> TyId> {
    // A small menagerie of types exercising every base.
    prop_oneof![
        Just((|_p: &mut TyPool| TyId::TOP) as fn(&mut TyPool) -> TyId),
        Just((|_p: &mut TyPool| TyId::BOT) as fn(&mut TyPool) -> TyId),
        Just((|_p: &mut TyPool| TyId::CTRL) as fn(&mut TyPool) -> TyId),
        Just((|_p: &mut TyPool| TyId::CTRL_TOP) as fn(&mut TyPool) -> TyId),
        Just((|p: &mut TyPool| p.int(0, 10)) as fn(&mut TyPool) -> TyId),
        Just((|p: &mut TyPool| p.int(-5, 5)) as fn(&mut TyPool) -> TyId),
        Just((|p: &mut TyPool| p.int_con(7)) as fn(&mut TyPool) -> TyId),
        Just((|p: &mut TyPool| p.long(-1, 100)) as fn(&mut TyPool) -> TyId),
        Just((|p: &mut TyPool| p.long_con(3)) as fn(&mut TyPool) -> TyId),
        Just((|p: &mut TyPool| p.double_con(1.5)) as fn(&mut TyPool) -> TyId),
        Just((|p: &mut TyPool| p.double_con(f64::NAN)) as fn(&mut TyPool) -> TyId),
        Just((|_p: &mut TyPool| TyId::DOUBLE) as fn(&mut TyPool) -> TyId),
        Just((|_p: &mut TyPool| TyId::NULL) as fn(&mut TyPool) -> TyId),
        Just(
            (|p: &mut TyPool| p.array_ref(
                ArrayKind::I32,
                IntRange { lo: 0, hi: 100, widen: 0 },
                false
            )) as fn(&mut TyPool) -> TyId
        ),
        Just(
            (|p: &mut TyPool| p.array_ref(ArrayKind::F64, IntRange::FULL, true))
                as fn(&mut TyPool) -> TyId
        ),
    ]
}

proptest! {
    #[test]
    fn meet_is_commutative(a in arb_ty(), b in arb_ty()) {
        let mut pool = TyPool::new();
        let (a, b) = (a(&mut pool), b(&mut pool));
        prop_assert_eq!(pool.meet(a, b), pool.meet(b, a));
    }

    #[test]
    fn meet_is_idempotent(a in arb_ty()) {
        let mut pool = TyPool::new();
        let a = a(&mut pool);
        prop_assert_eq!(pool.meet(a, a), a);
    }

    #[test]
    fn meet_is_associative(a in arb_ty(), b in arb_ty(), c in arb_ty()) {
        let mut pool = TyPool::new();
        let (a, b, c) = (a(&mut pool), b(&mut pool), c(&mut pool));
        let ab = pool.meet(a, b);
        let ab_c = pool.meet(ab, c);
        let bc = pool.meet(b, c);
        let a_bc = pool.meet(a, bc);
        prop_assert_eq!(ab_c, a_bc);
    }

    #[test]
    fn top_is_meet_identity(a in arb_ty()) {
        let mut pool = TyPool::new();
        let a = a(&mut pool);
        prop_assert_eq!(pool.meet(TyId::TOP, a), a);
    }

    #[test]
    fn bot_absorbs(a in arb_ty()) {
        let mut pool = TyPool::new();
        let a = a(&mut pool);
        prop_assert_eq!(pool.meet(TyId::BOT, a), TyId::BOT);
    }

    #[test]
    fn meet_is_lower_bound(a in arb_ty(), b in arb_ty()) {
        let mut pool = TyPool::new();
        let (a, b) = (a(&mut pool), b(&mut pool));
        let m = pool.meet(a, b);
        // meet(a, b) is at or below both operands.
        prop_assert!(pool.higher_equal(a, m));
        prop_assert!(pool.higher_equal(b, m));
    }

    #[test]
    fn join_is_upper_bound(a in arb_ty(), b in arb_ty()) {
        let mut pool = TyPool::new();
        let (a, b) = (a(&mut pool), b(&mut pool));
        let j = pool.join(a, b);
        prop_assert!(pool.higher_equal(j, a));
        prop_assert!(pool.higher_equal(j, b));
    }
}
