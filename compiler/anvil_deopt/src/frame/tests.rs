use pretty_assertions::assert_eq;

use anvil_bc::{MethodId, Value};

use crate::{FrameDesc, FrameRebuilder};

#[test]
fn rebuilds_single_frame() {
    let desc = FrameDesc {
        mid: MethodId(3),
        bci: 17,
        n_locals: 2,
        n_stack: 1,
        caller: None,
    };
    let values = [Value::I32(7), Value::Null, Value::I64(-1)];
    let frames = FrameRebuilder::rebuild(&desc, &values).unwrap();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].mid, MethodId(3));
    assert_eq!(frames[0].bci, 17);
    assert_eq!(frames[0].locals, vec![Value::I32(7), Value::Null]);
    assert_eq!(frames[0].stack, vec![Value::I64(-1)]);
}

#[test]
fn rebuilds_inlined_chain_outermost_first() {
    // main (caller) inlined callee `inner`; trap fires inside inner.
    let desc = FrameDesc {
        mid: MethodId(1), // inner
        bci: 2,
        n_locals: 1,
        n_stack: 0,
        caller: Some(Box::new(FrameDesc {
            mid: MethodId(0), // main
            bci: 9,
            n_locals: 2,
            n_stack: 1,
            caller: None,
        })),
    };
    assert_eq!(desc.total_slots(), 4);
    assert_eq!(desc.depth(), 2);

    // Flattened: main locals, main stack, then inner locals.
    let values = [
        Value::I32(10),
        Value::I32(20),
        Value::F64(1.5),
        Value::I32(99),
    ];
    let frames = FrameRebuilder::rebuild(&desc, &values).unwrap();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].mid, MethodId(0));
    assert_eq!(frames[0].stack, vec![Value::F64(1.5)]);
    assert_eq!(frames[1].mid, MethodId(1));
    assert_eq!(frames[1].locals, vec![Value::I32(99)]);
}

#[test]
fn shape_mismatch_is_rejected() {
    let desc = FrameDesc {
        mid: MethodId(0),
        bci: 0,
        n_locals: 1,
        n_stack: 1,
        caller: None,
    };
    assert!(FrameRebuilder::rebuild(&desc, &[Value::I32(1)]).is_none());
}
