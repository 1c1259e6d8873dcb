//! Plain-text graph dump for debugging and golden tests.

use std::fmt::Write as _;

use crate::graph::{Graph, NodeId};
use crate::node::NodeOp;

/// Renders a graph one node per line, in arena order:
/// `n7: AddI(n_, n3, n5) :: int[0..20]`.
pub struct GraphPrinter<'g> {
    graph: &'g Graph,
}

impl<'g> GraphPrinter<'g> {
    pub fn new(graph: &'g Graph) -> GraphPrinter<'g> {
        GraphPrinter { graph }
    }

    pub fn print(&self) -> String {
        let mut out = String::new();
        for id in self.graph.live_ids() {
            let _ = writeln!(out, "{}", self.line(id));
        }
        out
    }

    /// One node's rendering, without a trailing newline.
    pub fn line(&self, id: NodeId) -> String {
        let g = self.graph;
        let mut s = format!("{id}: {}", Self::op_label(g.op(id)));
        s.push('(');
        for (i, inp) in g.inputs(id).iter().enumerate() {
            if i > 0 {
                s.push_str(", ");
            }
            let _ = write!(s, "{inp}");
        }
        s.push(')');
        let _ = write!(s, " :: {}", g.tys.render(g.ty(id)));
        s
    }

    fn op_label(op: &NodeOp) -> String {
        match op {
            NodeOp::ConI(v) => format!("ConI #{v}"),
            NodeOp::ConL(v) => format!("ConL #{v}"),
            NodeOp::ConD(bits) => format!("ConD #{}", f64::from_bits(*bits)),
            NodeOp::Param(i) => format!("Param {i}"),
            NodeOp::Bool(t) => format!("Bool {}", t.name()),
            NodeOp::Trap(r) => format!("Trap {}", r.name()),
            NodeOp::Proj(i) => format!("Proj {i}"),
            NodeOp::CallStatic { mid, argc } => {
                format!("CallStatic m{} argc={argc}", mid.raw())
            }
            other => other.mnemonic().to_owned(),
        }
    }
}
