//! Loop transformations over the sea-of-nodes graph.
//!
//! The driver discovers natural loops, recognizes counted ones, and runs
//! a small portfolio: a loop-limit-check predicate when the induction
//! variable could overflow, removal of empty loops, full unrolling of
//! short constant-trip loops, pre/main/post splitting with range-check
//! elimination, unrolling by two, and peeling of loops with invariant
//! tests. Each transform works on the top-test shape the bytecode
//! front end produces and leaves anything else alone.

mod body;
mod counted;
mod peel;
mod rce;
mod split;
mod tree;

pub use tree::{LoopInfo, LoopTree};

use anvil_ir::{BoolTest, Graph, NodeFlags, NodeId, NodeOp};
use anvil_opt::{IterGvn, OptError};
use rustc_hash::FxHashSet;
use tracing::{debug, trace};

use body::{merge_exits, LoopBody};
use counted::typed;
use tree::natural_loop;

/// Knobs for the loop optimizer.
#[derive(Clone, Copy, Debug)]
pub struct LoopOpts {
    /// Rounds of the whole portfolio; each round stops early when nothing
    /// changed.
    pub rounds: u32,
    /// Constant-trip loops up to this many iterations unroll completely.
    pub full_unroll_trip_limit: u64,
    /// Bodies up to this many nodes are eligible for unrolling by two.
    pub unroll_body_limit: usize,
    /// Hard cap on graph growth; transforms that would cross it are
    /// skipped.
    pub node_budget: usize,
}

impl Default for LoopOpts {
    fn default() -> LoopOpts {
        LoopOpts {
            rounds: 3,
            full_unroll_trip_limit: 8,
            unroll_body_limit: 40,
            node_budget: 50_000,
        }
    }
}

/// Run the loop portfolio to a fixed point (bounded by `opts.rounds`).
/// Returns whether anything changed.
pub fn optimize(g: &mut Graph, igvn: &mut IterGvn, opts: &LoopOpts) -> Result<bool, OptError> {
    let mut any = false;
    let mut peeled: FxHashSet<NodeId> = FxHashSet::default();
    let mut predicated: FxHashSet<(NodeId, i32)> = FxHashSet::default();
    for round in 0..opts.rounds {
        let mut progress = false;
        let tree = LoopTree::compute(g);
        if tree.loops.is_empty() {
            break;
        }
        trace!(round, loops = tree.loops.len(), "loop round");
        for idx in tree.innermost_first() {
            let head = tree.loops[idx].head;
            progress |= optimize_one(g, igvn, head, opts, &mut peeled, &mut predicated)?;
        }
        igvn.run(g)?;
        if !progress {
            break;
        }
        any = true;
    }
    if strip_opaque(g, igvn) {
        igvn.run(g)?;
    }
    Ok(any)
}

fn optimize_one(
    g: &mut Graph,
    igvn: &mut IterGvn,
    head: NodeId,
    opts: &LoopOpts,
    peeled: &mut FxHashSet<NodeId>,
    predicated: &mut FxHashSet<(NodeId, i32)>,
) -> Result<bool, OptError> {
    // Earlier transforms in this round may have reshaped or killed this
    // loop; requalify from the live graph.
    if g.is_dead(head) || !matches!(g.op(head), NodeOp::LoopHead(anvil_ir::LoopFlavor::Plain)) {
        return Ok(false);
    }
    let back = g.input(head, 1);
    if back.is_none() || g.is_dead(back) {
        return Ok(false);
    }
    let members = natural_loop(g, head, back);
    let body = LoopBody::collect(g, head, &members);
    if g.len() + 2 * body.size() >= opts.node_budget {
        return Ok(false);
    }

    let Some(c) = counted::recognize(g, head, &body) else {
        // Not counted: peel once if an invariant test sits in the body, so
        // later rounds can fold the in-loop copy against the peeled one.
        if has_invariant_test(g, &body) && merge_exits(g, &body).len() <= 1 && peeled.insert(head)
        {
            if peel::peel(g, igvn, head, &body) {
                igvn.run(g)?;
                return Ok(true);
            }
        }
        return Ok(false);
    };
    g.set_flag(head, NodeFlags::COUNTED);

    if let Some(bound) = counted::overflow_bound(g, &c) {
        // Predicate once; the cast it installs narrows the limit so the
        // next round sees a provably overflow-free loop.
        if predicated.insert((head, bound))
            && counted::insert_limit_predicate(g, igvn, &c, bound, c.stride > 0)
        {
            igvn.run(g)?;
            return Ok(true);
        }
        return Ok(false);
    }

    if let Some(trips) = counted::exact_trip_count(g, &c) {
        if trips == 0 {
            force_exit(g, igvn, &c);
            igvn.run(g)?;
            return Ok(true);
        }
        if try_remove_empty(g, igvn, &c, &body) {
            igvn.run(g)?;
            return Ok(true);
        }
        let work = body.size() as u64 * trips;
        if trips <= opts.full_unroll_trip_limit && work <= 2 * opts.unroll_body_limit as u64 {
            return full_unroll(g, igvn, head, opts);
        }
    }

    // Pre/main/post splitting, range-check elimination and unrolling, for
    // upward loops whose only merge exit is the counted one.
    if c.stride <= 0 || !matches!(c.test, BoolTest::Lt | BoolTest::Le) {
        return Ok(false);
    }
    if merge_exits(g, &body) != vec![c.exit_proj] {
        return Ok(false);
    }
    let checks = rce::find(g, &c, &body);
    let mut want_unroll = body.size() <= opts.unroll_body_limit && !has_call(g, &body);
    if want_unroll && !split::stride_room(g, c.limit, c.stride) {
        // The doubled exit test subtracts a stride from the limit; guard
        // the underflow with a lower predicate and retry next round.
        let bound = i32::MIN + c.stride;
        if predicated.insert((head, bound))
            && counted::insert_limit_predicate(g, igvn, &c, bound, false)
        {
            igvn.run(g)?;
            return Ok(true);
        }
        want_unroll = false;
    }
    if checks.is_empty() && !want_unroll {
        return Ok(false);
    }
    if g.len() + 3 * body.size() >= opts.node_budget {
        return Ok(false);
    }
    let split = split::insert_pre_post(g, igvn, &c, &body);
    let members = natural_loop(g, head, g.input(head, 1));
    let body = LoopBody::collect(g, head, &members);
    if let Some(c) = counted::recognize(g, head, &body) {
        if !checks.is_empty() {
            rce::apply(g, igvn, &c, &split, &checks);
        }
        if want_unroll {
            split::unroll(g, igvn, &c, &body);
        }
    }
    igvn.run(g)?;
    Ok(true)
}

/// Peel constant-trip loops down to nothing. Each peeled iteration folds
/// on its own (the seeds are constants); the loop's own test does not,
/// so once the remaining trip count hits zero the exit is forced.
fn full_unroll(g: &mut Graph, igvn: &mut IterGvn, head: NodeId, opts: &LoopOpts) -> Result<bool, OptError> {
    let mut changed = false;
    loop {
        if g.is_dead(head) {
            break;
        }
        let back = g.input(head, 1);
        if back.is_none() || g.is_dead(back) {
            break;
        }
        let members = natural_loop(g, head, back);
        let body = LoopBody::collect(g, head, &members);
        let Some(c) = counted::recognize(g, head, &body) else { break };
        let Some(trips) = counted::exact_trip_count(g, &c) else { break };
        if trips == 0 {
            force_exit(g, igvn, &c);
            igvn.run(g)?;
            changed = true;
            break;
        }
        if g.len() + body.size() >= opts.node_budget || !peel::peel(g, igvn, head, &body) {
            break;
        }
        changed = true;
        igvn.run(g)?;
    }
    if changed {
        debug!(head = ?head, "fully unrolled");
    }
    Ok(changed)
}

/// Pin the exit test so the loop body goes dead.
fn force_exit(g: &mut Graph, igvn: &mut IterGvn, c: &counted::Counted) {
    let continue_on_true = g.if_true(c.exit_if) == Some(c.continue_proj);
    let con = typed(g, NodeOp::ConI(i32::from(!continue_on_true)), &[]);
    g.set_input(c.exit_if, 1, con);
    igvn.push(c.exit_if);
    igvn.push(c.continue_proj);
    igvn.push(c.exit_proj);
}

/// A constant-trip loop with no effects and only the induction phi
/// reduces to its closed form.
fn try_remove_empty(
    g: &mut Graph,
    igvn: &mut IterGvn,
    c: &counted::Counted,
    body: &LoopBody,
) -> bool {
    if body.phis.len() != 1 || body.phis[0] != c.iv {
        return false;
    }
    for &n in &body.set {
        match g.op(n) {
            NodeOp::StoreArr(_)
            | NodeOp::StoreGlobal(_)
            | NodeOp::NewArr(_)
            | NodeOp::CallStatic { .. }
            | NodeOp::Raise(_)
            | NodeOp::Trap(_)
            | NodeOp::Return
            | NodeOp::MemPhi(_) => return false,
            _ => {}
        }
    }
    let Some(fin) = counted::final_iv(g, c) else {
        return false;
    };
    let con = typed(g, NodeOp::ConI(fin), &[]);
    for u in g.subsume(c.iv, con) {
        igvn.push(u);
    }
    force_exit(g, igvn, c);
    igvn.push(con);
    debug!(head = ?c.head, fin, "removed empty loop");
    true
}

fn has_invariant_test(g: &Graph, body: &LoopBody) -> bool {
    body.members.iter().any(|&m| {
        if !g.op(m).is_branch() {
            return false;
        }
        let cond = g.input(m, 1);
        cond.is_some() && !body.contains(cond) && !g.tys.is_con(g.ty(cond))
    })
}

fn has_call(g: &Graph, body: &LoopBody) -> bool {
    body.set
        .iter()
        .any(|&n| matches!(g.op(n), NodeOp::CallStatic { .. }))
}

/// Drop every `Opaque1` so later passes see the real limit expressions.
fn strip_opaque(g: &mut Graph, igvn: &mut IterGvn) -> bool {
    let opqs: Vec<NodeId> = g
        .live_ids()
        .filter(|&n| matches!(g.op(n), NodeOp::Opaque1))
        .collect();
    for n in &opqs {
        let inner = g.input(*n, 1);
        for u in g.subsume(*n, inner) {
            igvn.push(u);
        }
        igvn.push(inner);
    }
    !opqs.is_empty()
}
