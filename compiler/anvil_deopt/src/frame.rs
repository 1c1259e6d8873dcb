//! Frame descriptors and interpreter frame rebuilding.

use anvil_bc::{MethodId, Value};

#[cfg(test)]
mod tests;

/// Shape of the interpreter state captured at a trap site.
///
/// Inlined methods chain through `caller`: the descriptor names the
/// *innermost* frame and `caller` walks outward. The flattened value list a
/// trap records is ordered outermost caller first, each frame contributing
/// its locals then its operand stack.
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
pub struct FrameDesc {
    pub mid: MethodId,
    /// Bci the interpreter resumes at (the trapping instruction itself, so
    /// it re-executes and raises the real runtime error if warranted).
    pub bci: u32,
    pub n_locals: u16,
    pub n_stack: u16,
    pub caller: Option<Box<FrameDesc>>,
}

impl FrameDesc {
    /// Slots this frame alone contributes to the flattened value list.
    #[inline]
    pub fn own_slots(&self) -> usize {
        self.n_locals as usize + self.n_stack as usize
    }

    /// Total slots over the whole caller chain.
    pub fn total_slots(&self) -> usize {
        let mut n = 0;
        let mut cur = Some(self);
        while let Some(d) = cur {
            n += d.own_slots();
            cur = d.caller.as_deref();
        }
        n
    }

    /// Depth of the inline chain (1 for a non-inlined frame).
    pub fn depth(&self) -> usize {
        let mut n = 0;
        let mut cur = Some(self);
        while let Some(d) = cur {
            n += 1;
            cur = d.caller.as_deref();
        }
        n
    }

    /// Chain from outermost caller to innermost frame.
    fn chain_outermost_first(&self) -> Vec<&FrameDesc> {
        let mut chain = Vec::new();
        let mut cur = Some(self);
        while let Some(d) = cur {
            chain.push(d);
            cur = d.caller.as_deref();
        }
        chain.reverse();
        chain
    }
}

/// One materialized interpreter frame.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InterpFrameImage {
    pub mid: MethodId,
    pub bci: u32,
    pub locals: Vec<Value>,
    pub stack: Vec<Value>,
}

/// Turns a frame descriptor plus captured slot values back into
/// interpreter frames.
pub struct FrameRebuilder;

impl FrameRebuilder {
    /// Rebuild interpreter frames from a trap's captured values.
    ///
    /// `values` is the flattened state in descriptor order (outermost
    /// caller first, locals then stack per frame). Frames come back
    /// outermost first, ready to push onto the interpreter stack in order;
    /// the innermost frame resumes first.
    ///
    /// Returns `None` when `values` does not match the descriptor's shape
    /// (an artifact/record mismatch, which callers treat as a corrupt
    /// artifact).
    pub fn rebuild(desc: &FrameDesc, values: &[Value]) -> Option<Vec<InterpFrameImage>> {
        if values.len() != desc.total_slots() {
            return None;
        }
        let mut frames = Vec::with_capacity(desc.depth());
        let mut at = 0;
        for d in desc.chain_outermost_first() {
            let locals = values[at..at + d.n_locals as usize].to_vec();
            at += d.n_locals as usize;
            let stack = values[at..at + d.n_stack as usize].to_vec();
            at += d.n_stack as usize;
            frames.push(InterpFrameImage {
                mid: d.mid,
                bci: d.bci,
                locals,
                stack,
            });
        }
        Some(frames)
    }
}
