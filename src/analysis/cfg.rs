//! Shared control-flow helpers the analysis passes build on: a block's
//! successor set (from its terminator) and the set of blocks reachable
//! from `BB0`.
//!
//! Not one of the six named passes itself — a utility the passes in this
//! module share rather than each re-deriving successors by hand.

use bit_vec::BitVec;
use smallvec::SmallVec;

use crate::mir::{BlockId, Function, OpExtra, Operation};

/// The blocks `op` (assumed to be a block's terminator) may transfer
/// control to. Empty for `return`/`return_void`.
#[must_use] pub fn successors(op: &Operation) -> SmallVec<[BlockId; 2]> {
  match &op.extra {
    OpExtra::Jump(target) => SmallVec::from_slice(&[*target]),
    OpExtra::Branch(then_bb, else_bb) => SmallVec::from_slice(&[*then_bb, *else_bb]),
    _ => SmallVec::new(),
  }
}

/// Blocks reachable from the entry block, tracing `jump`/`jump_conditional`
/// targets. Bit `i` is set iff the block with that dense id is
/// reachable.
#[must_use] pub fn reachable(func: &Function) -> BitVec {
  let block_ids = func.block_ids();
  let max_id = block_ids.iter().map(|b| b.0).max().map_or(0, |m| m + 1);
  let mut seen = BitVec::from_elem(max_id as usize, false);
  let mut worklist = vec![func.entry()];
  seen.set(func.entry().0 as usize, true);
  while let Some(b) = worklist.pop() {
    let Some(block) = func.blocks.get(&b) else { continue };
    if let Some(term) = block.terminator() {
      for succ in successors(term) {
        if !seen.get(succ.0 as usize).unwrap_or(false) {
          seen.set(succ.0 as usize, true);
          worklist.push(succ);
        }
      }
    }
  }
  seen
}

#[must_use] pub fn is_reachable(seen: &BitVec, block: BlockId) -> bool {
  seen.get(block.0 as usize).unwrap_or(false)
}
