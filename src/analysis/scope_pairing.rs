//! Pass 4, Variable Scope Pairing: every `local_declare` must be
//! torn down by a matching `local_undeclare` on every path out of its
//! scope, and no path may reach a `return`/`return_void` with any local
//! still live. `lower.rs`'s goto-fixup step is supposed to emit
//! exactly the `local_undeclare`s this requires; this pass is the check
//! that it actually did.
//!
//! The live-set entering a block is the same on every path that reaches
//! it in well-formed structured code (scopes nest, they don't merge), so
//! this walks the CFG once from `BB0` and simply requires that if a block
//! is reached a second time, its live set agrees with the first.

use hashbrown::HashMap;

use crate::diag::{ErrorClass, Errors};
use crate::mir::{BlockId, Function, Opcode, TmpId};

use super::cfg;

type LiveSet = im::HashSet<TmpId>;

pub fn check(functions: &[Function], errors: &mut Errors) {
  for f in functions {
    let mut entry_state: HashMap<BlockId, LiveSet> = HashMap::new();
    let mut worklist = vec![(f.entry(), LiveSet::new())];
    while let Some((block_id, incoming)) = worklist.pop() {
      if let Some(existing) = entry_state.get(&block_id) {
        if *existing != incoming {
          errors.add_simple_error(
            ErrorClass::Analysis,
            f.source_ref.clone(),
            "inconsistent variable scope state",
            format!("block BB{} of '{}' is reached with a different set of live locals on different paths", block_id.0, f.name),
          );
        }
        continue;
      }
      entry_state.insert(block_id, incoming.clone());

      let block = &f.blocks[&block_id];
      let mut live = incoming;
      for op in &block.operations {
        match op.opcode {
          Opcode::LocalDeclare => {
            if let Some(result) = op.result {
              live.insert(result);
            }
          }
          Opcode::LocalUndeclare => {
            if let Some(&target) = op.operands.first() {
              if live.remove(&target).is_none() {
                errors.add_simple_error(ErrorClass::Analysis, op.source_ref.clone(), "scope teardown mismatch", format!("'{}' undeclares a variable that is not currently live", f.name));
              }
            }
          }
          Opcode::Return | Opcode::ReturnVoid if !live.is_empty() => {
            errors.add_simple_error(ErrorClass::Analysis, op.source_ref.clone(), "variable leaked past scope end", format!("'{}' returns with {} local(s) still live", f.name, live.len()));
          }
          _ => {}
        }
      }
      if let Some(term) = block.terminator() {
        for succ in cfg::successors(term) {
          worklist.push((succ, live.clone()));
        }
      }
    }
  }
}
