//! Analysis Passes: six checks run in a fixed order over the
//! lowered MIR. Each pass accumulates into the same [`Errors`] sink
//! already threaded through resolution and lowering, rather than
//! returning a `Result` of its own — a program can fail several passes
//! at once and a caller wants all of them reported together, the same
//! discipline `resolve.rs` and `lower.rs` already follow.

pub mod borrow_check;
pub mod cfg;
pub mod reachability;
pub mod return_coverage;
pub mod scope_pairing;
pub mod type_completeness;
pub mod use_before_assign;

use crate::diag::Errors;
use crate::mir::Function;
use crate::types::TypeTable;

/// Runs the six passes in a fixed order. Later passes still
/// run even if an earlier one found errors (matching `Errors`'
/// accumulate-everything discipline); the caller decides, via
/// `errors.has_errors()`, whether to proceed to codegen.
pub fn run_all(types: &TypeTable, functions: &[Function], errors: &mut Errors) {
  type_completeness::check(types, functions, errors);
  reachability::check(functions, errors);
  return_coverage::check(types, functions, errors);
  scope_pairing::check(functions, errors);
  use_before_assign::check(functions, errors);
  borrow_check::check(functions, errors);
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::diag::SourceRef;
  use crate::mir::{OpExtra, Operation};
  use crate::types::PrimitiveKind;
  use smallvec::smallvec;
  use std::rc::Rc;

  fn sref() -> SourceRef { SourceRef::new(Rc::from("t.j"), 1, 0, 0) }

  #[test]
  fn empty_void_function_passes_every_check() {
    let mut types = TypeTable::new();
    types.seed_primitives(&sref());
    let void = types.primitive(PrimitiveKind::Void);
    let mut f = Function::new("main".into(), void, vec![], false, sref());
    f.push_op(f.entry(), Operation { opcode: crate::mir::Opcode::ReturnVoid, operands: smallvec![], result: None, result_ty: None, extra: OpExtra::None, source_ref: sref() });
    let mut errors = Errors::new();
    run_all(&types, &[f], &mut errors);
    assert!(!errors.has_errors());
  }
}
