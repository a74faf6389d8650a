//! Pass 2, Reachability: every non-empty block must be reachable
//! from `BB0`, and no operation may follow a block's terminator. Both are
//! lowering self-checks (a correct lowerer never produces either), kept
//! here rather than as `debug_assert!`s so a lowering bug surfaces as a
//! diagnostic instead of a panic.

use crate::diag::{ErrorClass, Errors};
use crate::mir::{Function, Opcode};

use super::cfg;

pub fn check(functions: &[Function], errors: &mut Errors) {
  for f in functions {
    let seen = cfg::reachable(f);
    for block_id in f.block_ids() {
      let block = &f.blocks[&block_id];
      if !block.operations.is_empty() && !cfg::is_reachable(&seen, block_id) {
        let first = &block.operations[0];
        errors.add_simple_error(ErrorClass::Analysis, first.source_ref.clone(), "unreachable block", format!("block BB{} of '{}' is never reached from the entry block", block_id.0, f.name));
      }
      for (i, op) in block.operations.iter().enumerate() {
        let is_last = i + 1 == block.operations.len();
        if op.opcode.is_terminator() && !is_last {
          errors.add_simple_error(ErrorClass::Analysis, op.source_ref.clone(), "operation after terminator", format!("block BB{} of '{}' has an operation following its terminator", block_id.0, f.name));
        }
        if is_last && !op.opcode.is_terminator() && matches!(op.opcode, Opcode::Jump | Opcode::JumpConditional | Opcode::Return | Opcode::ReturnVoid) {
          unreachable!("is_terminator must agree with this opcode set");
        }
      }
    }
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::diag::SourceRef;
  use crate::mir::{OpExtra, Operation};
  use crate::symbol::intern;
  use crate::types::{PrimitiveKind, TypeTable};
  use smallvec::smallvec;
  use std::rc::Rc;

  fn sref() -> SourceRef { SourceRef::new(Rc::from("t.j"), 1, 0, 0) }

  #[test]
  fn unreached_nonempty_block_is_an_error() {
    let mut types = TypeTable::new();
    types.seed_primitives(&sref());
    let void = types.primitive(PrimitiveKind::Void);
    let mut f = Function::new("f".into(), void, vec![], false, sref());
    f.push_op(f.entry(), Operation { opcode: Opcode::ReturnVoid, operands: smallvec![], result: None, result_ty: None, extra: OpExtra::None, source_ref: sref() });
    let orphan = f.new_block();
    f.push_op(orphan, Operation { opcode: Opcode::LocalDeclare, operands: smallvec![], result: Some(crate::mir::TmpId(99)), result_ty: Some(void), extra: OpExtra::NameType(intern("x"), void), source_ref: sref() });
    let mut errors = Errors::new();
    check(&[f], &mut errors);
    assert!(errors.has_errors());
  }

  #[test]
  fn fully_reached_function_has_no_errors() {
    let mut types = TypeTable::new();
    types.seed_primitives(&sref());
    let void = types.primitive(PrimitiveKind::Void);
    let mut f = Function::new("f".into(), void, vec![], false, sref());
    f.push_op(f.entry(), Operation { opcode: Opcode::ReturnVoid, operands: smallvec![], result: None, result_ty: None, extra: OpExtra::None, source_ref: sref() });
    let mut errors = Errors::new();
    check(&[f], &mut errors);
    assert!(!errors.has_errors());
  }
}
