//! Pass 3, Return Coverage: a function whose return type is not
//! `void` must have every reachable path end in a `return`, never fall off
//! the end via `return_void` or a missing terminator.
//!
//! Reachability (pass 2) has already flagged blocks unreachable from
//! `BB0`; this pass only looks at the reachable ones, so an unreachable
//! dead end past an infinite loop doesn't also trigger a return-coverage
//! complaint on top of its pass-2 complaint.

use crate::diag::{ErrorClass, Errors};
use crate::mir::{Function, Opcode};
use crate::types::TypeTable;

use super::cfg;

pub fn check(types: &TypeTable, functions: &[Function], errors: &mut Errors) {
  for f in functions {
    if types.is_void(f.return_type) {
      continue;
    }
    let seen = cfg::reachable(f);
    for block_id in f.block_ids() {
      if !cfg::is_reachable(&seen, block_id) {
        continue;
      }
      let block = &f.blocks[&block_id];
      match block.terminator() {
        Some(op) if op.opcode == Opcode::Return => {}
        Some(op) if op.opcode == Opcode::ReturnVoid => {
          errors.add_simple_error(ErrorClass::Analysis, op.source_ref.clone(), "missing return value", format!("'{}' returns a value but this path returns none", f.name));
        }
        Some(_) => {} // jump/jump_conditional: value-bearing return happens further along
        None => {
          errors.add_simple_error(ErrorClass::Analysis, f.source_ref.clone(), "missing return", format!("block BB{} of '{}' falls off the end without returning a value", block_id.0, f.name));
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
  use crate::types::PrimitiveKind;
  use smallvec::smallvec;
  use std::rc::Rc;

  fn sref() -> SourceRef { SourceRef::new(Rc::from("t.j"), 1, 0, 0) }

  #[test]
  fn return_void_in_value_returning_function_is_an_error() {
    let mut types = TypeTable::new();
    types.seed_primitives(&sref());
    let u32t = types.primitive(PrimitiveKind::U32);
    let mut f = Function::new("f".into(), u32t, vec![], false, sref());
    f.push_op(f.entry(), Operation { opcode: Opcode::ReturnVoid, operands: smallvec![], result: None, result_ty: None, extra: OpExtra::None, source_ref: sref() });
    let mut errors = Errors::new();
    check(&types, &[f], &mut errors);
    assert!(errors.has_errors());
  }

  #[test]
  fn return_with_value_is_fine() {
    let mut types = TypeTable::new();
    types.seed_primitives(&sref());
    let u32t = types.primitive(PrimitiveKind::U32);
    let mut f = Function::new("f".into(), u32t, vec![], false, sref());
    let tmp = f.new_temp(u32t, false);
    f.push_op(f.entry(), Operation { opcode: Opcode::LiteralInt, operands: smallvec![], result: Some(tmp), result_ty: Some(u32t), extra: OpExtra::IntLiteral(0), source_ref: sref() });
    f.push_op(f.entry(), Operation { opcode: Opcode::Return, operands: smallvec![tmp], result: None, result_ty: None, extra: OpExtra::None, source_ref: sref() });
    let mut errors = Errors::new();
    check(&types, &[f], &mut errors);
    assert!(!errors.has_errors());
  }

  #[test]
  fn void_function_is_exempt() {
    let mut types = TypeTable::new();
    types.seed_primitives(&sref());
    let void = types.primitive(PrimitiveKind::Void);
    let mut f = Function::new("f".into(), void, vec![], false, sref());
    f.push_op(f.entry(), Operation { opcode: Opcode::ReturnVoid, operands: smallvec![], result: None, result_ty: None, extra: OpExtra::None, source_ref: sref() });
    let mut errors = Errors::new();
    check(&types, &[f], &mut errors);
    assert!(!errors.has_errors());
  }
}
