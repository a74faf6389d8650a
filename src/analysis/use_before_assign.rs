//! Pass 5, Use Before Assignment: a forward dataflow over each
//! function's CFG maintains the set of definitely-assigned variables.
//! `local_declare` makes its variable live-undefined; `local_variable`
//! reads it — live-undefined at that point is an error. `assign`'s
//! lvalue operand is not itself the declared tmp (lowering produces a
//! `local_variable`/`dot`/`array_index` result and assigns through
//! that), so it is traced back to the declared tmp the same way
//! `borrow_check::trace_origin` does before it is treated as a
//! definition. The `local_variable` op that only computes an
//! assignment's target address is excluded from the read set — it
//! never observes the variable's current value. Meet is intersection
//! over predecessors; the analysis iterates to a fixpoint, same as any
//! standard must-reach dataflow.

use bit_set::BitSet;
use hashbrown::{HashMap, HashSet};

use crate::diag::{ErrorClass, Errors};
use crate::mir::{BlockId, Function, Opcode, TmpId};

use super::borrow_check::trace_origin;
use super::cfg;

/// Dense index assigned to every `local_declare`'d tmp id in a function,
/// so the dataflow can use a `BitSet` instead of a `HashSet<TmpId>`.
struct Slots {
  index_of: HashMap<TmpId, usize>,
}

impl Slots {
  fn build(f: &Function) -> Self {
    let mut index_of = HashMap::new();
    for block in f.blocks.values() {
      for op in &block.operations {
        if op.opcode == Opcode::LocalDeclare {
          if let Some(result) = op.result {
            let next = index_of.len();
            index_of.insert(result, next);
          }
        }
      }
    }
    Self { index_of }
  }
}

/// `assign`'s lvalue operand defines rather than reads; every other
/// opcode that carries a declared tmp as an operand (chiefly
/// `local_variable`) reads it. The lvalue operand is the result of
/// whatever lowered the left-hand side (a `local_variable`, `dot`, or
/// `array_index` tmp), not the declared tmp itself, so it is traced
/// back through that chain first.
fn defined_slot(op: &crate::mir::Operation, slots: &Slots, func: &Function) -> Option<usize> {
  if op.opcode != Opcode::Assign {
    return None;
  }
  let lvalue = *op.operands.first()?;
  let declared = trace_origin(func, lvalue)?;
  slots.index_of.get(&declared).copied()
}

/// Every tmp id that is directly an `assign`'s lvalue operand: the
/// `local_variable`/`dot`/`array_index` op that produced it only
/// computes an address for the store, it does not read the variable's
/// current value, so it must not be counted as a use.
fn assign_lvalue_tmps(f: &Function) -> HashSet<TmpId> {
  let mut tmps = HashSet::new();
  for block in f.blocks.values() {
    for op in &block.operations {
      if op.opcode == Opcode::Assign {
        if let Some(&lvalue) = op.operands.first() {
          tmps.insert(lvalue);
        }
      }
    }
  }
  tmps
}

fn read_slot(op: &crate::mir::Operation, slots: &Slots, assign_targets: &HashSet<TmpId>) -> Option<usize> {
  if op.opcode != Opcode::LocalVariable {
    return None;
  }
  if let Some(result) = op.result {
    if assign_targets.contains(&result) {
      return None;
    }
  }
  let referenced = *op.operands.first()?;
  slots.index_of.get(&referenced).copied()
}

pub fn check(functions: &[Function], errors: &mut Errors) {
  for f in functions {
    let slots = Slots::build(f);
    if slots.index_of.is_empty() {
      continue;
    }
    let block_ids = f.block_ids();
    let full = BitSet::from_bit_vec(bit_vec::BitVec::from_elem(slots.index_of.len(), true));

    // entry[b]: definitely-assigned on entry to b, meet of all predecessors' exits.
    let mut entry: HashMap<BlockId, BitSet> = block_ids.iter().map(|&b| (b, if b == f.entry() { BitSet::new() } else { full.clone() })).collect();
    let mut exit: HashMap<BlockId, BitSet> = block_ids.iter().map(|&b| (b, BitSet::new())).collect();

    let preds = predecessors(f, &block_ids);
    let assign_targets = assign_lvalue_tmps(f);

    let mut changed = true;
    while changed {
      changed = false;
      for &b in &block_ids {
        let new_entry = if b == f.entry() {
          BitSet::new()
        } else {
          let mut acc: Option<BitSet> = None;
          for &p in preds.get(&b).into_iter().flatten() {
            let px = &exit[&p];
            acc = Some(match acc {
              None => px.clone(),
              Some(mut a) => { a.intersect_with(px); a }
            });
          }
          acc.unwrap_or_else(BitSet::new)
        };
        if new_entry != entry[&b] {
          entry.insert(b, new_entry.clone());
          changed = true;
        }

        let mut state = entry[&b].clone();
        let block = &f.blocks[&b];
        for op in &block.operations {
          if let Some(slot) = defined_slot(op, &slots, f) {
            state.insert(slot);
          }
        }
        if state != exit[&b] {
          exit.insert(b, state);
          changed = true;
        }
      }
    }

    // Second walk to report: replays each block's entry state in order and
    // flags reads of declared-but-not-yet-assigned variables.
    for &b in &block_ids {
      let mut state = entry[&b].clone();
      let block = &f.blocks[&b];
      for op in &block.operations {
        if let Some(slot) = read_slot(op, &slots, &assign_targets) {
          if !state.contains(slot) {
            errors.add_simple_error(ErrorClass::Analysis, op.source_ref.clone(), "use before assignment", format!("'{}' reads a variable before it is assigned a value", f.name));
          }
        }
        if let Some(slot) = defined_slot(op, &slots, f) {
          state.insert(slot);
        }
      }
    }
  }
}

fn predecessors(f: &Function, block_ids: &[BlockId]) -> HashMap<BlockId, Vec<BlockId>> {
  let mut preds: HashMap<BlockId, Vec<BlockId>> = HashMap::new();
  for &b in block_ids {
    if let Some(term) = f.blocks[&b].terminator() {
      for succ in cfg::successors(term) {
        preds.entry(succ).or_default().push(b);
      }
    }
  }
  preds
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
  fn reading_before_assign_is_an_error() {
    let mut types = TypeTable::new();
    types.seed_primitives(&sref());
    let u32t = types.primitive(PrimitiveKind::U32);
    let void = types.primitive(PrimitiveKind::Void);
    let mut f = Function::new("f".into(), void, vec![], false, sref());
    let x = f.new_temp(u32t, true);
    let read = f.new_temp(u32t, false);
    f.push_op(f.entry(), Operation { opcode: Opcode::LocalDeclare, operands: smallvec![], result: Some(x), result_ty: Some(u32t), extra: OpExtra::NameType(intern("x"), u32t), source_ref: sref() });
    f.push_op(f.entry(), Operation { opcode: Opcode::LocalVariable, operands: smallvec![x], result: Some(read), result_ty: Some(u32t), extra: OpExtra::Name(intern("x")), source_ref: sref() });
    f.push_op(f.entry(), Operation { opcode: Opcode::ReturnVoid, operands: smallvec![], result: None, result_ty: None, extra: OpExtra::None, source_ref: sref() });
    let mut errors = Errors::new();
    check(&[f], &mut errors);
    assert!(errors.has_errors());
  }

  #[test]
  fn assign_then_read_is_fine() {
    let mut types = TypeTable::new();
    types.seed_primitives(&sref());
    let u32t = types.primitive(PrimitiveKind::U32);
    let void = types.primitive(PrimitiveKind::Void);
    let mut f = Function::new("f".into(), void, vec![], false, sref());
    let x = f.new_temp(u32t, true);
    let lit = f.new_temp(u32t, false);
    let assigned = f.new_temp(u32t, false);
    f.push_op(f.entry(), Operation { opcode: Opcode::LocalDeclare, operands: smallvec![], result: Some(x), result_ty: Some(u32t), extra: OpExtra::NameType(intern("x"), u32t), source_ref: sref() });
    f.push_op(f.entry(), Operation { opcode: Opcode::LiteralInt, operands: smallvec![], result: Some(lit), result_ty: Some(u32t), extra: OpExtra::IntLiteral(1), source_ref: sref() });
    f.push_op(f.entry(), Operation { opcode: Opcode::Assign, operands: smallvec![x, lit], result: Some(assigned), result_ty: Some(u32t), extra: OpExtra::None, source_ref: sref() });
    let read = f.new_temp(u32t, false);
    f.push_op(f.entry(), Operation { opcode: Opcode::LocalVariable, operands: smallvec![x], result: Some(read), result_ty: Some(u32t), extra: OpExtra::Name(intern("x")), source_ref: sref() });
    f.push_op(f.entry(), Operation { opcode: Opcode::ReturnVoid, operands: smallvec![], result: None, result_ty: None, extra: OpExtra::None, source_ref: sref() });
    let mut errors = Errors::new();
    check(&[f], &mut errors);
    assert!(!errors.has_errors());
  }

  /// Mirrors the shape `lower.rs::lower_assign` actually emits: the
  /// lvalue operand of `assign` is a fresh `local_variable` result tmp,
  /// not the declared tmp itself, and that `local_variable` op must not
  /// be double-counted as a read of `x`.
  #[test]
  fn plain_assignment_through_local_variable_lvalue_is_not_use_before_assign() {
    let mut types = TypeTable::new();
    types.seed_primitives(&sref());
    let u32t = types.primitive(PrimitiveKind::U32);
    let void = types.primitive(PrimitiveKind::Void);
    let mut f = Function::new("f".into(), void, vec![], false, sref());
    let x = f.new_temp(u32t, true);
    let lv = f.new_temp(u32t, true);
    let lit = f.new_temp(u32t, false);
    let assigned = f.new_temp(u32t, false);
    f.push_op(f.entry(), Operation { opcode: Opcode::LocalDeclare, operands: smallvec![], result: Some(x), result_ty: Some(u32t), extra: OpExtra::NameType(intern("x"), u32t), source_ref: sref() });
    f.push_op(f.entry(), Operation { opcode: Opcode::LocalVariable, operands: smallvec![x], result: Some(lv), result_ty: Some(u32t), extra: OpExtra::Name(intern("x")), source_ref: sref() });
    f.push_op(f.entry(), Operation { opcode: Opcode::LiteralInt, operands: smallvec![], result: Some(lit), result_ty: Some(u32t), extra: OpExtra::IntLiteral(5), source_ref: sref() });
    f.push_op(f.entry(), Operation { opcode: Opcode::Assign, operands: smallvec![lv, lit], result: Some(assigned), result_ty: Some(u32t), extra: OpExtra::None, source_ref: sref() });
    f.push_op(f.entry(), Operation { opcode: Opcode::ReturnVoid, operands: smallvec![], result: None, result_ty: None, extra: OpExtra::None, source_ref: sref() });
    let mut errors = Errors::new();
    check(&[f], &mut errors);
    assert!(!errors.has_errors());
  }
}
