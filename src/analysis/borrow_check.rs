//! Pass 6, Borrow Checker: a Polonius-style check over MIR, not source.
//! Tracks loans (`addressof` results), each loan's *origin* (the declared
//! variable it ultimately points into), and rejects two loans with the
//! same origin whose live ranges overlap.
//!
//! `ast.rs`'s `ReferenceTo`/`AddressOf` carry no mutable/const flag, so
//! there is no way to tell an exclusive borrow from a shared one at the
//! MIR level this lowerer produces. Every loan is therefore treated as
//! exclusive for overlap purposes — any two loans sharing an origin and
//! overlapping in liveness are a conflict. "Mutation through an expired
//! loan" and "use after move" are not checked: the MIR has no move opcode
//! and no mutability tag to hang either check on, so implementing them
//! would mean inventing MIR shape this lowerer doesn't produce. A loan's
//! liveness is approximated by the scope of the variable that holds it
//! (from the `addressof` to the `local_undeclare` of whichever declared
//! variable the loan is assigned into, or to the loan's own creation point
//! if it is never stored) — this is coarser than true last-use liveness,
//! but it catches back-to-back redeclaration over the same storage
//! without needing real use-site tracking.

use hashbrown::HashMap;

use crate::diag::{Error, ErrorClass, Errors};
use crate::mir::{BlockId, Function, Opcode, TmpId};

/// Follows `func.defs` backward from a place-producing tmp to the
/// ultimate declared-variable tmp it reads from. `local_variable`'s own
/// operand already *is* that declared tmp; `dot`/`array_index`/
/// `dereference` each recurse through their object operand.
pub(super) fn trace_origin(func: &Function, tmp: TmpId) -> Option<TmpId> {
  let point = func.defs.get(&tmp)?;
  let op = &func.blocks[&point.block].operations[point.index];
  match op.opcode {
    Opcode::LocalDeclare => Some(tmp),
    Opcode::LocalVariable | Opcode::Dot | Opcode::ArrayIndex | Opcode::Dereference => {
      let inner = *op.operands.first()?;
      trace_origin(func, inner)
    }
    _ => None,
  }
}

struct Loan {
  origin: TmpId,
  created_at: usize,
  created_ref: crate::diag::SourceRef,
  ends_at: usize,
}

pub fn check(functions: &[Function], errors: &mut Errors) {
  for f in functions {
    let point_of = linearize(f);
    let total_points = point_of.len();

    let loans = collect_loans(f, &point_of, total_points);

    let mut by_origin: HashMap<TmpId, Vec<usize>> = HashMap::new();
    for (i, loan) in loans.iter().enumerate() {
      by_origin.entry(loan.origin).or_default().push(i);
    }

    for indices in by_origin.values() {
      for a in 0..indices.len() {
        for b in (a + 1)..indices.len() {
          let l1 = &loans[indices[a]];
          let l2 = &loans[indices[b]];
          let overlaps = l1.created_at <= l2.ends_at && l2.created_at <= l1.ends_at;
          if overlaps {
            let (earlier, later) = if l1.created_at <= l2.created_at { (l1, l2) } else { (l2, l1) };
            errors.add_error(
              Error::new(ErrorClass::Analysis, "conflicting borrows")
                .with_message(later.created_ref.clone(), "second exclusive borrow of the same storage while the first is still live")
                .with_message(earlier.created_ref.clone(), "first borrow is here"),
            );
          }
        }
      }
    }
  }
}

/// Assigns an ascending point to every operation, in `block_ids()` order.
/// This over-approximates true control-flow order for branches and loops
/// (a later block in id order is not necessarily later in execution), a
/// documented trade for keeping the liveness computation a single linear
/// pass instead of a full dataflow fixpoint.
fn linearize(f: &Function) -> HashMap<(BlockId, usize), usize> {
  let mut point_of = HashMap::new();
  let mut point = 0usize;
  for block_id in f.block_ids() {
    for idx in 0..f.blocks[&block_id].operations.len() {
      point_of.insert((block_id, idx), point);
      point += 1;
    }
  }
  point_of
}

fn collect_loans(f: &Function, point_of: &HashMap<(BlockId, usize), usize>, total_points: usize) -> Vec<Loan> {
  let mut loans = Vec::new();
  for block_id in f.block_ids() {
    for (idx, op) in f.blocks[&block_id].operations.iter().enumerate() {
      if op.opcode != Opcode::AddressOf {
        continue;
      }
      let Some(&loan_tmp) = op.result.as_ref() else { continue };
      let Some(&target) = op.operands.first() else { continue };
      let Some(origin) = trace_origin(f, target) else { continue };
      let created_at = point_of[&(block_id, idx)];

      let holder = find_holder(f, point_of, block_id, idx, loan_tmp);
      let ends_at = match holder {
        Some(holder_tmp) => find_undeclare_point(f, point_of, holder_tmp).unwrap_or(total_points),
        None => created_at,
      };

      loans.push(Loan { origin, created_at, created_ref: op.source_ref.clone(), ends_at });
    }
  }
  loans
}

/// A loan is "stored" when the next few operations assign it into a
/// declared variable (`u32& a = &x;` lowers to `local_declare a` then
/// `addressof x` then `assign a, <loan>`). Only looks within the same
/// block as the `addressof`, matching how `lower.rs` emits a var-decl
/// initializer as consecutive operations in one block.
fn find_holder(f: &Function, _point_of: &HashMap<(BlockId, usize), usize>, block_id: BlockId, from_idx: usize, loan_tmp: TmpId) -> Option<TmpId> {
  let ops = &f.blocks[&block_id].operations;
  for op in ops.iter().skip(from_idx + 1) {
    if op.opcode == Opcode::Assign && op.operands.get(1) == Some(&loan_tmp) {
      return op.operands.first().copied();
    }
  }
  None
}

fn find_undeclare_point(f: &Function, point_of: &HashMap<(BlockId, usize), usize>, holder_tmp: TmpId) -> Option<usize> {
  for block_id in f.block_ids() {
    for (idx, op) in f.blocks[&block_id].operations.iter().enumerate() {
      if op.opcode == Opcode::LocalUndeclare && op.operands.first() == Some(&holder_tmp) {
        return point_of.get(&(block_id, idx)).copied();
      }
    }
  }
  None
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

  /// `u32 x; u32& a = &x; u32& b = &x; *a = 1; *b = 2;` — two exclusive
  /// loans on `x` alive at once.
  #[test]
  fn two_overlapping_loans_on_the_same_storage_is_an_error() {
    let mut types = TypeTable::new();
    types.seed_primitives(&sref());
    let u32t = types.primitive(PrimitiveKind::U32);
    let void = types.primitive(PrimitiveKind::Void);
    let ref_ty = types.get_reference_to(u32t, sref());
    let mut f = Function::new("f".into(), void, vec![], false, sref());
    let b0 = f.entry();

    let x = f.new_temp(u32t, true);
    f.push_op(b0, Operation { opcode: Opcode::LocalDeclare, operands: smallvec![], result: Some(x), result_ty: Some(u32t), extra: OpExtra::NameType(intern("x"), u32t), source_ref: sref() });

    let a = f.new_temp(ref_ty, true);
    f.push_op(b0, Operation { opcode: Opcode::LocalDeclare, operands: smallvec![], result: Some(a), result_ty: Some(ref_ty), extra: OpExtra::NameType(intern("a"), ref_ty), source_ref: sref() });
    let loan_a = f.new_temp(ref_ty, true);
    f.push_op(b0, Operation { opcode: Opcode::AddressOf, operands: smallvec![x], result: Some(loan_a), result_ty: Some(ref_ty), extra: OpExtra::None, source_ref: sref() });
    let assign_a = f.new_temp(ref_ty, false);
    f.push_op(b0, Operation { opcode: Opcode::Assign, operands: smallvec![a, loan_a], result: Some(assign_a), result_ty: Some(ref_ty), extra: OpExtra::None, source_ref: sref() });

    let b = f.new_temp(ref_ty, true);
    f.push_op(b0, Operation { opcode: Opcode::LocalDeclare, operands: smallvec![], result: Some(b), result_ty: Some(ref_ty), extra: OpExtra::NameType(intern("b"), ref_ty), source_ref: sref() });
    let loan_b = f.new_temp(ref_ty, true);
    f.push_op(b0, Operation { opcode: Opcode::AddressOf, operands: smallvec![x], result: Some(loan_b), result_ty: Some(ref_ty), extra: OpExtra::None, source_ref: sref() });
    let assign_b = f.new_temp(ref_ty, false);
    f.push_op(b0, Operation { opcode: Opcode::Assign, operands: smallvec![b, loan_b], result: Some(assign_b), result_ty: Some(ref_ty), extra: OpExtra::None, source_ref: sref() });

    f.push_op(b0, Operation { opcode: Opcode::LocalUndeclare, operands: smallvec![b], result: None, result_ty: None, extra: OpExtra::None, source_ref: sref() });
    f.push_op(b0, Operation { opcode: Opcode::LocalUndeclare, operands: smallvec![a], result: None, result_ty: None, extra: OpExtra::None, source_ref: sref() });
    f.push_op(b0, Operation { opcode: Opcode::LocalUndeclare, operands: smallvec![x], result: None, result_ty: None, extra: OpExtra::None, source_ref: sref() });
    f.push_op(b0, Operation { opcode: Opcode::ReturnVoid, operands: smallvec![], result: None, result_ty: None, extra: OpExtra::None, source_ref: sref() });

    let mut errors = Errors::new();
    check(&[f], &mut errors);
    assert!(errors.has_errors());
  }

  /// `u32 x; { u32& a = &x; *a = 1; } { u32& b = &x; *b = 2; }` —
  /// sequential, non-overlapping loans are fine.
  #[test]
  fn sequential_non_overlapping_loans_are_fine() {
    let mut types = TypeTable::new();
    types.seed_primitives(&sref());
    let u32t = types.primitive(PrimitiveKind::U32);
    let void = types.primitive(PrimitiveKind::Void);
    let ref_ty = types.get_reference_to(u32t, sref());
    let mut f = Function::new("f".into(), void, vec![], false, sref());
    let b0 = f.entry();

    let x = f.new_temp(u32t, true);
    f.push_op(b0, Operation { opcode: Opcode::LocalDeclare, operands: smallvec![], result: Some(x), result_ty: Some(u32t), extra: OpExtra::NameType(intern("x"), u32t), source_ref: sref() });

    let a = f.new_temp(ref_ty, true);
    f.push_op(b0, Operation { opcode: Opcode::LocalDeclare, operands: smallvec![], result: Some(a), result_ty: Some(ref_ty), extra: OpExtra::NameType(intern("a"), ref_ty), source_ref: sref() });
    let loan_a = f.new_temp(ref_ty, true);
    f.push_op(b0, Operation { opcode: Opcode::AddressOf, operands: smallvec![x], result: Some(loan_a), result_ty: Some(ref_ty), extra: OpExtra::None, source_ref: sref() });
    let assign_a = f.new_temp(ref_ty, false);
    f.push_op(b0, Operation { opcode: Opcode::Assign, operands: smallvec![a, loan_a], result: Some(assign_a), result_ty: Some(ref_ty), extra: OpExtra::None, source_ref: sref() });
    f.push_op(b0, Operation { opcode: Opcode::LocalUndeclare, operands: smallvec![a], result: None, result_ty: None, extra: OpExtra::None, source_ref: sref() });

    let b = f.new_temp(ref_ty, true);
    f.push_op(b0, Operation { opcode: Opcode::LocalDeclare, operands: smallvec![], result: Some(b), result_ty: Some(ref_ty), extra: OpExtra::NameType(intern("b"), ref_ty), source_ref: sref() });
    let loan_b = f.new_temp(ref_ty, true);
    f.push_op(b0, Operation { opcode: Opcode::AddressOf, operands: smallvec![x], result: Some(loan_b), result_ty: Some(ref_ty), extra: OpExtra::None, source_ref: sref() });
    let assign_b = f.new_temp(ref_ty, false);
    f.push_op(b0, Operation { opcode: Opcode::Assign, operands: smallvec![b, loan_b], result: Some(assign_b), result_ty: Some(ref_ty), extra: OpExtra::None, source_ref: sref() });
    f.push_op(b0, Operation { opcode: Opcode::LocalUndeclare, operands: smallvec![b], result: None, result_ty: None, extra: OpExtra::None, source_ref: sref() });

    f.push_op(b0, Operation { opcode: Opcode::LocalUndeclare, operands: smallvec![x], result: None, result_ty: None, extra: OpExtra::None, source_ref: sref() });
    f.push_op(b0, Operation { opcode: Opcode::ReturnVoid, operands: smallvec![], result: None, result_ty: None, extra: OpExtra::None, source_ref: sref() });

    let mut errors = Errors::new();
    check(&[f], &mut errors);
    assert!(!errors.has_errors());
  }
}
