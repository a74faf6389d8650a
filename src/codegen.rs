//! Codegen interface: walks each function and, for
//! each operation in each basic block in block-id order, invokes a
//! backend with the opcode, operand tmp-ids, and types. The backend maps
//! tmp-ids to target registers/stack slots and emits the object file;
//! this crate does not implement one. Also provides the textual
//! `--output-mir` dump, which has no backend dependency at all.

use std::fmt::Write as _;

use crate::mir::{BlockId, Function, OpExtra, Opcode, Operation, TmpId};
use crate::types::TypeTable;

/// What a native backend must implement to receive lowered MIR. The core
/// never constructs object files itself; this trait is
/// the seam an embedder's backend plugs into.
pub trait Backend {
  fn begin_function(&mut self, func: &Function);
  /// Invoked once per operation, in block-id then in-block order — every
  /// tmp-id referenced by an opcode has already been produced by the time
  /// the backend sees it; the caller guarantees that ordering, not the
  /// backend.
  fn operation(&mut self, block: BlockId, op: &Operation, types: &TypeTable);
  fn end_function(&mut self, func: &Function);
}

/// Drives `backend` over every function's MIR in block-id order, then
/// in-block operation order.
pub fn emit(functions: &[Function], types: &TypeTable, backend: &mut dyn Backend) {
  for f in functions {
    backend.begin_function(f);
    for block_id in f.block_ids() {
      for op in &f.blocks[&block_id].operations {
        backend.operation(block_id, op, types);
      }
    }
    backend.end_function(f);
  }
}

/// `opcode`'s name as it appears in the operation catalog —
/// snake_case, matching the `--output-mir` dump and the Lowering-class
/// error messages that name an opcode.
#[must_use] pub fn opcode_name(opcode: Opcode) -> &'static str {
  match opcode {
    Opcode::Symbol => "symbol",
    Opcode::FunctionCall => "function_call",
    Opcode::GetMethod => "get_method",
    Opcode::MethodGetObject => "method_get_object",
    Opcode::MethodGetFunction => "method_get_function",
    Opcode::LiteralChar => "literal_char",
    Opcode::LiteralString => "literal_string",
    Opcode::LiteralInt => "literal_int",
    Opcode::LiteralFloat => "literal_float",
    Opcode::LiteralBool => "literal_bool",
    Opcode::LiteralNull => "literal_null",
    Opcode::LocalDeclare => "local_declare",
    Opcode::LocalUndeclare => "local_undeclare",
    Opcode::LocalVariable => "local_variable",
    Opcode::ArrayIndex => "array_index",
    Opcode::Dot => "dot",
    Opcode::AddressOf => "addressof",
    Opcode::Dereference => "dereference",
    Opcode::Negate => "negate",
    Opcode::BitwiseNot => "bitwise_not",
    Opcode::LogicalNot => "logical_not",
    Opcode::SizeofType => "sizeof_type",
    Opcode::WidenSigned => "widen_signed",
    Opcode::WidenUnsigned => "widen_unsigned",
    Opcode::WidenFloat => "widen_float",
    Opcode::Add => "add",
    Opcode::Sub => "sub",
    Opcode::Mul => "mul",
    Opcode::Div => "div",
    Opcode::Mod => "mod",
    Opcode::LogicalAnd => "logical_and",
    Opcode::LogicalOr => "logical_or",
    Opcode::BitwiseAnd => "bitwise_and",
    Opcode::BitwiseOr => "bitwise_or",
    Opcode::BitwiseXor => "bitwise_xor",
    Opcode::ShiftLeft => "shift_left",
    Opcode::ShiftRight => "shift_right",
    Opcode::CompareLt => "compare_lt",
    Opcode::CompareGt => "compare_gt",
    Opcode::CompareLe => "compare_le",
    Opcode::CompareGe => "compare_ge",
    Opcode::CompareEq => "compare_eq",
    Opcode::CompareNe => "compare_ne",
    Opcode::Assign => "assign",
    Opcode::Jump => "jump",
    Opcode::JumpConditional => "jump_conditional",
    Opcode::Return => "return",
    Opcode::ReturnVoid => "return_void",
  }
}

fn fmt_operands(operands: &[TmpId]) -> String {
  let parts: Vec<String> = operands.iter().map(|t| format!("_{}", t.0)).collect();
  format!("[{}]", parts.join(", "))
}

fn fmt_extra(extra: &OpExtra, types: &TypeTable) -> String {
  match extra {
    OpExtra::None => String::new(),
    OpExtra::Name(s) => format!(" {s}"),
    OpExtra::Type(t) => format!(" {}", types.get(*t).canonical_name),
    OpExtra::NameType(s, t) => format!(" {s} : {}", types.get(*t).canonical_name),
    OpExtra::IntLiteral(v) => format!(" {v}"),
    OpExtra::FloatLiteral(v) => format!(" {v}"),
    OpExtra::CharLiteral(c) => format!(" '{}'", *c as char),
    OpExtra::BoolLiteral(b) => format!(" {b}"),
    OpExtra::StringLiteral(bytes) => format!(" {:?}", String::from_utf8_lossy(bytes)),
    OpExtra::Jump(b) => format!(" BB{}", b.0),
    OpExtra::Branch(t, e) => format!(" BB{} BB{}", t.0, e.0),
  }
}

/// Renders the textual `--output-mir` dump: mangled name,
/// return/arg/temporary lines, then each block's operations in order.
/// Human-readable only; no tool parses it back.
#[must_use] pub fn dump_mir(functions: &[Function], types: &TypeTable) -> String {
  let mut out = String::new();
  for f in functions {
    let _ = writeln!(out, "{}", f.name);
    let _ = writeln!(out, "    return-value : {}", types.get(f.return_type).canonical_name);
    for (name, ty) in &f.args {
      let _ = writeln!(out, "    arg {name} : {}", types.get(*ty).canonical_name);
    }
    let _ = writeln!(out, "    temporary variables");
    for (i, temp) in f.temporaries.iter().enumerate() {
      let _ = writeln!(out, "        _{i} : {}", types.get(temp.ty).canonical_name);
    }
    let _ = writeln!(out, "    {{");
    for block_id in f.block_ids() {
      let _ = writeln!(out, "        BB{}:", block_id.0);
      for op in &f.blocks[&block_id].operations {
        let result = op.result.map_or(String::new(), |r| format!("_{} = ", r.0));
        let extra = fmt_extra(&op.extra, types);
        let _ = writeln!(out, "            {result}{} {}{extra}", opcode_name(op.opcode), fmt_operands(&op.operands));
      }
    }
    let _ = writeln!(out, "    }}");
  }
  out
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::diag::SourceRef;
  use crate::mir::{Function, OpExtra};
  use crate::types::{PrimitiveKind, TypeTable};
  use smallvec::smallvec;
  use std::rc::Rc;

  fn sref() -> SourceRef { SourceRef::new(Rc::from("t.j"), 1, 0, 0) }

  #[test]
  fn dump_includes_mangled_name_and_terminator() {
    let mut types = TypeTable::new();
    types.seed_primitives(&sref());
    let void = types.primitive(PrimitiveKind::Void);
    let mut f = Function::new("_Z4mainv".into(), void, vec![], false, sref());
    f.push_op(f.entry(), Operation { opcode: Opcode::ReturnVoid, operands: smallvec![], result: None, result_ty: None, extra: OpExtra::None, source_ref: sref() });
    let dump = dump_mir(&[f], &types);
    assert!(dump.contains("_Z4mainv"));
    assert!(dump.contains("BB0:"));
    assert!(dump.contains("return_void"));
  }

  struct CountingBackend { ops: usize }
  impl Backend for CountingBackend {
    fn begin_function(&mut self, _func: &Function) {}
    fn operation(&mut self, _block: BlockId, _op: &Operation, _types: &TypeTable) { self.ops += 1; }
    fn end_function(&mut self, _func: &Function) {}
  }

  #[test]
  fn emit_visits_every_operation() {
    let mut types = TypeTable::new();
    types.seed_primitives(&sref());
    let void = types.primitive(PrimitiveKind::Void);
    let mut f = Function::new("f".into(), void, vec![], false, sref());
    f.push_op(f.entry(), Operation { opcode: Opcode::ReturnVoid, operands: smallvec![], result: None, result_ty: None, extra: OpExtra::None, source_ref: sref() });
    let mut backend = CountingBackend { ops: 0 };
    emit(&[f], &types, &mut backend);
    assert_eq!(backend.ops, 1);
  }
}
