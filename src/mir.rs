//! The mid-level intermediate representation.
//!
//! A typed, three-address-ish virtual instruction set over a CFG of basic
//! blocks. Functions own their blocks, temporaries, and operations;
//! everything here is append-only during lowering and arena-indexed so
//! cross-references are stable `u32` handles rather than borrowed
//! pointers.

use smallvec::SmallVec;
use hashbrown::HashMap;
use crate::diag::SourceRef;
use crate::symbol::Symbol;
use crate::types::TypeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TmpId(pub u32);

/// A specific `(block, insertion index)` location inside a function at
/// which a later fix-up pass (goto teardown) may splice in
/// additional operations ahead of the block's terminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunctionPoint {
  pub block: BlockId,
  pub index: usize,
}

/// MIR-level symbol table entry: the fully-qualified, mangled name a
/// function or method is known to the linker by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirSymbolKind { StaticFunction, MemberMethod, MemberDestructor }

#[derive(Debug, Clone)]
pub struct MirSymbol {
  pub name: String,
  pub kind: MirSymbolKind,
  pub ty: TypeId,
}

/// Operand list for an [`Operation`]. The spec caps plain arithmetic/unary
/// opcodes at a handful of operands; `function_call` is the outlier with
/// an arbitrary argument count, so the common case (≤4) is inlined and the
/// rare case spills to the heap.
pub type Operands = SmallVec<[TmpId; 4]>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
  Symbol,
  FunctionCall,
  GetMethod,
  MethodGetObject,
  MethodGetFunction,
  LiteralChar,
  LiteralString,
  LiteralInt,
  LiteralFloat,
  LiteralBool,
  LiteralNull,
  LocalDeclare,
  LocalUndeclare,
  LocalVariable,
  ArrayIndex,
  Dot,
  AddressOf,
  Dereference,
  Negate,
  BitwiseNot,
  LogicalNot,
  SizeofType,
  WidenSigned,
  WidenUnsigned,
  WidenFloat,
  Add, Sub, Mul, Div, Mod,
  LogicalAnd, LogicalOr,
  BitwiseAnd, BitwiseOr, BitwiseXor,
  ShiftLeft, ShiftRight,
  CompareLt, CompareGt, CompareLe, CompareGe, CompareEq, CompareNe,
  Assign,
  Jump,
  JumpConditional,
  Return,
  ReturnVoid,
}

impl Opcode {
  /// Terminators end a basic block; exactly one must appear, as the last
  /// operation.
  #[must_use] pub fn is_terminator(self) -> bool {
    matches!(self, Opcode::Jump | Opcode::JumpConditional | Opcode::Return | Opcode::ReturnVoid)
  }
}

/// Extra payload an opcode may carry beyond its operand tmp-ids: names,
/// literal values, branch targets.
#[derive(Debug, Clone)]
pub enum OpExtra {
  None,
  Name(Symbol),
  Type(TypeId),
  NameType(Symbol, TypeId),
  IntLiteral(i128),
  FloatLiteral(f64),
  CharLiteral(u8),
  BoolLiteral(bool),
  StringLiteral(Vec<u8>),
  Jump(BlockId),
  Branch(BlockId, BlockId),
}

#[derive(Debug, Clone)]
pub struct Operation {
  pub opcode: Opcode,
  pub operands: Operands,
  /// `None` for operations with no result (`local_declare`, terminators, …).
  pub result: Option<TmpId>,
  pub result_ty: Option<TypeId>,
  pub extra: OpExtra,
  pub source_ref: SourceRef,
}

#[derive(Debug, Clone, Default)]
pub struct BasicBlock {
  pub operations: Vec<Operation>,
  pub reachable_from: Vec<BlockId>,
}

impl BasicBlock {
  #[must_use] pub fn terminator(&self) -> Option<&Operation> { self.operations.last() }
}

#[derive(Debug, Clone, Copy)]
pub struct Temporary {
  pub ty: TypeId,
  pub is_lvalue: bool,
}

#[derive(Debug)]
pub struct Function {
  pub name: String,
  pub return_type: TypeId,
  pub args: Vec<(Symbol, TypeId)>,
  pub is_unsafe: bool,
  pub source_ref: SourceRef,
  pub blocks: HashMap<BlockId, BasicBlock>,
  pub temporaries: Vec<Temporary>,
  pub defs: HashMap<TmpId, FunctionPoint>,
  next_block: u32,
}

impl Function {
  #[must_use] pub fn new(name: String, return_type: TypeId, args: Vec<(Symbol, TypeId)>, is_unsafe: bool, source_ref: SourceRef) -> Self {
    let mut f = Self {
      name, return_type, args, is_unsafe, source_ref,
      blocks: HashMap::new(),
      temporaries: Vec::new(),
      defs: HashMap::new(),
      next_block: 0,
    };
    let entry = f.new_block();
    assert_eq!(entry, BlockId(0), "entry block must be id 0");
    f
  }

  #[must_use] pub fn entry(&self) -> BlockId { BlockId(0) }

  pub fn new_block(&mut self) -> BlockId {
    let id = BlockId(self.next_block);
    self.next_block += 1;
    self.blocks.insert(id, BasicBlock::default());
    id
  }

  pub fn new_temp(&mut self, ty: TypeId, is_lvalue: bool) -> TmpId {
    let id = TmpId(self.temporaries.len().try_into().expect("too many temporaries"));
    self.temporaries.push(Temporary { ty, is_lvalue });
    id
  }

  #[must_use] pub fn temp_ty(&self, id: TmpId) -> TypeId { self.temporaries[id.0 as usize].ty }
  #[must_use] pub fn temp_is_lvalue(&self, id: TmpId) -> bool { self.temporaries[id.0 as usize].is_lvalue }

  /// Append `op` to `block`, recording a def-site for its result (if any)
  /// for the fast `tmpvar_id -> defining Operation` lookup.
  pub fn push_op(&mut self, block: BlockId, op: Operation) {
    let index = self.blocks[&block].operations.len();
    if let Some(result) = op.result {
      self.defs.insert(result, FunctionPoint { block, index });
    }
    self.blocks.get_mut(&block).expect("block exists").operations.push(op);
  }

  /// Insert `op` immediately before the block's terminator (used by the
  /// goto fix-up step to splice in `local_undeclare`s).
  pub fn insert_before_terminator(&mut self, block: BlockId, op: Operation) {
    let ops = &mut self.blocks.get_mut(&block).expect("block exists").operations;
    let at = if ops.last().is_some_and(|o| o.opcode.is_terminator()) { ops.len() - 1 } else { ops.len() };
    ops.insert(at, op);
  }

  pub fn connect(&mut self, from: BlockId, to: BlockId) {
    self.blocks.get_mut(&to).expect("target block exists").reachable_from.push(from);
  }

  #[must_use] pub fn block_ids(&self) -> Vec<BlockId> {
    let mut ids: Vec<BlockId> = self.blocks.keys().copied().collect();
    ids.sort_by_key(|b| b.0);
    ids
  }
}
