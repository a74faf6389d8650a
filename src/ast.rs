//! The syntax tree that an external parser hands to the core.
//!
//! Real production grammars produce a much richer tree; this is the
//! minimal, strongly-typed subset that drives every lowering rule, i.e.
//! exactly what downstream components (type resolver, scope tracker,
//! function lowering) consume. Immutable by convention: nothing here is
//! mutated once the parser hands it off.

use crate::diag::SourceRef;

#[derive(Debug, Clone)]
pub struct TranslationUnit {
  pub items: Vec<Item>,
}

#[derive(Debug, Clone)]
pub enum Item {
  Namespace { name: String, items: Vec<Item>, source_ref: SourceRef },
  Using { path: Vec<String>, absolute: bool, alias: Option<String>, source_ref: SourceRef },
  ClassForwardDecl { name: String, source_ref: SourceRef },
  ClassDef { name: String, members: Vec<Member>, methods: Vec<MethodDef>, source_ref: SourceRef },
  EnumDef { name: String, values: Vec<EnumValue>, source_ref: SourceRef },
  Typedef { name: String, target: TypeSpec, source_ref: SourceRef },
  FunctionDef(FunctionDef),
}

#[derive(Debug, Clone)]
pub struct EnumValue {
  pub name: String,
  /// `None` means "one more than the previous value" (or 0 for the first).
  pub explicit_value: Option<Expr>,
  pub source_ref: SourceRef,
}

#[derive(Debug, Clone)]
pub struct Member {
  pub name: String,
  pub ty: TypeSpec,
  pub source_ref: SourceRef,
}

#[derive(Debug, Clone)]
pub struct Param {
  pub name: String,
  pub ty: TypeSpec,
  pub source_ref: SourceRef,
}

#[derive(Debug, Clone)]
pub struct MethodDef {
  pub name: String,
  pub return_type: TypeSpec,
  pub params: Vec<Param>,
  pub body: Block,
  pub is_unsafe: bool,
  pub source_ref: SourceRef,
}

#[derive(Debug, Clone)]
pub struct FunctionDef {
  pub name: String,
  pub return_type: TypeSpec,
  pub params: Vec<Param>,
  pub body: Block,
  pub is_unsafe: bool,
  pub source_ref: SourceRef,
}

/// A type specifier as written by the user; not yet resolved against the
/// type table (that's the type resolver's job).
#[derive(Debug, Clone)]
pub enum TypeSpec {
  Simple(String, SourceRef),
  /// Template-shaped syntax is recognized by the grammar but rejected by
  /// the core.
  Template(String, Vec<TypeSpec>, SourceRef),
  PointerTo(Box<TypeSpec>, SourceRef),
  ReferenceTo(Box<TypeSpec>, SourceRef),
  Array(Box<TypeSpec>, Box<Expr>, SourceRef),
  FunctionPointer(Box<TypeSpec>, Vec<TypeSpec>, SourceRef),
}

impl TypeSpec {
  #[must_use] pub fn source_ref(&self) -> &SourceRef {
    match self {
      TypeSpec::Simple(_, r)
      | TypeSpec::Template(_, _, r)
      | TypeSpec::PointerTo(_, r)
      | TypeSpec::ReferenceTo(_, r)
      | TypeSpec::Array(_, _, r)
      | TypeSpec::FunctionPointer(_, _, r) => r,
    }
  }
}

#[derive(Debug, Clone)]
pub struct Block {
  pub stmts: Vec<Stmt>,
  pub source_ref: SourceRef,
}

#[derive(Debug, Clone)]
pub enum Stmt {
  VarDecl { name: String, ty: TypeSpec, init: Option<Expr>, source_ref: SourceRef },
  Expr(Expr),
  If { cond: Expr, then_block: Block, else_block: Option<Block>, source_ref: SourceRef },
  While { cond: Expr, body: Block, source_ref: SourceRef },
  For { init: Option<Box<Stmt>>, cond: Option<Expr>, step: Option<Expr>, body: Block, source_ref: SourceRef },
  /// `None` case label means `default`; it must be last if present (not
  /// enforced by the tree, the lowerer validates it).
  Switch { scrutinee: Expr, cases: Vec<(Option<Expr>, Block)>, source_ref: SourceRef },
  Break(SourceRef),
  Continue(SourceRef),
  Return(Option<Expr>, SourceRef),
  Goto(String, SourceRef),
  Label(String, SourceRef),
  Block(Block),
}

impl Stmt {
  #[must_use] pub fn source_ref(&self) -> &SourceRef {
    match self {
      Stmt::VarDecl { source_ref, .. }
      | Stmt::If { source_ref, .. }
      | Stmt::While { source_ref, .. }
      | Stmt::For { source_ref, .. }
      | Stmt::Switch { source_ref, .. }
      | Stmt::Break(source_ref)
      | Stmt::Continue(source_ref)
      | Stmt::Return(_, source_ref)
      | Stmt::Goto(_, source_ref)
      | Stmt::Label(_, source_ref) => source_ref,
      Stmt::Expr(e) => e.source_ref(),
      Stmt::Block(b) => &b.source_ref,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp { Add, Sub, Mul, Div, Mod, And, Or, BitAnd, BitOr, BitXor, Shl, Shr, Lt, Gt, Le, Ge, Eq, Ne }

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp { Neg, BitNot, Not }

#[derive(Debug, Clone)]
pub enum Expr {
  IntLiteral { text: String, source_ref: SourceRef },
  FloatLiteral { text: String, source_ref: SourceRef },
  CharLiteral { value: u8, source_ref: SourceRef },
  StringLiteral { value: Vec<u8>, source_ref: SourceRef },
  BoolLiteral { value: bool, source_ref: SourceRef },
  NullLiteral(SourceRef),
  /// An identifier or qualified name, to be disambiguated by the
  /// namespace resolver at lowering time.
  Name { path: Vec<String>, absolute: bool, source_ref: SourceRef },
  Binary { op: BinOp, lhs: Box<Expr>, rhs: Box<Expr>, source_ref: SourceRef },
  Unary { op: UnOp, operand: Box<Expr>, source_ref: SourceRef },
  Assign { lhs: Box<Expr>, rhs: Box<Expr>, source_ref: SourceRef },
  Call { callee: Box<Expr>, args: Vec<Expr>, source_ref: SourceRef },
  Index { array: Box<Expr>, index: Box<Expr>, source_ref: SourceRef },
  Dot { object: Box<Expr>, member: String, source_ref: SourceRef },
  AddressOf { operand: Box<Expr>, source_ref: SourceRef },
  Deref { operand: Box<Expr>, source_ref: SourceRef },
  SizeofType { ty: TypeSpec, source_ref: SourceRef },
}

impl Expr {
  #[must_use] pub fn source_ref(&self) -> &SourceRef {
    match self {
      Expr::IntLiteral { source_ref, .. }
      | Expr::FloatLiteral { source_ref, .. }
      | Expr::CharLiteral { source_ref, .. }
      | Expr::StringLiteral { source_ref, .. }
      | Expr::BoolLiteral { source_ref, .. }
      | Expr::NullLiteral(source_ref)
      | Expr::Name { source_ref, .. }
      | Expr::Binary { source_ref, .. }
      | Expr::Unary { source_ref, .. }
      | Expr::Assign { source_ref, .. }
      | Expr::Call { source_ref, .. }
      | Expr::Index { source_ref, .. }
      | Expr::Dot { source_ref, .. }
      | Expr::AddressOf { source_ref, .. }
      | Expr::Deref { source_ref, .. }
      | Expr::SizeofType { source_ref, .. } => source_ref,
    }
  }
}
