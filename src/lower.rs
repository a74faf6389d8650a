//! Function lowering: syntax tree → MIR.
//!
//! Each control-flow form (`if`/`while`/`for`/`switch`) splits into its own
//! blocks with an unconditional jump to a join block on fall-through;
//! leaving a scope early (`break`/`continue`/`return`/`goto`) tears down
//! every variable declared since the scope was entered before jumping.

use hashbrown::HashMap;
use smallvec::smallvec;

use crate::ast;
use crate::diag::{Errors, ErrorClass, SourceRef};
use crate::literal::parse_literal_int;
use crate::mir::{BlockId, Function, MirSymbol, OpExtra, Opcode, Operation, TmpId};
use crate::namespace::NamespaceResolver;
use crate::resolve::{ResolvedFunction, TypeResolver};
use crate::scope::ScopeId;
use crate::scope::ScopeTracker;
use crate::symbol::{intern, Symbol};
use crate::types::{PrimitiveKind, TypeId, TypeKind, TypeTable};

#[derive(Debug, Clone, Copy)]
struct Value {
  tmp: TmpId,
  ty: TypeId,
  is_lvalue: bool,
}

pub struct FunctionLowerer<'a> {
  types: &'a mut TypeTable,
  ns: &'a mut NamespaceResolver,
  globals: &'a HashMap<String, MirSymbol>,
  errors: &'a mut Errors,
  scope: ScopeTracker,
  func: Function,
  cursor: BlockId,
  /// Live lexical frames, innermost last; mirrors `scope`'s stack 1:1.
  locals: Vec<Vec<(Symbol, TmpId, TypeId)>>,
  /// Every declaration ever made, keyed by the scope it was declared in,
  /// kept for the lifetime of the function so goto fix-ups (which name
  /// scopes left behind, possibly long since popped) can still find the
  /// exact temporary each declaration produced.
  scope_locals: HashMap<ScopeId, Vec<(Symbol, TmpId)>>,
  /// `(label name, placeholder block)` for every `goto` seen so far;
  /// patched to the label's real block once the whole body is lowered
  /// (a `goto` may target a label that appears later in the source).
  pending_gotos: Vec<(String, BlockId)>,
  /// A function declared `unsafe` puts its whole body in unsafe context,
  /// independent of `scope`'s per-block `explicit_unsafe` chain.
  fn_is_unsafe: bool,
}

/// Lower one resolved function/method to MIR. Returns `None` if a fatal
/// error (one that leaves no sensible MIR to analyze) was already
/// recorded into `errors`.
pub fn lower_function(
  rf: &ResolvedFunction,
  types: &mut TypeTable,
  ns: &mut NamespaceResolver,
  globals: &HashMap<String, MirSymbol>,
  errors: &mut Errors,
) -> Option<Function> {
  let mut args = Vec::with_capacity(rf.params.len() + 1);
  if let Some(receiver) = rf.receiver {
    let this_ty = types.get_pointer_to(receiver, rf.source_ref.clone());
    args.push((intern("this"), this_ty));
  }
  args.extend(rf.params.iter().copied());

  let func = Function::new(rf.mangled_name.clone(), rf.return_type, args.clone(), rf.is_unsafe, rf.source_ref.clone());
  let mut lowerer = FunctionLowerer {
    types, ns, globals, errors,
    scope: ScopeTracker::new(),
    func,
    cursor: BlockId(0),
    locals: vec![Vec::new()],
    scope_locals: HashMap::new(),
    pending_gotos: Vec::new(),
    fn_is_unsafe: rf.is_unsafe,
  };
  for &(sym, ty) in &args {
    lowerer.declare_arg(sym, ty, rf.source_ref.clone());
  }
  lowerer.lower_stmts(&rf.body.stmts);
  lowerer.close_root_scope(&rf.body.source_ref);
  lowerer.finish()
}

impl<'a> FunctionLowerer<'a> {
  fn declare_arg(&mut self, sym: Symbol, ty: TypeId, source_ref: SourceRef) {
    let tmp = self.func.new_temp(ty, true);
    self.func.push_op(self.cursor, Operation {
      opcode: Opcode::LocalDeclare,
      operands: smallvec![],
      result: Some(tmp),
      result_ty: Some(ty),
      extra: OpExtra::NameType(sym, ty),
      source_ref,
    });
    let sid = self.scope.current_id();
    self.locals.last_mut().expect("root frame").push((sym, tmp, ty));
    self.scope_locals.entry(sid).or_default().push((sym, tmp));
  }

  fn emit(&mut self, opcode: Opcode, operands: smallvec::SmallVec<[TmpId; 4]>, result_ty: Option<TypeId>, extra: OpExtra, source_ref: SourceRef) -> Option<TmpId> {
    let result = result_ty.map(|ty| self.func.new_temp(ty, false));
    self.func.push_op(self.cursor, Operation { opcode, operands, result, result_ty, extra, source_ref });
    result
  }

  fn emit_lvalue(&mut self, opcode: Opcode, operands: smallvec::SmallVec<[TmpId; 4]>, ty: TypeId, extra: OpExtra, source_ref: SourceRef) -> TmpId {
    let tmp = self.func.new_temp(ty, true);
    self.func.push_op(self.cursor, Operation { opcode, operands, result: Some(tmp), result_ty: Some(ty), extra, source_ref });
    tmp
  }

  fn in_unsafe_context(&self) -> bool { self.fn_is_unsafe || self.scope.is_unsafe() }

  fn current_block_terminated(&self) -> bool {
    self.func.blocks[&self.cursor].terminator().is_some_and(|op| op.opcode.is_terminator())
  }

  fn jump_to(&mut self, target: BlockId, source_ref: SourceRef) {
    if self.current_block_terminated() { return }
    self.func.push_op(self.cursor, Operation { opcode: Opcode::Jump, operands: smallvec![], result: None, result_ty: None, extra: OpExtra::Jump(target), source_ref });
    self.func.connect(self.cursor, target);
  }

  // --- scope bookkeeping -------------------------------------------------

  fn push_scope(&mut self, is_unsafe: bool) {
    self.scope.scope_push(is_unsafe);
    self.locals.push(Vec::new());
  }

  fn push_loop_scope(&mut self, brk: BlockId, cont: BlockId) {
    self.scope.scope_push_loop(brk, cont);
    self.locals.push(Vec::new());
  }

  /// Close the innermost scope: emit `local_undeclare` for its own
  /// variables (reverse declaration order) if the current block hasn't
  /// already terminated (a `return`/`break`/`continue`/`goto` inside
  /// will have torn its own path down already).
  fn pop_scope(&mut self, source_ref: &SourceRef) {
    let frame = self.locals.pop().expect("scope stack never empty");
    if !self.current_block_terminated() {
      for &(sym, tmp, _ty) in frame.iter().rev() {
        self.emit(Opcode::LocalUndeclare, smallvec![tmp], None, OpExtra::Name(sym), source_ref.clone());
      }
    }
    self.scope.scope_pop();
  }

  fn close_root_scope(&mut self, source_ref: &SourceRef) {
    if !self.current_block_terminated() {
      // Fall off the end of a void function: implicit `return_void`,
      // torn down the same way an explicit `return` tears down
      // `depth_to_root` scopes (`lower_return`) so params/root locals
      // don't leak past the function's end.
      if self.types.is_void(self.func.return_type) {
        self.teardown(self.locals.len(), source_ref);
        self.emit(Opcode::ReturnVoid, smallvec![], None, OpExtra::None, source_ref.clone());
      }
      // Non-void: Return Coverage will flag the missing
      // `return` on this path; lowering doesn't need to invent a value.
    }
  }

  fn lower_block_scoped(&mut self, block: &ast::Block, is_unsafe: bool) {
    self.push_scope(is_unsafe);
    self.lower_stmts(&block.stmts);
    self.pop_scope(&block.source_ref);
  }

  fn lower_stmts(&mut self, stmts: &[ast::Stmt]) {
    for s in stmts {
      if self.current_block_terminated() {
        self.errors.add_simple_error(ErrorClass::Lowering, s.source_ref().clone(), "unreachable statement", "statement follows a return/break/continue/goto in the same block");
        break;
      }
      self.lower_stmt(s);
    }
  }

  fn lookup_local(&self, name: &str) -> Option<(TmpId, TypeId)> {
    let sym = intern(name);
    for frame in self.locals.iter().rev() {
      for &(s, tmp, ty) in frame.iter().rev() {
        if s == sym { return Some((tmp, ty)) }
      }
    }
    None
  }

  fn teardown(&mut self, n: usize, source_ref: &SourceRef) {
    for frame in self.locals.iter().rev().take(n) {
      for &(sym, tmp, _ty) in frame.iter().rev() {
        self.func.push_op(self.cursor, Operation { opcode: Opcode::LocalUndeclare, operands: smallvec![tmp], result: None, result_ty: None, extra: OpExtra::Name(sym), source_ref: source_ref.clone() });
      }
    }
  }

  // --- statements ---------------------------------------------------------

  fn lower_stmt(&mut self, stmt: &ast::Stmt) {
    match stmt {
      ast::Stmt::VarDecl { name, ty, init, source_ref } => self.lower_var_decl(name, ty, init.as_ref(), source_ref),
      ast::Stmt::Expr(e) => { self.lower_expr(e, None); }
      ast::Stmt::Block(b) => self.lower_block_scoped(b, false),
      ast::Stmt::If { cond, then_block, else_block, source_ref } => self.lower_if(cond, then_block, else_block.as_ref(), source_ref),
      ast::Stmt::While { cond, body, source_ref } => self.lower_while(cond, body, source_ref),
      ast::Stmt::For { init, cond, step, body, source_ref } => self.lower_for(init.as_deref(), cond.as_ref(), step.as_ref(), body, source_ref),
      ast::Stmt::Switch { scrutinee, cases, source_ref } => self.lower_switch(scrutinee, cases, source_ref),
      ast::Stmt::Break(source_ref) => self.lower_break_continue(true, source_ref),
      ast::Stmt::Continue(source_ref) => self.lower_break_continue(false, source_ref),
      ast::Stmt::Return(value, source_ref) => self.lower_return(value.as_ref(), source_ref),
      ast::Stmt::Goto(label, source_ref) => self.lower_goto(label, source_ref),
      ast::Stmt::Label(name, source_ref) => self.lower_label(name, source_ref),
    }
  }

  fn lower_var_decl(&mut self, name: &str, ty: &ast::TypeSpec, init: Option<&ast::Expr>, source_ref: &SourceRef) {
    let Some(decl_ty) = TypeResolver::new(self.ns, self.types, self.errors).resolve_type_spec(ty) else { return };
    let tmp = self.func.new_temp(decl_ty, true);
    self.func.push_op(self.cursor, Operation { opcode: Opcode::LocalDeclare, operands: smallvec![], result: Some(tmp), result_ty: Some(decl_ty), extra: OpExtra::NameType(intern(name), decl_ty), source_ref: source_ref.clone() });
    if !self.scope.declare_variable(name, decl_ty, source_ref.clone(), self.errors) { return }
    let sid = self.scope.current_id();
    self.locals.last_mut().expect("at least one scope").push((intern(name), tmp, decl_ty));
    self.scope_locals.entry(sid).or_default().push((intern(name), tmp));

    if let Some(init_expr) = init {
      let Some(value) = self.lower_expr(init_expr, Some(decl_ty)) else { return };
      let Some(rhs) = self.coerce_for_assign(value, decl_ty, source_ref) else { return };
      self.emit(Opcode::Assign, smallvec![tmp, rhs], Some(decl_ty), OpExtra::None, source_ref.clone());
    }
  }

  fn lower_if(&mut self, cond: &ast::Expr, then_block: &ast::Block, else_block: Option<&ast::Block>, source_ref: &SourceRef) {
    let Some(cond_val) = self.lower_expr(cond, None) else { return };
    self.require_bool(cond_val, cond.source_ref());
    let then_bb = self.func.new_block();
    let else_bb = self.func.new_block();
    let join_bb = self.func.new_block();
    self.func.push_op(self.cursor, Operation { opcode: Opcode::JumpConditional, operands: smallvec![cond_val.tmp], result: None, result_ty: None, extra: OpExtra::Branch(then_bb, else_bb), source_ref: source_ref.clone() });
    self.func.connect(self.cursor, then_bb);
    self.func.connect(self.cursor, else_bb);

    self.cursor = then_bb;
    self.lower_block_scoped(then_block, false);
    self.jump_to(join_bb, source_ref.clone());

    self.cursor = else_bb;
    if let Some(eb) = else_block {
      self.lower_block_scoped(eb, false);
    }
    self.jump_to(join_bb, source_ref.clone());

    self.cursor = join_bb;
  }

  fn lower_while(&mut self, cond: &ast::Expr, body: &ast::Block, source_ref: &SourceRef) {
    let header = self.func.new_block();
    self.jump_to(header, source_ref.clone());
    self.cursor = header;
    let Some(cond_val) = self.lower_expr(cond, None) else { return };
    self.require_bool(cond_val, cond.source_ref());

    let body_bb = self.func.new_block();
    let exit_bb = self.func.new_block();
    self.func.push_op(self.cursor, Operation { opcode: Opcode::JumpConditional, operands: smallvec![cond_val.tmp], result: None, result_ty: None, extra: OpExtra::Branch(body_bb, exit_bb), source_ref: source_ref.clone() });
    self.func.connect(self.cursor, body_bb);
    self.func.connect(self.cursor, exit_bb);

    self.cursor = body_bb;
    self.push_loop_scope(exit_bb, header);
    self.lower_stmts(&body.stmts);
    self.pop_scope(source_ref);
    self.jump_to(header, source_ref.clone());

    self.cursor = exit_bb;
  }

  fn lower_for(&mut self, init: Option<&ast::Stmt>, cond: Option<&ast::Expr>, step: Option<&ast::Expr>, body: &ast::Block, source_ref: &SourceRef) {
    self.push_scope(false);
    if let Some(i) = init { self.lower_stmt(i); }

    let header = self.func.new_block();
    self.jump_to(header, source_ref.clone());
    self.cursor = header;
    let body_bb = self.func.new_block();
    let incr_bb = self.func.new_block();
    let exit_bb = self.func.new_block();
    if let Some(c) = cond {
      let Some(cond_val) = self.lower_expr(c, None) else { return };
      self.require_bool(cond_val, c.source_ref());
      self.func.push_op(self.cursor, Operation { opcode: Opcode::JumpConditional, operands: smallvec![cond_val.tmp], result: None, result_ty: None, extra: OpExtra::Branch(body_bb, exit_bb), source_ref: source_ref.clone() });
      self.func.connect(self.cursor, body_bb);
      self.func.connect(self.cursor, exit_bb);
    } else {
      self.jump_to(body_bb, source_ref.clone());
    }

    self.cursor = body_bb;
    self.push_loop_scope(exit_bb, incr_bb);
    self.lower_stmts(&body.stmts);
    self.pop_scope(source_ref);
    self.jump_to(incr_bb, source_ref.clone());

    self.cursor = incr_bb;
    if let Some(s) = step { self.lower_expr(s, None); }
    self.jump_to(header, source_ref.clone());

    self.cursor = exit_bb;
    self.pop_scope(source_ref);
  }

  fn lower_switch(&mut self, scrutinee: &ast::Expr, cases: &[(Option<ast::Expr>, ast::Block)], source_ref: &SourceRef) {
    let Some(scrutinee_val) = self.lower_expr(scrutinee, None) else { return };
    let join_bb = self.func.new_block();
    let mut dispatch = self.cursor;

    for (i, (label, body)) in cases.iter().enumerate() {
      let is_last = i + 1 == cases.len();
      let case_bb = self.func.new_block();
      match label {
        Some(expr) => {
          self.cursor = dispatch;
          let Some(label_val) = self.lower_expr(expr, Some(scrutinee_val.ty)) else { continue };
          let next_dispatch = self.func.new_block();
          let Some((scrut_tmp, label_tmp, _)) = self.widen_pair(scrutinee_val, label_val, source_ref) else { continue };
          let cmp_ty = self.types.primitive(PrimitiveKind::Bool);
          let cond = self.emit(Opcode::CompareEq, smallvec![scrut_tmp, label_tmp], Some(cmp_ty), OpExtra::None, source_ref.clone()).expect("bool result");
          self.func.push_op(self.cursor, Operation { opcode: Opcode::JumpConditional, operands: smallvec![cond], result: None, result_ty: None, extra: OpExtra::Branch(case_bb, next_dispatch), source_ref: source_ref.clone() });
          self.func.connect(self.cursor, case_bb);
          self.func.connect(self.cursor, next_dispatch);
          dispatch = next_dispatch;
        }
        None => {
          // `default`; must be last (validated below) and always matches.
          self.cursor = dispatch;
          self.jump_to(case_bb, source_ref.clone());
          if !is_last {
            self.errors.add_simple_error(ErrorClass::Lowering, source_ref.clone(), "misplaced default", "a switch's default case must be last");
          }
        }
      }
      self.cursor = case_bb;
      self.lower_block_scoped(body, false);
      // No implicit fall-through: every case ends at the join
      // unless its own body already produced a terminator (`return`, etc).
      self.jump_to(join_bb, source_ref.clone());
    }

    self.cursor = dispatch;
    self.jump_to(join_bb, source_ref.clone());
    self.cursor = join_bb;
  }

  fn lower_break_continue(&mut self, is_break: bool, source_ref: &SourceRef) {
    let Some(depth) = self.scope.depth_to_enclosing_loop() else {
      self.errors.add_simple_error(ErrorClass::Lowering, source_ref.clone(), if is_break { "break outside loop" } else { "continue outside loop" }, "not inside a loop");
      return;
    };
    let (brk, cont) = self.scope.enclosing_loop().expect("depth_to_enclosing_loop found one");
    self.teardown(depth, source_ref);
    self.jump_to(if is_break { brk } else { cont }, source_ref.clone());
  }

  fn lower_return(&mut self, value: Option<&ast::Expr>, source_ref: &SourceRef) {
    let depth = self.scope.depth_to_root();
    match value {
      Some(expr) => {
        let Some(val) = self.lower_expr(expr, Some(self.func.return_type)) else { return };
        let Some(coerced) = self.coerce_for_assign(val, self.func.return_type, source_ref) else { return };
        self.teardown(depth, source_ref);
        self.func.push_op(self.cursor, Operation { opcode: Opcode::Return, operands: smallvec![coerced], result: None, result_ty: None, extra: OpExtra::None, source_ref: source_ref.clone() });
      }
      None => {
        if !self.types.is_void(self.func.return_type) {
          self.errors.add_simple_error(ErrorClass::Lowering, source_ref.clone(), "missing return value", "function has a non-void return type");
        }
        self.teardown(depth, source_ref);
        self.func.push_op(self.cursor, Operation { opcode: Opcode::ReturnVoid, operands: smallvec![], result: None, result_ty: None, extra: OpExtra::None, source_ref: source_ref.clone() });
      }
    }
  }

  fn lower_goto(&mut self, label: &str, source_ref: &SourceRef) {
    let point = crate::mir::FunctionPoint { block: self.cursor, index: self.func.blocks[&self.cursor].operations.len() };
    self.scope.declare_goto(label, point, source_ref.clone());
    let target_block = self.func.new_block(); // placeholder target, patched below once the label is seen
    self.func.push_op(self.cursor, Operation { opcode: Opcode::Jump, operands: smallvec![], result: None, result_ty: None, extra: OpExtra::Jump(target_block), source_ref: source_ref.clone() });
    self.func.connect(self.cursor, target_block);
    self.pending_gotos.push((label.to_owned(), target_block));
    // A goto terminates its block but not the statement list: code after it
    // (up to and including the label it targets) still has to lower so the
    // label gets registered and scope/goto legality checking can run.
    // Continue on a fresh block rather than the now-terminated one.
    self.cursor = self.func.new_block();
  }

  fn lower_label(&mut self, name: &str, source_ref: &SourceRef) {
    let label_bb = self.func.new_block();
    self.jump_to(label_bb, source_ref.clone());
    self.cursor = label_bb;
    let point = crate::mir::FunctionPoint { block: label_bb, index: 0 };
    self.scope.declare_label(name, point, source_ref.clone(), self.errors);
  }

  // --- expressions ---------------------------------------------------------

  fn lower_expr(&mut self, expr: &ast::Expr, expected: Option<TypeId>) -> Option<Value> {
    match expr {
      ast::Expr::IntLiteral { text, source_ref } => self.lower_int_literal(text, source_ref),
      ast::Expr::FloatLiteral { text, source_ref } => self.lower_float_literal(text, source_ref),
      ast::Expr::CharLiteral { value, source_ref } => {
        let ty = self.types.primitive(PrimitiveKind::U8);
        let tmp = self.emit(Opcode::LiteralChar, smallvec![], Some(ty), OpExtra::CharLiteral(*value), source_ref.clone())?;
        Some(Value { tmp, ty, is_lvalue: false })
      }
      ast::Expr::StringLiteral { value, source_ref } => {
        let u8t = self.types.primitive(PrimitiveKind::U8);
        let ty = self.types.get_pointer_to(u8t, source_ref.clone());
        let tmp = self.emit(Opcode::LiteralString, smallvec![], Some(ty), OpExtra::StringLiteral(value.clone()), source_ref.clone())?;
        Some(Value { tmp, ty, is_lvalue: false })
      }
      ast::Expr::BoolLiteral { value, source_ref } => {
        let ty = self.types.primitive(PrimitiveKind::Bool);
        let tmp = self.emit(Opcode::LiteralBool, smallvec![], Some(ty), OpExtra::BoolLiteral(*value), source_ref.clone())?;
        Some(Value { tmp, ty, is_lvalue: false })
      }
      ast::Expr::NullLiteral(source_ref) => {
        let ty = expected.unwrap_or_else(|| self.types.primitive(PrimitiveKind::Void));
        let tmp = self.emit(Opcode::LiteralNull, smallvec![], Some(ty), OpExtra::None, source_ref.clone())?;
        Some(Value { tmp, ty, is_lvalue: false })
      }
      ast::Expr::Name { path, absolute, source_ref } => self.lower_name(path, *absolute, source_ref),
      ast::Expr::Binary { op, lhs, rhs, source_ref } => self.lower_binary(*op, lhs, rhs, source_ref),
      ast::Expr::Unary { op, operand, source_ref } => self.lower_unary(*op, operand, source_ref),
      ast::Expr::Assign { lhs, rhs, source_ref } => self.lower_assign(lhs, rhs, source_ref),
      ast::Expr::Call { callee, args, source_ref } => self.lower_call(callee, args, source_ref),
      ast::Expr::Index { array, index, source_ref } => self.lower_index(array, index, source_ref),
      ast::Expr::Dot { object, member, source_ref } => self.lower_dot(object, member, source_ref),
      ast::Expr::AddressOf { operand, source_ref } => self.lower_address_of(operand, expected, source_ref),
      ast::Expr::Deref { operand, source_ref } => self.lower_deref(operand, source_ref),
      ast::Expr::SizeofType { ty, source_ref } => self.lower_sizeof(ty, source_ref),
    }
  }

  fn lower_int_literal(&mut self, text: &str, source_ref: &SourceRef) -> Option<Value> {
    match parse_literal_int(text) {
      Ok(p) => {
        let ty = self.types.primitive(p.kind);
        let tmp = self.emit(Opcode::LiteralInt, smallvec![], Some(ty), OpExtra::IntLiteral(p.value), source_ref.clone())?;
        Some(Value { tmp, ty, is_lvalue: false })
      }
      Err(msg) => {
        self.errors.add_simple_error(ErrorClass::Lowering, source_ref.clone(), "invalid integer literal", msg);
        None
      }
    }
  }

  fn lower_float_literal(&mut self, text: &str, source_ref: &SourceRef) -> Option<Value> {
    let (body, kind) = if let Some(b) = text.strip_suffix("f32") { (b, PrimitiveKind::F32) }
      else if let Some(b) = text.strip_suffix("f64") { (b, PrimitiveKind::F64) }
      else { (text, PrimitiveKind::F64) };
    match body.parse::<f64>() {
      Ok(v) => {
        let ty = self.types.primitive(kind);
        let tmp = self.emit(Opcode::LiteralFloat, smallvec![], Some(ty), OpExtra::FloatLiteral(v), source_ref.clone())?;
        Some(Value { tmp, ty, is_lvalue: false })
      }
      Err(_) => {
        self.errors.add_simple_error(ErrorClass::Lowering, source_ref.clone(), "invalid float literal", format!("could not parse '{text}'"));
        None
      }
    }
  }

  fn lower_name(&mut self, path: &[String], absolute: bool, source_ref: &SourceRef) -> Option<Value> {
    if !absolute && path.len() == 1 {
      if let Some((tmp, ty)) = self.lookup_local(&path[0]) {
        let result = self.emit_lvalue(Opcode::LocalVariable, smallvec![tmp], ty, OpExtra::Name(intern(&path[0])), source_ref.clone());
        return Some(Value { tmp: result, ty, is_lvalue: true });
      }
    }
    let joined = path.join("::");
    if let Some(sym) = self.globals.get(&joined) {
      let tmp = self.emit(Opcode::Symbol, smallvec![], Some(sym.ty), OpExtra::Name(intern(&joined)), source_ref.clone())?;
      return Some(Value { tmp, ty: sym.ty, is_lvalue: false });
    }
    self.errors.add_simple_error(ErrorClass::Lowering, source_ref.clone(), "undefined identifier", format!("'{joined}' is not declared"));
    None
  }

  fn require_bool(&mut self, v: Value, source_ref: &SourceRef) {
    if !matches!(self.types.get(v.ty).kind, TypeKind::Primitive(PrimitiveKind::Bool)) {
      self.errors.add_simple_error(ErrorClass::Lowering, source_ref.clone(), "type mismatch", format!("expected bool, found '{}'", self.types.get(v.ty).canonical_name));
    }
  }

  /// Numeric widening: bring two operands of the same family
  /// (int-signed, int-unsigned, or float) to a common width, inserting
  /// `widen_*` as needed. Different families (including signed vs
  /// unsigned) are never widened together.
  fn widen_pair(&mut self, lhs: Value, rhs: Value, source_ref: &SourceRef) -> Option<(TmpId, TmpId, TypeId)> {
    let lk = self.primitive_kind(lhs.ty);
    let rk = self.primitive_kind(rhs.ty);
    let (Some(lk), Some(rk)) = (lk, rk) else {
      if lhs.ty == rhs.ty { return Some((lhs.tmp, rhs.tmp, lhs.ty)) }
      self.errors.add_simple_error(ErrorClass::Lowering, source_ref.clone(), "operand type mismatch", format!("'{}' and '{}' do not match and are not numeric", self.types.get(lhs.ty).canonical_name, self.types.get(rhs.ty).canonical_name));
      return None;
    };
    if lk == rk { return Some((lhs.tmp, rhs.tmp, lhs.ty)) }

    let family_ok = (lk.is_signed() && rk.is_signed()) || (lk.is_unsigned() && rk.is_unsigned()) || (lk.is_float() && rk.is_float());
    if !family_ok {
      self.errors.add_simple_error(ErrorClass::Lowering, source_ref.clone(), "operand type mismatch", "signed/unsigned/float operands do not implicitly convert; cast explicitly");
      return None;
    }
    let target_kind = if lk.bits() >= rk.bits() { lk } else { rk };
    let target_ty = self.types.primitive(target_kind);
    let opcode = if target_kind.is_float() { Opcode::WidenFloat } else if target_kind.is_signed() { Opcode::WidenSigned } else { Opcode::WidenUnsigned };

    let lhs_tmp = if lk == target_kind { lhs.tmp } else { self.emit(opcode, smallvec![lhs.tmp], Some(target_ty), OpExtra::Type(target_ty), source_ref.clone())? };
    let rhs_tmp = if rk == target_kind { rhs.tmp } else { self.emit(opcode, smallvec![rhs.tmp], Some(target_ty), OpExtra::Type(target_ty), source_ref.clone())? };
    Some((lhs_tmp, rhs_tmp, target_ty))
  }

  fn primitive_kind(&self, ty: TypeId) -> Option<PrimitiveKind> {
    match self.types.get(ty).kind { TypeKind::Primitive(k) => Some(k), _ => None }
  }

  fn lower_binary(&mut self, op: ast::BinOp, lhs: &ast::Expr, rhs: &ast::Expr, source_ref: &SourceRef) -> Option<Value> {
    let l = self.lower_expr(lhs, None)?;
    let r = self.lower_expr(rhs, None)?;
    let is_comparison = matches!(op, ast::BinOp::Lt | ast::BinOp::Gt | ast::BinOp::Le | ast::BinOp::Ge | ast::BinOp::Eq | ast::BinOp::Ne);
    let is_logical = matches!(op, ast::BinOp::And | ast::BinOp::Or);

    if is_logical {
      let bool_ty = self.types.primitive(PrimitiveKind::Bool);
      self.require_bool(l, lhs.source_ref());
      self.require_bool(r, rhs.source_ref());
      let opcode = if op == ast::BinOp::And { Opcode::LogicalAnd } else { Opcode::LogicalOr };
      let tmp = self.emit(opcode, smallvec![l.tmp, r.tmp], Some(bool_ty), OpExtra::None, source_ref.clone())?;
      return Some(Value { tmp, ty: bool_ty, is_lvalue: false });
    }

    let l_is_ptrref = matches!(self.types.get(l.ty).kind, TypeKind::Pointer(_) | TypeKind::Reference(_));
    if is_comparison && l_is_ptrref {
      if !matches!(op, ast::BinOp::Eq | ast::BinOp::Ne) {
        self.errors.add_simple_error(ErrorClass::Lowering, source_ref.clone(), "invalid pointer comparison", "pointers and references support only == and !=");
        return None;
      }
      if l.ty != r.ty {
        self.errors.add_simple_error(ErrorClass::Lowering, source_ref.clone(), "operand type mismatch", "compared pointers/references must have the same type");
        return None;
      }
      let bool_ty = self.types.primitive(PrimitiveKind::Bool);
      let opcode = if op == ast::BinOp::Eq { Opcode::CompareEq } else { Opcode::CompareNe };
      let tmp = self.emit(opcode, smallvec![l.tmp, r.tmp], Some(bool_ty), OpExtra::None, source_ref.clone())?;
      return Some(Value { tmp, ty: bool_ty, is_lvalue: false });
    }

    if matches!(self.types.get(l.ty).kind, TypeKind::Composite(_) | TypeKind::Enum(_)) || matches!(self.types.get(r.ty).kind, TypeKind::Composite(_) | TypeKind::Enum(_)) {
      self.errors.add_simple_error(ErrorClass::Lowering, source_ref.clone(), "invalid operand", "composite and enum values do not support arithmetic or relational operators");
      return None;
    }

    let (lt, rt, common) = self.widen_pair(l, r, source_ref)?;
    let opcode = match op {
      ast::BinOp::Add => Opcode::Add, ast::BinOp::Sub => Opcode::Sub, ast::BinOp::Mul => Opcode::Mul,
      ast::BinOp::Div => Opcode::Div, ast::BinOp::Mod => Opcode::Mod,
      ast::BinOp::BitAnd => Opcode::BitwiseAnd, ast::BinOp::BitOr => Opcode::BitwiseOr, ast::BinOp::BitXor => Opcode::BitwiseXor,
      ast::BinOp::Shl => Opcode::ShiftLeft, ast::BinOp::Shr => Opcode::ShiftRight,
      ast::BinOp::Lt => Opcode::CompareLt, ast::BinOp::Gt => Opcode::CompareGt, ast::BinOp::Le => Opcode::CompareLe,
      ast::BinOp::Ge => Opcode::CompareGe, ast::BinOp::Eq => Opcode::CompareEq, ast::BinOp::Ne => Opcode::CompareNe,
      ast::BinOp::And | ast::BinOp::Or => unreachable!("handled above"),
    };
    let result_ty = if is_comparison { self.types.primitive(PrimitiveKind::Bool) } else { common };
    let tmp = self.emit(opcode, smallvec![lt, rt], Some(result_ty), OpExtra::None, source_ref.clone())?;
    Some(Value { tmp, ty: result_ty, is_lvalue: false })
  }

  fn lower_unary(&mut self, op: ast::UnOp, operand: &ast::Expr, source_ref: &SourceRef) -> Option<Value> {
    let v = self.lower_expr(operand, None)?;
    let opcode = match op { ast::UnOp::Neg => Opcode::Negate, ast::UnOp::BitNot => Opcode::BitwiseNot, ast::UnOp::Not => Opcode::LogicalNot };
    if op == ast::UnOp::Not { self.require_bool(v, operand.source_ref()); }
    let tmp = self.emit(opcode, smallvec![v.tmp], Some(v.ty), OpExtra::None, source_ref.clone())?;
    Some(Value { tmp, ty: v.ty, is_lvalue: false })
  }

  /// `assign`'s right-hand side (and a `var_decl` initializer, and a
  /// `return` value) may need an implicit pointer<->reference conversion;
  /// outside `unsafe` this is disallowed.
  fn coerce_for_assign(&mut self, value: Value, target: TypeId, source_ref: &SourceRef) -> Option<TmpId> {
    if value.ty == target { return Some(value.tmp) }
    let target_kind = self.types.get(target).kind.clone();
    let value_kind = self.types.get(value.ty).kind.clone();
    let is_ptr_ref_pair = matches!((&target_kind, &value_kind),
      (TypeKind::Pointer(a), TypeKind::Reference(b)) | (TypeKind::Reference(a), TypeKind::Pointer(b)) if a == b);
    if is_ptr_ref_pair {
      if !self.in_unsafe_context() {
        self.errors.add_simple_error(ErrorClass::Lowering, source_ref.clone(), "unsafe conversion outside unsafe block", "implicit pointer<->reference conversion requires an unsafe block");
        return None;
      }
      return Some(value.tmp);
    }
    self.errors.add_simple_error(ErrorClass::Lowering, source_ref.clone(), "type mismatch", format!("expected '{}', found '{}'", self.types.get(target).canonical_name, self.types.get(value.ty).canonical_name));
    None
  }

  fn lower_assign(&mut self, lhs: &ast::Expr, rhs: &ast::Expr, source_ref: &SourceRef) -> Option<Value> {
    let lv = self.lower_expr(lhs, None)?;
    if !lv.is_lvalue {
      self.errors.add_simple_error(ErrorClass::Lowering, lhs.source_ref().clone(), "assignment to rvalue", "the left side of '=' must be an lvalue");
      return None;
    }
    let rv = self.lower_expr(rhs, Some(lv.ty))?;
    let rhs_tmp = self.coerce_for_assign(rv, lv.ty, source_ref)?;
    let tmp = self.emit(Opcode::Assign, smallvec![lv.tmp, rhs_tmp], Some(lv.ty), OpExtra::None, source_ref.clone())?;
    Some(Value { tmp, ty: lv.ty, is_lvalue: false })
  }

  fn lower_call(&mut self, callee: &ast::Expr, args: &[ast::Expr], source_ref: &SourceRef) -> Option<Value> {
    if let ast::Expr::Dot { object, member, .. } = callee {
      return self.lower_method_call(object, member, args, source_ref);
    }
    let ast::Expr::Name { path, absolute: false, .. } = callee else {
      self.errors.add_simple_error(ErrorClass::Lowering, callee.source_ref().clone(), "not callable", "this expression cannot be called");
      return None;
    };
    let joined = path.join("::");
    let Some(sym) = self.globals.get(&joined).cloned() else {
      self.errors.add_simple_error(ErrorClass::Lowering, callee.source_ref().clone(), "undefined function", format!("'{joined}' is not declared"));
      return None;
    };
    let TypeKind::FunctionPointer { ret, args: param_tys } = self.types.get(sym.ty).kind.clone() else {
      self.errors.add_simple_error(ErrorClass::Lowering, callee.source_ref().clone(), "not callable", format!("'{joined}' is not a function"));
      return None;
    };
    let mut operands = smallvec::SmallVec::new();
    self.lower_call_args(args, &param_tys, source_ref, &mut operands)?;
    let tmp = self.emit(Opcode::FunctionCall, operands, Some(ret), OpExtra::Name(intern(&joined)), source_ref.clone())?;
    Some(Value { tmp, ty: ret, is_lvalue: false })
  }

  fn lower_method_call(&mut self, object: &ast::Expr, member: &str, args: &[ast::Expr], source_ref: &SourceRef) -> Option<Value> {
    let obj = self.lower_expr(object, None)?;
    let class_ty = match self.types.get(obj.ty).kind.clone() {
      TypeKind::Composite(_) => obj.ty,
      TypeKind::Pointer(inner) | TypeKind::Reference(inner) if matches!(self.types.get(inner).kind, TypeKind::Composite(_)) => inner,
      _ => {
        self.errors.add_simple_error(ErrorClass::Lowering, object.source_ref().clone(), "not a class", "method call receiver is not a class, pointer-to-class, or reference-to-class");
        return None;
      }
    };
    let TypeKind::Composite(data) = self.types.get(class_ty).kind.clone() else { unreachable!() };
    let Some(sig) = data.methods.get(&intern(member)).cloned() else {
      self.errors.add_simple_error(ErrorClass::Lowering, source_ref.clone(), "unknown method", format!("'{}' has no method '{member}'", self.types.get(class_ty).canonical_name));
      return None;
    };

    // Implicit address-of the receiver to get the `this: C*` argument;
    // this does not require `unsafe` (method dispatch, not a raw cast).
    let this_ptr_ty = self.types.get_pointer_to(class_ty, source_ref.clone());
    let receiver_tmp = match self.types.get(obj.ty).kind {
      TypeKind::Pointer(_) => obj.tmp,
      _ => self.emit_lvalue(Opcode::AddressOf, smallvec![obj.tmp], this_ptr_ty, OpExtra::None, source_ref.clone()),
    };

    let mut operands: smallvec::SmallVec<[TmpId; 4]> = smallvec![receiver_tmp];
    let param_tys: Vec<TypeId> = sig.args.iter().skip(1).copied().collect();
    self.lower_call_args(args, &param_tys, source_ref, &mut operands)?;
    let ret = sig.return_type;
    let tmp = self.emit(Opcode::FunctionCall, operands, Some(ret), OpExtra::Name(intern(&sig.mangled_name)), source_ref.clone())?;
    Some(Value { tmp, ty: ret, is_lvalue: false })
  }

  fn lower_call_args(&mut self, args: &[ast::Expr], param_tys: &[TypeId], source_ref: &SourceRef, operands: &mut smallvec::SmallVec<[TmpId; 4]>) -> Option<()> {
    if args.len() != param_tys.len() {
      self.errors.add_simple_error(ErrorClass::Lowering, source_ref.clone(), "argument count mismatch", format!("expected {} arguments, found {}", param_tys.len(), args.len()));
      return None;
    }
    for (arg, &want) in args.iter().zip(param_tys) {
      let v = self.lower_expr(arg, Some(want))?;
      let coerced = self.coerce_for_assign(v, want, source_ref)?;
      operands.push(coerced);
    }
    Some(())
  }

  fn lower_index(&mut self, array: &ast::Expr, index: &ast::Expr, source_ref: &SourceRef) -> Option<Value> {
    let a = self.lower_expr(array, None)?;
    let i = self.lower_expr(index, None)?;
    let TypeKind::Array(elem_ty, _) = self.types.get(a.ty).kind else {
      self.errors.add_simple_error(ErrorClass::Lowering, array.source_ref().clone(), "not an array", format!("'{}' is not an array type", self.types.get(a.ty).canonical_name));
      return None;
    };
    let tmp = self.emit_lvalue(Opcode::ArrayIndex, smallvec![a.tmp, i.tmp], elem_ty, OpExtra::None, source_ref.clone());
    Some(Value { tmp, ty: elem_ty, is_lvalue: true })
  }

  fn lower_dot(&mut self, object: &ast::Expr, member: &str, source_ref: &SourceRef) -> Option<Value> {
    let obj = self.lower_expr(object, None)?;
    let TypeKind::Composite(data) = self.types.get(obj.ty).kind.clone() else {
      self.errors.add_simple_error(ErrorClass::Lowering, object.source_ref().clone(), "not a class", format!("'{}' is not a class type", self.types.get(obj.ty).canonical_name));
      return None;
    };
    let Some(&idx) = data.member_index.get(&intern(member)) else {
      self.errors.add_simple_error(ErrorClass::Lowering, source_ref.clone(), "unknown member", format!("'{}' has no member '{member}'", self.types.get(obj.ty).canonical_name));
      return None;
    };
    let member_ty = data.members[idx].ty;
    let is_lvalue = obj.is_lvalue;
    let tmp = self.emit_lvalue(Opcode::Dot, smallvec![obj.tmp], member_ty, OpExtra::Name(intern(member)), source_ref.clone());
    Some(Value { tmp, ty: member_ty, is_lvalue })
  }

  /// `addressof` always computes `lvalue -> T*`;
  /// using that pointer outside `unsafe` is disallowed *unless* the
  /// surrounding context expects a reference (`expected` is `T&`), in
  /// which case the address is only ever observed as a reference and no
  /// raw pointer is exposed to safe code.
  fn lower_address_of(&mut self, operand: &ast::Expr, expected: Option<TypeId>, source_ref: &SourceRef) -> Option<Value> {
    let v = self.lower_expr(operand, None)?;
    if !v.is_lvalue {
      self.errors.add_simple_error(ErrorClass::Lowering, operand.source_ref().clone(), "address of rvalue", "cannot take the address of a temporary");
      return None;
    }
    let wants_reference = expected.is_some_and(|e| matches!(self.types.get(e).kind, TypeKind::Reference(t) if t == v.ty));
    if wants_reference {
      let ref_ty = self.types.get_reference_to(v.ty, source_ref.clone());
      let tmp = self.emit_lvalue(Opcode::AddressOf, smallvec![v.tmp], ref_ty, OpExtra::None, source_ref.clone());
      return Some(Value { tmp, ty: ref_ty, is_lvalue: true });
    }
    if !self.in_unsafe_context() {
      self.errors.add_simple_error(ErrorClass::Lowering, source_ref.clone(), "unsafe operation outside unsafe block", "taking the address of a value to form a raw pointer requires an unsafe block");
      return None;
    }
    let ptr_ty = self.types.get_pointer_to(v.ty, source_ref.clone());
    let tmp = self.emit_lvalue(Opcode::AddressOf, smallvec![v.tmp], ptr_ty, OpExtra::None, source_ref.clone());
    Some(Value { tmp, ty: ptr_ty, is_lvalue: true })
  }

  fn lower_deref(&mut self, operand: &ast::Expr, source_ref: &SourceRef) -> Option<Value> {
    let v = self.lower_expr(operand, None)?;
    let target = match self.types.get(v.ty).kind {
      TypeKind::Reference(t) => t,
      TypeKind::Pointer(t) => {
        if !self.in_unsafe_context() {
          self.errors.add_simple_error(ErrorClass::Lowering, source_ref.clone(), "unsafe operation outside unsafe block", "dereferencing a raw pointer requires an unsafe block");
          return None;
        }
        t
      }
      _ => {
        self.errors.add_simple_error(ErrorClass::Lowering, operand.source_ref().clone(), "not a pointer or reference", format!("cannot dereference '{}'", self.types.get(v.ty).canonical_name));
        return None;
      }
    };
    let tmp = self.emit_lvalue(Opcode::Dereference, smallvec![v.tmp], target, OpExtra::None, source_ref.clone());
    Some(Value { tmp, ty: target, is_lvalue: true })
  }

  fn lower_sizeof(&mut self, ty: &ast::TypeSpec, source_ref: &SourceRef) -> Option<Value> {
    let target = TypeResolver::new(self.ns, self.types, self.errors).resolve_type_spec(ty)?;
    let result_ty = self.types.primitive(PrimitiveKind::U64);
    let tmp = self.emit(Opcode::SizeofType, smallvec![], Some(result_ty), OpExtra::Type(target), source_ref.clone())?;
    Some(Value { tmp, ty: result_ty, is_lvalue: false })
  }

  fn finish(mut self) -> Option<Function> {
    let fixups = self.scope.check_gotos(self.errors);
    for fixup in fixups {
      let mut teardown_tmps = Vec::new();
      for scope_id in &fixup.teardown {
        if let Some(decls) = self.scope_locals.get(scope_id) {
          teardown_tmps.extend(decls.iter().rev().copied());
        }
      }
      for &(sym, tmp) in &teardown_tmps {
        let op = Operation { opcode: Opcode::LocalUndeclare, operands: smallvec![tmp], result: None, result_ty: None, extra: OpExtra::Name(sym), source_ref: self.func.source_ref.clone() };
        self.func.insert_before_terminator(fixup.goto_point.block, op);
      }
    }
    // Patch every `goto`'s placeholder jump target to the label's block.
    let pending = std::mem::take(&mut self.pending_gotos);
    for (label, placeholder) in pending {
      let Some(point) = self.scope.query_label(&label) else { continue };
      self.retarget_jump(placeholder, point.block);
    }
    if self.errors.has_errors() { return None }
    Some(self.func)
  }

  fn retarget_jump(&mut self, from_placeholder: BlockId, real_target: BlockId) {
    for block in self.func.block_ids() {
      let bb = self.func.blocks.get_mut(&block).expect("block exists");
      for op in &mut bb.operations {
        if let OpExtra::Jump(t) = &mut op.extra {
          if *t == from_placeholder { *t = real_target; }
        }
      }
    }
  }
}
