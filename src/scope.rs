//! Per-function lexical scope tracking: variable declarations, labels,
//! gotos, and the legality check that ties them together.
//!
//! A `goto` may only jump to a label whose enclosing scopes are all
//! ancestors of the scope the `goto` sits in — jumping into the middle of
//! a still-unentered scope (skipping its variable declarations) is
//! rejected, and every scope the jump leaves behind is torn down in order.

use hashbrown::HashMap;
use crate::diag::{Errors, ErrorClass, SourceRef};
use crate::mir::{BlockId, FunctionPoint};
use crate::symbol::Symbol;
use crate::types::TypeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(u32);

#[derive(Debug, Clone)]
enum ScopeOp {
  VarDecl(Symbol),
  Label(Symbol),
  Goto { label: Symbol, point: FunctionPoint, source_ref: SourceRef },
  ChildScope(ScopeId),
}

#[derive(Debug)]
struct ScopeData {
  parent: Option<ScopeId>,
  is_loop: bool,
  loop_break: Option<BlockId>,
  loop_continue: Option<BlockId>,
  explicit_unsafe: bool,
  operations: Vec<ScopeOp>,
  variables: HashMap<Symbol, (TypeId, SourceRef)>,
}

/// One fix-up the lowering pass must apply after the whole function has
/// been built: at `goto_point`, insert `local_undeclare` for every
/// variable declared in each scope named in `teardown` (innermost scope
/// first, each scope's own variables in reverse declaration order)
/// ahead of the `jump`. Scopes, not symbols, so the lowerer can map back
/// to the exact temporary each declaration produced even under shadowing.
#[derive(Debug, Clone)]
pub struct GotoFixup {
  pub goto_point: FunctionPoint,
  pub teardown: Vec<ScopeId>,
}

pub struct ScopeTracker {
  scopes: Vec<ScopeData>,
  stack: Vec<ScopeId>,
  root: ScopeId,
  /// Flat map of every label declared so far, by name, to its function
  /// point and owning scope — used both for immediate duplicate-label
  /// detection and by the post-hoc legality check.
  labels: HashMap<Symbol, (FunctionPoint, ScopeId)>,
}

impl ScopeTracker {
  #[must_use] pub fn new() -> Self {
    let root = ScopeData {
      parent: None, is_loop: false, loop_break: None, loop_continue: None,
      explicit_unsafe: false, operations: Vec::new(), variables: HashMap::new(),
    };
    Self { scopes: vec![root], stack: vec![ScopeId(0)], root: ScopeId(0), labels: HashMap::new() }
  }

  fn current(&self) -> ScopeId { *self.stack.last().expect("scope stack never empty") }
  #[must_use] pub fn current_id(&self) -> ScopeId { self.current() }
  fn data(&self, id: ScopeId) -> &ScopeData { &self.scopes[id.0 as usize] }

  pub fn scope_push(&mut self, is_unsafe: bool) -> ScopeId {
    let parent = self.current();
    let id = ScopeId(self.scopes.len().try_into().expect("too many scopes"));
    self.scopes.push(ScopeData { parent: Some(parent), is_loop: false, loop_break: None, loop_continue: None, explicit_unsafe: is_unsafe, operations: Vec::new(), variables: HashMap::new() });
    self.stack.push(id);
    id
  }

  pub fn scope_push_loop(&mut self, break_block: BlockId, continue_block: BlockId) -> ScopeId {
    let parent = self.current();
    let id = ScopeId(self.scopes.len().try_into().expect("too many scopes"));
    self.scopes.push(ScopeData { parent: Some(parent), is_loop: true, loop_break: Some(break_block), loop_continue: Some(continue_block), explicit_unsafe: false, operations: Vec::new(), variables: HashMap::new() });
    self.stack.push(id);
    id
  }

  /// Pop the current scope, recording it as a `child_scope` operation in
  /// its parent (preserving source order for the flatten step).
  pub fn scope_pop(&mut self) -> ScopeId {
    assert!(self.stack.len() > 1, "cannot pop the root scope");
    let id = self.stack.pop().expect("checked above");
    let parent = self.data(id).parent.expect("non-root scope has a parent");
    self.scopes[parent.0 as usize].operations.push(ScopeOp::ChildScope(id));
    id
  }

  pub fn declare_variable(&mut self, name: &str, ty: TypeId, source_ref: SourceRef, errors: &mut Errors) -> bool {
    let sym = crate::symbol::intern(name);
    let cur = self.current();
    if let Some((_, existing_ref)) = self.scopes[cur.0 as usize].variables.get(&sym) {
      errors.add_error(
        crate::diag::Error::new(ErrorClass::Lowering, format!("redeclaration of variable '{name}'"))
          .with_message(source_ref, "second declaration here")
          .with_message(existing_ref.clone(), "first declared here"),
      );
      return false;
    }
    self.scopes[cur.0 as usize].variables.insert(sym, (ty, source_ref));
    self.scopes[cur.0 as usize].operations.push(ScopeOp::VarDecl(sym));
    true
  }

  pub fn declare_label(&mut self, name: &str, point: FunctionPoint, source_ref: SourceRef, errors: &mut Errors) -> bool {
    let sym = crate::symbol::intern(name);
    if let Some((existing_point, _)) = self.labels.get(&sym) {
      let _ = existing_point;
      errors.add_simple_error(ErrorClass::Lowering, source_ref, "duplicate label", format!("label '{name}' is already defined in this function"));
      return false;
    }
    let cur = self.current();
    self.scopes[cur.0 as usize].operations.push(ScopeOp::Label(sym));
    self.labels.insert(sym, (point, cur));
    true
  }

  pub fn declare_goto(&mut self, label: &str, point: FunctionPoint, source_ref: SourceRef) {
    let sym = crate::symbol::intern(label);
    let cur = self.current();
    self.scopes[cur.0 as usize].operations.push(ScopeOp::Goto { label: sym, point, source_ref });
  }

  #[must_use] pub fn query_variable(&self, name: &str) -> Option<(TypeId, SourceRef)> {
    let sym = crate::symbol::intern(name);
    let mut cur = Some(self.current());
    while let Some(id) = cur {
      if let Some((ty, sref)) = self.data(id).variables.get(&sym) {
        return Some((*ty, sref.clone()));
      }
      cur = self.data(id).parent;
    }
    None
  }

  #[must_use] pub fn query_label(&self, name: &str) -> Option<FunctionPoint> {
    self.labels.get(&crate::symbol::intern(name)).map(|(p, _)| *p)
  }

  #[must_use] pub fn is_unsafe(&self) -> bool {
    let mut cur = Some(self.current());
    while let Some(id) = cur {
      if self.data(id).explicit_unsafe { return true }
      cur = self.data(id).parent;
    }
    false
  }

  /// Number of scopes from the current one (inclusive) up to and
  /// including the nearest enclosing loop scope — the set of scopes a
  /// `break`/`continue` tears down (the loop's own body scope included,
  /// since the next iteration re-enters it fresh).
  #[must_use] pub fn depth_to_enclosing_loop(&self) -> Option<usize> {
    let mut n = 0;
    let mut cur = Some(self.current());
    while let Some(id) = cur {
      n += 1;
      if self.data(id).is_loop { return Some(n) }
      cur = self.data(id).parent;
    }
    None
  }

  /// Number of scopes from the current one (inclusive) up to the root
  /// (inclusive) — the set of scopes a `return` tears down.
  #[must_use] pub fn depth_to_root(&self) -> usize {
    let mut n = 0;
    let mut cur = Some(self.current());
    while let Some(id) = cur {
      n += 1;
      cur = self.data(id).parent;
    }
    n
  }

  #[must_use] pub fn is_in_loop(&self) -> bool { self.enclosing_loop().is_some() }

  /// Nearest enclosing loop's `(break_block, continue_block)`.
  #[must_use] pub fn enclosing_loop(&self) -> Option<(BlockId, BlockId)> {
    let mut cur = Some(self.current());
    while let Some(id) = cur {
      let d = self.data(id);
      if d.is_loop { return Some((d.loop_break.expect("loop scope has a break block"), d.loop_continue.expect("loop scope has a continue block"))) }
      cur = d.parent;
    }
    None
  }

  /// Is `ancestor` the same scope as `id`, or one of its ancestors?
  fn encloses(&self, ancestor: ScopeId, id: ScopeId) -> bool {
    let mut cur = Some(id);
    while let Some(c) = cur {
      if c == ancestor { return true }
      cur = self.data(c).parent;
    }
    false
  }

  /// One item of §4.3's flattened, source-order view of the whole
  /// function: every declaration, label, and goto, in the order the
  /// lowerer visited them, regardless of which scope nests which. A tree
  /// walk over ancestor scopes cannot see a declaration that shares the
  /// goto's own scope, so the legality check needs this flat index
  /// instead (§9's "scope tracker as flattened array" design note).
  fn flatten(&self) -> Vec<FlatItem> {
    let mut out = Vec::new();
    self.flatten_into(self.root, &mut out);
    out
  }

  fn flatten_into(&self, scope: ScopeId, out: &mut Vec<FlatItem>) {
    for op in &self.data(scope).operations {
      match op {
        ScopeOp::VarDecl(sym) => out.push(FlatItem::VarDecl(scope, *sym)),
        ScopeOp::Label(sym) => out.push(FlatItem::Label(*sym)),
        ScopeOp::Goto { label, point, source_ref } => out.push(FlatItem::Goto(scope, *label, *point, source_ref.clone())),
        ScopeOp::ChildScope(child) => self.flatten_into(*child, out),
      }
    }
  }

  /// For every `goto`, check legality against the set of variables live at
  /// its target label, and compute the teardown list. Run once after the
  /// whole function has been lowered.
  pub fn check_gotos(&self, errors: &mut Errors) -> Vec<GotoFixup> {
    let flat = self.flatten();
    let label_index: HashMap<Symbol, usize> = flat
      .iter()
      .enumerate()
      .filter_map(|(i, item)| match item {
        FlatItem::Label(sym) => Some((*sym, i)),
        _ => None,
      })
      .collect();

    let mut fixups = Vec::new();
    for (i, item) in flat.iter().enumerate() {
      if let FlatItem::Goto(goto_scope, label, point, source_ref) = item {
        self.check_one_goto(*label, *point, source_ref, *goto_scope, i, &flat, &label_index, errors, &mut fixups);
      }
    }
    fixups
  }

  #[allow(clippy::too_many_arguments)]
  fn check_one_goto(
    &self,
    label: Symbol,
    goto_point: FunctionPoint,
    source_ref: &SourceRef,
    goto_scope: ScopeId,
    goto_index: usize,
    flat: &[FlatItem],
    label_index: &HashMap<Symbol, usize>,
    errors: &mut Errors,
    fixups: &mut Vec<GotoFixup>,
  ) {
    let Some(&(_label_point, label_scope)) = self.labels.get(&label) else {
      errors.add_simple_error(ErrorClass::Lowering, source_ref.clone(), "goto to undefined label", format!("no label named '{}' in this function", label.as_string()));
      return;
    };
    let label_idx = label_index[&label];

    // A forward goto (label comes later in flat order) is illegal iff a
    // declaration sits strictly between it and the label, in any scope —
    // reaching the label via the jump would skip that initialization. A
    // backward goto never skips a declaration this way: every
    // declaration between the label and the goto already ran the first
    // time control passed through it; those variables are handled by
    // teardown below, not a legality error.
    if goto_index < label_idx {
      for item in &flat[goto_index + 1..label_idx] {
        if let FlatItem::VarDecl(decl_scope, sym) = item {
          let var_ref = self.data(*decl_scope).variables[sym].1.clone();
          errors.add_error(
            crate::diag::Error::new(ErrorClass::Lowering, format!("goto skips declaration of '{}'", sym.as_string()))
              .with_message(source_ref.clone(), "goto here")
              .with_message(var_ref, "would skip this declaration"),
          );
          return;
        }
      }
    }

    // Teardown: scopes the goto leaves (ancestors of goto_scope, up to
    // but not including the first one that also encloses the label),
    // innermost first.
    let mut teardown = Vec::new();
    let mut cur = Some(goto_scope);
    while let Some(id) = cur {
      if self.encloses(id, label_scope) { break }
      teardown.push(id);
      cur = self.data(id).parent;
    }
    fixups.push(GotoFixup { goto_point, teardown });
  }
}

/// See `ScopeTracker::flatten`.
enum FlatItem {
  VarDecl(ScopeId, Symbol),
  Label(Symbol),
  Goto(ScopeId, Symbol, FunctionPoint, SourceRef),
}

impl Default for ScopeTracker {
  fn default() -> Self { Self::new() }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::types::{TypeTable, PrimitiveKind};

  fn sref(line: u32) -> SourceRef { SourceRef::new(std::rc::Rc::from("t.j"), line, 0, 0) }
  fn pt(block: u32, idx: usize) -> FunctionPoint { FunctionPoint { block: BlockId(block), index: idx } }

  #[test]
  fn goto_within_same_scope_skipping_nothing_is_legal() {
    let mut t = TypeTable::new();
    t.seed_primitives(&sref(0));
    let u32t = t.primitive(PrimitiveKind::U32);
    let mut tracker = ScopeTracker::new();
    let mut errors = Errors::new();
    tracker.declare_goto("L", pt(0, 0), sref(1));
    tracker.declare_label("L", pt(0, 1), sref(2), &mut errors);
    let _ = u32t;
    let fixups = tracker.check_gotos(&mut errors);
    assert!(!errors.has_errors());
    assert_eq!(fixups.len(), 1);
    assert!(fixups[0].teardown.is_empty());
  }

  #[test]
  fn goto_skipping_a_live_declaration_is_illegal() {
    let mut t = TypeTable::new();
    t.seed_primitives(&sref(0));
    let u32t = t.primitive(PrimitiveKind::U32);
    let mut tracker = ScopeTracker::new();
    let mut errors = Errors::new();
    tracker.declare_goto("L", pt(0, 0), sref(1));
    tracker.declare_variable("x", u32t, sref(2), &mut errors);
    tracker.declare_label("L", pt(0, 2), sref(3), &mut errors);
    tracker.check_gotos(&mut errors);
    assert!(errors.has_errors());
  }

  #[test]
  fn goto_leaving_a_child_scope_tears_down_its_variables() {
    let mut t = TypeTable::new();
    t.seed_primitives(&sref(0));
    let u32t = t.primitive(PrimitiveKind::U32);
    let mut tracker = ScopeTracker::new();
    let mut errors = Errors::new();
    tracker.declare_label("L", pt(0, 0), sref(1), &mut errors);
    tracker.scope_push(false);
    tracker.declare_variable("x", u32t, sref(2), &mut errors);
    tracker.declare_goto("L", pt(0, 3), sref(3));
    tracker.scope_pop();
    let fixups = tracker.check_gotos(&mut errors);
    assert!(!errors.has_errors());
    assert_eq!(fixups.len(), 1);
    assert_eq!(fixups[0].teardown.len(), 1);
  }

  #[test]
  fn goto_to_undefined_label_is_an_error() {
    let mut tracker = ScopeTracker::new();
    let mut errors = Errors::new();
    tracker.declare_goto("Nope", pt(0, 0), sref(1));
    tracker.check_gotos(&mut errors);
    assert!(errors.has_errors());
  }

  #[test]
  fn loop_scope_exposes_break_and_continue_blocks() {
    let mut tracker = ScopeTracker::new();
    assert!(!tracker.is_in_loop());
    tracker.scope_push_loop(BlockId(3), BlockId(4));
    assert!(tracker.is_in_loop());
    assert_eq!(tracker.enclosing_loop(), Some((BlockId(3), BlockId(4))));
  }
}
