//! Namespace / symbol resolution.
//!
//! The parser consults [`NamespaceResolver::lookup`] on every identifier
//! token to disambiguate `TYPE_NAME` from `IDENTIFIER` (the classic
//! C-family parsing ambiguity); on reduction of a declaration it calls
//! back in with `declare_*`.

use hashbrown::HashMap;
use crate::diag::{Errors, ErrorClass, SourceRef};
use crate::symbol::{intern, Symbol};

/// What kind of thing a namespace entity names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
  Identifier,
  Type,
  Class,
  Namespace,
  Label,
}

/// Visibility, ordered from least to most restrictive. [`Namespace`]'s
/// `effective_visibility` takes the *maximum* (most restrictive) of this
/// ordering over the chain from an entity to the root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Visibility {
  Public,
  Protected,
  Private,
}

/// Dense handle into [`NamespaceResolver`]'s entity arena. Stable for the
/// life of the compilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityId(u32);

#[derive(Debug)]
struct Entity {
  name: Symbol,
  kind: EntityKind,
  parent: Option<EntityId>,
  visibility: Visibility,
  source_ref: SourceRef,
  children: HashMap<Symbol, EntityId>,
}

/// The result of a name lookup, handed back to the lexer/parser to pick a
/// token class and to the type resolver for entity introspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
  Found(EntityId),
  NotFound,
  NotFoundPrivate,
  NotFoundProtected,
}

/// A scope's `using namespace X [as Y]` search path, plus the namespace
/// entity the scope itself denotes.
struct ScopeFrame {
  namespace: EntityId,
  /// `(alias, target)` pairs in insertion order; alias strings are unique
  /// within a scope (enforced by [`NamespaceResolver::add_using`]).
  search_path: Vec<(Symbol, EntityId)>,
}

/// Owns the whole-program tree of namespace entities plus the stack of
/// scopes the parser is currently nested in.
pub struct NamespaceResolver {
  entities: Vec<Entity>,
  root: EntityId,
  stack: Vec<ScopeFrame>,
}

const PRIMITIVE_TYPES: &[&str] = &[
  "u8", "u16", "u32", "u64", "i8", "i16", "i32", "i64", "f32", "f64", "bool", "void",
];

impl NamespaceResolver {
  #[must_use] pub fn new() -> Self {
    let root_ref = SourceRef::new(std::rc::Rc::from("<builtin>"), 0, 0, 0);
    let root_entity = Entity {
      name: intern(""),
      kind: EntityKind::Namespace,
      parent: None,
      visibility: Visibility::Public,
      source_ref: root_ref.clone(),
      children: HashMap::new(),
    };
    let mut this = Self { entities: vec![root_entity], root: EntityId(0), stack: vec![ScopeFrame { namespace: EntityId(0), search_path: Vec::new() }] };
    for name in PRIMITIVE_TYPES {
      let _ = this.declare(EntityId(0), name, EntityKind::Type, Visibility::Public, root_ref.clone(), &mut Errors::new());
    }
    this
  }

  #[must_use] pub fn root(&self) -> EntityId { self.root }

  fn entity(&self, id: EntityId) -> &Entity { &self.entities[id.0 as usize] }

  #[must_use] pub fn kind(&self, id: EntityId) -> EntityKind { self.entity(id).kind }
  #[must_use] pub fn name(&self, id: EntityId) -> Symbol { self.entity(id).name }
  #[must_use] pub fn parent(&self, id: EntityId) -> Option<EntityId> { self.entity(id).parent }
  #[must_use] pub fn source_ref(&self, id: EntityId) -> &SourceRef { &self.entity(id).source_ref }

  /// Walk to the root, joining component names with `::`. The root's own
  /// name is empty, so its fully-qualified name is `""`.
  #[must_use] pub fn fully_qualified_name(&self, id: EntityId) -> String {
    let mut parts = Vec::new();
    let mut cur = Some(id);
    while let Some(c) = cur {
      if c == self.root { break }
      parts.push(self.entity(c).name.as_string());
      cur = self.entity(c).parent;
    }
    parts.reverse();
    parts.join("::")
  }

  /// Most restrictive visibility on the chain from `id` up to the root.
  #[must_use] pub fn effective_visibility(&self, id: EntityId) -> Visibility {
    let mut cur = Some(id);
    let mut worst = Visibility::Public;
    while let Some(c) = cur {
      worst = worst.max(self.entity(c).visibility);
      cur = self.entity(c).parent;
    }
    worst
  }

  fn declare(&mut self, parent: EntityId, name: &str, kind: EntityKind, visibility: Visibility, source_ref: SourceRef, errors: &mut Errors) -> Option<EntityId> {
    let sym = intern(name);
    if let Some(&existing) = self.entity(parent).children.get(&sym) {
      let existing_ref = self.entity(existing).source_ref.clone();
      errors.add_error(
        crate::diag::Error::new(ErrorClass::Lowering, format!("redeclaration of '{name}'"))
          .with_message(source_ref, "second declaration here")
          .with_message(existing_ref, "first declared here"),
      );
      return None;
    }
    let id = EntityId(self.entities.len().try_into().expect("too many namespace entities"));
    self.entities.push(Entity { name: sym, kind, parent: Some(parent), visibility, source_ref, children: HashMap::new() });
    self.entities[parent.0 as usize].children.insert(sym, id);
    Some(id)
  }

  fn current(&self) -> EntityId { self.stack.last().expect("scope stack never empty").namespace }

  pub fn declare_namespace(&mut self, name: &str, source_ref: SourceRef, errors: &mut Errors) -> Option<EntityId> {
    let parent = self.current();
    self.declare(parent, name, EntityKind::Namespace, Visibility::Public, source_ref, errors)
  }

  pub fn declare_type(&mut self, name: &str, visibility: Visibility, source_ref: SourceRef, errors: &mut Errors) -> Option<EntityId> {
    let parent = self.current();
    self.declare(parent, name, EntityKind::Type, visibility, source_ref, errors)
  }

  pub fn declare_class(&mut self, name: &str, visibility: Visibility, source_ref: SourceRef, errors: &mut Errors) -> Option<EntityId> {
    let parent = self.current();
    self.declare(parent, name, EntityKind::Class, visibility, source_ref, errors)
  }

  pub fn declare_identifier(&mut self, name: &str, visibility: Visibility, source_ref: SourceRef, errors: &mut Errors) -> Option<EntityId> {
    let parent = self.current();
    self.declare(parent, name, EntityKind::Identifier, visibility, source_ref, errors)
  }

  /// Enter the scope of an already-declared namespace-or-class entity
  /// (e.g. on reducing `namespace Foo { ... }` or a class body).
  pub fn push_namespace(&mut self, id: EntityId) {
    self.stack.push(ScopeFrame { namespace: id, search_path: Vec::new() });
  }

  pub fn pop_namespace(&mut self) {
    assert!(self.stack.len() > 1, "cannot pop the root scope");
    self.stack.pop();
  }

  /// `using namespace target [as alias]`. Errors if `alias` is already
  /// used in the current scope.
  pub fn add_using(&mut self, alias: &str, target: EntityId, source_ref: SourceRef, errors: &mut Errors) {
    let sym = intern(alias);
    let frame = self.stack.last_mut().expect("scope stack never empty");
    if frame.search_path.iter().any(|&(a, _)| a == sym) {
      errors.add_simple_error(ErrorClass::Lowering, source_ref, "duplicate using-alias", format!("alias '{alias}' is already in use in this scope"));
      return;
    }
    frame.search_path.push((sym, target));
  }

  /// Walk `components` as a chain of child lookups starting at `start`.
  /// Returns the final entity only if every component matched.
  fn walk_children(&self, start: EntityId, components: &[Symbol]) -> Option<EntityId> {
    let mut cur = start;
    for &c in components {
      cur = *self.entity(cur).children.get(&c)?;
    }
    Some(cur)
  }

  fn find_by_name(&self, components: &[Symbol], absolute: bool) -> Option<EntityId> {
    if absolute {
      return self.walk_children(self.root, components);
    }
    let (&first, rest) = components.split_first()?;
    for frame in self.stack.iter().rev() {
      if let Some(found) = self.walk_children(frame.namespace, components) {
        return Some(found);
      }
      for &(alias, target) in &frame.search_path {
        if alias == first {
          let found = if rest.is_empty() { Some(target) } else { self.walk_children(target, rest) };
          if let Some(found) = found { return Some(found) }
        }
      }
    }
    None
  }

  /// Resolve `A::B::C`-style qualified names. `absolute` is true when the
  /// name began with a leading `::`.
  #[must_use] pub fn lookup(&self, components: &[&str], absolute: bool) -> Resolution {
    let syms: Vec<Symbol> = components.iter().map(|c| intern(c)).collect();
    let Some(found) = self.find_by_name(&syms, absolute) else { return Resolution::NotFound };
    match self.effective_visibility(found) {
      Visibility::Public => Resolution::Found(found),
      Visibility::Protected => {
        let parent = self.entity(found).parent.expect("non-root entity has a parent");
        let found_scope = self.fully_qualified_name(parent);
        let search_scope = self.fully_qualified_name(self.current());
        if search_scope == found_scope || search_scope.starts_with(&format!("{found_scope}::")) {
          Resolution::Found(found)
        } else {
          Resolution::NotFoundProtected
        }
      }
      Visibility::Private => {
        let parent = self.entity(found).parent.expect("non-root entity has a parent");
        if self.fully_qualified_name(self.current()) == self.fully_qualified_name(parent) {
          Resolution::Found(found)
        } else {
          Resolution::NotFoundPrivate
        }
      }
    }
  }
}

impl Default for NamespaceResolver {
  fn default() -> Self { Self::new() }
}

#[cfg(test)]
mod test {
  use super::*;

  fn sref() -> SourceRef { SourceRef::new(std::rc::Rc::from("t.j"), 1, 0, 0) }

  #[test]
  fn builtin_primitives_resolve() {
    let ns = NamespaceResolver::new();
    assert!(matches!(ns.lookup(&["u32"], false), Resolution::Found(_)));
    assert!(matches!(ns.lookup(&["nonexistent"], false), Resolution::NotFound));
  }

  #[test]
  fn nested_namespace_resolves_qualified() {
    let mut ns = NamespaceResolver::new();
    let mut errors = Errors::new();
    let foo = ns.declare_namespace("Foo", sref(), &mut errors).unwrap();
    ns.push_namespace(foo);
    ns.declare_type("Bar", Visibility::Public, sref(), &mut errors).unwrap();
    ns.pop_namespace();
    assert!(!errors.has_errors());
    assert!(matches!(ns.lookup(&["Foo", "Bar"], false), Resolution::Found(_)));
    assert!(matches!(ns.lookup(&["Foo", "Bar"], true), Resolution::Found(_)));
  }

  #[test]
  fn using_alias_shortens_lookup() {
    let mut ns = NamespaceResolver::new();
    let mut errors = Errors::new();
    let foo = ns.declare_namespace("Foo", sref(), &mut errors).unwrap();
    ns.push_namespace(foo);
    ns.declare_type("Bar", Visibility::Public, sref(), &mut errors).unwrap();
    ns.pop_namespace();
    ns.add_using("Foo", foo, sref(), &mut errors);
    assert!(matches!(ns.lookup(&["Foo", "Bar"], false), Resolution::Found(_)));
  }

  #[test]
  fn private_entity_invisible_outside_its_scope() {
    let mut ns = NamespaceResolver::new();
    let mut errors = Errors::new();
    let foo = ns.declare_namespace("Foo", sref(), &mut errors).unwrap();
    ns.push_namespace(foo);
    ns.declare_type("Secret", Visibility::Private, sref(), &mut errors).unwrap();
    ns.pop_namespace();
    assert!(matches!(ns.lookup(&["Foo", "Secret"], false), Resolution::NotFoundPrivate));
  }

  #[test]
  fn duplicate_declaration_is_an_error() {
    let mut ns = NamespaceResolver::new();
    let mut errors = Errors::new();
    ns.declare_type("Dup", Visibility::Public, sref(), &mut errors);
    ns.declare_type("Dup", Visibility::Public, sref(), &mut errors);
    assert!(errors.has_errors());
  }
}
