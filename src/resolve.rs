//! Type resolution: walks the syntax tree's type specifiers and
//! top-level declarations, populating the [`NamespaceResolver`] and
//! [`TypeTable`] and collecting function signatures for lowering.

use hashbrown::HashMap;
use crate::ast;
use crate::diag::{Errors, ErrorClass, SourceRef};
use crate::literal::parse_literal_int;
use crate::namespace::{EntityKind, NamespaceResolver, Resolution, Visibility};
use crate::symbol::{intern, Symbol};
use crate::types::{CompositeData, EnumData, Member, MethodSig, PrimitiveKind, TypeId, TypeKind, TypeTable};

/// A function or method signature resolved and ready for lowering
/// (lowering consumes these one at a time). `receiver` is `Some` for methods, where
/// it names the owning class (the implicit leading `this: C*` argument
/// is *not* included in `params` — the lowerer adds it, mirroring
/// `extract_from_class_members`'s `this` handling).
pub struct ResolvedFunction {
  pub name: String,
  pub mangled_name: String,
  pub return_type: TypeId,
  pub params: Vec<(Symbol, TypeId)>,
  pub receiver: Option<TypeId>,
  pub is_unsafe: bool,
  pub source_ref: SourceRef,
  pub body: ast::Block,
}

#[derive(Default)]
pub struct ResolvedProgram {
  pub functions: Vec<ResolvedFunction>,
}

pub struct TypeResolver<'a> {
  ns: &'a mut NamespaceResolver,
  types: &'a mut TypeTable,
  errors: &'a mut Errors,
}

fn split_path(name: &str) -> (Vec<&str>, bool) {
  if let Some(rest) = name.strip_prefix("::") {
    (rest.split("::").collect(), true)
  } else {
    (name.split("::").collect(), false)
  }
}

impl<'a> TypeResolver<'a> {
  pub fn new(ns: &'a mut NamespaceResolver, types: &'a mut TypeTable, errors: &'a mut Errors) -> Self {
    Self { ns, types, errors }
  }

  /// `extract_from_type_specifier`: dispatch on the specifier's shape.
  pub fn resolve_type_spec(&mut self, spec: &ast::TypeSpec) -> Option<TypeId> {
    match spec {
      ast::TypeSpec::Simple(name, source_ref) => self.resolve_simple(name, source_ref),
      ast::TypeSpec::Template(name, _, source_ref) => {
        self.errors.add_simple_error(ErrorClass::Lowering, source_ref.clone(), "template instantiation not supported", format!("'{name}' names a template; this core does not instantiate templates"));
        None
      }
      ast::TypeSpec::PointerTo(inner, source_ref) => {
        let target = self.resolve_type_spec(inner)?;
        Some(self.types.get_pointer_to(target, source_ref.clone()))
      }
      ast::TypeSpec::ReferenceTo(inner, source_ref) => {
        let target = self.resolve_type_spec(inner)?;
        if matches!(self.types.get(target).kind, TypeKind::Reference(_)) {
          self.errors.add_simple_error(ErrorClass::Lowering, source_ref.clone(), "reference to reference", "a reference type may not itself target a reference");
          return None;
        }
        Some(self.types.get_reference_to(target, source_ref.clone()))
      }
      ast::TypeSpec::Array(inner, len_expr, source_ref) => {
        let target = self.resolve_type_spec(inner)?;
        let len = self.resolve_array_len(len_expr)?;
        if self.types.is_void(target) {
          self.errors.add_simple_error(ErrorClass::Lowering, source_ref.clone(), "array of void", "an array element type may not be 'void'");
          return None;
        }
        Some(self.types.get_array_of(target, len, source_ref.clone()))
      }
      ast::TypeSpec::FunctionPointer(ret, args, source_ref) => {
        let ret_ty = self.resolve_type_spec(ret)?;
        let mut arg_tys = Vec::with_capacity(args.len());
        for a in args {
          arg_tys.push(self.resolve_type_spec(a)?);
        }
        Some(self.types.get_function_pointer(ret_ty, arg_tys, source_ref.clone()))
      }
    }
  }

  fn resolve_simple(&mut self, name: &str, source_ref: &SourceRef) -> Option<TypeId> {
    let (path, absolute) = split_path(name);
    match self.ns.lookup(&path, absolute) {
      Resolution::Found(id) => {
        if !matches!(self.ns.kind(id), EntityKind::Type | EntityKind::Class) {
          self.errors.add_simple_error(ErrorClass::Lowering, source_ref.clone(), "not a type", format!("'{name}' does not name a type"));
          return None;
        }
        let fqn = self.ns.fully_qualified_name(id);
        match self.types.get_type(&fqn) {
          Some(ty) => Some(ty),
          None => {
            self.errors.add_simple_error(ErrorClass::Lowering, source_ref.clone(), "compiler bug", format!("namespace entity '{fqn}' has no corresponding type table entry"));
            None
          }
        }
      }
      Resolution::NotFound => {
        self.errors.add_simple_error(ErrorClass::Lowering, source_ref.clone(), "undefined type", format!("'{name}' is not declared in this scope"));
        None
      }
      Resolution::NotFoundPrivate => {
        self.errors.add_simple_error(ErrorClass::Lowering, source_ref.clone(), "type not visible", format!("'{name}' is private to its enclosing scope"));
        None
      }
      Resolution::NotFoundProtected => {
        self.errors.add_simple_error(ErrorClass::Lowering, source_ref.clone(), "type not visible", format!("'{name}' is protected and not visible from here"));
        None
      }
    }
  }

  /// Array sizes must be a literal `u32` constant; "sizes may not
  /// be computed at runtime" (`extract_from_type_specifier_array`).
  fn resolve_array_len(&mut self, len_expr: &ast::Expr) -> Option<u32> {
    let ast::Expr::IntLiteral { text, source_ref } = len_expr else {
      self.errors.add_simple_error(ErrorClass::Lowering, len_expr.source_ref().clone(), "array size invalid", "array size must be a literal u32 constant; sizes may not be computed at runtime");
      return None;
    };
    match parse_literal_int(text) {
      Ok(p) if p.kind == PrimitiveKind::U32 => Some(p.value as u32),
      Ok(_) => {
        self.errors.add_simple_error(ErrorClass::Lowering, source_ref.clone(), "array size invalid", "array size must be an unsigned 32-bit integer (u32) constant");
        None
      }
      Err(msg) => {
        self.errors.add_simple_error(ErrorClass::Lowering, source_ref.clone(), "array size invalid", msg);
        None
      }
    }
  }

  /// Walk the whole translation unit, declaring namespaces, classes,
  /// enums and typedefs into both the namespace tree and the type table,
  /// and collecting every function/method signature for later lowering.
  pub fn run(&mut self, tu: &ast::TranslationUnit) -> ResolvedProgram {
    let mut program = ResolvedProgram::default();
    self.run_items(&tu.items, &mut program);
    program
  }

  fn run_items(&mut self, items: &[ast::Item], program: &mut ResolvedProgram) {
    for item in items {
      self.run_item(item, program);
    }
  }

  fn run_item(&mut self, item: &ast::Item, program: &mut ResolvedProgram) {
    match item {
      ast::Item::Namespace { name, items, source_ref } => {
        let Some(id) = self.ns.declare_namespace(name, source_ref.clone(), self.errors) else { return };
        self.ns.push_namespace(id);
        self.run_items(items, program);
        self.ns.pop_namespace();
      }
      ast::Item::Using { path, absolute, alias, source_ref } => {
        let refs: Vec<&str> = path.iter().map(String::as_str).collect();
        if let Resolution::Found(target) = self.ns.lookup(&refs, *absolute) {
          let alias_name = alias.clone().unwrap_or_else(|| path.last().cloned().unwrap_or_default());
          self.ns.add_using(&alias_name, target, source_ref.clone(), self.errors);
        } else {
          self.errors.add_simple_error(ErrorClass::Lowering, source_ref.clone(), "undefined namespace", format!("'{}' is not declared", path.join("::")));
        }
      }
      ast::Item::ClassForwardDecl { name, source_ref } => {
        self.types.declare_composite_forward(name, source_ref.clone());
        self.declare_class_in_namespace_once(name, source_ref);
      }
      ast::Item::ClassDef { name, members, methods, source_ref } => {
        self.run_class_def(name, members, methods, source_ref, program);
      }
      ast::Item::EnumDef { name, values, source_ref } => {
        self.run_enum_def(name, values, source_ref);
      }
      ast::Item::Typedef { name, target, source_ref } => {
        if let Some(target_ty) = self.resolve_type_spec(target) {
          if self.types.define_typedef(name, target_ty, source_ref.clone(), self.errors).is_some() {
            let _ = self.ns.declare_type(name, Visibility::Public, source_ref.clone(), self.errors);
          }
        }
      }
      ast::Item::FunctionDef(f) => {
        self.run_function_def(f, program);
      }
    }
  }

  /// A class name may legally appear in more than one forward declaration
  /// before (or without) a definition; only register it with the
  /// namespace the first time it's seen.
  fn declare_class_in_namespace_once(&mut self, name: &str, source_ref: &SourceRef) {
    if matches!(self.ns.lookup(&[name], false), Resolution::NotFound) {
      let _ = self.ns.declare_class(name, Visibility::Public, source_ref.clone(), self.errors);
    }
  }

  fn run_class_def(&mut self, name: &str, members: &[ast::Member], methods: &[ast::MethodDef], source_ref: &SourceRef, program: &mut ResolvedProgram) {
    // A forward declaration may already have registered the class; either
    // way we need its TypeId before resolving member/method types that
    // refer back to it (e.g. `this: Class*`, or a self-referential member
    // pointer).
    let class_id = self.types.declare_composite_forward(name, source_ref.clone());
    self.declare_class_in_namespace_once(name, source_ref);

    let mut resolved_members = Vec::with_capacity(members.len());
    let mut member_index = HashMap::new();
    for (index, m) in members.iter().enumerate() {
      let Some(ty) = self.resolve_type_spec(&m.ty) else { continue };
      if let TypeKind::Pointer(target) = &self.types.get(ty).kind {
        if self.types.is_void(*target) {
          self.errors.add_simple_error(ErrorClass::Lowering, m.source_ref.clone(), "pointer-to-void field", format!("member '{}' may not have type 'void*'", m.name));
          continue;
        }
      }
      let sym = intern(&m.name);
      if member_index.contains_key(&sym) {
        self.errors.add_simple_error(ErrorClass::Lowering, m.source_ref.clone(), "duplicate member", format!("member '{}' already declared in class '{name}'", m.name));
        continue;
      }
      member_index.insert(sym, index);
      resolved_members.push(Member { name: sym, index, ty, source_ref: m.source_ref.clone() });
    }

    let this_ty = self.types.get_pointer_to(class_id, source_ref.clone());
    let mut method_sigs = HashMap::new();
    for m in methods {
      let Some(ret_ty) = self.resolve_type_spec(&m.return_type) else { continue };
      let mut args = vec![this_ty];
      let mut param_syms = Vec::with_capacity(m.params.len());
      for p in &m.params {
        let Some(pty) = self.resolve_type_spec(&p.ty) else { continue };
        args.push(pty);
        param_syms.push((intern(&p.name), pty));
      }
      let mangled = format!("{name}::{}", m.name);
      let sig = MethodSig { receiver: class_id, return_type: ret_ty, args, mangled_name: mangled.clone() };
      method_sigs.insert(intern(&m.name), sig);
      program.functions.push(ResolvedFunction {
        name: m.name.clone(),
        mangled_name: mangled,
        return_type: ret_ty,
        params: param_syms,
        receiver: Some(class_id),
        is_unsafe: m.is_unsafe,
        source_ref: m.source_ref.clone(),
        body: m.body.clone(),
      });
    }

    self.types.define_composite(name, CompositeData { members: resolved_members, member_index, methods: method_sigs }, source_ref.clone(), self.errors);
  }

  /// Enum values resolve immediately to `u32` storage; an explicit
  /// value must be a plain integer literal (no self-referencing sibling
  /// values — Open Question resolved in DESIGN.md), and an absent value
  /// is one more than the previous entry (0 for the first).
  fn run_enum_def(&mut self, name: &str, values: &[ast::EnumValue], source_ref: &SourceRef) {
    let mut data = EnumData::default();
    let mut next = 0u32;
    let mut seen = HashMap::new();
    for v in values {
      let sym = intern(&v.name);
      let value = match &v.explicit_value {
        None => next,
        Some(ast::Expr::IntLiteral { text, .. }) => match parse_literal_int(text) {
          Ok(p) => match u32::try_from(p.value) {
            Ok(n) => n,
            Err(_) => {
              self.errors.add_simple_error(ErrorClass::Lowering, v.source_ref.clone(), "enum value out of range", format!("value for '{}' does not fit in a u32", v.name));
              next
            }
          },
          Err(msg) => {
            self.errors.add_simple_error(ErrorClass::Lowering, v.source_ref.clone(), "invalid enum value", msg);
            next
          }
        },
        Some(other) => {
          self.errors.add_simple_error(ErrorClass::Lowering, other.source_ref().clone(), "unsupported enum value", "enum values must be plain integer literals");
          next
        }
      };
      if seen.contains_key(&sym) {
        self.errors.add_simple_error(ErrorClass::Lowering, v.source_ref.clone(), "duplicate enum value", format!("'{}' is already defined in enum '{name}'", v.name));
        continue;
      }
      seen.insert(sym, ());
      data.values.push((sym, value));
      next = value + 1;
    }
    if self.types.define_enum(name, data, source_ref.clone(), self.errors).is_some() {
      let _ = self.ns.declare_type(name, Visibility::Public, source_ref.clone(), self.errors);
    }
  }

  fn run_function_def(&mut self, f: &ast::FunctionDef, program: &mut ResolvedProgram) {
    let Some(ret_ty) = self.resolve_type_spec(&f.return_type) else { return };
    let mut params = Vec::with_capacity(f.params.len());
    for p in &f.params {
      let Some(pty) = self.resolve_type_spec(&p.ty) else { return };
      params.push((intern(&p.name), pty));
    }
    let _ = self.ns.declare_identifier(&f.name, Visibility::Public, f.source_ref.clone(), self.errors);
    program.functions.push(ResolvedFunction {
      name: f.name.clone(),
      mangled_name: f.name.clone(),
      return_type: ret_ty,
      params,
      receiver: None,
      is_unsafe: f.is_unsafe,
      source_ref: f.source_ref.clone(),
      body: f.body.clone(),
    });
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::diag::SourceRef;

  fn sref() -> SourceRef { SourceRef::new(std::rc::Rc::from("t.j"), 1, 0, 0) }

  fn fresh() -> (NamespaceResolver, TypeTable, Errors) {
    let ns = NamespaceResolver::new();
    let mut types = TypeTable::new();
    types.seed_primitives(&sref());
    (ns, types, Errors::new())
  }

  #[test]
  fn resolves_pointer_to_primitive() {
    let (mut ns, mut types, mut errors) = fresh();
    let mut r = TypeResolver::new(&mut ns, &mut types, &mut errors);
    let spec = ast::TypeSpec::PointerTo(Box::new(ast::TypeSpec::Simple("u32".into(), sref())), sref());
    let ty = r.resolve_type_spec(&spec).unwrap();
    assert_eq!(types.get(ty).canonical_name, "u32*");
    assert!(!errors.has_errors());
  }

  #[test]
  fn array_size_must_be_a_u32_literal() {
    let (mut ns, mut types, mut errors) = fresh();
    let mut r = TypeResolver::new(&mut ns, &mut types, &mut errors);
    let bad_len = ast::Expr::Name { path: vec!["n".into()], absolute: false, source_ref: sref() };
    let spec = ast::TypeSpec::Array(Box::new(ast::TypeSpec::Simple("u8".into(), sref())), Box::new(bad_len), sref());
    assert!(r.resolve_type_spec(&spec).is_none());
    assert!(errors.has_errors());
  }

  #[test]
  fn forward_declared_class_then_defined_resolves_to_same_type() {
    let (mut ns, mut types, mut errors) = fresh();
    let mut program = ResolvedProgram::default();
    let tu = ast::TranslationUnit {
      items: vec![
        ast::Item::ClassForwardDecl { name: "Foo".into(), source_ref: sref() },
        ast::Item::ClassDef { name: "Foo".into(), members: vec![], methods: vec![], source_ref: sref() },
      ],
    };
    TypeResolver::new(&mut ns, &mut types, &mut errors).run_items(&tu.items, &mut program);
    assert!(!errors.has_errors());
    let id = types.get_type("Foo").unwrap();
    assert!(types.get(id).complete);
  }

  #[test]
  fn enum_values_auto_increment() {
    let (mut ns, mut types, mut errors) = fresh();
    let values = vec![
      ast::EnumValue { name: "A".into(), explicit_value: None, source_ref: sref() },
      ast::EnumValue { name: "B".into(), explicit_value: None, source_ref: sref() },
      ast::EnumValue { name: "C".into(), explicit_value: Some(ast::Expr::IntLiteral { text: "10".into(), source_ref: sref() }), source_ref: sref() },
    ];
    TypeResolver::new(&mut ns, &mut types, &mut errors).run_enum_def("Color", &values, &sref());
    assert!(!errors.has_errors());
    let id = types.get_type("Color").unwrap();
    let crate::types::TypeKind::Enum(data) = &types.get(id).kind else { panic!("expected enum") };
    assert_eq!(data.values[0].1, 0);
    assert_eq!(data.values[1].1, 1);
    assert_eq!(data.values[2].1, 10);
  }

  #[test]
  fn undefined_type_name_is_an_error() {
    let (mut ns, mut types, mut errors) = fresh();
    let mut r = TypeResolver::new(&mut ns, &mut types, &mut errors);
    assert!(r.resolve_type_spec(&ast::TypeSpec::Simple("Nope".into(), sref())).is_none());
    assert!(errors.has_errors());
  }

  #[test]
  fn reference_to_reference_is_an_error() {
    let (mut ns, mut types, mut errors) = fresh();
    let mut r = TypeResolver::new(&mut ns, &mut types, &mut errors);
    let inner = ast::TypeSpec::ReferenceTo(Box::new(ast::TypeSpec::Simple("u32".into(), sref())), sref());
    let spec = ast::TypeSpec::ReferenceTo(Box::new(inner), sref());
    assert!(r.resolve_type_spec(&spec).is_none());
    assert!(errors.has_errors());
  }

  #[test]
  fn array_of_void_is_an_error() {
    let (mut ns, mut types, mut errors) = fresh();
    let mut r = TypeResolver::new(&mut ns, &mut types, &mut errors);
    let len = ast::Expr::IntLiteral { text: "4".into(), source_ref: sref() };
    let spec = ast::TypeSpec::Array(Box::new(ast::TypeSpec::Simple("void".into(), sref())), Box::new(len), sref());
    assert!(r.resolve_type_spec(&spec).is_none());
    assert!(errors.has_errors());
  }

  #[test]
  fn pointer_to_void_field_is_an_error() {
    let (mut ns, mut types, mut errors) = fresh();
    let mut program = ResolvedProgram::default();
    let void_ptr = ast::TypeSpec::PointerTo(Box::new(ast::TypeSpec::Simple("void".into(), sref())), sref());
    let tu = ast::TranslationUnit {
      items: vec![ast::Item::ClassDef {
        name: "Foo".into(),
        members: vec![ast::Member { name: "p".into(), ty: void_ptr, source_ref: sref() }],
        methods: vec![],
        source_ref: sref(),
      }],
    };
    TypeResolver::new(&mut ns, &mut types, &mut errors).run_items(&tu.items, &mut program);
    assert!(errors.has_errors());
  }
}
