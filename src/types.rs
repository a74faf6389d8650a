//! The canonical, deduplicated type table.
//!
//! The core correctness property: two type specifiers denoting the same
//! structural type produce *pointer-equal* entries. Since types live in a
//! single arena addressed by dense index, "pointer-equal" here means
//! "same [`TypeId`]".

use hashbrown::HashMap;
use crate::diag::{Errors, ErrorClass, SourceRef};
use crate::symbol::Symbol;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveKind { U8, U16, U32, U64, I8, I16, I32, I64, F32, F64, Bool, Void }

impl PrimitiveKind {
  #[must_use] pub fn name(self) -> &'static str {
    match self {
      PrimitiveKind::U8 => "u8", PrimitiveKind::U16 => "u16", PrimitiveKind::U32 => "u32", PrimitiveKind::U64 => "u64",
      PrimitiveKind::I8 => "i8", PrimitiveKind::I16 => "i16", PrimitiveKind::I32 => "i32", PrimitiveKind::I64 => "i64",
      PrimitiveKind::F32 => "f32", PrimitiveKind::F64 => "f64", PrimitiveKind::Bool => "bool", PrimitiveKind::Void => "void",
    }
  }

  #[must_use] pub fn is_signed(self) -> bool { matches!(self, PrimitiveKind::I8 | PrimitiveKind::I16 | PrimitiveKind::I32 | PrimitiveKind::I64) }
  #[must_use] pub fn is_unsigned(self) -> bool { matches!(self, PrimitiveKind::U8 | PrimitiveKind::U16 | PrimitiveKind::U32 | PrimitiveKind::U64) }
  #[must_use] pub fn is_float(self) -> bool { matches!(self, PrimitiveKind::F32 | PrimitiveKind::F64) }
  #[must_use] pub fn is_integer(self) -> bool { self.is_signed() || self.is_unsigned() }

  #[must_use] pub fn bits(self) -> u32 {
    match self {
      PrimitiveKind::U8 | PrimitiveKind::I8 => 8,
      PrimitiveKind::U16 | PrimitiveKind::I16 => 16,
      PrimitiveKind::U32 | PrimitiveKind::I32 | PrimitiveKind::F32 => 32,
      PrimitiveKind::U64 | PrimitiveKind::I64 | PrimitiveKind::F64 => 64,
      PrimitiveKind::Bool => 8,
      PrimitiveKind::Void => 0,
    }
  }
}

/// Dense handle into [`TypeTable`]'s arena. Stable for the life of the
/// compilation; equality on `TypeId` is exactly the "pointer-equal" the
/// spec's invariants require.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeId(u32);

#[derive(Debug, Clone)]
pub struct Member {
  pub name: Symbol,
  pub index: usize,
  pub ty: TypeId,
  pub source_ref: SourceRef,
}

#[derive(Debug, Clone)]
pub struct MethodSig {
  pub receiver: TypeId,
  pub return_type: TypeId,
  /// Argument types *including* the implicit leading `receiver: C*`.
  pub args: Vec<TypeId>,
  pub mangled_name: String,
}

#[derive(Debug, Clone, Default)]
pub struct CompositeData {
  pub members: Vec<Member>,
  pub member_index: HashMap<Symbol, usize>,
  pub methods: HashMap<Symbol, MethodSig>,
}

#[derive(Debug, Clone, Default)]
pub struct EnumData {
  pub values: Vec<(Symbol, u32)>,
}

#[derive(Debug, Clone)]
pub enum TypeKind {
  Primitive(PrimitiveKind),
  Pointer(TypeId),
  Reference(TypeId),
  Array(TypeId, u32),
  FunctionPointer { ret: TypeId, args: Vec<TypeId> },
  Composite(CompositeData),
  Enum(EnumData),
}

#[derive(Debug, Clone)]
pub struct Type {
  pub canonical_name: String,
  pub kind: TypeKind,
  pub complete: bool,
  pub declared_ref: SourceRef,
  pub defined_ref: Option<SourceRef>,
}

/// Canonical, deduplicated table of every type reachable from the
/// translation unit. Owns all `Type` values; everywhere else holds
/// non-owning `TypeId`s.
#[derive(Debug, Default)]
pub struct TypeTable {
  types: Vec<Type>,
  by_name: HashMap<String, TypeId>,
}

impl TypeTable {
  #[must_use] pub fn new() -> Self { Self::default() }

  #[must_use] pub fn get(&self, id: TypeId) -> &Type { &self.types[id.0 as usize] }
  fn get_mut(&mut self, id: TypeId) -> &mut Type { &mut self.types[id.0 as usize] }

  #[must_use] pub fn get_type(&self, canonical_name: &str) -> Option<TypeId> {
    self.by_name.get(canonical_name).copied()
  }

  fn insert(&mut self, ty: Type) -> TypeId {
    let id = TypeId(self.types.len().try_into().expect("too many types"));
    self.by_name.insert(ty.canonical_name.clone(), id);
    self.types.push(ty);
    id
  }

  /// `get_or_create`: return the existing entry for `canonical_name` if
  /// present, otherwise allocate a fresh one. This is the single place
  /// structural deduplication happens.
  fn get_or_create(&mut self, canonical_name: String, kind: TypeKind, complete: bool, source_ref: SourceRef) -> TypeId {
    if let Some(id) = self.get_type(&canonical_name) { return id }
    self.insert(Type { canonical_name, kind, complete, declared_ref: source_ref, defined_ref: None })
  }

  /// Populate the eleven primitive types plus `void`. Called once per
  /// `TypeTable`, mirroring the namespace resolver's builtin seeding.
  pub fn seed_primitives(&mut self, source_ref: &SourceRef) {
    for kind in [
      PrimitiveKind::U8, PrimitiveKind::U16, PrimitiveKind::U32, PrimitiveKind::U64,
      PrimitiveKind::I8, PrimitiveKind::I16, PrimitiveKind::I32, PrimitiveKind::I64,
      PrimitiveKind::F32, PrimitiveKind::F64, PrimitiveKind::Bool, PrimitiveKind::Void,
    ] {
      self.get_or_create(kind.name().to_owned(), TypeKind::Primitive(kind), true, source_ref.clone());
    }
  }

  #[must_use] pub fn primitive(&self, kind: PrimitiveKind) -> TypeId {
    self.get_type(kind.name()).expect("primitives are seeded before any other type operation")
  }

  #[must_use] pub fn is_void(&self, id: TypeId) -> bool { matches!(self.get(id).kind, TypeKind::Primitive(PrimitiveKind::Void)) }

  #[must_use] pub fn get_pointer_to(&mut self, target: TypeId, source_ref: SourceRef) -> TypeId {
    let name = format!("{}*", self.get(target).canonical_name);
    self.get_or_create(name, TypeKind::Pointer(target), true, source_ref)
  }

  #[must_use] pub fn get_reference_to(&mut self, target: TypeId, source_ref: SourceRef) -> TypeId {
    let name = format!("{}&", self.get(target).canonical_name);
    self.get_or_create(name, TypeKind::Reference(target), true, source_ref)
  }

  #[must_use] pub fn get_array_of(&mut self, target: TypeId, len: u32, source_ref: SourceRef) -> TypeId {
    let name = format!("{}[{len}]", self.get(target).canonical_name);
    let complete = self.get(target).complete;
    self.get_or_create(name, TypeKind::Array(target, len), complete, source_ref)
  }

  #[must_use] pub fn get_function_pointer(&mut self, ret: TypeId, args: Vec<TypeId>, source_ref: SourceRef) -> TypeId {
    let arg_names: Vec<&str> = args.iter().map(|&a| self.get(a).canonical_name.as_str()).collect();
    let name = format!("{}(*)({})", self.get(ret).canonical_name, arg_names.join(","));
    let complete = self.get(ret).complete && args.iter().all(|&a| self.get(a).complete);
    self.get_or_create(name, TypeKind::FunctionPointer { ret, args }, complete, source_ref)
  }

  /// `class Foo;` — an incomplete composite with no members yet.
  pub fn declare_composite_forward(&mut self, name: &str, source_ref: SourceRef) -> TypeId {
    if let Some(id) = self.get_type(name) { return id }
    self.insert(Type {
      canonical_name: name.to_owned(),
      kind: TypeKind::Composite(CompositeData::default()),
      complete: false,
      declared_ref: source_ref,
      defined_ref: None,
    })
  }

  /// Full `class Foo { ... };` definition. Completes a forward-declared
  /// entry in place, or creates a fresh complete entry. Errors (pointing
  /// at both locations) if `name` already names a complete composite.
  pub fn define_composite(&mut self, name: &str, data: CompositeData, source_ref: SourceRef, errors: &mut Errors) -> Option<TypeId> {
    if let Some(id) = self.get_type(name) {
      let existing = self.get(id);
      if existing.complete {
        let first = existing.defined_ref.clone().unwrap_or_else(|| existing.declared_ref.clone());
        errors.add_error(
          crate::diag::Error::new(ErrorClass::Lowering, format!("redefinition of class '{name}'"))
            .with_message(source_ref, "second definition here")
            .with_message(first, "first defined here"),
        );
        return None;
      }
      let ty = self.get_mut(id);
      ty.kind = TypeKind::Composite(data);
      ty.complete = true;
      ty.defined_ref = Some(source_ref);
      return Some(id);
    }
    let id = self.insert(Type {
      canonical_name: name.to_owned(),
      kind: TypeKind::Composite(data),
      complete: true,
      declared_ref: source_ref.clone(),
      defined_ref: Some(source_ref),
    });
    Some(id)
  }

  /// Enums resolve immediately to `u32` storage; there is no
  /// forward-declared form.
  pub fn define_enum(&mut self, name: &str, data: EnumData, source_ref: SourceRef, errors: &mut Errors) -> Option<TypeId> {
    if let Some(id) = self.get_type(name) {
      let existing = self.get(id).declared_ref.clone();
      errors.add_error(
        crate::diag::Error::new(ErrorClass::Lowering, format!("redefinition of enum '{name}'"))
          .with_message(source_ref, "second definition here")
          .with_message(existing, "first defined here"),
      );
      return None;
    }
    Some(self.insert(Type { canonical_name: name.to_owned(), kind: TypeKind::Enum(data), complete: true, declared_ref: source_ref.clone(), defined_ref: Some(source_ref) }))
  }

  /// Typedefs *copy* another type's structural contents rather than
  /// aliasing it: the resulting type is distinct by canonical name but
  /// has identical layout.
  pub fn define_typedef(&mut self, name: &str, target: TypeId, source_ref: SourceRef, errors: &mut Errors) -> Option<TypeId> {
    if let Some(id) = self.get_type(name) {
      let existing = self.get(id).declared_ref.clone();
      errors.add_error(
        crate::diag::Error::new(ErrorClass::Lowering, format!("redefinition of type '{name}'"))
          .with_message(source_ref, "second declaration here")
          .with_message(existing, "first declared here"),
      );
      return None;
    }
    let target_ty = self.get(target);
    let kind = target_ty.kind.clone();
    let complete = target_ty.complete;
    Some(self.insert(Type { canonical_name: name.to_owned(), kind, complete, declared_ref: source_ref.clone(), defined_ref: Some(source_ref) }))
  }

  #[must_use] pub fn len(&self) -> usize { self.types.len() }
  #[must_use] pub fn is_empty(&self) -> bool { self.types.is_empty() }
  pub fn iter(&self) -> impl Iterator<Item = (TypeId, &Type)> {
    self.types.iter().enumerate().map(|(i, t)| (TypeId(u32::try_from(i).expect("type id overflow")), t))
  }
}

#[cfg(test)]
mod test {
  use super::*;

  fn sref() -> SourceRef { SourceRef::new(std::rc::Rc::from("t.j"), 1, 0, 0) }

  #[test]
  fn pointer_construction_dedups() {
    let mut t = TypeTable::new();
    t.seed_primitives(&sref());
    let u32t = t.primitive(PrimitiveKind::U32);
    let p1 = t.get_pointer_to(u32t, sref());
    let p2 = t.get_pointer_to(u32t, sref());
    assert_eq!(p1, p2);
    assert_eq!(t.get(p1).canonical_name, "u32*");
  }

  #[test]
  fn forward_declared_class_is_incomplete_until_defined() {
    let mut t = TypeTable::new();
    t.seed_primitives(&sref());
    let mut errors = Errors::new();
    let fwd = t.declare_composite_forward("Foo", sref());
    assert!(!t.get(fwd).complete);
    let id = t.define_composite("Foo", CompositeData::default(), sref(), &mut errors).unwrap();
    assert_eq!(id, fwd);
    assert!(t.get(fwd).complete);
    assert!(!errors.has_errors());
  }

  #[test]
  fn redefining_a_complete_class_is_an_error() {
    let mut t = TypeTable::new();
    t.seed_primitives(&sref());
    let mut errors = Errors::new();
    t.define_composite("Foo", CompositeData::default(), sref(), &mut errors).unwrap();
    let second = t.define_composite("Foo", CompositeData::default(), sref(), &mut errors);
    assert!(second.is_none());
    assert!(errors.has_errors());
  }

  #[test]
  fn function_pointer_complete_iff_args_and_return_complete() {
    let mut t = TypeTable::new();
    t.seed_primitives(&sref());
    let u32t = t.primitive(PrimitiveKind::U32);
    let fwd = t.declare_composite_forward("Incomplete", sref());
    let fp = t.get_function_pointer(u32t, vec![fwd], sref());
    assert!(!t.get(fp).complete);
  }

  #[test]
  fn typedef_is_distinct_but_same_layout() {
    let mut t = TypeTable::new();
    t.seed_primitives(&sref());
    let mut errors = Errors::new();
    let u32t = t.primitive(PrimitiveKind::U32);
    let alias = t.define_typedef("MyU32", u32t, sref(), &mut errors).unwrap();
    assert_ne!(alias, u32t);
    assert_eq!(t.get(alias).canonical_name, "MyU32");
    assert!(t.get(alias).complete);
  }
}
