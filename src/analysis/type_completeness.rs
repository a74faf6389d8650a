//! Pass 1, Type Resolution: every type reachable from a function's
//! signature, its temporaries, or a composite's member list must be
//! `complete` (a field whose type is still forward-declared is an error);
//! `types.rs`'s `define_composite` only rejects re-definition, not
//! incomplete members,
//! so this pass is where that rule actually lives.

use crate::diag::{Error, ErrorClass, Errors};
use crate::mir::Function;
use crate::types::{TypeKind, TypeTable};

pub fn check(types: &TypeTable, functions: &[Function], errors: &mut Errors) {
  for (_, ty) in types.iter() {
    let TypeKind::Composite(data) = &ty.kind else { continue };
    if !ty.complete { continue } // the forward declaration itself, not yet an error
    for member in &data.members {
      let member_ty = types.get(member.ty);
      if !member_ty.complete {
        errors.add_error(
          Error::new(ErrorClass::Analysis, "class contains incomplete type")
            .with_message(member.source_ref.clone(), format!("field '{}' has incomplete type '{}'", member.name, member_ty.canonical_name))
            .with_message(member_ty.declared_ref.clone(), "type is only forward-declared"),
        );
      }
    }
  }

  for f in functions {
    let ret = types.get(f.return_type);
    if !ret.complete {
      errors.add_simple_error(ErrorClass::Analysis, f.source_ref.clone(), "incomplete return type", format!("'{}' returns incomplete type '{}'", f.name, ret.canonical_name));
    }
    for (name, ty) in &f.args {
      let t = types.get(*ty);
      if !t.complete {
        errors.add_simple_error(ErrorClass::Analysis, f.source_ref.clone(), "incomplete parameter type", format!("parameter '{name}' of '{}' has incomplete type '{}'", f.name, t.canonical_name));
      }
    }
    for block in f.blocks.values() {
      for op in &block.operations {
        if let Some(rt) = op.result_ty {
          if !types.get(rt).complete {
            errors.add_simple_error(ErrorClass::Analysis, op.source_ref.clone(), "incomplete type in use", format!("use of incomplete type '{}'", types.get(rt).canonical_name));
          }
        }
      }
    }
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::diag::SourceRef;
  use crate::types::{CompositeData, Member};
  use std::rc::Rc;

  fn sref() -> SourceRef { SourceRef::new(Rc::from("t.j"), 1, 0, 0) }

  #[test]
  fn incomplete_field_type_is_an_error() {
    let mut types = TypeTable::new();
    types.seed_primitives(&sref());
    let mut errors = Errors::new();
    let foo = types.declare_composite_forward("Foo", sref());
    let member = Member { name: crate::symbol::intern("x"), index: 0, ty: foo, source_ref: sref() };
    let mut data = CompositeData::default();
    data.members.push(member);
    types.define_composite("Bar", data, sref(), &mut errors).unwrap();
    assert!(!errors.has_errors());
    check(&types, &[], &mut errors);
    assert!(errors.has_errors());
  }

  #[test]
  fn complete_field_type_is_fine() {
    let mut types = TypeTable::new();
    types.seed_primitives(&sref());
    let mut errors = Errors::new();
    let u32t = types.primitive(crate::types::PrimitiveKind::U32);
    let member = Member { name: crate::symbol::intern("x"), index: 0, ty: u32t, source_ref: sref() };
    let mut data = CompositeData::default();
    data.members.push(member);
    types.define_composite("Bar", data, sref(), &mut errors).unwrap();
    check(&types, &[], &mut errors);
    assert!(!errors.has_errors());
  }
}
