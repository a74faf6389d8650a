//! End-to-end scenarios, driven through `Compiler::compile` against
//! hand-built `ast::TranslationUnit` values — this crate ships no parser
//! (see `src/bin/jcc.rs`'s module doc), so these stand in for what a real
//! front end would hand in.

use jcc::ast;
use jcc::diag::SourceRef;
use jcc::Compiler;

fn sref() -> SourceRef { SourceRef::new(std::rc::Rc::from("t.j"), 1, 0, 0) }

/// Scenario 1: an empty translation unit compiles with no functions.
#[test]
fn empty_file_compiles_with_no_functions() {
  let mut c = Compiler::new();
  let tu = ast::TranslationUnit { items: vec![] };
  let unit = c.compile(&tu).expect("empty file compiles");
  assert!(unit.functions.is_empty());
  assert!(!c.errors.has_errors());
}

/// Scenario 2: `i32 main() { return 0i32; }` lowers to one function with
/// a single `literal_int` and a `return`.
#[test]
fn minimal_main_lowers_to_one_function() {
  let mut c = Compiler::new();
  let body = ast::Block {
    stmts: vec![ast::Stmt::Return(Some(ast::Expr::IntLiteral { text: "0i32".into(), source_ref: sref() }), sref())],
    source_ref: sref(),
  };
  let main_fn = ast::FunctionDef {
    name: "main".into(),
    return_type: ast::TypeSpec::Simple("i32".into(), sref()),
    params: vec![],
    is_unsafe: false,
    body,
    source_ref: sref(),
  };
  let tu = ast::TranslationUnit { items: vec![ast::Item::FunctionDef(main_fn)] };
  let unit = c.compile(&tu).expect("minimal main compiles");
  assert_eq!(unit.functions.len(), 1);
  let f = &unit.functions[0];
  let entry = &f.blocks[&f.entry()];
  let opcodes: Vec<_> = entry.operations.iter().map(|op| op.opcode).collect();
  assert_eq!(opcodes, vec![jcc::mir::Opcode::LiteralInt, jcc::mir::Opcode::Return]);
}

/// Scenario 3: a class holding a still-forward-declared member type is
/// an incomplete-type error naming both locations.
#[test]
fn forward_declared_member_type_is_an_incomplete_type_error() {
  let mut c = Compiler::new();
  let tu = ast::TranslationUnit {
    items: vec![
      ast::Item::ClassForwardDecl { name: "Foo".into(), source_ref: sref() },
      ast::Item::ClassDef {
        name: "Bar".into(),
        members: vec![ast::Member { name: "x".into(), ty: ast::TypeSpec::Simple("Foo".into(), sref()), source_ref: sref() }],
        methods: vec![],
        source_ref: sref(),
      },
    ],
  };
  let result = c.compile(&tu);
  assert!(result.is_none());
  assert!(c.errors.has_errors());
}

/// Scenario 4: two signatures taking `Foo*` see the same pointer type.
#[test]
fn pointer_to_the_same_class_is_deduplicated() {
  let mut c = Compiler::new();
  let tu = ast::TranslationUnit {
    items: vec![
      ast::Item::ClassDef { name: "Foo".into(), members: vec![], methods: vec![], source_ref: sref() },
      ast::Item::FunctionDef(ast::FunctionDef {
        name: "take_a".into(),
        return_type: ast::TypeSpec::Simple("void".into(), sref()),
        params: vec![ast::Param { name: "p".into(), ty: ast::TypeSpec::PointerTo(Box::new(ast::TypeSpec::Simple("Foo".into(), sref())), sref()), source_ref: sref() }],
        is_unsafe: true,
        body: ast::Block { stmts: vec![], source_ref: sref() },
        source_ref: sref(),
      }),
      ast::Item::FunctionDef(ast::FunctionDef {
        name: "take_b".into(),
        return_type: ast::TypeSpec::Simple("void".into(), sref()),
        params: vec![ast::Param { name: "p".into(), ty: ast::TypeSpec::PointerTo(Box::new(ast::TypeSpec::Simple("Foo".into(), sref())), sref()), source_ref: sref() }],
        is_unsafe: true,
        body: ast::Block { stmts: vec![], source_ref: sref() },
        source_ref: sref(),
      }),
    ],
  };
  let unit = c.compile(&tu).expect("both functions compile");
  assert_eq!(unit.functions.len(), 2);
  assert_eq!(unit.functions[0].args[0].1, unit.functions[1].args[0].1);
}

/// A void function that falls off the end of its body without an
/// explicit `return` still has to tear down its root-scope locals
/// before the implicit `return_void` — otherwise scope pairing sees a
/// local leaked past the function's end.
#[test]
fn void_function_falling_off_the_end_tears_down_its_locals() {
  let mut c = Compiler::new();
  let body = ast::Block {
    stmts: vec![ast::Stmt::VarDecl {
      name: "x".into(),
      ty: ast::TypeSpec::Simple("u32".into(), sref()),
      init: Some(ast::Expr::IntLiteral { text: "0u32".into(), source_ref: sref() }),
      source_ref: sref(),
    }],
    source_ref: sref(),
  };
  let f = ast::FunctionDef {
    name: "f".into(),
    return_type: ast::TypeSpec::Simple("void".into(), sref()),
    params: vec![],
    is_unsafe: false,
    body,
    source_ref: sref(),
  };
  let tu = ast::TranslationUnit { items: vec![ast::Item::FunctionDef(f)] };
  let unit = c.compile(&tu);
  assert!(unit.is_some(), "errors: {:?}", c.errors);
}
