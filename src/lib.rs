//! Single-translation-unit compiler core for the jlang C-family systems
//! language: namespace/type resolution, syntax-tree-to-MIR
//! lowering, the six analysis passes, and the boundary to an external
//! code generator. Parsing and preprocessing live outside this facade's
//! critical path — callers hand this crate an already
//! preprocessed source and an already-parsed [`ast::TranslationUnit`].
//!
//! `Compiler::compile` is the one entry point a driver needs: it threads
//! one [`Errors`] sink through namespace/type resolution, lowering, and
//! analysis, stopping at the first phase that recorded an error rather
//! than handing broken MIR to the next one.

pub mod analysis;
pub mod ast;
pub mod cli;
pub mod codegen;
pub mod diag;
pub mod literal;
pub mod lower;
pub mod mir;
pub mod namespace;
pub mod preprocess;
pub mod resolve;
pub mod scope;
pub mod symbol;
pub mod types;

use hashbrown::HashMap;

use diag::Errors;
use mir::{Function, MirSymbol, MirSymbolKind};
use namespace::NamespaceResolver;
use resolve::{ResolvedFunction, TypeResolver};
use types::TypeTable;

/// A fully lowered and analyzed translation unit, ready for codegen.
pub struct CompiledUnit {
  pub types: TypeTable,
  pub functions: Vec<Function>,
}

pub struct Compiler {
  pub types: TypeTable,
  pub ns: NamespaceResolver,
  pub errors: Errors,
}

impl Default for Compiler {
  fn default() -> Self { Self::new() }
}

impl Compiler {
  #[must_use] pub fn new() -> Self {
    let mut types = TypeTable::new();
    let root_ref = diag::SourceRef::new(std::rc::Rc::from("<builtin>"), 0, 0, 0);
    types.seed_primitives(&root_ref);
    Self { types, ns: NamespaceResolver::new(), errors: Errors::new() }
  }

  /// Resolves, lowers, and analyzes `tu`. Returns `None` if any phase
  /// recorded an error; inspect `self.errors` either way.
  pub fn compile(&mut self, tu: &ast::TranslationUnit) -> Option<CompiledUnit> {
    let program = {
      let mut resolver = TypeResolver::new(&mut self.ns, &mut self.types, &mut self.errors);
      resolver.run(tu)
    };
    if self.errors.has_errors() {
      return None;
    }

    let globals = mir_symbol_table(&program.functions, &mut self.types);

    let mut functions = Vec::with_capacity(program.functions.len());
    for rf in &program.functions {
      if let Some(f) = lower::lower_function(rf, &mut self.types, &mut self.ns, &globals, &mut self.errors) {
        functions.push(f);
      }
    }
    if self.errors.has_errors() {
      return None;
    }

    analysis::run_all(&self.types, &functions, &mut self.errors);
    if self.errors.has_errors() {
      return None;
    }

    Some(CompiledUnit { types: std::mem::take(&mut self.types), functions })
  }
}

/// One [`MirSymbol`] per resolved function/method, keyed by mangled name,
/// so a later call site can be linked to its callee before that callee
/// has itself been lowered (mutual recursion needs this; `lower_function`
/// never looks anything up in the namespace tree for a call target).
fn mir_symbol_table(functions: &[ResolvedFunction], types: &mut TypeTable) -> HashMap<String, MirSymbol> {
  let mut globals = HashMap::new();
  for rf in functions {
    let mut arg_types = Vec::with_capacity(rf.params.len() + 1);
    if let Some(receiver) = rf.receiver {
      arg_types.push(types.get_pointer_to(receiver, rf.source_ref.clone()));
    }
    arg_types.extend(rf.params.iter().map(|&(_, ty)| ty));
    let ty = types.get_function_pointer(rf.return_type, arg_types, rf.source_ref.clone());
    let kind = if rf.receiver.is_some() { MirSymbolKind::MemberMethod } else { MirSymbolKind::StaticFunction };
    globals.insert(rf.mangled_name.clone(), MirSymbol { name: rf.mangled_name.clone(), kind, ty });
  }
  globals
}
