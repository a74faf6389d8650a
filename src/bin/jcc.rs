//! Driver binary: CLI parsing, preprocessing, compilation, and MIR dump.
//! Exit codes: `0` success, `255` on any error.
//!
//! No lexer/parser ships in this crate, so there is no way to turn
//! preprocessed text into an [`jcc::ast::TranslationUnit`] here; this
//! binary wires together everything the core does own (preprocessing,
//! resolution, lowering, analysis, the MIR dump) and reports "no front
//! end configured" through the ordinary `Errors` sink at the one seam a
//! real front end would plug into.

use std::io::Write as _;

use jcc::cli::Cli;
use jcc::diag::{ErrorClass, Errors, SourceMap, SourceRef};

fn main() {
  env_logger::init();
  let cli = Cli::parse_or_exit();
  std::process::exit(run(&cli));
}

fn run(cli: &Cli) -> i32 {
  let mut errors = Errors::new();
  let mut sources = SourceMap::new();

  if cli.verbose {
    log::info!("preprocessing {}", cli.source.display());
  }
  let Some(preprocessed) = jcc::preprocess::run(&cli.source, &cli.include, &mut errors) else {
    report(&errors, &sources);
    return 255;
  };

  let Ok(contents) = preprocessed.contents() else {
    errors.add_simple_error(ErrorClass::Io, SourceRef::new(std::rc::Rc::from(cli.source.to_string_lossy().as_ref()), 0, 0, 0), "failed to read preprocessed source", "could not read the temporary preprocessed file");
    report(&errors, &sources);
    return 255;
  };
  sources.add_file(std::rc::Rc::from(cli.source.to_string_lossy().as_ref()), &contents);

  // No parser ships in this core (see module doc comment); a real
  // front end hands `Compiler::compile` a `TranslationUnit` here.
  errors.add_simple_error(ErrorClass::Syntax, SourceRef::new(std::rc::Rc::from(cli.source.to_string_lossy().as_ref()), 1, 0, 0), "no front end configured", "this build has no lexer/parser wired in; supply a TranslationUnit via the library API");
  report(&errors, &sources);
  255
}

fn report(errors: &Errors, sources: &SourceMap) {
  if errors.is_empty() {
    return;
  }
  let mut stderr = std::io::stderr();
  let _ = errors.print(sources, 2, &mut stderr);
  let _ = stderr.flush();
}
