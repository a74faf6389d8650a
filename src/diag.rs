//! Source references and the diagnostic sink.
//!
//! Errors are accumulated, never thrown: every
//! phase of the pipeline runs to completion (or as far as it locally can)
//! and pushes whatever it finds into an [`Errors`] sink; the pipeline only
//! inspects `has_errors()` at phase boundaries.

use std::fmt;
use std::rc::Rc;
use hashbrown::HashMap;

/// A point in a source file: file name (shared across every reference into
/// that file), 1-based line, 0-based column, and byte offset. Cheap to
/// copy; embedded in every syntax node, MIR operation, and error message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRef {
  pub file: Rc<str>,
  pub line: u32,
  pub column: u32,
  pub offset: u32,
}

impl SourceRef {
  #[must_use] pub fn new(file: Rc<str>, line: u32, column: u32, offset: u32) -> Self {
    Self { file, line, column, offset }
  }
}

impl fmt::Display for SourceRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}:{}", self.file, self.line, self.column)
  }
}

/// The phase that raised an error, used to partition [`ErrorId`] ranges.
///
/// ```text
/// 0x0000_xxxx  IO        — cannot open/write, preprocessor failure
/// 0x0001_xxxx  Syntax    — parser rejections
/// 0x0002_xxxx  Lowering  — namespace/type/scope/lowering errors
/// 0x0003_xxxx  Analysis  — reachability, return coverage, use-before-assign,
///                          scope pairing, borrow check
/// 0x0004_xxxx  Codegen   — should be unreachable; emitted defensively
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ErrorClass {
  Io = 0x0000_0000,
  Syntax = 0x0001_0000,
  Lowering = 0x0002_0000,
  Analysis = 0x0003_0000,
  Codegen = 0x0004_0000,
}

/// A unique diagnostic code; high bits identify the [`ErrorClass`].
pub type ErrorId = u32;

static NEXT_ID: std::sync::atomic::AtomicU32 = std::sync::atomic::AtomicU32::new(1);

fn next_id(class: ErrorClass) -> ErrorId {
  let seq = NEXT_ID.fetch_add(1, std::sync::atomic::Ordering::Relaxed) & 0xffff;
  class as u32 | seq
}

/// One observation about a specific source location, attached to an
/// [`Error`]. An error may carry several of these when it spans more than
/// one site (e.g. a duplicate declaration points at both definitions).
#[derive(Debug, Clone)]
pub struct ErrorMessage {
  pub source_ref: SourceRef,
  pub message: String,
}

impl ErrorMessage {
  #[must_use] pub fn new(source_ref: SourceRef, message: impl Into<String>) -> Self {
    Self { source_ref, message: message.into() }
  }
}

/// A single compiler diagnostic: a short title plus one or more
/// [`ErrorMessage`]s pointing at the source locations it concerns.
#[derive(Debug, Clone)]
pub struct Error {
  id: ErrorId,
  title: String,
  messages: Vec<ErrorMessage>,
}

impl Error {
  #[must_use] pub fn new(class: ErrorClass, title: impl Into<String>) -> Self {
    Self { id: next_id(class), title: title.into(), messages: Vec::new() }
  }

  #[must_use] pub fn with_message(mut self, source_ref: SourceRef, message: impl Into<String>) -> Self {
    self.messages.push(ErrorMessage::new(source_ref, message));
    self
  }

  pub fn add_message(&mut self, source_ref: SourceRef, message: impl Into<String>) {
    self.messages.push(ErrorMessage::new(source_ref, message));
  }

  #[must_use] pub fn id(&self) -> ErrorId { self.id }
  #[must_use] pub fn title(&self) -> &str { &self.title }
  #[must_use] pub fn messages(&self) -> &[ErrorMessage] { &self.messages }
}

/// Holds each source file's lines so diagnostics can print surrounding
/// context. Populated once per file as it is read.
#[derive(Debug, Default)]
pub struct SourceMap {
  files: HashMap<Rc<str>, Vec<String>>,
}

impl SourceMap {
  #[must_use] pub fn new() -> Self { Self::default() }

  pub fn add_file(&mut self, name: Rc<str>, contents: &str) {
    self.files.insert(name, contents.lines().map(str::to_owned).collect());
  }

  /// Lines `[line - ctx, line + ctx]` (1-based, inclusive), paired with
  /// their line numbers, clamped to the file's bounds.
  #[must_use] pub fn context(&self, file: &str, line: u32, ctx: u32) -> Vec<(u32, &str)> {
    let Some(lines) = self.files.get(file) else { return Vec::new() };
    let lo = line.saturating_sub(ctx).max(1);
    let hi = (line + ctx).min(u32::try_from(lines.len()).unwrap_or(u32::MAX));
    (lo..=hi).filter_map(|n| lines.get((n - 1) as usize).map(|l| (n, l.as_str()))).collect()
  }
}

/// The append-only diagnostic sink shared across every compiler phase.
/// Deduplicates nothing; errors print in insertion order.
#[derive(Debug, Default)]
pub struct Errors {
  errors: Vec<Error>,
}

impl Errors {
  #[must_use] pub fn new() -> Self { Self::default() }

  pub fn add_error(&mut self, error: Error) { self.errors.push(error); }

  /// Convenience for the common one-message case.
  pub fn add_simple_error(&mut self, class: ErrorClass, source_ref: SourceRef, title: impl Into<String>, message: impl Into<String>) {
    self.add_error(Error::new(class, title).with_message(source_ref, message));
  }

  #[must_use] pub fn has_errors(&self) -> bool { !self.errors.is_empty() }
  #[must_use] pub fn len(&self) -> usize { self.errors.len() }
  #[must_use] pub fn is_empty(&self) -> bool { self.errors.is_empty() }
  #[must_use] pub fn iter(&self) -> std::slice::Iter<'_, Error> { self.errors.iter() }

  /// Print every error: title, then for each message the file/line/column,
  /// ±`context_lines` of source, and a caret at the offending column.
  pub fn print(&self, sources: &SourceMap, context_lines: u32, out: &mut impl std::io::Write) -> std::io::Result<()> {
    for error in &self.errors {
      writeln!(out, "error[{:#06x}]: {}", error.id, error.title)?;
      for msg in &error.messages {
        writeln!(out, "  --> {}", msg.source_ref)?;
        writeln!(out, "      {}", msg.message)?;
        for (n, line) in sources.context(&msg.source_ref.file, msg.source_ref.line, context_lines) {
          writeln!(out, "  {n:>5} | {line}")?;
          if n == msg.source_ref.line {
            let col = msg.source_ref.column as usize;
            writeln!(out, "        | {}^", " ".repeat(col))?;
          }
        }
      }
    }
    Ok(())
  }
}

#[cfg(test)]
mod test {
  use super::*;

  fn sref(line: u32, column: u32) -> SourceRef {
    SourceRef::new(Rc::from("t.j"), line, column, 0)
  }

  #[test]
  fn accumulates_in_insertion_order() {
    let mut errors = Errors::new();
    errors.add_simple_error(ErrorClass::Lowering, sref(1, 0), "first", "a");
    errors.add_simple_error(ErrorClass::Analysis, sref(2, 0), "second", "b");
    assert_eq!(errors.len(), 2);
    assert_eq!(errors.iter().next().unwrap().title(), "first");
  }

  #[test]
  fn error_ids_are_partitioned_by_class() {
    let e = Error::new(ErrorClass::Analysis, "x");
    assert_eq!(e.id() & 0xffff_0000, ErrorClass::Analysis as u32);
  }

  #[test]
  fn context_is_clamped_to_file_bounds() {
    let mut map = SourceMap::new();
    map.add_file(Rc::from("t.j"), "a\nb\nc\n");
    let ctx = map.context("t.j", 1, 2);
    assert_eq!(ctx.first().unwrap().0, 1);
    assert_eq!(ctx.last().unwrap().0, 3);
  }
}
