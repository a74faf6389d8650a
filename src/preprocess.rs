//! Preprocessing:
//! runs the source through `clang --language c -E`, capturing stdout to
//! `<source>.preproc`. The subprocess's exit status is propagated as an
//! IO-class error; the temporary file is removed at end-of-run
//! regardless of how the caller's scope exits.

use std::path::{Path, PathBuf};
use std::process::Command;

use log::debug;

use crate::diag::{ErrorClass, Errors, SourceRef};

/// Owns the `<source>.preproc` temp file; removed on drop so every exit
/// path (including an error return) cleans it up.
pub struct PreprocessedSource {
  path: PathBuf,
}

impl PreprocessedSource {
  #[must_use] pub fn path(&self) -> &Path { &self.path }

  pub fn contents(&self) -> std::io::Result<String> {
    std::fs::read_to_string(&self.path)
  }
}

impl Drop for PreprocessedSource {
  fn drop(&mut self) {
    if self.path.exists() {
      let _ = std::fs::remove_file(&self.path);
    }
  }
}

/// Invokes `clang --language c -E [-I dir...] <source>`, writing its
/// stdout to `<source>.preproc`. Returns `None` (after recording an
/// IO-class error) if the process can't be spawned or exits non-zero.
pub fn run(source: &Path, include_dirs: &[PathBuf], errors: &mut Errors) -> Option<PreprocessedSource> {
  let preproc_path = PathBuf::from(format!("{}.preproc", source.display()));
  debug!("preprocessing {} -> {}", source.display(), preproc_path.display());

  let mut cmd = Command::new("clang");
  cmd.arg("--language").arg("c").arg("-E");
  for dir in include_dirs {
    cmd.arg("-I").arg(dir);
  }
  cmd.arg(source);

  let output = match cmd.output() {
    Ok(output) => output,
    Err(e) => {
      errors.add_simple_error(ErrorClass::Io, SourceRef::new(path_rc(source), 0, 0, 0), "failed to run preprocessor", format!("could not spawn clang: {e}"));
      return None;
    }
  };

  if !output.status.success() {
    errors.add_simple_error(
      ErrorClass::Io,
      SourceRef::new(path_rc(source), 0, 0, 0),
      "preprocessor failed",
      format!("clang exited with {}: {}", output.status, String::from_utf8_lossy(&output.stderr)),
    );
    return None;
  }

  if let Err(e) = std::fs::write(&preproc_path, &output.stdout) {
    errors.add_simple_error(ErrorClass::Io, SourceRef::new(path_rc(source), 0, 0, 0), "failed to write preprocessed output", format!("{e}"));
    return None;
  }

  Some(PreprocessedSource { path: preproc_path })
}

fn path_rc(p: &Path) -> std::rc::Rc<str> {
  std::rc::Rc::from(p.to_string_lossy().as_ref())
}

#[cfg(test)]
mod test {
  use super::*;
  use std::io::Write as _;

  #[test]
  fn missing_source_file_is_an_io_error() {
    let mut errors = Errors::new();
    let missing = Path::new("/nonexistent/path/does-not-exist.c");
    let result = run(missing, &[], &mut errors);
    assert!(result.is_none());
    assert!(errors.has_errors());
  }

  #[test]
  fn temp_file_is_removed_on_drop() {
    let dir = tempfile::tempdir().expect("tempdir");
    let source = dir.path().join("t.c");
    let mut file = std::fs::File::create(&source).expect("create source");
    writeln!(file, "int main(void) {{ return 0; }}").expect("write source");

    let mut errors = Errors::new();
    if let Some(pre) = run(&source, &[], &mut errors) {
      let path = pre.path().to_path_buf();
      assert!(path.exists());
      drop(pre);
      assert!(!path.exists());
    }
    // if clang isn't installed in the test environment, `run` already
    // recorded an IO error and there's nothing left to assert.
  }
}
