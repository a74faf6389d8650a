//! CLI surface: flag parsing for the `jcc` binary, built on `clap`'s
//! derive API.

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "jcc", about = "Single-translation-unit compiler core for jlang")]
pub struct Cli {
  /// Source file to compile.
  pub source: PathBuf,

  /// Compile only, do not link.
  #[arg(short = 'c', long = "compile")]
  pub compile_only: bool,

  /// Output file name.
  #[arg(short = 'o', long = "output", default_value = "a.out")]
  pub output: PathBuf,

  /// Include directory (repeatable).
  #[arg(short = 'I', long = "include")]
  pub include: Vec<PathBuf>,

  /// Optimization level, 0-3.
  #[arg(short = 'O', long = "optimization-level", default_value_t = 2, value_parser = clap::value_parser!(u8).range(0..=3))]
  pub optimization_level: u8,

  /// Dump MIR to `<output>.mir`.
  #[arg(long = "output-mir")]
  pub output_mir: bool,

  /// Dump backend IR to `<output>.ll`.
  #[arg(long = "output-llvm-ir")]
  pub output_llvm_ir: bool,

  /// Verbose progress.
  #[arg(short = 'v', long = "verbose")]
  pub verbose: bool,
}

impl Cli {
  /// `clap`'s own usage-and-exit behavior on a missing positional or
  /// unknown flag already prints usage and exits with an error; this
  /// just centralizes the exit code to 255, not clap's default of 2.
  #[must_use] pub fn parse_or_exit() -> Self {
    match Self::try_parse() {
      Ok(cli) => cli,
      Err(e) => {
        let _ = e.print();
        std::process::exit(255);
      }
    }
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn default_optimization_level_is_two() {
    let cli = Cli::parse_from(["jcc", "main.j"]);
    assert_eq!(cli.optimization_level, 2);
    assert_eq!(cli.output, PathBuf::from("a.out"));
    assert!(!cli.compile_only);
  }

  #[test]
  fn repeated_include_flags_accumulate() {
    let cli = Cli::parse_from(["jcc", "-I", "a", "-I", "b", "main.j"]);
    assert_eq!(cli.include, vec![PathBuf::from("a"), PathBuf::from("b")]);
  }

  #[test]
  fn optimization_level_out_of_range_is_rejected() {
    let result = Cli::try_parse_from(["jcc", "-O", "4", "main.j"]);
    assert!(result.is_err());
  }
}
