//! Integer literal parsing: suffix detection, the u32/i32 default, `_`
//! digit separators, `0x`/`0o`/`0b` radix prefixes, and per-width range
//! checks.

use crate::types::PrimitiveKind;

pub struct ParsedInt {
  pub kind: PrimitiveKind,
  pub value: i128,
}

const SUFFIXES: &[(&str, PrimitiveKind)] = &[
  ("u8", PrimitiveKind::U8), ("u16", PrimitiveKind::U16), ("u32", PrimitiveKind::U32), ("u64", PrimitiveKind::U64),
  ("i8", PrimitiveKind::I8), ("i16", PrimitiveKind::I16), ("i32", PrimitiveKind::I32), ("i64", PrimitiveKind::I64),
];

fn range(kind: PrimitiveKind) -> (i128, i128) {
  match kind {
    PrimitiveKind::U8 => (0, 0xff),
    PrimitiveKind::U16 => (0, 0xffff),
    PrimitiveKind::U32 => (0, 0xffff_ffff),
    PrimitiveKind::U64 => (0, 0xffff_ffff_ffff_ffff),
    PrimitiveKind::I8 => (-128, 127),
    PrimitiveKind::I16 => (-32768, 32767),
    PrimitiveKind::I32 => (-2_147_483_648, 2_147_483_647),
    PrimitiveKind::I64 => (i128::from(i64::MIN), i128::from(i64::MAX)),
    PrimitiveKind::F32 | PrimitiveKind::F64 | PrimitiveKind::Bool | PrimitiveKind::Void => (0, 0),
  }
}

/// Parse a literal-int token's text (the exact spelling the lexer
/// captured, sign and suffix included) into a primitive kind and value.
/// Returns `Err(message)` on a malformed or out-of-range literal.
pub fn parse_literal_int(text: &str) -> Result<ParsedInt, String> {
  let (mut body, kind) = match SUFFIXES.iter().find(|(suf, _)| text.ends_with(suf)) {
    Some(&(suf, kind)) => (text[..text.len() - suf.len()].to_owned(), kind),
    None => {
      if text.starts_with('-') { (text.to_owned(), PrimitiveKind::I32) } else { (text.to_owned(), PrimitiveKind::U32) }
    }
  };

  let negative = body.starts_with('-');
  if negative {
    body.remove(0);
  }
  if negative && kind.is_unsigned() {
    return Err(format!("type of integer literal was unsigned, but a negative value was given: {text}"));
  }

  body = body.replace('_', "");
  let radix = if let Some(rest) = body.strip_prefix("0x") { body = rest.to_owned(); 16 }
    else if let Some(rest) = body.strip_prefix("0b") { body = rest.to_owned(); 2 }
    else if let Some(rest) = body.strip_prefix("0o") { body = rest.to_owned(); 8 }
    else { 10 };

  if body.is_empty() {
    return Err(format!("empty integer literal: {text}"));
  }
  let magnitude = u128::from_str_radix(&body, radix).map_err(|_| format!("invalid integer literal: {text}"))?;
  let value: i128 = if negative { -(magnitude as i128) } else { magnitude as i128 };

  let (lo, hi) = range(kind);
  if value < lo || value > hi {
    return Err(format!("literal value {text} is outside the range of values allowed in a {}", kind.name()));
  }
  Ok(ParsedInt { kind, value })
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn defaults_to_u32_when_unsigned_and_unsuffixed() {
    let p = parse_literal_int("42").unwrap();
    assert_eq!(p.kind, PrimitiveKind::U32);
    assert_eq!(p.value, 42);
  }

  #[test]
  fn defaults_to_i32_when_negative_and_unsuffixed() {
    let p = parse_literal_int("-7").unwrap();
    assert_eq!(p.kind, PrimitiveKind::I32);
    assert_eq!(p.value, -7);
  }

  #[test]
  fn suffix_selects_width_and_signedness() {
    let p = parse_literal_int("255u8").unwrap();
    assert_eq!(p.kind, PrimitiveKind::U8);
    assert_eq!(p.value, 255);
  }

  #[test]
  fn negative_unsigned_is_rejected() {
    assert!(parse_literal_int("-1u32").is_err());
  }

  #[test]
  fn hex_and_underscores_are_supported() {
    let p = parse_literal_int("0xFF_00u16").unwrap();
    assert_eq!(p.value, 0xff00);
  }

  #[test]
  fn binary_prefix_is_supported() {
    let p = parse_literal_int("0b1010u8").unwrap();
    assert_eq!(p.value, 10);
  }

  #[test]
  fn out_of_range_is_rejected() {
    assert!(parse_literal_int("256u8").is_err());
  }
}
