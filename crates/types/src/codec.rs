//! Self-delimiting binary term encoding.
//!
//! An encoded term is a 4-byte big-endian body length followed by a UTF-8
//! body in an N-Triples-like syntax:
//!
//! | Term      | Body                                          |
//! |-----------|-----------------------------------------------|
//! | URI       | `<` escaped-uri `>`                           |
//! | Blank     | `_:` label                                    |
//! | Literal   | `"` escaped-lexical `"` [`@` lang] [`^^<` escaped-uri `>`] |
//! | Variable  | `?` name                                      |
//! | Any       | `ANY`                                         |
//!
//! Inside URIs, `_` and space are written as `_5F` and `_20`. Inside lexical
//! forms, `"`, `\`, newline, carriage return, and tab are backslash-escaped.

use snafu::{Snafu, ensure};

use crate::term::{Literal, Term};

/// Size of the body length prefix.
pub const LENGTH_PREFIX: usize = 4;

/// Fixed per-term overhead counted by [`max_size`] on top of escaped strings.
const FIXED_OVERHEAD: usize = 16;

/// Error type for codec operations.
#[derive(Debug, Snafu)]
pub enum CodecError {
    /// Input bytes are not a valid encoded term.
    #[snafu(display("Term decoding failed: {reason}"))]
    Decode {
        /// What was wrong with the input.
        reason: String,
    },

    /// Output buffer is too small for the encoded term.
    #[snafu(display("Encode buffer too small: need {needed} bytes, have {available}"))]
    Truncated {
        /// Bytes required.
        needed: usize,
        /// Bytes available.
        available: usize,
    },

    /// The term has no encoding.
    #[snafu(display("Term cannot be encoded: {reason}"))]
    Unrepresentable {
        /// Why the term cannot be encoded.
        reason: String,
    },
}

/// Returns an upper bound on the encoded length of `term`.
pub fn max_size(term: &Term) -> usize {
    let strings = match term {
        Term::Uri(s) | Term::Blank(s) | Term::Variable(s) => s.len(),
        Term::Literal(lit) => {
            lit.lexical().len()
                + lit.language().map_or(0, str::len)
                + lit.datatype().map_or(0, str::len)
        },
        Term::Any => 0,
    };
    // Every escape expands one byte to at most three.
    LENGTH_PREFIX + FIXED_OVERHEAD + 3 * strings
}

/// Encodes `term` into `buf`, returning the number of bytes written.
///
/// # Errors
///
/// Returns [`CodecError::Truncated`] if `buf` is too small, and
/// [`CodecError::Unrepresentable`] for a malformed language tag.
pub fn encode(term: &Term, buf: &mut [u8]) -> Result<usize, CodecError> {
    let body = encode_body(term)?;
    let needed = LENGTH_PREFIX + body.len();
    ensure!(buf.len() >= needed, TruncatedSnafu { needed, available: buf.len() });
    let len = body_len(&body)?;
    buf[..LENGTH_PREFIX].copy_from_slice(&len.to_be_bytes());
    buf[LENGTH_PREFIX..needed].copy_from_slice(body.as_bytes());
    Ok(needed)
}

/// Encodes `term` into a freshly allocated buffer.
///
/// # Errors
///
/// Returns [`CodecError::Unrepresentable`] for a malformed language tag.
pub fn encode_to_vec(term: &Term) -> Result<Vec<u8>, CodecError> {
    let body = encode_body(term)?;
    let len = body_len(&body)?;
    let mut out = Vec::with_capacity(LENGTH_PREFIX + body.len());
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(body.as_bytes());
    Ok(out)
}

/// Decodes a term that occupies the whole of `buf`.
///
/// # Errors
///
/// Returns [`CodecError::Decode`] for malformed input or trailing bytes.
pub fn decode(buf: &[u8]) -> Result<Term, CodecError> {
    let (term, used) = decode_prefix(buf)?;
    ensure!(
        used == buf.len(),
        DecodeSnafu { reason: format!("{} trailing bytes", buf.len() - used) }
    );
    Ok(term)
}

/// Decodes one term from the front of `buf`, returning it and the bytes consumed.
///
/// # Errors
///
/// Returns [`CodecError::Decode`] for malformed input.
pub fn decode_prefix(buf: &[u8]) -> Result<(Term, usize), CodecError> {
    let body = body_of(buf)?;
    let text = std::str::from_utf8(body)
        .map_err(|e| CodecError::Decode { reason: format!("body is not UTF-8: {e}") })?;
    Ok((parse_body(text)?, LENGTH_PREFIX + body.len()))
}

/// Returns the body bytes of the encoded term at the front of `buf`.
pub(crate) fn body_of(buf: &[u8]) -> Result<&[u8], CodecError> {
    let prefix: [u8; LENGTH_PREFIX] = buf
        .get(..LENGTH_PREFIX)
        .and_then(|p| p.try_into().ok())
        .ok_or_else(|| CodecError::Decode { reason: "missing length prefix".to_string() })?;
    let len = u32::from_be_bytes(prefix) as usize;
    buf.get(LENGTH_PREFIX..LENGTH_PREFIX + len).ok_or_else(|| CodecError::Decode {
        reason: format!("body truncated: need {len} bytes, have {}", buf.len() - LENGTH_PREFIX),
    })
}

/// Renders the body of `term`.
pub(crate) fn encode_body(term: &Term) -> Result<String, CodecError> {
    let mut out = String::with_capacity(max_size(term));
    match term {
        Term::Uri(uri) => push_uri(&mut out, uri),
        Term::Blank(label) => {
            out.push_str("_:");
            out.push_str(label);
        },
        Term::Literal(lit) => push_literal(&mut out, lit)?,
        Term::Variable(name) => {
            out.push('?');
            out.push_str(name);
        },
        Term::Any => out.push_str("ANY"),
    }
    Ok(out)
}

fn body_len(body: &str) -> Result<u32, CodecError> {
    u32::try_from(body.len()).map_err(|_| CodecError::Unrepresentable {
        reason: format!("encoded body of {} bytes exceeds u32", body.len()),
    })
}

fn push_uri(out: &mut String, uri: &str) {
    out.push('<');
    for c in uri.chars() {
        match c {
            '_' => out.push_str("_5F"),
            ' ' => out.push_str("_20"),
            c => out.push(c),
        }
    }
    out.push('>');
}

fn push_literal(out: &mut String, lit: &Literal) -> Result<(), CodecError> {
    out.push('"');
    for c in lit.lexical().chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('"');
    if let Some(lang) = lit.language() {
        ensure!(
            is_valid_language(lang),
            UnrepresentableSnafu { reason: format!("invalid language tag {lang:?}") }
        );
        out.push('@');
        out.push_str(lang);
    }
    if let Some(datatype) = lit.datatype() {
        out.push_str("^^");
        push_uri(out, datatype);
    }
    Ok(())
}

fn is_valid_language(lang: &str) -> bool {
    !lang.is_empty() && lang.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

fn decode_error(reason: impl Into<String>) -> CodecError {
    CodecError::Decode { reason: reason.into() }
}

fn parse_body(body: &str) -> Result<Term, CodecError> {
    if body == "ANY" {
        return Ok(Term::Any);
    }
    if let Some(label) = body.strip_prefix("_:") {
        return Ok(Term::Blank(label.to_string()));
    }
    if let Some(name) = body.strip_prefix('?') {
        return Ok(Term::Variable(name.to_string()));
    }
    if body.starts_with('<') {
        return Ok(Term::Uri(parse_uri(body)?));
    }
    if let Some(rest) = body.strip_prefix('"') {
        return parse_literal(rest);
    }
    Err(decode_error(format!("unrecognised term body {body:?}")))
}

/// Parses `<escaped>` occupying the whole of `s`.
fn parse_uri(s: &str) -> Result<String, CodecError> {
    let inner = s
        .strip_prefix('<')
        .and_then(|s| s.strip_suffix('>'))
        .ok_or_else(|| decode_error("unterminated URI"))?;
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        match c {
            '_' => {
                let hex: String = chars.by_ref().take(2).collect();
                match hex.as_str() {
                    "5F" => out.push('_'),
                    "20" => out.push(' '),
                    _ => return Err(decode_error(format!("bad URI escape _{hex}"))),
                }
            },
            ' ' => return Err(decode_error("unescaped space in URI")),
            c => out.push(c),
        }
    }
    Ok(out)
}

/// Parses a literal; `rest` starts just after the opening quote.
fn parse_literal(rest: &str) -> Result<Term, CodecError> {
    let mut lexical = String::new();
    let mut chars = rest.char_indices();
    let mut close = None;
    while let Some((i, c)) = chars.next() {
        match c {
            '"' => {
                close = Some(i);
                break;
            },
            '\\' => match chars.next().map(|(_, c)| c) {
                Some('"') => lexical.push('"'),
                Some('\\') => lexical.push('\\'),
                Some('n') => lexical.push('\n'),
                Some('r') => lexical.push('\r'),
                Some('t') => lexical.push('\t'),
                other => return Err(decode_error(format!("bad literal escape {other:?}"))),
            },
            c => lexical.push(c),
        }
    }
    let close = close.ok_or_else(|| decode_error("unterminated literal"))?;
    let mut tail = &rest[close + 1..];

    let mut language = None;
    if let Some(after_at) = tail.strip_prefix('@') {
        let end = after_at.find("^^").unwrap_or(after_at.len());
        let lang = &after_at[..end];
        if !is_valid_language(lang) {
            return Err(decode_error(format!("invalid language tag {lang:?}")));
        }
        language = Some(lang.to_string());
        tail = &after_at[end..];
    }

    let mut datatype = None;
    if let Some(dt) = tail.strip_prefix("^^") {
        datatype = Some(parse_uri(dt)?);
        tail = "";
    }

    if !tail.is_empty() {
        return Err(decode_error(format!("trailing characters after literal: {tail:?}")));
    }
    Ok(Term::Literal(Literal::new(lexical, language, datatype)))
}
