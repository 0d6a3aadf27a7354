//! Revision wire format decoding.
//!
//! ## Grammar
//!
//! ```text
//! opString := record*
//! record   := opcode count [':' lineCount] ['*' attrIndex]*
//! opcode   := '+' | '-' | '='
//! ```
//!
//! `count`, `lineCount` and `attrIndex` are unsigned base-36 integers. The
//! char bank holds the literal text of every insert, consumed left to right
//! across the whole revision.
//!
//! Decoding is lazy: [`decode_operations`] returns an iterator that parses
//! one record per `next()` and stops after the first error.
//!
//! Revisions are persisted packed (`Z:` header, ops, `$`, char bank); see
//! [`RawChangeset`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::Chars;
use thiserror::Error;

/// Errors from decoding the wire format.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// An op record could not be parsed.
    #[error("Malformed delta at byte {offset}: {reason}")]
    MalformedDelta {
        /// Byte offset into the op string.
        offset: usize,
        /// What was wrong.
        reason: String,
    },

    /// A packed changeset header could not be parsed.
    #[error("Malformed changeset header: {0}")]
    MalformedHeader(String),
}

impl CodecError {
    fn malformed(offset: usize, reason: impl Into<String>) -> Self {
        Self::MalformedDelta {
            offset,
            reason: reason.into(),
        }
    }
}

/// One decoded op record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    /// Insert `count` characters from the char bank.
    Insert {
        /// Characters to insert.
        count: u64,
        /// Line breaks among them.
        lines: u64,
        /// Pool indices applied to the inserted text.
        attrs: Vec<u32>,
    },
    /// Move over `count` existing characters, optionally changing attributes.
    Retain {
        /// Characters to move over.
        count: u64,
        /// Line breaks among them.
        lines: u64,
        /// Pool indices applied to the retained text, if any.
        attrs: Option<Vec<u32>>,
    },
    /// Remove `count` characters after the cursor.
    Delete {
        /// Characters to remove.
        count: u64,
        /// Line breaks among them.
        lines: u64,
    },
}

impl Operation {
    /// Character count of the record.
    pub fn count(&self) -> u64 {
        match self {
            Self::Insert { count, .. } | Self::Retain { count, .. } | Self::Delete { count, .. } => {
                *count
            }
        }
    }

    /// Wire opcode of the record.
    pub fn opcode(&self) -> char {
        match self {
            Self::Insert { .. } => '+',
            Self::Delete { .. } => '-',
            Self::Retain { .. } => '=',
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let none: &[u32] = &[];
        let (count, lines, attrs) = match self {
            Self::Insert { count, lines, attrs } => (*count, *lines, attrs.as_slice()),
            Self::Retain { count, lines, attrs } => (*count, *lines, attrs.as_deref().unwrap_or(none)),
            Self::Delete { count, lines } => (*count, *lines, none),
        };
        write!(f, "{}{}", self.opcode(), to_base36(count))?;
        if lines > 0 {
            write!(f, ":{}", to_base36(lines))?;
        }
        for a in attrs {
            write!(f, "*{}", to_base36(u64::from(*a)))?;
        }
        Ok(())
    }
}

/// Encode a sequence of operations into an op string.
pub fn encode_operations<'a>(ops: impl IntoIterator<Item = &'a Operation>) -> String {
    ops.into_iter().map(|op| op.to_string()).collect()
}

/// Lazy decoder over an op string.
#[derive(Debug, Clone)]
pub struct Operations<'a> {
    src: &'a [u8],
    pos: usize,
    done: bool,
}

/// Start decoding an op string.
pub fn decode_operations(op_string: &str) -> Operations<'_> {
    Operations {
        src: op_string.as_bytes(),
        pos: 0,
        done: false,
    }
}

impl<'a> Operations<'a> {
    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    /// Read base-36 digits at the cursor. `None` when there are none.
    fn read_number(&mut self) -> Result<Option<u64>, CodecError> {
        let start = self.pos;
        let mut value: u64 = 0;
        while let Some(digit) = self.peek().and_then(base36_digit) {
            value = value
                .checked_mul(36)
                .and_then(|v| v.checked_add(u64::from(digit)))
                .ok_or_else(|| CodecError::malformed(start, "number overflows u64"))?;
            self.pos += 1;
        }
        Ok((self.pos > start).then_some(value))
    }

    fn read_attrs(&mut self) -> Result<Vec<u32>, CodecError> {
        let mut attrs = Vec::new();
        while self.peek() == Some(b'*') {
            self.pos += 1;
            let start = self.pos;
            while let Some(b) = self.peek() {
                if b == b'*' || is_opcode(b) {
                    break;
                }
                self.pos += 1;
            }
            let token = &self.src[start..self.pos];
            match parse_index(token) {
                Some(index) => attrs.push(index),
                // Upstream editors emit empty leading tokens; drop them.
                None if attrs.is_empty() => {}
                None => {
                    return Err(CodecError::malformed(
                        start,
                        format!("bad attribute index {:?}", String::from_utf8_lossy(token)),
                    ))
                }
            }
        }
        Ok(attrs)
    }

    fn read_record(&mut self) -> Result<Operation, CodecError> {
        let at = self.pos;
        let opcode = self.src[at];
        if !is_opcode(opcode) {
            return Err(CodecError::malformed(
                at,
                format!("unknown opcode {:?}", opcode as char),
            ));
        }
        self.pos += 1;

        let count = self
            .read_number()?
            .ok_or_else(|| CodecError::malformed(self.pos, "missing count"))?;

        let lines = if self.peek() == Some(b':') {
            self.pos += 1;
            self.read_number()?
                .ok_or_else(|| CodecError::malformed(self.pos, "missing line count"))?
        } else {
            0
        };

        let attrs = self.read_attrs()?;

        if let Some(b) = self.peek() {
            if !is_opcode(b) {
                return Err(CodecError::malformed(
                    self.pos,
                    format!("unexpected {:?} after record", b as char),
                ));
            }
        }

        Ok(match opcode {
            b'+' => Operation::Insert { count, lines, attrs },
            b'=' => Operation::Retain {
                count,
                lines,
                attrs: (!attrs.is_empty()).then_some(attrs),
            },
            _ => Operation::Delete { count, lines },
        })
    }
}

impl<'a> Iterator for Operations<'a> {
    type Item = Result<Operation, CodecError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.pos >= self.src.len() {
            return None;
        }
        let record = self.read_record();
        if record.is_err() {
            self.done = true;
        }
        Some(record)
    }
}

impl std::iter::FusedIterator for Operations<'_> {}

fn is_opcode(b: u8) -> bool {
    matches!(b, b'+' | b'-' | b'=')
}

fn parse_index(token: &[u8]) -> Option<u32> {
    if token.is_empty() {
        return None;
    }
    let mut value: u32 = 0;
    for &b in token {
        let digit = base36_digit(b)?;
        value = value.checked_mul(36)?.checked_add(digit)?;
    }
    Some(value)
}

/// Decode a standalone attribute reference block such as `*5*c`.
///
/// Applies the same rules as inside an op record: leading unparsable
/// tokens are dropped, a later unparsable token is an error.
pub fn parse_attr_refs(block: &str) -> Result<Vec<u32>, CodecError> {
    let mut ops = Operations {
        src: block.as_bytes(),
        pos: 0,
        done: false,
    };
    let attrs = ops.read_attrs()?;
    if ops.pos < ops.src.len() {
        return Err(CodecError::malformed(ops.pos, "trailing bytes after attributes"));
    }
    Ok(attrs)
}

/// Format a number in lowercase base 36.
pub fn to_base36(mut n: u64) -> String {
    if n == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while n > 0 {
        let d = (n % 36) as u32;
        digits.push(std::char::from_digit(d, 36).unwrap_or('0'));
        n /= 36;
    }
    digits.iter().rev().collect()
}

/// Value of one base-36 digit. The wire format is lowercase only.
fn base36_digit(b: u8) -> Option<u32> {
    match b {
        b'0'..=b'9' => Some(u32::from(b - b'0')),
        b'a'..=b'z' => Some(u32::from(b - b'a') + 10),
        _ => None,
    }
}

fn parse_base36(s: &str) -> Option<u64> {
    if s.is_empty() {
        return None;
    }
    s.bytes().try_fold(0u64, |value, b| {
        value.checked_mul(36)?.checked_add(u64::from(base36_digit(b)?))
    })
}

/// Pulls insert text out of a revision's char bank, one character at a time.
#[derive(Debug, Clone)]
pub struct CharBank<'a> {
    chars: Chars<'a>,
}

impl<'a> CharBank<'a> {
    /// Wrap a char bank string.
    pub fn new(bank: &'a str) -> Self {
        Self { chars: bank.chars() }
    }

    /// Next character, or `None` when the bank is exhausted.
    pub fn next_char(&mut self) -> Option<char> {
        self.chars.next()
    }

    /// Characters still available.
    pub fn remaining(&self) -> usize {
        self.chars.clone().count()
    }
}

/// A changeset split into header fields, ops and char bank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawChangeset {
    /// Length before the change.
    pub old_len: u64,
    /// Length after the change.
    pub new_len: u64,
    /// Encoded op records.
    pub ops: String,
    /// Inserted text.
    pub char_bank: String,
}

impl RawChangeset {
    /// Split a packed changeset `Z:<old>(>|<)<diff><ops>$<bank>`.
    pub fn unpack(packed: &str) -> Result<Self, CodecError> {
        let body = packed
            .strip_prefix("Z:")
            .ok_or_else(|| CodecError::MalformedHeader("missing Z: prefix".to_string()))?;

        let sign_at = body
            .find(['>', '<'])
            .ok_or_else(|| CodecError::MalformedHeader("missing length sign".to_string()))?;
        let old_len = parse_base36(&body[..sign_at])
            .ok_or_else(|| CodecError::MalformedHeader("bad old length".to_string()))?;
        let growing = body.as_bytes()[sign_at] == b'>';

        let rest = &body[sign_at + 1..];
        let diff_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c.is_ascii_lowercase()))
            .unwrap_or(rest.len());
        let diff = parse_base36(&rest[..diff_end])
            .ok_or_else(|| CodecError::MalformedHeader("bad length diff".to_string()))?;

        let new_len = if growing {
            old_len.checked_add(diff)
        } else {
            old_len.checked_sub(diff)
        }
        .ok_or_else(|| CodecError::MalformedHeader("new length out of range".to_string()))?;

        let rest = &rest[diff_end..];
        let (ops, char_bank) = match rest.find('$') {
            Some(i) => (&rest[..i], &rest[i + 1..]),
            None => (rest, ""),
        };

        Ok(Self {
            old_len,
            new_len,
            ops: ops.to_string(),
            char_bank: char_bank.to_string(),
        })
    }

    /// Inverse of [`RawChangeset::unpack`].
    pub fn pack(&self) -> String {
        let (sign, diff) = if self.new_len >= self.old_len {
            ('>', self.new_len - self.old_len)
        } else {
            ('<', self.old_len - self.new_len)
        };
        format!(
            "Z:{}{}{}{}${}",
            to_base36(self.old_len),
            sign,
            to_base36(diff),
            self.ops,
            self.char_bank
        )
    }
}
