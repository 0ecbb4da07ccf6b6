use crate::framing::HEADER_LEN;
use byteorder::{ByteOrder, LE};
use std::fmt;
use thiserror::Error;

/// A frame that doesn't match the layout we know for its command.
///
/// Every variant names the field at fault, offsets are counted from the start of the frame
/// (header included) so they can be fed straight into [`hex_dump`](crate::hexdump::hex_dump) highlights.
#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum DecodeError {
    #[error("{field}: string padding not zero at offset {offset:#x} (found {value:#04x})")]
    Padding {
        field: &'static str,
        offset: usize,
        value: u8,
    },
    #[error("{field}: value is not {expected}: {actual}")]
    Reserved {
        field: &'static str,
        expected: u32,
        actual: u32,
    },
    #[error("{field}: value {value} is not one of {allowed:?}")]
    NotInSet {
        field: &'static str,
        value: u32,
        allowed: &'static [u32],
    },
    #[error("{field}: expected bytes {}, found {}", hex::encode(.expected), hex::encode(.actual))]
    BadBytes {
        field: &'static str,
        expected: Vec<u8>,
        actual: Vec<u8>,
    },
    #[error("frame is {actual:#x} bytes, layout needs {}{needed:#x}", if *.exact { "" } else { "at least " })]
    Length {
        needed: usize,
        actual: usize,
        exact: bool,
    },
    #[error("bad frame header: {0}")]
    Header(String),
}

impl DecodeError {
    /// Frame offset of the offending byte, when the error is about a single position
    pub fn offset(&self) -> Option<usize> {
        match self {
            DecodeError::Padding { offset, .. } => Some(*offset),
            _ => None,
        }
    }
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub enum FieldValue {
    Int(u64),
    Text(String),
    Bool(bool),
    List(Vec<FieldValue>),
}

impl FieldValue {
    pub fn as_int(&self) -> Option<u64> {
        match self {
            FieldValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[FieldValue]> {
        match self {
            FieldValue::List(l) => Some(l),
            _ => None,
        }
    }
}

impl From<u8> for FieldValue {
    fn from(v: u8) -> Self {
        FieldValue::Int(v.into())
    }
}

impl From<u32> for FieldValue {
    fn from(v: u32) -> Self {
        FieldValue::Int(v.into())
    }
}

impl From<usize> for FieldValue {
    fn from(v: usize) -> Self {
        FieldValue::Int(v as u64)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Text(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Text(v.to_owned())
    }
}

impl From<Vec<String>> for FieldValue {
    fn from(v: Vec<String>) -> Self {
        FieldValue::List(v.into_iter().map(FieldValue::Text).collect())
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Int(v) => write!(f, "{}", v),
            FieldValue::Text(s) => write!(f, "{:?}", s),
            FieldValue::Bool(b) => write!(f, "{}", b),
            FieldValue::List(l) => {
                f.write_str("[")?;
                for (i, v) in l.iter().enumerate() {
                    if i != 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                f.write_str("]")
            }
        }
    }
}

/// Field name to value, in wire order.
///
/// Only ever built by a decoder that accepted the whole frame.
#[derive(Eq, PartialEq, Debug, Clone, Default)]
pub struct DecodedFields {
    fields: Vec<(&'static str, FieldValue)>,
}

impl DecodedFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, name: &'static str, value: impl Into<FieldValue>) {
        self.fields.push((name, value.into()));
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &FieldValue)> {
        self.fields.iter().map(|(n, v)| (*n, v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl fmt::Display for DecodedFields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (name, value)) in self.fields.iter().enumerate() {
            if i != 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}: {}", name, value)?;
        }
        Ok(())
    }
}

/// Walks a frame body whose total length was checked up front, so reads can't run out of bytes
pub(crate) struct FieldReader<'a> {
    frame: &'a [u8],
    pos: usize,
}

impl<'a> FieldReader<'a> {
    /// The frame (header included) must be exactly `len` bytes
    pub(crate) fn exact(frame: &'a [u8], len: usize) -> Result<Self, DecodeError> {
        if frame.len() != len {
            return Err(DecodeError::Length {
                needed: len,
                actual: frame.len(),
                exact: true,
            });
        }
        Ok(Self {
            frame,
            pos: HEADER_LEN,
        })
    }

    /// The frame must have at least `len` bytes, anything past that is left alone
    pub(crate) fn prefix(frame: &'a [u8], len: usize) -> Result<Self, DecodeError> {
        if frame.len() < len {
            return Err(DecodeError::Length {
                needed: len,
                actual: frame.len(),
                exact: false,
            });
        }
        Ok(Self {
            frame,
            pos: HEADER_LEN,
        })
    }

    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    pub(crate) fn bytes(&mut self, len: usize) -> &'a [u8] {
        let out = &self.frame[self.pos..self.pos + len];
        self.pos += len;
        out
    }

    pub(crate) fn u8(&mut self) -> u8 {
        self.bytes(1)[0]
    }

    pub(crate) fn u32(&mut self) -> u32 {
        LE::read_u32(self.bytes(4))
    }

    /// A byte that has only ever been seen with one value
    pub(crate) fn reserved_u8(&mut self, field: &'static str, expected: u8) -> Result<u8, DecodeError> {
        let actual = self.u8();
        if actual != expected {
            return Err(DecodeError::Reserved {
                field,
                expected: expected.into(),
                actual: actual.into(),
            });
        }
        Ok(actual)
    }

    /// 0 or 1, anything else is an error
    pub(crate) fn bool(&mut self, field: &'static str) -> Result<bool, DecodeError> {
        match self.u8() {
            0 => Ok(false),
            1 => Ok(true),
            x => Err(DecodeError::NotInSet {
                field,
                value: x.into(),
                allowed: &[0, 1],
            }),
        }
    }

    /// NUL terminated text in a `width` bytes slot.
    /// Every byte after the first NUL must also be NUL.
    pub(crate) fn string(&mut self, field: &'static str, width: usize) -> Result<String, DecodeError> {
        let start = self.pos;
        let slot = self.bytes(width);
        let end = slot.iter().position(|&c| c == 0).unwrap_or(width);
        if let Some(bad) = slot[end..].iter().position(|&c| c != 0) {
            return Err(DecodeError::Padding {
                field,
                offset: start + end + bad,
                value: slot[end + bad],
            });
        }
        Ok(String::from_utf8_lossy(&slot[..end]).into_owned())
    }

    /// Same as [`string`](Self::string), but whatever follows the first NUL is ignored
    pub(crate) fn string_lenient(&mut self, width: usize) -> String {
        let slot = self.bytes(width);
        let end = slot.iter().position(|&c| c == 0).unwrap_or(width);
        String::from_utf8_lossy(&slot[..end]).into_owned()
    }

    /// A block that must be all zeroes
    pub(crate) fn zeroes(&mut self, field: &'static str, width: usize) -> Result<(), DecodeError> {
        let start = self.pos;
        let block = self.bytes(width);
        if let Some(bad) = block.iter().position(|&c| c != 0) {
            return Err(DecodeError::Padding {
                field,
                offset: start + bad,
                value: block[bad],
            });
        }
        Ok(())
    }

    /// Fixed bytes that must match exactly
    pub(crate) fn expect_bytes(&mut self, field: &'static str, expected: &[u8]) -> Result<(), DecodeError> {
        let actual = self.bytes(expected.len());
        if actual != expected {
            return Err(DecodeError::BadBytes {
                field,
                expected: expected.to_vec(),
                actual: actual.to_vec(),
            });
        }
        Ok(())
    }
}
