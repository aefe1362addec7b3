//! Box model and bounds-checked box reader.
//!
//! Every box is `LBox (u32 BE) | TBox (4 bytes) | [XLBox (u64 BE)] | payload`.
//! `LBox` counts the header; `1` means the 64-bit `XLBox` follows and `0`
//! means the box runs to the end of the enclosing buffer.

use std::fmt;
use std::io::{Cursor, Read};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use super::ContainerError;

/// Header size of a box without an extended length.
pub const BOX_HEADER_LEN: usize = 8;

/// Header size of a box carrying a 64-bit extended length.
pub const EXTENDED_BOX_HEADER_LEN: usize = 16;

/// Maximum superbox nesting accepted by the parser.
pub const MAX_NESTING_DEPTH: usize = 8;

/// Four-character box type code.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoxType(pub [u8; 4]);

impl BoxType {
    /// Superbox holding a description box and content boxes
    pub const SUPERBOX: BoxType = BoxType(*b"jumb");
    /// Description box (UUID, toggles, label)
    pub const DESCRIPTION: BoxType = BoxType(*b"jumd");
    /// CBOR content box
    pub const CBOR: BoxType = BoxType(*b"cbor");
    /// JSON content box
    pub const JSON: BoxType = BoxType(*b"json");
    /// Claim signature box
    pub const SIGNATURE: BoxType = BoxType(*b"c2cs");
    /// Remote manifest request box (proof reference URI)
    pub const REQUEST: BoxType = BoxType(*b"c2rq");

    pub fn is_superbox(&self) -> bool {
        *self == Self::SUPERBOX
    }

    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }
}

impl fmt::Debug for BoxType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BoxType({})", String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Display for BoxType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

/// Payload of a parsed box.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoxPayload {
    Raw(Vec<u8>),
    Nested(Vec<ContainerBox>),
}

/// A parsed (or to-be-written) box.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerBox {
    pub box_type: BoxType,
    pub payload: BoxPayload,
}

impl ContainerBox {
    pub fn raw(box_type: BoxType, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            box_type,
            payload: BoxPayload::Raw(payload.into()),
        }
    }

    pub fn nested(box_type: BoxType, children: Vec<ContainerBox>) -> Self {
        Self {
            box_type,
            payload: BoxPayload::Nested(children),
        }
    }

    pub fn raw_payload(&self) -> Option<&[u8]> {
        match &self.payload {
            BoxPayload::Raw(bytes) => Some(bytes),
            BoxPayload::Nested(_) => None,
        }
    }

    pub fn children(&self) -> &[ContainerBox] {
        match &self.payload {
            BoxPayload::Raw(_) => &[],
            BoxPayload::Nested(children) => children,
        }
    }

    /// Payload size in bytes once serialized.
    pub fn payload_len(&self) -> usize {
        match &self.payload {
            BoxPayload::Raw(bytes) => bytes.len(),
            BoxPayload::Nested(children) => children.iter().map(ContainerBox::encoded_len).sum(),
        }
    }

    /// Full box size including its header.
    pub fn encoded_len(&self) -> usize {
        let payload = self.payload_len();
        if payload + BOX_HEADER_LEN > u32::MAX as usize {
            payload + EXTENDED_BOX_HEADER_LEN
        } else {
            payload + BOX_HEADER_LEN
        }
    }

    /// Append the serialized box to `out`. The declared length always equals
    /// header plus payload.
    pub fn write_to(&self, out: &mut Vec<u8>) -> Result<(), ContainerError> {
        let total = self.encoded_len();
        if total - self.payload_len() == EXTENDED_BOX_HEADER_LEN {
            out.write_u32::<BigEndian>(1)?;
            out.extend_from_slice(&self.box_type.0);
            out.write_u64::<BigEndian>(total as u64)?;
        } else {
            out.write_u32::<BigEndian>(total as u32)?;
            out.extend_from_slice(&self.box_type.0);
        }

        match &self.payload {
            BoxPayload::Raw(bytes) => out.extend_from_slice(bytes),
            BoxPayload::Nested(children) => {
                for child in children {
                    child.write_to(out)?;
                }
            }
        }
        Ok(())
    }
}

/// Bounds-checked reader over a box buffer.
pub struct BoxCursor<'a> {
    inner: Cursor<&'a [u8]>,
}

impl<'a> BoxCursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            inner: Cursor::new(buf),
        }
    }

    pub fn position(&self) -> usize {
        self.inner.position() as usize
    }

    pub fn remaining(&self) -> usize {
        self.inner.get_ref().len().saturating_sub(self.position())
    }

    pub fn read_u8(&mut self) -> Result<u8, ContainerError> {
        Ok(self.inner.read_u8()?)
    }

    pub fn read_u32(&mut self) -> Result<u32, ContainerError> {
        Ok(self.inner.read_u32::<BigEndian>()?)
    }

    pub fn read_u64(&mut self) -> Result<u64, ContainerError> {
        Ok(self.inner.read_u64::<BigEndian>()?)
    }

    pub fn read_type(&mut self) -> Result<BoxType, ContainerError> {
        let mut code = [0u8; 4];
        self.inner.read_exact(&mut code)?;
        Ok(BoxType(code))
    }

    /// Borrow the next `len` bytes without copying.
    pub fn take(&mut self, len: usize) -> Result<&'a [u8], ContainerError> {
        if len > self.remaining() {
            return Err(ContainerError::UnexpectedEof);
        }
        let start = self.position();
        let buf: &'a [u8] = *self.inner.get_ref();
        self.inner.set_position((start + len) as u64);
        Ok(&buf[start..start + len])
    }

    /// Read one box header, returning the type and the payload slice.
    pub fn next_box(&mut self) -> Result<(BoxType, &'a [u8]), ContainerError> {
        let start_remaining = self.remaining();
        let declared = self.read_u32()? as u64;
        let box_type = self.read_type()?;

        let (total, header) = match declared {
            0 => (start_remaining as u64, BOX_HEADER_LEN),
            1 => (self.read_u64()?, EXTENDED_BOX_HEADER_LEN),
            n => (n, BOX_HEADER_LEN),
        };

        if total < header as u64 {
            return Err(ContainerError::InvalidBoxHeader(box_type));
        }
        if total > start_remaining as u64 {
            return Err(ContainerError::LengthExceedsBuffer {
                box_type,
                declared: total,
                available: start_remaining as u64,
            });
        }

        let payload = self.take(total as usize - header)?;
        Ok((box_type, payload))
    }
}

/// Parse a run of sibling boxes, stopping quietly at the first malformed one.
///
/// Returns the boxes parsed before the failure plus the failure, if any.
pub fn parse_boxes(
    buf: &[u8],
    depth: usize,
) -> (Vec<ContainerBox>, Option<ContainerError>) {
    let mut cursor = BoxCursor::new(buf);
    let mut boxes = Vec::new();

    while cursor.remaining() > 0 {
        let (box_type, payload) = match cursor.next_box() {
            Ok(next) => next,
            Err(e) => return (boxes, Some(e)),
        };

        if box_type.is_superbox() {
            if depth >= MAX_NESTING_DEPTH {
                return (boxes, Some(ContainerError::NestingTooDeep));
            }
            let (children, err) = parse_boxes(payload, depth + 1);
            boxes.push(ContainerBox::nested(box_type, children));
            if let Some(e) = err {
                return (boxes, Some(e));
            }
        } else {
            boxes.push(ContainerBox::raw(box_type, payload));
        }
    }

    (boxes, None)
}
