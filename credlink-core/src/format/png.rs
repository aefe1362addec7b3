//! PNG chunk reader/writer
//!
//! Every chunk is `length (u32 BE) | type (4) | data | CRC-32 (type + data)`.
//! Provenance chunks are ancillary, private and safe-to-copy (`caBX`, `crLk`),
//! so conforming decoders skip them.

use std::io::Cursor;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use tracing::debug;

use crate::container::{BoxType, ContainerError};

pub const SIGNATURE: [u8; 8] = [137, 80, 78, 71, 13, 10, 26, 10];

pub const IHDR: [u8; 4] = *b"IHDR";
pub const IDAT: [u8; 4] = *b"IDAT";
pub const IEND: [u8; 4] = *b"IEND";
pub const ITXT: [u8; 4] = *b"iTXt";
pub const EXIF: [u8; 4] = *b"eXIf";
/// Binary manifest container chunk
pub const CONTAINER: [u8; 4] = *b"caBX";
/// Native CBOR link record chunk
pub const NATIVE: [u8; 4] = *b"crLk";

/// iTXt keyword carrying an XMP packet.
pub const XMP_KEYWORD: &str = "XML:com.adobe.xmp";

/// Length + type + CRC.
const CHUNK_OVERHEAD: usize = 12;

/// A chunk borrowed from a PNG buffer.
#[derive(Debug, Clone, Copy)]
pub struct PngChunk<'a> {
    pub chunk_type: [u8; 4],
    pub data: &'a [u8],
    pub crc: u32,
    /// Offset of the length field in the file
    pub offset: usize,
}

impl PngChunk<'_> {
    pub fn crc_ok(&self) -> bool {
        chunk_crc(&self.chunk_type, self.data) == self.crc
    }

    pub fn end(&self) -> usize {
        self.offset + CHUNK_OVERHEAD + self.data.len()
    }
}

/// Chunks read from a file, plus the error that stopped reading early.
#[derive(Debug)]
pub struct PngChunks<'a> {
    pub chunks: Vec<PngChunk<'a>>,
    pub error: Option<ContainerError>,
}

impl<'a> PngChunks<'a> {
    pub fn find(&self, chunk_type: [u8; 4]) -> Option<&PngChunk<'a>> {
        self.chunks.iter().find(|c| c.chunk_type == chunk_type)
    }
}

pub fn chunk_crc(chunk_type: &[u8; 4], data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(chunk_type);
    hasher.update(data);
    hasher.finalize()
}

/// Walk the chunk list. Stops at `IEND` or at the first chunk that does not
/// fit in the buffer. Returns `None` if the PNG signature is missing.
pub fn read_chunks(bytes: &[u8]) -> Option<PngChunks<'_>> {
    if !bytes.starts_with(&SIGNATURE) {
        return None;
    }

    let mut chunks = Vec::new();
    let mut pos = SIGNATURE.len();

    let error = loop {
        if pos == bytes.len() {
            break None;
        }
        match read_chunk(bytes, pos) {
            Ok(chunk) => {
                pos = chunk.end();
                let done = chunk.chunk_type == IEND;
                chunks.push(chunk);
                if done {
                    break None;
                }
            }
            Err(e) => break Some(e),
        }
    };

    if let Some(e) = &error {
        debug!(error = %e, chunks = chunks.len(), "PNG chunk walk stopped early");
    }
    Some(PngChunks { chunks, error })
}

fn read_chunk(bytes: &[u8], offset: usize) -> Result<PngChunk<'_>, ContainerError> {
    let mut cursor = Cursor::new(&bytes[offset..]);
    let length = cursor.read_u32::<BigEndian>()? as usize;
    let mut chunk_type = [0u8; 4];
    std::io::Read::read_exact(&mut cursor, &mut chunk_type)?;

    let available = bytes.len() - offset;
    if length > available.saturating_sub(CHUNK_OVERHEAD) {
        return Err(ContainerError::LengthExceedsBuffer {
            box_type: BoxType(chunk_type),
            declared: length as u64,
            available: available as u64,
        });
    }

    let data_start = offset + 8;
    let data = &bytes[data_start..data_start + length];
    let mut crc_bytes = &bytes[data_start + length..data_start + length + 4];
    let crc = crc_bytes.read_u32::<BigEndian>()?;

    Ok(PngChunk {
        chunk_type,
        data,
        crc,
        offset,
    })
}

pub fn write_chunk(out: &mut Vec<u8>, chunk_type: [u8; 4], data: &[u8]) -> Result<(), ContainerError> {
    let length = u32::try_from(data.len()).map_err(|_| ContainerError::LengthExceedsBuffer {
        box_type: BoxType(chunk_type),
        declared: data.len() as u64,
        available: u32::MAX as u64,
    })?;
    out.write_u32::<BigEndian>(length)?;
    out.extend_from_slice(&chunk_type);
    out.extend_from_slice(data);
    out.write_u32::<BigEndian>(chunk_crc(&chunk_type, data))?;
    Ok(())
}

/// Build an uncompressed iTXt payload.
pub fn itxt_payload(keyword: &str, text: &str) -> Vec<u8> {
    let mut data = Vec::with_capacity(keyword.len() + text.len() + 5);
    data.extend_from_slice(keyword.as_bytes());
    data.push(0); // keyword terminator
    data.push(0); // compression flag
    data.push(0); // compression method
    data.push(0); // empty language tag
    data.push(0); // empty translated keyword
    data.extend_from_slice(text.as_bytes());
    data
}

/// Split an iTXt payload into keyword and text. Compressed text is not
/// supported and yields `None`.
pub fn parse_itxt(data: &[u8]) -> Option<(&str, &str)> {
    let keyword_end = data.iter().position(|b| *b == 0)?;
    let keyword = std::str::from_utf8(&data[..keyword_end]).ok()?;

    let rest = data.get(keyword_end + 1..)?;
    let (compressed, rest) = rest.split_first()?;
    if *compressed != 0 {
        return None;
    }
    let rest = rest.get(1..)?; // compression method

    let lang_end = rest.iter().position(|b| *b == 0)?;
    let rest = &rest[lang_end + 1..];
    let translated_end = rest.iter().position(|b| *b == 0)?;
    let text = std::str::from_utf8(&rest[translated_end + 1..]).ok()?;

    Some((keyword, text))
}

/// XMP packet stored in an iTXt chunk, if any.
///
/// A packet whose chunk fails its CRC is reported as an error rather than
/// returned.
pub fn read_xmp(bytes: &[u8]) -> Option<Result<String, ContainerError>> {
    let parsed = read_chunks(bytes)?;
    let chunk = parsed.chunks.iter().find(|c| is_xmp_itxt(c))?;
    if !chunk.crc_ok() {
        return Some(Err(ContainerError::CrcMismatch(BoxType(ITXT))));
    }
    parse_itxt(chunk.data).map(|(_, text)| Ok(text.to_string()))
}

fn is_xmp_itxt(chunk: &PngChunk<'_>) -> bool {
    chunk.chunk_type == ITXT
        && parse_itxt(chunk.data).is_some_and(|(keyword, _)| keyword == XMP_KEYWORD)
}

/// Where a new chunk goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Directly after `IHDR` (required for `eXIf`, which must precede `IDAT`)
    AfterHeader,
    /// Directly before `IEND`
    BeforeEnd,
}

/// Rewrite a PNG with `chunk_type` replaced by `data`.
///
/// Existing chunks of the same type (for iTXt: the same XMP keyword) are
/// removed first. The input must be a complete PNG ending in `IEND`.
pub fn replace_chunk(
    bytes: &[u8],
    chunk_type: [u8; 4],
    data: &[u8],
    placement: Placement,
) -> Result<Vec<u8>, ContainerError> {
    let parsed = read_chunks(bytes).ok_or(ContainerError::MissingSuperbox)?;
    if let Some(e) = parsed.error {
        return Err(e);
    }
    if parsed.chunks.first().map(|c| c.chunk_type) != Some(IHDR)
        || parsed.chunks.last().map(|c| c.chunk_type) != Some(IEND)
    {
        return Err(ContainerError::InvalidBoxHeader(BoxType(IEND)));
    }

    let mut out = Vec::with_capacity(bytes.len() + data.len() + CHUNK_OVERHEAD);
    out.extend_from_slice(&SIGNATURE);

    for chunk in &parsed.chunks {
        let stale = if chunk_type == ITXT {
            is_xmp_itxt(chunk)
        } else {
            chunk.chunk_type == chunk_type
        };
        if stale {
            continue;
        }

        if chunk.chunk_type == IEND && placement == Placement::BeforeEnd {
            write_chunk(&mut out, chunk_type, data)?;
        }
        out.extend_from_slice(&bytes[chunk.offset..chunk.end()]);
        if chunk.chunk_type == IHDR && placement == Placement::AfterHeader {
            write_chunk(&mut out, chunk_type, data)?;
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal structurally valid PNG chunk list (not decodable pixel data).
    fn skeleton() -> Vec<u8> {
        let mut out = SIGNATURE.to_vec();
        write_chunk(&mut out, IHDR, &[0, 0, 0, 1, 0, 0, 0, 1, 8, 2, 0, 0, 0]).unwrap();
        write_chunk(&mut out, IDAT, &[1, 2, 3]).unwrap();
        write_chunk(&mut out, IEND, &[]).unwrap();
        out
    }

    fn types(bytes: &[u8]) -> Vec<[u8; 4]> {
        read_chunks(bytes)
            .unwrap()
            .chunks
            .iter()
            .map(|c| c.chunk_type)
            .collect()
    }

    #[test]
    fn test_read_chunks_and_crc() {
        let bytes = skeleton();
        let parsed = read_chunks(&bytes).unwrap();
        assert!(parsed.error.is_none());
        assert_eq!(parsed.chunks.len(), 3);
        assert!(parsed.chunks.iter().all(PngChunk::crc_ok));
    }

    #[test]
    fn test_iend_crc_constant() {
        // well-known CRC of an empty IEND chunk
        assert_eq!(chunk_crc(&IEND, &[]), 0xAE42_6082);
    }

    #[test]
    fn test_placement() {
        let bytes = skeleton();
        let with_box = replace_chunk(&bytes, CONTAINER, b"box", Placement::BeforeEnd).unwrap();
        assert_eq!(types(&with_box), vec![IHDR, IDAT, CONTAINER, IEND]);

        let with_exif = replace_chunk(&with_box, EXIF, b"II*\0", Placement::AfterHeader).unwrap();
        assert_eq!(types(&with_exif), vec![IHDR, EXIF, IDAT, CONTAINER, IEND]);
    }

    #[test]
    fn test_replace_existing() {
        let bytes = skeleton();
        let once = replace_chunk(&bytes, CONTAINER, b"one", Placement::BeforeEnd).unwrap();
        let twice = replace_chunk(&once, CONTAINER, b"two", Placement::BeforeEnd).unwrap();
        let parsed = read_chunks(&twice).unwrap();
        let boxes: Vec<_> = parsed
            .chunks
            .iter()
            .filter(|c| c.chunk_type == CONTAINER)
            .collect();
        assert_eq!(boxes.len(), 1);
        assert_eq!(boxes[0].data, b"two");
    }

    #[test]
    fn test_xmp_itxt_roundtrip() {
        let payload = itxt_payload(XMP_KEYWORD, "<x:xmpmeta/>");
        let bytes = replace_chunk(&skeleton(), ITXT, &payload, Placement::BeforeEnd).unwrap();
        assert_eq!(read_xmp(&bytes).unwrap().unwrap(), "<x:xmpmeta/>");

        // an unrelated iTXt survives XMP replacement
        let other = itxt_payload("Comment", "hello");
        let bytes = replace_chunk(&bytes, *b"tEXt", &other, Placement::BeforeEnd).unwrap();
        let bytes = replace_chunk(&bytes, ITXT, &payload, Placement::BeforeEnd).unwrap();
        assert_eq!(types(&bytes).iter().filter(|t| **t == ITXT).count(), 1);
        assert_eq!(types(&bytes).iter().filter(|t| *t == b"tEXt").count(), 1);
    }

    #[test]
    fn test_xmp_crc_mismatch_is_reported() {
        let payload = itxt_payload(XMP_KEYWORD, "<x:xmpmeta>abc123</x:xmpmeta>");
        let mut bytes = replace_chunk(&skeleton(), ITXT, &payload, Placement::BeforeEnd).unwrap();
        let offset = read_chunks(&bytes).unwrap().find(ITXT).unwrap().offset;
        // last text byte before the closing tag's '>'
        let target = offset + 8 + payload.len() - 2;
        bytes[target] ^= 0x01;

        assert!(matches!(
            read_xmp(&bytes),
            Some(Err(ContainerError::CrcMismatch(BoxType(ITXT))))
        ));
    }

    #[test]
    fn test_truncated_chunk_stops_walk() {
        let bytes = replace_chunk(&skeleton(), CONTAINER, &[7; 64], Placement::BeforeEnd).unwrap();
        let cut = &bytes[..bytes.len() - 40];
        let parsed = read_chunks(cut).unwrap();
        assert_eq!(parsed.chunks.len(), 2);
        assert!(parsed.error.is_some());
        assert!(replace_chunk(cut, NATIVE, b"x", Placement::BeforeEnd).is_err());
    }

    #[test]
    fn test_not_png() {
        assert!(read_chunks(b"not a png").is_none());
        assert!(read_xmp(b"").is_none());
    }
}
