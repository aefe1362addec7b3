//! WebP (RIFF) chunk reader/writer
//!
//! `RIFF | size (u32 LE) | WEBP | chunk*` where each chunk is
//! `FourCC | size (u32 LE) | payload | pad to even`. Chunks are parsed and
//! re-encoded with `img-parts`. Metadata chunks require the extended layout,
//! so simple files are promoted to `VP8X`.

use byteorder::{LittleEndian, WriteBytesExt};
use img_parts::riff::{RiffChunk, RiffContent};
use img_parts::webp::WebP;
use img_parts::Bytes;
use tracing::debug;

use crate::container::{BoxType, ContainerError};
use crate::format::exif::strip_exif_header;

pub const VP8: [u8; 4] = *b"VP8 ";
pub const VP8L: [u8; 4] = *b"VP8L";
pub const VP8X: [u8; 4] = *b"VP8X";
pub const ALPH: [u8; 4] = *b"ALPH";
pub const ANMF: [u8; 4] = *b"ANMF";
pub const EXIF: [u8; 4] = *b"EXIF";
pub const XMP: [u8; 4] = *b"XMP ";
/// Binary manifest container chunk
pub const CONTAINER: [u8; 4] = *b"C2PA";
/// Native CBOR link record chunk
pub const NATIVE: [u8; 4] = *b"CRLK";

const FLAG_ALPHA: u8 = 0x10;
const FLAG_EXIF: u8 = 0x08;
const FLAG_XMP: u8 = 0x04;

const RIFF_HEADER_LEN: usize = 12;
const VP8X_LEN: usize = 10;

/// Chunk header plus RIFF header overhead that must fit the u32 size field.
const MAX_CHUNK_PAYLOAD: usize = u32::MAX as usize - 32;

/// A top-level chunk copied out of a WebP buffer.
#[derive(Debug, Clone)]
pub struct WebpChunk {
    pub fourcc: [u8; 4],
    pub data: Bytes,
}

#[derive(Debug)]
pub struct WebpChunks {
    pub chunks: Vec<WebpChunk>,
    pub error: Option<ContainerError>,
}

impl WebpChunks {
    pub fn find(&self, fourcc: [u8; 4]) -> Option<&WebpChunk> {
        self.chunks.iter().find(|c| c.fourcc == fourcc)
    }
}

fn is_webp(bytes: &[u8]) -> bool {
    bytes.len() >= RIFF_HEADER_LEN && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP"
}

fn parse(bytes: &[u8]) -> Result<WebP, ContainerError> {
    WebP::from_bytes(Bytes::copy_from_slice(bytes)).map_err(ContainerError::from)
}

fn chunk_data(chunk: &RiffChunk) -> Option<&Bytes> {
    match chunk.content() {
        RiffContent::Data(data) => Some(data),
        _ => None,
    }
}

/// List the top-level chunks. Returns `None` without a RIFF/WEBP header; a
/// file that does not parse yields no chunks and the error.
pub fn read_chunks(bytes: &[u8]) -> Option<WebpChunks> {
    if !is_webp(bytes) {
        return None;
    }
    match parse(bytes) {
        Ok(webp) => {
            let chunks = webp
                .chunks()
                .iter()
                .map(|c| WebpChunk {
                    fourcc: c.id(),
                    data: chunk_data(c).cloned().unwrap_or_default(),
                })
                .collect();
            Some(WebpChunks {
                chunks,
                error: None,
            })
        }
        Err(e) => {
            debug!(error = %e, "WebP chunk walk failed");
            Some(WebpChunks {
                chunks: Vec::new(),
                error: Some(e),
            })
        }
    }
}

/// TIFF payload of the EXIF chunk.
pub fn read_exif(bytes: &[u8]) -> Option<Vec<u8>> {
    let parsed = read_chunks(bytes)?;
    let data = &parsed.find(EXIF)?.data;
    Some(strip_exif_header(data).to_vec())
}

/// XMP packet of the `XMP ` chunk.
pub fn read_xmp(bytes: &[u8]) -> Option<String> {
    let parsed = read_chunks(bytes)?;
    let data = &parsed.find(XMP)?.data;
    Some(String::from_utf8_lossy(data).into_owned())
}

/// Whether a lossless bitstream declares alpha.
fn vp8l_has_alpha(data: &[u8]) -> bool {
    // signature byte, then 14-bit width-1, 14-bit height-1, alpha bit
    data.len() >= 5 && data[0] == 0x2F && data[4] & 0x10 != 0
}

/// A fresh `VP8X` payload for `canvas` with no flags set.
fn new_vp8x(canvas: (u32, u32)) -> Result<[u8; VP8X_LEN], ContainerError> {
    let mut header = Vec::with_capacity(VP8X_LEN);
    header.write_u32::<LittleEndian>(0)?;
    header.write_u24::<LittleEndian>(canvas.0.saturating_sub(1) & 0x00FF_FFFF)?;
    header.write_u24::<LittleEndian>(canvas.1.saturating_sub(1) & 0x00FF_FFFF)?;
    let mut fixed = [0u8; VP8X_LEN];
    fixed.copy_from_slice(&header);
    Ok(fixed)
}

fn data_chunk(fourcc: [u8; 4], data: &[u8]) -> RiffChunk {
    RiffChunk::new(fourcc, RiffContent::Data(Bytes::copy_from_slice(data)))
}

/// Rewrite a WebP with `fourcc` replaced by `data`.
///
/// `canvas` is used only when a `VP8X` header has to be created. EXIF and XMP
/// go after the image data; other chunks are appended last.
pub fn replace_chunk(
    bytes: &[u8],
    fourcc: [u8; 4],
    data: &[u8],
    canvas: (u32, u32),
) -> Result<Vec<u8>, ContainerError> {
    if !is_webp(bytes) {
        return Err(ContainerError::InvalidBoxHeader(BoxType(*b"RIFF")));
    }
    if data.len() > MAX_CHUNK_PAYLOAD.saturating_sub(bytes.len()) {
        return Err(ContainerError::LengthExceedsBuffer {
            box_type: BoxType(fourcc),
            declared: data.len() as u64,
            available: MAX_CHUNK_PAYLOAD.saturating_sub(bytes.len()) as u64,
        });
    }
    let mut webp = parse(bytes)?;
    let chunks = webp.chunks_mut();

    let mut vp8x = match chunks.iter().find(|c| c.id() == VP8X).and_then(chunk_data) {
        Some(existing) => {
            let mut header = [0u8; VP8X_LEN];
            let n = existing.len().min(VP8X_LEN);
            header[..n].copy_from_slice(&existing[..n]);
            header
        }
        None => new_vp8x(canvas)?,
    };
    chunks.retain(|c| c.id() != VP8X && c.id() != fourcc);

    if !chunks.iter().any(|c| matches!(c.id(), VP8 | VP8L | ANMF)) {
        return Err(ContainerError::MissingContent);
    }
    let alpha = chunks.iter().any(|c| {
        c.id() == ALPH || (c.id() == VP8L && chunk_data(c).is_some_and(|d| vp8l_has_alpha(d)))
    });

    // insertion point: after image data (and after EXIF for XMP), else at the end
    let position = if fourcc == EXIF || fourcc == XMP {
        chunks
            .iter()
            .rposition(|c| {
                matches!(c.id(), VP8 | VP8L | ALPH | ANMF) || (fourcc == XMP && c.id() == EXIF)
            })
            .map_or(chunks.len(), |i| i + 1)
    } else {
        chunks.len()
    };
    chunks.insert(position, data_chunk(fourcc, data));

    let has = |f: [u8; 4]| chunks.iter().any(|c| c.id() == f);
    vp8x[0] &= !(FLAG_EXIF | FLAG_XMP);
    if has(EXIF) {
        vp8x[0] |= FLAG_EXIF;
    }
    if has(XMP) {
        vp8x[0] |= FLAG_XMP;
    }
    if alpha {
        vp8x[0] |= FLAG_ALPHA;
    }
    chunks.insert(0, data_chunk(VP8X, &vp8x));

    let mut out = Vec::with_capacity(bytes.len() + data.len() + 32);
    webp.encoder().write_to(&mut out)?;
    Ok(out)
}
