//! JPEG marker segment reader/writer
//!
//! Segments are parsed and re-encoded with `img-parts`; entropy-coded scan
//! data rides along with its SOS segment untouched.

use std::collections::BTreeMap;

use byteorder::{BigEndian, ByteOrder};
use img_parts::jpeg::{markers, Jpeg, JpegSegment};
use img_parts::Bytes;
use tracing::debug;

use crate::container::{BoxType, ContainerError};
use crate::format::exif::EXIF_HEADER;

pub const SOI: [u8; 2] = [0xFF, 0xD8];

/// APP1 namespace prefix of an XMP packet.
pub const XMP_NAMESPACE: &[u8] = b"http://ns.adobe.com/xap/1.0/\0";

/// JPEG XT common identifier marking JUMBF in APP11.
const JPEG_XT_CI: [u8; 2] = *b"JP";

/// Largest payload a segment can carry (length field counts itself).
const MAX_SEGMENT_PAYLOAD: usize = u16::MAX as usize - 2;

/// Parse a JPEG. Returns `None` without a SOI marker.
pub fn parse(bytes: &[u8]) -> Option<Result<Jpeg, ContainerError>> {
    if !bytes.starts_with(&SOI) {
        return None;
    }
    let parsed = Jpeg::from_bytes(Bytes::copy_from_slice(bytes)).map_err(|e| {
        debug!(error = %e, "JPEG segment walk failed");
        ContainerError::from(e)
    });
    Some(parsed)
}

fn segments_with_marker(bytes: &[u8], marker: u8) -> Vec<Bytes> {
    match parse(bytes) {
        Some(Ok(jpeg)) => jpeg
            .segments_by_marker(marker)
            .map(|s| s.contents().clone())
            .collect(),
        _ => Vec::new(),
    }
}

fn is_exif_app1(segment: &JpegSegment) -> bool {
    segment.marker() == markers::APP1 && segment.contents().starts_with(EXIF_HEADER)
}

/// TIFF payload of the first EXIF APP1 segment.
pub fn read_exif(bytes: &[u8]) -> Option<Vec<u8>> {
    segments_with_marker(bytes, markers::APP1)
        .into_iter()
        .find(|contents| contents.starts_with(EXIF_HEADER))
        .map(|contents| contents.slice(EXIF_HEADER.len()..).to_vec())
}

/// XMP packet from the first XMP APP1 segment.
pub fn read_xmp(bytes: &[u8]) -> Option<String> {
    segments_with_marker(bytes, markers::APP1)
        .iter()
        .find_map(|contents| contents.strip_prefix(XMP_NAMESPACE))
        .map(|packet| String::from_utf8_lossy(packet).into_owned())
}

/// Reassemble JUMBF boxes carried in APP11 JPEG XT segments.
///
/// Segments are grouped by box instance and ordered by sequence number; the
/// first instance found is returned.
pub fn read_jumbf(bytes: &[u8]) -> Option<Vec<u8>> {
    let segments = segments_with_marker(bytes, markers::APP11);
    let mut instances: BTreeMap<u16, BTreeMap<u32, &[u8]>> = BTreeMap::new();
    let mut order = Vec::new();

    for data in &segments {
        // CI (2) | En (2) | Z (4) | LBox (4) | TBox (4)
        if data.len() < 16 || data[0..2] != JPEG_XT_CI {
            continue;
        }
        let instance = BigEndian::read_u16(&data[2..4]);
        let sequence = BigEndian::read_u32(&data[4..8]);
        if !instances.contains_key(&instance) {
            order.push(instance);
        }
        instances.entry(instance).or_default().insert(sequence, &data[8..]);
    }

    let first = order.first()?;
    let packets = instances.get(first)?;
    let mut jumbf = Vec::new();
    for (index, packet) in packets.values().enumerate() {
        if index == 0 {
            jumbf.extend_from_slice(packet);
        } else {
            // continuation segments repeat LBox and TBox
            jumbf.extend_from_slice(&packet[8..]);
        }
    }
    Some(jumbf)
}

/// Rewrite a JPEG with a single EXIF APP1 segment holding `tiff`.
///
/// Existing EXIF segments are removed; the new one goes right after SOI and
/// any leading APP0 (JFIF) segments.
pub fn replace_exif(bytes: &[u8], tiff: &[u8]) -> Result<Vec<u8>, ContainerError> {
    let mut jpeg = parse(bytes)
        .ok_or(ContainerError::InvalidBoxHeader(BoxType([0xFF, 0xD8, 0, 0])))??;
    if jpeg.segment_by_marker(markers::SOS).is_none() {
        return Err(ContainerError::UnexpectedEof);
    }

    let payload_len = EXIF_HEADER.len() + tiff.len();
    if payload_len > MAX_SEGMENT_PAYLOAD {
        return Err(ContainerError::LengthExceedsBuffer {
            box_type: BoxType([0xFF, markers::APP1, 0, 0]),
            declared: payload_len as u64,
            available: MAX_SEGMENT_PAYLOAD as u64,
        });
    }
    let mut payload = Vec::with_capacity(payload_len);
    payload.extend_from_slice(EXIF_HEADER);
    payload.extend_from_slice(tiff);

    let segments = jpeg.segments_mut();
    segments.retain(|s| !is_exif_app1(s));
    let position = segments
        .iter()
        .position(|s| s.marker() != markers::APP0)
        .unwrap_or(segments.len());
    segments.insert(
        position,
        JpegSegment::new_with_contents(markers::APP1, Bytes::from(payload)),
    );

    let mut out = Vec::with_capacity(bytes.len() + payload_len + 4);
    jpeg.encoder().write_to(&mut out)?;
    Ok(out)
}
