//! Minimal TIFF/EXIF IFD0 codec
//!
//! Only IFD0 is read and written. Entries are kept as raw value bytes in the
//! byte order of the file they came from, so a rewrite preserves them exactly.
//! Entries that point at other IFDs or at strip data cannot be carried over
//! safely and are dropped.

use byteorder::{BigEndian, ByteOrder, LittleEndian, WriteBytesExt};
use tracing::debug;

use crate::container::ContainerError;
use crate::manifest::ProofReference;

/// Prefix of an EXIF APP1 segment / WebP EXIF chunk payload.
pub const EXIF_HEADER: &[u8; 6] = b"Exif\0\0";

pub const TAG_IMAGE_DESCRIPTION: u16 = 0x010E;
pub const TAG_SOFTWARE: u16 = 0x0131;
pub const TAG_ARTIST: u16 = 0x013B;
pub const TAG_COPYRIGHT: u16 = 0x8298;

/// Tags whose values are offsets into data this codec does not carry.
pub const POINTER_TAGS: [u16; 8] = [
    0x8769, // ExifIFD
    0x8825, // GPSInfo
    0xA005, // InteropIFD
    0x0111, // StripOffsets
    0x0201, // JPEGInterchangeFormat
    0x0202, // JPEGInterchangeFormatLength
    0x0117, // StripByteCounts
    0x014A, // SubIFDs
];

/// Prefix written before the proof URI in the Artist field.
pub const ARTIST_PREFIX: &str = "CredLink proof=";
/// Prefix written before the signature summary in the Copyright field.
pub const COPYRIGHT_PREFIX: &str = "CredLink sig=";

const TYPE_ASCII: u16 = 2;
const MAX_ENTRIES: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

impl Endian {
    fn u16(self, b: &[u8]) -> u16 {
        match self {
            Endian::Little => LittleEndian::read_u16(b),
            Endian::Big => BigEndian::read_u16(b),
        }
    }

    fn u32(self, b: &[u8]) -> u32 {
        match self {
            Endian::Little => LittleEndian::read_u32(b),
            Endian::Big => BigEndian::read_u32(b),
        }
    }

    fn put_u16(self, out: &mut Vec<u8>, v: u16) -> std::io::Result<()> {
        match self {
            Endian::Little => out.write_u16::<LittleEndian>(v),
            Endian::Big => out.write_u16::<BigEndian>(v),
        }
    }

    fn put_u32(self, out: &mut Vec<u8>, v: u32) -> std::io::Result<()> {
        match self {
            Endian::Little => out.write_u32::<LittleEndian>(v),
            Endian::Big => out.write_u32::<BigEndian>(v),
        }
    }
}

/// One IFD0 entry with its value bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IfdEntry {
    pub tag: u16,
    pub field_type: u16,
    pub count: u32,
    pub value: Vec<u8>,
}

impl IfdEntry {
    pub fn ascii(tag: u16, text: &str) -> Self {
        let mut value: Vec<u8> = text.bytes().filter(|b| *b != 0).collect();
        value.push(0);
        Self {
            tag,
            field_type: TYPE_ASCII,
            count: value.len() as u32,
            value,
        }
    }

    pub fn as_ascii(&self) -> Option<String> {
        if self.field_type != TYPE_ASCII {
            return None;
        }
        let end = self
            .value
            .iter()
            .position(|b| *b == 0)
            .unwrap_or(self.value.len());
        Some(String::from_utf8_lossy(&self.value[..end]).into_owned())
    }
}

fn type_size(field_type: u16) -> Option<usize> {
    match field_type {
        1 | 2 | 6 | 7 => Some(1),
        3 | 8 => Some(2),
        4 | 9 | 11 => Some(4),
        5 | 10 | 12 => Some(8),
        _ => None,
    }
}

fn slice(buf: &[u8], start: usize, len: usize) -> Result<&[u8], ContainerError> {
    buf.get(start..start.checked_add(len).ok_or(ContainerError::UnexpectedEof)?)
        .ok_or(ContainerError::UnexpectedEof)
}

/// IFD0 of a TIFF structure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ifd0 {
    pub endian: Endian,
    pub entries: Vec<IfdEntry>,
}

impl Default for Ifd0 {
    fn default() -> Self {
        Self {
            endian: Endian::Little,
            entries: Vec::new(),
        }
    }
}

impl Ifd0 {
    /// Parse a TIFF header and its first IFD. Entries with unknown types or
    /// out-of-range values are skipped.
    pub fn parse(tiff: &[u8]) -> Result<Self, ContainerError> {
        let endian = match slice(tiff, 0, 4)? {
            b"II*\0" => Endian::Little,
            b"MM\0*" => Endian::Big,
            _ => return Err(ContainerError::InvalidDescription),
        };
        let ifd_offset = endian.u32(slice(tiff, 4, 4)?) as usize;
        let count = endian.u16(slice(tiff, ifd_offset, 2)?) as usize;
        if count > MAX_ENTRIES {
            return Err(ContainerError::InvalidDescription);
        }

        let mut entries = Vec::with_capacity(count);
        for i in 0..count {
            let raw = slice(tiff, ifd_offset + 2 + i * 12, 12)?;
            let tag = endian.u16(&raw[0..2]);
            let field_type = endian.u16(&raw[2..4]);
            let count = endian.u32(&raw[4..8]);

            let Some(size) = type_size(field_type).and_then(|s| s.checked_mul(count as usize))
            else {
                debug!(tag, field_type, "skipping IFD0 entry with unknown type");
                continue;
            };
            let value = if size <= 4 {
                raw[8..8 + size].to_vec()
            } else {
                match slice(tiff, endian.u32(&raw[8..12]) as usize, size) {
                    Ok(v) => v.to_vec(),
                    Err(_) => {
                        debug!(tag, size, "skipping IFD0 entry with out-of-range value");
                        continue;
                    }
                }
            };

            entries.push(IfdEntry {
                tag,
                field_type,
                count,
                value,
            });
        }

        Ok(Self { endian, entries })
    }

    pub fn get(&self, tag: u16) -> Option<&IfdEntry> {
        self.entries.iter().find(|e| e.tag == tag)
    }

    pub fn ascii(&self, tag: u16) -> Option<String> {
        self.get(tag).and_then(IfdEntry::as_ascii)
    }

    /// All ASCII values with their tags, in file order.
    pub fn ascii_values(&self) -> Vec<(u16, String)> {
        self.entries
            .iter()
            .filter_map(|e| e.as_ascii().map(|s| (e.tag, s)))
            .collect()
    }

    /// Insert or replace an entry.
    pub fn set(&mut self, entry: IfdEntry) {
        match self.entries.iter_mut().find(|e| e.tag == entry.tag) {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
    }

    /// Remove entries pointing outside IFD0; returns the dropped tags.
    pub fn drop_pointer_tags(&mut self) -> Vec<u16> {
        let dropped: Vec<u16> = self
            .entries
            .iter()
            .map(|e| e.tag)
            .filter(|t| POINTER_TAGS.contains(t))
            .collect();
        self.entries.retain(|e| !POINTER_TAGS.contains(&e.tag));
        dropped
    }

    /// Serialize as a standalone TIFF structure with a single IFD.
    pub fn to_tiff(&self) -> Result<Vec<u8>, ContainerError> {
        let endian = self.endian;
        let mut entries: Vec<&IfdEntry> = self.entries.iter().collect();
        entries.sort_by_key(|e| e.tag);

        let ifd_len = 2 + entries.len() * 12 + 4;
        let mut data_offset = 8 + ifd_len;
        let mut out = Vec::new();
        let mut data = Vec::new();

        match endian {
            Endian::Little => out.extend_from_slice(b"II*\0"),
            Endian::Big => out.extend_from_slice(b"MM\0*"),
        }
        endian.put_u32(&mut out, 8)?;
        endian.put_u16(&mut out, entries.len() as u16)?;

        for entry in entries {
            endian.put_u16(&mut out, entry.tag)?;
            endian.put_u16(&mut out, entry.field_type)?;
            endian.put_u32(&mut out, entry.count)?;
            if entry.value.len() <= 4 {
                let mut inline = [0u8; 4];
                inline[..entry.value.len()].copy_from_slice(&entry.value);
                out.extend_from_slice(&inline);
            } else {
                let offset = u32::try_from(data_offset)
                    .map_err(|_| ContainerError::InvalidDescription)?;
                endian.put_u32(&mut out, offset)?;
                data.extend_from_slice(&entry.value);
                if entry.value.len() % 2 == 1 {
                    data.push(0);
                }
                data_offset = 8 + ifd_len + data.len();
            }
        }
        endian.put_u32(&mut out, 0)?; // no IFD1

        out.extend_from_slice(&data);
        Ok(out)
    }
}

/// Strip a leading `Exif\0\0` marker if present.
pub fn strip_exif_header(payload: &[u8]) -> &[u8] {
    payload.strip_prefix(EXIF_HEADER.as_slice()).unwrap_or(payload)
}

/// Values written into IFD0 by the embedder.
#[derive(Debug, Clone)]
pub struct ProvenanceFields<'a> {
    pub proof: &'a ProofReference,
    pub generator: &'a str,
    pub signature_summary: &'a str,
}

/// Merge provenance fields into an existing TIFF structure (or a fresh one).
///
/// Returns the new TIFF bytes and warnings for anything that had to be
/// discarded.
pub fn merge_provenance(
    existing: Option<&[u8]>,
    fields: &ProvenanceFields<'_>,
) -> Result<(Vec<u8>, Vec<String>), ContainerError> {
    let mut warnings = Vec::new();
    let mut ifd = match existing.map(Ifd0::parse) {
        Some(Ok(ifd)) => ifd,
        Some(Err(e)) => {
            warnings.push(format!("existing EXIF unreadable, replaced: {e}"));
            Ifd0::default()
        }
        None => Ifd0::default(),
    };

    let dropped = ifd.drop_pointer_tags();
    if !dropped.is_empty() {
        warnings.push(format!(
            "dropped EXIF entries pointing outside IFD0: {}",
            dropped
                .iter()
                .map(|t| format!("0x{t:04X}"))
                .collect::<Vec<_>>()
                .join(", ")
        ));
    }

    ifd.set(IfdEntry::ascii(TAG_IMAGE_DESCRIPTION, fields.proof.as_str()));
    ifd.set(IfdEntry::ascii(TAG_SOFTWARE, fields.generator));
    ifd.set(IfdEntry::ascii(
        TAG_ARTIST,
        &format!("{ARTIST_PREFIX}{}", fields.proof),
    ));
    ifd.set(IfdEntry::ascii(
        TAG_COPYRIGHT,
        &format!("{COPYRIGHT_PREFIX}{}", fields.signature_summary),
    ));

    Ok((ifd.to_tiff()?, warnings))
}

/// Proof reference from the primary field (ImageDescription).
pub fn primary_proof(ifd: &Ifd0) -> Option<ProofReference> {
    let value = ifd.ascii(TAG_IMAGE_DESCRIPTION)?;
    ProofReference::parse(&value).ok()
}

/// Proof reference from the secondary fields: the Artist marker first, then
/// any URL embedded in another ASCII value.
pub fn secondary_proof(ifd: &Ifd0) -> Option<ProofReference> {
    if let Some(artist) = ifd.ascii(TAG_ARTIST) {
        if let Some(uri) = artist.strip_prefix(ARTIST_PREFIX) {
            if let Ok(proof) = ProofReference::parse(uri) {
                return Some(proof);
            }
        }
    }

    ifd.ascii_values()
        .into_iter()
        .filter(|(tag, _)| *tag != TAG_IMAGE_DESCRIPTION)
        .find_map(|(_, value)| find_url(&value))
}

/// First `http(s)://` token in `text` that parses as a proof reference.
pub(crate) fn find_url(text: &str) -> Option<ProofReference> {
    ["https://", "http://"].iter().find_map(|scheme| {
        let start = text.find(scheme)?;
        let token = text[start..]
            .split(|c: char| c.is_whitespace() || c == '"' || c == ';' || c == '<')
            .next()?;
        ProofReference::parse(token).ok()
    })
}
