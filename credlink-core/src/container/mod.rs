//! Binary manifest container (JUMBF-style box structure)
//!
//! The container is one `jumb` superbox holding:
//!
//! - a `jumd` description box: 16-byte UUID marking a provenance container,
//!   a toggles byte and a NUL-terminated label,
//! - a `cbor` (or `json`) content box with the manifest,
//! - an optional `c2cs` signature box,
//! - an optional `c2rq` request box carrying the proof reference URI.
//!
//! Parsing is total: malformed input degrades to "no container", never to a
//! panic or an error escaping the extraction pipeline.

mod boxes;

pub use boxes::{BoxCursor, BoxPayload, BoxType, ContainerBox, BOX_HEADER_LEN, MAX_NESTING_DEPTH};

use thiserror::Error;
use tracing::debug;

use crate::manifest::{Manifest, ProofReference};

/// UUID identifying a provenance container description box ("c2pa" + ISO suffix).
pub const PROVENANCE_UUID: [u8; 16] = [
    0x63, 0x32, 0x70, 0x61, 0x00, 0x11, 0x00, 0x10, 0x80, 0x00, 0x00, 0xAA, 0x00, 0x38, 0x9B, 0x71,
];

/// Default description label written by [`encode_manifest`].
pub const DEFAULT_DESCRIPTION_TAG: &str = "credlink.manifest";

/// Description toggles: requestable, label present.
const DESCRIPTION_TOGGLES: u8 = 0x03;

/// Errors raised while reading or validating a container.
#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("unexpected end of data")]
    UnexpectedEof,

    #[error("invalid box header for {0}")]
    InvalidBoxHeader(BoxType),

    #[error("box {box_type} declares {declared} bytes but only {available} remain")]
    LengthExceedsBuffer {
        box_type: BoxType,
        declared: u64,
        available: u64,
    },

    #[error("superbox nesting too deep")]
    NestingTooDeep,

    #[error("no provenance superbox found")]
    MissingSuperbox,

    #[error("missing or malformed description box")]
    InvalidDescription,

    #[error("description UUID does not mark a provenance container")]
    UuidMismatch,

    #[error("no content box present")]
    MissingContent,

    #[error("I/O error: {0}")]
    Io(String),

    #[error("{0} CRC mismatch")]
    CrcMismatch(BoxType),

    #[error("carrier image structure unreadable: {0}")]
    Carrier(String),
}

impl From<img_parts::Error> for ContainerError {
    fn from(e: img_parts::Error) -> Self {
        ContainerError::Carrier(e.to_string())
    }
}

impl From<std::io::Error> for ContainerError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            ContainerError::UnexpectedEof
        } else {
            ContainerError::Io(e.to_string())
        }
    }
}

/// Decoded description box.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Description {
    pub uuid: [u8; 16],
    pub toggles: u8,
    pub label: Option<String>,
}

impl Description {
    fn parse(payload: &[u8]) -> Result<Self, ContainerError> {
        let mut cursor = BoxCursor::new(payload);
        let uuid: [u8; 16] = cursor
            .take(16)?
            .try_into()
            .map_err(|_| ContainerError::InvalidDescription)?;
        let toggles = cursor.read_u8()?;

        let label = if toggles & 0x02 != 0 {
            let rest = cursor.take(cursor.remaining())?;
            let end = rest
                .iter()
                .position(|b| *b == 0)
                .ok_or(ContainerError::InvalidDescription)?;
            Some(
                std::str::from_utf8(&rest[..end])
                    .map_err(|_| ContainerError::InvalidDescription)?
                    .to_string(),
            )
        } else {
            None
        };

        Ok(Self {
            uuid,
            toggles,
            label,
        })
    }

    fn encode(tag: &str) -> Vec<u8> {
        let mut out = Vec::with_capacity(16 + 1 + tag.len() + 1);
        out.extend_from_slice(&PROVENANCE_UUID);
        out.push(DESCRIPTION_TOGGLES);
        // labels cannot carry interior NULs
        out.extend(tag.bytes().filter(|b| *b != 0));
        out.push(0);
        out
    }
}

/// Result of [`parse`]: the top-level boxes that could be read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerTree {
    pub boxes: Vec<ContainerBox>,
    /// Set when parsing stopped early on a malformed box
    pub truncated: bool,
}

impl ContainerTree {
    /// The first provenance superbox, if any.
    fn superbox(&self) -> Option<&ContainerBox> {
        self.boxes.iter().find(|b| b.box_type.is_superbox())
    }

    fn child(&self, wanted: &[BoxType]) -> Option<&ContainerBox> {
        self.superbox()?
            .children()
            .iter()
            .find(|b| wanted.contains(&b.box_type))
    }

    pub fn description(&self) -> Option<Description> {
        let payload = self.child(&[BoxType::DESCRIPTION])?.raw_payload()?;
        Description::parse(payload).ok()
    }

    pub fn content_type(&self) -> Option<BoxType> {
        self.child(&[BoxType::CBOR, BoxType::JSON]).map(|b| b.box_type)
    }
}

/// Serialize a provenance container.
pub fn build(
    description_tag: &str,
    content: &[u8],
    signature: Option<&[u8]>,
    request: Option<&[u8]>,
) -> Vec<u8> {
    let mut children = vec![
        ContainerBox::raw(BoxType::DESCRIPTION, Description::encode(description_tag)),
        ContainerBox::raw(BoxType::CBOR, content),
    ];
    if let Some(sig) = signature {
        children.push(ContainerBox::raw(BoxType::SIGNATURE, sig));
    }
    if let Some(req) = request {
        children.push(ContainerBox::raw(BoxType::REQUEST, req));
    }

    let superbox = ContainerBox::nested(BoxType::SUPERBOX, children);
    let mut out = Vec::with_capacity(superbox.encoded_len());
    // writing into a Vec cannot fail
    if let Err(e) = superbox.write_to(&mut out) {
        debug!(error = %e, "container serialization failed");
        out.clear();
    }
    out
}

/// Parse container bytes, tolerating truncation.
///
/// Returns `None` when not even one complete box can be read.
pub fn parse(bytes: &[u8]) -> Option<ContainerTree> {
    let (boxes, err) = boxes::parse_boxes(bytes, 0);
    if let Some(e) = &err {
        debug!(error = %e, parsed = boxes.len(), "container parse stopped early");
    }
    if boxes.is_empty() {
        return None;
    }
    Some(ContainerTree {
        boxes,
        truncated: err.is_some(),
    })
}

/// Check that a tree is a provenance container: description UUID matches
/// and a content box is present.
pub fn validate(tree: &ContainerTree) -> Result<(), ContainerError> {
    let superbox = tree.superbox().ok_or(ContainerError::MissingSuperbox)?;
    let first = superbox
        .children()
        .first()
        .filter(|b| b.box_type == BoxType::DESCRIPTION)
        .and_then(ContainerBox::raw_payload)
        .ok_or(ContainerError::InvalidDescription)?;

    let description = Description::parse(first)?;
    if description.uuid != PROVENANCE_UUID {
        return Err(ContainerError::UuidMismatch);
    }
    if tree.content_type().is_none() {
        return Err(ContainerError::MissingContent);
    }
    Ok(())
}

/// First content payload, if present.
pub fn extract_manifest_bytes(tree: &ContainerTree) -> Option<&[u8]> {
    tree.child(&[BoxType::CBOR, BoxType::JSON])?.raw_payload()
}

/// Proof reference from the request box, if present and well formed.
pub fn extract_proof_reference(tree: &ContainerTree) -> Option<ProofReference> {
    let payload = tree.child(&[BoxType::REQUEST])?.raw_payload()?;
    let text = std::str::from_utf8(payload).ok()?;
    ProofReference::parse(text).ok()
}

/// Signature payload, if present.
pub fn extract_signature(tree: &ContainerTree) -> Option<&[u8]> {
    tree.child(&[BoxType::SIGNATURE])?.raw_payload()
}

/// Build a container around a manifest's CBOR form.
pub fn encode_manifest(
    manifest: &Manifest,
    proof: Option<&ProofReference>,
    signature: Option<&[u8]>,
) -> crate::Result<Vec<u8>> {
    let content = manifest.to_cbor()?;
    Ok(build(
        DEFAULT_DESCRIPTION_TAG,
        &content,
        signature,
        proof.map(|p| p.as_str().as_bytes()),
    ))
}

/// Everything recovered from a valid container.
#[derive(Debug, Clone)]
pub struct DecodedContainer {
    pub manifest: Manifest,
    pub proof_reference: Option<ProofReference>,
    pub signature: Option<Vec<u8>>,
}

/// Parse, validate and decode a container in one step.
pub fn decode_manifest(bytes: &[u8]) -> Result<DecodedContainer, ContainerError> {
    let tree = parse(bytes).ok_or(ContainerError::MissingSuperbox)?;
    validate(&tree)?;

    let content = extract_manifest_bytes(&tree).ok_or(ContainerError::MissingContent)?;
    let manifest = match tree.content_type() {
        Some(BoxType::JSON) => Manifest::from_json(content),
        _ => Manifest::from_cbor(content),
    }
    .map_err(|_| ContainerError::MissingContent)?;

    Ok(DecodedContainer {
        manifest,
        proof_reference: extract_proof_reference(&tree),
        signature: extract_signature(&tree).map(<[u8]>::to_vec),
    })
}
