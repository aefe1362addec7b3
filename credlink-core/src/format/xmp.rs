//! XMP provenance packet
//!
//! The packet carries the proof URI, the manifest digest and (when small
//! enough) the base64 CBOR manifest as attributes of `rdf:Description` in the
//! `credlink` namespace. The element form (`<credlink:proofUri>...`) is also
//! accepted when reading.

use base64::{engine::general_purpose::STANDARD, Engine};
use quick_xml::events::Event;
use quick_xml::escape::{escape, unescape};
use quick_xml::Reader;
use tracing::debug;

use crate::error::{CredlinkError, Result};
use crate::manifest::{digest_hex, Manifest, ProofReference};

pub const NAMESPACE: &str = "https://credlink.io/ns/provenance/1.0/";
pub const PREFIX: &str = "credlink";

const RDF_DESCRIPTION: &[u8] = b"rdf:Description";
const KEY_PROOF: &str = "credlink:proofUri";
const KEY_DIGEST: &str = "credlink:manifestDigest";
const KEY_MANIFEST: &str = "credlink:manifest";
const XMLNS_KEY: &str = "xmlns:credlink";

/// Provenance values found in an XMP packet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmpProvenance {
    pub proof_uri: Option<String>,
    pub manifest_digest: Option<String>,
    /// Base64 CBOR manifest
    pub manifest: Option<String>,
}

impl XmpProvenance {
    pub fn proof_reference(&self) -> Option<ProofReference> {
        ProofReference::parse(self.proof_uri.as_deref()?).ok()
    }

    /// Decode the embedded manifest. When a digest is present it must match
    /// the decoded CBOR bytes.
    pub fn decode_manifest(&self) -> Result<Option<Manifest>> {
        let Some(encoded) = self.manifest.as_deref() else {
            return Ok(None);
        };
        let cbor = STANDARD
            .decode(encoded.trim())
            .map_err(|e| CredlinkError::SerializationError(e.to_string()))?;

        if let Some(expected) = &self.manifest_digest {
            let actual = digest_hex(&cbor);
            if !actual.eq_ignore_ascii_case(expected) {
                return Err(CredlinkError::SerializationError(format!(
                    "manifest digest mismatch: expected {expected}, got {actual}"
                )));
            }
        }

        Manifest::from_cbor(&cbor).map(Some)
    }

    fn is_empty(&self) -> bool {
        self.proof_uri.is_none() && self.manifest_digest.is_none() && self.manifest.is_none()
    }

    fn set(&mut self, key: &[u8], value: String) {
        match key {
            k if k == KEY_PROOF.as_bytes() => self.proof_uri = Some(value),
            k if k == KEY_DIGEST.as_bytes() => self.manifest_digest = Some(value),
            k if k == KEY_MANIFEST.as_bytes() => self.manifest = Some(value),
            _ => {}
        }
    }
}

/// Build a complete XMP packet.
///
/// `manifest_cbor` is inlined only when it fits in `manifest_limit` bytes.
pub fn build_packet(
    proof: &ProofReference,
    manifest_cbor: &[u8],
    manifest_limit: usize,
) -> String {
    let mut attributes = format!(
        r#" {KEY_PROOF}="{}" {KEY_DIGEST}="{}""#,
        escape(proof.as_str()),
        digest_hex(manifest_cbor)
    );
    if manifest_cbor.len() <= manifest_limit {
        attributes.push_str(&format!(
            r#" {KEY_MANIFEST}="{}""#,
            STANDARD.encode(manifest_cbor)
        ));
    }

    format!(
        concat!(
            "<?xpacket begin=\"\u{feff}\" id=\"W5M0MpCehiHzreSzNTczkc9d\"?>",
            "<x:xmpmeta xmlns:x=\"adobe:ns:meta/\">",
            "<rdf:RDF xmlns:rdf=\"http://www.w3.org/1999/02/22-rdf-syntax-ns#\">",
            "<rdf:Description rdf:about=\"\" xmlns:{prefix}=\"{ns}\"{attributes}/>",
            "</rdf:RDF>",
            "</x:xmpmeta>",
            "<?xpacket end=\"w\"?>"
        ),
        prefix = PREFIX,
        ns = NAMESPACE,
        attributes = attributes
    )
}

/// Read provenance values from an XMP packet.
///
/// Returns `None` when the packet does not declare the provenance namespace
/// or carries none of its properties. Malformed XML yields whatever was read
/// before the error.
pub fn read_provenance(xmp: &str) -> Option<XmpProvenance> {
    if !xmp.contains(NAMESPACE) {
        return None;
    }

    let mut reader = Reader::from_str(xmp);
    reader.config_mut().trim_text(true);
    let mut found = XmpProvenance::default();
    let mut namespace_declared = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.name().as_ref() == RDF_DESCRIPTION => {
                for attr in e.attributes().flatten() {
                    let key = attr.key.as_ref();
                    let Ok(value) = attr.unescape_value() else {
                        continue;
                    };
                    if key == XMLNS_KEY.as_bytes() {
                        namespace_declared |= value == NAMESPACE;
                    } else {
                        found.set(key, value.into_owned());
                    }
                }
            }
            Ok(Event::Start(e)) if e.name().as_ref().starts_with(b"credlink:") => {
                let key = e.name().as_ref().to_vec();
                if let Ok(text) = reader.read_text(e.name()) {
                    if let Ok(value) = unescape(&text) {
                        found.set(&key, value.trim().to_string());
                    }
                }
            }
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                // namespace may also be declared on an enclosing element
                namespace_declared |= e.attributes().flatten().any(|a| {
                    a.key.as_ref() == XMLNS_KEY.as_bytes()
                        && a.unescape_value().is_ok_and(|v| v == NAMESPACE)
                });
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(error = %e, position = reader.buffer_position(), "XMP parse stopped");
                break;
            }
        }
    }

    if !namespace_declared || found.is_empty() {
        return None;
    }
    Some(found)
}
