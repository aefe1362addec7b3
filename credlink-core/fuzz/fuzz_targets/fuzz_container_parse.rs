#![no_main]

//! Fuzz target for container::parse() and decode_manifest()
//!
//! Run with: cargo +nightly fuzz run fuzz_container_parse

use credlink_core::container;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Some(tree) = container::parse(data) {
        let _ = container::validate(&tree);
        let _ = container::extract_manifest_bytes(&tree);
        let _ = container::extract_proof_reference(&tree);
    }
    let _ = container::decode_manifest(data);
});
