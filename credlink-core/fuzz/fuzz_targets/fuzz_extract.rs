#![no_main]

//! Fuzz target for ExtractionCoordinator::extract()
//!
//! Every recovery method sees the input, so this covers the PNG, JPEG and
//! WebP walkers, the EXIF and XMP readers and both byte scanners. Extraction
//! must never panic and must respect its confidence ceilings.
//!
//! Run with: cargo +nightly fuzz run fuzz_extract

use credlink_core::ExtractionCoordinator;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let coordinator = ExtractionCoordinator::default();
    let result = coordinator.extract(data);
    if let Some(kind) = result.methods_succeeded.first() {
        assert!(result.confidence <= kind.ceiling());
    }
    let _ = coordinator.survey(data);
});
