//! Example demonstrating embed/extract tracing instrumentation.
//!
//! Run with: cargo run -p credlink-core --example extract_tracing [image-file]
//!
//! Without an argument a small PNG is generated in memory. Set `RUST_LOG` to
//! override the default `credlink_core=debug,info` filter.

use std::io::Cursor;

use credlink_core::{
    CoreConfig, Embedder, ExtractionCoordinator, Manifest, ProofReference, SignatureBlock,
};
use image::{DynamicImage, RgbImage};
use tracing_subscriber::{fmt, EnvFilter};

fn sample_png() -> Vec<u8> {
    let img = DynamicImage::ImageRgb8(RgbImage::from_fn(32, 32, |x, y| {
        image::Rgb([(x * 8) as u8, (y * 8) as u8, 96])
    }));
    let mut out = Cursor::new(Vec::new());
    if let Err(e) = img.write_to(&mut out, image::ImageFormat::Png) {
        eprintln!("Failed to encode sample image: {}", e);
    }
    out.into_inner()
}

fn main() {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("credlink_core=debug,info")),
        )
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    println!("=== CredLink Embed/Extract Tracing Demo ===\n");

    let config = CoreConfig::from_env();
    println!("Config: {:?}\n", config);

    let image = match std::env::args().nth(1) {
        Some(path) => match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) => {
                eprintln!("Failed to read {}: {}", path, e);
                return;
            }
        },
        None => sample_png(),
    };

    let proof = match ProofReference::parse("https://proofs.example/abc123") {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Invalid proof reference: {}", e);
            return;
        }
    };
    let manifest = Manifest::new("extract-tracing-demo/0.1").with_signature(SignatureBlock {
        algorithm: "ES256".into(),
        issuer: "CN=Demo Signer".into(),
        signature: vec![0u8; 64],
    });

    let embedded = Embedder::new(config.embed).embed(&image, &manifest, &proof, None);
    println!(
        "\nEmbedded via {:?} ({} -> {} bytes)",
        embedded.strategies_applied,
        image.len(),
        embedded.image_bytes.len()
    );
    for warning in &embedded.warnings {
        println!("   warning: {}", warning);
    }

    let coordinator = ExtractionCoordinator::new(config.extract);
    let result = coordinator.extract(&embedded.image_bytes);

    println!("\nRecovered:");
    println!("   Source:     {}", result.source);
    println!("   Confidence: {}", result.confidence);
    println!("   Integrity:  {:?}", result.integrity);
    println!("   Elapsed:    {:?}", result.elapsed);

    println!("\nPer-method survey:");
    for report in coordinator.survey(&embedded.image_bytes) {
        println!(
            "   {:<16} {:?} ({})",
            report.method.as_str(),
            report.status,
            report.confidence
        );
    }
}
