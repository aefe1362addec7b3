//! Bounded parallel extraction over independent images.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, instrument, warn};

use crate::config::CoreConfig;
use crate::extract::{ExtractionCoordinator, ExtractionResult, Integrity, Source};
use crate::format::ImageFormat;

/// Extract every image on a blocking worker pool of at most `concurrency`
/// tasks. Results come back in input order.
#[instrument(level = "debug", skip_all, fields(images = images.len(), concurrency = concurrency))]
pub async fn extract_batch(
    coordinator: Arc<ExtractionCoordinator>,
    images: Vec<Vec<u8>>,
    concurrency: usize,
) -> Vec<ExtractionResult> {
    let started = Instant::now();
    let total = images.len();
    let permits = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut tasks = JoinSet::new();
    let mut formats = Vec::with_capacity(total);

    for (index, image) in images.into_iter().enumerate() {
        formats.push(ImageFormat::sniff(&image));
        let coordinator = Arc::clone(&coordinator);
        let permits = Arc::clone(&permits);
        tasks.spawn(async move {
            // the semaphore is never closed
            let _permit = permits.acquire_owned().await.ok();
            let result = tokio::task::spawn_blocking(move || coordinator.extract(&image)).await;
            (index, result)
        });
    }

    let mut results: Vec<Option<ExtractionResult>> = (0..total).map(|_| None).collect();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, Ok(result))) => results[index] = Some(result),
            Ok((index, Err(e))) => {
                warn!(index, error = %e, "Extraction worker failed");
            }
            Err(e) => warn!(error = %e, "Batch task failed"),
        }
    }

    info!(
        images = total,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Batch extraction complete"
    );

    results
        .into_iter()
        .zip(formats)
        .map(|(result, format)| result.unwrap_or_else(|| failed(format)))
        .collect()
}

/// [`extract_batch`] with a coordinator built from `config.extract` and the
/// pool sized by `config.batch_concurrency`.
pub async fn extract_batch_with(config: &CoreConfig, images: Vec<Vec<u8>>) -> Vec<ExtractionResult> {
    let coordinator = Arc::new(ExtractionCoordinator::new(config.extract.clone()));
    extract_batch(coordinator, images, config.batch_concurrency).await
}

fn failed(format: Option<ImageFormat>) -> ExtractionResult {
    ExtractionResult {
        manifest: None,
        proof_reference: None,
        source: Source::None,
        confidence: 0,
        integrity: Integrity::None,
        methods_attempted: Vec::new(),
        methods_succeeded: Vec::new(),
        elapsed: std::time::Duration::ZERO,
        format,
        signature_present: false,
        notes: vec!["extraction worker failed".into()],
    }
}
