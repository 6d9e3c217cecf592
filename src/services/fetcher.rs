use base64::Engine;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::models::image::{CandidateImage, Credentials};
use crate::services::source::{ImageByteSource, SourceError};

/// Downloads and base64-encodes job images with a fixed number of workers.
#[derive(Clone)]
pub struct ImageFetcher {
    source: Arc<dyn ImageByteSource>,
    workers: usize,
}

impl ImageFetcher {
    pub fn new(source: Arc<dyn ImageByteSource>, workers: usize) -> Self {
        Self {
            source,
            workers: workers.max(1),
        }
    }

    /// Fetch every image, returning encodings in input order.
    ///
    /// The first failure wins. Workers stop picking up new images once an
    /// error is recorded; fetches already in flight finish and are
    /// discarded. No partial output escapes.
    pub async fn fetch_all(
        &self,
        images: Arc<[CandidateImage]>,
        credentials: &Credentials,
    ) -> Result<Vec<String>, FetchError> {
        let total = images.len();
        if total == 0 {
            return Ok(Vec::new());
        }

        let started = std::time::Instant::now();
        let next = Arc::new(AtomicUsize::new(0));
        let failures = Arc::new(AtomicUsize::new(0));
        let mut workers = JoinSet::new();

        for _ in 0..self.workers.min(total) {
            let source = Arc::clone(&self.source);
            let images = Arc::clone(&images);
            let next = Arc::clone(&next);
            let failures = Arc::clone(&failures);
            let credentials = credentials.clone();

            workers.spawn(async move {
                let mut outcome = WorkerOutcome::default();
                while failures.load(Ordering::SeqCst) == 0 {
                    let index = next.fetch_add(1, Ordering::SeqCst);
                    let Some(image) = images.get(index) else {
                        break;
                    };

                    match fetch_one(source.as_ref(), image, &credentials).await {
                        Ok(encoded) => outcome.fetched.push((index, encoded)),
                        Err(e) => {
                            warn!(image = %image.name, error = %e, "Image download failed");
                            let order = failures.fetch_add(1, Ordering::SeqCst);
                            outcome.failure = Some((
                                order,
                                FetchError::Download {
                                    name: image.name.clone(),
                                    source: e,
                                },
                            ));
                            break;
                        }
                    }
                }
                outcome
            });
        }

        // Wait for every worker, even after a failure, so nothing is still
        // writing when we return.
        let mut slots: Vec<Option<String>> = vec![None; total];
        let mut first_error: Option<(usize, FetchError)> = None;
        while let Some(joined) = workers.join_next().await {
            let failure = match joined {
                Ok(outcome) => {
                    for (index, encoded) in outcome.fetched {
                        slots[index] = Some(encoded);
                    }
                    outcome.failure
                }
                Err(e) => Some((usize::MAX, FetchError::Worker(e.to_string()))),
            };

            if let Some((order, err)) = failure {
                if first_error.as_ref().map_or(true, |(first, _)| order < *first) {
                    first_error = Some((order, err));
                }
            }
        }

        if let Some((_, err)) = first_error {
            return Err(err);
        }

        let encoded: Vec<String> = slots
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or(FetchError::Incomplete)?;

        metrics::histogram!("face_match_fetch_seconds").record(started.elapsed().as_secs_f64());
        debug!(images = total, elapsed_ms = started.elapsed().as_millis() as u64, "Fetched all images");

        Ok(encoded)
    }
}

#[derive(Default)]
struct WorkerOutcome {
    fetched: Vec<(usize, String)>,
    /// Failure with its position in the global failure order
    failure: Option<(usize, FetchError)>,
}

async fn fetch_one(
    source: &dyn ImageByteSource,
    image: &CandidateImage,
    credentials: &Credentials,
) -> Result<String, SourceError> {
    let bytes = source.fetch(image, image.fetch_url(), credentials).await?;
    Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("failed to download image {name}: {source}")]
    Download {
        name: String,
        #[source]
        source: SourceError,
    },

    #[error("download worker crashed: {0}")]
    Worker(String),

    #[error("download finished without a result for every image")]
    Incomplete,
}
