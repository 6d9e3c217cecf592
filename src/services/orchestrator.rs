//! Folder comparison entry point.
//!
//! `start_job` resolves and lists a folder synchronously, then hands the
//! image list to a background pipeline: download and encode every image,
//! submit them in fixed-size batches, and poll the resulting sub-jobs
//! until they all finish. `poll_job` projects the job record into its
//! public view and hands out a finished result exactly once.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::JobSettings;
use crate::models::face::JobStatusResponse;
use crate::models::image::{CandidateImage, Credentials};
use crate::models::job::{FailureKind, JobFailure};
use crate::services::aggregator::JobAggregator;
use crate::services::fetcher::ImageFetcher;
use crate::services::recognition::{RecognitionBackend, RecognitionError};
use crate::services::registry::{Delivery, JobRegistry};
use crate::services::source::{ImageByteSource, ImageSource, SourceError};
use crate::services::submitter::BatchSubmitter;

/// Stages run in the background for one job.
#[derive(Clone)]
struct JobPipeline {
    registry: Arc<JobRegistry>,
    fetcher: ImageFetcher,
    submitter: BatchSubmitter,
    aggregator: JobAggregator,
}

impl JobPipeline {
    async fn run(
        self,
        job_id: String,
        session_id: String,
        images: Arc<[CandidateImage]>,
        credentials: Credentials,
        deadline: Instant,
        cancel: CancellationToken,
    ) {
        debug!(job_id = %job_id, images = images.len(), "Downloading images");
        let encoded = match self.fetcher.fetch_all(Arc::clone(&images), &credentials).await {
            Ok(encoded) => encoded,
            Err(e) => return self.fail(&job_id, JobFailure::new(FailureKind::Fetch, e.to_string())),
        };

        if cancel.is_cancelled() {
            return self.fail(
                &job_id,
                JobFailure::new(FailureKind::Cancelled, "job cancelled before submission"),
            );
        }

        let sub_jobs = match self.submitter.submit_all(&session_id, &encoded).await {
            Ok(sub_jobs) => sub_jobs,
            Err(e) => return self.fail(&job_id, JobFailure::new(FailureKind::Submit, e.source.to_string())),
        };
        drop(encoded);

        if let Err(e) = self.registry.record_sub_jobs(&job_id, sub_jobs.clone()) {
            return self.fail(&job_id, JobFailure::new(FailureKind::Submit, e.to_string()));
        }

        info!(job_id = %job_id, sub_jobs = sub_jobs.len(), "All batches submitted, polling");
        self.aggregator.run(&job_id, sub_jobs, deadline, cancel).await;
    }

    fn fail(&self, job_id: &str, failure: JobFailure) {
        warn!(job_id, kind = %failure.kind, error = %failure.message, "Face comparison job failed");
        if self.registry.mark_failed(job_id, failure.clone()).is_ok() {
            metrics::counter!("face_match_jobs_failed_total", "kind" => failure.kind.to_string())
                .increment(1);
        }
    }
}

/// Starts folder comparisons and reports on them.
pub struct FaceMatchService {
    source: Arc<dyn ImageSource>,
    backend: Arc<dyn RecognitionBackend>,
    registry: Arc<JobRegistry>,
    pipeline: JobPipeline,
    settings: JobSettings,
    shutdown: CancellationToken,
}

impl FaceMatchService {
    pub fn new(
        source: Arc<dyn ImageSource>,
        bytes: Arc<dyn ImageByteSource>,
        backend: Arc<dyn RecognitionBackend>,
        settings: JobSettings,
        shutdown: CancellationToken,
    ) -> Self {
        let registry = Arc::new(JobRegistry::new());
        let pipeline = JobPipeline {
            registry: Arc::clone(&registry),
            fetcher: ImageFetcher::new(bytes, settings.fetch_workers),
            submitter: BatchSubmitter::new(Arc::clone(&backend), settings.batch_size),
            aggregator: JobAggregator::new(Arc::clone(&registry), Arc::clone(&backend), settings.poll_interval),
        };

        Self {
            source,
            backend,
            registry,
            pipeline,
            settings,
            shutdown,
        }
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn backend(&self) -> &Arc<dyn RecognitionBackend> {
        &self.backend
    }

    /// Start the periodic eviction of old job records.
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        self.registry.spawn_sweeper(
            self.settings.sweep_interval,
            self.settings.job_ttl,
            self.shutdown.child_token(),
        )
    }

    /// Resolve and list the folder, then start matching in the background.
    /// Returns the new job's ID as soon as the job exists.
    pub async fn start_job(
        &self,
        session_id: &str,
        folder_link: &str,
        credentials: Credentials,
        recursive: bool,
    ) -> Result<String, FaceMatchError> {
        let session_id = session_id.trim();
        let folder_link = folder_link.trim();
        if session_id.is_empty() {
            return Err(FaceMatchError::InvalidInput("session_id is required".to_string()));
        }
        if folder_link.is_empty() {
            return Err(FaceMatchError::InvalidInput("folder_link is required".to_string()));
        }

        let folder = self
            .source
            .parse_folder_reference(folder_link, &credentials)
            .await
            .map_err(|e| match e {
                SourceError::InvalidLink(msg) => FaceMatchError::InvalidFolderLink(msg),
                SourceError::UnsupportedProvider(p) => {
                    FaceMatchError::InvalidInput(format!("unsupported provider: {}", p))
                }
                other => FaceMatchError::FolderAccess(other.to_string()),
            })?;

        let images: Arc<[CandidateImage]> = self
            .source
            .list_images(&folder, &credentials, recursive)
            .await
            .map_err(|e| FaceMatchError::FolderAccess(e.to_string()))?
            .into();

        if images.is_empty() {
            return Err(FaceMatchError::NoImages);
        }

        let job_id = new_job_id(session_id);
        self.registry
            .create(&job_id, Arc::clone(&images))
            .map_err(|e| FaceMatchError::Internal(e.to_string()))?;

        metrics::counter!("face_match_jobs_started_total").increment(1);
        info!(
            job_id = %job_id,
            folder = %folder.name,
            images = images.len(),
            recursive,
            "Starting face comparison job"
        );

        let deadline = Instant::now() + self.settings.job_timeout;
        tokio::spawn(self.pipeline.clone().run(
            job_id.clone(),
            session_id.to_string(),
            images,
            credentials,
            deadline,
            self.shutdown.child_token(),
        ));

        Ok(job_id)
    }

    /// Current view of a job. A completed or failed job is removed once
    /// reported; polling it again yields `JobNotFound`.
    pub fn poll_job(&self, job_id: &str) -> Result<JobStatusResponse, FaceMatchError> {
        let job_id = job_id.trim();
        if job_id.is_empty() {
            return Err(FaceMatchError::InvalidInput("job_id is required".to_string()));
        }

        match self.registry.take_for_delivery(job_id) {
            Delivery::Missing => Err(FaceMatchError::JobNotFound),
            Delivery::Live(job) => Ok(JobStatusResponse::from_job(&job)),
            Delivery::Terminal(job) => {
                let view = JobStatusResponse::from_job(&job);
                info!(job_id, status = %view.status, matches = view.matches_found, "Delivered final job result");
                Ok(view)
            }
        }
    }

    pub async fn register_reference(&self, session_id: &str, image: &[u8]) -> Result<(), FaceMatchError> {
        if session_id.trim().is_empty() {
            return Err(FaceMatchError::InvalidInput("session_id is required".to_string()));
        }
        self.backend.register_reference(session_id.trim(), image).await?;
        Ok(())
    }

    pub async fn clear_reference(&self, session_id: &str) -> Result<(), FaceMatchError> {
        if session_id.trim().is_empty() {
            return Err(FaceMatchError::InvalidInput("session_id is required".to_string()));
        }
        self.backend.clear_reference(session_id.trim()).await?;
        Ok(())
    }

    pub fn job_timeout(&self) -> Duration {
        self.settings.job_timeout
    }
}

/// `<session>-<unix millis>-<random>`; the session part is reduced to
/// URL-safe characters.
fn new_job_id(session_id: &str) -> String {
    let session: String = session_id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .take(32)
        .collect();
    let nonce = Uuid::new_v4().simple().to_string();
    format!("{}-{}-{}", session, Utc::now().timestamp_millis(), &nonce[..12])
}

#[derive(Debug, thiserror::Error)]
pub enum FaceMatchError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("Invalid folder link: {0}")]
    InvalidFolderLink(String),

    #[error("Unable to access folder: {0}")]
    FolderAccess(String),

    #[error("No images found in folder")]
    NoImages,

    #[error("Job not found")]
    JobNotFound,

    #[error(transparent)]
    Recognition(#[from] RecognitionError),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_ids_are_unique_and_url_safe() {
        let a = new_job_id("sess/../42 x");
        let b = new_job_id("sess/../42 x");
        assert_ne!(a, b);
        assert!(a.starts_with("sess42x-"));
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }
}
