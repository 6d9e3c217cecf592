use std::ops::Range;
use std::sync::Arc;
use tracing::{info, warn};

use crate::models::job::SubJob;
use crate::services::recognition::{RecognitionBackend, RecognitionError};

/// Slices a job's encoded images into fixed-size batches and submits each
/// one to the recognition service.
#[derive(Clone)]
pub struct BatchSubmitter {
    backend: Arc<dyn RecognitionBackend>,
    batch_size: usize,
}

impl BatchSubmitter {
    pub fn new(backend: Arc<dyn RecognitionBackend>, batch_size: usize) -> Self {
        Self {
            backend,
            batch_size: batch_size.max(1),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Submit all batches in order. Stops at the first rejected batch;
    /// batches already accepted are abandoned, not cancelled.
    pub async fn submit_all(&self, session_id: &str, encoded: &[String]) -> Result<Vec<SubJob>, SubmitError> {
        let plan = plan_batches(encoded.len(), self.batch_size);
        let mut sub_jobs = Vec::with_capacity(plan.len());

        for (batch, range) in plan.into_iter().enumerate() {
            let handle = self
                .backend
                .submit_batch(session_id, &encoded[range.clone()])
                .await
                .map_err(|source| {
                    warn!(batch, offset = range.start, abandoned = sub_jobs.len(), "Batch submission rejected");
                    SubmitError { batch, source }
                })?;

            info!(batch, sub_job_id = %handle, offset = range.start, images = range.len(), "Submitted batch");
            metrics::counter!("face_match_sub_jobs_submitted_total").increment(1);

            sub_jobs.push(SubJob {
                handle,
                offset: range.start,
                len: range.len(),
            });
        }

        Ok(sub_jobs)
    }
}

/// Consecutive, non-overlapping ranges covering `0..total`, each at most
/// `batch_size` long; only the last may be shorter.
pub fn plan_batches(total: usize, batch_size: usize) -> Vec<Range<usize>> {
    let batch_size = batch_size.max(1);
    (0..total)
        .step_by(batch_size)
        .map(|start| start..(start + batch_size).min(total))
        .collect()
}

#[derive(Debug, thiserror::Error)]
#[error("batch {batch} was rejected: {source}")]
pub struct SubmitError {
    pub batch: usize,
    #[source]
    pub source: RecognitionError,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::recognition::RemoteJobStatus;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingBackend {
        batches: Mutex<Vec<usize>>,
        reject_batch: Option<usize>,
    }

    #[async_trait]
    impl RecognitionBackend for RecordingBackend {
        async fn submit_batch(&self, _session_id: &str, images: &[String]) -> Result<String, RecognitionError> {
            let mut batches = self.batches.lock().unwrap();
            if self.reject_batch == Some(batches.len()) {
                return Err(RecognitionError::Rejected("Session not found".to_string()));
            }
            batches.push(images.len());
            Ok(format!("remote-{}", batches.len() - 1))
        }

        async fn job_status(&self, _handle: &str) -> Result<RemoteJobStatus, RecognitionError> {
            unreachable!("submitter never polls")
        }

        async fn register_reference(&self, _session_id: &str, _image: &[u8]) -> Result<(), RecognitionError> {
            Ok(())
        }

        async fn clear_reference(&self, _session_id: &str) -> Result<(), RecognitionError> {
            Ok(())
        }

        async fn health_check(&self) -> Result<(), RecognitionError> {
            Ok(())
        }
    }

    fn encoded(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("b64-{i}")).collect()
    }

    #[test]
    fn test_plan_batches() {
        assert_eq!(plan_batches(150, 100), vec![0..100, 100..150]);
        assert_eq!(plan_batches(200, 100), vec![0..100, 100..200]);
        assert_eq!(plan_batches(3, 100), vec![0..3]);
        assert!(plan_batches(0, 100).is_empty());
    }

    #[tokio::test]
    async fn test_150_images_make_two_sub_jobs() {
        let backend = Arc::new(RecordingBackend::default());
        let submitter = BatchSubmitter::new(backend.clone(), 100);

        let sub_jobs = submitter.submit_all("session", &encoded(150)).await.unwrap();

        assert_eq!(sub_jobs.len(), 2);
        assert_eq!(sub_jobs[0].offset, 0);
        assert_eq!(sub_jobs[0].len, 100);
        assert_eq!(sub_jobs[1].offset, 100);
        assert_eq!(sub_jobs[1].len, 50);
        assert_eq!(sub_jobs[1].handle, "remote-1");
        assert_eq!(*backend.batches.lock().unwrap(), vec![100, 50]);
    }

    #[tokio::test]
    async fn test_rejected_batch_stops_submission() {
        let backend = Arc::new(RecordingBackend {
            reject_batch: Some(1),
            ..RecordingBackend::default()
        });
        let submitter = BatchSubmitter::new(backend.clone(), 10);

        let err = submitter.submit_all("session", &encoded(35)).await.unwrap_err();

        assert_eq!(err.batch, 1);
        assert_eq!(err.source.to_string(), "Session not found");
        assert_eq!(backend.batches.lock().unwrap().len(), 1);
    }
}
