use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::sync::Arc;
use strum::Display;

use crate::models::image::CandidateImage;

/// Status of a folder comparison job. `Processing` is the only
/// non-terminal state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Display, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, JobStatus::Processing)
    }
}

/// Why a job failed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Display, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FailureKind {
    /// An image could not be downloaded from cloud storage
    Fetch,
    /// The recognition service rejected a batch
    Submit,
    /// A sub-job reported failure, or its status could not be read
    Backend,
    /// The polling loop ran out of time
    Timeout,
    /// The server shut down while the job was running
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl JobFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// One batch accepted by the recognition service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubJob {
    pub handle: String,
    /// Index into the job's image list where this batch begins
    pub offset: usize,
    pub len: usize,
}

impl SubJob {
    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.len
    }
}

/// A match as reported by the recognition service, or after translation
/// into the job's index space.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct MatchResult {
    pub index: usize,
    pub distance: f64,
}

/// The single job record a caller polls, aggregating every sub-job of one
/// folder comparison.
#[derive(Debug, Clone)]
pub struct UnifiedJob {
    pub id: String,
    pub status: JobStatus,
    pub all_images: Arc<[CandidateImage]>,
    pub sub_jobs: Vec<SubJob>,
    pub current_image: usize,
    pub matches_found: usize,
    pub matches: Vec<MatchResult>,
    pub failure: Option<JobFailure>,
    pub created_at: DateTime<Utc>,
}

impl UnifiedJob {
    pub fn new(id: String, all_images: Arc<[CandidateImage]>, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            status: JobStatus::Processing,
            all_images,
            sub_jobs: Vec::new(),
            current_image: 0,
            matches_found: 0,
            matches: Vec::new(),
            failure: None,
            created_at,
        }
    }

    pub fn total_images(&self) -> usize {
        self.all_images.len()
    }

    /// Integer percentage of processed images.
    pub fn progress_percent(&self) -> u8 {
        let total = self.total_images();
        if total == 0 {
            return 0;
        }
        (self.current_image.min(total) * 100 / total) as u8
    }
}
