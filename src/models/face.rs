use garde::Validate;
use serde::{Deserialize, Serialize};

use crate::models::image::MatchedImage;
use crate::models::job::{FailureKind, JobStatus, UnifiedJob};

/// Request to compare every image in a shared folder against the
/// session's reference face.
#[derive(Debug, Deserialize, Validate)]
pub struct CompareFolderRequest {
    #[garde(length(min = 1, max = 256))]
    pub session_id: String,

    #[garde(length(min = 1, max = 2048))]
    pub folder_link: String,

    #[garde(length(min = 1, max = 32))]
    pub provider: String,

    #[serde(default)]
    #[garde(skip)]
    pub recursive: bool,
}

/// Response after starting a folder comparison.
#[derive(Debug, Serialize, Deserialize)]
pub struct CompareFolderResponse {
    pub job_id: String,
    pub status: JobStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterBaseFaceResponse {
    pub success: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClearReferenceResponse {
    pub success: bool,
    pub message: String,
}

/// Public view of a job returned by the status endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobStatusResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub progress: u8,
    pub current_image: usize,
    pub total_images: usize,
    pub matches_found: usize,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matches: Option<Vec<MatchedImage>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<FailureKind>,
}

impl JobStatusResponse {
    /// Project a job record into its public view. Matches are resolved
    /// against the job's image list only for completed jobs.
    pub fn from_job(job: &UnifiedJob) -> Self {
        let total = job.total_images();
        let current = job.current_image.min(total);

        let (message, matches) = match job.status {
            JobStatus::Processing => (format!("Processing image {} of {}", current, total), None),
            JobStatus::Completed => {
                let matched: Vec<MatchedImage> = job
                    .matches
                    .iter()
                    .filter_map(|m| {
                        job.all_images
                            .get(m.index)
                            .map(|image| image.with_match_distance(m.distance))
                    })
                    .collect();
                (format!("Completed! Found {} matches", matched.len()), Some(matched))
            }
            JobStatus::Failed => {
                let reason = job
                    .failure
                    .as_ref()
                    .map(|f| f.message.as_str())
                    .unwrap_or("unknown error");
                (format!("Failed: {}", reason), None)
            }
        };

        Self {
            job_id: job.id.clone(),
            status: job.status,
            progress: job.progress_percent(),
            current_image: current,
            total_images: total,
            matches_found: job.matches_found,
            message,
            matches,
            error: job.failure.as_ref().map(|f| f.message.clone()),
            error_kind: job.failure.as_ref().map(|f| f.kind),
        }
    }
}

/// Error body for every non-2xx response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
