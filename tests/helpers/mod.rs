//! Test helper utilities: in-memory storage and recognition doubles, plus
//! HTTP helpers for the E2E suite
#![allow(dead_code)]

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use folder_face_match::config::JobSettings;
use folder_face_match::models::image::{CandidateImage, Credentials, FolderHandle, Provider};
use folder_face_match::models::job::MatchResult;
use folder_face_match::services::orchestrator::FaceMatchService;
use folder_face_match::services::recognition::{
    RecognitionBackend, RecognitionError, RemoteJobStatus, RemoteState,
};
use folder_face_match::services::source::{ImageByteSource, ImageSource, SourceError};

/// A Google Drive folder held in memory.
#[derive(Default)]
pub struct MockDrive {
    pub images: Vec<CandidateImage>,
    /// Image id whose download fails
    pub broken_image: Option<String>,
    pub fetched: Mutex<Vec<String>>,
}

impl MockDrive {
    pub fn with_images(images: Vec<CandidateImage>) -> Self {
        Self {
            images,
            ..Self::default()
        }
    }
}

#[async_trait]
impl ImageSource for MockDrive {
    async fn parse_folder_reference(
        &self,
        link: &str,
        credentials: &Credentials,
    ) -> Result<FolderHandle, SourceError> {
        if credentials.provider != Provider::GoogleDrive {
            return Err(SourceError::UnsupportedProvider(credentials.provider));
        }
        if !link.contains("drive.google.com") {
            return Err(SourceError::InvalidLink("not a Google Drive folder link".to_string()));
        }
        Ok(FolderHandle {
            id: "folder-1".to_string(),
            name: "Wedding".to_string(),
            provider: Provider::GoogleDrive,
        })
    }

    async fn list_images(
        &self,
        _folder: &FolderHandle,
        _credentials: &Credentials,
        _recursive: bool,
    ) -> Result<Vec<CandidateImage>, SourceError> {
        Ok(self.images.clone())
    }
}

#[async_trait]
impl ImageByteSource for MockDrive {
    async fn fetch(
        &self,
        image: &CandidateImage,
        _url: &str,
        _credentials: &Credentials,
    ) -> Result<Vec<u8>, SourceError> {
        if self.broken_image.as_deref() == Some(image.id.as_str()) {
            return Err(SourceError::Download("API request failed with status 403".to_string()));
        }
        self.fetched.lock().unwrap().push(image.id.clone());
        Ok(format!("bytes-{}", image.id).into_bytes())
    }
}

/// Face recognition service double. Each accepted batch becomes a sub-job
/// `sub-<n>` that reports completion after a configurable number of polls.
pub struct MockFaceService {
    pub batches: Mutex<Vec<usize>>,
    polls: Mutex<HashMap<usize, usize>>,
    polls_until_done: usize,
    matches: HashMap<usize, Vec<MatchResult>>,
    failing_sub_job: Option<usize>,
    rejected_batch: Option<usize>,
    status_calls: AtomicUsize,
    references: Mutex<HashSet<String>>,
    pub healthy: AtomicBool,
}

impl Default for MockFaceService {
    fn default() -> Self {
        Self {
            batches: Mutex::new(Vec::new()),
            polls: Mutex::new(HashMap::new()),
            polls_until_done: 2,
            matches: HashMap::new(),
            failing_sub_job: None,
            rejected_batch: None,
            status_calls: AtomicUsize::new(0),
            references: Mutex::new(HashSet::new()),
            healthy: AtomicBool::new(true),
        }
    }
}

impl MockFaceService {
    pub fn completing_after(mut self, polls: usize) -> Self {
        self.polls_until_done = polls;
        self
    }

    /// Sub-jobs that never finish.
    pub fn stalled(self) -> Self {
        self.completing_after(usize::MAX)
    }

    /// Batch-local matches reported by sub-job `batch`.
    pub fn with_matches(mut self, batch: usize, matches: Vec<MatchResult>) -> Self {
        self.matches.insert(batch, matches);
        self
    }

    pub fn failing(mut self, batch: usize) -> Self {
        self.failing_sub_job = Some(batch);
        self
    }

    /// Refuse the `batch`-th submission the way the service does for an
    /// unknown session. Earlier batches are accepted.
    pub fn rejecting(mut self, batch: usize) -> Self {
        self.rejected_batch = Some(batch);
        self
    }

    /// Accepted batch sizes, in submission order.
    pub fn submitted_batches(&self) -> Vec<usize> {
        self.batches.lock().unwrap().clone()
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn has_reference(&self, session_id: &str) -> bool {
        self.references.lock().unwrap().contains(session_id)
    }
}

#[async_trait]
impl RecognitionBackend for MockFaceService {
    async fn submit_batch(&self, _session_id: &str, images: &[String]) -> Result<String, RecognitionError> {
        let mut batches = self.batches.lock().unwrap();
        if self.rejected_batch == Some(batches.len()) {
            return Err(RecognitionError::Rejected("Session not found".to_string()));
        }
        batches.push(images.len());
        Ok(format!("sub-{}", batches.len() - 1))
    }

    async fn job_status(&self, handle: &str) -> Result<RemoteJobStatus, RecognitionError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let batch: usize = handle
            .trim_start_matches("sub-")
            .parse()
            .map_err(|_| RecognitionError::Rejected("Job not found".to_string()))?;
        let len = self.batches.lock().unwrap()[batch];
        let polls = {
            let mut polls = self.polls.lock().unwrap();
            let count = polls.entry(batch).or_insert(0);
            *count += 1;
            *count
        };

        let mut status = RemoteJobStatus {
            job_id: handle.to_string(),
            status: RemoteState::Processing,
            current_image: len / 2,
            total_images: len,
            matches_found: 0,
            message: String::new(),
            matches: None,
            error: None,
        };

        if self.failing_sub_job == Some(batch) {
            status.status = RemoteState::Failed;
            status.error = Some("Session not found".to_string());
        } else if polls >= self.polls_until_done {
            let matches = self.matches.get(&batch).cloned().unwrap_or_default();
            status.status = RemoteState::Completed;
            status.current_image = len;
            status.matches_found = matches.len();
            status.matches = Some(matches);
        }

        Ok(status)
    }

    async fn register_reference(&self, session_id: &str, image: &[u8]) -> Result<(), RecognitionError> {
        if image.is_empty() {
            return Err(RecognitionError::Rejected("No face detected in image".to_string()));
        }
        self.references.lock().unwrap().insert(session_id.to_string());
        Ok(())
    }

    async fn clear_reference(&self, session_id: &str) -> Result<(), RecognitionError> {
        if !self.references.lock().unwrap().remove(session_id) {
            return Err(RecognitionError::Rejected("Session not found".to_string()));
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<(), RecognitionError> {
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RecognitionError::Unavailable("connection refused".to_string()))
        }
    }
}

/// Service wired to the given doubles.
pub fn face_service(
    drive: Arc<MockDrive>,
    backend: Arc<MockFaceService>,
    settings: JobSettings,
    shutdown: CancellationToken,
) -> FaceMatchService {
    FaceMatchService::new(drive.clone(), drive, backend, settings, shutdown)
}

pub fn drive_credentials() -> Credentials {
    Credentials::new("ya29.test-token", Provider::GoogleDrive)
}

/// Response from POST /face/compare-folder
#[derive(Debug, Serialize, Deserialize)]
pub struct CompareFolderResponse {
    pub job_id: String,
    pub status: String,
}

/// Response from GET /face/job-status/{job_id}
#[derive(Debug, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub job_id: String,
    pub status: String,
    pub progress: u8,
    pub current_image: usize,
    pub total_images: usize,
    pub matches_found: usize,
    pub message: String,
    pub matches: Option<Vec<serde_json::Value>>,
    pub error: Option<String>,
}

/// Upload a reference face to the register endpoint
pub async fn register_reference_face(
    client: &reqwest::Client,
    base_url: &str,
    session_id: &str,
    image_bytes: Vec<u8>,
) -> Result<(), Box<dyn std::error::Error>> {
    let form = reqwest::multipart::Form::new()
        .text("session_id", session_id.to_string())
        .part(
            "image",
            reqwest::multipart::Part::bytes(image_bytes)
                .file_name("reference.jpg")
                .mime_str("image/jpeg")?,
        );

    let response = client
        .post(format!("{}/face/register-base", base_url))
        .multipart(form)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response.text().await?;
        return Err(format!("Registration failed with status {}: {}", status, error_text).into());
    }
    Ok(())
}

/// Start a folder comparison
pub async fn start_folder_comparison(
    client: &reqwest::Client,
    base_url: &str,
    token: &str,
    session_id: &str,
    folder_link: &str,
) -> Result<CompareFolderResponse, Box<dyn std::error::Error>> {
    let response = client
        .post(format!("{}/face/compare-folder", base_url))
        .bearer_auth(token)
        .json(&serde_json::json!({
            "session_id": session_id,
            "folder_link": folder_link,
            "provider": "googledrive",
            "recursive": true,
        }))
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response.text().await?;
        return Err(format!("Compare failed with status {}: {}", status, error_text).into());
    }
    Ok(response.json::<CompareFolderResponse>().await?)
}

/// Poll job status until completed or failed (with timeout)
pub async fn poll_job_status(
    client: &reqwest::Client,
    base_url: &str,
    job_id: &str,
    timeout_secs: u64,
) -> Result<JobStatusResponse, Box<dyn std::error::Error>> {
    let max_attempts = timeout_secs * 2; // Poll every 500ms

    for attempt in 0..max_attempts {
        let response = client
            .get(format!("{}/face/job-status/{}", base_url, job_id))
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(format!("Status check failed: {}", error_text).into());
        }

        let status_response = response.json::<JobStatusResponse>().await?;

        match status_response.status.as_str() {
            "completed" | "failed" => return Ok(status_response),
            "processing" => {
                if attempt % 10 == 0 && attempt > 0 {
                    println!("  ... {}", status_response.message);
                }
                sleep(Duration::from_millis(500)).await;
            }
            _ => {
                return Err(format!("Unknown job status: {}", status_response.status).into());
            }
        }
    }

    Err(format!("Job did not complete within {} seconds", timeout_secs).into())
}
