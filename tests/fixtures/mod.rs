//! Shared fixtures for the job flow, API, and E2E tests

use folder_face_match::config::JobSettings;
use folder_face_match::models::image::{CandidateImage, Provider};
use std::time::Duration;

pub const FOLDER_LINK: &str = "https://drive.google.com/drive/folders/1AbCdEfGhIjKlMnOpQrStUvWxYz012345";

/// 1x1 PNG, enough for `image::guess_format`.
pub const TINY_PNG: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44, 0x52,
    0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F, 0x15, 0xC4,
    0x89, 0x00, 0x00, 0x00, 0x0A, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9C, 0x63, 0x00, 0x01, 0x00, 0x00,
    0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D, 0xB4, 0x00, 0x00, 0x00, 0x00, 0x49, 0x45, 0x4E, 0x44, 0xAE,
    0x42, 0x60, 0x82,
];

/// `count` images named `IMG_0000.jpg`, `IMG_0001.jpg`, ... with ids `img-<n>`.
pub fn candidate_images(count: usize) -> Vec<CandidateImage> {
    (0..count)
        .map(|i| CandidateImage {
            id: format!("img-{}", i),
            name: format!("IMG_{:04}.jpg", i),
            mime_type: "image/jpeg".to_string(),
            provider: Provider::GoogleDrive,
            download_url: format!("https://www.googleapis.com/drive/v3/files/img-{}?alt=media", i),
            recognition_url: Some(format!("https://drive.google.com/thumbnail?id=img-{}&sz=s800", i)),
            thumbnail_url: Some(format!("https://drive.google.com/thumbnail?id=img-{}&sz=s400", i)),
        })
        .collect()
}

/// Pipeline settings with the production batch size and a short job timeout.
pub fn test_settings() -> JobSettings {
    JobSettings {
        fetch_workers: 4,
        batch_size: 100,
        poll_interval: Duration::from_millis(500),
        job_timeout: Duration::from_secs(60),
        job_ttl: Duration::from_secs(24 * 60 * 60),
        sweep_interval: Duration::from_secs(60 * 60),
    }
}
