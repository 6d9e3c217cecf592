//! Google Drive Folder Source
//!
//! Resolves Google Drive share links, lists folder contents through the
//! Drive v3 `files` endpoint, and downloads image renditions.
//!
//! API reference: <https://developers.google.com/drive/api/reference/rest/v3/files>

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, warn};

use crate::models::image::{CandidateImage, Credentials, FolderHandle, Provider};
use crate::services::source::{ImageByteSource, ImageSource, SourceError};

const DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";

const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

/// Items requested per listing page.
const PAGE_SIZE: u32 = 100;

const IMAGE_MIME_TYPES: &[&str] = &[
    "image/jpeg",
    "image/jpg",
    "image/png",
    "image/gif",
    "image/webp",
    "image/bmp",
    "image/svg+xml",
];

const VALID_HOSTS: &[&str] = &["drive.google.com", "docs.google.com"];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    name: String,
    mime_type: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DriveErrorBody {
    error: DriveErrorDetail,
}

#[derive(Debug, Deserialize)]
struct DriveErrorDetail {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
}

type ListFuture<'a> = Pin<Box<dyn Future<Output = Result<Vec<CandidateImage>, SourceError>> + Send + 'a>>;

/// Image source backed by the Google Drive v3 API.
pub struct GoogleDriveSource {
    http: Client,
    base_url: String,
}

impl GoogleDriveSource {
    pub fn new(timeout: Duration) -> Result<Self, SourceError> {
        Self::with_base_url(DRIVE_API_BASE, timeout)
    }

    pub fn with_base_url(base_url: &str, timeout: Duration) -> Result<Self, SourceError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn require_drive(credentials: &Credentials) -> Result<(), SourceError> {
        match credentials.provider {
            Provider::GoogleDrive => Ok(()),
            other => Err(SourceError::UnsupportedProvider(other)),
        }
    }

    async fn folder_info(
        &self,
        folder_id: &str,
        credentials: &Credentials,
    ) -> Result<FolderHandle, SourceError> {
        let url = format!("{}/files/{}", self.base_url, folder_id);
        let response = self
            .http
            .get(&url)
            .query(&[("fields", "id,name,mimeType")])
            .bearer_auth(&credentials.access_token)
            .send()
            .await?;

        if response.status() != StatusCode::OK {
            return Err(SourceError::Access(api_error(response).await));
        }

        let file: DriveFile = response.json().await?;
        if file.mime_type != FOLDER_MIME_TYPE {
            return Err(SourceError::InvalidLink(format!("item {} is not a folder", folder_id)));
        }

        Ok(FolderHandle {
            id: file.id,
            name: file.name,
            provider: Provider::GoogleDrive,
        })
    }

    async fn list_page(
        &self,
        folder_id: &str,
        credentials: &Credentials,
        page_token: Option<&str>,
    ) -> Result<DriveFileList, SourceError> {
        let query = format!("'{}' in parents and trashed = false", folder_id);
        let page_size = PAGE_SIZE.to_string();
        let mut params = vec![
            ("q", query.as_str()),
            ("fields", "nextPageToken,files(id,name,mimeType)"),
            ("pageSize", page_size.as_str()),
        ];
        if let Some(token) = page_token {
            params.push(("pageToken", token));
        }

        let response = self
            .http
            .get(format!("{}/files", self.base_url))
            .query(&params)
            .bearer_auth(&credentials.access_token)
            .send()
            .await?;

        if response.status() != StatusCode::OK {
            return Err(SourceError::Access(api_error(response).await));
        }

        Ok(response.json().await?)
    }

    /// Every item directly inside a folder, following pagination.
    async fn list_children(
        &self,
        folder_id: &str,
        credentials: &Credentials,
    ) -> Result<Vec<DriveFile>, SourceError> {
        let mut items = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let page = self
                .list_page(folder_id, credentials, page_token.as_deref())
                .await?;
            items.extend(page.files);

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(items)
    }

    fn list_folder<'a>(
        &'a self,
        folder_id: &'a str,
        credentials: &'a Credentials,
        recursive: bool,
    ) -> ListFuture<'a> {
        Box::pin(async move {
            let children = self.list_children(folder_id, credentials).await?;
            let mut images = Vec::new();

            for item in children {
                if item.mime_type == FOLDER_MIME_TYPE {
                    if !recursive {
                        continue;
                    }
                    // A sub-folder we cannot read should not sink the whole listing.
                    match self.list_folder(&item.id, credentials, recursive).await {
                        Ok(nested) => images.extend(nested),
                        Err(e) => {
                            warn!(folder_id = %item.id, error = %e, "Skipping unreadable sub-folder");
                        }
                    }
                } else if is_image_mime_type(&item.mime_type) {
                    images.push(self.to_candidate(item));
                }
            }

            Ok(images)
        })
    }

    fn to_candidate(&self, file: DriveFile) -> CandidateImage {
        let media = format!("{}/files/{}?alt=media", self.base_url, file.id);
        CandidateImage {
            recognition_url: Some(format!("{}&sz=s800", media)),
            thumbnail_url: Some(format!("{}&sz=s400", media)),
            download_url: media,
            id: file.id,
            name: file.name,
            mime_type: file.mime_type,
            provider: Provider::GoogleDrive,
        }
    }
}

#[async_trait]
impl ImageSource for GoogleDriveSource {
    async fn parse_folder_reference(
        &self,
        link: &str,
        credentials: &Credentials,
    ) -> Result<FolderHandle, SourceError> {
        Self::require_drive(credentials)?;
        let folder_id = extract_folder_id(link)?;
        debug!(folder_id = %folder_id, "Resolved Google Drive folder link");
        self.folder_info(&folder_id, credentials).await
    }

    async fn list_images(
        &self,
        folder: &FolderHandle,
        credentials: &Credentials,
        recursive: bool,
    ) -> Result<Vec<CandidateImage>, SourceError> {
        Self::require_drive(credentials)?;
        let images = self.list_folder(&folder.id, credentials, recursive).await?;
        debug!(folder_id = %folder.id, images = images.len(), recursive, "Listed folder images");
        Ok(images)
    }
}

#[async_trait]
impl ImageByteSource for GoogleDriveSource {
    async fn fetch(
        &self,
        _image: &CandidateImage,
        url: &str,
        credentials: &Credentials,
    ) -> Result<Vec<u8>, SourceError> {
        let response = self
            .http
            .get(url)
            .bearer_auth(&credentials.access_token)
            .send()
            .await
            .map_err(|e| SourceError::Download(e.to_string()))?;

        if response.status() != StatusCode::OK {
            return Err(SourceError::Download(api_error(response).await));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| SourceError::Download(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

async fn api_error(response: reqwest::Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    match serde_json::from_str::<DriveErrorBody>(&body) {
        Ok(err) => format!(
            "Google Drive API error ({}): {} - {}",
            status.as_u16(),
            err.error.status,
            err.error.message
        ),
        Err(_) => format!("API request failed with status {}", status.as_u16()),
    }
}

pub fn is_image_mime_type(mime_type: &str) -> bool {
    IMAGE_MIME_TYPES.contains(&mime_type)
}

fn looks_like_folder_id(candidate: &str) -> bool {
    (25..=44).contains(&candidate.len())
        && candidate
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Extract the folder ID from a Google Drive share link.
///
/// Accepts `/drive/folders/<id>`, `/drive/u/<n>/folders/<id>`,
/// `/open?id=<id>` and `?id=<id>` forms.
pub fn extract_folder_id(link: &str) -> Result<String, SourceError> {
    let clean = link.trim().trim_end_matches('/');
    if clean.is_empty() {
        return Err(SourceError::InvalidLink("share URL cannot be empty".to_string()));
    }

    let url = Url::parse(clean)
        .map_err(|e| SourceError::InvalidLink(format!("invalid URL format: {}", e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(SourceError::InvalidLink("URL must use http or https scheme".to_string()));
    }

    let host = url.host_str().unwrap_or_default().to_lowercase();
    let valid_host = VALID_HOSTS
        .iter()
        .any(|valid| host == *valid || host.ends_with(&format!(".{}", valid)));
    if !valid_host {
        return Err(SourceError::InvalidLink(format!(
            "not a Google Drive share link (invalid host: {})",
            host
        )));
    }

    let segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.filter(|p| !p.is_empty()).collect())
        .unwrap_or_default();

    if let Some(pos) = segments.iter().position(|s| *s == "folders") {
        if let Some(id) = segments.get(pos + 1).filter(|id| looks_like_folder_id(id)) {
            return Ok(id.to_string());
        }
    }

    if let Some((_, id)) = url.query_pairs().find(|(key, _)| key == "id") {
        if looks_like_folder_id(&id) {
            return Ok(id.into_owned());
        }
    }

    segments
        .into_iter()
        .find(|s| looks_like_folder_id(s))
        .map(str::to_string)
        .ok_or_else(|| {
            SourceError::InvalidLink("could not extract folder ID from Google Drive link".to_string())
        })
}
