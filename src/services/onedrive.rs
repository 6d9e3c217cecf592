//! OneDrive Folder Source
//!
//! Resolves OneDrive share links through the Microsoft Graph `shares` API
//! and lists folder contents with thumbnail renditions expanded inline.
//!
//! API reference: <https://learn.microsoft.com/en-us/graph/api/shares-get>

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, warn};

use crate::models::image::{CandidateImage, Credentials, FolderHandle, Provider};
use crate::services::source::{ImageByteSource, ImageSource, SourceError};

const GRAPH_API_BASE: &str = "https://graph.microsoft.com/v1.0";

/// Items requested per listing page.
const PAGE_SIZE: u32 = 100;

/// c400x400 for display, large (~800px) for recognition.
const THUMBNAIL_EXPAND: &str = "thumbnails($select=c400x400,large)";

const VALID_HOSTS: &[&str] = &["1drv.ms", "onedrive.live.com", "d.docs.live.net", "onedrive.com"];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveItem {
    id: String,
    name: String,
    file: Option<FileFacet>,
    folder: Option<serde::de::IgnoredAny>,
    parent_reference: Option<ParentReference>,
    #[serde(rename = "@microsoft.graph.downloadUrl", default)]
    download_url: String,
    #[serde(default)]
    thumbnails: Vec<ThumbnailSet>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileFacet {
    #[serde(default)]
    mime_type: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ParentReference {
    #[serde(default)]
    drive_id: String,
}

#[derive(Debug, Deserialize)]
struct ThumbnailSet {
    large: Option<Thumbnail>,
    c400x400: Option<Thumbnail>,
}

#[derive(Debug, Deserialize)]
struct Thumbnail {
    #[serde(default)]
    url: String,
}

#[derive(Debug, Deserialize)]
struct DriveItemPage {
    #[serde(default)]
    value: Vec<DriveItem>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphErrorBody {
    error: GraphErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GraphErrorDetail {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

/// How a folder is addressed in Graph. Only the shared root is reachable
/// through its share token; sub-folders go through their drive.
#[derive(Debug, Clone, PartialEq, Eq)]
enum FolderRef {
    Share(String),
    Drive { drive_id: String, item_id: String },
    Own(String),
}

impl FolderRef {
    fn for_handle(id: &str) -> Self {
        if id.starts_with("u!") || id.starts_with("s!") {
            FolderRef::Share(id.to_string())
        } else {
            FolderRef::Own(id.to_string())
        }
    }

    fn children_url(&self, base_url: &str) -> String {
        match self {
            FolderRef::Share(token) => format!("{}/shares/{}/driveItem/children", base_url, token),
            FolderRef::Drive { drive_id, item_id } => {
                format!("{}/drives/{}/items/{}/children", base_url, drive_id, item_id)
            }
            FolderRef::Own(id) => format!("{}/me/drive/items/{}/children", base_url, id),
        }
    }

    fn drive_id(&self) -> Option<&str> {
        match self {
            FolderRef::Drive { drive_id, .. } => Some(drive_id),
            _ => None,
        }
    }
}

type ListFuture<'a> = Pin<Box<dyn Future<Output = Result<Vec<CandidateImage>, SourceError>> + Send + 'a>>;

/// Image source backed by Microsoft Graph v1.0.
pub struct OneDriveSource {
    http: Client,
    base_url: String,
}

impl OneDriveSource {
    pub fn new(timeout: Duration) -> Result<Self, SourceError> {
        Self::with_base_url(GRAPH_API_BASE, timeout)
    }

    pub fn with_base_url(base_url: &str, timeout: Duration) -> Result<Self, SourceError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn require_onedrive(credentials: &Credentials) -> Result<(), SourceError> {
        match credentials.provider {
            Provider::OneDrive => Ok(()),
            other => Err(SourceError::UnsupportedProvider(other)),
        }
    }

    async fn shared_item(&self, token: &str, credentials: &Credentials) -> Result<DriveItem, SourceError> {
        let response = self
            .http
            .get(format!("{}/shares/{}/driveItem", self.base_url, token))
            .bearer_auth(&credentials.access_token)
            .send()
            .await?;

        if response.status() != StatusCode::OK {
            return Err(SourceError::Access(api_error(response).await));
        }

        Ok(response.json().await?)
    }

    async fn list_page(&self, url: &str, first: bool, credentials: &Credentials) -> Result<DriveItemPage, SourceError> {
        let mut request = self.http.get(url).bearer_auth(&credentials.access_token);
        // nextLink already carries the query.
        if first {
            let top = PAGE_SIZE.to_string();
            request = request.query(&[("$top", top.as_str()), ("$expand", THUMBNAIL_EXPAND)]);
        }

        let response = request.send().await?;
        if response.status() != StatusCode::OK {
            return Err(SourceError::Access(api_error(response).await));
        }

        Ok(response.json().await?)
    }

    async fn list_children(&self, folder: &FolderRef, credentials: &Credentials) -> Result<Vec<DriveItem>, SourceError> {
        let mut items = Vec::new();
        let mut url = folder.children_url(&self.base_url);
        let mut first = true;

        loop {
            let page = self.list_page(&url, first, credentials).await?;
            items.extend(page.value);

            match page.next_link {
                Some(next) if !next.is_empty() => {
                    url = next;
                    first = false;
                }
                _ => break,
            }
        }

        Ok(items)
    }

    fn list_folder<'a>(&'a self, folder: FolderRef, credentials: &'a Credentials, recursive: bool) -> ListFuture<'a> {
        Box::pin(async move {
            let children = self.list_children(&folder, credentials).await?;
            let mut images = Vec::new();

            for item in children {
                if item.folder.is_some() {
                    if !recursive {
                        continue;
                    }
                    let drive_id = item
                        .parent_reference
                        .as_ref()
                        .map(|p| p.drive_id.as_str())
                        .filter(|id| !id.is_empty())
                        .or_else(|| folder.drive_id());
                    let Some(drive_id) = drive_id else {
                        warn!(item_id = %item.id, "Skipping sub-folder without a drive reference");
                        continue;
                    };
                    let nested = FolderRef::Drive {
                        drive_id: drive_id.to_string(),
                        item_id: item.id.clone(),
                    };
                    match self.list_folder(nested, credentials, recursive).await {
                        Ok(found) => images.extend(found),
                        Err(e) => {
                            warn!(item_id = %item.id, error = %e, "Skipping unreadable sub-folder");
                        }
                    }
                } else if let Some(candidate) = to_candidate(item) {
                    images.push(candidate);
                }
            }

            Ok(images)
        })
    }
}

#[async_trait]
impl ImageSource for OneDriveSource {
    async fn parse_folder_reference(
        &self,
        link: &str,
        credentials: &Credentials,
    ) -> Result<FolderHandle, SourceError> {
        Self::require_onedrive(credentials)?;
        validate_share_link(link)?;
        let token = encode_share_token(link);

        let item = self.shared_item(&token, credentials).await?;
        if item.folder.is_none() {
            return Err(SourceError::InvalidLink(format!("item {} is not a folder", item.name)));
        }

        debug!(folder = %item.name, "Resolved OneDrive share link");
        Ok(FolderHandle {
            id: token,
            name: item.name,
            provider: Provider::OneDrive,
        })
    }

    async fn list_images(
        &self,
        folder: &FolderHandle,
        credentials: &Credentials,
        recursive: bool,
    ) -> Result<Vec<CandidateImage>, SourceError> {
        Self::require_onedrive(credentials)?;
        let images = self
            .list_folder(FolderRef::for_handle(&folder.id), credentials, recursive)
            .await?;
        debug!(folder = %folder.name, images = images.len(), recursive, "Listed folder images");
        Ok(images)
    }
}

#[async_trait]
impl ImageByteSource for OneDriveSource {
    async fn fetch(
        &self,
        _image: &CandidateImage,
        url: &str,
        credentials: &Credentials,
    ) -> Result<Vec<u8>, SourceError> {
        let mut request = self.http.get(url);
        // Pre-authenticated download URLs reject a bearer header.
        if url.contains("/thumbnails/") || url.contains("/shares/") {
            request = request.bearer_auth(&credentials.access_token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SourceError::Download(e.to_string()))?;

        if response.status() != StatusCode::OK {
            return Err(SourceError::Download(format!(
                "OneDrive download error (status {})",
                response.status().as_u16()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| SourceError::Download(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

fn to_candidate(item: DriveItem) -> Option<CandidateImage> {
    let mime_type = item.file?.mime_type;
    if !mime_type.starts_with("image/") {
        return None;
    }

    let renditions = item.thumbnails.into_iter().next();
    let pick = |thumb: Option<Thumbnail>| thumb.map(|t| t.url).filter(|url| !url.is_empty());
    let (recognition_url, thumbnail_url) = match renditions {
        Some(set) => (pick(set.large), pick(set.c400x400)),
        None => (None, None),
    };

    Some(CandidateImage {
        id: item.id,
        name: item.name,
        mime_type,
        provider: Provider::OneDrive,
        download_url: item.download_url,
        recognition_url,
        thumbnail_url,
    })
}

async fn api_error(response: reqwest::Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    match serde_json::from_str::<GraphErrorBody>(&body) {
        Ok(err) => format!(
            "OneDrive API error ({}): {} - {}",
            status.as_u16(),
            err.error.code,
            err.error.message
        ),
        Err(_) => format!("API request failed with status {}", status.as_u16()),
    }
}

/// Check that a link points at a OneDrive share. `1drv.ms` short links
/// must be folder links (`/f/...`).
pub fn validate_share_link(link: &str) -> Result<(), SourceError> {
    let clean = link.trim();
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
            "not a OneDrive share link (invalid host: {})",
            host
        )));
    }

    if host == "1drv.ms" {
        let path = url.path().trim_matches('/');
        if path.is_empty() {
            return Err(SourceError::InvalidLink("OneDrive short link is missing path".to_string()));
        }
        if !path.starts_with("f/") {
            return Err(SourceError::InvalidLink(
                "OneDrive link does not appear to be a folder link".to_string(),
            ));
        }
    }

    Ok(())
}

/// Share token for the Graph `shares` API: `u!` followed by the unpadded
/// base64url form of the link.
pub fn encode_share_token(link: &str) -> String {
    let clean = link.trim().trim_end_matches('/');
    format!("u!{}", URL_SAFE_NO_PAD.encode(clean))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(json: serde_json::Value) -> DriveItem {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_share_token_encoding() {
        assert_eq!(
            encode_share_token(" https://1drv.ms/f/s!AkX9-abc?e=Zq1/ "),
            "u!aHR0cHM6Ly8xZHJ2Lm1zL2YvcyFBa1g5LWFiYz9lPVpxMQ"
        );
    }

    #[test]
    fn test_accepts_share_hosts() {
        assert!(validate_share_link("https://1drv.ms/f/s!AkX9-abc").is_ok());
        assert!(validate_share_link("https://onedrive.live.com/?id=ABC&cid=123").is_ok());
        assert!(validate_share_link("https://contoso-my.sharepoint.com/x").is_err());
    }

    #[test]
    fn test_short_links_must_be_folders() {
        assert!(matches!(
            validate_share_link("https://1drv.ms/i/s!AkX9-abc"),
            Err(SourceError::InvalidLink(msg)) if msg.contains("folder link")
        ));
        assert!(matches!(
            validate_share_link("https://1drv.ms/"),
            Err(SourceError::InvalidLink(msg)) if msg.contains("missing path")
        ));
        assert!(validate_share_link("ftp://1drv.ms/f/s!abc").is_err());
        assert!(validate_share_link("  ").is_err());
    }

    #[test]
    fn test_folder_addressing() {
        let base = "https://graph.test/v1.0";
        assert_eq!(
            FolderRef::for_handle("u!abc").children_url(base),
            "https://graph.test/v1.0/shares/u!abc/driveItem/children"
        );
        assert_eq!(
            FolderRef::for_handle("ITEM1").children_url(base),
            "https://graph.test/v1.0/me/drive/items/ITEM1/children"
        );
        let nested = FolderRef::Drive {
            drive_id: "d1".to_string(),
            item_id: "i1".to_string(),
        };
        assert_eq!(nested.children_url(base), "https://graph.test/v1.0/drives/d1/items/i1/children");
    }

    #[test]
    fn test_candidate_uses_thumbnail_renditions() {
        let candidate = to_candidate(item(serde_json::json!({
            "id": "i1",
            "name": "party.jpg",
            "file": { "mimeType": "image/jpeg" },
            "@microsoft.graph.downloadUrl": "https://dl.test/i1",
            "thumbnails": [{
                "id": "0",
                "large": { "url": "https://thumb.test/large", "width": 800, "height": 600 },
                "c400x400": { "url": "https://thumb.test/400", "width": 400, "height": 300 }
            }]
        })))
        .unwrap();

        assert_eq!(candidate.provider, Provider::OneDrive);
        assert_eq!(candidate.download_url, "https://dl.test/i1");
        assert_eq!(candidate.fetch_url(), "https://thumb.test/large");
        assert_eq!(candidate.thumbnail_url.as_deref(), Some("https://thumb.test/400"));
    }

    #[test]
    fn test_candidate_skips_non_images_and_folders() {
        assert!(to_candidate(item(serde_json::json!({
            "id": "d1",
            "name": "notes.pdf",
            "file": { "mimeType": "application/pdf" }
        })))
        .is_none());

        let folder = item(serde_json::json!({
            "id": "f1",
            "name": "Day 2",
            "folder": { "childCount": 12 },
            "parentReference": { "driveId": "drive-9" }
        }));
        assert!(folder.folder.is_some());
        assert!(to_candidate(folder).is_none());
    }

    #[test]
    fn test_candidate_without_thumbnails_falls_back_to_download() {
        let candidate = to_candidate(item(serde_json::json!({
            "id": "i2",
            "name": "b.png",
            "file": { "mimeType": "image/png" },
            "@microsoft.graph.downloadUrl": "https://dl.test/i2"
        })))
        .unwrap();
        assert_eq!(candidate.fetch_url(), "https://dl.test/i2");
        assert!(candidate.thumbnail_url.is_none());
    }

    #[tokio::test]
    async fn test_other_providers_rejected() {
        let source = OneDriveSource::new(Duration::from_secs(5)).unwrap();
        let creds = Credentials::new("token", Provider::GoogleDrive);
        let err = source
            .parse_folder_reference("https://1drv.ms/f/s!AkX9-abc", &creds)
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::UnsupportedProvider(Provider::GoogleDrive)));
    }
}
