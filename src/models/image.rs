use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Cloud storage providers a folder link can point at.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Provider {
    GoogleDrive,
    OneDrive,
}

/// OAuth bearer credentials for one provider.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_token: String,
    pub provider: Provider,
}

impl Credentials {
    pub fn new(access_token: impl Into<String>, provider: Provider) -> Self {
        Self {
            access_token: access_token.into(),
            provider,
        }
    }
}

// Never print the token.
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("provider", &self.provider)
            .finish_non_exhaustive()
    }
}

/// Folder resolved from a share link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderHandle {
    pub id: String,
    pub name: String,
    pub provider: Provider,
}

/// An image found while listing a folder.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CandidateImage {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    pub provider: Provider,
    /// Full resolution
    pub download_url: String,
    /// ~800px rendition preferred for recognition
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recognition_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
}

impl CandidateImage {
    /// URL to download for recognition: the optimized rendition when the
    /// provider offers one, the original otherwise.
    pub fn fetch_url(&self) -> &str {
        match self.recognition_url.as_deref() {
            Some(url) if !url.is_empty() => url,
            _ => &self.download_url,
        }
    }

    pub fn with_match_distance(&self, distance: f64) -> MatchedImage {
        MatchedImage {
            image: self.clone(),
            match_distance: distance,
        }
    }
}

/// A candidate image annotated with its face distance (lower is closer).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatchedImage {
    #[serde(flatten)]
    pub image: CandidateImage,
    pub match_distance: f64,
}
