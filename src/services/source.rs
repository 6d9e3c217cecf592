//! Cloud storage collaborators used by the job pipeline.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::models::image::{CandidateImage, Credentials, FolderHandle, Provider};

/// Resolves share links and lists the images inside a folder.
#[async_trait]
pub trait ImageSource: Send + Sync {
    async fn parse_folder_reference(
        &self,
        link: &str,
        credentials: &Credentials,
    ) -> Result<FolderHandle, SourceError>;

    /// List images in listing order, descending into sub-folders when
    /// `recursive` is set.
    async fn list_images(
        &self,
        folder: &FolderHandle,
        credentials: &Credentials,
        recursive: bool,
    ) -> Result<Vec<CandidateImage>, SourceError>;
}

/// Downloads the bytes of a single image.
#[async_trait]
pub trait ImageByteSource: Send + Sync {
    async fn fetch(
        &self,
        image: &CandidateImage,
        url: &str,
        credentials: &Credentials,
    ) -> Result<Vec<u8>, SourceError>;
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Invalid folder link: {0}")]
    InvalidLink(String),

    #[error("Unable to access folder: {0}")]
    Access(String),

    #[error("Download failed: {0}")]
    Download(String),

    #[error("Unsupported provider: {0}")]
    UnsupportedProvider(Provider),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// A storage provider that can both list folders and serve image bytes.
pub trait CloudProvider: ImageSource + ImageByteSource {}

impl<T: ImageSource + ImageByteSource> CloudProvider for T {}

/// Routes each call to the source registered for its provider.
#[derive(Clone, Default)]
pub struct CloudSources {
    sources: HashMap<Provider, Arc<dyn CloudProvider>>,
}

impl CloudSources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, provider: Provider, source: Arc<dyn CloudProvider>) -> Self {
        self.sources.insert(provider, source);
        self
    }

    fn source(&self, provider: Provider) -> Result<&Arc<dyn CloudProvider>, SourceError> {
        self.sources
            .get(&provider)
            .ok_or(SourceError::UnsupportedProvider(provider))
    }
}

#[async_trait]
impl ImageSource for CloudSources {
    async fn parse_folder_reference(
        &self,
        link: &str,
        credentials: &Credentials,
    ) -> Result<FolderHandle, SourceError> {
        self.source(credentials.provider)?
            .parse_folder_reference(link, credentials)
            .await
    }

    async fn list_images(
        &self,
        folder: &FolderHandle,
        credentials: &Credentials,
        recursive: bool,
    ) -> Result<Vec<CandidateImage>, SourceError> {
        self.source(folder.provider)?
            .list_images(folder, credentials, recursive)
            .await
    }
}

#[async_trait]
impl ImageByteSource for CloudSources {
    async fn fetch(
        &self,
        image: &CandidateImage,
        url: &str,
        credentials: &Credentials,
    ) -> Result<Vec<u8>, SourceError> {
        self.source(image.provider)?.fetch(image, url, credentials).await
    }
}
