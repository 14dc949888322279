//! Manifest and segment collaborators.
//!
//! Both contracts are single-attempt: no caching, no retry. Retrying a failed
//! segment is a session-level policy, see [`crate::session::prefetch::PrefetchGuard`].

pub mod http;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

pub use self::http::HttpMediaClient;
use crate::manifest::Manifest;
use crate::media::FileId;

/// Fetches the one-time segment manifest of a media file.
#[async_trait]
pub trait ManifestLoader: Send + Sync {
    /// Loads the manifest for `file_id` in a single attempt.
    ///
    /// # Errors
    ///
    /// - `ManifestFetchError::Transport` - Request could not be completed
    /// - `ManifestFetchError::Status` - Server answered with a non-success status
    /// - `ManifestFetchError::Malformed` - Body is not a manifest
    async fn load_manifest(&self, file_id: &FileId) -> Result<Manifest, ManifestFetchError>;
}

/// Fetches raw bytes of one segment by its filename key.
#[async_trait]
pub trait SegmentFetcher: Send + Sync {
    /// Fetches the segment `filename` of `file_id` in a single attempt.
    ///
    /// # Errors
    ///
    /// - `SegmentFetchError::Transport` - Request could not be completed
    /// - `SegmentFetchError::Status` - Server answered with a non-success status
    async fn fetch_segment(
        &self,
        file_id: &FileId,
        filename: &str,
    ) -> Result<Bytes, SegmentFetchError>;
}

/// Errors loading the manifest. Fatal to the session.
#[derive(Debug, Clone, Error)]
pub enum ManifestFetchError {
    #[error("Manifest request for {file_id} failed: {reason}")]
    Transport { file_id: FileId, reason: String },

    #[error("Manifest request for {file_id} returned HTTP {status}")]
    Status { file_id: FileId, status: u16 },

    #[error("Manifest for {file_id} is malformed: {reason}")]
    Malformed { file_id: FileId, reason: String },
}

/// Errors fetching one segment. Aborts only the current append chain.
#[derive(Debug, Clone, Error)]
pub enum SegmentFetchError {
    #[error("Segment request for {filename} failed: {reason}")]
    Transport { filename: String, reason: String },

    #[error("Segment request for {filename} returned HTTP {status}")]
    Status { filename: String, status: u16 },
}

impl SegmentFetchError {
    pub fn filename(&self) -> &str {
        match self {
            SegmentFetchError::Transport { filename, .. }
            | SegmentFetchError::Status { filename, .. } => filename,
        }
    }
}
