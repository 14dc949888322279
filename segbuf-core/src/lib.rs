//! Segbuf Core - Segment buffering engine for adaptive playback
//!
//! This crate streams media stored as many small, independently fetchable
//! segments into a single-writer decode sink. It decides which segments to
//! fetch next, keeps two independently buffered tracks (video and audio)
//! under per-track byte ceilings, and recovers from seeks by flushing and
//! refilling both tracks around the new position.
//!
//! Manifest and segment transport, the output stream and its decode buffers
//! are external collaborators expressed as traits in [`source`] and [`sink`].

pub mod buffer;
pub mod cancel;
pub mod config;
pub mod manifest;
pub mod media;
pub mod session;
pub mod sink;
pub mod source;
pub mod track;
pub mod tracing_setup;

// Re-export main types for convenient access
pub use buffer::{BufferedRange, TrackBuffer};
pub use cancel::CancelFlag;
pub use config::SegbufConfig;
pub use manifest::{Manifest, SegmentDescriptor};
pub use media::{FileId, Track, TrackPair};
pub use session::{Collaborators, PlaybackHandle, SeekPlan, SessionStatus, open_session};
pub use sink::{BufferOperationError, DecodeBuffer, OutputStream};
pub use source::{ManifestFetchError, ManifestLoader, SegmentFetchError, SegmentFetcher};
pub use track::{TrackError, TrackSnapshot};

/// Errors that can bubble up from a playback session.
///
/// Only manifest failures are fatal; every other failure degrades into a
/// playback stall on the affected track.
#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestFetchError),

    #[error("Track error: {0}")]
    Track(#[from] TrackError),

    #[error("Output stream error: {0}")]
    Stream(#[from] BufferOperationError),

    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    #[error("Invalid playback position: {position}")]
    InvalidPosition { position: f64 },

    #[error("Session opening was cancelled")]
    Cancelled,

    #[error("Playback session has shut down")]
    SessionShutdown,
}

impl PlaybackError {
    /// Returns a user-friendly error message suitable for display.
    pub fn user_message(&self) -> String {
        match self {
            PlaybackError::Manifest(_) => "Failed to load manifest".to_string(),
            PlaybackError::Track(TrackError::Fetch(_)) => {
                "A media segment could not be downloaded".to_string()
            }
            PlaybackError::Track(_) => "Playback buffering error occurred".to_string(),
            PlaybackError::Stream(_) => "The media output rejected an operation".to_string(),
            PlaybackError::Configuration { reason } => format!("Invalid configuration: {reason}"),
            PlaybackError::InvalidPosition { position } => {
                format!("Cannot seek to position {position}")
            }
            PlaybackError::Cancelled => "Playback was cancelled".to_string(),
            PlaybackError::SessionShutdown => "Playback has stopped".to_string(),
        }
    }

    /// Checks if this error ends the session.
    ///
    /// Manifest and output-stream failures during bootstrap leave nothing to
    /// play; everything else is recovered by later prefetch attempts.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PlaybackError::Manifest(_)
                | PlaybackError::Stream(_)
                | PlaybackError::Cancelled
                | PlaybackError::SessionShutdown
        )
    }
}

pub type Result<T> = std::result::Result<T, PlaybackError>;
