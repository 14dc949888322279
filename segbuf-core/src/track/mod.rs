//! Per-track buffer manager running as a sequential actor.
//!
//! Each track owns one worker task that executes its commands strictly in
//! FIFO order: fetch, evict, append and flush against that track's decode
//! buffer never overlap, while the video and audio workers progress
//! independently. Readers observe the worker's state through a published
//! [`TrackSnapshot`] and never mutate it.

pub mod actor;
pub mod commands;
pub mod handle;
pub mod worker;

use serde::Serialize;
use thiserror::Error;

pub use self::actor::spawn_track_worker;
pub use self::commands::{LoadOutcome, TrackCommand};
pub use self::handle::TrackHandle;
pub use self::worker::TrackWorker;
use crate::buffer::BufferedRange;
use crate::media::Track;
use crate::sink::BufferOperationError;
use crate::source::SegmentFetchError;

/// Read-only view of a track's buffer state, published after every change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackSnapshot {
    pub track: Track,
    /// End of the most recent range
    pub frontier: f64,
    /// Bytes retained across all ranges
    pub usage: u64,
    pub ceiling: u64,
    /// Index of the next segment not yet appended
    pub next_index: usize,
    pub total_segments: usize,
    /// Seek epoch the worker is serving
    pub epoch: u64,
    pub ranges: Vec<BufferedRange>,
}

impl TrackSnapshot {
    /// Whether every segment of the track has been appended.
    pub fn is_complete(&self) -> bool {
        self.next_index >= self.total_segments
    }

    /// Seconds buffered ahead of `current_time`.
    pub fn lead(&self, current_time: f64) -> f64 {
        self.frontier - current_time
    }
}

/// Errors that abort a track's current append chain.
#[derive(Debug, Clone, Error)]
pub enum TrackError {
    #[error("Segment fetch failed: {0}")]
    Fetch(#[from] SegmentFetchError),

    #[error("Decode buffer operation failed: {0}")]
    Buffer(#[from] BufferOperationError),

    #[error("{track} segment {filename} is {bytes} bytes, above the {ceiling} byte ceiling")]
    ExceedsCeiling {
        track: Track,
        filename: String,
        bytes: u64,
        ceiling: u64,
    },

    #[error("{track} worker has stopped")]
    WorkerStopped { track: Track },

    #[error("{track} load discarded after session teardown")]
    Cancelled { track: Track },
}

impl TrackError {
    /// Whether loading the same segment again can succeed on its own.
    ///
    /// Only fetch failures qualify. A segment the decode sink rejected or
    /// that can never fit the ceiling stays failed until the next seek.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TrackError::Fetch(_))
    }
}
