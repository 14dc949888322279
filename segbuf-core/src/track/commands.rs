//! Command definitions for the track worker actor.

use tokio::sync::oneshot;

use super::TrackError;
use crate::buffer::BufferedRange;

/// Commands that can be sent to a track worker.
///
/// Each command carries a response channel; the worker answers after the
/// command has fully completed, so a caller awaiting the response observes
/// the same FIFO order the worker executes in.
pub enum TrackCommand {
    /// Fetch and append the track's init segment.
    AppendInit {
        responder: oneshot::Sender<Result<LoadOutcome, TrackError>>,
    },
    /// Fetch, evict as needed, and append one media segment.
    AppendSegment {
        index: usize,
        epoch: u64,
        responder: oneshot::Sender<Result<LoadOutcome, TrackError>>,
    },
    /// Remove everything from the decode buffer and restart the timeline.
    Flush {
        at: f64,
        next_index: usize,
        epoch: u64,
        responder: oneshot::Sender<()>,
    },
    /// Stop the worker after acknowledging.
    Shutdown { responder: oneshot::Sender<()> },
}

/// Result of a load command that did not fail.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoadOutcome {
    /// Payload appended and recorded as `range`.
    Appended {
        index: Option<usize>,
        range: BufferedRange,
    },
    /// Nothing to load: no init segment, or index past the last segment.
    Skipped,
    /// Index already appended in the current epoch.
    Duplicate,
    /// Requested for an epoch a later flush has superseded.
    Stale,
}

impl LoadOutcome {
    pub fn is_appended(&self) -> bool {
        matches!(self, LoadOutcome::Appended { .. })
    }
}
