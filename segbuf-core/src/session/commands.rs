//! Command definitions for the session actor.

use tokio::sync::oneshot;

use super::chain::{ChainKind, ChainReport};
use super::core::SessionStatus;
use super::seek::SeekPlan;
use crate::PlaybackError;

/// Commands processed by the session actor.
pub enum SessionCommand {
    /// Playback advanced to `current_time` without a discontinuity.
    PositionAdvanced { current_time: f64 },
    /// Playback jumped to `current_time`.
    Seek {
        current_time: f64,
        responder: oneshot::Sender<Result<SeekPlan, PlaybackError>>,
    },
    Status {
        responder: oneshot::Sender<SessionStatus>,
    },
    /// Internal: a spawned append chain has finished.
    ChainFinished {
        kind: ChainKind,
        epoch: u64,
        report: ChainReport,
    },
    Shutdown { responder: oneshot::Sender<()> },
}
