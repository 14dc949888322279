//! Handle for communicating with a track worker actor.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};

use super::commands::{LoadOutcome, TrackCommand};
use super::{TrackError, TrackSnapshot};
use crate::media::Track;
use crate::sink::DecodeBuffer;

/// Cloneable handle to one track's worker.
///
/// Commands sent through clones of the same handle are executed in the order
/// the worker receives them. Snapshot reads never block on the worker.
#[derive(Clone)]
pub struct TrackHandle {
    track: Track,
    sender: mpsc::Sender<TrackCommand>,
    snapshot: watch::Receiver<TrackSnapshot>,
    buffer: Arc<dyn DecodeBuffer>,
}

impl TrackHandle {
    pub fn new(
        track: Track,
        sender: mpsc::Sender<TrackCommand>,
        snapshot: watch::Receiver<TrackSnapshot>,
        buffer: Arc<dyn DecodeBuffer>,
    ) -> Self {
        Self {
            track,
            sender,
            snapshot,
            buffer,
        }
    }

    pub fn track(&self) -> Track {
        self.track
    }

    /// Queues the init segment load and waits for its outcome.
    ///
    /// # Errors
    /// - `TrackError::WorkerStopped` - Worker is no longer running
    /// - any error from the load itself
    pub async fn append_init(&self) -> Result<LoadOutcome, TrackError> {
        let (responder, rx) = oneshot::channel();
        self.send(TrackCommand::AppendInit { responder }).await?;
        rx.await.map_err(|_| self.stopped())?
    }

    /// Queues segment `index` for the given seek epoch and waits for its outcome.
    ///
    /// # Errors
    /// - `TrackError::WorkerStopped` - Worker is no longer running
    /// - any error from the load itself
    pub async fn append_segment(&self, index: usize, epoch: u64) -> Result<LoadOutcome, TrackError> {
        let (responder, rx) = oneshot::channel();
        self.send(TrackCommand::AppendSegment {
            index,
            epoch,
            responder,
        })
        .await?;
        rx.await.map_err(|_| self.stopped())?
    }

    /// Queues a flush and waits until the decode buffer is empty and the
    /// timeline restarted at `at`.
    ///
    /// # Errors
    /// - `TrackError::WorkerStopped` - Worker is no longer running
    pub async fn flush(&self, at: f64, next_index: usize, epoch: u64) -> Result<(), TrackError> {
        let (responder, rx) = oneshot::channel();
        self.send(TrackCommand::Flush {
            at,
            next_index,
            epoch,
            responder,
        })
        .await?;
        rx.await.map_err(|_| self.stopped())
    }

    /// Stops the worker once the commands queued before this one have run.
    pub async fn shutdown(&self) -> Result<(), TrackError> {
        let (responder, rx) = oneshot::channel();
        self.send(TrackCommand::Shutdown { responder }).await?;
        rx.await.map_err(|_| self.stopped())
    }

    /// Latest published buffer state.
    pub fn snapshot(&self) -> TrackSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Whether the decode buffer is mid-operation right now.
    pub fn is_updating(&self) -> bool {
        self.buffer.is_updating()
    }

    pub fn is_running(&self) -> bool {
        !self.sender.is_closed()
    }

    async fn send(&self, command: TrackCommand) -> Result<(), TrackError> {
        self.sender.send(command).await.map_err(|_| self.stopped())
    }

    fn stopped(&self) -> TrackError {
        TrackError::WorkerStopped { track: self.track }
    }
}
