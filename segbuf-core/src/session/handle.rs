//! Handle for communicating with the playback session actor.

use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};

use super::commands::SessionCommand;
use super::core::SessionStatus;
use super::seek::SeekPlan;
use crate::PlaybackError;
use crate::manifest::Manifest;

/// Handle to a running playback session.
///
/// The playback element drives the session through this handle: it reports
/// position advances and seeks, and can query buffer state. The handle can
/// be cloned and shared across tasks.
#[derive(Clone)]
pub struct PlaybackHandle {
    sender: mpsc::Sender<SessionCommand>,
    manifest: Arc<Manifest>,
}

impl PlaybackHandle {
    pub fn new(sender: mpsc::Sender<SessionCommand>, manifest: Arc<Manifest>) -> Self {
        Self { sender, manifest }
    }

    /// Manifest the session was opened with.
    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Reports that playback advanced to `current_time`.
    ///
    /// Never waits. When the session's queue is full the notification is
    /// dropped; the next one re-evaluates from scratch.
    ///
    /// # Errors
    /// - `PlaybackError::SessionShutdown` - Session is no longer running
    pub fn position_advanced(&self, current_time: f64) -> Result<(), PlaybackError> {
        match self
            .sender
            .try_send(SessionCommand::PositionAdvanced { current_time })
        {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                tracing::trace!(current_time, "Session queue full, dropping position update");
                Ok(())
            }
            Err(TrySendError::Closed(_)) => Err(PlaybackError::SessionShutdown),
        }
    }

    /// Reports a discontinuous jump to `current_time`.
    ///
    /// Resolves once both tracks have been flushed; the refill continues in
    /// the background.
    ///
    /// # Errors
    /// - `PlaybackError::InvalidPosition` - Negative or non-finite position
    /// - `PlaybackError::Track` - A track worker stopped during the flush
    /// - `PlaybackError::SessionShutdown` - Session is no longer running
    pub async fn seek(&self, current_time: f64) -> Result<SeekPlan, PlaybackError> {
        if !current_time.is_finite() || current_time < 0.0 {
            return Err(PlaybackError::InvalidPosition {
                position: current_time,
            });
        }

        let (responder, rx) = oneshot::channel();
        self.sender
            .send(SessionCommand::Seek {
                current_time,
                responder,
            })
            .await
            .map_err(|_| PlaybackError::SessionShutdown)?;

        rx.await.map_err(|_| PlaybackError::SessionShutdown)?
    }

    /// Returns both tracks' buffer state and the session's progress.
    ///
    /// # Errors
    /// - `PlaybackError::SessionShutdown` - Session is no longer running
    pub async fn status(&self) -> Result<SessionStatus, PlaybackError> {
        let (responder, rx) = oneshot::channel();
        self.sender
            .send(SessionCommand::Status { responder })
            .await
            .map_err(|_| PlaybackError::SessionShutdown)?;

        rx.await.map_err(|_| PlaybackError::SessionShutdown)
    }

    /// Tears the session down. Loads still in flight are discarded.
    ///
    /// # Errors
    /// - `PlaybackError::SessionShutdown` - Session had already stopped
    pub async fn shutdown(&self) -> Result<(), PlaybackError> {
        let (responder, rx) = oneshot::channel();
        self.sender
            .send(SessionCommand::Shutdown { responder })
            .await
            .map_err(|_| PlaybackError::SessionShutdown)?;

        rx.await.map_err(|_| PlaybackError::SessionShutdown)
    }

    pub fn is_running(&self) -> bool {
        !self.sender.is_closed()
    }
}
