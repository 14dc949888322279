//! Actor implementation for the playback session.

use std::sync::Arc;

use tokio::sync::mpsc;

use super::commands::SessionCommand;
use super::core::PlaybackSession;
use super::handle::PlaybackHandle;
use crate::cancel::CancelFlag;
use crate::config::SegbufConfig;
use crate::manifest::Manifest;
use crate::media::TrackPair;
use crate::sink::OutputStream;
use crate::track::TrackHandle;

/// Spawns the session actor, starts the initial fill and returns its handle.
pub fn spawn_session(
    config: SegbufConfig,
    manifest: Arc<Manifest>,
    stream: Arc<dyn OutputStream>,
    tracks: TrackPair<TrackHandle>,
    cancel: CancelFlag,
) -> PlaybackHandle {
    let (sender, receiver) = mpsc::channel(config.prefetch.command_buffer.max(1));
    let (chain_sender, chain_receiver) = mpsc::unbounded_channel();

    let mut session = PlaybackSession::new(
        config,
        Arc::clone(&manifest),
        stream,
        tracks,
        cancel,
        chain_sender,
    );
    session.start_initial_fill();

    tokio::spawn(async move {
        run_actor_loop(session, receiver, chain_receiver).await;
    });

    PlaybackHandle::new(sender, manifest)
}

/// Processes commands one at a time until shutdown or until every handle
/// is dropped. Chain completions arrive on a separate internal channel.
async fn run_actor_loop(
    mut session: PlaybackSession,
    mut receiver: mpsc::Receiver<SessionCommand>,
    mut chain_receiver: mpsc::UnboundedReceiver<SessionCommand>,
) {
    tracing::debug!("Playback session actor started");

    loop {
        tokio::select! {
            command = receiver.recv() => {
                let Some(command) = command else {
                    tracing::debug!("All playback handles dropped");
                    break;
                };
                if !handle_command(&mut session, command).await {
                    break;
                }
            }
            Some(command) = chain_receiver.recv() => {
                if !handle_command(&mut session, command).await {
                    break;
                }
            }
        }
    }

    session.shutdown().await;
    tracing::debug!("Playback session actor stopped");
}

/// Handles a single command. Returns false when the actor should stop.
async fn handle_command(session: &mut PlaybackSession, command: SessionCommand) -> bool {
    match command {
        SessionCommand::PositionAdvanced { current_time } => {
            session.on_position_advanced(current_time);
        }

        SessionCommand::Seek {
            current_time,
            responder,
        } => {
            session.begin_seek(current_time, responder);
        }

        SessionCommand::Status { responder } => {
            let _ = responder.send(session.status());
        }

        SessionCommand::ChainFinished {
            kind,
            epoch,
            report,
        } => {
            session.on_chain_finished(kind, epoch, report);
        }

        SessionCommand::Shutdown { responder } => {
            session.shutdown().await;
            let _ = responder.send(());
            return false;
        }
    }

    true
}
