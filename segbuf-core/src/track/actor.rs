//! Actor loop for a track worker.

use tokio::sync::mpsc;

use super::commands::TrackCommand;
use super::handle::TrackHandle;
use super::worker::TrackWorker;

/// Spawns the worker as an actor and returns its handle.
///
/// The actor executes one command at a time, so a segment load, an eviction
/// and a flush of the same track can never interleave on its decode buffer.
pub fn spawn_track_worker(worker: TrackWorker, command_buffer: usize) -> TrackHandle {
    let (sender, receiver) = mpsc::channel(command_buffer.max(1));
    let handle = TrackHandle::new(
        worker.track(),
        sender,
        worker.subscribe(),
        worker.decode_buffer(),
    );

    tokio::spawn(async move {
        run_actor_loop(worker, receiver).await;
    });

    handle
}

/// Processes commands in arrival order until shutdown or until every
/// handle is dropped.
async fn run_actor_loop(mut worker: TrackWorker, mut receiver: mpsc::Receiver<TrackCommand>) {
    let track = worker.track();
    tracing::debug!(%track, "Track worker started");

    while let Some(command) = receiver.recv().await {
        if !handle_command(&mut worker, command).await {
            break;
        }
    }

    tracing::debug!(%track, "Track worker stopped");
}

/// Handles a single command. Returns false when the worker should stop.
async fn handle_command(worker: &mut TrackWorker, command: TrackCommand) -> bool {
    match command {
        TrackCommand::AppendInit { responder } => {
            let result = worker.append_init().await;
            let _ = responder.send(result);
        }

        TrackCommand::AppendSegment {
            index,
            epoch,
            responder,
        } => {
            let result = worker.append_segment(index, epoch).await;
            let _ = responder.send(result);
        }

        TrackCommand::Flush {
            at,
            next_index,
            epoch,
            responder,
        } => {
            worker.flush(at, next_index, epoch).await;
            let _ = responder.send(());
        }

        TrackCommand::Shutdown { responder } => {
            tracing::debug!(track = %worker.track(), "Track worker shutting down");
            let _ = responder.send(());
            return false;
        }
    }

    true
}
