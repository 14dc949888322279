//! Playback session: bootstrap, position monitor and seek handler.
//!
//! A session loads the manifest once, prepares the output stream, and then
//! runs as an actor that owns the prefetch guard and the seek epoch. It reacts
//! to position notifications by starting append chains against the two track
//! workers, and to seeks by flushing both tracks before refilling them around
//! the new position.

pub mod actor;
pub mod bootstrap;
pub mod chain;
pub mod commands;
pub mod core;
pub mod handle;
pub mod prefetch;
pub mod seek;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_mocks;

use std::sync::Arc;

use tracing::{error, info, warn};

pub use self::actor::spawn_session;
pub use self::bootstrap::SinkBootstrap;
pub use self::core::SessionStatus;
pub use self::handle::PlaybackHandle;
pub use self::seek::{SeekPlan, seek_target_index};
use crate::PlaybackError;
use crate::cancel::CancelFlag;
use crate::config::SegbufConfig;
use crate::media::{FileId, Track};
use crate::sink::OutputStream;
use crate::source::{ManifestLoader, SegmentFetcher};
use crate::track::{TrackWorker, spawn_track_worker};

/// External collaborators a session is wired to.
#[derive(Clone)]
pub struct Collaborators {
    pub loader: Arc<dyn ManifestLoader>,
    pub fetcher: Arc<dyn SegmentFetcher>,
    pub stream: Arc<dyn OutputStream>,
}

/// Opens a playback session for `file_id`.
///
/// Loads the manifest, creates both decode buffers once the stream is
/// ready, spawns the track workers and the session actor, and starts the
/// initial fill. Returns as soon as the fill has been started.
///
/// # Errors
///
/// - `PlaybackError::Configuration` - Config fails validation
/// - `PlaybackError::Manifest` - Manifest could not be loaded (fatal, not retried)
/// - `PlaybackError::Stream` - Output stream closed or refused a decode buffer
/// - `PlaybackError::Cancelled` - `cancel` was set while opening
pub async fn open_session(
    config: SegbufConfig,
    file_id: FileId,
    collaborators: Collaborators,
    cancel: CancelFlag,
) -> Result<PlaybackHandle, PlaybackError> {
    config.validate()?;
    info!(%file_id, "Opening playback session");

    let manifest = match collaborators.loader.load_manifest(&file_id).await {
        Ok(manifest) => manifest,
        Err(error) => {
            error!(%file_id, %error, "Manifest load failed");
            return Err(error.into());
        }
    };
    if cancel.is_cancelled() {
        return Err(PlaybackError::Cancelled);
    }

    for warning in manifest.consistency_warnings() {
        warn!(%file_id, %warning, "Manifest inconsistency");
    }
    let manifest = Arc::new(manifest);

    let mut bootstrap =
        SinkBootstrap::new(Arc::clone(&collaborators.stream), Arc::clone(&manifest));
    let buffers = bootstrap.prepare().await?;
    if cancel.is_cancelled() {
        return Err(PlaybackError::Cancelled);
    }

    let tracks = buffers.map(|track, buffer| {
        let worker = TrackWorker::new(
            track,
            file_id.clone(),
            Arc::clone(&manifest),
            Arc::clone(&collaborators.fetcher),
            buffer,
            &config.buffer,
            cancel.clone(),
        );
        spawn_track_worker(worker, config.prefetch.command_buffer)
    });

    info!(
        %file_id,
        video_segments = manifest.segment_count(Track::Video),
        audio_segments = manifest.segment_count(Track::Audio),
        duration = ?manifest.total_duration(),
        "Playback session opened"
    );

    Ok(spawn_session(
        config,
        manifest,
        collaborators.stream,
        tracks,
        cancel,
    ))
}
