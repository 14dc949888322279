//! Shared fixtures for session integration tests.

use std::sync::Arc;
use std::time::Duration;

use segbuf_core::session::test_mocks::{MockMediaSource, MockOutputStream, mock_collaborators};
use segbuf_core::{
    CancelFlag, FileId, Manifest, PlaybackHandle, SegbufConfig, SessionStatus, open_session,
};

const WAIT_LIMIT: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(2);

pub struct Fixture {
    pub handle: PlaybackHandle,
    pub source: Arc<MockMediaSource>,
    pub stream: Arc<MockOutputStream>,
    pub cancel: CancelFlag,
}

/// Opens a session over `source` with a fresh mock stream.
pub async fn open_with(source: MockMediaSource, config: SegbufConfig) -> Fixture {
    let source = Arc::new(source);
    let stream = Arc::new(MockOutputStream::new());
    let cancel = CancelFlag::new();

    let handle = open_session(
        config,
        FileId::new("movie"),
        mock_collaborators(source.clone(), stream.clone()),
        cancel.clone(),
    )
    .await
    .expect("session should open");

    Fixture {
        handle,
        source,
        stream,
        cancel,
    }
}

pub async fn open(manifest: Manifest, config: SegbufConfig) -> Fixture {
    open_with(MockMediaSource::new(manifest), config).await
}

/// Polls the session status until `predicate` holds.
pub async fn wait_until(
    handle: &PlaybackHandle,
    mut predicate: impl FnMut(&SessionStatus) -> bool,
) -> SessionStatus {
    let poll = async {
        loop {
            let status = handle.status().await.expect("session should be running");
            if predicate(&status) {
                return status;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    };

    tokio::time::timeout(WAIT_LIMIT, poll)
        .await
        .expect("condition not reached in time")
}

/// Waits until no chain is running and both tracks reached `next_index`.
pub async fn wait_for_indices(handle: &PlaybackHandle, video: usize, audio: usize) -> SessionStatus {
    wait_until(handle, |status| {
        !status.chain_in_flight
            && status.tracks.video.next_index == video
            && status.tracks.audio.next_index == audio
    })
    .await
}

/// Waits until the running chain, if any, has finished.
pub async fn wait_for_idle_chain(handle: &PlaybackHandle) -> SessionStatus {
    wait_until(handle, |status| !status.chain_in_flight).await
}
