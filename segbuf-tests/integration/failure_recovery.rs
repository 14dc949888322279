//! Degradation under manifest, segment and sink failures.

use std::sync::Arc;
use std::time::Duration;

use segbuf_core::session::test_mocks::{
    MockMediaSource, MockOutputStream, mock_collaborators, uniform_manifest,
};
use segbuf_core::{CancelFlag, FileId, PlaybackError, SegbufConfig, Track, open_session};

use crate::support::{open, open_with, wait_for_idle_chain, wait_for_indices};

fn fast_retry_config(max_attempts: Option<u32>) -> SegbufConfig {
    let mut config = SegbufConfig::for_testing();
    config.retry.base_delay = Duration::from_millis(200);
    config.retry.max_delay = Duration::from_secs(1);
    config.retry.max_attempts = max_attempts;
    config
}

#[tokio::test]
async fn test_manifest_failure_is_fatal() {
    let source = Arc::new(MockMediaSource::failing_manifest());
    let stream = Arc::new(MockOutputStream::new());

    let result = open_session(
        SegbufConfig::for_testing(),
        FileId::new("missing"),
        mock_collaborators(source.clone(), stream.clone()),
        CancelFlag::new(),
    )
    .await;

    let error = result.err().expect("manifest failure must fail the session");
    assert!(matches!(error, PlaybackError::Manifest(_)));
    assert!(error.is_fatal());
    assert_eq!(source.manifest_loads(), 1);
    assert_eq!(stream.created_buffers(), 0);
}

#[tokio::test]
async fn test_invalid_config_is_rejected_before_loading() {
    let source = Arc::new(MockMediaSource::new(uniform_manifest(4, 2.0)));
    let stream = Arc::new(MockOutputStream::new());
    let mut config = SegbufConfig::for_testing();
    config.prefetch.lazy_threshold_secs = 0.0;

    let result = open_session(
        config,
        FileId::new("movie"),
        mock_collaborators(source.clone(), stream),
        CancelFlag::new(),
    )
    .await;

    assert!(matches!(result, Err(PlaybackError::Configuration { .. })));
    assert_eq!(source.manifest_loads(), 0);
}

#[tokio::test]
async fn test_segment_failure_stalls_only_its_track() {
    let fixture = open(uniform_manifest(10, 2.0), fast_retry_config(None)).await;
    wait_for_indices(&fixture.handle, 3, 3).await;
    fixture.source.fail_next("video_0003.m4s", 1);

    fixture.handle.position_advanced(1.0).unwrap();
    let status = wait_for_indices(&fixture.handle, 3, 4).await;

    assert_eq!(status.tracks.video.frontier, 6.0);
    assert_eq!(status.tracks.audio.frontier, 8.0);
    assert!(fixture.handle.is_running());
}

#[tokio::test]
async fn test_failed_segment_is_retried_after_backoff() {
    let fixture = open(uniform_manifest(10, 2.0), fast_retry_config(None)).await;
    wait_for_indices(&fixture.handle, 3, 3).await;
    fixture.source.fail_next("video_0003.m4s", 1);

    fixture.handle.position_advanced(1.0).unwrap();
    wait_for_indices(&fixture.handle, 3, 4).await;

    // Still inside the backoff window
    fixture.handle.position_advanced(1.1).unwrap();
    wait_for_idle_chain(&fixture.handle).await;
    assert_eq!(fixture.source.fetches_of("video_0003.m4s"), 1);

    tokio::time::sleep(Duration::from_millis(250)).await;
    fixture.handle.position_advanced(1.2).unwrap();
    wait_for_indices(&fixture.handle, 4, 5).await;

    assert_eq!(fixture.source.fetches_of("video_0003.m4s"), 2);
}

#[tokio::test]
async fn test_exhausted_retries_stall_until_seek() {
    let fixture = open(uniform_manifest(10, 2.0), fast_retry_config(Some(1))).await;
    wait_for_indices(&fixture.handle, 3, 3).await;
    fixture.source.fail_next("video_0003.m4s", 5);

    fixture.handle.position_advanced(1.0).unwrap();
    wait_for_indices(&fixture.handle, 3, 4).await;

    for time in [1.5, 2.0, 2.5] {
        tokio::time::sleep(Duration::from_millis(60)).await;
        fixture.handle.position_advanced(time).unwrap();
        wait_for_idle_chain(&fixture.handle).await;
    }
    assert_eq!(fixture.source.fetches_of("video_0003.m4s"), 1);

    // A seek starts a fresh epoch with a clean retry history
    fixture.handle.seek(0.0).await.unwrap();
    wait_for_indices(&fixture.handle, 3, 3).await;
    assert!(fixture.handle.is_running());
}

#[tokio::test]
async fn test_append_failure_aborts_chain_without_advancing() {
    let fixture = open(uniform_manifest(10, 2.0), SegbufConfig::for_testing()).await;
    wait_for_indices(&fixture.handle, 3, 3).await;
    fixture
        .stream
        .decode_buffer(Track::Audio)
        .unwrap()
        .fail_next_appends(1);

    fixture.handle.position_advanced(1.0).unwrap();
    let status = wait_for_indices(&fixture.handle, 4, 3).await;

    assert_eq!(status.tracks.audio.usage, 4 * 1024);
    assert!(!fixture.stream.saw_overlapping_operation());
}

#[tokio::test]
async fn test_rejected_append_is_not_retried_after_backoff() {
    let fixture = open(uniform_manifest(10, 2.0), fast_retry_config(None)).await;
    wait_for_indices(&fixture.handle, 3, 3).await;
    fixture
        .stream
        .decode_buffer(Track::Audio)
        .unwrap()
        .fail_next_appends(1);

    fixture.handle.position_advanced(1.0).unwrap();
    wait_for_indices(&fixture.handle, 4, 3).await;

    // Well past the fetch backoff window
    tokio::time::sleep(Duration::from_millis(250)).await;
    fixture.handle.position_advanced(1.1).unwrap();
    let status = wait_for_idle_chain(&fixture.handle).await;

    assert_eq!(fixture.source.fetches_of("audio_0003.m4s"), 1);
    assert_eq!(status.tracks.audio.next_index, 3);

    // A seek clears the abandoned index
    fixture.handle.seek(0.0).await.unwrap();
    wait_for_indices(&fixture.handle, 3, 3).await;
    fixture.handle.position_advanced(1.0).unwrap();
    wait_for_indices(&fixture.handle, 4, 4).await;
    assert_eq!(fixture.source.fetches_of("audio_0003.m4s"), 2);
}

#[tokio::test]
async fn test_shutdown_discards_in_flight_fetch() {
    let source = MockMediaSource::new(uniform_manifest(10, 2.0)).gated();
    let fixture = open_with(source, SegbufConfig::for_testing()).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(fixture.source.fetch_log(), vec!["video_init.mp4"]);

    let handle = fixture.handle.clone();
    let shutdown = tokio::spawn(async move { handle.shutdown().await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    fixture.source.release_fetches(100);

    shutdown.await.unwrap().unwrap();
    assert!(fixture.cancel.is_cancelled());
    assert!(fixture.stream.journal().is_empty());
    assert!(matches!(
        fixture.handle.status().await,
        Err(PlaybackError::SessionShutdown)
    ));
}
