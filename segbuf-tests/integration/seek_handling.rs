//! Seek flush and refill ordering.

use std::time::Duration;

use futures::future::join_all;
use segbuf_core::session::test_mocks::{MockMediaSource, SinkOperation, uniform_manifest};
use segbuf_core::{BufferedRange, PlaybackError, SegbufConfig, Track, TrackPair};

use crate::support::{open, open_with, wait_for_indices};

#[tokio::test]
async fn test_seek_flushes_both_tracks_before_refill() {
    let fixture = open(uniform_manifest(20, 2.0), SegbufConfig::for_testing()).await;
    wait_for_indices(&fixture.handle, 3, 3).await;
    let before = fixture.stream.journal().len();

    let plan = fixture.handle.seek(21.0).await.unwrap();
    assert_eq!(plan.targets, TrackPair::new(9, 9));
    assert_eq!(plan.segment_count, 3);

    let status = wait_for_indices(&fixture.handle, 12, 12).await;
    let journal = fixture.stream.journal();
    let after_seek = &journal[before..];

    let flushes: Vec<Track> = after_seek[..2]
        .iter()
        .map(|(track, op)| {
            assert_eq!(*op, SinkOperation::Remove { start: 0.0, end: f64::INFINITY });
            *track
        })
        .collect();
    assert!(flushes.contains(&Track::Video) && flushes.contains(&Track::Audio));
    assert!(
        after_seek[2..]
            .iter()
            .all(|(_, op)| matches!(op, SinkOperation::Append { .. }))
    );
    assert_eq!(after_seek.len(), 2 + 6);

    assert_eq!(status.epoch, 1);
    assert_eq!(status.tracks.video.ranges[0], BufferedRange::marker(21.0));
    assert_eq!(status.tracks.video.frontier, 27.0);
}

#[tokio::test]
async fn test_refill_is_paired_from_target_indices() {
    let fixture = open(uniform_manifest(20, 2.0), SegbufConfig::for_testing()).await;
    wait_for_indices(&fixture.handle, 3, 3).await;
    let before = fixture.source.fetch_count();

    fixture.handle.seek(11.0).await.unwrap();
    wait_for_indices(&fixture.handle, 7, 7).await;

    assert_eq!(
        fixture.source.fetch_log()[before..],
        [
            "video_0004.m4s",
            "audio_0004.m4s",
            "video_0005.m4s",
            "audio_0005.m4s",
            "video_0006.m4s",
            "audio_0006.m4s",
        ]
    );
}

#[tokio::test]
async fn test_seek_during_initial_fill_drops_stale_loads() {
    let source = MockMediaSource::new(uniform_manifest(20, 2.0)).gated();
    let fixture = open_with(source, SegbufConfig::for_testing()).await;

    // Both init segments and the first video segment; video_0001 stays held
    fixture.source.release_fetches(3);
    tokio::time::sleep(Duration::from_millis(20)).await;

    let handle = fixture.handle.clone();
    let seek = tokio::spawn(async move { handle.seek(10.0).await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    fixture.source.release_fetches(100);

    let plan = seek.await.unwrap().unwrap();
    assert_eq!(plan.targets, TrackPair::new(3, 3));
    let status = wait_for_indices(&fixture.handle, 6, 6).await;

    assert_eq!(status.epoch, 1);
    assert_eq!(fixture.source.fetches_of("video_0002.m4s"), 0);
    assert_eq!(fixture.source.fetches_of("audio_0000.m4s"), 0);
    assert_eq!(status.tracks.audio.ranges[0], BufferedRange::marker(10.0));
    assert!(!fixture.stream.saw_overlapping_operation());
}

#[tokio::test]
async fn test_seek_backwards_resets_counters() {
    let fixture = open(uniform_manifest(10, 2.0), SegbufConfig::for_testing()).await;
    wait_for_indices(&fixture.handle, 3, 3).await;
    fixture.handle.position_advanced(1.0).unwrap();
    wait_for_indices(&fixture.handle, 4, 4).await;

    let plan = fixture.handle.seek(0.0).await.unwrap();
    assert_eq!(plan.targets, TrackPair::new(0, 0));

    let status = wait_for_indices(&fixture.handle, 3, 3).await;
    assert_eq!(status.epoch, 1);
    assert_eq!(status.tracks.video.frontier, 6.0);
}

#[tokio::test]
async fn test_seek_past_end_refills_tail() {
    let fixture = open(uniform_manifest(10, 2.0), SegbufConfig::for_testing()).await;
    wait_for_indices(&fixture.handle, 3, 3).await;

    let plan = fixture.handle.seek(500.0).await.unwrap();
    assert_eq!(plan.targets, TrackPair::new(8, 8));

    let status = wait_for_indices(&fixture.handle, 10, 10).await;
    assert!(status.tracks.all(|track| track.is_complete()));
}

#[tokio::test]
async fn test_invalid_seek_position_is_rejected() {
    let fixture = open(uniform_manifest(4, 2.0), SegbufConfig::for_testing()).await;

    for position in [-1.0, f64::NAN, f64::INFINITY] {
        let error = tokio_test::assert_err!(fixture.handle.seek(position).await);
        assert!(matches!(error, PlaybackError::InvalidPosition { .. }));
    }
    assert_eq!(fixture.handle.status().await.unwrap().epoch, 0);
}

#[tokio::test]
async fn test_rapid_seeks_settle_on_last_position() {
    let fixture = open(uniform_manifest(20, 2.0), SegbufConfig::for_testing()).await;
    wait_for_indices(&fixture.handle, 3, 3).await;

    let results = join_all([4.0, 20.0, 11.0].map(|time| fixture.handle.seek(time))).await;
    for result in results {
        tokio_test::assert_ok!(result);
    }

    let status = wait_for_indices(&fixture.handle, 8, 8).await;
    assert_eq!(status.epoch, 3);
    assert_eq!(status.tracks.video.ranges[0], BufferedRange::marker(11.0));
    assert_eq!(status.tracks.audio.frontier, 17.0);
    assert!(!fixture.stream.saw_overlapping_operation());
}

#[tokio::test]
async fn test_seek_over_vanishing_durations_refills_remaining_segments() {
    let fixture = open(uniform_manifest(4, 1e-300), SegbufConfig::for_testing()).await;
    wait_for_indices(&fixture.handle, 3, 3).await;

    let plan = fixture.handle.seek(0.0).await.unwrap();
    assert_eq!(plan.segment_count, 4);

    let status = wait_for_indices(&fixture.handle, 4, 4).await;
    assert_eq!(status.epoch, 1);
    assert!(status.tracks.all(|track| track.is_complete()));
    assert!(fixture.handle.is_running());
}
