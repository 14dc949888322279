//! Bootstrap, prefetch and end-of-stream behavior of a running session.

use std::time::Duration;

use segbuf_core::session::test_mocks::{MockMediaSource, SinkOperation, uniform_manifest};
use segbuf_core::{SegbufConfig, Track};

use crate::support::{open, open_with, wait_for_idle_chain, wait_for_indices};

#[tokio::test]
async fn test_initial_fill_appends_inits_then_video_batch_then_audio_batch() {
    let fixture = open(uniform_manifest(10, 2.0), SegbufConfig::for_testing()).await;
    wait_for_indices(&fixture.handle, 3, 3).await;

    assert_eq!(
        fixture.source.fetch_log(),
        vec![
            "video_init.mp4",
            "audio_init.mp4",
            "video_0000.m4s",
            "video_0001.m4s",
            "video_0002.m4s",
            "audio_0000.m4s",
            "audio_0001.m4s",
            "audio_0002.m4s",
        ]
    );

    let tracks: Vec<Track> = fixture
        .stream
        .journal()
        .into_iter()
        .map(|(track, _)| track)
        .collect();
    assert_eq!(
        tracks,
        vec![
            Track::Video,
            Track::Audio,
            Track::Video,
            Track::Video,
            Track::Video,
            Track::Audio,
            Track::Audio,
            Track::Audio,
        ]
    );
    assert_eq!(fixture.stream.created_buffers(), 2);
    assert_eq!(fixture.stream.duration(), Some(20.0));
    assert_eq!(fixture.source.manifest_loads(), 1);
}

#[tokio::test]
async fn test_low_lead_triggers_one_paired_fetch() {
    let fixture = open(uniform_manifest(10, 2.0), SegbufConfig::for_testing()).await;
    let status = wait_for_indices(&fixture.handle, 3, 3).await;
    assert_eq!(status.tracks.video.frontier, 6.0);

    // Lead 5.5s is below the 6s threshold
    fixture.handle.position_advanced(0.5).unwrap();
    let status = wait_for_indices(&fixture.handle, 4, 4).await;

    assert_eq!(status.tracks.video.frontier, 8.0);
    assert_eq!(status.tracks.audio.frontier, 8.0);
    let log = fixture.source.fetch_log();
    assert_eq!(log[log.len() - 2..], ["video_0003.m4s", "audio_0003.m4s"]);
}

#[tokio::test]
async fn test_sufficient_lead_does_not_prefetch() {
    let fixture = open(uniform_manifest(10, 2.0), SegbufConfig::for_testing()).await;
    wait_for_indices(&fixture.handle, 3, 3).await;
    let fetched = fixture.source.fetch_count();

    fixture.handle.position_advanced(-0.5).unwrap();
    let status = wait_for_idle_chain(&fixture.handle).await;

    assert_eq!(fixture.source.fetch_count(), fetched);
    assert_eq!(status.tracks.video.next_index, 3);
}

#[tokio::test]
async fn test_duplicate_triggers_issue_a_single_fetch() {
    let source = MockMediaSource::new(uniform_manifest(10, 2.0)).gated();
    let fixture = open_with(source, SegbufConfig::for_testing()).await;

    // Two init segments plus three segments per track
    fixture.source.release_fetches(8);
    wait_for_indices(&fixture.handle, 3, 3).await;

    fixture.handle.position_advanced(1.0).unwrap();
    fixture.handle.position_advanced(1.0).unwrap();
    fixture.handle.position_advanced(1.2).unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(fixture.source.fetches_of("video_0003.m4s"), 1);

    fixture.source.release_fetches(2);
    wait_for_indices(&fixture.handle, 4, 4).await;

    fixture.handle.position_advanced(1.2).unwrap();
    wait_for_idle_chain(&fixture.handle).await;
    assert_eq!(fixture.source.fetches_of("video_0003.m4s"), 1);
    assert_eq!(fixture.source.fetches_of("audio_0003.m4s"), 1);
}

#[tokio::test]
async fn test_end_of_stream_signalled_once_after_last_segment() {
    let fixture = open(uniform_manifest(3, 2.0), SegbufConfig::for_testing()).await;
    wait_for_indices(&fixture.handle, 3, 3).await;
    assert_eq!(fixture.stream.end_of_stream_calls(), 0);

    for time in [4.5, 5.0, 5.5, 5.9] {
        fixture.handle.position_advanced(time).unwrap();
    }
    let status = fixture.handle.status().await.unwrap();

    assert!(status.ended);
    assert_eq!(fixture.stream.end_of_stream_calls(), 1);
}

#[tokio::test]
async fn test_end_of_stream_waits_for_both_tracks() {
    let fixture = open(uniform_manifest(4, 2.0), SegbufConfig::for_testing()).await;
    wait_for_indices(&fixture.handle, 3, 3).await;

    fixture.handle.position_advanced(5.0).unwrap();
    let status = fixture.handle.status().await.unwrap();
    assert!(!status.ended);

    wait_for_indices(&fixture.handle, 4, 4).await;
    fixture.handle.position_advanced(7.0).unwrap();
    let status = fixture.handle.status().await.unwrap();
    assert!(status.ended);
    assert_eq!(fixture.stream.end_of_stream_calls(), 1);
}

#[tokio::test]
async fn test_usage_stays_under_ceiling_through_playback() {
    let mut config = SegbufConfig::for_testing();
    config.buffer.video_ceiling_bytes = 4 * 1024;
    config.buffer.audio_ceiling_bytes = 3 * 1024;
    let fixture = open(uniform_manifest(12, 2.0), config).await;

    let mut status = wait_for_indices(&fixture.handle, 3, 3).await;
    for _ in 0..30 {
        if status.tracks.all(|track| track.is_complete()) {
            break;
        }
        let time = status.tracks.video.frontier.min(status.tracks.audio.frontier) - 1.0;
        fixture.handle.position_advanced(time).unwrap();
        status = wait_for_idle_chain(&fixture.handle).await;

        for snapshot in [&status.tracks.video, &status.tracks.audio] {
            assert!(snapshot.usage <= snapshot.ceiling);
            assert!(
                snapshot
                    .ranges
                    .windows(2)
                    .all(|pair| pair[0].end == pair[1].start)
            );
        }
    }

    assert!(status.tracks.all(|track| track.is_complete()));
    let removes = fixture
        .stream
        .journal()
        .into_iter()
        .filter(|(_, op)| matches!(op, SinkOperation::Remove { .. }))
        .count();
    assert!(removes > 0);
    assert!(!fixture.stream.saw_overlapping_operation());
}
