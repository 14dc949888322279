//! Full playback runs over the simulated network and headless decoder.

use segbuf_sim::{Scenario, run_simulation};

#[tokio::test]
async fn test_steady_playback_reaches_end_of_stream() {
    let scenario = Scenario::steady(42);
    let report = run_simulation(&scenario.simulation, scenario.segbuf)
        .await
        .unwrap();

    assert!(report.playback.reached_end);
    assert!(report.stream_ended);
    assert_eq!(report.playback.final_position, 60.0);
    assert_eq!(report.overlapping_submissions(), 0);

    // 30 segments plus one init segment per track, each fetched once
    assert_eq!(report.server.segment_requests, 62);
    assert_eq!(report.decode.video.appends, 31);
    assert_eq!(report.decode.audio.appends, 31);
}

#[tokio::test]
async fn test_same_seed_serves_same_bytes() {
    let first = Scenario::steady(9);
    let second = Scenario::steady(9);

    let first = run_simulation(&first.simulation, first.segbuf).await.unwrap();
    let second = run_simulation(&second.simulation, second.segbuf)
        .await
        .unwrap();

    assert_eq!(first.server, second.server);
    assert_eq!(first.decode.video.bytes_appended, second.decode.video.bytes_appended);
}

#[tokio::test]
async fn test_flaky_network_still_finishes() {
    let scenario = Scenario::flaky_network(3);
    let report = run_simulation(&scenario.simulation, scenario.segbuf)
        .await
        .unwrap();

    assert!(report.playback.reached_end);
    // Every successful fetch is appended exactly once
    assert_eq!(
        report.server.segment_requests - report.server.failed_requests,
        (report.decode.video.appends + report.decode.audio.appends) as usize
    );
    assert_eq!(report.overlapping_submissions(), 0);
}

#[tokio::test]
async fn test_tight_budget_never_exceeds_ceilings() {
    let scenario = Scenario::tight_budget(5);
    let ceilings = (
        scenario.segbuf.buffer.video_ceiling_bytes,
        scenario.segbuf.buffer.audio_ceiling_bytes,
    );
    let report = run_simulation(&scenario.simulation, scenario.segbuf)
        .await
        .unwrap();

    assert!(report.playback.reached_end);
    assert!(report.playback.peak_usage.video <= ceilings.0);
    assert!(report.playback.peak_usage.audio <= ceilings.1);
    assert!(report.decode.video.removes > 0);
}

#[tokio::test]
async fn test_seeks_flush_and_refill_without_overlap() {
    let scenario = Scenario::seek_heavy(11);
    let report = run_simulation(&scenario.simulation, scenario.segbuf)
        .await
        .unwrap();

    assert_eq!(report.playback.seeks_performed, 3);
    assert!(report.playback.reached_end);
    assert_eq!(report.playback.final_status.epoch, 3);
    assert_eq!(report.overlapping_submissions(), 0);
    // Every seek flushes each track once
    assert!(report.decode.video.removes >= 3);
    assert!(report.decode.audio.removes >= 3);
}
