//! Seek target resolution and refill sizing.

use serde::Serialize;

use crate::config::SegbufConfig;
use crate::manifest::Manifest;
use crate::media::{Track, TrackPair};

/// Where both tracks restart after a seek and how much to refill.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SeekPlan {
    /// New playback position in seconds
    pub time: f64,
    /// First segment index each track refills from
    pub targets: TrackPair<usize>,
    /// Paired segments appended after the flush
    pub segment_count: usize,
}

impl SeekPlan {
    pub fn new(manifest: &Manifest, time: f64, config: &SegbufConfig) -> Self {
        let targets =
            TrackPair::from_fn(|track| seek_target_index(manifest.durations(track), time));

        let fallback = config.buffer.fallback_segment_duration;
        let shortest = Track::ALL
            .iter()
            .map(|&track| {
                manifest
                    .segment_duration(track, *targets.get(track))
                    .filter(|duration| *duration > 0.0)
                    .unwrap_or(fallback)
            })
            .fold(f64::INFINITY, f64::min);

        // Never plan past the end of the longer track
        let remaining = Track::ALL
            .iter()
            .map(|&track| manifest.segment_count(track).saturating_sub(*targets.get(track)))
            .max()
            .unwrap_or(0)
            .max(1);
        let wanted = refill_segment_count(config.prefetch.lazy_threshold_secs, shortest);

        Self {
            time,
            targets,
            segment_count: wanted.min(remaining),
        }
    }
}

/// Index to restart a track from so that `time` falls in the first refilled
/// segment or the one after it.
///
/// Walks the cumulative durations until they first reach `time` and returns
/// the index before that crossing. When `time` lies past the end, returns
/// the second-to-last index. Both results are clamped at 0.
pub fn seek_target_index(durations: &[f64], time: f64) -> usize {
    let mut elapsed = 0.0;
    for (index, duration) in durations.iter().enumerate() {
        elapsed += duration;
        if elapsed >= time {
            return index.saturating_sub(1);
        }
    }
    durations.len().saturating_sub(2)
}

/// Consecutive segments needed to cover `threshold` seconds.
///
/// Saturates at `usize::MAX` for vanishingly short segments; callers bound
/// the result by the segments the manifest has left.
pub fn refill_segment_count(threshold: f64, segment_duration: f64) -> usize {
    if segment_duration <= 0.0 || !segment_duration.is_finite() {
        return 1;
    }
    (threshold / segment_duration).ceil().max(1.0) as usize
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::manifest::SegmentDescriptor;

    proptest! {
        #[test]
        fn target_segment_or_next_contains_time(
            durations in prop::collection::vec(0.1f64..10.0, 2..50),
            fraction in 0.0f64..1.0,
        ) {
            let total: f64 = durations.iter().sum();
            let time = total * fraction;
            let index = seek_target_index(&durations, time);

            let start: f64 = durations[..index].iter().sum();
            let end: f64 = durations[..(index + 2).min(durations.len())].iter().sum();
            prop_assert!(index < durations.len());
            prop_assert!(start <= time);
            prop_assert!(time <= end);
        }
    }

    #[test]
    fn test_target_is_one_before_crossing() {
        let durations = [2.0, 2.0, 2.0, 2.0, 2.0];
        assert_eq!(seek_target_index(&durations, 5.5), 1);
        assert_eq!(seek_target_index(&durations, 0.0), 0);
        assert_eq!(seek_target_index(&durations, 2.0), 0);
        assert_eq!(seek_target_index(&durations, 4.1), 1);
        assert_eq!(seek_target_index(&durations, 9.9), 3);
    }

    #[test]
    fn test_target_past_end_defaults_to_second_last() {
        assert_eq!(seek_target_index(&[2.0, 2.0, 2.0], 60.0), 1);
        assert_eq!(seek_target_index(&[2.0], 60.0), 0);
        assert_eq!(seek_target_index(&[], 60.0), 0);
    }

    #[test]
    fn test_refill_count_covers_threshold() {
        assert_eq!(refill_segment_count(15.0, 2.0), 8);
        assert_eq!(refill_segment_count(15.0, 5.0), 3);
        assert_eq!(refill_segment_count(15.0, 0.0), 1);
    }

    #[test]
    fn test_plan_uses_shorter_track_duration() {
        let manifest = Manifest {
            segments_video: (0..10).map(|i| SegmentDescriptor::new(format!("v{i}"))).collect(),
            segments_audio: (0..10).map(|i| SegmentDescriptor::new(format!("a{i}"))).collect(),
            segment_durations_video: vec![4.0; 10],
            segment_durations_audio: vec![2.0; 10],
            ..Default::default()
        };
        let config = SegbufConfig::default();

        let plan = SeekPlan::new(&manifest, 9.0, &config);
        assert_eq!(plan.targets, TrackPair::new(1, 3));
        assert_eq!(plan.segment_count, 8);
    }

    #[test]
    fn test_plan_falls_back_without_durations() {
        let manifest = Manifest {
            segments_video: (0..10).map(|i| SegmentDescriptor::new(format!("v{i}"))).collect(),
            segments_audio: (0..10).map(|i| SegmentDescriptor::new(format!("a{i}"))).collect(),
            ..Default::default()
        };
        let config = SegbufConfig::default();

        let plan = SeekPlan::new(&manifest, 3.0, &config);
        assert_eq!(plan.targets, TrackPair::new(0, 0));
        // 15s threshold over the 2s fallback
        assert_eq!(plan.segment_count, 8);
    }

    #[test]
    fn test_plan_is_bounded_by_remaining_segments() {
        let manifest = Manifest {
            segments_video: (0..4).map(|i| SegmentDescriptor::new(format!("v{i}"))).collect(),
            segments_audio: (0..4).map(|i| SegmentDescriptor::new(format!("a{i}"))).collect(),
            segment_durations_video: vec![1e-300; 4],
            segment_durations_audio: vec![1e-300; 4],
            ..Default::default()
        };
        let config = SegbufConfig::default();

        assert_eq!(refill_segment_count(15.0, 1e-300), usize::MAX);
        let plan = SeekPlan::new(&manifest, 0.0, &config);
        assert_eq!(plan.targets, TrackPair::new(0, 0));
        assert_eq!(plan.segment_count, 4);

        // Past the end only the tail is left to refill
        let plan = SeekPlan::new(&manifest, 60.0, &config);
        assert_eq!(plan.targets, TrackPair::new(2, 2));
        assert_eq!(plan.segment_count, 2);
    }
}
