//! Track buffer state: append-ordered ranges under a byte ceiling

use std::collections::VecDeque;

use tracing::debug;

use super::BufferedRange;
use crate::media::Track;

/// Oldest ranges that must be removed before an incoming append fits.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvictionPlan {
    pub ranges: Vec<BufferedRange>,
    pub freed_bytes: u64,
}

impl EvictionPlan {
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }
}

/// Range timeline of one track's decode buffer.
///
/// Ranges are kept oldest first. They never overlap, and consecutive ranges
/// share their boundary (`end[i] == start[i + 1]`); a flush resets the list
/// to a single zero-length marker at the new position. Mutated only through
/// [`append`](Self::append), [`evict`](Self::evict) and [`flush`](Self::flush).
#[derive(Debug, Clone)]
pub struct TrackBuffer {
    track: Track,
    ceiling: u64,
    ranges: VecDeque<BufferedRange>,
    usage: u64,
}

impl TrackBuffer {
    /// Creates an empty timeline with the given byte ceiling.
    pub fn new(track: Track, ceiling: u64) -> Self {
        Self {
            track,
            ceiling,
            ranges: VecDeque::new(),
            usage: 0,
        }
    }

    pub fn track(&self) -> Track {
        self.track
    }

    pub fn ceiling(&self) -> u64 {
        self.ceiling
    }

    /// Bytes currently retained across all ranges.
    pub fn usage(&self) -> u64 {
        self.usage
    }

    /// End timestamp of the most recent range, or 0 when nothing was appended.
    pub fn frontier(&self) -> f64 {
        self.ranges.back().map_or(0.0, |range| range.end)
    }

    pub fn ranges(&self) -> impl ExactSizeIterator<Item = &BufferedRange> {
        self.ranges.iter()
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Whether a payload could ever fit, even after evicting everything.
    pub fn fits(&self, incoming: u64) -> bool {
        incoming <= self.ceiling
    }

    /// Plans FIFO eviction so that retained usage plus `incoming` stays
    /// within the ceiling.
    ///
    /// The plan is not applied; the caller removes the spans from the decode
    /// buffer and then calls [`evict`](Self::evict) with the plan length.
    pub fn plan_eviction(&self, incoming: u64) -> EvictionPlan {
        let mut plan = EvictionPlan::default();
        let mut projected = self.usage;

        for range in &self.ranges {
            if projected.saturating_add(incoming) <= self.ceiling {
                break;
            }
            projected = projected.saturating_sub(range.bytes);
            plan.freed_bytes += range.bytes;
            plan.ranges.push(*range);
        }

        plan
    }

    /// Drops the `count` oldest ranges and returns them.
    ///
    /// Evicting every range leaves a marker at the old frontier so the next
    /// append continues the timeline.
    pub fn evict(&mut self, count: usize) -> Vec<BufferedRange> {
        let count = count.min(self.ranges.len());
        let evicted: Vec<BufferedRange> = self.ranges.drain(..count).collect();
        let freed: u64 = evicted.iter().map(|range| range.bytes).sum();
        self.usage = self.usage.saturating_sub(freed);

        if self.ranges.is_empty() {
            if let Some(last) = evicted.last() {
                self.ranges.push_back(BufferedRange::marker(last.end));
            }
        }

        if !evicted.is_empty() {
            debug!(
                track = %self.track,
                ranges = evicted.len(),
                freed,
                usage = self.usage,
                "Evicted oldest ranges"
            );
        }
        evicted
    }

    /// Records an appended payload as a new range starting at the frontier.
    pub fn append(&mut self, duration: f64, bytes: u64) -> BufferedRange {
        let start = self.frontier();
        let range = BufferedRange::new(start, start + duration, bytes);
        self.ranges.push_back(range);
        self.usage += bytes;
        range
    }

    /// Discards every range and restarts the timeline at `at`.
    pub fn flush(&mut self, at: f64) {
        self.ranges.clear();
        self.ranges.push_back(BufferedRange::marker(at));
        self.usage = 0;
    }

    /// Checks ordering and contiguity of the timeline.
    pub fn is_contiguous(&self) -> bool {
        self.ranges
            .iter()
            .zip(self.ranges.iter().skip(1))
            .all(|(prev, next)| prev.end == next.start && prev.start <= next.start)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_append_extends_frontier() {
        let mut buffer = TrackBuffer::new(Track::Video, 1_000);
        assert_eq!(buffer.frontier(), 0.0);

        let first = buffer.append(2.0, 100);
        let second = buffer.append(2.5, 50);

        assert_eq!(first, BufferedRange::new(0.0, 2.0, 100));
        assert_eq!(second, BufferedRange::new(2.0, 4.5, 50));
        assert_eq!(buffer.frontier(), 4.5);
        assert_eq!(buffer.usage(), 150);
        assert!(buffer.is_contiguous());
    }

    #[test]
    fn test_eviction_frees_until_incoming_fits() {
        // Ceiling 100, usage 90, incoming 30: must drop to at most 70 retained
        let mut buffer = TrackBuffer::new(Track::Audio, 100);
        buffer.append(2.0, 40);
        buffer.append(2.0, 30);
        buffer.append(2.0, 20);
        assert_eq!(buffer.usage(), 90);

        let plan = buffer.plan_eviction(30);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.freed_bytes, 40);
        assert_eq!(plan.ranges[0], BufferedRange::new(0.0, 2.0, 40));

        buffer.evict(plan.len());
        buffer.append(2.0, 30);
        assert_eq!(buffer.usage(), 80);
        assert!(buffer.usage() <= buffer.ceiling());
        assert!(buffer.is_contiguous());
    }

    #[test]
    fn test_no_eviction_when_under_ceiling() {
        let mut buffer = TrackBuffer::new(Track::Video, 100);
        buffer.append(2.0, 40);
        assert!(buffer.plan_eviction(60).is_empty());
        assert_eq!(buffer.plan_eviction(61).len(), 1);
    }

    #[test]
    fn test_flush_leaves_single_marker() {
        let mut buffer = TrackBuffer::new(Track::Video, 1_000);
        buffer.append(2.0, 100);
        buffer.append(2.0, 100);

        buffer.flush(33.0);

        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.usage(), 0);
        assert_eq!(buffer.frontier(), 33.0);

        let range = buffer.append(2.0, 10);
        assert_eq!(range.start, 33.0);
        assert!(buffer.is_contiguous());
    }

    #[test]
    fn test_evicting_everything_keeps_frontier() {
        let mut buffer = TrackBuffer::new(Track::Video, 100);
        buffer.append(2.0, 60);
        buffer.append(2.0, 30);

        let plan = buffer.plan_eviction(95);
        assert_eq!(plan.len(), 2);
        buffer.evict(plan.len());

        assert_eq!(buffer.usage(), 0);
        assert_eq!(buffer.frontier(), 4.0);
        assert_eq!(buffer.append(2.0, 95).start, 4.0);
        assert!(buffer.is_contiguous());
    }

    #[test]
    fn test_oversized_payload_does_not_fit() {
        let buffer = TrackBuffer::new(Track::Audio, 100);
        assert!(buffer.fits(100));
        assert!(!buffer.fits(101));
    }

    #[derive(Debug, Clone)]
    enum Step {
        Append { duration: f64, bytes: u64 },
        Flush { at: f64 },
    }

    fn step_strategy() -> impl Strategy<Value = Step> {
        prop_oneof![
            8 => (0.5f64..6.0, 1u64..400).prop_map(|(duration, bytes)| Step::Append { duration, bytes }),
            1 => (0.0f64..600.0).prop_map(|at| Step::Flush { at }),
        ]
    }

    proptest! {
        #[test]
        fn prop_ranges_stay_ordered_contiguous_and_under_ceiling(
            steps in prop::collection::vec(step_strategy(), 1..80)
        ) {
            let mut buffer = TrackBuffer::new(Track::Video, 1_000);

            for step in steps {
                match step {
                    Step::Append { duration, bytes } => {
                        let frontier = buffer.frontier();
                        let plan = buffer.plan_eviction(bytes);
                        buffer.evict(plan.len());
                        prop_assert_eq!(buffer.frontier(), frontier);
                        buffer.append(duration, bytes);
                        prop_assert!(buffer.usage() <= buffer.ceiling());
                    }
                    Step::Flush { at } => buffer.flush(at),
                }

                prop_assert!(buffer.is_contiguous());
                let summed: u64 = buffer.ranges().map(|r| r.bytes).sum();
                prop_assert_eq!(summed, buffer.usage());
            }
        }
    }
}
