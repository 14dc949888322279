//! Prefetch dedupe and failed-load backoff.

use std::time::Duration;

use tokio::time::Instant;

use crate::config::RetryConfig;
use crate::media::{Track, TrackPair};

/// Exponential backoff between re-requests of an index whose load failed.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    base_delay: Duration,
    max_delay: Duration,
    max_attempts: Option<u32>,
}

impl RetryPolicy {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            base_delay: config.base_delay,
            max_delay: config.max_delay,
            max_attempts: config.max_attempts,
        }
    }

    /// Delay after the `attempts`-th failure: `base * 2^(attempts - 1)`, capped.
    pub fn delay_for(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// Whether another attempt is allowed after `attempts` failures.
    pub fn allows(&self, attempts: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempts < max)
    }
}

/// Outcome of asking the guard whether a paired fetch may start.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PrefetchDecision {
    Permit,
    /// A chain is still running
    InFlight,
    /// This exact pair of next indices was already requested
    AlreadyRequested,
    /// A failed index is waiting out its retry delay
    BackingOff { until: Instant },
    /// A failed index used up its attempts or cannot be retried at all
    Exhausted { track: Track, index: usize },
}

/// Segment index a track's chain stopped at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailedIndex {
    /// The fetch failed; re-requested after a backoff
    Retryable(usize),
    /// The sink rejected the segment; not re-requested before a seek
    Abandoned(usize),
}

impl FailedIndex {
    pub fn index(self) -> usize {
        match self {
            FailedIndex::Retryable(index) | FailedIndex::Abandoned(index) => index,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct FailedLoad {
    index: usize,
    attempts: u32,
    retry_at: Instant,
    abandoned: bool,
    reported: bool,
}

/// Allows at most one paired fetch in flight per pair of next indices and
/// rate-limits re-requests of indices that failed.
#[derive(Debug)]
pub struct PrefetchGuard {
    policy: RetryPolicy,
    last_requested: Option<TrackPair<usize>>,
    in_flight: bool,
    failures: TrackPair<Option<FailedLoad>>,
}

impl PrefetchGuard {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            last_requested: None,
            in_flight: false,
            failures: TrackPair::default(),
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    /// Decides whether a paired fetch for `next` may start at `now`.
    pub fn check(&self, next: TrackPair<usize>, now: Instant) -> PrefetchDecision {
        if self.in_flight {
            return PrefetchDecision::InFlight;
        }

        let mut retry_due = false;
        for track in Track::ALL {
            let Some(failure) = self.failures.get(track) else {
                continue;
            };
            if failure.index != *next.get(track) {
                continue;
            }
            if failure.abandoned || !self.policy.allows(failure.attempts) {
                return PrefetchDecision::Exhausted {
                    track,
                    index: failure.index,
                };
            }
            if now < failure.retry_at {
                return PrefetchDecision::BackingOff {
                    until: failure.retry_at,
                };
            }
            retry_due = true;
        }

        if !retry_due && self.last_requested == Some(next) {
            return PrefetchDecision::AlreadyRequested;
        }
        PrefetchDecision::Permit
    }

    /// Records that a paired fetch for `next` has started.
    pub fn mark_requested(&mut self, next: TrackPair<usize>) {
        self.last_requested = Some(next);
        self.in_flight = true;
    }

    /// Records that a chain not tied to monitor indices has started.
    pub fn begin_chain(&mut self) {
        self.in_flight = true;
    }

    /// Records the end of the running chain and the index each track failed at.
    pub fn finish_chain(&mut self, failed: TrackPair<Option<FailedIndex>>, now: Instant) {
        self.in_flight = false;

        for track in Track::ALL {
            let failure = *failed.get(track);
            let slot = self.failures.get_mut(track);
            *slot = failure.map(|failure| {
                let index = failure.index();
                let attempts = match slot {
                    Some(previous) if previous.index == index => previous.attempts.saturating_add(1),
                    _ => 1,
                };
                FailedLoad {
                    index,
                    attempts,
                    retry_at: now + self.policy.delay_for(attempts),
                    abandoned: matches!(failure, FailedIndex::Abandoned(_)),
                    reported: false,
                }
            });
        }
    }

    /// Returns true the first time an exhausted failure is reported.
    pub fn take_exhausted_report(&mut self, track: Track) -> bool {
        match self.failures.get_mut(track) {
            Some(failure) if !failure.reported => {
                failure.reported = true;
                true
            }
            _ => false,
        }
    }

    /// Forgets requests and failures; used when a seek starts a new epoch.
    pub fn reset(&mut self) {
        self.last_requested = None;
        self.in_flight = false;
        self.failures = TrackPair::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_attempts: Option<u32>) -> RetryPolicy {
        RetryPolicy::new(&RetryConfig {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1_000),
            max_attempts,
        })
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = policy(None);
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(4), Duration::from_millis(800));
        assert_eq!(policy.delay_for(5), Duration::from_millis(1_000));
        assert_eq!(policy.delay_for(64), Duration::from_millis(1_000));
    }

    #[test]
    fn test_duplicate_trigger_is_deduped() {
        let mut guard = PrefetchGuard::new(policy(None));
        let now = Instant::now();
        let next = TrackPair::new(3, 3);

        assert_eq!(guard.check(next, now), PrefetchDecision::Permit);
        guard.mark_requested(next);
        assert_eq!(guard.check(next, now), PrefetchDecision::InFlight);

        guard.finish_chain(TrackPair::default(), now);
        assert_eq!(guard.check(next, now), PrefetchDecision::AlreadyRequested);
        assert_eq!(guard.check(TrackPair::new(4, 4), now), PrefetchDecision::Permit);
    }

    #[test]
    fn test_failed_index_backs_off_then_retries() {
        let mut guard = PrefetchGuard::new(policy(None));
        let now = Instant::now();
        let next = TrackPair::new(5, 2);

        guard.mark_requested(next);
        guard.finish_chain(TrackPair::new(Some(FailedIndex::Retryable(5)), None), now);

        assert_eq!(
            guard.check(next, now + Duration::from_millis(50)),
            PrefetchDecision::BackingOff {
                until: now + Duration::from_millis(100)
            }
        );
        assert_eq!(
            guard.check(next, now + Duration::from_millis(100)),
            PrefetchDecision::Permit
        );

        // Second consecutive failure of the same index doubles the delay
        guard.mark_requested(next);
        let later = now + Duration::from_millis(100);
        guard.finish_chain(TrackPair::new(Some(FailedIndex::Retryable(5)), None), later);
        assert!(matches!(
            guard.check(next, later + Duration::from_millis(150)),
            PrefetchDecision::BackingOff { .. }
        ));
        assert_eq!(
            guard.check(next, later + Duration::from_millis(200)),
            PrefetchDecision::Permit
        );
    }

    #[test]
    fn test_exhausted_after_max_attempts() {
        let mut guard = PrefetchGuard::new(policy(Some(2)));
        let now = Instant::now();
        let next = TrackPair::new(0, 7);

        guard.finish_chain(TrackPair::new(None, Some(FailedIndex::Retryable(7))), now);
        guard.finish_chain(TrackPair::new(None, Some(FailedIndex::Retryable(7))), now);

        assert_eq!(
            guard.check(next, now + Duration::from_secs(10)),
            PrefetchDecision::Exhausted {
                track: Track::Audio,
                index: 7
            }
        );
        assert!(guard.take_exhausted_report(Track::Audio));
        assert!(!guard.take_exhausted_report(Track::Audio));
    }

    #[test]
    fn test_abandoned_index_is_never_retried() {
        let mut guard = PrefetchGuard::new(policy(None));
        let now = Instant::now();
        let next = TrackPair::new(4, 3);

        guard.mark_requested(next);
        guard.finish_chain(TrackPair::new(None, Some(FailedIndex::Abandoned(3))), now);

        let expected = PrefetchDecision::Exhausted {
            track: Track::Audio,
            index: 3,
        };
        assert_eq!(guard.check(next, now), expected);
        assert_eq!(guard.check(next, now + Duration::from_secs(60)), expected);
        assert!(guard.take_exhausted_report(Track::Audio));
        assert!(!guard.take_exhausted_report(Track::Audio));

        // Once the track moves on, the abandoned index no longer matters
        assert_eq!(guard.check(TrackPair::new(4, 4), now), PrefetchDecision::Permit);
    }

    #[test]
    fn test_progress_past_failed_index_ignores_failure() {
        let mut guard = PrefetchGuard::new(policy(None));
        let now = Instant::now();
        guard.finish_chain(TrackPair::new(Some(FailedIndex::Retryable(1)), None), now);

        assert_eq!(guard.check(TrackPair::new(2, 2), now), PrefetchDecision::Permit);
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut guard = PrefetchGuard::new(policy(Some(1)));
        let now = Instant::now();
        let next = TrackPair::new(1, 1);
        guard.mark_requested(next);
        let failed = Some(FailedIndex::Retryable(1));
        guard.finish_chain(TrackPair::new(failed, failed), now);

        guard.reset();
        assert!(!guard.is_in_flight());
        assert_eq!(guard.check(next, now), PrefetchDecision::Permit);
    }
}
