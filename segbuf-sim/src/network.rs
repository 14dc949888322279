//! Seeded model of the link between the player and the segment server.

use std::ops::Range;
use std::time::Duration;

use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;

/// Link properties applied to every simulated request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkConditions {
    /// Per-request latency drawn uniformly from this range, in milliseconds
    pub latency_ms: Range<u64>,
    /// Probability in `[0, 1]` that a segment request fails
    pub failure_rate: f64,
    /// Throughput in bytes per second; 0 means unlimited
    pub bandwidth: u64,
}

impl Default for NetworkConditions {
    fn default() -> Self {
        Self {
            latency_ms: 1..5,
            failure_rate: 0.0,
            bandwidth: 0,
        }
    }
}

impl NetworkConditions {
    /// A link with no delay and no failures.
    pub fn instant() -> Self {
        Self {
            latency_ms: 0..0,
            ..Default::default()
        }
    }
}

/// Draws latencies and failures for requests from a seeded generator.
///
/// Requests issued in the same order against the same seed see the same
/// delays and the same failures.
pub struct NetworkSimulator {
    conditions: NetworkConditions,
    rng: Mutex<ChaCha8Rng>,
}

impl Default for NetworkSimulator {
    fn default() -> Self {
        Self::new(NetworkConditions::default(), 42)
    }
}

impl NetworkSimulator {
    pub fn new(mut conditions: NetworkConditions, seed: u64) -> Self {
        conditions.failure_rate = conditions.failure_rate.clamp(0.0, 1.0);
        Self {
            conditions,
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(seed)),
        }
    }

    pub fn conditions(&self) -> &NetworkConditions {
        &self.conditions
    }

    pub fn sample_latency(&self) -> Duration {
        let range = &self.conditions.latency_ms;
        let millis = if range.is_empty() {
            range.start
        } else {
            self.rng.lock().random_range(range.clone())
        };
        Duration::from_millis(millis)
    }

    /// Draws whether the request being served fails.
    pub fn should_fail(&self) -> bool {
        let rate = self.conditions.failure_rate;
        rate > 0.0 && self.rng.lock().random::<f64>() < rate
    }

    /// Time `bytes` spend on the wire at the configured bandwidth.
    pub fn transfer_time(&self, bytes: usize) -> Duration {
        match self.conditions.bandwidth {
            0 => Duration::ZERO,
            bandwidth => Duration::from_secs_f64(bytes as f64 / bandwidth as f64),
        }
    }

    /// Waits out one request: a latency sample plus the transfer time.
    pub async fn transfer(&self, bytes: usize) {
        let delay = self.sample_latency() + self.transfer_time(bytes);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_failure_rate(failure_rate: f64, seed: u64) -> NetworkSimulator {
        NetworkSimulator::new(
            NetworkConditions {
                failure_rate,
                ..Default::default()
            },
            seed,
        )
    }

    #[test]
    fn test_latency_is_drawn_from_range() {
        let network = NetworkSimulator::new(
            NetworkConditions {
                latency_ms: 10..20,
                ..Default::default()
            },
            1,
        );
        for _ in 0..100 {
            let latency = network.sample_latency().as_millis();
            assert!((10..20).contains(&latency));
        }
        assert_eq!(
            NetworkSimulator::new(NetworkConditions::instant(), 1).sample_latency(),
            Duration::ZERO
        );
    }

    #[test]
    fn test_failure_rate_bounds() {
        let never = with_failure_rate(0.0, 1);
        let always = with_failure_rate(4.0, 1);
        assert_eq!(always.conditions().failure_rate, 1.0);
        for _ in 0..100 {
            assert!(!never.should_fail());
            assert!(always.should_fail());
        }
    }

    #[test]
    fn test_seed_fixes_failure_sequence() {
        let draw = |seed| {
            let network = with_failure_rate(0.3, seed);
            (0..64).map(|_| network.should_fail()).collect::<Vec<_>>()
        };
        assert_eq!(draw(7), draw(7));
        assert_ne!(draw(7), draw(8));
    }

    #[test]
    fn test_transfer_time_follows_bandwidth() {
        let unlimited = NetworkSimulator::default();
        assert_eq!(unlimited.transfer_time(1_000_000), Duration::ZERO);

        let limited = NetworkSimulator::new(
            NetworkConditions {
                bandwidth: 2_000_000,
                ..Default::default()
            },
            1,
        );
        assert_eq!(limited.transfer_time(1_000_000), Duration::from_millis(500));
    }
}
