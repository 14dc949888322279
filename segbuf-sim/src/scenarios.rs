//! Pre-built simulation scenarios for common playback conditions.

use std::time::Duration;

use segbuf_core::SegbufConfig;

use crate::media_server::SyntheticMedia;
use crate::playback::{PlaybackPlan, ScheduledSeek};
use crate::simulation::SimulationConfig;

/// A simulation paired with the engine configuration it is meant to run with.
#[derive(Debug, Clone)]
pub struct Scenario {
    pub name: &'static str,
    pub simulation: SimulationConfig,
    pub segbuf: SegbufConfig,
}

/// Names accepted by [`Scenario::by_name`].
pub const SCENARIO_NAMES: [&str; 4] = ["steady", "flaky-network", "seek-heavy", "tight-budget"];

impl Scenario {
    /// Looks up a pre-built scenario.
    pub fn by_name(name: &str, seed: u64) -> Option<Self> {
        match name {
            "steady" => Some(Self::steady(seed)),
            "flaky-network" => Some(Self::flaky_network(seed)),
            "seek-heavy" => Some(Self::seek_heavy(seed)),
            "tight-budget" => Some(Self::tight_budget(seed)),
            _ => None,
        }
    }

    /// Fast, reliable network. Baseline for the other scenarios.
    pub fn steady(seed: u64) -> Self {
        Self {
            name: "steady",
            simulation: SimulationConfig {
                seed,
                media: short_media(),
                latency_ms: 1..5,
                ..Default::default()
            },
            segbuf: SegbufConfig::for_testing(),
        }
    }

    /// One request in ten fails; failed segments retry without limit.
    pub fn flaky_network(seed: u64) -> Self {
        let mut segbuf = SegbufConfig::for_testing();
        segbuf.retry.base_delay = Duration::from_millis(20);
        segbuf.retry.max_delay = Duration::from_millis(200);
        segbuf.retry.max_attempts = None;

        Self {
            name: "flaky-network",
            simulation: SimulationConfig {
                seed,
                media: short_media(),
                latency_ms: 2..10,
                failure_rate: 0.1,
                ..Default::default()
            },
            segbuf,
        }
    }

    /// Forward and backward jumps during playback.
    pub fn seek_heavy(seed: u64) -> Self {
        Self {
            name: "seek-heavy",
            simulation: SimulationConfig {
                seed,
                media: short_media(),
                latency_ms: 1..5,
                plan: PlaybackPlan {
                    seeks: vec![
                        ScheduledSeek { at: 4.0, to: 30.0 },
                        ScheduledSeek { at: 34.0, to: 10.0 },
                        ScheduledSeek { at: 14.0, to: 50.0 },
                    ],
                    ..Default::default()
                },
                ..Default::default()
            },
            segbuf: SegbufConfig::for_testing(),
        }
    }

    /// Byte ceilings that hold only a handful of segments per track.
    pub fn tight_budget(seed: u64) -> Self {
        let media = short_media();
        let mut segbuf = SegbufConfig::for_testing();
        segbuf.buffer.video_ceiling_bytes =
            (media.segment_bytes(segbuf_core::Track::Video, media.segment_secs) * 4) as u64;
        segbuf.buffer.audio_ceiling_bytes =
            (media.segment_bytes(segbuf_core::Track::Audio, media.segment_secs) * 4) as u64;

        Self {
            name: "tight-budget",
            simulation: SimulationConfig {
                seed,
                media,
                latency_ms: 1..5,
                ..Default::default()
            },
            segbuf,
        }
    }
}

/// One minute of low-bitrate media in two-second segments.
fn short_media() -> SyntheticMedia {
    SyntheticMedia {
        duration_secs: 60.0,
        segment_secs: 2.0,
        video_bitrate: 400_000,
        audio_bitrate: 64_000,
        init_segment_bytes: 512,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_name_resolves() {
        for name in SCENARIO_NAMES {
            let scenario = Scenario::by_name(name, 7).unwrap();
            assert_eq!(scenario.name, name);
            assert_eq!(scenario.simulation.seed, 7);
            assert!(scenario.segbuf.validate().is_ok());
        }
        assert!(Scenario::by_name("unknown", 7).is_none());
    }

    #[test]
    fn test_tight_budget_fits_init_and_three_segments() {
        let scenario = Scenario::tight_budget(1);
        // 2s of 400kbps video is 100_000 bytes
        assert_eq!(scenario.segbuf.buffer.video_ceiling_bytes, 400_000);
        assert_eq!(scenario.segbuf.buffer.audio_ceiling_bytes, 64_000);
    }
}
