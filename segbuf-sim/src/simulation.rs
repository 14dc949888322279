//! End-to-end simulated playback runs.

use std::ops::Range;
use std::sync::Arc;

use segbuf_core::session::Collaborators;
use segbuf_core::{CancelFlag, FileId, PlaybackError, SegbufConfig, TrackPair, open_session};
use serde::Serialize;
use thiserror::Error;

use crate::headless::{DecodeStats, HeadlessStream};
use crate::media_server::{ServerStats, SyntheticMedia, SyntheticMediaServer};
use crate::network::{NetworkConditions, NetworkSimulator};
use crate::playback::{PlaybackPlan, PlaybackReport, drive};

/// Everything that shapes one simulated playback run.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub seed: u64,
    pub media: SyntheticMedia,
    /// Per-request latency in milliseconds
    pub latency_ms: Range<u64>,
    /// Probability that a segment request fails
    pub failure_rate: f64,
    /// Network throughput in bytes per second (0 = unlimited)
    pub bandwidth_limit: u64,
    /// Decode throughput in bytes per second (0 = instant)
    pub decode_rate: u64,
    pub plan: PlaybackPlan,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            media: SyntheticMedia::default(),
            latency_ms: 1..5,
            failure_rate: 0.0,
            bandwidth_limit: 0,
            decode_rate: 50_000_000,
            plan: PlaybackPlan::default(),
        }
    }
}

/// Outcome of [`run_simulation`].
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub seed: u64,
    pub playback: PlaybackReport,
    pub server: ServerStats,
    pub decode: TrackPair<DecodeStats>,
    pub stream_ended: bool,
}

impl SimulationReport {
    /// Submissions rejected because the decode buffer was still updating.
    pub fn overlapping_submissions(&self) -> u64 {
        self.decode.video.overlapping_submissions + self.decode.audio.overlapping_submissions
    }
}

#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("Invalid simulation: {reason}")]
    InvalidConfig { reason: String },

    #[error("Playback failed: {0}")]
    Playback(#[from] PlaybackError),
}

/// Plays synthetic media through a full session over a simulated network.
///
/// # Errors
///
/// - `SimulationError::InvalidConfig` - Empty media, zero tick or non-positive speed
/// - `SimulationError::Playback` - Session failed to open or stopped mid-run
pub async fn run_simulation(
    config: &SimulationConfig,
    segbuf: SegbufConfig,
) -> Result<SimulationReport, SimulationError> {
    validate(config)?;

    let conditions = NetworkConditions {
        latency_ms: config.latency_ms.clone(),
        failure_rate: config.failure_rate,
        bandwidth: config.bandwidth_limit,
    };
    let network = NetworkSimulator::new(conditions, config.seed);
    let server = Arc::new(SyntheticMediaServer::new(
        config.media.clone(),
        Arc::new(network),
    ));
    let stream = Arc::new(HeadlessStream::new(config.decode_rate));

    let collaborators = Collaborators {
        loader: server.clone(),
        fetcher: server.clone(),
        stream: stream.clone(),
    };

    tracing::info!(
        seed = config.seed,
        duration = config.media.duration_secs,
        failure_rate = config.failure_rate,
        "Starting simulated playback"
    );

    let handle = open_session(
        segbuf,
        FileId::new(format!("sim-{}", config.seed)),
        collaborators,
        CancelFlag::new(),
    )
    .await?;
    let playback = drive(&handle, &config.plan).await;
    handle.shutdown().await?;
    let playback = playback?;

    tracing::info!(
        position = playback.final_position,
        stalled_ticks = playback.stalled_ticks,
        reached_end = playback.reached_end,
        "Simulated playback finished"
    );

    Ok(SimulationReport {
        seed: config.seed,
        playback,
        server: server.stats(),
        decode: stream.stats(),
        stream_ended: stream.is_ended(),
    })
}

fn validate(config: &SimulationConfig) -> Result<(), SimulationError> {
    let reason = if !(config.media.duration_secs > 0.0 && config.media.segment_secs > 0.0) {
        Some("media duration and segment length must be positive")
    } else if config.plan.tick.is_zero() {
        Some("tick must be non-zero")
    } else if !(config.plan.speed.is_finite() && config.plan.speed > 0.0) {
        Some("playback speed must be positive")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(SimulationError::InvalidConfig {
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_rejects_zero_tick() {
        let mut config = SimulationConfig::default();
        config.plan.tick = Duration::ZERO;

        let result = run_simulation(&config, SegbufConfig::for_testing()).await;
        assert!(matches!(result, Err(SimulationError::InvalidConfig { .. })));
    }

    #[tokio::test]
    async fn test_short_media_plays_to_the_end() {
        let config = SimulationConfig {
            media: SyntheticMedia {
                duration_secs: 10.0,
                video_bitrate: 80_000,
                audio_bitrate: 16_000,
                ..Default::default()
            },
            latency_ms: 0..2,
            ..Default::default()
        };

        let report = run_simulation(&config, SegbufConfig::for_testing())
            .await
            .unwrap();

        assert!(report.playback.reached_end);
        assert!(report.stream_ended);
        assert_eq!(report.playback.final_position, 10.0);
        assert_eq!(report.server.manifest_requests, 1);
        assert_eq!(report.overlapping_submissions(), 0);
    }
}
