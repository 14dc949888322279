//! Playback clock that drives a session the way a media element would.

use std::time::Duration;

use segbuf_core::{PlaybackError, PlaybackHandle, SessionStatus, TrackPair};
use serde::Serialize;
use tokio::time::{Instant, MissedTickBehavior};

/// Position jump performed once playback reaches `at`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScheduledSeek {
    pub at: f64,
    pub to: f64,
}

/// How the simulated player advances.
#[derive(Debug, Clone)]
pub struct PlaybackPlan {
    /// Wall-clock interval between position notifications
    pub tick: Duration,
    /// Media seconds played per wall-clock second
    pub speed: f64,
    /// Performed in order, each once the position reaches its `at`
    pub seeks: Vec<ScheduledSeek>,
    /// Give up after this much wall-clock time
    pub max_wall_time: Duration,
}

impl Default for PlaybackPlan {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(10),
            speed: 20.0,
            seeks: Vec::new(),
            max_wall_time: Duration::from_secs(30),
        }
    }
}

/// What happened during a driven playback.
#[derive(Debug, Clone, Serialize)]
pub struct PlaybackReport {
    pub final_position: f64,
    pub ticks: u64,
    /// Ticks on which playback could not advance for lack of buffered media
    pub stalled_ticks: u64,
    pub seeks_performed: usize,
    pub reached_end: bool,
    pub timed_out: bool,
    pub peak_usage: TrackPair<u64>,
    pub final_status: SessionStatus,
}

/// Plays through the session until end of stream or the wall-clock limit.
///
/// Position only advances through buffered media: when the lead of either
/// track is exhausted the tick counts as a stall.
///
/// # Errors
///
/// - `PlaybackError::SessionShutdown` - Session stopped while playing
/// - `PlaybackError::Track` - A seek flush failed
pub async fn drive(
    handle: &PlaybackHandle,
    plan: &PlaybackPlan,
) -> Result<PlaybackReport, PlaybackError> {
    let started = Instant::now();
    let step = plan.tick.as_secs_f64() * plan.speed;

    let mut seeks = plan.seeks.iter().copied().peekable();

    let mut interval = tokio::time::interval(plan.tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut position = 0.0_f64;
    let mut ticks = 0;
    let mut stalled_ticks = 0;
    let mut seeks_performed = 0;
    let mut peak_usage = TrackPair::new(0, 0);
    let mut timed_out = false;

    let final_status = loop {
        interval.tick().await;
        ticks += 1;

        if let Some(seek) = seeks.next_if(|seek| seek.at <= position) {
            tracing::debug!(from = position, to = seek.to, "Simulated seek");
            handle.seek(seek.to).await?;
            position = seek.to;
            seeks_performed += 1;
            continue;
        }

        let status = handle.status().await?;
        peak_usage.video = peak_usage.video.max(status.tracks.video.usage);
        peak_usage.audio = peak_usage.audio.max(status.tracks.audio.usage);

        let frontier = status.tracks.video.frontier.min(status.tracks.audio.frontier);
        if status.ended && position >= frontier {
            break status;
        }
        if started.elapsed() >= plan.max_wall_time {
            timed_out = true;
            break status;
        }

        if position + step <= frontier {
            position += step;
        } else if position < frontier {
            position = frontier;
        } else {
            stalled_ticks += 1;
        }
        handle.position_advanced(position)?;
    };

    Ok(PlaybackReport {
        final_position: position,
        ticks,
        stalled_ticks,
        seeks_performed,
        reached_end: final_status.ended && !timed_out,
        timed_out,
        peak_usage,
        final_status,
    })
}
