//! Session state owned by the session actor.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use super::chain::{ChainKind, ChainReport, ChainStep, initial_fill_steps, paired_steps, run_chain};
use super::commands::SessionCommand;
use super::prefetch::{PrefetchDecision, PrefetchGuard, RetryPolicy};
use super::seek::SeekPlan;
use crate::PlaybackError;
use crate::cancel::CancelFlag;
use crate::config::SegbufConfig;
use crate::manifest::Manifest;
use crate::media::TrackPair;
use crate::sink::OutputStream;
use crate::track::{TrackHandle, TrackSnapshot};

/// Point-in-time view of a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStatus {
    pub tracks: TrackPair<TrackSnapshot>,
    /// End of stream has been signalled
    pub ended: bool,
    /// Seek epoch, incremented by every seek
    pub epoch: u64,
    pub duration: Option<f64>,
    pub chain_in_flight: bool,
}

/// Playback position monitor and seek handler state.
///
/// Only the session actor touches this struct. Track state is read through
/// snapshots and changed only by commands to the track workers.
pub struct PlaybackSession {
    config: SegbufConfig,
    manifest: Arc<Manifest>,
    stream: Arc<dyn OutputStream>,
    tracks: TrackPair<TrackHandle>,
    guard: PrefetchGuard,
    epoch: u64,
    ended: bool,
    stopped: bool,
    cancel: CancelFlag,
    notifier: mpsc::UnboundedSender<SessionCommand>,
}

impl PlaybackSession {
    pub fn new(
        config: SegbufConfig,
        manifest: Arc<Manifest>,
        stream: Arc<dyn OutputStream>,
        tracks: TrackPair<TrackHandle>,
        cancel: CancelFlag,
        notifier: mpsc::UnboundedSender<SessionCommand>,
    ) -> Self {
        let guard = PrefetchGuard::new(RetryPolicy::new(&config.retry));
        Self {
            config,
            manifest,
            stream,
            tracks,
            guard,
            epoch: 0,
            ended: false,
            stopped: false,
            cancel,
            notifier,
        }
    }

    /// Starts the bootstrap fill. The monitor stays idle until it finishes.
    pub fn start_initial_fill(&mut self) {
        self.guard.begin_chain();
        let steps = initial_fill_steps(self.config.prefetch.initial_segments);
        self.spawn_chain(ChainKind::InitialFill, steps);
    }

    /// Reacts to a position-advanced notification.
    ///
    /// Skips entirely while either decode buffer is mid-operation; the next
    /// notification re-evaluates.
    pub fn on_position_advanced(&mut self, current_time: f64) {
        if self.stopped || !current_time.is_finite() {
            return;
        }
        if self.tracks.any(|handle| handle.is_updating()) {
            trace!(current_time, "Decode buffer busy, skipping position check");
            return;
        }

        let snapshots = self.snapshots();
        if !snapshots.all(|snapshot| snapshot.epoch == self.epoch) {
            trace!(epoch = self.epoch, "Seek flush still pending, skipping position check");
            return;
        }

        if snapshots.all(|snapshot| snapshot.is_complete()) {
            self.signal_end_of_stream();
            return;
        }

        let threshold = self.config.prefetch.lazy_threshold_secs;
        if !snapshots.any(|snapshot| snapshot.lead(current_time) <= threshold) {
            return;
        }

        let next = snapshots.map(|_, snapshot| snapshot.next_index);
        match self.guard.check(next, Instant::now()) {
            PrefetchDecision::Permit => {
                debug!(
                    current_time,
                    video = next.video,
                    audio = next.audio,
                    "Lead below threshold, requesting paired fetch"
                );
                self.guard.mark_requested(next);
                let steps = paired_steps(next, 1, self.segment_totals());
                self.spawn_chain(ChainKind::Prefetch, steps);
            }
            PrefetchDecision::InFlight | PrefetchDecision::AlreadyRequested => {
                trace!(video = next.video, audio = next.audio, "Paired fetch already requested");
            }
            PrefetchDecision::BackingOff { until } => {
                trace!(
                    retry_in = ?until.saturating_duration_since(Instant::now()),
                    "Waiting before retrying failed segment"
                );
            }
            PrefetchDecision::Exhausted { track, index } => {
                if self.guard.take_exhausted_report(track) {
                    error!(%track, index, "Segment abandoned, track stalled until next seek");
                }
            }
        }
    }

    /// Flushes both tracks to the position of `time` and refills from there.
    ///
    /// Loads still queued for the previous position become stale. The
    /// responder is answered once both flushes have completed, before the
    /// first refill append.
    pub fn begin_seek(
        &mut self,
        time: f64,
        responder: oneshot::Sender<Result<SeekPlan, PlaybackError>>,
    ) {
        if self.stopped {
            let _ = responder.send(Err(PlaybackError::SessionShutdown));
            return;
        }

        self.epoch += 1;
        let epoch = self.epoch;
        let plan = SeekPlan::new(&self.manifest, time, &self.config);
        self.guard.reset();
        self.guard.begin_chain();

        info!(
            time,
            epoch,
            video = plan.targets.video,
            audio = plan.targets.audio,
            segments = plan.segment_count,
            "Seeking"
        );

        let totals = self.segment_totals();
        let tracks = self.tracks.clone();
        let cancel = self.cancel.clone();
        let notifier = self.notifier.clone();

        tokio::spawn(async move {
            let (video, audio) = tokio::join!(
                tracks.video.flush(time, plan.targets.video, epoch),
                tracks.audio.flush(time, plan.targets.audio, epoch),
            );

            let report = match video.and(audio) {
                Ok(()) => {
                    let _ = responder.send(Ok(plan));
                    let steps = paired_steps(plan.targets, plan.segment_count, totals);
                    run_chain(&tracks, steps, epoch, &cancel).await
                }
                Err(error) => {
                    let _ = responder.send(Err(error.into()));
                    ChainReport {
                        cancelled: true,
                        ..Default::default()
                    }
                }
            };

            let _ = notifier.send(SessionCommand::ChainFinished {
                kind: ChainKind::Refill,
                epoch,
                report,
            });
        });
    }

    /// Applies the result of a finished chain to the prefetch guard.
    pub fn on_chain_finished(&mut self, kind: ChainKind, epoch: u64, report: ChainReport) {
        if epoch != self.epoch {
            debug!(?kind, epoch, current = self.epoch, "Ignoring chain from superseded epoch");
            return;
        }

        if kind == ChainKind::InitialFill {
            info!(appended = report.appended, failures = report.failures.len(), "Initial fill finished");
        }
        self.guard.finish_chain(report.failed_indices(), Instant::now());
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            tracks: self.snapshots(),
            ended: self.ended,
            epoch: self.epoch,
            duration: self.manifest.total_duration(),
            chain_in_flight: self.guard.is_in_flight(),
        }
    }

    /// Cancels in-flight loads and stops both track workers. Idempotent.
    pub async fn shutdown(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.cancel.cancel();

        let (video, audio) = tokio::join!(self.tracks.video.shutdown(), self.tracks.audio.shutdown());
        for result in [video, audio] {
            if let Err(error) = result {
                debug!(%error, "Track worker already stopped");
            }
        }
        info!("Playback session shut down");
    }

    fn segment_totals(&self) -> TrackPair<usize> {
        TrackPair::from_fn(|track| self.manifest.segment_count(track))
    }

    fn snapshots(&self) -> TrackPair<TrackSnapshot> {
        self.tracks.as_ref().map(|_, handle| handle.snapshot())
    }

    fn signal_end_of_stream(&mut self) {
        if self.ended || !self.stream.is_open() {
            return;
        }
        self.ended = true;

        match self.stream.end_of_stream() {
            Ok(()) => info!("All segments appended, signalled end of stream"),
            Err(error) => warn!(%error, "Failed to signal end of stream"),
        }
    }

    fn spawn_chain(&self, kind: ChainKind, steps: Vec<ChainStep>) {
        let tracks = self.tracks.clone();
        let cancel = self.cancel.clone();
        let notifier = self.notifier.clone();
        let epoch = self.epoch;

        tokio::spawn(async move {
            let report = run_chain(&tracks, steps, epoch, &cancel).await;
            let _ = notifier.send(SessionCommand::ChainFinished {
                kind,
                epoch,
                report,
            });
        });
    }
}
