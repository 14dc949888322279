//! Append chains: ordered load sequences spanning both track workers.

use tracing::{debug, warn};

use super::prefetch::FailedIndex;
use crate::cancel::CancelFlag;
use crate::media::{Track, TrackPair};
use crate::track::{LoadOutcome, TrackError, TrackHandle};

/// One load in a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainStep {
    Init(Track),
    Segment { track: Track, index: usize },
}

impl ChainStep {
    pub fn track(&self) -> Track {
        match *self {
            ChainStep::Init(track) => track,
            ChainStep::Segment { track, .. } => track,
        }
    }

    fn index(&self) -> Option<usize> {
        match *self {
            ChainStep::Init(_) => None,
            ChainStep::Segment { index, .. } => Some(index),
        }
    }
}

/// Why a chain was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainKind {
    InitialFill,
    Prefetch,
    Refill,
}

/// A load that aborted the rest of its track's steps in a chain.
#[derive(Debug, Clone)]
pub struct ChainFailure {
    pub track: Track,
    /// Segment index, or None for the init segment
    pub index: Option<usize>,
    pub error: TrackError,
}

/// What a finished chain did.
#[derive(Debug, Clone, Default)]
pub struct ChainReport {
    pub appended: usize,
    pub failures: Vec<ChainFailure>,
    /// A later seek superseded the chain before it finished
    pub superseded: bool,
    /// The session was torn down while the chain ran
    pub cancelled: bool,
}

impl ChainReport {
    /// Segment index each track failed at, for the retry policy.
    ///
    /// Fetch failures are retryable. Sink and ceiling failures abandon the
    /// index until the next seek.
    pub fn failed_indices(&self) -> TrackPair<Option<FailedIndex>> {
        let mut failed = TrackPair::default();
        for failure in &self.failures {
            if let Some(index) = failure.index {
                *failed.get_mut(failure.track) = Some(if failure.error.is_retryable() {
                    FailedIndex::Retryable(index)
                } else {
                    FailedIndex::Abandoned(index)
                });
            }
        }
        failed
    }
}

/// Bootstrap fill: both init segments, then the first `count` video
/// segments, then the first `count` audio segments.
pub fn initial_fill_steps(count: usize) -> Vec<ChainStep> {
    let mut steps = vec![ChainStep::Init(Track::Video), ChainStep::Init(Track::Audio)];
    for track in Track::ALL {
        steps.extend((0..count).map(|index| ChainStep::Segment { track, index }));
    }
    steps
}

/// Up to `count` (video, audio) pairs starting at `from`.
///
/// Indices at or past a track's entry in `totals` are left out, so the
/// shorter track simply drops out of the tail pairs.
pub fn paired_steps(
    from: TrackPair<usize>,
    count: usize,
    totals: TrackPair<usize>,
) -> Vec<ChainStep> {
    let span = Track::ALL
        .map(|track| totals.get(track).saturating_sub(*from.get(track)))
        .into_iter()
        .max()
        .unwrap_or(0);

    (0..count.min(span))
        .flat_map(|offset| {
            Track::ALL.into_iter().filter_map(move |track| {
                let index = from.get(track) + offset;
                (index < *totals.get(track)).then_some(ChainStep::Segment { track, index })
            })
        })
        .collect()
}

/// Runs `steps` in order, one load at a time.
///
/// A failed load aborts the remaining steps of its own track only. A stale
/// outcome ends the whole chain since every later step belongs to the same
/// superseded epoch.
pub async fn run_chain(
    tracks: &TrackPair<TrackHandle>,
    steps: Vec<ChainStep>,
    epoch: u64,
    cancel: &CancelFlag,
) -> ChainReport {
    let mut report = ChainReport::default();
    let mut aborted = TrackPair::new(false, false);

    for step in steps {
        let track = step.track();
        if *aborted.get(track) {
            continue;
        }
        if cancel.is_cancelled() {
            report.cancelled = true;
            break;
        }

        let handle = tracks.get(track);
        let result = match step {
            ChainStep::Init(_) => handle.append_init().await,
            ChainStep::Segment { index, .. } => handle.append_segment(index, epoch).await,
        };

        match result {
            Ok(LoadOutcome::Appended { .. }) => report.appended += 1,
            Ok(LoadOutcome::Stale) => {
                report.superseded = true;
                break;
            }
            Ok(LoadOutcome::Skipped | LoadOutcome::Duplicate) => {}
            Err(TrackError::Cancelled { .. } | TrackError::WorkerStopped { .. }) => {
                report.cancelled = true;
                break;
            }
            Err(error) => {
                warn!(%track, index = ?step.index(), %error, "Append chain aborted for track");
                *aborted.get_mut(track) = true;
                report.failures.push(ChainFailure {
                    track,
                    index: step.index(),
                    error,
                });
                if aborted.all(|aborted| *aborted) {
                    break;
                }
            }
        }
    }

    debug!(
        epoch,
        appended = report.appended,
        failures = report.failures.len(),
        superseded = report.superseded,
        "Append chain finished"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SegmentFetchError;

    #[test]
    fn test_initial_fill_order() {
        let steps = initial_fill_steps(2);
        assert_eq!(
            steps,
            vec![
                ChainStep::Init(Track::Video),
                ChainStep::Init(Track::Audio),
                ChainStep::Segment { track: Track::Video, index: 0 },
                ChainStep::Segment { track: Track::Video, index: 1 },
                ChainStep::Segment { track: Track::Audio, index: 0 },
                ChainStep::Segment { track: Track::Audio, index: 1 },
            ]
        );
    }

    #[test]
    fn test_paired_steps_interleave_video_first() {
        let steps = paired_steps(TrackPair::new(4, 6), 2, TrackPair::new(10, 10));
        assert_eq!(
            steps,
            vec![
                ChainStep::Segment { track: Track::Video, index: 4 },
                ChainStep::Segment { track: Track::Audio, index: 6 },
                ChainStep::Segment { track: Track::Video, index: 5 },
                ChainStep::Segment { track: Track::Audio, index: 7 },
            ]
        );
    }

    #[test]
    fn test_paired_steps_stop_at_manifest_end() {
        let steps = paired_steps(TrackPair::new(2, 3), usize::MAX, TrackPair::new(4, 4));
        assert_eq!(
            steps,
            vec![
                ChainStep::Segment { track: Track::Video, index: 2 },
                ChainStep::Segment { track: Track::Audio, index: 3 },
                ChainStep::Segment { track: Track::Video, index: 3 },
            ]
        );
        assert!(paired_steps(TrackPair::new(4, 4), 1, TrackPair::new(4, 4)).is_empty());
    }

    #[test]
    fn test_failed_indices_skip_init_failures() {
        let report = ChainReport {
            failures: vec![
                ChainFailure {
                    track: Track::Video,
                    index: None,
                    error: TrackError::WorkerStopped { track: Track::Video },
                },
                ChainFailure {
                    track: Track::Audio,
                    index: Some(3),
                    error: TrackError::WorkerStopped { track: Track::Audio },
                },
            ],
            ..Default::default()
        };
        assert_eq!(
            report.failed_indices(),
            TrackPair::new(None, Some(FailedIndex::Abandoned(3)))
        );
    }

    #[test]
    fn test_only_fetch_failures_are_retryable() {
        let report = ChainReport {
            failures: vec![
                ChainFailure {
                    track: Track::Video,
                    index: Some(5),
                    error: TrackError::Fetch(SegmentFetchError::Status {
                        filename: "video_0005.m4s".to_string(),
                        status: 503,
                    }),
                },
                ChainFailure {
                    track: Track::Audio,
                    index: Some(5),
                    error: TrackError::ExceedsCeiling {
                        track: Track::Audio,
                        filename: "audio_0005.m4s".to_string(),
                        bytes: 2048,
                        ceiling: 1024,
                    },
                },
            ],
            ..Default::default()
        };
        assert_eq!(
            report.failed_indices(),
            TrackPair::new(
                Some(FailedIndex::Retryable(5)),
                Some(FailedIndex::Abandoned(5))
            )
        );
    }
}
