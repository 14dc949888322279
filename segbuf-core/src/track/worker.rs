//! Track worker state and the append/evict/flush transitions it runs.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::{LoadOutcome, TrackError, TrackSnapshot};
use crate::buffer::TrackBuffer;
use crate::cancel::CancelFlag;
use crate::config::BufferConfig;
use crate::manifest::Manifest;
use crate::media::{FileId, Track};
use crate::sink::{DecodeBuffer, append_when_idle, remove_when_idle};
use crate::source::SegmentFetcher;

/// Owns one track's decode buffer handle, range timeline and next-index counter.
///
/// Every method takes `&mut self` and is driven by the worker's command loop,
/// so fetch, eviction, append and flush of one track are strictly sequential.
pub struct TrackWorker {
    track: Track,
    file_id: FileId,
    manifest: Arc<Manifest>,
    fetcher: Arc<dyn SegmentFetcher>,
    buffer: Arc<dyn DecodeBuffer>,
    timeline: TrackBuffer,
    fallback_duration: f64,
    next_index: usize,
    epoch: u64,
    cancel: CancelFlag,
    snapshot: watch::Sender<TrackSnapshot>,
}

impl TrackWorker {
    /// Creates a worker with an empty timeline at epoch 0.
    pub fn new(
        track: Track,
        file_id: FileId,
        manifest: Arc<Manifest>,
        fetcher: Arc<dyn SegmentFetcher>,
        buffer: Arc<dyn DecodeBuffer>,
        config: &BufferConfig,
        cancel: CancelFlag,
    ) -> Self {
        let timeline = TrackBuffer::new(track, config.ceiling(track));
        let initial = TrackSnapshot {
            track,
            frontier: timeline.frontier(),
            usage: 0,
            ceiling: timeline.ceiling(),
            next_index: 0,
            total_segments: manifest.segment_count(track),
            epoch: 0,
            ranges: Vec::new(),
        };
        let (snapshot, _) = watch::channel(initial);

        Self {
            track,
            file_id,
            manifest,
            fetcher,
            buffer,
            timeline,
            fallback_duration: config.fallback_segment_duration,
            next_index: 0,
            epoch: 0,
            cancel,
            snapshot,
        }
    }

    pub fn track(&self) -> Track {
        self.track
    }

    /// Subscribes to the snapshots published after every transition.
    pub fn subscribe(&self) -> watch::Receiver<TrackSnapshot> {
        self.snapshot.subscribe()
    }

    pub fn decode_buffer(&self) -> Arc<dyn DecodeBuffer> {
        Arc::clone(&self.buffer)
    }

    /// Fetches and appends the init segment as a zero-length range.
    ///
    /// # Errors
    ///
    /// - `TrackError::Fetch` - Init segment could not be fetched
    /// - `TrackError::Buffer` - Decode buffer rejected or failed the append
    /// - `TrackError::ExceedsCeiling` - Payload larger than the whole ceiling
    /// - `TrackError::Cancelled` - Session torn down during the fetch
    pub async fn append_init(&mut self) -> Result<LoadOutcome, TrackError> {
        let Some(init) = self.manifest.init_segment(self.track).cloned() else {
            debug!(track = %self.track, "Manifest has no init segment");
            return Ok(LoadOutcome::Skipped);
        };

        self.fetch_and_append(&init.filename, None, 0.0).await
    }

    /// Fetches segment `index`, evicts as needed, appends it and advances
    /// the next-index counter.
    ///
    /// Loads from a superseded epoch, already appended indices and indices
    /// past the last segment are answered without touching the decode buffer.
    ///
    /// # Errors
    ///
    /// - `TrackError::Fetch` - Segment could not be fetched
    /// - `TrackError::Buffer` - Decode buffer rejected or failed the append
    /// - `TrackError::ExceedsCeiling` - Payload larger than the whole ceiling
    /// - `TrackError::Cancelled` - Session torn down during the fetch
    pub async fn append_segment(
        &mut self,
        index: usize,
        epoch: u64,
    ) -> Result<LoadOutcome, TrackError> {
        if epoch != self.epoch {
            debug!(track = %self.track, index, epoch, current = self.epoch, "Dropping stale load");
            return Ok(LoadOutcome::Stale);
        }
        if index < self.next_index {
            return Ok(LoadOutcome::Duplicate);
        }
        let Some(segment) = self.manifest.segment(self.track, index).cloned() else {
            return Ok(LoadOutcome::Skipped);
        };

        let duration = self.segment_duration(index);
        self.fetch_and_append(&segment.filename, Some(index), duration)
            .await
    }

    /// Removes everything from the decode buffer and restarts the timeline
    /// at `at` with `next_index` as the next segment to load.
    ///
    /// A failed removal is logged and does not stop the reset.
    pub async fn flush(&mut self, at: f64, next_index: usize, epoch: u64) {
        if let Err(error) = remove_when_idle(self.buffer.as_ref(), 0.0, f64::INFINITY).await {
            warn!(track = %self.track, %error, "Flush remove failed");
        }

        self.timeline.flush(at);
        self.epoch = epoch;
        self.next_index = next_index.min(self.total_segments());
        self.publish();

        info!(
            track = %self.track,
            at,
            next_index = self.next_index,
            epoch,
            "Flushed decode buffer"
        );
    }

    async fn fetch_and_append(
        &mut self,
        filename: &str,
        index: Option<usize>,
        duration: f64,
    ) -> Result<LoadOutcome, TrackError> {
        let data: Bytes = self.fetcher.fetch_segment(&self.file_id, filename).await?;

        // The fetch may have outlived the session
        if self.cancel.is_cancelled() {
            return Err(TrackError::Cancelled { track: self.track });
        }

        let bytes = data.len() as u64;
        if !self.timeline.fits(bytes) {
            return Err(TrackError::ExceedsCeiling {
                track: self.track,
                filename: filename.to_string(),
                bytes,
                ceiling: self.timeline.ceiling(),
            });
        }

        self.evict_for(bytes).await;
        append_when_idle(self.buffer.as_ref(), data).await?;

        let range = self.timeline.append(duration, bytes);
        if let Some(index) = index {
            self.advance(index);
        }
        self.publish();

        debug!(
            track = %self.track,
            filename,
            start = range.start,
            end = range.end,
            bytes,
            usage = self.timeline.usage(),
            "Appended segment"
        );

        Ok(LoadOutcome::Appended { index, range })
    }

    /// Removes the oldest ranges until `incoming` fits under the ceiling.
    async fn evict_for(&mut self, incoming: u64) {
        let plan = self.timeline.plan_eviction(incoming);
        if plan.is_empty() {
            return;
        }

        debug!(
            track = %self.track,
            ranges = plan.len(),
            freed = plan.freed_bytes,
            usage = self.timeline.usage(),
            incoming,
            ceiling = self.timeline.ceiling(),
            "Evicting to stay within ceiling"
        );

        // Zero-length ranges (init segments, flush markers) have no span to remove
        for range in plan.ranges.iter().filter(|range| range.has_span()) {
            if let Err(error) =
                remove_when_idle(self.buffer.as_ref(), range.start, range.end).await
            {
                warn!(
                    track = %self.track,
                    start = range.start,
                    end = range.end,
                    %error,
                    "Eviction remove failed, usage accounting may drift"
                );
            }
        }

        self.timeline.evict(plan.len());
    }

    fn advance(&mut self, index: usize) {
        self.next_index = self.next_index.max(index + 1).min(self.total_segments());
    }

    fn segment_duration(&self, index: usize) -> f64 {
        match self.manifest.segment_duration(self.track, index) {
            Some(duration) => duration,
            None => {
                warn!(
                    track = %self.track,
                    index,
                    fallback = self.fallback_duration,
                    "Manifest has no duration for segment, using fallback"
                );
                self.fallback_duration
            }
        }
    }

    fn total_segments(&self) -> usize {
        self.manifest.segment_count(self.track)
    }

    fn publish(&self) {
        self.snapshot.send_replace(self.snapshot_state());
    }

    fn snapshot_state(&self) -> TrackSnapshot {
        TrackSnapshot {
            track: self.track,
            frontier: self.timeline.frontier(),
            usage: self.timeline.usage(),
            ceiling: self.timeline.ceiling(),
            next_index: self.next_index,
            total_segments: self.total_segments(),
            epoch: self.epoch,
            ranges: self.timeline.ranges().copied().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::test_mocks::{
        MockMediaSource, MockOutputStream, SinkOperation, uniform_manifest,
    };
    use crate::sink::OutputStream;

    struct WorkerFixture {
        worker: TrackWorker,
        stream: MockOutputStream,
        source: Arc<MockMediaSource>,
    }

    fn fixture(track: Track, ceiling: u64, segment_bytes: usize) -> WorkerFixture {
        let manifest = Arc::new(uniform_manifest(10, 2.0));
        let source =
            Arc::new(MockMediaSource::new((*manifest).clone()).with_segment_size(segment_bytes));
        let stream = MockOutputStream::new();
        let buffer = stream
            .add_decode_buffer(track, &manifest.mime_type(track))
            .unwrap();
        let config = BufferConfig {
            video_ceiling_bytes: ceiling,
            audio_ceiling_bytes: ceiling,
            fallback_segment_duration: 2.0,
        };

        let worker = TrackWorker::new(
            track,
            FileId::new("test"),
            manifest,
            source.clone(),
            buffer,
            &config,
            CancelFlag::new(),
        );

        WorkerFixture {
            worker,
            stream,
            source,
        }
    }

    #[tokio::test]
    async fn test_append_segment_records_range_and_advances() {
        let mut fx = fixture(Track::Video, 1_000, 100);

        let outcome = fx.worker.append_segment(0, 0).await.unwrap();
        assert!(outcome.is_appended());

        let snapshot = fx.worker.subscribe().borrow().clone();
        assert_eq!(snapshot.next_index, 1);
        assert_eq!(snapshot.frontier, 2.0);
        assert_eq!(snapshot.usage, 100);
    }

    #[tokio::test]
    async fn test_duplicate_and_stale_loads_are_ignored() {
        let mut fx = fixture(Track::Audio, 1_000, 100);
        fx.worker.append_segment(0, 0).await.unwrap();

        assert_eq!(fx.worker.append_segment(0, 0).await.unwrap(), LoadOutcome::Duplicate);
        assert_eq!(fx.worker.append_segment(1, 7).await.unwrap(), LoadOutcome::Stale);
        assert_eq!(fx.worker.append_segment(99, 0).await.unwrap(), LoadOutcome::Skipped);
        assert_eq!(fx.source.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_eviction_removes_oldest_before_append() {
        // Ceiling 100 with 30-byte segments: the fourth append evicts the first
        let mut fx = fixture(Track::Video, 100, 30);
        for index in 0..4 {
            fx.worker.append_segment(index, 0).await.unwrap();
        }

        let snapshot = fx.worker.subscribe().borrow().clone();
        assert_eq!(snapshot.usage, 90);
        assert_eq!(snapshot.ranges.len(), 3);
        assert_eq!(snapshot.ranges[0].start, 2.0);

        let ops = fx.stream.decode_buffer(Track::Video).unwrap().operations();
        assert_eq!(
            ops[3..],
            [
                SinkOperation::Remove { start: 0.0, end: 2.0 },
                SinkOperation::Append { bytes: 30 },
            ]
        );
    }

    #[tokio::test]
    async fn test_eviction_remove_failure_is_not_fatal() {
        let mut fx = fixture(Track::Video, 100, 60);
        fx.worker.append_segment(0, 0).await.unwrap();
        fx.stream.decode_buffer(Track::Video).unwrap().fail_next_removes(1);

        let outcome = fx.worker.append_segment(1, 0).await.unwrap();
        assert!(outcome.is_appended());
        assert_eq!(fx.worker.subscribe().borrow().usage, 60);
    }

    #[tokio::test]
    async fn test_oversized_segment_is_rejected() {
        let mut fx = fixture(Track::Audio, 50, 80);
        let result = fx.worker.append_segment(0, 0).await;
        assert!(matches!(result, Err(TrackError::ExceedsCeiling { bytes: 80, .. })));
        assert_eq!(fx.worker.subscribe().borrow().next_index, 0);
    }

    #[tokio::test]
    async fn test_fetch_failure_leaves_state_untouched() {
        let mut fx = fixture(Track::Video, 1_000, 100);
        fx.source.fail_next("video_0000.m4s", 1);

        let result = fx.worker.append_segment(0, 0).await;
        assert!(matches!(result, Err(TrackError::Fetch(_))));

        let snapshot = fx.worker.subscribe().borrow().clone();
        assert_eq!(snapshot.next_index, 0);
        assert!(snapshot.ranges.is_empty());
        assert!(fx.stream.decode_buffer(Track::Video).unwrap().operations().is_empty());
    }

    #[tokio::test]
    async fn test_flush_resets_timeline_counter_and_epoch() {
        let mut fx = fixture(Track::Video, 1_000, 100);
        for index in 0..3 {
            fx.worker.append_segment(index, 0).await.unwrap();
        }

        fx.worker.flush(11.0, 4, 1).await;

        let snapshot = fx.worker.subscribe().borrow().clone();
        assert_eq!(snapshot.epoch, 1);
        assert_eq!(snapshot.next_index, 4);
        assert_eq!(snapshot.usage, 0);
        assert_eq!(snapshot.ranges, vec![crate::buffer::BufferedRange::marker(11.0)]);

        let outcome = fx.worker.append_segment(4, 1).await.unwrap();
        match outcome {
            LoadOutcome::Appended { range, .. } => assert_eq!(range.start, 11.0),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cancelled_fetch_result_is_discarded() {
        let mut fx = fixture(Track::Video, 1_000, 100);
        fx.worker.cancel.cancel();

        let result = fx.worker.append_segment(0, 0).await;
        assert!(matches!(result, Err(TrackError::Cancelled { .. })));
        assert!(fx.stream.decode_buffer(Track::Video).unwrap().operations().is_empty());
    }
}
