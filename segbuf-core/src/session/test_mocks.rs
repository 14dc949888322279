//! Mock collaborators for testing sessions and track workers.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{Semaphore, watch};

use super::Collaborators;
use crate::manifest::{Manifest, SegmentDescriptor};
use crate::media::{FileId, Track, TrackPair};
use crate::sink::{
    BufferOperation, BufferOperationError, DecodeBuffer, OutputStream, PendingOperation,
};
use crate::source::{ManifestFetchError, ManifestLoader, SegmentFetchError, SegmentFetcher};

const DEFAULT_SEGMENT_BYTES: usize = 1024;

/// Manifest with `count` segments of `duration` seconds on both tracks.
///
/// Filenames follow `{track}_{index:04}.m4s`; init segments are
/// `{track}_init.mp4`.
pub fn uniform_manifest(count: usize, duration: f64) -> Manifest {
    let segments = |track: Track| {
        (0..count)
            .map(|index| SegmentDescriptor::new(format!("{track}_{index:04}.m4s")))
            .collect()
    };

    Manifest {
        duration_sec: count as f64 * duration,
        video_codec: None,
        audio_codec: None,
        init_segment_video: Some(SegmentDescriptor::new("video_init.mp4")),
        init_segment_audio: Some(SegmentDescriptor::new("audio_init.mp4")),
        segments_video: segments(Track::Video),
        segments_audio: segments(Track::Audio),
        segment_durations_video: vec![duration; count],
        segment_durations_audio: vec![duration; count],
    }
}

/// Wires mocks into session collaborators.
pub fn mock_collaborators(
    source: Arc<MockMediaSource>,
    stream: Arc<MockOutputStream>,
) -> Collaborators {
    Collaborators {
        loader: source.clone(),
        fetcher: source,
        stream,
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// In-memory manifest loader and segment fetcher.
pub struct MockMediaSource {
    manifest: Option<Manifest>,
    segment_size: usize,
    sizes: Mutex<HashMap<String, usize>>,
    failures: Mutex<HashMap<String, usize>>,
    fetch_log: Mutex<Vec<String>>,
    manifest_loads: AtomicUsize,
    gate: Option<Arc<Semaphore>>,
}

impl MockMediaSource {
    /// Creates a source serving `manifest` with 1 KiB segments.
    pub fn new(manifest: Manifest) -> Self {
        Self {
            manifest: Some(manifest),
            segment_size: DEFAULT_SEGMENT_BYTES,
            sizes: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
            fetch_log: Mutex::new(Vec::new()),
            manifest_loads: AtomicUsize::new(0),
            gate: None,
        }
    }

    /// Creates a source whose manifest request always returns HTTP 404.
    pub fn failing_manifest() -> Self {
        Self {
            manifest: None,
            ..Self::new(Manifest::default())
        }
    }

    pub fn with_segment_size(mut self, bytes: usize) -> Self {
        self.segment_size = bytes;
        self
    }

    /// Holds every segment fetch until [`release_fetches`](Self::release_fetches).
    pub fn gated(mut self) -> Self {
        self.gate = Some(Arc::new(Semaphore::new(0)));
        self
    }

    /// Lets `count` held fetches complete.
    pub fn release_fetches(&self, count: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(count);
        }
    }

    /// Overrides the payload size of one segment.
    pub fn set_segment_size(&self, filename: &str, bytes: usize) {
        self.sizes.lock().insert(filename.to_string(), bytes);
    }

    /// Makes the next `times` fetches of `filename` fail with HTTP 503.
    pub fn fail_next(&self, filename: &str, times: usize) {
        self.failures.lock().insert(filename.to_string(), times);
    }

    /// Filenames in the order their fetches started.
    pub fn fetch_log(&self) -> Vec<String> {
        self.fetch_log.lock().clone()
    }

    pub fn fetch_count(&self) -> usize {
        self.fetch_log.lock().len()
    }

    /// Number of fetches started for `filename`.
    pub fn fetches_of(&self, filename: &str) -> usize {
        self.fetch_log
            .lock()
            .iter()
            .filter(|fetched| fetched.as_str() == filename)
            .count()
    }

    pub fn manifest_loads(&self) -> usize {
        self.manifest_loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ManifestLoader for MockMediaSource {
    async fn load_manifest(&self, file_id: &FileId) -> Result<Manifest, ManifestFetchError> {
        self.manifest_loads.fetch_add(1, Ordering::SeqCst);
        self.manifest
            .clone()
            .ok_or_else(|| ManifestFetchError::Status {
                file_id: file_id.clone(),
                status: 404,
            })
    }
}

#[async_trait]
impl SegmentFetcher for MockMediaSource {
    async fn fetch_segment(
        &self,
        _file_id: &FileId,
        filename: &str,
    ) -> Result<Bytes, SegmentFetchError> {
        self.fetch_log.lock().push(filename.to_string());

        if let Some(gate) = &self.gate {
            let permit = gate.acquire().await.map_err(|_| SegmentFetchError::Transport {
                filename: filename.to_string(),
                reason: "gate closed".to_string(),
            })?;
            permit.forget();
        }

        let should_fail = {
            let mut failures = self.failures.lock();
            match failures.get_mut(filename) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    true
                }
                _ => false,
            }
        };
        if should_fail {
            return Err(SegmentFetchError::Status {
                filename: filename.to_string(),
                status: 503,
            });
        }

        let size = self
            .sizes
            .lock()
            .get(filename)
            .copied()
            .unwrap_or(self.segment_size);
        Ok(Bytes::from(vec![0u8; size]))
    }
}

/// Operation recorded by a [`MockDecodeBuffer`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SinkOperation {
    Append { bytes: usize },
    Remove { start: f64, end: f64 },
}

type Journal = Arc<Mutex<Vec<(Track, SinkOperation)>>>;

/// Output stream recording every decode buffer operation in one journal.
pub struct MockOutputStream {
    latency: Duration,
    ready: watch::Sender<bool>,
    open: AtomicBool,
    duration: Mutex<Option<f64>>,
    buffers: Mutex<TrackPair<Option<Arc<MockDecodeBuffer>>>>,
    journal: Journal,
    created: AtomicUsize,
    end_of_stream_calls: AtomicUsize,
}

impl MockOutputStream {
    /// Creates a ready stream whose operations complete on the next tick.
    pub fn new() -> Self {
        Self::with_latency(Duration::ZERO)
    }

    /// Creates a ready stream whose operations take `latency` to complete.
    pub fn with_latency(latency: Duration) -> Self {
        let (ready, _) = watch::channel(true);
        Self {
            latency,
            ready,
            open: AtomicBool::new(true),
            duration: Mutex::new(None),
            buffers: Mutex::new(TrackPair::default()),
            journal: Arc::new(Mutex::new(Vec::new())),
            created: AtomicUsize::new(0),
            end_of_stream_calls: AtomicUsize::new(0),
        }
    }

    /// Holds `wait_ready` until [`mark_ready`](Self::mark_ready).
    pub fn pending(self) -> Self {
        self.ready.send_replace(false);
        self
    }

    pub fn mark_ready(&self) {
        self.ready.send_replace(true);
    }

    /// Closes the stream; later buffer creation and end of stream fail.
    pub fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    pub fn decode_buffer(&self, track: Track) -> Option<Arc<MockDecodeBuffer>> {
        self.buffers.lock().get(track).clone()
    }

    /// Every operation of both decode buffers in submission order.
    pub fn journal(&self) -> Vec<(Track, SinkOperation)> {
        self.journal.lock().clone()
    }

    pub fn created_buffers(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn duration(&self) -> Option<f64> {
        *self.duration.lock()
    }

    pub fn end_of_stream_calls(&self) -> usize {
        self.end_of_stream_calls.load(Ordering::SeqCst)
    }

    /// Whether either decode buffer ever received a submission while updating.
    pub fn saw_overlapping_operation(&self) -> bool {
        self.buffers
            .lock()
            .any(|buffer| buffer.as_ref().is_some_and(|b| b.saw_overlapping_operation()))
    }
}

impl Default for MockOutputStream {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OutputStream for MockOutputStream {
    async fn wait_ready(&self) -> Result<(), BufferOperationError> {
        let closed = BufferOperationError::StreamClosed {
            operation: BufferOperation::CreateBuffer,
        };
        if !self.is_open() {
            return Err(closed);
        }

        let mut ready = self.ready.subscribe();
        ready.wait_for(|ready| *ready).await.map_err(|_| closed)?;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn set_duration(&self, seconds: f64) {
        *self.duration.lock() = Some(seconds);
    }

    fn add_decode_buffer(
        &self,
        track: Track,
        _mime_type: &str,
    ) -> Result<Arc<dyn DecodeBuffer>, BufferOperationError> {
        if !self.is_open() {
            return Err(BufferOperationError::StreamClosed {
                operation: BufferOperation::CreateBuffer,
            });
        }

        let mut buffers = self.buffers.lock();
        let slot = buffers.get_mut(track);
        if slot.is_some() {
            return Err(BufferOperationError::Rejected {
                track,
                operation: BufferOperation::CreateBuffer,
                reason: "decode buffer already exists".to_string(),
            });
        }

        let buffer = Arc::new(MockDecodeBuffer::new(
            track,
            self.latency,
            Arc::clone(&self.journal),
        ));
        *slot = Some(Arc::clone(&buffer));
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(buffer)
    }

    fn end_of_stream(&self) -> Result<(), BufferOperationError> {
        if !self.is_open() {
            return Err(BufferOperationError::StreamClosed {
                operation: BufferOperation::EndOfStream,
            });
        }
        self.end_of_stream_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Decode buffer that completes each operation after a fixed latency.
///
/// A submission made while a previous one is still updating is rejected
/// and remembered, so tests can assert the single-writer discipline held.
pub struct MockDecodeBuffer {
    track: Track,
    latency: Duration,
    updating: Arc<watch::Sender<bool>>,
    operations: Mutex<Vec<SinkOperation>>,
    journal: Journal,
    overlapped: AtomicBool,
    fail_appends: AtomicUsize,
    fail_removes: AtomicUsize,
}

impl MockDecodeBuffer {
    fn new(track: Track, latency: Duration, journal: Journal) -> Self {
        let (updating, _) = watch::channel(false);
        Self {
            track,
            latency,
            updating: Arc::new(updating),
            operations: Mutex::new(Vec::new()),
            journal,
            overlapped: AtomicBool::new(false),
            fail_appends: AtomicUsize::new(0),
            fail_removes: AtomicUsize::new(0),
        }
    }

    pub fn operations(&self) -> Vec<SinkOperation> {
        self.operations.lock().clone()
    }

    pub fn saw_overlapping_operation(&self) -> bool {
        self.overlapped.load(Ordering::SeqCst)
    }

    /// Makes the next `count` appends fire their error signal.
    pub fn fail_next_appends(&self, count: usize) {
        self.fail_appends.store(count, Ordering::SeqCst);
    }

    /// Makes the next `count` removes fire their error signal.
    pub fn fail_next_removes(&self, count: usize) {
        self.fail_removes.store(count, Ordering::SeqCst);
    }

    fn submit(
        &self,
        operation: BufferOperation,
        recorded: SinkOperation,
        fail: bool,
    ) -> Result<PendingOperation, BufferOperationError> {
        if *self.updating.borrow() {
            self.overlapped.store(true, Ordering::SeqCst);
            return Err(BufferOperationError::Rejected {
                track: self.track,
                operation,
                reason: "buffer is updating".to_string(),
            });
        }

        self.operations.lock().push(recorded);
        self.journal.lock().push((self.track, recorded));
        self.updating.send_replace(true);

        let (signal, pending) = PendingOperation::channel(self.track, operation);
        let updating = Arc::clone(&self.updating);
        let latency = self.latency;
        let track = self.track;

        tokio::spawn(async move {
            if latency.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(latency).await;
            }

            updating.send_replace(false);
            let result = if fail {
                Err(BufferOperationError::Failed {
                    track,
                    operation,
                    reason: "injected failure".to_string(),
                })
            } else {
                Ok(())
            };
            let _ = signal.send(result);
        });

        Ok(pending)
    }
}

impl DecodeBuffer for MockDecodeBuffer {
    fn track(&self) -> Track {
        self.track
    }

    fn updating(&self) -> watch::Receiver<bool> {
        self.updating.subscribe()
    }

    fn append(&self, data: Bytes) -> Result<PendingOperation, BufferOperationError> {
        let fail = take_one(&self.fail_appends);
        self.submit(
            BufferOperation::Append,
            SinkOperation::Append { bytes: data.len() },
            fail,
        )
    }

    fn remove(&self, start: f64, end: f64) -> Result<PendingOperation, BufferOperationError> {
        let fail = take_one(&self.fail_removes);
        self.submit(
            BufferOperation::Remove,
            SinkOperation::Remove { start, end },
            fail,
        )
    }
}
