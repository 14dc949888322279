//! Headless output stream that decodes nothing but keeps real timing.
//!
//! Each submitted operation holds the decode buffer's `updating` flag for a
//! delay derived from a simulated decode rate, then fires its signal. A
//! submission made while the flag is set is rejected and counted.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use segbuf_core::sink::{
    BufferOperation, BufferOperationError, DecodeBuffer, OutputStream, PendingOperation,
};
use segbuf_core::{Track, TrackPair};
use tokio::sync::watch;

/// Counters of one headless decode buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DecodeStats {
    pub appends: u64,
    pub removes: u64,
    pub bytes_appended: u64,
    /// Submissions made while the buffer was still updating
    pub overlapping_submissions: u64,
}

#[derive(Default)]
struct Counters {
    appends: AtomicU64,
    removes: AtomicU64,
    bytes_appended: AtomicU64,
    overlapping: AtomicU64,
}

/// Decode buffer whose operations take `bytes / decode_rate` seconds.
pub struct HeadlessDecodeBuffer {
    track: Track,
    decode_rate: u64, // bytes per second
    remove_delay: Duration,
    updating: Arc<watch::Sender<bool>>,
    counters: Counters,
}

impl HeadlessDecodeBuffer {
    fn new(track: Track, decode_rate: u64, remove_delay: Duration) -> Self {
        let (updating, _) = watch::channel(false);
        Self {
            track,
            decode_rate,
            remove_delay,
            updating: Arc::new(updating),
            counters: Counters::default(),
        }
    }

    pub fn stats(&self) -> DecodeStats {
        DecodeStats {
            appends: self.counters.appends.load(Ordering::Relaxed),
            removes: self.counters.removes.load(Ordering::Relaxed),
            bytes_appended: self.counters.bytes_appended.load(Ordering::Relaxed),
            overlapping_submissions: self.counters.overlapping.load(Ordering::Relaxed),
        }
    }

    fn decode_delay(&self, bytes: usize) -> Duration {
        if self.decode_rate == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(bytes as f64 / self.decode_rate as f64)
        }
    }

    fn submit(
        &self,
        operation: BufferOperation,
        delay: Duration,
    ) -> Result<PendingOperation, BufferOperationError> {
        if *self.updating.borrow() {
            self.counters.overlapping.fetch_add(1, Ordering::Relaxed);
            return Err(BufferOperationError::Rejected {
                track: self.track,
                operation,
                reason: "buffer is updating".to_string(),
            });
        }
        self.updating.send_replace(true);

        let (signal, pending) = PendingOperation::channel(self.track, operation);
        let updating = Arc::clone(&self.updating);
        tokio::spawn(async move {
            if delay.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(delay).await;
            }
            updating.send_replace(false);
            let _ = signal.send(Ok(()));
        });

        Ok(pending)
    }
}

impl DecodeBuffer for HeadlessDecodeBuffer {
    fn track(&self) -> Track {
        self.track
    }

    fn updating(&self) -> watch::Receiver<bool> {
        self.updating.subscribe()
    }

    fn append(&self, data: Bytes) -> Result<PendingOperation, BufferOperationError> {
        let pending = self.submit(BufferOperation::Append, self.decode_delay(data.len()))?;
        self.counters.appends.fetch_add(1, Ordering::Relaxed);
        self.counters
            .bytes_appended
            .fetch_add(data.len() as u64, Ordering::Relaxed);
        Ok(pending)
    }

    fn remove(&self, start: f64, end: f64) -> Result<PendingOperation, BufferOperationError> {
        if start.is_nan() || end.is_nan() || start >= end {
            return Err(BufferOperationError::Rejected {
                track: self.track,
                operation: BufferOperation::Remove,
                reason: format!("invalid span [{start}, {end})"),
            });
        }
        let pending = self.submit(BufferOperation::Remove, self.remove_delay)?;
        self.counters.removes.fetch_add(1, Ordering::Relaxed);
        Ok(pending)
    }
}

/// Output stream owning two [`HeadlessDecodeBuffer`]s.
pub struct HeadlessStream {
    decode_rate: u64,
    remove_delay: Duration,
    open: AtomicBool,
    duration: Mutex<Option<f64>>,
    buffers: Mutex<TrackPair<Option<Arc<HeadlessDecodeBuffer>>>>,
    ended: AtomicBool,
}

impl HeadlessStream {
    /// Creates an open stream decoding `decode_rate` bytes per second.
    pub fn new(decode_rate: u64) -> Self {
        Self {
            decode_rate,
            remove_delay: Duration::from_millis(1),
            open: AtomicBool::new(true),
            duration: Mutex::new(None),
            buffers: Mutex::new(TrackPair::default()),
            ended: AtomicBool::new(false),
        }
    }

    pub fn duration(&self) -> Option<f64> {
        *self.duration.lock()
    }

    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }

    /// Counters of both decode buffers; zero for a buffer never created.
    pub fn stats(&self) -> TrackPair<DecodeStats> {
        let buffers = self.buffers.lock();
        buffers
            .as_ref()
            .map(|_, buffer| buffer.as_ref().map(|b| b.stats()).unwrap_or_default())
    }
}

#[async_trait]
impl OutputStream for HeadlessStream {
    async fn wait_ready(&self) -> Result<(), BufferOperationError> {
        if self.is_open() {
            Ok(())
        } else {
            Err(BufferOperationError::StreamClosed {
                operation: BufferOperation::CreateBuffer,
            })
        }
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
        mime_type: &str,
    ) -> Result<Arc<dyn DecodeBuffer>, BufferOperationError> {
        if !mime_type.starts_with(track.as_str()) {
            return Err(BufferOperationError::Rejected {
                track,
                operation: BufferOperation::CreateBuffer,
                reason: format!("unsupported MIME type {mime_type}"),
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

        let buffer = Arc::new(HeadlessDecodeBuffer::new(
            track,
            self.decode_rate,
            self.remove_delay,
        ));
        *slot = Some(Arc::clone(&buffer));
        Ok(buffer)
    }

    fn end_of_stream(&self) -> Result<(), BufferOperationError> {
        if !self.is_open() {
            return Err(BufferOperationError::StreamClosed {
                operation: BufferOperation::EndOfStream,
            });
        }
        self.ended.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use segbuf_core::sink::append_when_idle;

    use super::*;

    #[tokio::test]
    async fn test_append_holds_updating_for_decode_time() {
        let stream = HeadlessStream::new(1_000_000);
        let buffer = stream
            .add_decode_buffer(Track::Video, "video/mp4; codecs=\"avc1.640028\"")
            .unwrap();

        let pending = tokio_test::assert_ok!(buffer.append(Bytes::from(vec![0u8; 20_000])));
        assert!(buffer.is_updating());
        tokio_test::assert_err!(buffer.append(Bytes::from_static(b"x")));

        pending.completed().await.unwrap();
        assert!(!buffer.is_updating());

        append_when_idle(buffer.as_ref(), Bytes::from_static(b"xyz"))
            .await
            .unwrap();
        let stats = stream.stats().video;
        assert_eq!(stats.appends, 2);
        assert_eq!(stats.bytes_appended, 20_003);
        assert_eq!(stats.overlapping_submissions, 1);
    }

    #[test]
    fn test_rejects_mismatched_mime_and_duplicates() {
        let stream = HeadlessStream::new(0);
        assert!(stream.add_decode_buffer(Track::Audio, "video/mp4").is_err());
        assert!(stream.add_decode_buffer(Track::Audio, "audio/mp4").is_ok());
        assert!(stream.add_decode_buffer(Track::Audio, "audio/mp4").is_err());
    }

    #[tokio::test]
    async fn test_remove_rejects_empty_span() {
        let stream = HeadlessStream::new(0);
        let buffer = stream.add_decode_buffer(Track::Video, "video/mp4").unwrap();
        assert!(buffer.remove(4.0, 4.0).is_err());
        buffer.remove(0.0, f64::INFINITY).unwrap().completed().await.unwrap();
        assert_eq!(stream.stats().video.removes, 1);
    }
}
