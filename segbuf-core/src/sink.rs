//! Output stream and decode buffer contracts.
//!
//! A decode buffer is a single-writer sink: it reports an `updating` flag
//! and fires exactly one completion-or-error signal per submitted
//! operation. Submitting while `updating` is set is a contract violation,
//! so every submission goes through [`append_when_idle`] or
//! [`remove_when_idle`], which wait for the flag to clear first.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::{oneshot, watch};

use crate::media::Track;

/// Operation submitted to a decode buffer or output stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferOperation {
    Append,
    Remove,
    CreateBuffer,
    EndOfStream,
}

impl fmt::Display for BufferOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BufferOperation::Append => "append",
            BufferOperation::Remove => "remove",
            BufferOperation::CreateBuffer => "buffer creation",
            BufferOperation::EndOfStream => "end of stream",
        };
        f.write_str(name)
    }
}

/// Errors reported by the decode sink.
#[derive(Debug, Clone, Error)]
pub enum BufferOperationError {
    /// The operation was refused at submission time
    #[error("{track} decode buffer rejected {operation}: {reason}")]
    Rejected {
        track: Track,
        operation: BufferOperation,
        reason: String,
    },

    /// The operation was accepted but fired its error signal
    #[error("{track} decode buffer failed {operation}: {reason}")]
    Failed {
        track: Track,
        operation: BufferOperation,
        reason: String,
    },

    /// The sink dropped the operation without signalling
    #[error("{track} decode buffer dropped the completion signal for {operation}")]
    SignalLost {
        track: Track,
        operation: BufferOperation,
    },

    /// The decode buffer went away while we waited for it to become idle
    #[error("{track} decode buffer detached")]
    Detached { track: Track },

    #[error("Output stream is not open for {operation}")]
    StreamClosed { operation: BufferOperation },
}

/// Completion-or-error signal of one submitted operation.
#[derive(Debug)]
pub struct PendingOperation {
    track: Track,
    operation: BufferOperation,
    signal: oneshot::Receiver<Result<(), BufferOperationError>>,
}

impl PendingOperation {
    /// Creates the signal pair for an operation the sink has accepted.
    ///
    /// The sink keeps the sender and fires it exactly once.
    pub fn channel(
        track: Track,
        operation: BufferOperation,
    ) -> (oneshot::Sender<Result<(), BufferOperationError>>, Self) {
        let (sender, signal) = oneshot::channel();
        (
            sender,
            Self {
                track,
                operation,
                signal,
            },
        )
    }

    /// Suspends until the sink signals completion or error.
    ///
    /// # Errors
    ///
    /// - `BufferOperationError::Failed` - Sink fired its error signal
    /// - `BufferOperationError::SignalLost` - Sink dropped the signal
    pub async fn completed(self) -> Result<(), BufferOperationError> {
        match self.signal.await {
            Ok(result) => result,
            Err(_) => Err(BufferOperationError::SignalLost {
                track: self.track,
                operation: self.operation,
            }),
        }
    }
}

/// Single-writer sink that one track's bytes are appended into.
pub trait DecodeBuffer: Send + Sync {
    fn track(&self) -> Track;

    /// Subscribes to the `updating` flag.
    fn updating(&self) -> watch::Receiver<bool>;

    /// Submits an append of `data`. Must only be called while idle.
    ///
    /// # Errors
    ///
    /// - `BufferOperationError::Rejected` - Buffer is busy or cannot take the data
    fn append(&self, data: Bytes) -> Result<PendingOperation, BufferOperationError>;

    /// Submits removal of the timeline span `[start, end)`. Must only be called while idle.
    ///
    /// # Errors
    ///
    /// - `BufferOperationError::Rejected` - Buffer is busy or the span is invalid
    fn remove(&self, start: f64, end: f64) -> Result<PendingOperation, BufferOperationError>;

    fn is_updating(&self) -> bool {
        *self.updating().borrow()
    }
}

/// Output stream owning the decode buffers of a session.
#[async_trait]
pub trait OutputStream: Send + Sync {
    /// Suspends until the stream signals it is ready to be written.
    ///
    /// # Errors
    ///
    /// - `BufferOperationError::StreamClosed` - Stream closed before becoming ready
    async fn wait_ready(&self) -> Result<(), BufferOperationError>;

    fn is_open(&self) -> bool;

    /// Sets the total presentation duration in seconds.
    fn set_duration(&self, seconds: f64);

    /// Creates the decode buffer for `track`.
    ///
    /// # Errors
    ///
    /// - `BufferOperationError::StreamClosed` - Stream is not open
    /// - `BufferOperationError::Rejected` - MIME type unsupported or buffer exists
    fn add_decode_buffer(
        &self,
        track: Track,
        mime_type: &str,
    ) -> Result<Arc<dyn DecodeBuffer>, BufferOperationError>;

    /// Signals that no further media will be appended.
    ///
    /// # Errors
    ///
    /// - `BufferOperationError::StreamClosed` - Stream is not open
    fn end_of_stream(&self) -> Result<(), BufferOperationError>;
}

/// Suspends the caller until `buffer` reports idle.
///
/// Returns immediately when already idle; otherwise registers a one-shot
/// listener on the `updating` flag.
///
/// # Errors
///
/// - `BufferOperationError::Detached` - Buffer dropped its flag while busy
pub async fn wait_for_idle(buffer: &dyn DecodeBuffer) -> Result<(), BufferOperationError> {
    let mut updating = buffer.updating();
    if !*updating.borrow_and_update() {
        return Ok(());
    }

    updating
        .wait_for(|busy| !*busy)
        .await
        .map(|_| ())
        .map_err(|_| BufferOperationError::Detached {
            track: buffer.track(),
        })
}

/// Waits for idle, appends `data` and suspends until the sink signals.
///
/// # Errors
///
/// - `BufferOperationError` - Rejected, failed, detached, or signal lost
pub async fn append_when_idle(
    buffer: &dyn DecodeBuffer,
    data: Bytes,
) -> Result<(), BufferOperationError> {
    wait_for_idle(buffer).await?;
    buffer.append(data)?.completed().await
}

/// Waits for idle, removes `[start, end)` and suspends until the sink signals.
///
/// # Errors
///
/// - `BufferOperationError` - Rejected, failed, detached, or signal lost
pub async fn remove_when_idle(
    buffer: &dyn DecodeBuffer,
    start: f64,
    end: f64,
) -> Result<(), BufferOperationError> {
    wait_for_idle(buffer).await?;
    buffer.remove(start, end)?.completed().await
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::session::test_mocks::{MockOutputStream, SinkOperation};

    #[tokio::test]
    async fn test_wait_for_idle_returns_immediately_when_idle() {
        let stream = MockOutputStream::new();
        let buffer = stream.add_decode_buffer(Track::Video, "video/mp4").unwrap();

        tokio::time::timeout(Duration::from_millis(50), wait_for_idle(buffer.as_ref()))
            .await
            .expect("idle buffer must not block")
            .unwrap();
    }

    #[tokio::test]
    async fn test_append_when_idle_serializes_submissions() {
        let stream = MockOutputStream::with_latency(Duration::from_millis(20));
        let buffer = stream.add_decode_buffer(Track::Audio, "audio/mp4").unwrap();

        let first = buffer.append(Bytes::from_static(b"first")).unwrap();
        assert!(buffer.is_updating());

        // Second submission must wait for the first to finish
        let second = append_when_idle(buffer.as_ref(), Bytes::from_static(b"second!"));
        let (first, second) = tokio::join!(first.completed(), second);
        first.unwrap();
        second.unwrap();

        let mock = stream.decode_buffer(Track::Audio).unwrap();
        assert!(!mock.saw_overlapping_operation());
        assert_eq!(
            mock.operations(),
            vec![
                SinkOperation::Append { bytes: 5 },
                SinkOperation::Append { bytes: 7 },
            ]
        );
    }

    #[tokio::test]
    async fn test_wait_for_idle_pends_until_operation_completes() {
        let stream = MockOutputStream::with_latency(Duration::from_millis(30));
        let buffer = stream.add_decode_buffer(Track::Video, "video/mp4").unwrap();
        let pending = buffer.append(Bytes::from_static(b"segment")).unwrap();

        let mut wait = tokio_test::task::spawn(wait_for_idle(buffer.as_ref()));
        tokio_test::assert_pending!(wait.poll());

        pending.completed().await.unwrap();
        assert!(wait.is_woken());
        tokio_test::assert_ready_ok!(wait.poll());
    }

    #[tokio::test]
    async fn test_failed_operation_propagates_error() {
        let stream = MockOutputStream::new();
        let buffer = stream.add_decode_buffer(Track::Video, "video/mp4").unwrap();
        stream.decode_buffer(Track::Video).unwrap().fail_next_removes(1);

        let result = remove_when_idle(buffer.as_ref(), 0.0, 4.0).await;
        assert!(matches!(
            result,
            Err(BufferOperationError::Failed {
                operation: BufferOperation::Remove,
                ..
            })
        ));
        assert!(!buffer.is_updating());
    }

    #[tokio::test]
    async fn test_dropped_signal_is_reported() {
        let (sender, pending) = PendingOperation::channel(Track::Video, BufferOperation::Append);
        drop(sender);
        assert!(matches!(
            pending.completed().await,
            Err(BufferOperationError::SignalLost { .. })
        ));
    }
}
