//! Output stream bootstrap: decode buffer creation and duration.

use std::sync::Arc;

use tracing::{debug, info};

use crate::manifest::Manifest;
use crate::media::{Track, TrackPair};
use crate::sink::{BufferOperationError, DecodeBuffer, OutputStream};

/// Creates a session's decode buffers once the output stream is ready.
///
/// Buffers are created at most once; later calls return the same handles.
pub struct SinkBootstrap {
    stream: Arc<dyn OutputStream>,
    manifest: Arc<Manifest>,
    buffers: Option<TrackPair<Arc<dyn DecodeBuffer>>>,
}

impl SinkBootstrap {
    pub fn new(stream: Arc<dyn OutputStream>, manifest: Arc<Manifest>) -> Self {
        Self {
            stream,
            manifest,
            buffers: None,
        }
    }

    /// Waits for the stream, creates one decode buffer per track and sets
    /// the total duration when the manifest has one.
    ///
    /// # Errors
    ///
    /// - `BufferOperationError::StreamClosed` - Stream closed before ready
    /// - `BufferOperationError::Rejected` - Stream refused a decode buffer
    pub async fn prepare(&mut self) -> Result<TrackPair<Arc<dyn DecodeBuffer>>, BufferOperationError> {
        if let Some(buffers) = &self.buffers {
            return Ok(buffers.clone());
        }

        self.stream.wait_ready().await?;
        debug!("Output stream ready");

        let video = self.create(Track::Video)?;
        let audio = self.create(Track::Audio)?;
        let buffers = TrackPair::new(video, audio);

        match self.manifest.total_duration() {
            Some(duration) => self.stream.set_duration(duration),
            None => debug!("Manifest has no total duration, leaving stream duration unset"),
        }

        self.buffers = Some(buffers.clone());
        Ok(buffers)
    }

    fn create(&self, track: Track) -> Result<Arc<dyn DecodeBuffer>, BufferOperationError> {
        let mime_type = self.manifest.mime_type(track);
        let buffer = self.stream.add_decode_buffer(track, &mime_type)?;
        info!(%track, %mime_type, "Created decode buffer");
        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::test_mocks::{MockOutputStream, uniform_manifest};

    #[tokio::test]
    async fn test_prepare_creates_buffers_once() {
        let stream = Arc::new(MockOutputStream::new());
        let mut bootstrap = SinkBootstrap::new(stream.clone(), Arc::new(uniform_manifest(4, 2.0)));

        let first = bootstrap.prepare().await.unwrap();
        let second = bootstrap.prepare().await.unwrap();

        assert!(Arc::ptr_eq(&first.video, &second.video));
        assert_eq!(stream.created_buffers(), 2);
        assert_eq!(stream.duration(), Some(8.0));
    }

    #[tokio::test]
    async fn test_prepare_waits_for_ready() {
        let stream = Arc::new(MockOutputStream::new().pending());
        let mut bootstrap = SinkBootstrap::new(stream.clone(), Arc::new(uniform_manifest(4, 2.0)));

        let task = tokio::spawn(async move { bootstrap.prepare().await.map(|_| ()) });
        tokio::task::yield_now().await;
        assert_eq!(stream.created_buffers(), 0);

        stream.mark_ready();
        task.await.unwrap().unwrap();
        assert_eq!(stream.created_buffers(), 2);
    }

    #[tokio::test]
    async fn test_missing_duration_leaves_stream_unset() {
        let stream = Arc::new(MockOutputStream::new());
        let mut manifest = uniform_manifest(2, 2.0);
        manifest.duration_sec = 0.0;
        let mut bootstrap = SinkBootstrap::new(stream.clone(), Arc::new(manifest));

        bootstrap.prepare().await.unwrap();
        assert_eq!(stream.duration(), None);
    }
}
