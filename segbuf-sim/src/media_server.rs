//! Synthetic manifest and segment server.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use segbuf_core::manifest::{Manifest, SegmentDescriptor};
use segbuf_core::source::{ManifestFetchError, ManifestLoader, SegmentFetchError, SegmentFetcher};
use segbuf_core::{FileId, Track};

use crate::network::NetworkSimulator;

/// Shape of the media a [`SyntheticMediaServer`] serves.
#[derive(Debug, Clone)]
pub struct SyntheticMedia {
    pub duration_secs: f64,
    pub segment_secs: f64,
    pub video_bitrate: u64, // bits per second
    pub audio_bitrate: u64,
    pub init_segment_bytes: usize,
}

impl Default for SyntheticMedia {
    fn default() -> Self {
        Self {
            duration_secs: 120.0,
            segment_secs: 2.0,
            video_bitrate: 2_000_000,
            audio_bitrate: 128_000,
            init_segment_bytes: 1024,
        }
    }
}

impl SyntheticMedia {
    fn bitrate(&self, track: Track) -> u64 {
        match track {
            Track::Video => self.video_bitrate,
            Track::Audio => self.audio_bitrate,
        }
    }

    /// Builds the manifest: full-length segments plus a shorter final one.
    pub fn manifest(&self) -> Manifest {
        let mut durations = Vec::new();
        let mut remaining = self.duration_secs;
        while remaining > 1e-9 {
            let duration = remaining.min(self.segment_secs);
            durations.push(duration);
            remaining -= duration;
        }

        let segments = |track: Track| -> Vec<SegmentDescriptor> {
            (0..durations.len())
                .map(|index| SegmentDescriptor::new(format!("{track}/seg-{index:05}.m4s")))
                .collect()
        };

        Manifest {
            duration_sec: self.duration_secs,
            video_codec: None,
            audio_codec: None,
            init_segment_video: Some(SegmentDescriptor::new("video/init.mp4")),
            init_segment_audio: Some(SegmentDescriptor::new("audio/init.mp4")),
            segments_video: segments(Track::Video),
            segments_audio: segments(Track::Audio),
            segment_durations_video: durations.clone(),
            segment_durations_audio: durations,
        }
    }

    /// Payload size of a segment of `duration` seconds on `track`.
    pub fn segment_bytes(&self, track: Track, duration: f64) -> usize {
        ((self.bitrate(track) as f64 * duration) / 8.0).ceil() as usize
    }
}

/// Request counters of a [`SyntheticMediaServer`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ServerStats {
    pub manifest_requests: usize,
    pub segment_requests: usize,
    pub failed_requests: usize,
    pub bytes_served: u64,
}

/// Serves a [`SyntheticMedia`] over a simulated network.
pub struct SyntheticMediaServer {
    media: SyntheticMedia,
    manifest: Manifest,
    network: Arc<NetworkSimulator>,
    manifest_requests: AtomicUsize,
    segment_requests: AtomicUsize,
    failed_requests: AtomicUsize,
    bytes_served: AtomicU64,
}

impl SyntheticMediaServer {
    pub fn new(media: SyntheticMedia, network: Arc<NetworkSimulator>) -> Self {
        let manifest = media.manifest();
        Self {
            media,
            manifest,
            network,
            manifest_requests: AtomicUsize::new(0),
            segment_requests: AtomicUsize::new(0),
            failed_requests: AtomicUsize::new(0),
            bytes_served: AtomicU64::new(0),
        }
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn stats(&self) -> ServerStats {
        ServerStats {
            manifest_requests: self.manifest_requests.load(Ordering::Relaxed),
            segment_requests: self.segment_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            bytes_served: self.bytes_served.load(Ordering::Relaxed),
        }
    }

    /// Resolves `filename` to its track and payload size.
    fn payload_size(&self, filename: &str) -> Option<usize> {
        Track::ALL.into_iter().find_map(|track| {
            if self
                .manifest
                .init_segment(track)
                .is_some_and(|init| init.filename == filename)
            {
                return Some(self.media.init_segment_bytes);
            }
            let index = self
                .manifest
                .segments(track)
                .iter()
                .position(|segment| segment.filename == filename)?;
            let duration = self.manifest.segment_duration(track, index)?;
            Some(self.media.segment_bytes(track, duration))
        })
    }
}

#[async_trait]
impl ManifestLoader for SyntheticMediaServer {
    async fn load_manifest(&self, file_id: &FileId) -> Result<Manifest, ManifestFetchError> {
        self.manifest_requests.fetch_add(1, Ordering::Relaxed);
        self.network.transfer(0).await;
        tracing::debug!(%file_id, "Serving synthetic manifest");
        Ok(self.manifest.clone())
    }
}

#[async_trait]
impl SegmentFetcher for SyntheticMediaServer {
    async fn fetch_segment(
        &self,
        _file_id: &FileId,
        filename: &str,
    ) -> Result<Bytes, SegmentFetchError> {
        self.segment_requests.fetch_add(1, Ordering::Relaxed);

        let Some(size) = self.payload_size(filename) else {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
            return Err(SegmentFetchError::Status {
                filename: filename.to_string(),
                status: 404,
            });
        };

        self.network.transfer(size).await;
        if self.network.should_fail() {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
            return Err(SegmentFetchError::Transport {
                filename: filename.to_string(),
                reason: "simulated connection reset".to_string(),
            });
        }

        self.bytes_served.fetch_add(size as u64, Ordering::Relaxed);
        Ok(Bytes::from(vec![0u8; size]))
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::network::NetworkConditions;

    proptest! {
        #[test]
        fn manifest_durations_cover_media(
            duration in 0.5f64..600.0,
            segment in 0.5f64..10.0,
        ) {
            let media = SyntheticMedia {
                duration_secs: duration,
                segment_secs: segment,
                ..Default::default()
            };
            let manifest = media.manifest();
            let total: f64 = manifest.segment_durations_video.iter().sum();

            prop_assert!((total - duration).abs() < 1e-6);
            prop_assert!(manifest.segment_durations_video.iter().all(|d| *d > 0.0 && *d <= segment));
            prop_assert_eq!(manifest.segment_count(Track::Video), manifest.segment_count(Track::Audio));
        }
    }

    #[test]
    fn test_manifest_has_short_final_segment() {
        let media = SyntheticMedia {
            duration_secs: 9.0,
            segment_secs: 2.0,
            ..Default::default()
        };
        let manifest = media.manifest();

        assert_eq!(manifest.segment_count(Track::Video), 5);
        assert_eq!(manifest.segment_durations_audio, vec![2.0, 2.0, 2.0, 2.0, 1.0]);
        assert!(manifest.consistency_warnings().is_empty());
    }

    #[test]
    fn test_segment_bytes_follow_bitrate() {
        let media = SyntheticMedia::default();
        assert_eq!(media.segment_bytes(Track::Video, 2.0), 500_000);
        assert_eq!(media.segment_bytes(Track::Audio, 2.0), 32_000);
    }

    #[tokio::test]
    async fn test_serves_sized_payloads_and_counts() {
        let server = SyntheticMediaServer::new(
            SyntheticMedia::default(),
            Arc::new(NetworkSimulator::new(NetworkConditions::instant(), 0)),
        );
        let file_id = FileId::new("sim");

        let init = server.fetch_segment(&file_id, "video/init.mp4").await.unwrap();
        let segment = server
            .fetch_segment(&file_id, "audio/seg-00003.m4s")
            .await
            .unwrap();
        let missing = server.fetch_segment(&file_id, "nope.m4s").await;

        assert_eq!(init.len(), 1024);
        assert_eq!(segment.len(), 32_000);
        assert!(matches!(missing, Err(SegmentFetchError::Status { status: 404, .. })));

        let stats = server.stats();
        assert_eq!(stats.segment_requests, 3);
        assert_eq!(stats.failed_requests, 1);
        assert_eq!(stats.bytes_served, 33_024);
    }
}
