//! Tunables for buffering, prefetch, retry and HTTP access.
//!
//! Every byte budget, threshold and delay the session uses is read from
//! a [`SegbufConfig`] handed to `open_session`.

use std::time::Duration;

use crate::PlaybackError;
use crate::media::Track;

/// Settings for one playback session, split by concern.
///
/// `from_env` layers `SEGBUF_*` variables over the defaults.
#[derive(Debug, Clone, Default)]
pub struct SegbufConfig {
    pub buffer: BufferConfig,
    pub prefetch: PrefetchConfig,
    pub retry: RetryConfig,
    pub network: NetworkConfig,
}

/// Per-track byte budgets and timeline accounting.
#[derive(Debug, Clone)]
pub struct BufferConfig {
    /// Maximum retained video bytes before FIFO eviction
    pub video_ceiling_bytes: u64,
    /// Maximum retained audio bytes before FIFO eviction
    pub audio_ceiling_bytes: u64,
    /// Duration assumed for a segment the manifest has no duration for
    pub fallback_segment_duration: f64,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            video_ceiling_bytes: 250 * 1024 * 1024, // 250 MiB
            audio_ceiling_bytes: 100 * 1024 * 1024, // 100 MiB
            fallback_segment_duration: 2.0,
        }
    }
}

impl BufferConfig {
    /// Returns the byte ceiling for the given track.
    pub fn ceiling(&self, track: Track) -> u64 {
        match track {
            Track::Video => self.video_ceiling_bytes,
            Track::Audio => self.audio_ceiling_bytes,
        }
    }
}

/// Lead-buffer and prefetch trigger settings.
#[derive(Debug, Clone)]
pub struct PrefetchConfig {
    /// Media segments appended per track during bootstrap
    pub initial_segments: usize,
    /// Buffered lead (seconds) at or below which a paired fetch is triggered
    pub lazy_threshold_secs: f64,
    /// Capacity of each actor's command channel
    pub command_buffer: usize,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            initial_segments: 7,
            lazy_threshold_secs: 15.0,
            command_buffer: 100,
        }
    }
}

/// Rate limiting for re-requesting a segment whose fetch failed.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Delay before the first retry of a failed index
    pub base_delay: Duration,
    /// Upper bound of the exponential backoff
    pub max_delay: Duration,
    /// Give up on an index after this many failures (None = never)
    pub max_attempts: Option<u32>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            max_attempts: None,
        }
    }
}

/// HTTP settings for the manifest and segment collaborators.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Base URL the `/videos/...` routes are resolved against
    pub base_url: String,
    /// Sent with manifest and segment requests
    pub user_agent: &'static str,
    /// TCP connect timeout
    pub connect_timeout: Duration,
    /// Whole-request timeout (None = a stuck fetch blocks its track)
    pub request_timeout: Option<Duration>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080/".to_string(),
            user_agent: "segbuf/0.1.0",
            connect_timeout: Duration::from_secs(10),
            request_timeout: None,
        }
    }
}

impl SegbufConfig {
    /// Defaults with any `SEGBUF_*` overrides applied.
    ///
    /// Values that fail to parse keep the default, except
    /// `SEGBUF_MAX_RETRY_ATTEMPTS` where anything but a number means unlimited.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("SEGBUF_BASE_URL") {
            config.network.base_url = url;
        }

        if let Ok(timeout) = std::env::var("SEGBUF_REQUEST_TIMEOUT") {
            if let Ok(seconds) = timeout.parse::<u64>() {
                config.network.request_timeout = Some(Duration::from_secs(seconds));
            }
        }

        if let Ok(threshold) = std::env::var("SEGBUF_LAZY_THRESHOLD_SECS") {
            if let Ok(seconds) = threshold.parse::<f64>() {
                config.prefetch.lazy_threshold_secs = seconds;
            }
        }

        if let Ok(count) = std::env::var("SEGBUF_INITIAL_SEGMENTS") {
            if let Ok(segments) = count.parse::<usize>() {
                config.prefetch.initial_segments = segments;
            }
        }

        if let Ok(bytes) = std::env::var("SEGBUF_VIDEO_CEILING_BYTES") {
            if let Ok(ceiling) = bytes.parse::<u64>() {
                config.buffer.video_ceiling_bytes = ceiling;
            }
        }

        if let Ok(bytes) = std::env::var("SEGBUF_AUDIO_CEILING_BYTES") {
            if let Ok(ceiling) = bytes.parse::<u64>() {
                config.buffer.audio_ceiling_bytes = ceiling;
            }
        }

        if let Ok(attempts) = std::env::var("SEGBUF_MAX_RETRY_ATTEMPTS") {
            config.retry.max_attempts = attempts.parse::<u32>().ok();
        }

        config
    }

    /// Creates a configuration with small budgets for tests.
    pub fn for_testing() -> Self {
        Self {
            buffer: BufferConfig {
                video_ceiling_bytes: 1024 * 1024,
                audio_ceiling_bytes: 256 * 1024,
                ..Default::default()
            },
            prefetch: PrefetchConfig {
                initial_segments: 3,
                lazy_threshold_secs: 6.0,
                command_buffer: 16,
            },
            retry: RetryConfig {
                base_delay: Duration::from_millis(100),
                max_delay: Duration::from_secs(1),
                max_attempts: Some(5),
            },
            ..Default::default()
        }
    }

    /// Checks the values a session cannot run with.
    ///
    /// # Errors
    ///
    /// - `PlaybackError::Configuration` - Zero ceiling, non-positive threshold or
    ///   fallback duration, or an empty command buffer
    pub fn validate(&self) -> Result<(), PlaybackError> {
        let reason = if self.buffer.video_ceiling_bytes == 0 || self.buffer.audio_ceiling_bytes == 0 {
            Some("byte ceilings must be greater than zero")
        } else if !self.buffer.fallback_segment_duration.is_finite()
            || self.buffer.fallback_segment_duration <= 0.0
        {
            Some("fallback segment duration must be positive")
        } else if !self.prefetch.lazy_threshold_secs.is_finite()
            || self.prefetch.lazy_threshold_secs <= 0.0
        {
            Some("lazy buffer threshold must be positive")
        } else if self.prefetch.command_buffer == 0 {
            Some("command buffer must hold at least one command")
        } else {
            None
        };

        match reason {
            Some(reason) => Err(PlaybackError::Configuration {
                reason: reason.to_string(),
            }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = SegbufConfig::default();

        assert_eq!(config.buffer.video_ceiling_bytes, 250 * 1024 * 1024);
        assert_eq!(config.buffer.audio_ceiling_bytes, 100 * 1024 * 1024);
        assert_eq!(config.buffer.fallback_segment_duration, 2.0);
        assert_eq!(config.prefetch.initial_segments, 7);
        assert_eq!(config.prefetch.lazy_threshold_secs, 15.0);
        assert_eq!(config.retry.max_attempts, None);
        assert_eq!(config.network.request_timeout, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_ceiling_per_track() {
        let config = BufferConfig::default();
        assert!(config.ceiling(Track::Video) > config.ceiling(Track::Audio));
    }

    #[test]
    fn test_validate_rejects_zero_ceiling() {
        let mut config = SegbufConfig::for_testing();
        config.buffer.audio_ceiling_bytes = 0;
        assert!(matches!(
            config.validate(),
            Err(PlaybackError::Configuration { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_nan_threshold() {
        let mut config = SegbufConfig::default();
        config.prefetch.lazy_threshold_secs = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_override() {
        unsafe {
            std::env::set_var("SEGBUF_LAZY_THRESHOLD_SECS", "30");
            std::env::set_var("SEGBUF_INITIAL_SEGMENTS", "4");
            std::env::set_var("SEGBUF_REQUEST_TIMEOUT", "20");
            std::env::set_var("SEGBUF_MAX_RETRY_ATTEMPTS", "3");
        }

        let config = SegbufConfig::from_env();

        assert_eq!(config.prefetch.lazy_threshold_secs, 30.0);
        assert_eq!(config.prefetch.initial_segments, 4);
        assert_eq!(
            config.network.request_timeout,
            Some(Duration::from_secs(20))
        );
        assert_eq!(config.retry.max_attempts, Some(3));

        // Cleanup
        unsafe {
            std::env::remove_var("SEGBUF_LAZY_THRESHOLD_SECS");
            std::env::remove_var("SEGBUF_INITIAL_SEGMENTS");
            std::env::remove_var("SEGBUF_REQUEST_TIMEOUT");
            std::env::remove_var("SEGBUF_MAX_RETRY_ATTEMPTS");
        }
    }
}
