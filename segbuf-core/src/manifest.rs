//! One-time segment manifest describing both tracks of a media file.
//!
//! The manifest is fetched once per session and never mutated afterwards.
//! `segment_durations_*[i]` describes `segments_*[i]`; the sum of a track's
//! durations approximates `duration_sec`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::media::Track;

/// Codec used for the video decode buffer when the manifest names none.
pub const DEFAULT_VIDEO_CODEC: &str = "avc1.640028";
/// Codec used for the audio decode buffer when the manifest names none.
pub const DEFAULT_AUDIO_CODEC: &str = "mp4a.40.5";

/// Allowed gap between the summed segment durations and `duration_sec`.
const DURATION_SUM_TOLERANCE_SECS: f64 = 1.0;

/// Opaque filename key of one fetchable segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentDescriptor {
    pub filename: String,
}

impl SegmentDescriptor {
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
        }
    }
}

/// Segment layout of a media file, as served by `GET manifest(fileId)`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default)]
    pub duration_sec: f64,
    #[serde(default)]
    pub video_codec: Option<String>,
    #[serde(default)]
    pub audio_codec: Option<String>,
    #[serde(default)]
    pub init_segment_video: Option<SegmentDescriptor>,
    #[serde(default)]
    pub init_segment_audio: Option<SegmentDescriptor>,
    #[serde(default)]
    pub segments_video: Vec<SegmentDescriptor>,
    #[serde(default)]
    pub segments_audio: Vec<SegmentDescriptor>,
    #[serde(default)]
    pub segment_durations_video: Vec<f64>,
    #[serde(default)]
    pub segment_durations_audio: Vec<f64>,
}

/// Inconsistency found in an otherwise usable manifest.
#[derive(Debug, Clone, PartialEq)]
pub enum ManifestWarning {
    /// Duration array and segment list have different lengths
    DurationCountMismatch {
        track: Track,
        segments: usize,
        durations: usize,
    },
    /// Summed segment durations drift from the declared total
    DurationSumMismatch {
        track: Track,
        summed: f64,
        declared: f64,
    },
}

impl fmt::Display for ManifestWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManifestWarning::DurationCountMismatch {
                track,
                segments,
                durations,
            } => write!(
                f,
                "{track} has {segments} segments but {durations} durations"
            ),
            ManifestWarning::DurationSumMismatch {
                track,
                summed,
                declared,
            } => write!(
                f,
                "{track} durations sum to {summed:.3}s but manifest declares {declared:.3}s"
            ),
        }
    }
}

impl Manifest {
    /// Parses a manifest from its JSON wire form.
    ///
    /// # Errors
    ///
    /// - `serde_json::Error` - Body is not a manifest object
    pub fn from_json(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }

    pub fn segments(&self, track: Track) -> &[SegmentDescriptor] {
        match track {
            Track::Video => &self.segments_video,
            Track::Audio => &self.segments_audio,
        }
    }

    pub fn durations(&self, track: Track) -> &[f64] {
        match track {
            Track::Video => &self.segment_durations_video,
            Track::Audio => &self.segment_durations_audio,
        }
    }

    pub fn init_segment(&self, track: Track) -> Option<&SegmentDescriptor> {
        match track {
            Track::Video => self.init_segment_video.as_ref(),
            Track::Audio => self.init_segment_audio.as_ref(),
        }
    }

    /// Total number of media segments of a track.
    pub fn segment_count(&self, track: Track) -> usize {
        self.segments(track).len()
    }

    pub fn segment(&self, track: Track, index: usize) -> Option<&SegmentDescriptor> {
        self.segments(track).get(index)
    }

    /// Duration of one segment, if the manifest carries a usable value for it.
    pub fn segment_duration(&self, track: Track, index: usize) -> Option<f64> {
        self.durations(track)
            .get(index)
            .copied()
            .filter(|duration| duration.is_finite() && *duration >= 0.0)
    }

    /// Declared total duration, if present and meaningful.
    pub fn total_duration(&self) -> Option<f64> {
        (self.duration_sec.is_finite() && self.duration_sec > 0.0).then_some(self.duration_sec)
    }

    pub fn codec(&self, track: Track) -> &str {
        match track {
            Track::Video => self.video_codec.as_deref().unwrap_or(DEFAULT_VIDEO_CODEC),
            Track::Audio => self.audio_codec.as_deref().unwrap_or(DEFAULT_AUDIO_CODEC),
        }
    }

    /// MIME type used to create the decode buffer of a track.
    pub fn mime_type(&self, track: Track) -> String {
        format!("{}/mp4; codecs=\"{}\"", track, self.codec(track))
    }

    /// Lists inconsistencies that playback tolerates but that hint at bad data.
    pub fn consistency_warnings(&self) -> Vec<ManifestWarning> {
        let mut warnings = Vec::new();

        for track in Track::ALL {
            let segments = self.segment_count(track);
            let durations = self.durations(track);

            if segments != durations.len() {
                warnings.push(ManifestWarning::DurationCountMismatch {
                    track,
                    segments,
                    durations: durations.len(),
                });
            }

            if let Some(declared) = self.total_duration() {
                let summed: f64 = durations.iter().filter(|d| d.is_finite()).sum();
                if segments > 0 && (summed - declared).abs() > DURATION_SUM_TOLERANCE_SECS {
                    warnings.push(ManifestWarning::DurationSumMismatch {
                        track,
                        summed,
                        declared,
                    });
                }
            }
        }

        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "durationSec": 6.0,
        "videoCodec": "avc1.4d401f",
        "initSegmentVideo": { "filename": "v_init.mp4" },
        "initSegmentAudio": null,
        "segmentsVideo": [{ "filename": "v0.m4s" }, { "filename": "v1.m4s" }, { "filename": "v2.m4s" }],
        "segmentsAudio": [{ "filename": "a0.m4s" }, { "filename": "a1.m4s" }],
        "segmentDurationsVideo": [2.0, 2.0, 2.0],
        "segmentDurationsAudio": [3.0]
    }"#;

    #[test]
    fn test_parse_wire_format() {
        let manifest = Manifest::from_json(SAMPLE.as_bytes()).unwrap();

        assert_eq!(manifest.total_duration(), Some(6.0));
        assert_eq!(manifest.segment_count(Track::Video), 3);
        assert_eq!(manifest.segment_count(Track::Audio), 2);
        assert_eq!(
            manifest.init_segment(Track::Video).map(|s| s.filename.as_str()),
            Some("v_init.mp4")
        );
        assert!(manifest.init_segment(Track::Audio).is_none());
        assert_eq!(manifest.segment(Track::Audio, 1).unwrap().filename, "a1.m4s");
    }

    #[test]
    fn test_missing_duration_is_none() {
        let manifest = Manifest::from_json(SAMPLE.as_bytes()).unwrap();

        assert_eq!(manifest.segment_duration(Track::Audio, 0), Some(3.0));
        assert_eq!(manifest.segment_duration(Track::Audio, 1), None);
        assert_eq!(manifest.segment_duration(Track::Video, 7), None);
    }

    #[test]
    fn test_mime_types_fall_back_to_default_codecs() {
        let manifest = Manifest::from_json(SAMPLE.as_bytes()).unwrap();

        assert_eq!(
            manifest.mime_type(Track::Video),
            "video/mp4; codecs=\"avc1.4d401f\""
        );
        assert_eq!(
            manifest.mime_type(Track::Audio),
            format!("audio/mp4; codecs=\"{DEFAULT_AUDIO_CODEC}\"")
        );
    }

    #[test]
    fn test_consistency_warnings() {
        let manifest = Manifest::from_json(SAMPLE.as_bytes()).unwrap();
        let warnings = manifest.consistency_warnings();

        assert!(warnings.contains(&ManifestWarning::DurationCountMismatch {
            track: Track::Audio,
            segments: 2,
            durations: 1,
        }));
        assert!(warnings.iter().any(|w| matches!(
            w,
            ManifestWarning::DurationSumMismatch {
                track: Track::Audio,
                ..
            }
        )));
        assert!(
            !warnings
                .iter()
                .any(|w| matches!(w, ManifestWarning::DurationCountMismatch { track: Track::Video, .. }))
        );
    }

    #[test]
    fn test_empty_object_parses_to_empty_manifest() {
        let manifest = Manifest::from_json(b"{}").unwrap();
        assert_eq!(manifest.total_duration(), None);
        assert_eq!(manifest.segment_count(Track::Video), 0);
        assert!(manifest.consistency_warnings().is_empty());
    }
}
