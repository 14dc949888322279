//! Identifiers shared by every layer: the media file and its two tracks.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque identifier of a media file on the serving side.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileId(String);

impl FileId {
    /// Creates a file identifier from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One elementary media stream, buffered and evicted independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Track {
    Video,
    Audio,
}

impl Track {
    /// Both tracks in bootstrap order.
    pub const ALL: [Track; 2] = [Track::Video, Track::Audio];

    pub fn as_str(self) -> &'static str {
        match self {
            Track::Video => "video",
            Track::Audio => "audio",
        }
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A value held once per track.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TrackPair<T> {
    pub video: T,
    pub audio: T,
}

impl<T> TrackPair<T> {
    pub fn new(video: T, audio: T) -> Self {
        Self { video, audio }
    }

    /// Builds a pair by evaluating `f` for video, then audio.
    pub fn from_fn(mut f: impl FnMut(Track) -> T) -> Self {
        let video = f(Track::Video);
        let audio = f(Track::Audio);
        Self { video, audio }
    }

    pub fn get(&self, track: Track) -> &T {
        match track {
            Track::Video => &self.video,
            Track::Audio => &self.audio,
        }
    }

    pub fn get_mut(&mut self, track: Track) -> &mut T {
        match track {
            Track::Video => &mut self.video,
            Track::Audio => &mut self.audio,
        }
    }

    pub fn map<U>(self, mut f: impl FnMut(Track, T) -> U) -> TrackPair<U> {
        TrackPair {
            video: f(Track::Video, self.video),
            audio: f(Track::Audio, self.audio),
        }
    }

    pub fn as_ref(&self) -> TrackPair<&T> {
        TrackPair {
            video: &self.video,
            audio: &self.audio,
        }
    }

    /// Returns true when `predicate` holds for either track.
    pub fn any(&self, mut predicate: impl FnMut(&T) -> bool) -> bool {
        predicate(&self.video) || predicate(&self.audio)
    }

    /// Returns true when `predicate` holds for both tracks.
    pub fn all(&self, mut predicate: impl FnMut(&T) -> bool) -> bool {
        predicate(&self.video) && predicate(&self.audio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_pair_access() {
        let mut pair = TrackPair::new(1, 2);
        assert_eq!(*pair.get(Track::Video), 1);
        assert_eq!(*pair.get(Track::Audio), 2);

        *pair.get_mut(Track::Audio) = 5;
        let doubled = pair.map(|_, value| value * 2);
        assert_eq!(doubled, TrackPair::new(2, 10));
        assert!(doubled.any(|value| *value == 10));
        assert!(!doubled.all(|value| *value == 10));
    }

    #[test]
    fn test_track_display() {
        assert_eq!(Track::Video.to_string(), "video");
        assert_eq!(format!("{}", Track::Audio), "audio");
        assert_eq!(FileId::new("abc").to_string(), "abc");
    }
}
