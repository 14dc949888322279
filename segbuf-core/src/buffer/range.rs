//! A contiguous span of a track's buffered timeline

use serde::Serialize;

/// Timeline span `[start, end)` in seconds and the bytes appended to produce it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BufferedRange {
    pub start: f64,
    pub end: f64,
    pub bytes: u64,
}

impl BufferedRange {
    pub fn new(start: f64, end: f64, bytes: u64) -> Self {
        Self { start, end, bytes }
    }

    /// Zero-length, zero-byte range placed at the new position after a flush.
    pub fn marker(at: f64) -> Self {
        Self::new(at, at, 0)
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    /// Whether the range covers timeline the decode buffer could remove.
    pub fn has_span(&self) -> bool {
        self.end > self.start
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_has_no_span() {
        let marker = BufferedRange::marker(12.5);
        assert_eq!(marker.duration(), 0.0);
        assert_eq!(marker.bytes, 0);
        assert!(!marker.has_span());
        assert!(BufferedRange::new(0.0, 2.0, 10).has_span());
    }
}
