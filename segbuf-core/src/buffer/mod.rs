//! Range timeline and byte accounting of one track's decode buffer
//!
//! A track's buffered media is tracked as an append-ordered list of ranges,
//! each carrying the timeline span it covers and the bytes it cost. The list
//! drives FIFO eviction against the track's byte ceiling and yields the
//! buffered frontier used by the prefetch decision.

pub use self::range::BufferedRange;
pub use self::track_buffer::{EvictionPlan, TrackBuffer};

mod range;
mod track_buffer;
