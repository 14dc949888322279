//! Integration tests for Segbuf
//!
//! These tests drive whole playback sessions against mock collaborators and
//! check the ordering and budget guarantees across the session actor, both
//! track workers and the decode sink.

#[path = "integration/support.rs"]
mod support;

#[path = "integration/session_flow.rs"]
mod session_flow;

#[path = "integration/seek_handling.rs"]
mod seek_handling;

#[path = "integration/failure_recovery.rs"]
mod failure_recovery;

#[path = "integration/simulated_playback.rs"]
mod simulated_playback;
