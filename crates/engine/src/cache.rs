//! Interpolated view of the last playback snapshot.
//!
//! The remote source is only asked every few seconds; in between, progress
//! is extrapolated from the fetch time so the display keeps moving.

use chatbox_status_core::PlaybackSnapshot;
use std::time::{Duration, Instant};

/// Progress at `now`, clamped to the track duration. A `now` earlier than
/// the fetch counts as no time elapsed.
pub fn current_progress(snapshot: &PlaybackSnapshot, now: Instant) -> u64 {
    let elapsed = snapshot
        .fetched_at
        .map(|at| now.saturating_duration_since(at).as_secs())
        .unwrap_or(0);
    snapshot
        .progress_at_fetch_secs
        .saturating_add(elapsed)
        .min(snapshot.duration_secs)
}

/// A snapshot that was never fetched is always stale.
pub fn is_stale(snapshot: &PlaybackSnapshot, now: Instant, refresh_interval: Duration) -> bool {
    match snapshot.fetched_at {
        Some(at) => now.saturating_duration_since(at) > refresh_interval,
        None => true,
    }
}
