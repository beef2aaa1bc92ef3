use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum DisplayMode {
    Full = 0,
    System = 1,
    Spotify = 2,
    Media = 3,
}

impl DisplayMode {
    pub const ALL: [DisplayMode; 4] = [
        DisplayMode::Full,
        DisplayMode::System,
        DisplayMode::Spotify,
        DisplayMode::Media,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DisplayMode::Full => "full",
            DisplayMode::System => "system",
            DisplayMode::Spotify => "spotify",
            DisplayMode::Media => "media",
        }
    }

    /// Modes that render data pushed by the browser extension.
    pub fn consumes_push(self) -> bool {
        matches!(self, DisplayMode::Full | DisplayMode::Media)
    }

    pub fn from_u8(raw: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|m| *m as u8 == raw)
    }
}

impl fmt::Display for DisplayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModeError {
    #[error("unknown display mode {0:?} (expected one of: full, system, spotify, media)")]
    Unknown(String),
}

impl FromStr for DisplayMode {
    type Err = ModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        Self::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(name))
            .ok_or_else(|| ModeError::Unknown(name.to_string()))
    }
}

/// One "currently playing" answer from the remote playback source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackInfo {
    pub name: String,
    pub artist: String,
    pub duration_secs: u64,
    pub progress_secs: u64,
}

/// Last confirmed remote playback state.
#[derive(Debug, Clone, Default)]
pub struct PlaybackSnapshot {
    pub track_name: String,
    pub artist_name: String,
    pub duration_secs: u64,
    pub progress_at_fetch_secs: u64,
    pub fetched_at: Option<Instant>,
    pub is_playing: bool,
    pub stopped_at: Option<Instant>,
}

impl PlaybackSnapshot {
    pub fn apply_playing(&mut self, track: TrackInfo, now: Instant) {
        self.progress_at_fetch_secs = track.progress_secs.min(track.duration_secs);
        self.track_name = track.name;
        self.artist_name = track.artist;
        self.duration_secs = track.duration_secs;
        self.fetched_at = Some(now);
        self.is_playing = true;
        self.stopped_at = None;
    }

    /// Records a valid "nothing is playing" answer. The stop stamp is only
    /// taken on the playing -> idle edge.
    pub fn apply_idle(&mut self, now: Instant) {
        if self.is_playing {
            self.stopped_at = Some(now);
        }
        self.is_playing = false;
        self.fetched_at = Some(now);
    }
}

/// A parsed message from the push producer, before it is stamped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PushUpdate {
    pub title: String,
    pub source: String,
    pub duration_secs: f64,
    pub position_secs: f64,
    pub is_live: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PushRecord {
    pub title: String,
    pub source: String,
    pub duration_secs: f64,
    pub position_secs: f64,
    pub is_live: bool,
    pub received_at: Option<Instant>,
}

impl PushRecord {
    pub fn from_update(update: PushUpdate, received_at: Instant) -> Self {
        Self {
            title: update.title,
            source: update.source,
            duration_secs: update.duration_secs,
            position_secs: update.position_secs,
            is_live: update.is_live,
            received_at: Some(received_at),
        }
    }

    pub fn is_fresh(&self, now: Instant, window: Duration) -> bool {
        match self.received_at {
            Some(at) => now.saturating_duration_since(at) < window,
            None => false,
        }
    }
}
