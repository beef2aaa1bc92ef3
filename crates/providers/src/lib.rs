use async_trait::async_trait;
use chatbox_status_core::{SpotifyConfig, TrackInfo};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

pub mod spotify;
pub mod system;

pub use spotify::{SpotifyPlaybackSource, TokenCache};
pub use system::{GpuReading, SysinfoSource};

/// Answer of one remote playback query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemotePlayback {
    Playing(TrackInfo),
    /// A valid answer saying nothing is playing.
    Idle,
}

#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// No usable credentials; retrying cannot help until the operator acts.
    #[error("not authorized: {0}")]
    Unauthorized(String),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },
    #[error("unexpected http status {0}")]
    Http(u16),
    #[error("network error: {0}")]
    Network(String),
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, FetchError::Unauthorized(_))
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            FetchError::Malformed(err.to_string())
        } else {
            FetchError::Network(err.to_string())
        }
    }
}

#[async_trait]
pub trait PlaybackSource: Send {
    fn name(&self) -> &'static str;
    async fn current_playback(&mut self) -> Result<RemotePlayback, FetchError>;
}

/// Cheap, always-available host information rendered as the system section.
pub trait SystemInfoSource: Send {
    fn system_info(&mut self) -> String;
}

/// Used when no remote source is configured; always reports idle.
pub struct NullPlaybackSource;

#[async_trait]
impl PlaybackSource for NullPlaybackSource {
    fn name(&self) -> &'static str {
        "null"
    }

    async fn current_playback(&mut self) -> Result<RemotePlayback, FetchError> {
        Ok(RemotePlayback::Idle)
    }
}

pub fn build_playback_source(cfg: &SpotifyConfig) -> Box<dyn PlaybackSource> {
    match SpotifyPlaybackSource::from_config(cfg) {
        Ok(source) => Box::new(source),
        Err(err) => {
            warn!(error = %err, "spotify source unavailable; playback section disabled");
            Box::new(NullPlaybackSource)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::FetchError;
    use std::time::Duration;

    #[test]
    fn only_missing_credentials_stop_retries() {
        assert!(!FetchError::Unauthorized("no cache".into()).is_retryable());
        assert!(FetchError::Auth("expired".into()).is_retryable());
        assert!(FetchError::RateLimited {
            retry_after: Some(Duration::from_secs(3))
        }
        .is_retryable());
        assert!(FetchError::Http(503).is_retryable());
        assert!(FetchError::Network("reset".into()).is_retryable());
        assert!(FetchError::Malformed("eof".into()).is_retryable());
    }
}
