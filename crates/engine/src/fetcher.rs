use chatbox_status_core::PlaybackSnapshot;
use chatbox_status_providers::{PlaybackSource, RemotePlayback};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    /// Linear backoff: the wait after failed attempt `n` is `delay * n`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.delay * attempt
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Updated,
    Failed,
}

/// Refreshes a [`PlaybackSnapshot`] from the remote source with bounded
/// retries. Failures never escape; the snapshot keeps its last value.
pub struct RemoteFetcher {
    source: Box<dyn PlaybackSource>,
    policy: RetryPolicy,
}

impl RemoteFetcher {
    pub fn new(source: Box<dyn PlaybackSource>, policy: RetryPolicy) -> Self {
        Self { source, policy }
    }

    pub fn set_policy(&mut self, policy: RetryPolicy) {
        self.policy = policy;
    }

    pub fn source_name(&self) -> &'static str {
        self.source.name()
    }

    pub async fn refresh(&mut self, snapshot: &mut PlaybackSnapshot) -> RefreshOutcome {
        let attempts = self.policy.max_retries.max(1);

        for attempt in 1..=attempts {
            match self.source.current_playback().await {
                Ok(RemotePlayback::Playing(track)) => {
                    debug!(source = self.source.name(), track = %track.name, "playback refreshed");
                    snapshot.apply_playing(track, Instant::now());
                    return RefreshOutcome::Updated;
                }
                Ok(RemotePlayback::Idle) => {
                    debug!(source = self.source.name(), "remote playback idle");
                    snapshot.apply_idle(Instant::now());
                    return RefreshOutcome::Updated;
                }
                Err(err) => {
                    warn!(
                        source = self.source.name(),
                        attempt,
                        max_attempts = attempts,
                        error = %err,
                        "playback fetch failed"
                    );
                    if !err.is_retryable() {
                        break;
                    }
                }
            }

            if attempt < attempts {
                tokio::time::sleep(self.policy.backoff(attempt)).await;
            }
        }

        RefreshOutcome::Failed
    }
}
