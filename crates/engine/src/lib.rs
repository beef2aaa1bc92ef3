use async_trait::async_trait;
use chatbox_status_core::{AppConfig, DisplayMode, PlaybackSnapshot};
use chatbox_status_providers::{PlaybackSource, SystemInfoSource};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

pub mod cache;
pub mod fetcher;
pub mod mode;
pub mod push;
pub mod render;

pub use fetcher::{RefreshOutcome, RemoteFetcher, RetryPolicy};
pub use mode::ModeControl;
pub use push::PushStore;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot encode status: {0}")]
    Encode(String),
    #[error("cannot resolve sink target {0}")]
    Resolve(String),
}

/// Destination of composed status text. Best effort: no delivery
/// acknowledgement beyond the local send succeeding.
#[async_trait]
pub trait StatusSink: Send {
    async fn send(&mut self, text: &str, visible: bool) -> Result<(), SinkError>;
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub tick_interval: Duration,
    pub playback_refresh: Duration,
    pub paused_grace: Duration,
    pub push_freshness: Duration,
    pub max_name_len: usize,
    pub retry: RetryPolicy,
}

impl EngineConfig {
    pub fn from_app_config(cfg: &AppConfig) -> Self {
        Self {
            tick_interval: Duration::from_millis(cfg.intervals.tick_ms.max(100)),
            playback_refresh: Duration::from_millis(cfg.intervals.playback_refresh_ms),
            paused_grace: Duration::from_millis(cfg.intervals.paused_grace_ms),
            push_freshness: Duration::from_millis(cfg.intervals.push_freshness_ms),
            max_name_len: cfg.display.max_name_len.max(1),
            retry: RetryPolicy {
                max_retries: cfg.retry.max_retries,
                delay: Duration::from_millis(cfg.retry.delay_ms),
            },
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from_app_config(&AppConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitOutcome {
    Sent,
    Unchanged,
    Failed,
}

/// Forwards text only when it differs from the last confirmed send.
#[derive(Debug, Default)]
pub struct Emitter {
    last_emitted: Option<String>,
}

impl Emitter {
    pub fn last_emitted(&self) -> Option<&str> {
        self.last_emitted.as_deref()
    }

    pub async fn emit(&mut self, text: &str, sink: &mut dyn StatusSink) -> EmitOutcome {
        if self.last_emitted.as_deref() == Some(text) {
            return EmitOutcome::Unchanged;
        }

        match sink.send(text, true).await {
            Ok(()) => {
                self.last_emitted = Some(text.to_string());
                info!(status = %text.replace('\n', " | "), "status sent");
                EmitOutcome::Sent
            }
            Err(err) => {
                // keep the old value so the next tick tries again
                warn!(error = %err, "status send failed");
                EmitOutcome::Failed
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct TickOutput {
    pub mode: DisplayMode,
    pub text: String,
    pub outcome: EmitOutcome,
}

/// Composes the status from system info, remote playback and pushed media
/// according to the current [`DisplayMode`].
pub struct Aggregator {
    cfg: EngineConfig,
    fetcher: RemoteFetcher,
    system: Box<dyn SystemInfoSource>,
    snapshot: PlaybackSnapshot,
    push: Arc<PushStore>,
    mode: Arc<ModeControl>,
    emitter: Emitter,
}

impl Aggregator {
    pub fn new(
        cfg: EngineConfig,
        source: Box<dyn PlaybackSource>,
        system: Box<dyn SystemInfoSource>,
        push: Arc<PushStore>,
        mode: Arc<ModeControl>,
    ) -> Self {
        let fetcher = RemoteFetcher::new(source, cfg.retry);
        Self {
            cfg,
            fetcher,
            system,
            snapshot: PlaybackSnapshot::default(),
            push,
            mode,
            emitter: Emitter::default(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    pub fn update_config(&mut self, cfg: EngineConfig) {
        self.fetcher.set_policy(cfg.retry);
        self.cfg = cfg;
    }

    pub fn set_system_source(&mut self, system: Box<dyn SystemInfoSource>) {
        self.system = system;
    }

    pub fn snapshot(&self) -> &PlaybackSnapshot {
        &self.snapshot
    }

    pub fn last_emitted(&self) -> Option<&str> {
        self.emitter.last_emitted()
    }

    pub async fn playback_section(&mut self, now: Instant) -> String {
        if cache::is_stale(&self.snapshot, now, self.cfg.playback_refresh) {
            let outcome = self.fetcher.refresh(&mut self.snapshot).await;
            if outcome == RefreshOutcome::Failed {
                debug!(
                    source = self.fetcher.source_name(),
                    "refresh failed; interpolating last snapshot"
                );
            }
        }
        render::render_playback(
            &self.snapshot,
            now,
            self.cfg.paused_grace,
            self.cfg.max_name_len,
        )
    }

    pub fn push_section(&self, now: Instant) -> String {
        render::render_push(
            &self.push.read(),
            now,
            self.cfg.push_freshness,
            self.cfg.max_name_len,
        )
    }

    pub async fn compose(&mut self, now: Instant) -> (DisplayMode, String) {
        let mode = self.mode.mode();
        let system_info = self.system.system_info();
        let playback = self.playback_section(now).await;
        let push = self.push_section(now);
        (mode, render::compose(mode, &system_info, &playback, &push))
    }

    pub async fn tick(&mut self, sink: &mut dyn StatusSink, now: Instant) -> TickOutput {
        let (mode, text) = self.compose(now).await;
        let outcome = self.emitter.emit(&text, sink).await;
        TickOutput {
            mode,
            text,
            outcome,
        }
    }
}
