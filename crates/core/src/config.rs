use crate::model::DisplayMode;
use serde::{Deserialize, Serialize};

fn default_schema_version() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigIntervals {
    pub tick_ms: u64,
    pub playback_refresh_ms: u64,
    pub paused_grace_ms: u64,
    pub push_freshness_ms: u64,
    pub listener_shutdown_ms: u64,
    pub file_watch_poll_ms: u64,
}

impl Default for ConfigIntervals {
    fn default() -> Self {
        Self {
            tick_ms: 2_000,
            playback_refresh_ms: 15_000,
            paused_grace_ms: 10_000,
            push_freshness_ms: 10_000,
            listener_shutdown_ms: 5_000,
            file_watch_poll_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    /// Base delay; attempt `n` waits `delay_ms * n` before the next one.
    pub delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub max_name_len: usize,
    /// chrono `strftime` pattern for the clock line.
    pub clock_format: String,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            max_name_len: 60,
            clock_format: "%I:%M %p".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OscConfig {
    pub host: String,
    pub port: u16,
    pub address: String,
}

impl Default for OscConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9000,
            address: "/chatbox/input".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 12345,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpotifyConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub token_cache_path: String,
    pub api_base: String,
    pub accounts_base: String,
}

impl Default for SpotifyConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            token_cache_path: ".spotify_token_cache".to_string(),
            api_base: "https://api.spotify.com/v1/".to_string(),
            accounts_base: "https://accounts.spotify.com/".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub log_level: String,
    pub mode: DisplayMode,
    pub intervals: ConfigIntervals,
    pub retry: RetryConfig,
    pub display: DisplayConfig,
    pub osc: OscConfig,
    pub ingest: IngestConfig,
    pub spotify: SpotifyConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            schema_version: default_schema_version(),
            log_level: "info".to_string(),
            mode: DisplayMode::Full,
            intervals: ConfigIntervals::default(),
            retry: RetryConfig::default(),
            display: DisplayConfig::default(),
            osc: OscConfig::default(),
            ingest: IngestConfig::default(),
            spotify: SpotifyConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::AppConfig;
    use crate::model::DisplayMode;

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let cfg: AppConfig = toml::from_str(
            r#"
            mode = "media"

            [osc]
            host = "192.168.1.20"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.mode, DisplayMode::Media);
        assert_eq!(cfg.osc.host, "192.168.1.20");
        assert_eq!(cfg.osc.port, 9000);
        assert_eq!(cfg.intervals.tick_ms, 2_000);
        assert_eq!(cfg.retry.max_retries, 3);
        assert_eq!(cfg.schema_version, 1);
    }

    #[test]
    fn defaults_survive_a_toml_round_trip() {
        let text = toml::to_string_pretty(&AppConfig::default()).unwrap();
        let back: AppConfig = toml::from_str(&text).unwrap();
        assert_eq!(back.ingest.port, 12345);
        assert_eq!(back.display.max_name_len, 60);
    }
}
