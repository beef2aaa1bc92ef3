use crate::{FetchError, PlaybackSource, RemotePlayback};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chatbox_status_core::{SpotifyConfig, TrackInfo};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);
/// Access tokens this close to expiry are refreshed ahead of use.
const EXPIRY_MARGIN_SECS: i64 = 60;

/// Token cache in the layout written by the OAuth consent flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedToken {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Unix seconds.
    #[serde(default)]
    pub expires_at: i64,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl CachedToken {
    pub fn is_expired(&self, now_unix: i64) -> bool {
        self.expires_at - now_unix < EXPIRY_MARGIN_SECS
    }
}

pub struct TokenCache {
    path: PathBuf,
    token: Option<CachedToken>,
}

impl TokenCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            token: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&mut self) -> Result<&CachedToken, FetchError> {
        if self.token.is_none() {
            let data = std::fs::read_to_string(&self.path).map_err(|err| {
                FetchError::Unauthorized(format!(
                    "cannot read token cache {} ({err}); complete the OAuth login first",
                    self.path.display()
                ))
            })?;
            let token: CachedToken = serde_json::from_str(&data).map_err(|err| {
                FetchError::Unauthorized(format!(
                    "token cache {} is not valid: {err}",
                    self.path.display()
                ))
            })?;
            self.token = Some(token);
        }
        self.token
            .as_ref()
            .ok_or_else(|| FetchError::Unauthorized("token cache empty".to_string()))
    }

    /// Forces a refresh before the next request.
    pub fn invalidate(&mut self) {
        if let Some(token) = self.token.as_mut() {
            token.expires_at = 0;
        }
    }

    fn store(&mut self, token: CachedToken) {
        match serde_json::to_string(&token) {
            Ok(json) => {
                if let Err(err) = std::fs::write(&self.path, json) {
                    warn!(error = %err, path = %self.path.display(), "failed to persist refreshed token");
                }
            }
            Err(err) => warn!(error = %err, "failed to encode refreshed token"),
        }
        self.token = Some(token);
    }
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    expires_in: i64,
}

#[derive(Debug, Deserialize)]
struct PlayerResponse {
    #[serde(default)]
    is_playing: bool,
    #[serde(default)]
    progress_ms: Option<u64>,
    #[serde(default)]
    item: Option<PlayerItem>,
}

#[derive(Debug, Deserialize)]
struct PlayerItem {
    name: String,
    #[serde(default)]
    duration_ms: u64,
    #[serde(default)]
    artists: Vec<Artist>,
}

#[derive(Debug, Deserialize)]
struct Artist {
    name: String,
}

/// Maps a `GET /me/player` body to a playback answer. Paused playback and
/// a missing item both count as idle.
pub fn parse_player_response(body: &[u8]) -> Result<RemotePlayback, FetchError> {
    let resp: PlayerResponse =
        serde_json::from_slice(body).map_err(|err| FetchError::Malformed(err.to_string()))?;

    match resp.item {
        Some(item) if resp.is_playing => {
            let artist = item
                .artists
                .iter()
                .map(|a| a.name.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            Ok(RemotePlayback::Playing(TrackInfo {
                name: item.name,
                artist,
                duration_secs: item.duration_ms / 1_000,
                progress_secs: resp.progress_ms.unwrap_or(0) / 1_000,
            }))
        }
        _ => Ok(RemotePlayback::Idle),
    }
}

pub struct SpotifyPlaybackSource {
    http: reqwest::Client,
    player_url: Url,
    token_url: Url,
    client_id: String,
    client_secret: String,
    tokens: TokenCache,
}

impl SpotifyPlaybackSource {
    pub fn from_config(cfg: &SpotifyConfig) -> Result<Self> {
        let client_id = cfg
            .client_id
            .clone()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| anyhow!("spotify.client_id is not set"))?;
        let client_secret = cfg
            .client_secret
            .clone()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| anyhow!("spotify.client_secret is not set"))?;

        let player_url = Url::parse(&cfg.api_base)
            .and_then(|base| base.join("me/player"))
            .with_context(|| format!("invalid spotify.api_base {}", cfg.api_base))?;
        let token_url = Url::parse(&cfg.accounts_base)
            .and_then(|base| base.join("api/token"))
            .with_context(|| format!("invalid spotify.accounts_base {}", cfg.accounts_base))?;

        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .context("failed to build http client")?;

        Ok(Self {
            http,
            player_url,
            token_url,
            client_id,
            client_secret,
            tokens: TokenCache::new(&cfg.token_cache_path),
        })
    }

    async fn access_token(&mut self) -> Result<String, FetchError> {
        let now = chrono::Utc::now().timestamp();
        let token = self.tokens.load()?.clone();
        if !token.is_expired(now) {
            return Ok(token.access_token);
        }

        let refresh_token = token.refresh_token.clone().ok_or_else(|| {
            FetchError::Unauthorized("token cache has no refresh_token".to_string())
        })?;
        debug!(path = %self.tokens.path().display(), "refreshing spotify access token");

        let resp = self
            .http
            .post(self.token_url.clone())
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token.as_str()),
            ])
            .send()
            .await?;

        let status = resp.status();
        if status == StatusCode::BAD_REQUEST || status == StatusCode::UNAUTHORIZED {
            let body = resp.text().await.unwrap_or_default();
            return Err(FetchError::Auth(format!("token refresh rejected: {body}")));
        }
        if !status.is_success() {
            return Err(FetchError::Http(status.as_u16()));
        }

        let body: RefreshResponse = resp.json().await?;
        let refreshed = CachedToken {
            access_token: body.access_token,
            refresh_token: body.refresh_token.or(Some(refresh_token)),
            expires_at: now + body.expires_in,
            extra: token.extra,
        };
        let access = refreshed.access_token.clone();
        self.tokens.store(refreshed);
        info!("spotify access token refreshed");
        Ok(access)
    }
}

#[async_trait]
impl PlaybackSource for SpotifyPlaybackSource {
    fn name(&self) -> &'static str {
        "spotify"
    }

    async fn current_playback(&mut self) -> Result<RemotePlayback, FetchError> {
        let token = self.access_token().await?;
        let resp = self
            .http
            .get(self.player_url.clone())
            .bearer_auth(token)
            .send()
            .await?;

        match resp.status() {
            StatusCode::NO_CONTENT => return Ok(RemotePlayback::Idle),
            StatusCode::UNAUTHORIZED => {
                self.tokens.invalidate();
                return Err(FetchError::Auth("access token rejected".to_string()));
            }
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = resp
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.trim().parse::<u64>().ok())
                    .map(Duration::from_secs);
                return Err(FetchError::RateLimited { retry_after });
            }
            status if !status.is_success() => return Err(FetchError::Http(status.as_u16())),
            _ => {}
        }

        let body = resp.bytes().await?;
        if body.is_empty() {
            return Ok(RemotePlayback::Idle);
        }
        parse_player_response(&body)
    }
}
