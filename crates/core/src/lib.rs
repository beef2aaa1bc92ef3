pub mod config;
pub mod format;
pub mod model;

pub use config::{
    AppConfig, ConfigIntervals, DisplayConfig, IngestConfig, OscConfig, RetryConfig, SpotifyConfig,
};
pub use model::{
    DisplayMode, ModeError, PlaybackSnapshot, PushRecord, PushUpdate, TrackInfo,
};
