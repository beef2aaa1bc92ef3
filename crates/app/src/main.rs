use anyhow::{Context, Result};
use chatbox_status_core::{AppConfig, DisplayMode};
use chatbox_status_engine::{Aggregator, EngineConfig, ModeControl, PushStore};
use chatbox_status_ingest::IngestListener;
use chatbox_status_osc::OscSink;
use chatbox_status_providers::{
    build_playback_source, PlaybackSource, SysinfoSource, TokenCache,
};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncBufReadExt;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "chatbox-status",
    about = "System / Spotify / video status -> VRChat chatbox (OSC)"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    Run {
        /// Initial display mode: full, system, spotify or media.
        #[arg(long)]
        mode: Option<DisplayMode>,
    },
    Doctor,
    Status,
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    Init,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ControlCommand {
    SetMode(String),
    ShowMode,
    Quit,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cmd = cli.command.unwrap_or(Commands::Run { mode: None });
    let cfg_path = cli.config.unwrap_or_else(default_config_path);

    match cmd {
        Commands::Config {
            action: ConfigAction::Init,
        } => {
            init_config(&cfg_path)?;
            println!("Initialized config at {}", cfg_path.display());
            Ok(())
        }
        Commands::Doctor => {
            let cfg = load_or_default(&cfg_path)?;
            init_logging(&cfg.log_level);
            doctor(&cfg, &cfg_path).await
        }
        Commands::Status => {
            let cfg = load_or_default(&cfg_path)?;
            init_logging(&cfg.log_level);
            status(&cfg).await
        }
        Commands::Run { mode } => {
            let mut cfg = load_or_default(&cfg_path)?;
            if let Some(mode) = mode {
                cfg.mode = mode;
            }
            init_logging(&cfg.log_level);
            run(cfg, cfg_path).await
        }
    }
}

fn build_aggregator(cfg: &AppConfig, push: Arc<PushStore>, mode: Arc<ModeControl>) -> Aggregator {
    Aggregator::new(
        EngineConfig::from_app_config(cfg),
        build_playback_source(&cfg.spotify),
        Box::new(SysinfoSource::new(cfg.display.clock_format.clone())),
        push,
        mode,
    )
}

fn build_listener(cfg: &AppConfig, push: Arc<PushStore>) -> IngestListener {
    IngestListener::new(
        format!("{}:{}", cfg.ingest.bind, cfg.ingest.port),
        push,
        Duration::from_millis(cfg.intervals.listener_shutdown_ms),
    )
}

async fn run(cfg: AppConfig, cfg_path: PathBuf) -> Result<()> {
    let push = Arc::new(PushStore::new());
    let mode = Arc::new(ModeControl::new(cfg.mode));
    let aggregator = build_aggregator(&cfg, push.clone(), mode.clone());
    let sink = OscSink::new(&cfg.osc.host, cfg.osc.port, cfg.osc.address.clone());
    let mut listener = build_listener(&cfg, push);

    info!(mode = %cfg.mode, osc = sink.target(), "chatbox-status started");
    sync_listener(&mut listener, cfg.mode).await;

    let (reload_tx, reload_rx) = mpsc::channel::<()>(4);
    spawn_reload_watchers(
        cfg_path.clone(),
        cfg.intervals.file_watch_poll_ms,
        reload_tx,
    )
    .await?;

    let (control_tx, mut control_rx) = mpsc::channel::<ControlCommand>(8);
    spawn_stdin_control(control_tx);

    let (stop_tx, stop_rx) = watch::channel(false);
    let aggregate = tokio::spawn(aggregate_loop(aggregator, sink, cfg_path, reload_rx, stop_rx));

    loop {
        tokio::select! {
            Some(cmd) = control_rx.recv() => match cmd {
                ControlCommand::SetMode(name) => match mode.set_mode(&name) {
                    Ok(new_mode) => {
                        info!(mode = %new_mode, "display mode changed");
                        sync_listener(&mut listener, new_mode).await;
                    }
                    Err(err) => warn!(error = %err, "mode change rejected"),
                },
                ControlCommand::ShowMode => println!("mode: {}", mode.mode()),
                ControlCommand::Quit => {
                    info!("quit requested; shutting down");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("received ctrl-c; shutting down");
                break;
            }
        }
    }

    let _ = stop_tx.send(true);
    listener.stop().await;
    if let Err(err) = aggregate.await {
        error!(error = %err, "aggregator task failed");
    }
    Ok(())
}

/// The push listener only runs while the mode renders pushed media.
async fn sync_listener(listener: &mut IngestListener, mode: DisplayMode) {
    if mode.consumes_push() {
        if let Err(err) = listener.start().await {
            error!(error = %err, "push listener unavailable");
        }
    } else {
        listener.stop().await;
    }
}

async fn aggregate_loop(
    mut aggregator: Aggregator,
    mut sink: OscSink,
    cfg_path: PathBuf,
    mut reload_rx: mpsc::Receiver<()>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut ticker = new_ticker(aggregator.config().tick_interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                aggregator.tick(&mut sink, Instant::now()).await;
            }
            Some(()) = reload_rx.recv() => {
                match load_or_default(&cfg_path) {
                    Ok(new_cfg) => {
                        let engine_cfg = EngineConfig::from_app_config(&new_cfg);
                        if engine_cfg.tick_interval != aggregator.config().tick_interval {
                            ticker = new_ticker(engine_cfg.tick_interval);
                        }
                        aggregator.update_config(engine_cfg);
                        aggregator.set_system_source(Box::new(SysinfoSource::new(
                            new_cfg.display.clock_format.clone(),
                        )));
                        info!("configuration reloaded");
                    }
                    Err(err) => {
                        error!(error = %err, "failed to reload config");
                    }
                }
            }
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
            }
        }
    }
}

fn new_ticker(period: Duration) -> tokio::time::Interval {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

fn spawn_stdin_control(tx: mpsc::Sender<ControlCommand>) {
    tokio::spawn(async move {
        let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if let Some(cmd) = parse_control_line(&line) {
                if tx.send(cmd).await.is_err() {
                    break;
                }
            }
        }
    });
}

fn parse_control_line(line: &str) -> Option<ControlCommand> {
    let word = line.trim();
    match word.to_ascii_lowercase().as_str() {
        "" => None,
        "quit" | "exit" => Some(ControlCommand::Quit),
        "mode" => Some(ControlCommand::ShowMode),
        _ => Some(ControlCommand::SetMode(word.to_string())),
    }
}

async fn doctor(cfg: &AppConfig, cfg_path: &Path) -> Result<()> {
    println!("== chatbox-status doctor ==");
    println!(
        "Config file: {} ({})",
        cfg_path.display(),
        if cfg_path.exists() { "found" } else { "defaults" }
    );

    let target = format!("{}:{}", cfg.osc.host, cfg.osc.port);
    let resolved = tokio::net::lookup_host(&target)
        .await
        .ok()
        .and_then(|mut addrs| addrs.next());
    match resolved {
        Some(addr) => println!("OSC target: {target} -> {addr}"),
        None => println!("OSC target: {target} does not resolve"),
    }

    let ingest = format!("{}:{}", cfg.ingest.bind, cfg.ingest.port);
    match tokio::net::TcpListener::bind(&ingest).await {
        Ok(_) => println!("Push listener port {ingest}: available"),
        Err(err) => println!("Push listener port {ingest}: unavailable ({err})"),
    }

    let mut tokens = TokenCache::new(&cfg.spotify.token_cache_path);
    match tokens.load().map(|token| token.refresh_token.is_some()) {
        Ok(has_refresh) => println!(
            "Spotify token cache: {} (refresh token {})",
            tokens.path().display(),
            if has_refresh { "present" } else { "missing" }
        ),
        Err(err) => println!("Spotify token cache: {err}"),
    }

    let mut source = build_playback_source(&cfg.spotify);
    match source.current_playback().await {
        Ok(playback) => println!("Playback source {}: {playback:?}", source.name()),
        Err(err) => println!("Playback source {}: {err}", source.name()),
    }

    Ok(())
}

async fn status(cfg: &AppConfig) -> Result<()> {
    let push = Arc::new(PushStore::new());
    let mode = Arc::new(ModeControl::new(cfg.mode));
    let mut aggregator = build_aggregator(cfg, push, mode);

    let (mode, text) = aggregator.compose(Instant::now()).await;
    println!("mode: {mode}");
    println!("{text}");
    Ok(())
}

fn default_config_path() -> PathBuf {
    let base = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    base.join("chatbox-status").join("config.toml")
}

fn init_config(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create config directory {}", parent.display()))?;
    }
    let cfg = AppConfig::default();
    let toml = toml::to_string_pretty(&cfg)?;
    std::fs::write(path, toml)
        .with_context(|| format!("failed to write config file {}", path.display()))?;
    Ok(())
}

fn load_or_default(path: &Path) -> Result<AppConfig> {
    let mut cfg = if !path.exists() {
        AppConfig::default()
    } else {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&data).with_context(|| format!("failed to parse {}", path.display()))?
    };
    apply_env_overrides(&mut cfg, |key| std::env::var(key).ok());
    Ok(cfg)
}

fn init_logging(log_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_new(log_level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .try_init();
}

async fn spawn_reload_watchers(path: PathBuf, poll_ms: u64, tx: mpsc::Sender<()>) -> Result<()> {
    let tx_poll = tx.clone();
    tokio::spawn(async move {
        let mut known_mtime = file_mtime(&path);
        let sleep = Duration::from_millis(poll_ms.max(2_000));
        loop {
            tokio::time::sleep(sleep).await;
            let current = file_mtime(&path);
            if current.is_some() && current != known_mtime {
                known_mtime = current;
                let _ = tx_poll.send(()).await;
            }
        }
    });

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let tx_hup = tx.clone();
        tokio::spawn(async move {
            if let Ok(mut sig) = signal(SignalKind::hangup()) {
                while sig.recv().await.is_some() {
                    let _ = tx_hup.send(()).await;
                }
            }
        });
    }

    Ok(())
}

fn file_mtime(path: &Path) -> Option<std::time::SystemTime> {
    std::fs::metadata(path).ok()?.modified().ok()
}

fn apply_env_overrides(cfg: &mut AppConfig, var: impl Fn(&str) -> Option<String>) {
    let non_empty = |key: &str| var(key).filter(|v| !v.trim().is_empty());

    if let Some(v) = non_empty("CHATBOX_STATUS_LOG_LEVEL") {
        cfg.log_level = v;
    }
    if let Some(v) = non_empty("CHATBOX_STATUS_MODE") {
        match v.parse::<DisplayMode>() {
            Ok(mode) => cfg.mode = mode,
            Err(err) => eprintln!("ignoring CHATBOX_STATUS_MODE: {err}"),
        }
    }
    if let Some(v) = non_empty("VRCHAT_IP") {
        cfg.osc.host = v;
    }
    if let Some(v) = non_empty("SPOTIPY_CLIENT_ID") {
        cfg.spotify.client_id = Some(v);
    }
    if let Some(v) = non_empty("SPOTIPY_CLIENT_SECRET") {
        cfg.spotify.client_secret = Some(v);
    }
}
