//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    collections::HashMap,
    net::SocketAddr,
    num::NonZeroUsize,
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::application::replay::{DEFAULT_EVENT_MODULES, DEFAULT_REPLAY_PACING};
use crate::cache::{DEFAULT_TTL, ModulePolicy, PolicyTable};
use crate::stream::{DEFAULT_CHANNEL_CAPACITY, DEFAULT_STALE_TIMEOUT};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "mirador";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_STORAGE_ROOT: &str = "data";
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;
const DEFAULT_HEARTBEAT_SECS: u64 = 15;
const DEFAULT_MONITOR_INTERVAL_SECS: u64 = 30;

/// Command-line arguments for the Mirador binary.
#[derive(Debug, Parser)]
#[command(name = "mirador", version, about = "Mirador dashboard cache server")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "MIRADOR_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the Mirador HTTP service.
    Serve(Box<ServeArgs>),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the object store root directory.
    #[arg(long = "storage-root", value_name = "PATH")]
    pub storage_root: Option<PathBuf>,

    /// Override the expiry sweep interval.
    #[arg(long = "cache-sweep-interval-seconds", value_name = "SECONDS")]
    pub cache_sweep_interval_seconds: Option<u64>,

    /// Override the fallback cache TTL applied to unconfigured modules.
    #[arg(long = "cache-default-ttl-seconds", value_name = "SECONDS")]
    pub cache_default_ttl_seconds: Option<u64>,

    /// Override the heartbeat interval.
    #[arg(long = "stream-heartbeat-seconds", value_name = "SECONDS")]
    pub stream_heartbeat_seconds: Option<u64>,

    /// Override the connection staleness timeout.
    #[arg(long = "stream-stale-timeout-seconds", value_name = "SECONDS")]
    pub stream_stale_timeout_seconds: Option<u64>,

    /// Override the staleness monitor interval.
    #[arg(long = "stream-monitor-interval-seconds", value_name = "SECONDS")]
    pub stream_monitor_interval_seconds: Option<u64>,

    /// Override the per-connection channel capacity.
    #[arg(long = "stream-channel-capacity", value_name = "COUNT")]
    pub stream_channel_capacity: Option<usize>,

    /// Override the delay between replayed events.
    #[arg(long = "replay-pacing-ms", value_name = "MS")]
    pub replay_pacing_ms: Option<u64>,
}

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub storage: StorageSettings,
    pub cache: CacheSettings,
    pub stream: StreamSettings,
    pub replay: ReplaySettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub root: PathBuf,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub sweep_interval: Duration,
    pub policies: PolicyTable,
}

#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub heartbeat_interval: Duration,
    pub stale_timeout: Duration,
    pub monitor_interval: Duration,
    pub channel_capacity: NonZeroUsize,
}

#[derive(Debug, Clone)]
pub struct ReplaySettings {
    pub pacing: Duration,
    pub event_modules: Vec<String>,
    pub aliases: HashMap<String, Vec<String>>,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("MIRADOR").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    storage: RawStorageSettings,
    cache: RawCacheSettings,
    stream: RawStreamSettings,
    replay: RawReplaySettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(root) = overrides.storage_root.as_ref() {
            self.storage.root = Some(root.clone());
        }
        if let Some(seconds) = overrides.cache_sweep_interval_seconds {
            self.cache.sweep_interval_seconds = Some(seconds);
        }
        if let Some(seconds) = overrides.cache_default_ttl_seconds {
            self.cache.default_ttl_seconds = Some(seconds);
        }
        if let Some(seconds) = overrides.stream_heartbeat_seconds {
            self.stream.heartbeat_seconds = Some(seconds);
        }
        if let Some(seconds) = overrides.stream_stale_timeout_seconds {
            self.stream.stale_timeout_seconds = Some(seconds);
        }
        if let Some(seconds) = overrides.stream_monitor_interval_seconds {
            self.stream.monitor_interval_seconds = Some(seconds);
        }
        if let Some(capacity) = overrides.stream_channel_capacity {
            self.stream.channel_capacity = Some(capacity);
        }
        if let Some(ms) = overrides.replay_pacing_ms {
            self.replay.pacing_ms = Some(ms);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            storage,
            cache,
            stream,
            replay,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let storage = build_storage_settings(storage)?;
        let cache = build_cache_settings(cache)?;
        let stream = build_stream_settings(stream)?;
        let replay = build_replay_settings(replay)?;

        Ok(Self {
            server,
            logging,
            storage,
            cache,
            stream,
            replay,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_storage_settings(storage: RawStorageSettings) -> Result<StorageSettings, LoadError> {
    let root = storage
        .root
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STORAGE_ROOT));
    if root.as_os_str().is_empty() {
        return Err(LoadError::invalid("storage.root", "path must not be empty"));
    }

    Ok(StorageSettings { root })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let sweep_secs = cache
        .sweep_interval_seconds
        .unwrap_or(DEFAULT_SWEEP_INTERVAL_SECS);
    if sweep_secs == 0 {
        return Err(LoadError::invalid(
            "cache.sweep_interval_seconds",
            "must be greater than zero",
        ));
    }

    let fallback_ttl = match cache.default_ttl_seconds {
        Some(0) => {
            return Err(LoadError::invalid(
                "cache.default_ttl_seconds",
                "must be greater than zero",
            ));
        }
        Some(seconds) => Duration::from_secs(seconds),
        None => DEFAULT_TTL,
    };

    let mut modules = HashMap::with_capacity(cache.modules.len());
    for (module, policy) in cache.modules {
        if module.trim().is_empty() {
            return Err(LoadError::invalid(
                "cache.modules",
                "module name must not be empty",
            ));
        }
        let ttl = match policy.ttl_seconds {
            Some(0) => {
                return Err(LoadError::invalid(
                    "cache.modules",
                    format!("ttl for `{module}` must be greater than zero"),
                ));
            }
            Some(seconds) => Duration::from_secs(seconds),
            None => fallback_ttl,
        };
        modules.insert(
            module,
            ModulePolicy {
                ttl,
                enabled: policy.enabled.unwrap_or(true),
            },
        );
    }

    Ok(CacheSettings {
        sweep_interval: Duration::from_secs(sweep_secs),
        policies: PolicyTable::with_fallback(
            modules,
            ModulePolicy {
                ttl: fallback_ttl,
                enabled: true,
            },
        ),
    })
}

fn build_stream_settings(stream: RawStreamSettings) -> Result<StreamSettings, LoadError> {
    let heartbeat_secs = stream.heartbeat_seconds.unwrap_or(DEFAULT_HEARTBEAT_SECS);
    if heartbeat_secs == 0 {
        return Err(LoadError::invalid(
            "stream.heartbeat_seconds",
            "must be greater than zero",
        ));
    }

    let stale_secs = stream
        .stale_timeout_seconds
        .unwrap_or(DEFAULT_STALE_TIMEOUT.as_secs());
    if stale_secs <= heartbeat_secs {
        return Err(LoadError::invalid(
            "stream.stale_timeout_seconds",
            "must exceed the heartbeat interval, or every connection goes stale between beats",
        ));
    }

    let monitor_secs = stream
        .monitor_interval_seconds
        .unwrap_or(DEFAULT_MONITOR_INTERVAL_SECS);
    if monitor_secs == 0 {
        return Err(LoadError::invalid(
            "stream.monitor_interval_seconds",
            "must be greater than zero",
        ));
    }

    let capacity_value = stream.channel_capacity.unwrap_or(DEFAULT_CHANNEL_CAPACITY);
    let channel_capacity = NonZeroUsize::new(capacity_value).ok_or_else(|| {
        LoadError::invalid("stream.channel_capacity", "must be greater than zero")
    })?;

    Ok(StreamSettings {
        heartbeat_interval: Duration::from_secs(heartbeat_secs),
        stale_timeout: Duration::from_secs(stale_secs),
        monitor_interval: Duration::from_secs(monitor_secs),
        channel_capacity,
    })
}

fn build_replay_settings(replay: RawReplaySettings) -> Result<ReplaySettings, LoadError> {
    let pacing = replay
        .pacing_ms
        .map(Duration::from_millis)
        .unwrap_or(DEFAULT_REPLAY_PACING);

    let event_modules = match replay.event_modules {
        Some(modules) => {
            if modules.iter().any(|module| module.trim().is_empty()) {
                return Err(LoadError::invalid(
                    "replay.event_modules",
                    "module name must not be empty",
                ));
            }
            modules
        }
        None => DEFAULT_EVENT_MODULES
            .iter()
            .map(|module| module.to_string())
            .collect(),
    };

    Ok(ReplaySettings {
        pacing,
        event_modules,
        aliases: replay.aliases,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStorageSettings {
    root: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    sweep_interval_seconds: Option<u64>,
    default_ttl_seconds: Option<u64>,
    modules: HashMap<String, RawModulePolicy>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawModulePolicy {
    ttl_seconds: Option<u64>,
    enabled: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStreamSettings {
    heartbeat_seconds: Option<u64>,
    stale_timeout_seconds: Option<u64>,
    monitor_interval_seconds: Option<u64>,
    channel_capacity: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawReplaySettings {
    pacing_ms: Option<u64>,
    event_modules: Option<Vec<String>>,
    aliases: HashMap<String, Vec<String>>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_overrides_take_highest_precedence() {
        let mut raw = RawSettings::default();
        raw.server.port = Some(4000);
        raw.logging.level = Some("info".to_string());

        let overrides = ServeOverrides {
            server_port: Some(4321),
            log_level: Some("debug".to_string()),
            ..Default::default()
        };

        raw.apply_serve_overrides(&overrides);
        let settings = Settings::from_raw(raw).expect("valid settings");

        assert_eq!(settings.server.addr.port(), 4321);
        assert_eq!(settings.logging.level, LevelFilter::DEBUG);
    }

    #[test]
    fn defaults_are_complete() {
        let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

        assert_eq!(settings.server.addr.port(), DEFAULT_PORT);
        assert_eq!(settings.storage.root, PathBuf::from(DEFAULT_STORAGE_ROOT));
        assert_eq!(settings.cache.policies.fallback().ttl, DEFAULT_TTL);
        assert_eq!(
            settings.stream.heartbeat_interval,
            Duration::from_secs(DEFAULT_HEARTBEAT_SECS)
        );
        assert_eq!(settings.stream.stale_timeout, DEFAULT_STALE_TIMEOUT);
        assert_eq!(settings.replay.pacing, DEFAULT_REPLAY_PACING);
        assert_eq!(settings.replay.event_modules, vec!["events"]);
    }

    #[test]
    fn cli_json_logging_enforces_format() {
        let mut raw = RawSettings::default();
        let overrides = ServeOverrides {
            log_json: Some(true),
            ..Default::default()
        };

        raw.apply_serve_overrides(&overrides);
        let settings = Settings::from_raw(raw).expect("valid settings");

        assert!(matches!(settings.logging.format, LogFormat::Json));
    }

    #[test]
    fn module_policies_inherit_the_fallback_ttl() {
        let mut raw = RawSettings::default();
        raw.cache.default_ttl_seconds = Some(120);
        raw.cache.modules.insert(
            "recommendations".to_string(),
            RawModulePolicy {
                ttl_seconds: None,
                enabled: Some(false),
            },
        );
        raw.cache.modules.insert(
            "rules".to_string(),
            RawModulePolicy {
                ttl_seconds: Some(900),
                enabled: None,
            },
        );

        let settings = Settings::from_raw(raw).expect("valid settings");
        let policies = &settings.cache.policies;

        let recommendations = policies.resolve_module("recommendations");
        assert_eq!(recommendations.ttl, Duration::from_secs(120));
        assert!(!recommendations.enabled);

        let rules = policies.resolve_module("rules");
        assert_eq!(rules.ttl, Duration::from_secs(900));
        assert!(rules.enabled);
    }

    #[test]
    fn stale_timeout_must_exceed_heartbeat() {
        let mut raw = RawSettings::default();
        raw.stream.heartbeat_seconds = Some(30);
        raw.stream.stale_timeout_seconds = Some(30);

        let error = Settings::from_raw(raw).expect_err("invalid settings");
        assert!(matches!(
            error,
            LoadError::Invalid {
                key: "stream.stale_timeout_seconds",
                ..
            }
        ));
    }

    #[test]
    fn zero_ttl_is_rejected() {
        let mut raw = RawSettings::default();
        raw.cache.modules.insert(
            "recommendations".to_string(),
            RawModulePolicy {
                ttl_seconds: Some(0),
                enabled: None,
            },
        );

        assert!(Settings::from_raw(raw).is_err());
    }

    #[test]
    fn default_to_serve_command() {
        let args = CliArgs::parse_from(["mirador"]);
        let command = args
            .command
            .unwrap_or(Command::Serve(Box::<ServeArgs>::default()));
        assert!(matches!(command, Command::Serve(_)));
    }

    #[test]
    fn parse_serve_overrides() {
        let args = CliArgs::parse_from([
            "mirador",
            "serve",
            "--server-host",
            "0.0.0.0",
            "--storage-root",
            "/var/lib/mirador",
            "--replay-pacing-ms",
            "10",
        ]);

        match args.command.expect("serve command") {
            Command::Serve(serve) => {
                assert_eq!(serve.overrides.server_host.as_deref(), Some("0.0.0.0"));
                assert_eq!(
                    serve.overrides.storage_root.as_deref(),
                    Some(std::path::Path::new("/var/lib/mirador"))
                );
                assert_eq!(serve.overrides.replay_pacing_ms, Some(10));
            }
        }
    }
}
