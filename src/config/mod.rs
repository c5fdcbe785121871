//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{
    net::{Ipv4Addr, SocketAddr},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use chrono::format::{Item, StrftimeItems};
use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

pub use cli::{
    CliArgs, Command, ExportArgs, LoggingOverrides, RenderArgs, ServeArgs, ServeOverrides,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "livemark";
const ENV_PREFIX: &str = "LIVEMARK";
const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 51004;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 5;
const DEFAULT_REFRESH_DELAY_MS: u64 = 500;
const DEFAULT_POLLING_INTERVAL_MS: u64 = 500;
const DEFAULT_EXPORT_TARGET_FOLDER: &str = ".";
const DEFAULT_TIMESTAMP_FORMAT: &str = "_%y%m%d%H%M%S";
const DEFAULT_WATCH_INTERVAL_MS: u64 = 500;

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub preview: PreviewSettings,
    pub export: ExportSettings,
    pub browser: BrowserSettings,
    pub renderers: RendererSettings,
    pub watch: WatchSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
                graceful_shutdown: Duration::from_secs(DEFAULT_GRACEFUL_SHUTDOWN_SECS),
            },
            logging: LoggingSettings {
                level: LevelFilter::INFO,
                format: LogFormat::Compact,
            },
            preview: PreviewSettings::default(),
            export: ExportSettings::default(),
            browser: BrowserSettings::default(),
            renderers: RendererSettings::default(),
            watch: WatchSettings {
                enabled: true,
                interval: Duration::from_millis(DEFAULT_WATCH_INTERVAL_MS),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
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

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewSettings {
    pub refresh_on_modified: bool,
    pub refresh_on_modified_delay: Duration,
    pub refresh_on_saved: bool,
    pub ajax_polling_interval: Duration,
    pub dispatch: DispatchMode,
}

impl Default for PreviewSettings {
    fn default() -> Self {
        Self {
            refresh_on_modified: true,
            refresh_on_modified_delay: Duration::from_millis(DEFAULT_REFRESH_DELAY_MS),
            refresh_on_saved: true,
            ajax_polling_interval: Duration::from_millis(DEFAULT_POLLING_INTERVAL_MS),
            dispatch: DispatchMode::Runtime,
        }
    }
}

/// Where the throttle scheduler runs fired renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    Inline,
    Runtime,
}

impl FromStr for DispatchMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "inline" => Ok(Self::Inline),
            "runtime" => Ok(Self::Runtime),
            other => Err(format!("unknown dispatch mode `{other}` (expected inline|runtime)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSettings {
    /// `None` exports to a temporary file; `.` exports beside the source.
    pub target_folder: Option<PathBuf>,
    /// chrono strftime format appended to exported file names.
    pub timestamp_format: String,
    pub copy_to_clipboard: bool,
    pub open_after_exporting: bool,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            target_folder: Some(PathBuf::from(DEFAULT_EXPORT_TARGET_FOLDER)),
            timestamp_format: DEFAULT_TIMESTAMP_FORMAT.to_string(),
            copy_to_clipboard: false,
            open_after_exporting: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BrowserSettings {
    /// Custom launch command; `{url}` in any argument is replaced.
    pub command: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RendererSettings {
    pub ignored: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchSettings {
    pub enabled: bool,
    pub interval: Duration,
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

    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("browser.command")
            .with_list_parse_key("renderers.ignored")
            .try_parsing(true),
    );

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Export(args)) => {
            raw.apply_logging_overrides(&args.logging);
            if let Some(folder) = args.target_folder.as_ref() {
                raw.export.target_folder = Some(folder.display().to_string());
            }
        }
        Some(Command::Render(args)) => raw.apply_logging_overrides(&args.logging),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    preview: RawPreviewSettings,
    export: RawExportSettings,
    browser: RawBrowserSettings,
    renderers: RawRendererSettings,
    watch: RawWatchSettings,
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
        if let Some(delay) = overrides.refresh_on_modified_delay_ms {
            self.preview.refresh_on_modified_delay_ms = Some(delay);
        }
        if let Some(mode) = overrides.dispatch.as_ref() {
            self.preview.dispatch = Some(mode.clone());
        }
        if let Some(enabled) = overrides.watch_enabled {
            self.watch.enabled = Some(enabled);
        }

        self.apply_logging_overrides(&overrides.logging);
    }

    fn apply_logging_overrides(&mut self, overrides: &LoggingOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            preview,
            export,
            browser,
            renderers,
            watch,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            preview: build_preview_settings(preview)?,
            export: build_export_settings(export)?,
            browser: build_browser_settings(browser),
            renderers: RendererSettings {
                ignored: renderers.ignored.unwrap_or_default(),
            },
            watch: build_watch_settings(watch)?,
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
        .map_err(|reason| LoadError::invalid("server.host", reason))?;

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

fn build_preview_settings(preview: RawPreviewSettings) -> Result<PreviewSettings, LoadError> {
    let defaults = PreviewSettings::default();

    let polling_ms = preview
        .ajax_polling_interval_ms
        .unwrap_or(DEFAULT_POLLING_INTERVAL_MS);
    if polling_ms == 0 {
        return Err(LoadError::invalid(
            "preview.ajax_polling_interval_ms",
            "must be greater than zero",
        ));
    }

    let dispatch = match preview.dispatch {
        Some(mode) => DispatchMode::from_str(&mode)
            .map_err(|reason| LoadError::invalid("preview.dispatch", reason))?,
        None => defaults.dispatch,
    };

    Ok(PreviewSettings {
        refresh_on_modified: preview
            .refresh_on_modified
            .unwrap_or(defaults.refresh_on_modified),
        refresh_on_modified_delay: preview
            .refresh_on_modified_delay_ms
            .map(Duration::from_millis)
            .unwrap_or(defaults.refresh_on_modified_delay),
        refresh_on_saved: preview
            .refresh_on_saved
            .unwrap_or(defaults.refresh_on_saved),
        ajax_polling_interval: Duration::from_millis(polling_ms),
        dispatch,
    })
}

fn build_export_settings(export: RawExportSettings) -> Result<ExportSettings, LoadError> {
    let target_folder = match export.target_folder {
        Some(value) => {
            let trimmed = value.trim();
            (!trimmed.is_empty()).then(|| PathBuf::from(trimmed))
        }
        None => Some(PathBuf::from(DEFAULT_EXPORT_TARGET_FOLDER)),
    };

    let timestamp_format = export
        .timestamp_format
        .unwrap_or_else(|| DEFAULT_TIMESTAMP_FORMAT.to_string());
    validate_strftime(&timestamp_format)
        .map_err(|reason| LoadError::invalid("export.timestamp_format", reason))?;

    Ok(ExportSettings {
        target_folder,
        timestamp_format,
        copy_to_clipboard: export.copy_to_clipboard.unwrap_or(false),
        open_after_exporting: export.open_after_exporting.unwrap_or(false),
    })
}

fn build_browser_settings(browser: RawBrowserSettings) -> BrowserSettings {
    let command = browser
        .command
        .unwrap_or_default()
        .into_iter()
        .filter(|arg| !arg.trim().is_empty())
        .collect();
    BrowserSettings { command }
}

fn build_watch_settings(watch: RawWatchSettings) -> Result<WatchSettings, LoadError> {
    let interval_ms = watch.interval_ms.unwrap_or(DEFAULT_WATCH_INTERVAL_MS);
    if interval_ms == 0 {
        return Err(LoadError::invalid(
            "watch.interval_ms",
            "must be greater than zero",
        ));
    }

    Ok(WatchSettings {
        enabled: watch.enabled.unwrap_or(true),
        interval: Duration::from_millis(interval_ms),
    })
}

/// chrono panics while formatting an invalid specifier, so reject it up front.
fn validate_strftime(format: &str) -> Result<(), String> {
    if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
        Err(format!("`{format}` is not a valid strftime format"))
    } else {
        Ok(())
    }
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
struct RawPreviewSettings {
    refresh_on_modified: Option<bool>,
    refresh_on_modified_delay_ms: Option<u64>,
    refresh_on_saved: Option<bool>,
    ajax_polling_interval_ms: Option<u64>,
    dispatch: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawExportSettings {
    target_folder: Option<String>,
    timestamp_format: Option<String>,
    copy_to_clipboard: Option<bool>,
    open_after_exporting: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawBrowserSettings {
    command: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRendererSettings {
    ignored: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawWatchSettings {
    enabled: Option<bool>,
    interval_ms: Option<u64>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    };
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
