use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the livemark binary.
#[derive(Debug, Parser)]
#[command(
    name = "livemark",
    version,
    about = "Live browser preview for Markdown and other markup documents"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "LIVEMARK_CONFIG_FILE",
        value_name = "PATH",
        value_hint = ValueHint::FilePath
    )]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the preview server, optionally opening and watching files.
    Serve(ServeArgs),
    /// Render a document to a standalone HTML file.
    Export(ExportArgs),
    /// Render a document and print the HTML fragment to stdout.
    Render(RenderArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct LoggingOverrides {
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
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,

    /// Files to open for preview.
    #[arg(value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub files: Vec<PathBuf>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub logging: LoggingOverrides,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the delay before re-rendering after an edit.
    #[arg(long = "refresh-delay-ms", value_name = "MILLIS")]
    pub refresh_on_modified_delay_ms: Option<u64>,

    /// Where debounced renders run (inline|runtime).
    #[arg(long = "dispatch", value_name = "MODE")]
    pub dispatch: Option<String>,

    /// Toggle polling of opened files for changes.
    #[arg(
        long = "watch",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub watch_enabled: Option<bool>,

    /// Open each file in the browser once the server is up.
    #[arg(long = "open", action = clap::ArgAction::SetTrue)]
    pub open: bool,
}

#[derive(Debug, Args, Clone)]
pub struct ExportArgs {
    #[command(flatten)]
    pub logging: LoggingOverrides,

    /// Document to export.
    #[arg(value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub file: PathBuf,

    /// Write to this path instead of the computed export location.
    #[arg(long, short = 'o', value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub output: Option<PathBuf>,

    /// Override the export target folder.
    #[arg(long = "target-folder", value_name = "DIR", value_hint = ValueHint::DirPath)]
    pub target_folder: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct RenderArgs {
    #[command(flatten)]
    pub logging: LoggingOverrides,

    /// Document to render.
    #[arg(value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub file: PathBuf,

    /// Syntax scope to match renderers against, e.g. `text.html.markdown`.
    #[arg(long, value_name = "SCOPE")]
    pub syntax: Option<String>,
}
