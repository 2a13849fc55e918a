//! Host log setup for the `wasmgo` binary.
//!
//! Each knob is taken from its command-line flag, then its `WASMGO_LOG_*`
//! variable, then the default (`auto`, `warn`).

use std::env;
use std::io::IsTerminal;

use clap::ValueEnum;
use tracing_subscriber::EnvFilter;

const FORMAT_VAR: &str = "WASMGO_LOG_FORMAT";
const LEVEL_VAR: &str = "WASMGO_LOG_LEVEL";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[clap(rename_all = "kebab_case")]
pub enum LogFormat {
    /// Text on a terminal, JSON otherwise.
    Auto,
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
#[clap(rename_all = "kebab_case")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// The `EnvFilter` directive for this level.
    fn directive(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Logging as the flags asked for it; `None` defers to the environment.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSettings {
    pub format: Option<LogFormat>,
    pub level: Option<LogLevel>,
}

impl LogSettings {
    pub fn merged_with_env(self) -> LogOptions {
        self.merged_with(|name| env::var(name).ok())
    }

    fn merged_with(self, lookup: impl Fn(&str) -> Option<String>) -> LogOptions {
        LogOptions {
            format: self
                .format
                .or_else(|| from_var(&lookup, FORMAT_VAR))
                .unwrap_or(LogFormat::Auto),
            level: self
                .level
                .or_else(|| from_var(&lookup, LEVEL_VAR))
                .unwrap_or(LogLevel::Warn),
        }
    }
}

/// Unparseable values are ignored: no subscriber exists yet to report them.
fn from_var<T: ValueEnum>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    T::from_str(lookup(name)?.trim(), true).ok()
}

/// Fully resolved logging configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogOptions {
    pub format: LogFormat,
    pub level: LogLevel,
}

impl LogOptions {
    fn for_stderr(self, stderr_is_terminal: bool) -> Self {
        let format = match self.format {
            LogFormat::Auto if stderr_is_terminal => LogFormat::Text,
            LogFormat::Auto => LogFormat::Json,
            other => other,
        };
        Self { format, ..self }
    }
}

/// Install the global subscriber on stderr, leaving stdout to the guest.
/// `RUST_LOG`, when set, replaces the level filter.
pub fn init(options: LogOptions) {
    let stderr_is_terminal = std::io::stderr().is_terminal();
    let options = options.for_stderr(stderr_is_terminal);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(options.level.directive()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(stderr_is_terminal && env::var_os("NO_COLOR").is_none())
        .with_target(true);

    // Already installed (tests, embedding): keep the existing subscriber.
    let _ = match options.format {
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish()),
        _ => tracing::subscriber::set_global_default(builder.compact().finish()),
    };
    tracing::debug!(
        target: "wasmgo::cli",
        format = ?options.format,
        level = options.level.directive(),
        "logging initialised"
    );
}
