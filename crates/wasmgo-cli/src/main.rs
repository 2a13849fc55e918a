//! `wasmgo`: run or inspect a `syscall/js` WebAssembly guest.

mod logging;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use wasmgo_bridge::{Bridge, BridgeRegistry, ModuleSummary};
use wasmgo_types::BridgeConfig;

use crate::logging::{LogFormat, LogLevel, LogSettings};

#[derive(Parser, Debug)]
#[command(name = "wasmgo")]
#[command(about = "Host for WebAssembly guests built against the syscall/js ABI")]
#[command(version)]
struct Cli {
    /// Log verbosity. Overrides WASMGO_LOG_LEVEL.
    #[arg(long, global = true, value_enum)]
    log_level: Option<LogLevel>,

    /// Log format. Overrides WASMGO_LOG_FORMAT.
    #[arg(long, global = true, value_enum)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a guest until it exits or the process is signalled.
    Run(RunArgs),
    /// Print a JSON summary of a module's imports, exports, and digest.
    Inspect {
        module: PathBuf,
    },
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    module: PathBuf,

    /// JSON bridge config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Registry name for the bridge.
    #[arg(long)]
    name: Option<String>,

    /// `navigator.userAgent` seen by the guest.
    #[arg(long)]
    user_agent: Option<String>,

    /// `document.cookie` seen by the guest.
    #[arg(long)]
    cookie: Option<String>,
}

impl RunArgs {
    /// The config file (or defaults), with command-line flags on top.
    fn bridge_config(&self) -> Result<BridgeConfig> {
        let mut config = match &self.config {
            Some(path) => BridgeConfig::from_json_file(path)
                .with_context(|| format!("load config {}", path.display()))?,
            None => BridgeConfig::default(),
        };
        if let Some(name) = &self.name {
            anyhow::ensure!(!name.trim().is_empty(), "--name must not be empty");
            config.name = name.clone();
        }
        if let Some(user_agent) = &self.user_agent {
            config.user_agent = user_agent.clone();
        }
        if let Some(cookie) = &self.cookie {
            config.cookie = cookie.clone();
        }
        Ok(config)
    }
}

fn main() -> ExitCode {
    match try_main() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("wasmgo: {err:#}");
            ExitCode::from(2)
        }
    }
}

fn try_main() -> Result<ExitCode> {
    let cli = Cli::parse();
    logging::init(
        LogSettings {
            format: cli.log_format,
            level: cli.log_level,
        }
        .merged_with_env(),
    );

    match cli.command {
        Command::Run(args) => run(&args),
        Command::Inspect { module } => inspect(&module),
    }
}

fn run(args: &RunArgs) -> Result<ExitCode> {
    let config = args.bridge_config()?;
    let registry = BridgeRegistry::new();

    // Before any other thread exists, so every thread inherits the mask.
    #[cfg(unix)]
    let _watcher = wasmgo_bridge::SignalWatcher::install(registry.clone())
        .context("install signal watcher")?;

    let mut bridge = Bridge::from_file(&registry, &config, &args.module)
        .with_context(|| format!("load guest {}", args.module.display()))?;
    let exit = bridge
        .run()
        .with_context(|| format!("run guest {}", args.module.display()))?;
    info!(target: "wasmgo::cli", bridge = %bridge.name(), %exit, "done");
    Ok(ExitCode::from(status_byte(exit.exit_status())))
}

fn inspect(module: &Path) -> Result<ExitCode> {
    let bytes =
        std::fs::read(module).with_context(|| format!("read module {}", module.display()))?;
    let summary = ModuleSummary::parse(&bytes)
        .with_context(|| format!("parse module {}", module.display()))?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(match summary.preflight() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("wasmgo: {err}");
            ExitCode::FAILURE
        }
    })
}

/// Process status as the shell would see it: the low 8 bits.
fn status_byte(status: i32) -> u8 {
    (status & 0xff) as u8
}
