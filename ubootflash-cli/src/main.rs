//! ubootflash CLI - load firmware through a U-Boot console and save it to flash.
//!
//! ## Features
//!
//! - YMODEM `loady` transfer with progress display
//! - Configurable prompts, banners and command templates
//! - Interactive serial port selection
//! - Serial monitor after reset
//! - Shell completion generation
//! - Environment variable and config file support

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use log::debug;
use ubootflash::{AbortSignal, BlockSize, ErrorKind, SessionError};

mod commands;
mod config;
mod serial;

use config::Config;
use serial::{SerialOptions, ask_remember_port, select_serial_port};

/// Binary name, used for completions and messages.
pub(crate) const BIN_NAME: &str = "ubootflash";

/// Baud rate used when neither flags, env nor config name one.
pub(crate) const DEFAULT_BAUD: u32 = 115_200;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Check if emoji/animations should be used (TTY and colors enabled).
pub(crate) fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

const EXAMPLES: &str = "\
Examples:
  ubootflash load u-boot.itb --load-addr 0x82000000 --save-addr 0x100000
  ubootflash -p /dev/ttyUSB0 load rootfs.bin --load-addr 0x82000000 --save-addr 0x400000 --size 0x800000
  ubootflash list-ports --json";

/// ubootflash - Load firmware through a U-Boot serial console and save it to flash.
///
/// Environment variables:
///   UBOOTFLASH_PORT              - Default serial port
///   UBOOTFLASH_BAUD              - Default baud rate (default: 115200)
///   UBOOTFLASH_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = BIN_NAME)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[command(after_help = EXAMPLES)]
#[allow(clippy::struct_excessive_bools)]
pub(crate) struct Cli {
    /// Serial port to use (auto-detected if not specified).
    #[arg(short, long, global = true, env = "UBOOTFLASH_PORT")]
    pub(crate) port: Option<String>,

    /// Console baud rate [default: 115200].
    #[arg(short, long, global = true, env = "UBOOTFLASH_BAUD")]
    pub(crate) baud: Option<u32>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub(crate) verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    pub(crate) quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "UBOOTFLASH_NON_INTERACTIVE")]
    pub(crate) non_interactive: bool,

    /// Confirm port selection even for auto-detected ports.
    #[arg(long, global = true)]
    pub(crate) confirm_port: bool,

    /// Offer all ports for selection (including unrecognised ones).
    #[arg(long, global = true)]
    pub(crate) list_all_ports: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    pub(crate) config_path: Option<PathBuf>,

    #[command(subcommand)]
    pub(crate) command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Load a file with `loady`, save it to flash and reset the board.
    Load(LoadArgs),

    /// List available serial ports.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Stream console output until Ctrl-C.
    Monitor {
        /// Pass control characters through untouched.
        #[arg(long)]
        raw: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type for completions (auto-detected if not specified with --install).
        #[arg(value_enum)]
        shell: Option<Shell>,

        /// Automatically install completions to your shell configuration.
        #[arg(long)]
        install: bool,
    },
}

/// Arguments of `load`.
#[derive(Args, Debug)]
#[allow(clippy::struct_excessive_bools)]
pub(crate) struct LoadArgs {
    /// Firmware image to send.
    pub(crate) file: PathBuf,

    /// RAM address `loady` loads to (hex).
    #[arg(long, value_parser = parse_hex_u64)]
    pub(crate) load_addr: u64,

    /// Flash address the image is saved at (hex).
    #[arg(long, value_parser = parse_hex_u64)]
    pub(crate) save_addr: u64,

    /// Bytes to save (0x hex or decimal; defaults to the file size).
    #[arg(long, value_parser = parse_size)]
    pub(crate) size: Option<u64>,

    /// Bootloader prompt (prefix with `re:` for a regex).
    #[arg(long, value_name = "PAT")]
    pub(crate) prompt: Option<String>,

    /// Banner printed when the bootloader is ready to receive.
    #[arg(long, value_name = "PAT")]
    pub(crate) ready_banner: Option<String>,

    /// Banner printed by the reset command.
    #[arg(long, value_name = "PAT")]
    pub(crate) reset_banner: Option<String>,

    /// Bootloader error banner (empty to disable).
    #[arg(long, value_name = "PAT")]
    pub(crate) error_banner: Option<String>,

    /// Load command template.
    #[arg(long, value_name = "TEMPLATE")]
    pub(crate) load_command: Option<String>,

    /// Save command template.
    #[arg(long, value_name = "TEMPLATE")]
    pub(crate) save_command: Option<String>,

    /// Reset command template.
    #[arg(long, value_name = "TEMPLATE")]
    pub(crate) reset_command: Option<String>,

    /// Command run after the transfer, e.g. `md {load_addr} 8`.
    #[arg(long, value_name = "TEMPLATE")]
    pub(crate) inspect_command: Option<String>,

    /// Press Enter every second until the prompt shows up.
    #[arg(long)]
    pub(crate) wake: bool,

    /// YMODEM block size.
    #[arg(long, value_parser = parse_block_size, value_name = "128|1024")]
    pub(crate) block_size: Option<BlockSize>,

    /// Resends per packet before giving up.
    #[arg(long, value_name = "N")]
    pub(crate) retries: Option<u32>,

    /// Seconds to wait for the first prompt.
    #[arg(long, value_name = "S")]
    pub(crate) prompt_timeout: Option<u64>,

    /// Seconds to wait for the receiver to request the transfer (per-block
    /// acknowledgments keep a 1 s window).
    #[arg(long, value_name = "S")]
    pub(crate) transfer_timeout: Option<u64>,

    /// Seconds to wait for the prompt after the save command.
    #[arg(long, value_name = "S")]
    pub(crate) save_timeout: Option<u64>,

    /// Do not compare the size the bootloader reports with the file.
    #[arg(long)]
    pub(crate) no_size_check: bool,

    /// Open a serial monitor after the reset.
    #[arg(long)]
    pub(crate) monitor: bool,

    /// Print the session report as JSON to stdout.
    #[arg(long)]
    pub(crate) json: bool,
}

/// Errors raised by the CLI itself rather than the library.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Bad arguments or missing setup. Exit code 2.
    #[error("{0}")]
    Usage(String),
    /// The user cancelled. Exit code 130.
    #[error("{0}")]
    Cancelled(String),
}

/// Parse hexadecimal address (supports 0x prefix and underscores).
pub(crate) fn parse_hex_u64(s: &str) -> Result<u64, String> {
    let s = s.trim();
    let s = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    let s: String = s
        .chars()
        .filter(|c| *c != '_')
        .collect();
    u64::from_str_radix(&s, 16).map_err(|e| format!("Invalid hex address: {e}"))
}

/// Parse a byte count: `0x` hex or decimal, underscores allowed.
pub(crate) fn parse_size(s: &str) -> Result<u64, String> {
    let trimmed = s.trim();
    if trimmed.starts_with("0x") || trimmed.starts_with("0X") {
        return parse_hex_u64(trimmed);
    }
    let digits: String = trimmed
        .chars()
        .filter(|c| *c != '_')
        .collect();
    digits
        .parse()
        .map_err(|e| format!("Invalid size '{s}': {e}"))
}

fn parse_block_size(s: &str) -> Result<BlockSize, String> {
    s.trim()
        .parse::<usize>()
        .ok()
        .and_then(BlockSize::from_len)
        .ok_or_else(|| format!("Invalid block size '{s}': expected 128 or 1024"))
}

/// Exit code for a library error class.
fn kind_exit_code(kind: ErrorKind) -> u8 {
    match kind {
        ErrorKind::Config => 2,
        ErrorKind::Connection => 3,
        ErrorKind::Timeout => 4,
        ErrorKind::Protocol => 5,
        ErrorKind::Io => 6,
        ErrorKind::Aborted => 130,
    }
}

/// Map an error chain to the process exit code.
pub(crate) fn exit_code(err: &anyhow::Error) -> u8 {
    for cause in err.chain() {
        if let Some(cli) = cause.downcast_ref::<CliError>() {
            return match cli {
                CliError::Usage(_) => 2,
                CliError::Cancelled(_) => 130,
            };
        }
        if let Some(session) = cause.downcast_ref::<SessionError>() {
            return kind_exit_code(session.kind());
        }
        if let Some(lib) = cause.downcast_ref::<ubootflash::Error>() {
            return kind_exit_code(lib.kind());
        }
        if cause
            .downcast_ref::<std::io::Error>()
            .is_some()
        {
            return 6;
        }
    }
    1
}

/// First Ctrl-C raises the abort signal; a second one exits immediately.
fn install_interrupt_handler(abort: AbortSignal) {
    let result = ctrlc::set_handler(move || {
        if abort.is_aborted() {
            std::process::exit(130);
        }
        abort.abort();
    });
    if let Err(e) = result {
        debug!("Could not install Ctrl-C handler: {e}");
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);
    if std::env::var_os("NO_COLOR").is_some() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "{BIN_NAME} v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    let abort = AbortSignal::new();
    install_interrupt_handler(abort.clone());

    match run(&cli, &abort) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", style("Error:").red().bold());
            ExitCode::from(exit_code(&err))
        },
    }
}

fn run(cli: &Cli, abort: &AbortSignal) -> Result<()> {
    let mut config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::Load(args) => commands::load::cmd_load(cli, &mut config, args, abort),
        Commands::ListPorts { json } => {
            commands::ports::cmd_list_ports(*json, &config);
            Ok(())
        },
        Commands::Monitor { raw } => {
            let port = get_port(cli, &mut config)?;
            commands::monitor::cmd_monitor(cli, &port, baud_rate(cli, &config), *raw, abort)
        },
        Commands::Completions { shell, install } => {
            if *install {
                commands::completions::cmd_completions_install(*shell)
            } else {
                let shell = shell.ok_or_else(|| {
                    CliError::Usage(format!(
                        "specify a shell type, e.g.: {BIN_NAME} completions bash \
                         (or use --install to auto-install)"
                    ))
                })?;
                commands::completions::cmd_completions(shell)
            }
        },
    }
}

/// Baud rate after CLI/env and config layering.
pub(crate) fn baud_rate(cli: &Cli, config: &Config) -> u32 {
    cli.baud
        .or(config
            .port
            .connection
            .baud)
        .unwrap_or(DEFAULT_BAUD)
}

/// Get serial port from CLI args or interactive selection.
pub(crate) fn get_port(cli: &Cli, config: &mut Config) -> Result<String> {
    let options = SerialOptions {
        port: cli
            .port
            .clone(),
        list_all_ports: cli.list_all_ports,
        non_interactive: cli.non_interactive,
        confirm_port: cli.confirm_port,
    };

    let selected = select_serial_port(&options, config)?;

    if !selected.is_known && !cli.non_interactive && cli.port.is_none() {
        ask_remember_port(&selected.port, config)?;
    }

    Ok(selected
        .port
        .name)
}
