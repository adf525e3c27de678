//! `load` command: loady, save to flash, reset.

use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::Duration;
use ubootflash::{
    AbortSignal, Error, ErrorKind, Pattern, SerialConfig, Session, SessionConfig, SessionError,
    SessionObserver, SessionReport, SessionState, TransferRequest,
};

use crate::config::Config;
use crate::{Cli, CliError, LoadArgs, baud_rate, get_port, use_fancy_output};

/// Interval between wake-up line terminators with `--wake`.
const WAKE_INTERVAL: Duration = Duration::from_secs(1);

/// Layer command-line overrides on top of the configured session settings.
pub(crate) fn apply_overrides(
    args: &LoadArgs,
    mut session: SessionConfig,
) -> ubootflash::Result<SessionConfig> {
    if let Some(ref prompt) = args.prompt {
        session = session.with_prompt(Pattern::parse(prompt)?);
    }
    if let Some(ref banner) = args.ready_banner {
        session = session.with_ready_banner(Pattern::parse(banner)?);
    }
    if let Some(ref banner) = args.reset_banner {
        session = session.with_reset_banner(Pattern::parse(banner)?);
    }
    if let Some(ref banner) = args.error_banner {
        let banner = if banner.is_empty() {
            None
        } else {
            Some(Pattern::parse(banner)?)
        };
        session = session.with_error_banner(banner);
    }
    if let Some(ref template) = args.load_command {
        session = session.with_load_command(template);
    }
    if let Some(ref template) = args.save_command {
        session = session.with_save_command(template);
    }
    if let Some(ref template) = args.reset_command {
        session = session.with_reset_command(template);
    }
    if args.inspect_command.is_some() {
        session = session.with_inspect_command(args.inspect_command.clone());
    }
    if args.wake {
        session = session.with_wake_interval(Some(WAKE_INTERVAL));
    }
    if let Some(secs) = args.prompt_timeout {
        session = session.with_prompt_timeout(Duration::from_secs(secs));
    }
    if let Some(secs) = args.save_timeout {
        session = session.with_save_timeout(Duration::from_secs(secs));
    }
    if args.no_size_check {
        session = session.with_verify_size(false);
    }

    let mut ymodem = session.ymodem.clone();
    if let Some(block_size) = args.block_size {
        ymodem.block_size = block_size;
    }
    if let Some(retries) = args.retries {
        ymodem.max_retries = retries;
    }
    if let Some(secs) = args.transfer_timeout {
        ymodem.start_timeout = Duration::from_secs(secs);
    }
    Ok(session.with_ymodem(ymodem))
}

fn describe(state: SessionState) -> &'static str {
    match state {
        SessionState::Disconnected => "Port open",
        SessionState::AwaitingPrompt => "Waiting for the bootloader prompt",
        SessionState::LoadCommandSent => "Load command sent",
        SessionState::TransferInProgress => "Sending image",
        SessionState::TransferComplete => "Transfer complete",
        SessionState::SaveCommandSent => "Saving to flash",
        SessionState::Verified => "Flash write confirmed",
        SessionState::ResetIssued => "Board reset",
        SessionState::Failed => "Failed",
    }
}

/// Step lines and a transfer progress bar on stderr.
struct ConsoleObserver {
    pb: ProgressBar,
    show_steps: bool,
}

impl ConsoleObserver {
    fn new(show_steps: bool, fancy: bool) -> Self {
        let pb = if show_steps && fancy {
            let pb = ProgressBar::new(0);
            #[allow(clippy::unwrap_used)] // Static template string
            pb.set_style(
                ProgressStyle::default_bar()
                    .template(
                        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}",
                    )
                    .unwrap()
                    .progress_chars("#>-"),
            );
            pb.set_draw_target(ProgressDrawTarget::stderr());
            pb
        } else {
            ProgressBar::hidden()
        };
        Self { pb, show_steps }
    }
}

impl SessionObserver for ConsoleObserver {
    fn on_state(&mut self, state: SessionState) {
        match state {
            SessionState::TransferComplete => self
                .pb
                .finish_with_message("done"),
            SessionState::Failed => self
                .pb
                .abandon(),
            _ => {},
        }
        if self.show_steps && state != SessionState::Failed {
            self.pb
                .suspend(|| eprintln!("{} {}", style("→").cyan(), describe(state)));
        }
    }

    fn on_progress(&mut self, sent: usize, total: usize) {
        self.pb
            .set_length(total as u64);
        self.pb
            .set_position(sent as u64);
    }
}

/// JSON object for a failed run, whatever stage it failed in.
fn failure_json(err: &anyhow::Error) -> serde_json::Value {
    let (state, kind) = failure_origin(err);
    serde_json::json!({
        "ok": false,
        "state": state,
        "kind": kind,
        "error": format!("{err:#}"),
    })
}

fn failure_origin(err: &anyhow::Error) -> (SessionState, serde_json::Value) {
    for cause in err.chain() {
        if let Some(session) = cause.downcast_ref::<SessionError>() {
            return (session.state, serde_json::json!(session.kind()));
        }
        if let Some(lib) = cause.downcast_ref::<Error>() {
            return (SessionState::Disconnected, serde_json::json!(lib.kind()));
        }
        if let Some(cli) = cause.downcast_ref::<CliError>() {
            let kind = match cli {
                CliError::Usage(_) => "usage",
                CliError::Cancelled(_) => "cancelled",
            };
            return (SessionState::Disconnected, serde_json::json!(kind));
        }
        if cause
            .downcast_ref::<std::io::Error>()
            .is_some()
        {
            return (SessionState::Disconnected, serde_json::json!(ErrorKind::Io));
        }
    }
    (SessionState::Disconnected, serde_json::json!("error"))
}

fn success_json(report: &SessionReport) -> Result<serde_json::Value> {
    let mut value = serde_json::to_value(report)?;
    if let serde_json::Value::Object(ref mut map) = value {
        map.insert("ok".into(), serde_json::Value::Bool(true));
    }
    Ok(value)
}

fn print_summary(report: &SessionReport) {
    eprintln!(
        "\n{} Flashed {} ({} bytes) to 0x{:x} in {:.1}s",
        style("🎉")
            .green()
            .bold(),
        style(&report.file).cyan(),
        report.bytes_sent,
        report.save_addr,
        Duration::from_millis(report.elapsed_ms).as_secs_f64()
    );
    if report.retries > 0 {
        eprintln!(
            "  {} {} block resends",
            style("⚠").yellow(),
            report.retries
        );
    }
    if let Some(ref output) = report.inspect_output {
        eprintln!("{}", style("Inspect output:").bold());
        for line in output.lines() {
            eprintln!("  {line}");
        }
    }
}

/// Run a full load/save/reset session.
///
/// With `--json`, exactly one object is printed on stdout, success or not.
pub(crate) fn cmd_load(
    cli: &Cli,
    config: &mut Config,
    args: &LoadArgs,
    abort: &AbortSignal,
) -> Result<()> {
    let outcome = run_load(cli, config, args, abort);
    if args.json {
        match &outcome {
            Ok((report, ..)) => println!("{}", success_json(report)?),
            Err(err) => println!("{}", failure_json(err)),
        }
    }
    let (report, port, baud) = outcome?;

    if !cli.quiet && !args.json {
        print_summary(&report);
    }
    if args.monitor {
        crate::commands::monitor::cmd_monitor(cli, &port, baud, false, abort)?;
    }
    Ok(())
}

fn run_load(
    cli: &Cli,
    config: &mut Config,
    args: &LoadArgs,
    abort: &AbortSignal,
) -> Result<(SessionReport, String, u32)> {
    let session_config = apply_overrides(args, config.session_config()?)?;

    let request = match args.size {
        Some(size) => TransferRequest::new(&args.file, args.load_addr, args.save_addr, size),
        None => TransferRequest::for_file(&args.file, args.load_addr, args.save_addr)
            .with_context(|| format!("Failed to read {}", args.file.display()))?,
    };

    let human = !cli.quiet && !args.json;
    if human {
        eprintln!(
            "{} {} -> RAM 0x{:x}, flash 0x{:x}, 0x{:x} bytes",
            style("📦").cyan(),
            request
                .file()
                .display(),
            request.load_addr(),
            request.save_addr(),
            request.size()
        );
    }

    let port = get_port(cli, config)?;
    let baud = baud_rate(cli, config);
    if human {
        eprintln!(
            "{} Using {} at {baud} baud",
            style("🔌").cyan(),
            style(&port).green()
        );
    }

    let mut session = Session::open(&SerialConfig::new(&port, baud), session_config, abort.clone())?;
    let mut observer = ConsoleObserver::new(human, use_fancy_output());
    let report = session.run_with(&request, &mut observer)?;
    Ok((report, port, baud))
}
