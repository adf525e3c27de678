//! Serial monitor command.
//!
//! Read-only: device output goes to stdout, status lines to stderr.

use std::io;

use anyhow::{Context, Result};
use console::style;
use log::debug;
use ubootflash::{AbortSignal, MonitorSession, SerialConfig};

use crate::Cli;

/// Stream console output from `port` until Ctrl-C.
pub(crate) fn cmd_monitor(
    cli: &Cli,
    port: &str,
    baud: u32,
    raw: bool,
    abort: &AbortSignal,
) -> Result<()> {
    if !cli.quiet {
        eprintln!(
            "{} Monitoring {} at {baud} baud",
            style("📡").cyan(),
            style(port).green()
        );
        eprintln!("{}", style("Press Ctrl-C to exit").dim());
    }

    let mut monitor = MonitorSession::open(&SerialConfig::new(port, baud), abort.clone())
        .with_context(|| format!("Failed to open {port}"))?;
    if raw {
        monitor = monitor.raw();
    }

    let received = monitor.run(io::stdout().lock())?;
    debug!("Monitor received {received} bytes");

    if !cli.quiet {
        eprintln!();
        eprintln!("{} Monitor closed", style("✓").green());
    }
    Ok(())
}
