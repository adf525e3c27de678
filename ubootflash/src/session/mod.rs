//! U-Boot load/save/reset session.
//!
//! A [`Session`] owns the transport and walks the bootloader through one
//! firmware update:
//!
//! ```text
//! Disconnected -> AwaitingPrompt -> LoadCommandSent -> TransferInProgress
//!   -> TransferComplete -> SaveCommandSent -> Verified -> ResetIssued
//!
//! any state --(timeout, error banner, abort, I/O)--> Failed
//! ```
//!
//! There are no retries across steps. The port is closed on every exit path.
//!
//! ## Example
//!
//! ```rust,no_run
//! use ubootflash::{AbortSignal, SerialConfig, Session, SessionConfig, TransferRequest};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let request = TransferRequest::for_file("u-boot.itb", 0x8200_0000, 0x10_0000)?;
//!     let serial = SerialConfig::new("/dev/ttyUSB0", 115200);
//!     let mut session = Session::open(&serial, SessionConfig::default(), AbortSignal::new())?;
//!     let report = session.run(&request)?;
//!     println!("{} bytes in {} ms", report.bytes_sent, report.elapsed_ms);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod request;
pub mod state;

use std::sync::LazyLock;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use regex::Regex;

use crate::abort::AbortSignal;
use crate::error::{Error, Result, SessionError};
use crate::port::Port;
#[cfg(feature = "native")]
use crate::port::{NativePort, SerialConfig};
use crate::prompt::{Pattern, PromptMatcher};
use crate::protocol::ymodem::{TransferStats, YmodemSender};
use crate::transport::Transport;

pub use config::SessionConfig;
pub use request::TransferRequest;
pub use state::SessionState;

/// Line printed by `loady` after a completed transfer.
#[allow(clippy::unwrap_used)]
static TOTAL_SIZE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Total Size\s*=\s*0x[0-9a-fA-F]+\s*=\s*(\d+)\s*Bytes").unwrap()
});

/// How long to wait for the rest of an error line.
const ERROR_DETAIL_TIMEOUT: Duration = Duration::from_millis(200);

/// Callbacks for UIs.
///
/// Both methods default to no-ops.
pub trait SessionObserver {
    /// Called after every state transition, including into `Failed`.
    fn on_state(&mut self, _state: SessionState) {}

    /// Called after every acknowledged data block.
    fn on_progress(&mut self, _sent: usize, _total: usize) {}
}

impl SessionObserver for () {}

/// Summary of a successful session.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct SessionReport {
    /// Port the session ran on.
    pub port: String,
    /// File name sent in the YMODEM header.
    pub file: String,
    /// RAM load address.
    pub load_addr: u64,
    /// Flash save address.
    pub save_addr: u64,
    /// Byte count given to the save command.
    pub size: u64,
    /// States visited, in order.
    pub states: Vec<SessionState>,
    /// Payload bytes acknowledged by the bootloader.
    pub bytes_sent: usize,
    /// Data packets acknowledged.
    pub packets: usize,
    /// YMODEM resends.
    pub retries: u32,
    /// Wall time from start to reset acknowledgment.
    pub elapsed_ms: u64,
    /// Console output of the inspect command, if one ran.
    pub inspect_output: Option<String>,
}

/// A single load/save/reset run over an exclusively owned port.
pub struct Session<P: Port> {
    transport: Transport<P>,
    matcher: PromptMatcher,
    config: SessionConfig,
    state: SessionState,
    visited: Vec<SessionState>,
}

#[cfg(feature = "native")]
impl Session<NativePort> {
    /// Open the serial port and prepare a session.
    ///
    /// Fails with `Connection` when the port is missing or already held.
    pub fn open(serial: &SerialConfig, config: SessionConfig, abort: AbortSignal) -> Result<Self> {
        info!(
            "Opening {} at {} baud",
            serial.port_name, serial.baud_rate
        );
        let port = NativePort::open(serial)?;
        Self::new(port, config, abort)
    }
}

impl<P: Port> Session<P> {
    /// Prepare a session over an already opened port.
    pub fn new(port: P, config: SessionConfig, abort: AbortSignal) -> Result<Self> {
        Ok(Self {
            transport: Transport::new(port, abort)?,
            matcher: PromptMatcher::new(),
            config,
            state: SessionState::Disconnected,
            visited: vec![SessionState::Disconnected],
        })
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// States visited so far, in order.
    pub fn visited(&self) -> &[SessionState] {
        &self.visited
    }

    /// Dialogue settings.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The transport (closed once the session ended).
    pub fn transport(&self) -> &Transport<P> {
        &self.transport
    }

    /// Cancellation signal shared with the transport.
    pub fn abort_signal(&self) -> &AbortSignal {
        self.transport
            .abort_signal()
    }

    /// Run the session without callbacks.
    pub fn run(&mut self, request: &TransferRequest) -> std::result::Result<SessionReport, SessionError> {
        self.run_with(request, &mut ())
    }

    /// Run the session to `ResetIssued` or `Failed`.
    ///
    /// The port is closed before this returns, whatever the outcome.
    pub fn run_with(
        &mut self,
        request: &TransferRequest,
        observer: &mut dyn SessionObserver,
    ) -> std::result::Result<SessionReport, SessionError> {
        if self.state != SessionState::Disconnected {
            return Err(SessionError {
                state: self.state,
                error: Error::Config("a session runs only once".into()),
            });
        }

        let started = Instant::now();
        let result = self.drive(request, observer);
        let closed = self
            .transport
            .close();

        match result {
            Ok((stats, inspect_output)) => {
                if let Err(e) = closed {
                    warn!("Failed to close {}: {e}", self.transport.name());
                }
                info!("Session finished in {:.1}s", started.elapsed().as_secs_f64());
                Ok(SessionReport {
                    port: self
                        .transport
                        .name()
                        .to_string(),
                    file: request.file_name(),
                    load_addr: request.load_addr(),
                    save_addr: request.save_addr(),
                    size: request.size(),
                    states: self
                        .visited
                        .clone(),
                    bytes_sent: stats.bytes_sent,
                    packets: stats.packets,
                    retries: stats.retries,
                    elapsed_ms: u64::try_from(
                        started
                            .elapsed()
                            .as_millis(),
                    )
                    .unwrap_or(u64::MAX),
                    inspect_output,
                })
            },
            Err(error) => {
                let failed_in = self.state;
                warn!("{failed_in} step failed: {error}");
                self.enter(SessionState::Failed, observer);
                Err(SessionError {
                    state: failed_in,
                    error,
                })
            },
        }
    }

    fn enter(&mut self, state: SessionState, observer: &mut dyn SessionObserver) {
        debug_assert!(!self.state.is_terminal(), "left terminal state {}", self.state);
        debug!("{} -> {}", self.state, state);
        self.state = state;
        self.visited
            .push(state);
        observer.on_state(state);
    }

    /// Check for cancellation, then move to the next state.
    fn advance(&mut self, state: SessionState, observer: &mut dyn SessionObserver) -> Result<()> {
        debug_assert_eq!(self.state.next(), Some(state), "skipped a state");
        self.transport
            .abort_signal()
            .check()?;
        self.enter(state, observer);
        Ok(())
    }

    fn drive(
        &mut self,
        request: &TransferRequest,
        observer: &mut dyn SessionObserver,
    ) -> Result<(TransferStats, Option<String>)> {
        // Nothing is written before the request and templates are known good.
        let payload = request.load_payload()?;
        let baud = self
            .transport
            .baud_rate();
        let commands = self
            .config
            .render_commands(request, baud)?;
        let terminator = self
            .config
            .line_terminator
            .clone();

        self.advance(SessionState::AwaitingPrompt, observer)?;
        self.await_prompt()?;
        info!("Bootloader prompt detected");

        self.transport
            .send_line(&commands.load, &terminator)?;
        self.advance(SessionState::LoadCommandSent, observer)?;
        let banner = self
            .config
            .ready_banner
            .clone();
        self.expect_checked(&banner, self.config.command_timeout)?;
        // Rest of the banner line, so the receiver's 'C' is the next byte.
        self.matcher
            .skip_line(
                &mut self.transport,
                self.config
                    .ymodem
                    .char_timeout,
            )?;

        self.advance(SessionState::TransferInProgress, observer)?;
        info!(
            "Sending {} ({} bytes) to 0x{:x}",
            request.file_name(),
            payload.len(),
            request.load_addr()
        );
        let stats = YmodemSender::with_config(
            &mut self.transport,
            self.config
                .ymodem
                .clone(),
        )
        .send(&request.file_name(), &payload, |sent, total| {
            observer.on_progress(sent, total);
        })?;

        self.advance(SessionState::TransferComplete, observer)?;
        let prompt = self
            .config
            .prompt
            .clone();
        let summary = self.expect_checked(&prompt, self.config.prompt_timeout)?;
        self.verify_size(&summary, payload.len())?;

        let inspect_output = match &commands.inspect {
            Some(inspect) => {
                self.transport
                    .send_line(inspect, &terminator)?;
                let output = self.expect_checked(&prompt, self.config.command_timeout)?;
                Some(strip_echo(&output, inspect))
            },
            None => None,
        };

        info!(
            "Saving 0x{:x} bytes to 0x{:x}",
            request.size(),
            request.save_addr()
        );
        self.transport
            .send_line(&commands.save, &terminator)?;
        self.advance(SessionState::SaveCommandSent, observer)?;
        self.expect_checked(&prompt, self.config.save_timeout)?;
        self.advance(SessionState::Verified, observer)?;

        self.transport
            .send_line(&commands.reset, &terminator)?;
        let reset_banner = self
            .config
            .reset_banner
            .clone();
        self.expect_checked(&reset_banner, self.config.command_timeout)?;
        self.advance(SessionState::ResetIssued, observer)?;
        info!("Reset acknowledged");

        Ok((stats, inspect_output))
    }

    /// Wait for the first prompt, optionally poking the console.
    fn await_prompt(&mut self) -> Result<()> {
        let timeout = self
            .config
            .prompt_timeout;
        let Some(interval) = self
            .config
            .wake_interval
        else {
            self.matcher
                .expect(&mut self.transport, &self.config.prompt, timeout)?;
            return Ok(());
        };

        self.transport
            .discard_input()?;
        let start = Instant::now();
        loop {
            let remaining = timeout.saturating_sub(start.elapsed());
            if remaining.is_zero() {
                return Err(Error::Timeout(format!(
                    "no {} within {} ms",
                    self.config
                        .prompt,
                    timeout.as_millis()
                )));
            }
            self.transport
                .send_line("", &self.config.line_terminator)?;
            match self
                .matcher
                .expect(&mut self.transport, &self.config.prompt, remaining.min(interval))
            {
                Ok(_) => return Ok(()),
                Err(Error::Timeout(_)) => debug!("No prompt yet, waking console again"),
                Err(e) => return Err(e),
            }
        }
    }

    /// Wait for `pattern`, failing early on the error banner.
    fn expect_checked(&mut self, pattern: &Pattern, timeout: Duration) -> Result<String> {
        let mut patterns = vec![pattern];
        if let Some(banner) = self
            .config
            .error_banner
            .as_ref()
        {
            patterns.push(banner);
        }

        let found = self
            .matcher
            .expect_any(&mut self.transport, &patterns, timeout)?;
        if found.index == 0 {
            return Ok(found.text);
        }

        let detail = self
            .matcher
            .expect(
                &mut self.transport,
                &Pattern::literal("\n"),
                ERROR_DETAIL_TIMEOUT,
            )
            .unwrap_or_default();
        Err(Error::Protocol(format!(
            "bootloader reported: {}{}",
            found.text.trim_start(),
            detail.trim_end()
        )))
    }

    fn verify_size(&self, summary: &str, expected: usize) -> Result<()> {
        if !self
            .config
            .verify_size
        {
            return Ok(());
        }
        match reported_size(summary) {
            Some(reported) if reported != expected => Err(Error::Protocol(format!(
                "bootloader received {reported} bytes, expected {expected}"
            ))),
            Some(reported) => {
                debug!("Bootloader confirmed {reported} bytes");
                Ok(())
            },
            None => {
                debug!("No size report after transfer");
                Ok(())
            },
        }
    }
}

/// Byte count from a `## Total Size = 0x... = N Bytes` line.
pub fn reported_size(text: &str) -> Option<usize> {
    TOTAL_SIZE
        .captures(text)?
        .get(1)?
        .as_str()
        .parse()
        .ok()
}

/// Drop the echoed command and the trailing prompt from console output.
fn strip_echo(output: &str, command: &str) -> String {
    let body = output
        .trim_start()
        .strip_prefix(command)
        .unwrap_or(output);
    let body = match body.rfind('\n') {
        Some(end) => &body[..end],
        None => body,
    };
    body.trim()
        .to_string()
}
