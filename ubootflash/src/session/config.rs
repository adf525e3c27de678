//! Bootloader dialogue configuration.
//!
//! Everything the controller says to or expects from the bootloader lives
//! here, so targets with a customised U-Boot (different prompt, `tftp`
//! instead of `loady`, `mmc write` instead of `sf update`) need no code
//! changes.

use std::time::Duration;

use crate::error::{Error, Result};
use crate::prompt::Pattern;
use crate::protocol::ymodem::YmodemConfig;
use crate::session::request::TransferRequest;

/// Default U-Boot prompt.
pub const DEFAULT_PROMPT: &str = "=> ";
/// Printed by `loady` once the receiver is running.
pub const DEFAULT_READY_BANNER: &str = "Ready for binary (ymodem) download";
/// Printed by `reset`.
pub const DEFAULT_RESET_BANNER: &str = "resetting ...";
/// U-Boot command failures: `## Error` banners, `sf`/`mmc` failure text and
/// the "Please run `sf probe'" hint.
pub const DEFAULT_ERROR_BANNER: &str = r"## Error|ERROR|(?i:\bfail)|Please run";
/// Default load command.
pub const DEFAULT_LOAD_COMMAND: &str = "loady {load_addr}";
/// Default save command (SPI flash).
pub const DEFAULT_SAVE_COMMAND: &str = "sf probe; sf update {load_addr} {save_addr} {size}";
/// Default reset command.
pub const DEFAULT_RESET_COMMAND: &str = "reset";

/// Placeholders accepted in command templates.
pub const PLACEHOLDERS: [&str; 4] = ["load_addr", "save_addr", "size", "baud"];

/// Session dialogue settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Bootloader prompt.
    pub prompt: Pattern,
    /// Banner confirming the receiver is ready.
    pub ready_banner: Pattern,
    /// Banner confirming the reset.
    pub reset_banner: Pattern,
    /// Banner that fails the current step when seen.
    pub error_banner: Option<Pattern>,
    /// Load command template.
    pub load_command: String,
    /// Save command template.
    pub save_command: String,
    /// Reset command template.
    pub reset_command: String,
    /// Optional command run between transfer and save, e.g. `md {load_addr}`.
    pub inspect_command: Option<String>,
    /// Appended to every command.
    pub line_terminator: String,
    /// Wait for each prompt.
    pub prompt_timeout: Duration,
    /// Wait for the ready and reset banners.
    pub command_timeout: Duration,
    /// Wait for the prompt after the save command.
    pub save_timeout: Duration,
    /// Send the line terminator at this interval until the first prompt shows.
    pub wake_interval: Option<Duration>,
    /// Compare the bootloader's reported size with the payload length.
    pub verify_size: bool,
    /// YMODEM sender settings.
    pub ymodem: YmodemConfig,
}

#[allow(clippy::unwrap_used)] // Static expression
fn default_error_banner() -> Pattern {
    Pattern::regex(DEFAULT_ERROR_BANNER).unwrap()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            prompt: Pattern::literal(DEFAULT_PROMPT),
            ready_banner: Pattern::literal(DEFAULT_READY_BANNER),
            reset_banner: Pattern::literal(DEFAULT_RESET_BANNER),
            error_banner: Some(default_error_banner()),
            load_command: DEFAULT_LOAD_COMMAND.into(),
            save_command: DEFAULT_SAVE_COMMAND.into(),
            reset_command: DEFAULT_RESET_COMMAND.into(),
            inspect_command: None,
            line_terminator: "\r".into(),
            prompt_timeout: Duration::from_secs(30),
            command_timeout: Duration::from_secs(10),
            save_timeout: Duration::from_secs(300),
            wake_interval: None,
            verify_size: true,
            ymodem: YmodemConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Set the prompt pattern.
    #[must_use]
    pub fn with_prompt(mut self, prompt: Pattern) -> Self {
        self.prompt = prompt;
        self
    }

    /// Set the ready banner pattern.
    #[must_use]
    pub fn with_ready_banner(mut self, banner: Pattern) -> Self {
        self.ready_banner = banner;
        self
    }

    /// Set the reset banner pattern.
    #[must_use]
    pub fn with_reset_banner(mut self, banner: Pattern) -> Self {
        self.reset_banner = banner;
        self
    }

    /// Set or disable the error banner.
    #[must_use]
    pub fn with_error_banner(mut self, banner: Option<Pattern>) -> Self {
        self.error_banner = banner;
        self
    }

    /// Set the load command template.
    #[must_use]
    pub fn with_load_command(mut self, template: impl Into<String>) -> Self {
        self.load_command = template.into();
        self
    }

    /// Set the save command template.
    #[must_use]
    pub fn with_save_command(mut self, template: impl Into<String>) -> Self {
        self.save_command = template.into();
        self
    }

    /// Set the reset command template.
    #[must_use]
    pub fn with_reset_command(mut self, template: impl Into<String>) -> Self {
        self.reset_command = template.into();
        self
    }

    /// Set or clear the inspect command template.
    #[must_use]
    pub fn with_inspect_command(mut self, template: Option<String>) -> Self {
        self.inspect_command = template;
        self
    }

    /// Set the line terminator.
    #[must_use]
    pub fn with_line_terminator(mut self, terminator: impl Into<String>) -> Self {
        self.line_terminator = terminator.into();
        self
    }

    /// Set the prompt timeout.
    #[must_use]
    pub fn with_prompt_timeout(mut self, timeout: Duration) -> Self {
        self.prompt_timeout = timeout;
        self
    }

    /// Set the banner timeout.
    #[must_use]
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Set the post-save prompt timeout.
    #[must_use]
    pub fn with_save_timeout(mut self, timeout: Duration) -> Self {
        self.save_timeout = timeout;
        self
    }

    /// Enable or disable console wake.
    #[must_use]
    pub fn with_wake_interval(mut self, interval: Option<Duration>) -> Self {
        self.wake_interval = interval;
        self
    }

    /// Enable or disable the reported size check.
    #[must_use]
    pub fn with_verify_size(mut self, verify: bool) -> Self {
        self.verify_size = verify;
        self
    }

    /// Set the YMODEM settings.
    #[must_use]
    pub fn with_ymodem(mut self, ymodem: YmodemConfig) -> Self {
        self.ymodem = ymodem;
        self
    }

    /// Render every command for `request` up front.
    pub(crate) fn render_commands(&self, request: &TransferRequest, baud: u32) -> Result<Commands> {
        Ok(Commands {
            load: render(&self.load_command, request, baud)?,
            save: render(&self.save_command, request, baud)?,
            reset: render(&self.reset_command, request, baud)?,
            inspect: self
                .inspect_command
                .as_deref()
                .map(|t| render(t, request, baud))
                .transpose()?,
        })
    }
}

/// Commands rendered for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Commands {
    pub(crate) load: String,
    pub(crate) save: String,
    pub(crate) reset: String,
    pub(crate) inspect: Option<String>,
}

/// Expand `{load_addr}`, `{save_addr}`, `{size}` and `{baud}` in `template`.
///
/// Addresses and size render as `0x`-prefixed hex, which U-Boot parses
/// for every numeric argument. Unknown or unterminated placeholders are a
/// `Config` error.
pub fn render(template: &str, request: &TransferRequest, baud: u32) -> Result<String> {
    let mut out = String::with_capacity(template.len() + 16);
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let close = after
            .find('}')
            .ok_or_else(|| Error::Config(format!("unterminated placeholder in '{template}'")))?;

        match &after[..close] {
            "load_addr" => out.push_str(&format!("0x{:x}", request.load_addr())),
            "save_addr" => out.push_str(&format!("0x{:x}", request.save_addr())),
            "size" => out.push_str(&format!("0x{:x}", request.size())),
            "baud" => out.push_str(&baud.to_string()),
            other => {
                return Err(Error::Config(format!(
                    "unknown placeholder '{{{other}}}' in '{template}' (expected one of: {})",
                    PLACEHOLDERS.join(", ")
                )));
            },
        }
        rest = &after[close + 1..];
    }
    out.push_str(rest);

    if out
        .trim()
        .is_empty()
    {
        return Err(Error::Config("empty command".into()));
    }
    Ok(out)
}
