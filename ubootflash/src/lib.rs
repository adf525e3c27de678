//! # ubootflash
//!
//! A library for updating firmware through a U-Boot serial console.
//!
//! One [`Session`] drives the whole exchange over a single serial port:
//!
//! - wait for the bootloader prompt
//! - `loady` the image into RAM with YMODEM
//! - save it to flash (`sf probe; sf update` by default)
//! - reset the board
//!
//! Prompts, banners and command templates are all configurable through
//! [`SessionConfig`], so the same flow works for customised bootloaders.
//!
//! ## Layers
//!
//! - [`port`]: the [`Port`] trait and the `serialport` backend
//! - [`device`]: USB-UART adapter discovery
//! - [`transport`]: deadline and abort aware byte I/O
//! - [`prompt`]: console pattern matching
//! - [`protocol`]: YMODEM sender and checksums
//! - [`session`]: the state machine tying them together
//!
//! ## Features
//!
//! - `native` (default): Native serial port support
//! - `serde`: Serialization support for reports and states
//!
//! ## Example
//!
//! ```rust,no_run
//! use ubootflash::{AbortSignal, SerialConfig, Session, SessionConfig, TransferRequest};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let request = TransferRequest::for_file("u-boot.itb", 0x8200_0000, 0x10_0000)?;
//!
//!     #[cfg(feature = "native")]
//!     {
//!         let serial = SerialConfig::new("/dev/ttyUSB0", 115200);
//!         let mut session = Session::open(&serial, SessionConfig::default(), AbortSignal::new())?;
//!         let report = session.run(&request)?;
//!         println!("Flashed {} bytes", report.bytes_sent);
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod abort;
pub mod device;
pub mod error;
pub mod monitor;
pub mod port;
pub mod prompt;
pub mod protocol;
pub mod session;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

// Native-specific re-exports
#[cfg(feature = "native")]
pub use {
    device::detect_ports,
    port::{NativePort, NativePortEnumerator},
};
pub use {
    abort::AbortSignal,
    device::{AdapterKind, DetectedPort, format_port_list, pick_port},
    error::{Error, ErrorKind, Result, SessionError},
    monitor::{MonitorSession, clean_monitor_text, drain_utf8_lossy},
    port::{Port, PortEnumerator, PortInfo, SerialConfig},
    prompt::{Pattern, PromptMatcher},
    protocol::{BlockSize, CheckMode, TransferStats, YmodemConfig},
    session::{
        Session, SessionConfig, SessionObserver, SessionReport, SessionState, TransferRequest,
    },
    transport::Transport,
};
