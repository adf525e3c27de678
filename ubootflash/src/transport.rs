//! Byte-level serial transport with deadlines and cancellation.
//!
//! The OS only offers a per-read timeout. [`Transport`] keeps that timeout
//! short ([`POLL_SLICE`]) and loops until the caller's deadline, checking the
//! [`AbortSignal`] between slices, so every blocking wait in the protocol
//! layers can be cancelled.

use std::io::ErrorKind as IoErrorKind;
use std::time::{Duration, Instant};

use log::{debug, trace};

use crate::abort::AbortSignal;
use crate::error::{Error, Result};
use crate::port::Port;

/// Upper bound on a single port read, and therefore on abort latency.
pub const POLL_SLICE: Duration = Duration::from_millis(20);

/// Exclusive owner of an open port for the duration of a session.
pub struct Transport<P: Port> {
    port: P,
    abort: AbortSignal,
    closed: bool,
}

impl<P: Port> Transport<P> {
    /// Wrap an open port.
    pub fn new(mut port: P, abort: AbortSignal) -> Result<Self> {
        if port.timeout() > POLL_SLICE {
            port.set_timeout(POLL_SLICE)?;
        }
        Ok(Self {
            port,
            abort,
            closed: false,
        })
    }

    /// The cancellation signal observed by this transport.
    pub fn abort_signal(&self) -> &AbortSignal {
        &self.abort
    }

    /// Name of the underlying port.
    pub fn name(&self) -> &str {
        self.port
            .name()
    }

    /// Current baud rate of the underlying port.
    pub fn baud_rate(&self) -> u32 {
        self.port
            .baud_rate()
    }

    /// Get a reference to the underlying port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Get a mutable reference to the underlying port.
    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Whether [`Transport::close`] has run.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Read one byte, waiting at most `timeout`.
    ///
    /// At least one read is attempted even for a zero timeout.
    pub fn read_byte(&mut self, timeout: Duration) -> Result<u8> {
        let start = Instant::now();
        let mut buf = [0u8; 1];

        loop {
            self.abort
                .check()?;

            match self
                .port
                .read(&mut buf)
            {
                Ok(1) => {
                    trace!("rx 0x{:02X}", buf[0]);
                    return Ok(buf[0]);
                },
                Ok(_) => {},
                Err(e)
                    if matches!(
                        e.kind(),
                        IoErrorKind::TimedOut | IoErrorKind::WouldBlock | IoErrorKind::Interrupted
                    ) => {},
                Err(e) => return Err(Error::Io(e)),
            }

            if start.elapsed() >= timeout {
                return Err(Error::Timeout(format!(
                    "no data within {} ms",
                    timeout.as_millis()
                )));
            }
        }
    }

    /// Read whatever arrives within `timeout` into `buf`.
    ///
    /// Returns `Ok(0)` when nothing arrived; never fails with `Timeout`.
    pub fn read_available(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let start = Instant::now();

        loop {
            self.abort
                .check()?;

            match self
                .port
                .read(buf)
            {
                Ok(n) if n > 0 => return Ok(n),
                Ok(_) => {},
                Err(e)
                    if matches!(
                        e.kind(),
                        IoErrorKind::TimedOut | IoErrorKind::WouldBlock | IoErrorKind::Interrupted
                    ) => {},
                Err(e) => return Err(Error::Io(e)),
            }

            if start.elapsed() >= timeout {
                return Ok(0);
            }
        }
    }

    /// Write all bytes and flush.
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        self.abort
            .check()?;
        trace!("tx {} bytes", data.len());
        self.port
            .write_all_bytes(data)
    }

    /// Send a console command followed by `terminator`.
    pub fn send_line(&mut self, line: &str, terminator: &str) -> Result<()> {
        debug!("> {line}");
        let mut data = Vec::with_capacity(line.len() + terminator.len());
        data.extend_from_slice(line.as_bytes());
        data.extend_from_slice(terminator.as_bytes());
        self.write(&data)
    }

    /// Drop pending input and output held by the OS line discipline.
    pub fn discard_input(&mut self) -> Result<()> {
        self.port
            .clear_buffers()
    }

    /// Close the port. Safe to call more than once.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.port
            .close()
    }
}
