//! Read-only console monitor.
//!
//! Used after a session reset to watch the device boot. Output is streamed
//! until the abort signal is raised, which is the normal way to stop.

use std::io::Write;
use std::time::Duration;

use log::debug;

use crate::abort::AbortSignal;
use crate::error::{Error, Result};
use crate::port::Port;
#[cfg(feature = "native")]
use crate::port::{NativePort, SerialConfig};
use crate::transport::Transport;

/// Wait per read before checking the abort signal again.
const READ_WINDOW: Duration = Duration::from_millis(100);

/// Streams device output to a writer.
pub struct MonitorSession<P: Port> {
    transport: Transport<P>,
    pending: Vec<u8>,
    clean: bool,
}

#[cfg(feature = "native")]
impl MonitorSession<NativePort> {
    /// Open the serial port for monitoring.
    pub fn open(serial: &SerialConfig, abort: AbortSignal) -> Result<Self> {
        let port = NativePort::open(serial)?;
        Self::new(port, abort)
    }
}

impl<P: Port> MonitorSession<P> {
    /// Monitor an already opened port.
    pub fn new(port: P, abort: AbortSignal) -> Result<Self> {
        Ok(Self {
            transport: Transport::new(port, abort)?,
            pending: Vec::new(),
            clean: true,
        })
    }

    /// Pass device bytes through untouched, without UTF-8 decoding.
    #[must_use]
    pub fn raw(mut self) -> Self {
        self.clean = false;
        self
    }

    /// Copy device output to `out` until aborted.
    ///
    /// Returns the number of bytes received. The port is closed on return.
    pub fn run<W: Write>(&mut self, mut out: W) -> Result<usize> {
        let mut buf = [0u8; 1024];
        let mut total = 0;

        let result = loop {
            let n = match self
                .transport
                .read_available(&mut buf, READ_WINDOW)
            {
                Ok(n) => n,
                Err(Error::Aborted) => break Ok(total),
                Err(e) => break Err(e),
            };
            if n == 0 {
                continue;
            }
            total += n;

            let written = if self.clean {
                self.pending
                    .extend_from_slice(&buf[..n]);
                let text = clean_monitor_text(&drain_utf8_lossy(&mut self.pending));
                out.write_all(text.as_bytes())
            } else {
                out.write_all(&buf[..n])
            };
            if let Err(e) = written.and_then(|()| out.flush())
            {
                break Err(Error::Io(e));
            }
        };

        debug!("Monitor stopped after {total} bytes");
        self.transport
            .close()?;
        result
    }
}

/// Drain buffered bytes into displayable UTF-8 text without stalling on invalid bytes.
///
/// - Valid UTF-8 is emitted as-is.
/// - Invalid byte sequences emit the replacement char `�` and continue.
/// - Incomplete UTF-8 suffix is kept in `buffer` for the next read.
pub fn drain_utf8_lossy(buffer: &mut Vec<u8>) -> String {
    let mut output = String::new();

    loop {
        match std::str::from_utf8(buffer) {
            Ok(valid) => {
                output.push_str(valid);
                buffer.clear();
                break;
            },
            Err(err) => {
                let valid_up_to = err.valid_up_to();
                if let Ok(valid) = std::str::from_utf8(&buffer[..valid_up_to]) {
                    output.push_str(valid);
                }

                match err.error_len() {
                    Some(invalid_len) => {
                        output.push('\u{FFFD}');
                        let drain_to = valid_up_to
                            .saturating_add(invalid_len)
                            .min(buffer.len());
                        buffer.drain(..drain_to);
                    },
                    None => {
                        buffer.drain(..valid_up_to);
                        break;
                    },
                }
            },
        }
    }

    output
}

/// Normalise console line endings and drop control characters.
///
/// `\r\n` and lone `\r` become `\n`; `\n` and `\t` are kept.
pub fn clean_monitor_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text
        .chars()
        .peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '\r' => {
                if chars.peek() != Some(&'\n') {
                    out.push('\n');
                }
            },
            '\n' | '\t' => out.push(ch),
            _ if ch.is_control() => {},
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::mock::MockPort;

    #[test]
    fn test_drain_utf8_lossy_replaces_invalid_bytes_and_continues() {
        let mut buf = vec![0xFF, b'A', 0xFE, b'B'];
        let out = drain_utf8_lossy(&mut buf);
        assert_eq!(out, "\u{FFFD}A\u{FFFD}B");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_drain_utf8_lossy_keeps_incomplete_suffix() {
        let mut buf = vec![0xC2];
        assert_eq!(drain_utf8_lossy(&mut buf), "");
        assert_eq!(buf, vec![0xC2]);

        buf.push(0xB0);
        assert_eq!(drain_utf8_lossy(&mut buf), "\u{B0}");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_clean_monitor_text() {
        assert_eq!(
            clean_monitor_text("U-Boot\r\nDRAM:\x07 1 GiB\rdone\t!"),
            "U-Boot\nDRAM: 1 GiB\ndone\t!"
        );
    }

    #[test]
    fn test_run_streams_until_abort() {
        let abort = AbortSignal::new();
        let port = MockPort::new(b"Starting kernel ...\r\n");
        let closed = port.closed_flag();

        let stopper = abort.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(150));
            stopper.abort();
        });

        let mut out = Vec::new();
        let mut monitor = MonitorSession::new(port, abort).unwrap();
        let received = monitor
            .run(&mut out)
            .unwrap();
        handle
            .join()
            .unwrap();

        assert_eq!(received, 21);
        assert_eq!(out, b"Starting kernel ...\n");
        assert!(closed.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    fn test_raw_run_passes_bytes_through() {
        let abort = AbortSignal::new();
        let data = [0xFF, 0x1B, b'[', b'0', b'm', 0xFE, b'A'];
        let port = MockPort::new(&data);

        let stopper = abort.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(150));
            stopper.abort();
        });

        let mut out = Vec::new();
        let received = MonitorSession::new(port, abort)
            .unwrap()
            .raw()
            .run(&mut out)
            .unwrap();
        handle
            .join()
            .unwrap();

        assert_eq!(received, data.len());
        assert_eq!(out, data);
    }

    #[test]
    fn test_run_reports_port_errors() {
        let port = MockPort::new(b"x");
        port.closed_flag()
            .store(true, std::sync::atomic::Ordering::SeqCst);

        let mut monitor = MonitorSession::new(port, AbortSignal::new()).unwrap();
        let err = monitor
            .run(Vec::new())
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
