//! In-memory port for unit tests.
//!
//! Unlike `Cursor<Vec<u8>>`, reads and writes are independent. An optional
//! [`Responder`] sees every write and may queue bytes for later reads, which
//! lets tests simulate a receiver that reacts to what was sent.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::time::Duration;

use crate::error::Result;
use crate::port::Port;

/// Reacts to bytes written to a [`MockPort`].
pub(crate) trait Responder: Send {
    fn on_write(&mut self, data: &[u8], rx: &mut VecDeque<u8>);
}

pub(crate) struct MockPort {
    rx: VecDeque<u8>,
    pub(crate) written: Vec<u8>,
    responder: Option<Box<dyn Responder>>,
    closed: Arc<AtomicBool>,
    timeout: Duration,
    baud_rate: u32,
}

impl MockPort {
    pub(crate) fn new(response: &[u8]) -> Self {
        Self {
            rx: response
                .iter()
                .copied()
                .collect(),
            written: Vec::new(),
            responder: None,
            closed: Arc::new(AtomicBool::new(false)),
            timeout: Duration::from_millis(5),
            baud_rate: 115200,
        }
    }

    pub(crate) fn with_responder(responder: impl Responder + 'static) -> Self {
        let mut port = Self::new(&[]);
        port.responder = Some(Box::new(responder));
        port
    }

    /// Flag that turns true once `close` was called.
    pub(crate) fn closed_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.closed)
    }

    pub(crate) fn push_rx(&mut self, data: &[u8]) {
        self.rx
            .extend(data);
    }
}

impl Read for MockPort {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self
            .closed
            .load(Ordering::SeqCst)
        {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "port closed",
            ));
        }
        if self
            .rx
            .is_empty()
        {
            std::thread::sleep(Duration::from_millis(1));
            return Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "no data"));
        }
        let n = buf
            .len()
            .min(
                self.rx
                    .len(),
            );
        for (slot, byte) in buf
            .iter_mut()
            .zip(
                self.rx
                    .drain(..n),
            )
        {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for MockPort {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if self
            .closed
            .load(Ordering::SeqCst)
        {
            return Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "port closed",
            ));
        }
        self.written
            .extend_from_slice(buf);
        if let Some(responder) = self
            .responder
            .as_mut()
        {
            responder.on_write(buf, &mut self.rx);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Port for MockPort {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()> {
        self.baud_rate = baud_rate;
        Ok(())
    }

    fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    fn clear_buffers(&mut self) -> Result<()> {
        self.rx
            .clear();
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }

    fn close(&mut self) -> Result<()> {
        self.closed
            .store(true, Ordering::SeqCst);
        Ok(())
    }
}
