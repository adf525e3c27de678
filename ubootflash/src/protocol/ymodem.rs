//! YMODEM sender.
//!
//! Pushes one file to a YMODEM receiver such as U-Boot's `loady`.
//!
//! ## Protocol Overview
//!
//! ```text
//! Packet format:
//! +---------+-----+------+------------------+---------------+
//! | SOH/STX | SEQ | ~SEQ |  DATA (128/1024) | CRC16 or SUM8 |
//! +---------+-----+------+------------------+---------------+
//! | 1       | 1   | 1    |     128/1024     |    2 or 1     |
//! +---------+-----+------+------------------+---------------+
//! ```
//!
//! ```text
//! sender                          receiver
//!                    <-- 'C'      (or NAK for checksum mode)
//! block 0 (name, size)  -->
//!                    <-- ACK [C]
//! block 1..n            -->       stop-and-wait, NAK/timeout = resend
//!                    <-- ACK
//! EOT                   -->
//!                    <-- NAK      (optional, EOT is resent)
//! EOT                   -->
//!                    <-- ACK [C]
//! empty block 0         -->
//!                    <-- ACK
//! ```

use std::time::{Duration, Instant};

use byteorder::{BigEndian, WriteBytesExt};
use log::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::crc::{checksum8, crc16_xmodem};
use crate::transport::Transport;

/// YMODEM control characters.
pub mod control {
    /// Start of Header (128-byte block).
    pub const SOH: u8 = 0x01;
    /// Start of Text (1024-byte block).
    pub const STX: u8 = 0x02;
    /// End of Transmission.
    pub const EOT: u8 = 0x04;
    /// Acknowledge.
    pub const ACK: u8 = 0x06;
    /// Not Acknowledge.
    pub const NAK: u8 = 0x15;
    /// Cancel.
    pub const CAN: u8 = 0x18;
    /// CRC mode request character.
    pub const C: u8 = b'C';
    /// Padding for the last data block.
    pub const CPMEOF: u8 = 0x1A;
}

/// Block size for SOH packets.
pub const SOH_BLOCK_SIZE: usize = 128;

/// Block size for STX packets (YMODEM-1K).
pub const STX_BLOCK_SIZE: usize = 1024;

/// Data block size used for the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlockSize {
    /// 128-byte SOH blocks.
    Standard,
    /// 1024-byte STX blocks (YMODEM-1K).
    #[default]
    OneK,
}

impl BlockSize {
    /// Number of data bytes per block.
    pub fn len(self) -> usize {
        match self {
            Self::Standard => SOH_BLOCK_SIZE,
            Self::OneK => STX_BLOCK_SIZE,
        }
    }

    /// Map a byte count (128 or 1024) to a block size.
    pub fn from_len(len: usize) -> Option<Self> {
        match len {
            SOH_BLOCK_SIZE => Some(Self::Standard),
            STX_BLOCK_SIZE => Some(Self::OneK),
            _ => None,
        }
    }
}

/// Integrity check appended to each packet.
///
/// Chosen by the receiver: `'C'` requests CRC-16, `NAK` requests the 8-bit sum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CheckMode {
    /// CRC-16/XMODEM, two bytes, big-endian.
    #[default]
    Crc16,
    /// 8-bit additive checksum, one byte.
    Checksum,
}

impl CheckMode {
    /// Number of trailer bytes.
    pub fn len(self) -> usize {
        match self {
            Self::Crc16 => 2,
            Self::Checksum => 1,
        }
    }
}

/// One YMODEM packet with its data already padded to the block size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferPacket {
    seq: u8,
    data: Vec<u8>,
}

impl TransferPacket {
    /// Data packet: `payload` padded with `CPMEOF` to `size` bytes.
    pub fn data(seq: u8, payload: &[u8], size: BlockSize) -> Self {
        debug_assert!(payload.len() <= size.len());
        let mut data = Vec::with_capacity(size.len());
        data.extend_from_slice(payload);
        data.resize(size.len(), control::CPMEOF);
        Self { seq, data }
    }

    /// Block 0: `filename NUL size NUL`, zero-padded.
    pub fn header(filename: &str, filesize: usize) -> Self {
        let mut data = Vec::with_capacity(SOH_BLOCK_SIZE);
        data.extend_from_slice(filename.as_bytes());
        data.push(0x00);
        data.extend_from_slice(filesize.to_string().as_bytes());
        data.push(0x00);

        let size = if data.len() <= SOH_BLOCK_SIZE {
            SOH_BLOCK_SIZE
        } else {
            STX_BLOCK_SIZE
        };
        data.truncate(STX_BLOCK_SIZE);
        data.resize(size, 0x00);
        Self { seq: 0, data }
    }

    /// Empty block 0 that closes the batch.
    pub fn finish() -> Self {
        Self {
            seq: 0,
            data: vec![0x00; SOH_BLOCK_SIZE],
        }
    }

    /// Sequence number (mod 256).
    pub fn seq(&self) -> u8 {
        self.seq
    }

    /// Padded data block.
    pub fn payload(&self) -> &[u8] {
        &self.data
    }

    /// Whether this is a 1024-byte STX packet.
    pub fn is_1k(&self) -> bool {
        self.data
            .len()
            == STX_BLOCK_SIZE
    }

    /// Check value over the data block for `mode`.
    pub fn check_value(&self, mode: CheckMode) -> u16 {
        match mode {
            CheckMode::Crc16 => crc16_xmodem(&self.data),
            CheckMode::Checksum => u16::from(checksum8(&self.data)),
        }
    }

    /// Serialize to wire format.
    #[allow(clippy::cast_possible_truncation)]
    pub fn encode(&self, mode: CheckMode) -> Vec<u8> {
        let header = if self.is_1k() {
            control::STX
        } else {
            control::SOH
        };

        let mut frame = Vec::with_capacity(
            3 + self
                .data
                .len()
                + mode.len(),
        );
        frame.push(header);
        frame.push(self.seq);
        frame.push(!self.seq);
        frame.extend_from_slice(&self.data);

        let check = self.check_value(mode);
        match mode {
            CheckMode::Crc16 => {
                // Writing into a Vec cannot fail.
                let _ = frame.write_u16::<BigEndian>(check);
            },
            CheckMode::Checksum => frame.push(check as u8),
        }
        frame
    }
}

/// YMODEM configuration options.
#[derive(Debug, Clone)]
pub struct YmodemConfig {
    /// Timeout for each acknowledgment.
    pub char_timeout: Duration,
    /// Timeout for the receiver's initial start request.
    pub start_timeout: Duration,
    /// Resends allowed per packet before the transfer fails.
    pub max_retries: u32,
    /// Data block size.
    pub block_size: BlockSize,
    /// Wait (up to `char_timeout`) for the receiver's `'C'` after the header
    /// and after EOT. A missing `'C'` is tolerated.
    pub header_handshake: bool,
}

impl Default for YmodemConfig {
    fn default() -> Self {
        Self {
            char_timeout: Duration::from_millis(1000),
            start_timeout: Duration::from_secs(60),
            max_retries: 10,
            block_size: BlockSize::OneK,
            header_handshake: true,
        }
    }
}

/// Counters for a finished transfer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct TransferStats {
    /// Payload bytes acknowledged by the receiver.
    pub bytes_sent: usize,
    /// Data packets acknowledged (header and finish blocks excluded).
    pub packets: usize,
    /// Total resends over the whole transfer.
    pub retries: u32,
}

/// Two consecutive `CAN` bytes; a lone one is line noise.
fn receiver_cancelled() -> Error {
    Error::Protocol("transfer cancelled by receiver".into())
}

/// Outcome of waiting for a packet response.
enum Reply {
    Ack,
    Nak,
    Silent,
}

/// YMODEM transfer handler.
pub struct YmodemSender<'a, P: Port> {
    transport: &'a mut Transport<P>,
    config: YmodemConfig,
    mode: CheckMode,
    stats: TransferStats,
}

impl<'a, P: Port> YmodemSender<'a, P> {
    /// Create a sender with default configuration.
    pub fn new(transport: &'a mut Transport<P>) -> Self {
        Self::with_config(transport, YmodemConfig::default())
    }

    /// Create a sender with custom configuration.
    pub fn with_config(transport: &'a mut Transport<P>, config: YmodemConfig) -> Self {
        Self {
            transport,
            config,
            mode: CheckMode::Crc16,
            stats: TransferStats::default(),
        }
    }

    /// Check mode negotiated with the receiver.
    pub fn mode(&self) -> CheckMode {
        self.mode
    }

    /// Wait for the receiver's start request and record the check mode.
    pub fn wait_for_start(&mut self) -> Result<CheckMode> {
        debug!("Waiting for receiver start request...");
        let start = Instant::now();
        let mut cancel_seen = false;

        loop {
            let remaining = self
                .config
                .start_timeout
                .saturating_sub(start.elapsed());
            if remaining.is_zero() {
                return Err(Error::Timeout(
                    "receiver never requested the transfer".into(),
                ));
            }

            match self
                .transport
                .read_byte(remaining)
            {
                Ok(control::C) => {
                    debug!("Receiver requested CRC-16 mode");
                    self.mode = CheckMode::Crc16;
                    return Ok(self.mode);
                },
                Ok(control::NAK) => {
                    debug!("Receiver requested checksum mode");
                    self.mode = CheckMode::Checksum;
                    return Ok(self.mode);
                },
                Ok(control::CAN) if cancel_seen => return Err(receiver_cancelled()),
                Ok(control::CAN) => cancel_seen = true,
                Ok(c) => {
                    cancel_seen = false;
                    trace!("Ignoring 0x{c:02X} before start");
                },
                Err(Error::Timeout(_)) => {},
                Err(e) => return Err(e),
            }
        }
    }

    /// Tolerant wait for a `'C'` between batch phases.
    fn wait_for_handshake(&mut self) -> Result<()> {
        if !self
            .config
            .header_handshake
        {
            return Ok(());
        }

        let start = Instant::now();
        let window = self
            .config
            .char_timeout;
        let mut cancel_seen = false;
        loop {
            let remaining = window.saturating_sub(start.elapsed());
            if remaining.is_zero() {
                trace!("No 'C' from receiver, continuing");
                return Ok(());
            }
            match self
                .transport
                .read_byte(remaining)
            {
                Ok(control::C | control::NAK) => return Ok(()),
                Ok(control::CAN) if cancel_seen => return Err(receiver_cancelled()),
                Ok(control::CAN) => cancel_seen = true,
                Ok(c) => {
                    cancel_seen = false;
                    trace!("Ignoring 0x{c:02X} during handshake");
                },
                Err(Error::Timeout(_)) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }

    /// Read until ACK, NAK or `CAN CAN` arrives, ignoring console noise.
    fn wait_reply(&mut self) -> Result<Reply> {
        let start = Instant::now();
        let window = self
            .config
            .char_timeout;
        let mut cancel_seen = false;

        loop {
            let remaining = window.saturating_sub(start.elapsed());
            if remaining.is_zero() {
                return Ok(Reply::Silent);
            }
            match self
                .transport
                .read_byte(remaining)
            {
                Ok(control::ACK) => return Ok(Reply::Ack),
                Ok(control::NAK) => return Ok(Reply::Nak),
                Ok(control::CAN) if cancel_seen => return Err(receiver_cancelled()),
                Ok(control::CAN) => cancel_seen = true,
                Ok(c) => {
                    cancel_seen = false;
                    trace!("Ignoring 0x{c:02X} while waiting for ACK");
                },
                Err(Error::Timeout(_)) => return Ok(Reply::Silent),
                Err(e) => return Err(e),
            }
        }
    }

    /// Send a packet and wait for ACK, resending on NAK or silence.
    ///
    /// The frame is encoded once, so every resend is byte-identical.
    pub fn send_packet(&mut self, packet: &TransferPacket) -> Result<()> {
        let frame = packet.encode(self.mode);
        let attempts = self
            .config
            .max_retries
            + 1;

        for attempt in 1..=attempts {
            if attempt > 1 {
                self.stats
                    .retries += 1;
            }
            trace!(
                "Sending block {} (attempt {attempt}/{attempts})",
                packet.seq()
            );
            self.transport
                .write(&frame)?;

            match self.wait_reply()? {
                Reply::Ack => {
                    trace!("Block {} ACKed", packet.seq());
                    return Ok(());
                },
                Reply::Nak => warn!("Block {} NAKed, resending", packet.seq()),
                Reply::Silent => warn!("No reply to block {}, resending", packet.seq()),
            }
        }

        Err(Error::Protocol(format!(
            "block {} not acknowledged after {} retries",
            packet.seq(),
            self.config
                .max_retries
        )))
    }

    /// Send EOT until the receiver acknowledges it.
    pub fn send_eot(&mut self) -> Result<()> {
        debug!("Sending EOT");
        let attempts = self
            .config
            .max_retries
            + 1;

        for attempt in 1..=attempts {
            if attempt > 1 {
                self.stats
                    .retries += 1;
            }
            self.transport
                .write(&[control::EOT])?;

            match self.wait_reply()? {
                Reply::Ack => {
                    debug!("EOT ACKed");
                    return Ok(());
                },
                // A NAK on the first EOT is part of the standard exchange.
                Reply::Nak => trace!("EOT NAKed, resending"),
                Reply::Silent => warn!("No reply to EOT, resending"),
            }
        }

        Err(Error::Protocol(format!(
            "EOT not acknowledged after {} retries",
            self.config
                .max_retries
        )))
    }

    /// Tell the receiver to give up. Bypasses the abort check.
    fn cancel(&mut self) {
        debug!("Cancelling transfer");
        if let Err(e) = self
            .transport
            .port_mut()
            .write_all_bytes(&[control::CAN, control::CAN])
        {
            trace!("Failed to send CAN: {e}");
        }
    }

    /// Transfer one file.
    ///
    /// On abort the receiver is sent `CAN CAN` so it leaves receive mode.
    ///
    /// # Arguments
    ///
    /// * `filename` - Name reported in block 0
    /// * `data` - File contents
    /// * `progress` - Called with `(bytes_sent, total)` after each data block
    pub fn send<F>(&mut self, filename: &str, data: &[u8], progress: F) -> Result<TransferStats>
    where
        F: FnMut(usize, usize),
    {
        let result = self.send_batch(filename, data, progress);
        if matches!(result, Err(Error::Aborted)) {
            self.cancel();
        }
        result
    }

    fn send_batch<F>(&mut self, filename: &str, data: &[u8], mut progress: F) -> Result<TransferStats>
    where
        F: FnMut(usize, usize),
    {
        debug!(
            "Starting YMODEM transfer: {} ({} bytes)",
            filename,
            data.len()
        );
        self.stats = TransferStats::default();

        self.wait_for_start()?;

        self.send_packet(&TransferPacket::header(filename, data.len()))?;
        self.wait_for_handshake()?;

        let block = self
            .config
            .block_size;
        let total = data.len();
        let mut seq: u8 = 1;
        let mut offset = 0;

        while offset < total {
            let remaining = total - offset;
            // A short tail goes out as a 128-byte block instead of a padded 1K one.
            let size = if remaining <= SOH_BLOCK_SIZE {
                BlockSize::Standard
            } else {
                block
            };
            let end = offset + remaining.min(size.len());

            self.send_packet(&TransferPacket::data(seq, &data[offset..end], size))?;

            offset = end;
            seq = seq.wrapping_add(1);
            self.stats
                .bytes_sent = offset;
            self.stats
                .packets += 1;
            progress(offset, total);
        }

        self.send_eot()?;
        self.wait_for_handshake()?;
        self.send_packet(&TransferPacket::finish())?;

        debug!(
            "YMODEM transfer complete: {} packets, {} retries",
            self.stats
                .packets,
            self.stats
                .retries
        );
        Ok(self.stats)
    }
}
