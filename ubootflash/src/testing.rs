//! Simulated bootloader peers for unit tests.
//!
//! [`YmodemReceiver`] decodes frames written by the sender, validates them
//! and answers like a real receiver. [`SimulatedUboot`] wraps it in a small
//! U-Boot console that echoes input and answers `loady`, `md`, `sf update`
//! and `reset`.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::abort::AbortSignal;
use crate::port::mock::{MockPort, Responder};
use crate::protocol::crc::{checksum8, crc16_xmodem};
use crate::protocol::ymodem::{SOH_BLOCK_SIZE, STX_BLOCK_SIZE, control};

/// What the receiver saw, shared with the test body.
#[derive(Debug, Default)]
pub(crate) struct ReceiverLog {
    pub(crate) file_name: String,
    pub(crate) file_size: usize,
    pub(crate) data: Vec<u8>,
    pub(crate) data_seqs: Vec<u8>,
    pub(crate) eots: usize,
    pub(crate) naks: usize,
    pub(crate) finished: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Header,
    Data,
    Closing,
    Done,
}

pub(crate) struct YmodemReceiver {
    log: Arc<Mutex<ReceiverLog>>,
    buf: Vec<u8>,
    phase: Phase,
    expected: u8,
    crc: bool,
    handshake: bool,
    nak_plan: Option<(usize, u32)>,
    nak_first_eot: bool,
    abort_after: Option<(usize, AbortSignal)>,
    accepted: usize,
}

impl YmodemReceiver {
    pub(crate) fn new(log: Arc<Mutex<ReceiverLog>>) -> Self {
        Self {
            log,
            buf: Vec::new(),
            phase: Phase::Header,
            expected: 0,
            crc: true,
            handshake: true,
            nak_plan: None,
            nak_first_eot: false,
            abort_after: None,
            accepted: 0,
        }
    }

    /// Expect 8-bit checksums instead of CRC-16.
    pub(crate) fn checksum_mode(mut self) -> Self {
        self.crc = false;
        self
    }

    /// Do not re-request with 'C' after block 0 and after EOT.
    pub(crate) fn without_handshake(mut self) -> Self {
        self.handshake = false;
        self
    }

    /// NAK the `index`-th data block (1-based) `times` times.
    pub(crate) fn nak_data_block(mut self, index: usize, times: u32) -> Self {
        self.nak_plan = Some((index, times));
        self
    }

    pub(crate) fn nak_first_eot(mut self) -> Self {
        self.nak_first_eot = true;
        self
    }

    /// Raise `signal` once `blocks` data blocks were accepted.
    pub(crate) fn abort_after(mut self, blocks: usize, signal: AbortSignal) -> Self {
        self.abort_after = Some((blocks, signal));
        self
    }

    pub(crate) fn is_done(&self) -> bool {
        self.phase == Phase::Done
    }

    fn start_char(&self) -> u8 {
        if self.crc { control::C } else { control::NAK }
    }

    fn check_len(&self) -> usize {
        if self.crc { 2 } else { 1 }
    }

    pub(crate) fn on_bytes(&mut self, data: &[u8], rx: &mut VecDeque<u8>) {
        self.buf
            .extend_from_slice(data);

        while let Some(&first) = self
            .buf
            .first()
        {
            match first {
                control::EOT => {
                    self.buf
                        .remove(0);
                    self.on_eot(rx);
                },
                control::SOH | control::STX => {
                    let size = if first == control::SOH {
                        SOH_BLOCK_SIZE
                    } else {
                        STX_BLOCK_SIZE
                    };
                    let len = 3 + size + self.check_len();
                    if self
                        .buf
                        .len()
                        < len
                    {
                        break;
                    }
                    let frame: Vec<u8> = self
                        .buf
                        .drain(..len)
                        .collect();
                    self.on_frame(&frame, size, rx);
                },
                _ => {
                    self.buf
                        .remove(0);
                },
            }
        }
    }

    fn frame_is_valid(&self, frame: &[u8], size: usize) -> bool {
        if frame[1] != !frame[2] {
            return false;
        }
        let data = &frame[3..3 + size];
        let trailer = &frame[3 + size..];
        if self.crc {
            u16::from_be_bytes([trailer[0], trailer[1]]) == crc16_xmodem(data)
        } else {
            trailer[0] == checksum8(data)
        }
    }

    fn on_frame(&mut self, frame: &[u8], size: usize, rx: &mut VecDeque<u8>) {
        let mut log = self
            .log
            .lock()
            .unwrap();

        if !self.frame_is_valid(frame, size) {
            log.naks += 1;
            rx.push_back(control::NAK);
            return;
        }

        let seq = frame[1];
        let data = &frame[3..3 + size];

        match self.phase {
            Phase::Header if seq == 0 => {
                let mut fields = data.split(|&b| b == 0);
                log.file_name = String::from_utf8_lossy(fields.next().unwrap_or_default()).into();
                log.file_size = fields
                    .next()
                    .and_then(|s| {
                        std::str::from_utf8(s)
                            .ok()?
                            .parse()
                            .ok()
                    })
                    .unwrap_or(0);
                rx.push_back(control::ACK);
                if self.handshake {
                    rx.push_back(self.start_char());
                }
                self.phase = Phase::Data;
                self.expected = 1;
            },
            Phase::Data if seq == self.expected => {
                let index = self.accepted + 1;
                if let Some((target, remaining)) = self.nak_plan.as_mut() {
                    if *target == index && *remaining > 0 {
                        *remaining -= 1;
                        log.naks += 1;
                        rx.push_back(control::NAK);
                        return;
                    }
                }
                log.data
                    .extend_from_slice(data);
                log.data_seqs
                    .push(seq);
                self.accepted += 1;
                self.expected = self
                    .expected
                    .wrapping_add(1);
                rx.push_back(control::ACK);

                if let Some((blocks, signal)) = &self.abort_after {
                    if *blocks == self.accepted {
                        signal.abort();
                    }
                }
            },
            // Duplicate of the last accepted block: its ACK was lost.
            Phase::Data if seq == self.expected.wrapping_sub(1) => rx.push_back(control::ACK),
            Phase::Closing
                if seq == 0
                    && data
                        .iter()
                        .all(|&b| b == 0) =>
            {
                let size = log.file_size;
                log.data
                    .truncate(size);
                log.finished = true;
                rx.push_back(control::ACK);
                self.phase = Phase::Done;
            },
            Phase::Done => {},
            _ => {
                log.naks += 1;
                rx.push_back(control::NAK);
            },
        }
    }

    fn on_eot(&mut self, rx: &mut VecDeque<u8>) {
        let mut log = self
            .log
            .lock()
            .unwrap();
        log.eots += 1;

        match self.phase {
            Phase::Data if self.nak_first_eot && log.eots == 1 => rx.push_back(control::NAK),
            Phase::Data => {
                rx.push_back(control::ACK);
                if self.handshake {
                    rx.push_back(self.start_char());
                }
                self.phase = Phase::Closing;
            },
            Phase::Closing => rx.push_back(control::ACK),
            _ => rx.push_back(control::NAK),
        }
    }
}

impl Responder for YmodemReceiver {
    fn on_write(&mut self, data: &[u8], rx: &mut VecDeque<u8>) {
        self.on_bytes(data, rx);
    }
}

/// Console activity of a [`SimulatedUboot`].
#[derive(Debug, Default)]
pub(crate) struct ConsoleLog {
    pub(crate) commands: Vec<String>,
}

pub(crate) const UBOOT_PROMPT: &str = "=> ";

pub(crate) struct SimulatedUboot {
    console: Arc<Mutex<ConsoleLog>>,
    receiver_log: Arc<Mutex<ReceiverLog>>,
    receiver: Option<YmodemReceiver>,
    line: Vec<u8>,
    reported_size: Option<usize>,
    failing_command: Option<String>,
    flash_failure: Option<String>,
    abort_after: Option<(usize, AbortSignal)>,
    nak_plan: Option<(usize, u32)>,
}

impl SimulatedUboot {
    pub(crate) fn new() -> Self {
        Self {
            console: Arc::default(),
            receiver_log: Arc::default(),
            receiver: None,
            line: Vec::new(),
            reported_size: None,
            failing_command: None,
            flash_failure: None,
            abort_after: None,
            nak_plan: None,
        }
    }

    pub(crate) fn console_log(&self) -> Arc<Mutex<ConsoleLog>> {
        Arc::clone(&self.console)
    }

    pub(crate) fn receiver_log(&self) -> Arc<Mutex<ReceiverLog>> {
        Arc::clone(&self.receiver_log)
    }

    /// Report this size after `loady` instead of the received length.
    pub(crate) fn report_size(mut self, size: usize) -> Self {
        self.reported_size = Some(size);
        self
    }

    /// Answer commands starting with `prefix` with an `## Error` banner.
    pub(crate) fn fail_command(mut self, prefix: &str) -> Self {
        self.failing_command = Some(prefix.to_string());
        self
    }

    /// Answer `sf` writes with `message` instead of a success report.
    pub(crate) fn flash_failure(mut self, message: &str) -> Self {
        self.flash_failure = Some(message.to_string());
        self
    }

    pub(crate) fn abort_after(mut self, blocks: usize, signal: AbortSignal) -> Self {
        self.abort_after = Some((blocks, signal));
        self
    }

    pub(crate) fn nak_data_block(mut self, index: usize, times: u32) -> Self {
        self.nak_plan = Some((index, times));
        self
    }

    /// Port with the boot banner and first prompt already queued.
    pub(crate) fn into_port(self) -> MockPort {
        let mut port = MockPort::with_responder(self);
        port.push_rx(b"\r\nU-Boot 2024.01\r\n\r\nHit any key to stop autoboot:  0\r\n");
        port.push_rx(UBOOT_PROMPT.as_bytes());
        port
    }

    fn run(&mut self, line: &str, rx: &mut VecDeque<u8>) {
        let line = line.trim();
        if line.is_empty() {
            rx.extend(UBOOT_PROMPT.as_bytes());
            return;
        }
        self.console
            .lock()
            .unwrap()
            .commands
            .push(line.to_string());

        for part in line
            .split(';')
            .map(str::trim)
            .filter(|part| !part.is_empty())
        {
            // `loady` and `reset` take over the console.
            if !self.run_one(part, rx) {
                return;
            }
        }
        rx.extend(UBOOT_PROMPT.as_bytes());
    }

    /// Run one command. Returns false when no prompt should follow.
    fn run_one(&mut self, line: &str, rx: &mut VecDeque<u8>) -> bool {
        if let Some(prefix) = &self.failing_command {
            if line.starts_with(prefix.as_str()) {
                rx.extend(format!("## Error: '{line}' failed\r\n").as_bytes());
                return true;
            }
        }

        let mut words = line.split_whitespace();
        let cmd = words
            .next()
            .unwrap_or_default();
        let addr = words
            .next()
            .unwrap_or("0x0");

        let reply = match cmd {
            "loady" => {
                let mut receiver =
                    YmodemReceiver::new(Arc::clone(&self.receiver_log)).without_handshake();
                if let Some((blocks, signal)) = &self.abort_after {
                    receiver = receiver.abort_after(*blocks, signal.clone());
                }
                if let Some((index, times)) = self.nak_plan {
                    receiver = receiver.nak_data_block(index, times);
                }
                self.receiver = Some(receiver);
                rx.extend(
                    format!("## Ready for binary (ymodem) download to {addr} at 115200 bps...\r\nC")
                        .as_bytes(),
                );
                return false;
            },
            "reset" => {
                rx.extend(b"resetting ...\r\n");
                return false;
            },
            "md" => format!("{addr}: 27051956 0a0d0a0d 00000000 00000000    V'..............\r\n"),
            "sf" if addr == "probe" => {
                "SF: Detected w25q128 with page size 256 Bytes, erase size 4 KiB, total 16 MiB\r\n"
                    .to_string()
            },
            "sf" => match &self.flash_failure {
                Some(message) => format!("{message}\r\n"),
                None => {
                    let args: Vec<&str> = words.collect();
                    let offset = args
                        .get(1)
                        .unwrap_or(&"0x0");
                    let size = args
                        .get(2)
                        .unwrap_or(&"0x0");
                    format!(
                        "device 0 offset {offset}, size {size}\r\n{size} bytes written, 0 bytes skipped in 0.1s, speed 1 B/s\r\n"
                    )
                },
            },
            _ => format!("Unknown command '{cmd}' - try 'help'\r\n"),
        };
        rx.extend(reply.as_bytes());
        true
    }

    fn finish_transfer(&mut self, rx: &mut VecDeque<u8>) {
        let size = self
            .reported_size
            .unwrap_or_else(|| {
                self.receiver_log
                    .lock()
                    .unwrap()
                    .data
                    .len()
            });
        rx.extend(
            format!(
                "## Total Size      = 0x{size:08x} = {size} Bytes\r\n## Start Addr      = 0x82000000\r\n{UBOOT_PROMPT}"
            )
            .as_bytes(),
        );
    }
}

impl Responder for SimulatedUboot {
    fn on_write(&mut self, data: &[u8], rx: &mut VecDeque<u8>) {
        let mut rest = data;

        while !rest.is_empty() {
            if let Some(receiver) = self.receiver.as_mut() {
                receiver.on_bytes(rest, rx);
                if receiver.is_done() {
                    self.receiver = None;
                    self.finish_transfer(rx);
                }
                return;
            }

            let byte = rest[0];
            rest = &rest[1..];
            match byte {
                b'\r' | b'\n' => {
                    rx.extend(b"\r\n");
                    let line = String::from_utf8_lossy(&self.line).into_owned();
                    self.line
                        .clear();
                    self.run(&line, rx);
                },
                _ => {
                    rx.push_back(byte);
                    self.line
                        .push(byte);
                },
            }
        }
    }
}
