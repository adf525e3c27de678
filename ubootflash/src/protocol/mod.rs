//! Protocol implementations.

pub mod crc;
pub mod ymodem;

// Re-export common types
pub use ymodem::{BlockSize, CheckMode, TransferPacket, TransferStats, YmodemConfig, YmodemSender};
