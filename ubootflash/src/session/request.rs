//! What to load and where to save it.

use std::fs;
use std::path::{Path, PathBuf};

use log::warn;

use crate::error::{Error, Result};

/// Fallback name reported in the YMODEM header for paths without a file name.
const DEFAULT_FILE_NAME: &str = "firmware.bin";

/// A firmware image plus the addresses it is loaded to and saved at.
///
/// `size` is the byte count handed to the save command. It may exceed the
/// file (to cover a whole flash region) but never be smaller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    file: PathBuf,
    load_addr: u64,
    save_addr: u64,
    size: u64,
}

impl TransferRequest {
    /// Request with an explicit size.
    pub fn new(file: impl Into<PathBuf>, load_addr: u64, save_addr: u64, size: u64) -> Self {
        Self {
            file: file.into(),
            load_addr,
            save_addr,
            size,
        }
    }

    /// Request whose size is the current length of `file`.
    pub fn for_file(file: impl Into<PathBuf>, load_addr: u64, save_addr: u64) -> Result<Self> {
        let file = file.into();
        let size = fs::metadata(&file)?.len();
        Ok(Self::new(file, load_addr, save_addr, size))
    }

    /// Path of the firmware image.
    pub fn file(&self) -> &Path {
        &self.file
    }

    /// RAM address the image is loaded to.
    pub fn load_addr(&self) -> u64 {
        self.load_addr
    }

    /// Flash address the image is saved at.
    pub fn save_addr(&self) -> u64 {
        self.save_addr
    }

    /// Byte count passed to the save command.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Name sent in the YMODEM header.
    pub fn file_name(&self) -> String {
        self.file
            .file_name()
            .map_or_else(
                || DEFAULT_FILE_NAME.to_string(),
                |name| {
                    name.to_string_lossy()
                        .into_owned()
                },
            )
    }

    /// Read the image and check it against `size`.
    pub fn load_payload(&self) -> Result<Vec<u8>> {
        let data = fs::read(&self.file)?;
        let len = data.len() as u64;

        if self.size < len {
            return Err(Error::Config(format!(
                "size {} (0x{:x}) is smaller than {} ({} bytes)",
                self.size,
                self.size,
                self.file
                    .display(),
                len
            )));
        }
        if self.size > len {
            warn!(
                "Saving 0x{:x} bytes but the image is only 0x{:x} bytes",
                self.size, len
            );
        }
        Ok(data)
    }
}
