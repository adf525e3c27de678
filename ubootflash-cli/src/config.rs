//! Configuration file support for ubootflash.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (UBOOTFLASH_*)
//! 3. Local config file (./ubootflash.toml or ./ubootflash_ports.toml)
//! 4. Global config file (~/.config/ubootflash/config.toml)

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use ubootflash::{BlockSize, Pattern, SessionConfig};

/// Local configuration file name.
pub const LOCAL_CONFIG: &str = "ubootflash.toml";
/// Local remembered-ports file name.
pub const LOCAL_PORTS: &str = "ubootflash_ports.toml";

/// USB device identification for port matching.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsbDevice {
    /// USB Vendor ID.
    pub vid: u16,
    /// USB Product ID.
    pub pid: u16,
}

impl UsbDevice {
    /// Check if this device matches the given USB info.
    pub fn matches(&self, vid: u16, pid: u16) -> bool {
        self.vid == vid && self.pid == pid
    }
}

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Preferred serial port (e.g., "/dev/ttyUSB0" or "COM3").
    pub serial: Option<String>,
    /// Default baud rate.
    pub baud: Option<u32>,
}

/// Port-specific configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortConfig {
    /// Connection settings.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Known USB devices for auto-detection.
    #[serde(default)]
    pub usb_device: Vec<UsbDevice>,
}

/// Bootloader console strings and command templates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BootloaderConfig {
    /// Prompt pattern (`re:` prefix for a regex).
    pub prompt: Option<String>,
    /// Banner printed when `loady` is ready.
    pub ready_banner: Option<String>,
    /// Banner printed by the reset command.
    pub reset_banner: Option<String>,
    /// Error banner; an empty string disables detection.
    pub error_banner: Option<String>,
    /// Load command template.
    pub load_command: Option<String>,
    /// Save command template.
    pub save_command: Option<String>,
    /// Reset command template.
    pub reset_command: Option<String>,
    /// Inspect command template run between transfer and save.
    pub inspect_command: Option<String>,
    /// Line terminator appended to commands.
    pub line_terminator: Option<String>,
}

/// YMODEM transfer settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Data block size, 128 or 1024.
    pub block_size: Option<usize>,
    /// Resends per packet before giving up.
    pub retries: Option<u32>,
    /// Keep poking the console while waiting for the first prompt.
    #[serde(default)]
    pub wake: bool,
}

/// Timeouts in seconds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// First prompt.
    pub prompt: Option<u64>,
    /// Banners and prompts after ordinary commands.
    pub command: Option<u64>,
    /// Prompt after the save command.
    pub save: Option<u64>,
    /// Receiver start request.
    pub transfer: Option<u64>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Port configuration.
    #[serde(default)]
    pub port: PortConfig,
    /// Bootloader strings.
    #[serde(default)]
    pub bootloader: BootloaderConfig,
    /// Transfer settings.
    #[serde(default)]
    pub transfer: TransferConfig,
    /// Timeouts.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                if let Some(global_config) = Self::load_from_file(&global_path) {
                    debug!("Loaded global config from {}", global_path.display());
                    config.merge(global_config);
                }
            }
        }

        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG)) {
            debug!("Loaded local config from {LOCAL_CONFIG}");
            config.merge(local_config);
        }

        if let Some(ports_config) = Self::load_ports_config() {
            config.port = ports_config;
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    fn load_ports_config() -> Option<PortConfig> {
        let local = PathBuf::from(LOCAL_PORTS);
        let global = Self::global_config_dir().map(|dir| dir.join("ports.toml"));

        [Some(local), global]
            .into_iter()
            .flatten()
            .filter(|path| path.exists())
            .find_map(|path| {
                let content = fs::read_to_string(&path).ok()?;
                let config = toml::from_str(&content).ok()?;
                debug!("Loaded ports config from {}", path.display());
                Some(config)
            })
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "ubootflash").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    fn merge(&mut self, other: Self) {
        fn take<T>(slot: &mut Option<T>, value: Option<T>) {
            if value.is_some() {
                *slot = value;
            }
        }

        take(&mut self.port.connection.serial, other.port.connection.serial);
        take(&mut self.port.connection.baud, other.port.connection.baud);
        self.port
            .usb_device
            .extend(other.port.usb_device);

        let ours = &mut self.bootloader;
        let theirs = other.bootloader;
        take(&mut ours.prompt, theirs.prompt);
        take(&mut ours.ready_banner, theirs.ready_banner);
        take(&mut ours.reset_banner, theirs.reset_banner);
        take(&mut ours.error_banner, theirs.error_banner);
        take(&mut ours.load_command, theirs.load_command);
        take(&mut ours.save_command, theirs.save_command);
        take(&mut ours.reset_command, theirs.reset_command);
        take(&mut ours.inspect_command, theirs.inspect_command);
        take(&mut ours.line_terminator, theirs.line_terminator);

        take(&mut self.transfer.block_size, other.transfer.block_size);
        take(&mut self.transfer.retries, other.transfer.retries);
        if other.transfer.wake {
            self.transfer.wake = true;
        }

        take(&mut self.timeouts.prompt, other.timeouts.prompt);
        take(&mut self.timeouts.command, other.timeouts.command);
        take(&mut self.timeouts.save, other.timeouts.save);
        take(&mut self.timeouts.transfer, other.timeouts.transfer);
    }

    /// Build a [`SessionConfig`] from the file settings on top of the library defaults.
    pub fn session_config(&self) -> anyhow::Result<SessionConfig> {
        let mut session = SessionConfig::default();
        let boot = &self.bootloader;

        if let Some(ref prompt) = boot.prompt {
            session = session.with_prompt(Pattern::parse(prompt)?);
        }
        if let Some(ref banner) = boot.ready_banner {
            session = session.with_ready_banner(Pattern::parse(banner)?);
        }
        if let Some(ref banner) = boot.reset_banner {
            session = session.with_reset_banner(Pattern::parse(banner)?);
        }
        if let Some(ref banner) = boot.error_banner {
            let banner = if banner.is_empty() {
                None
            } else {
                Some(Pattern::parse(banner)?)
            };
            session = session.with_error_banner(banner);
        }
        if let Some(ref template) = boot.load_command {
            session = session.with_load_command(template);
        }
        if let Some(ref template) = boot.save_command {
            session = session.with_save_command(template);
        }
        if let Some(ref template) = boot.reset_command {
            session = session.with_reset_command(template);
        }
        if boot.inspect_command.is_some() {
            session = session.with_inspect_command(boot.inspect_command.clone());
        }
        if let Some(ref terminator) = boot.line_terminator {
            session = session.with_line_terminator(terminator);
        }

        let mut ymodem = session.ymodem.clone();
        if let Some(len) = self.transfer.block_size {
            ymodem.block_size = BlockSize::from_len(len)
                .ok_or_else(|| {
                    ubootflash::Error::Config(format!("block_size must be 128 or 1024, got {len}"))
                })?;
        }
        if let Some(retries) = self.transfer.retries {
            ymodem.max_retries = retries;
        }
        if let Some(secs) = self.timeouts.transfer {
            ymodem.start_timeout = Duration::from_secs(secs);
        }
        session = session.with_ymodem(ymodem);

        if self.transfer.wake {
            session = session.with_wake_interval(Some(Duration::from_secs(1)));
        }
        if let Some(secs) = self.timeouts.prompt {
            session = session.with_prompt_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = self.timeouts.command {
            session = session.with_command_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = self.timeouts.save {
            session = session.with_save_timeout(Duration::from_secs(secs));
        }

        Ok(session)
    }

    /// Save USB device for future auto-detection.
    pub fn remember_usb_device(&mut self, vid: u16, pid: u16) -> anyhow::Result<()> {
        let device = UsbDevice { vid, pid };

        if self
            .port
            .usb_device
            .contains(&device)
        {
            return Ok(());
        }

        let path = if Path::new(LOCAL_PORTS).exists() || Path::new(LOCAL_CONFIG).exists() {
            PathBuf::from(LOCAL_PORTS)
        } else if let Some(global_dir) = Self::global_config_dir() {
            fs::create_dir_all(&global_dir)?;
            global_dir.join("ports.toml")
        } else {
            PathBuf::from(LOCAL_PORTS)
        };

        self.port
            .usb_device
            .push(device);

        let content = toml::to_string_pretty(&self.port)?;
        fs::write(&path, content)?;
        info!("Saved USB device to {}", path.display());

        Ok(())
    }
}
