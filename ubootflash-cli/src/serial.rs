//! Interactive serial port selection.
//!
//! - Auto-detection of USB-UART bridges
//! - Interactive selection via dialoguer
//! - Remembering selected ports in configuration
//! - Non-interactive mode for CI

use {
    crate::{CliError, config::Config},
    anyhow::Result,
    console::style,
    dialoguer::{Confirm, Error as DialoguerError, Select, theme::ColorfulTheme},
    log::{debug, error, info},
    std::io::IsTerminal,
    ubootflash::{DetectedPort, PortInfo, detect_ports, format_port_list, pick_port},
};

/// Options for serial port selection.
#[derive(Debug, Clone, Default)]
pub struct SerialOptions {
    /// Explicit port specified via CLI.
    pub port: Option<String>,
    /// Offer every port, not just recognised adapters.
    pub list_all_ports: bool,
    /// Non-interactive mode (fail if multiple ports).
    pub non_interactive: bool,
    /// Force confirmation even for a single recognised port.
    pub confirm_port: bool,
}

/// Result of port selection including whether it was a known device.
pub struct SelectedPort {
    /// The selected port info.
    pub port: DetectedPort,
    /// Whether this port matched a known/configured device.
    pub is_known: bool,
}

fn usage_err(message: &str) -> anyhow::Error {
    CliError::Usage(message.to_string()).into()
}

fn cancelled_err() -> anyhow::Error {
    CliError::Cancelled("Port selection cancelled".to_string()).into()
}

/// Take the only element of `ports`, if there is exactly one.
fn single(ports: Vec<DetectedPort>) -> Option<DetectedPort> {
    let mut iter = ports.into_iter();
    match (iter.next(), iter.next()) {
        (Some(port), None) => Some(port),
        _ => None,
    }
}

fn select_non_interactive_port(
    selection_ports: Vec<DetectedPort>,
    config: &Config,
) -> Result<SelectedPort> {
    match selection_ports.len() {
        0 => Err(usage_err(
            "No serial ports available. Use --port to specify one.",
        )),
        1 => {
            let port = single(selection_ports).ok_or_else(|| usage_err("No serial ports available"))?;
            Ok(SelectedPort {
                is_known: is_known_device(&port, config),
                port,
            })
        },
        n => Err(usage_err(&format!(
            "Found {n} candidate ports (multiple); use --port to choose one in non-interactive mode:\n  {}",
            format_port_list(&selection_ports).join("\n  ")
        ))),
    }
}

/// Select a serial port interactively or automatically.
pub fn select_serial_port(options: &SerialOptions, config: &Config) -> Result<SelectedPort> {
    if let Some(port_name) = &options.port {
        return Ok(find_port_by_name(port_name));
    }

    if let Some(port_name) = &config
        .port
        .connection
        .serial
    {
        debug!("Using port from config: {port_name}");
        return Ok(find_port_by_name(port_name));
    }

    let ports = detect_ports();
    if ports.is_empty() {
        return Err(usage_err(
            "No serial ports found. Connect the board or pass --port.",
        ));
    }

    let selection_ports = selection_candidates(ports, config, options.list_all_ports);

    if options.non_interactive {
        return select_non_interactive_port(selection_ports, config);
    }

    if selection_ports.len() > 1 {
        ensure_interactive_terminal()?;
        return select_port_interactive(selection_ports, config);
    }

    let port = single(selection_ports).ok_or_else(|| usage_err("No serial ports available"))?;
    let is_known = is_known_device(&port, config);
    if is_known && !options.confirm_port {
        info!(
            "Auto-selected port: {} [{}]",
            port.name,
            port.adapter
                .name()
        );
        Ok(SelectedPort { port, is_known })
    } else {
        ensure_interactive_terminal()?;
        confirm_single_port(port)
    }
}

/// Ports offered for selection: recognised devices when any exist, otherwise all.
pub(crate) fn selection_candidates(
    ports: Vec<DetectedPort>,
    config: &Config,
    list_all_ports: bool,
) -> Vec<DetectedPort> {
    if list_all_ports {
        return ports;
    }
    let known_ports: Vec<DetectedPort> = ports
        .iter()
        .filter(|p| is_known_device(p, config))
        .cloned()
        .collect();
    if known_ports.is_empty() {
        ports
    } else {
        known_ports
    }
}

/// Index the picker starts on.
pub(crate) fn default_index(ports: &[DetectedPort]) -> usize {
    pick_port(ports)
        .and_then(|best| {
            ports
                .iter()
                .position(|p| p.name == best.name)
        })
        .unwrap_or(0)
}

fn ensure_interactive_terminal() -> Result<()> {
    if std::io::stdin().is_terminal() && std::io::stderr().is_terminal() {
        Ok(())
    } else {
        Err(usage_err(
            "Port selection needs an interactive terminal; pass --port",
        ))
    }
}

fn map_prompt_error(err: DialoguerError) -> anyhow::Error {
    match err {
        DialoguerError::IO(io_err) => {
            if io_err.kind() == std::io::ErrorKind::Interrupted {
                cancelled_err()
            } else {
                usage_err(&format!("Prompt failed: {io_err}"))
            }
        },
    }
}

/// Look the name up among detected ports; unknown names are used as given.
fn find_port_by_name(name: &str) -> SelectedPort {
    let ports = detect_ports();

    let found = ports
        .iter()
        .find(|p| p.name == name)
        .or_else(|| {
            ports
                .iter()
                .find(|p| {
                    p.name
                        .eq_ignore_ascii_case(name)
                })
        });

    match found {
        Some(port) => SelectedPort {
            port: port.clone(),
            is_known: port
                .adapter
                .is_known(),
        },
        None => SelectedPort {
            port: DetectedPort::from(PortInfo {
                name: name.to_string(),
                vid: None,
                pid: None,
                manufacturer: None,
                product: None,
                serial_number: None,
            }),
            is_known: false,
        },
    }
}

/// Check if a port matches a known adapter or a remembered USB device.
fn is_known_device(port: &DetectedPort, config: &Config) -> bool {
    if port
        .adapter
        .is_known()
    {
        return true;
    }

    match (port.vid, port.pid) {
        (Some(vid), Some(pid)) => config
            .port
            .usb_device
            .iter()
            .any(|d| d.matches(vid, pid)),
        _ => false,
    }
}

fn port_label(port: &DetectedPort, config: &Config) -> String {
    let name = if is_known_device(port, config) {
        style(&port.name)
            .bold()
            .to_string()
    } else {
        port.name
            .clone()
    };

    let adapter = if port
        .adapter
        .is_known()
    {
        format!(
            " [{}]",
            style(
                port.adapter
                    .name()
            )
            .yellow()
        )
    } else if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
        format!(" ({vid:04X}:{pid:04X})")
    } else {
        String::new()
    };

    let product = port
        .product
        .as_ref()
        .map(|p| format!(" - {}", style(p).dim()))
        .unwrap_or_default();

    format!("{name}{adapter}{product}")
}

fn select_port_interactive(mut ports: Vec<DetectedPort>, config: &Config) -> Result<SelectedPort> {
    eprintln!(
        "{} Detected {} serial ports",
        style("ℹ").blue(),
        ports.len()
    );
    eprintln!(
        "{}",
        style("Recognised USB-UART adapters are shown in bold").dim()
    );

    ports.sort_by_key(|p| !is_known_device(p, config));

    // Keep labels on one line in narrow terminals.
    let term_width = console::Term::stderr()
        .size()
        .1 as usize;
    let max_item_width = term_width.saturating_sub(4);
    let labels: Vec<String> = ports
        .iter()
        .map(|p| {
            console::truncate_str(&port_label(p, config), max_item_width, "\u{2026}").into_owned()
        })
        .collect();

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Select the serial port connected to the board")
        .items(&labels)
        .default(default_index(&ports))
        .interact_opt()
        .map_err(map_prompt_error)?;

    let Some(index) = selection else {
        return Err(cancelled_err());
    };
    let port = ports
        .into_iter()
        .nth(index)
        .ok_or_else(|| anyhow::anyhow!("Invalid port index: {index}"))?;
    let is_known = is_known_device(&port, config);
    Ok(SelectedPort { port, is_known })
}

/// Confirm use of a single unrecognised port.
fn confirm_single_port(port: DetectedPort) -> Result<SelectedPort> {
    let product_info = port
        .product
        .as_ref()
        .map(|p| format!(" - {p}"))
        .unwrap_or_default();

    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(format!("Use {}{product_info}?", port.name))
        .default(true)
        .interact_opt()
        .map_err(map_prompt_error)?
        .unwrap_or(false);

    if confirmed {
        Ok(SelectedPort {
            port,
            is_known: false,
        })
    } else {
        Err(cancelled_err())
    }
}

/// Ask user if they want to remember this port.
pub fn ask_remember_port(port: &DetectedPort, config: &mut Config) -> Result<()> {
    let (Some(vid), Some(pid)) = (port.vid, port.pid) else {
        return Ok(());
    };
    if config
        .port
        .usb_device
        .iter()
        .any(|d| d.matches(vid, pid))
    {
        return Ok(());
    }

    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt("Remember this adapter for auto-detection?")
        .default(false)
        .interact_opt()
        .map_err(map_prompt_error)?
        .unwrap_or(false);

    if confirmed {
        if let Err(e) = config.remember_usb_device(vid, pid) {
            error!("Failed to save port configuration: {e}");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        console::{measure_text_width, truncate_str},
    };

    fn port(name: &str, vid: Option<u16>, pid: Option<u16>) -> DetectedPort {
        DetectedPort::from(PortInfo {
            name: name.to_string(),
            vid,
            pid,
            manufacturer: None,
            product: None,
            serial_number: None,
        })
    }

    fn assert_usage(err: &anyhow::Error) {
        assert!(matches!(
            err.downcast_ref::<CliError>(),
            Some(CliError::Usage(_))
        ));
    }

    #[test]
    fn test_serial_options_default() {
        let options = SerialOptions::default();
        assert!(
            options
                .port
                .is_none()
        );
        assert!(!options.list_all_ports);
        assert!(!options.non_interactive);
        assert!(!options.confirm_port);
    }

    #[test]
    fn test_port_label_truncates_without_wrapping() {
        let mut p = port("/dev/verylongttyusb0", Some(0x1A86), Some(0x7523));
        p.product = Some("Very Long Product Name That Would Wrap".to_string());
        let label = port_label(&p, &Config::default());

        let truncated = truncate_str(&label, 26, "…").into_owned();
        assert!(!truncated.contains('\n'));
        assert!(measure_text_width(&truncated) <= 26);
        assert!(console::strip_ansi_codes(&truncated).starts_with("/dev/verylong"));
    }

    #[test]
    fn test_is_known_device_builtin() {
        let p = port("/dev/ttyUSB0", Some(0x1A86), Some(0x7523));
        assert!(is_known_device(&p, &Config::default()));
    }

    #[test]
    fn test_is_known_device_unknown() {
        let p = port("/dev/ttyUSB0", Some(0x9999), Some(0x9999));
        assert!(!is_known_device(&p, &Config::default()));
        assert!(!is_known_device(&port("/dev/ttyS0", None, None), &Config::default()));
    }

    #[test]
    fn test_is_known_device_from_config() {
        let p = port("/dev/ttyACM0", Some(0xABCD), Some(0x1234));
        let mut config = Config::default();
        config
            .port
            .usb_device
            .push(crate::config::UsbDevice {
                vid: 0xABCD,
                pid: 0x1234,
            });
        assert!(is_known_device(&p, &config));
    }

    #[test]
    fn test_select_non_interactive_multiple_ports_returns_usage_error() {
        let ports = vec![port("/dev/ttyUSB0", None, None), port("/dev/ttyUSB1", None, None)];
        let err = select_non_interactive_port(ports, &Config::default())
            .err()
            .unwrap();
        assert_usage(&err);
        assert!(err.to_string().contains("multiple"));
    }

    #[test]
    fn test_select_non_interactive_no_ports_returns_usage_error() {
        let err = select_non_interactive_port(vec![], &Config::default())
            .err()
            .unwrap();
        assert_usage(&err);
    }

    #[test]
    fn test_select_non_interactive_single_port() {
        let ports = vec![port("/dev/ttyUSB0", Some(0x10C4), Some(0xEA60))];
        let selected = select_non_interactive_port(ports, &Config::default()).unwrap();
        assert_eq!(selected.port.name, "/dev/ttyUSB0");
        assert!(selected.is_known);
    }

    #[test]
    fn test_selection_candidates_prefer_known_devices() {
        let ports = vec![
            port("/dev/ttyS0", None, None),
            port("/dev/ttyUSB0", Some(0x1A86), Some(0x7523)),
            port("/dev/ttyUSB1", Some(0x10C4), Some(0xEA60)),
        ];
        let config = Config::default();

        let names = |ports: Vec<DetectedPort>| -> Vec<String> {
            ports
                .into_iter()
                .map(|p| p.name)
                .collect()
        };
        assert_eq!(
            names(selection_candidates(ports.clone(), &config, false)),
            vec!["/dev/ttyUSB0", "/dev/ttyUSB1"]
        );
        assert_eq!(names(selection_candidates(ports.clone(), &config, true)).len(), 3);
        assert_eq!(
            names(selection_candidates(ports[..1].to_vec(), &config, false)),
            vec!["/dev/ttyS0"]
        );
    }

    #[test]
    fn test_default_index_follows_pick_port() {
        let ports = vec![
            port("/dev/ttyACM0", Some(0xABCD), Some(0x1234)),
            port("/dev/ttyUSB0", Some(0x0403), Some(0x6001)),
        ];
        assert_eq!(default_index(&ports), 1);
        assert_eq!(default_index(&ports[..1]), 0);
        assert_eq!(default_index(&[]), 0);
    }

    #[test]
    fn test_explicit_port_is_used_verbatim() {
        let options = SerialOptions {
            port: Some("/dev/ubootflash-test-port".to_string()),
            non_interactive: true,
            ..Default::default()
        };
        let selected = select_serial_port(&options, &Config::default()).unwrap();
        assert_eq!(selected.port.name, "/dev/ubootflash-test-port");
        assert!(!selected.is_known);
    }
}
