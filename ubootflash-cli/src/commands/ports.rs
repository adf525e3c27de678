//! `list-ports` command.

use console::style;
use ubootflash::{DetectedPort, detect_ports};

use crate::config::Config;
use crate::serial::{default_index, selection_candidates};

fn is_remembered(port: &DetectedPort, config: &Config) -> bool {
    match (port.vid, port.pid) {
        (Some(vid), Some(pid)) => config
            .port
            .usb_device
            .iter()
            .any(|d| d.matches(vid, pid)),
        _ => false,
    }
}

/// List serial ports to stderr, or as a JSON array to stdout.
pub(crate) fn cmd_list_ports(json: bool, config: &Config) {
    let detected = detect_ports();

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&detected).unwrap_or_else(|_| "[]".to_string())
        );
        return;
    }

    eprintln!(
        "{}",
        style("Available serial ports")
            .bold()
            .underlined()
    );

    if detected.is_empty() {
        eprintln!("  {}", style("No serial ports found").dim());
        return;
    }

    for port in &detected {
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
        } else {
            String::new()
        };
        let vid_pid = match (port.vid, port.pid) {
            (Some(vid), Some(pid)) => format!(" ({vid:04X}:{pid:04X})"),
            _ => String::new(),
        };
        let remembered = if is_remembered(port, config) {
            format!(" {}", style("(remembered)").green())
        } else {
            String::new()
        };
        let product = port
            .product
            .as_deref()
            .map(|p| format!(" - {}", style(p).dim()))
            .unwrap_or_default();

        eprintln!(
            "  {} {}{adapter}{vid_pid}{remembered}{product}",
            style("•").green(),
            style(&port.name).cyan()
        );
    }

    let Some(hint) = selection_hint(&detected, config) else {
        return;
    };
    eprintln!();
    match hint {
        SelectionHint::Configured(name) => eprintln!(
            "{} Configured: {}",
            style("→")
                .green()
                .bold(),
            style(name).cyan()
        ),
        SelectionHint::Single(name) => eprintln!(
            "{} Auto-selected: {}",
            style("→")
                .green()
                .bold(),
            style(name)
                .cyan()
                .bold()
        ),
        SelectionHint::Picker { count, default } => eprintln!(
            "{} {count} candidates; `load` will ask (default {}) unless --port is given",
            style("→")
                .yellow()
                .bold(),
            style(default).cyan()
        ),
    }
}

/// What `load` would do with these ports.
#[derive(Debug, PartialEq, Eq)]
enum SelectionHint {
    Configured(String),
    Single(String),
    Picker { count: usize, default: String },
}

fn selection_hint(detected: &[DetectedPort], config: &Config) -> Option<SelectionHint> {
    if let Some(ref name) = config
        .port
        .connection
        .serial
    {
        return Some(SelectionHint::Configured(name.clone()));
    }
    let mut candidates = selection_candidates(detected.to_vec(), config, false);
    match candidates.len() {
        0 => None,
        1 => Some(SelectionHint::Single(candidates.remove(0).name)),
        count => {
            let default = default_index(&candidates);
            Some(SelectionHint::Picker {
                count,
                default: candidates
                    .swap_remove(default)
                    .name,
            })
        },
    }
}
