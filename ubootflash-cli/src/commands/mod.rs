//! Command implementations.
//!
//! Each subcommand is implemented in its own module.

pub(crate) mod completions;
pub(crate) mod load;
pub(crate) mod monitor;
pub(crate) mod ports;
