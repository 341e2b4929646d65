//! Command implementations.
//!
//! Each subcommand is implemented in its own module for clean separation.

pub(crate) mod completions;
pub(crate) mod encode;
pub(crate) mod link;
pub(crate) mod ports;
