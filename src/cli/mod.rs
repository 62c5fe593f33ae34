//! CLI surface (ambient): `clap`-derived subcommands dispatching into the
//! dispatcher's run modes, plus the hidden internal worker sub-mode.

mod commands;
pub mod worker;

pub use commands::{is_verbose, run};
