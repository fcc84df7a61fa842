//! CLI argument model for the `argus` binary.
//!
//! Flags fall back to `ARGUS_*` environment variables so the server can be
//! configured entirely from a process manager.

pub mod cli_args;

pub use cli_args::*;
