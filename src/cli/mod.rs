//! CLI module for rmf - command-line interface and subcommands.

pub mod commands;

pub use commands::Cli;
