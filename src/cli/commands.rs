//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - tools: print the unified catalog
//! - call: invoke one tool
//! - watch: run periodic refresh and print events
//! - serve: run the IPC serving layer
//! - check: validate configuration

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// RMF - one namespaced tool catalog over many remote tool servers
#[derive(Parser, Debug)]
#[command(name = "rmf")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Refresh once and list every tool
    Tools {
        /// Print the catalog as JSON
        #[arg(long)]
        json: bool,
    },

    /// Invoke a tool by its namespaced id
    Call {
        /// Tool id, e.g. fetch.get_webpage
        tool: String,

        /// Arguments as a JSON object
        #[arg(short, long, default_value = "{}")]
        args: String,

        /// Deadline in seconds (defaults to server.request_timeout)
        #[arg(short, long)]
        timeout: Option<f64>,
    },

    /// Refresh periodically and print events until Ctrl-C
    Watch {
        /// Refresh interval in seconds
        #[arg(short, long)]
        interval: Option<f64>,
    },

    /// Serve the gateway on a Unix socket until Ctrl-C
    Serve {
        /// Socket path (defaults to server.socket_path)
        #[arg(short, long)]
        socket: Option<PathBuf>,
    },

    /// Validate configuration and backends, then exit
    Check,
}
