//! Command-line flags and `port.info` loading.

use std::path::PathBuf;

use clap::Parser;

const DEFAULT_PORT: u16 = 1256;
const PORT_INFO_FILE: &str = "port.info";
const FILES_DIR: &str = "server_files";

#[derive(Parser, Debug)]
#[command(name = "backup-server")]
#[command(about = "Encrypted file backup protocol server", long_about = None)]
pub struct Cli {
    /// Raise the log filter to debug.
    #[arg(long)]
    pub debug: bool,

    /// Log a line per request and response in addition to connection events.
    #[arg(long)]
    pub verbose: bool,
}

/// Resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub files_dir: PathBuf,
    pub debug: bool,
    pub verbose: bool,
}

impl ServerConfig {
    pub fn load(cli: Cli) -> Self {
        Self {
            port: read_port(PORT_INFO_FILE),
            files_dir: PathBuf::from(FILES_DIR),
            debug: cli.debug,
            verbose: cli.verbose,
        }
    }
}

/// Read a decimal port from `path`, falling back to 1256 if the file is
/// missing or its content doesn't parse as a u16.
fn read_port(path: &str) -> u16 {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(DEFAULT_PORT)
}
