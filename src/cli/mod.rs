//! CLI command definitions and parsing
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "ipscope",
    version,
    author = "neur0map",
    about = "IP enrichment backend backed by the Shodan host-intelligence API",
    long_about = "ipscope accepts IP addresses, enriches each one through Shodan, stores the \
                  results in SQLite and serves them over a small JSON API, either as one \
                  batch response or as a live event stream."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/ipscope/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP API server
    Serve {
        /// Address to listen on (overrides server.bind)
        #[arg(short, long, value_name = "ADDR")]
        bind: Option<String>,
    },

    /// Enrich addresses from the terminal, printing each result as it lands
    Enrich {
        /// Addresses to enrich
        ips: Vec<String>,

        /// Read addresses from a file, one per line
        #[arg(short, long, value_name = "FILE")]
        file: Option<PathBuf>,

        /// Shodan API key (defaults to the configured environment variable)
        #[arg(short = 'k', long, value_name = "KEY")]
        api_key: Option<String>,

        /// Print events as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// List stored records
    List {
        /// Show results in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show the effective configuration
    Show,

    /// Validate a configuration file
    Validate {
        /// File to validate (defaults to the standard location)
        file: Option<PathBuf>,
    },

    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

impl Cli {
    /// Parse command-line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
