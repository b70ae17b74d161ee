use clap::{Parser, Subcommand};
use std::path::PathBuf;
use url::Url;

/// Define CLI arguments
#[derive(Parser)]
#[command(
    author = "hua0512 <https://github.com/hua0512>",
    version,
    about = "Partial-content media cache",
    long_about = "Reads byte ranges of remote media through a local partial-content cache.\n\
                  Bytes already on disk are served from the cache; only the missing ranges\n\
                  are fetched from the origin, and they are stored for the next read."
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,

    /// Cache directory
    #[arg(
        long,
        global = true,
        help = "Directory holding cached resources (default: <temp>/mcache)"
    )]
    pub cache_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true, help = "Enable detailed debug logging")]
    pub verbose: bool,

    /// Overall timeout in seconds
    #[arg(
        long,
        global = true,
        default_value = "0",
        help = "Overall timeout in seconds for HTTP requests (0 disables it)"
    )]
    pub timeout: u64,

    /// Connection timeout in seconds
    #[arg(
        long,
        global = true,
        default_value = "10",
        help = "Connection timeout in seconds (time to establish initial connection)"
    )]
    pub connect_timeout: u64,

    /// Read timeout in seconds
    #[arg(
        long,
        global = true,
        default_value = "30",
        help = "Read timeout in seconds (maximum time between receiving data chunks)"
    )]
    pub read_timeout: u64,

    /// Custom HTTP headers for origin requests
    #[arg(
        long = "header",
        short = 'H',
        global = true,
        help = "Add custom HTTP header to origin requests (can be used multiple times). Format: 'Name: Value'",
        value_name = "HEADER"
    )]
    pub headers: Vec<String>,

    /// Query keys that do not identify the content
    #[arg(
        long = "ignore-query",
        global = true,
        help = "Query parameter to ignore when naming cached resources (can be used multiple times)",
        value_name = "KEY"
    )]
    pub ignored_query_keys: Vec<String>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Read a byte range through the cache
    Read {
        /// Origin URL
        url: Url,

        #[arg(
            long,
            default_value = "0",
            help = "First byte to read, with optional unit (B, KB, MB, GB)"
        )]
        offset: String,

        #[arg(
            short,
            long,
            help = "Number of bytes to read, with optional unit (default: to the end)"
        )]
        length: Option<String>,

        #[arg(short, long, help = "Write the bytes to this file instead of stdout")]
        output: Option<PathBuf>,

        #[arg(
            short = 'P',
            long = "progress",
            default_value = "false",
            help = "Show a progress bar"
        )]
        show_progress: bool,
    },

    /// Show what is cached for a URL
    Inspect {
        /// Origin URL
        url: Url,
    },

    /// Print the local proxy URL for an origin URL
    ProxyUrl {
        /// Origin URL
        url: Url,

        #[arg(
            long,
            default_value = "http://127.0.0.1:8080/",
            help = "Base URL of the local server"
        )]
        server: Url,
    },

    /// Print the origin URL encoded in a proxy URL
    OriginUrl {
        /// Proxy URL
        proxy: Url,
    },
}
