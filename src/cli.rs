//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use url::Url;

/// Resilient content-delivery core for a desktop streaming client.
///
/// Streamvault fetches metadata through prioritized gateway endpoints,
/// downloads media into a local vault with resume and atomic finalization,
/// and serves it back to a local player over a byte-range HTTP protocol.
#[derive(Parser, Debug)]
#[command(name = "streamvault")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Vault directory for downloaded media
    #[arg(long, default_value = "vault", global = true)]
    pub vault_dir: PathBuf,

    /// SQLite database path (defaults to <vault-dir>/streamvault.db)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Gateway endpoint base URL, in priority order (repeat for failover)
    #[arg(short = 'e', long = "endpoint", global = true)]
    pub endpoints: Vec<Url>,

    /// Encrypt downloaded content at rest
    #[arg(long, global = true)]
    pub encrypt: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands exposed by the streamvault CLI.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Fetch metadata through the gateway (cached read-through)
    Fetch {
        /// Request path relative to the endpoint base (e.g. /catalog/titles)
        path: String,

        /// Query parameter as key=value (repeatable)
        #[arg(short = 'Q', long = "query", value_parser = parse_key_val)]
        query: Vec<(String, String)>,
    },

    /// Download content into the vault
    Download {
        /// Content identifier
        content_id: String,
        /// Quality variant (e.g. hd, sd)
        quality: String,
        /// Source URL for the content bytes
        url: String,
    },

    /// Cancel an in-flight download (keeps the partial artifact)
    Cancel {
        /// Content identifier
        content_id: String,
        /// Quality variant
        quality: String,
    },

    /// Serve downloaded content to a local player
    Serve {
        /// Content identifier
        content_id: String,
        /// Quality variant
        quality: String,
    },

    /// Show download task status
    Status {
        /// Content identifier (omit to list everything)
        content_id: Option<String>,
        /// Quality variant
        quality: Option<String>,
    },
}

/// Parses a `key=value` CLI argument.
fn parse_key_val(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got '{s}'"))
}
