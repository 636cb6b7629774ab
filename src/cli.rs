use clap::{Parser, Subcommand};

use crate::domain::Threshold;
use crate::signaling::NegotiationPolicy;

/// Validates that threshold is at least 2
/// A threshold of 1 defeats the purpose of Shamir Secret Sharing
/// (any single share would be able to recover the entire secret)
fn validate_threshold(s: &str) -> Result<Threshold, String> {
    let value: u8 = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;

    Threshold::new(value).map_err(|e| e.to_string())
}

#[derive(Parser)]
#[command(name = "sharekeeper")]
#[command(about = "Split a secret among trustees and recover it once enough of them come back")]
pub struct Cli {
    /// Log filter used when RUST_LOG is not set
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

/// Who may join and how peers may talk to each other
#[derive(clap::Args, Debug, Clone)]
pub struct RosterArgs {
    /// Peer ids allowed to connect, owner included
    #[arg(long, env = "PEERS", value_delimiter = ',', default_value = "Owner,Alice,Bob,Charlie")]
    pub peers: Vec<String>,

    /// Id of the owner among the peers
    #[arg(long, env = "OWNER_ID", default_value = "Owner")]
    pub owner: String,

    /// Address to accept WebSocket connections on
    #[arg(long, env = "LISTEN", default_value = "127.0.0.1:8080")]
    pub listen: String,

    /// Which peers may negotiate direct channels with each other
    #[arg(long, env = "NEGOTIATION_POLICY", value_enum, default_value_t = NegotiationPolicy::OwnerMediated)]
    pub policy: NegotiationPolicy,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Split a mnemonic into shares
    Split {
        /// Number of shares to create
        #[arg(short, long)]
        shares: u8,

        /// Threshold: minimum number of shares needed to reconstruct (must be >= 2)
        #[arg(short, long, value_parser = validate_threshold)]
        threshold: Threshold,
    },
    /// Combine shares to reconstruct the original mnemonic
    Combine,
    /// Hold a mnemonic as the owner and hand shares to trustees over WebSocket
    Relay {
        #[command(flatten)]
        roster: RosterArgs,

        /// Number of shares, one per trustee
        #[arg(short, long, default_value_t = 3)]
        shares: u8,

        /// Trustees needed to recover (must be >= 2)
        #[arg(short, long, value_parser = validate_threshold, default_value = "2")]
        threshold: Threshold,

        /// Read the mnemonic to distribute from stdin instead of generating one
        #[arg(long)]
        read_mnemonic: bool,
    },
    /// Run the signaling server for owners and trustees with direct channels
    Signal {
        #[command(flatten)]
        roster: RosterArgs,
    },
    /// Join a relay as a trustee and hold a share until it is requested
    Trustee {
        /// Relay address, e.g. ws://127.0.0.1:8080
        #[arg(long, env = "RELAY_URL")]
        url: String,

        /// Trustee id
        #[arg(long)]
        name: String,

        /// One-time access token issued by the relay
        #[arg(long, env = "TRUSTEE_TOKEN")]
        token: String,
    },
}
