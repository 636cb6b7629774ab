use std::io::{self, BufRead};

use anyhow::{Context, Result, bail};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use zeroize::Zeroizing;

use sharekeeper::cli::{Cli, Commands, RosterArgs};
use sharekeeper::client::{TrusteeOutcome, run_trustee};
use sharekeeper::commands::{Relay, combine_shares, generate_mnemonic, split_mnemonic};
use sharekeeper::config::{RosterConfig, key_variable, roster_from_env};
use sharekeeper::coordinator::Coordinator;
use sharekeeper::domain::{ShareCount, SplitConfig};
use sharekeeper::server;

/// Read a mnemonic securely from stdin (hidden input when TTY available)
fn read_mnemonic() -> Result<String> {
    // Try to use TTY for secure input
    if atty::is(atty::Stream::Stdin) {
        eprintln!("Enter mnemonic (12 or 24 words):");
        rpassword::read_password().context("Failed to read mnemonic from stdin")
    } else {
        // Non-interactive mode (piped input) - read directly from stdin
        let stdin = io::stdin();
        let mut handle = stdin.lock();
        let mut mnemonic = String::new();
        handle
            .read_line(&mut mnemonic)
            .context("Failed to read mnemonic from stdin")?;
        Ok(mnemonic.trim().to_string())
    }
}

/// Read shares securely from stdin (hidden input when TTY available)
/// User should input shares one per line, followed by an empty line to finish
fn read_shares() -> Result<Vec<String>> {
    let mut shares = Vec::new();

    if atty::is(atty::Stream::Stdin) {
        eprintln!("Enter shares (one per line, empty line to finish):");

        loop {
            let share = rpassword::read_password().context("Failed to read share from stdin")?;

            // Empty line signals we're done
            if share.trim().is_empty() {
                break;
            }

            shares.push(share.trim().to_string());
        }
    } else {
        let stdin = io::stdin();
        let handle = stdin.lock();

        for line in handle.lines() {
            let line = line.context("Failed to read line from stdin")?;
            let trimmed = line.trim();

            if trimmed.is_empty() {
                break;
            }

            shares.push(trimmed.to_string());
        }
    }

    if shares.is_empty() {
        bail!("No shares provided");
    }

    Ok(shares)
}

/// Loads the roster and prints the keys nobody configured
fn load_roster(args: &RosterArgs) -> Result<RosterConfig> {
    let config = roster_from_env(&args.owner, &args.peers)?;
    for (peer, key) in &config.generated {
        eprintln!(
            "No {} set, generated key for {peer}: {}",
            key_variable(peer.as_str()),
            key.expose()
        );
    }
    Ok(config)
}

async fn bind(listen: &str) -> Result<TcpListener> {
    TcpListener::bind(listen)
        .await
        .with_context(|| format!("Failed to listen on {listen}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("sharekeeper={},warn", cli.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    match cli.command {
        Commands::Split { shares, threshold } => {
            // Read mnemonic securely from stdin
            let mnemonic = Zeroizing::new(read_mnemonic()?);

            // Validate share count and create config
            let share_count = ShareCount::new(shares)?;
            let config = SplitConfig::new(threshold, share_count)?;

            for share in split_mnemonic(&mnemonic, config)? {
                println!("{share}");
            }
        }
        Commands::Combine => {
            // Read shares securely from stdin
            let shares = read_shares()?;
            let mnemonic = combine_shares(&shares)?;
            println!("{}", mnemonic.as_str());
        }
        Commands::Relay {
            roster,
            shares,
            threshold,
            read_mnemonic: from_stdin,
        } => {
            let config = SplitConfig::new(threshold, ShareCount::new(shares)?)?;
            let mnemonic = if from_stdin {
                Zeroizing::new(read_mnemonic()?)
            } else {
                let generated = generate_mnemonic()?;
                println!("Generated mnemonic: {}", generated.as_str());
                generated
            };

            let roster_config = load_roster(&roster)?;
            let listener = bind(&roster.listen).await?;
            let relay = Relay::start(
                listener,
                roster_config.roster,
                roster.policy,
                config,
                &mnemonic,
            )
            .await?;

            println!("Trustees join with:");
            for (trustee, token) in relay.tokens() {
                println!("  {}", relay.trustee_command(trustee, token));
            }
            println!("Press Enter to request the shares back");

            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            let recovered = relay.recover_on(stdin).await?;
            println!("Recovered mnemonic: {}", recovered.as_str());
        }
        Commands::Signal { roster } => {
            let roster_config = load_roster(&roster)?;
            let listener = bind(&roster.listen).await?;
            let (handle, _coordinator) =
                Coordinator::new(roster_config.roster, roster.policy).spawn();
            info!(policy = ?roster.policy, "signaling server starting");
            server::serve(listener, handle).await?;
        }
        Commands::Trustee { url, name, token } => {
            let token = Zeroizing::new(token);
            match run_trustee(&url, &name, &token).await? {
                TrusteeOutcome::Completed => println!("Recovery complete, share discarded"),
                TrusteeOutcome::Rejected(message) => {
                    error!(%message, "rejected by relay");
                    bail!("Relay rejected this trustee: {message}");
                }
                TrusteeOutcome::Disconnected => bail!("Relay closed the connection"),
            }
        }
    }

    Ok(())
}
