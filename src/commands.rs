use std::net::SocketAddr;

use anyhow::{Context, Result, anyhow, bail};
use bip39::{Language, Mnemonic};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use rand::RngCore;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::coordinator::{Coordinator, CoordinatorHandle};
use crate::domain::{PeerId, SplitConfig};
use crate::error::RecoveryError;
use crate::registry::{AccessToken, Roster};
use crate::server;
use crate::sharing::{self, Secret, Share};
use crate::signaling::NegotiationPolicy;

/// Parses a BIP39 mnemonic into the entropy it encodes
///
/// # Errors
/// Returns an error if the mnemonic is not valid English BIP39
pub fn mnemonic_secret(mnemonic_str: &str) -> Result<Secret> {
    let mnemonic = Mnemonic::parse_in(Language::English, mnemonic_str)
        .context("Failed to parse input mnemonic")?;
    Ok(Secret::new(mnemonic.to_entropy()))
}

/// Turns recovered entropy back into its mnemonic
///
/// # Errors
/// Returns an error if the entropy has a length BIP39 does not allow
pub fn secret_mnemonic(secret: &Secret) -> Result<Zeroizing<String>> {
    let mnemonic = Mnemonic::from_entropy(secret.as_bytes())
        .context("Failed to create mnemonic from recovered entropy")?;
    Ok(Zeroizing::new(mnemonic.to_string()))
}

/// Generates a fresh 12-word mnemonic
///
/// # Errors
/// Only if bip39 rejects 16 bytes of entropy
pub fn generate_mnemonic() -> Result<Zeroizing<String>> {
    let mut entropy = Zeroizing::new([0u8; 16]);
    rand::thread_rng().fill_bytes(&mut *entropy);
    secret_mnemonic(&Secret::new(entropy.to_vec()))
}

/// Split a mnemonic into encoded shares
///
/// Returns one hex share per trustee.
///
/// # Errors
/// Returns an error if mnemonic parsing or the split fails
pub fn split_mnemonic(mnemonic_str: &str, config: SplitConfig) -> Result<Vec<String>> {
    let secret = mnemonic_secret(mnemonic_str)?;
    let shares = sharing::split(&secret, config)?;
    Ok(shares.iter().map(Share::encode).collect())
}

/// Combine encoded shares to reconstruct the original mnemonic
///
/// # Errors
/// Returns an error if a share fails to decode, the shares do not belong
/// together, there are too few of them, or the secret fails its checksum
pub fn combine_shares(share_strings: &[String]) -> Result<Zeroizing<String>> {
    if share_strings.is_empty() {
        bail!("No shares provided");
    }

    let shares = share_strings
        .iter()
        .enumerate()
        .map(|(idx, encoded)| {
            Share::decode(encoded).with_context(|| format!("Failed to parse share #{}", idx + 1))
        })
        .collect::<Result<Vec<_>>>()?;

    let secret = sharing::combine(&shares)?;
    secret_mnemonic(&secret)
}

/// A running centralized relay that holds one distributed mnemonic
pub struct Relay {
    addr: SocketAddr,
    handle: CoordinatorHandle,
    tokens: Vec<(PeerId, AccessToken)>,
    server: JoinHandle<Result<()>>,
    coordinator: JoinHandle<()>,
}

impl Relay {
    /// Splits `mnemonic` for every trustee on the roster and starts
    /// accepting trustees on `listener`
    ///
    /// # Errors
    /// Returns an error if the mnemonic is invalid, or the roster's trustee
    /// count differs from the configured share count
    pub async fn start(
        listener: TcpListener,
        roster: Roster,
        policy: NegotiationPolicy,
        config: SplitConfig,
        mnemonic: &str,
    ) -> Result<Self> {
        let secret = mnemonic_secret(mnemonic)?;
        let trustees: Vec<PeerId> = roster.trustees().cloned().collect();
        if trustees.len() != config.share_count().as_usize() {
            bail!(
                "The roster has {} trustees but {} shares were requested",
                trustees.len(),
                *config.share_count()
            );
        }

        let addr = listener
            .local_addr()
            .context("Failed to read listen address")?;
        let (handle, coordinator) = Coordinator::new(roster, policy).spawn();
        let tokens = handle.open_session(secret, config, trustees).await?;
        let server = tokio::spawn(server::serve(listener, handle.clone()));
        info!(%addr, "relay started");

        Ok(Self {
            addr,
            handle,
            tokens,
            server,
            coordinator,
        })
    }

    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    #[must_use]
    pub fn handle(&self) -> &CoordinatorHandle {
        &self.handle
    }

    /// The one-time token issued to each trustee
    #[must_use]
    pub fn tokens(&self) -> &[(PeerId, AccessToken)] {
        &self.tokens
    }

    /// Command line a trustee runs to join this relay
    #[must_use]
    pub fn trustee_command(&self, trustee: &PeerId, token: &AccessToken) -> String {
        format!(
            "sharekeeper trustee --url ws://{} --name {trustee} --token {}",
            self.addr,
            token.expose()
        )
    }

    /// Tries one recovery round
    ///
    /// # Errors
    /// Recovery could not start, or the round failed
    pub async fn recover(&self) -> Result<Zeroizing<String>> {
        let ticket = self.handle.request_shares().await?;
        info!(
            trustees = ticket.participants().len(),
            "waiting for shares"
        );
        let secret = ticket.outcome().await?;
        secret_mnemonic(&secret)
    }

    /// Starts a recovery request for every line read from `input` until one
    /// succeeds, then shuts the relay down
    ///
    /// A line read while a request is still collecting supersedes it. Once
    /// `input` ends, a pending request is still waited for.
    ///
    /// # Errors
    /// Returns an error if `input` ends with no request left to wait for
    pub async fn recover_on<R: AsyncBufRead + Unpin>(self, input: R) -> Result<Zeroizing<String>> {
        let mut lines = input.lines();
        let mut input_open = true;
        let mut pending: Option<BoxFuture<'static, Result<Secret, RecoveryError>>> = None;

        loop {
            let step = match (pending.as_mut(), input_open) {
                (Some(outcome), true) => tokio::select! {
                    result = outcome => Step::Finished(result),
                    line = lines.next_line() => Step::Line(line.context("Failed to read from stdin")?),
                },
                (Some(outcome), false) => Step::Finished(outcome.await),
                (None, true) => Step::Line(
                    lines
                        .next_line()
                        .await
                        .context("Failed to read from stdin")?,
                ),
                (None, false) => break,
            };

            match step {
                Step::Line(Some(_)) => match self.handle.request_shares().await {
                    Ok(ticket) => {
                        info!(
                            trustees = ticket.participants().len(),
                            "waiting for shares"
                        );
                        pending = Some(ticket.outcome().boxed());
                    }
                    Err(e) => warn!(error = %e, "recovery attempt failed"),
                },
                Step::Line(None) => input_open = false,
                Step::Finished(Ok(secret)) => {
                    let mnemonic = secret_mnemonic(&secret);
                    self.shutdown();
                    return mnemonic;
                }
                Step::Finished(Err(e)) => {
                    pending = None;
                    warn!(error = %e, "recovery attempt failed");
                }
            }
        }

        self.shutdown();
        Err(anyhow!("Input closed before the secret was recovered"))
    }

    fn shutdown(self) {
        self.server.abort();
        self.coordinator.abort();
    }
}

/// What the owner loop woke up for
enum Step {
    Line(Option<String>),
    Finished(Result<Secret, RecoveryError>),
}
