//! Trustee client for the centralized relay
//!
//! Authenticates with a one-time token, keeps the share it receives in
//! memory only, hands it back when asked and exits once the owner has
//! recovered the secret.

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::protocol::{ClientMessage, ServerMessage};

/// How a trustee session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrusteeOutcome {
    /// The owner recovered the secret.
    Completed,
    /// The relay reported an error, e.g. a bad token.
    Rejected(String),
    /// The connection went away first.
    Disconnected,
}

/// Runs one trustee against the relay at `url`
///
/// # Errors
/// Connection and transport failures
pub async fn run_trustee(url: &str, name: &str, token: &str) -> Result<TrusteeOutcome> {
    let (ws, _) = connect_async(url)
        .await
        .with_context(|| format!("Failed to connect to {url}"))?;
    let (mut write, mut read) = ws.split();

    let hello = ClientMessage::Authenticate {
        name: name.to_string(),
        token: token.to_string(),
    };
    write
        .send(Message::Text(serde_json::to_string(&hello)?))
        .await
        .context("Failed to send authentication")?;
    info!(name, "connected, waiting for share");

    let mut share: Option<Zeroizing<String>> = None;
    while let Some(frame) = read.next().await {
        let text = match frame.context("WebSocket error")? {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };

        match ServerMessage::parse(&text) {
            Ok(ServerMessage::ReceiveShare { share: received, index }) => {
                share = Some(Zeroizing::new(received));
                info!(index, "share received");
            }
            Ok(ServerMessage::RequestShare) => {
                let Some(held) = share.as_ref() else {
                    warn!("share requested before one was received");
                    continue;
                };
                let reply = ClientMessage::SubmitShare {
                    share: held.to_string(),
                };
                write
                    .send(Message::Text(serde_json::to_string(&reply)?))
                    .await
                    .context("Failed to submit share")?;
                info!("share submitted");
            }
            Ok(ServerMessage::RecoveryComplete) => {
                info!("recovery complete");
                let _ = write.close().await;
                return Ok(TrusteeOutcome::Completed);
            }
            Ok(ServerMessage::Error { message }) => {
                warn!(%message, "relay reported an error");
                let _ = write.close().await;
                return Ok(TrusteeOutcome::Rejected(message));
            }
            Ok(ServerMessage::PeerList { peers }) => debug!(?peers, "peer list"),
            Ok(_) => debug!("message ignored"),
            Err(_) => warn!("unparseable message from relay"),
        }
    }

    Ok(TrusteeOutcome::Disconnected)
}
