//! WebSocket transport in front of the coordinator
//!
//! One task per socket. Inbound text frames go to the coordinator as-is;
//! a writer task drains the connection's outbox back onto the socket.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::coordinator::{CoordinatorHandle, Outbound};

/// Accepts connections until the listener fails
///
/// # Errors
/// Propagates `accept` failures
pub async fn serve(listener: TcpListener, coordinator: CoordinatorHandle) -> Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "listening for peers");
    }

    loop {
        let (stream, addr) = listener
            .accept()
            .await
            .context("Failed to accept connection")?;
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, addr, coordinator).await {
                debug!(%addr, error = %e, "connection ended with error");
            }
        });
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    coordinator: CoordinatorHandle,
) -> Result<()> {
    let ws = accept_async(stream)
        .await
        .context("WebSocket handshake failed")?;
    let (mut write, mut read) = ws.split();

    let (outbox, mut outgoing) = mpsc::unbounded_channel();
    let conn = coordinator.connect(outbox);
    info!(conn, %addr, "connection accepted");

    // Ends when the coordinator drops the outbox or asks for a close
    let writer = tokio::spawn(async move {
        while let Some(item) = outgoing.recv().await {
            match item {
                Outbound::Message(msg) => {
                    let text = match msg.encode() {
                        Ok(text) => text,
                        Err(e) => {
                            warn!(conn, error = %e, "failed to encode message");
                            continue;
                        }
                    };
                    if write.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Outbound::Close => {
                    let _ = write.close().await;
                    break;
                }
            }
        }
    });

    while let Some(frame) = read.next().await {
        match frame {
            Ok(Message::Text(text)) => coordinator.inbound(conn, text),
            // Not part of the protocol; answered as a malformed message
            Ok(Message::Binary(data)) => {
                coordinator.inbound(conn, String::from_utf8(data).unwrap_or_default());
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(conn, error = %e, "read failed");
                break;
            }
        }
    }

    coordinator.disconnect(conn);
    let _ = writer.await;
    info!(conn, %addr, "connection closed");
    Ok(())
}
