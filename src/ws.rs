//! WebSocket endpoint for observers.
//!
//! Each text frame carries one JSON object of the form
//! `{"type": ..., "data": ...}` in either direction.

use crate::error::Result;
use crate::fanout::{ObserverIntent, StateFanout};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{accept_async, tungstenite::Message};

/// Accept observers on `listener` until the listener fails
pub async fn serve(listener: TcpListener, fanout: Arc<StateFanout>) -> Result<()> {
    tracing::info!("Observer endpoint listening on {}", listener.local_addr()?);
    loop {
        let (stream, peer) = listener.accept().await?;
        let fanout = fanout.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_observer(stream, peer, fanout).await {
                tracing::warn!(%peer, "Observer connection failed: {}", e);
            }
        });
    }
}

async fn handle_observer(stream: TcpStream, peer: SocketAddr, fanout: Arc<StateFanout>) -> Result<()> {
    let ws_stream = accept_async(stream).await?;
    let (mut write, mut read) = ws_stream.split();

    let mut session = fanout.connect().await;
    let id = session.id();
    tracing::debug!(observer = %id, %peer, "Observer attached");

    // Forward pushed events until the session is closed
    let write_handle = tokio::spawn(async move {
        while let Ok(event) = session.recv().await {
            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(e) => {
                    tracing::error!("Failed to encode event: {}", e);
                    continue;
                }
            };
            if let Err(e) = write.send(Message::Text(json)).await {
                tracing::debug!("Failed to send to observer: {}", e);
                break;
            }
        }
        let _ = write.close().await;
    });

    while let Some(msg_result) = read.next().await {
        match msg_result {
            Ok(Message::Text(text)) => match serde_json::from_str::<ObserverIntent>(&text) {
                Ok(intent) => fanout.handle_intent(id, intent).await,
                Err(e) => tracing::warn!(observer = %id, "Ignoring malformed message {:?}: {}", text, e),
            },
            Ok(Message::Close(_)) => break,
            Err(e) => {
                tracing::debug!(observer = %id, "WebSocket error: {}", e);
                break;
            }
            _ => {}
        }
    }

    fanout.disconnect(id).await;
    let _ = write_handle.await;
    Ok(())
}
