use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use warden_core::SubscriberId;

use crate::hub::HubHandle;

/// Pump one viewer's queue into its socket until either side goes away.
///
/// Viewers are passive: inbound text is ignored. The subscriber is removed
/// from the hub when the connection ends, whichever task finishes first.
pub async fn handle_ws_connection(
    socket: WebSocket,
    subscriber_id: SubscriberId,
    mut rx: mpsc::Receiver<String>,
    hub: HubHandle,
    heartbeat: Duration,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Writer task: forward frames from the queue + periodic ping
    let writer_id = subscriber_id.clone();
    let mut writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(heartbeat);
        ping_interval.tick().await; // consume first immediate tick

        loop {
            tokio::select! {
                frame = rx.recv() => {
                    match frame {
                        Some(text) => {
                            if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_tx.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                    tracing::trace!(subscriber_id = %writer_id, "sent ping");
                }
            }
        }
        let _ = ws_tx.close().await;
    });

    // Reader task: drain inbound frames until close
    let reader_id = subscriber_id.clone();
    let mut reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                WsMessage::Close(_) => break,
                WsMessage::Text(_) => {
                    tracing::trace!(subscriber_id = %reader_id, "ignoring viewer text");
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    tracing::info!(subscriber_id = %subscriber_id, "viewer disconnected");
    hub.unsubscribe(subscriber_id).await;
}
