use futures_util::sink::SinkExt;
use futures_util::stream::StreamExt;
use log::{debug, error, warn};
use std::net::IpAddr;
use tokio::sync::mpsc;
use warp::ws::{Message, WebSocket};

use crate::core::connection::TransportKind;
use crate::core::message_types::ServerMessage;
use crate::core::server::SharedServerManager;

// Handle a WebSocket connection
pub async fn handle_ws_client(ws: WebSocket, server: SharedServerManager, remote_ip: IpAddr) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    let sessions = server.sessions();
    let connection_id = sessions.connect(tx, TransportKind::WebSocket, Some(remote_ip)).await;

    // Spawn a task to forward events from our channel to the WebSocket
    let writer_id = connection_id.clone();
    let writer = tokio::task::spawn(async move {
        while let Some(event) = rx.recv().await {
            let text = match event.to_json() {
                Ok(text) => text,
                Err(e) => {
                    error!("Failed to serialize event for {}: {}", writer_id, e);
                    continue;
                }
            };
            if let Err(e) = ws_tx.send(Message::text(text)).await {
                error!("Failed to send WebSocket message to {}: {}", writer_id, e);
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    // Frames from one connection are handled one at a time, in arrival order
    while let Some(result) = ws_rx.next().await {
        let msg = match result {
            Ok(msg) => msg,
            Err(e) => {
                warn!("WebSocket error on {}: {}", connection_id, e);
                break;
            }
        };

        if msg.is_close() {
            break;
        }
        // Pings are answered by warp; binary frames are not part of the protocol
        let Ok(text) = msg.to_str() else {
            continue;
        };

        // Failures have already been reported to the client as error events
        if let Err(e) = sessions.handle_text(&connection_id, text).await {
            debug!("Frame from {} rejected: {}", connection_id, e);
        }
    }

    // Dropping the registry entry closes the channel, which ends the writer
    sessions.disconnect(&connection_id).await;
    if let Err(e) = writer.await {
        error!("WebSocket writer for {} panicked: {}", connection_id, e);
    }
}
