//! WebSocket Connection Handler
//!
//! Upgrades `/gateway` requests and pumps frames between the socket and the
//! [`Gateway`](super::gateway::Gateway). A dedicated writer task drains the
//! connection's outbound channel so gateway code never awaits the socket.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::interval;

use super::messages::Outbound;
use crate::startup::AppState;

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let (max_message, max_frame) = {
        let settings = state.gateway.settings();
        (settings.max_message_size, settings.max_frame_size)
    };
    ws.max_message_size(max_message)
        .max_frame_size(max_frame)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let gateway = state.gateway;
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();

    let session = gateway.connect(tx);
    let connection_id = session.connection_id.clone();

    let mut writer = tokio::spawn(async move {
        while let Some(outbound) = rx.recv().await {
            match outbound {
                Outbound::Event(event) => {
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to serialize event");
                            continue;
                        }
                    };
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Outbound::Close => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    let mut refresh = interval(gateway.settings().presence_refresh_interval());
    refresh.tick().await;

    loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    gateway.handle_frame(&session, text.as_str()).await;
                }
                Some(Ok(Message::Close(_))) | None => {
                    tracing::debug!(connection_id = %connection_id, "Connection closed by client");
                    break;
                }
                Some(Err(e)) => {
                    tracing::debug!(connection_id = %connection_id, error = %e, "WebSocket error");
                    break;
                }
                // ping/pong handled by axum, binary frames unsupported
                Some(Ok(_)) => {}
            },
            _ = &mut writer => {
                tracing::debug!(connection_id = %connection_id, "Writer finished");
                break;
            }
            _ = refresh.tick() => {
                gateway.refresh_presence(&session).await;
            }
        }
    }

    gateway.disconnect(&session).await;
    writer.abort();
}
