use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use std::net::SocketAddr;
use tracing::{debug, info, warn};

use crate::state::AppState;
use crate::sync::Session;

pub async fn websocket_handler(
    connect_info: Option<ConnectInfo<SocketAddr>>,
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> Response {
    let remote_addr = connect_info.map(|ConnectInfo(addr)| addr);
    ws.on_upgrade(move |socket| handle_socket(socket, state, remote_addr))
}

/// One reader loop and one writer task per connection. Frames reach the
/// writer only through the connection's bounded queue.
async fn handle_socket(socket: WebSocket, state: AppState, remote_addr: Option<SocketAddr>) {
    let sync = &state.sync;
    let connection = sync.channel.connect();
    let mut session = Session::new(connection.id, remote_addr);
    let mut outbound = connection.receiver;
    let (mut sender, mut receiver) = socket.split();

    counter!("isk_ws_connections_total", 1);
    gauge!("isk_ws_connections_active", sync.channel.connection_count() as f64);
    info!(
        connection_id = %session.connection,
        remote_addr = ?remote_addr,
        "websocket connected"
    );

    let writer_connection = session.connection;
    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            match serde_json::to_string(&frame) {
                Ok(text) => {
                    if sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(err) => warn!(error = %err, "failed to encode outbound frame"),
            }
        }
        let _ = sender.close().await;
        debug!(connection_id = %writer_connection, "writer task finished");
    });

    while let Some(message) = receiver.next().await {
        let message = match message {
            Ok(message) => message,
            Err(err) => {
                warn!(connection_id = %session.connection, error = %err, "websocket receive error");
                break;
            }
        };
        match message {
            Message::Text(text) => sync.handle_text(&mut session, &text).await,
            Message::Binary(bytes) => match std::str::from_utf8(&bytes) {
                Ok(text) => sync.handle_text(&mut session, text).await,
                Err(_) => {
                    debug!(connection_id = %session.connection, "ignoring non-utf8 binary frame")
                }
            },
            Message::Close(frame) => {
                info!(
                    connection_id = %session.connection,
                    reason = ?frame.map(|f| f.reason.to_string()),
                    "client closed websocket"
                );
                break;
            }
            Message::Ping(_) | Message::Pong(_) => continue,
        }
        if !sync.channel.is_connected(session.connection) {
            // evicted after its queue closed
            break;
        }
    }

    sync.disconnect(&session).await;
    writer.abort();
    gauge!("isk_ws_connections_active", sync.channel.connection_count() as f64);
    info!(
        connection_id = %session.connection,
        display_id = ?session.display_id(),
        "websocket closed"
    );
}
