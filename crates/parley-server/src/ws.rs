use std::sync::Arc;

use axum::extract::ws::{Message, Utf8Bytes, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::handler::ConnectionHandler;
use crate::room::PeerHandle;
use crate::state::AppState;

pub async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let max = state.config.limits.max_message_bytes;
    ws.max_message_size(max)
        .max_frame_size(max)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (peer, rx) = PeerHandle::new(state.config.limits.peer_message_buffer);
    spawn_writer(ws_sender, rx);

    let mut handler = ConnectionHandler::new(
        Arc::clone(&state.room),
        Arc::clone(&state.tokens),
        peer.clone(),
    );

    read_loop(&mut ws_receiver, &mut handler, &peer, &state.shutdown).await;

    // Cleanup runs on every exit path: client close, transport error,
    // disconnect_user, or server shutdown.
    handler.close();
    peer.close();
}

/// Drain the outbound channel into the socket. Ends once every sender is
/// gone (room entry removed, handler dropped), then closes the socket.
fn spawn_writer(mut ws_sender: SplitSink<WebSocket, Message>, mut rx: mpsc::Receiver<Utf8Bytes>) {
    tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if ws_sender.send(Message::Text(text)).await.is_err() {
                return;
            }
        }
        let _ = ws_sender.send(Message::Close(None)).await;
    });
}

async fn read_loop(
    ws_receiver: &mut SplitStream<WebSocket>,
    handler: &mut ConnectionHandler,
    peer: &PeerHandle,
    shutdown: &CancellationToken,
) {
    loop {
        let msg = tokio::select! {
            () = peer.closed() => {
                tracing::debug!(connection_id = ?handler.connection_id(), "Session closed by server");
                break;
            },
            () = shutdown.cancelled() => break,
            msg = ws_receiver.next() => msg,
        };

        match msg {
            Some(Ok(Message::Text(text))) => handler.handle_text(text.as_str()),
            Some(Ok(Message::Close(_))) | None => break,
            // Binary frames are not part of the protocol; ping/pong is
            // answered by the WebSocket layer.
            Some(Ok(_)) => {},
            Some(Err(e)) => {
                tracing::debug!(error = %e, "WebSocket read error");
                break;
            },
        }
    }
}
