//! WebSocket endpoint for live sessions: one session per connection, JSON
//! commands in, snapshots out.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;

use crate::protocol::{ClientCommand, ServerMessage};
use crate::session::{self, SessionOptions};

pub async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(options): State<SessionOptions>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, options))
}

/// Bridge one socket to one session. Dropping either side tears down the
/// other; a disconnect mid-race simply discards the session state.
async fn handle_socket(mut socket: WebSocket, options: SessionOptions) {
    let handle = session::spawn(options);
    tracing::info!("viewer connected");

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientCommand>(&text) {
                            Ok(command) => {
                                if handle.commands.send_async(command).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                tracing::debug!("unparseable command: {e}");
                                let reply = ServerMessage::Error {
                                    code: "bad_command".to_string(),
                                    message: format!("could not parse command: {e}"),
                                };
                                if send_json(&mut socket, &reply).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // ping/pong handled by axum
                    Some(Err(e)) => {
                        tracing::debug!("socket error: {e}");
                        break;
                    }
                }
            }

            outgoing = handle.messages.recv_async() => {
                match outgoing {
                    Ok(message) => {
                        if send_json(&mut socket, &message).await.is_err() {
                            break;
                        }
                    }
                    Err(_) => break, // session task gone
                }
            }
        }
    }

    tracing::info!("viewer disconnected");
}

async fn send_json(socket: &mut WebSocket, message: &ServerMessage) -> Result<(), axum::Error> {
    let text = serde_json::to_string(message).expect("server messages always serialize");
    socket.send(Message::Text(text)).await
}
