//! WebSocket upgrade handler and session gateway
//!
//! The gateway is a pure boundary adapter: it parses inbound intents, maps
//! them onto `RoomCommand`s for the target room task, and drains a
//! per-session outbox back to the socket. It makes no game-rule decisions.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::room::JoinError;
use crate::game::{Outbox, RoomCommand, RoomHandle};
use crate::util::rate_limit::SessionRateLimiter;
use crate::ws::protocol::{ClientMsg, ServerMsg};

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState) {
    let session_id = Uuid::new_v4();
    info!(session_id = %session_id, "New WebSocket connection");

    let (mut ws_sink, ws_stream) = socket.split();

    // Per-session outbox: rooms and the gateway both address this client
    // through it, a writer task drains it to the socket
    let (outbox, mut outbox_rx) = mpsc::unbounded_channel::<ServerMsg>();

    let writer_session_id = session_id;
    let writer_handle = tokio::spawn(async move {
        while let Some(msg) = outbox_rx.recv().await {
            if let Err(e) = send_msg(&mut ws_sink, &msg).await {
                debug!(session_id = %writer_session_id, error = %e, "WebSocket send failed");
                break;
            }
        }
    });

    let _ = outbox.send(ServerMsg::Connected {
        client_id: session_id,
    });

    run_session(session_id, state, ws_stream, outbox).await;

    writer_handle.abort();
    info!(session_id = %session_id, "WebSocket connection closed");
}

/// Reader loop: WebSocket -> room task
async fn run_session(
    session_id: Uuid,
    state: AppState,
    mut ws_stream: futures::stream::SplitStream<WebSocket>,
    outbox: Outbox,
) {
    let rate_limiter = SessionRateLimiter::new();
    let mut room: Option<RoomHandle> = None;

    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if !rate_limiter.check_input() {
                    warn!(session_id = %session_id, "Rate limited input message");
                    continue;
                }

                match serde_json::from_str::<ClientMsg>(&text) {
                    Ok(msg) => {
                        dispatch(session_id, &state, &outbox, &mut room, msg).await;
                    }
                    Err(e) => {
                        warn!(session_id = %session_id, error = %e, "Failed to parse client message");
                        let _ = outbox.send(ServerMsg::Error {
                            message: "Malformed message.".to_string(),
                        });
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                warn!(session_id = %session_id, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!(session_id = %session_id, "Client initiated close");
                break;
            }
            Err(e) => {
                error!(session_id = %session_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    // Signal disconnect to the room task
    if let Some(handle) = room {
        let _ = handle
            .command_tx
            .send(RoomCommand::Leave { session_id })
            .await;
    }
}

/// Exhaustive intent dispatch
async fn dispatch(
    session_id: Uuid,
    state: &AppState,
    outbox: &Outbox,
    room: &mut Option<RoomHandle>,
    msg: ClientMsg,
) {
    match msg {
        ClientMsg::CreateGame { nickname } => {
            if room.is_some() {
                let _ = outbox.send(ServerMsg::Error {
                    message: "Already in a game.".to_string(),
                });
                return;
            }
            let handle = state.rooms.open_room();
            info!(session_id = %session_id, room = %handle.code, "Room created");
            join_room(session_id, outbox, room, handle, nickname).await;
        }

        ClientMsg::JoinGame { game_id, nickname } => {
            if room.is_some() {
                let _ = outbox.send(ServerMsg::Error {
                    message: "Already in a game.".to_string(),
                });
                return;
            }
            match state.rooms.get(&game_id) {
                Some(handle) => join_room(session_id, outbox, room, handle, nickname).await,
                None => {
                    let _ = outbox.send(ServerMsg::Error {
                        message: JoinError::NotFound.to_string(),
                    });
                }
            }
        }

        ClientMsg::StartGame(_) => {
            forward(session_id, room, RoomCommand::Start { session_id }).await;
        }
        ClientMsg::KeyUpdate { keys } => {
            forward(session_id, room, RoomCommand::KeyUpdate { session_id, keys }).await;
        }
        ClientMsg::PlaceBomb(_) => {
            forward(session_id, room, RoomCommand::PlaceBomb { session_id }).await;
        }
        ClientMsg::RequestRematch(_) => {
            forward(session_id, room, RoomCommand::RequestRematch { session_id }).await;
        }
    }
}

/// Send a join command and wait for the room's verdict. Rejections go back
/// to this client only and leave the session roomless.
async fn join_room(
    session_id: Uuid,
    outbox: &Outbox,
    room: &mut Option<RoomHandle>,
    handle: RoomHandle,
    nickname: String,
) {
    let (reply_tx, reply_rx) = oneshot::channel();
    let join = RoomCommand::Join {
        session_id,
        nickname,
        outbox: outbox.clone(),
        reply: reply_tx,
    };

    if handle.command_tx.send(join).await.is_err() {
        let _ = outbox.send(ServerMsg::Error {
            message: JoinError::NotFound.to_string(),
        });
        return;
    }
    *room = Some(handle);

    match reply_rx.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            let _ = outbox.send(ServerMsg::Error {
                message: e.to_string(),
            });
            *room = None;
        }
        Err(_) => {
            // Room task went away mid-join
            *room = None;
        }
    }
}

/// Forward an intent to the session's current room, if any. A session with
/// no room (or a room that already shut down) is an expected race and the
/// intent is dropped silently.
async fn forward(session_id: Uuid, room: &mut Option<RoomHandle>, cmd: RoomCommand) {
    if let Some(handle) = room {
        if handle.command_tx.send(cmd).await.is_err() {
            debug!(session_id = %session_id, room = %handle.code, "Room channel closed, dropping handle");
            *room = None;
        }
    } else {
        debug!(session_id = %session_id, "Intent with no room, ignoring");
    }
}

/// Send a message over WebSocket
async fn send_msg(
    sink: &mut futures::stream::SplitSink<WebSocket, Message>,
    msg: &ServerMsg,
) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}
