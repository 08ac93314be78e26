use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use ctf_shared::protocol::{EngineEvent, ModeCommand, ModeMsg};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot, Mutex};

use crate::game_loop::GameCommand;

/// Largest frame accepted from the engine
pub const MAX_FRAME_BYTES: usize = 4096;
/// Malformed messages tolerated before the engine is disconnected
pub const MAX_PARSE_ERRORS: u32 = 5;

/// Shared app state passed to the engine handler
#[derive(Clone)]
pub struct AppState {
    pub game_tx: mpsc::Sender<GameCommand>,
    /// Engine-bound commands. Whoever holds the lock is the attached engine.
    pub engine_rx: Arc<Mutex<mpsc::UnboundedReceiver<ModeCommand>>>,
}

impl AppState {
    pub fn new(
        game_tx: mpsc::Sender<GameCommand>,
        engine_rx: mpsc::UnboundedReceiver<ModeCommand>,
    ) -> Self {
        Self {
            game_tx,
            engine_rx: Arc::new(Mutex::new(engine_rx)),
        }
    }
}

/// HTTP handler for the engine WebSocket upgrade
pub async fn engine_ws_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<AppState>,
) -> impl IntoResponse {
    ws.max_frame_size(MAX_FRAME_BYTES)
        .max_message_size(MAX_FRAME_BYTES)
        .on_upgrade(|socket| handle_socket(socket, app_state))
}

async fn handle_socket(mut socket: WebSocket, app_state: AppState) {
    let Ok(mut engine_rx) = app_state.engine_rx.clone().try_lock_owned() else {
        tracing::warn!("Engine already attached, refusing connection");
        let _ = socket.send(Message::Close(None)).await;
        return;
    };

    // Commands queued while no engine was attached are meaningless now
    let mut stale = 0;
    while engine_rx.try_recv().is_ok() {
        stale += 1;
    }
    if stale > 0 {
        tracing::debug!("Discarded {} stale engine commands", stale);
    }

    let (mut sink, mut stream) = socket.split();

    let (resp_tx, resp_rx) = oneshot::channel();
    if app_state
        .game_tx
        .send(GameCommand::EngineAttached { response: resp_tx })
        .await
        .is_err()
    {
        tracing::error!("Failed to send EngineAttached command");
        return;
    }
    let welcome = match resp_rx.await {
        Ok(welcome) => welcome,
        Err(_) => {
            tracing::error!("Failed to receive welcome");
            return;
        }
    };

    tracing::info!("Engine connected");

    match serde_json::to_string(&ModeMsg::Welcome(welcome)) {
        Ok(json) => {
            if sink.send(Message::Text(json.into())).await.is_err() {
                let _ = app_state.game_tx.send(GameCommand::EngineDetached).await;
                return;
            }
        }
        Err(e) => tracing::error!("Failed to encode welcome: {}", e),
    }

    let mut parse_errors = 0u32;

    loop {
        tokio::select! {
            // Engine -> Mode
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<EngineEvent>(&text) {
                            Ok(event) => {
                                if app_state.game_tx.send(GameCommand::Engine(event)).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                parse_errors += 1;
                                tracing::warn!("Bad engine message ({}/{}): {}", parse_errors, MAX_PARSE_ERRORS, e);
                                if parse_errors >= MAX_PARSE_ERRORS {
                                    tracing::warn!("Too many bad engine messages, disconnecting");
                                    let _ = sink.send(Message::Close(None)).await;
                                    break;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::warn!("Engine socket error: {}", e);
                        break;
                    }
                    _ => {} // Ignore ping/pong/binary
                }
            }

            // Mode -> Engine
            cmd = engine_rx.recv() => {
                let Some(cmd) = cmd else {
                    break;
                };
                match serde_json::to_string(&ModeMsg::Command(cmd)) {
                    Ok(json) => {
                        if sink.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => tracing::error!("Failed to encode engine command: {}", e),
                }
            }
        }
    }

    let _ = app_state.game_tx.send(GameCommand::EngineDetached).await;
    drop(engine_rx);
    tracing::info!("Engine disconnected");
}
