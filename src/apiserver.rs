use axum::{
    Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
    routing::get,
};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch};

use crate::{
    controller::{ControllerCommand, ShowState},
    event::UiEvent,
    manager::ShowModelManager,
    model::ShowModel,
};

#[derive(Clone)]
struct ApiState {
    controller_tx: mpsc::Sender<ControllerCommand>,
    state_rx: watch::Receiver<ShowState>,
    event_tx: broadcast::Sender<UiEvent>,
    model: ShowModelManager,
}

pub async fn create_api_router(
    controller_tx: mpsc::Sender<ControllerCommand>,
    state_rx: watch::Receiver<ShowState>,
    event_tx: broadcast::Sender<UiEvent>,
    model: ShowModelManager,
) -> Router {
    let state = ApiState {
        controller_tx,
        state_rx,
        event_tx,
        model,
    };

    Router::new()
        .route("/ws", get(websocket_handler))
        // Full snapshot for clients connecting mid-show.
        .route("/api/show/full_state", get(get_full_state_handler))
        .with_state(state)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FullShowState {
    show_model: ShowModel,
    show_state: ShowState,
}

async fn get_full_state_handler(State(state): State<ApiState>) -> axum::Json<FullShowState> {
    let show_model = state.model.read().await.clone();
    let show_state = state.state_rx.borrow().clone();

    axum::Json(FullShowState { show_model, show_state })
}

#[derive(Serialize)]
#[serde(tag = "kind", content = "payload", rename_all = "camelCase")]
enum WsPayload<'a> {
    State(&'a ShowState),
    Event(&'a UiEvent),
}

async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<ApiState>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: ApiState) {
    let mut state_rx = state.state_rx.clone();
    let mut event_rx = state.event_tx.subscribe();

    log::info!("New WebSocket client connected.");

    loop {
        tokio::select! {
            Ok(_) = state_rx.changed() => {
                let payload = serde_json::to_string(&WsPayload::State(&state_rx.borrow().clone()));
                if let Ok(payload) = payload {
                    if socket.send(Message::Text(payload.into())).await.is_err() {
                        log::info!("WebSocket client disconnected (send error).");
                        break;
                    }
                }
            }

            Ok(event) = event_rx.recv() => {
                if let Ok(payload) = serde_json::to_string(&WsPayload::Event(&event)) {
                    if socket.send(Message::Text(payload.into())).await.is_err() {
                        log::info!("WebSocket client disconnected (send error).");
                        break;
                    }
                }
            }

            Some(Ok(msg)) = socket.recv() => {
                if let Message::Text(text) = msg {
                    if let Ok(command) = serde_json::from_str::<ControllerCommand>(&text) {
                        if state.controller_tx.send(command).await.is_err() {
                            log::error!("Failed to forward command to CueController.");
                            break;
                        }
                    } else {
                        log::error!("Invalid command received.")
                    }
                } else if let Message::Close(_) = msg {
                    log::info!("WebSocket client sent close message.");
                    break;
                }
            }

            else => break,
        }
    }
}
