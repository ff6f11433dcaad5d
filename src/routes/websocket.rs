use axum::{
    Router,
    extract::{Path, Query, State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};

use crate::{dto::ws::WsQuery, services::websocket_service, state::SharedState};

#[utoipa::path(
    get,
    path = "/ws/{game_id}",
    tag = "participants",
    params(("game_id" = String, Path, description = "Game identifier"), WsQuery),
    responses((status = 101, description = "Switching protocols to WebSocket"))
)]
/// Upgrade the HTTP connection into a participant WebSocket session.
///
/// A missing or unknown `session_id` is answered with close code 4001 once upgraded.
pub async fn ws_handler(
    State(state): State<SharedState>,
    Path(game_id): Path<String>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let shared_state = state.clone();
    ws.on_upgrade(move |socket| {
        websocket_service::handle_socket(shared_state, socket, game_id, query.session_id)
    })
}

/// Configure the WebSocket endpoint.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/ws/{game_id}", get(ws_handler))
}
