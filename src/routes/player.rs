use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
};
use validator::Validate;

use crate::{
    dto::player::{
        AvailablePlayersResponse, ChatSubmission, GameStatusResponse, JoinRequest, JoinResponse,
        SESSION_HEADER, SurveyInfoResponse, SurveyRequest, VoteSubmission,
    },
    error::AppError,
    services::{player_service, survey_service},
    state::{SharedState, sessions::Session},
};

/// Participant endpoints: joining, actions outside the WebSocket, status and survey.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/games/{game_id}/players/available", get(available_players))
        .route("/games/{game_id}/join", post(join_game))
        .route("/games/{game_id}/status", get(game_status))
        .route("/games/{game_id}/chat", post(submit_chat))
        .route("/games/{game_id}/vote", post(submit_vote))
        .route(
            "/games/{game_id}/survey",
            get(survey_info).post(submit_survey),
        )
}

fn session_from_headers(
    state: &SharedState,
    game_id: &str,
    headers: &HeaderMap,
) -> Result<Session, AppError> {
    let token = headers
        .get(SESSION_HEADER)
        .and_then(|value| value.to_str().ok());
    Ok(player_service::resolve_session(state, game_id, token)?)
}

#[utoipa::path(
    get,
    path = "/games/{game_id}/players/available",
    tag = "players",
    params(("game_id" = String, Path, description = "Game identifier")),
    responses(
        (status = 200, description = "Real names not joined yet", body = AvailablePlayersResponse),
        (status = 404, description = "Unknown game")
    )
)]
/// List the real names that can still join.
pub async fn available_players(
    State(state): State<SharedState>,
    Path(game_id): Path<String>,
) -> Result<Json<AvailablePlayersResponse>, AppError> {
    Ok(Json(
        player_service::available_players(&state, &game_id).await?,
    ))
}

#[utoipa::path(
    post,
    path = "/games/{game_id}/join",
    tag = "players",
    params(("game_id" = String, Path, description = "Game identifier")),
    request_body = JoinRequest,
    responses(
        (status = 200, description = "Character assigned", body = JoinResponse),
        (status = 400, description = "Invalid real name"),
        (status = 404, description = "Unknown game or real name"),
        (status = 409, description = "Real name already joined")
    )
)]
/// Claim the character assigned to a real name and open a session.
pub async fn join_game(
    State(state): State<SharedState>,
    Path(game_id): Path<String>,
    Json(payload): Json<JoinRequest>,
) -> Result<Json<JoinResponse>, AppError> {
    payload.validate()?;
    Ok(Json(player_service::join(&state, &game_id, payload).await?))
}

#[utoipa::path(
    get,
    path = "/games/{game_id}/status",
    tag = "players",
    params(("game_id" = String, Path, description = "Game identifier")),
    responses(
        (status = 200, description = "Derived game status", body = GameStatusResponse),
        (status = 404, description = "Unknown game")
    )
)]
/// Return the phase, round, winner and remaining roster of a game.
pub async fn game_status(
    State(state): State<SharedState>,
    Path(game_id): Path<String>,
) -> Result<Json<GameStatusResponse>, AppError> {
    Ok(Json(player_service::status(&state, &game_id).await?))
}

#[utoipa::path(
    post,
    path = "/games/{game_id}/chat",
    tag = "players",
    params(
        ("game_id" = String, Path, description = "Game identifier"),
        ("x-session-id" = String, Header, description = "Session token")
    ),
    request_body = ChatSubmission,
    responses(
        (status = 204, description = "Processed; rejected lines are dropped silently"),
        (status = 401, description = "Missing or unknown session")
    )
)]
/// Submit a chat line for the current discussion.
pub async fn submit_chat(
    State(state): State<SharedState>,
    Path(game_id): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<ChatSubmission>,
) -> Result<StatusCode, AppError> {
    payload.validate()?;
    let session = session_from_headers(&state, &game_id, &headers)?;
    let game = state.require_game(&game_id)?;
    player_service::submit_chat(&game, &session.character_name, &payload.content).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/games/{game_id}/vote",
    tag = "players",
    params(
        ("game_id" = String, Path, description = "Game identifier"),
        ("x-session-id" = String, Header, description = "Session token")
    ),
    request_body = VoteSubmission,
    responses(
        (status = 204, description = "Processed; rejected ballots are dropped silently"),
        (status = 401, description = "Missing or unknown session")
    )
)]
/// Submit a ballot for the current round.
pub async fn submit_vote(
    State(state): State<SharedState>,
    Path(game_id): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<VoteSubmission>,
) -> Result<StatusCode, AppError> {
    payload.validate()?;
    let session = session_from_headers(&state, &game_id, &headers)?;
    let game = state.require_game(&game_id)?;
    player_service::submit_vote(&state, &game, &session.character_name, &payload.voted_player)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/games/{game_id}/survey",
    tag = "players",
    params(
        ("game_id" = String, Path, description = "Game identifier"),
        ("x-session-id" = String, Header, description = "Session token")
    ),
    responses(
        (status = 200, description = "Survey questions", body = SurveyInfoResponse),
        (status = 401, description = "Missing or unknown session")
    )
)]
/// Return the survey questions for the session's participant.
pub async fn survey_info(
    State(state): State<SharedState>,
    Path(game_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<SurveyInfoResponse>, AppError> {
    let session = session_from_headers(&state, &game_id, &headers)?;
    let game = state.require_game(&game_id)?;
    Ok(Json(survey_service::survey_info(&game, &session).await))
}

#[utoipa::path(
    post,
    path = "/games/{game_id}/survey",
    tag = "players",
    params(
        ("game_id" = String, Path, description = "Game identifier"),
        ("x-session-id" = String, Header, description = "Session token")
    ),
    request_body = SurveyRequest,
    responses(
        (status = 204, description = "Survey saved"),
        (status = 400, description = "Invalid answers"),
        (status = 401, description = "Missing or unknown session"),
        (status = 409, description = "The game is still running")
    )
)]
/// Save the post-game survey of the session's participant.
pub async fn submit_survey(
    State(state): State<SharedState>,
    Path(game_id): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<SurveyRequest>,
) -> Result<StatusCode, AppError> {
    payload.validate()?;
    let session = session_from_headers(&state, &game_id, &headers)?;
    let game = state.require_game(&game_id)?;
    survey_service::submit_survey(&game, &session, payload).await?;
    Ok(StatusCode::NO_CONTENT)
}
