use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for Mafia Back.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::player::available_players,
        crate::routes::player::join_game,
        crate::routes::player::game_status,
        crate::routes::player::submit_chat,
        crate::routes::player::submit_vote,
        crate::routes::player::survey_info,
        crate::routes::player::submit_survey,
        crate::routes::websocket::ws_handler,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::player::AvailablePlayersResponse,
            crate::dto::player::JoinRequest,
            crate::dto::player::JoinResponse,
            crate::dto::player::ChatSubmission,
            crate::dto::player::VoteSubmission,
            crate::dto::player::SurveyRequest,
            crate::dto::player::SurveyInfoResponse,
            crate::dto::player::GameStatusResponse,
            crate::dto::ws::InboundMessage,
            crate::dto::ws::OutboundMessage,
            crate::state::game::Role,
            crate::state::game::Winner,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "players", description = "Joining, actions and survey of participants"),
        (name = "participants", description = "WebSocket connection of live participants"),
    )
)]
pub struct ApiDoc;
