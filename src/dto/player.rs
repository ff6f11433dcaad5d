use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::{
    dto::validation::{validate_metric_scores, validate_single_line},
    services::game_status::GameStatus,
    state::game::{Role, Winner},
};

/// Header carrying the session token on HTTP action endpoints.
pub const SESSION_HEADER: &str = "x-session-id";

/// Real names that can still join a game.
#[derive(Debug, Serialize, ToSchema)]
pub struct AvailablePlayersResponse {
    pub players: Vec<String>,
}

/// Payload used to claim the character assigned to a real name.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct JoinRequest {
    #[validate(length(min = 1, max = 64), custom(function = "validate_single_line"))]
    pub real_name: String,
}

/// Identity handed back once a participant joined.
#[derive(Debug, Serialize, ToSchema)]
pub struct JoinResponse {
    /// Token to pass as `session_id` on the WebSocket and as `X-Session-Id` on actions.
    pub session_id: String,
    pub character_name: String,
    pub role: Role,
    pub color: String,
}

/// Chat line submitted over HTTP.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct ChatSubmission {
    #[validate(length(min = 1, max = 2000))]
    pub content: String,
}

/// Ballot submitted over HTTP. The target is not checked against the roster.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct VoteSubmission {
    #[validate(length(min = 1, max = 64))]
    pub voted_player: String,
}

/// Post-game feedback of one participant.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct SurveyRequest {
    /// Character the participant believes was autonomous.
    #[serde(default)]
    pub llm_guess: Option<String>,
    /// Score per metric, written in submission order.
    #[serde(default)]
    #[validate(custom(function = "validate_metric_scores"))]
    #[schema(value_type = Object)]
    pub metrics: IndexMap<String, u8>,
    #[serde(default)]
    #[validate(length(max = 4000))]
    pub comments: Option<String>,
}

/// What the survey form asks a participant after the game.
#[derive(Debug, Serialize, ToSchema)]
pub struct SurveyInfoResponse {
    /// Whether an autonomous participant took part.
    pub has_llm: bool,
    /// Metrics to score, empty without an autonomous participant.
    pub metrics: Vec<String>,
    /// Characters the participant may name as the autonomous one.
    pub other_players: Vec<String>,
    pub score_low: u8,
    pub score_high: u8,
}

/// Derived status of a game as persisted in its log store.
#[derive(Debug, Serialize, ToSchema)]
pub struct GameStatusResponse {
    /// Snake-case phase name, e.g. `day_voting`.
    pub phase: String,
    pub round: u32,
    pub winner: Option<Winner>,
    pub players: Vec<String>,
    pub remaining: Vec<String>,
}

impl From<GameStatus> for GameStatusResponse {
    fn from(status: GameStatus) -> Self {
        Self {
            phase: status.phase.as_str().to_string(),
            round: status.round(),
            winner: status.winner,
            players: status.players,
            remaining: status.remaining,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::state_machine::GamePhase;

    #[test]
    fn join_requests_reject_multi_line_names() {
        let ok = JoinRequest {
            real_name: "Alice".into(),
        };
        assert!(ok.validate().is_ok());
        let bad = JoinRequest {
            real_name: "Alice\nBob".into(),
        };
        assert!(bad.validate().is_err());
        let empty = JoinRequest {
            real_name: String::new(),
        };
        assert!(empty.validate().is_err());
    }

    #[test]
    fn survey_defaults_to_empty_answers() {
        let survey: SurveyRequest = serde_json::from_str("{}").unwrap();
        assert!(survey.llm_guess.is_none());
        assert!(survey.metrics.is_empty());
        assert!(survey.validate().is_ok());
    }

    #[test]
    fn status_response_flattens_the_round() {
        let status = GameStatus {
            phase: GamePhase::DayVoting,
            winner: None,
            players: vec!["A".into(), "B".into(), "C".into()],
            remaining: vec!["A".into(), "C".into()],
        };
        let response = GameStatusResponse::from(status);
        assert_eq!(response.phase, "day_voting");
        assert_eq!(response.round, 2);
    }
}
