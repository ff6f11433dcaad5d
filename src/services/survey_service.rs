//! Post-game survey: whether participants spotted the autonomous player and how they
//! rate it.

use tracing::{debug, info};
use validator::Validate;

use crate::{
    dao::models::MarkerKey,
    dto::{
        player::{SurveyInfoResponse, SurveyRequest},
        validation::MAX_METRIC_SCORE,
    },
    error::ServiceError,
    services::game_status::GameStatus,
    state::{GameHandle, sessions::Session},
};

/// Metrics scored when an autonomous participant took part.
pub const METRICS_TO_SCORE: &[&str] = &["human_likeness", "engagement", "reasoning", "enjoyment"];
const METRIC_DELIMITER: &str = ": ";
const LLM_IDENTIFICATION: &str = "llm_identification";
const COMMENTS_TITLE: &str = "Comments:";

/// First autonomous participant of the roster.
async fn autonomous_player(game: &GameHandle) -> Option<String> {
    let roster = game.roster().read().await;
    roster
        .participants()
        .find(|participant| participant.autonomous)
        .map(|participant| participant.name.clone())
}

/// Render the survey record: identification correctness as 0/1, one line per metric,
/// then the comments block.
pub fn render_survey(request: &SurveyRequest, autonomous: Option<&str>) -> String {
    let mut record = String::new();
    if let Some(guess) = request.llm_guess.as_deref() {
        let correct = u8::from(autonomous.is_some_and(|name| name == guess.trim()));
        record.push_str(&format!("{LLM_IDENTIFICATION}{METRIC_DELIMITER}{correct}\n"));
    }
    for (metric, score) in &request.metrics {
        record.push_str(&format!("{metric}{METRIC_DELIMITER}{score}\n"));
    }
    if let Some(comments) = request.comments.as_deref() {
        record.push_str(&format!("{COMMENTS_TITLE}\n{}\n", comments.trim_end()));
    }
    record
}

/// Questions shown to `session`'s participant.
pub async fn survey_info(game: &GameHandle, session: &Session) -> SurveyInfoResponse {
    let autonomous = autonomous_player(game).await;
    let other_players = if autonomous.is_some() {
        let roster = game.roster().read().await;
        roster
            .participants()
            .filter(|participant| participant.name != session.character_name)
            .map(|participant| participant.name.clone())
            .collect()
    } else {
        Vec::new()
    };

    SurveyInfoResponse {
        has_llm: autonomous.is_some(),
        metrics: if autonomous.is_some() {
            METRICS_TO_SCORE.iter().map(|metric| metric.to_string()).collect()
        } else {
            Vec::new()
        },
        other_players,
        score_low: 1,
        score_high: MAX_METRIC_SCORE,
    }
}

/// Persist `session`'s survey answers. Accepted only once the game is over, from
/// active and eliminated participants alike.
pub async fn submit_survey(
    game: &GameHandle,
    session: &Session,
    request: SurveyRequest,
) -> Result<(), ServiceError> {
    request
        .validate()
        .map_err(|err| ServiceError::InvalidInput(err.to_string()))?;
    let store = game.store();
    let status = GameStatus::read(store.as_ref()).await?;
    if !status.is_game_over() {
        debug!(
            game_id = game.id(),
            participant = %session.character_name,
            "survey submitted before the game ended"
        );
        return Err(ServiceError::InvalidState("the game is still running".into()));
    }

    let autonomous = autonomous_player(game).await;
    let record = render_survey(&request, autonomous.as_deref());
    store
        .set_marker(MarkerKey::Survey(session.character_name.clone()), record)
        .await?;
    info!(
        game_id = game.id(),
        participant = %session.character_name,
        "survey saved"
    );
    Ok(())
}
