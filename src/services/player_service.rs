//! Participant actions shared by the HTTP routes, the WebSocket listener and the
//! autonomous drivers.
//!
//! Policy violations never become errors: the action is dropped, logged at debug and
//! reported to the caller as [`Submission::Rejected`].

use thiserror::Error;
use tracing::{debug, info};
use validator::Validate;

use crate::{
    dao::models::{LogKey, MarkerKey, STATUS_JOINED},
    dto::player::{AvailablePlayersResponse, GameStatusResponse, JoinRequest, JoinResponse},
    error::ServiceError,
    services::{
        chat_relay::format_line,
        game_status::{GameStatus, ParticipantStatus, participant_status},
    },
    state::{
        AppState, GameHandle, SharedState, game::Role, sessions::Session,
        state_machine::GamePhase, vote_guard::VoteKey,
    },
};

/// Why an action was dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    /// The actor is not part of the roster.
    #[error("not part of the roster")]
    UnknownParticipant,
    /// The actor was voted out and may only observe.
    #[error("participant was eliminated")]
    Eliminated,
    /// The action does not fit the current phase.
    #[error("not allowed during {0}")]
    WrongPhase(GamePhase),
    /// Bystanders neither chat nor vote at night.
    #[error("night phases are restricted to the Mafia")]
    NightRestricted,
    /// Nothing left once whitespace was stripped.
    #[error("empty submission")]
    Empty,
    /// A ballot was already accepted for this round.
    #[error("already voted for {voted_player} in round {round}")]
    AlreadyVoted {
        /// Target of the accepted ballot.
        voted_player: String,
        /// Round of the accepted ballot.
        round: u32,
    },
}

/// Result of an action that passed protocol validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    /// Written to the participant's personal log.
    Accepted,
    /// Dropped without touching the log store.
    Rejected(Rejection),
}

impl Submission {
    /// Whether the action reached the log store.
    pub fn is_accepted(&self) -> bool {
        matches!(self, Submission::Accepted)
    }
}

fn reject(game: &GameHandle, participant: &str, action: &str, rejection: Rejection) -> Submission {
    debug!(
        game_id = game.id(),
        participant = %participant,
        action,
        reason = %rejection,
        "action rejected"
    );
    Submission::Rejected(rejection)
}

/// Collapse `text` onto one line so it cannot split a log record.
fn single_line(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Check that `participant` may chat (`voting == false`) or vote now. Returns the
/// current round.
async fn check_action(
    game: &GameHandle,
    participant: &str,
    voting: bool,
) -> Result<u32, Rejection> {
    let phase = game.phase().await;
    let roster = game.roster().read().await;
    let actor = roster
        .get(participant)
        .ok_or(Rejection::UnknownParticipant)?;

    if !actor.is_active() {
        return Err(Rejection::Eliminated);
    }
    let allowed = if voting {
        phase.is_voting()
    } else {
        phase.is_discussion()
    };
    if !allowed {
        return Err(Rejection::WrongPhase(phase));
    }
    if phase.is_night() && !actor.role.is_mafia() {
        return Err(Rejection::NightRestricted);
    }
    Ok(roster.round())
}

/// Names `participant` may vote for: the active Bystanders at night, every other
/// active participant by day.
pub async fn vote_options(game: &GameHandle, participant: &str, night: bool) -> Vec<String> {
    let roster = game.roster().read().await;
    if night {
        roster.active_names_with_role(Role::Bystander)
    } else {
        roster
            .active_names()
            .into_iter()
            .filter(|name| name != participant)
            .collect()
    }
}

/// Resolve the session bound to `token` within `game_id`.
pub fn resolve_session(
    state: &AppState,
    game_id: &str,
    token: Option<&str>,
) -> Result<Session, ServiceError> {
    let token = token
        .filter(|token| !token.is_empty())
        .ok_or_else(|| ServiceError::Unauthorized("missing session".into()))?;
    state
        .sessions()
        .get_for_game(token, game_id)
        .ok_or_else(|| ServiceError::Unauthorized("unknown session".into()))
}

/// Real names whose character has not joined yet.
pub async fn available_players(
    state: &SharedState,
    game_id: &str,
) -> Result<AvailablePlayersResponse, ServiceError> {
    let game = state.require_game(game_id)?;
    let store = game.store();
    let mut players = Vec::new();
    for (real_name, character) in game.real_names() {
        if participant_status(store.as_ref(), character).await? == ParticipantStatus::Absent {
            players.push(real_name.to_string());
        }
    }
    Ok(AvailablePlayersResponse { players })
}

/// Set the joined marker of `character` unless it already has a status. Returns
/// whether this call joined it.
pub async fn mark_joined(game: &GameHandle, character: &str) -> Result<bool, ServiceError> {
    let store = game.store();
    if participant_status(store.as_ref(), character).await? != ParticipantStatus::Absent {
        return Ok(false);
    }
    store
        .set_marker(
            MarkerKey::Status(character.to_string()),
            STATUS_JOINED.to_string(),
        )
        .await?;
    info!(game_id = game.id(), participant = %character, "participant joined");
    Ok(true)
}

/// Claim the character mapped to a real name and open a session for it.
pub async fn join(
    state: &SharedState,
    game_id: &str,
    request: JoinRequest,
) -> Result<JoinResponse, ServiceError> {
    request
        .validate()
        .map_err(|err| ServiceError::InvalidInput(err.to_string()))?;
    let game = state.require_game(game_id)?;
    let real_name = request.real_name.trim();
    let character = game
        .character_for(real_name)
        .ok_or_else(|| ServiceError::NotFound(format!("no character for `{real_name}`")))?
        .to_string();
    let role = game
        .roster()
        .read()
        .await
        .get(&character)
        .map(|participant| participant.role)
        .ok_or_else(|| ServiceError::NotFound(format!("unknown character `{character}`")))?;

    let _gate = game.join_gate().await;
    if !mark_joined(&game, &character).await? {
        return Err(ServiceError::InvalidState(format!(
            "`{real_name}` already joined"
        )));
    }
    let session = state
        .sessions()
        .create(game_id, &character, real_name, role);

    Ok(JoinResponse {
        session_id: session.token,
        character_name: character,
        role,
        color: role.color().to_string(),
    })
}

/// Derived status of a game.
pub async fn status(
    state: &SharedState,
    game_id: &str,
) -> Result<GameStatusResponse, ServiceError> {
    let game = state.require_game(game_id)?;
    let status = GameStatus::read(game.store().as_ref()).await?;
    Ok(status.into())
}

/// Append a chat line to `participant`'s personal log for the relay to pick up.
///
/// The action window stays held until the line is written, so the controller relays it
/// into the channel of the phase it was accepted in.
pub async fn submit_chat(
    game: &GameHandle,
    participant: &str,
    content: &str,
) -> Result<Submission, ServiceError> {
    let window = game.action_window().await;
    if let Err(rejection) = check_action(game, participant, false).await {
        return Ok(reject(game, participant, "chat", rejection));
    }
    let text = single_line(content);
    if text.is_empty() {
        return Ok(reject(game, participant, "chat", Rejection::Empty));
    }

    game.store()
        .append(
            LogKey::PersonalChat(participant.to_string()),
            vec![format_line(participant, &text)],
        )
        .await?;
    drop(window);
    Ok(Submission::Accepted)
}

/// Record a ballot in `participant`'s personal vote log.
///
/// The duplicate-submission guard refuses a second ballot for the same round before
/// it reaches the store. The target is written as given; the tally consumes ballots
/// for invalid targets without counting them.
pub async fn submit_vote(
    state: &AppState,
    game: &GameHandle,
    participant: &str,
    target: &str,
) -> Result<Submission, ServiceError> {
    let window = game.action_window().await;
    let round = match check_action(game, participant, true).await {
        Ok(round) => round,
        Err(rejection) => return Ok(reject(game, participant, "vote", rejection)),
    };
    let target = single_line(target);
    if target.is_empty() {
        return Ok(reject(game, participant, "vote", Rejection::Empty));
    }

    let key = VoteKey::new(game.id(), participant, round);
    if let Err(voted_player) = state.vote_guard().try_accept(key.clone(), &target) {
        return Ok(reject(
            game,
            participant,
            "vote",
            Rejection::AlreadyVoted {
                voted_player,
                round,
            },
        ));
    }

    let written = game
        .store()
        .append(
            LogKey::PersonalVote(participant.to_string()),
            vec![target.clone()],
        )
        .await;
    drop(window);
    if let Err(err) = written {
        state.vote_guard().release(&key);
        return Err(err.into());
    }
    info!(
        game_id = game.id(),
        participant = %participant,
        round,
        target = %target,
        "vote submitted"
    );
    Ok(Submission::Accepted)
}
