//! Derived game status computed from persisted markers.
//!
//! Live connections and autonomous participants both consult these predicates, so
//! they observe the same phase, round and outcome through different transports.

use crate::{
    dao::{
        log_store::LogStore,
        models::{MarkerKey, STATUS_JOINED, STATUS_VOTED_OUT, parse_name_list},
        storage::StorageResult,
    },
    state::{game::Winner, state_machine::GamePhase},
};

/// Point-in-time view of a game as persisted in its log store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameStatus {
    /// Current phase, `AwaitingJoin` until the first marker is written.
    pub phase: GamePhase,
    /// Winner, once decided.
    pub winner: Option<Winner>,
    /// Every participant of the roster.
    pub players: Vec<String>,
    /// Participants still in play.
    pub remaining: Vec<String>,
}

impl GameStatus {
    /// Read the markers of `store`.
    pub async fn read(store: &dyn LogStore) -> StorageResult<Self> {
        let phase = store
            .marker(MarkerKey::Phase)
            .await?
            .and_then(|raw| GamePhase::parse(&raw))
            .unwrap_or(GamePhase::AwaitingJoin);
        let winner = store
            .marker(MarkerKey::Winner)
            .await?
            .and_then(|raw| Winner::parse(&raw));
        let players = store
            .marker(MarkerKey::PlayerNames)
            .await?
            .map(|raw| parse_name_list(&raw))
            .unwrap_or_default();
        let remaining = store
            .marker(MarkerKey::RemainingPlayers)
            .await?
            .map(|raw| parse_name_list(&raw))
            .unwrap_or_default();

        Ok(Self {
            phase,
            winner,
            players,
            remaining,
        })
    }

    /// One plus the number of eliminations so far.
    pub fn round(&self) -> u32 {
        (self.players.len().saturating_sub(self.remaining.len()) + 1) as u32
    }

    /// Whether a winner was decided.
    pub fn is_game_over(&self) -> bool {
        self.winner.is_some() || self.phase == GamePhase::GameOver
    }

    /// Whether ballots are being collected.
    pub fn is_voting_time(&self) -> bool {
        self.phase.is_voting()
    }

    /// Whether the current phase is restricted to the Mafia.
    pub fn is_nighttime(&self) -> bool {
        self.phase.is_night()
    }

    /// Whether every participant joined and the first day started.
    pub fn has_started(&self) -> bool {
        self.phase != GamePhase::AwaitingJoin
    }

    /// Whether `name` is still in play.
    pub fn is_remaining(&self, name: &str) -> bool {
        self.remaining.iter().any(|remaining| remaining == name)
    }
}

/// Status marker of one participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticipantStatus {
    /// Never joined.
    Absent,
    /// Joined and still in play.
    Joined,
    /// Eliminated.
    VotedOut,
}

/// Read the status marker of `name`.
pub async fn participant_status(
    store: &dyn LogStore,
    name: &str,
) -> StorageResult<ParticipantStatus> {
    let status = store.marker(MarkerKey::Status(name.to_string())).await?;
    Ok(match status.as_deref().map(str::trim) {
        Some(STATUS_VOTED_OUT) => ParticipantStatus::VotedOut,
        Some(STATUS_JOINED) => ParticipantStatus::Joined,
        Some(_) | None => ParticipantStatus::Absent,
    })
}

/// Names among `names` whose status marker is still unset.
pub async fn missing_joins(store: &dyn LogStore, names: &[String]) -> StorageResult<Vec<String>> {
    let mut missing = Vec::new();
    for name in names {
        if participant_status(store, name).await? == ParticipantStatus::Absent {
            missing.push(name.clone());
        }
    }
    Ok(missing)
}

/// Whether every participant of `names` joined.
pub async fn all_joined(store: &dyn LogStore, names: &[String]) -> StorageResult<bool> {
    Ok(missing_joins(store, names).await?.is_empty())
}
