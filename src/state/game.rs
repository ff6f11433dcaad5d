use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Secret role dealt to a participant for the whole game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum Role {
    /// Minority trying to eliminate Bystanders undetected.
    Mafia,
    /// Majority trying to find the Mafia.
    Bystander,
}

impl Role {
    /// Build a role from the roster's `is_mafia` flag.
    pub fn from_is_mafia(is_mafia: bool) -> Self {
        if is_mafia { Role::Mafia } else { Role::Bystander }
    }

    /// Whether this is the Mafia role.
    pub fn is_mafia(self) -> bool {
        matches!(self, Role::Mafia)
    }

    /// Display color used by the web client for this role.
    pub fn color(self) -> &'static str {
        match self {
            Role::Mafia => "red",
            Role::Bystander => "blue",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Mafia => f.write_str("Mafia"),
            Role::Bystander => f.write_str("Bystander"),
        }
    }
}

/// Whether a participant may still act.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    /// Still chatting and voting.
    Active,
    /// Voted out; may only observe.
    Eliminated,
}

/// Side that won the game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum Winner {
    /// Every Mafia participant was eliminated.
    Bystanders,
    /// Mafia reached parity with the Bystanders.
    Mafia,
}

impl Winner {
    /// Value persisted in the winner marker.
    pub fn as_str(self) -> &'static str {
        match self {
            Winner::Bystanders => "Bystanders",
            Winner::Mafia => "Mafia",
        }
    }

    /// Parse the persisted winner marker.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "Bystanders" => Some(Winner::Bystanders),
            "Mafia" => Some(Winner::Mafia),
            _ => None,
        }
    }
}

/// Player of the roster, human or autonomous.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    /// Character name, unique within the game.
    pub name: String,
    /// Secret role.
    pub role: Role,
    /// Active until voted out.
    pub eligibility: Eligibility,
    /// Driven by the generation service instead of a human.
    pub autonomous: bool,
}

impl Participant {
    /// Create an active participant.
    pub fn new(name: impl Into<String>, role: Role, autonomous: bool) -> Self {
        Self {
            name: name.into(),
            role,
            eligibility: Eligibility::Active,
            autonomous,
        }
    }

    /// Whether the participant is still in play.
    pub fn is_active(&self) -> bool {
        self.eligibility == Eligibility::Active
    }
}

/// Errors raised when mutating the roster.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RosterError {
    /// Two roster entries share a name.
    #[error("duplicate participant `{0}`")]
    DuplicateName(String),
    /// The roster has no participants.
    #[error("roster is empty")]
    Empty,
    /// The named participant is not part of the roster.
    #[error("unknown participant `{0}`")]
    UnknownParticipant(String),
    /// The named participant was already eliminated.
    #[error("participant `{0}` is already eliminated")]
    AlreadyEliminated(String),
    /// A winner was decided; the roster is frozen.
    #[error("game is over ({0:?} won)")]
    GameOver(Winner),
}

/// Result of a successful elimination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Elimination {
    /// The participant as it was when eliminated.
    pub participant: Participant,
    /// Winner decided by this elimination, if any.
    pub winner: Option<Winner>,
}

/// Roster of a game: participants in seating order, round counter and winner.
///
/// The winner is re-evaluated after every mutation, so it is set exactly when the
/// Mafia is gone or has reached parity with the Bystanders.
#[derive(Debug, Clone)]
pub struct Roster {
    participants: IndexMap<String, Participant>,
    winner: Option<Winner>,
}

impl Roster {
    /// Build a roster, rejecting duplicate names.
    pub fn new(participants: Vec<Participant>) -> Result<Self, RosterError> {
        if participants.is_empty() {
            return Err(RosterError::Empty);
        }

        let mut map = IndexMap::with_capacity(participants.len());
        for participant in participants {
            if map.contains_key(&participant.name) {
                return Err(RosterError::DuplicateName(participant.name));
            }
            map.insert(participant.name.clone(), participant);
        }

        let mut roster = Self {
            participants: map,
            winner: None,
        };
        roster.winner = roster.evaluate();
        Ok(roster)
    }

    /// Every participant in roster order, including eliminated ones.
    pub fn participants(&self) -> impl Iterator<Item = &Participant> {
        self.participants.values()
    }

    /// Look a participant up by name.
    pub fn get(&self, name: &str) -> Option<&Participant> {
        self.participants.get(name)
    }

    /// Number of participants ever seated.
    pub fn len(&self) -> usize {
        self.participants.len()
    }

    /// Always false; a roster holds at least one participant.
    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// Active participants in roster order.
    pub fn active(&self) -> Vec<&Participant> {
        self.participants().filter(|p| p.is_active()).collect()
    }

    /// Names of the active participants in roster order.
    pub fn active_names(&self) -> Vec<String> {
        self.active().into_iter().map(|p| p.name.clone()).collect()
    }

    /// Names of the active participants holding `role`.
    pub fn active_names_with_role(&self, role: Role) -> Vec<String> {
        self.active()
            .into_iter()
            .filter(|p| p.role == role)
            .map(|p| p.name.clone())
            .collect()
    }

    /// Active Mafia count.
    pub fn mafia_count(&self) -> usize {
        self.active().iter().filter(|p| p.role.is_mafia()).count()
    }

    /// Active Bystander count.
    pub fn bystander_count(&self) -> usize {
        self.active().iter().filter(|p| !p.role.is_mafia()).count()
    }

    /// Round number: one plus the number of eliminations so far.
    pub fn round(&self) -> u32 {
        (self.len() - self.active().len()) as u32 + 1
    }

    /// Winner, once decided.
    pub fn winner(&self) -> Option<Winner> {
        self.winner
    }

    /// Flip `name` to eliminated and re-evaluate the win condition.
    pub fn eliminate(&mut self, name: &str) -> Result<Elimination, RosterError> {
        if let Some(winner) = self.winner {
            return Err(RosterError::GameOver(winner));
        }

        let participant = self
            .participants
            .get_mut(name)
            .ok_or_else(|| RosterError::UnknownParticipant(name.to_string()))?;
        if !participant.is_active() {
            return Err(RosterError::AlreadyEliminated(name.to_string()));
        }
        participant.eligibility = Eligibility::Eliminated;
        let snapshot = participant.clone();

        self.winner = self.evaluate();
        Ok(Elimination {
            participant: snapshot,
            winner: self.winner,
        })
    }

    fn evaluate(&self) -> Option<Winner> {
        let mafia = self.mafia_count();
        if mafia == 0 {
            Some(Winner::Bystanders)
        } else if mafia >= self.bystander_count() {
            Some(Winner::Mafia)
        } else {
            None
        }
    }
}
