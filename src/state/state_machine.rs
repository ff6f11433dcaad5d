use std::{fmt, time::Instant};

use thiserror::Error;
use uuid::Uuid;

use crate::state::game::Winner;

/// Phases a game goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GamePhase {
    /// Waiting for every participant's join marker.
    AwaitingJoin,
    /// Everyone may chat in the daytime channel.
    DayDiscussion,
    /// Everyone votes on whom to eliminate.
    DayVoting,
    /// Mafia chat in the nighttime channel.
    NightDiscussion,
    /// Mafia vote on which Bystander to eliminate.
    NightVoting,
    /// A winner was decided. Terminal.
    GameOver,
}

impl GamePhase {
    /// Value persisted in the phase marker.
    pub fn as_str(self) -> &'static str {
        match self {
            GamePhase::AwaitingJoin => "awaiting_join",
            GamePhase::DayDiscussion => "day_discussion",
            GamePhase::DayVoting => "day_voting",
            GamePhase::NightDiscussion => "night_discussion",
            GamePhase::NightVoting => "night_voting",
            GamePhase::GameOver => "game_over",
        }
    }

    /// Parse a persisted phase marker.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "awaiting_join" => Some(GamePhase::AwaitingJoin),
            "day_discussion" => Some(GamePhase::DayDiscussion),
            "day_voting" => Some(GamePhase::DayVoting),
            "night_discussion" => Some(GamePhase::NightDiscussion),
            "night_voting" => Some(GamePhase::NightVoting),
            "game_over" => Some(GamePhase::GameOver),
            _ => None,
        }
    }

    /// Night phases are restricted to the Mafia.
    pub fn is_night(self) -> bool {
        matches!(self, GamePhase::NightDiscussion | GamePhase::NightVoting)
    }

    /// Whether ballots are being collected.
    pub fn is_voting(self) -> bool {
        matches!(self, GamePhase::DayVoting | GamePhase::NightVoting)
    }

    /// Whether chat is being relayed.
    pub fn is_discussion(self) -> bool {
        matches!(self, GamePhase::DayDiscussion | GamePhase::NightDiscussion)
    }
}

impl fmt::Display for GamePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events that can be applied to the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GameEvent {
    /// Every participant joined (or the join window elapsed).
    AllJoined,
    /// The discussion deadline elapsed (or was skipped).
    DiscussionElapsed,
    /// The round's vote was resolved without deciding the game.
    VotingResolved,
    /// A win condition holds.
    WinnerDecided(Winner),
}

/// Error returned when attempting to apply an invalid transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while in {from:?}")]
pub struct InvalidTransition {
    /// The phase the state machine was in when the invalid event was received.
    pub from: GamePhase,
    /// The event that cannot be applied from this phase.
    pub event: GameEvent,
}

/// Errors that can occur when planning a state machine transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    /// A transition is already pending and must be applied or aborted.
    AlreadyPending,
    /// The requested transition is not valid from the current phase.
    InvalidTransition(InvalidTransition),
}

/// Errors that can occur when applying a planned state machine transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyError {
    /// No transition is currently pending.
    NoPending,
    /// Plan ID does not match the pending plan.
    IdMismatch {
        /// Expected plan ID.
        expected: PlanId,
        /// Provided plan ID.
        got: PlanId,
    },
    /// State machine phase changed since the plan was created.
    PhaseMismatch {
        /// Phase when plan was created.
        expected: GamePhase,
        /// Current phase.
        actual: GamePhase,
    },
}

/// Errors that can occur when aborting a planned state machine transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortError {
    /// No transition is currently pending.
    NoPending,
    /// Plan ID does not match the pending plan.
    IdMismatch {
        /// Expected plan ID.
        expected: PlanId,
        /// Provided plan ID.
        got: PlanId,
    },
}

/// Unique identifier for a planned state transition.
pub type PlanId = Uuid;

/// A planned state machine transition that has been validated but not yet applied.
#[derive(Debug, Clone)]
pub struct Plan {
    /// Unique identifier for this plan.
    pub id: PlanId,
    /// Phase the state machine is currently in.
    pub from: GamePhase,
    /// Phase the state machine will transition to.
    pub to: GamePhase,
    /// Event that triggered this transition.
    pub event: GameEvent,
    /// Timestamp when this plan was created.
    pub pending_since: Instant,
}

/// Snapshot of the current state machine state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Current phase of the state machine.
    pub phase: GamePhase,
    /// Number of transitions applied so far.
    pub version: usize,
    /// Pending transition phase, if a transition is planned but not yet applied.
    pub pending: Option<GamePhase>,
}

/// Day/night state machine of one game.
#[derive(Debug, Clone)]
pub struct GameStateMachine {
    phase: GamePhase,
    version: usize,
    pending: Option<Plan>,
}

impl Default for GameStateMachine {
    fn default() -> Self {
        Self {
            phase: GamePhase::AwaitingJoin,
            version: 0,
            pending: None,
        }
    }
}

impl GameStateMachine {
    /// Create a new state machine waiting for joins.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inspect the current phase.
    pub fn phase(&self) -> GamePhase {
        self.phase
    }

    /// Create a snapshot of the current state machine state.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            phase: self.phase,
            version: self.version,
            pending: self.pending.as_ref().map(|plan| plan.to),
        }
    }

    /// Plan a transition by validating that the event can be applied from the current phase.
    /// Returns a Plan that can later be applied or aborted.
    pub fn plan(&mut self, event: GameEvent) -> Result<Plan, PlanError> {
        if self.pending.is_some() {
            return Err(PlanError::AlreadyPending);
        }

        let next = self
            .compute_transition(event.clone())
            .map_err(PlanError::InvalidTransition)?;

        let plan = Plan {
            id: Uuid::new_v4(),
            from: self.phase,
            to: next,
            event,
            pending_since: Instant::now(),
        };

        self.pending = Some(plan.clone());

        Ok(plan)
    }

    /// Apply a planned transition, moving the state machine to the next phase.
    pub fn apply(&mut self, plan_id: PlanId) -> Result<GamePhase, ApplyError> {
        let plan = self.pending.take().ok_or(ApplyError::NoPending)?;

        if plan.id != plan_id {
            let expected_plan_id = plan.id;
            self.pending = Some(plan);
            return Err(ApplyError::IdMismatch {
                expected: expected_plan_id,
                got: plan_id,
            });
        }

        if self.phase != plan.from {
            return Err(ApplyError::PhaseMismatch {
                expected: plan.from,
                actual: self.phase,
            });
        }

        self.phase = plan.to;
        self.version += 1;

        Ok(self.phase)
    }

    /// Abort a planned transition without applying it.
    pub fn abort(&mut self, plan_id: PlanId) -> Result<(), AbortError> {
        let plan = self.pending.as_ref().ok_or(AbortError::NoPending)?;

        if plan.id != plan_id {
            return Err(AbortError::IdMismatch {
                expected: plan.id,
                got: plan_id,
            });
        }

        self.pending = None;
        Ok(())
    }

    fn compute_transition(&self, event: GameEvent) -> Result<GamePhase, InvalidTransition> {
        let next = match (self.phase, event) {
            (GamePhase::AwaitingJoin, GameEvent::AllJoined) => GamePhase::DayDiscussion,
            (GamePhase::DayDiscussion, GameEvent::DiscussionElapsed) => GamePhase::DayVoting,
            (GamePhase::DayVoting, GameEvent::VotingResolved) => GamePhase::NightDiscussion,
            (GamePhase::NightDiscussion, GameEvent::DiscussionElapsed) => GamePhase::NightVoting,
            (GamePhase::NightVoting, GameEvent::VotingResolved) => GamePhase::DayDiscussion,
            (
                GamePhase::AwaitingJoin | GamePhase::DayVoting | GamePhase::NightVoting,
                GameEvent::WinnerDecided(_),
            ) => GamePhase::GameOver,
            (from, event) => return Err(InvalidTransition { from, event }),
        };

        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(sm: &mut GameStateMachine, event: GameEvent) -> GamePhase {
        let plan = sm.plan(event).unwrap();
        sm.apply(plan.id).unwrap()
    }

    #[test]
    fn initial_state_awaits_joins() {
        let sm = GameStateMachine::new();
        assert_eq!(sm.phase(), GamePhase::AwaitingJoin);
    }

    #[test]
    fn full_day_night_cycle() {
        let mut sm = GameStateMachine::new();

        assert_eq!(apply(&mut sm, GameEvent::AllJoined), GamePhase::DayDiscussion);
        assert_eq!(
            apply(&mut sm, GameEvent::DiscussionElapsed),
            GamePhase::DayVoting
        );
        assert_eq!(
            apply(&mut sm, GameEvent::VotingResolved),
            GamePhase::NightDiscussion
        );
        assert_eq!(
            apply(&mut sm, GameEvent::DiscussionElapsed),
            GamePhase::NightVoting
        );
        assert_eq!(
            apply(&mut sm, GameEvent::VotingResolved),
            GamePhase::DayDiscussion
        );
        assert_eq!(sm.snapshot().version, 5);
    }

    #[test]
    fn game_over_is_terminal() {
        let mut sm = GameStateMachine::new();
        apply(&mut sm, GameEvent::AllJoined);
        apply(&mut sm, GameEvent::DiscussionElapsed);
        assert_eq!(
            apply(&mut sm, GameEvent::WinnerDecided(Winner::Mafia)),
            GamePhase::GameOver
        );

        for event in [
            GameEvent::AllJoined,
            GameEvent::DiscussionElapsed,
            GameEvent::VotingResolved,
            GameEvent::WinnerDecided(Winner::Bystanders),
        ] {
            match sm.plan(event.clone()).unwrap_err() {
                PlanError::InvalidTransition(invalid) => {
                    assert_eq!(invalid.from, GamePhase::GameOver);
                    assert_eq!(invalid.event, event);
                }
                other => panic!("unexpected error: {other:?}"),
            }
        }
    }

    #[test]
    fn winner_cannot_be_decided_mid_discussion() {
        let mut sm = GameStateMachine::new();
        apply(&mut sm, GameEvent::AllJoined);
        assert!(matches!(
            sm.plan(GameEvent::WinnerDecided(Winner::Bystanders)),
            Err(PlanError::InvalidTransition(_))
        ));
    }

    #[test]
    fn only_one_plan_may_be_pending() {
        let mut sm = GameStateMachine::new();
        let plan = sm.plan(GameEvent::AllJoined).unwrap();
        assert_eq!(sm.snapshot().pending, Some(GamePhase::DayDiscussion));
        assert_eq!(
            sm.plan(GameEvent::AllJoined).unwrap_err(),
            PlanError::AlreadyPending
        );

        let other = Uuid::new_v4();
        assert_eq!(
            sm.apply(other),
            Err(ApplyError::IdMismatch {
                expected: plan.id,
                got: other
            })
        );
        sm.apply(plan.id).unwrap();
        assert_eq!(sm.snapshot().pending, None);
    }

    #[test]
    fn abort_clears_pending() {
        let mut sm = GameStateMachine::new();
        let plan = sm.plan(GameEvent::AllJoined).unwrap();
        sm.abort(plan.id).unwrap();
        assert!(sm.pending.is_none());
        assert_eq!(sm.phase(), GamePhase::AwaitingJoin);
    }

    #[test]
    fn phase_markers_round_trip() {
        for phase in [
            GamePhase::AwaitingJoin,
            GamePhase::DayDiscussion,
            GamePhase::DayVoting,
            GamePhase::NightDiscussion,
            GamePhase::NightVoting,
            GamePhase::GameOver,
        ] {
            assert_eq!(GamePhase::parse(phase.as_str()), Some(phase));
        }
        assert_eq!(GamePhase::parse("Daytime"), None);
    }
}
