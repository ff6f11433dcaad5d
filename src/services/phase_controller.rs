//! The orchestrator timeline of one game: join wait, then alternating day and night
//! rounds of discussion, voting and elimination until a side wins.

use std::{sync::Arc, time::Duration};

use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::{
    dao::models::{MarkerKey, STATUS_VOTED_OUT},
    error::ServiceError,
    services::{
        chat_relay::{self, Channel, ChatRelay},
        game_status::missing_joins,
        polling_bridge::wait_for_change_until,
        vote_tally::VoteTallyEngine,
    },
    state::{
        GameHandle, SharedState,
        game::{Elimination, Role, Winner},
        state_machine::{GameEvent, GamePhase},
        transitions::run_transition_with_marker,
    },
};

const CUTTING_TO_VOTE: &str = "Only one player can talk, so skipping straight to the vote.";

fn phase_start_message(night: bool, minutes: f64) -> String {
    if night {
        format!("Now it's Nighttime for {minutes} minutes, only Mafia can talk and vote.")
    } else {
        format!("Now it's Daytime for {minutes} minutes, everyone can talk and vote.")
    }
}

fn voting_message(night: bool) -> &'static str {
    if night {
        "Nighttime has ended, now it's time to vote! Mafia, choose one Bystander to eliminate."
    } else {
        "Daytime has ended, now it's time to vote! Choose one player to vote out."
    }
}

fn game_over_message(winner: Winner) -> String {
    format!("Game over! The {} won.", winner.as_str())
}

/// Voting pool and eligible targets of a round.
#[derive(Debug, Clone, PartialEq, Eq)]
struct RoundPlan {
    voters: Vec<String>,
    targets: Vec<String>,
}

/// Drives one game from the join wait to its winner.
pub struct PhaseController {
    state: SharedState,
    game: Arc<GameHandle>,
    relay: ChatRelay,
    tally: VoteTallyEngine,
}

impl PhaseController {
    /// Controller for `game`, fresh relay and vote cursors.
    pub fn new(state: SharedState, game: Arc<GameHandle>) -> Self {
        Self {
            state,
            game,
            relay: ChatRelay::new(),
            tally: VoteTallyEngine::new(),
        }
    }

    /// Run the game to completion and return the winner.
    pub async fn run(mut self) -> Result<Winner, ServiceError> {
        self.await_joins().await?;

        let decided = self.game.roster().read().await.winner();
        if let Some(winner) = decided {
            self.finish(winner).await?;
            return Ok(winner);
        }
        run_transition_with_marker(&self.game, GameEvent::AllJoined).await?;

        loop {
            let phase = self.game.phase().await;
            if !phase.is_discussion() {
                return Err(ServiceError::InvalidState(format!(
                    "controller resumed in unexpected phase `{phase}`"
                )));
            }
            if let Some(winner) = self.run_phase(phase).await? {
                return Ok(winner);
            }
        }
    }

    async fn await_joins(&self) -> Result<(), ServiceError> {
        let store = self.game.store();
        let names: Vec<String> = {
            let roster = self.game.roster().read().await;
            roster.participants().map(|p| p.name.clone()).collect()
        };
        let config = self.state.config();
        let deadline = config.join_timeout.map(|limit| Instant::now() + limit);
        let mut changes = store.changes();

        info!(game_id = self.game.id(), players = ?names, "waiting for participants to join");
        loop {
            changes.borrow_and_update();
            let missing = missing_joins(store.as_ref(), &names).await?;
            if missing.is_empty() {
                break;
            }

            let now = Instant::now();
            let tick = now + config.poll_interval;
            match deadline {
                Some(deadline) if now >= deadline => {
                    warn!(
                        game_id = self.game.id(),
                        missing = ?missing,
                        "join timeout elapsed; starting without every participant"
                    );
                    break;
                }
                Some(deadline) => wait_for_change_until(&mut changes, tick.min(deadline)).await,
                None => wait_for_change_until(&mut changes, tick).await,
            }
        }

        let started = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_default();
        store.set_marker(MarkerKey::GameStart, started).await?;
        info!(game_id = self.game.id(), "game started");
        Ok(())
    }

    async fn plan_round(&self, night: bool) -> RoundPlan {
        let roster = self.game.roster().read().await;
        if night {
            RoundPlan {
                voters: roster.active_names_with_role(Role::Mafia),
                targets: roster.active_names_with_role(Role::Bystander),
            }
        } else {
            RoundPlan {
                voters: roster.active_names(),
                targets: roster.active_names(),
            }
        }
    }

    /// Discussion, voting and elimination of one day or night. Returns the winner when
    /// the elimination decided the game.
    async fn run_phase(&mut self, discussion: GamePhase) -> Result<Option<Winner>, ServiceError> {
        let night = discussion.is_night();
        let channel = Channel::for_phase(discussion);
        let minutes = if night {
            self.game.config().nighttime_minutes
        } else {
            self.game.config().daytime_minutes
        };
        let window = if night {
            self.game.config().nighttime()
        } else {
            self.game.config().daytime()
        };
        let plan = self.plan_round(night).await;
        let round = self.game.roster().read().await.round();

        info!(
            game_id = self.game.id(),
            phase = %discussion,
            round,
            voters = ?plan.voters,
            "discussion started"
        );
        self.announce(Channel::Manager, &phase_start_message(night, minutes))
            .await?;

        if plan.voters.len() > 1 {
            self.discuss(channel, &plan.voters, window).await?;
        } else {
            self.announce(Channel::Manager, CUTTING_TO_VOTE).await?;
        }

        self.close_discussion(channel, &plan.voters).await?;
        self.announce(channel, voting_message(night)).await?;

        let config = self.state.config();
        let outcome = self
            .tally
            .run_round(
                &self.game,
                self.state.connections(),
                channel,
                &plan.voters,
                &plan.targets,
                config.vote_timeout,
                config.poll_interval,
            )
            .await?;
        info!(
            game_id = self.game.id(),
            round,
            counts = ?outcome.counts,
            eliminated = %outcome.eliminated,
            "vote resolved"
        );

        let closed = self.game.close_actions().await;
        let late = self.tally.discard_unread(&self.game, &plan.voters).await?;
        if late > 0 {
            info!(game_id = self.game.id(), round, late, "ballots after resolution dropped");
        }

        let elimination = self.eliminate(&outcome.eliminated).await?;
        match elimination.winner {
            Some(winner) => {
                self.finish(winner).await?;
                Ok(Some(winner))
            }
            None => {
                run_transition_with_marker(&self.game, GameEvent::VotingResolved).await?;
                drop(closed);
                Ok(None)
            }
        }
    }

    /// End the discussion on `channel`: hold actions off, relay the lines that landed
    /// since the last cycle, then open the vote.
    async fn close_discussion(
        &mut self,
        channel: Channel,
        speakers: &[String],
    ) -> Result<(), ServiceError> {
        let _closed = self.game.close_actions().await;
        self.relay
            .relay_round(&self.game, self.state.connections(), channel, speakers)
            .await?;
        run_transition_with_marker(&self.game, GameEvent::DiscussionElapsed).await?;
        Ok(())
    }

    /// Relay chat of `speakers` until `window` elapses, overshooting by at most one
    /// relay cycle.
    async fn discuss(
        &mut self,
        channel: Channel,
        speakers: &[String],
        window: Duration,
    ) -> Result<(), ServiceError> {
        let store = self.game.store();
        let mut changes = store.changes();
        let poll_interval = self.state.config().poll_interval;
        let deadline = Instant::now() + window;

        loop {
            changes.borrow_and_update();
            self.relay
                .relay_round(&self.game, self.state.connections(), channel, speakers)
                .await?;

            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            wait_for_change_until(&mut changes, deadline.min(now + poll_interval)).await;
        }
    }

    async fn eliminate(&self, name: &str) -> Result<Elimination, ServiceError> {
        let (elimination, remaining) = {
            let mut roster = self.game.roster().write().await;
            let elimination = roster.eliminate(name)?;
            (elimination, roster.active_names())
        };

        let store = self.game.store();
        store
            .set_marker(MarkerKey::Status(name.to_string()), STATUS_VOTED_OUT.into())
            .await?;
        store
            .set_marker(MarkerKey::RemainingPlayers, remaining.join("\n"))
            .await?;

        let role = elimination.participant.role;
        info!(
            game_id = self.game.id(),
            participant = %name,
            role = %role,
            "participant eliminated"
        );
        self.announce(
            Channel::Manager,
            &format!("{name} was voted out. Their role was {role}"),
        )
        .await?;
        Ok(elimination)
    }

    async fn finish(&self, winner: Winner) -> Result<(), ServiceError> {
        self.game
            .store()
            .set_marker(MarkerKey::Winner, winner.as_str().to_string())
            .await?;
        run_transition_with_marker(&self.game, GameEvent::WinnerDecided(winner)).await?;
        self.announce(Channel::Manager, &game_over_message(winner))
            .await?;
        info!(game_id = self.game.id(), winner = winner.as_str(), "game over");
        Ok(())
    }

    async fn announce(&self, channel: Channel, text: &str) -> Result<(), ServiceError> {
        chat_relay::announce(&self.game, self.state.connections(), channel, text).await?;
        Ok(())
    }
}
