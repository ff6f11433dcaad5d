//! Autonomous participants: generated chat and votes through the same log store the
//! live participants use.
//!
//! A driver never talks to the controller directly. It tails its visible channels
//! with a [`PollingBridge`], reads the derived [`GameStatus`] on every wake-up and
//! submits through [`player_service`], so its actions pass the same checks as a
//! human's.

use std::{collections::VecDeque, pin::pin, sync::Arc};

use futures::StreamExt;
use tokio::time::{Instant, timeout};
use tracing::{debug, info, warn};

use crate::{
    dao::storage::StorageError,
    error::ServiceError,
    services::{
        chat_relay::Channel,
        game_status::GameStatus,
        generation::{GenerationError, GenerationService},
        player_service::{self, Rejection, Submission},
        polling_bridge::PollingBridge,
    },
    state::{GameHandle, SharedState, game::Role},
};

const TRANSCRIPT_LINES: usize = 40;

/// Errors that stop a driver.
#[derive(Debug, thiserror::Error)]
pub enum AutonomousError {
    /// Reading or writing the game's logs failed.
    #[error(transparent)]
    Service(#[from] ServiceError),
    /// The generation backend gave up.
    #[error(transparent)]
    Generation(#[from] GenerationError),
}

impl From<StorageError> for AutonomousError {
    fn from(err: StorageError) -> Self {
        AutonomousError::Service(err.into())
    }
}

fn system_info(name: &str, role: Role) -> String {
    let goal = if role.is_mafia() {
        "You are secretly Mafia. Blend in with the bystanders during the day, and at night \
         agree with the other Mafia on a bystander to eliminate."
    } else {
        "You are a bystander. Work out who the Mafia are from what people say and how they \
         vote, and convince the others."
    };
    format!(
        "You are playing a chat-based game of Mafia under the name {name}. {goal} Write like \
         a person in a group chat: short, casual, one message at a time, never mention being \
         an AI and never prefix your message with your name."
    )
}

fn chat_prompt(transcript: &VecDeque<String>, night: bool) -> String {
    let setting = if night {
        "It is nighttime; only the Mafia can read this chat."
    } else {
        "It is daytime; everyone can read this chat."
    };
    let history = if transcript.is_empty() {
        "(nothing has been said yet)".to_string()
    } else {
        transcript.iter().cloned().collect::<Vec<_>>().join("\n")
    };
    format!("{setting}\nThe conversation so far:\n{history}\n\nWrite your next message.")
}

fn vote_prompt(transcript: &VecDeque<String>, options: &[String]) -> String {
    let history = transcript.iter().cloned().collect::<Vec<_>>().join("\n");
    format!(
        "The conversation so far:\n{history}\n\nIt is time to vote. Choose one of: {}. \
         Answer with the name only.",
        options.join(", ")
    )
}

/// Map generated vote text onto a valid target: an exact name first, then the first
/// name the text mentions. Anything else is returned verbatim.
pub fn match_target(text: &str, options: &[String]) -> String {
    let cleaned = text
        .trim()
        .trim_matches(|c: char| c.is_ascii_punctuation() || c.is_whitespace());
    if let Some(exact) = options
        .iter()
        .find(|option| option.eq_ignore_ascii_case(cleaned))
    {
        return exact.clone();
    }
    let lowered = cleaned.to_lowercase();
    options
        .iter()
        .filter_map(|option| {
            lowered
                .find(&option.to_lowercase())
                .map(|position| (position, option))
        })
        .min_by_key(|(position, _)| *position)
        .map(|(_, option)| option.clone())
        .unwrap_or_else(|| text.trim().to_string())
}

/// Whether `line` was written by `name` (`[HH:MM:SS] name: text`).
fn authored_by(line: &str, name: &str) -> bool {
    line.split_once("] ")
        .and_then(|(_, rest)| rest.strip_prefix(name))
        .is_some_and(|rest| rest.starts_with(": "))
}

/// Driver of one autonomous participant.
pub struct AutonomousPlayer {
    state: SharedState,
    game: Arc<GameHandle>,
    name: String,
    role: Role,
    generator: Arc<dyn GenerationService>,
    transcript: VecDeque<String>,
    heard_since_spoke: bool,
    last_spoke: Option<Instant>,
    voted_round: Option<u32>,
}

impl AutonomousPlayer {
    /// Driver for `name`, which must be part of the roster.
    pub async fn new(
        state: SharedState,
        game: Arc<GameHandle>,
        name: impl Into<String>,
        generator: Arc<dyn GenerationService>,
    ) -> Result<Self, ServiceError> {
        let name = name.into();
        let role = game
            .roster()
            .read()
            .await
            .get(&name)
            .map(|participant| participant.role)
            .ok_or_else(|| ServiceError::NotFound(format!("unknown participant `{name}`")))?;
        Ok(Self {
            state,
            game,
            name,
            role,
            generator,
            transcript: VecDeque::with_capacity(TRANSCRIPT_LINES),
            heard_since_spoke: false,
            last_spoke: None,
            voted_round: None,
        })
    }

    /// Join, then act on every wake-up until the game ends or the participant is
    /// eliminated.
    pub async fn run(mut self) -> Result<(), AutonomousError> {
        {
            let _gate = self.game.join_gate().await;
            player_service::mark_joined(&self.game, &self.name).await?;
        }
        let interval = self.state.config().poll_interval;
        let logs = Channel::visible_channels(self.role)
            .into_iter()
            .map(Channel::log);
        let bridge = PollingBridge::new(self.game.store(), logs, interval);
        let mut lines = pin!(bridge.into_stream());
        info!(
            game_id = self.game.id(),
            participant = %self.name,
            "autonomous participant joined"
        );

        loop {
            match timeout(interval, lines.next()).await {
                Ok(Some(line)) => {
                    let (_, line) = line?;
                    self.hear(line);
                }
                Ok(None) => return Ok(()),
                Err(_) => {}
            }

            let status = GameStatus::read(self.game.store().as_ref()).await?;
            if status.is_game_over() {
                info!(
                    game_id = self.game.id(),
                    participant = %self.name,
                    "autonomous participant done"
                );
                return Ok(());
            }
            if status.players.contains(&self.name) && !status.is_remaining(&self.name) {
                info!(
                    game_id = self.game.id(),
                    participant = %self.name,
                    "autonomous participant eliminated"
                );
                return Ok(());
            }
            self.act(&status).await?;
        }
    }

    fn hear(&mut self, line: String) {
        if !authored_by(&line, &self.name) {
            self.heard_since_spoke = true;
        }
        if self.transcript.len() == TRANSCRIPT_LINES {
            self.transcript.pop_front();
        }
        self.transcript.push_back(line);
    }

    async fn act(&mut self, status: &GameStatus) -> Result<(), AutonomousError> {
        if status.is_nighttime() && !self.role.is_mafia() {
            return Ok(());
        }
        if status.phase.is_discussion() {
            self.maybe_speak(status.is_nighttime()).await?;
        } else if status.is_voting_time() && self.voted_round != Some(status.round()) {
            self.vote(status).await?;
        }
        Ok(())
    }

    async fn maybe_speak(&mut self, night: bool) -> Result<(), AutonomousError> {
        let min_gap = self.state.config().autonomous_min_speak_interval;
        let rested = self
            .last_spoke
            .is_none_or(|spoke| spoke.elapsed() >= min_gap);
        let prompted = self.heard_since_spoke || self.last_spoke.is_none();
        if !rested || !prompted {
            return Ok(());
        }

        let text = self
            .generator
            .generate(
                system_info(&self.name, self.role),
                chat_prompt(&self.transcript, night),
            )
            .await?;
        let submission = player_service::submit_chat(&self.game, &self.name, &text).await?;
        debug!(
            game_id = self.game.id(),
            participant = %self.name,
            accepted = submission.is_accepted(),
            "autonomous chat"
        );
        self.last_spoke = Some(Instant::now());
        self.heard_since_spoke = false;
        Ok(())
    }

    async fn vote(&mut self, status: &GameStatus) -> Result<(), AutonomousError> {
        let options =
            player_service::vote_options(&self.game, &self.name, status.is_nighttime()).await;
        let text = self
            .generator
            .generate(
                system_info(&self.name, self.role),
                vote_prompt(&self.transcript, &options),
            )
            .await?;
        let target = match_target(&text, &options);
        let submission =
            player_service::submit_vote(&self.state, &self.game, &self.name, &target).await?;
        match submission {
            Submission::Accepted | Submission::Rejected(Rejection::AlreadyVoted { .. }) => {
                self.voted_round = Some(status.round());
            }
            Submission::Rejected(rejection) => {
                warn!(
                    game_id = self.game.id(),
                    participant = %self.name,
                    reason = %rejection,
                    "autonomous vote dropped"
                );
            }
        }
        Ok(())
    }
}

/// Spawn one driver per autonomous participant of `game`.
pub async fn spawn_all(
    state: SharedState,
    game: Arc<GameHandle>,
    generator: Arc<dyn GenerationService>,
) -> Result<usize, ServiceError> {
    let names: Vec<String> = {
        let roster = game.roster().read().await;
        roster
            .participants()
            .filter(|participant| participant.autonomous)
            .map(|participant| participant.name.clone())
            .collect()
    };
    for name in &names {
        let player =
            AutonomousPlayer::new(state.clone(), game.clone(), name, generator.clone()).await?;
        let game_id = game.id().to_string();
        let participant = name.clone();
        tokio::spawn(async move {
            if let Err(err) = player.run().await {
                warn!(game_id, participant, error = %err, "autonomous participant stopped");
            }
        });
    }
    Ok(names.len())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        config::{AppConfig, GameConfig, PlayerConfig},
        dao::{
            log_store::{LogStore, MemoryLogStore},
            models::LogKey,
        },
        services::generation::testing::ScriptedGeneration,
        state::{
            AppState, state_machine::GameEvent, transitions::run_transition_with_marker,
        },
    };

    fn options(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn generated_votes_are_matched_to_targets() {
        let targets = options(&["Scarlet", "Mustard", "Plum"]);
        assert_eq!(match_target("mustard.", &targets), "Mustard");
        assert_eq!(match_target("I think Plum, maybe Scarlet", &targets), "Plum");
        assert_eq!(match_target("nobody", &targets), "nobody");
    }

    #[test]
    fn own_lines_are_recognised() {
        assert!(authored_by("[10:00:00] Plum: hi", "Plum"));
        assert!(!authored_by("[10:00:00] Plumber: hi", "Plum"));
        assert!(!authored_by("[10:00:00] Scarlet: Plum: hi", "Plum"));
    }

    #[tokio::test]
    async fn driver_joins_chats_and_votes_once() {
        let store = MemoryLogStore::new();
        let game = Arc::new(
            GameHandle::new(
                "g1",
                GameConfig {
                    players: vec![
                        PlayerConfig::new("Scarlet", true, false),
                        PlayerConfig::new("Mustard", false, false),
                        PlayerConfig::new("Plum", false, true),
                    ],
                    daytime_minutes: 1.0,
                    nighttime_minutes: 1.0,
                },
                Vec::new(),
                Arc::new(store.clone()),
            )
            .unwrap(),
        );
        game.seed_markers().await.unwrap();
        let state = AppState::new(AppConfig {
            poll_interval: Duration::from_millis(10),
            autonomous_min_speak_interval: Duration::from_secs(60),
            ..AppConfig::default()
        });
        state.insert_game(game.clone());

        let generator = ScriptedGeneration::new(&["hello all", "Scarlet!"], "Mustard");
        let player = AutonomousPlayer::new(
            state.clone(),
            game.clone(),
            "Plum",
            Arc::new(generator.clone()),
        )
        .await
        .unwrap();
        let driver = tokio::spawn(player.run());

        let chat = LogKey::PersonalChat("Plum".into());
        run_transition_with_marker(&game, GameEvent::AllJoined)
            .await
            .unwrap();
        for _ in 0..200 {
            if !store.read_from(chat.clone(), 0).await.unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let said = store.read_from(chat, 0).await.unwrap();
        assert_eq!(said.len(), 1);
        assert!(said[0].ends_with("Plum: hello all"));

        run_transition_with_marker(&game, GameEvent::DiscussionElapsed)
            .await
            .unwrap();
        let votes = LogKey::PersonalVote("Plum".into());
        for _ in 0..200 {
            if !store.read_from(votes.clone(), 0).await.unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.read_from(votes, 0).await.unwrap(), vec!["Scarlet"]);

        store
            .set_marker(crate::dao::models::MarkerKey::Winner, "Mafia".into())
            .await
            .unwrap();
        timeout(Duration::from_secs(1), driver)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(generator.prompts().len(), 2);
    }
}
