//! Ballot collection and round resolution.

use std::{collections::HashMap, time::Duration};

use indexmap::IndexMap;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::{
    dao::{log_store::LogStore, models::LogKey},
    error::ServiceError,
    services::{
        chat_relay::{self, Channel},
        polling_bridge::wait_for_change_until,
    },
    state::{GameHandle, connections::ConnectionRegistry},
};

/// One voter's latest submission for a round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ballot {
    /// Participant who voted.
    pub voter: String,
    /// Name they voted for, valid or not.
    pub target: String,
}

impl Ballot {
    /// Build a ballot.
    pub fn new(voter: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            voter: voter.into(),
            target: target.into(),
        }
    }

    /// Whether the ballot names an eligible target other than the voter.
    pub fn is_counted(&self, targets: &[String]) -> bool {
        self.target != self.voter && targets.iter().any(|target| *target == self.target)
    }
}

/// Result of a resolved round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TallyOutcome {
    /// Participant to eliminate.
    pub eliminated: String,
    /// Count per eligible target, in enumeration order.
    pub counts: IndexMap<String, u32>,
    /// Ballots consumed this round, counted or not.
    pub ballots: Vec<Ballot>,
    /// Voters treated as abstaining after the vote timeout.
    pub abstained: Vec<String>,
}

/// Count `ballots` against `targets` and pick the target to eliminate.
///
/// Every target starts at zero; ballots for anything else count for nobody. The
/// first target with the highest count wins, so ties and all-invalid rounds go to the
/// earliest target in enumeration order. `None` only when `targets` is empty.
pub fn resolve(
    targets: &[String],
    ballots: &[Ballot],
) -> Option<(String, IndexMap<String, u32>)> {
    let mut counts: IndexMap<String, u32> =
        targets.iter().map(|target| (target.clone(), 0)).collect();
    for ballot in ballots.iter().filter(|ballot| ballot.is_counted(targets)) {
        if let Some(count) = counts.get_mut(&ballot.target) {
            *count += 1;
        }
    }

    let mut winner: Option<(&String, u32)> = None;
    for (target, count) in &counts {
        if winner.is_none_or(|(_, best)| *count > best) {
            winner = Some((target, *count));
        }
    }
    let eliminated = winner.map(|(target, _)| target.clone())?;
    Some((eliminated, counts))
}

/// Collects at most one counted ballot per eligible voter per round.
///
/// Each voter's vote log is read through a cursor that survives across rounds, so a
/// line is consumed exactly once: the voter's latest new line is their ballot and
/// anything else submitted in the same read is discarded.
#[derive(Debug, Default)]
pub struct VoteTallyEngine {
    cursors: HashMap<String, usize>,
}

impl VoteTallyEngine {
    /// Engine with every cursor at the start of its log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until every voter submitted (or dropped out, or the timeout elapsed), then
    /// resolve the round.
    ///
    /// Counted ballots are announced on `channel` as they arrive.
    #[allow(clippy::too_many_arguments)]
    pub async fn run_round(
        &mut self,
        game: &GameHandle,
        connections: &ConnectionRegistry,
        channel: Channel,
        voters: &[String],
        targets: &[String],
        vote_timeout: Option<Duration>,
        poll_interval: Duration,
    ) -> Result<TallyOutcome, ServiceError> {
        let store = game.store();
        let mut changes = store.changes();
        let deadline = vote_timeout.map(|limit| Instant::now() + limit);
        let mut pending: Vec<String> = voters.to_vec();
        let mut ballots = Vec::new();

        loop {
            changes.borrow_and_update();
            let mut still_pending = Vec::with_capacity(pending.len());
            for voter in pending {
                let eligible = game
                    .roster()
                    .read()
                    .await
                    .get(&voter)
                    .is_some_and(|participant| participant.is_active());
                if !eligible {
                    debug!(game_id = game.id(), voter = %voter, "voter no longer eligible");
                    continue;
                }

                let cursor = self.cursors.get(&voter).copied().unwrap_or(0);
                let lines = store
                    .read_from(LogKey::PersonalVote(voter.clone()), cursor)
                    .await?;
                let Some(latest) = lines.last() else {
                    still_pending.push(voter);
                    continue;
                };
                self.cursors.insert(voter.clone(), cursor + lines.len());

                let ballot = Ballot::new(voter.clone(), latest.trim());
                if ballot.is_counted(targets) {
                    chat_relay::announce(
                        game,
                        connections,
                        channel,
                        &format!("{} voted for {}", ballot.voter, ballot.target),
                    )
                    .await?;
                } else {
                    info!(
                        game_id = game.id(),
                        voter = %ballot.voter,
                        target = %ballot.target,
                        "invalid vote consumed"
                    );
                }
                ballots.push(ballot);
            }
            pending = still_pending;

            if pending.is_empty() {
                break;
            }

            let tick = Instant::now() + poll_interval;
            match deadline {
                Some(deadline) if Instant::now() >= deadline => {
                    warn!(
                        game_id = game.id(),
                        abstained = ?pending,
                        "vote timeout elapsed; treating silent voters as abstaining"
                    );
                    break;
                }
                Some(deadline) => wait_for_change_until(&mut changes, tick.min(deadline)).await,
                None => wait_for_change_until(&mut changes, tick).await,
            }
        }

        let (eliminated, counts) = resolve(targets, &ballots)
            .ok_or_else(|| ServiceError::InvalidState("no eligible vote target".into()))?;
        Ok(TallyOutcome {
            eliminated,
            counts,
            ballots,
            abstained: pending,
        })
    }

    /// Move every voter's cursor past ballots written after the round was resolved so
    /// they never count in a later round. Returns how many were dropped.
    pub async fn discard_unread(
        &mut self,
        game: &GameHandle,
        voters: &[String],
    ) -> Result<usize, ServiceError> {
        let store = game.store();
        let mut dropped = 0;
        for voter in voters {
            let cursor = self.cursors.get(voter).copied().unwrap_or(0);
            let lines = store
                .read_from(LogKey::PersonalVote(voter.clone()), cursor)
                .await?;
            if lines.is_empty() {
                continue;
            }
            debug!(
                game_id = game.id(),
                voter = %voter,
                count = lines.len(),
                "late ballots dropped"
            );
            self.cursors.insert(voter.clone(), cursor + lines.len());
            dropped += lines.len();
        }
        Ok(dropped)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::{GameConfig, PlayerConfig},
        dao::log_store::MemoryLogStore,
    };

    fn names(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|name| name.to_string()).collect()
    }

    fn game(store: &MemoryLogStore) -> GameHandle {
        GameHandle::new(
            "g1",
            GameConfig {
                players: vec![
                    PlayerConfig::new("M", true, false),
                    PlayerConfig::new("A", false, false),
                    PlayerConfig::new("B", false, false),
                    PlayerConfig::new("C", false, false),
                ],
                daytime_minutes: 1.0,
                nighttime_minutes: 1.0,
            },
            Vec::new(),
            Arc::new(store.clone()),
        )
        .unwrap()
    }

    async fn vote(store: &MemoryLogStore, voter: &str, target: &str) {
        store
            .append(LogKey::PersonalVote(voter.into()), vec![target.into()])
            .await
            .unwrap();
    }

    #[test]
    fn ties_go_to_the_earliest_target() {
        let targets = names(&["A", "B", "C"]);
        let ballots = vec![
            Ballot::new("v1", "B"),
            Ballot::new("v2", "A"),
            Ballot::new("v3", "B"),
            Ballot::new("v4", "A"),
            Ballot::new("v5", "C"),
        ];
        let (eliminated, counts) = resolve(&targets, &ballots).unwrap();
        assert_eq!(eliminated, "A");
        assert_eq!(counts["A"], 2);
        assert_eq!(counts["B"], 2);
        assert_eq!(counts["C"], 1);
    }

    #[test]
    fn invalid_ballots_count_for_nobody() {
        let targets = names(&["A", "B"]);
        let ballots = vec![
            Ballot::new("A", "A"),
            Ballot::new("B", "Zzz"),
            Ballot::new("C", "B"),
        ];
        let (eliminated, counts) = resolve(&targets, &ballots).unwrap();
        assert_eq!(eliminated, "B");
        assert_eq!(counts["A"], 0);
        assert_eq!(counts["B"], 1);

        let (fallback, _) = resolve(&targets, &[Ballot::new("A", "nobody")]).unwrap();
        assert_eq!(fallback, "A");
        assert!(resolve(&[], &ballots).is_none());
    }

    #[tokio::test]
    async fn only_the_latest_new_line_counts() {
        let store = MemoryLogStore::new();
        let game = game(&store);
        let registry = ConnectionRegistry::new();
        store
            .append(
                LogKey::PersonalVote("M".into()),
                vec!["A".into(), "B".into()],
            )
            .await
            .unwrap();
        vote(&store, "A", "B").await;

        let mut engine = VoteTallyEngine::new();
        let outcome = engine
            .run_round(
                &game,
                &registry,
                Channel::Day,
                &names(&["M", "A"]),
                &names(&["M", "A", "B", "C"]),
                None,
                Duration::from_millis(10),
            )
            .await
            .unwrap();

        assert_eq!(outcome.eliminated, "B");
        assert_eq!(outcome.counts["B"], 2);
        assert_eq!(outcome.ballots.len(), 2);
        let announced = store.read_from(LogKey::Daytime, 0).await.unwrap();
        assert_eq!(announced.len(), 2);
        assert!(announced[0].ends_with("M voted for B"));
    }

    #[tokio::test]
    async fn invalid_vote_is_consumed_and_blocks_resubmission() {
        let store = MemoryLogStore::new();
        let game = game(&store);
        let registry = ConnectionRegistry::new();
        vote(&store, "A", "Zzz").await;
        vote(&store, "B", "C").await;

        let mut engine = VoteTallyEngine::new();
        let voters = names(&["A", "B"]);
        let targets = names(&["M", "A", "B", "C"]);
        let outcome = engine
            .run_round(
                &game,
                &registry,
                Channel::Day,
                &voters,
                &targets,
                None,
                Duration::from_millis(10),
            )
            .await
            .unwrap();
        assert_eq!(outcome.eliminated, "C");
        assert!(outcome.counts.values().sum::<u32>() == 1);
        assert!(outcome.ballots.contains(&Ballot::new("A", "Zzz")));

        let announced = store.read_from(LogKey::Daytime, 0).await.unwrap();
        assert_eq!(announced.len(), 1);
    }

    #[tokio::test]
    async fn waits_for_late_voters() {
        let store = MemoryLogStore::new();
        let game = game(&store);
        let registry = ConnectionRegistry::new();
        vote(&store, "A", "M").await;

        let writer = store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            vote(&writer, "B", "M").await;
        });

        let mut engine = VoteTallyEngine::new();
        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            engine.run_round(
                &game,
                &registry,
                Channel::Day,
                &names(&["A", "B"]),
                &names(&["M", "A", "B", "C"]),
                None,
                Duration::from_secs(30),
            ),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(outcome.eliminated, "M");
        assert_eq!(outcome.counts["M"], 2);
    }

    #[tokio::test]
    async fn silent_voters_abstain_after_the_timeout() {
        let store = MemoryLogStore::new();
        let game = game(&store);
        let registry = ConnectionRegistry::new();
        vote(&store, "A", "C").await;

        let mut engine = VoteTallyEngine::new();
        let outcome = engine
            .run_round(
                &game,
                &registry,
                Channel::Day,
                &names(&["A", "B"]),
                &names(&["M", "A", "B", "C"]),
                Some(Duration::from_millis(50)),
                Duration::from_millis(10),
            )
            .await
            .unwrap();
        assert_eq!(outcome.eliminated, "C");
        assert_eq!(outcome.abstained, names(&["B"]));
    }

    #[tokio::test]
    async fn cursors_survive_across_rounds() {
        let store = MemoryLogStore::new();
        let game = game(&store);
        let registry = ConnectionRegistry::new();
        let mut engine = VoteTallyEngine::new();
        let targets = names(&["M", "A", "B", "C"]);

        let voters = names(&["A"]);
        let poll = Duration::from_millis(10);

        vote(&store, "A", "C").await;
        engine
            .run_round(
                &game,
                &registry,
                Channel::Day,
                &voters,
                &targets,
                None,
                poll,
            )
            .await
            .unwrap();

        vote(&store, "A", "B").await;
        let second = engine
            .run_round(
                &game,
                &registry,
                Channel::Day,
                &voters,
                &targets,
                None,
                poll,
            )
            .await
            .unwrap();
        assert_eq!(second.ballots, vec![Ballot::new("A", "B")]);
    }

    #[tokio::test]
    async fn ballots_after_resolution_never_carry_over() {
        let store = MemoryLogStore::new();
        let game = game(&store);
        let registry = ConnectionRegistry::new();
        let mut engine = VoteTallyEngine::new();
        let voters = names(&["A", "B"]);
        let targets = names(&["M", "A", "B", "C"]);
        let poll = Duration::from_millis(10);

        vote(&store, "A", "C").await;
        let first = engine
            .run_round(
                &game,
                &registry,
                Channel::Day,
                &voters,
                &targets,
                Some(Duration::from_millis(30)),
                poll,
            )
            .await
            .unwrap();
        assert_eq!(first.abstained, names(&["B"]));

        vote(&store, "B", "M").await;
        assert_eq!(engine.discard_unread(&game, &voters).await.unwrap(), 1);
        assert_eq!(engine.discard_unread(&game, &voters).await.unwrap(), 0);

        vote(&store, "A", "B").await;
        let second = engine
            .run_round(
                &game,
                &registry,
                Channel::Day,
                &voters,
                &targets,
                Some(Duration::from_millis(30)),
                poll,
            )
            .await
            .unwrap();
        assert_eq!(second.ballots, vec![Ballot::new("A", "B")]);
        assert_eq!(second.abstained, names(&["B"]));
    }
}
