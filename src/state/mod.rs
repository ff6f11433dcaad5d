pub mod connections;
pub mod game;
pub mod sessions;
pub mod state_machine;
pub mod transitions;
pub mod vote_guard;

use std::{sync::Arc, time::Duration};

use dashmap::DashMap;
use indexmap::IndexMap;
use tokio::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::time::timeout;
use tracing::warn;

use crate::{
    config::{AppConfig, GameConfig},
    dao::{
        log_store::LogStore,
        models::{MarkerKey, REAL_NAME_DELIMITER, STATUS_VOTED_OUT},
        storage::StorageResult,
    },
    error::ServiceError,
    state::{
        connections::ConnectionRegistry,
        game::{Roster, RosterError},
        sessions::SessionStore,
        state_machine::GamePhase,
        vote_guard::VoteGuard,
    },
};

pub use self::state_machine::{AbortError, ApplyError, Plan, PlanError, PlanId, Snapshot};
use self::state_machine::{GameEvent, GameStateMachine};

/// Application state shared by every handler and background task.
pub type SharedState = Arc<AppState>;
/// Upper bound on the side effects of a single phase transition.
pub const DEFAULT_TRANSITION_TIMEOUT: Duration = Duration::from_secs(5);

/// Process-wide service objects: loaded games, sessions, live connections and the
/// duplicate-vote guard.
pub struct AppState {
    config: Arc<AppConfig>,
    games: DashMap<String, Arc<GameHandle>>,
    sessions: SessionStore,
    connections: ConnectionRegistry,
    vote_guard: VoteGuard,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    pub fn new(config: AppConfig) -> SharedState {
        Arc::new(Self {
            config: Arc::new(config),
            games: DashMap::new(),
            sessions: SessionStore::new(),
            connections: ConnectionRegistry::new(),
            vote_guard: VoteGuard::new(),
        })
    }

    /// Process configuration.
    pub fn config(&self) -> Arc<AppConfig> {
        self.config.clone()
    }

    /// Make a loaded game reachable by its id.
    pub fn insert_game(&self, game: Arc<GameHandle>) {
        self.games.insert(game.id().to_string(), game);
    }

    /// Look up a loaded game.
    pub fn game(&self, game_id: &str) -> Option<Arc<GameHandle>> {
        self.games.get(game_id).map(|entry| entry.value().clone())
    }

    /// Look up a loaded game or fail with `NotFound`.
    pub fn require_game(&self, game_id: &str) -> Result<Arc<GameHandle>, ServiceError> {
        self.game(game_id)
            .ok_or_else(|| ServiceError::NotFound(format!("game `{game_id}` not found")))
    }

    /// Every loaded game.
    pub fn games(&self) -> Vec<Arc<GameHandle>> {
        self.games.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Session directory.
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Live connection registry.
    pub fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }

    /// Idempotency map for live vote submissions.
    pub fn vote_guard(&self) -> &VoteGuard {
        &self.vote_guard
    }
}

/// In-memory state of one game, next to the log store it persists to.
pub struct GameHandle {
    id: String,
    config: GameConfig,
    real_names: IndexMap<String, String>,
    store: Arc<dyn LogStore>,
    roster: RwLock<Roster>,
    machine: RwLock<GameStateMachine>,
    // Read by each participant action, written while the controller moves between
    // phases.
    actions: RwLock<()>,
    transition_gate: Mutex<()>,
    relay_gate: Mutex<()>,
    join_gate: Mutex<()>,
    transition_timeout: Option<Duration>,
}

impl GameHandle {
    /// Build the handle from a validated game configuration.
    ///
    /// `real_names` maps the names humans join with to their character names.
    pub fn new(
        id: impl Into<String>,
        config: GameConfig,
        real_names: Vec<(String, String)>,
        store: Arc<dyn LogStore>,
    ) -> Result<Self, RosterError> {
        let roster = Roster::new(config.participants())?;
        if let Some((_, character)) = real_names
            .iter()
            .find(|(_, character)| roster.get(character).is_none())
        {
            return Err(RosterError::UnknownParticipant(character.clone()));
        }

        Ok(Self {
            id: id.into(),
            config,
            real_names: real_names.into_iter().collect(),
            store,
            roster: RwLock::new(roster),
            machine: RwLock::new(GameStateMachine::new()),
            actions: RwLock::new(()),
            transition_gate: Mutex::new(()),
            relay_gate: Mutex::new(()),
            join_gate: Mutex::new(()),
            transition_timeout: Some(DEFAULT_TRANSITION_TIMEOUT),
        })
    }

    /// Override the transition timeout (`None` disables it).
    pub fn with_transition_timeout(mut self, limit: Option<Duration>) -> Self {
        self.transition_timeout = limit;
        self
    }

    /// Game identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Game configuration.
    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    /// Log store backing this game.
    pub fn store(&self) -> Arc<dyn LogStore> {
        self.store.clone()
    }

    /// Roster, mutated only by the phase controller.
    pub fn roster(&self) -> &RwLock<Roster> {
        &self.roster
    }

    /// Character assigned to a real name.
    pub fn character_for(&self, real_name: &str) -> Option<&str> {
        self.real_names.get(real_name).map(String::as_str)
    }

    /// Real-name to character mapping in file order.
    pub fn real_names(&self) -> impl Iterator<Item = (&str, &str)> {
        self.real_names
            .iter()
            .map(|(real, character)| (real.as_str(), character.as_str()))
    }

    /// Serialises shared-channel appends with their fan-out and with history replay.
    pub async fn relay_gate(&self) -> MutexGuard<'_, ()> {
        self.relay_gate.lock().await
    }

    /// Serialises character claims so a character is handed out once.
    pub async fn join_gate(&self) -> MutexGuard<'_, ()> {
        self.join_gate.lock().await
    }

    /// Hold the participant action window across one check and write.
    ///
    /// Waits while the controller is between phases, so an action is always checked
    /// against the phase it lands in.
    pub async fn action_window(&self) -> RwLockReadGuard<'_, ()> {
        self.actions.read().await
    }

    /// Hold participant actions off until the guard drops. Waits for the in-flight ones
    /// to land first.
    pub async fn close_actions(&self) -> RwLockWriteGuard<'_, ()> {
        self.actions.write().await
    }

    /// Current phase of the state machine.
    pub async fn phase(&self) -> GamePhase {
        self.machine.read().await.phase()
    }

    /// Snapshot of the state machine.
    pub async fn snapshot(&self) -> Snapshot {
        self.machine.read().await.snapshot()
    }

    /// Write the markers that describe the roster before the first join.
    ///
    /// The remaining-players list is only seeded when absent so a restarted process
    /// keeps the eliminations already persisted.
    pub async fn seed_markers(&self) -> StorageResult<()> {
        let names: Vec<String> = {
            let roster = self.roster.read().await;
            roster.participants().map(|p| p.name.clone()).collect()
        };
        let listing = names.join("\n");

        self.store
            .set_marker(MarkerKey::PlayerNames, listing.clone())
            .await?;
        if self.store.marker(MarkerKey::RemainingPlayers).await?.is_none() {
            self.store
                .set_marker(MarkerKey::RemainingPlayers, listing)
                .await?;
        }
        let real_names = self
            .real_names
            .iter()
            .map(|(real, character)| format!("{real}{REAL_NAME_DELIMITER}{character}"))
            .collect::<Vec<_>>()
            .join("\n");
        self.store
            .set_marker(MarkerKey::RealNames, real_names)
            .await?;
        self.store
            .set_marker(
                MarkerKey::Phase,
                GamePhase::AwaitingJoin.as_str().to_string(),
            )
            .await
    }

    /// Replay eliminations persisted by an earlier process into the roster.
    ///
    /// Returns the names restored as eliminated.
    pub async fn restore_eliminations(&self) -> StorageResult<Vec<String>> {
        let names: Vec<String> = {
            let roster = self.roster.read().await;
            roster.participants().map(|p| p.name.clone()).collect()
        };

        let mut restored = Vec::new();
        for name in names {
            let status = self.store.marker(MarkerKey::Status(name.clone())).await?;
            if status.as_deref().map(str::trim) != Some(STATUS_VOTED_OUT) {
                continue;
            }
            let mut roster = self.roster.write().await;
            match roster.eliminate(&name) {
                Ok(_) => restored.push(name),
                Err(err) => warn!(
                    game_id = %self.id,
                    participant = %name,
                    error = %err,
                    "skipped persisted elimination"
                ),
            }
        }
        Ok(restored)
    }

    async fn plan_transition(&self, event: GameEvent) -> Result<Plan, PlanError> {
        let mut sm = self.machine.write().await;
        sm.plan(event)
    }

    async fn apply_planned_transition(&self, plan_id: PlanId) -> Result<GamePhase, ApplyError> {
        let mut sm = self.machine.write().await;
        sm.apply(plan_id)
    }

    async fn abort_transition(&self, plan_id: PlanId) -> Result<(), AbortError> {
        let mut sm = self.machine.write().await;
        sm.abort(plan_id)
    }

    /// Plan `event`, run `work` with the target phase, then apply the plan.
    ///
    /// The plan is aborted when `work` fails or exceeds the transition timeout, leaving
    /// the phase untouched.
    pub async fn run_transition<F, Fut, T>(
        &self,
        event: GameEvent,
        work: F,
    ) -> Result<(T, GamePhase), ServiceError>
    where
        F: FnOnce(GamePhase) -> Fut,
        Fut: std::future::Future<Output = Result<T, ServiceError>>,
    {
        let gate = self.transition_gate.lock().await;
        let Plan {
            id: plan_id, to, ..
        } = self.plan_transition(event.clone()).await?;

        let work_future = work(to);
        let outcome = if let Some(limit) = self.transition_timeout {
            match timeout(limit, work_future).await {
                Ok(result) => result,
                Err(_) => {
                    if let Err(abort_err) = self.abort_transition(plan_id).await {
                        warn!(
                            game_id = %self.id,
                            event = ?event,
                            plan_id = %plan_id,
                            error = ?abort_err,
                            "failed to abort transition after timeout"
                        );
                    }
                    drop(gate);
                    return Err(ServiceError::Timeout);
                }
            }
        } else {
            work_future.await
        };

        match outcome {
            Ok(value) => {
                let next = self.apply_planned_transition(plan_id).await?;
                drop(gate);
                Ok((value, next))
            }
            Err(err) => {
                if let Err(abort_err) = self.abort_transition(plan_id).await {
                    warn!(
                        game_id = %self.id,
                        event = ?event,
                        plan_id = %plan_id,
                        error = ?abort_err,
                        "failed to abort transition after work error"
                    );
                }
                drop(gate);
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::PlayerConfig,
        dao::log_store::MemoryLogStore,
        state::game::Winner,
    };

    fn config() -> GameConfig {
        GameConfig {
            players: vec![
                PlayerConfig::new("Scarlet", true, false),
                PlayerConfig::new("Mustard", false, false),
                PlayerConfig::new("Plum", false, true),
            ],
            daytime_minutes: 1.0,
            nighttime_minutes: 1.0,
        }
    }

    fn handle(store: MemoryLogStore) -> GameHandle {
        GameHandle::new(
            "g1",
            config(),
            vec![("Alice".into(), "Scarlet".into())],
            Arc::new(store),
        )
        .unwrap()
    }

    #[test]
    fn real_names_must_point_at_the_roster() {
        let err = GameHandle::new(
            "g1",
            config(),
            vec![("Alice".into(), "Peacock".into())],
            Arc::new(MemoryLogStore::new()),
        )
        .err();
        assert_eq!(err, Some(RosterError::UnknownParticipant("Peacock".into())));
    }

    #[tokio::test]
    async fn seeding_writes_roster_markers() {
        let store = MemoryLogStore::new();
        let game = handle(store.clone());
        game.seed_markers().await.unwrap();

        assert_eq!(
            store.marker(MarkerKey::PlayerNames).await.unwrap().as_deref(),
            Some("Scarlet\nMustard\nPlum")
        );
        assert_eq!(
            store.marker(MarkerKey::RealNames).await.unwrap().as_deref(),
            Some("Alice,Scarlet")
        );
        assert_eq!(
            store.marker(MarkerKey::Phase).await.unwrap().as_deref(),
            Some("awaiting_join")
        );
        assert_eq!(game.character_for("Alice"), Some("Scarlet"));
    }

    #[tokio::test]
    async fn persisted_eliminations_are_restored() {
        let store = MemoryLogStore::new();
        store
            .set_marker(MarkerKey::Status("Mustard".into()), STATUS_VOTED_OUT.into())
            .await
            .unwrap();
        let game = handle(store);
        assert_eq!(game.restore_eliminations().await.unwrap(), vec!["Mustard"]);
        let roster = game.roster().read().await;
        assert!(!roster.get("Mustard").unwrap().is_active());
        assert_eq!(roster.round(), 2);
    }

    #[tokio::test]
    async fn failed_work_leaves_the_phase_untouched() {
        let game = handle(MemoryLogStore::new());
        let err = game
            .run_transition(GameEvent::AllJoined, |_| async {
                Err::<(), _>(ServiceError::InvalidState("boom".into()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidState(_)));
        assert_eq!(game.phase().await, GamePhase::AwaitingJoin);
        assert_eq!(game.snapshot().await.pending, None);
    }

    #[tokio::test]
    async fn slow_work_is_aborted() {
        let game = handle(MemoryLogStore::new())
            .with_transition_timeout(Some(Duration::from_millis(10)));
        let err = game
            .run_transition(GameEvent::AllJoined, |_| async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Timeout));
        assert_eq!(game.phase().await, GamePhase::AwaitingJoin);
    }

    #[tokio::test]
    async fn closing_and_acting_exclude_each_other() {
        let game = Arc::new(handle(MemoryLogStore::new()));
        let window = game.action_window().await;

        let closer = {
            let game = game.clone();
            tokio::spawn(async move {
                let _closed = game.close_actions().await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!closer.is_finished());
        drop(window);
        closer.await.unwrap();

        let closed = game.close_actions().await;
        assert!(
            timeout(Duration::from_millis(20), game.action_window())
                .await
                .is_err()
        );
        drop(closed);
        drop(game.action_window().await);
    }

    #[tokio::test]
    async fn work_sees_the_target_phase() {
        let game = handle(MemoryLogStore::new());
        let (seen, next) = game
            .run_transition(GameEvent::AllJoined, |to| async move { Ok(to) })
            .await
            .unwrap();
        assert_eq!(seen, GamePhase::DayDiscussion);
        assert_eq!(next, GamePhase::DayDiscussion);

        let err = game
            .run_transition(GameEvent::WinnerDecided(Winner::Mafia), |_| async { Ok(()) })
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidState(_)));
    }
}
