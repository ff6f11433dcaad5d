//! Discovery of the game directories and start-up of their background tasks.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use thiserror::Error;
use tracing::{error, info, warn};

use crate::{
    config::{ConfigError, GameConfig, load_real_names},
    dao::{
        log_store::{FileLogStore, LogStore},
        models::MarkerKey,
        storage::StorageError,
    },
    services::{autonomous, generation::GenerationService, phase_controller::PhaseController},
    state::{GameHandle, SharedState, game::RosterError},
};

/// Why a game directory could not be loaded.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The roster or real-name file is missing or invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The directory could not be opened as a log store.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// The roster breaks a structural rule.
    #[error(transparent)]
    Roster(#[from] RosterError),
}

/// Load the game stored in `dir`, named after the directory.
///
/// Eliminations persisted by an earlier run are replayed into the roster before the
/// descriptive markers are refreshed.
pub async fn load_game(dir: &Path) -> Result<Arc<GameHandle>, LoadError> {
    let id = dir
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| dir.display().to_string());
    let config = GameConfig::load(dir)?;
    let real_names = load_real_names(dir)?;
    let store = FileLogStore::open(dir).await?;
    let game = GameHandle::new(id, config, real_names, Arc::new(store))?;

    let restored = game.restore_eliminations().await?;
    if !restored.is_empty() {
        info!(game_id = game.id(), ?restored, "restored eliminations");
    }
    game.seed_markers().await?;
    Ok(Arc::new(game))
}

/// Sub-directories of `root`, sorted by name.
pub fn game_dirs(root: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in std::fs::read_dir(root)? {
        let path = entry?.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// Load every game under `root` into `state`. A directory that fails to load is
/// skipped and logged.
pub async fn load_all(state: &SharedState, root: &Path) -> std::io::Result<usize> {
    let mut loaded = 0;
    for dir in game_dirs(root)? {
        match load_game(&dir).await {
            Ok(game) => {
                info!(game_id = game.id(), dir = %dir.display(), "game loaded");
                state.insert_game(game);
                loaded += 1;
            }
            Err(err) => {
                error!(dir = %dir.display(), error = %err, "failed to load game");
            }
        }
    }
    Ok(loaded)
}

/// Spawn the phase controller of `game` and, when a backend is available, its
/// autonomous participants. Finished games are left alone.
pub async fn launch(
    state: SharedState,
    game: Arc<GameHandle>,
    generator: Option<Arc<dyn GenerationService>>,
) -> Result<(), StorageError> {
    if game.store().marker(MarkerKey::Winner).await?.is_some() {
        info!(game_id = game.id(), "game already finished");
        return Ok(());
    }

    match generator {
        Some(generator) => {
            match autonomous::spawn_all(state.clone(), game.clone(), generator).await {
                Ok(count) if count > 0 => {
                    info!(game_id = game.id(), count, "autonomous participants started")
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(
                        game_id = game.id(),
                        error = %err,
                        "failed to start autonomous participants"
                    )
                }
            }
        }
        None => {
            let roster = game.roster().read().await;
            if roster.participants().any(|participant| participant.autonomous) {
                warn!(
                    game_id = game.id(),
                    "no generation backend; autonomous participants will not join"
                );
            }
        }
    }

    let controller = PhaseController::new(state, game.clone());
    let game_id = game.id().to_string();
    tokio::spawn(async move {
        match controller.run().await {
            Ok(winner) => info!(game_id, winner = winner.as_str(), "game finished"),
            Err(err) => error!(game_id, error = %err, "phase controller stopped"),
        }
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use uuid::Uuid;

    use super::*;
    use crate::{
        config::{AppConfig, GAME_CONFIG_FILE, REAL_NAMES_FILE},
        dao::models::STATUS_VOTED_OUT,
        state::AppState,
    };

    fn game_dir(root: &Path, name: &str) -> PathBuf {
        let dir = root.join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join(GAME_CONFIG_FILE),
            r#"{"players": [
                {"name": "Scarlet", "is_mafia": true},
                {"name": "Mustard", "is_mafia": false},
                {"name": "Plum", "is_mafia": false}
            ], "daytime_minutes": 1, "nighttime_minutes": 0.5}"#,
        )
        .unwrap();
        fs::write(dir.join(REAL_NAMES_FILE), "Alice,Scarlet\nBob,Mustard\n").unwrap();
        dir
    }

    #[tokio::test]
    async fn loads_valid_games_and_skips_broken_ones() {
        let root = std::env::temp_dir().join(format!("mafia-games-{}", Uuid::new_v4()));
        game_dir(&root, "g1");
        fs::create_dir_all(root.join("broken")).unwrap();

        let state = AppState::new(AppConfig::default());
        assert_eq!(load_all(&state, &root).await.unwrap(), 1);
        let game = state.require_game("g1").unwrap();
        assert_eq!(game.character_for("Bob"), Some("Mustard"));
        assert!(state.game("broken").is_none());
    }

    #[tokio::test]
    async fn reloading_keeps_persisted_eliminations() {
        let root = std::env::temp_dir().join(format!("mafia-games-{}", Uuid::new_v4()));
        let dir = game_dir(&root, "g1");
        let game = load_game(&dir).await.unwrap();
        game.store()
            .set_marker(MarkerKey::Status("Plum".into()), STATUS_VOTED_OUT.into())
            .await
            .unwrap();
        game.store()
            .set_marker(MarkerKey::RemainingPlayers, "Scarlet\nMustard".into())
            .await
            .unwrap();

        let reloaded = load_game(&dir).await.unwrap();
        let roster = reloaded.roster().read().await;
        assert_eq!(roster.active_names(), vec!["Scarlet", "Mustard"]);
        drop(roster);
        assert_eq!(
            reloaded
                .store()
                .marker(MarkerKey::RemainingPlayers)
                .await
                .unwrap()
                .as_deref(),
            Some("Scarlet\nMustard")
        );
    }
}
