use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Report `ok` when every loaded game's log store answers, `degraded` otherwise.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    let games = state.games();
    if games.is_empty() {
        warn!("no game loaded (degraded mode)");
        return HealthResponse::degraded();
    }

    let mut healthy = true;
    for game in games {
        if let Err(err) = game.store().health_check().await {
            warn!(game_id = game.id(), error = %err, "storage health check failed");
            healthy = false;
        }
    }

    if healthy {
        HealthResponse::ok()
    } else {
        HealthResponse::degraded()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::{AppConfig, GameConfig, PlayerConfig},
        dao::log_store::MemoryLogStore,
        state::{AppState, GameHandle},
    };

    #[tokio::test]
    async fn degraded_without_games() {
        let state = AppState::new(AppConfig::default());
        assert_eq!(health_status(&state).await.status, "degraded");

        let game = GameHandle::new(
            "g1",
            GameConfig {
                players: vec![
                    PlayerConfig::new("M", true, false),
                    PlayerConfig::new("B1", false, false),
                    PlayerConfig::new("B2", false, false),
                ],
                daytime_minutes: 1.0,
                nighttime_minutes: 1.0,
            },
            Vec::new(),
            Arc::new(MemoryLogStore::new()),
        )
        .unwrap();
        state.insert_game(Arc::new(game));
        assert_eq!(health_status(&state).await.status, "ok");
    }
}
