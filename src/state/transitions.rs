use tracing::info;

use crate::{
    dao::models::MarkerKey,
    error::ServiceError,
    state::{
        GameHandle,
        state_machine::{GameEvent, GamePhase},
    },
};

/// Execute a planned state-machine transition whose side effect is persisting the new
/// phase marker, so polled participants observe the same phase as the controller.
pub async fn run_transition_with_marker(
    game: &GameHandle,
    event: GameEvent,
) -> Result<GamePhase, ServiceError> {
    let store = game.store();
    let ((), next) = game
        .run_transition(event, move |to| async move {
            store
                .set_marker(MarkerKey::Phase, to.as_str().to_string())
                .await?;
            Ok(())
        })
        .await?;
    info!(game_id = game.id(), phase = %next, "phase changed");
    Ok(next)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::{GameConfig, PlayerConfig},
        dao::log_store::{LogStore, MemoryLogStore},
    };

    #[tokio::test]
    async fn phase_marker_follows_the_machine() {
        let store = MemoryLogStore::new();
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
            Arc::new(store.clone()),
        )
        .unwrap();

        let next = run_transition_with_marker(&game, GameEvent::AllJoined)
            .await
            .unwrap();
        assert_eq!(next, GamePhase::DayDiscussion);
        assert_eq!(
            store.marker(MarkerKey::Phase).await.unwrap().as_deref(),
            Some("day_discussion")
        );

        assert!(
            run_transition_with_marker(&game, GameEvent::VotingResolved)
                .await
                .is_err()
        );
        assert_eq!(
            store.marker(MarkerKey::Phase).await.unwrap().as_deref(),
            Some("day_discussion")
        );
    }
}
