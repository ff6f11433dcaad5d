//! Directory of live participant connections, keyed by game then participant.

use std::collections::HashMap;

use axum::extract::ws::Message;
use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::state::game::Role;

/// Why a payload could not be handed to a connection.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The writer side of the socket is gone.
    #[error("peer closed")]
    PeerClosed,
    /// The payload could not be serialised.
    #[error("failed to encode payload")]
    Encode(#[source] serde_json::Error),
}

/// Outcome of a unicast through the registry.
#[derive(Debug)]
pub enum Delivery {
    /// Payload queued on the connection's writer.
    Delivered,
    /// No live connection is registered for that participant.
    Absent,
    /// Delivery failed; the connection has been dropped from the registry.
    Dropped(DeliveryError),
}

/// Handle used to push messages to a connected participant.
#[derive(Clone, Debug)]
pub struct ParticipantConnection {
    /// Identifies this socket among successive connections of the same participant.
    pub id: Uuid,
    /// Character name of the participant.
    pub participant: String,
    /// Role of the participant, used for night-only fan-out.
    pub role: Role,
    tx: mpsc::UnboundedSender<Message>,
}

impl ParticipantConnection {
    /// Wrap the writer channel of a freshly accepted socket.
    pub fn new(
        participant: impl Into<String>,
        role: Role,
        tx: mpsc::UnboundedSender<Message>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            participant: participant.into(),
            role,
            tx,
        }
    }

    /// Serialise `payload` and queue it on the writer.
    pub fn send<T>(&self, payload: &T) -> Result<(), DeliveryError>
    where
        T: ?Sized + Serialize,
    {
        let text = serde_json::to_string(payload).map_err(DeliveryError::Encode)?;
        self.send_text(text)
    }

    fn send_text(&self, text: String) -> Result<(), DeliveryError> {
        self.tx
            .send(Message::Text(text.into()))
            .map_err(|_| DeliveryError::PeerClosed)
    }
}

/// Registry of live connections.
///
/// Each game's map sits behind its own DashMap entry, so every mutation of a game's
/// connections is exclusive and fan-out works on a copied snapshot.
#[derive(Default)]
pub struct ConnectionRegistry {
    games: DashMap<String, HashMap<String, ParticipantConnection>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `connection`, replacing any previous one for the same participant.
    pub fn connect(
        &self,
        game_id: &str,
        connection: ParticipantConnection,
    ) -> Option<ParticipantConnection> {
        let participant = connection.participant.clone();
        let replaced = self
            .games
            .entry(game_id.to_string())
            .or_default()
            .insert(participant.clone(), connection);
        info!(
            game_id,
            participant = %participant,
            replaced = replaced.is_some(),
            "participant connected"
        );
        replaced
    }

    /// Remove the participant's entry. Returns whether something was removed.
    pub fn disconnect(&self, game_id: &str, participant: &str) -> bool {
        let removed = self
            .games
            .get_mut(game_id)
            .and_then(|mut connections| connections.remove(participant))
            .is_some();
        if removed {
            info!(game_id, participant, "participant disconnected");
        }
        removed
    }

    /// Remove the participant's entry only if it still belongs to `connection_id`.
    ///
    /// Used by socket teardown so a stale socket never unregisters its replacement.
    pub fn release(&self, game_id: &str, participant: &str, connection_id: Uuid) -> bool {
        let removed = self
            .games
            .get_mut(game_id)
            .map(|mut connections| {
                if connections
                    .get(participant)
                    .is_some_and(|current| current.id == connection_id)
                {
                    connections.remove(participant).is_some()
                } else {
                    false
                }
            })
            .unwrap_or(false);
        if removed {
            info!(game_id, participant, %connection_id, "participant connection released");
        }
        removed
    }

    /// Whether a live connection is registered for the participant.
    pub fn is_connected(&self, game_id: &str, participant: &str) -> bool {
        self.games
            .get(game_id)
            .is_some_and(|connections| connections.contains_key(participant))
    }

    /// Copy of the game's current connections.
    pub fn snapshot(&self, game_id: &str) -> Vec<ParticipantConnection> {
        self.games
            .get(game_id)
            .map(|connections| connections.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Unicast `payload` to one participant. Any failure unregisters the connection.
    pub fn send_to<T>(&self, game_id: &str, participant: &str, payload: &T) -> Delivery
    where
        T: ?Sized + Serialize,
    {
        let Some(connection) = self
            .games
            .get(game_id)
            .and_then(|connections| connections.get(participant).cloned())
        else {
            return Delivery::Absent;
        };

        match connection.send(payload) {
            Ok(()) => Delivery::Delivered,
            Err(err) => {
                warn!(game_id, participant, error = %err, "send failed, dropping connection");
                self.release(game_id, participant, connection.id);
                Delivery::Dropped(err)
            }
        }
    }

    /// Deliver `payload` to every connection of the game except `excluding`.
    pub fn broadcast<T>(&self, game_id: &str, payload: &T, excluding: Option<&str>) -> usize
    where
        T: ?Sized + Serialize,
    {
        self.broadcast_filtered(game_id, payload, |connection| {
            excluding != Some(connection.participant.as_str())
        })
    }

    /// Deliver `payload` to the connections of the game accepted by `filter`.
    ///
    /// Returns the number of successful deliveries.
    pub fn broadcast_filtered<T, F>(&self, game_id: &str, payload: &T, filter: F) -> usize
    where
        T: ?Sized + Serialize,
        F: Fn(&ParticipantConnection) -> bool,
    {
        let text = match serde_json::to_string(payload) {
            Ok(text) => text,
            Err(err) => {
                warn!(game_id, error = %err, "failed to encode broadcast payload");
                return 0;
            }
        };

        let mut delivered = 0;
        for connection in self.snapshot(game_id).into_iter().filter(|c| filter(c)) {
            match connection.send_text(text.clone()) {
                Ok(()) => delivered += 1,
                Err(err) => {
                    warn!(
                        game_id,
                        participant = %connection.participant,
                        error = %err,
                        "broadcast delivery failed, dropping connection"
                    );
                    self.release(game_id, &connection.participant, connection.id);
                }
            }
        }
        delivered
    }
}
