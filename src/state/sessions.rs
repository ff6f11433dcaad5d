use dashmap::DashMap;
use uuid::Uuid;

use crate::state::game::Role;

/// Binding between a browser session token and a participant identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Opaque token handed to the browser.
    pub token: String,
    /// Game the participant joined.
    pub game_id: String,
    /// Character played in that game.
    pub character_name: String,
    /// Name the human joined with.
    pub real_name: String,
    /// Role of the character.
    pub role: Role,
}

/// Session directory. Sessions outlive the sockets attached to them.
#[derive(Default)]
pub struct SessionStore {
    sessions: DashMap<String, Session>,
}

impl SessionStore {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a fresh session for a participant.
    pub fn create(
        &self,
        game_id: &str,
        character_name: &str,
        real_name: &str,
        role: Role,
    ) -> Session {
        let session = Session {
            token: Uuid::new_v4().simple().to_string(),
            game_id: game_id.to_string(),
            character_name: character_name.to_string(),
            real_name: real_name.to_string(),
            role,
        };
        self.sessions.insert(session.token.clone(), session.clone());
        session
    }

    /// Copy of the session bound to `token`.
    pub fn get(&self, token: &str) -> Option<Session> {
        self.sessions.get(token).map(|entry| entry.value().clone())
    }

    /// Session bound to `token`, only if it belongs to `game_id`.
    pub fn get_for_game(&self, token: &str, game_id: &str) -> Option<Session> {
        self.get(token).filter(|session| session.game_id == game_id)
    }
}
