use dashmap::{DashMap, mapref::entry::Entry};

/// Identifies one participant's ballot for one round of one game.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VoteKey {
    /// Game the vote belongs to.
    pub game_id: String,
    /// Voter character name.
    pub participant: String,
    /// Round number the vote was cast in.
    pub round: u32,
}

impl VoteKey {
    /// Build a key.
    pub fn new(game_id: impl Into<String>, participant: impl Into<String>, round: u32) -> Self {
        Self {
            game_id: game_id.into(),
            participant: participant.into(),
            round,
        }
    }
}

/// Idempotency map of vote submissions accepted on the live path.
///
/// A retried submission for the same key is refused before it reaches the log store.
#[derive(Default)]
pub struct VoteGuard {
    accepted: DashMap<VoteKey, String>,
}

impl VoteGuard {
    /// Create an empty guard.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `target` for `key` unless a vote was already accepted, in which case the
    /// earlier target is returned as the error.
    pub fn try_accept(&self, key: VoteKey, target: &str) -> Result<(), String> {
        match self.accepted.entry(key) {
            Entry::Occupied(existing) => Err(existing.get().clone()),
            Entry::Vacant(slot) => {
                slot.insert(target.to_string());
                Ok(())
            }
        }
    }

    /// Target accepted for `key`, if any.
    pub fn accepted(&self, key: &VoteKey) -> Option<String> {
        self.accepted.get(key).map(|entry| entry.value().clone())
    }

    /// Forget an accepted vote whose write failed.
    pub fn release(&self, key: &VoteKey) {
        self.accepted.remove(key);
    }
}
