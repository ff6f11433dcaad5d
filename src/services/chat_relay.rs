//! Routing of participant chat and manager announcements into the shared channels.
//!
//! Relay iterates authors one by one: each author's lines keep their order, but lines
//! of different authors within one cycle are not interleaved chronologically.

use std::collections::HashMap;

use time::{OffsetDateTime, macros::format_description};
use tracing::debug;

use crate::{
    dao::{log_store::LogStore, models::LogKey, storage::StorageResult},
    dto::ws::OutboundMessage,
    state::{
        GameHandle, connections::ConnectionRegistry, game::Role, state_machine::GamePhase,
    },
};

/// Author name used for announcements.
pub const MANAGER_NAME: &str = "Game-Manager";

/// Shared channel a line is published to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// Manager announcements, visible to everyone.
    Manager,
    /// Daytime discussion and votes, visible to everyone.
    Day,
    /// Nighttime discussion and votes, visible to the Mafia only.
    Night,
}

impl Channel {
    /// Discussion channel of `phase`.
    pub fn for_phase(phase: GamePhase) -> Self {
        if phase.is_night() {
            Channel::Night
        } else {
            Channel::Day
        }
    }

    /// Channel persisted in `log`, if it is a shared one.
    pub fn from_log(log: &LogKey) -> Option<Self> {
        match log {
            LogKey::Manager => Some(Channel::Manager),
            LogKey::Daytime => Some(Channel::Day),
            LogKey::Nighttime => Some(Channel::Night),
            LogKey::PersonalChat(_) | LogKey::PersonalVote(_) => None,
        }
    }

    /// Backing log.
    pub fn log(self) -> LogKey {
        match self {
            Channel::Manager => LogKey::Manager,
            Channel::Day => LogKey::Daytime,
            Channel::Night => LogKey::Nighttime,
        }
    }

    /// Color the web client renders the channel with.
    pub fn color(self) -> &'static str {
        match self {
            Channel::Manager => "green",
            Channel::Day => "blue",
            Channel::Night => "red",
        }
    }

    /// Whether a participant holding `role` may see the channel.
    pub fn visible_to(self, role: Role) -> bool {
        match self {
            Channel::Manager | Channel::Day => true,
            Channel::Night => role.is_mafia(),
        }
    }

    /// Channels visible to `role`, in replay order.
    pub fn visible_channels(role: Role) -> Vec<Channel> {
        [Channel::Manager, Channel::Day, Channel::Night]
            .into_iter()
            .filter(|channel| channel.visible_to(role))
            .collect()
    }

    /// Wire payload for one line of this channel.
    pub fn message(self, line: impl Into<String>) -> OutboundMessage {
        OutboundMessage::ChatMessage {
            content: line.into(),
            color: self.color().to_string(),
        }
    }
}

/// Format a chat line as `[HH:MM:SS] author: text`.
pub fn format_line(author: &str, text: &str) -> String {
    let clock = OffsetDateTime::now_utc()
        .format(format_description!("[hour]:[minute]:[second]"))
        .unwrap_or_else(|_| "--:--:--".into());
    format!("[{clock}] {author}: {}", text.trim())
}

/// Append `lines` to `channel` and push them to every live connection allowed to see it.
///
/// Runs under the game's relay gate so a connection replaying history either finds a
/// line in the log or receives it from the broadcast, never both or neither.
pub async fn publish(
    game: &GameHandle,
    connections: &ConnectionRegistry,
    channel: Channel,
    lines: Vec<String>,
) -> StorageResult<()> {
    if lines.is_empty() {
        return Ok(());
    }

    let _gate = game.relay_gate().await;
    game.store().append(channel.log(), lines.clone()).await?;
    for line in lines {
        connections.broadcast_filtered(game.id(), &channel.message(line), |connection| {
            channel.visible_to(connection.role)
        });
    }
    Ok(())
}

/// Publish one manager announcement.
pub async fn announce(
    game: &GameHandle,
    connections: &ConnectionRegistry,
    channel: Channel,
    text: &str,
) -> StorageResult<()> {
    publish(
        game,
        connections,
        channel,
        vec![format_line(MANAGER_NAME, text)],
    )
    .await
}

/// Moves lines from personal chat logs into the shared channels.
#[derive(Debug, Default)]
pub struct ChatRelay {
    cursors: HashMap<String, usize>,
}

impl ChatRelay {
    /// Relay with every cursor at the start of its log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines of `author` already relayed.
    pub fn cursor(&self, author: &str) -> usize {
        self.cursors.get(author).copied().unwrap_or(0)
    }

    /// Relay the new lines of each author in turn. Returns the number of lines moved.
    pub async fn relay_round(
        &mut self,
        game: &GameHandle,
        connections: &ConnectionRegistry,
        channel: Channel,
        authors: &[String],
    ) -> StorageResult<usize> {
        let store = game.store();
        let mut relayed = 0;
        for author in authors {
            let cursor = self.cursor(author);
            let lines = store
                .read_from(LogKey::PersonalChat(author.clone()), cursor)
                .await?;
            if lines.is_empty() {
                continue;
            }

            let count = lines.len();
            publish(game, connections, channel, lines).await?;
            self.cursors.insert(author.clone(), cursor + count);
            relayed += count;
            debug!(game_id = game.id(), author = %author, count, ?channel, "relayed chat");
        }
        Ok(relayed)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::extract::ws::Message;
    use tokio::sync::mpsc;

    use super::*;
    use crate::{
        config::{GameConfig, PlayerConfig},
        dao::log_store::MemoryLogStore,
        state::connections::ParticipantConnection,
    };

    fn game(store: &MemoryLogStore) -> GameHandle {
        GameHandle::new(
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
        .unwrap()
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Message>) -> Vec<serde_json::Value> {
        let mut out = Vec::new();
        while let Ok(Message::Text(text)) = rx.try_recv() {
            out.push(serde_json::from_str(text.as_str()).unwrap());
        }
        out
    }

    #[test]
    fn lines_carry_author_and_clock() {
        let line = format_line("Scarlet", "  hello there \n");
        assert!(line.starts_with('['));
        assert!(line.ends_with("] Scarlet: hello there"));
        assert_eq!(line.len(), "[00:00:00] Scarlet: hello there".len());
    }

    #[tokio::test]
    async fn per_author_order_is_kept() {
        let store = MemoryLogStore::new();
        let game = game(&store);
        let registry = ConnectionRegistry::new();
        store
            .append(
                LogKey::PersonalChat("B1".into()),
                vec!["b1-1".into(), "b1-2".into()],
            )
            .await
            .unwrap();
        store
            .append(LogKey::PersonalChat("M".into()), vec!["m-1".into()])
            .await
            .unwrap();

        let mut relay = ChatRelay::new();
        let authors = vec!["M".to_string(), "B1".to_string(), "B2".to_string()];
        let moved = relay
            .relay_round(&game, &registry, Channel::Day, &authors)
            .await
            .unwrap();
        assert_eq!(moved, 3);

        let day = store.read_from(LogKey::Daytime, 0).await.unwrap();
        let b1: Vec<_> = day.iter().filter(|l| l.starts_with("b1")).collect();
        assert_eq!(b1, vec!["b1-1", "b1-2"]);
        assert_eq!(relay.cursor("B1"), 2);

        assert_eq!(
            relay
                .relay_round(&game, &registry, Channel::Day, &authors)
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn night_lines_never_reach_bystanders() {
        let store = MemoryLogStore::new();
        let game = game(&store);
        let registry = ConnectionRegistry::new();
        let (mafia_tx, mut mafia_rx) = mpsc::unbounded_channel();
        let (bystander_tx, mut bystander_rx) = mpsc::unbounded_channel();
        registry.connect("g1", ParticipantConnection::new("M", Role::Mafia, mafia_tx));
        registry.connect(
            "g1",
            ParticipantConnection::new("B1", Role::Bystander, bystander_tx),
        );

        store
            .append(LogKey::PersonalChat("M".into()), vec!["kill B1".into()])
            .await
            .unwrap();
        let mut relay = ChatRelay::new();
        relay
            .relay_round(&game, &registry, Channel::Night, &["M".to_string()])
            .await
            .unwrap();
        announce(&game, &registry, Channel::Manager, "Night falls")
            .await
            .unwrap();

        let mafia = drain(&mut mafia_rx);
        let bystander = drain(&mut bystander_rx);
        assert_eq!(mafia.len(), 2);
        assert_eq!(mafia[0]["color"], "red");
        assert_eq!(bystander.len(), 1);
        assert_eq!(bystander[0]["color"], "green");
        assert!(
            bystander[0]["content"]
                .as_str()
                .unwrap()
                .ends_with("Game-Manager: Night falls")
        );
    }

    #[test]
    fn channel_visibility_by_role() {
        assert_eq!(
            Channel::visible_channels(Role::Bystander),
            vec![Channel::Manager, Channel::Day]
        );
        assert_eq!(Channel::visible_channels(Role::Mafia).len(), 3);
        assert_eq!(Channel::for_phase(GamePhase::NightVoting), Channel::Night);
        assert_eq!(Channel::from_log(&LogKey::PersonalChat("x".into())), None);
    }
}
