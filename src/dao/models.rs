//! Keys addressing the append-only logs and single-value markers of one game.

use std::fmt;

/// Append-only line logs kept for a game.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LogKey {
    /// Lines a participant produced but that were not relayed yet.
    PersonalChat(String),
    /// Vote targets submitted by a participant, one per line.
    PersonalVote(String),
    /// Shared daytime channel, visible to everyone.
    Daytime,
    /// Shared nighttime channel, visible to Mafia only.
    Nighttime,
    /// Game manager announcements visible to everyone.
    Manager,
}

impl LogKey {
    /// File name used by the file-backed store.
    pub fn file_name(&self) -> String {
        match self {
            LogKey::PersonalChat(name) => format!("{name}_chat.txt"),
            LogKey::PersonalVote(name) => format!("{name}_vote.txt"),
            LogKey::Daytime => "public_daytime_chat.txt".into(),
            LogKey::Nighttime => "public_nighttime_chat.txt".into(),
            LogKey::Manager => "public_manager_chat.txt".into(),
        }
    }
}

impl fmt::Display for LogKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogKey::PersonalChat(name) => write!(f, "chat:{name}"),
            LogKey::PersonalVote(name) => write!(f, "vote:{name}"),
            LogKey::Daytime => f.write_str("daytime"),
            LogKey::Nighttime => f.write_str("nighttime"),
            LogKey::Manager => f.write_str("manager"),
        }
    }
}

/// Single-value records kept for a game.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MarkerKey {
    /// Join/elimination status of a participant.
    Status(String),
    /// Current phase of the game.
    Phase,
    /// Winning side, once decided.
    Winner,
    /// Newline separated names of participants still in play.
    RemainingPlayers,
    /// Newline separated names of every participant of the roster.
    PlayerNames,
    /// `real,character` lines mapping human players to their character.
    RealNames,
    /// Timestamp at which every participant had joined.
    GameStart,
    /// Post-game survey answers of a participant.
    Survey(String),
}

impl MarkerKey {
    /// File name used by the file-backed store.
    pub fn file_name(&self) -> String {
        match self {
            MarkerKey::Status(name) => format!("{name}_status.txt"),
            MarkerKey::Phase => "phase_status.txt".into(),
            MarkerKey::Winner => "who_wins.txt".into(),
            MarkerKey::RemainingPlayers => "remaining_players.txt".into(),
            MarkerKey::PlayerNames => "player_names.txt".into(),
            MarkerKey::RealNames => "real_names.txt".into(),
            MarkerKey::GameStart => "game_start_time.txt".into(),
            MarkerKey::Survey(name) => format!("{name}_survey.txt"),
        }
    }
}

/// Value stored in a participant's status marker once joined.
pub const STATUS_JOINED: &str = "joined";
/// Value stored in a participant's status marker once eliminated.
pub const STATUS_VOTED_OUT: &str = "voted_out";
/// Separator between the real name and the character name in [`MarkerKey::RealNames`].
pub const REAL_NAME_DELIMITER: char = ',';

/// Parse the content of a [`MarkerKey::RealNames`] marker into `(real, character)` pairs.
///
/// Blank lines are skipped; lines without a delimiter are reported back as errors so a
/// broken roster file is caught at startup.
pub fn parse_real_names(raw: &str) -> Result<Vec<(String, String)>, String> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            line.split_once(REAL_NAME_DELIMITER)
                .map(|(real, character)| (real.trim().to_string(), character.trim().to_string()))
                .ok_or_else(|| line.to_string())
        })
        .collect()
}

/// Split a newline separated name list, ignoring blank lines.
pub fn parse_name_list(raw: &str) -> Vec<String> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn real_names_are_split_on_the_delimiter() {
        let parsed = parse_real_names("Alice,Scarlet\n\n Bob , Mustard \n").unwrap();
        assert_eq!(
            parsed,
            vec![
                ("Alice".to_string(), "Scarlet".to_string()),
                ("Bob".to_string(), "Mustard".to_string()),
            ]
        );
    }

    #[test]
    fn real_names_without_delimiter_are_rejected() {
        assert_eq!(parse_real_names("Alice Scarlet"), Err("Alice Scarlet".into()));
    }
}
