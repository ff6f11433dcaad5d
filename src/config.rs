//! Process-level configuration and the per-game roster files.

use std::{
    env, fs,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;
use serde_with::{DurationMilliSeconds, DurationSeconds, serde_as};
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    dao::models::{REAL_NAME_DELIMITER, parse_real_names},
    state::game::{Participant, Role},
};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "MAFIA_BACK_CONFIG_PATH";
/// Environment variable holding the generation service API key.
pub const GENERATION_API_KEY_ENV: &str = "TOGETHER_API_KEY";
/// Name of the roster file inside a game directory.
pub const GAME_CONFIG_FILE: &str = "config.json";
/// Name of the real-name mapping file inside a game directory.
pub const REAL_NAMES_FILE: &str = "real_names.txt";

/// Errors raised while loading a game's configuration files.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read `{path}`")]
    Read {
        /// File that failed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The file is not valid JSON for its schema.
    #[error("failed to parse `{path}`")]
    Parse {
        /// File that failed.
        path: PathBuf,
        /// Underlying decoding error.
        #[source]
        source: serde_json::Error,
    },
    /// The content parsed but breaks a roster rule.
    #[error("invalid `{path}`: {reason}")]
    Invalid {
        /// File that failed.
        path: PathBuf,
        /// What is wrong with it.
        reason: String,
    },
}

/// Immutable runtime configuration shared across the application.
#[serde_as]
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Directory holding one sub-directory per game.
    pub games_root: PathBuf,
    /// Fallback tick of the polling bridge when no store change wakes it earlier.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "poll_interval_ms")]
    pub poll_interval: Duration,
    /// Voters who stay silent this long are treated as abstaining. Unset waits forever.
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    #[serde(rename = "vote_timeout_secs")]
    pub vote_timeout: Option<Duration>,
    /// Start with whoever joined once this elapses. Unset waits forever.
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    #[serde(rename = "join_timeout_secs")]
    pub join_timeout: Option<Duration>,
    /// Minimum gap between two chat lines of one autonomous participant.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "autonomous_min_speak_interval_ms")]
    pub autonomous_min_speak_interval: Duration,
    /// Generation service settings.
    pub generation: GenerationConfig,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<Self>(&contents) {
                Ok(config) => {
                    info!(
                        path = %path.display(),
                        games_root = %config.games_root.display(),
                        "loaded configuration"
                    );
                    config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            games_root: PathBuf::from("games"),
            poll_interval: Duration::from_millis(1000),
            vote_timeout: None,
            join_timeout: None,
            autonomous_min_speak_interval: Duration::from_millis(8000),
            generation: GenerationConfig::default(),
        }
    }
}

/// Settings of the remote text-generation service.
#[serde_as]
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Base URL of the OpenAI-compatible API.
    pub base_url: String,
    /// Model identifier.
    pub model: String,
    /// Token budget per completion.
    pub max_tokens: u32,
    /// Attempts per call before giving up.
    pub max_attempts: u32,
    /// Pause between two attempts.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "retry_delay_ms")]
    pub retry_delay: Duration,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.together.xyz/v1".into(),
            model: "meta-llama/Llama-3.3-70B-Instruct-Turbo".into(),
            max_tokens: 200,
            max_attempts: 5,
            retry_delay: Duration::from_secs(2),
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// One roster entry of a game's `config.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct PlayerConfig {
    /// Character name.
    pub name: String,
    /// Whether the character belongs to the Mafia.
    pub is_mafia: bool,
    /// Whether the character is driven by the generation service.
    #[serde(default)]
    pub autonomous: bool,
}

impl PlayerConfig {
    /// Build an entry.
    pub fn new(name: impl Into<String>, is_mafia: bool, autonomous: bool) -> Self {
        Self {
            name: name.into(),
            is_mafia,
            autonomous,
        }
    }
}

/// Content of a game's `config.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct GameConfig {
    /// Roster in seating order.
    pub players: Vec<PlayerConfig>,
    /// Length of each day discussion.
    pub daytime_minutes: f64,
    /// Length of each night discussion.
    pub nighttime_minutes: f64,
}

impl GameConfig {
    /// Read and validate `<dir>/config.json`.
    pub fn load(dir: &Path) -> Result<Self, ConfigError> {
        let path = dir.join(GAME_CONFIG_FILE);
        let contents = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        let config: Self = serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })?;
        config
            .validate()
            .map_err(|reason| ConfigError::Invalid { path, reason })?;
        Ok(config)
    }

    /// Check the roster rules that the JSON schema cannot express.
    pub fn validate(&self) -> Result<(), String> {
        if self.players.is_empty() {
            return Err("roster is empty".into());
        }
        for player in &self.players {
            let name = player.name.trim();
            if name.is_empty() || name != player.name {
                return Err(format!("invalid player name `{}`", player.name));
            }
            if name.contains(['\n', '\r', REAL_NAME_DELIMITER, '/', '\\']) {
                return Err(format!("player name `{name}` contains a reserved character"));
            }
        }
        for (label, minutes) in [
            ("daytime_minutes", self.daytime_minutes),
            ("nighttime_minutes", self.nighttime_minutes),
        ] {
            if !minutes.is_finite() || minutes < 0.0 {
                return Err(format!("`{label}` must be a non-negative number"));
            }
        }
        Ok(())
    }

    /// Length of a day discussion window.
    pub fn daytime(&self) -> Duration {
        Duration::from_secs_f64(self.daytime_minutes * 60.0)
    }

    /// Length of a night discussion window.
    pub fn nighttime(&self) -> Duration {
        Duration::from_secs_f64(self.nighttime_minutes * 60.0)
    }

    /// Participants in roster order, all active.
    pub fn participants(&self) -> Vec<Participant> {
        self.players
            .iter()
            .map(|player| {
                Participant::new(
                    player.name.clone(),
                    Role::from_is_mafia(player.is_mafia),
                    player.autonomous,
                )
            })
            .collect()
    }
}

/// Read `<dir>/real_names.txt` as `(real, character)` pairs.
pub fn load_real_names(dir: &Path) -> Result<Vec<(String, String)>, ConfigError> {
    let path = dir.join(REAL_NAMES_FILE);
    let contents = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
        path: path.clone(),
        source,
    })?;
    parse_real_names(&contents).map_err(|reason| ConfigError::Invalid { path, reason })
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    fn temp_game_dir() -> PathBuf {
        let dir = env::temp_dir().join(format!("mafia-config-{}", Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn app_config_reads_durations_and_defaults() {
        let config: AppConfig = serde_json::from_str(
            r#"{"games_root": "/srv/games", "poll_interval_ms": 250, "vote_timeout_secs": 90}"#,
        )
        .unwrap();
        assert_eq!(config.games_root, PathBuf::from("/srv/games"));
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.vote_timeout, Some(Duration::from_secs(90)));
        assert_eq!(config.join_timeout, None);
        assert_eq!(
            config.autonomous_min_speak_interval,
            Duration::from_millis(8000)
        );
        assert_eq!(config.generation.max_attempts, 5);
    }

    #[test]
    fn game_config_loads_from_disk() {
        let dir = temp_game_dir();
        fs::write(
            dir.join(GAME_CONFIG_FILE),
            r#"{
                "players": [
                    {"name": "Scarlet", "is_mafia": true},
                    {"name": "Mustard", "is_mafia": false, "autonomous": true}
                ],
                "daytime_minutes": 0.5,
                "nighttime_minutes": 1
            }"#,
        )
        .unwrap();
        fs::write(dir.join(REAL_NAMES_FILE), "Alice,Scarlet\n").unwrap();

        let config = GameConfig::load(&dir).unwrap();
        assert_eq!(config.daytime(), Duration::from_secs(30));
        assert_eq!(config.nighttime(), Duration::from_secs(60));
        let participants = config.participants();
        assert_eq!(participants[0].role, Role::Mafia);
        assert!(participants[1].autonomous);

        assert_eq!(
            load_real_names(&dir).unwrap(),
            vec![("Alice".to_string(), "Scarlet".to_string())]
        );
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn missing_files_are_data_faults() {
        let dir = temp_game_dir();
        assert!(matches!(
            GameConfig::load(&dir),
            Err(ConfigError::Read { .. })
        ));
        fs::write(dir.join(GAME_CONFIG_FILE), "{not json").unwrap();
        assert!(matches!(
            GameConfig::load(&dir),
            Err(ConfigError::Parse { .. })
        ));
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn reserved_characters_are_rejected() {
        let config = GameConfig {
            players: vec![PlayerConfig::new("Sc,arlet", true, false)],
            daytime_minutes: 1.0,
            nighttime_minutes: 1.0,
        };
        assert!(config.validate().is_err());

        let negative = GameConfig {
            players: vec![PlayerConfig::new("Scarlet", true, false)],
            daytime_minutes: -1.0,
            nighttime_minutes: 1.0,
        };
        assert!(negative.validate().is_err());
    }
}
