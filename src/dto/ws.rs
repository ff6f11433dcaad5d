use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::state::game::Role;

/// Query string of the participant WebSocket endpoint.
#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct WsQuery {
    /// Token returned when joining.
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, ToSchema, PartialEq, Eq)]
/// Messages accepted from participant WebSocket clients.
#[serde(tag = "type")]
pub enum InboundMessage {
    /// Chat line for the current discussion channel.
    #[serde(rename = "chat_message")]
    ChatMessage {
        /// Raw text typed by the participant.
        content: String,
    },
    /// Ballot for the current round.
    #[serde(rename = "vote")]
    Vote {
        /// Name of the participant to eliminate.
        voted_player: String,
    },
    /// Any other message type; dropped.
    #[serde(other)]
    Unknown,
}

impl InboundMessage {
    /// Parse a text frame.
    pub fn from_json_str(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

#[derive(Debug, Clone, Serialize, ToSchema, PartialEq, Eq)]
/// Messages pushed to participant WebSocket clients.
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// Sent once after connecting.
    RoleInfo {
        /// Secret role of the participant.
        role: Role,
        /// Color associated with the role.
        color: String,
        /// Character played by the participant.
        character_name: String,
    },
    /// A line of one of the shared channels.
    ChatMessage {
        /// Formatted line, `[HH:MM:SS] Name: text`.
        content: String,
        /// Channel color: green for the manager, blue for day, red for night.
        color: String,
    },
    /// Every participant joined.
    GameStarted,
    /// The receiving participant was eliminated.
    VotedOut,
    /// A winner was decided.
    GameOver,
    /// Ballot requested from the receiving participant.
    VoteRequest {
        /// Names the participant may vote for.
        vote_options: Vec<String>,
        /// Round the ballot belongs to.
        round: u32,
    },
    /// The receiving participant already voted this round.
    AlreadyVoted {
        /// Target of the accepted ballot.
        voted_player: String,
        /// Round the ballot belongs to.
        round: u32,
    },
    /// The voting window closed.
    VotingEnded,
}
