use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, info, warn};

use crate::{
    dto::ws::{InboundMessage, OutboundMessage},
    error::ServiceError,
    services::{
        chat_relay::Channel,
        game_status::GameStatus,
        player_service::{self, Rejection, Submission},
        polling_bridge::PollingBridge,
    },
    state::{
        GameHandle, SharedState,
        connections::{DeliveryError, ParticipantConnection},
        game::Role,
        sessions::Session,
        state_machine::GamePhase,
        vote_guard::VoteKey,
    },
};

/// Close code sent when the socket carries no valid session.
pub const UNKNOWN_SESSION_CLOSE_CODE: u16 = 4001;

/// Handle the full lifecycle of one participant WebSocket.
pub async fn handle_socket(
    state: SharedState,
    socket: WebSocket,
    game_id: String,
    session_id: Option<String>,
) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    // Dedicated writer task keeps outbound messages flowing even while we await inbound frames.
    let writer_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

    let resolved = player_service::resolve_session(&state, &game_id, session_id.as_deref())
        .and_then(|session| Ok((state.require_game(&game_id)?, session)));
    let (game, session) = match resolved {
        Ok(found) => found,
        Err(err) => {
            warn!(game_id = %game_id, error = %err, "rejecting websocket without a valid session");
            let _ = outbound_tx.send(Message::Close(Some(CloseFrame {
                code: UNKNOWN_SESSION_CLOSE_CODE,
                reason: "unknown session".into(),
            })));
            finalize(writer_task, outbound_tx).await;
            return;
        }
    };

    let participant = session.character_name.clone();
    let connection = ParticipantConnection::new(&participant, session.role, outbound_tx.clone());
    if let Err(err) = attach(&state, &game, &connection).await {
        warn!(
            game_id = %game_id,
            participant = %participant,
            error = %err,
            "failed to attach connection"
        );
        state
            .connections()
            .release(&game_id, &participant, connection.id);
        finalize(writer_task, outbound_tx).await;
        return;
    }

    let monitor_task = tokio::spawn(monitor(state.clone(), game.clone(), connection.clone()));

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => match InboundMessage::from_json_str(text.as_str()) {
                Ok(inbound) => {
                    let handled =
                        handle_inbound(&state, &game, &session, &connection, inbound).await;
                    if let Err(err) = handled {
                        warn!(
                            game_id = %game_id,
                            participant = %participant,
                            error = %err,
                            "failed to handle participant action"
                        );
                    }
                }
                Err(err) => {
                    warn!(
                        game_id = %game_id,
                        participant = %participant,
                        error = %err,
                        "dropping malformed participant message"
                    );
                }
            },
            Ok(Message::Ping(payload)) => {
                let _ = outbound_tx.send(Message::Pong(payload));
            }
            Ok(Message::Close(frame)) => {
                info!(game_id = %game_id, participant = %participant, "participant closed socket");
                let _ = outbound_tx.send(Message::Close(frame));
                break;
            }
            Ok(Message::Binary(_)) => {}
            Ok(Message::Pong(_)) => {}
            Err(err) => {
                warn!(
                    game_id = %game_id,
                    participant = %participant,
                    error = %err,
                    "websocket error"
                );
                break;
            }
        }
    }

    monitor_task.abort();
    state
        .connections()
        .release(&game_id, &participant, connection.id);
    finalize(writer_task, outbound_tx).await;
}

/// Send the role, replay the visible history and register the connection.
///
/// Runs under the relay gate so no shared-channel line is published in between: every
/// line is either part of the replay or broadcast to the registered connection.
async fn attach(
    state: &SharedState,
    game: &GameHandle,
    connection: &ParticipantConnection,
) -> Result<(), ServiceError> {
    let role = connection.role;
    let _gate = game.relay_gate().await;

    connection
        .send(&OutboundMessage::RoleInfo {
            role,
            color: role.color().to_string(),
            character_name: connection.participant.clone(),
        })
        .map_err(delivery_failed)?;

    let mut history = PollingBridge::new(
        game.store(),
        Channel::visible_channels(role).into_iter().map(Channel::log),
        state.config().poll_interval,
    );
    for (log, line) in history.drain().await? {
        if let Some(channel) = Channel::from_log(&log) {
            connection
                .send(&channel.message(line))
                .map_err(delivery_failed)?;
        }
    }

    state.connections().connect(game.id(), connection.clone());
    Ok(())
}

fn delivery_failed(err: DeliveryError) -> ServiceError {
    ServiceError::InvalidState(format!("connection unusable: {err}"))
}

async fn handle_inbound(
    state: &SharedState,
    game: &GameHandle,
    session: &Session,
    connection: &ParticipantConnection,
    inbound: InboundMessage,
) -> Result<(), ServiceError> {
    match inbound {
        InboundMessage::ChatMessage { content } => {
            player_service::submit_chat(game, &session.character_name, &content).await?;
        }
        InboundMessage::Vote { voted_player } => {
            let submission =
                player_service::submit_vote(state, game, &session.character_name, &voted_player)
                    .await?;
            if let Submission::Rejected(Rejection::AlreadyVoted {
                voted_player,
                round,
            }) = submission
            {
                let _ = connection.send(&OutboundMessage::AlreadyVoted {
                    voted_player,
                    round,
                });
            }
        }
        InboundMessage::Unknown => {
            debug!(
                game_id = game.id(),
                participant = %session.character_name,
                "ignoring unknown message type"
            );
        }
    }
    Ok(())
}

/// What a connection has been told so far about the derived game status.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MonitorView {
    started: bool,
    voted_out: bool,
    voting: bool,
    phase: Option<GamePhase>,
}

/// Inputs of one monitor step beyond the persisted status.
#[derive(Debug, Clone)]
pub struct MonitorContext<'a> {
    /// Character of the connection.
    pub participant: &'a str,
    /// Role of the connection.
    pub role: Role,
    /// Ballot already accepted from the participant this round.
    pub accepted_vote: Option<String>,
    /// Names the participant may vote for right now.
    pub vote_options: Vec<String>,
}

impl MonitorView {
    /// Control messages due after observing `status`. The boolean is true once the
    /// game is over and the monitor should stop.
    pub fn observe(
        &mut self,
        status: &GameStatus,
        context: MonitorContext<'_>,
    ) -> (Vec<OutboundMessage>, bool) {
        let mut messages = Vec::new();

        if !self.started && status.has_started() {
            messages.push(OutboundMessage::GameStarted);
            self.started = true;
        }

        let eliminated = !status.players.is_empty() && !status.is_remaining(context.participant);
        if !self.voted_out && eliminated {
            messages.push(OutboundMessage::VotedOut);
            self.voted_out = true;
        }

        if status.is_game_over() {
            if self.voting {
                messages.push(OutboundMessage::VotingEnded);
                self.voting = false;
            }
            messages.push(OutboundMessage::GameOver);
            return (messages, true);
        }

        let may_vote = status.is_voting_time()
            && !self.voted_out
            && (context.role.is_mafia() || !status.is_nighttime());
        if may_vote {
            if !self.voting || self.phase != Some(status.phase) {
                let round = status.round();
                messages.push(match context.accepted_vote {
                    Some(voted_player) => OutboundMessage::AlreadyVoted {
                        voted_player,
                        round,
                    },
                    None => OutboundMessage::VoteRequest {
                        vote_options: context.vote_options,
                        round,
                    },
                });
            }
        } else if self.voting {
            messages.push(OutboundMessage::VotingEnded);
        }

        self.voting = may_vote;
        self.phase = Some(status.phase);
        (messages, false)
    }
}

/// Push control messages to `connection` whenever the persisted status changes.
async fn monitor(state: SharedState, game: Arc<GameHandle>, connection: ParticipantConnection) {
    let store = game.store();
    let mut changes = WatchStream::new(store.changes());
    let mut view = MonitorView::default();
    let participant = connection.participant.as_str();

    while changes.next().await.is_some() {
        let status = match GameStatus::read(store.as_ref()).await {
            Ok(status) => status,
            Err(err) => {
                warn!(game_id = game.id(), participant, error = %err, "failed to read game status");
                continue;
            }
        };
        let key = VoteKey::new(game.id(), participant, status.round());
        let vote_options =
            player_service::vote_options(&game, participant, status.is_nighttime()).await;
        let context = MonitorContext {
            participant,
            role: connection.role,
            accepted_vote: state.vote_guard().accepted(&key),
            vote_options,
        };

        let (messages, done) = view.observe(&status, context);
        for message in &messages {
            if let Err(err) = connection.send(message) {
                debug!(game_id = game.id(), participant, error = %err, "monitor stopped");
                return;
            }
        }
        if done {
            return;
        }
    }
}

/// Ensure the writer task winds down before we return from the socket handler.
async fn finalize(writer_task: JoinHandle<()>, outbound_tx: mpsc::UnboundedSender<Message>) {
    drop(outbound_tx);
    let _ = writer_task.await;
}
