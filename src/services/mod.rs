/// Autonomous participants driven by the generation service.
pub mod autonomous;
/// Shared channels, visibility rules and chat relay.
pub mod chat_relay;
/// OpenAPI documentation generation.
pub mod documentation;
/// Loading of game directories and start-up of their tasks.
pub mod game_loader;
/// Derived game status read from persisted markers.
pub mod game_status;
/// Text-generation collaborator used by autonomous participants.
pub mod generation;
/// Health check service.
pub mod health_service;
/// Orchestrator of one game's phases.
pub mod phase_controller;
/// Join, chat and vote actions of participants.
pub mod player_service;
/// Cursor-based tailing of the log store.
pub mod polling_bridge;
/// Post-game survey records.
pub mod survey_service;
/// Generation service backed by the Together API.
#[cfg(feature = "together-llm")]
pub mod together;
/// Ballot collection and round resolution.
pub mod vote_tally;
/// WebSocket connection and message handling service.
pub mod websocket_service;
