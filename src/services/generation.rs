//! Text generation backing the autonomous participants.

use futures::future::BoxFuture;
use thiserror::Error;

/// Failures of a generation backend.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// The request never reached the backend or the connection dropped.
    #[error("generation request failed: {0}")]
    Transport(String),
    /// The backend answered with a non-success status.
    #[error("generation backend returned status {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, possibly truncated.
        body: String,
    },
    /// The response could not be decoded or held no text.
    #[error("undecodable generation response: {0}")]
    Decode(String),
    /// Every attempt failed.
    #[error("generation gave up after {attempts} attempts")]
    Exhausted {
        /// Attempts made.
        attempts: u32,
    },
}

/// Produces one line of text from a prompt and an optional system instruction.
pub trait GenerationService: Send + Sync {
    /// Generate a completion for `prompt`. The output is a single line.
    fn generate(
        &self,
        system_info: String,
        prompt: String,
    ) -> BoxFuture<'static, Result<String, GenerationError>>;
}

/// Flatten a completion to one line the way chat logs need it.
pub fn flatten_output(raw: &str) -> String {
    let line = raw.replace(['\r', '\n'], "   ");
    let line = line.trim();
    line.strip_prefix(':').unwrap_or(line).trim().to_string()
}
