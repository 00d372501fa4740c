//! Error types for the debate engine.

use thiserror::Error;

use crate::stage::Stage;

/// Errors raised by the engine itself.
///
/// Generation and parse failures are absorbed by the analysis layer and never
/// surface here; what remains are configuration problems and invariant
/// violations in the turn driver.
#[derive(Error, Debug)]
pub enum DebateError {
    #[error("Invalid participant count: expected {min}-{max}, got {actual}")]
    InvalidParticipantCount {
        min: usize,
        max: usize,
        actual: usize,
    },

    #[error("Participant '{0}' is already seated in the roster")]
    DuplicateParticipant(String),

    #[error("Invalid roster: {0}")]
    InvalidRoster(String),

    #[error("Unknown role: {0}")]
    UnknownRole(String),

    #[error("Invalid stage pipeline: {0}")]
    InvalidPipeline(String),

    #[error("Stage {0} is not part of the configured pipeline")]
    StageNotInPipeline(Stage),

    #[error("Stage {0} is complete but has not been advanced")]
    StageNotAdvanced(Stage),

    #[error("No user turn is outstanding")]
    NotWaitingForUser,

    #[error("The debate is already completed")]
    DebateCompleted,

    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Failures of the text generation service.
#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("OpenAI API error: {0}")]
    OpenAI(#[from] async_openai::error::OpenAIError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Empty response after {attempts} attempt(s)")]
    EmptyResponse { attempts: u32 },

    #[error("Transient generation failure: {0}")]
    Transient(String),
}
