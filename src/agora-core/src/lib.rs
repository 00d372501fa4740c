//! Agora Core Library
//!
//! Provides the debate stage machine, speaker scheduling, argument analysis
//! and the turn driver that ties them to a text generation service.

pub mod analyzer;
pub mod argument;
pub mod config;
pub mod debate_format;
pub mod error;
pub mod generation;
pub mod json;
pub mod orchestrator;
pub mod participant;
pub mod scheduler;
pub mod scoring;
pub mod session;
pub mod stage;

pub use analyzer::{AnalysisResult, OpponentAnalyzer, OpponentStore};
pub use argument::{Argument, ArgumentExtractor};
pub use config::Config;
pub use debate_format::{ClassicFormat, DebateFormat, ExtendedFormat};
pub use error::{DebateError, GenerationError};
pub use generation::{GenerationOptions, OpenAiGenerator, RetryPolicy, TextGenerator};
pub use orchestrator::{
    CancellationFlag, DebateCallback, DebateConfig, DebateEvent, DebateOrchestrator, UserInput,
    UserPrompt,
};
pub use participant::{Participant, ParticipantId, Role, Side};
pub use scheduler::{SpeakerDecision, SpeakerScheduler};
pub use scoring::{ScoreReport, ScoredArgument, ScoringWeights, VulnerabilityScorer};
pub use session::{DebateMessage, DebateSession, Roster, TurnRecord};
pub use stage::{CompletionRule, Stage, StageController, StagePipeline, StageSpec};
