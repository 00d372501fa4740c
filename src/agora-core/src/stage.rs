//! Debate phases and the stage state machine.
//!
//! A [`StagePipeline`] is an ordered list of [`StageSpec`]s, each with its
//! own completion rule. The classic and extended debate formats are both
//! instances of this one machine; see [`crate::debate_format`].

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::DebateError;
use crate::participant::{ParticipantId, Role, Side};
use crate::session::{DebateSession, Roster, TurnRecord};

/// A phase of the debate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Opening,
    Discussion,
    Arguments(Side),
    Summary,
    Rebuttal,
    RebuttalSummary,
    CrossExamination,
    Closing,
    ClosingSummary,
    /// Terminal and absorbing.
    Completed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Opening => f.write_str("opening"),
            Stage::Discussion => f.write_str("discussion"),
            Stage::Arguments(side) => write!(f, "arguments({})", side),
            Stage::Summary => f.write_str("summary"),
            Stage::Rebuttal => f.write_str("rebuttal"),
            Stage::RebuttalSummary => f.write_str("rebuttal_summary"),
            Stage::CrossExamination => f.write_str("cross_examination"),
            Stage::Closing => f.write_str("closing"),
            Stage::ClosingSummary => f.write_str("closing_summary"),
            Stage::Completed => f.write_str("completed"),
        }
    }
}

/// When a stage is finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionRule {
    /// Every seated member of every listed role has spoken in this stage.
    /// Empty rosters never block.
    EveryoneOnce,
    /// The debate as a whole has reached this many turns.
    TotalTurns(usize),
    /// This stage alone has reached this many turns.
    StageTurns(usize),
}

impl CompletionRule {
    /// Whether the scheduler rotates freely instead of giving everyone one turn.
    pub fn is_turn_count(&self) -> bool {
        !matches!(self, CompletionRule::EveryoneOnce)
    }
}

/// A stage within a debate pipeline.
#[derive(Debug, Clone)]
pub struct StageSpec {
    pub stage: Stage,
    /// Name of the stage (announced to participants).
    pub name: String,
    /// Description/instructions for this stage.
    pub description: String,
    /// Roles that speak in this stage, in priority order.
    pub roles: Vec<Role>,
    pub rule: CompletionRule,
    /// Maximum response length hint for each speaker in this stage.
    pub max_tokens: u32,
}

impl StageSpec {
    pub fn new(stage: Stage, roles: Vec<Role>, rule: CompletionRule) -> Self {
        Self {
            stage,
            name: stage.to_string(),
            description: String::new(),
            roles,
            rule,
            max_tokens: 400,
        }
    }

    pub fn named(mut self, name: impl Into<String>, description: impl Into<String>) -> Self {
        self.name = name.into();
        self.description = description.into();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Ordered stages of one debate format. `Completed` follows the last one.
#[derive(Debug, Clone)]
pub struct StagePipeline {
    specs: Vec<StageSpec>,
}

impl StagePipeline {
    pub fn new(specs: Vec<StageSpec>) -> Result<Self, DebateError> {
        let Some(first) = specs.first() else {
            return Err(DebateError::InvalidPipeline("no stages".to_string()));
        };
        if first.stage != Stage::Opening {
            return Err(DebateError::InvalidPipeline(format!(
                "pipeline must start with opening, found {}",
                first.stage
            )));
        }
        for (i, spec) in specs.iter().enumerate() {
            if spec.stage == Stage::Completed {
                return Err(DebateError::InvalidPipeline(
                    "completed is implicit and cannot be listed".to_string(),
                ));
            }
            if specs[..i].iter().any(|s| s.stage == spec.stage) {
                return Err(DebateError::InvalidPipeline(format!(
                    "stage {} listed twice",
                    spec.stage
                )));
            }
            if spec.roles.is_empty() {
                return Err(DebateError::InvalidPipeline(format!(
                    "stage {} has no speaking roles",
                    spec.stage
                )));
            }
        }
        Ok(Self { specs })
    }

    pub fn first(&self) -> Stage {
        self.specs[0].stage
    }

    pub fn specs(&self) -> &[StageSpec] {
        &self.specs
    }

    pub fn spec(&self, stage: Stage) -> Option<&StageSpec> {
        self.specs.iter().find(|s| s.stage == stage)
    }

    /// The stage that follows `stage`, or `None` if it is not in the pipeline.
    pub fn next_after(&self, stage: Stage) -> Option<Stage> {
        if stage == Stage::Completed {
            return Some(Stage::Completed);
        }
        let idx = self.specs.iter().position(|s| s.stage == stage)?;
        Some(
            self.specs
                .get(idx + 1)
                .map(|s| s.stage)
                .unwrap_or(Stage::Completed),
        )
    }
}

/// Owns the transition rules over a [`StagePipeline`].
#[derive(Debug, Clone)]
pub struct StageController {
    pipeline: Arc<StagePipeline>,
}

impl StageController {
    pub fn new(pipeline: Arc<StagePipeline>) -> Self {
        Self { pipeline }
    }

    pub fn pipeline(&self) -> &Arc<StagePipeline> {
        &self.pipeline
    }

    /// Create a session positioned at the pipeline's first stage.
    pub fn open_session(
        &self,
        topic: impl Into<String>,
        context: impl Into<String>,
        roster: Roster,
    ) -> DebateSession {
        DebateSession::new(topic, context, roster).with_stage(self.pipeline.first())
    }

    /// Append a turn for the current stage.
    pub fn record_turn(
        &self,
        session: &mut DebateSession,
        speaker_id: impl Into<ParticipantId>,
        role: Role,
        target_speaker_id: Option<ParticipantId>,
    ) {
        let record = TurnRecord {
            speaker_id: speaker_id.into(),
            role,
            stage_at_time: session.stage(),
            timestamp: Utc::now(),
            target_speaker_id,
        };
        debug!(
            speaker = %record.speaker_id,
            role = %role,
            stage = %record.stage_at_time,
            turn = session.turn_count() + 1,
            "turn recorded"
        );
        session.push_turn(record);
    }

    /// Whether the current stage's completion rule is satisfied.
    pub fn is_stage_complete(&self, session: &DebateSession) -> bool {
        let stage = session.stage();
        if stage == Stage::Completed {
            return true;
        }
        let Some(spec) = self.pipeline.spec(stage) else {
            return false;
        };
        match spec.rule {
            CompletionRule::EveryoneOnce => spec.roles.iter().all(|role| {
                session
                    .roster()
                    .members(*role)
                    .iter()
                    .all(|id| session.has_spoken_in_stage(stage, *role, id))
            }),
            _ if spec
                .roles
                .iter()
                .all(|role| session.roster().members(*role).is_empty()) =>
            {
                true
            }
            CompletionRule::TotalTurns(threshold) => session.turn_count() >= threshold,
            CompletionRule::StageTurns(threshold) => session.turns_in_stage(stage) >= threshold,
        }
    }

    /// Move to the next stage if the current one is complete.
    ///
    /// Returns the (possibly unchanged) current stage.
    pub fn advance(&self, session: &mut DebateSession) -> Result<Stage, DebateError> {
        let current = session.stage();
        if current == Stage::Completed {
            return Ok(current);
        }
        let next = self
            .pipeline
            .next_after(current)
            .ok_or(DebateError::StageNotInPipeline(current))?;
        if !self.is_stage_complete(session) {
            return Ok(current);
        }
        info!(from = %current, to = %next, turn = session.turn_count(), "stage advanced");
        session.set_stage(next);
        Ok(next)
    }

    /// Advance through every stage that is already complete.
    ///
    /// Stages whose roles are all unseated complete vacuously and are skipped.
    pub fn on_message_processed(&self, session: &mut DebateSession) -> Result<Stage, DebateError> {
        loop {
            let before = session.stage();
            let after = self.advance(session)?;
            if after == before {
                return Ok(after);
            }
        }
    }

    /// Record a spoken message and settle the stage.
    ///
    /// A turn by the seated user is only accepted while the scheduler is
    /// waiting for it. No turn is accepted once the debate is completed.
    pub fn process_message(
        &self,
        session: &mut DebateSession,
        speaker_id: impl Into<ParticipantId>,
        role: Role,
        target_speaker_id: Option<ParticipantId>,
    ) -> Result<Stage, DebateError> {
        if session.stage() == Stage::Completed {
            return Err(DebateError::DebateCompleted);
        }
        let speaker_id = speaker_id.into();
        if session.is_user(&speaker_id) {
            if !session.waiting_for_user() {
                return Err(DebateError::NotWaitingForUser);
            }
            session.set_waiting_for_user(false);
        }
        self.record_turn(session, speaker_id, role, target_speaker_id);
        self.on_message_processed(session)
    }
}
