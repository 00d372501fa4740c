//! Speaker scheduling.
//!
//! Given the current stage and the roster, [`SpeakerScheduler::next`] decides
//! who speaks next. Rotation is deterministic everywhere except the choice of
//! a cross-examination target, where ties between equally-questioned
//! opponents are broken at random.

use std::sync::Arc;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tracing::debug;

use crate::error::DebateError;
use crate::participant::{ParticipantId, Role};
use crate::session::DebateSession;
use crate::stage::{Stage, StagePipeline, StageSpec};

/// Outcome of a scheduling request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeakerDecision {
    /// A scripted participant must speak.
    Speak {
        participant_id: ParticipantId,
        role: Role,
        /// The opponent to question, during cross-examination.
        target: Option<ParticipantId>,
    },
    /// The live user must speak for this role.
    WaitForUser(Role),
    /// A user turn is already outstanding; do not prompt again.
    NoDecision,
    /// The debate is over.
    Completed,
}

/// Picks the next speaker for a session.
#[derive(Debug, Clone)]
pub struct SpeakerScheduler {
    pipeline: Arc<StagePipeline>,
    rng: StdRng,
}

impl SpeakerScheduler {
    pub fn new(pipeline: Arc<StagePipeline>) -> Self {
        Self {
            pipeline,
            rng: StdRng::from_entropy(),
        }
    }

    /// Scheduler with a reproducible tie-break sequence.
    pub fn with_seed(pipeline: Arc<StagePipeline>, seed: u64) -> Self {
        Self {
            pipeline,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Decide who speaks next.
    ///
    /// Returns [`DebateError::StageNotAdvanced`] when asked to schedule a
    /// stage whose completion rule is already met; the driver must call
    /// `StageController::on_message_processed` after every turn.
    pub fn next(&mut self, session: &mut DebateSession) -> Result<SpeakerDecision, DebateError> {
        if session.waiting_for_user() {
            return Ok(SpeakerDecision::NoDecision);
        }
        let stage = session.stage();
        if stage == Stage::Completed {
            return Ok(SpeakerDecision::Completed);
        }
        let spec = self
            .pipeline
            .spec(stage)
            .ok_or(DebateError::StageNotInPipeline(stage))?;

        let picked = if spec.rule.is_turn_count() {
            pick_rotating(session, spec)
        } else {
            pick_everyone_once(session, spec)
        };
        let Some((participant_id, role)) = picked else {
            return Err(DebateError::StageNotAdvanced(stage));
        };

        if session.is_user(&participant_id) && session.user_side() == Some(role) {
            debug!(stage = %stage, role = %role, "waiting for user");
            session.set_waiting_for_user(true);
            return Ok(SpeakerDecision::WaitForUser(role));
        }

        let target = if stage == Stage::CrossExamination {
            self.pick_target(session, &participant_id, role)
        } else {
            None
        };

        debug!(
            stage = %stage,
            speaker = %participant_id,
            role = %role,
            target = target.as_deref().unwrap_or("-"),
            "speaker selected"
        );
        Ok(SpeakerDecision::Speak {
            participant_id,
            role,
            target,
        })
    }

    /// Choose the opponent to question: the least-targeted one in this stage,
    /// ties broken at random.
    fn pick_target(
        &mut self,
        session: &DebateSession,
        speaker_id: &str,
        role: Role,
    ) -> Option<ParticipantId> {
        let stage = session.stage();
        let opponents: Vec<ParticipantId> = session
            .roster()
            .members_of(role.opponents())
            .into_iter()
            .filter(|id| id != speaker_id)
            .collect();
        let fewest = opponents
            .iter()
            .map(|id| session.times_targeted(stage, id))
            .min()?;
        let least_targeted: Vec<&ParticipantId> = opponents
            .iter()
            .filter(|id| session.times_targeted(stage, id) == fewest)
            .collect();
        least_targeted.choose(&mut self.rng).map(|id| (*id).clone())
    }
}

fn last_speaker(session: &DebateSession) -> Option<&str> {
    session.last_turn().map(|t| t.speaker_id.as_str())
}

/// First unspoken member of the first role that still has one, avoiding the
/// previous speaker where the role has someone else to offer.
fn pick_everyone_once(session: &DebateSession, spec: &StageSpec) -> Option<(ParticipantId, Role)> {
    let stage = spec.stage;
    let last = last_speaker(session);
    let mut fallback = None;

    for role in &spec.roles {
        let members = session.roster().members(*role);
        let unspoken: Vec<&ParticipantId> = members
            .iter()
            .filter(|id| !session.has_spoken_in_stage(stage, *role, id))
            .collect();
        let Some(first) = unspoken.first() else {
            continue;
        };
        if let Some(id) = unspoken.iter().find(|id| Some(id.as_str()) != last) {
            return Some(((*id).clone(), *role));
        }
        if members.len() == 1 {
            return Some(((*first).clone(), *role));
        }
        fallback.get_or_insert_with(|| ((*first).clone(), *role));
    }
    fallback
}

/// Rotate roles by the stage's turn count; within a role prefer members who
/// have not spoken in this stage, then wrap by the role's turns in the stage.
fn pick_rotating(session: &DebateSession, spec: &StageSpec) -> Option<(ParticipantId, Role)> {
    let active: Vec<Role> = spec
        .roles
        .iter()
        .copied()
        .filter(|role| !session.roster().members(*role).is_empty())
        .collect();
    if active.is_empty() {
        return None;
    }

    let last = last_speaker(session);
    let rotation = session.turns_in_stage(spec.stage);
    let mut fallback = None;

    for offset in 0..active.len() {
        let role = active[(rotation + offset) % active.len()];
        let Some(id) = pick_within_role(session, spec.stage, role, last) else {
            continue;
        };
        if Some(id.as_str()) != last {
            return Some((id, role));
        }
        fallback.get_or_insert((id, role));
    }
    fallback
}

fn pick_within_role(
    session: &DebateSession,
    stage: Stage,
    role: Role,
    last: Option<&str>,
) -> Option<ParticipantId> {
    let members = session.roster().members(role);
    if let Some(id) = members
        .iter()
        .find(|id| !session.has_spoken_in_stage(stage, role, id) && Some(id.as_str()) != last)
    {
        return Some(id.clone());
    }
    if members.len() <= 1 {
        return members.first().cloned();
    }
    let idx = session.turns_by_role_in_stage(stage, role) % members.len();
    if Some(members[idx].as_str()) == last {
        Some(members[(idx + 1) % members.len()].clone())
    } else {
        Some(members[idx].clone())
    }
}
