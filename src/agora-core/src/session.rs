//! Per-room debate state.
//!
//! A [`DebateSession`] is created once per debate room and mutated by the
//! stage controller and the speaker scheduler on every turn. The speaking
//! history is append-only; the "who has spoken in this stage" view is derived
//! from it incrementally so the two can never diverge.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DebateError;
use crate::participant::{ParticipantId, Role};
use crate::stage::Stage;

/// Default synthetic id used for the live user.
pub const DEFAULT_USER_ID: &str = "User";

/// One spoken turn. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TurnRecord {
    pub speaker_id: ParticipantId,
    pub role: Role,
    pub stage_at_time: Stage,
    pub timestamp: DateTime<Utc>,
    /// Who was questioned, during cross-examination.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_speaker_id: Option<ParticipantId>,
}

/// A spoken message in the debate transcript.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DebateMessage {
    /// Stage when this was spoken.
    pub stage: Stage,
    pub speaker_id: ParticipantId,
    /// Speaker's display name.
    pub speaker_name: String,
    pub role: Role,
    /// The content of the message.
    pub content: String,
}

/// Seating of participants by role.
///
/// Each participant appears under exactly one role, and order within a role
/// is the speaking order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Roster {
    members: BTreeMap<Role, Vec<ParticipantId>>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seat a participant under a role.
    pub fn add(&mut self, role: Role, id: impl Into<ParticipantId>) -> Result<(), DebateError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(DebateError::InvalidRoster(
                "participant id cannot be empty".to_string(),
            ));
        }
        if role == Role::User {
            return Err(DebateError::InvalidRoster(format!(
                "'{}' must be seated under a debate side, not the user tag",
                id
            )));
        }
        if self.role_of(&id).is_some() {
            return Err(DebateError::DuplicateParticipant(id));
        }
        self.members.entry(role).or_default().push(id);
        Ok(())
    }

    /// Builder form of [`Roster::add`] for a whole role.
    pub fn with_role<I, S>(mut self, role: Role, ids: I) -> Result<Self, DebateError>
    where
        I: IntoIterator<Item = S>,
        S: Into<ParticipantId>,
    {
        for id in ids {
            self.add(role, id)?;
        }
        Ok(self)
    }

    /// Members of a role, in speaking order. Empty if the role is unseated.
    pub fn members(&self, role: Role) -> &[ParticipantId] {
        self.members.get(&role).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn role_of(&self, id: &str) -> Option<Role> {
        self.members
            .iter()
            .find(|(_, ids)| ids.iter().any(|m| m == id))
            .map(|(role, _)| *role)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.role_of(id).is_some()
    }

    /// Total number of seated participants.
    pub fn len(&self) -> usize {
        self.members.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All seated participants of the given roles.
    pub fn members_of(&self, roles: &[Role]) -> Vec<ParticipantId> {
        roles
            .iter()
            .flat_map(|role| self.members(*role).iter().cloned())
            .collect()
    }
}

/// Indexed view over the speaking history: stage → role → speakers, plus
/// per-stage turn and cross-examination target counts.
#[derive(Debug, Clone, Default)]
struct SpokenIndex {
    speakers: HashMap<Stage, HashMap<Role, HashSet<ParticipantId>>>,
    turns: HashMap<Stage, usize>,
    role_turns: HashMap<Stage, HashMap<Role, usize>>,
    targets: HashMap<Stage, HashMap<ParticipantId, usize>>,
}

impl SpokenIndex {
    fn record(&mut self, seat: Role, record: &TurnRecord) {
        self.speakers
            .entry(record.stage_at_time)
            .or_default()
            .entry(seat)
            .or_default()
            .insert(record.speaker_id.clone());
        *self.turns.entry(record.stage_at_time).or_default() += 1;
        *self
            .role_turns
            .entry(record.stage_at_time)
            .or_default()
            .entry(seat)
            .or_default() += 1;
        if let Some(target) = &record.target_speaker_id {
            *self
                .targets
                .entry(record.stage_at_time)
                .or_default()
                .entry(target.clone())
                .or_default() += 1;
        }
    }
}

/// Mutable state of one debate room.
#[derive(Debug, Clone)]
pub struct DebateSession {
    topic: String,
    context: String,
    stage: Stage,
    turn_count: usize,
    speaking_history: Vec<TurnRecord>,
    roster: Roster,
    user_side: Option<Role>,
    user_id: ParticipantId,
    waiting_for_user: bool,
    spoken: SpokenIndex,
}

impl DebateSession {
    /// Create a session positioned at the opening stage.
    pub fn new(topic: impl Into<String>, context: impl Into<String>, roster: Roster) -> Self {
        Self {
            topic: topic.into(),
            context: context.into(),
            stage: Stage::Opening,
            turn_count: 0,
            speaking_history: Vec::new(),
            roster,
            user_side: None,
            user_id: DEFAULT_USER_ID.to_string(),
            waiting_for_user: false,
            spoken: SpokenIndex::default(),
        }
    }

    /// Seat the live user on a side.
    ///
    /// The user id is added to the side's roster if it is not already there.
    pub fn with_user(
        mut self,
        side: Role,
        user_id: impl Into<ParticipantId>,
    ) -> Result<Self, DebateError> {
        if !side.is_debater() {
            return Err(DebateError::InvalidRoster(format!(
                "user cannot take the {} side",
                side.display_name()
            )));
        }
        let user_id = user_id.into();
        match self.roster.role_of(&user_id) {
            Some(seat) if seat == side => {}
            Some(seat) => {
                return Err(DebateError::InvalidRoster(format!(
                    "user '{}' is seated as {} but requested {}",
                    user_id,
                    seat.display_name(),
                    side.display_name()
                )));
            }
            None => self.roster.add(side, user_id.clone())?,
        }
        self.user_side = Some(side);
        self.user_id = user_id;
        Ok(self)
    }

    pub(crate) fn with_stage(mut self, stage: Stage) -> Self {
        self.stage = stage;
        self
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn turn_count(&self) -> usize {
        self.turn_count
    }

    pub fn speaking_history(&self) -> &[TurnRecord] {
        &self.speaking_history
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn user_side(&self) -> Option<Role> {
        self.user_side
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn waiting_for_user(&self) -> bool {
        self.waiting_for_user
    }

    /// Whether `id` is the seated live user.
    pub fn is_user(&self, id: &str) -> bool {
        self.user_side.is_some() && self.user_id == id
    }

    /// The most recent turn, if any.
    pub fn last_turn(&self) -> Option<&TurnRecord> {
        self.speaking_history.last()
    }

    /// Speakers of `role` who have a turn recorded in `stage`.
    pub fn spoken_in_stage(&self, stage: Stage, role: Role) -> Option<&HashSet<ParticipantId>> {
        self.spoken.speakers.get(&stage).and_then(|roles| roles.get(&role))
    }

    pub fn has_spoken_in_stage(&self, stage: Stage, role: Role, id: &str) -> bool {
        self.spoken_in_stage(stage, role)
            .is_some_and(|ids| ids.contains(id))
    }

    /// Number of turns recorded while the session was in `stage`.
    pub fn turns_in_stage(&self, stage: Stage) -> usize {
        self.spoken.turns.get(&stage).copied().unwrap_or(0)
    }

    /// Turns taken in `stage` by members seated under `role`.
    pub fn turns_by_role_in_stage(&self, stage: Stage, role: Role) -> usize {
        self.spoken
            .role_turns
            .get(&stage)
            .and_then(|roles| roles.get(&role))
            .copied()
            .unwrap_or(0)
    }

    /// How often `id` was the cross-examination target in `stage`.
    pub fn times_targeted(&self, stage: Stage, id: &str) -> usize {
        self.spoken
            .targets
            .get(&stage)
            .and_then(|targets| targets.get(id))
            .copied()
            .unwrap_or(0)
    }

    /// Append a turn. The seat used for the spoken view is the roster seat
    /// when the speaker is seated, else the role the turn was recorded under.
    pub(crate) fn push_turn(&mut self, record: TurnRecord) {
        let seat = self.roster.role_of(&record.speaker_id).unwrap_or(record.role);
        self.spoken.record(seat, &record);
        self.speaking_history.push(record);
        self.turn_count += 1;
    }

    pub(crate) fn set_stage(&mut self, stage: Stage) {
        self.stage = stage;
    }

    pub(crate) fn set_waiting_for_user(&mut self, waiting: bool) {
        self.waiting_for_user = waiting;
    }
}
