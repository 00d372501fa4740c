//! Debate orchestration logic.
//!
//! Drives a debate turn by turn: settle the stage, ask the scheduler who
//! speaks, generate (or read) the utterance, record it, analyse it. The
//! session state itself lives in [`DebateSession`]; this module only wires
//! the components together and reports progress through [`DebateEvent`]s.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

use crate::analyzer::{AnalysisResult, OpponentAnalyzer};
use crate::config::{Config, render};
use crate::debate_format::DebateFormat;
use crate::error::DebateError;
use crate::generation::{GenerationOptions, TextGenerator, generate_or_fallback};
use crate::participant::{Participant, ParticipantId, Role, Side};
use crate::scheduler::{SpeakerDecision, SpeakerScheduler};
use crate::session::{DebateMessage, DebateSession, Roster};
use crate::stage::{Stage, StageController, StageSpec};

/// How many weak points are put in front of a speaker.
const ATTACK_BRIEF_SIZE: usize = 3;

/// Configuration for running a debate.
#[derive(Debug, Clone)]
pub struct DebateConfig {
    /// The topic being debated.
    pub topic: String,
    /// Background given to every speaker.
    pub context: String,
    /// Side taken by the live user, if one takes part.
    pub user_side: Option<Side>,
    /// Display name of the live user.
    pub user_name: String,
    /// The user's own core arguments, as `{"argument": ...}` objects or strings.
    pub core_arguments: Vec<Value>,
}

impl DebateConfig {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            context: String::new(),
            user_side: None,
            user_name: "You".to_string(),
            core_arguments: Vec::new(),
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    /// Seat the live user on `side`.
    pub fn with_user(mut self, side: Side, name: impl Into<String>) -> Self {
        self.user_side = Some(side);
        self.user_name = name.into();
        self
    }

    pub fn with_core_arguments(mut self, core_arguments: Vec<Value>) -> Self {
        self.core_arguments = core_arguments;
        self
    }
}

/// Shared stop switch, checked between turns and while waiting for the user.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What the live user is asked for.
#[derive(Debug, Clone)]
pub struct UserPrompt {
    pub user_id: ParticipantId,
    pub role: Role,
    pub stage: Stage,
    pub stage_name: String,
    pub stage_description: String,
    /// Most vulnerable opponent arguments, one line each.
    pub weak_points: Vec<String>,
    pub opponent_key_points: Vec<String>,
    pub my_key_points: Vec<String>,
}

/// Source of the live user's turns.
#[async_trait]
pub trait UserInput: Send + Sync {
    /// Read one turn. `None` means the user has left.
    async fn read_turn(&self, prompt: &UserPrompt) -> Option<String>;
}

/// Callback for debate events.
pub type DebateCallback = Box<dyn Fn(DebateEvent) + Send + Sync>;

/// Events emitted during a debate.
#[derive(Debug, Clone)]
pub enum DebateEvent {
    /// A new stage is starting.
    StageStart {
        stage: Stage,
        name: String,
        description: String,
    },
    /// A participant is about to speak.
    SpeakerStart {
        name: String,
        role: String,
        target: Option<String>,
    },
    /// A participant has finished speaking.
    SpeakerMessage { name: String, content: String },
    /// The live user is expected to speak.
    AwaitingUser(UserPrompt),
    /// Arguments of the last utterance were analysed.
    AnalysisReady(AnalysisResult),
    /// Opponents' key points were refreshed.
    KeyPointsUpdated(Vec<String>),
    /// The debate was stopped before completion.
    Cancelled,
    /// The debate has concluded.
    DebateEnd,
}

/// Orchestrates the debate between scripted participants and the live user.
pub struct DebateOrchestrator {
    config: Config,
    debate: DebateConfig,
    participants: Vec<Participant>,
    format_name: String,
    controller: StageController,
    scheduler: SpeakerScheduler,
    analyzer: OpponentAnalyzer,
    generator: Arc<dyn TextGenerator>,
    session: DebateSession,
    /// Full debate transcript.
    transcript: Vec<DebateMessage>,
    announced: Option<Stage>,
    /// Event callback.
    callback: Option<DebateCallback>,
    user_input: Option<Box<dyn UserInput>>,
    cancel: CancellationFlag,
}

impl DebateOrchestrator {
    /// Create a new orchestrator with the given configuration.
    pub fn new(
        debate: DebateConfig,
        participants: Vec<Participant>,
        format: &dyn DebateFormat,
        generator: Arc<dyn TextGenerator>,
        config: Config,
    ) -> Result<Self, DebateError> {
        let debater_count = participants.iter().filter(|p| p.role.is_debater()).count()
            + usize::from(debate.user_side.is_some());
        let min = format.min_debaters();
        let max = format.max_debaters();
        if debater_count < min || debater_count > max {
            return Err(DebateError::InvalidParticipantCount {
                min,
                max,
                actual: debater_count,
            });
        }

        let mut roster = Roster::new();
        for participant in &participants {
            roster.add(participant.role, participant.id.clone())?;
        }

        let pipeline = Arc::new(format.pipeline()?);
        let controller = StageController::new(pipeline.clone());
        let mut session = controller.open_session(&debate.topic, &debate.context, roster);
        if let Some(side) = debate.user_side {
            session = session.with_user(side.role(), config.debate.user_id.clone())?;
        }

        let analysis_options =
            GenerationOptions::default().with_temperature(config.generation.analysis_temperature);
        let analyzer = OpponentAnalyzer::new(
            generator.clone(),
            &config.prompts,
            config.analysis.clone(),
            analysis_options,
        );

        Ok(Self {
            config,
            debate,
            participants,
            format_name: format.display_name().to_string(),
            controller,
            scheduler: SpeakerScheduler::new(pipeline),
            analyzer,
            generator,
            session,
            transcript: Vec::new(),
            announced: None,
            callback: None,
            user_input: None,
            cancel: CancellationFlag::new(),
        })
    }

    /// Set a callback for debate events.
    pub fn with_callback(mut self, callback: DebateCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Set where the live user's turns come from.
    pub fn with_user_input(mut self, input: Box<dyn UserInput>) -> Self {
        self.user_input = Some(input);
        self
    }

    /// Share a cancellation flag with the caller.
    pub fn with_cancellation(mut self, cancel: CancellationFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Make cross-examination target choice reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.scheduler = SpeakerScheduler::with_seed(self.controller.pipeline().clone(), seed);
        self
    }

    /// Run the debate until it completes or is cancelled.
    pub async fn run(&mut self) -> Result<Vec<DebateMessage>, DebateError> {
        if self.session.user_side().is_some() && self.user_input.is_none() {
            return Err(DebateError::ConfigError(
                "a user side is set but no user input source was given".to_string(),
            ));
        }

        self.analyzer.clear(None);
        self.analyzer
            .update_my_key_points_from_core_arguments(&self.debate.core_arguments);
        info!(
            topic = %self.debate.topic,
            format = %self.format_name,
            participants = self.session.roster().len(),
            "debate started"
        );

        loop {
            if self.cancel.is_cancelled() {
                return Ok(self.stop("cancellation requested"));
            }

            let stage = self.controller.on_message_processed(&mut self.session)?;
            self.announce(stage);

            let decision = self.scheduler.next(&mut self.session)?;
            debug!(
                stage = %stage,
                turn = self.session.turn_count(),
                decision = ?decision,
                "speaker scheduled"
            );
            match decision {
                SpeakerDecision::Speak {
                    participant_id,
                    role,
                    target,
                } => self.speaker_turn(participant_id, role, target).await?,
                SpeakerDecision::WaitForUser(role) => {
                    if !self.user_turn(role).await? {
                        return Ok(self.stop("user left the debate"));
                    }
                }
                SpeakerDecision::NoDecision => {
                    let role = self.session.user_side().unwrap_or(Role::User);
                    if !self.user_turn(role).await? {
                        return Ok(self.stop("user left the debate"));
                    }
                }
                SpeakerDecision::Completed => break,
            }

            self.refresh_key_points().await;
        }

        info!(turns = self.session.turn_count(), "debate completed");
        self.emit_event(DebateEvent::DebateEnd);
        Ok(self.transcript.clone())
    }

    /// A scripted participant speaks.
    async fn speaker_turn(
        &mut self,
        participant_id: ParticipantId,
        role: Role,
        target: Option<ParticipantId>,
    ) -> Result<(), DebateError> {
        let spec = self.current_spec()?;
        let participant = self
            .participants
            .iter()
            .find(|p| p.id == participant_id)
            .cloned()
            .ok_or_else(|| {
                DebateError::InvalidRoster(format!("'{}' is seated but unknown", participant_id))
            })?;
        let target_name = target.as_deref().map(|id| self.name_of(id));

        self.emit_event(DebateEvent::SpeakerStart {
            name: participant.name.clone(),
            role: role.display_name().to_string(),
            target: target_name.clone(),
        });

        let system_prompt = self.system_prompt(&participant);
        let turn_prompt = self.turn_prompt(&spec, role, target_name.as_deref());
        let mut options = GenerationOptions::default()
            .with_max_tokens(spec.max_tokens)
            .with_temperature(self.config.generation.temperature);
        if let Some(model) = &participant.model {
            options = options.with_model(model.clone());
        }
        let fallback = if role == Role::Moderator {
            &self.config.prompts.moderator_fallback_line
        } else {
            &self.config.prompts.fallback_line
        };

        let content = generate_or_fallback(
            self.generator.as_ref(),
            &system_prompt,
            &turn_prompt,
            &options,
            &self.config.generation.retry,
            fallback,
        )
        .await;
        let is_fallback = content == *fallback;

        self.record_message(&participant.id, &participant.name, role, content.clone());
        self.controller
            .process_message(&mut self.session, participant.id.clone(), role, target)?;

        if role.is_debater() && !is_fallback {
            let result = self
                .analyzer
                .analyze_and_score_arguments(&content, &participant.id)
                .await;
            self.emit_event(DebateEvent::AnalysisReady(result));
        }
        Ok(())
    }

    /// The live user speaks. Returns `false` if the debate should stop.
    async fn user_turn(&mut self, role: Role) -> Result<bool, DebateError> {
        let spec = self.current_spec()?;
        let user_id = self.session.user_id().to_string();
        let prompt = UserPrompt {
            user_id: user_id.clone(),
            role,
            stage: spec.stage,
            stage_name: spec.name.clone(),
            stage_description: spec.description.clone(),
            weak_points: self.weak_points(role),
            opponent_key_points: self.analyzer.key_points().to_vec(),
            my_key_points: self.analyzer.my_key_points().to_vec(),
        };
        self.emit_event(DebateEvent::AwaitingUser(prompt.clone()));

        let input = self.user_input.as_deref().ok_or_else(|| {
            DebateError::ConfigError("no user input source was given".to_string())
        })?;
        let poll = Duration::from_millis(self.config.runtime.cancel_poll_interval_ms);
        let text = {
            let read = input.read_turn(&prompt);
            tokio::pin!(read);
            let mut ticker = tokio::time::interval(poll);
            loop {
                tokio::select! {
                    text = &mut read => break text,
                    _ = ticker.tick() => {
                        if self.cancel.is_cancelled() {
                            return Ok(false);
                        }
                    }
                }
            }
        };
        let Some(text) = text else {
            return Ok(false);
        };
        let text = text.trim().to_string();

        let user_name = self.debate.user_name.clone();
        self.record_message(&user_id, &user_name, role, text.clone());
        self.controller
            .process_message(&mut self.session, user_id.clone(), role, None)?;

        let result = self.analyzer.analyze_user_arguments(&text, &user_id).await;
        self.emit_event(DebateEvent::AnalysisReady(result));
        Ok(true)
    }

    /// Refresh opponents' key points every `key_points_refresh_turns` turns.
    async fn refresh_key_points(&mut self) {
        let every = self.config.runtime.key_points_refresh_turns;
        let turns = self.session.turn_count();
        if every == 0 || turns == 0 || turns % every != 0 {
            return;
        }
        let opponents: &[Role] = match self.session.user_side() {
            Some(side) => side.opponents(),
            None => &Role::DEBATERS,
        };
        let sources: Vec<DebateMessage> = self
            .recent_messages()
            .iter()
            .filter(|m| opponents.contains(&m.role) && !self.session.is_user(&m.speaker_id))
            .cloned()
            .collect();
        if sources.is_empty() {
            return;
        }
        let points = self.analyzer.extract_opponent_key_points(&sources).await;
        if !points.is_empty() {
            self.emit_event(DebateEvent::KeyPointsUpdated(points));
        }
    }

    fn stop(&self, reason: &str) -> Vec<DebateMessage> {
        info!(
            reason,
            stage = %self.session.stage(),
            turns = self.session.turn_count(),
            "debate stopped"
        );
        self.emit_event(DebateEvent::Cancelled);
        self.transcript.clone()
    }

    fn announce(&mut self, stage: Stage) {
        if stage == Stage::Completed || self.announced == Some(stage) {
            return;
        }
        self.announced = Some(stage);
        if let Some(spec) = self.controller.pipeline().spec(stage) {
            self.emit_event(DebateEvent::StageStart {
                stage,
                name: spec.name.clone(),
                description: spec.description.clone(),
            });
        }
    }

    fn current_spec(&self) -> Result<StageSpec, DebateError> {
        let stage = self.session.stage();
        self.controller
            .pipeline()
            .spec(stage)
            .cloned()
            .ok_or(DebateError::StageNotInPipeline(stage))
    }

    fn record_message(
        &mut self,
        speaker_id: &str,
        speaker_name: &str,
        role: Role,
        content: String,
    ) {
        self.emit_event(DebateEvent::SpeakerMessage {
            name: speaker_name.to_string(),
            content: content.clone(),
        });
        self.transcript.push(DebateMessage {
            stage: self.session.stage(),
            speaker_id: speaker_id.to_string(),
            speaker_name: speaker_name.to_string(),
            role,
            content,
        });
    }

    fn name_of(&self, id: &str) -> String {
        if self.session.is_user(id) {
            return self.debate.user_name.clone();
        }
        self.participants
            .iter()
            .find(|p| p.id == id)
            .map(|p| p.name.clone())
            .unwrap_or_else(|| id.to_string())
    }

    fn recent_messages(&self) -> &[DebateMessage] {
        let window = self.config.runtime.recent_message_window;
        &self.transcript[self.transcript.len().saturating_sub(window)..]
    }

    fn system_prompt(&self, participant: &Participant) -> String {
        let persona = participant.persona.as_deref().unwrap_or_default();
        if participant.role == Role::Moderator {
            let mut seats: Vec<String> = self
                .participants
                .iter()
                .filter(|p| p.role != Role::Moderator)
                .map(Participant::display_name_with_role)
                .collect();
            if let Some(side) = self.session.user_side() {
                seats.push(format!("{} ({})", self.debate.user_name, side.display_name()));
            }
            let seats = seats.join(", ");
            render(&self.config.prompts.moderator_template, &[
                ("name", participant.name.as_str()),
                ("persona", persona),
                ("topic", self.debate.topic.as_str()),
                ("context", self.debate.context.as_str()),
                ("participants", seats.as_str()),
            ])
        } else {
            render(&self.config.prompts.speaker_template, &[
                ("name", participant.name.as_str()),
                ("persona", persona),
                ("role", participant.role.display_name()),
                ("topic", self.debate.topic.as_str()),
                ("context", self.debate.context.as_str()),
            ])
        }
    }

    fn turn_prompt(&self, spec: &StageSpec, role: Role, target_name: Option<&str>) -> String {
        let transcript = format_transcript(self.recent_messages());
        let mut brief = String::new();
        if role.is_debater() {
            let weak_points = self.weak_points(role);
            if !weak_points.is_empty() {
                brief.push_str("Weak points in your opponents' case:\n");
                for point in &weak_points {
                    brief.push_str(&format!("- {}\n", point));
                }
                brief.push('\n');
            }
        }
        let target = target_name
            .map(|name| format!("Direct your questions at {}.\n\n", name))
            .unwrap_or_default();
        render(&self.config.prompts.turn_template, &[
            ("stage_name", spec.name.as_str()),
            ("stage_description", spec.description.as_str()),
            ("transcript", transcript.as_str()),
            ("attack_brief", brief.as_str()),
            ("target", target.as_str()),
        ])
    }

    /// Summary lines of the most vulnerable stored arguments of `role`'s
    /// opponents.
    fn weak_points(&self, role: Role) -> Vec<String> {
        let opponents = self.session.roster().members_of(role.opponents());
        self.analyzer
            .vulnerable_arguments_of(&opponents, ATTACK_BRIEF_SIZE)
            .into_iter()
            .map(|(owner, scored)| {
                format!(
                    "{} ({}, vulnerability {:.2})",
                    scored.argument.summary_line(),
                    self.name_of(owner),
                    scored.vulnerability_rank
                )
            })
            .collect()
    }

    /// Emit an event if a callback is registered.
    fn emit_event(&self, event: DebateEvent) {
        if let Some(ref callback) = self.callback {
            callback(event);
        }
    }

    /// Get the full transcript.
    pub fn transcript(&self) -> &[DebateMessage] {
        &self.transcript
    }

    /// Get participants.
    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    pub fn session(&self) -> &DebateSession {
        &self.session
    }

    pub fn analyzer(&self) -> &OpponentAnalyzer {
        &self.analyzer
    }
}

fn format_transcript(messages: &[DebateMessage]) -> String {
    if messages.is_empty() {
        return "(nothing has been said yet)".to_string();
    }
    messages
        .iter()
        .map(|m| format!("{}: {}", m.speaker_name, m.content))
        .collect::<Vec<_>>()
        .join("\n")
}
