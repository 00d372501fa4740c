//! Debate format definitions and trait.
//!
//! A format is a recipe for a [`StagePipeline`]. Two are built in: the classic
//! opening/discussion/closing flow and the extended flow with per-side
//! argument stages, summaries, rebuttals and cross-examination.

use crate::config::DebateSettings;
use crate::error::DebateError;
use crate::participant::{Role, Side};
use crate::stage::{CompletionRule, Stage, StagePipeline, StageSpec};

/// Trait for defining debate formats.
///
/// Implement this trait to create custom debate formats like
/// parliamentary debates, Oxford-style debates, etc.
pub trait DebateFormat: Send + Sync {
    /// Returns the name of this debate format.
    fn name(&self) -> &str;

    /// Returns the display name for the format.
    fn display_name(&self) -> &str;

    /// Returns the stage pipeline of the debate.
    fn pipeline(&self) -> Result<StagePipeline, DebateError>;

    /// Minimum number of debaters (pro, con and neutral seats combined).
    fn min_debaters(&self) -> usize {
        2
    }

    /// Maximum number of debaters.
    fn max_debaters(&self) -> usize {
        8
    }
}

/// Opening, free discussion, closing.
#[derive(Debug, Clone)]
pub struct ClassicFormat {
    discussion_turns: usize,
}

impl ClassicFormat {
    /// `discussion_turns` is the total turn count at which discussion ends.
    pub fn new(discussion_turns: usize) -> Self {
        Self {
            discussion_turns: discussion_turns.max(1),
        }
    }
}

impl Default for ClassicFormat {
    fn default() -> Self {
        Self::new(12)
    }
}

impl DebateFormat for ClassicFormat {
    fn name(&self) -> &str {
        "classic"
    }

    fn display_name(&self) -> &str {
        "Classic Debate (Opening, Discussion, Closing)"
    }

    fn pipeline(&self) -> Result<StagePipeline, DebateError> {
        StagePipeline::new(vec![
            StageSpec::new(
                Stage::Opening,
                vec![Role::Moderator],
                CompletionRule::EveryoneOnce,
            )
            .named("Opening", "The moderator introduces the topic and the participants.")
            .with_max_tokens(300),
            StageSpec::new(
                Stage::Discussion,
                vec![Role::Pro, Role::Con, Role::Neutral],
                CompletionRule::TotalTurns(self.discussion_turns),
            )
            .named(
                "Discussion",
                "Participants argue their positions and respond to each other directly.",
            ),
            // Reverse order: the side that argued first speaks last.
            StageSpec::new(
                Stage::Closing,
                vec![Role::Neutral, Role::Con, Role::Pro],
                CompletionRule::EveryoneOnce,
            )
            .named("Closing", "Final remarks and summation of positions.")
            .with_max_tokens(250),
        ])
    }
}

/// Opening, per-side arguments, summary, rebuttal, cross-examination, closing.
#[derive(Debug, Clone)]
pub struct ExtendedFormat {
    cross_examination_turns: usize,
}

impl ExtendedFormat {
    pub fn new(cross_examination_turns: usize) -> Self {
        Self {
            cross_examination_turns: cross_examination_turns.max(1),
        }
    }
}

impl Default for ExtendedFormat {
    fn default() -> Self {
        Self::new(4)
    }
}

impl DebateFormat for ExtendedFormat {
    fn name(&self) -> &str {
        "extended"
    }

    fn display_name(&self) -> &str {
        "Extended Debate (Arguments, Rebuttals, Cross-Examination)"
    }

    fn pipeline(&self) -> Result<StagePipeline, DebateError> {
        StagePipeline::new(vec![
            StageSpec::new(
                Stage::Opening,
                vec![Role::Moderator],
                CompletionRule::EveryoneOnce,
            )
            .named("Opening", "The moderator introduces the topic and the participants.")
            .with_max_tokens(300),
            StageSpec::new(
                Stage::Arguments(Side::Pro),
                vec![Role::Pro],
                CompletionRule::EveryoneOnce,
            )
            .named(
                "Arguments (PRO)",
                "The PRO side presents its core arguments.",
            ),
            StageSpec::new(
                Stage::Arguments(Side::Con),
                vec![Role::Con],
                CompletionRule::EveryoneOnce,
            )
            .named(
                "Arguments (CON)",
                "The CON side presents its core arguments.",
            ),
            StageSpec::new(
                Stage::Summary,
                vec![Role::Moderator],
                CompletionRule::EveryoneOnce,
            )
            .named("Summary", "The moderator summarises both positions.")
            .with_max_tokens(300),
            StageSpec::new(
                Stage::Rebuttal,
                vec![Role::Pro, Role::Con, Role::Neutral],
                CompletionRule::EveryoneOnce,
            )
            .named(
                "Rebuttal",
                "Participants attack the weakest points of the opposing case.",
            ),
            StageSpec::new(
                Stage::RebuttalSummary,
                vec![Role::Moderator],
                CompletionRule::EveryoneOnce,
            )
            .named("Rebuttal Summary", "The moderator summarises the rebuttals.")
            .with_max_tokens(300),
            StageSpec::new(
                Stage::CrossExamination,
                vec![Role::Pro, Role::Con, Role::Neutral],
                CompletionRule::StageTurns(self.cross_examination_turns),
            )
            .named(
                "Cross-Examination",
                "Participants question a chosen opponent directly.",
            )
            .with_max_tokens(350),
            StageSpec::new(
                Stage::ClosingSummary,
                vec![Role::Neutral, Role::Con, Role::Pro, Role::Moderator],
                CompletionRule::EveryoneOnce,
            )
            .named(
                "Closing Summary",
                "Final statements, followed by the moderator's closing summary.",
            )
            .with_max_tokens(250),
        ])
    }
}

/// Get a debate format by name.
pub fn get_format(name: &str, settings: &DebateSettings) -> Option<Box<dyn DebateFormat>> {
    match name.to_lowercase().as_str() {
        "classic" => Some(Box::new(ClassicFormat::new(settings.discussion_turns))),
        "extended" => Some(Box::new(ExtendedFormat::new(
            settings.cross_examination_turns,
        ))),
        _ => None,
    }
}

/// List all available debate format names.
pub fn available_formats() -> Vec<&'static str> {
    vec!["classic", "extended"]
}
