//! Configuration module for loading TOML config files.
//!
//! Every section falls back to its defaults, so a config file only needs to
//! name the values it changes.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::DebateError;
use crate::generation::RetryPolicy;
use crate::scoring::ScoringWeights;
use crate::session::DEFAULT_USER_ID;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub debate: DebateSettings,
    pub generation: GenerationSettings,
    pub analysis: AnalysisSettings,
    pub runtime: RuntimeSettings,
    pub prompts: PromptsConfig,
}

/// Debate format selection and its parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DebateSettings {
    pub format: String,
    /// Total turn count at which the classic discussion stage ends.
    pub discussion_turns: usize,
    /// Turns in the extended cross-examination stage.
    pub cross_examination_turns: usize,
    /// Synthetic id of the live user.
    pub user_id: String,
}

impl Default for DebateSettings {
    fn default() -> Self {
        Self {
            format: "classic".to_string(),
            discussion_turns: 12,
            cross_examination_turns: 4,
            user_id: DEFAULT_USER_ID.to_string(),
        }
    }
}

/// Text generation service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Temperature for extraction, scoring and key-point calls.
    pub analysis_temperature: f32,
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub retry: RetryPolicy,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            max_tokens: 400,
            temperature: 0.7,
            analysis_temperature: 0.2,
            request_timeout_secs: 120,
            connect_timeout_secs: 30,
            retry: RetryPolicy::default(),
        }
    }
}

/// Argument analysis settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisSettings {
    pub max_arguments: usize,
    /// How many of the most vulnerable arguments an analysis returns.
    pub top_arguments: usize,
    pub max_key_points: usize,
    /// Scored arguments kept per speaker; the oldest are dropped first.
    /// Zero keeps everything.
    pub max_stored_arguments: usize,
    pub weights: ScoringWeights,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            max_arguments: 3,
            top_arguments: 3,
            max_key_points: 7,
            max_stored_arguments: 30,
            weights: ScoringWeights::default(),
        }
    }
}

/// Turn-driver cadence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    /// How often the cancellation flag is checked while waiting for the user.
    pub cancel_poll_interval_ms: u64,
    /// Refresh opponent key points every this many turns. Zero disables it.
    pub key_points_refresh_turns: usize,
    /// How many recent transcript messages feed prompts and key points.
    pub recent_message_window: usize,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            cancel_poll_interval_ms: 1000,
            key_points_refresh_turns: 4,
            recent_message_window: 8,
        }
    }
}

/// Prompt templates. Placeholders are written as `{name}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptsConfig {
    /// System prompt for debaters: `{name}`, `{persona}`, `{role}`, `{topic}`,
    /// `{context}`.
    pub speaker_template: String,
    /// System prompt for the moderator: `{name}`, `{persona}`, `{topic}`,
    /// `{context}`, `{participants}`.
    pub moderator_template: String,
    /// Per-turn prompt: `{stage_name}`, `{stage_description}`, `{transcript}`,
    /// `{attack_brief}`, `{target}`.
    pub turn_template: String,
    /// Extraction instruction: `{max_arguments}`.
    pub extraction_instruction: String,
    pub scoring_instruction: String,
    /// Key-point instruction: `{max_key_points}`.
    pub key_points_instruction: String,
    /// Spoken when a debater's generation fails after all retries.
    pub fallback_line: String,
    /// Spoken when the moderator's generation fails after all retries.
    pub moderator_fallback_line: String,
}

impl Default for PromptsConfig {
    fn default() -> Self {
        Self {
            speaker_template: DEFAULT_SPEAKER_TEMPLATE.to_string(),
            moderator_template: DEFAULT_MODERATOR_TEMPLATE.to_string(),
            turn_template: DEFAULT_TURN_TEMPLATE.to_string(),
            extraction_instruction: DEFAULT_EXTRACTION_INSTRUCTION.to_string(),
            scoring_instruction: DEFAULT_SCORING_INSTRUCTION.to_string(),
            key_points_instruction: DEFAULT_KEY_POINTS_INSTRUCTION.to_string(),
            fallback_line: "I will let my previous remarks stand for now.".to_string(),
            moderator_fallback_line:
                "Thank you. Let us continue with the next part of the debate.".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, DebateError> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| DebateError::ConfigError(format!("Failed to read config: {}", e)))?;

        Self::from_str(&content)
    }

    /// Load configuration from string content.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, DebateError> {
        let config: Config = toml::from_str(content)
            .map_err(|e| DebateError::ConfigError(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would stall or break the engine.
    pub fn validate(&self) -> Result<(), DebateError> {
        if self.generation.retry.max_attempts == 0 {
            return Err(DebateError::ConfigError(
                "generation.retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.runtime.cancel_poll_interval_ms == 0 {
            return Err(DebateError::ConfigError(
                "runtime.cancel_poll_interval_ms must be positive".to_string(),
            ));
        }
        if self.analysis.max_arguments == 0 {
            return Err(DebateError::ConfigError(
                "analysis.max_arguments must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Default configuration embedded in the binary.
pub fn default_config() -> Config {
    Config::default()
}

/// Replace `{key}` placeholders in a template.
pub fn render(template: &str, values: &[(&str, &str)]) -> String {
    values.iter().fold(template.to_string(), |acc, (key, value)| {
        acc.replace(&format!("{{{}}}", key), value)
    })
}

const DEFAULT_SPEAKER_TEMPLATE: &str = r#"You are {name} taking part in a structured philosophical debate.

{persona}

DEBATE TOPIC: {topic}
CONTEXT: {context}

YOUR POSITION: You argue the {role} side.

DEBATE RULES:
- Argue from your own philosophical commitments and vocabulary
- Engage the specific claims other participants have made
- When weaknesses in an opponent's case are listed, press on them directly
- Keep each turn focused; one or two strong points beat many weak ones
- Do NOT acknowledge being an AI - stay fully in character

CRITICAL OUTPUT RULES:
- Output ONLY your spoken words - no stage directions or narration
- Do NOT include asterisks or any markdown formatting
"#;

const DEFAULT_MODERATOR_TEMPLATE: &str = r#"You are {name}, the moderator of a structured philosophical debate.

{persona}

DEBATE TOPIC: {topic}
CONTEXT: {context}
PARTICIPANTS: {participants}

Your job is to open each phase, keep the exchange fair and summarise positions
without taking a side. Output ONLY your spoken words, with no markdown.
"#;

const DEFAULT_TURN_TEMPLATE: &str = r#"[{stage_name} - {stage_description}]

Recent exchange:
{transcript}

{attack_brief}{target}Please give your contribution for this stage."#;

const DEFAULT_EXTRACTION_INSTRUCTION: &str = r#"You analyse debate utterances. Extract at most {max_arguments} distinct arguments from the text.
Respond with ONLY a JSON array, no prose, where each element is:
{"claim": string, "evidence": string, "reasoning": string, "assumptions": [string], "argument_type": string}
argument_type is one of: logical, empirical, ethical, emotional, authority."#;

const DEFAULT_SCORING_INSTRUCTION: &str = r#"You assess the strength of a single debate argument.
Respond with ONLY a JSON object:
{"logical_strength": number, "evidence_quality": number, "relevance": number, "rationale": string}
Each number is between 0 and 1, where 1 is strongest."#;

const DEFAULT_KEY_POINTS_INSTRUCTION: &str = r#"You summarise the positions of debate participants.
Produce between 4 and {max_key_points} key points that blend the themes the speakers share
with the claims unique to each speaker. Attribute unique claims to their speaker.
Respond with ONLY a JSON array of strings."#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = default_config();
        assert_eq!(config.debate.format, "classic");
        assert_eq!(config.debate.user_id, "User");
        assert_eq!(config.generation.retry.max_attempts, 3);
        assert_eq!(config.analysis.top_arguments, 3);
        assert_eq!(config.analysis.max_stored_arguments, 30);
        assert_eq!(config.runtime.cancel_poll_interval_ms, 1000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config = Config::from_str(
            r#"
[debate]
format = "extended"
cross_examination_turns = 6

[analysis.weights]
logical = 0.5
"#,
        )
        .unwrap();
        assert_eq!(config.debate.format, "extended");
        assert_eq!(config.debate.cross_examination_turns, 6);
        assert_eq!(config.debate.discussion_turns, 12);
        assert_eq!(config.analysis.weights.logical, 0.5);
        assert_eq!(config.analysis.weights.evidence, 0.4);
        assert_eq!(config.generation.model, "gpt-4o-mini");
        assert!(config.prompts.speaker_template.contains("{topic}"));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let err = Config::from_str("[generation.retry]\nmax_attempts = 0\n").unwrap_err();
        assert!(matches!(err, DebateError::ConfigError(_)));
        assert!(Config::from_str("[runtime]\ncancel_poll_interval_ms = 0\n").is_err());
        assert!(Config::from_str("debate = 3").is_err());
    }

    #[test]
    fn test_config_round_trips_through_toml() {
        let config = default_config();
        let text = toml::to_string(&config).unwrap();
        let parsed = Config::from_str(&text).unwrap();
        assert_eq!(parsed.debate.discussion_turns, config.debate.discussion_turns);
        assert_eq!(parsed.prompts.fallback_line, config.prompts.fallback_line);
    }

    #[test]
    fn test_render_placeholders() {
        let text = render("{name} argues {role} on {topic}.", &[
            ("name", "Kant"),
            ("role", "PRO"),
            ("topic", "lying"),
        ]);
        assert_eq!(text, "Kant argues PRO on lying.");
        assert_eq!(render("{unknown}", &[("name", "x")]), "{unknown}");
    }
}
