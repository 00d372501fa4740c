//! Opponent analysis.
//!
//! [`OpponentAnalyzer`] runs extraction and scoring per speaker and keeps the
//! running store of opponents' scored arguments and distilled key points.
//! Nothing here raises: degraded analysis comes back as a result value so the
//! turn driver can carry on with a less sharp turn.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::argument::{Argument, ArgumentExtractor};
use crate::config::{AnalysisSettings, PromptsConfig, render};
use crate::generation::{GenerationOptions, TextGenerator};
use crate::json::{decode_json_payload, into_list, snippet, string_field};
use crate::participant::ParticipantId;
use crate::scoring::{ScoredArgument, VulnerabilityScorer};
use crate::session::DebateMessage;

/// Scored arguments and key points gathered about opponents.
#[derive(Debug, Clone, Default, Serialize)]
pub struct OpponentStore {
    pub arguments: BTreeMap<ParticipantId, Vec<ScoredArgument>>,
    pub key_points: Vec<String>,
    /// Messages seen per speaker in the last key-point extraction.
    pub speaker_details: BTreeMap<ParticipantId, usize>,
}

/// Outcome of analysing one utterance.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AnalysisResult {
    pub speaker_id: ParticipantId,
    pub total_arguments: usize,
    /// The most vulnerable arguments, most vulnerable first.
    pub top_arguments: Vec<ScoredArgument>,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AnalysisResult {
    fn failed(speaker_id: &str, error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            speaker_id: speaker_id.to_string(),
            total_arguments: 0,
            top_arguments: Vec::new(),
            summary: format!("Analysis unavailable: {}", error),
            error: Some(error),
        }
    }

    fn empty(speaker_id: &str, summary: impl Into<String>) -> Self {
        Self {
            speaker_id: speaker_id.to_string(),
            total_arguments: 0,
            top_arguments: Vec::new(),
            summary: summary.into(),
            error: None,
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Runs the extraction and scoring pipeline and owns the [`OpponentStore`].
pub struct OpponentAnalyzer {
    extractor: ArgumentExtractor,
    scorer: VulnerabilityScorer,
    generator: Arc<dyn TextGenerator>,
    key_points_instruction: String,
    options: GenerationOptions,
    settings: AnalysisSettings,
    store: OpponentStore,
    my_key_points: Vec<String>,
}

impl OpponentAnalyzer {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        prompts: &PromptsConfig,
        settings: AnalysisSettings,
        options: GenerationOptions,
    ) -> Self {
        Self {
            extractor: ArgumentExtractor::new(
                generator.clone(),
                prompts.extraction_instruction.clone(),
                options.clone(),
            ),
            scorer: VulnerabilityScorer::new(
                generator.clone(),
                prompts.scoring_instruction.clone(),
                options.clone(),
                settings.weights,
            ),
            generator,
            key_points_instruction: prompts.key_points_instruction.clone(),
            options,
            settings,
            store: OpponentStore::default(),
            my_key_points: Vec::new(),
        }
    }

    pub fn store(&self) -> &OpponentStore {
        &self.store
    }

    pub fn key_points(&self) -> &[String] {
        &self.store.key_points
    }

    pub fn my_key_points(&self) -> &[String] {
        &self.my_key_points
    }

    /// Extract, score and store an opponent's arguments; return the most
    /// vulnerable ones.
    pub async fn analyze_and_score_arguments(
        &mut self,
        utterance: &str,
        speaker_id: &str,
    ) -> AnalysisResult {
        if utterance.trim().is_empty() {
            warn!(speaker = speaker_id, "cannot analyse an empty utterance");
            return AnalysisResult::failed(speaker_id, "empty utterance");
        }
        let arguments = self
            .extractor
            .extract(utterance, self.settings.max_arguments)
            .await;
        self.score_and_store(utterance, speaker_id, arguments).await
    }

    /// Like [`Self::analyze_and_score_arguments`], but for user turns: input
    /// without arguments is a normal outcome, not an error.
    pub async fn analyze_user_arguments(
        &mut self,
        utterance: &str,
        speaker_id: &str,
    ) -> AnalysisResult {
        if utterance.trim().is_empty() {
            return AnalysisResult::empty(speaker_id, "No input to analyse.");
        }
        let arguments = self
            .extractor
            .extract_from_user_input(utterance, speaker_id, self.settings.max_arguments)
            .await;
        if arguments.is_empty() {
            return AnalysisResult::empty(
                speaker_id,
                "No distinct arguments could be identified in the input.",
            );
        }
        self.score_and_store(utterance, speaker_id, arguments).await
    }

    async fn score_and_store(
        &mut self,
        utterance: &str,
        speaker_id: &str,
        arguments: Vec<Argument>,
    ) -> AnalysisResult {
        let mut scored = Vec::with_capacity(arguments.len());
        for argument in arguments {
            scored.push(self.scorer.score_argument(argument, utterance).await);
        }
        scored.sort_by(|a, b| b.vulnerability_rank.total_cmp(&a.vulnerability_rank));

        let total_arguments = scored.len();
        let top_arguments: Vec<ScoredArgument> = scored
            .iter()
            .take(self.settings.top_arguments)
            .cloned()
            .collect();
        let stored = self.store.arguments.entry(speaker_id.to_string()).or_default();
        stored.extend(scored);
        let cap = self.settings.max_stored_arguments;
        if cap > 0 && stored.len() > cap {
            stored.drain(..stored.len() - cap);
        }

        let summary = match top_arguments.first() {
            Some(top) => format!(
                "{} argument(s) from {}; most vulnerable: \"{}\" ({:.2})",
                total_arguments,
                speaker_id,
                snippet(&top.argument.claim, 120),
                top.vulnerability_rank
            ),
            None => format!("No arguments from {}", speaker_id),
        };
        debug!(speaker = speaker_id, total_arguments, summary = %summary, "arguments scored");

        AnalysisResult {
            speaker_id: speaker_id.to_string(),
            total_arguments,
            top_arguments,
            summary,
            error: None,
        }
    }

    /// Distil 4 to `max_key_points` key points from opponents' messages.
    ///
    /// Returns an empty list (and keeps the previous key points) when the
    /// response cannot be used.
    pub async fn extract_opponent_key_points(&mut self, messages: &[DebateMessage]) -> Vec<String> {
        let mut grouped: Vec<(&str, &str, Vec<&str>)> = Vec::new();
        for message in messages.iter().filter(|m| !m.content.trim().is_empty()) {
            match grouped.iter_mut().find(|(id, _, _)| *id == message.speaker_id) {
                Some((_, _, contents)) => contents.push(message.content.as_str()),
                None => grouped.push((
                    message.speaker_id.as_str(),
                    message.speaker_name.as_str(),
                    vec![message.content.as_str()],
                )),
            }
        }
        if grouped.is_empty() {
            return Vec::new();
        }

        self.store.speaker_details = grouped
            .iter()
            .map(|(id, _, contents)| (id.to_string(), contents.len()))
            .collect();

        let user_prompt = grouped
            .iter()
            .map(|(id, name, contents)| {
                let lines: Vec<String> = contents.iter().map(|c| format!("- {}", c)).collect();
                format!("Speaker: {} ({})\n{}", name, id, lines.join("\n"))
            })
            .collect::<Vec<_>>()
            .join("\n\n");
        let max_key_points = self.settings.max_key_points.to_string();
        let system_prompt = render(
            &self.key_points_instruction,
            &[("max_key_points", max_key_points.as_str())],
        );

        let raw = match self
            .generator
            .generate(&system_prompt, &user_prompt, &self.options)
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, speakers = grouped.len(), "key point extraction call failed");
                return Vec::new();
            }
        };
        let points = parse_key_points(&raw, self.settings.max_key_points);
        if points.is_empty() {
            warn!(raw = %snippet(&raw, 200), "key point extraction returned no usable points");
            return Vec::new();
        }
        self.store.key_points = points.clone();
        points
    }

    /// Forget one speaker's arguments, or everything when `speaker_id` is
    /// `None`.
    pub fn clear(&mut self, speaker_id: Option<&str>) {
        match speaker_id {
            Some(id) => {
                self.store.arguments.remove(id);
                self.store.speaker_details.remove(id);
            }
            None => {
                self.store = OpponentStore::default();
                self.my_key_points.clear();
            }
        }
    }

    /// Normalise core arguments given either as `{"argument": ...}` objects or
    /// as plain strings, and keep them as this side's key points.
    pub fn update_my_key_points_from_core_arguments(
        &mut self,
        core_arguments: &[Value],
    ) -> Vec<String> {
        self.my_key_points = core_arguments
            .iter()
            .filter_map(|value| match value {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Object(obj) => string_field(obj, "argument"),
                _ => None,
            })
            .filter(|s| !s.is_empty())
            .collect();
        self.my_key_points.clone()
    }

    /// The most vulnerable stored arguments of the given speakers, each with
    /// the id of the speaker who made it.
    ///
    /// Arguments with zero vulnerability (including unscored ones) are left
    /// out; they give nothing to attack.
    pub fn vulnerable_arguments_of<'a>(
        &'a self,
        speakers: &'a [ParticipantId],
        limit: usize,
    ) -> Vec<(&'a ParticipantId, &'a ScoredArgument)> {
        let mut found: Vec<(&ParticipantId, &ScoredArgument)> = speakers
            .iter()
            .filter_map(|id| self.store.arguments.get(id).map(|arguments| (id, arguments)))
            .flat_map(|(id, arguments)| arguments.iter().map(move |a| (id, a)))
            .filter(|(_, a)| a.vulnerability_rank > 0.0)
            .collect();
        found.sort_by(|(_, a), (_, b)| b.vulnerability_rank.total_cmp(&a.vulnerability_rank));
        found.truncate(limit);
        found
    }
}

/// Decode key points: strings, or objects with a `point` (or `key_point`)
/// field. At most `max` are kept.
fn parse_key_points(raw: &str, max: usize) -> Vec<String> {
    let Some(value) = decode_json_payload(raw) else {
        return Vec::new();
    };
    into_list(value)
        .iter()
        .filter_map(|item| match item {
            Value::String(s) => Some(s.trim().to_string()),
            Value::Object(obj) => {
                string_field(obj, "point").or_else(|| string_field(obj, "key_point"))
            }
            _ => None,
        })
        .filter(|s| !s.is_empty())
        .take(max)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::testing::ScriptedGenerator;
    use crate::participant::Role;
    use crate::stage::Stage;
    use serde_json::json;

    const EXTRACT_MARKER: &str = "Extract at most";
    const KEY_POINTS_MARKER: &str = "key points";

    const ARGUMENTS: &str = r#"[
        {"claim": "Strong claim", "evidence": "data"},
        {"claim": "Weak claim"},
        {"claim": "Middling claim"}
    ]"#;

    fn analyzer(generator: Arc<ScriptedGenerator>) -> OpponentAnalyzer {
        OpponentAnalyzer::new(
            generator,
            &PromptsConfig::default(),
            AnalysisSettings::default(),
            GenerationOptions::default(),
        )
    }

    fn message(speaker: &str, content: &str) -> DebateMessage {
        DebateMessage {
            stage: Stage::Discussion,
            speaker_id: speaker.to_string(),
            speaker_name: speaker.to_uppercase(),
            role: Role::Con,
            content: content.to_string(),
        }
    }

    /// Scores come from the script in call order: one per extracted argument.
    fn scoring_generator(scores: &[f64]) -> ScriptedGenerator {
        let script = scores
            .iter()
            .map(|s| {
                Ok(format!(
                    r#"{{"logical_strength": {s}, "evidence_quality": {s}, "relevance": {s}}}"#
                ))
            })
            .collect();
        ScriptedGenerator::new(script).route(EXTRACT_MARKER, ARGUMENTS)
    }

    #[tokio::test]
    async fn test_analysis_sorts_by_vulnerability_and_stores() {
        let generator = Arc::new(scoring_generator(&[0.9, 0.1, 0.5]));
        let mut analyzer = analyzer(generator.clone());
        let result = analyzer
            .analyze_and_score_arguments("Some speech", "camus")
            .await;

        assert!(!result.is_error());
        assert_eq!(result.total_arguments, 3);
        let claims: Vec<&str> = result
            .top_arguments
            .iter()
            .map(|a| a.argument.claim.as_str())
            .collect();
        assert_eq!(claims, vec!["Weak claim", "Middling claim", "Strong claim"]);
        assert_eq!(analyzer.store().arguments["camus"].len(), 3);
        // One extraction call plus one scoring call per argument.
        assert_eq!(generator.calls(), 4);
    }

    #[tokio::test]
    async fn test_top_arguments_are_capped() {
        let generator = Arc::new(scoring_generator(&[0.9, 0.1, 0.5]));
        let mut analyzer = OpponentAnalyzer::new(
            generator,
            &PromptsConfig::default(),
            AnalysisSettings {
                top_arguments: 1,
                ..AnalysisSettings::default()
            },
            GenerationOptions::default(),
        );
        let result = analyzer.analyze_and_score_arguments("speech", "camus").await;
        assert_eq!(result.total_arguments, 3);
        assert_eq!(result.top_arguments.len(), 1);
        assert_eq!(result.top_arguments[0].argument.claim, "Weak claim");
    }

    #[tokio::test]
    async fn test_stored_arguments_drop_oldest_past_cap() {
        let generator = Arc::new(scoring_generator(&[0.9, 0.1, 0.5, 0.2, 0.8, 0.3]));
        let mut analyzer = OpponentAnalyzer::new(
            generator,
            &PromptsConfig::default(),
            AnalysisSettings {
                max_stored_arguments: 4,
                ..AnalysisSettings::default()
            },
            GenerationOptions::default(),
        );
        analyzer.analyze_and_score_arguments("first speech", "camus").await;
        let second = analyzer
            .analyze_and_score_arguments("second speech", "camus")
            .await;

        let stored = &analyzer.store().arguments["camus"];
        assert_eq!(stored.len(), 4);
        // The least vulnerable argument of the first speech survives.
        assert_eq!(stored[0].argument.claim, "Strong claim");
        let newest: Vec<&str> = stored[1..].iter().map(|a| a.argument.claim.as_str()).collect();
        let expected: Vec<&str> = second
            .top_arguments
            .iter()
            .map(|a| a.argument.claim.as_str())
            .collect();
        assert_eq!(newest, expected);
    }

    #[tokio::test]
    async fn test_empty_utterance_is_an_error_result() {
        let generator = Arc::new(ScriptedGenerator::failing());
        let mut analyzer = analyzer(generator.clone());
        let result = analyzer.analyze_and_score_arguments("   ", "camus").await;
        assert!(result.is_error());
        assert_eq!(result.total_arguments, 0);
        assert_eq!(generator.calls(), 0);
    }

    #[tokio::test]
    async fn test_service_failure_still_stores_fallback() {
        let generator = Arc::new(ScriptedGenerator::failing());
        let mut analyzer = analyzer(generator);
        let result = analyzer
            .analyze_and_score_arguments("Existence precedes essence.", "sartre")
            .await;
        assert!(!result.is_error());
        assert_eq!(result.total_arguments, 1);
        assert!(result.top_arguments[0].argument.is_fallback());
        assert_eq!(result.top_arguments[0].vulnerability_rank, 0.0);
    }

    #[tokio::test]
    async fn test_scenario_d_empty_user_input_skips_scoring() {
        let generator = Arc::new(ScriptedGenerator::replying(ARGUMENTS));
        let mut analyzer = analyzer(generator.clone());
        let result = analyzer.analyze_user_arguments("", "User").await;
        assert_eq!(result.total_arguments, 0);
        assert!(!result.is_error());
        assert!(!result.summary.is_empty());
        assert_eq!(generator.calls(), 0);
    }

    #[tokio::test]
    async fn test_user_input_without_arguments_is_not_an_error() {
        let generator = Arc::new(ScriptedGenerator::replying("nothing structured"));
        let mut analyzer = analyzer(generator.clone());
        let result = analyzer.analyze_user_arguments("hmm", "User").await;
        assert_eq!(result.total_arguments, 0);
        assert!(!result.is_error());
        // Extraction only; the scorer is never called.
        assert_eq!(generator.calls(), 1);
        assert!(analyzer.store().arguments.get("User").is_none());
    }

    #[tokio::test]
    async fn test_user_arguments_are_tagged_and_stored() {
        let generator = Arc::new(scoring_generator(&[0.3, 0.3, 0.3]));
        let mut analyzer = analyzer(generator);
        let result = analyzer
            .analyze_user_arguments("I think lying is sometimes right", "User")
            .await;
        assert_eq!(result.total_arguments, 3);
        assert!(result.top_arguments.iter().all(|a| a.argument.argument_id.is_some()));
        assert_eq!(analyzer.store().arguments["User"].len(), 3);
    }

    #[tokio::test]
    async fn test_key_points_grouped_and_capped() {
        let generator = Arc::new(ScriptedGenerator::new(vec![]).route(
            KEY_POINTS_MARKER,
            r#"["a", {"point": "b"}, "c", "d", "e", "f", "g", "h", 3]"#,
        ));
        let mut analyzer = analyzer(generator.clone());
        let messages = vec![
            message("camus", "Revolt gives life its value."),
            message("sartre", "We are condemned to be free."),
            message("camus", "One must imagine Sisyphus happy."),
            message("sartre", "  "),
        ];
        let points = analyzer.extract_opponent_key_points(&messages).await;

        assert_eq!(points, vec!["a", "b", "c", "d", "e", "f", "g"]);
        assert_eq!(analyzer.key_points(), points.as_slice());
        assert_eq!(analyzer.store().speaker_details["camus"], 2);
        assert_eq!(analyzer.store().speaker_details["sartre"], 1);

        let prompt = &generator.user_prompts()[0];
        let camus = prompt.find("Speaker: CAMUS").unwrap();
        let sartre = prompt.find("Speaker: SARTRE").unwrap();
        assert!(camus < sartre);
        assert!(prompt.contains("- One must imagine Sisyphus happy."));
    }

    #[tokio::test]
    async fn test_key_points_parse_failure_is_empty() {
        let generator = Arc::new(ScriptedGenerator::replying("I could not do that."));
        let mut analyzer = analyzer(generator);
        let points = analyzer
            .extract_opponent_key_points(&[message("camus", "text")])
            .await;
        assert!(points.is_empty());
        assert!(analyzer.key_points().is_empty());
    }

    #[tokio::test]
    async fn test_key_points_without_messages_makes_no_call() {
        let generator = Arc::new(ScriptedGenerator::replying("[\"a\"]"));
        let mut analyzer = analyzer(generator.clone());
        assert!(analyzer.extract_opponent_key_points(&[]).await.is_empty());
        assert_eq!(generator.calls(), 0);
    }

    #[tokio::test]
    async fn test_clear_is_idempotent() {
        let generator = Arc::new(scoring_generator(&[0.5, 0.5, 0.5, 0.5, 0.5, 0.5]));
        let mut analyzer = analyzer(generator);
        analyzer.analyze_and_score_arguments("speech", "alice").await;
        analyzer.analyze_and_score_arguments("speech", "bob").await;

        analyzer.clear(Some("alice"));
        assert!(!analyzer.store().arguments.contains_key("alice"));
        analyzer.clear(Some("alice"));
        assert!(!analyzer.store().arguments.contains_key("alice"));
        assert!(analyzer.store().arguments.contains_key("bob"));

        analyzer.clear(None);
        assert!(analyzer.store().arguments.is_empty());
        analyzer.clear(None);
        assert!(analyzer.store().arguments.is_empty());
    }

    #[test]
    fn test_core_arguments_normalised() {
        let mut analyzer = analyzer(Arc::new(ScriptedGenerator::failing()));
        let core = vec![
            json!({"argument": "The categorical imperative binds all"}),
            json!("Persons are ends in themselves"),
            json!({"other": "ignored"}),
            json!(7),
            json!("  "),
        ];
        let points = analyzer.update_my_key_points_from_core_arguments(&core);
        assert_eq!(
            points,
            vec![
                "The categorical imperative binds all",
                "Persons are ends in themselves"
            ]
        );
        assert_eq!(analyzer.my_key_points(), points.as_slice());
    }

    #[tokio::test]
    async fn test_vulnerable_arguments_across_speakers() {
        let generator = Arc::new(scoring_generator(&[0.9, 0.1, 0.5, 0.8, 0.2, 1.0]));
        let mut analyzer = analyzer(generator);
        analyzer.analyze_and_score_arguments("speech", "camus").await;
        analyzer.analyze_and_score_arguments("speech", "sartre").await;

        let speakers = ["camus".to_string(), "sartre".to_string()];
        let top = analyzer.vulnerable_arguments_of(&speakers, 2);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].0, "camus");
        assert_eq!(top[1].0, "sartre");
        assert!((top[0].1.vulnerability_rank - 0.9).abs() < 1e-9);
        assert!((top[1].1.vulnerability_rank - 0.8).abs() < 1e-9);

        // sartre's third argument scored 1.0 strength: nothing to attack.
        let sartre = ["sartre".to_string()];
        assert_eq!(analyzer.vulnerable_arguments_of(&sartre, 10).len(), 2);
        let nobody = ["nobody".to_string()];
        assert!(analyzer.vulnerable_arguments_of(&nobody, 10).is_empty());
    }
}
