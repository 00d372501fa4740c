//! Argument extraction.
//!
//! Turns a raw utterance into a small set of structured [`Argument`]s by
//! asking the text generator for strict JSON and decoding the answer
//! defensively. Opponent utterances fail closed (one fallback argument);
//! user utterances fail to an empty list.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::render;
use crate::generation::{GenerationOptions, TextGenerator};
use crate::json::{decode_json_payload, into_list, snippet, string_field};

/// Claim used when a decoded argument has none.
pub const UNKNOWN_CLAIM: &str = "Unknown claim";
/// Marker for fields that could not be extracted.
pub const NOT_EXTRACTED: &str = "Not extracted due to parsing error";
/// Default argument type.
pub const DEFAULT_ARGUMENT_TYPE: &str = "logical";
/// Argument type of the fallback argument.
pub const NOT_EXTRACTED_TYPE: &str = "not_extracted";

/// Characters of the utterance kept as the fallback claim.
const FALLBACK_CLAIM_CHARS: usize = 200;

/// Namespace for stable argument ids.
const ARGUMENT_NAMESPACE: Uuid = Uuid::from_u128(0x6a1f_3c2e_8b4d_4e0f_9c77_51d2_a0b3_e6f1);

/// One structured argument. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Argument {
    pub claim: String,
    pub evidence: String,
    pub reasoning: String,
    pub assumptions: Vec<String>,
    pub argument_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub argument_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_text: Option<String>,
}

impl Argument {
    pub fn new(claim: impl Into<String>) -> Self {
        Self {
            claim: claim.into(),
            evidence: String::new(),
            reasoning: String::new(),
            assumptions: Vec::new(),
            argument_type: DEFAULT_ARGUMENT_TYPE.to_string(),
            argument_id: None,
            source_text: None,
        }
    }

    /// The fail-closed stand-in for an utterance that could not be analysed.
    pub fn fallback(utterance: &str) -> Self {
        Self {
            claim: snippet(utterance.trim(), FALLBACK_CLAIM_CHARS),
            evidence: NOT_EXTRACTED.to_string(),
            reasoning: NOT_EXTRACTED.to_string(),
            assumptions: Vec::new(),
            argument_type: NOT_EXTRACTED_TYPE.to_string(),
            argument_id: None,
            source_text: None,
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.argument_type == NOT_EXTRACTED_TYPE
    }

    /// Decode one list element; plain strings become a bare claim.
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) if !s.trim().is_empty() => Some(Self::new(s.trim())),
            Value::Object(obj) => {
                let assumptions = match obj.get("assumptions") {
                    Some(Value::Array(items)) => items
                        .iter()
                        .filter_map(|item| item.as_str())
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect(),
                    Some(Value::String(s)) if !s.trim().is_empty() => vec![s.trim().to_string()],
                    _ => Vec::new(),
                };
                Some(Self {
                    claim: string_field(obj, "claim").unwrap_or_else(|| UNKNOWN_CLAIM.to_string()),
                    evidence: string_field(obj, "evidence").unwrap_or_default(),
                    reasoning: string_field(obj, "reasoning").unwrap_or_default(),
                    assumptions,
                    argument_type: string_field(obj, "argument_type")
                        .map(|t| t.to_lowercase())
                        .unwrap_or_else(|| DEFAULT_ARGUMENT_TYPE.to_string()),
                    argument_id: None,
                    source_text: None,
                })
            }
            _ => None,
        }
    }

    /// One-line rendering for prompts.
    pub fn summary_line(&self) -> String {
        if self.evidence.is_empty() || self.is_fallback() {
            self.claim.clone()
        } else {
            format!("{} (evidence: {})", self.claim, self.evidence)
        }
    }
}

/// Decode a model response into arguments.
///
/// Returns `None` when no JSON value can be found or when it holds no usable
/// argument.
pub fn parse_arguments(raw: &str) -> Option<Vec<Argument>> {
    let arguments: Vec<Argument> = into_list(decode_json_payload(raw)?)
        .iter()
        .filter_map(Argument::from_value)
        .collect();
    if arguments.is_empty() {
        None
    } else {
        Some(arguments)
    }
}

/// Stable id for the `index`-th argument of `speaker_id`'s `text`.
pub fn argument_id(speaker_id: &str, text: &str, index: usize) -> String {
    let name = format!("{}\u{1f}{}\u{1f}{}", speaker_id, index, text);
    Uuid::new_v5(&ARGUMENT_NAMESPACE, name.as_bytes()).to_string()
}

/// Extracts structured arguments from utterances.
#[derive(Clone)]
pub struct ArgumentExtractor {
    generator: Arc<dyn TextGenerator>,
    instruction: String,
    options: GenerationOptions,
}

impl ArgumentExtractor {
    /// `instruction` is the extraction system prompt; `{max_arguments}` is
    /// substituted per call.
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        instruction: impl Into<String>,
        options: GenerationOptions,
    ) -> Self {
        Self {
            generator,
            instruction: instruction.into(),
            options,
        }
    }

    async fn request(&self, utterance: &str, max_arguments: usize) -> Option<Vec<Argument>> {
        let max_arguments = max_arguments.to_string();
        let system_prompt = render(&self.instruction, &[("max_arguments", max_arguments.as_str())]);
        let user_prompt = format!("Text to analyse:\n\"\"\"\n{}\n\"\"\"", utterance);
        let raw = match self
            .generator
            .generate(&system_prompt, &user_prompt, &self.options)
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                warn!(
                    error = %e,
                    utterance = %snippet(utterance, 200),
                    "argument extraction call failed"
                );
                return None;
            }
        };
        let parsed = parse_arguments(&raw);
        if parsed.is_none() {
            warn!(raw = %snippet(&raw, 200), "argument extraction returned no usable JSON");
        }
        parsed
    }

    /// Extract the arguments of an opponent's utterance.
    ///
    /// Never returns an empty list: on any failure the result is exactly one
    /// [`Argument::fallback`].
    pub async fn extract(&self, utterance: &str, max_arguments: usize) -> Vec<Argument> {
        match self.request(utterance, max_arguments).await {
            Some(arguments) => {
                debug!(count = arguments.len(), "arguments extracted");
                arguments
            }
            None => vec![Argument::fallback(utterance)],
        }
    }

    /// Extract the arguments of a user's utterance.
    ///
    /// Results are capped at `max_arguments` and tagged with the source text
    /// and a stable id. Failures yield an empty list.
    pub async fn extract_from_user_input(
        &self,
        utterance: &str,
        speaker_id: &str,
        max_arguments: usize,
    ) -> Vec<Argument> {
        let Some(arguments) = self.request(utterance, max_arguments).await else {
            return Vec::new();
        };
        arguments
            .into_iter()
            .take(max_arguments)
            .enumerate()
            .map(|(index, mut argument)| {
                argument.argument_id = Some(argument_id(speaker_id, utterance, index));
                argument.source_text = Some(utterance.to_string());
                argument
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PromptsConfig;
    use crate::generation::testing::ScriptedGenerator;

    const TWO_ARGUMENTS: &str = r#"[
        {"claim": "Morality is a herd instinct", "evidence": "Genealogy of morals",
         "reasoning": "Values serve the weak", "assumptions": ["Values have origins"],
         "argument_type": "Empirical"},
        {"claim": "Suffering can be affirmed", "evidence": "", "reasoning": "Amor fati"}
    ]"#;

    fn extractor(generator: Arc<ScriptedGenerator>) -> ArgumentExtractor {
        ArgumentExtractor::new(
            generator,
            PromptsConfig::default().extraction_instruction,
            GenerationOptions::default(),
        )
    }

    #[tokio::test]
    async fn test_extract_parses_and_defaults_fields() {
        let generator = Arc::new(ScriptedGenerator::replying(TWO_ARGUMENTS));
        let arguments = extractor(generator).extract("...", 3).await;

        assert_eq!(arguments.len(), 2);
        assert_eq!(arguments[0].claim, "Morality is a herd instinct");
        assert_eq!(arguments[0].argument_type, "empirical");
        assert_eq!(arguments[0].assumptions, vec!["Values have origins"]);
        assert_eq!(arguments[1].argument_type, DEFAULT_ARGUMENT_TYPE);
        assert!(arguments[1].assumptions.is_empty());
        assert!(arguments[1].evidence.is_empty());
    }

    #[tokio::test]
    async fn test_missing_claim_defaults() {
        let generator = Arc::new(ScriptedGenerator::replying(r#"{"evidence": "e"}"#));
        let arguments = extractor(generator).extract("...", 3).await;
        assert_eq!(arguments.len(), 1);
        assert_eq!(arguments[0].claim, UNKNOWN_CLAIM);
        assert_eq!(arguments[0].evidence, "e");
    }

    #[tokio::test]
    async fn test_scenario_b_invalid_json_yields_fallback() {
        let generator = Arc::new(ScriptedGenerator::replying("Invalid JSON"));
        let utterance = "The absurd is born of the confrontation between need and silence.";
        let arguments = extractor(generator).extract(utterance, 3).await;

        assert_eq!(arguments.len(), 1);
        assert_eq!(arguments[0].evidence, "Not extracted due to parsing error");
        assert_eq!(arguments[0].claim, utterance);
        assert!(arguments[0].is_fallback());
    }

    #[tokio::test]
    async fn test_service_failure_yields_fallback_with_truncated_claim() {
        let generator = Arc::new(ScriptedGenerator::failing());
        let utterance = "x".repeat(500);
        let arguments = extractor(generator).extract(&utterance, 3).await;
        assert_eq!(arguments.len(), 1);
        assert_eq!(arguments[0].claim.chars().count(), 200);
        assert_eq!(arguments[0].reasoning, NOT_EXTRACTED);
    }

    #[tokio::test]
    async fn test_fenced_response_matches_unfenced() {
        let fenced = format!("```json\n{}\n```", TWO_ARGUMENTS);
        let plain = extractor(Arc::new(ScriptedGenerator::replying(TWO_ARGUMENTS)))
            .extract("...", 3)
            .await;
        let wrapped = extractor(Arc::new(ScriptedGenerator::replying(fenced)))
            .extract("...", 3)
            .await;
        assert_eq!(plain, wrapped);
    }

    #[tokio::test]
    async fn test_empty_array_fails_closed() {
        let generator = Arc::new(ScriptedGenerator::replying("[]"));
        let arguments = extractor(generator).extract("Something was said.", 3).await;
        assert_eq!(arguments.len(), 1);
        assert!(arguments[0].is_fallback());
    }

    #[tokio::test]
    async fn test_user_input_is_capped_and_tagged() {
        let generator = Arc::new(ScriptedGenerator::replying(TWO_ARGUMENTS));
        let arguments = extractor(generator)
            .extract_from_user_input("my text", "User", 1)
            .await;
        assert_eq!(arguments.len(), 1);
        assert_eq!(arguments[0].source_text.as_deref(), Some("my text"));
        assert_eq!(
            arguments[0].argument_id.as_deref(),
            Some(argument_id("User", "my text", 0).as_str())
        );
    }

    #[tokio::test]
    async fn test_user_input_failure_is_empty() {
        let generator = Arc::new(ScriptedGenerator::replying("no json here"));
        let arguments = extractor(generator)
            .extract_from_user_input("my text", "User", 3)
            .await;
        assert!(arguments.is_empty());
    }

    #[test]
    fn test_argument_ids_are_stable_and_distinct() {
        assert_eq!(argument_id("u", "text", 0), argument_id("u", "text", 0));
        assert_ne!(argument_id("u", "text", 0), argument_id("u", "text", 1));
        assert_ne!(argument_id("u", "text", 0), argument_id("v", "text", 0));
    }

    #[test]
    fn test_string_elements_become_claims() {
        let parsed = parse_arguments(r#"["A bare claim", 42, {"claim": "B"}]"#).unwrap();
        let claims: Vec<&str> = parsed.iter().map(|a| a.claim.as_str()).collect();
        assert_eq!(claims, vec!["A bare claim", "B"]);
    }
}
