//! Vulnerability scoring.
//!
//! An argument is rated on logical strength, evidence quality and relevance.
//! The aggregate vulnerability is a weighted mean of the inverted ratings,
//! so weakening any dimension can only raise it.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::argument::Argument;
use crate::generation::{GenerationOptions, TextGenerator};
use crate::json::{decode_json_payload, number_field, snippet, string_field};

pub const LOGICAL_STRENGTH: &str = "logical_strength";
pub const EVIDENCE_QUALITY: &str = "evidence_quality";
pub const RELEVANCE: &str = "relevance";

/// Rating used for a dimension the scorer left out when others were given.
const NEUTRAL_RATING: f64 = 0.5;

/// Weights of the three inverted ratings in the aggregate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScoringWeights {
    pub logical: f64,
    pub evidence: f64,
    pub relevance: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            logical: 0.4,
            evidence: 0.4,
            relevance: 0.2,
        }
    }
}

impl ScoringWeights {
    /// Weighted mean of `1 - logical_strength`, `1 - evidence_quality` and
    /// `1 - relevance`. Negative weights count as zero; all-zero weights give 0.
    pub fn combine(&self, logical_strength: f64, evidence_quality: f64, relevance: f64) -> f64 {
        let weights = [
            self.logical.max(0.0),
            self.evidence.max(0.0),
            self.relevance.max(0.0),
        ];
        let total: f64 = weights.iter().sum();
        if !total.is_finite() || total <= 0.0 {
            return 0.0;
        }
        let inverted = [
            1.0 - unit(logical_strength).unwrap_or(1.0),
            1.0 - unit(evidence_quality).unwrap_or(1.0),
            1.0 - unit(relevance).unwrap_or(1.0),
        ];
        let weighted: f64 = weights.iter().zip(inverted).map(|(w, x)| w * x).sum();
        (weighted / total).clamp(0.0, 1.0)
    }
}

/// Clamp a finite rating into [0, 1].
fn unit(value: f64) -> Option<f64> {
    value.is_finite().then(|| value.clamp(0.0, 1.0))
}

/// Ratings of one argument.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoreReport {
    pub logical_strength: f64,
    pub evidence_quality: f64,
    pub relevance: f64,
    pub final_vulnerability: f64,
    /// False when the ratings could not be obtained.
    pub scored: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
}

impl ScoreReport {
    pub fn new(
        logical_strength: f64,
        evidence_quality: f64,
        relevance: f64,
        weights: &ScoringWeights,
    ) -> Self {
        let logical_strength = unit(logical_strength).unwrap_or(NEUTRAL_RATING);
        let evidence_quality = unit(evidence_quality).unwrap_or(NEUTRAL_RATING);
        let relevance = unit(relevance).unwrap_or(NEUTRAL_RATING);
        Self {
            logical_strength,
            evidence_quality,
            relevance,
            final_vulnerability: weights.combine(logical_strength, evidence_quality, relevance),
            scored: true,
            rationale: None,
        }
    }

    /// Report for an argument that could not be scored: treated as not
    /// exploitable.
    pub fn unscored() -> Self {
        Self {
            logical_strength: 1.0,
            evidence_quality: 1.0,
            relevance: 1.0,
            final_vulnerability: 0.0,
            scored: false,
            rationale: None,
        }
    }

    /// Sub-scores keyed by dimension name.
    pub fn dimensions(&self) -> BTreeMap<String, f64> {
        BTreeMap::from([
            (LOGICAL_STRENGTH.to_string(), self.logical_strength),
            (EVIDENCE_QUALITY.to_string(), self.evidence_quality),
            (RELEVANCE.to_string(), self.relevance),
        ])
    }
}

/// An argument with its ratings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoredArgument {
    pub argument: Argument,
    pub scores: BTreeMap<String, f64>,
    /// Higher is more attackable.
    pub vulnerability_rank: f64,
}

impl ScoredArgument {
    pub fn new(argument: Argument, report: &ScoreReport) -> Self {
        Self {
            argument,
            scores: report.dimensions(),
            vulnerability_rank: report.final_vulnerability,
        }
    }
}

/// Decode a scoring response. `None` if no rating can be read.
pub fn parse_score_report(raw: &str, weights: &ScoringWeights) -> Option<ScoreReport> {
    let value = decode_json_payload(raw)?;
    let obj = value.as_object()?;
    let logical = number_field(obj, LOGICAL_STRENGTH).and_then(unit);
    let evidence = number_field(obj, EVIDENCE_QUALITY).and_then(unit);
    let relevance = number_field(obj, RELEVANCE).and_then(unit);
    if logical.is_none() && evidence.is_none() && relevance.is_none() {
        return None;
    }
    let mut report = ScoreReport::new(
        logical.unwrap_or(NEUTRAL_RATING),
        evidence.unwrap_or(NEUTRAL_RATING),
        relevance.unwrap_or(NEUTRAL_RATING),
        weights,
    );
    report.rationale = string_field(obj, "rationale");
    Some(report)
}

/// Rates arguments through the text generator.
#[derive(Clone)]
pub struct VulnerabilityScorer {
    generator: Arc<dyn TextGenerator>,
    instruction: String,
    options: GenerationOptions,
    weights: ScoringWeights,
}

impl VulnerabilityScorer {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        instruction: impl Into<String>,
        options: GenerationOptions,
        weights: ScoringWeights,
    ) -> Self {
        Self {
            generator,
            instruction: instruction.into(),
            options,
            weights,
        }
    }

    pub fn weights(&self) -> &ScoringWeights {
        &self.weights
    }

    /// Rate one argument. Any failure yields [`ScoreReport::unscored`].
    pub async fn score(&self, argument: &Argument, source_utterance: &str) -> ScoreReport {
        let user_prompt = format!(
            "Claim: {}\nEvidence: {}\nReasoning: {}\nAssumptions: {}\n\n\
             Original statement:\n\"\"\"\n{}\n\"\"\"",
            argument.claim,
            argument.evidence,
            argument.reasoning,
            if argument.assumptions.is_empty() {
                "none stated".to_string()
            } else {
                argument.assumptions.join("; ")
            },
            source_utterance
        );

        let raw = match self
            .generator
            .generate(&self.instruction, &user_prompt, &self.options)
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, claim = %snippet(&argument.claim, 200), "scoring call failed");
                return ScoreReport::unscored();
            }
        };

        match parse_score_report(&raw, &self.weights) {
            Some(report) => {
                debug!(
                    claim = %snippet(&argument.claim, 80),
                    vulnerability = report.final_vulnerability,
                    "argument scored"
                );
                report
            }
            None => {
                warn!(raw = %snippet(&raw, 200), "scoring returned no usable ratings");
                ScoreReport::unscored()
            }
        }
    }

    /// Rate an argument and attach the ratings to it.
    pub async fn score_argument(
        &self,
        argument: Argument,
        source_utterance: &str,
    ) -> ScoredArgument {
        let report = self.score(&argument, source_utterance).await;
        ScoredArgument::new(argument, &report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PromptsConfig;
    use crate::generation::testing::ScriptedGenerator;

    fn scorer(generator: ScriptedGenerator) -> VulnerabilityScorer {
        VulnerabilityScorer::new(
            Arc::new(generator),
            PromptsConfig::default().scoring_instruction,
            GenerationOptions::default(),
            ScoringWeights::default(),
        )
    }

    #[test]
    fn test_combine_extremes() {
        let weights = ScoringWeights::default();
        assert_eq!(weights.combine(1.0, 1.0, 1.0), 0.0);
        assert!((weights.combine(0.0, 0.0, 0.0) - 1.0).abs() < 1e-9);
        assert!((weights.combine(0.0, 1.0, 1.0) - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_combine_is_monotonic_in_each_dimension() {
        let weights = ScoringWeights {
            logical: 0.5,
            evidence: 0.3,
            relevance: 0.2,
        };
        let steps: Vec<f64> = (0..=10).map(|i| i as f64 / 10.0).collect();
        for &a in &steps {
            for &b in &steps {
                for pair in steps.windows(2) {
                    let (lower, higher) = (pair[0], pair[1]);
                    // Decreasing a strength never decreases vulnerability.
                    assert!(weights.combine(lower, a, b) >= weights.combine(higher, a, b));
                    assert!(weights.combine(a, lower, b) >= weights.combine(a, higher, b));
                    assert!(weights.combine(a, b, lower) >= weights.combine(a, b, higher));
                }
            }
        }
    }

    #[test]
    fn test_combine_degenerate_weights() {
        let zero = ScoringWeights {
            logical: 0.0,
            evidence: 0.0,
            relevance: 0.0,
        };
        assert_eq!(zero.combine(0.0, 0.0, 0.0), 0.0);
        let negative = ScoringWeights {
            logical: -1.0,
            evidence: 1.0,
            relevance: 0.0,
        };
        assert!((negative.combine(0.0, 0.5, 0.0) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_report_clamps_out_of_range_values() {
        let report = ScoreReport::new(1.7, -0.3, f64::NAN, &ScoringWeights::default());
        for value in [
            report.logical_strength,
            report.evidence_quality,
            report.relevance,
            report.final_vulnerability,
        ] {
            assert!((0.0..=1.0).contains(&value));
        }
        assert_eq!(report.logical_strength, 1.0);
        assert_eq!(report.evidence_quality, 0.0);
        assert_eq!(report.relevance, NEUTRAL_RATING);
    }

    #[tokio::test]
    async fn test_score_parses_ratings() {
        let generator = ScriptedGenerator::replying(
            r#"```json
{"logical_strength": 0.2, "evidence_quality": "0.1", "relevance": 0.9, "rationale": "Assertion without support"}
```"#,
        );
        let report = scorer(generator)
            .score(&Argument::new("All is will"), "All is will.")
            .await;
        assert!(report.scored);
        assert_eq!(report.evidence_quality, 0.1);
        assert_eq!(report.rationale.as_deref(), Some("Assertion without support"));
        let expected = ScoringWeights::default().combine(0.2, 0.1, 0.9);
        assert!((report.final_vulnerability - expected).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_missing_dimension_uses_neutral_rating() {
        let generator = ScriptedGenerator::replying(r#"{"logical_strength": 0.0}"#);
        let report = scorer(generator).score(&Argument::new("c"), "c").await;
        assert!(report.scored);
        assert_eq!(report.evidence_quality, NEUTRAL_RATING);
        assert_eq!(report.relevance, NEUTRAL_RATING);
    }

    #[tokio::test]
    async fn test_failures_are_not_exploitable() {
        let failing = scorer(ScriptedGenerator::failing())
            .score(&Argument::new("c"), "c")
            .await;
        assert_eq!(failing, ScoreReport::unscored());
        assert_eq!(failing.final_vulnerability, 0.0);

        let garbage = scorer(ScriptedGenerator::replying("{\"verdict\": \"weak\"}"))
            .score(&Argument::new("c"), "c")
            .await;
        assert!(!garbage.scored);
        assert_eq!(garbage.final_vulnerability, 0.0);
    }

    #[tokio::test]
    async fn test_score_argument_attaches_dimensions() {
        let generator = ScriptedGenerator::replying(
            r#"{"logical_strength": 0.5, "evidence_quality": 0.5, "relevance": 0.5}"#,
        );
        let scored = scorer(generator)
            .score_argument(Argument::new("c"), "c")
            .await;
        assert_eq!(scored.scores.len(), 3);
        assert_eq!(scored.scores[EVIDENCE_QUALITY], 0.5);
        assert!((scored.vulnerability_rank - 0.5).abs() < 1e-9);
    }
}
