//! Text generation service.
//!
//! The engine never writes utterances itself; it asks a [`TextGenerator`].
//! [`OpenAiGenerator`] talks to any OpenAI-compatible endpoint. Failures are
//! ordinary values here: callers either retry through [`generate_with_retry`]
//! or fall back to a typed default.

use std::sync::LazyLock;
use std::time::Duration;

use async_openai::Client;
use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
    ChatCompletionRequestUserMessage, CreateChatCompletionRequestArgs,
};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::GenerationSettings;
use crate::error::GenerationError;
use crate::json::snippet;

/// Per-call generation options. Unset fields use the generator's defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationOptions {
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl GenerationOptions {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// A service that turns a prompt pair into text.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        options: &GenerationOptions,
    ) -> Result<String, GenerationError>;
}

/// Generator backed by an OpenAI-compatible chat completion API.
pub struct OpenAiGenerator {
    client: Client<OpenAIConfig>,
    default_model: String,
    default_max_tokens: u32,
}

impl OpenAiGenerator {
    pub fn new(
        api_base: &str,
        api_key: &str,
        settings: &GenerationSettings,
    ) -> Result<Self, GenerationError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .connect_timeout(Duration::from_secs(settings.connect_timeout_secs))
            .build()?;

        let config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(api_base);

        Ok(Self {
            client: Client::with_config(config).with_http_client(http_client),
            default_model: settings.model.clone(),
            default_max_tokens: settings.max_tokens,
        })
    }
}

#[async_trait]
impl TextGenerator for OpenAiGenerator {
    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        options: &GenerationOptions,
    ) -> Result<String, GenerationError> {
        let messages = vec![
            ChatCompletionRequestMessage::System(ChatCompletionRequestSystemMessage {
                content: system_prompt.to_string().into(),
                name: None,
            }),
            ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
                content: user_prompt.to_string().into(),
                name: None,
            }),
        ];

        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(options.model.as_deref().unwrap_or(&self.default_model))
            .max_completion_tokens(options.max_tokens.unwrap_or(self.default_max_tokens))
            .messages(messages);
        if let Some(temperature) = options.temperature {
            args.temperature(temperature);
        }
        let request = args.build()?;

        let response = self.client.chat().create(request).await?;
        Ok(response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default())
    }
}

/// Bounded retry with backoff for generations that must not come back empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub delay_ms: u64,
    /// Multiplier applied to the delay after each further attempt; 1.0 keeps it fixed.
    pub backoff_factor: f64,
    /// Responses with this many characters or fewer count as empty.
    pub min_chars: usize,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_ms: 2000,
            backoff_factor: 1.0,
            min_chars: 10,
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = self.backoff_factor.max(1.0).powi(attempt.saturating_sub(1) as i32);
        Duration::from_millis((self.delay_ms as f64 * factor) as u64)
    }
}

/// Generate a spoken utterance, retrying errors and empty responses.
///
/// The returned text is already sanitized with [`sanitize_utterance`].
pub async fn generate_with_retry(
    generator: &dyn TextGenerator,
    system_prompt: &str,
    user_prompt: &str,
    options: &GenerationOptions,
    policy: &RetryPolicy,
) -> Result<String, GenerationError> {
    let attempts = policy.max_attempts.max(1);
    let mut last_error = None;

    for attempt in 1..=attempts {
        match generator.generate(system_prompt, user_prompt, options).await {
            Ok(raw) => {
                let cleaned = sanitize_utterance(&raw);
                if cleaned.chars().count() > policy.min_chars {
                    return Ok(cleaned);
                }
                warn!(
                    attempt,
                    max_attempts = attempts,
                    raw = %snippet(&raw, 200),
                    "generation returned too little content"
                );
            }
            Err(e) => {
                warn!(attempt, max_attempts = attempts, error = %e, "generation failed");
                last_error = Some(e);
            }
        }
        if attempt < attempts {
            tokio::time::sleep(policy.delay_after(attempt)).await;
        }
    }

    Err(last_error.unwrap_or(GenerationError::EmptyResponse { attempts }))
}

/// [`generate_with_retry`], replaced by `fallback` once retries are exhausted.
pub async fn generate_or_fallback(
    generator: &dyn TextGenerator,
    system_prompt: &str,
    user_prompt: &str,
    options: &GenerationOptions,
    policy: &RetryPolicy,
    fallback: &str,
) -> String {
    match generate_with_retry(generator, system_prompt, user_prompt, options, policy).await {
        Ok(text) => text,
        Err(e) => {
            warn!(error = %e, "using fallback line after exhausted retries");
            fallback.to_string()
        }
    }
}

/// Known reasoning/internal tags stripped together with their content.
const REASONING_TAGS: [&str; 15] = [
    "thinking",
    "think",
    "reflection",
    "reflect",
    "internal",
    "reasoning",
    "thought",
    "scratch",
    "scratchpad",
    "plan",
    "analysis",
    "analyze",
    "consider",
    "pondering",
    "deliberation",
];

static REASONING_TAG_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    REASONING_TAGS
        .iter()
        .map(|tag| {
            Regex::new(&format!(r"(?is)<{tag}[^>]*>.*?</{tag}>", tag = tag))
                .expect("reasoning tag regex should compile")
        })
        .collect()
});

static ORPHAN_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"</?[\w]+[^>]*>").expect("ORPHAN_TAG_RE regex should compile"));

static WHITESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("WHITESPACE_RE regex should compile"));

/// Sanitize a spoken response by stripping reasoning tokens and XML-like tags.
///
/// Removes patterns like <thinking>...</thinking>, <reflection>...</reflection>, etc.
pub fn sanitize_utterance(response: &str) -> String {
    let mut result = response.to_string();

    for re in REASONING_TAG_RES.iter() {
        result = re.replace_all(&result, "").to_string();
    }

    result = ORPHAN_TAG_RE.replace_all(&result, "").to_string();

    // Remove markdown emphasis markers (asterisks)
    result = result.replace('*', "");

    result = WHITESPACE_RE.replace_all(&result, " ").to_string();

    result.trim().to_string()
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedGenerator;
    use super::*;

    fn instant_policy() -> RetryPolicy {
        RetryPolicy {
            delay_ms: 0,
            ..RetryPolicy::default()
        }
    }

    #[test]
    fn test_sanitize_response_thinking_tags() {
        let input = "<thinking>Let me think about this...</thinking>The answer is 42.";
        assert_eq!(sanitize_utterance(input), "The answer is 42.");
    }

    #[test]
    fn test_sanitize_response_reflection_tags() {
        let input = "Hello <reflection>internal thought</reflection> world!";
        assert_eq!(sanitize_utterance(input), "Hello world!");
    }

    #[test]
    fn test_sanitize_response_no_tags() {
        let input = "No tags here, just text.";
        assert_eq!(sanitize_utterance(input), "No tags here, just text.");
    }

    #[test]
    fn test_sanitize_response_multiline_tags() {
        let input = "<thinking>\nMultiple\nlines\nof\nthought\n</thinking>Final answer here.";
        assert_eq!(sanitize_utterance(input), "Final answer here.");
    }

    #[test]
    fn test_sanitize_response_nested_content() {
        let input = "Start <think>nested <inner>tags</inner> content</think> end";
        let output = sanitize_utterance(input);
        assert!(!output.contains('<'));
        assert!(!output.contains('>'));
    }

    #[test]
    fn test_sanitize_response_emphasis_markers() {
        let input = "The *will to power* is **everything**.";
        assert_eq!(sanitize_utterance(input), "The will to power is everything.");
    }

    #[test]
    fn test_retry_delay_backoff() {
        let policy = RetryPolicy {
            delay_ms: 100,
            backoff_factor: 2.0,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(2), Duration::from_millis(200));
        assert_eq!(policy.delay_after(3), Duration::from_millis(400));
        assert_eq!(
            RetryPolicy::default().delay_after(3),
            Duration::from_millis(2000)
        );
    }

    #[tokio::test]
    async fn test_retry_recovers_after_failures() {
        let generator = ScriptedGenerator::new(vec![
            Err("timeout".to_string()),
            Ok("   ".to_string()),
            Ok("God is dead, and we have killed him.".to_string()),
        ]);
        let text = generate_with_retry(
            &generator,
            "sys",
            "user",
            &GenerationOptions::default(),
            &instant_policy(),
        )
        .await
        .unwrap();
        assert_eq!(text, "God is dead, and we have killed him.");
        assert_eq!(generator.calls(), 3);
    }

    #[tokio::test]
    async fn test_retry_is_bounded() {
        let generator = ScriptedGenerator::failing();
        let err = generate_with_retry(
            &generator,
            "sys",
            "user",
            &GenerationOptions::default(),
            &instant_policy(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, GenerationError::Transient(_)));
        assert_eq!(generator.calls(), 3);
    }

    #[tokio::test]
    async fn test_reasoning_only_response_counts_as_empty() {
        let generator =
            ScriptedGenerator::replying("<thinking>long hidden reasoning here</thinking>");
        let err = generate_with_retry(
            &generator,
            "sys",
            "user",
            &GenerationOptions::default(),
            &instant_policy(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, GenerationError::EmptyResponse { attempts: 3 }));
    }

    #[tokio::test]
    async fn test_fallback_after_exhaustion() {
        let generator = ScriptedGenerator::failing();
        let text = generate_or_fallback(
            &generator,
            "sys",
            "user",
            &GenerationOptions::default(),
            &instant_policy(),
            "Let us move on.",
        )
        .await;
        assert_eq!(text, "Let us move on.");
    }
}
