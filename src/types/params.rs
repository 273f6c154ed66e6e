//! Completion parameters shared by every language-model invocation.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Generation parameters for a completion call.
///
/// Defaults follow the engine contract: `top_p = 1.0`, `max_tokens = 8192`,
/// `frequency_penalty = 1.0`, `temperature = 0.9`, JSON formatting and
/// streaming off, thinking allowed, no stop words.
///
/// # Example
///
/// ```rust
/// use tasktree::types::CompletionConfig;
///
/// let config = CompletionConfig::builder()
///     .temperature(0.2)
///     .unwrap()
///     .max_tokens(1024)
///     .stream(true)
///     .build();
/// assert!(config.stream);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompletionConfig {
    /// Nucleus sampling parameter.
    pub top_p: f32,
    /// Maximum tokens in the response.
    pub max_tokens: u32,
    /// Frequency penalty to reduce repetitiveness.
    pub frequency_penalty: f32,
    /// Sampling temperature.
    pub temperature: f32,
    /// Whether to force a JSON-formatted response.
    pub format_json: bool,
    /// Whether the model may emit thinking content.
    pub allow_thinking: bool,
    /// Sequences that stop generation.
    pub stop_words: Vec<String>,
    /// Whether to stream the response.
    pub stream: bool,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            top_p: 1.0,
            max_tokens: 8192,
            frequency_penalty: 1.0,
            temperature: 0.9,
            format_json: false,
            allow_thinking: true,
            stop_words: Vec::new(),
            stream: false,
        }
    }
}

impl CompletionConfig {
    /// Create a builder.
    pub fn builder() -> CompletionConfigBuilder {
        CompletionConfigBuilder::default()
    }

    /// Validate parameter ranges.
    pub fn validate(&self) -> EngineResult<()> {
        if !(0.0..=1.0).contains(&self.top_p) {
            return Err(EngineError::InvalidParameter(
                "top_p must be between 0.0 and 1.0".to_string(),
            ));
        }
        if self.temperature < 0.0 {
            return Err(EngineError::InvalidParameter(
                "temperature must be non-negative".to_string(),
            ));
        }
        if self.max_tokens == 0 {
            return Err(EngineError::InvalidParameter(
                "max_tokens must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Replace the stop words in place.
    pub fn set_stop_words<I, S>(&mut self, words: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stop_words = words.into_iter().map(Into::into).collect();
    }
}

/// Builder for [`CompletionConfig`] with validated setters.
#[derive(Debug, Clone, Default)]
pub struct CompletionConfigBuilder {
    config: Option<CompletionConfig>,
}

impl CompletionConfigBuilder {
    fn config(&mut self) -> &mut CompletionConfig {
        self.config.get_or_insert_with(CompletionConfig::default)
    }

    /// Set the temperature with validation.
    pub fn temperature(mut self, temperature: f32) -> EngineResult<Self> {
        if !(0.0..=2.0).contains(&temperature) {
            return Err(EngineError::InvalidParameter(
                "temperature must be between 0.0 and 2.0".to_string(),
            ));
        }
        self.config().temperature = temperature;
        Ok(self)
    }

    /// Set the top_p with validation.
    pub fn top_p(mut self, top_p: f32) -> EngineResult<Self> {
        if !(0.0..=1.0).contains(&top_p) {
            return Err(EngineError::InvalidParameter(
                "top_p must be between 0.0 and 1.0".to_string(),
            ));
        }
        self.config().top_p = top_p;
        Ok(self)
    }

    /// Set the maximum response tokens.
    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.config().max_tokens = max_tokens;
        self
    }

    /// Set the frequency penalty.
    pub fn frequency_penalty(mut self, frequency_penalty: f32) -> Self {
        self.config().frequency_penalty = frequency_penalty;
        self
    }

    /// Force JSON output.
    pub fn format_json(mut self, format_json: bool) -> Self {
        self.config().format_json = format_json;
        self
    }

    /// Allow or forbid thinking content.
    pub fn allow_thinking(mut self, allow_thinking: bool) -> Self {
        self.config().allow_thinking = allow_thinking;
        self
    }

    /// Set stop words.
    pub fn stop_words<I, S>(mut self, words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config().stop_words = words.into_iter().map(Into::into).collect();
        self
    }

    /// Enable streaming.
    pub fn stream(mut self, stream: bool) -> Self {
        self.config().stream = stream;
        self
    }

    /// Build the config.
    pub fn build(self) -> CompletionConfig {
        self.config.unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CompletionConfig::default();
        assert_eq!(config.top_p, 1.0);
        assert_eq!(config.max_tokens, 8192);
        assert_eq!(config.temperature, 0.9);
        assert!(config.allow_thinking);
        assert!(!config.stream);
        assert!(config.stop_words.is_empty());
    }

    #[test]
    fn test_builder_validation() {
        assert!(CompletionConfig::builder().temperature(3.0).is_err());
        assert!(CompletionConfig::builder().top_p(1.5).is_err());
        let config = CompletionConfig::builder()
            .temperature(0.5)
            .unwrap()
            .stop_words(["</finish>"])
            .build();
        assert_eq!(config.temperature, 0.5);
        assert_eq!(config.stop_words, vec!["</finish>".to_string()]);
    }

    #[test]
    fn test_validate_rejects_zero_max_tokens() {
        let config = CompletionConfig {
            max_tokens: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
