//! Text and image generation providers.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use domain::ImageArtifact;
use thiserror::Error;

use crate::birthday_card::SPLIT_INSTRUCTION;

/// Failure reported by a generation provider.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    #[error("Generation provider unavailable: {0}")]
    Unavailable(String),

    #[error("Generation provider timed out")]
    Timeout,

    /// The provider refused the prompt. Retrying the same prompt cannot help.
    #[error("Generation rejected: {0}")]
    Rejected(String),
}

impl GenerationError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, GenerationError::Unavailable(_) | GenerationError::Timeout)
    }
}

#[async_trait]
pub trait TextGenerator: Send + Sync + 'static {
    async fn generate_text(&self, prompt: &str) -> Result<String, GenerationError>;
}

#[async_trait]
pub trait ImageGenerator: Send + Sync + 'static {
    async fn generate_image(&self, prompt: &str) -> Result<ImageArtifact, GenerationError>;
}

/// Failure injection shared by the in-memory providers.
#[derive(Debug, Default)]
struct Faults {
    fail_next: u32,
    reject_all: bool,
}

impl Faults {
    fn take(&mut self) -> Option<GenerationError> {
        if self.reject_all {
            return Some(GenerationError::Rejected("content policy".to_string()));
        }
        if self.fail_next > 0 {
            self.fail_next -= 1;
            return Some(GenerationError::Unavailable("injected failure".to_string()));
        }
        None
    }
}

#[derive(Debug, Default)]
struct InMemoryTextState {
    prompts: Vec<String>,
    faults: Faults,
    empty_replies: u32,
}

/// Deterministic text generator.
///
/// Answers the prompt-splitting instruction with JSON and anything else with
/// a short greeting built from the prompt.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTextGenerator {
    state: Arc<Mutex<InMemoryTextState>>,
}

impl InMemoryTextGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, InMemoryTextState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The next `n` calls fail with a transient error.
    pub fn fail_next(&self, n: u32) {
        self.state().faults.fail_next = n;
    }

    /// Every call is refused until switched off.
    pub fn reject_all(&self, reject: bool) {
        self.state().faults.reject_all = reject;
    }

    /// The next `n` calls answer with an empty string.
    pub fn reply_empty_next(&self, n: u32) {
        self.state().empty_replies = n;
    }

    pub fn call_count(&self) -> usize {
        self.state().prompts.len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.state().prompts.clone()
    }
}

#[async_trait]
impl TextGenerator for InMemoryTextGenerator {
    async fn generate_text(&self, prompt: &str) -> Result<String, GenerationError> {
        let mut state = self.state();
        state.prompts.push(prompt.to_string());

        if let Some(err) = state.faults.take() {
            return Err(err);
        }
        if state.empty_replies > 0 {
            state.empty_replies -= 1;
            return Ok(String::new());
        }

        if let Some(request) = prompt.strip_prefix(SPLIT_INSTRUCTION) {
            let request = request.trim();
            return Ok(serde_json::json!({
                "imagePrompt": format!("{request}, festive birthday card illustration"),
                "textPrompt": format!("a warm birthday message about {request}"),
            })
            .to_string());
        }

        Ok(format!("Happy birthday! Wishing you {prompt}."))
    }
}

#[derive(Debug, Default)]
struct InMemoryImageState {
    prompts: Vec<String>,
    faults: Faults,
}

/// Deterministic image generator producing a small SVG.
#[derive(Debug, Clone, Default)]
pub struct InMemoryImageGenerator {
    state: Arc<Mutex<InMemoryImageState>>,
}

impl InMemoryImageGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, InMemoryImageState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn fail_next(&self, n: u32) {
        self.state().faults.fail_next = n;
    }

    pub fn reject_all(&self, reject: bool) {
        self.state().faults.reject_all = reject;
    }

    pub fn call_count(&self) -> usize {
        self.state().prompts.len()
    }
}

#[async_trait]
impl ImageGenerator for InMemoryImageGenerator {
    async fn generate_image(&self, prompt: &str) -> Result<ImageArtifact, GenerationError> {
        let mut state = self.state();
        state.prompts.push(prompt.to_string());

        if let Some(err) = state.faults.take() {
            return Err(err);
        }

        let caption: String = prompt
            .chars()
            .filter(|c| c.is_alphanumeric() || c.is_whitespace() || *c == ',')
            .take(80)
            .collect();
        let svg = format!(
            "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"512\" height=\"512\">\
             <rect width=\"100%\" height=\"100%\" fill=\"#ffe4b5\"/>\
             <text x=\"50%\" y=\"50%\" text-anchor=\"middle\">{caption}</text></svg>"
        );
        Ok(ImageArtifact::from_bytes("image/svg+xml", svg.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn text_generator_answers_split_instruction_with_json() {
        let generator = InMemoryTextGenerator::new();
        let reply = generator
            .generate_text(&format!("{SPLIT_INSTRUCTION}a beach at sunset"))
            .await
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&reply).unwrap();
        assert!(parsed["imagePrompt"].as_str().unwrap().contains("a beach at sunset"));
        assert!(parsed["textPrompt"].as_str().unwrap().contains("a beach at sunset"));
    }

    #[tokio::test]
    async fn injected_failures_are_transient_then_clear() {
        let generator = InMemoryTextGenerator::new();
        generator.fail_next(2);

        for _ in 0..2 {
            let err = generator.generate_text("cake").await.unwrap_err();
            assert!(err.is_retryable());
        }
        assert!(generator.generate_text("cake").await.is_ok());
        assert_eq!(generator.call_count(), 3);
    }

    #[tokio::test]
    async fn rejection_is_not_retryable() {
        let generator = InMemoryImageGenerator::new();
        generator.reject_all(true);
        let err = generator.generate_image("cake").await.unwrap_err();
        assert!(matches!(err, GenerationError::Rejected(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn image_generator_returns_inline_svg() {
        let generator = InMemoryImageGenerator::new();
        let image = generator.generate_image("balloons").await.unwrap();
        assert_eq!(image.media_type(), Some("image/svg+xml"));
        let svg = String::from_utf8(image.decode().unwrap()).unwrap();
        assert!(svg.contains("balloons"));
    }
}
