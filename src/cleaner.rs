use serde::Deserialize;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{info, warn};

/// Default local Ollama endpoint
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Substitution point the prompt template is expected to contain
const TRANSCRIPT_PLACEHOLDER: &str = "{{transcript}}";

/// A completed cleanup pass with the time it took
#[derive(Debug, Clone, PartialEq)]
pub struct Cleaned {
    /// Cleaned text, trimmed; may legitimately be empty
    pub text: String,
    /// Seconds the LLM call took
    pub seconds: f64,
}

/// Errors from the LLM cleanup call
#[derive(Debug, Error)]
pub enum CleanupError {
    /// HTTP request to the Ollama server failed
    #[error("ollama request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Server responded with a non-success status
    #[error("ollama returned status {0}")]
    Status(reqwest::StatusCode),
}

/// Render the prompt template with the transcript substituted.
///
/// A template with no substitution point is accepted verbatim (the
/// transcript is simply omitted), with a warning.
#[must_use]
pub fn render_prompt(template: &str, transcript: &str) -> String {
    if !template.contains(TRANSCRIPT_PLACEHOLDER) {
        warn!("prompt template has no {{{{transcript}}}} placeholder; sending it verbatim");
        return template.to_owned();
    }
    template.replace(TRANSCRIPT_PLACEHOLDER, transcript)
}

/// LLM cleanup client talking to a local Ollama server
pub struct OllamaCleaner {
    base_url: String,
}

impl Default for OllamaCleaner {
    fn default() -> Self {
        Self::new()
    }
}

impl OllamaCleaner {
    /// Client against the default local endpoint
    #[must_use]
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_OLLAMA_URL.to_owned())
    }

    /// Client against an explicit endpoint (used by tests)
    #[must_use]
    pub fn with_base_url(base_url: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
        }
    }

    /// Whether the Ollama server answers on its tags endpoint
    #[must_use]
    pub fn is_running(&self) -> bool {
        let Ok(client) = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
        else {
            return false;
        };
        client
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .is_ok_and(|resp| resp.status().is_success())
    }

    /// Names of models available on the server
    ///
    /// # Errors
    /// Returns error if the server is unreachable or the response is malformed.
    pub fn list_models(&self) -> Result<Vec<String>, CleanupError> {
        #[derive(Deserialize)]
        struct TagsResponse {
            models: Vec<ModelInfo>,
        }
        #[derive(Deserialize)]
        struct ModelInfo {
            name: String,
        }

        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;
        let response = client
            .get(format!("{}/api/tags", self.base_url))
            .send()?;
        if !response.status().is_success() {
            return Err(CleanupError::Status(response.status()));
        }
        let tags: TagsResponse = response.json()?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    /// Run the cleanup pass over a transcript.
    ///
    /// # Errors
    /// Returns error if the generate call fails; callers fall back to the raw
    /// transcript.
    pub fn clean(
        &self,
        transcript: &str,
        prompt_template: &str,
        model: &str,
    ) -> Result<Cleaned, CleanupError> {
        #[derive(Deserialize)]
        struct GenerateResponse {
            response: String,
        }

        let prompt = render_prompt(prompt_template, transcript);
        let body = serde_json::json!({
            "model": model,
            "prompt": prompt,
            "stream": false,
        });

        let client = reqwest::blocking::Client::new();
        let start = Instant::now();
        let response = client
            .post(format!("{}/api/generate", self.base_url))
            .json(&body)
            .send()?;
        if !response.status().is_success() {
            return Err(CleanupError::Status(response.status()));
        }
        let generated: GenerateResponse = response.json()?;
        let seconds = start.elapsed().as_secs_f64();

        info!(seconds, model, "cleanup completed");
        Ok(Cleaned {
            text: generated.response.trim().to_owned(),
            seconds,
        })
    }
}

impl crate::pipeline::CleanupStage for OllamaCleaner {
    fn is_running(&self) -> bool {
        Self::is_running(self)
    }

    fn clean(
        &self,
        transcript: &str,
        prompt_template: &str,
        model: &str,
    ) -> Result<Cleaned, CleanupError> {
        Self::clean(self, transcript, prompt_template, model)
    }
}
