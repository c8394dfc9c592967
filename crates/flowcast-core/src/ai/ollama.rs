//! Thin HTTP client for Ollama's generate API. Prompts ask for rigidly
//! shaped single-line or short-paragraph answers so parsing stays dumb.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

use super::{AiBackend, TransactionClassification};

/// Ollama backend
#[derive(Clone)]
pub struct OllamaBackend {
    http_client: Client,
    base_url: String,
    model: String,
}

impl OllamaBackend {
    pub fn new(base_url: &str, model: &str) -> Self {
        Self {
            http_client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        }
    }

    /// Create from `FLOWCAST_AI_HOST` / `FLOWCAST_AI_MODEL`, `None` when
    /// no host is configured
    pub fn from_env() -> Option<Self> {
        let host = std::env::var("FLOWCAST_AI_HOST").ok()?;
        let model =
            std::env::var("FLOWCAST_AI_MODEL").unwrap_or_else(|_| "llama3.2".to_string());
        Some(Self::new(&host, &model))
    }

    async fn generate(&self, prompt: String) -> Result<String> {
        let request = OllamaRequest {
            model: self.model.clone(),
            prompt,
            stream: false,
        };

        let response = self
            .http_client
            .post(format!("{}/api/generate", self.base_url))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::Http(response.error_for_status().unwrap_err()));
        }

        let body: OllamaResponse = response.json().await?;
        debug!(model = %self.model, "ollama response: {}", body.response);
        Ok(body.response)
    }
}

/// Request to the Ollama generate API
#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    prompt: String,
    stream: bool,
}

/// Response from the Ollama generate API
#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
}

#[async_trait]
impl AiBackend for OllamaBackend {
    async fn classify_transaction(&self, description: &str) -> Result<TransactionClassification> {
        let prompt = format!(
            "You clean up bank transaction descriptors.\n\
             Descriptor: \"{description}\"\n\
             Reply with exactly one line in the form NAME|CATEGORY where NAME is the \
             merchant's clean human-readable name and CATEGORY is one word like \
             Groceries, Dining, Transport, Subscriptions, Utilities, Shopping, or Other.\n\
             No explanation, no quotes."
        );
        let response = self.generate(prompt).await?;
        parse_classification(&response)
    }

    async fn explain_forecast_errors(
        &self,
        mean_error_percent: f64,
        direction_accuracy: f64,
        days_compared: i64,
        largest_misses: &[(String, f64)],
    ) -> Result<String> {
        let misses = largest_misses
            .iter()
            .map(|(date, err)| format!("{date}: predicted {err:+.2} off"))
            .collect::<Vec<_>>()
            .join("; ");
        let prompt = format!(
            "A cash-flow forecaster was graded against {days_compared} days of real \
             balances. Mean error {mean_error_percent:.1}%, direction accuracy \
             {:.0}%. Largest misses: {misses}.\n\
             In 2-3 plain sentences, suggest the most likely cause (e.g. an \
             undetected recurring charge, a changed paycheck, one-off spending) \
             and what the user could check. No preamble.",
            direction_accuracy * 100.0
        );
        let response = self.generate(prompt).await?;
        Ok(response.trim().to_string())
    }

    async fn health_check(&self) -> bool {
        match self
            .http_client
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn host(&self) -> &str {
        &self.base_url
    }
}

/// Parse a `NAME|CATEGORY` reply, tolerating stray whitespace and the
/// model ignoring the no-quotes instruction
fn parse_classification(response: &str) -> Result<TransactionClassification> {
    let line = response
        .lines()
        .map(str::trim)
        .find(|l| l.contains('|'))
        .ok_or_else(|| {
            Error::Import(format!("Unparseable classification reply: {response:?}"))
        })?;

    let (name, category) = line.split_once('|').unwrap_or((line, "Other"));
    let clean = |s: &str| s.trim().trim_matches('"').trim().to_string();
    let display_name = clean(name);
    if display_name.is_empty() {
        return Err(Error::Import(format!(
            "Empty merchant name in classification reply: {response:?}"
        )));
    }
    let category = match clean(category) {
        c if c.is_empty() => "Other".to_string(),
        c => c,
    };
    Ok(TransactionClassification {
        display_name,
        category,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_classification_plain() {
        let c = parse_classification("Netflix|Subscriptions").unwrap();
        assert_eq!(c.display_name, "Netflix");
        assert_eq!(c.category, "Subscriptions");
    }

    #[test]
    fn test_parse_classification_tolerates_noise() {
        let c = parse_classification("Sure!\n \"Whole Foods\" | Groceries \n").unwrap();
        assert_eq!(c.display_name, "Whole Foods");
        assert_eq!(c.category, "Groceries");
    }

    #[test]
    fn test_parse_classification_rejects_garbage() {
        assert!(parse_classification("I cannot help with that").is_err());
    }
}
