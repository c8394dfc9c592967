//! Optional local-LLM integration behind a swappable backend trait.
//!
//! AI is strictly optional: everything deterministic (detection, anomaly
//! scanning, forecasting, accuracy math) works without it. A configured
//! backend adds transaction classification for uncategorized imports and
//! qualitative forecast-error commentary in the learning loop.
//!
//! Configured through the environment:
//! - `FLOWCAST_AI_BACKEND`: `ollama` (default) or `mock`
//! - `FLOWCAST_AI_HOST`: Ollama server URL; unset disables AI entirely
//! - `FLOWCAST_AI_MODEL`: model name (default: llama3.2)

mod mock;
mod ollama;

pub use mock::MockBackend;
pub use ollama::OllamaBackend;

use async_trait::async_trait;

use crate::error::Result;

/// A transaction classified by the backend
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionClassification {
    /// Clean human-readable merchant name
    pub display_name: String,
    /// Suggested spending category
    pub category: String,
}

/// Interface all AI backends implement
#[async_trait]
pub trait AiBackend: Send + Sync {
    /// Clean up a raw bank descriptor and suggest a category
    async fn classify_transaction(&self, description: &str) -> Result<TransactionClassification>;

    /// One-paragraph commentary on why recent forecasts missed
    ///
    /// `largest_misses` pairs a date with the signed prediction error
    /// (predicted minus actual) for the worst days in the window.
    async fn explain_forecast_errors(
        &self,
        mean_error_percent: f64,
        direction_accuracy: f64,
        days_compared: i64,
        largest_misses: &[(String, f64)],
    ) -> Result<String>;

    /// Whether the backend is reachable
    async fn health_check(&self) -> bool;

    /// Model name, for logging
    fn model(&self) -> &str;

    /// Host URL, for logging
    fn host(&self) -> &str;
}

/// Enum wrapper so callers get a cloneable client without trait objects.
#[derive(Clone)]
pub enum AiClient {
    Ollama(OllamaBackend),
    Mock(MockBackend),
}

impl AiClient {
    /// Build a client from environment variables, `None` when no backend
    /// is configured
    pub fn from_env() -> Option<Self> {
        let backend =
            std::env::var("FLOWCAST_AI_BACKEND").unwrap_or_else(|_| "ollama".to_string());
        match backend.to_lowercase().as_str() {
            "mock" => Some(AiClient::Mock(MockBackend::new())),
            "ollama" => OllamaBackend::from_env().map(AiClient::Ollama),
            other => {
                tracing::warn!(backend = %other, "Unknown FLOWCAST_AI_BACKEND, trying ollama");
                OllamaBackend::from_env().map(AiClient::Ollama)
            }
        }
    }

    /// Ollama client for an explicit host and model
    pub fn ollama(host: &str, model: &str) -> Self {
        AiClient::Ollama(OllamaBackend::new(host, model))
    }

    /// Mock client for tests
    pub fn mock() -> Self {
        AiClient::Mock(MockBackend::new())
    }
}

#[async_trait]
impl AiBackend for AiClient {
    async fn classify_transaction(&self, description: &str) -> Result<TransactionClassification> {
        match self {
            AiClient::Ollama(b) => b.classify_transaction(description).await,
            AiClient::Mock(b) => b.classify_transaction(description).await,
        }
    }

    async fn explain_forecast_errors(
        &self,
        mean_error_percent: f64,
        direction_accuracy: f64,
        days_compared: i64,
        largest_misses: &[(String, f64)],
    ) -> Result<String> {
        match self {
            AiClient::Ollama(b) => {
                b.explain_forecast_errors(
                    mean_error_percent,
                    direction_accuracy,
                    days_compared,
                    largest_misses,
                )
                .await
            }
            AiClient::Mock(b) => {
                b.explain_forecast_errors(
                    mean_error_percent,
                    direction_accuracy,
                    days_compared,
                    largest_misses,
                )
                .await
            }
        }
    }

    async fn health_check(&self) -> bool {
        match self {
            AiClient::Ollama(b) => b.health_check().await,
            AiClient::Mock(b) => b.health_check().await,
        }
    }

    fn model(&self) -> &str {
        match self {
            AiClient::Ollama(b) => b.model(),
            AiClient::Mock(b) => b.model(),
        }
    }

    fn host(&self) -> &str {
        match self {
            AiClient::Ollama(b) => b.host(),
            AiClient::Mock(b) => b.host(),
        }
    }
}
