//! Canned-answer backend so tests and offline development never need a
//! running LLM server.

use async_trait::async_trait;

use crate::error::Result;

use super::{AiBackend, TransactionClassification};

/// Mock AI backend
#[derive(Clone)]
pub struct MockBackend {
    /// What health_check reports
    pub healthy: bool,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    /// Healthy mock
    pub fn new() -> Self {
        Self { healthy: true }
    }

    /// Mock that reports the backend as down
    pub fn unhealthy() -> Self {
        Self { healthy: false }
    }
}

#[async_trait]
impl AiBackend for MockBackend {
    async fn classify_transaction(&self, description: &str) -> Result<TransactionClassification> {
        let upper = description.to_uppercase();
        let (display_name, category) = if upper.contains("NETFLIX") {
            ("Netflix", "Subscriptions")
        } else if upper.contains("SPOTIFY") {
            ("Spotify", "Subscriptions")
        } else if upper.contains("STARBUCKS") {
            ("Starbucks", "Dining")
        } else if upper.contains("UBER") {
            ("Uber", "Transport")
        } else if upper.contains("SAFEWAY") || upper.contains("WHOLE FOODS") {
            ("Groceries", "Groceries")
        } else {
            ("Unknown Merchant", "Other")
        };
        Ok(TransactionClassification {
            display_name: display_name.to_string(),
            category: category.to_string(),
        })
    }

    async fn explain_forecast_errors(
        &self,
        mean_error_percent: f64,
        _direction_accuracy: f64,
        days_compared: i64,
        _largest_misses: &[(String, f64)],
    ) -> Result<String> {
        Ok(format!(
            "Mock analysis: forecasts were off by {mean_error_percent:.1}% on average \
             across {days_compared} days."
        ))
    }

    async fn health_check(&self) -> bool {
        self.healthy
    }

    fn model(&self) -> &str {
        "mock"
    }

    fn host(&self) -> &str {
        "mock://localhost"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_classification_is_deterministic() {
        let mock = MockBackend::new();
        let a = mock.classify_transaction("NETFLIX.COM 866-579").await.unwrap();
        let b = mock.classify_transaction("NETFLIX.COM 866-579").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.display_name, "Netflix");
    }

    #[tokio::test]
    async fn test_unhealthy_mock() {
        assert!(!MockBackend::unhealthy().health_check().await);
        assert!(MockBackend::new().health_check().await);
    }
}
