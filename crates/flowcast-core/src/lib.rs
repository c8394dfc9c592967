//! Flowcast Core Library
//!
//! Shared functionality for the Flowcast cash-flow tool:
//! - Encrypted database access and migrations
//! - CSV import with content-hash deduplication
//! - Merchant name normalization
//! - Recurring pattern detection and the suggestion review queue
//! - Per-merchant baselines and anomaly scanning
//! - Day-by-day cash-flow forecasting with balance alerts
//! - A learning loop that grades old forecasts and tunes spending estimates
//! - User-defined category rules
//! - Pluggable local AI backends (Ollama, mock)

pub mod ai;
pub mod anomaly;
pub mod db;
pub mod detect;
pub mod error;
pub mod forecast;
pub mod ingest;
pub mod learning;
pub mod merchant;
pub mod models;
pub mod pipeline;
pub mod review;
pub mod rules;

pub use ai::{AiBackend, AiClient, MockBackend, OllamaBackend, TransactionClassification};
pub use anomaly::AnomalyConfig;
pub use db::{ConfirmOutcome, Database, DenyOutcome, FeedOptions, ImportResult, PatternUpdate};
pub use detect::{DetectedPattern, DetectorConfig};
pub use error::{Error, Result};
pub use forecast::ForecastConfig;
pub use learning::{LearnSummary, LearningConfig, LearningLoop};
pub use pipeline::{DetectionOutcome, ScanOutcome, UserLocks};
pub use review::BulkOutcome;
