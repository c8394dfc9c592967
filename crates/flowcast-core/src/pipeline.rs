//! Orchestration of detection, scanning, and forecasting runs
//!
//! The algorithmic modules ([`crate::detect`], [`crate::anomaly`],
//! [`crate::forecast`]) are pure; this module wires them to storage:
//! fetch the inputs, run the computation, persist the outputs. Concurrent
//! runs for the same user are serialized through [`UserLocks`] so two
//! recalculations cannot race each other's pattern or baseline writes.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};

use chrono::{Duration, Months, NaiveDate, Utc};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info};

use crate::ai::AiClient;
use crate::anomaly::{self, AnomalyConfig};
use crate::db::Database;
use crate::detect::{self, DetectorConfig};
use crate::error::Result;
use crate::forecast::{self, ForecastConfig};
use crate::learning::{LearnSummary, LearningConfig, LearningLoop};
use crate::models::{Confidence, ForecastSnapshot, SaveOutcome};

/// What a detection pass produced
#[derive(Debug, Default, Clone, Copy)]
pub struct DetectionOutcome {
    /// Recurring candidates the detector emitted
    pub detected: usize,
    /// High-confidence candidates written straight to the pattern store
    pub patterns_saved: usize,
    /// Medium/low candidates queued for review
    pub suggestions_queued: usize,
}

/// What an anomaly scan produced
#[derive(Debug, Default, Clone, Copy)]
pub struct ScanOutcome {
    pub baselines: usize,
    pub anomalies_found: usize,
    pub save: SaveOutcome,
}

/// Per-user run serialization.
///
/// Holding a user's lock covers one whole pipeline run; independent users
/// proceed in parallel. Locks are created lazily and never removed, which
/// is fine at personal-finance user counts.
#[derive(Clone, Default)]
pub struct UserLocks {
    inner: Arc<StdMutex<HashMap<i64, Arc<AsyncMutex<()>>>>>,
}

impl UserLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock guarding a user's runs
    pub fn lock_for(&self, user_id: i64) -> Arc<AsyncMutex<()>> {
        let mut map = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        map.entry(user_id).or_default().clone()
    }
}

/// Run recurring detection for a user and persist the results.
///
/// High-confidence detections are upserted as patterns (superseding any
/// pending suggestion for the same series); medium and low confidence go
/// to the review queue. Suppressed merchants and user-modified patterns
/// are left untouched by the store layer.
pub fn run_detection(
    db: &Database,
    user_id: i64,
    today: NaiveDate,
    config: &DetectorConfig,
) -> Result<DetectionOutcome> {
    let since = today - Duration::days(config.lookback_days);
    let transactions = db.fetch_transactions(user_id, since, Default::default())?;
    let suppressed: HashSet<String> = db.get_suppression_list(user_id)?.into_iter().collect();

    let detected = detect::detect_patterns(&transactions, &suppressed, today, config);
    let mut outcome = DetectionOutcome {
        detected: detected.len(),
        ..Default::default()
    };

    for candidate in &detected {
        if candidate.confidence == Confidence::High {
            if db.upsert_detected_pattern(user_id, candidate)?.is_some() {
                outcome.patterns_saved += 1;
                // A pattern promoted by confidence makes its pending
                // suggestion moot.
                db.supersede_pending_suggestion(
                    user_id,
                    &candidate.merchant_key,
                    candidate.is_income,
                )?;
            }
        } else {
            db.upsert_suggestion(user_id, candidate)?;
            outcome.suggestions_queued += 1;
        }
    }

    info!(
        user_id,
        detected = outcome.detected,
        patterns = outcome.patterns_saved,
        suggestions = outcome.suggestions_queued,
        "detection pass complete"
    );
    Ok(outcome)
}

/// Rebuild baselines and scan recent transactions for anomalies.
///
/// Baselines come from the months before the scan window so a fresh
/// outlier cannot soften the very statistics meant to catch it. Saving is
/// deduplicated by the store layer; re-scanning the same week only
/// reports duplicates.
pub fn run_anomaly_scan(
    db: &Database,
    user_id: i64,
    today: NaiveDate,
    config: &AnomalyConfig,
) -> Result<ScanOutcome> {
    let scan_start = today - Duration::days(config.scan_days);
    let baseline_start = today
        .checked_sub_months(Months::new(config.baseline_months as u32))
        .unwrap_or(NaiveDate::MIN);

    let history = db.fetch_transactions(user_id, baseline_start, Default::default())?;
    let (older, window): (Vec<_>, Vec<_>) =
        history.into_iter().partition(|tx| tx.date < scan_start);

    let baselines = anomaly::compute_baselines(user_id, &older, Utc::now());
    let patterns = db.get_active_patterns(user_id)?;
    let fp_counts = db.false_positive_counts(user_id)?;

    let anomalies = anomaly::scan(&window, &baselines, &patterns, &fp_counts, today, config);
    db.replace_baselines(user_id, &baselines)?;
    let save = db.save_anomalies(&anomalies)?;

    info!(
        user_id,
        baselines = baselines.len(),
        found = anomalies.len(),
        saved = save.saved,
        duplicates = save.duplicates,
        "anomaly scan complete"
    );
    Ok(ScanOutcome {
        baselines: baselines.len(),
        anomalies_found: anomalies.len(),
        save,
    })
}

/// Build a forecast from the user's live state, optionally storing the
/// snapshot for the learning loop to grade later.
///
/// With `store` false this is read-only: what-if recalculation after
/// flagging a transfer as ignored never leaves a trace.
pub fn run_forecast(
    db: &Database,
    user_id: i64,
    today: NaiveDate,
    store: bool,
    config: &ForecastConfig,
) -> Result<ForecastSnapshot> {
    let balance = db.cash_balance(user_id)?;
    let patterns = db.get_active_patterns(user_id)?;
    let window_start = today - Duration::days(config.discretionary_window_days);
    let recent = db.fetch_transactions(user_id, window_start, Default::default())?;
    let base_rate =
        forecast::discretionary_daily_rate(&recent, &patterns, config.discretionary_window_days);
    let multiplier = db.latest_multiplier(user_id)?;

    let mut snapshot =
        forecast::build_forecast(user_id, balance, &patterns, base_rate, multiplier, today, config);
    if store {
        snapshot.id = db.save_forecast_snapshot(&snapshot)?;
        debug!(user_id, snapshot_id = snapshot.id, "forecast snapshot stored");
    }
    Ok(snapshot)
}

/// Detection under the user's lock
pub async fn detect_for_user(
    db: &Database,
    locks: &UserLocks,
    user_id: i64,
    today: NaiveDate,
    config: &DetectorConfig,
) -> Result<DetectionOutcome> {
    let lock = locks.lock_for(user_id);
    let _guard = lock.lock().await;
    run_detection(db, user_id, today, config)
}

/// Anomaly scan under the user's lock
pub async fn scan_for_user(
    db: &Database,
    locks: &UserLocks,
    user_id: i64,
    today: NaiveDate,
    config: &AnomalyConfig,
) -> Result<ScanOutcome> {
    let lock = locks.lock_for(user_id);
    let _guard = lock.lock().await;
    run_anomaly_scan(db, user_id, today, config)
}

/// Forecast under the user's lock
pub async fn forecast_for_user(
    db: &Database,
    locks: &UserLocks,
    user_id: i64,
    today: NaiveDate,
    store: bool,
    config: &ForecastConfig,
) -> Result<ForecastSnapshot> {
    let lock = locks.lock_for(user_id);
    let _guard = lock.lock().await;
    run_forecast(db, user_id, today, store, config)
}

/// Full learning pass under the user's lock
pub async fn learn_for_user(
    db: &Database,
    locks: &UserLocks,
    user_id: i64,
    today: NaiveDate,
    ai: Option<&AiClient>,
) -> Result<LearnSummary> {
    let lock = locks.lock_for(user_id);
    let _guard = lock.lock().await;
    let mut learner = LearningLoop::with_config(db, LearningConfig::default(), DetectorConfig::default());
    if let Some(client) = ai {
        learner = learner.with_ai(client);
    }
    learner.run(user_id, today).await
}
