//! Forecast learning loop
//!
//! Four stages, each independently triggerable and idempotent:
//! 1. analyze_patterns: refresh recurring detection to pick up new income
//!    sources and pattern drift
//! 2. compare_actuals: grade every stored forecast whose horizon has
//!    elapsed against the real ledger, day by day
//! 3. analyze_errors: optional AI commentary on the misses (no-op without
//!    a configured backend)
//! 4. calculate_accuracy: fold recent errors into a bounded correction
//!    multiplier applied to future discretionary estimates
//!
//! The multiplier is recomputed from the comparison window each pass, not
//! adjusted relative to its previous value, so repeated runs over the same
//! data settle on the same number instead of compounding.

use std::collections::HashMap;

use chrono::{Duration, NaiveDate, Utc};
use tracing::{debug, info, warn};

use crate::ai::{AiBackend, AiClient};
use crate::db::Database;
use crate::detect::DetectorConfig;
use crate::error::Result;
use crate::models::{ForecastComparison, ForecastSnapshot, LearningRecord};
use crate::pipeline::{self, DetectionOutcome};

/// Learning loop tuning
#[derive(Debug, Clone)]
pub struct LearningConfig {
    /// Days of comparisons fed into each accuracy calculation
    pub comparison_window_days: i64,
    /// Fraction of the observed bias folded into the multiplier
    pub damping: f64,
    /// Multiplier floor
    pub multiplier_min: f64,
    /// Multiplier ceiling
    pub multiplier_max: f64,
    /// |actual balance| under this is too small for a meaningful percent
    pub min_actual_for_percent: f64,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            comparison_window_days: 30,
            damping: 0.5,            // half the observed bias per pass
            multiplier_min: 0.5,
            multiplier_max: 2.0,
            min_actual_for_percent: 1.0,
        }
    }
}

/// What one full learning pass did
#[derive(Debug, Default)]
pub struct LearnSummary {
    pub patterns_saved: usize,
    pub suggestions_queued: usize,
    pub snapshots_compared: usize,
    pub days_compared: usize,
    pub explanation: Option<String>,
    pub record: Option<LearningRecord>,
}

/// Runs the four learning stages against the database
pub struct LearningLoop<'a> {
    db: &'a Database,
    config: LearningConfig,
    detector: DetectorConfig,
    ai: Option<&'a AiClient>,
}

impl<'a> LearningLoop<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self {
            db,
            config: LearningConfig::default(),
            detector: DetectorConfig::default(),
            ai: None,
        }
    }

    pub fn with_config(db: &'a Database, config: LearningConfig, detector: DetectorConfig) -> Self {
        Self {
            db,
            config,
            detector,
            ai: None,
        }
    }

    pub fn with_ai(mut self, ai: &'a AiClient) -> Self {
        self.ai = Some(ai);
        self
    }

    /// Stage 1: refresh recurring detection
    pub fn analyze_patterns(&self, user_id: i64, today: NaiveDate) -> Result<DetectionOutcome> {
        pipeline::run_detection(self.db, user_id, today, &self.detector)
    }

    /// Stage 2: grade elapsed forecasts against the ledger
    ///
    /// Returns (snapshots compared, total days compared). Snapshots already
    /// graded are skipped, so re-running is a no-op.
    pub fn compare_actuals(&self, user_id: i64, as_of: NaiveDate) -> Result<(usize, usize)> {
        let snapshots = self.db.elapsed_uncompared_snapshots(user_id, as_of)?;
        let mut days_total = 0;
        for snapshot in &snapshots {
            let comparisons = self.grade_snapshot(snapshot)?;
            days_total += comparisons.len();
            self.db.save_forecast_comparisons(snapshot.id, &comparisons)?;
            debug!(
                snapshot_id = snapshot.id,
                days = comparisons.len(),
                "graded forecast snapshot"
            );
        }
        Ok((snapshots.len(), days_total))
    }

    fn grade_snapshot(&self, snapshot: &ForecastSnapshot) -> Result<Vec<ForecastComparison>> {
        let (Some(first), Some(last)) = (snapshot.days.first(), snapshot.days.last()) else {
            // Still mark it compared via the empty save so it is not
            // retried forever.
            warn!(snapshot_id = snapshot.id, "snapshot has no projected days");
            return Ok(Vec::new());
        };
        let deltas = self
            .db
            .daily_net_deltas(snapshot.user_id, first.date, last.date)?;
        Ok(compare_days(
            snapshot,
            &deltas,
            self.config.min_actual_for_percent,
        ))
    }

    /// Stage 3: qualitative commentary on the misses
    ///
    /// Requires an AI backend; without one this is a no-op. Backend
    /// failures degrade to `None` rather than failing the loop.
    pub async fn analyze_errors(&self, user_id: i64, as_of: NaiveDate) -> Result<Option<String>> {
        let Some(ai) = self.ai else {
            return Ok(None);
        };
        let cutoff = as_of - Duration::days(self.config.comparison_window_days);
        let comparisons = self.db.comparisons_since(user_id, cutoff)?;
        let Some(stats) = accuracy_stats(&comparisons) else {
            return Ok(None);
        };

        let mut worst: Vec<&ForecastComparison> = comparisons.iter().collect();
        worst.sort_by(|a, b| b.error_amount.abs().total_cmp(&a.error_amount.abs()));
        let misses: Vec<(String, f64)> = worst
            .iter()
            .take(3)
            .map(|c| (c.date.to_string(), c.error_amount))
            .collect();

        match ai
            .explain_forecast_errors(
                stats.mean_error_percent,
                stats.direction_accuracy,
                comparisons.len() as i64,
                &misses,
            )
            .await
        {
            Ok(text) => Ok(Some(text)),
            Err(e) => {
                debug!("forecast error analysis unavailable: {e}");
                Ok(None)
            }
        }
    }

    /// Stage 4: aggregate recent errors into a learning record
    ///
    /// `None` when the window holds too little compared history to say
    /// anything, which is a normal outcome, not a failure.
    pub fn calculate_accuracy(
        &self,
        user_id: i64,
        as_of: NaiveDate,
    ) -> Result<Option<LearningRecord>> {
        let cutoff = as_of - Duration::days(self.config.comparison_window_days);
        let comparisons = self.db.comparisons_since(user_id, cutoff)?;
        let Some(stats) = accuracy_stats(&comparisons) else {
            debug!(user_id, "not enough compared days for an accuracy record");
            return Ok(None);
        };

        let snapshots: std::collections::HashSet<i64> =
            comparisons.iter().map(|c| c.snapshot_id).collect();
        let record = LearningRecord {
            id: 0,
            user_id,
            analyzed_at: Utc::now(),
            mean_error_percent: stats.mean_error_percent,
            direction_accuracy: stats.direction_accuracy,
            accuracy_adjustment_multiplier: derive_multiplier(stats.signed_bias, &self.config),
            snapshots_compared: snapshots.len() as i64,
            days_compared: comparisons.len() as i64,
        };
        let id = self.db.append_learning_record(&record)?;
        info!(
            user_id,
            mean_error_percent = format!("{:.1}", record.mean_error_percent),
            multiplier = format!("{:.3}", record.accuracy_adjustment_multiplier),
            "recorded forecast accuracy"
        );
        Ok(Some(LearningRecord { id, ..record }))
    }

    /// All four stages in order
    pub async fn run(&self, user_id: i64, today: NaiveDate) -> Result<LearnSummary> {
        let detection = self.analyze_patterns(user_id, today)?;
        let (snapshots_compared, days_compared) = self.compare_actuals(user_id, today)?;
        let explanation = self.analyze_errors(user_id, today).await?;
        let record = self.calculate_accuracy(user_id, today)?;
        info!(
            user_id,
            patterns = detection.patterns_saved,
            suggestions = detection.suggestions_queued,
            snapshots_compared,
            days_compared,
            "learning pass complete"
        );
        Ok(LearnSummary {
            patterns_saved: detection.patterns_saved,
            suggestions_queued: detection.suggestions_queued,
            snapshots_compared,
            days_compared,
            explanation,
            record,
        })
    }
}

/// Per-day comparisons for one snapshot.
///
/// Actual balances are rebuilt by replaying ledger deltas on top of the
/// snapshot's starting balance; the account's live balance cannot be used
/// because it reflects today, not the day being graded. Day 0 is skipped
/// since it equals the starting balance by construction.
fn compare_days(
    snapshot: &ForecastSnapshot,
    deltas: &[(NaiveDate, f64)],
    min_actual: f64,
) -> Vec<ForecastComparison> {
    let delta_map: HashMap<NaiveDate, f64> = deltas.iter().copied().collect();
    let mut actual = snapshot.starting_balance;
    let mut comparisons = Vec::with_capacity(snapshot.days.len().saturating_sub(1));
    for day in snapshot.days.iter().skip(1) {
        actual += delta_map.get(&day.date).copied().unwrap_or(0.0);
        let error_amount = day.balance - actual;
        let error_percent = if actual.abs() >= min_actual {
            Some(error_amount.abs() / actual.abs())
        } else {
            None
        };
        comparisons.push(ForecastComparison {
            snapshot_id: snapshot.id,
            date: day.date,
            predicted_balance: day.balance,
            actual_balance: round_cents(actual),
            error_amount: round_cents(error_amount),
            error_percent,
        });
    }
    comparisons
}

struct AccuracyStats {
    /// Percentage points, e.g. 12.5 for 12.5%
    mean_error_percent: f64,
    direction_accuracy: f64,
    /// Mean signed relative error; positive when predictions ran above
    /// reality, i.e. spending was underestimated
    signed_bias: f64,
}

/// Aggregate a window of comparisons. `None` when there are not at least
/// two usable days (one day gives no direction pairs and one percent value
/// is noise, not a trend).
fn accuracy_stats(comparisons: &[ForecastComparison]) -> Option<AccuracyStats> {
    let usable: Vec<&ForecastComparison> = comparisons
        .iter()
        .filter(|c| c.error_percent.is_some())
        .collect();
    if usable.len() < 2 {
        return None;
    }

    let mean_error_percent = 100.0
        * usable
            .iter()
            .filter_map(|c| c.error_percent)
            .sum::<f64>()
        / usable.len() as f64;
    let signed_bias = usable
        .iter()
        .map(|c| c.error_amount / c.actual_balance.abs())
        .sum::<f64>()
        / usable.len() as f64;

    // Direction pairs only make sense within one snapshot's timeline.
    let mut by_snapshot: HashMap<i64, Vec<&ForecastComparison>> = HashMap::new();
    for c in comparisons {
        by_snapshot.entry(c.snapshot_id).or_default().push(c);
    }
    let mut pairs = 0usize;
    let mut matches = 0usize;
    for rows in by_snapshot.values_mut() {
        rows.sort_by_key(|c| c.date);
        for w in rows.windows(2) {
            let d_pred = w[1].predicted_balance - w[0].predicted_balance;
            let d_act = w[1].actual_balance - w[0].actual_balance;
            pairs += 1;
            if same_direction(d_pred, d_act) {
                matches += 1;
            }
        }
    }
    if pairs == 0 {
        return None;
    }

    Some(AccuracyStats {
        mean_error_percent,
        direction_accuracy: matches as f64 / pairs as f64,
        signed_bias,
    })
}

/// Two day-over-day balance deltas count as "same direction" when both
/// rise, both fall, or both are flat to the cent.
fn same_direction(a: f64, b: f64) -> bool {
    const FLAT: f64 = 0.005;
    if a.abs() < FLAT && b.abs() < FLAT {
        return true;
    }
    a.abs() >= FLAT && b.abs() >= FLAT && (a > 0.0) == (b > 0.0)
}

/// Damped correction: half (by default) of the observed bias, clamped
/// to the configured multiplier range.
fn derive_multiplier(signed_bias: f64, config: &LearningConfig) -> f64 {
    (1.0 + config.damping * signed_bias).clamp(config.multiplier_min, config.multiplier_max)
}

fn round_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AccountType, Confidence, ForecastBreakdown, ForecastDay};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn flat_day(date: NaiveDate, balance: f64) -> ForecastDay {
        ForecastDay {
            date,
            balance,
            is_low: balance < 100.0,
            is_negative: balance < 0.0,
        }
    }

    fn snapshot_with_days(days: Vec<ForecastDay>) -> ForecastSnapshot {
        let starting = days.first().map(|d| d.balance).unwrap_or(0.0);
        ForecastSnapshot {
            id: 1,
            user_id: 1,
            generated_at: Utc::now(),
            horizon_days: days.len() as i64 - 1,
            starting_balance: starting,
            days,
            total_income: 0.0,
            total_expenses: 0.0,
            confidence: Confidence::Low,
            breakdown: ForecastBreakdown::default(),
            alerts: vec![],
            daily_rate: 0.0,
            multiplier: 1.0,
            compared_at: None,
        }
    }

    #[test]
    fn test_compare_days_reconstructs_actuals() {
        let day0 = date(2024, 5, 1);
        let snapshot = snapshot_with_days(vec![
            flat_day(day0, 1000.0),
            flat_day(date(2024, 5, 2), 980.0),
            flat_day(date(2024, 5, 3), 960.0),
            flat_day(date(2024, 5, 4), 940.0),
        ]);
        // Real spending: $40 on the 2nd and 3rd, nothing on the 4th.
        let deltas = vec![(date(2024, 5, 2), -40.0), (date(2024, 5, 3), -40.0)];

        let comparisons = compare_days(&snapshot, &deltas, 1.0);
        assert_eq!(comparisons.len(), 3);
        assert_eq!(comparisons[0].actual_balance, 960.0);
        assert_eq!(comparisons[0].error_amount, 20.0);
        assert_eq!(comparisons[1].actual_balance, 920.0);
        assert_eq!(comparisons[1].error_amount, 40.0);
        assert_eq!(comparisons[2].actual_balance, 920.0);
        assert_eq!(comparisons[2].error_amount, 20.0);
        assert!(comparisons.iter().all(|c| c.error_percent.is_some()));
    }

    #[test]
    fn test_compare_days_skips_percent_near_zero_actual() {
        let snapshot = snapshot_with_days(vec![
            flat_day(date(2024, 5, 1), 0.50),
            flat_day(date(2024, 5, 2), 0.50),
        ]);
        let comparisons = compare_days(&snapshot, &[], 1.0);
        assert_eq!(comparisons.len(), 1);
        assert_eq!(comparisons[0].error_percent, None);
    }

    #[test]
    fn test_accuracy_stats_direction() {
        let day0 = date(2024, 5, 1);
        let snapshot = snapshot_with_days(vec![
            flat_day(day0, 1000.0),
            flat_day(date(2024, 5, 2), 980.0),
            flat_day(date(2024, 5, 3), 960.0),
            flat_day(date(2024, 5, 4), 940.0),
        ]);
        let deltas = vec![(date(2024, 5, 2), -40.0), (date(2024, 5, 3), -40.0)];
        let comparisons = compare_days(&snapshot, &deltas, 1.0);

        let stats = accuracy_stats(&comparisons).unwrap();
        // Pairs: 2nd -> 3rd both fall (match); 3rd -> 4th predicted falls
        // but actual is flat (miss).
        assert!((stats.direction_accuracy - 0.5).abs() < 1e-9);
        // Predictions ran above reality every day.
        assert!(stats.signed_bias > 0.0);
        assert!(stats.mean_error_percent > 0.0);
    }

    #[test]
    fn test_accuracy_stats_insufficient_data() {
        assert!(accuracy_stats(&[]).is_none());

        let snapshot = snapshot_with_days(vec![
            flat_day(date(2024, 5, 1), 1000.0),
            flat_day(date(2024, 5, 2), 990.0),
        ]);
        let one_day = compare_days(&snapshot, &[], 1.0);
        assert!(accuracy_stats(&one_day).is_none());
    }

    #[test]
    fn test_multiplier_never_leaves_bounds() {
        let config = LearningConfig::default();
        assert_eq!(derive_multiplier(0.0, &config), 1.0);
        assert_eq!(derive_multiplier(1e9, &config), 2.0);
        assert_eq!(derive_multiplier(-1e9, &config), 0.5);
        assert_eq!(derive_multiplier(f64::INFINITY, &config), 2.0);
        assert_eq!(derive_multiplier(f64::NEG_INFINITY, &config), 0.5);
        // Modest bias moves it modestly.
        let m = derive_multiplier(0.1, &config);
        assert!(m > 1.0 && m < 1.1);
    }

    #[test]
    fn test_same_direction() {
        assert!(same_direction(5.0, 12.0));
        assert!(same_direction(-5.0, -0.01));
        assert!(same_direction(0.0, 0.001));
        assert!(!same_direction(5.0, -5.0));
        assert!(!same_direction(-20.0, 0.0));
    }

    #[tokio::test]
    async fn test_loop_against_database() {
        let db = Database::in_memory().unwrap();
        let user_id = db.upsert_user("casey").unwrap();
        let account_id = db
            .upsert_account(user_id, "Checking", AccountType::Checking, 1000.0)
            .unwrap();

        // A 3-day forecast made on May 1st predicting $20/day spend.
        let snapshot = snapshot_with_days(vec![
            flat_day(date(2024, 5, 1), 1000.0),
            flat_day(date(2024, 5, 2), 980.0),
            flat_day(date(2024, 5, 3), 960.0),
            flat_day(date(2024, 5, 4), 940.0),
        ]);
        let mut stored = snapshot.clone();
        stored.user_id = user_id;
        let snapshot_id = db.save_forecast_snapshot(&stored).unwrap();

        // Reality spent $40/day on the 2nd and 3rd.
        for (i, d) in [date(2024, 5, 2), date(2024, 5, 3)].iter().enumerate() {
            db.add_manual_transaction(
                user_id,
                account_id,
                *d,
                &format!("COFFEE RUN {i}"),
                40.0,
                None,
                false,
            )
            .unwrap();
        }

        let learner = LearningLoop::new(&db);

        // The horizon has long elapsed by mid-June.
        let as_of = date(2024, 6, 15);
        let (snapshots, days) = learner.compare_actuals(user_id, as_of).unwrap();
        assert_eq!(snapshots, 1);
        assert_eq!(days, 3);

        // Second run finds nothing left to grade.
        let (snapshots, days) = learner.compare_actuals(user_id, as_of).unwrap();
        assert_eq!(snapshots, 0);
        assert_eq!(days, 0);

        let graded = db.get_forecast_snapshot(snapshot_id).unwrap().unwrap();
        assert!(graded.compared_at.is_some());

        // Accuracy over a window that includes those days.
        let record = learner
            .calculate_accuracy(user_id, date(2024, 5, 20))
            .unwrap()
            .unwrap();
        assert_eq!(record.days_compared, 3);
        assert_eq!(record.snapshots_compared, 1);
        // Spending was underestimated, so the multiplier corrects upward.
        assert!(record.accuracy_adjustment_multiplier > 1.0);
        assert!(record.accuracy_adjustment_multiplier <= 2.0);
        assert!((record.direction_accuracy - 0.5).abs() < 1e-9);

        assert_eq!(
            db.latest_multiplier(user_id).unwrap(),
            record.accuracy_adjustment_multiplier
        );

        // Re-running accuracy over the same window lands on the same
        // multiplier: the correction does not compound.
        let again = learner
            .calculate_accuracy(user_id, date(2024, 5, 20))
            .unwrap()
            .unwrap();
        assert!(
            (again.accuracy_adjustment_multiplier - record.accuracy_adjustment_multiplier).abs()
                < 1e-12
        );

        // Without an AI backend, error analysis is a quiet no-op.
        let explanation = learner.analyze_errors(user_id, as_of).await.unwrap();
        assert!(explanation.is_none());
    }

    #[tokio::test]
    async fn test_analyze_errors_with_mock_backend() {
        let db = Database::in_memory().unwrap();
        let user_id = db.upsert_user("casey").unwrap();
        let snapshot = snapshot_with_days(vec![
            flat_day(date(2024, 5, 1), 1000.0),
            flat_day(date(2024, 5, 2), 980.0),
            flat_day(date(2024, 5, 3), 960.0),
        ]);
        let mut stored = snapshot;
        stored.user_id = user_id;
        db.save_forecast_snapshot(&stored).unwrap();

        let ai = AiClient::mock();
        let learner = LearningLoop::new(&db).with_ai(&ai);
        learner.compare_actuals(user_id, date(2024, 6, 15)).unwrap();

        let explanation = learner
            .analyze_errors(user_id, date(2024, 5, 20))
            .await
            .unwrap();
        assert!(explanation.unwrap().contains("Mock analysis"));
    }
}
