//! Transaction anomaly detection
//!
//! Flags:
//! - New merchants: first charge at a merchant with no spending history
//! - Amount outliers: charges far outside a merchant's historical spread
//! - Missed recurring: expected recurring charges that never arrived
//!
//! Baselines are rebuilt from trailing history on every scan and persisted
//! so the CLI can show what "normal" looked like when an anomaly fired.
//! The scan itself is pure; saving (with duplicate suppression) lives in
//! the db layer.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use tracing::debug;

use crate::merchant;
use crate::models::{
    AnomalyType, MerchantBaseline, NewAnomaly, RecurringPattern, Severity, Transaction,
};

/// Anomaly detection thresholds
#[derive(Debug, Clone)]
pub struct AnomalyConfig {
    /// Months of history behind the scan window used to build baselines
    pub baseline_months: i64,
    /// Days of recent transactions examined per scan
    pub scan_days: i64,
    /// Deviation (in multiples of the baseline std dev) where a charge
    /// becomes a warning-level outlier
    pub outlier_warning_sigma: f64,
    /// Deviation where an outlier escalates to critical
    pub outlier_critical_sigma: f64,
    /// Days past the expected date before a recurring charge counts as missed
    pub missed_grace_days: i64,
    /// Extra widening of the outlier thresholds per false positive the user
    /// has confirmed on that merchant
    pub fp_widen_step: f64,
    /// Ceiling on the accumulated widening factor
    pub fp_widen_cap: f64,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            baseline_months: 6,
            scan_days: 7,
            outlier_warning_sigma: 2.5,
            outlier_critical_sigma: 4.0,
            missed_grace_days: 4,   // inside the 3-5 day band bills drift
            fp_widen_step: 0.25,    // each confirmed false positive widens 25%
            fp_widen_cap: 2.0,      // never more than double the base threshold
        }
    }
}

/// Build per-merchant amount baselines from a slice of history.
///
/// Exceptional and ignored transactions are excluded so a one-off furniture
/// purchase does not inflate what counts as normal. A merchant seen once
/// gets a baseline with zero variance; the outlier check skips those, but
/// their presence keeps the merchant from re-flagging as new.
pub fn compute_baselines(
    user_id: i64,
    transactions: &[Transaction],
    now: DateTime<Utc>,
) -> Vec<MerchantBaseline> {
    let mut groups: HashMap<String, Vec<f64>> = HashMap::new();
    for tx in transactions {
        if tx.is_exceptional || tx.ignored {
            continue;
        }
        let key = merchant::normalize(tx.merchant_input());
        if key.is_empty() {
            continue;
        }
        groups.entry(key).or_default().push(tx.amount.abs());
    }

    let mut baselines: Vec<MerchantBaseline> = groups
        .into_iter()
        .map(|(key, amounts)| {
            let count = amounts.len();
            let mean = amounts.iter().sum::<f64>() / count as f64;
            let variance =
                amounts.iter().map(|a| (a - mean).powi(2)).sum::<f64>() / count as f64;
            let min = amounts.iter().cloned().fold(f64::INFINITY, f64::min);
            let max = amounts.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            MerchantBaseline {
                user_id,
                merchant_key: key,
                mean_amount: mean,
                std_dev_amount: variance.sqrt(),
                min_amount: min,
                max_amount: max,
                transaction_count: count as i64,
                last_calculated: now,
            }
        })
        .collect();
    baselines.sort_by(|a, b| a.merchant_key.cmp(&b.merchant_key));
    baselines
}

/// Scan a window of recent transactions against baselines and active
/// recurring patterns.
///
/// `window` holds the user's transactions from the last few days (the
/// pipeline fetches `scan_days` worth), `fp_counts` maps merchant keys to
/// how many outlier alerts the user has marked as expected. Returned
/// anomalies are unsaved; the db layer deduplicates on insert so scanning
/// twice never double-alerts.
pub fn scan(
    window: &[Transaction],
    baselines: &[MerchantBaseline],
    patterns: &[RecurringPattern],
    fp_counts: &HashMap<String, i64>,
    today: NaiveDate,
    config: &AnomalyConfig,
) -> Vec<NewAnomaly> {
    let by_key: HashMap<&str, &MerchantBaseline> = baselines
        .iter()
        .map(|b| (b.merchant_key.as_str(), b))
        .collect();

    let mut anomalies = Vec::new();

    for tx in window {
        if tx.ignored || tx.is_exceptional {
            continue;
        }
        let key = merchant::normalize(tx.merchant_input());
        if key.is_empty() {
            continue;
        }

        let Some(baseline) = by_key.get(key.as_str()) else {
            anomalies.push(NewAnomaly {
                user_id: tx.user_id,
                transaction_id: Some(tx.id),
                pattern_id: None,
                merchant_key: key,
                anomaly_type: AnomalyType::NewMerchant,
                severity: Severity::Warning,
                amount: Some(tx.amount),
                expected_date: None,
                detail: format!(
                    "First transaction from {} (${:.2})",
                    tx.merchant_input().trim(),
                    tx.amount.abs()
                ),
            });
            continue;
        };

        // Zero variance means one observation or identical amounts; a
        // different amount there is novelty, not a statistical outlier.
        if baseline.std_dev_amount <= 0.0 {
            continue;
        }

        let widen = widening_factor(fp_counts.get(&key).copied().unwrap_or(0), config);
        let deviation = (tx.amount.abs() - baseline.mean_amount).abs();
        let warn_at = config.outlier_warning_sigma * widen * baseline.std_dev_amount;
        let crit_at = config.outlier_critical_sigma * widen * baseline.std_dev_amount;

        let severity = if deviation > crit_at {
            Severity::Critical
        } else if deviation > warn_at {
            Severity::Warning
        } else {
            continue;
        };

        debug!(
            merchant = %key,
            amount = tx.amount,
            mean = baseline.mean_amount,
            std_dev = baseline.std_dev_amount,
            "amount outlier"
        );
        anomalies.push(NewAnomaly {
            user_id: tx.user_id,
            transaction_id: Some(tx.id),
            pattern_id: None,
            merchant_key: key,
            anomaly_type: AnomalyType::AmountOutlier,
            severity,
            amount: Some(tx.amount),
            expected_date: None,
            detail: format!(
                "${:.2} at {} vs typical ${:.2} (usually ${:.2}-${:.2})",
                tx.amount.abs(),
                tx.merchant_input().trim(),
                baseline.mean_amount,
                baseline.min_amount,
                baseline.max_amount
            ),
        });
    }

    // Missed recurring charges: the expected date has passed the grace
    // window and nothing at that merchant showed up in the scan window.
    for pattern in patterns {
        let overdue = (today - pattern.next_expected_date).num_days();
        if overdue <= config.missed_grace_days {
            continue;
        }
        let arrived = window.iter().any(|tx| {
            !tx.ignored
                && merchant::normalize(tx.merchant_input()) == pattern.merchant_key
                && (tx.is_income || tx.amount < 0.0) == pattern.is_income
        });
        if arrived {
            continue;
        }

        // A paycheck that never lands is a cash-flow problem, not a curiosity.
        let severity = if pattern.is_income {
            Severity::Critical
        } else {
            Severity::Warning
        };
        anomalies.push(NewAnomaly {
            user_id: pattern.user_id,
            transaction_id: None,
            pattern_id: Some(pattern.id),
            merchant_key: pattern.merchant_key.clone(),
            anomaly_type: AnomalyType::MissedRecurring,
            severity,
            amount: Some(pattern.average_amount),
            expected_date: Some(pattern.next_expected_date),
            detail: format!(
                "{} (~${:.2}) expected {} but not seen, {} days overdue",
                pattern.display_name, pattern.average_amount, pattern.next_expected_date, overdue
            ),
        });
    }

    anomalies
}

/// Threshold widening from user feedback: each outlier the user marked as
/// expected loosens that merchant's thresholds, up to the configured cap.
fn widening_factor(fp_count: i64, config: &AnomalyConfig) -> f64 {
    (1.0 + config.fp_widen_step * fp_count.max(0) as f64).min(config.fp_widen_cap)
}
