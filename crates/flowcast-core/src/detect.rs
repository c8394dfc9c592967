//! Recurring pattern detection
//!
//! Clusters a user's transaction history by normalized merchant key and
//! infers which clusters are recurring: frequency from the median gap
//! between charges, confidence from occurrence count and gap regularity,
//! and the next expected date rolled forward past today.
//!
//! Detection is pure: it reads a slice of transactions plus the user's
//! suppression list and emits `DetectedPattern`s. Persistence (promoting
//! high-confidence patterns, queueing the rest as suggestions) happens in
//! the pipeline layer.

use std::collections::{HashMap, HashSet};

use chrono::{Duration, NaiveDate};
use tracing::debug;

use crate::merchant;
use crate::models::{BillType, Confidence, Frequency, Transaction};

/// Detection thresholds
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Minimum occurrences before a merchant group is considered at all
    pub min_occurrences: usize,
    /// Relative amount spread (vs. the median) under which amounts count
    /// as "steady". Groups above this are still detected on timing alone
    /// but their confidence is capped at medium.
    pub amount_tolerance: f64,
    /// Gap coefficient-of-variation ceiling for high confidence
    pub gap_cv_high: f64,
    /// Gap coefficient-of-variation ceiling for medium confidence
    pub gap_cv_medium: f64,
    /// Occurrences required for high confidence
    pub high_min_occurrences: usize,
    /// Occurrences required for medium confidence
    pub medium_min_occurrences: usize,
    /// Ignore amount spread entirely and cluster on timing alone
    pub frequency_only: bool,
    /// How far back the pipeline fetches history before detection runs.
    /// The detector itself scores whatever slice it is handed.
    pub lookback_days: i64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            min_occurrences: 2,        // one data point is never a pattern
            amount_tolerance: 0.15,    // 15% spread around the median
            gap_cv_high: 0.15,         // near-metronomic timing
            gap_cv_medium: 0.35,       // allows a skipped/late charge
            high_min_occurrences: 4,
            medium_min_occurrences: 3,
            frequency_only: false,
            lookback_days: 365,
        }
    }
}

/// A recurring series found in transaction history.
///
/// Not yet persisted: the pipeline promotes high-confidence detections
/// straight to `recurring_patterns` and queues the rest for review.
#[derive(Debug, Clone)]
pub struct DetectedPattern {
    /// Normalized clustering key (see [`merchant::normalize`])
    pub merchant_key: String,
    /// Human-readable name, taken from the most recent occurrence
    pub display_name: String,
    pub frequency: Frequency,
    pub average_amount: f64,
    pub next_expected_date: NaiveDate,
    pub last_seen_date: NaiveDate,
    pub is_income: bool,
    /// Most common category across the group, when any occurrence has one
    pub category: Option<String>,
    pub confidence: Confidence,
    pub occurrence_count: i64,
    /// Ids of the transactions that formed the cluster, oldest first
    pub source_transaction_ids: Vec<i64>,
    /// One-line explanation shown in the review queue
    pub detection_reason: String,
    pub bill_type: BillType,
}

/// Detect recurring patterns in a user's transaction history.
///
/// `transactions` should already be scoped to one user and exclude
/// ignored rows. `suppressed` holds merchant keys the user has denied or
/// removed; groups matching those keys are skipped entirely. `today`
/// anchors the next-expected-date roll-forward so detection runs that lag
/// behind real time still produce a today-or-future date.
///
/// Empty history yields an empty result, not an error.
pub fn detect_patterns(
    transactions: &[Transaction],
    suppressed: &HashSet<String>,
    today: NaiveDate,
    config: &DetectorConfig,
) -> Vec<DetectedPattern> {
    // Group by (merchant key, income flag). Income and expense series at
    // the same merchant are distinct patterns: a payroll provider that
    // also charges a fee should yield two entries, not a muddled one.
    let mut groups: HashMap<(String, bool), Vec<&Transaction>> = HashMap::new();
    for tx in transactions {
        if tx.ignored {
            continue;
        }
        let key = merchant::normalize(tx.merchant_input());
        if key.is_empty() {
            continue;
        }
        let income = tx.is_income || tx.amount < 0.0;
        groups.entry((key, income)).or_default().push(tx);
    }

    let mut detected = Vec::new();
    for ((key, income), group) in groups {
        if suppressed.contains(&key) {
            debug!(merchant = %key, "skipping suppressed merchant");
            continue;
        }
        if group.len() < config.min_occurrences {
            continue;
        }
        if let Some(pattern) = score_group(&key, income, &group, today, config) {
            detected.push(pattern);
        }
    }

    // Stable output order: income first, then by amount descending, so
    // paychecks and rent surface before coffee-sized subscriptions.
    detected.sort_by(|a, b| {
        b.is_income
            .cmp(&a.is_income)
            .then(b.average_amount.total_cmp(&a.average_amount))
            .then_with(|| a.merchant_key.cmp(&b.merchant_key))
    });
    detected
}

/// Score one merchant group: infer frequency from the median gap, grade
/// confidence, and build the `DetectedPattern`. Returns `None` when the
/// timing does not match any known cadence.
fn score_group(
    key: &str,
    income: bool,
    group: &[&Transaction],
    today: NaiveDate,
    config: &DetectorConfig,
) -> Option<DetectedPattern> {
    let mut sorted: Vec<&Transaction> = group.to_vec();
    sorted.sort_by_key(|t| (t.date, t.id));

    let gaps: Vec<i64> = sorted
        .windows(2)
        .map(|w| (w[1].date - w[0].date).num_days())
        .collect();
    if gaps.is_empty() {
        return None;
    }

    // Median gap, not mean: one missed month or a duplicate charge on the
    // same day should not drag the inferred cadence off its bucket.
    let gap_values: Vec<f64> = gaps.iter().map(|&g| g as f64).collect();
    let median_gap = median(&gap_values);
    let frequency = classify_gap(median_gap)?;

    let amounts: Vec<f64> = sorted.iter().map(|t| t.amount.abs()).collect();
    let median_amount = median(&amounts);
    let average_amount = round_cents(mean(&amounts));

    // Relative spread around the median amount. Steady-amount groups get
    // the full confidence ladder; variable-amount groups (utility bills,
    // usage-based services) are still real patterns but never auto-promote.
    let amounts_steady = if median_amount < 0.01 {
        true
    } else {
        amounts
            .iter()
            .all(|a| (a - median_amount).abs() / median_amount <= config.amount_tolerance)
    };

    let cv = gap_cv(&gap_values);
    let count = sorted.len();
    let mut confidence = if count >= config.high_min_occurrences && cv <= config.gap_cv_high {
        Confidence::High
    } else if count >= config.medium_min_occurrences && cv <= config.gap_cv_medium {
        Confidence::Medium
    } else {
        Confidence::Low
    };
    if !amounts_steady && !config.frequency_only && confidence == Confidence::High {
        confidence = Confidence::Medium;
    }

    let last_seen_date = sorted.last()?.date;
    let next_expected_date = roll_forward(last_seen_date, frequency, today);

    let noun = if income { "deposits" } else { "charges" };
    let detection_reason = if amounts_steady || config.frequency_only {
        format!(
            "{count} {noun} of ~${median_amount:.2} every ~{} days",
            median_gap.round() as i64
        )
    } else {
        format!(
            "{count} {noun} every ~{} days, amounts vary around ${average_amount:.2}",
            median_gap.round() as i64
        )
    };

    let bill_type = if income {
        BillType::Income
    } else if amounts_steady {
        BillType::Subscription
    } else {
        BillType::Bill
    };

    // Latest descriptor wins as the display name: banks clean up their
    // feeds over time and the newest spelling is usually the best one.
    let display_name = sorted.last()?.merchant_input().trim().to_string();

    Some(DetectedPattern {
        merchant_key: key.to_string(),
        display_name,
        frequency,
        average_amount,
        next_expected_date,
        last_seen_date,
        is_income: income,
        category: dominant_category(&sorted),
        confidence,
        occurrence_count: count as i64,
        source_transaction_ids: sorted.iter().map(|t| t.id).collect(),
        detection_reason,
        bill_type,
    })
}

/// Map a median gap in days onto a billing cadence.
///
/// The windows are deliberately generous (a "monthly" charge lands
/// anywhere from the 26th to the 35th day) and deliberately gapped:
/// a 20-day median matches nothing and the group is dropped rather than
/// shoehorned into the nearest bucket.
fn classify_gap(median_gap: f64) -> Option<Frequency> {
    match median_gap {
        g if (5.0..=9.0).contains(&g) => Some(Frequency::Weekly),
        g if (12.0..=16.0).contains(&g) => Some(Frequency::BiWeekly),
        g if (26.0..=35.0).contains(&g) => Some(Frequency::Monthly),
        g if (80.0..=100.0).contains(&g) => Some(Frequency::Quarterly),
        g if (350.0..=380.0).contains(&g) => Some(Frequency::Yearly),
        _ => None,
    }
}

/// Next expected date: one interval past the last occurrence, rolled
/// forward until it is today or later.
fn roll_forward(last_seen: NaiveDate, frequency: Frequency, today: NaiveDate) -> NaiveDate {
    let interval = Duration::days(frequency.interval_days());
    let mut next = last_seen + interval;
    while next < today {
        next += interval;
    }
    next
}

/// Most common explicit category in the group, ties broken alphabetically.
fn dominant_category(sorted: &[&Transaction]) -> Option<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for tx in sorted {
        if let Some(cat) = tx.category.as_deref() {
            *counts.entry(cat).or_default() += 1;
        }
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(a.0)))
        .map(|(cat, _)| cat.to_string())
}

/// Median of a slice
fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Coefficient of variation of the gaps (population std dev over mean).
/// Zero when timing is perfectly regular; a single gap is trivially regular.
fn gap_cv(gaps: &[f64]) -> f64 {
    let m = mean(gaps);
    if m <= 0.0 {
        return f64::INFINITY;
    }
    let variance = gaps.iter().map(|g| (g - m).powi(2)).sum::<f64>() / gaps.len() as f64;
    variance.sqrt() / m
}

fn round_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}
