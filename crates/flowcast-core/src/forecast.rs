//! Cash-flow forecasting
//!
//! Projects a user's balance day by day over a horizon: recurring income
//! and expenses land on their predicted dates, and a discretionary daily
//! spending rate (trailing spend not attributable to any known pattern,
//! scaled by the learning loop's multiplier) drains every day on top.
//!
//! Building a forecast is pure and side-effect free so what-if
//! recalculation is always safe; persisting the snapshot for the learning
//! loop to grade later is the caller's choice.

use chrono::{Duration, NaiveDate, Utc};

use crate::merchant;
use crate::models::{
    AlertType, Confidence, ForecastAlert, ForecastBreakdown, ForecastDay, ForecastItem,
    ForecastSnapshot, RecurringPattern, Severity, Transaction,
};

/// Forecast thresholds
#[derive(Debug, Clone)]
pub struct ForecastConfig {
    /// Days to project
    pub horizon_days: i64,
    /// Balance under this flags a day (and the first such day alerts)
    pub low_balance_threshold: f64,
    /// Single recurring charges over this get their own alert
    pub large_expense_threshold: f64,
    /// Trailing window used to estimate the discretionary daily rate
    pub discretionary_window_days: i64,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            horizon_days: 30,
            low_balance_threshold: 100.0,
            large_expense_threshold: 500.0,
            discretionary_window_days: 30,
        }
    }
}

/// Average daily spend not attributable to a known recurring pattern.
///
/// `transactions` is the trailing window (the pipeline fetches
/// `discretionary_window_days` worth); anything whose merchant key matches
/// an active expense pattern is recurring, not discretionary, and ignored
/// or exceptional rows never count. The divisor is the window length, not
/// the number of spending days, so quiet weeks pull the rate down.
pub fn discretionary_daily_rate(
    transactions: &[Transaction],
    patterns: &[RecurringPattern],
    window_days: i64,
) -> f64 {
    if window_days <= 0 {
        return 0.0;
    }
    let recurring_keys: std::collections::HashSet<&str> = patterns
        .iter()
        .filter(|p| !p.is_income)
        .map(|p| p.merchant_key.as_str())
        .collect();

    let spend: f64 = transactions
        .iter()
        .filter(|tx| tx.is_expense() && !tx.ignored && !tx.is_exceptional)
        .filter(|tx| !recurring_keys.contains(merchant::normalize(tx.merchant_input()).as_str()))
        .map(|tx| tx.amount)
        .sum();
    spend / window_days as f64
}

/// Build a day-by-day balance projection.
///
/// Day 0 is the supplied balance exactly; recurring events and the daily
/// rate apply from day 1 on. `base_daily_rate` comes from
/// [`discretionary_daily_rate`]; `multiplier` is the latest learning
/// record's correction (1.0 when none exists).
pub fn build_forecast(
    user_id: i64,
    starting_balance: f64,
    patterns: &[RecurringPattern],
    base_daily_rate: f64,
    multiplier: f64,
    today: NaiveDate,
    config: &ForecastConfig,
) -> ForecastSnapshot {
    let daily_rate = base_daily_rate * multiplier;
    let horizon_end = today + Duration::days(config.horizon_days);

    // Project each pattern's occurrence dates within the horizon. An
    // occurrence already due (stale next date, or due today) lands on day
    // 1: it has not cleared the ledger yet, but pretending it is a full
    // interval away would overstate the balance.
    let mut income_items = Vec::new();
    let mut expense_items = Vec::new();
    for pattern in patterns {
        let dates = project_dates(pattern, today, horizon_end);
        if dates.is_empty() {
            continue;
        }
        let item = ForecastItem {
            pattern_id: pattern.id,
            name: pattern.display_name.clone(),
            amount: pattern.average_amount,
            frequency: pattern.frequency,
            total: round_cents(pattern.average_amount * dates.len() as f64),
            dates,
        };
        if pattern.is_income {
            income_items.push(item);
        } else {
            expense_items.push(item);
        }
    }

    let mut days = Vec::with_capacity(config.horizon_days as usize + 1);
    let mut balance = starting_balance;
    days.push(ForecastDay {
        date: today,
        balance: starting_balance,
        is_low: starting_balance < config.low_balance_threshold,
        is_negative: starting_balance < 0.0,
    });
    for offset in 1..=config.horizon_days {
        let date = today + Duration::days(offset);
        for item in &income_items {
            if item.dates.contains(&date) {
                balance += item.amount;
            }
        }
        for item in &expense_items {
            if item.dates.contains(&date) {
                balance -= item.amount;
            }
        }
        balance -= daily_rate;
        let rounded = round_cents(balance);
        days.push(ForecastDay {
            date,
            balance: rounded,
            is_low: rounded < config.low_balance_threshold,
            is_negative: rounded < 0.0,
        });
    }

    let recurring_income: f64 = income_items.iter().map(|i| i.total).sum();
    let recurring_expenses: f64 = expense_items.iter().map(|i| i.total).sum();
    let discretionary_total = round_cents(daily_rate * config.horizon_days as f64);
    let breakdown = ForecastBreakdown {
        income_items,
        expense_items,
        discretionary_total,
        net_change: round_cents(recurring_income - recurring_expenses - discretionary_total),
    };

    let alerts = build_alerts(&days, &breakdown.expense_items, config);
    let confidence = forecast_confidence(patterns);

    ForecastSnapshot {
        id: 0,
        user_id,
        generated_at: Utc::now(),
        horizon_days: config.horizon_days,
        starting_balance,
        days,
        total_income: round_cents(recurring_income),
        total_expenses: round_cents(recurring_expenses + discretionary_total),
        confidence,
        breakdown,
        alerts,
        daily_rate,
        multiplier,
        compared_at: None,
    }
}

/// Occurrence dates for one pattern inside the horizon, stepping its
/// interval from `next_expected_date`. The first occurrence is clamped to
/// tomorrow when the pattern is due or overdue.
fn project_dates(
    pattern: &RecurringPattern,
    today: NaiveDate,
    horizon_end: NaiveDate,
) -> Vec<NaiveDate> {
    let interval = Duration::days(pattern.frequency.interval_days());
    let mut dates = Vec::new();
    let mut date = pattern.next_expected_date;
    if date <= today {
        dates.push(today + Duration::days(1));
        // Later occurrences keep the pattern's own cadence.
        while date <= today {
            date += interval;
        }
        if date == today + Duration::days(1) {
            date += interval;
        }
    }
    while date <= horizon_end {
        dates.push(date);
        date += interval;
    }
    dates.retain(|d| *d <= horizon_end);
    dates
}

/// Structured alerts: first negative day (critical), first low day
/// (warning), and one per oversized recurring charge.
fn build_alerts(
    days: &[ForecastDay],
    expense_items: &[ForecastItem],
    config: &ForecastConfig,
) -> Vec<ForecastAlert> {
    let mut alerts = Vec::new();

    if let Some(day) = days.iter().find(|d| d.is_negative) {
        alerts.push(ForecastAlert {
            alert_type: AlertType::NegativeBalance,
            severity: Severity::Critical,
            date: day.date,
            amount: day.balance,
            message: format!(
                "Balance projected to go negative on {} (${:.2})",
                day.date, day.balance
            ),
        });
    }
    if let Some(day) = days.iter().find(|d| d.is_low) {
        alerts.push(ForecastAlert {
            alert_type: AlertType::LowBalance,
            severity: Severity::Warning,
            date: day.date,
            amount: day.balance,
            message: format!(
                "Balance projected to drop under ${:.0} on {} (${:.2})",
                config.low_balance_threshold, day.date, day.balance
            ),
        });
    }
    for item in expense_items {
        if item.amount <= config.large_expense_threshold {
            continue;
        }
        for date in &item.dates {
            alerts.push(ForecastAlert {
                alert_type: AlertType::LargeExpense,
                severity: Severity::Warning,
                date: *date,
                amount: item.amount,
                message: format!("{} (${:.2}) due {}", item.name, item.amount, date),
            });
        }
    }

    alerts.sort_by(|a, b| a.date.cmp(&b.date));
    alerts
}

/// Confidence in the projection, read off the income side: a high-
/// confidence income pattern spanning three months of observed history
/// earns `high`; any recurring income at all earns `medium`; none, `low`.
fn forecast_confidence(patterns: &[RecurringPattern]) -> Confidence {
    let mut best = None;
    for pattern in patterns.iter().filter(|p| p.is_income) {
        let covered_days =
            (pattern.occurrence_count - 1).max(0) * pattern.frequency.interval_days();
        if covered_days >= 90 && pattern.confidence == Confidence::High {
            return Confidence::High;
        }
        best = Some(Confidence::Medium);
    }
    best.unwrap_or(Confidence::Low)
}

fn round_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}
