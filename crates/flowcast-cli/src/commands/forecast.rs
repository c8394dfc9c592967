//! Cash-flow projection command

use std::path::Path;

use anyhow::{bail, Result};
use chrono::Local;
use flowcast_core::forecast::ForecastConfig;
use flowcast_core::models::{ForecastItem, Severity};
use flowcast_core::pipeline;

use super::{flow, money, open_db, resolve_user, truncate};

pub fn cmd_forecast(
    db_path: &Path,
    user: &str,
    days: i64,
    store: bool,
    no_encrypt: bool,
) -> Result<()> {
    if !(1..=365).contains(&days) {
        bail!("Days must be between 1 and 365, got {}", days);
    }

    println!("🔮 Projecting cash flow {} days ahead...", days);

    let db = open_db(db_path, no_encrypt)?;
    let user_id = resolve_user(&db, user)?;
    let today = Local::now().date_naive();
    let config = ForecastConfig {
        horizon_days: days,
        ..Default::default()
    };

    let snapshot = pipeline::run_forecast(&db, user_id, today, store, &config)?;

    println!();
    println!(
        "💰 Cash-Flow Forecast (confidence: {})",
        snapshot.confidence.as_str()
    );
    println!("   ─────────────────────────────────────────────");
    println!("   Starting balance:  {}", money(snapshot.starting_balance));
    if let Some(last) = snapshot.days.last() {
        println!(
            "   Ending balance:    {} on {}",
            money(last.balance),
            last.date
        );
    }
    println!("   Recurring income:  {}", flow(snapshot.total_income, true));
    println!(
        "   Recurring + discretionary spend: {}",
        flow(snapshot.total_expenses, false)
    );
    println!(
        "   Discretionary rate: {}/day (multiplier {:.2})",
        money(snapshot.daily_rate),
        snapshot.multiplier
    );

    // Low/negative stretches, not counting today's known balance
    let low_days = snapshot.days.iter().skip(1).filter(|d| d.is_low).count();
    let negative_days = snapshot
        .days
        .iter()
        .skip(1)
        .filter(|d| d.is_negative)
        .count();
    if low_days > 0 || negative_days > 0 {
        println!();
        println!(
            "   Days under $100: {}   Days negative: {}",
            low_days, negative_days
        );
    }

    if !snapshot.alerts.is_empty() {
        println!();
        println!("   Alerts:");
        for alert in &snapshot.alerts {
            let mark = match alert.severity {
                Severity::Critical => "❗",
                Severity::Warning => "⚠️ ",
            };
            println!("   {} {}  {}", mark, alert.date, alert.message);
        }
    }

    let breakdown = &snapshot.breakdown;
    if !breakdown.income_items.is_empty() || !breakdown.expense_items.is_empty() {
        println!();
        println!("   Breakdown:");
        for item in &breakdown.income_items {
            print_item(item, true);
        }
        for item in &breakdown.expense_items {
            print_item(item, false);
        }
        println!(
            "      {:<26} {:>24}",
            "Discretionary",
            flow(breakdown.discretionary_total, false)
        );
        println!(
            "      {:<26} {:>24}",
            "Net change",
            flow(breakdown.net_change, breakdown.net_change >= 0.0)
        );
    }

    println!();
    if store {
        println!("📸 Snapshot stored. The learning loop will grade it once the days elapse.");
    } else {
        println!("💡 Re-run with --store to let the learning loop grade this forecast later.");
    }

    Ok(())
}

fn print_item(item: &ForecastItem, is_income: bool) {
    println!(
        "      {:<26} {:>3} × {:>10} = {:>12}",
        format!("{} ({})", truncate(&item.name, 16), item.frequency.as_str()),
        item.dates.len(),
        money(item.amount),
        flow(item.total, is_income)
    );
}
