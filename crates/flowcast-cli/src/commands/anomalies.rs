//! Anomaly command implementations (scan, list, dismiss, confirm)

use std::path::Path;

use anyhow::{bail, Result};
use chrono::Local;
use flowcast_core::anomaly::AnomalyConfig;
use flowcast_core::models::{AnomalyStatus, AnomalyType, Severity};
use flowcast_core::{pipeline, Database};

use super::{open_db, resolve_user};

pub fn cmd_scan(db_path: &Path, user: &str, no_encrypt: bool) -> Result<()> {
    println!("🔎 Scanning recent transactions for anomalies...");

    let db = open_db(db_path, no_encrypt)?;
    let user_id = resolve_user(&db, user)?;
    let today = Local::now().date_naive();

    let outcome = pipeline::run_anomaly_scan(&db, user_id, today, &AnomalyConfig::default())?;

    println!();
    println!("📊 Scan Results");
    println!("   ─────────────────────────────");
    println!("   Merchant baselines: {}", outcome.baselines);
    println!("   Anomalies found: {}", outcome.anomalies_found);
    println!("   New: {}   Already known: {}", outcome.save.saved, outcome.save.duplicates);

    if outcome.save.saved > 0 {
        println!();
        println!("⚠️  Run 'flow anomalies list' to see what changed.");
    } else {
        println!();
        println!("✅ Nothing new. Your recent activity matches its history.");
    }

    Ok(())
}

fn type_icon(anomaly_type: AnomalyType) -> &'static str {
    match anomaly_type {
        AnomalyType::NewMerchant => "🆕",
        AnomalyType::AmountOutlier => "📈",
        AnomalyType::MissedRecurring => "⏰",
    }
}

pub fn cmd_anomalies_list(db: &Database, user_id: i64, status: Option<&str>) -> Result<()> {
    let status = status
        .map(|s| s.parse::<AnomalyStatus>().map_err(|e| anyhow::anyhow!(e)))
        .transpose()?;
    // No filter defaults to the open items; everything else is archaeology.
    let effective = status.or(Some(AnomalyStatus::Pending));
    let anomalies = db.list_anomalies(user_id, effective)?;

    if anomalies.is_empty() {
        match effective {
            Some(AnomalyStatus::Pending) => {
                println!("✅ No open anomalies. Your recent activity matches its history.")
            }
            _ => println!("No anomalies with that status."),
        }
        return Ok(());
    }

    println!();
    println!("⚠️  Anomalies");
    println!("   ──────────────────────────────────────────────────────────────────────");

    for a in &anomalies {
        let severity_mark = match a.severity {
            Severity::Critical => "❗",
            Severity::Warning => "⚠️ ",
        };
        let fp_mark = if a.false_positive { " (learned: expected)" } else { "" };
        println!(
            "   [{:>4}] {} {} {}{}",
            a.id,
            severity_mark,
            type_icon(a.anomaly_type),
            a.anomaly_type.label(),
            fp_mark
        );
        println!("          {}", a.detail);
    }

    println!();
    println!("   Dismiss expected ones with: flow anomalies dismiss <id> --feedback expected");

    Ok(())
}

pub fn cmd_anomalies_dismiss(db: &Database, id: i64, feedback: Option<&str>) -> Result<()> {
    if db.get_anomaly(id)?.is_none() {
        bail!("Anomaly {} not found", id);
    }

    let updated = db.update_anomaly_status(id, AnomalyStatus::Dismissed, feedback)?;
    println!("✅ Anomaly {} dismissed.", id);
    if updated.false_positive {
        println!(
            "   Marked as expected; future outlier checks for '{}' get wider thresholds.",
            updated.merchant_key
        );
    }

    Ok(())
}

pub fn cmd_anomalies_confirm(db: &Database, id: i64) -> Result<()> {
    if db.get_anomaly(id)?.is_none() {
        bail!("Anomaly {} not found", id);
    }

    db.update_anomaly_status(id, AnomalyStatus::Confirmed, None)?;
    println!("✅ Anomaly {} confirmed as a real problem.", id);

    Ok(())
}
