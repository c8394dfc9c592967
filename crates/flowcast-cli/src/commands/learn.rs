//! Learning loop command and the watch scheduler

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use flowcast_core::anomaly::AnomalyConfig;
use flowcast_core::forecast::ForecastConfig;
use flowcast_core::{pipeline, AiBackend, AiClient, Database, UserLocks};
use tracing::{info, warn};

use super::{open_db, resolve_user};

pub async fn cmd_learn(db_path: &Path, user: &str, no_encrypt: bool) -> Result<()> {
    println!("🧠 Running the learning loop...");

    let db = open_db(db_path, no_encrypt)?;
    let user_id = resolve_user(&db, user)?;
    let today = Local::now().date_naive();

    let ai = AiClient::from_env();
    match &ai {
        Some(client) => println!(
            "   🤖 AI commentary enabled ({} @ {})",
            client.model(),
            client.host()
        ),
        None => println!("   💡 Tip: Set FLOWCAST_AI_HOST for plain-language accuracy commentary"),
    }

    let locks = UserLocks::new();
    let summary = pipeline::learn_for_user(&db, &locks, user_id, today, ai.as_ref()).await?;

    println!();
    println!("📊 Learning Results");
    println!("   ─────────────────────────────");
    println!(
        "   Detection refresh: {} patterns, {} suggestions",
        summary.patterns_saved, summary.suggestions_queued
    );
    println!(
        "   Forecasts graded: {} snapshot{}, {} day{}",
        summary.snapshots_compared,
        if summary.snapshots_compared == 1 { "" } else { "s" },
        summary.days_compared,
        if summary.days_compared == 1 { "" } else { "s" }
    );

    match &summary.record {
        Some(record) => {
            println!("   Mean error: {:.1}%", record.mean_error_percent);
            println!(
                "   Direction accuracy: {:.0}%",
                record.direction_accuracy * 100.0
            );
            println!(
                "   Multiplier: {:.2} (applied to future discretionary estimates)",
                record.accuracy_adjustment_multiplier
            );
        }
        None => println!("   Not enough graded days yet for an accuracy score."),
    }

    if let Some(explanation) = &summary.explanation {
        println!();
        println!("💬 {}", explanation);
    }

    Ok(())
}

pub async fn cmd_watch(db_path: &Path, every: u64, no_encrypt: bool) -> Result<()> {
    let hours = match std::env::var("FLOWCAST_LEARN_INTERVAL_HOURS") {
        Ok(v) => v
            .parse::<u64>()
            .with_context(|| format!("Invalid FLOWCAST_LEARN_INTERVAL_HOURS '{}'", v))?,
        Err(_) => every,
    };
    if hours == 0 {
        println!("Watch disabled (interval is 0).");
        println!("Pass --every or set FLOWCAST_LEARN_INTERVAL_HOURS to enable it.");
        return Ok(());
    }

    let db = open_db(db_path, no_encrypt)?;
    let locks = UserLocks::new();

    println!(
        "⏱️  Watching: scan + learn + forecast for every user, every {}h (Ctrl-C to stop)",
        hours
    );

    let mut ticker = tokio::time::interval(Duration::from_secs(hours * 60 * 60));
    loop {
        // First tick fires immediately, so startup doubles as a run.
        ticker.tick().await;
        let today = Local::now().date_naive();
        let ai = AiClient::from_env();
        let users = db.list_user_ids()?;
        info!(users = users.len(), "watch cycle start");

        for user_id in users {
            if let Err(e) = run_cycle(&db, &locks, user_id, today, ai.as_ref()).await {
                warn!(user_id, "watch cycle failed: {e}");
            }
        }
    }
}

/// One scheduled pass for one user.
///
/// Learning runs before the forecast so the stored snapshot already uses
/// the freshly adjusted multiplier. Learning itself refreshes detection,
/// so there is no separate detect step.
async fn run_cycle(
    db: &Database,
    locks: &UserLocks,
    user_id: i64,
    today: NaiveDate,
    ai: Option<&AiClient>,
) -> Result<()> {
    let scan = pipeline::scan_for_user(db, locks, user_id, today, &AnomalyConfig::default()).await?;
    let summary = pipeline::learn_for_user(db, locks, user_id, today, ai).await?;
    let snapshot =
        pipeline::forecast_for_user(db, locks, user_id, today, true, &ForecastConfig::default())
            .await?;

    info!(
        user_id,
        anomalies = scan.save.saved,
        graded = summary.snapshots_compared,
        alerts = snapshot.alerts.len(),
        "watch cycle complete"
    );
    Ok(())
}
