//! Status-related command implementations (status, dashboard, reset)

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{Duration, Local};

use super::{flow, money, open_db, resolve_user};

pub fn cmd_status(db_path: &Path, user: &str, no_encrypt: bool) -> Result<()> {
    use flowcast_core::db::DB_KEY_ENV;
    use std::fs;

    println!();
    println!("📊 Flowcast Status");
    println!("   ─────────────────────────────────────────────────────────────");

    println!("   Database: {}", db_path.display());

    if db_path.exists() {
        if let Ok(metadata) = fs::metadata(db_path) {
            let size_kb = metadata.len() as f64 / 1024.0;
            if size_kb < 1024.0 {
                println!("   Size: {:.1} KB", size_kb);
            } else {
                println!("   Size: {:.1} MB", size_kb / 1024.0);
            }
        }
    } else {
        println!("   Size: (no database yet)");
    }

    // Key presence decides which encryption line we print
    let has_key = std::env::var(DB_KEY_ENV).is_ok();
    if no_encrypt {
        println!("   ⚠️  Encryption: off (--no-encrypt)");
    } else if has_key {
        println!("   🔒 Encryption: on ({}=***)", DB_KEY_ENV);
    } else {
        println!("   ❌ Encryption: required but {} is not set", DB_KEY_ENV);
    }

    // Try to open the database and show per-user stats
    if db_path.exists() {
        match open_db(db_path, no_encrypt) {
            Ok(db) => {
                let user_id = resolve_user(&db, user)?;
                println!();
                println!("   User: {}", user);
                println!("   Accounts: {}", db.list_accounts(user_id)?.len());
                println!("   Transactions: {}", db.transaction_count(user_id)?);
                println!(
                    "   Recurring patterns: {}",
                    db.get_active_patterns(user_id)?.len()
                );
                println!(
                    "   Pending suggestions: {}",
                    db.pending_suggestion_count(user_id)?
                );
                let open_anomalies = db
                    .list_anomalies(user_id, Some(flowcast_core::models::AnomalyStatus::Pending))?
                    .len();
                println!("   Open anomalies: {}", open_anomalies);
                println!(
                    "   Forecast multiplier: {:.2}",
                    db.latest_multiplier(user_id)?
                );
            }
            Err(e) => {
                println!();
                println!("   ❌ Could not open database: {}", e);
                if !no_encrypt && !has_key {
                    println!("      Set {} or pass --no-encrypt", DB_KEY_ENV);
                } else if has_key {
                    println!("      (Double-check the {} passphrase)", DB_KEY_ENV);
                }
            }
        }
    }

    println!();
    Ok(())
}

pub fn cmd_dashboard(db_path: &Path, user: &str, no_encrypt: bool) -> Result<()> {
    let db = open_db(db_path, no_encrypt)?;
    let user_id = resolve_user(&db, user)?;
    let today = Local::now().date_naive();

    println!();
    println!("╭─────────────────────────────────────────╮");
    println!("│          💰 Flowcast Dashboard          │");
    println!("╰─────────────────────────────────────────╯");
    println!();
    println!("  Cash balance:    {}", money(db.cash_balance(user_id)?));

    // Recurring activity expected over the next two weeks
    let soon = today + Duration::days(14);
    let mut upcoming: Vec<_> = db
        .get_active_patterns(user_id)?
        .into_iter()
        .filter(|p| p.next_expected_date <= soon)
        .collect();
    upcoming.sort_by_key(|p| p.next_expected_date);

    if !upcoming.is_empty() {
        println!();
        println!("  📅 Next 14 days:");
        for pattern in &upcoming {
            println!(
                "     {}  {:<24} {:>12}",
                pattern.next_expected_date,
                super::truncate(&pattern.display_name, 24),
                flow(pattern.average_amount, pattern.is_income)
            );
        }
    }

    let pending = db.pending_suggestion_count(user_id)?;
    let open_anomalies = db
        .list_anomalies(user_id, Some(flowcast_core::models::AnomalyStatus::Pending))?
        .len();

    println!();
    println!("  💡 Pending suggestions: {}", pending);
    println!("  ⚠️  Open anomalies: {}", open_anomalies);

    if let Some(snapshot) = db.latest_forecast_snapshot(user_id)? {
        if let Some(last) = snapshot.days.last() {
            println!();
            println!(
                "  🔮 Last forecast ({}): {} in {} days, {} alert{}",
                snapshot.generated_at.date_naive(),
                money(last.balance),
                snapshot.horizon_days,
                snapshot.alerts.len(),
                if snapshot.alerts.len() == 1 { "" } else { "s" }
            );
        }
    }

    println!();
    if pending > 0 {
        println!("  Run 'flow review' to triage detected recurring charges.");
    }
    if open_anomalies > 0 {
        println!("  Run 'flow anomalies list' to see what needs attention.");
    }

    Ok(())
}

/// Clear stored data, either table-by-table (soft) or by removing the file (hard).
pub fn cmd_reset(db_path: &Path, user: &str, soft: bool, yes: bool, no_encrypt: bool) -> Result<()> {
    use std::fs;
    use std::io::{self, Write};

    if soft {
        // Soft reset clears the data tables but keeps users, accounts, and rules
        if !db_path.exists() {
            anyhow::bail!("No database at {}", db_path.display());
        }

        if !yes {
            print!("⚠️  This will delete all transactions, patterns, suggestions, anomalies,\n");
            print!("   forecasts, and learning history.\n");
            print!("   Users, accounts, and category rules will be preserved.\n\n");
            print!("Are you sure? [y/N] ");
            io::stdout().flush()?;

            let mut input = String::new();
            io::stdin().read_line(&mut input)?;
            if !input.trim().eq_ignore_ascii_case("y") {
                println!("Cancelled.");
                return Ok(());
            }
        }

        let db = open_db(db_path, no_encrypt)?;
        db.soft_reset()?;

        println!("✅ Soft reset done.");
        println!("   Cleared: transactions, patterns, suggestions, anomalies, forecasts");
        println!("   Preserved: users, accounts, category rules");
    } else {
        // Hard reset drops the file and runs init again
        if !yes {
            print!("⚠️  This will delete the entire database file.\n");
            print!("   All data including accounts and rules will be lost.\n\n");
            print!("Are you sure? [y/N] ");
            io::stdout().flush()?;

            let mut input = String::new();
            io::stdin().read_line(&mut input)?;
            if !input.trim().eq_ignore_ascii_case("y") {
                println!("Cancelled.");
                return Ok(());
            }
        }

        if db_path.exists() {
            fs::remove_file(db_path)
                .with_context(|| format!("Failed to remove database: {}", db_path.display()))?;
            // Stale WAL sidecars would corrupt a fresh database at the same path
            let wal_path = db_path.with_extension("db-wal");
            let shm_path = db_path.with_extension("db-shm");
            let journal_path = db_path.with_extension("db-journal");
            let _ = fs::remove_file(wal_path);
            let _ = fs::remove_file(shm_path);
            let _ = fs::remove_file(journal_path);
        }

        super::cmd_init(db_path, user, no_encrypt)?;

        println!("\n✅ Hard reset done, fresh database ready.");
    }

    Ok(())
}
