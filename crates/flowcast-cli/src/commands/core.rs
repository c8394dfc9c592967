//! Init and detect commands, plus the helpers every other command leans on:
//! `open_db` for the encrypted-by-default database handle and `resolve_user`
//! for turning the --user name into a row id.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::Local;
use flowcast_core::detect::DetectorConfig;
use flowcast_core::{pipeline, Database};

/// Encrypted handle unless the user opted out with --no-encrypt.
pub fn open_db(db_path: &Path, no_encrypt: bool) -> Result<Database> {
    let path_str = db_path.to_string_lossy();
    if no_encrypt {
        Database::new_unencrypted(&path_str).context("Failed to open database (unencrypted)")
    } else {
        Database::new(&path_str).context("Failed to open database")
    }
}

/// Resolve the --user argument to a user id, creating the user on first use
pub fn resolve_user(db: &Database, name: &str) -> Result<i64> {
    db.upsert_user(name)
        .with_context(|| format!("Failed to resolve user '{}'", name))
}

pub fn cmd_init(db_path: &Path, user: &str, no_encrypt: bool) -> Result<()> {
    println!("🔧 Setting up database at {}...", db_path.display());

    let db = open_db(db_path, no_encrypt)?;
    let user_id = resolve_user(&db, user)?;
    println!("   Created user '{}' (id {})", user, user_id);

    if no_encrypt {
        println!("   ⚠️  Encryption: off (--no-encrypt)");
    } else {
        println!("   🔒 Encryption: on");
    }

    println!("✅ Database ready.");
    println!();
    println!("Next steps:");
    println!("  1. Add an account:        flow accounts add Checking --balance 2500");
    println!("  2. Import transactions:   flow import --file statement.csv");
    println!("  3. Project your balance:  flow forecast");

    Ok(())
}

pub fn cmd_detect(db_path: &Path, user: &str, no_encrypt: bool) -> Result<()> {
    println!("🔍 Detecting recurring charges...");

    let db = open_db(db_path, no_encrypt)?;
    let user_id = resolve_user(&db, user)?;
    let today = Local::now().date_naive();

    let outcome = pipeline::run_detection(&db, user_id, today, &DetectorConfig::default())?;

    println!();
    println!("📊 Detection results");
    println!("   ─────────────────────────────");
    println!("   Recurring candidates: {}", outcome.detected);
    println!("   ✅ Saved as patterns: {}", outcome.patterns_saved);
    println!("   💡 Queued for review: {}", outcome.suggestions_queued);

    let pending = db.pending_suggestion_count(user_id)?;
    if pending > 0 {
        println!();
        println!(
            "💡 {} suggestion{} awaiting review. Run 'flow review' to confirm or deny.",
            pending,
            if pending == 1 { "" } else { "s" }
        );
    } else if outcome.detected == 0 {
        println!();
        println!("   Nothing recurring found yet. Import more history and re-run.");
    }

    Ok(())
}
