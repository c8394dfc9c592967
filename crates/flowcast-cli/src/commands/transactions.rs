//! Transaction command implementations (import, list, add, categorize, flag, ignore)

use std::fs::File;
use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::Local;
use flowcast_core::detect::DetectorConfig;
use flowcast_core::models::AccountType;
use flowcast_core::{ingest, pipeline, rules, Database};

use super::{flow, open_db, parse_date, resolve_user, truncate};

pub fn cmd_import(
    db_path: &Path,
    user: &str,
    file: &Path,
    account: &str,
    no_rules: bool,
    no_detect: bool,
    no_encrypt: bool,
) -> Result<()> {
    println!("📥 Importing transactions from {}...", file.display());

    let db = open_db(db_path, no_encrypt)?;
    let user_id = resolve_user(&db, user)?;
    let account_id = find_or_create_account(&db, user_id, account)?;

    let reader =
        File::open(file).with_context(|| format!("Failed to open {}", file.display()))?;
    let rows = ingest::parse_csv(reader, account_id)?;
    if rows.is_empty() {
        println!("   No data rows found in the file.");
        return Ok(());
    }
    println!("   Parsed {} rows for account '{}'", rows.len(), account);

    let result = db.insert_transactions(user_id, account_id, &rows)?;
    println!(
        "✅ Imported {} transactions ({} duplicates skipped)",
        result.inserted, result.skipped
    );

    if !no_rules {
        let applied = rules::apply_rules(&db, user_id, 1000)?;
        if applied > 0 {
            println!("   🏷️  Categorized {} transactions by rule", applied);
        }
    }

    if !no_detect && result.inserted > 0 {
        println!();
        println!("🔍 Detecting recurring charges...");
        let today = Local::now().date_naive();
        let outcome = pipeline::run_detection(&db, user_id, today, &DetectorConfig::default())?;
        println!(
            "   {} candidates: {} saved as patterns, {} queued for review",
            outcome.detected, outcome.patterns_saved, outcome.suggestions_queued
        );
        if outcome.suggestions_queued > 0 {
            println!("   Run 'flow review' to confirm or deny suggestions.");
        }
    }

    Ok(())
}

fn find_or_create_account(db: &Database, user_id: i64, name: &str) -> Result<i64> {
    if let Some(account) = db
        .list_accounts(user_id)?
        .iter()
        .find(|a| a.name.eq_ignore_ascii_case(name))
    {
        return Ok(account.id);
    }
    let id = db.upsert_account(user_id, name, AccountType::Checking, 0.0)?;
    println!(
        "   Created account '{}' (set its balance with 'flow accounts set-balance {} <amount>')",
        name, name
    );
    Ok(id)
}

pub fn cmd_transactions_list(db: &Database, user_id: i64, limit: i64) -> Result<()> {
    let transactions = db.list_transactions(user_id, limit, 0)?;

    if transactions.is_empty() {
        println!("No transactions yet. Import some with:");
        println!("  flow import --file statement.csv");
        return Ok(());
    }

    println!();
    println!("💳 Recent Transactions");
    println!("   ──────────────────────────────────────────────────────────────────");

    for tx in &transactions {
        let mut marks = String::new();
        if tx.is_exceptional {
            marks.push_str(" ⚑");
        }
        if tx.ignored {
            marks.push_str(" (ignored)");
        }
        println!(
            "   [{:>5}] {}  {:<30} {:>12}  {}{}",
            tx.id,
            tx.date,
            truncate(tx.merchant_input(), 30),
            flow(tx.amount, tx.is_income),
            tx.category.as_deref().unwrap_or("-"),
            marks
        );
    }

    let total = db.transaction_count(user_id)?;
    if total > transactions.len() as i64 {
        println!();
        println!(
            "   Showing {} of {}. Use --limit to see more.",
            transactions.len(),
            total
        );
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub fn cmd_transactions_add(
    db: &Database,
    user_id: i64,
    description: &str,
    amount: f64,
    account: &str,
    date: Option<&str>,
    category: Option<&str>,
    income: bool,
) -> Result<()> {
    let accounts = db.list_accounts(user_id)?;
    let Some(target) = accounts
        .iter()
        .find(|a| a.name.eq_ignore_ascii_case(account))
    else {
        bail!(
            "Account '{}' not found. Add it first: flow accounts add {}",
            account,
            account
        );
    };

    let date = match date {
        Some(s) => parse_date(s)?,
        None => Local::now().date_naive(),
    };

    // Stored convention is positive = expense; a negative argument means
    // income even without the flag.
    let is_income = income || amount < 0.0;
    let amount = if is_income { -amount.abs() } else { amount };

    let id = db.add_manual_transaction(
        user_id,
        target.id,
        date,
        description,
        amount,
        category,
        is_income,
    )?;

    println!(
        "✅ Added {} {} on {} (id {})",
        truncate(description, 30),
        flow(amount, is_income),
        date,
        id
    );

    Ok(())
}

pub fn cmd_transactions_categorize(db: &Database, id: i64, category: &str) -> Result<()> {
    if db.get_transaction(id)?.is_none() {
        bail!("Transaction {} not found", id);
    }
    db.set_transaction_category(id, Some(category))?;
    println!("✅ Transaction {} categorized as '{}'", id, category);
    Ok(())
}

pub fn cmd_transactions_flag(db: &Database, id: i64, clear: bool) -> Result<()> {
    if db.get_transaction(id)?.is_none() {
        bail!("Transaction {} not found", id);
    }
    db.set_transaction_flags(id, Some(!clear), None)?;
    if clear {
        println!("✅ Transaction {} unflagged; it counts toward baselines again.", id);
    } else {
        println!("✅ Transaction {} flagged as a one-off.", id);
        println!("   It stays in the feed but no longer skews merchant baselines.");
    }
    Ok(())
}

pub fn cmd_transactions_ignore(db: &Database, id: i64, clear: bool) -> Result<()> {
    if db.get_transaction(id)?.is_none() {
        bail!("Transaction {} not found", id);
    }
    db.set_transaction_flags(id, None, Some(!clear))?;
    if clear {
        println!("✅ Transaction {} restored to analysis.", id);
    } else {
        println!("✅ Transaction {} excluded from all analysis.", id);
        println!("   Re-run 'flow forecast' to see the effect without it.");
    }
    Ok(())
}
