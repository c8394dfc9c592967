//! Account command implementations (list, add, set-balance)

use anyhow::{bail, Result};
use flowcast_core::models::AccountType;
use flowcast_core::Database;

use super::money;

pub fn cmd_accounts_list(db: &Database, user_id: i64) -> Result<()> {
    let accounts = db.list_accounts(user_id)?;

    if accounts.is_empty() {
        println!("No accounts yet. Add one with:");
        println!("  flow accounts add Checking --balance 2500");
        return Ok(());
    }

    println!();
    println!("📁 Accounts");
    println!("   ─────────────────────────────────────────────");

    for account in &accounts {
        println!(
            "   [{}] {:<20} {:<9} {:>12}",
            account.id,
            account.name,
            account.account_type.as_str(),
            money(account.balance)
        );
    }

    println!("   ─────────────────────────────────────────────");
    println!(
        "   Forecastable cash: {}",
        money(db.cash_balance(user_id)?)
    );

    Ok(())
}

pub fn cmd_accounts_add(
    db: &Database,
    user_id: i64,
    name: &str,
    account_type: &str,
    balance: f64,
) -> Result<()> {
    let account_type: AccountType = account_type
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))?;

    let id = db.upsert_account(user_id, name, account_type, balance)?;
    // upsert leaves an existing row untouched, so re-adding refreshes the balance
    db.set_account_balance(id, balance)?;
    println!(
        "✅ Account '{}' ({}) saved with balance {} (id {})",
        name,
        account_type.as_str(),
        money(balance),
        id
    );

    if !account_type.is_cash() {
        println!("   Credit accounts are tracked but excluded from the cash forecast.");
    }

    Ok(())
}

pub fn cmd_accounts_set_balance(
    db: &Database,
    user_id: i64,
    name: &str,
    balance: f64,
) -> Result<()> {
    let accounts = db.list_accounts(user_id)?;
    let Some(account) = accounts
        .iter()
        .find(|a| a.name.eq_ignore_ascii_case(name))
    else {
        bail!(
            "Account '{}' not found. Run 'flow accounts' to see what exists.",
            name
        );
    };

    db.set_account_balance(account.id, balance)?;
    println!("✅ {} balance set to {}", account.name, money(balance));
    println!(
        "   Forecastable cash is now {}",
        money(db.cash_balance(user_id)?)
    );

    Ok(())
}
