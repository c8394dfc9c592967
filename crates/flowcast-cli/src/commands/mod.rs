//! One module per command family, re-exported flat for main.rs.
//!
//! - `accounts` - list, add, set-balance
//! - `anomalies` - scan plus list/dismiss/confirm triage
//! - `core` - init, detect, and the open_db/resolve_user helpers
//! - `forecast` - cash-flow projection
//! - `learn` - learning loop and the watch scheduler
//! - `ollama` - AI backend test and classify
//! - `patterns` - list, add, edit, release, delete
//! - `review` - suggestion queue list/confirm/deny
//! - `rules` - category rules list/add/delete/test/apply
//! - `status` - status, dashboard, reset
//! - `transactions` - import, list, add, categorize, flag, ignore

pub mod accounts;
pub mod anomalies;
pub mod core;
pub mod forecast;
pub mod learn;
pub mod ollama;
pub mod patterns;
pub mod review;
pub mod rules;
pub mod status;
pub mod transactions;

pub use accounts::*;
pub use anomalies::*;
pub use core::*;
pub use forecast::*;
pub use learn::*;
pub use ollama::*;
pub use patterns::*;
pub use review::*;
pub use rules::*;
pub use status::*;
pub use transactions::*;

use anyhow::{Context, Result};
use chrono::NaiveDate;

/// Clip a string to `max` bytes, marking the cut with "...".
pub fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        format!("{}...", &s[..max.saturating_sub(3)])
    }
}

/// Parse a YYYY-MM-DD argument
pub fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .with_context(|| format!("Invalid date '{}' (use YYYY-MM-DD)", s))
}

/// Format a dollar amount with the sign in front of the symbol
pub fn money(amount: f64) -> String {
    if amount < 0.0 {
        format!("-${:.2}", amount.abs())
    } else {
        format!("${:.2}", amount)
    }
}

/// Format a cash flow as the user thinks of it: + for money in, - for money out
///
/// Stored amounts use positive = expense, so the sign flips for display.
pub fn flow(amount: f64, is_income: bool) -> String {
    let magnitude = amount.abs();
    if is_income {
        format!("+${:.2}", magnitude)
    } else {
        format!("-${:.2}", magnitude)
    }
}
