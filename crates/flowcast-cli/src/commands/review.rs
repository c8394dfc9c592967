//! Suggestion review queue command implementations (list, confirm, deny)

use anyhow::Result;
use flowcast_core::models::{Confidence, DenyReason};
use flowcast_core::{review, Database};

use super::{flow, truncate};

pub fn cmd_review_list(db: &Database, user_id: i64) -> Result<()> {
    let suggestions = review::list_pending(db, user_id)?;

    if suggestions.is_empty() {
        println!("✅ Review queue is empty.");
        println!("   Run 'flow detect' after importing new history to refill it.");
        return Ok(());
    }

    println!();
    println!("💡 Pending Suggestions ({})", suggestions.len());
    println!("   ──────────────────────────────────────────────────────────────────────");

    for s in &suggestions {
        let confidence = match s.confidence {
            Confidence::High => "high",
            Confidence::Medium => "medium",
            Confidence::Low => "low",
        };
        println!(
            "   [{:>4}] {:<24} {:<9} {:>12}  seen {}x  ({})",
            s.id,
            truncate(&s.display_name, 24),
            s.frequency.as_str(),
            flow(s.average_amount, s.is_income),
            s.occurrence_count,
            confidence
        );
        println!("          {}", s.detection_reason);
    }

    println!();
    println!("   Confirm: flow review confirm <ids>    Deny: flow review deny <ids> --reason ended");

    Ok(())
}

pub fn cmd_review_confirm(db: &Database, ids: &[i64]) -> Result<()> {
    let outcome = review::confirm_many(db, ids)?;

    println!(
        "✅ Confirmed {} suggestion{}",
        outcome.succeeded,
        if outcome.succeeded == 1 { "" } else { "s" }
    );
    if outcome.already_done > 0 {
        println!("   {} already confirmed (no change)", outcome.already_done);
    }
    if outcome.failed > 0 {
        println!(
            "   ⚠️  {} failed; re-run 'flow review' to see what is still pending",
            outcome.failed
        );
    }
    if outcome.succeeded > 0 {
        println!("   Promoted patterns now feed the forecast. Try 'flow forecast'.");
    }

    Ok(())
}

pub fn cmd_review_deny(db: &Database, ids: &[i64], reason: &str) -> Result<()> {
    let reason: DenyReason = reason.parse().map_err(|e: String| anyhow::anyhow!(e))?;
    let outcome = review::deny_many(db, ids, reason)?;

    println!(
        "✅ Denied {} suggestion{} ({})",
        outcome.succeeded,
        if outcome.succeeded == 1 { "" } else { "s" },
        reason.as_str()
    );
    if outcome.already_done > 0 {
        println!("   {} already denied (no change)", outcome.already_done);
    }
    if outcome.failed > 0 {
        println!("   ⚠️  {} failed; re-run 'flow review' to see what is still pending", outcome.failed);
    }
    println!("   Denied merchants stay suppressed until you confirm a future suggestion for them.");

    Ok(())
}
