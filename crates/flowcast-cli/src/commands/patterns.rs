//! Recurring pattern command implementations (list, add, edit, release, delete)

use anyhow::{bail, Context, Result};
use flowcast_core::db::PatternUpdate;
use flowcast_core::models::{Confidence, Frequency, PatternSource};
use flowcast_core::Database;

use super::{flow, parse_date, truncate};

fn confidence_icon(confidence: Confidence) -> &'static str {
    match confidence {
        Confidence::High => "🟢",
        Confidence::Medium => "🟡",
        Confidence::Low => "🔴",
    }
}

pub fn cmd_patterns_list(db: &Database, user_id: i64) -> Result<()> {
    let patterns = db.get_active_patterns(user_id)?;

    if patterns.is_empty() {
        println!("No recurring patterns yet. Run 'flow detect' after importing history,");
        println!("or add one by hand: flow patterns add Rent 1800 --next 2026-09-01");
        return Ok(());
    }

    println!();
    println!("🔁 Recurring Patterns");
    println!("   ──────────────────────────────────────────────────────────────────────");

    for p in &patterns {
        let mut marks = String::new();
        if p.source == PatternSource::Manual {
            marks.push_str(" (manual)");
        }
        if p.user_modified {
            marks.push_str(" 🔒");
        }
        println!(
            "   [{:>4}] {} {:<24} {:<9} {:>12}  next {}{}",
            p.id,
            confidence_icon(p.confidence),
            truncate(&p.display_name, 24),
            p.frequency.as_str(),
            flow(p.average_amount, p.is_income),
            p.next_expected_date,
            marks
        );
    }

    println!();
    println!("   🔒 = user-edited; the detector will not overwrite it until released.");

    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub fn cmd_patterns_add(
    db: &Database,
    user_id: i64,
    name: &str,
    amount: f64,
    frequency: &str,
    next: Option<&str>,
    category: Option<&str>,
    income: bool,
) -> Result<()> {
    let frequency: Frequency = frequency.parse().map_err(|e: String| anyhow::anyhow!(e))?;
    let next_date = next.map(parse_date).transpose()?;

    let id = db.add_manual_pattern(user_id, name, amount, frequency, income, next_date, category)?;
    let saved = db
        .get_pattern(id)?
        .context("Pattern vanished right after insert")?;

    println!(
        "✅ Added {} pattern '{}' {} (id {})",
        saved.frequency.as_str(),
        name,
        flow(saved.average_amount, saved.is_income),
        id
    );
    println!("   Next expected: {}", saved.next_expected_date);
    println!("   Manual patterns are never overwritten by the detector.");

    Ok(())
}

pub fn cmd_patterns_edit(
    db: &Database,
    id: i64,
    name: Option<&str>,
    amount: Option<f64>,
    frequency: Option<&str>,
    next: Option<&str>,
    category: Option<&str>,
) -> Result<()> {
    let Some(current) = db.get_pattern(id)? else {
        bail!("Pattern {} not found", id);
    };

    let update = PatternUpdate {
        display_name: name.map(str::to_string),
        frequency: frequency
            .map(|f| f.parse().map_err(|e: String| anyhow::anyhow!(e)))
            .transpose()?,
        next_expected_date: next.map(parse_date).transpose()?,
        average_amount: amount,
        category: category.map(str::to_string),
    };
    if update.is_empty() {
        bail!("Nothing to change. Pass at least one of --name, --amount, --frequency, --next, --category.");
    }

    let updated = match db.update_pattern(id, current.version, &update) {
        Ok(p) => p,
        Err(e) if e.is_retryable() => {
            // A background run bumped the version between our read and
            // write. The edit carries absolute values, so reapply it on
            // the fresh row.
            let fresh = db
                .get_pattern(id)?
                .with_context(|| format!("Pattern {} disappeared mid-edit", id))?;
            db.update_pattern(id, fresh.version, &update)?
        }
        Err(e) => return Err(e.into()),
    };

    println!(
        "✅ Pattern {} updated: {} {} {}, next {}",
        updated.id,
        truncate(&updated.display_name, 24),
        updated.frequency.as_str(),
        flow(updated.average_amount, updated.is_income),
        updated.next_expected_date
    );
    println!("   🔒 Your edit shields this pattern from re-detection ('flow patterns release {}' to undo).", id);

    Ok(())
}

pub fn cmd_patterns_release(db: &Database, id: i64) -> Result<()> {
    if db.get_pattern(id)?.is_none() {
        bail!("Pattern {} not found", id);
    }
    db.release_pattern_override(id)?;
    println!("✅ Pattern {} released. The next 'flow detect' may refresh it.", id);
    Ok(())
}

pub fn cmd_patterns_delete(db: &Database, id: i64, yes: bool) -> Result<()> {
    use std::io::{self, Write};

    let Some(pattern) = db.get_pattern(id)? else {
        bail!("Pattern {} not found", id);
    };

    if !yes {
        print!(
            "⚠️  Delete '{}' and suppress future detections for '{}'? [y/N] ",
            pattern.display_name, pattern.merchant_key
        );
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        if !input.trim().eq_ignore_ascii_case("y") {
            println!("Cancelled.");
            return Ok(());
        }
    }

    db.delete_pattern(id)?;
    println!("✅ Pattern '{}' deleted.", pattern.display_name);
    println!(
        "   The detector will not re-suggest '{}' unless you confirm a new suggestion for it.",
        pattern.merchant_key
    );

    Ok(())
}
