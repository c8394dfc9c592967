//! Category rule command implementations (list, add, delete, test, apply)

use anyhow::{bail, Result};
use flowcast_core::models::MatchType;
use flowcast_core::{rules, Database};

use super::truncate;

pub fn cmd_rules_list(db: &Database, user_id: i64) -> Result<()> {
    let rule_list = db.list_category_rules(user_id)?;

    if rule_list.is_empty() {
        println!("No category rules yet. Add one with:");
        println!("  flow rules add Groceries \"whole foods\"");
        return Ok(());
    }

    println!();
    println!("🏷️  Category Rules (checked in priority order, first match wins)");
    println!("   ──────────────────────────────────────────────────────────────");

    for rule in &rule_list {
        println!(
            "   [{:>4}] p{:<4} {:<8} {:<28} → {}",
            rule.id,
            rule.priority,
            rule.match_type.as_str(),
            truncate(&rule.pattern, 28),
            rule.category
        );
    }

    Ok(())
}

pub fn cmd_rules_add(
    db: &Database,
    user_id: i64,
    category: &str,
    pattern: &str,
    pattern_type: &str,
    priority: i64,
) -> Result<()> {
    let match_type: MatchType = pattern_type.parse().map_err(|e: String| anyhow::anyhow!(e))?;

    let id = db.add_category_rule(user_id, pattern, match_type, category, priority)?;
    println!(
        "✅ Rule added: {} '{}' → {} (id {}, priority {})",
        match_type.as_str(),
        pattern,
        category,
        id,
        priority
    );
    println!("   Apply it to existing transactions with 'flow rules apply'.");

    Ok(())
}

pub fn cmd_rules_delete(db: &Database, id: i64) -> Result<()> {
    db.delete_category_rule(id)?;
    println!("✅ Rule {} deleted.", id);
    Ok(())
}

pub fn cmd_rules_test(db: &Database, user_id: i64, description: &str) -> Result<()> {
    let compiled = rules::compile_rules(db.list_category_rules(user_id)?)?;
    if compiled.is_empty() {
        bail!("No rules to test. Add one first with 'flow rules add'.");
    }

    match rules::categorize(&compiled, description) {
        Some(category) => println!("✅ '{}' → {}", truncate(description, 40), category),
        None => println!("❌ No rule matches '{}'", truncate(description, 40)),
    }

    Ok(())
}

pub fn cmd_rules_apply(db: &Database, user_id: i64, limit: i64) -> Result<()> {
    println!("🏷️  Applying category rules...");

    let applied = rules::apply_rules(db, user_id, limit)?;
    if applied > 0 {
        println!("✅ Categorized {} transaction{}", applied, if applied == 1 { "" } else { "s" });
    } else {
        println!("   Nothing to do: no uncategorized transactions matched a rule.");
    }

    Ok(())
}
