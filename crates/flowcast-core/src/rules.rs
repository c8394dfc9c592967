//! Category rules
//!
//! User-authored rules that assign categories to transactions by matching
//! the merchant text. Rules apply in priority order (lowest number first)
//! and the first match wins. Matching is case-insensitive: the merchant
//! text is lowercased before comparison, so regex patterns see lowercase
//! input.

use regex::Regex;
use tracing::{debug, info};

use crate::db::Database;
use crate::error::Result;
use crate::models::{CategoryRule, MatchType};

/// A rule with its regex (if any) compiled once for the whole run
pub struct CompiledRule {
    rule: CategoryRule,
    regex: Option<Regex>,
}

impl CompiledRule {
    pub fn category(&self) -> &str {
        &self.rule.category
    }

    fn matches(&self, lowered: &str) -> bool {
        match self.rule.match_type {
            MatchType::Contains => lowered.contains(&self.rule.pattern.to_lowercase()),
            MatchType::Exact => lowered == self.rule.pattern.to_lowercase(),
            MatchType::Regex => self
                .regex
                .as_ref()
                .is_some_and(|re| re.is_match(lowered)),
        }
    }
}

/// Compile a rule list, preserving its order.
///
/// Patterns are validated when a rule is created, so a compile failure
/// here means the stored pattern was edited out from under us.
pub fn compile_rules(rules: Vec<CategoryRule>) -> Result<Vec<CompiledRule>> {
    rules
        .into_iter()
        .map(|rule| {
            let regex = match rule.match_type {
                MatchType::Regex => Some(Regex::new(&rule.pattern)?),
                _ => None,
            };
            Ok(CompiledRule { rule, regex })
        })
        .collect()
}

/// First matching rule's category for a piece of merchant text
pub fn categorize<'a>(rules: &'a [CompiledRule], merchant_text: &str) -> Option<&'a str> {
    let lowered = merchant_text.to_lowercase();
    rules
        .iter()
        .find(|rule| rule.matches(&lowered))
        .map(|rule| rule.category())
}

/// Run the user's rules over their uncategorized transactions.
///
/// Returns how many transactions were assigned a category. Transactions
/// no rule matches are left untouched for the next run (or for AI
/// classification).
pub fn apply_rules(db: &Database, user_id: i64, limit: i64) -> Result<usize> {
    let rules = compile_rules(db.list_category_rules(user_id)?)?;
    if rules.is_empty() {
        return Ok(0);
    }

    let mut applied = 0;
    for tx in db.uncategorized_transactions(user_id, limit)? {
        if let Some(category) = categorize(&rules, tx.merchant_input()) {
            db.set_transaction_category(tx.id, Some(category))?;
            debug!(tx_id = tx.id, category, "rule matched");
            applied += 1;
        }
    }

    info!(user_id, applied, "category rules applied");
    Ok(applied)
}
