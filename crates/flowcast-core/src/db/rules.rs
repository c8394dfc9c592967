//! Category rule operations

use rusqlite::{params, Row};

use super::{parse_datetime, Database};
use crate::error::{Error, Result};
use crate::models::{CategoryRule, MatchType};

fn map_rule(row: &Row<'_>) -> rusqlite::Result<CategoryRule> {
    let match_type_str: String = row.get(3)?;
    let created_at_str: String = row.get(6)?;
    Ok(CategoryRule {
        id: row.get(0)?,
        user_id: row.get(1)?,
        pattern: row.get(2)?,
        match_type: match_type_str.parse().unwrap_or(MatchType::Contains),
        category: row.get(4)?,
        priority: row.get(5)?,
        created_at: parse_datetime(&created_at_str),
    })
}

impl Database {
    /// Add a categorization rule
    ///
    /// Regex patterns are compiled up front so a bad pattern is rejected
    /// at creation time instead of failing every later apply run.
    pub fn add_category_rule(
        &self,
        user_id: i64,
        pattern: &str,
        match_type: MatchType,
        category: &str,
        priority: i64,
    ) -> Result<i64> {
        let pattern = pattern.trim();
        if pattern.is_empty() {
            return Err(Error::InvalidInput("Pattern cannot be empty".to_string()));
        }
        let category = category.trim();
        if category.is_empty() {
            return Err(Error::InvalidInput("Category cannot be empty".to_string()));
        }
        if match_type == MatchType::Regex {
            regex::Regex::new(pattern)
                .map_err(|e| Error::InvalidInput(format!("Invalid regex '{}': {}", pattern, e)))?;
        }

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO category_rules (user_id, pattern, match_type, category, priority)
             VALUES (?, ?, ?, ?, ?)",
            params![user_id, pattern, match_type.as_str(), category, priority],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// A user's rules in application order (priority, then insertion order)
    pub fn list_category_rules(&self, user_id: i64) -> Result<Vec<CategoryRule>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, pattern, match_type, category, priority, created_at
             FROM category_rules WHERE user_id = ? ORDER BY priority ASC, id ASC",
        )?;

        let rules = stmt
            .query_map(params![user_id], map_rule)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rules)
    }

    /// Delete a rule
    pub fn delete_category_rule(&self, id: i64) -> Result<()> {
        let conn = self.conn()?;
        let deleted = conn.execute("DELETE FROM category_rules WHERE id = ?", params![id])?;
        if deleted == 0 {
            return Err(Error::NotFound(format!("Category rule {}", id)));
        }
        Ok(())
    }
}
