//! Recurring pattern and suppression list operations

use chrono::NaiveDate;
use rusqlite::{params, OptionalExtension, Row};

use super::{parse_date, parse_datetime, Database};
use crate::detect::DetectedPattern;
use crate::error::{Error, Result};
use crate::merchant;
use crate::models::{Confidence, Frequency, PatternSource, RecurringPattern};

const PATTERN_COLUMNS: &str = "id, user_id, merchant_key, display_name, frequency, average_amount, \
     next_expected_date, last_seen_date, is_income, category, confidence, occurrence_count, \
     source, user_modified, version, source_transaction_ids, created_at, updated_at";

fn map_pattern(row: &Row<'_>) -> rusqlite::Result<RecurringPattern> {
    let frequency_str: String = row.get(4)?;
    let next_str: String = row.get(6)?;
    let last_str: String = row.get(7)?;
    let confidence_str: String = row.get(10)?;
    let source_str: String = row.get(12)?;
    let ids_json: String = row.get(15)?;
    let created_at_str: String = row.get(16)?;
    let updated_at_str: String = row.get(17)?;

    Ok(RecurringPattern {
        id: row.get(0)?,
        user_id: row.get(1)?,
        merchant_key: row.get(2)?,
        display_name: row.get(3)?,
        frequency: frequency_str.parse().unwrap_or(Frequency::Monthly),
        average_amount: row.get(5)?,
        next_expected_date: parse_date(&next_str),
        last_seen_date: parse_date(&last_str),
        is_income: row.get(8)?,
        category: row.get(9)?,
        confidence: confidence_str.parse().unwrap_or(Confidence::Low),
        occurrence_count: row.get(11)?,
        source: source_str.parse().unwrap_or(PatternSource::Detected),
        user_modified: row.get(13)?,
        version: row.get(14)?,
        source_transaction_ids: serde_json::from_str(&ids_json).unwrap_or_default(),
        created_at: parse_datetime(&created_at_str),
        updated_at: parse_datetime(&updated_at_str),
    })
}

/// Fields a user may edit on an existing pattern
///
/// None means "leave unchanged". Edits set `user_modified`, which shields
/// the pattern from automated re-detection.
#[derive(Debug, Clone, Default)]
pub struct PatternUpdate {
    pub display_name: Option<String>,
    pub frequency: Option<Frequency>,
    pub next_expected_date: Option<NaiveDate>,
    pub average_amount: Option<f64>,
    pub category: Option<String>,
}

impl PatternUpdate {
    pub fn is_empty(&self) -> bool {
        self.display_name.is_none()
            && self.frequency.is_none()
            && self.next_expected_date.is_none()
            && self.average_amount.is_none()
            && self.category.is_none()
    }
}

impl Database {
    /// Active recurring patterns for a user, income first then by amount
    pub fn get_active_patterns(&self, user_id: i64) -> Result<Vec<RecurringPattern>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM recurring_patterns WHERE user_id = ?
             ORDER BY is_income DESC, average_amount DESC",
            PATTERN_COLUMNS
        ))?;

        let patterns = stmt
            .query_map(params![user_id], map_pattern)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(patterns)
    }

    /// Get a pattern by ID
    pub fn get_pattern(&self, id: i64) -> Result<Option<RecurringPattern>> {
        let conn = self.conn()?;
        let pattern = conn
            .query_row(
                &format!("SELECT {} FROM recurring_patterns WHERE id = ?", PATTERN_COLUMNS),
                params![id],
                map_pattern,
            )
            .optional()?;
        Ok(pattern)
    }

    /// Insert or refresh a detector-produced pattern
    ///
    /// Returns None when the write was skipped: the merchant is suppressed
    /// (a denied key must never be resurrected by a stale run), or the
    /// existing row is user-modified or user-declared.
    pub fn upsert_detected_pattern(
        &self,
        user_id: i64,
        detected: &DetectedPattern,
    ) -> Result<Option<i64>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let suppressed: Option<i64> = tx
            .query_row(
                "SELECT id FROM suppressions WHERE user_id = ? AND merchant_key = ?",
                params![user_id, detected.merchant_key],
                |row| row.get(0),
            )
            .optional()?;
        if suppressed.is_some() {
            return Ok(None);
        }

        let existing: Option<(i64, bool, String)> = tx
            .query_row(
                "SELECT id, user_modified, source FROM recurring_patterns
                 WHERE user_id = ? AND merchant_key = ? AND is_income = ?",
                params![user_id, detected.merchant_key, detected.is_income],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let ids_json = serde_json::to_string(&detected.source_transaction_ids)?;

        let id = match existing {
            Some((id, user_modified, source)) => {
                if user_modified || source == PatternSource::Manual.as_str() {
                    return Ok(None);
                }
                tx.execute(
                    r#"
                    UPDATE recurring_patterns
                    SET display_name = ?, frequency = ?, average_amount = ?,
                        next_expected_date = ?, last_seen_date = ?,
                        category = COALESCE(?, category), confidence = ?,
                        occurrence_count = ?, source_transaction_ids = ?,
                        version = version + 1, updated_at = CURRENT_TIMESTAMP
                    WHERE id = ?
                    "#,
                    params![
                        detected.display_name,
                        detected.frequency.as_str(),
                        detected.average_amount,
                        detected.next_expected_date.to_string(),
                        detected.last_seen_date.to_string(),
                        detected.category,
                        detected.confidence.as_str(),
                        detected.occurrence_count,
                        ids_json,
                        id,
                    ],
                )?;
                id
            }
            None => {
                tx.execute(
                    r#"
                    INSERT INTO recurring_patterns
                        (user_id, merchant_key, display_name, frequency, average_amount,
                         next_expected_date, last_seen_date, is_income, category, confidence,
                         occurrence_count, source, source_transaction_ids)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'detected', ?)
                    "#,
                    params![
                        user_id,
                        detected.merchant_key,
                        detected.display_name,
                        detected.frequency.as_str(),
                        detected.average_amount,
                        detected.next_expected_date.to_string(),
                        detected.last_seen_date.to_string(),
                        detected.is_income,
                        detected.category,
                        detected.confidence.as_str(),
                        detected.occurrence_count,
                        ids_json,
                    ],
                )?;
                tx.last_insert_rowid()
            }
        };

        tx.commit()?;
        Ok(Some(id))
    }

    /// Insert a user-declared recurring item, bypassing detection
    pub fn add_manual_pattern(
        &self,
        user_id: i64,
        name: &str,
        amount: f64,
        frequency: Frequency,
        is_income: bool,
        next_date: Option<NaiveDate>,
        category: Option<&str>,
    ) -> Result<i64> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidInput("Name cannot be empty".to_string()));
        }
        if !amount.is_finite() || amount <= 0.0 {
            return Err(Error::InvalidInput(format!(
                "Amount must be positive, got {}",
                amount
            )));
        }
        let merchant_key = merchant::normalize(name);
        if merchant_key.is_empty() {
            return Err(Error::InvalidInput(format!(
                "Name '{}' normalizes to an empty merchant key",
                name
            )));
        }

        let today = chrono::Utc::now().date_naive();
        let next = next_date.unwrap_or(today + chrono::Duration::days(frequency.interval_days()));
        if next < today {
            return Err(Error::InvalidInput(format!(
                "Next date {} is in the past",
                next
            )));
        }

        let conn = self.conn()?;
        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM recurring_patterns
                 WHERE user_id = ? AND merchant_key = ? AND is_income = ?",
                params![user_id, merchant_key, is_income],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(id) = existing {
            return Err(Error::InvalidInput(format!(
                "A pattern for this merchant already exists (id {})",
                id
            )));
        }

        // Manual entries carry high confidence and are shielded from
        // re-detection by their source marker.
        conn.execute(
            r#"
            INSERT INTO recurring_patterns
                (user_id, merchant_key, display_name, frequency, average_amount,
                 next_expected_date, last_seen_date, is_income, category, confidence,
                 occurrence_count, source, source_transaction_ids)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 'high', 0, 'manual', '[]')
            "#,
            params![
                user_id,
                merchant_key,
                name,
                frequency.as_str(),
                amount,
                next.to_string(),
                today.to_string(),
                is_income,
                category,
            ],
        )?;

        Ok(conn.last_insert_rowid())
    }

    /// Apply a user edit with optimistic concurrency
    ///
    /// The caller supplies the version it read; a mismatch means someone
    /// else wrote first and surfaces as `Error::Conflict` so the caller
    /// can re-read and retry.
    pub fn update_pattern(
        &self,
        id: i64,
        expected_version: i64,
        update: &PatternUpdate,
    ) -> Result<RecurringPattern> {
        if update.is_empty() {
            return Err(Error::InvalidInput("No changes supplied".to_string()));
        }

        let mut sets: Vec<String> = Vec::new();
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(name) = &update.display_name {
            sets.push("display_name = ?".to_string());
            values.push(Box::new(name.clone()));
        }
        if let Some(freq) = update.frequency {
            sets.push("frequency = ?".to_string());
            values.push(Box::new(freq.as_str().to_string()));
        }
        if let Some(date) = update.next_expected_date {
            sets.push("next_expected_date = ?".to_string());
            values.push(Box::new(date.to_string()));
        }
        if let Some(amount) = update.average_amount {
            if !amount.is_finite() || amount <= 0.0 {
                return Err(Error::InvalidInput(format!(
                    "Amount must be positive, got {}",
                    amount
                )));
            }
            sets.push("average_amount = ?".to_string());
            values.push(Box::new(amount));
        }
        if let Some(category) = &update.category {
            sets.push("category = ?".to_string());
            values.push(Box::new(category.clone()));
        }

        sets.push("user_modified = 1".to_string());
        sets.push("version = version + 1".to_string());
        sets.push("updated_at = CURRENT_TIMESTAMP".to_string());

        let sql = format!(
            "UPDATE recurring_patterns SET {} WHERE id = ? AND version = ?",
            sets.join(", ")
        );
        values.push(Box::new(id));
        values.push(Box::new(expected_version));

        let conn = self.conn()?;
        let value_refs: Vec<&dyn rusqlite::ToSql> = values.iter().map(|v| v.as_ref()).collect();
        let updated = conn.execute(&sql, value_refs.as_slice())?;

        if updated == 0 {
            return match self.get_pattern(id)? {
                Some(current) => Err(Error::Conflict(format!(
                    "Pattern {} is at version {}, expected {}",
                    id, current.version, expected_version
                ))),
                None => Err(Error::NotFound(format!("Pattern {}", id))),
            };
        }

        self.get_pattern(id)?
            .ok_or_else(|| Error::NotFound(format!("Pattern {}", id)))
    }

    /// Clear the user-modified shield so the next detection run may refresh
    /// this pattern again.
    pub fn release_pattern_override(&self, id: i64) -> Result<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE recurring_patterns
             SET user_modified = 0, version = version + 1, updated_at = CURRENT_TIMESTAMP
             WHERE id = ?",
            params![id],
        )?;
        if updated == 0 {
            return Err(Error::NotFound(format!("Pattern {}", id)));
        }
        Ok(())
    }

    /// Delete a pattern and suppress its merchant key from future detection
    pub fn delete_pattern(&self, id: i64) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let row: Option<(i64, String)> = tx
            .query_row(
                "SELECT user_id, merchant_key FROM recurring_patterns WHERE id = ?",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let (user_id, merchant_key) = match row {
            Some(r) => r,
            None => return Err(Error::NotFound(format!("Pattern {}", id))),
        };

        tx.execute("DELETE FROM recurring_patterns WHERE id = ?", params![id])?;
        tx.execute(
            "INSERT OR IGNORE INTO suppressions (user_id, merchant_key, reason) VALUES (?, ?, 'removed')",
            params![user_id, merchant_key],
        )?;

        tx.commit()?;
        Ok(())
    }

    /// Merchant keys excluded from detection for this user
    pub fn get_suppression_list(&self, user_id: i64) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT merchant_key FROM suppressions WHERE user_id = ? ORDER BY merchant_key",
        )?;
        let keys = stmt
            .query_map(params![user_id], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(keys)
    }

    /// Add a merchant key to the suppression list
    ///
    /// Returns true when the key was newly added.
    pub fn add_suppression(&self, user_id: i64, merchant_key: &str, reason: Option<&str>) -> Result<bool> {
        let conn = self.conn()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO suppressions (user_id, merchant_key, reason) VALUES (?, ?, ?)",
            params![user_id, merchant_key, reason],
        )?;
        Ok(inserted > 0)
    }

    /// Remove one suppression, letting detection see the merchant again
    pub fn remove_suppression(&self, user_id: i64, merchant_key: &str) -> Result<bool> {
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM suppressions WHERE user_id = ? AND merchant_key = ?",
            params![user_id, merchant_key],
        )?;
        Ok(removed > 0)
    }

    /// Clear the whole suppression list for a user
    pub fn clear_suppressions(&self, user_id: i64) -> Result<usize> {
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM suppressions WHERE user_id = ?",
            params![user_id],
        )?;
        Ok(removed)
    }
}
