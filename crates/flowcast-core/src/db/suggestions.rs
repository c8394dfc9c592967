//! Suggestion queue operations

use rusqlite::{params, OptionalExtension, Row};

use super::{parse_date, parse_datetime, Database};
use crate::detect::DetectedPattern;
use crate::error::{Error, Result};
use crate::models::{
    BillType, Confidence, DenyReason, Frequency, Suggestion, SuggestionStatus,
};

const SUGGESTION_COLUMNS: &str = "id, user_id, merchant_key, display_name, frequency, \
     average_amount, next_expected_date, last_seen_date, is_income, category, confidence, \
     occurrence_count, source_transaction_ids, detection_reason, bill_type, status, deny_reason, \
     created_at, resolved_at";

fn map_suggestion(row: &Row<'_>) -> rusqlite::Result<Suggestion> {
    let frequency_str: String = row.get(4)?;
    let next_str: String = row.get(6)?;
    let last_str: String = row.get(7)?;
    let confidence_str: String = row.get(10)?;
    let ids_json: String = row.get(12)?;
    let bill_type_str: String = row.get(14)?;
    let status_str: String = row.get(15)?;
    let deny_reason_str: Option<String> = row.get(16)?;
    let created_at_str: String = row.get(17)?;
    let resolved_at_str: Option<String> = row.get(18)?;

    Ok(Suggestion {
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
        source_transaction_ids: serde_json::from_str(&ids_json).unwrap_or_default(),
        detection_reason: row.get(13)?,
        bill_type: bill_type_str.parse().unwrap_or(BillType::Bill),
        status: status_str.parse().unwrap_or(SuggestionStatus::Pending),
        deny_reason: deny_reason_str.and_then(|s| s.parse().ok()),
        created_at: parse_datetime(&created_at_str),
        resolved_at: resolved_at_str.map(|s| parse_datetime(&s)),
    })
}

/// Result of confirming one suggestion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmOutcome {
    /// Promoted to the recurring pattern with this id
    Promoted(i64),
    /// Was already confirmed; no-op
    AlreadyConfirmed,
}

/// Result of denying one suggestion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyOutcome {
    Denied,
    /// Was already denied; no-op
    AlreadyDenied,
}

impl Database {
    /// Insert or refresh a suggestion from a detection run
    ///
    /// A pending suggestion for the same merchant series is refreshed in
    /// place when its shape still matches; when the inferred frequency or
    /// bill type changed, the stale row is superseded and a fresh one
    /// created. Resolved (confirmed/denied) suggestions are never touched.
    pub fn upsert_suggestion(&self, user_id: i64, detected: &DetectedPattern) -> Result<i64> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let pending: Option<(i64, String, String)> = tx
            .query_row(
                "SELECT id, frequency, bill_type FROM suggestions
                 WHERE user_id = ? AND merchant_key = ? AND is_income = ? AND status = 'pending'",
                params![user_id, detected.merchant_key, detected.is_income],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let ids_json = serde_json::to_string(&detected.source_transaction_ids)?;

        if let Some((id, frequency, bill_type)) = pending {
            if frequency == detected.frequency.as_str()
                && bill_type == detected.bill_type.as_str()
            {
                tx.execute(
                    r#"
                    UPDATE suggestions
                    SET display_name = ?, average_amount = ?, next_expected_date = ?,
                        last_seen_date = ?, category = COALESCE(?, category),
                        confidence = ?, occurrence_count = ?, source_transaction_ids = ?,
                        detection_reason = ?
                    WHERE id = ?
                    "#,
                    params![
                        detected.display_name,
                        detected.average_amount,
                        detected.next_expected_date.to_string(),
                        detected.last_seen_date.to_string(),
                        detected.category,
                        detected.confidence.as_str(),
                        detected.occurrence_count,
                        ids_json,
                        detected.detection_reason,
                        id,
                    ],
                )?;
                tx.commit()?;
                return Ok(id);
            }

            tx.execute(
                "UPDATE suggestions SET status = 'superseded', resolved_at = CURRENT_TIMESTAMP
                 WHERE id = ?",
                params![id],
            )?;
        }

        tx.execute(
            r#"
            INSERT INTO suggestions
                (user_id, merchant_key, display_name, frequency, average_amount,
                 next_expected_date, last_seen_date, is_income, category, confidence,
                 occurrence_count, source_transaction_ids, detection_reason, bill_type)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
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
                detected.detection_reason,
                detected.bill_type.as_str(),
            ],
        )?;
        let id = tx.last_insert_rowid();

        tx.commit()?;
        Ok(id)
    }

    /// Pending suggestions ordered by confidence desc, then occurrence count desc
    pub fn list_pending_suggestions(&self, user_id: i64) -> Result<Vec<Suggestion>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM suggestions
             WHERE user_id = ? AND status = 'pending'
             ORDER BY CASE confidence WHEN 'high' THEN 3 WHEN 'medium' THEN 2 ELSE 1 END DESC,
                      occurrence_count DESC, id ASC",
            SUGGESTION_COLUMNS
        ))?;

        let suggestions = stmt
            .query_map(params![user_id], map_suggestion)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(suggestions)
    }

    /// Get a suggestion by ID
    pub fn get_suggestion(&self, id: i64) -> Result<Option<Suggestion>> {
        let conn = self.conn()?;
        let suggestion = conn
            .query_row(
                &format!("SELECT {} FROM suggestions WHERE id = ?", SUGGESTION_COLUMNS),
                params![id],
                map_suggestion,
            )
            .optional()?;
        Ok(suggestion)
    }

    /// Count of pending suggestions
    pub fn pending_suggestion_count(&self, user_id: i64) -> Result<i64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM suggestions WHERE user_id = ? AND status = 'pending'",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Confirm one suggestion, promoting it to an active pattern
    ///
    /// Idempotent: confirming an already-confirmed suggestion is a no-op.
    /// The whole promotion (status flip, pattern upsert, suppression
    /// cleanup) commits atomically.
    pub fn confirm_suggestion(&self, id: i64) -> Result<ConfirmOutcome> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let suggestion = tx
            .query_row(
                &format!("SELECT {} FROM suggestions WHERE id = ?", SUGGESTION_COLUMNS),
                params![id],
                map_suggestion,
            )
            .optional()?
            .ok_or_else(|| Error::NotFound(format!("Suggestion {}", id)))?;

        match suggestion.status {
            SuggestionStatus::Confirmed => return Ok(ConfirmOutcome::AlreadyConfirmed),
            SuggestionStatus::Pending => {}
            other => {
                return Err(Error::InvalidInput(format!(
                    "Suggestion {} is {} and cannot be confirmed",
                    id, other
                )))
            }
        }

        tx.execute(
            "UPDATE suggestions SET status = 'confirmed', resolved_at = CURRENT_TIMESTAMP
             WHERE id = ?",
            params![id],
        )?;

        // Confirming un-denies the merchant
        tx.execute(
            "DELETE FROM suppressions WHERE user_id = ? AND merchant_key = ?",
            params![suggestion.user_id, suggestion.merchant_key],
        )?;

        let ids_json = serde_json::to_string(&suggestion.source_transaction_ids)?;
        tx.execute(
            r#"
            INSERT INTO recurring_patterns
                (user_id, merchant_key, display_name, frequency, average_amount,
                 next_expected_date, last_seen_date, is_income, category, confidence,
                 occurrence_count, source, source_transaction_ids)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'detected', ?)
            ON CONFLICT(user_id, merchant_key, is_income) DO UPDATE SET
                display_name = excluded.display_name,
                frequency = excluded.frequency,
                average_amount = excluded.average_amount,
                next_expected_date = excluded.next_expected_date,
                last_seen_date = excluded.last_seen_date,
                category = COALESCE(excluded.category, category),
                confidence = excluded.confidence,
                occurrence_count = excluded.occurrence_count,
                source_transaction_ids = excluded.source_transaction_ids,
                version = version + 1,
                updated_at = CURRENT_TIMESTAMP
            WHERE recurring_patterns.source != 'manual' AND recurring_patterns.user_modified = 0
            "#,
            params![
                suggestion.user_id,
                suggestion.merchant_key,
                suggestion.display_name,
                suggestion.frequency.as_str(),
                suggestion.average_amount,
                suggestion.next_expected_date.to_string(),
                suggestion.last_seen_date.to_string(),
                suggestion.is_income,
                suggestion.category,
                suggestion.confidence.as_str(),
                suggestion.occurrence_count,
                ids_json,
            ],
        )?;

        let pattern_id: i64 = tx.query_row(
            "SELECT id FROM recurring_patterns
             WHERE user_id = ? AND merchant_key = ? AND is_income = ?",
            params![suggestion.user_id, suggestion.merchant_key, suggestion.is_income],
            |row| row.get(0),
        )?;

        tx.commit()?;
        Ok(ConfirmOutcome::Promoted(pattern_id))
    }

    /// Deny one suggestion, recording the reason and suppressing the merchant
    ///
    /// Idempotent: denying an already-denied suggestion is a no-op.
    pub fn deny_suggestion(&self, id: i64, reason: DenyReason) -> Result<DenyOutcome> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let row: Option<(i64, String, String)> = tx
            .query_row(
                "SELECT user_id, merchant_key, status FROM suggestions WHERE id = ?",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let (user_id, merchant_key, status) = match row {
            Some(r) => r,
            None => return Err(Error::NotFound(format!("Suggestion {}", id))),
        };

        match status.parse().unwrap_or(SuggestionStatus::Pending) {
            SuggestionStatus::Denied => return Ok(DenyOutcome::AlreadyDenied),
            SuggestionStatus::Pending => {}
            other => {
                return Err(Error::InvalidInput(format!(
                    "Suggestion {} is {} and cannot be denied",
                    id, other
                )))
            }
        }

        tx.execute(
            "UPDATE suggestions
             SET status = 'denied', deny_reason = ?, resolved_at = CURRENT_TIMESTAMP
             WHERE id = ?",
            params![reason.as_str(), id],
        )?;
        tx.execute(
            "INSERT OR IGNORE INTO suppressions (user_id, merchant_key, reason) VALUES (?, ?, ?)",
            params![user_id, merchant_key, reason.as_str()],
        )?;

        tx.commit()?;
        Ok(DenyOutcome::Denied)
    }

    /// Mark any pending suggestion for this merchant series superseded
    ///
    /// Used when a detection run auto-promotes the series to a pattern.
    pub fn supersede_pending_suggestion(
        &self,
        user_id: i64,
        merchant_key: &str,
        is_income: bool,
    ) -> Result<bool> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE suggestions SET status = 'superseded', resolved_at = CURRENT_TIMESTAMP
             WHERE user_id = ? AND merchant_key = ? AND is_income = ? AND status = 'pending'",
            params![user_id, merchant_key, is_income],
        )?;
        Ok(updated > 0)
    }
}
