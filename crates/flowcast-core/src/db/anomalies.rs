//! Anomaly storage and feedback operations

use std::collections::HashMap;

use rusqlite::{params, OptionalExtension, Row};

use super::{parse_date, parse_datetime, Database};
use crate::error::{Error, Result};
use crate::models::{Anomaly, AnomalyStatus, AnomalyType, NewAnomaly, SaveOutcome, Severity};

const ANOMALY_BATCH_SIZE: usize = 25;

const ANOMALY_COLUMNS: &str = "id, user_id, transaction_id, pattern_id, merchant_key, type, \
     severity, status, amount, expected_date, detail, detected_at, false_positive, user_feedback";

fn map_anomaly(row: &Row<'_>) -> rusqlite::Result<Anomaly> {
    let type_str: String = row.get(5)?;
    let severity_str: String = row.get(6)?;
    let status_str: String = row.get(7)?;
    let expected_date_str: Option<String> = row.get(9)?;
    let detected_at_str: String = row.get(11)?;

    Ok(Anomaly {
        id: row.get(0)?,
        user_id: row.get(1)?,
        transaction_id: row.get(2)?,
        pattern_id: row.get(3)?,
        merchant_key: row.get(4)?,
        anomaly_type: type_str.parse().unwrap_or(AnomalyType::NewMerchant),
        severity: severity_str.parse().unwrap_or(Severity::Warning),
        status: status_str.parse().unwrap_or(AnomalyStatus::Pending),
        amount: row.get(8)?,
        expected_date: expected_date_str.map(|s| parse_date(&s)),
        detail: row.get(10)?,
        detected_at: parse_datetime(&detected_at_str),
        false_positive: row.get(12)?,
        user_feedback: row.get(13)?,
    })
}

impl Database {
    /// Save detected anomalies, skipping ones already recorded
    ///
    /// Uniqueness is (user, transaction, type) for transaction-backed
    /// anomalies and (user, pattern, type, expected date) for missed
    /// recurring charges, so re-running a scan never double-alerts.
    pub fn save_anomalies(&self, anomalies: &[NewAnomaly]) -> Result<SaveOutcome> {
        let mut outcome = SaveOutcome::default();

        for chunk in anomalies.chunks(ANOMALY_BATCH_SIZE) {
            let mut conn = self.conn()?;
            let tx = conn.transaction()?;

            for a in chunk {
                let inserted = tx.execute(
                    r#"
                    INSERT OR IGNORE INTO anomalies
                        (user_id, transaction_id, pattern_id, merchant_key, type, severity,
                         amount, expected_date, detail)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                    params![
                        a.user_id,
                        a.transaction_id,
                        a.pattern_id,
                        a.merchant_key,
                        a.anomaly_type.as_str(),
                        a.severity.as_str(),
                        a.amount,
                        a.expected_date.map(|d| d.to_string()),
                        a.detail,
                    ],
                )?;

                if inserted > 0 {
                    outcome.saved += 1;
                } else {
                    outcome.duplicates += 1;
                }
            }

            tx.commit()?;
        }

        Ok(outcome)
    }

    /// List a user's anomalies, optionally filtered by status, newest first
    pub fn list_anomalies(
        &self,
        user_id: i64,
        status: Option<AnomalyStatus>,
    ) -> Result<Vec<Anomaly>> {
        let conn = self.conn()?;

        let anomalies = if let Some(status) = status {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM anomalies WHERE user_id = ? AND status = ?
                 ORDER BY detected_at DESC, id DESC",
                ANOMALY_COLUMNS
            ))?;
            let rows = stmt
                .query_map(params![user_id, status.as_str()], map_anomaly)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        } else {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM anomalies WHERE user_id = ?
                 ORDER BY detected_at DESC, id DESC",
                ANOMALY_COLUMNS
            ))?;
            let rows = stmt
                .query_map(params![user_id], map_anomaly)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        };

        Ok(anomalies)
    }

    /// Get an anomaly by ID
    pub fn get_anomaly(&self, id: i64) -> Result<Option<Anomaly>> {
        let conn = self.conn()?;
        let anomaly = conn
            .query_row(
                &format!("SELECT {} FROM anomalies WHERE id = ?", ANOMALY_COLUMNS),
                params![id],
                map_anomaly,
            )
            .optional()?;
        Ok(anomaly)
    }

    /// Update an anomaly's status from user review
    ///
    /// Dismissing with feedback "expected" marks the anomaly a false
    /// positive, which widens that merchant's tolerance band on later
    /// scans.
    pub fn update_anomaly_status(
        &self,
        id: i64,
        status: AnomalyStatus,
        feedback: Option<&str>,
    ) -> Result<Anomaly> {
        let false_positive = status == AnomalyStatus::Dismissed
            && feedback.map(|f| f.trim().eq_ignore_ascii_case("expected")) == Some(true);

        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE anomalies
             SET status = ?, user_feedback = COALESCE(?, user_feedback), false_positive = ?
             WHERE id = ?",
            params![status.as_str(), feedback, false_positive, id],
        )?;

        if updated == 0 {
            return Err(Error::NotFound(format!("Anomaly {}", id)));
        }

        self.get_anomaly(id)?
            .ok_or_else(|| Error::NotFound(format!("Anomaly {}", id)))
    }

    /// Per-merchant count of false-positive amount outliers
    ///
    /// Feeds tolerance-band widening in the next scan.
    pub fn false_positive_counts(&self, user_id: i64) -> Result<HashMap<String, i64>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT merchant_key, COUNT(*) FROM anomalies
             WHERE user_id = ? AND false_positive = 1 AND type = 'amount_outlier'
             GROUP BY merchant_key",
        )?;

        let counts = stmt
            .query_map(params![user_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<std::result::Result<HashMap<_, _>, _>>()?;

        Ok(counts)
    }
}
