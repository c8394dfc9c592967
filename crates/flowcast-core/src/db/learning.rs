//! Learning record operations

use rusqlite::{params, OptionalExtension, Row};

use super::{parse_datetime, Database};
use crate::error::Result;
use crate::models::LearningRecord;

const RECORD_COLUMNS: &str = "id, user_id, analyzed_at, mean_error_percent, direction_accuracy, \
     accuracy_adjustment_multiplier, snapshots_compared, days_compared";

fn map_record(row: &Row<'_>) -> rusqlite::Result<LearningRecord> {
    let analyzed_at_str: String = row.get(2)?;
    Ok(LearningRecord {
        id: row.get(0)?,
        user_id: row.get(1)?,
        analyzed_at: parse_datetime(&analyzed_at_str),
        mean_error_percent: row.get(3)?,
        direction_accuracy: row.get(4)?,
        accuracy_adjustment_multiplier: row.get(5)?,
        snapshots_compared: row.get(6)?,
        days_compared: row.get(7)?,
    })
}

impl Database {
    /// Append a learning record to the history
    pub fn append_learning_record(&self, record: &LearningRecord) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO learning_records
                (user_id, mean_error_percent, direction_accuracy,
                 accuracy_adjustment_multiplier, snapshots_compared, days_compared)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
            params![
                record.user_id,
                record.mean_error_percent,
                record.direction_accuracy,
                record.accuracy_adjustment_multiplier,
                record.snapshots_compared,
                record.days_compared,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// The newest learning record for a user
    pub fn latest_learning_record(&self, user_id: i64) -> Result<Option<LearningRecord>> {
        let conn = self.conn()?;
        let record = conn
            .query_row(
                &format!(
                    "SELECT {} FROM learning_records WHERE user_id = ?
                     ORDER BY analyzed_at DESC, id DESC LIMIT 1",
                    RECORD_COLUMNS
                ),
                params![user_id],
                map_record,
            )
            .optional()?;
        Ok(record)
    }

    /// The multiplier applied to discretionary-spend estimates
    ///
    /// 1.0 until the learning loop has produced a record.
    pub fn latest_multiplier(&self, user_id: i64) -> Result<f64> {
        Ok(self
            .latest_learning_record(user_id)?
            .map(|r| r.accuracy_adjustment_multiplier)
            .unwrap_or(1.0))
    }

    /// Recent learning records, newest first
    pub fn list_learning_records(&self, user_id: i64, limit: i64) -> Result<Vec<LearningRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM learning_records WHERE user_id = ?
             ORDER BY analyzed_at DESC, id DESC LIMIT ?",
            RECORD_COLUMNS
        ))?;

        let records = stmt
            .query_map(params![user_id, limit], map_record)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(records)
    }
}
