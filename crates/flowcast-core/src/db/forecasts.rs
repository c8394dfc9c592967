//! Forecast snapshot and comparison operations

use chrono::NaiveDate;
use rusqlite::{params, OptionalExtension, Row};

use super::{parse_date, parse_datetime, Database};
use crate::error::{Error, Result};
use crate::models::{Confidence, ForecastComparison, ForecastSnapshot};

const SNAPSHOT_COLUMNS: &str = "id, user_id, generated_at, horizon_days, starting_balance, days, \
     total_income, total_expenses, confidence, breakdown, alerts, daily_rate, multiplier, \
     compared_at";

fn map_snapshot(row: &Row<'_>) -> rusqlite::Result<ForecastSnapshot> {
    let generated_at_str: String = row.get(2)?;
    let days_json: String = row.get(5)?;
    let confidence_str: String = row.get(8)?;
    let breakdown_json: String = row.get(9)?;
    let alerts_json: String = row.get(10)?;
    let compared_at_str: Option<String> = row.get(13)?;

    Ok(ForecastSnapshot {
        id: row.get(0)?,
        user_id: row.get(1)?,
        generated_at: parse_datetime(&generated_at_str),
        horizon_days: row.get(3)?,
        starting_balance: row.get(4)?,
        days: serde_json::from_str(&days_json).unwrap_or_default(),
        total_income: row.get(6)?,
        total_expenses: row.get(7)?,
        confidence: confidence_str.parse().unwrap_or(Confidence::Low),
        breakdown: serde_json::from_str(&breakdown_json).unwrap_or_default(),
        alerts: serde_json::from_str(&alerts_json).unwrap_or_default(),
        daily_rate: row.get(11)?,
        multiplier: row.get(12)?,
        compared_at: compared_at_str.map(|s| parse_datetime(&s)),
    })
}

impl Database {
    /// Store a forecast snapshot, returning its id
    pub fn save_forecast_snapshot(&self, snapshot: &ForecastSnapshot) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO forecast_snapshots
                (user_id, horizon_days, starting_balance, days, total_income, total_expenses,
                 confidence, breakdown, alerts, daily_rate, multiplier)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                snapshot.user_id,
                snapshot.horizon_days,
                snapshot.starting_balance,
                serde_json::to_string(&snapshot.days)?,
                snapshot.total_income,
                snapshot.total_expenses,
                snapshot.confidence.as_str(),
                serde_json::to_string(&snapshot.breakdown)?,
                serde_json::to_string(&snapshot.alerts)?,
                snapshot.daily_rate,
                snapshot.multiplier,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Get a snapshot by ID
    pub fn get_forecast_snapshot(&self, id: i64) -> Result<Option<ForecastSnapshot>> {
        let conn = self.conn()?;
        let snapshot = conn
            .query_row(
                &format!("SELECT {} FROM forecast_snapshots WHERE id = ?", SNAPSHOT_COLUMNS),
                params![id],
                map_snapshot,
            )
            .optional()?;
        Ok(snapshot)
    }

    /// The most recently generated snapshot for a user
    pub fn latest_forecast_snapshot(&self, user_id: i64) -> Result<Option<ForecastSnapshot>> {
        let conn = self.conn()?;
        let snapshot = conn
            .query_row(
                &format!(
                    "SELECT {} FROM forecast_snapshots WHERE user_id = ?
                     ORDER BY generated_at DESC, id DESC LIMIT 1",
                    SNAPSHOT_COLUMNS
                ),
                params![user_id],
                map_snapshot,
            )
            .optional()?;
        Ok(snapshot)
    }

    /// Snapshots whose horizon has fully elapsed and that have not yet been
    /// compared against actuals
    pub fn elapsed_uncompared_snapshots(
        &self,
        user_id: i64,
        as_of: NaiveDate,
    ) -> Result<Vec<ForecastSnapshot>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM forecast_snapshots
             WHERE user_id = ? AND compared_at IS NULL
               AND date(generated_at, '+' || horizon_days || ' days') <= date(?)
             ORDER BY generated_at ASC",
            SNAPSHOT_COLUMNS
        ))?;

        let snapshots = stmt
            .query_map(params![user_id, as_of.to_string()], map_snapshot)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(snapshots)
    }

    /// Record per-day comparisons for a snapshot and mark it compared
    ///
    /// Idempotent: rows are keyed by (snapshot, date), so re-running the
    /// comparison stage rewrites the same values.
    pub fn save_forecast_comparisons(
        &self,
        snapshot_id: i64,
        comparisons: &[ForecastComparison],
    ) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        for c in comparisons {
            tx.execute(
                r#"
                INSERT INTO forecast_comparisons
                    (snapshot_id, date, predicted_balance, actual_balance, error_amount, error_percent)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(snapshot_id, date) DO UPDATE SET
                    predicted_balance = excluded.predicted_balance,
                    actual_balance = excluded.actual_balance,
                    error_amount = excluded.error_amount,
                    error_percent = excluded.error_percent
                "#,
                params![
                    snapshot_id,
                    c.date.to_string(),
                    c.predicted_balance,
                    c.actual_balance,
                    c.error_amount,
                    c.error_percent,
                ],
            )?;
        }

        let updated = tx.execute(
            "UPDATE forecast_snapshots SET compared_at = CURRENT_TIMESTAMP WHERE id = ?",
            params![snapshot_id],
        )?;
        if updated == 0 {
            return Err(Error::NotFound(format!("Forecast snapshot {}", snapshot_id)));
        }

        tx.commit()?;
        Ok(())
    }

    /// Comparison rows for a user with dates on or after a cutoff
    pub fn comparisons_since(
        &self,
        user_id: i64,
        cutoff: NaiveDate,
    ) -> Result<Vec<ForecastComparison>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT c.snapshot_id, c.date, c.predicted_balance, c.actual_balance,
                    c.error_amount, c.error_percent
             FROM forecast_comparisons c
             JOIN forecast_snapshots s ON s.id = c.snapshot_id
             WHERE s.user_id = ? AND c.date >= ?
             ORDER BY c.date ASC",
        )?;

        let comparisons = stmt
            .query_map(params![user_id, cutoff.to_string()], |row| {
                let date_str: String = row.get(1)?;
                Ok(ForecastComparison {
                    snapshot_id: row.get(0)?,
                    date: parse_date(&date_str),
                    predicted_balance: row.get(2)?,
                    actual_balance: row.get(3)?,
                    error_amount: row.get(4)?,
                    error_percent: row.get(5)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(comparisons)
    }
}
