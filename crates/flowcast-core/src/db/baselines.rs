//! Merchant baseline operations

use rusqlite::{params, OptionalExtension, Row};

use super::{parse_datetime, Database};
use crate::error::Result;
use crate::models::MerchantBaseline;

/// Upserts per commit batch; a cancelled recompute keeps finished batches.
const BASELINE_BATCH_SIZE: usize = 25;

fn map_baseline(row: &Row<'_>) -> rusqlite::Result<MerchantBaseline> {
    let last_calculated_str: String = row.get(7)?;
    Ok(MerchantBaseline {
        user_id: row.get(0)?,
        merchant_key: row.get(1)?,
        mean_amount: row.get(2)?,
        std_dev_amount: row.get(3)?,
        min_amount: row.get(4)?,
        max_amount: row.get(5)?,
        transaction_count: row.get(6)?,
        last_calculated: parse_datetime(&last_calculated_str),
    })
}

impl Database {
    /// Replace a user's baselines with a freshly computed set
    ///
    /// Stale rows for merchants no longer in the window are removed so a
    /// long-gone merchant reads as new again.
    pub fn replace_baselines(&self, user_id: i64, baselines: &[MerchantBaseline]) -> Result<()> {
        {
            let conn = self.conn()?;
            conn.execute(
                "DELETE FROM merchant_baselines WHERE user_id = ?",
                params![user_id],
            )?;
        }

        for chunk in baselines.chunks(BASELINE_BATCH_SIZE) {
            let mut conn = self.conn()?;
            let tx = conn.transaction()?;

            for b in chunk {
                tx.execute(
                    r#"
                    INSERT INTO merchant_baselines
                        (user_id, merchant_key, mean_amount, std_dev_amount, min_amount,
                         max_amount, transaction_count, last_calculated)
                    VALUES (?, ?, ?, ?, ?, ?, ?, CURRENT_TIMESTAMP)
                    ON CONFLICT(user_id, merchant_key) DO UPDATE SET
                        mean_amount = excluded.mean_amount,
                        std_dev_amount = excluded.std_dev_amount,
                        min_amount = excluded.min_amount,
                        max_amount = excluded.max_amount,
                        transaction_count = excluded.transaction_count,
                        last_calculated = CURRENT_TIMESTAMP
                    "#,
                    params![
                        user_id,
                        b.merchant_key,
                        b.mean_amount,
                        b.std_dev_amount,
                        b.min_amount,
                        b.max_amount,
                        b.transaction_count,
                    ],
                )?;
            }

            tx.commit()?;
        }

        Ok(())
    }

    /// All baselines for a user
    pub fn get_baselines(&self, user_id: i64) -> Result<Vec<MerchantBaseline>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT user_id, merchant_key, mean_amount, std_dev_amount, min_amount, max_amount,
                    transaction_count, last_calculated
             FROM merchant_baselines WHERE user_id = ? ORDER BY merchant_key",
        )?;

        let baselines = stmt
            .query_map(params![user_id], map_baseline)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(baselines)
    }

    /// One merchant's baseline, if known
    pub fn get_baseline(&self, user_id: i64, merchant_key: &str) -> Result<Option<MerchantBaseline>> {
        let conn = self.conn()?;
        let baseline = conn
            .query_row(
                "SELECT user_id, merchant_key, mean_amount, std_dev_amount, min_amount, max_amount,
                        transaction_count, last_calculated
                 FROM merchant_baselines WHERE user_id = ? AND merchant_key = ?",
                params![user_id, merchant_key],
                map_baseline,
            )
            .optional()?;
        Ok(baseline)
    }
}
