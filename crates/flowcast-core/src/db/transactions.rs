//! Transaction storage: inserts with import dedup, listings, and the
//! per-row flags the analysis passes respect.

use chrono::NaiveDate;
use rusqlite::{params, OptionalExtension, Row};

use super::{parse_date, parse_datetime, Database};
use crate::error::{Error, Result};
use crate::ingest;
use crate::models::{NewTransaction, Transaction};

/// Result of a bulk transaction import
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportResult {
    pub inserted: usize,
    pub skipped: usize,
}

/// Query options for the transaction feed
#[derive(Debug, Clone, Copy)]
pub struct FeedOptions {
    pub exclude_exceptional: bool,
    pub exclude_ignored: bool,
}

impl Default for FeedOptions {
    fn default() -> Self {
        // Ignored rows are transfers/reimbursements and never analyzed;
        // exceptional ones stay visible except where a caller opts out.
        Self {
            exclude_exceptional: false,
            exclude_ignored: true,
        }
    }
}

/// Rows are committed in batches of this size so a cancelled import loses
/// at most one batch.
const INSERT_BATCH_SIZE: usize = 25;

const TX_COLUMNS: &str = "id, user_id, account_id, date, description, amount, category, \
     merchant_name, display_name, is_income, is_exceptional, ignored, import_hash, created_at";

fn map_transaction(row: &Row<'_>) -> rusqlite::Result<Transaction> {
    let date_str: String = row.get(3)?;
    let created_at_str: String = row.get(13)?;

    Ok(Transaction {
        id: row.get(0)?,
        user_id: row.get(1)?,
        account_id: row.get(2)?,
        date: parse_date(&date_str),
        description: row.get(4)?,
        amount: row.get(5)?,
        category: row.get(6)?,
        merchant_name: row.get(7)?,
        display_name: row.get(8)?,
        is_income: row.get(9)?,
        is_exceptional: row.get(10)?,
        ignored: row.get(11)?,
        import_hash: row.get(12)?,
        created_at: parse_datetime(&created_at_str),
    })
}

impl Database {
    /// Insert one transaction, deduplicating on `import_hash`.
    ///
    /// Returns the new id, or None when the row was already imported.
    pub fn insert_transaction(
        &self,
        user_id: i64,
        account_id: i64,
        tx: &NewTransaction,
    ) -> Result<Option<i64>> {
        let conn = self.conn()?;

        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM transactions WHERE import_hash = ?",
                params![tx.import_hash],
                |row| row.get(0),
            )
            .optional()?;

        if existing.is_some() {
            return Ok(None); // already imported
        }

        conn.execute(
            r#"
            INSERT INTO transactions
                (user_id, account_id, date, description, amount, category, merchant_name,
                 is_income, is_exceptional, ignored, import_hash)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                user_id,
                account_id,
                tx.date.to_string(),
                tx.description,
                tx.amount,
                tx.category,
                tx.merchant_name,
                tx.is_income,
                tx.is_exceptional,
                tx.ignored,
                tx.import_hash,
            ],
        )?;

        Ok(Some(conn.last_insert_rowid()))
    }

    /// Bulk-insert transactions in durable batches
    ///
    /// Each batch commits independently, so a cancelled or failed import
    /// keeps every batch that already committed.
    pub fn insert_transactions(
        &self,
        user_id: i64,
        account_id: i64,
        txs: &[NewTransaction],
    ) -> Result<ImportResult> {
        let mut result = ImportResult::default();

        for chunk in txs.chunks(INSERT_BATCH_SIZE) {
            let mut conn = self.conn()?;
            let batch = conn.transaction()?;

            for tx in chunk {
                let existing: Option<i64> = batch
                    .query_row(
                        "SELECT id FROM transactions WHERE import_hash = ?",
                        params![tx.import_hash],
                        |row| row.get(0),
                    )
                    .optional()?;

                if existing.is_some() {
                    result.skipped += 1;
                    continue;
                }

                batch.execute(
                    r#"
                    INSERT INTO transactions
                        (user_id, account_id, date, description, amount, category, merchant_name,
                         is_income, is_exceptional, ignored, import_hash)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                    params![
                        user_id,
                        account_id,
                        tx.date.to_string(),
                        tx.description,
                        tx.amount,
                        tx.category,
                        tx.merchant_name,
                        tx.is_income,
                        tx.is_exceptional,
                        tx.ignored,
                        tx.import_hash,
                    ],
                )?;
                result.inserted += 1;
            }

            batch.commit()?;
        }

        Ok(result)
    }

    /// Validate and insert a manually entered transaction
    pub fn add_manual_transaction(
        &self,
        user_id: i64,
        account_id: i64,
        date: NaiveDate,
        description: &str,
        amount: f64,
        category: Option<&str>,
        is_income: bool,
    ) -> Result<i64> {
        let description = description.trim();
        if description.is_empty() {
            return Err(Error::InvalidInput("Description cannot be empty".to_string()));
        }
        if !amount.is_finite() || amount == 0.0 {
            return Err(Error::InvalidInput(format!(
                "Amount must be a non-zero number, got {}",
                amount
            )));
        }
        if self.get_account(account_id)?.is_none() {
            return Err(Error::NotFound(format!("Account {}", account_id)));
        }

        let tx = NewTransaction {
            date,
            description: description.to_string(),
            amount,
            category: category.map(|c| c.to_string()),
            merchant_name: None,
            is_income,
            is_exceptional: false,
            ignored: false,
            import_hash: ingest::generate_hash(account_id, &date, description, amount),
        };

        match self.insert_transaction(user_id, account_id, &tx)? {
            Some(id) => Ok(id),
            None => Err(Error::InvalidInput(
                "An identical transaction already exists".to_string(),
            )),
        }
    }

    /// Fetch a user's transactions on or after a date, oldest first
    ///
    /// This is the feed the detector, baselines, and forecaster consume.
    pub fn fetch_transactions(
        &self,
        user_id: i64,
        since: NaiveDate,
        options: FeedOptions,
    ) -> Result<Vec<Transaction>> {
        let conn = self.conn()?;

        let mut sql = format!(
            "SELECT {} FROM transactions WHERE user_id = ? AND date >= ?",
            TX_COLUMNS
        );
        if options.exclude_ignored {
            sql.push_str(" AND ignored = 0");
        }
        if options.exclude_exceptional {
            sql.push_str(" AND is_exceptional = 0");
        }
        sql.push_str(" ORDER BY date ASC, id ASC");

        let mut stmt = conn.prepare(&sql)?;
        let txs = stmt
            .query_map(params![user_id, since.to_string()], map_transaction)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(txs)
    }

    /// List recent transactions, newest first
    pub fn list_transactions(
        &self,
        user_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Transaction>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM transactions WHERE user_id = ?
             ORDER BY date DESC, id DESC LIMIT ? OFFSET ?",
            TX_COLUMNS
        ))?;

        let txs = stmt
            .query_map(params![user_id, limit, offset], map_transaction)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(txs)
    }

    /// Get a transaction by ID
    pub fn get_transaction(&self, id: i64) -> Result<Option<Transaction>> {
        let conn = self.conn()?;
        let tx = conn
            .query_row(
                &format!("SELECT {} FROM transactions WHERE id = ?", TX_COLUMNS),
                params![id],
                map_transaction,
            )
            .optional()?;
        Ok(tx)
    }

    /// Net ledger movement per day over (after, through], excluding ignored rows
    ///
    /// Positive amounts are expenses, so the day's balance delta is the
    /// negated sum. Used by the learning loop to reconstruct actual balances.
    pub fn daily_net_deltas(
        &self,
        user_id: i64,
        after: NaiveDate,
        through: NaiveDate,
    ) -> Result<Vec<(NaiveDate, f64)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT date, SUM(amount) FROM transactions
             WHERE user_id = ? AND ignored = 0 AND date > ? AND date <= ?
             GROUP BY date ORDER BY date ASC",
        )?;

        let deltas = stmt
            .query_map(
                params![user_id, after.to_string(), through.to_string()],
                |row| {
                    let date_str: String = row.get(0)?;
                    let total: f64 = row.get(1)?;
                    Ok((parse_date(&date_str), -total))
                },
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(deltas)
    }

    /// Set a transaction's category
    pub fn set_transaction_category(&self, id: i64, category: Option<&str>) -> Result<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE transactions SET category = ? WHERE id = ?",
            params![category, id],
        )?;
        if updated == 0 {
            return Err(Error::NotFound(format!("Transaction {}", id)));
        }
        Ok(())
    }

    /// Set a transaction's user-facing display name
    pub fn set_transaction_display_name(&self, id: i64, name: Option<&str>) -> Result<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE transactions SET display_name = ? WHERE id = ?",
            params![name, id],
        )?;
        if updated == 0 {
            return Err(Error::NotFound(format!("Transaction {}", id)));
        }
        Ok(())
    }

    /// Flag or unflag a transaction as exceptional / ignored
    pub fn set_transaction_flags(
        &self,
        id: i64,
        is_exceptional: Option<bool>,
        ignored: Option<bool>,
    ) -> Result<()> {
        let conn = self.conn()?;
        if let Some(flag) = is_exceptional {
            conn.execute(
                "UPDATE transactions SET is_exceptional = ? WHERE id = ?",
                params![flag, id],
            )?;
        }
        if let Some(flag) = ignored {
            conn.execute(
                "UPDATE transactions SET ignored = ? WHERE id = ?",
                params![flag, id],
            )?;
        }
        Ok(())
    }

    /// Transactions with no category yet, oldest first
    pub fn uncategorized_transactions(&self, user_id: i64, limit: i64) -> Result<Vec<Transaction>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM transactions
             WHERE user_id = ? AND category IS NULL AND ignored = 0
             ORDER BY date ASC, id ASC LIMIT ?",
            TX_COLUMNS
        ))?;

        let txs = stmt
            .query_map(params![user_id, limit], map_transaction)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(txs)
    }

    /// Count of a user's transactions
    pub fn transaction_count(&self, user_id: i64) -> Result<i64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM transactions WHERE user_id = ?",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}
