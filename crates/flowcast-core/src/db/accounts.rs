//! User and account operations

use rusqlite::{params, OptionalExtension};

use super::{parse_datetime, Database};
use crate::error::{Error, Result};
use crate::models::{Account, AccountType};

impl Database {
    /// Create or get a user by name
    pub fn upsert_user(&self, name: &str) -> Result<i64> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidInput("User name cannot be empty".to_string()));
        }

        let conn = self.conn()?;
        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM users WHERE name = ?",
                params![name],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(id) = existing {
            return Ok(id);
        }

        conn.execute("INSERT INTO users (name) VALUES (?)", params![name])?;
        Ok(conn.last_insert_rowid())
    }

    /// List all user ids, ascending
    pub fn list_user_ids(&self) -> Result<Vec<i64>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT id FROM users ORDER BY id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    /// Return the account named `name`, creating it if it does not exist.
    pub fn upsert_account(
        &self,
        user_id: i64,
        name: &str,
        account_type: AccountType,
        balance: f64,
    ) -> Result<i64> {
        let conn = self.conn()?;

        // Names are unique per user, so a match means reuse
        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM accounts WHERE user_id = ? AND name = ?",
                params![user_id, name],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(id) = existing {
            return Ok(id);
        }

        conn.execute(
            "INSERT INTO accounts (user_id, name, account_type, balance) VALUES (?, ?, ?, ?)",
            params![user_id, name, account_type.as_str(), balance],
        )?;

        Ok(conn.last_insert_rowid())
    }

    /// List a user's accounts
    pub fn list_accounts(&self, user_id: i64) -> Result<Vec<Account>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, name, account_type, balance, created_at
             FROM accounts WHERE user_id = ? ORDER BY name",
        )?;

        let accounts = stmt
            .query_map(params![user_id], |row| {
                let type_str: String = row.get(3)?;
                let created_at_str: String = row.get(5)?;

                Ok(Account {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    name: row.get(2)?,
                    account_type: type_str.parse().unwrap_or(AccountType::Checking),
                    balance: row.get(4)?,
                    created_at: parse_datetime(&created_at_str),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(accounts)
    }

    /// Fetch one account by id.
    pub fn get_account(&self, id: i64) -> Result<Option<Account>> {
        let conn = self.conn()?;
        let account = conn
            .query_row(
                "SELECT id, user_id, name, account_type, balance, created_at
                 FROM accounts WHERE id = ?",
                params![id],
                |row| {
                    let type_str: String = row.get(3)?;
                    let created_at_str: String = row.get(5)?;

                    Ok(Account {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        name: row.get(2)?,
                        account_type: type_str.parse().unwrap_or(AccountType::Checking),
                        balance: row.get(4)?,
                        created_at: parse_datetime(&created_at_str),
                    })
                },
            )
            .optional()?;

        Ok(account)
    }

    /// Set an account's balance (sync correction)
    pub fn set_account_balance(&self, id: i64, balance: f64) -> Result<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE accounts SET balance = ? WHERE id = ?",
            params![balance, id],
        )?;
        if updated == 0 {
            return Err(Error::NotFound(format!("Account {}", id)));
        }
        Ok(())
    }

    /// Sum of cash-type (checking, savings) account balances for a user.
    ///
    /// This is the balance the forecaster projects forward.
    pub fn cash_balance(&self, user_id: i64) -> Result<f64> {
        let conn = self.conn()?;
        let balance: f64 = conn.query_row(
            "SELECT COALESCE(SUM(balance), 0) FROM accounts
             WHERE user_id = ? AND account_type IN ('checking', 'savings')",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(balance)
    }
}
