//! SQLite store behind an r2d2 pool, encrypted with SQLCipher by default.
//!
//! Queries are split by table family:
//! - `accounts` - users and their bank accounts
//! - `transactions` - the feed rows everything else derives from
//! - `patterns` - recurring series and the suppression list
//! - `suggestions` - detector output awaiting review
//! - `baselines` - per-merchant spending statistics
//! - `anomalies` - flagged oddities and user feedback on them
//! - `forecasts` - stored projections and per-day comparisons
//! - `learning` - append-only accuracy history
//! - `rules` - user-defined categorization rules

use chrono::{DateTime, NaiveDate, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use tracing::info;

use crate::error::{Error, Result};

mod accounts;
mod anomalies;
mod baselines;
mod forecasts;
mod learning;
mod patterns;
mod rules;
mod suggestions;
mod transactions;

pub use patterns::PatternUpdate;
pub use suggestions::{ConfirmOutcome, DenyOutcome};
pub use transactions::{FeedOptions, ImportResult};

pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConn = PooledConnection<SqliteConnectionManager>;

/// Passphrase variable the encrypted constructors read.
pub const DB_KEY_ENV: &str = "FLOWCAST_DB_KEY";

/// Stretch a passphrase into a SQLCipher key with Argon2.
///
/// The salt is a fixed application constant, so a passphrase maps to the
/// same key no matter where the database file lives. Databases can be
/// moved or restored from backup without re-keying.
fn derive_key(passphrase: &str) -> Result<String> {
    use argon2::{password_hash::SaltString, Argon2, PasswordHasher};

    // Changing this constant would orphan every existing encrypted database
    const APP_SALT: &[u8; 16] = b"flowcast-salt-v1";

    let salt = SaltString::encode_b64(APP_SALT)
        .map_err(|e| Error::Encryption(format!("Salt encoding failed: {}", e)))?;

    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(passphrase.as_bytes(), &salt)
        .map_err(|e| Error::Encryption(format!("Key derivation failed: {}", e)))?;

    // SQLCipher takes the raw hash bytes, hex encoded
    let hash_str = hash
        .hash
        .ok_or_else(|| Error::Encryption("Argon2 produced no hash".to_string()))?;
    Ok(hex::encode(hash_str.as_bytes()))
}

/// SQLite datetime text as DateTime<Utc>, falling back to now() on garbage.
pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    // CURRENT_TIMESTAMP writes "YYYY-MM-DD HH:MM:SS"
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .map(|dt| dt.and_utc())
        .unwrap_or_else(|_| Utc::now())
}

/// Parse a SQLite date string into a NaiveDate
pub(crate) fn parse_date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap_or_else(|_| Utc::now().date_naive())
}

/// Handle to the store: a connection pool plus the file path it serves.
#[derive(Clone)]
pub struct Database {
    pool: DbPool,
    db_path: String,
}

impl Database {
    /// Open the database encrypted, reading the passphrase from
    /// `FLOWCAST_DB_KEY`.
    ///
    /// Fails when the variable is unset; `new_unencrypted()` is the
    /// explicit opt-out for development and tests.
    pub fn new(path: &str) -> Result<Self> {
        let encryption_key = std::env::var(DB_KEY_ENV).ok();
        match encryption_key {
            Some(key) => Self::new_with_key(path, Some(&key)),
            None => Err(Error::Encryption(format!(
                "Encrypted database requires a key. Set {} with your passphrase, \
                or pass --no-encrypt to opt out (development only).",
                DB_KEY_ENV
            ))),
        }
    }

    /// Open without encryption. Anything on disk is readable by whoever
    /// can read the file, so this is for development and tests.
    pub fn new_unencrypted(path: &str) -> Result<Self> {
        Self::new_with_key(path, None)
    }

    /// Open with an explicit passphrase, or plaintext when `None`.
    pub fn new_with_key(path: &str, passphrase: Option<&str>) -> Result<Self> {
        let manager = SqliteConnectionManager::file(path);

        let pool = if let Some(pass) = passphrase {
            let key = derive_key(pass)?;
            let key_pragma = format!("PRAGMA key = 'x\"{}\"';", key);

            // each pooled connection must key itself before its first query
            let manager = manager.with_init(move |conn| {
                conn.execute_batch(&key_pragma)?;
                Ok(())
            });

            Pool::builder().max_size(10).build(manager)?
        } else {
            Pool::builder().max_size(10).build(manager)?
        };

        let db = Self {
            pool,
            db_path: path.to_string(),
        };
        db.run_migrations()?;

        Ok(db)
    }

    /// File path this handle was opened on.
    pub fn path(&self) -> &str {
        &self.db_path
    }

    /// Throwaway database for tests.
    ///
    /// Backed by a unique temp file rather than `:memory:`, since pooled
    /// SQLCipher connections do not share one in-memory database.
    pub fn in_memory() -> Result<Self> {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);

        let id = COUNTER.fetch_add(1, Ordering::SeqCst);
        let path = format!("/tmp/flowcast_test_{}_{}.db", std::process::id(), id);

        // start from an empty file
        let _ = std::fs::remove_file(&path);

        Self::new_unencrypted(&path)
    }

    /// Borrow a pooled connection.
    pub fn conn(&self) -> Result<DbConn> {
        Ok(self.pool.get()?)
    }

    /// Soft reset: clear all derived and transactional data but preserve
    /// users, accounts, and category rules.
    pub fn soft_reset(&self) -> Result<()> {
        let conn = self.conn()?;

        // children before parents, or the FK pragma objects
        conn.execute_batch(
            r#"
            DELETE FROM forecast_comparisons;
            DELETE FROM forecast_snapshots;
            DELETE FROM learning_records;
            DELETE FROM anomalies;
            DELETE FROM merchant_baselines;
            DELETE FROM suggestions;
            DELETE FROM recurring_patterns;
            DELETE FROM suppressions;
            DELETE FROM transactions;
            "#,
        )?;

        info!("Soft reset finished, reference data kept");
        Ok(())
    }

    /// Create the schema on first open; every statement is IF NOT EXISTS.
    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            -- WAL keeps readers and writers out of each other's way.
            -- It leaves -wal/-shm sidecar files next to the database.
            PRAGMA journal_mode = WAL;

            -- ~8MB page cache (2000 pages at the default 4KB)
            PRAGMA cache_size = 2000;

            -- NORMAL sync is durable enough under WAL
            PRAGMA synchronous = NORMAL;

            PRAGMA temp_store = MEMORY;

            -- Users (one row per person whose finances are tracked)
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            -- Accounts (one row per bank account)
            CREATE TABLE IF NOT EXISTS accounts (
                id INTEGER PRIMARY KEY,
                user_id INTEGER NOT NULL REFERENCES users(id),
                name TEXT NOT NULL,
                account_type TEXT NOT NULL DEFAULT 'checking',
                balance REAL NOT NULL DEFAULT 0,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE INDEX IF NOT EXISTS idx_accounts_user ON accounts(user_id);

            -- Transactions
            -- Amount sign convention: positive = expense, negative = income
            CREATE TABLE IF NOT EXISTS transactions (
                id INTEGER PRIMARY KEY,
                user_id INTEGER NOT NULL REFERENCES users(id),
                account_id INTEGER NOT NULL REFERENCES accounts(id),
                date DATE NOT NULL,
                description TEXT NOT NULL,
                amount REAL NOT NULL,
                category TEXT,
                merchant_name TEXT,                        -- feed-provided merchant, when present
                display_name TEXT,                         -- user-edited name, wins for grouping
                is_income BOOLEAN NOT NULL DEFAULT 0,
                is_exceptional BOOLEAN NOT NULL DEFAULT 0, -- excluded from baselines
                ignored BOOLEAN NOT NULL DEFAULT 0,        -- excluded from all analysis
                import_hash TEXT UNIQUE,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE INDEX IF NOT EXISTS idx_transactions_user_date ON transactions(user_id, date);
            CREATE INDEX IF NOT EXISTS idx_transactions_account ON transactions(account_id);

            -- Recurring patterns (confirmed or user-declared series)
            CREATE TABLE IF NOT EXISTS recurring_patterns (
                id INTEGER PRIMARY KEY,
                user_id INTEGER NOT NULL REFERENCES users(id),
                merchant_key TEXT NOT NULL,
                display_name TEXT NOT NULL,
                frequency TEXT NOT NULL,
                average_amount REAL NOT NULL,
                next_expected_date DATE NOT NULL,
                last_seen_date DATE NOT NULL,
                is_income BOOLEAN NOT NULL DEFAULT 0,
                category TEXT,
                confidence TEXT NOT NULL DEFAULT 'low',
                occurrence_count INTEGER NOT NULL DEFAULT 0,
                source TEXT NOT NULL DEFAULT 'detected',   -- detected, manual
                user_modified BOOLEAN NOT NULL DEFAULT 0,  -- user edits survive re-detection
                version INTEGER NOT NULL DEFAULT 1,        -- optimistic concurrency
                source_transaction_ids TEXT NOT NULL DEFAULT '[]',  -- JSON array
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                UNIQUE(user_id, merchant_key, is_income)
            );

            CREATE INDEX IF NOT EXISTS idx_patterns_user ON recurring_patterns(user_id);
            CREATE INDEX IF NOT EXISTS idx_patterns_next_date ON recurring_patterns(next_expected_date);

            -- Suppression list (merchant keys the user denied or removed)
            CREATE TABLE IF NOT EXISTS suppressions (
                id INTEGER PRIMARY KEY,
                user_id INTEGER NOT NULL REFERENCES users(id),
                merchant_key TEXT NOT NULL,
                reason TEXT,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                UNIQUE(user_id, merchant_key)
            );

            -- Suggestions (detector output awaiting review)
            CREATE TABLE IF NOT EXISTS suggestions (
                id INTEGER PRIMARY KEY,
                user_id INTEGER NOT NULL REFERENCES users(id),
                merchant_key TEXT NOT NULL,
                display_name TEXT NOT NULL,
                frequency TEXT NOT NULL,
                average_amount REAL NOT NULL,
                next_expected_date DATE NOT NULL,
                last_seen_date DATE NOT NULL,
                is_income BOOLEAN NOT NULL DEFAULT 0,
                category TEXT,
                confidence TEXT NOT NULL DEFAULT 'low',
                occurrence_count INTEGER NOT NULL DEFAULT 0,
                source_transaction_ids TEXT NOT NULL DEFAULT '[]',  -- JSON array
                detection_reason TEXT NOT NULL,
                bill_type TEXT NOT NULL DEFAULT 'bill',
                status TEXT NOT NULL DEFAULT 'pending',    -- pending, confirmed, denied, superseded
                deny_reason TEXT,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                resolved_at DATETIME
            );

            CREATE INDEX IF NOT EXISTS idx_suggestions_user_status ON suggestions(user_id, status);
            -- At most one live suggestion per merchant series
            CREATE UNIQUE INDEX IF NOT EXISTS idx_suggestions_pending
                ON suggestions(user_id, merchant_key, is_income) WHERE status = 'pending';

            -- Merchant baselines (anomaly detection statistics)
            CREATE TABLE IF NOT EXISTS merchant_baselines (
                user_id INTEGER NOT NULL REFERENCES users(id),
                merchant_key TEXT NOT NULL,
                mean_amount REAL NOT NULL,
                std_dev_amount REAL NOT NULL,
                min_amount REAL NOT NULL,
                max_amount REAL NOT NULL,
                transaction_count INTEGER NOT NULL,
                last_calculated DATETIME DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (user_id, merchant_key)
            );

            -- Anomalies
            -- transaction_id is set for transaction-backed anomalies;
            -- pattern_id + expected_date identify missed recurring charges.
            CREATE TABLE IF NOT EXISTS anomalies (
                id INTEGER PRIMARY KEY,
                user_id INTEGER NOT NULL REFERENCES users(id),
                transaction_id INTEGER REFERENCES transactions(id),
                pattern_id INTEGER REFERENCES recurring_patterns(id),
                merchant_key TEXT NOT NULL,
                type TEXT NOT NULL,                        -- new_merchant, amount_outlier, missed_recurring
                severity TEXT NOT NULL DEFAULT 'warning',
                status TEXT NOT NULL DEFAULT 'pending',    -- pending, dismissed, confirmed, resolved
                amount REAL,
                expected_date DATE,                        -- missed_recurring: when the charge was due
                detail TEXT NOT NULL,
                detected_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                false_positive BOOLEAN NOT NULL DEFAULT 0,
                user_feedback TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_anomalies_user_status ON anomalies(user_id, status);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_anomalies_tx_dedup
                ON anomalies(user_id, transaction_id, type) WHERE transaction_id IS NOT NULL;
            CREATE UNIQUE INDEX IF NOT EXISTS idx_anomalies_pattern_dedup
                ON anomalies(user_id, pattern_id, type, expected_date) WHERE pattern_id IS NOT NULL;

            -- Forecast snapshots (stored daily balance projections)
            CREATE TABLE IF NOT EXISTS forecast_snapshots (
                id INTEGER PRIMARY KEY,
                user_id INTEGER NOT NULL REFERENCES users(id),
                generated_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                horizon_days INTEGER NOT NULL,
                starting_balance REAL NOT NULL,
                days TEXT NOT NULL,                        -- JSON array of ForecastDay
                total_income REAL NOT NULL,
                total_expenses REAL NOT NULL,
                confidence TEXT NOT NULL,
                breakdown TEXT NOT NULL,                   -- JSON ForecastBreakdown
                alerts TEXT NOT NULL DEFAULT '[]',         -- JSON array of ForecastAlert
                daily_rate REAL NOT NULL,
                multiplier REAL NOT NULL DEFAULT 1.0,
                compared_at DATETIME                       -- set by the learning loop
            );

            CREATE INDEX IF NOT EXISTS idx_snapshots_user_generated
                ON forecast_snapshots(user_id, generated_at);

            -- Per-day forecast vs actual comparisons
            CREATE TABLE IF NOT EXISTS forecast_comparisons (
                id INTEGER PRIMARY KEY,
                snapshot_id INTEGER NOT NULL REFERENCES forecast_snapshots(id) ON DELETE CASCADE,
                date DATE NOT NULL,
                predicted_balance REAL NOT NULL,
                actual_balance REAL NOT NULL,
                error_amount REAL NOT NULL,
                error_percent REAL,                        -- NULL when actual is near zero
                UNIQUE(snapshot_id, date)
            );

            CREATE INDEX IF NOT EXISTS idx_comparisons_snapshot ON forecast_comparisons(snapshot_id);

            -- Learning records (append-only accuracy history)
            CREATE TABLE IF NOT EXISTS learning_records (
                id INTEGER PRIMARY KEY,
                user_id INTEGER NOT NULL REFERENCES users(id),
                analyzed_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                mean_error_percent REAL NOT NULL,
                direction_accuracy REAL NOT NULL,
                accuracy_adjustment_multiplier REAL NOT NULL,
                snapshots_compared INTEGER NOT NULL DEFAULT 0,
                days_compared INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_learning_user_analyzed
                ON learning_records(user_id, analyzed_at);

            -- Category rules (deterministic categorization)
            CREATE TABLE IF NOT EXISTS category_rules (
                id INTEGER PRIMARY KEY,
                user_id INTEGER NOT NULL REFERENCES users(id),
                pattern TEXT NOT NULL,
                match_type TEXT NOT NULL DEFAULT 'contains',  -- contains, exact, regex
                category TEXT NOT NULL,
                priority INTEGER NOT NULL DEFAULT 0,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE INDEX IF NOT EXISTS idx_rules_user_priority ON category_rules(user_id, priority);
            "#,
        )?;

        info!("Schema ready");
        Ok(())
    }
}

#[cfg(test)]
mod tests;
