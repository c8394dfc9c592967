//! Clap argument surface for the `flow` binary.
//!
//! Everything here is parsing only; the behavior behind each subcommand
//! lives in the `commands` module.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Flowcast - Recurring-charge detection and cash-flow forecasting
#[derive(Parser)]
#[command(name = "flow")]
#[command(about = "Self-hosted cash-flow forecaster with recurring-charge detection", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Path to the database file
    #[arg(long, default_value = "flowcast.db", global = true)]
    pub db: PathBuf,

    /// User the command acts for (created on first use)
    #[arg(short, long, default_value = "default", global = true)]
    pub user: String,

    /// Debug-level logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Open the database without SQLCipher encryption
    ///
    /// Encryption is on by default; put your passphrase in FLOWCAST_DB_KEY.
    /// Skipping it is meant for development and throwaway databases.
    #[arg(long, global = true)]
    pub no_encrypt: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the database and the default user
    Init,

    /// Import a CSV of bank transactions
    Import {
        /// Path to the CSV file
        #[arg(short, long)]
        file: PathBuf,

        /// Account the rows belong to (created if missing)
        #[arg(short, long, default_value = "Checking")]
        account: String,

        /// Skip category rules after import
        #[arg(long)]
        no_rules: bool,

        /// Skip recurring-charge detection after import
        #[arg(long)]
        no_detect: bool,
    },

    /// Detect recurring charges and income
    Detect,

    /// Scan recent transactions for anomalies
    Scan,

    /// Project the cash balance day by day
    Forecast {
        /// Days to project (1-365)
        #[arg(short = 'd', long, default_value = "30")]
        days: i64,

        /// Store the snapshot so the learning loop can grade it later
        #[arg(long)]
        store: bool,
    },

    /// Run the learning loop (detect, compare forecasts, adjust)
    Learn,

    /// Run detect + scan + forecast + learn for every user on a timer
    Watch {
        /// Hours between runs (FLOWCAST_LEARN_INTERVAL_HOURS overrides; 0 disables)
        #[arg(long, default_value = "24")]
        every: u64,
    },

    /// Show database status (encryption, size, counts)
    Status,

    /// Show cash position, upcoming charges, and open alerts
    Dashboard,

    /// Manage accounts (list, add, set-balance)
    Accounts {
        #[command(subcommand)]
        action: Option<AccountsAction>,
    },

    /// Manage transactions (list, add, categorize, flag, ignore)
    Transactions {
        #[command(subcommand)]
        action: Option<TransactionsAction>,
    },

    /// Manage recurring patterns (list, add, edit, release, delete)
    Patterns {
        #[command(subcommand)]
        action: Option<PatternsAction>,
    },

    /// Review detected recurring-charge suggestions (list, confirm, deny)
    Review {
        #[command(subcommand)]
        action: Option<ReviewAction>,
    },

    /// Manage anomalies (list, dismiss, confirm)
    Anomalies {
        #[command(subcommand)]
        action: Option<AnomaliesAction>,
    },

    /// Manage category rules (list, add, delete, test, apply)
    Rules {
        #[command(subcommand)]
        action: Option<RulesAction>,
    },

    /// Test the AI backend and classify transactions
    Ollama {
        #[command(subcommand)]
        action: OllamaAction,
    },

    /// Wipe stored data and start over
    Reset {
        /// Clear transactions, patterns, and history but keep users,
        /// accounts, and category rules. Omitting this deletes the
        /// database file outright and runs init again.
        #[arg(long)]
        soft: bool,

        /// Answer yes to the confirmation prompt
        #[arg(long, short = 'y')]
        yes: bool,
    },
}

#[derive(Subcommand)]
pub enum AccountsAction {
    /// List accounts with balances
    List,

    /// Add an account (re-adding an existing name refreshes its balance)
    Add {
        /// Account name
        name: String,

        /// Account type: checking, savings, credit
        #[arg(long, short = 't', default_value = "checking")]
        account_type: String,

        /// Current balance
        #[arg(long, default_value = "0")]
        balance: f64,
    },

    /// Set an account's balance after reconciling with the bank
    SetBalance {
        /// Account name
        name: String,
        /// New balance
        balance: f64,
    },
}

#[derive(Subcommand)]
pub enum TransactionsAction {
    /// List the most recent transactions
    List {
        /// How many rows to show
        #[arg(short, long, default_value = "20")]
        limit: i64,
    },

    /// Add a transaction by hand
    Add {
        /// Description as it would appear on a statement
        description: String,

        /// Amount (negative or --income for money coming in)
        amount: f64,

        /// Account name
        #[arg(short, long, default_value = "Checking")]
        account: String,

        /// Date (YYYY-MM-DD), defaults to today
        #[arg(long)]
        date: Option<String>,

        /// Category
        #[arg(long)]
        category: Option<String>,

        /// Treat the amount as income
        #[arg(long)]
        income: bool,
    },

    /// Set the category on a transaction
    Categorize {
        /// Transaction ID
        id: i64,
        /// Category name
        category: String,
    },

    /// Mark a transaction as a one-off (kept in the feed, excluded from baselines)
    Flag {
        /// Transaction ID
        id: i64,
        /// Clear the flag instead
        #[arg(long)]
        clear: bool,
    },

    /// Exclude a transaction from all analysis (transfers, reimbursements)
    Ignore {
        /// Transaction ID
        id: i64,
        /// Clear the exclusion instead
        #[arg(long)]
        clear: bool,
    },
}

#[derive(Subcommand)]
pub enum PatternsAction {
    /// List active recurring patterns
    List,

    /// Add a recurring pattern by hand (shielded from the detector)
    Add {
        /// Display name (e.g. "Rent")
        name: String,

        /// Amount per occurrence
        amount: f64,

        /// Frequency: weekly, biweekly, monthly, quarterly, yearly
        #[arg(long, short = 'f', default_value = "monthly")]
        frequency: String,

        /// Next expected date (YYYY-MM-DD)
        #[arg(long)]
        next: Option<String>,

        /// Category
        #[arg(long)]
        category: Option<String>,

        /// Money coming in rather than going out
        #[arg(long)]
        income: bool,
    },

    /// Edit a pattern (your edits shield it from re-detection)
    Edit {
        /// Pattern ID
        id: i64,

        /// New display name
        #[arg(long)]
        name: Option<String>,

        /// New amount
        #[arg(long)]
        amount: Option<f64>,

        /// New frequency: weekly, biweekly, monthly, quarterly, yearly
        #[arg(long)]
        frequency: Option<String>,

        /// New next expected date (YYYY-MM-DD)
        #[arg(long)]
        next: Option<String>,

        /// New category
        #[arg(long)]
        category: Option<String>,
    },

    /// Hand a user-modified pattern back to the detector
    Release {
        /// Pattern ID
        id: i64,
    },

    /// Delete a pattern and suppress future suggestions for its merchant
    Delete {
        /// Pattern ID
        id: i64,

        /// Answer yes to the confirmation prompt
        #[arg(long, short = 'y')]
        yes: bool,
    },
}

#[derive(Subcommand)]
pub enum ReviewAction {
    /// List pending suggestions, best candidates first
    List,

    /// Confirm suggestions, promoting them to live patterns
    Confirm {
        /// Suggestion IDs
        #[arg(required = true)]
        ids: Vec<i64>,
    },

    /// Deny suggestions and suppress their merchants
    Deny {
        /// Suggestion IDs
        #[arg(required = true)]
        ids: Vec<i64>,

        /// Reason: not_recurring, not_mine, duplicate, ended, other
        #[arg(long, default_value = "other")]
        reason: String,
    },
}

#[derive(Subcommand)]
pub enum AnomaliesAction {
    /// List anomalies
    List {
        /// Filter by status: pending, confirmed, dismissed, resolved
        #[arg(long)]
        status: Option<String>,
    },

    /// Dismiss an anomaly (say "expected" to teach the detector)
    Dismiss {
        /// Anomaly ID
        id: i64,

        /// Feedback (e.g. "expected, holiday spike")
        #[arg(long)]
        feedback: Option<String>,
    },

    /// Confirm an anomaly as a real problem
    Confirm {
        /// Anomaly ID
        id: i64,
    },
}

#[derive(Subcommand)]
pub enum RulesAction {
    /// List category rules
    List,

    /// Add a categorization rule
    Add {
        /// Category to assign when the rule matches
        category: String,

        /// Text (or regex) matched against transaction descriptions
        pattern: String,

        /// Match type: contains, exact, or regex
        #[arg(long, default_value = "contains")]
        pattern_type: String,

        /// Rule priority (lower = checked first)
        #[arg(long, default_value = "100")]
        priority: i64,
    },

    /// Remove a rule
    Delete {
        /// ID of the rule to remove
        id: i64,
    },

    /// Show which rule a description would hit
    Test {
        /// Sample description to run through the rules
        description: String,
    },

    /// Apply rules to uncategorized transactions
    Apply {
        /// Cap on rows processed in one run
        #[arg(long, default_value = "1000")]
        limit: i64,
    },
}

#[derive(Subcommand)]
pub enum OllamaAction {
    /// Test the backend connection and run a sample classification
    Test {
        /// Classify a specific merchant descriptor
        #[arg(long)]
        merchant: Option<String>,
    },

    /// Classify uncategorized transactions (sets display name and category)
    Classify {
        /// Cap on rows processed in one run
        #[arg(long, default_value = "100")]
        limit: i64,
    },
}
