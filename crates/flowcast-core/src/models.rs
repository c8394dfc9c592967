//! Row types and enums shared by the store and the analysis passes.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A bank account the user tracks balances against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub account_type: AccountType,
    /// Current balance as last synced. Positive = funds available.
    pub balance: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    Checking,
    Savings,
    Credit,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Checking => "checking",
            Self::Savings => "savings",
            Self::Credit => "credit",
        }
    }

    /// Cash-type accounts count toward the forecastable balance.
    pub fn is_cash(&self) -> bool {
        matches!(self, Self::Checking | Self::Savings)
    }
}

impl std::str::FromStr for AccountType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "checking" => Ok(Self::Checking),
            "savings" => Ok(Self::Savings),
            "credit" => Ok(Self::Credit),
            _ => Err(format!("Unknown account type: {}", s)),
        }
    }
}

impl std::fmt::Display for AccountType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single row from a bank feed or manual entry.
///
/// Amount sign convention: positive = expense, negative = income.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i64,
    pub user_id: i64,
    pub account_id: i64,
    pub date: NaiveDate,
    /// Raw descriptor as delivered by the bank feed
    pub description: String,
    /// Positive = expense, negative = income
    pub amount: f64,
    pub category: Option<String>,
    /// Merchant name from the feed, when cleaner than the descriptor
    pub merchant_name: Option<String>,
    /// User-edited display name; wins over merchant_name for grouping
    pub display_name: Option<String>,
    pub is_income: bool,
    /// One-off the user flagged as unrepresentative (excluded from baselines)
    pub is_exceptional: bool,
    /// Excluded from all analysis (transfers, reimbursements)
    pub ignored: bool,
    /// Hash for import deduplication
    pub import_hash: String,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// The name fed to the merchant normalizer: display name if the user
    /// set one, then the feed's merchant name, then the raw descriptor.
    pub fn merchant_input(&self) -> &str {
        self.display_name
            .as_deref()
            .or(self.merchant_name.as_deref())
            .unwrap_or(&self.description)
    }

    /// Expense under this crate's sign convention.
    pub fn is_expense(&self) -> bool {
        !self.is_income && self.amount > 0.0
    }
}

/// A new transaction to be inserted (before DB insertion)
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub date: NaiveDate,
    pub description: String,
    pub amount: f64,
    pub category: Option<String>,
    pub merchant_name: Option<String>,
    pub is_income: bool,
    pub is_exceptional: bool,
    pub ignored: bool,
    pub import_hash: String,
}

/// Recurring cadence of a detected or declared pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Weekly,
    #[serde(rename = "biweekly")]
    BiWeekly,
    Monthly,
    Quarterly,
    Yearly,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Weekly => "weekly",
            Self::BiWeekly => "biweekly",
            Self::Monthly => "monthly",
            Self::Quarterly => "quarterly",
            Self::Yearly => "yearly",
        }
    }

    /// Nominal interval length used to project future occurrences.
    pub fn interval_days(&self) -> i64 {
        match self {
            Self::Weekly => 7,
            Self::BiWeekly => 14,
            Self::Monthly => 30,
            Self::Quarterly => 91,
            Self::Yearly => 365,
        }
    }
}

impl std::str::FromStr for Frequency {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "weekly" => Ok(Self::Weekly),
            "biweekly" | "bi-weekly" => Ok(Self::BiWeekly),
            "monthly" => Ok(Self::Monthly),
            "quarterly" => Ok(Self::Quarterly),
            "yearly" | "annual" => Ok(Self::Yearly),
            _ => Err(format!("Unknown frequency: {}", s)),
        }
    }
}

impl std::fmt::Display for Frequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Trust level attached to a detected pattern or forecast
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }

    /// Numeric rank for ordering (higher = more trusted).
    pub fn rank(&self) -> u8 {
        match self {
            Self::High => 3,
            Self::Medium => 2,
            Self::Low => 1,
        }
    }
}

impl std::str::FromStr for Confidence {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            _ => Err(format!("Unknown confidence: {}", s)),
        }
    }
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a recurring pattern came to exist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PatternSource {
    /// Produced by the detector (directly or via a confirmed suggestion)
    #[default]
    Detected,
    /// Declared by the user through manual entry
    Manual,
}

impl PatternSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Detected => "detected",
            Self::Manual => "manual",
        }
    }
}

impl std::str::FromStr for PatternSource {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "detected" => Ok(Self::Detected),
            "manual" => Ok(Self::Manual),
            _ => Err(format!("Unknown pattern source: {}", s)),
        }
    }
}

impl std::fmt::Display for PatternSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A confirmed or user-declared recurring transaction series
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecurringPattern {
    pub id: i64,
    pub user_id: i64,
    /// Normalized merchant key used for matching (see merchant::normalize)
    pub merchant_key: String,
    pub display_name: String,
    pub frequency: Frequency,
    pub average_amount: f64,
    pub next_expected_date: NaiveDate,
    pub last_seen_date: NaiveDate,
    pub is_income: bool,
    pub category: Option<String>,
    pub confidence: Confidence,
    pub occurrence_count: i64,
    pub source: PatternSource,
    /// Set when the user edited frequency or next date; re-detection must
    /// not overwrite such a pattern without explicit confirmation.
    pub user_modified: bool,
    /// Optimistic-concurrency version, incremented on every write
    pub version: i64,
    /// Transaction ids the detector built this pattern from, oldest first
    pub source_transaction_ids: Vec<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What kind of recurring item a suggestion looks like
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillType {
    Subscription,
    Bill,
    Income,
}

impl BillType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Subscription => "subscription",
            Self::Bill => "bill",
            Self::Income => "income",
        }
    }
}

impl std::str::FromStr for BillType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "subscription" => Ok(Self::Subscription),
            "bill" => Ok(Self::Bill),
            "income" => Ok(Self::Income),
            _ => Err(format!("Unknown bill type: {}", s)),
        }
    }
}

impl std::fmt::Display for BillType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Suggestion lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionStatus {
    #[default]
    Pending,
    Confirmed,
    Denied,
    /// Replaced by a newer detection run before the user acted on it
    Superseded,
}

impl SuggestionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Denied => "denied",
            Self::Superseded => "superseded",
        }
    }
}

impl std::str::FromStr for SuggestionStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "confirmed" => Ok(Self::Confirmed),
            "denied" => Ok(Self::Denied),
            "superseded" => Ok(Self::Superseded),
            _ => Err(format!("Unknown suggestion status: {}", s)),
        }
    }
}

impl std::fmt::Display for SuggestionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why the user denied a suggestion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    NotRecurring,
    NotMine,
    Duplicate,
    Ended,
    Other,
}

impl DenyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotRecurring => "not_recurring",
            Self::NotMine => "not_mine",
            Self::Duplicate => "duplicate",
            Self::Ended => "ended",
            Self::Other => "other",
        }
    }
}

impl std::str::FromStr for DenyReason {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "not_recurring" | "not-recurring" => Ok(Self::NotRecurring),
            "not_mine" | "not-mine" => Ok(Self::NotMine),
            "duplicate" => Ok(Self::Duplicate),
            "ended" => Ok(Self::Ended),
            "other" => Ok(Self::Other),
            _ => Err(format!("Unknown deny reason: {}", s)),
        }
    }
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A detected pattern awaiting user review
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Suggestion {
    pub id: i64,
    pub user_id: i64,
    pub merchant_key: String,
    pub display_name: String,
    pub frequency: Frequency,
    pub average_amount: f64,
    pub next_expected_date: NaiveDate,
    pub last_seen_date: NaiveDate,
    pub is_income: bool,
    pub category: Option<String>,
    pub confidence: Confidence,
    pub occurrence_count: i64,
    pub source_transaction_ids: Vec<i64>,
    /// Human-readable explanation of why the detector flagged this
    pub detection_reason: String,
    pub bill_type: BillType,
    pub status: SuggestionStatus,
    pub deny_reason: Option<DenyReason>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Per-merchant statistical profile used for anomaly detection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MerchantBaseline {
    pub user_id: i64,
    pub merchant_key: String,
    pub mean_amount: f64,
    /// Population standard deviation; 0.0 for single-transaction merchants
    pub std_dev_amount: f64,
    pub min_amount: f64,
    pub max_amount: f64,
    pub transaction_count: i64,
    pub last_calculated: DateTime<Utc>,
}

/// Kinds of detected anomalies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyType {
    NewMerchant,
    AmountOutlier,
    MissedRecurring,
}

impl AnomalyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NewMerchant => "new_merchant",
            Self::AmountOutlier => "amount_outlier",
            Self::MissedRecurring => "missed_recurring",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::NewMerchant => "New merchant",
            Self::AmountOutlier => "Unusual amount",
            Self::MissedRecurring => "Missed recurring charge",
        }
    }
}

impl std::str::FromStr for AnomalyType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "new_merchant" => Ok(Self::NewMerchant),
            "amount_outlier" => Ok(Self::AmountOutlier),
            "missed_recurring" => Ok(Self::MissedRecurring),
            _ => Err(format!("Unknown anomaly type: {}", s)),
        }
    }
}

impl std::fmt::Display for AnomalyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Severity of an anomaly or forecast alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "warning" => Ok(Self::Warning),
            "critical" => Ok(Self::Critical),
            _ => Err(format!("Unknown severity: {}", s)),
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Anomaly review state, driven by user actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AnomalyStatus {
    #[default]
    Pending,
    Dismissed,
    Confirmed,
    Resolved,
}

impl AnomalyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Dismissed => "dismissed",
            Self::Confirmed => "confirmed",
            Self::Resolved => "resolved",
        }
    }
}

impl std::str::FromStr for AnomalyStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "dismissed" => Ok(Self::Dismissed),
            "confirmed" => Ok(Self::Confirmed),
            "resolved" => Ok(Self::Resolved),
            _ => Err(format!("Unknown anomaly status: {}", s)),
        }
    }
}

impl std::fmt::Display for AnomalyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A stored anomaly
///
/// `transaction_id` is set for transaction-backed anomalies (new_merchant,
/// amount_outlier); `pattern_id` is set for missed_recurring, which has no
/// triggering transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Anomaly {
    pub id: i64,
    pub user_id: i64,
    pub transaction_id: Option<i64>,
    pub pattern_id: Option<i64>,
    pub merchant_key: String,
    pub anomaly_type: AnomalyType,
    pub severity: Severity,
    pub status: AnomalyStatus,
    pub amount: Option<f64>,
    /// For missed_recurring: the date the charge was expected
    pub expected_date: Option<NaiveDate>,
    pub detail: String,
    pub detected_at: DateTime<Utc>,
    pub false_positive: bool,
    pub user_feedback: Option<String>,
}

/// A freshly detected anomaly, before insertion
#[derive(Debug, Clone, PartialEq)]
pub struct NewAnomaly {
    pub user_id: i64,
    pub transaction_id: Option<i64>,
    pub pattern_id: Option<i64>,
    pub merchant_key: String,
    pub anomaly_type: AnomalyType,
    pub severity: Severity,
    pub amount: Option<f64>,
    pub expected_date: Option<NaiveDate>,
    pub detail: String,
}

/// Outcome of a bulk anomaly save
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveOutcome {
    pub saved: usize,
    pub duplicates: usize,
}

/// One projected day in a forecast
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastDay {
    pub date: NaiveDate,
    pub balance: f64,
    pub is_low: bool,
    pub is_negative: bool,
}

/// Structured forecast alert types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    NegativeBalance,
    LowBalance,
    LargeExpense,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NegativeBalance => "negative_balance",
            Self::LowBalance => "low_balance",
            Self::LargeExpense => "large_expense",
        }
    }
}

impl std::str::FromStr for AlertType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "negative_balance" => Ok(Self::NegativeBalance),
            "low_balance" => Ok(Self::LowBalance),
            "large_expense" => Ok(Self::LargeExpense),
            _ => Err(format!("Unknown alert type: {}", s)),
        }
    }
}

impl std::fmt::Display for AlertType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A structured forecast alert with machine-readable fields
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastAlert {
    pub alert_type: AlertType,
    pub severity: Severity,
    pub date: NaiveDate,
    pub amount: f64,
    pub message: String,
}

/// One recurring pattern's contribution to a forecast
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastItem {
    pub pattern_id: i64,
    pub name: String,
    pub amount: f64,
    pub frequency: Frequency,
    /// Predicted dates within the horizon, ascending
    pub dates: Vec<NaiveDate>,
    /// amount * dates.len()
    pub total: f64,
}

/// Itemized composition of a forecast, for transparency
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ForecastBreakdown {
    pub income_items: Vec<ForecastItem>,
    pub expense_items: Vec<ForecastItem>,
    /// daily_rate * horizon_days
    pub discretionary_total: f64,
    /// income - expenses - discretionary
    pub net_change: f64,
}

/// A stored daily balance projection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastSnapshot {
    pub id: i64,
    pub user_id: i64,
    pub generated_at: DateTime<Utc>,
    pub horizon_days: i64,
    pub starting_balance: f64,
    /// Day 0 (= starting balance) through day horizon_days, ascending
    pub days: Vec<ForecastDay>,
    pub total_income: f64,
    pub total_expenses: f64,
    pub confidence: Confidence,
    pub breakdown: ForecastBreakdown,
    pub alerts: Vec<ForecastAlert>,
    /// Discretionary rate used, after multiplier
    pub daily_rate: f64,
    /// Accuracy-adjustment multiplier in effect at generation time
    pub multiplier: f64,
    /// Set once the learning loop has compared this snapshot to actuals
    pub compared_at: Option<DateTime<Utc>>,
}

/// One stored per-day comparison between a forecast and reality
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastComparison {
    pub snapshot_id: i64,
    pub date: NaiveDate,
    pub predicted_balance: f64,
    pub actual_balance: f64,
    /// predicted - actual
    pub error_amount: f64,
    /// |predicted - actual| / |actual|, None when actual is near zero
    pub error_percent: Option<f64>,
}

/// Append-only record of one learning-loop accuracy analysis
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningRecord {
    pub id: i64,
    pub user_id: i64,
    pub analyzed_at: DateTime<Utc>,
    pub mean_error_percent: f64,
    /// Fraction of days where predicted and actual balance moved the same way
    pub direction_accuracy: f64,
    /// Bounded correction applied to future discretionary estimates
    pub accuracy_adjustment_multiplier: f64,
    pub snapshots_compared: i64,
    pub days_compared: i64,
}

/// How a category rule matches a description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Contains,
    Exact,
    Regex,
}

impl MatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Contains => "contains",
            Self::Exact => "exact",
            Self::Regex => "regex",
        }
    }
}

impl std::str::FromStr for MatchType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "contains" => Ok(Self::Contains),
            "exact" => Ok(Self::Exact),
            "regex" => Ok(Self::Regex),
            _ => Err(format!("Unknown match type: {}", s)),
        }
    }
}

impl std::fmt::Display for MatchType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A user-defined categorization rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryRule {
    pub id: i64,
    pub user_id: i64,
    pub pattern: String,
    pub match_type: MatchType,
    pub category: String,
    /// Lower number = applied first
    pub priority: i64,
    pub created_at: DateTime<Utc>,
}
