//! CSV ingest for transaction feeds
//!
//! Parses a generic export with flexible headers instead of per-bank
//! formats: columns are located by name (case-insensitive), so
//! `Date,Description,Amount` and `date,name,amount,category,is_income`
//! both work. Amount sign convention: positive = expense, negative =
//! income; an explicit income column overrides the sign heuristic.

use chrono::NaiveDate;
use csv::ReaderBuilder;
use sha2::{Digest, Sha256};
use std::io::Read;
use tracing::debug;

use crate::error::{Error, Result};
use crate::models::NewTransaction;

/// Generate a unique hash for import deduplication
///
/// Scoped by account so identical rows in two accounts both insert.
pub fn generate_hash(account_id: i64, date: &NaiveDate, description: &str, amount: f64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(account_id.to_be_bytes());
    hasher.update(date.to_string().as_bytes());
    hasher.update(description.as_bytes());
    hasher.update(amount.to_be_bytes());
    hex::encode(hasher.finalize())
}

/// Parse a date in the formats bank exports actually use
fn parse_csv_date(s: &str) -> Result<NaiveDate> {
    let s = s.trim();
    for fmt in ["%Y-%m-%d", "%m/%d/%Y", "%m/%d/%y"] {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Ok(d);
        }
    }
    Err(Error::Import(format!("Unparseable date: {}", s)))
}

/// Parse an amount, tolerating currency symbols, commas, and parens
fn parse_amount(s: &str) -> Result<f64> {
    let cleaned = s.trim().replace(['$', ','], "");
    // Accounting style: (12.34) means negative
    let (cleaned, negate) = if cleaned.starts_with('(') && cleaned.ends_with(')') {
        (cleaned[1..cleaned.len() - 1].to_string(), true)
    } else {
        (cleaned, false)
    };
    let value: f64 = cleaned
        .parse()
        .map_err(|_| Error::Import(format!("Unparseable amount: {}", s)))?;
    Ok(if negate { -value } else { value })
}

fn truthy(s: &str) -> bool {
    matches!(
        s.trim().to_lowercase().as_str(),
        "true" | "t" | "yes" | "y" | "1"
    )
}

/// Find a column index by any of the given header names
fn find_column(headers: &csv::StringRecord, names: &[&str]) -> Option<usize> {
    headers.iter().position(|h| {
        let h = h.trim().to_lowercase();
        names.iter().any(|n| h == *n)
    })
}

/// Parse transaction rows from a CSV feed export
pub fn parse_csv<R: Read>(reader: R, account_id: i64) -> Result<Vec<NewTransaction>> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let headers = rdr.headers()?.clone();

    let date_col = find_column(&headers, &["date", "transaction date", "posted date"])
        .ok_or_else(|| Error::Import("No date column found".into()))?;
    let desc_col = find_column(&headers, &["description", "name", "merchant", "payee"])
        .ok_or_else(|| Error::Import("No description column found".into()))?;
    let amount_col = find_column(&headers, &["amount"])
        .ok_or_else(|| Error::Import("No amount column found".into()))?;
    let category_col = find_column(&headers, &["category"]);
    let merchant_col = find_column(&headers, &["merchant name", "merchant_name"]);
    let income_col = find_column(&headers, &["is_income", "income"]);
    let exceptional_col = find_column(&headers, &["is_exceptional", "exceptional"]);
    let ignored_col = find_column(&headers, &["ignored", "excluded"]);

    let mut transactions = Vec::new();

    for result in rdr.records() {
        let record = result?;

        let date_str = record
            .get(date_col)
            .ok_or_else(|| Error::Import("Row missing date value".into()))?;
        let date = parse_csv_date(date_str)?;

        let description = record
            .get(desc_col)
            .ok_or_else(|| Error::Import("Row missing description value".into()))?
            .trim()
            .to_string();
        if description.is_empty() {
            return Err(Error::Import(format!("Empty description on {}", date)));
        }

        let amount_str = record
            .get(amount_col)
            .ok_or_else(|| Error::Import("Row missing amount value".into()))?;
        let amount = parse_amount(amount_str)?;

        let category = category_col
            .and_then(|i| record.get(i))
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let merchant_name = merchant_col
            .and_then(|i| record.get(i))
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let is_income = match income_col.and_then(|i| record.get(i)) {
            Some(v) if !v.trim().is_empty() => truthy(v),
            _ => amount < 0.0,
        };
        let is_exceptional = exceptional_col
            .and_then(|i| record.get(i))
            .map(truthy)
            .unwrap_or(false);
        let ignored = ignored_col
            .and_then(|i| record.get(i))
            .map(truthy)
            .unwrap_or(false);

        let import_hash = generate_hash(account_id, &date, &description, amount);

        transactions.push(NewTransaction {
            date,
            description,
            amount,
            category,
            merchant_name,
            is_income,
            is_exceptional,
            ignored,
            import_hash,
        });
    }

    debug!("Parsed {} transactions from CSV", transactions.len());
    Ok(transactions)
}
