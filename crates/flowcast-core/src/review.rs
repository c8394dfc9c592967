//! Suggestion review queue
//!
//! Bulk confirm/deny over the pending queue. Operations are atomic per
//! item: one bad id is reported, not allowed to roll back the rest.

use tracing::warn;

use crate::db::{ConfirmOutcome, Database, DenyOutcome};
use crate::error::Result;
use crate::models::{DenyReason, Suggestion};

/// Counts from a bulk review operation
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BulkOutcome {
    /// Items whose state actually changed
    pub succeeded: usize,
    /// Items already in the requested state (idempotent no-ops)
    pub already_done: usize,
    /// Items that could not be processed (missing, or in a conflicting state)
    pub failed: usize,
}

/// The pending queue, best candidates first
pub fn list_pending(db: &Database, user_id: i64) -> Result<Vec<Suggestion>> {
    db.list_pending_suggestions(user_id)
}

/// Confirm a batch of suggestions, promoting each to a recurring pattern.
///
/// Confirming an already-confirmed id counts as `already_done`, never an
/// error. Each id commits independently.
pub fn confirm_many(db: &Database, ids: &[i64]) -> Result<BulkOutcome> {
    let mut outcome = BulkOutcome::default();
    for &id in ids {
        match db.confirm_suggestion(id) {
            Ok(ConfirmOutcome::Promoted(_)) => outcome.succeeded += 1,
            Ok(ConfirmOutcome::AlreadyConfirmed) => outcome.already_done += 1,
            Err(e) => {
                warn!(suggestion_id = id, "confirm failed: {e}");
                outcome.failed += 1;
            }
        }
    }
    Ok(outcome)
}

/// Deny a batch of suggestions, recording the reason and suppressing each
/// merchant so detection stops re-surfacing it.
pub fn deny_many(db: &Database, ids: &[i64], reason: DenyReason) -> Result<BulkOutcome> {
    let mut outcome = BulkOutcome::default();
    for &id in ids {
        match db.deny_suggestion(id, reason) {
            Ok(DenyOutcome::Denied) => outcome.succeeded += 1,
            Ok(DenyOutcome::AlreadyDenied) => outcome.already_done += 1,
            Err(e) => {
                warn!(suggestion_id = id, "deny failed: {e}");
                outcome.failed += 1;
            }
        }
    }
    Ok(outcome)
}
