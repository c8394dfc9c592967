//! Store-level tests: every query helper against a real SQLite file.

use super::*;
use crate::models::*;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::DetectedPattern;
    use rusqlite::params;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn make_detected(key: &str, name: &str, amount: f64, is_income: bool) -> DetectedPattern {
        DetectedPattern {
            merchant_key: key.to_string(),
            display_name: name.to_string(),
            frequency: Frequency::Monthly,
            average_amount: amount,
            next_expected_date: date(2024, 5, 15),
            last_seen_date: date(2024, 4, 15),
            is_income,
            category: None,
            confidence: Confidence::High,
            occurrence_count: 4,
            source_transaction_ids: vec![1, 2, 3, 4],
            detection_reason: format!("4 charges of ~${:.2} every ~30 days", amount),
            bill_type: BillType::Subscription,
        }
    }

    fn make_new_tx(d: NaiveDate, desc: &str, amount: f64, account_id: i64) -> NewTransaction {
        NewTransaction {
            date: d,
            description: desc.to_string(),
            amount,
            category: None,
            merchant_name: None,
            is_income: amount < 0.0,
            is_exceptional: false,
            ignored: false,
            import_hash: crate::ingest::generate_hash(account_id, &d, desc, amount),
        }
    }

    fn make_snapshot(user_id: i64, starting_balance: f64) -> ForecastSnapshot {
        let days = vec![
            ForecastDay {
                date: date(2024, 1, 1),
                balance: starting_balance,
                is_low: false,
                is_negative: false,
            },
            ForecastDay {
                date: date(2024, 1, 2),
                balance: starting_balance - 30.0,
                is_low: false,
                is_negative: false,
            },
        ];
        ForecastSnapshot {
            id: 0,
            user_id,
            generated_at: chrono::Utc::now(),
            horizon_days: 30,
            starting_balance,
            days,
            total_income: 0.0,
            total_expenses: 30.0,
            confidence: Confidence::Medium,
            breakdown: ForecastBreakdown::default(),
            alerts: vec![ForecastAlert {
                alert_type: AlertType::LowBalance,
                severity: Severity::Warning,
                date: date(2024, 1, 20),
                amount: 80.0,
                message: "Balance drops to $80.00".to_string(),
            }],
            daily_rate: 30.0,
            multiplier: 1.0,
            compared_at: None,
        }
    }

    #[test]
    fn test_in_memory_db() {
        let db = Database::in_memory().unwrap();
        assert!(db.list_user_ids().unwrap().is_empty());
    }

    #[test]
    fn test_core_schema_exists() {
        let db = Database::in_memory().unwrap();
        let conn = db.conn().unwrap();

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM pragma_table_info('recurring_patterns')
                 WHERE name IN ('merchant_key', 'frequency', 'source', 'user_modified', 'version')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 5, "recurring_patterns should carry edit-tracking columns");

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM pragma_table_info('anomalies')
                 WHERE name IN ('type', 'severity', 'expected_date', 'false_positive', 'user_feedback')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 5, "anomalies should carry feedback columns");

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM pragma_table_info('forecast_snapshots')
                 WHERE name IN ('days', 'breakdown', 'alerts', 'multiplier', 'compared_at')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 5, "forecast_snapshots should carry learning columns");

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM pragma_table_info('suggestions')
                 WHERE name IN ('status', 'deny_reason', 'bill_type', 'detection_reason')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 4, "suggestions should carry review columns");
    }

    #[test]
    fn test_user_and_account_crud() {
        let db = Database::in_memory().unwrap();

        let user_id = db.upsert_user("casey").unwrap();
        assert!(user_id > 0);

        // Upsert same user returns same ID
        let again = db.upsert_user("casey").unwrap();
        assert_eq!(user_id, again);

        assert!(db.upsert_user("   ").is_err(), "blank user name should be rejected");

        let checking = db
            .upsert_account(user_id, "Checking", AccountType::Checking, 1200.0)
            .unwrap();
        db.upsert_account(user_id, "Savings", AccountType::Savings, 5000.0)
            .unwrap();
        db.upsert_account(user_id, "Visa", AccountType::Credit, -431.22)
            .unwrap();

        let accounts = db.list_accounts(user_id).unwrap();
        assert_eq!(accounts.len(), 3);

        // Credit balances never count toward projectable cash
        assert!((db.cash_balance(user_id).unwrap() - 6200.0).abs() < 0.001);

        db.set_account_balance(checking, 900.0).unwrap();
        assert!((db.cash_balance(user_id).unwrap() - 5900.0).abs() < 0.001);
    }

    #[test]
    fn test_insert_transaction_duplicate() {
        let db = Database::in_memory().unwrap();
        let user_id = db.upsert_user("casey").unwrap();
        let account_id = db
            .upsert_account(user_id, "Checking", AccountType::Checking, 0.0)
            .unwrap();

        let tx = make_new_tx(date(2024, 3, 1), "NETFLIX.COM", 15.99, account_id);

        let first = db.insert_transaction(user_id, account_id, &tx).unwrap();
        assert!(first.is_some());

        // Same content hash is silently skipped
        let second = db.insert_transaction(user_id, account_id, &tx).unwrap();
        assert!(second.is_none());

        assert_eq!(db.transaction_count(user_id).unwrap(), 1);
    }

    #[test]
    fn test_bulk_import_commits_in_batches() {
        let db = Database::in_memory().unwrap();
        let user_id = db.upsert_user("casey").unwrap();
        let account_id = db
            .upsert_account(user_id, "Checking", AccountType::Checking, 0.0)
            .unwrap();

        // 60 rows spans three insert batches
        let txs: Vec<NewTransaction> = (0..60)
            .map(|i| {
                make_new_tx(
                    date(2024, 1, 1) + chrono::Duration::days(i),
                    &format!("VENDOR {}", i),
                    10.0 + i as f64,
                    account_id,
                )
            })
            .collect();

        let result = db.insert_transactions(user_id, account_id, &txs).unwrap();
        assert_eq!(result, ImportResult { inserted: 60, skipped: 0 });

        let rerun = db.insert_transactions(user_id, account_id, &txs).unwrap();
        assert_eq!(rerun, ImportResult { inserted: 0, skipped: 60 });
        assert_eq!(db.transaction_count(user_id).unwrap(), 60);
    }

    #[test]
    fn test_manual_transaction_validation() {
        let db = Database::in_memory().unwrap();
        let user_id = db.upsert_user("casey").unwrap();
        let account_id = db
            .upsert_account(user_id, "Checking", AccountType::Checking, 0.0)
            .unwrap();

        assert!(db
            .add_manual_transaction(user_id, account_id, date(2024, 3, 1), "  ", 5.0, None, false)
            .is_err());
        assert!(db
            .add_manual_transaction(user_id, account_id, date(2024, 3, 1), "X", 0.0, None, false)
            .is_err());
        assert!(db
            .add_manual_transaction(user_id, account_id, date(2024, 3, 1), "X", f64::NAN, None, false)
            .is_err());
        assert!(matches!(
            db.add_manual_transaction(user_id, 9999, date(2024, 3, 1), "X", 5.0, None, false),
            Err(Error::NotFound(_))
        ));

        let id = db
            .add_manual_transaction(user_id, account_id, date(2024, 3, 1), "Coffee", 4.50, None, false)
            .unwrap();
        assert!(id > 0);

        // Same date/description/amount hashes identically
        let dup = db.add_manual_transaction(
            user_id, account_id, date(2024, 3, 1), "Coffee", 4.50, None, false,
        );
        assert!(dup.is_err(), "identical manual entry should be rejected");
    }

    #[test]
    fn test_feed_options_filters() {
        let db = Database::in_memory().unwrap();
        let user_id = db.upsert_user("casey").unwrap();
        let account_id = db
            .upsert_account(user_id, "Checking", AccountType::Checking, 0.0)
            .unwrap();

        let normal = make_new_tx(date(2024, 3, 1), "SAFEWAY", 50.0, account_id);
        let mut exceptional = make_new_tx(date(2024, 3, 2), "CAR REPAIR", 900.0, account_id);
        exceptional.is_exceptional = true;
        let mut ignored = make_new_tx(date(2024, 3, 3), "TRANSFER", 500.0, account_id);
        ignored.ignored = true;

        for tx in [&normal, &exceptional, &ignored] {
            db.insert_transaction(user_id, account_id, tx).unwrap();
        }

        // Default feed drops ignored rows but keeps exceptional ones
        let feed = db
            .fetch_transactions(user_id, date(2024, 1, 1), FeedOptions::default())
            .unwrap();
        assert_eq!(feed.len(), 2);

        let strict = db
            .fetch_transactions(
                user_id,
                date(2024, 1, 1),
                FeedOptions { exclude_exceptional: true, exclude_ignored: true },
            )
            .unwrap();
        assert_eq!(strict.len(), 1);
        assert_eq!(strict[0].description, "SAFEWAY");

        let everything = db
            .fetch_transactions(
                user_id,
                date(2024, 1, 1),
                FeedOptions { exclude_exceptional: false, exclude_ignored: false },
            )
            .unwrap();
        assert_eq!(everything.len(), 3);
    }

    #[test]
    fn test_daily_net_deltas_window_and_sign() {
        let db = Database::in_memory().unwrap();
        let user_id = db.upsert_user("casey").unwrap();
        let account_id = db
            .upsert_account(user_id, "Checking", AccountType::Checking, 0.0)
            .unwrap();

        // Day 1 is on the exclusive edge of the window
        db.insert_transaction(user_id, account_id, &make_new_tx(date(2024, 3, 1), "EDGE", 100.0, account_id))
            .unwrap();
        db.insert_transaction(user_id, account_id, &make_new_tx(date(2024, 3, 2), "GROCERIES", 40.0, account_id))
            .unwrap();
        db.insert_transaction(user_id, account_id, &make_new_tx(date(2024, 3, 2), "PAYROLL", -1000.0, account_id))
            .unwrap();
        db.insert_transaction(user_id, account_id, &make_new_tx(date(2024, 3, 3), "COFFEE", 5.0, account_id))
            .unwrap();
        let mut skipped = make_new_tx(date(2024, 3, 3), "TRANSFER", 250.0, account_id);
        skipped.ignored = true;
        db.insert_transaction(user_id, account_id, &skipped).unwrap();

        let deltas = db
            .daily_net_deltas(user_id, date(2024, 3, 1), date(2024, 3, 3))
            .unwrap();

        assert_eq!(deltas.len(), 2, "window is (after, through]");
        assert_eq!(deltas[0].0, date(2024, 3, 2));
        // Expenses are positive amounts, so the balance delta flips sign
        assert!((deltas[0].1 - 960.0).abs() < 0.001);
        assert_eq!(deltas[1].0, date(2024, 3, 3));
        assert!((deltas[1].1 - (-5.0)).abs() < 0.001);
    }

    #[test]
    fn test_detected_pattern_upsert_refreshes_in_place() {
        let db = Database::in_memory().unwrap();
        let user_id = db.upsert_user("casey").unwrap();

        let detected = make_detected("netflix com", "NETFLIX.COM", 15.99, false);
        let id = db.upsert_detected_pattern(user_id, &detected).unwrap().unwrap();

        let stored = db.get_pattern(id).unwrap().unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(stored.source, PatternSource::Detected);

        let mut refreshed = make_detected("netflix com", "NETFLIX.COM", 17.99, false);
        refreshed.occurrence_count = 5;
        let id2 = db.upsert_detected_pattern(user_id, &refreshed).unwrap().unwrap();
        assert_eq!(id, id2, "same merchant series refreshes the same row");

        let stored = db.get_pattern(id).unwrap().unwrap();
        assert_eq!(stored.version, 2);
        assert_eq!(stored.occurrence_count, 5);
        assert!((stored.average_amount - 17.99).abs() < 0.001);
    }

    #[test]
    fn test_suppression_blocks_detected_upsert() {
        let db = Database::in_memory().unwrap();
        let user_id = db.upsert_user("casey").unwrap();

        assert!(db.add_suppression(user_id, "netflix com", Some("not_mine")).unwrap());
        // Second add is a no-op
        assert!(!db.add_suppression(user_id, "netflix com", None).unwrap());

        let detected = make_detected("netflix com", "NETFLIX.COM", 15.99, false);
        let result = db.upsert_detected_pattern(user_id, &detected).unwrap();
        assert!(result.is_none(), "suppressed merchants must not be resurrected");

        assert!(db.remove_suppression(user_id, "netflix com").unwrap());
        let result = db.upsert_detected_pattern(user_id, &detected).unwrap();
        assert!(result.is_some());
    }

    #[test]
    fn test_manual_pattern_shielded_from_detection() {
        let db = Database::in_memory().unwrap();
        let user_id = db.upsert_user("casey").unwrap();

        let id = db
            .add_manual_pattern(user_id, "Rent", 2000.0, Frequency::Monthly, false, None, Some("Housing"))
            .unwrap();
        let pattern = db.get_pattern(id).unwrap().unwrap();
        assert_eq!(pattern.source, PatternSource::Manual);
        assert_eq!(pattern.confidence, Confidence::High);
        assert_eq!(pattern.merchant_key, "rent");

        // A detector run for the same key never overwrites user-declared rows
        let detected = make_detected("rent", "RENT PAYMENT", 1950.0, false);
        assert!(db.upsert_detected_pattern(user_id, &detected).unwrap().is_none());

        let unchanged = db.get_pattern(id).unwrap().unwrap();
        assert!((unchanged.average_amount - 2000.0).abs() < 0.001);

        // Second manual declaration for the same merchant is rejected
        assert!(db
            .add_manual_pattern(user_id, "Rent", 1800.0, Frequency::Monthly, false, None, None)
            .is_err());
    }

    #[test]
    fn test_manual_pattern_validation() {
        let db = Database::in_memory().unwrap();
        let user_id = db.upsert_user("casey").unwrap();

        assert!(db
            .add_manual_pattern(user_id, "  ", 10.0, Frequency::Monthly, false, None, None)
            .is_err());
        assert!(db
            .add_manual_pattern(user_id, "Gym", -10.0, Frequency::Monthly, false, None, None)
            .is_err());
        assert!(db
            .add_manual_pattern(user_id, "!!!", 10.0, Frequency::Monthly, false, None, None)
            .is_err(), "name must survive normalization");
        assert!(db
            .add_manual_pattern(
                user_id, "Gym", 10.0, Frequency::Monthly, false,
                Some(date(2020, 1, 1)), None,
            )
            .is_err(), "next date must not be in the past");
    }

    #[test]
    fn test_update_pattern_version_conflict() {
        let db = Database::in_memory().unwrap();
        let user_id = db.upsert_user("casey").unwrap();
        let detected = make_detected("netflix com", "NETFLIX.COM", 15.99, false);
        let id = db.upsert_detected_pattern(user_id, &detected).unwrap().unwrap();

        let update = PatternUpdate {
            average_amount: Some(16.99),
            ..Default::default()
        };

        let updated = db.update_pattern(id, 1, &update).unwrap();
        assert_eq!(updated.version, 2);
        assert!(updated.user_modified);
        assert!((updated.average_amount - 16.99).abs() < 0.001);

        // Writing against the stale version loses the race
        let err = db.update_pattern(id, 1, &update).unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        assert!(err.is_retryable());

        // Re-read and retry succeeds
        let current = db.get_pattern(id).unwrap().unwrap();
        assert!(db.update_pattern(id, current.version, &update).is_ok());
    }

    #[test]
    fn test_update_pattern_not_found_vs_conflict() {
        let db = Database::in_memory().unwrap();
        let update = PatternUpdate {
            display_name: Some("Anything".to_string()),
            ..Default::default()
        };
        let err = db.update_pattern(4242, 1, &update).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_update_pattern_rejects_empty_and_bad_amounts() {
        let db = Database::in_memory().unwrap();
        let user_id = db.upsert_user("casey").unwrap();
        let id = db
            .upsert_detected_pattern(user_id, &make_detected("spotify", "SPOTIFY", 9.99, false))
            .unwrap()
            .unwrap();

        assert!(db.update_pattern(id, 1, &PatternUpdate::default()).is_err());
        let bad = PatternUpdate {
            average_amount: Some(-5.0),
            ..Default::default()
        };
        assert!(db.update_pattern(id, 1, &bad).is_err());
    }

    #[test]
    fn test_user_modified_shield_and_release() {
        let db = Database::in_memory().unwrap();
        let user_id = db.upsert_user("casey").unwrap();
        let detected = make_detected("netflix com", "NETFLIX.COM", 15.99, false);
        let id = db.upsert_detected_pattern(user_id, &detected).unwrap().unwrap();

        let update = PatternUpdate {
            frequency: Some(Frequency::Quarterly),
            ..Default::default()
        };
        db.update_pattern(id, 1, &update).unwrap();

        // Re-detection now skips the row
        assert!(db.upsert_detected_pattern(user_id, &detected).unwrap().is_none());
        assert_eq!(db.get_pattern(id).unwrap().unwrap().frequency, Frequency::Quarterly);

        db.release_pattern_override(id).unwrap();
        assert!(db.upsert_detected_pattern(user_id, &detected).unwrap().is_some());
        assert_eq!(db.get_pattern(id).unwrap().unwrap().frequency, Frequency::Monthly);
    }

    #[test]
    fn test_delete_pattern_suppresses_merchant() {
        let db = Database::in_memory().unwrap();
        let user_id = db.upsert_user("casey").unwrap();
        let detected = make_detected("planet fitness", "PLANET FITNESS", 24.99, false);
        let id = db.upsert_detected_pattern(user_id, &detected).unwrap().unwrap();

        db.delete_pattern(id).unwrap();
        assert!(db.get_pattern(id).unwrap().is_none());
        assert!(db
            .get_suppression_list(user_id)
            .unwrap()
            .contains(&"planet fitness".to_string()));

        // And the suppression holds against the next run
        assert!(db.upsert_detected_pattern(user_id, &detected).unwrap().is_none());

        assert!(matches!(db.delete_pattern(id), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_suggestion_refresh_and_supersede() {
        let db = Database::in_memory().unwrap();
        let user_id = db.upsert_user("casey").unwrap();

        let mut candidate = make_detected("city gym", "CITY GYM", 35.0, false);
        candidate.confidence = Confidence::Medium;
        candidate.occurrence_count = 3;

        let id = db.upsert_suggestion(user_id, &candidate).unwrap();

        // Same shape refreshes in place
        candidate.occurrence_count = 4;
        let id2 = db.upsert_suggestion(user_id, &candidate).unwrap();
        assert_eq!(id, id2);
        assert_eq!(db.get_suggestion(id).unwrap().unwrap().occurrence_count, 4);

        // A different inferred frequency supersedes the stale row
        candidate.frequency = Frequency::BiWeekly;
        let id3 = db.upsert_suggestion(user_id, &candidate).unwrap();
        assert_ne!(id, id3);
        assert_eq!(
            db.get_suggestion(id).unwrap().unwrap().status,
            SuggestionStatus::Superseded
        );

        let pending = db.list_pending_suggestions(user_id).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, id3);
    }

    #[test]
    fn test_confirm_suggestion_clears_old_denial() {
        let db = Database::in_memory().unwrap();
        let user_id = db.upsert_user("casey").unwrap();

        // Merchant was denied once before
        db.add_suppression(user_id, "city gym", Some("not_recurring")).unwrap();

        let mut candidate = make_detected("city gym", "CITY GYM", 35.0, false);
        candidate.confidence = Confidence::Medium;
        let id = db.upsert_suggestion(user_id, &candidate).unwrap();

        let outcome = db.confirm_suggestion(id).unwrap();
        let pattern_id = match outcome {
            ConfirmOutcome::Promoted(pid) => pid,
            other => panic!("expected promotion, got {:?}", other),
        };
        assert!(db.get_pattern(pattern_id).unwrap().is_some());

        // Confirming is the user overriding their earlier denial
        assert!(db.get_suppression_list(user_id).unwrap().is_empty());
    }

    #[test]
    fn test_confirm_non_pending_states() {
        let db = Database::in_memory().unwrap();
        let user_id = db.upsert_user("casey").unwrap();

        let mut candidate = make_detected("city gym", "CITY GYM", 35.0, false);
        candidate.confidence = Confidence::Medium;
        let id = db.upsert_suggestion(user_id, &candidate).unwrap();

        db.deny_suggestion(id, DenyReason::NotRecurring).unwrap();
        assert!(matches!(db.confirm_suggestion(id), Err(Error::InvalidInput(_))));

        assert!(matches!(db.confirm_suggestion(987_654), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_deny_records_reason_and_suppresses() {
        let db = Database::in_memory().unwrap();
        let user_id = db.upsert_user("casey").unwrap();

        let mut candidate = make_detected("city gym", "CITY GYM", 35.0, false);
        candidate.confidence = Confidence::Medium;
        let id = db.upsert_suggestion(user_id, &candidate).unwrap();

        assert_eq!(
            db.deny_suggestion(id, DenyReason::Ended).unwrap(),
            DenyOutcome::Denied
        );
        assert_eq!(
            db.deny_suggestion(id, DenyReason::Ended).unwrap(),
            DenyOutcome::AlreadyDenied
        );

        let stored = db.get_suggestion(id).unwrap().unwrap();
        assert_eq!(stored.status, SuggestionStatus::Denied);
        assert_eq!(stored.deny_reason, Some(DenyReason::Ended));
        assert!(stored.resolved_at.is_some());
        assert!(db
            .get_suppression_list(user_id)
            .unwrap()
            .contains(&"city gym".to_string()));
    }

    #[test]
    fn test_anomaly_dedup_by_transaction_and_pattern() {
        let db = Database::in_memory().unwrap();
        let user_id = db.upsert_user("casey").unwrap();
        let account_id = db
            .upsert_account(user_id, "Checking", AccountType::Checking, 0.0)
            .unwrap();
        let tx_id = db
            .add_manual_transaction(user_id, account_id, date(2024, 5, 2), "SAFEWAY", 500.0, None, false)
            .unwrap();
        let pattern_id = db
            .upsert_detected_pattern(user_id, &make_detected("netflix com", "NETFLIX.COM", 15.99, false))
            .unwrap()
            .unwrap();

        let outlier = NewAnomaly {
            user_id,
            transaction_id: Some(tx_id),
            pattern_id: None,
            merchant_key: "safeway".to_string(),
            anomaly_type: AnomalyType::AmountOutlier,
            severity: Severity::Critical,
            amount: Some(500.0),
            expected_date: None,
            detail: "SAFEWAY charged $500.00, typical range $48.00-$52.00".to_string(),
        };
        let missed = NewAnomaly {
            user_id,
            transaction_id: None,
            pattern_id: Some(pattern_id),
            merchant_key: "netflix com".to_string(),
            anomaly_type: AnomalyType::MissedRecurring,
            severity: Severity::Warning,
            amount: Some(15.99),
            expected_date: Some(date(2024, 5, 15)),
            detail: "NETFLIX.COM (~$15.99) expected 2024-05-15 but not seen".to_string(),
        };

        let first = db.save_anomalies(&[outlier.clone(), missed.clone()]).unwrap();
        assert_eq!(first, SaveOutcome { saved: 2, duplicates: 0 });

        // Re-running the scan reports the dupes instead of double-alerting
        let rerun = db.save_anomalies(&[outlier.clone(), missed.clone()]).unwrap();
        assert_eq!(rerun, SaveOutcome { saved: 0, duplicates: 2 });
        assert_eq!(db.list_anomalies(user_id, None).unwrap().len(), 2);

        // The same pattern missing a different cycle is a new anomaly
        let mut next_cycle = missed;
        next_cycle.expected_date = Some(date(2024, 6, 15));
        assert_eq!(
            db.save_anomalies(&[next_cycle]).unwrap(),
            SaveOutcome { saved: 1, duplicates: 0 }
        );

        // A different anomaly type for the same transaction also lands
        let mut new_merchant = outlier;
        new_merchant.anomaly_type = AnomalyType::NewMerchant;
        new_merchant.severity = Severity::Warning;
        assert_eq!(
            db.save_anomalies(&[new_merchant]).unwrap(),
            SaveOutcome { saved: 1, duplicates: 0 }
        );
    }

    #[test]
    fn test_anomaly_save_spans_batches() {
        let db = Database::in_memory().unwrap();
        let user_id = db.upsert_user("casey").unwrap();
        let account_id = db
            .upsert_account(user_id, "Checking", AccountType::Checking, 0.0)
            .unwrap();

        // More rows than one commit batch holds
        let mut anomalies = Vec::new();
        for i in 0..30 {
            let tx_id = db
                .add_manual_transaction(
                    user_id,
                    account_id,
                    date(2024, 5, 1),
                    &format!("VENDOR {}", i),
                    20.0 + i as f64,
                    None,
                    false,
                )
                .unwrap();
            anomalies.push(NewAnomaly {
                user_id,
                transaction_id: Some(tx_id),
                pattern_id: None,
                merchant_key: format!("vendor {}", i),
                anomaly_type: AnomalyType::NewMerchant,
                severity: Severity::Warning,
                amount: Some(20.0 + i as f64),
                expected_date: None,
                detail: format!("First transaction from VENDOR {}", i),
            });
        }

        let outcome = db.save_anomalies(&anomalies).unwrap();
        assert_eq!(outcome, SaveOutcome { saved: 30, duplicates: 0 });
        assert_eq!(db.list_anomalies(user_id, None).unwrap().len(), 30);
    }

    #[test]
    fn test_anomaly_feedback_marks_false_positive() {
        let db = Database::in_memory().unwrap();
        let user_id = db.upsert_user("casey").unwrap();
        let account_id = db
            .upsert_account(user_id, "Checking", AccountType::Checking, 0.0)
            .unwrap();

        let mut ids = Vec::new();
        for (i, merchant) in ["safeway", "safeway", "chevron"].iter().enumerate() {
            let tx_id = db
                .add_manual_transaction(
                    user_id,
                    account_id,
                    date(2024, 5, 1 + i as u32),
                    &format!("{} {}", merchant.to_uppercase(), i),
                    200.0,
                    None,
                    false,
                )
                .unwrap();
            let outcome = db
                .save_anomalies(&[NewAnomaly {
                    user_id,
                    transaction_id: Some(tx_id),
                    pattern_id: None,
                    merchant_key: merchant.to_string(),
                    anomaly_type: AnomalyType::AmountOutlier,
                    severity: Severity::Critical,
                    amount: Some(200.0),
                    expected_date: None,
                    detail: format!("{} charged $200.00", merchant),
                }])
                .unwrap();
            assert_eq!(outcome.saved, 1);
            ids.push(db.list_anomalies(user_id, None).unwrap()[0].id);
        }

        // "expected" while dismissing is the false-positive signal
        let a = db
            .update_anomaly_status(ids[0], AnomalyStatus::Dismissed, Some("expected"))
            .unwrap();
        assert!(a.false_positive);

        // Dismissing for some other reason is not
        let b = db
            .update_anomaly_status(ids[1], AnomalyStatus::Dismissed, Some("will watch this"))
            .unwrap();
        assert!(!b.false_positive);

        // Nor is confirming the anomaly was real
        let c = db
            .update_anomaly_status(ids[2], AnomalyStatus::Confirmed, Some("expected"))
            .unwrap();
        assert!(!c.false_positive);

        let counts = db.false_positive_counts(user_id).unwrap();
        assert_eq!(counts.get("safeway"), Some(&1));
        assert_eq!(counts.get("chevron"), None);

        let pending = db.list_anomalies(user_id, Some(AnomalyStatus::Pending)).unwrap();
        assert!(pending.is_empty());
    }

    #[test]
    fn test_false_positive_counts_only_amount_outliers() {
        let db = Database::in_memory().unwrap();
        let user_id = db.upsert_user("casey").unwrap();
        let account_id = db
            .upsert_account(user_id, "Checking", AccountType::Checking, 0.0)
            .unwrap();
        let tx_id = db
            .add_manual_transaction(user_id, account_id, date(2024, 5, 1), "NEW SHOP", 30.0, None, false)
            .unwrap();

        db.save_anomalies(&[NewAnomaly {
            user_id,
            transaction_id: Some(tx_id),
            pattern_id: None,
            merchant_key: "new shop".to_string(),
            anomaly_type: AnomalyType::NewMerchant,
            severity: Severity::Warning,
            amount: Some(30.0),
            expected_date: None,
            detail: "First transaction from NEW SHOP ($30.00)".to_string(),
        }])
        .unwrap();

        let id = db.list_anomalies(user_id, None).unwrap()[0].id;
        db.update_anomaly_status(id, AnomalyStatus::Dismissed, Some("expected"))
            .unwrap();

        // New-merchant dismissals never widen outlier bands
        assert!(db.false_positive_counts(user_id).unwrap().is_empty());
    }

    #[test]
    fn test_forecast_snapshot_roundtrip() {
        let db = Database::in_memory().unwrap();
        let user_id = db.upsert_user("casey").unwrap();

        let snapshot = make_snapshot(user_id, 1000.0);
        let id = db.save_forecast_snapshot(&snapshot).unwrap();
        assert!(id > 0);

        let loaded = db.get_forecast_snapshot(id).unwrap().unwrap();
        assert_eq!(loaded.horizon_days, 30);
        assert_eq!(loaded.days.len(), 2);
        assert!((loaded.days[1].balance - 970.0).abs() < 0.001);
        assert_eq!(loaded.alerts.len(), 1);
        assert_eq!(loaded.alerts[0].alert_type, AlertType::LowBalance);
        assert_eq!(loaded.confidence, Confidence::Medium);
        assert!(loaded.compared_at.is_none());

        let latest = db.latest_forecast_snapshot(user_id).unwrap().unwrap();
        assert_eq!(latest.id, id);
    }

    #[test]
    fn test_elapsed_snapshots_and_comparison_idempotence() {
        let db = Database::in_memory().unwrap();
        let user_id = db.upsert_user("casey").unwrap();

        let id = db.save_forecast_snapshot(&make_snapshot(user_id, 1000.0)).unwrap();

        // Fresh snapshot: horizon has not elapsed yet
        let due = db.elapsed_uncompared_snapshots(user_id, date(2024, 2, 1)).unwrap();
        assert!(due.is_empty());

        // Age the snapshot past its horizon
        let conn = db.conn().unwrap();
        conn.execute(
            "UPDATE forecast_snapshots SET generated_at = '2024-01-01 08:00:00' WHERE id = ?",
            params![id],
        )
        .unwrap();
        drop(conn);

        let due = db.elapsed_uncompared_snapshots(user_id, date(2024, 2, 1)).unwrap();
        assert_eq!(due.len(), 1);

        let comparisons = vec![
            ForecastComparison {
                snapshot_id: id,
                date: date(2024, 1, 2),
                predicted_balance: 970.0,
                actual_balance: 960.0,
                error_amount: 10.0,
                error_percent: Some(10.0 / 960.0),
            },
            ForecastComparison {
                snapshot_id: id,
                date: date(2024, 1, 3),
                predicted_balance: 940.0,
                actual_balance: 955.0,
                error_amount: -15.0,
                error_percent: Some(15.0 / 955.0),
            },
        ];
        db.save_forecast_comparisons(id, &comparisons).unwrap();

        // Marked compared: no longer due
        assert!(db.elapsed_uncompared_snapshots(user_id, date(2024, 2, 1)).unwrap().is_empty());
        assert!(db.get_forecast_snapshot(id).unwrap().unwrap().compared_at.is_some());

        // Re-saving the same days rewrites rather than duplicates
        db.save_forecast_comparisons(id, &comparisons).unwrap();
        let stored = db.comparisons_since(user_id, date(2024, 1, 1)).unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].date, date(2024, 1, 2));
        assert!((stored[0].error_amount - 10.0).abs() < 0.001);

        // Cutoff trims older days
        let recent = db.comparisons_since(user_id, date(2024, 1, 3)).unwrap();
        assert_eq!(recent.len(), 1);

        assert!(matches!(
            db.save_forecast_comparisons(777_777, &comparisons),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_learning_records_append_only() {
        let db = Database::in_memory().unwrap();
        let user_id = db.upsert_user("casey").unwrap();

        // Before any analysis the multiplier is neutral
        assert!((db.latest_multiplier(user_id).unwrap() - 1.0).abs() < 0.001);
        assert!(db.latest_learning_record(user_id).unwrap().is_none());

        let record = LearningRecord {
            id: 0,
            user_id,
            analyzed_at: chrono::Utc::now(),
            mean_error_percent: 4.2,
            direction_accuracy: 0.75,
            accuracy_adjustment_multiplier: 1.08,
            snapshots_compared: 2,
            days_compared: 60,
        };
        db.append_learning_record(&record).unwrap();

        let mut second = record.clone();
        second.accuracy_adjustment_multiplier = 0.97;
        db.append_learning_record(&second).unwrap();

        assert!((db.latest_multiplier(user_id).unwrap() - 0.97).abs() < 0.001);
        let history = db.list_learning_records(user_id, 10).unwrap();
        assert_eq!(history.len(), 2, "records append, never overwrite");
        assert!((history[0].accuracy_adjustment_multiplier - 0.97).abs() < 0.001);
    }

    #[test]
    fn test_soft_reset_preserves_reference_data() {
        let db = Database::in_memory().unwrap();
        let user_id = db.upsert_user("casey").unwrap();
        let account_id = db
            .upsert_account(user_id, "Checking", AccountType::Checking, 100.0)
            .unwrap();
        db.add_category_rule(user_id, "netflix", MatchType::Contains, "Entertainment", 100)
            .unwrap();
        db.add_manual_transaction(user_id, account_id, date(2024, 3, 1), "X", 5.0, None, false)
            .unwrap();
        db.upsert_detected_pattern(user_id, &make_detected("netflix com", "NETFLIX.COM", 15.99, false))
            .unwrap();
        db.save_forecast_snapshot(&make_snapshot(user_id, 100.0)).unwrap();

        db.soft_reset().unwrap();

        assert_eq!(db.list_user_ids().unwrap(), vec![user_id]);
        assert_eq!(db.list_accounts(user_id).unwrap().len(), 1);
        assert_eq!(db.list_category_rules(user_id).unwrap().len(), 1);
        assert_eq!(db.transaction_count(user_id).unwrap(), 0);
        assert!(db.get_active_patterns(user_id).unwrap().is_empty());
        assert!(db.latest_forecast_snapshot(user_id).unwrap().is_none());
    }

    #[test]
    fn test_encrypted_database() {
        use std::fs;

        let test_path = "/tmp/flowcast_test_encrypted.db";

        // a previous run may have left the file behind
        let _ = fs::remove_file(test_path);

        // write through an encrypted handle, then drop it
        {
            let db = Database::new_with_key(test_path, Some("orange-battery-staple")).unwrap();
            let user_id = db.upsert_user("casey").unwrap();
            db.upsert_account(user_id, "Checking", AccountType::Checking, 100.0)
                .unwrap();
            assert_eq!(db.list_accounts(user_id).unwrap().len(), 1);
        }

        // the same passphrase reopens it
        {
            let db = Database::new_with_key(test_path, Some("orange-battery-staple")).unwrap();
            let user_id = db.upsert_user("casey").unwrap();
            assert_eq!(db.list_accounts(user_id).unwrap().len(), 1);
        }

        // no key must not read an encrypted file, and neither must the wrong one
        assert!(Database::new_with_key(test_path, None).is_err());
        assert!(Database::new_with_key(test_path, Some("orange-battery")).is_err());

        let _ = fs::remove_file(test_path);
    }

    #[test]
    fn test_key_derivation_is_deterministic() {
        let key1 = derive_key("correct-horse").unwrap();
        let key2 = derive_key("correct-horse").unwrap();
        assert_eq!(key1, key2);

        // a different passphrase must land on a different key
        let key3 = derive_key("incorrect-horse").unwrap();
        assert_ne!(key1, key3);
    }

    #[test]
    fn test_encryption_required_by_default() {
        use std::env;
        use std::fs;

        let test_path = "/tmp/flowcast_test_encryption_required.db";
        let _ = fs::remove_file(test_path);

        // a key in the environment would mask the failure this test wants
        env::remove_var(DB_KEY_ENV);

        let result = Database::new(test_path);
        assert!(result.is_err(), "opening without {} must fail", DB_KEY_ENV);

        let err_msg = match result {
            Err(e) => e.to_string(),
            Ok(_) => panic!("expected an error"),
        };
        assert!(
            err_msg.contains(DB_KEY_ENV),
            "error should tell the user which variable to set: {}",
            err_msg
        );

        // the explicit opt-out still works
        assert!(Database::new_unencrypted(test_path).is_ok());

        let _ = fs::remove_file(test_path);
    }

    #[test]
    fn test_sql_injection_in_description() {
        let db = Database::in_memory().unwrap();
        let user_id = db.upsert_user("casey").unwrap();
        let account_id = db
            .upsert_account(user_id, "Checking", AccountType::Checking, 0.0)
            .unwrap();

        let hostile = "'; DROP TABLE transactions; --";
        let id = db
            .add_manual_transaction(user_id, account_id, date(2024, 3, 1), hostile, 10.0, None, false)
            .unwrap();

        // Stored literally; table still answers queries
        let tx = db.get_transaction(id).unwrap().unwrap();
        assert_eq!(tx.description, hostile);
        assert_eq!(db.transaction_count(user_id).unwrap(), 1);
    }

    #[test]
    fn test_unicode_descriptions_roundtrip() {
        let db = Database::in_memory().unwrap();
        let user_id = db.upsert_user("casey").unwrap();
        let account_id = db
            .upsert_account(user_id, "Checking", AccountType::Checking, 0.0)
            .unwrap();

        for desc in ["CAFÉ RENÉ ☕", "壽司店", "Ähtäri Zoo"] {
            let id = db
                .add_manual_transaction(user_id, account_id, date(2024, 3, 1), desc, 10.0, None, false)
                .unwrap();
            assert_eq!(db.get_transaction(id).unwrap().unwrap().description, desc);
        }
    }

    #[test]
    fn test_extreme_amounts_roundtrip() {
        let db = Database::in_memory().unwrap();
        let user_id = db.upsert_user("casey").unwrap();
        let account_id = db
            .upsert_account(user_id, "Checking", AccountType::Checking, 0.0)
            .unwrap();

        for amount in [0.01, -0.01, 1_000_000_000.55, -1_000_000_000.55] {
            let id = db
                .add_manual_transaction(
                    user_id,
                    account_id,
                    date(2024, 3, 1),
                    &format!("EXTREME {}", amount),
                    amount,
                    None,
                    amount < 0.0,
                )
                .unwrap();
            let tx = db.get_transaction(id).unwrap().unwrap();
            assert!((tx.amount - amount).abs() < 1e-6);
        }
    }
}
