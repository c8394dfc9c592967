//! Flowcast CLI - Recurring-charge detection and cash-flow forecasting
//!
//! Usage:
//!   flow init                   Initialize database
//!   flow import --file CSV      Import transactions
//!   flow detect                 Detect recurring charges
//!   flow forecast --days 30     Project the cash balance
//!   flow watch                  Run the whole pipeline on a timer

mod cli;
mod commands;


use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::*;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose, which wins over the info default
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).compact())
        .init();

    match cli.command {
        Commands::Init => commands::cmd_init(&cli.db, &cli.user, cli.no_encrypt),
        Commands::Import {
            file,
            account,
            no_rules,
            no_detect,
        } => commands::cmd_import(
            &cli.db,
            &cli.user,
            &file,
            &account,
            no_rules,
            no_detect,
            cli.no_encrypt,
        ),
        Commands::Detect => commands::cmd_detect(&cli.db, &cli.user, cli.no_encrypt),
        Commands::Scan => commands::cmd_scan(&cli.db, &cli.user, cli.no_encrypt),
        Commands::Forecast { days, store } => {
            commands::cmd_forecast(&cli.db, &cli.user, days, store, cli.no_encrypt)
        }
        Commands::Learn => commands::cmd_learn(&cli.db, &cli.user, cli.no_encrypt).await,
        Commands::Watch { every } => commands::cmd_watch(&cli.db, every, cli.no_encrypt).await,
        Commands::Status => commands::cmd_status(&cli.db, &cli.user, cli.no_encrypt),
        Commands::Dashboard => commands::cmd_dashboard(&cli.db, &cli.user, cli.no_encrypt),
        Commands::Accounts { action } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            let user_id = commands::resolve_user(&db, &cli.user)?;
            match action {
                None | Some(AccountsAction::List) => commands::cmd_accounts_list(&db, user_id),
                Some(AccountsAction::Add {
                    name,
                    account_type,
                    balance,
                }) => commands::cmd_accounts_add(&db, user_id, &name, &account_type, balance),
                Some(AccountsAction::SetBalance { name, balance }) => {
                    commands::cmd_accounts_set_balance(&db, user_id, &name, balance)
                }
            }
        }
        Commands::Transactions { action } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            let user_id = commands::resolve_user(&db, &cli.user)?;
            match action {
                None => commands::cmd_transactions_list(&db, user_id, 20),
                Some(TransactionsAction::List { limit }) => {
                    commands::cmd_transactions_list(&db, user_id, limit)
                }
                Some(TransactionsAction::Add {
                    description,
                    amount,
                    account,
                    date,
                    category,
                    income,
                }) => commands::cmd_transactions_add(
                    &db,
                    user_id,
                    &description,
                    amount,
                    &account,
                    date.as_deref(),
                    category.as_deref(),
                    income,
                ),
                Some(TransactionsAction::Categorize { id, category }) => {
                    commands::cmd_transactions_categorize(&db, id, &category)
                }
                Some(TransactionsAction::Flag { id, clear }) => {
                    commands::cmd_transactions_flag(&db, id, clear)
                }
                Some(TransactionsAction::Ignore { id, clear }) => {
                    commands::cmd_transactions_ignore(&db, id, clear)
                }
            }
        }
        Commands::Patterns { action } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            let user_id = commands::resolve_user(&db, &cli.user)?;
            match action {
                None | Some(PatternsAction::List) => commands::cmd_patterns_list(&db, user_id),
                Some(PatternsAction::Add {
                    name,
                    amount,
                    frequency,
                    next,
                    category,
                    income,
                }) => commands::cmd_patterns_add(
                    &db,
                    user_id,
                    &name,
                    amount,
                    &frequency,
                    next.as_deref(),
                    category.as_deref(),
                    income,
                ),
                Some(PatternsAction::Edit {
                    id,
                    name,
                    amount,
                    frequency,
                    next,
                    category,
                }) => commands::cmd_patterns_edit(
                    &db,
                    id,
                    name.as_deref(),
                    amount,
                    frequency.as_deref(),
                    next.as_deref(),
                    category.as_deref(),
                ),
                Some(PatternsAction::Release { id }) => commands::cmd_patterns_release(&db, id),
                Some(PatternsAction::Delete { id, yes }) => {
                    commands::cmd_patterns_delete(&db, id, yes)
                }
            }
        }
        Commands::Review { action } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            let user_id = commands::resolve_user(&db, &cli.user)?;
            match action {
                None | Some(ReviewAction::List) => commands::cmd_review_list(&db, user_id),
                Some(ReviewAction::Confirm { ids }) => commands::cmd_review_confirm(&db, &ids),
                Some(ReviewAction::Deny { ids, reason }) => {
                    commands::cmd_review_deny(&db, &ids, &reason)
                }
            }
        }
        Commands::Anomalies { action } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            let user_id = commands::resolve_user(&db, &cli.user)?;
            match action {
                None => commands::cmd_anomalies_list(&db, user_id, None),
                Some(AnomaliesAction::List { status }) => {
                    commands::cmd_anomalies_list(&db, user_id, status.as_deref())
                }
                Some(AnomaliesAction::Dismiss { id, feedback }) => {
                    commands::cmd_anomalies_dismiss(&db, id, feedback.as_deref())
                }
                Some(AnomaliesAction::Confirm { id }) => commands::cmd_anomalies_confirm(&db, id),
            }
        }
        Commands::Rules { action } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            let user_id = commands::resolve_user(&db, &cli.user)?;
            match action {
                None | Some(RulesAction::List) => commands::cmd_rules_list(&db, user_id),
                Some(RulesAction::Add {
                    category,
                    pattern,
                    pattern_type,
                    priority,
                }) => commands::cmd_rules_add(
                    &db,
                    user_id,
                    &category,
                    &pattern,
                    &pattern_type,
                    priority,
                ),
                Some(RulesAction::Delete { id }) => commands::cmd_rules_delete(&db, id),
                Some(RulesAction::Test { description }) => {
                    commands::cmd_rules_test(&db, user_id, &description)
                }
                Some(RulesAction::Apply { limit }) => {
                    commands::cmd_rules_apply(&db, user_id, limit)
                }
            }
        }
        Commands::Ollama { action } => match action {
            OllamaAction::Test { merchant } => {
                commands::cmd_ollama_test(merchant.as_deref()).await
            }
            OllamaAction::Classify { limit } => {
                let db = commands::open_db(&cli.db, cli.no_encrypt)?;
                let user_id = commands::resolve_user(&db, &cli.user)?;
                commands::cmd_ollama_classify(&db, user_id, limit).await
            }
        },
        Commands::Reset { soft, yes } => {
            commands::cmd_reset(&cli.db, &cli.user, soft, yes, cli.no_encrypt)
        }
    }
}
