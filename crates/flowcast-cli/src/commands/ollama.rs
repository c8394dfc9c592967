//! AI backend command implementations (test, classify)

use anyhow::Result;
use flowcast_core::{AiBackend, AiClient, Database};
use tracing::warn;

use super::truncate;

/// Test the configured AI backend and run sample classifications
pub async fn cmd_ollama_test(merchant: Option<&str>) -> Result<()> {
    println!("🔍 Testing AI backend...\n");

    match std::env::var("FLOWCAST_AI_HOST") {
        Ok(h) => println!("  FLOWCAST_AI_HOST: {}", h),
        Err(_) => println!("  ⚠️  FLOWCAST_AI_HOST not set (AI features disabled)"),
    }
    let model =
        std::env::var("FLOWCAST_AI_MODEL").unwrap_or_else(|_| "llama3.2".to_string());
    println!("  FLOWCAST_AI_MODEL: {}\n", model);

    let Some(client) = AiClient::from_env() else {
        println!("To get a local backend going:");
        println!("  1. Install Ollama (https://ollama.ai)");
        println!("  2. Run the server: ollama serve");
        println!("  3. Fetch the model: ollama pull {}", model);
        println!("  4. Point flowcast at it: export FLOWCAST_AI_HOST=http://localhost:11434");
        return Ok(());
    };

    print!("Checking availability... ");
    if client.health_check().await {
        println!("✅ Connected ({} @ {})", client.model(), client.host());
    } else {
        println!("❌ No response");
        println!("\n⚠️  Could not reach the backend at {}", client.host());
        println!("   Is the server running? Try: ollama serve");
        return Ok(());
    }

    let test_merchants = merchant.map(|m| vec![m.to_string()]).unwrap_or_else(|| {
        vec![
            "NETFLIX.COM 866-579-7172".to_string(),
            "SHELL SERVICE 8842 PORTLAND OR".to_string(),
            "WHOLEFDS MKT #10235".to_string(),
            "PAYROLL ACME CORP DIRECT DEP".to_string(),
        ]
    });

    println!("\n📋 Testing transaction classification...\n");

    for descriptor in &test_merchants {
        print!("  \"{}\" → ", descriptor);
        match client.classify_transaction(descriptor).await {
            Ok(result) => println!("{} ({})", result.display_name, result.category),
            Err(e) => println!("❌ Error: {}", e),
        }
    }

    Ok(())
}

/// Classify uncategorized transactions, filling in display name and category
pub async fn cmd_ollama_classify(db: &Database, user_id: i64, limit: i64) -> Result<()> {
    let Some(client) = AiClient::from_env() else {
        println!("⚠️  No AI backend configured. Set FLOWCAST_AI_HOST and retry.");
        return Ok(());
    };

    let pending = db.uncategorized_transactions(user_id, limit)?;
    if pending.is_empty() {
        println!("✅ Nothing to classify: every transaction has a category.");
        return Ok(());
    }

    println!(
        "🤖 Classifying {} transaction{} with {}...",
        pending.len(),
        if pending.len() == 1 { "" } else { "s" },
        client.model()
    );

    let mut classified = 0usize;
    for tx in &pending {
        match client.classify_transaction(&tx.description).await {
            Ok(result) => {
                db.set_transaction_display_name(tx.id, Some(&result.display_name))?;
                db.set_transaction_category(tx.id, Some(&result.category))?;
                println!(
                    "   {} → {} ({})",
                    truncate(&tx.description, 30),
                    result.display_name,
                    result.category
                );
                classified += 1;
            }
            Err(e) => {
                // One bad response should not sink the batch.
                warn!(tx_id = tx.id, "classification failed: {e}");
            }
        }
    }

    println!();
    println!(
        "✅ Classified {} of {} transactions",
        classified,
        pending.len()
    );

    Ok(())
}
