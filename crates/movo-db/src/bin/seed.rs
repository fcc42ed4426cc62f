//! # Seed Data Generator
//!
//! Populates a database with demo billing accounts spread across the
//! subscription lifecycle, for exercising the worker locally.
//!
//! ## Usage
//! ```bash
//! # Seed ./movo_dev.db with 20 accounts (default)
//! cargo run -p movo-db --bin seed
//!
//! # Custom amount and path
//! cargo run -p movo-db --bin seed -- --count 200 --db ./data/billing.db
//! ```
//!
//! ## Generated Accounts
//! Account `i` is created `i` days ago and cycles through these shapes:
//! - never paid (BLOCKED once its trial ends)
//! - paid once the day after signup (older ones lapse into GRACE/BLOCKED)
//! - USD account with a pending switch to DOP

use chrono::{Duration, Utc};
use movo_core::{clock, BillingPayment, BillingPolicy, Contact, Currency, PaymentStatus};
use movo_db::{BillingStore, ConfirmationWrite, Database, DbConfig};
use std::env;
use uuid::Uuid;

const BUSINESS_NAMES: &[&str] = &[
    "Colmado Rosa",
    "Farmacia Central",
    "Ferreteria El Puente",
    "Panaderia La Espiga",
    "Super Mini Yuli",
    "Boutique Mar",
    "Cafeteria Norte",
    "Libreria Azul",
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    let mut count: usize = 20;
    let mut db_path = String::from("./movo_dev.db");

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--count" | "-c" => {
                if i + 1 < args.len() {
                    count = args[i + 1].parse().unwrap_or(20);
                    i += 1;
                }
            }
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("MOVO Billing Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -c, --count <N>    Number of accounts to generate (default: 20)");
                println!("  -d, --db <PATH>    Database file path (default: ./movo_dev.db)");
                println!("  -h, --help         Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    println!("🌱 MOVO Billing Seed Data Generator");
    println!("===================================");
    println!("Database: {}", db_path);
    println!("Accounts: {}", count);
    println!();

    let db = Database::new(DbConfig::new(&db_path)).await?;
    println!("✓ Connected to database");
    println!("✓ Migrations applied");

    let existing = db.list_account_ids().await?;
    if !existing.is_empty() {
        println!("⚠ Database already has {} accounts", existing.len());
        println!("  Skipping seed to avoid duplicates.");
        return Ok(());
    }

    let policy = BillingPolicy::default();
    let now = Utc::now();
    let mut generated = 0;

    for seed in 0..count {
        let account_id = format!("demo-{:04}", seed);
        let name = BUSINESS_NAMES[seed % BUSINESS_NAMES.len()];
        let contact = Contact::new(format!("{}@example.com", account_id), name);
        let created = now - Duration::days(seed as i64);

        let profile = match seed % 5 {
            4 => clock::start_trial_in(&account_id, contact, Currency::Usd, created, &policy),
            _ => clock::start_trial(&account_id, contact, created, &policy),
        };

        if let Err(e) = db.insert_profile(&profile).await {
            eprintln!("Failed to insert {}: {}", account_id, e);
            continue;
        }

        let shape = seed % 5;
        let result = match shape {
            1 | 2 => pay_once(&db, &policy, &profile, created + Duration::days(1)).await,
            4 => {
                let staged = clock::stage_change(&profile, Currency::Dop, None, created)?;
                db.update_profile(&staged.profile, profile.version)
                    .await
                    .map(|_| ())
                    .map_err(Into::into)
            }
            _ => Ok(()),
        };

        if let Err(e) = result {
            eprintln!("Failed to shape {}: {}", account_id, e);
            continue;
        }

        let stored = db.get_profile(&account_id).await?;
        if let Some(stored) = stored {
            let state = movo_core::BillingState::evaluate(&stored, now, &policy)?;
            println!("  {}", serde_json::to_string(&state)?);
        }
        generated += 1;
    }

    println!();
    println!("✓ Generated {} accounts", generated);
    println!("✓ Seed complete!");

    Ok(())
}

/// Records and confirms one manual payment for the account.
async fn pay_once(
    db: &Database,
    policy: &BillingPolicy,
    profile: &movo_core::BillingProfile,
    confirmed_at: chrono::DateTime<Utc>,
) -> Result<(), Box<dyn std::error::Error>> {
    let currency = profile.renewal_currency();
    let payment = BillingPayment {
        id: Uuid::new_v4().to_string(),
        account_id: profile.account_id.clone(),
        amount_cents: policy.price(currency).cents(),
        currency,
        provider: profile.renewal_provider(),
        status: PaymentStatus::Pending,
        proof_url: Some("https://files.example.com/demo-proof.png".to_string()),
        idempotency_key: None,
        reference: None,
        confirmed_by: None,
        rejection_reason: None,
        created_at: confirmed_at,
        confirmed_at: None,
        rejected_at: None,
        period_start: None,
        period_end: None,
    };
    db.insert_payment(&payment).await?;

    let transition = clock::apply_payment(profile, currency, confirmed_at, policy)?;
    let period = transition
        .paid_period
        .ok_or("payment produced no paid period")?;

    let write = ConfirmationWrite {
        payment_id: payment.id.clone(),
        confirmed_at,
        confirmed_by: Some("seed".to_string()),
        period_start: period.start,
        period_end: period.end,
        profile: transition.profile,
        expected_version: profile.version,
    };
    let (confirmed, _) = db.commit_confirmation(&write).await?;
    db.create_receipt(&confirmed, confirmed_at).await?;

    Ok(())
}
