//! Raffle Demo
//!
//! Walks the allocation flow against a real database:
//! - Checkout hold on a few numbers
//! - A second buyer bumping into the hold
//! - Purchase with proof of payment
//! - Resubmission returning the same allocation
//! - Catalog, summary and transparency listing
//!
//! # Usage
//!
//! ```bash
//! # Start PostgreSQL and point DATABASE_URL at it (or put it in .env)
//! docker run -d -p 5432:5432 -e POSTGRES_PASSWORD=postgres -e POSTGRES_DB=raffle postgres:16
//!
//! # Run demo
//! cargo run --bin demo
//! ```

use metrics_exporter_prometheus::PrometheusBuilder;
use raffle::{Config, RaffleService, metrics::register_allocation_metrics};
use raffle_core::{BuyerId, ParticipantInfo, TicketNumber, TicketStatus};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,raffle=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let prometheus = PrometheusBuilder::new().install_recorder()?;
    register_allocation_metrics();

    println!("\n============================================");
    println!("   Raffle Allocation - Live Demo");
    println!("============================================\n");

    let config = Config::from_env();
    let service = RaffleService::from_config(config).await?;
    let raffle = &service.orchestrator;

    let ana = BuyerId::new("ana@example.com");
    let beto = BuyerId::new("beto@example.com");
    let picks: Vec<TicketNumber> = [7, 8, 9].into_iter().map(TicketNumber::new).collect();

    // Step 1: checkout hold
    println!("1. Ana starts checkout for tickets 7, 8, 9...");
    let hold = raffle.claim(&ana, &picks).await?;
    println!("   held until {}\n", hold.expires_at);

    // Step 2: contested numbers
    println!("2. Beto tries tickets 9 and 10...");
    let contested = [TicketNumber::new(9), TicketNumber::new(10)];
    match raffle.claim(&beto, &contested).await {
        Ok(_) => println!("   unexpectedly held\n"),
        Err(e) => println!("   refused ({}): {e}\n", e.kind()),
    }

    // Step 3: purchase
    println!("3. Ana uploads her receipt and buys...");
    let participant = ParticipantInfo::general("Ana Lopez");
    let receipt = raffle
        .submit_allocation(&ana, &picks, participant.clone(), Some("receipts/ana.pdf"))
        .await?;
    println!("   {}\n", serde_json::to_string_pretty(&receipt)?);

    // Step 4: client retry
    println!("4. Ana's client retries the same submission...");
    let retry = raffle
        .submit_allocation(&ana, &picks, participant, Some("receipts/ana.pdf"))
        .await?;
    println!(
        "   same allocation: {}, replayed: {}\n",
        retry.allocation_id == receipt.allocation_id,
        retry.replayed
    );

    // Step 5: public views
    let catalog = raffle.catalog().await?;
    let sold: Vec<_> = catalog
        .iter()
        .filter(|entry| entry.status == TicketStatus::Sold)
        .map(|entry| entry.ticket_number.value())
        .collect();
    println!("5. Sold tickets in the catalog: {sold:?}");
    println!("   summary: {:?}", raffle.inventory().summary().await?);
    for entry in raffle.inventory().transparency().await? {
        println!("   #{} -> {}", entry.ticket_number, entry.participant_name);
    }

    println!("\n--- metrics ---\n{}", prometheus.render());

    service.shutdown().await;
    Ok(())
}
