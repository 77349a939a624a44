mod checkpoint;
mod geo;
mod models;
mod providers;

use std::env;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{info, Level};

use checkpoint::Checkpoint;
use models::Coordinate;
use providers::{
    FilterCriteria, ImmobilienScoutConfig, ImmobilienScoutProvider, ListingProvider,
};

const CHECKPOINT_PATH: &str = "checkpoint.json";
const RESULTS_PATH: &str = "listings.json";

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .init();

    info!("🏠 Apartment Scout - ImmobilienScout24");
    info!("======================================");

    let config = ImmobilienScoutConfig {
        client_key: env::var("IMMOBILIENSCOUT_CLIENT_KEY")
            .context("IMMOBILIENSCOUT_CLIENT_KEY is not set")?,
        client_secret: env::var("IMMOBILIENSCOUT_CLIENT_SECRET")
            .context("IMMOBILIENSCOUT_CLIENT_SECRET is not set")?,
        google_api_key: env::var("GOOGLE_API_KEY").context("GOOGLE_API_KEY is not set")?,
        city: env::var("IMMOBILIENSCOUT_CITY").unwrap_or_else(|_| "Berlin".to_string()),
    };

    let previous_run = checkpoint::load(Path::new(CHECKPOINT_PATH)).await?;
    if let Some(ref previous) = previous_run {
        info!("Skipping listings already seen before {}", previous.last_fetched);
    }

    let mut criteria = FilterCriteria {
        // Work
        near: Coordinate {
            lat: 52.5309272,
            lng: 13.382965,
        },
        max_distance: Some(8_000.0),
        max_commute_duration: Some(30.0),
        max_rent: Some(900.0),
        ..Default::default()
    };
    if let Some(ref previous) = previous_run {
        criteria.published_after = previous.last_fetched;
    }

    let provider = ImmobilienScoutProvider::new(config, criteria)?;

    info!("Searching {} listings...", provider.source_name());
    let listings = provider.get_results().await?;
    info!("✅ {} listings match the criteria", listings.len());

    for (i, listing) in listings.iter().enumerate() {
        println!("{}. {}", i + 1, listing);
    }

    let json = serde_json::to_string_pretty(&listings)?;
    tokio::fs::write(RESULTS_PATH, json).await?;
    info!("💾 Saved matching listings to {}", RESULTS_PATH);

    // Results arrive newest-first, so the first listing marks the new
    // high-water line for the next run.
    let new_checkpoint = match listings.first() {
        Some(newest) => Checkpoint {
            last_fetched: newest.date_published.unwrap_or_else(Utc::now),
            last_seen_id: Some(newest.id.clone()),
        },
        None => previous_run.unwrap_or(Checkpoint {
            last_fetched: Utc::now(),
            last_seen_id: None,
        }),
    };
    checkpoint::store(Path::new(CHECKPOINT_PATH), &new_checkpoint).await?;

    Ok(())
}
