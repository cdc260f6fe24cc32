//! govharvest - resumable ingestion for government award and topic portals.
//!
//! Sweeps public procurement and research-topic portals into a local store
//! of normalized, quality-scored records, tracking progress at page
//! granularity so any run can be stopped and resumed.

mod cli;
mod config;
mod models;
mod normalize;
mod portal;
mod quality;
mod repository;
mod schema;
mod server;
mod services;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (before anything else)
    let _ = dotenvy::dotenv();

    // Initialize logging based on verbosity
    let default_filter = if cli::is_verbose() {
        "govharvest=info"
    } else {
        "govharvest=warn"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Run CLI
    cli::run().await
}
