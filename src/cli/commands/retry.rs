//! Retry command.

use std::time::Duration;

use chrono::NaiveDate;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use super::helpers::format_number;
use crate::config::Settings;
use crate::models::RecordSource;
use crate::portal::create_portal;
use crate::services::{RetryOptions, RetryService};

/// Replay failed items for one portal.
pub async fn cmd_retry(
    settings: &Settings,
    source: RecordSource,
    date: Option<NaiveDate>,
    limit: u32,
) -> anyhow::Result<()> {
    if !settings.database_exists() {
        println!(
            "{} System not initialized. Run 'govharvest init' first.",
            style("!").yellow()
        );
        return Ok(());
    }

    let ctx = settings.create_db_context()?;
    let portal = create_portal(source, settings);
    let service = RetryService::new(ctx, portal, settings.clone());

    println!(
        "{} Retrying failed {} items",
        style("→").cyan(),
        source.as_str()
    );

    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap(),
    );
    pb.enable_steady_tick(Duration::from_millis(100));
    pb.set_message("Replaying parked items...");

    let options = RetryOptions {
        date,
        limit: (limit > 0).then_some(limit),
    };
    let summary = service.run(options).await?;
    pb.finish_and_clear();

    println!("{} Retry pass finished", style("✓").green());
    println!(
        "  {:<12} {:>10}",
        "Attempted:",
        format_number(summary.attempted)
    );
    println!(
        "  {:<12} {:>10}",
        "Recovered:",
        format_number(summary.recovered)
    );
    println!("  {:<12} {:>10}", "Failed:", format_number(summary.failed));
    println!("  {:<12} {:>10}", "Parked:", format_number(summary.parked));
    if summary.skipped > 0 {
        println!(
            "  {:<12} {:>10}",
            "Skipped:",
            format_number(summary.skipped)
        );
    }

    Ok(())
}
