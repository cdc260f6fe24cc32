//! Status command.

use chrono::Local;
use console::style;

use super::helpers::format_number;
use crate::config::Settings;
use crate::models::RecordSource;

/// Show store counts, unit progress, failed items, and the latest run.
pub async fn cmd_status(settings: &Settings, source: Option<RecordSource>) -> anyhow::Result<()> {
    if !settings.database_exists() {
        println!(
            "{} System not initialized. Run 'govharvest init' first.",
            style("!").yellow()
        );
        return Ok(());
    }

    let ctx = settings.create_db_context()?;
    let records = ctx.records();
    let work_units = ctx.work_units();
    let failed_items = ctx.failed_items();
    let job_runs = ctx.job_runs();

    let sources: Vec<RecordSource> = match source {
        Some(s) => vec![s],
        None => vec![RecordSource::Contracts, RecordSource::Topics],
    };

    let now = Local::now();
    let separator = "─".repeat(70);

    println!();
    println!(
        "{:<50} Last updated: {}",
        style("govharvest status").bold(),
        now.format("%Y-%m-%d %H:%M:%S")
    );
    println!("{}", separator);
    println!("Database: {}", settings.database_url());
    println!("Data Dir: {}", settings.data_dir.display());

    for source in sources {
        println!();
        println!("{}", style(source.as_str().to_uppercase()).cyan().bold());

        let count = records.count(Some(source)).await?;
        println!("  {:<20} {:>10}", "Records:", format_number(count));
        match records.average_quality(Some(source)).await? {
            Some(avg) => println!("  {:<20} {:>10.1}", "Avg quality:", avg),
            None => println!("  {:<20} {:>10}", "Avg quality:", "-"),
        }

        let units = work_units.stats(Some(source)).await?;
        println!(
            "  {:<20} {:>10}",
            "Units completed:",
            format_number(units.completed)
        );
        let incomplete = units.pending + units.running + units.failed;
        if incomplete > 0 {
            println!(
                "  {:<20} {:>10}   ({} pending, {} running, {} failed)",
                "Units incomplete:",
                format_number(incomplete),
                units.pending,
                units.running,
                units.failed
            );
        }

        let failed = failed_items.list(Some(source)).await?;
        println!(
            "  {:<20} {:>10}",
            "Failed items:",
            format_number(failed.len() as u64)
        );
        for item in failed.iter().take(5) {
            println!(
                "    {} {} ({}, attempt {})",
                style("·").dim(),
                item.external_id,
                item.kind.as_str(),
                item.attempt_count
            );
        }
        if failed.len() > 5 {
            println!("    {} and {} more", style("·").dim(), failed.len() - 5);
        }

        match job_runs.find_latest(Some(source)).await? {
            Some(run) => {
                println!(
                    "  {:<20} {} {} ({}) started {}",
                    "Latest run:",
                    run.status.as_str(),
                    run.kind.as_str(),
                    run.trigger.as_str(),
                    run.started_at.format("%Y-%m-%d %H:%M")
                );
                println!(
                    "    found {}, inserted {}, updated {}, failed {}",
                    format_number(run.totals.found),
                    format_number(run.totals.inserted),
                    format_number(run.totals.updated),
                    format_number(run.totals.failed)
                );
            }
            None => println!("  {:<20} {:>10}", "Latest run:", "none"),
        }
    }

    println!();
    println!("{}", separator);
    Ok(())
}
