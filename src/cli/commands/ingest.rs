//! Ingest command.

use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::NaiveDate;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use super::helpers::print_run_totals;
use crate::config::Settings;
use crate::models::{JobKind, JobStatus, RecordSource, TriggerSource};
use crate::portal::create_portal;
use crate::services::{IngestOptions, IngestService};

/// Run an ingestion sweep for one portal.
#[allow(clippy::too_many_arguments)]
pub async fn cmd_ingest(
    settings: &Settings,
    source: RecordSource,
    kind: JobKind,
    days: Option<i64>,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
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
    ctx.init_schema().await?;

    let portal = create_portal(source, settings);
    let service = IngestService::new(ctx, portal, settings.clone());

    // Ctrl+C pauses at the next unit boundary instead of killing mid-write
    let stop = service.stop_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nstop requested, finishing the current unit...");
            stop.store(true, Ordering::SeqCst);
        }
    });

    let mut options = match kind {
        JobKind::Full => IngestOptions::full(TriggerSource::Cli),
        JobKind::Recent => IngestOptions::recent(TriggerSource::Cli),
    };
    options.days = days;
    options.from = from;
    options.to = to;
    options.limit = (limit > 0).then_some(limit);

    println!(
        "{} Starting {} {} sweep",
        style("→").cyan(),
        source.as_str(),
        kind.as_str()
    );

    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap(),
    );
    pb.enable_steady_tick(Duration::from_millis(100));
    pb.set_message(format!("Sweeping {} pages...", source.as_str()));

    let run = service.run(options).await?;
    pb.finish_and_clear();

    println!();
    match run.status {
        JobStatus::Completed => {
            println!("{} Run {} completed", style("✓").green(), run.id);
        }
        JobStatus::Paused => {
            println!(
                "{} Run {} paused; rerun to resume from the last completed unit",
                style("!").yellow(),
                run.id
            );
        }
        _ => {
            println!(
                "{} Run {} {}: {}",
                style("✗").red(),
                run.id,
                run.status.as_str(),
                run.error.as_deref().unwrap_or("unknown error")
            );
        }
    }
    print_run_totals(&run);

    Ok(())
}
