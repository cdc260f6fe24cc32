//! Initialize command.

use console::style;

use crate::config::Settings;

/// Initialize the data directory and database.
pub async fn cmd_init(settings: &Settings) -> anyhow::Result<()> {
    settings.ensure_directories()?;

    let ctx = settings.create_db_context()?;
    ctx.init_schema().await?;

    println!(
        "{} Initialized govharvest in {}",
        style("✓").green(),
        settings.data_dir.display()
    );
    println!("  Database: {}", settings.database_url());

    if settings.server.trigger_token.is_none() {
        println!(
            "{} No trigger token configured; HTTP run triggers will reject all requests",
            style("!").yellow()
        );
        println!("  Set GOVHARVEST_TRIGGER_TOKEN or [server] trigger_token in govharvest.toml");
    }

    Ok(())
}
