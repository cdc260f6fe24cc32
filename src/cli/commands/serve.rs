//! Trigger server command.

use console::style;

use crate::config::Settings;

/// Start the trigger/status HTTP server.
pub async fn cmd_serve(settings: &Settings, bind: Option<&str>) -> anyhow::Result<()> {
    let bind = bind
        .map(normalize_bind_address)
        .unwrap_or_else(|| settings.server.bind.clone());

    if settings.server.trigger_token.is_none() {
        println!(
            "{} No trigger token configured; run triggers will reject all requests",
            style("!").yellow()
        );
    }

    println!(
        "{} Starting trigger server at http://{}",
        style("→").cyan(),
        bind
    );
    println!("  Press Ctrl+C to stop");

    crate::server::serve(settings.clone(), &bind).await
}

/// Accept PORT, HOST, or HOST:PORT.
fn normalize_bind_address(bind: &str) -> String {
    if let Ok(port) = bind.parse::<u16>() {
        return format!("127.0.0.1:{}", port);
    }
    if bind.contains(':') {
        return bind.to_string();
    }
    format!("{}:3030", bind)
}
