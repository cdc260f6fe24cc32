//! Shared display helpers for CLI commands.

use crate::models::JobRun;

/// Format a number with thousand separators.
pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let bytes: Vec<_> = s.bytes().rev().collect();
    let chunks: Vec<_> = bytes
        .chunks(3)
        .map(|chunk| chunk.iter().rev().map(|&b| b as char).collect::<String>())
        .collect();
    chunks.into_iter().rev().collect::<Vec<_>>().join(",")
}

/// Print the counter block for one run.
pub fn print_run_totals(run: &JobRun) {
    println!("  {:<12} {:>10}", "Found:", format_number(run.totals.found));
    println!(
        "  {:<12} {:>10}",
        "Inserted:",
        format_number(run.totals.inserted)
    );
    println!(
        "  {:<12} {:>10}",
        "Updated:",
        format_number(run.totals.updated)
    );
    println!(
        "  {:<12} {:>10}",
        "Unchanged:",
        format_number(run.totals.unchanged)
    );
    println!(
        "  {:<12} {:>10}",
        "Failed:",
        format_number(run.totals.failed)
    );
    println!(
        "  {:<12} {:>10}",
        "Units:",
        format!("{}/{}", run.units_completed, run.units_total)
    );
    println!(
        "  {:<12} {:>10}",
        "Duration:",
        format_duration(run.duration())
    );
}

/// Render a duration as h/m/s.
pub fn format_duration(d: chrono::Duration) -> String {
    let secs = d.num_seconds().max(0);
    if secs >= 3600 {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    } else if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}s", secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1234567), "1,234,567");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(chrono::Duration::seconds(42)), "42s");
        assert_eq!(format_duration(chrono::Duration::seconds(75)), "1m 15s");
        assert_eq!(format_duration(chrono::Duration::seconds(3725)), "1h 2m 5s");
        assert_eq!(format_duration(chrono::Duration::seconds(-5)), "0s");
    }
}
