//! Pure normalization helpers shared by both portal mappers.
//!
//! Everything here is total: bad input becomes `None` or a default, never an
//! error. Time-dependent derivations take `today` as a parameter so they stay
//! deterministic under test.

#![allow(dead_code)]

use std::sync::LazyLock;

use chrono::{Datelike, NaiveDate};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Free-text fields are truncated to this many characters.
pub const TEXT_MAX: usize = 5000;

/// Dates before this year are sentinel noise from upstream.
const MIN_PLAUSIBLE_YEAR: i32 = 1990;

/// Dates further ahead than this are sentinel noise from upstream.
const MAX_FUTURE_YEARS: i32 = 20;

/// Amounts above this are treated as data-entry garbage.
const MAX_PLAUSIBLE_AMOUNT: f64 = 100_000_000_000.0;

/// Multi-value fields flatten with this delimiter.
pub const LIST_DELIMITER: &str = ", ";

/// Contact entries flatten with this delimiter.
pub const CONTACT_DELIMITER: &str = "; ";

/// Position of a record's open/close window relative to today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowStatus {
    Upcoming,
    Open,
    Closed,
}

impl WindowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Upcoming => "upcoming",
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "upcoming" => Some(Self::Upcoming),
            "open" => Some(Self::Open),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }
}

/// Urgency tier derived from days remaining until close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrgencyTier {
    Critical,
    High,
    Medium,
    Low,
}

impl UrgencyTier {
    /// Tier thresholds: ≤3 days critical, ≤7 high, ≤14 medium, else low.
    pub fn from_days_remaining(days: i64) -> Self {
        if days <= 3 {
            Self::Critical
        } else if days <= 7 {
            Self::High
        } else if days <= 14 {
            Self::Medium
        } else {
            Self::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "critical" => Some(Self::Critical),
            "high" => Some(Self::High),
            "medium" => Some(Self::Medium),
            "low" => Some(Self::Low),
            _ => None,
        }
    }
}

/// Size bucket for a monetary amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmountCategory {
    Micro,
    Small,
    Medium,
    Large,
    Major,
    Mega,
}

impl AmountCategory {
    pub fn from_amount(amount: f64) -> Self {
        if amount < 10_000.0 {
            Self::Micro
        } else if amount < 250_000.0 {
            Self::Small
        } else if amount < 1_000_000.0 {
            Self::Medium
        } else if amount < 10_000_000.0 {
            Self::Large
        } else if amount < 100_000_000.0 {
            Self::Major
        } else {
            Self::Mega
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Micro => "micro",
            Self::Small => "small",
            Self::Medium => "medium",
            Self::Large => "large",
            Self::Major => "major",
            Self::Mega => "mega",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "micro" => Some(Self::Micro),
            "small" => Some(Self::Small),
            "medium" => Some(Self::Medium),
            "large" => Some(Self::Large),
            "major" => Some(Self::Major),
            "mega" => Some(Self::Mega),
            _ => None,
        }
    }
}

/// Matches HTML/XML tags for plain-text extraction.
static TAG_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").unwrap());

/// Replace tags with spaces and decode the entities the portals emit.
///
/// `&amp;` decodes last so double-encoded input stays text.
fn strip_html(raw: &str) -> String {
    let stripped = TAG_PATTERN.replace_all(raw, " ");
    let decoded = stripped
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&");
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Strip markup, collapse whitespace, and truncate a free-text field.
///
/// Empty results become `None` so callers never store empty strings.
pub fn clean_text(raw: &str) -> Option<String> {
    let cleaned = strip_html(raw);
    if cleaned.is_empty() {
        return None;
    }
    if cleaned.chars().count() <= TEXT_MAX {
        return Some(cleaned);
    }
    Some(cleaned.chars().take(TEXT_MAX).collect())
}

/// Parse an upstream date in ISO date or RFC3339 timestamp form.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Some(date);
    }
    // RFC3339 timestamps: take the date part
    chrono::DateTime::parse_from_rfc3339(trimmed)
        .map(|dt| dt.date_naive())
        .ok()
        .or_else(|| {
            // "2024-03-15 10:30:00" style without offset
            chrono::NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S")
                .map(|dt| dt.date())
                .ok()
        })
}

/// Discard dates outside the plausible window (sentinel values like
/// 1900-01-01 and 9999-12-31 show up in upstream data).
pub fn validate_date(date: NaiveDate, today: NaiveDate) -> Option<NaiveDate> {
    if date.year() < MIN_PLAUSIBLE_YEAR || date.year() > today.year() + MAX_FUTURE_YEARS {
        return None;
    }
    Some(date)
}

/// Parse and validate in one step.
pub fn parse_valid_date(raw: &str, today: NaiveDate) -> Option<NaiveDate> {
    parse_date(raw).and_then(|d| validate_date(d, today))
}

/// Drop an end date that precedes its start date.
pub fn validate_date_range(
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> (Option<NaiveDate>, Option<NaiveDate>) {
    match (start, end) {
        (Some(s), Some(e)) if e < s => (Some(s), None),
        other => other,
    }
}

/// Signed day count from today to `date` (negative when past).
pub fn days_until(date: NaiveDate, today: NaiveDate) -> i64 {
    (date - today).num_days()
}

/// Where the open/close window sits relative to today.
pub fn window_status(
    open: Option<NaiveDate>,
    close: Option<NaiveDate>,
    today: NaiveDate,
) -> Option<WindowStatus> {
    if let Some(open) = open {
        if open > today {
            return Some(WindowStatus::Upcoming);
        }
    }
    if let Some(close) = close {
        if close < today {
            return Some(WindowStatus::Closed);
        }
        return Some(WindowStatus::Open);
    }
    // Open in the past with no close date: treat as open
    open.map(|_| WindowStatus::Open)
}

/// US-government fiscal year: October 1 starts the next FY.
pub fn fiscal_year(date: NaiveDate) -> i32 {
    if date.month() >= 10 {
        date.year() + 1
    } else {
        date.year()
    }
}

/// Validate a monetary amount, discarding negatives and absurd values.
pub fn parse_amount(raw: f64) -> Option<f64> {
    if !raw.is_finite() || raw < 0.0 || raw > MAX_PLAUSIBLE_AMOUNT {
        return None;
    }
    Some(raw)
}

/// Validate a NAICS industry code: 2-6 digits.
pub fn validate_naics(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if (2..=6).contains(&trimmed.len()) && trimmed.chars().all(|c| c.is_ascii_digit()) {
        return Some(trimmed.to_string());
    }
    None
}

/// Validate a Unique Entity Identifier: exactly 12 alphanumeric characters.
pub fn validate_uei(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.len() == 12 && trimmed.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Some(trimmed.to_uppercase());
    }
    None
}

/// Validate a legacy DUNS number: exactly 9 digits.
pub fn validate_duns(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.len() == 9 && trimmed.chars().all(|c| c.is_ascii_digit()) {
        return Some(trimmed.to_string());
    }
    None
}

/// Canonicalize the portals' assorted truthy/falsy encodings.
pub fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "y" | "yes" | "true" => Some(true),
        "0" | "n" | "no" | "false" => Some(false),
        _ => None,
    }
}

/// Flatten a list of values with the documented delimiter, skipping blanks.
pub fn join_values(values: &[String]) -> Option<String> {
    join_with(values, LIST_DELIMITER)
}

/// Flatten contact entries with the documented delimiter, skipping blanks.
pub fn join_contacts(values: &[String]) -> Option<String> {
    join_with(values, CONTACT_DELIMITER)
}

fn join_with(values: &[String], delimiter: &str) -> Option<String> {
    let joined: Vec<&str> = values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .collect();
    if joined.is_empty() {
        return None;
    }
    Some(joined.join(delimiter))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 15).unwrap()
    }

    #[test]
    fn test_clean_text() {
        assert_eq!(clean_text("<p>R&amp;D effort</p>"), Some("R&D effort".to_string()));
        assert_eq!(
            clean_text("<div>alpha</div><div>beta</div>"),
            Some("alpha beta".to_string())
        );
        assert_eq!(clean_text("a&nbsp;&lt;&nbsp;b"), Some("a < b".to_string()));
        assert_eq!(clean_text("   "), None);
        assert_eq!(clean_text(""), None);

        let long = "a".repeat(TEXT_MAX + 50);
        assert_eq!(clean_text(&long).unwrap().len(), TEXT_MAX);
    }

    #[test]
    fn test_parse_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        assert_eq!(parse_date("2024-03-15"), Some(expected));
        assert_eq!(parse_date("2024-03-15T10:30:00Z"), Some(expected));
        assert_eq!(parse_date("2024-03-15T10:30:00-05:00"), Some(expected));
        assert_eq!(parse_date("2024-03-15 10:30:00"), Some(expected));
        assert_eq!(parse_date(""), None);
        assert_eq!(parse_date("03/15/2024"), None);
    }

    #[test]
    fn test_validate_date_window() {
        let sentinel_past = NaiveDate::from_ymd_opt(1900, 1, 1).unwrap();
        let sentinel_future = NaiveDate::from_ymd_opt(9999, 12, 31).unwrap();
        let plausible = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();

        assert_eq!(validate_date(sentinel_past, today()), None);
        assert_eq!(validate_date(sentinel_future, today()), None);
        assert_eq!(validate_date(plausible, today()), Some(plausible));
    }

    #[test]
    fn test_validate_date_range() {
        let start = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 4, 1).unwrap();

        assert_eq!(validate_date_range(Some(start), Some(end)), (Some(start), None));
        assert_eq!(
            validate_date_range(Some(end), Some(start)),
            (Some(end), Some(start))
        );
        assert_eq!(validate_date_range(None, Some(end)), (None, Some(end)));
    }

    #[test]
    fn test_window_status() {
        let open = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let close = NaiveDate::from_ymd_opt(2024, 7, 1).unwrap();
        let future_open = NaiveDate::from_ymd_opt(2024, 7, 15).unwrap();
        let past_close = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();

        assert_eq!(
            window_status(Some(open), Some(close), today()),
            Some(WindowStatus::Open)
        );
        assert_eq!(
            window_status(Some(future_open), Some(close), today()),
            Some(WindowStatus::Upcoming)
        );
        assert_eq!(
            window_status(Some(open), Some(past_close), today()),
            Some(WindowStatus::Closed)
        );
        assert_eq!(window_status(None, None, today()), None);
    }

    #[test]
    fn test_urgency_tiers() {
        assert_eq!(UrgencyTier::from_days_remaining(0), UrgencyTier::Critical);
        assert_eq!(UrgencyTier::from_days_remaining(3), UrgencyTier::Critical);
        assert_eq!(UrgencyTier::from_days_remaining(4), UrgencyTier::High);
        assert_eq!(UrgencyTier::from_days_remaining(7), UrgencyTier::High);
        assert_eq!(UrgencyTier::from_days_remaining(8), UrgencyTier::Medium);
        assert_eq!(UrgencyTier::from_days_remaining(14), UrgencyTier::Medium);
        assert_eq!(UrgencyTier::from_days_remaining(15), UrgencyTier::Low);
    }

    #[test]
    fn test_fiscal_year_boundary() {
        let september = NaiveDate::from_ymd_opt(2024, 9, 30).unwrap();
        let october = NaiveDate::from_ymd_opt(2024, 10, 1).unwrap();
        assert_eq!(fiscal_year(september), 2024);
        assert_eq!(fiscal_year(october), 2025);
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount(150_000.0), Some(150_000.0));
        assert_eq!(parse_amount(0.0), Some(0.0));
        assert_eq!(parse_amount(-5.0), None);
        assert_eq!(parse_amount(f64::NAN), None);
        assert_eq!(parse_amount(2.0e12), None);
    }

    #[test]
    fn test_amount_categories() {
        assert_eq!(AmountCategory::from_amount(5_000.0), AmountCategory::Micro);
        assert_eq!(AmountCategory::from_amount(100_000.0), AmountCategory::Small);
        assert_eq!(AmountCategory::from_amount(500_000.0), AmountCategory::Medium);
        assert_eq!(AmountCategory::from_amount(5_000_000.0), AmountCategory::Large);
        assert_eq!(AmountCategory::from_amount(50_000_000.0), AmountCategory::Major);
        assert_eq!(AmountCategory::from_amount(500_000_000.0), AmountCategory::Mega);
    }

    #[test]
    fn test_identifier_validation() {
        assert_eq!(validate_naics("541715"), Some("541715".to_string()));
        assert_eq!(validate_naics("54"), Some("54".to_string()));
        assert_eq!(validate_naics("5417159"), None);
        assert_eq!(validate_naics("54171A"), None);

        assert_eq!(validate_uei("ABC123DEF456"), Some("ABC123DEF456".to_string()));
        assert_eq!(validate_uei("abc123def456"), Some("ABC123DEF456".to_string()));
        assert_eq!(validate_uei("SHORT"), None);

        assert_eq!(validate_duns("123456789"), Some("123456789".to_string()));
        assert_eq!(validate_duns("12345678"), None);
        assert_eq!(validate_duns("12345678X"), None);
    }

    #[test]
    fn test_parse_flag() {
        assert_eq!(parse_flag("1"), Some(true));
        assert_eq!(parse_flag("Yes"), Some(true));
        assert_eq!(parse_flag("TRUE"), Some(true));
        assert_eq!(parse_flag("0"), Some(false));
        assert_eq!(parse_flag("No"), Some(false));
        assert_eq!(parse_flag("maybe"), None);
        assert_eq!(parse_flag(""), None);
    }

    #[test]
    fn test_join_values() {
        let values = vec!["AI".to_string(), "".to_string(), "  Autonomy ".to_string()];
        assert_eq!(join_values(&values), Some("AI, Autonomy".to_string()));
        assert_eq!(join_values(&[]), None);

        let contacts = vec!["A <a@x.gov>".to_string(), "B <b@x.gov>".to_string()];
        assert_eq!(join_contacts(&contacts), Some("A <a@x.gov>; B <b@x.gov>".to_string()));
    }
}
