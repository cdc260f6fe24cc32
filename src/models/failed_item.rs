//! Failed item model: the durable record of one record-level failure.
//!
//! Failed items are retried independently of the main sweep and deleted the
//! moment the underlying record succeeds, so the table always lists exactly
//! the inputs still needing attention.

#![allow(dead_code)]

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::RecordSource;

/// Stored error messages are truncated to this length.
pub const ERROR_MESSAGE_MAX: usize = 500;

/// Classification of a failure, persisted as the item's error_type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Timeout or connection-level failure. Retryable.
    Network,
    /// Upstream throttling (429/503). Retryable with backoff.
    RateLimit,
    /// Payload shape the typed parse boundary rejected. Not retryable.
    Parse,
    /// Normalized row missing a hard-required field. Not retryable.
    Validation,
    /// Database error while writing the row.
    Persistence,
    /// The primary detail fetch reported the record does not exist.
    NotFound,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::RateLimit => "rate_limit",
            Self::Parse => "parse",
            Self::Validation => "validation",
            Self::Persistence => "persistence",
            Self::NotFound => "not_found",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "network" => Some(Self::Network),
            "rate_limit" => Some(Self::RateLimit),
            "parse" => Some(Self::Parse),
            "validation" => Some(Self::Validation),
            "persistence" => Some(Self::Persistence),
            "not_found" => Some(Self::NotFound),
            _ => None,
        }
    }

    /// Whether the retry pass should attempt this failure again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network | Self::RateLimit | Self::Persistence)
    }
}

/// One failed record awaiting the retry pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedItem {
    /// Database row ID.
    pub id: i64,
    /// Portal the record belongs to.
    pub source: RecordSource,
    /// Upstream identifier of the failed record.
    pub external_id: String,
    /// Failure classification.
    pub kind: FailureKind,
    /// Error detail, truncated to [`ERROR_MESSAGE_MAX`].
    pub error_message: String,
    /// Date context of the unit that produced the failure.
    pub date: Option<NaiveDate>,
    /// Page context of the unit that produced the failure.
    pub page: Option<u32>,
    /// How many times processing has been attempted.
    pub attempt_count: u32,
    /// When the item first failed.
    pub first_failed_at: DateTime<Utc>,
    /// When the most recent attempt happened.
    pub last_attempt_at: DateTime<Utc>,
}

impl FailedItem {
    /// Truncate an error message to the stored limit.
    pub fn truncate_message(message: &str) -> String {
        if message.len() <= ERROR_MESSAGE_MAX {
            return message.to_string();
        }
        let mut end = ERROR_MESSAGE_MAX;
        while !message.is_char_boundary(end) {
            end -= 1;
        }
        message[..end].to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trip() {
        for kind in [
            FailureKind::Network,
            FailureKind::RateLimit,
            FailureKind::Parse,
            FailureKind::Validation,
            FailureKind::Persistence,
            FailureKind::NotFound,
        ] {
            assert_eq!(FailureKind::from_str(kind.as_str()), Some(kind));
        }
    }

    #[test]
    fn test_retryable_classification() {
        assert!(FailureKind::Network.is_retryable());
        assert!(FailureKind::RateLimit.is_retryable());
        assert!(FailureKind::Persistence.is_retryable());
        assert!(!FailureKind::Parse.is_retryable());
        assert!(!FailureKind::Validation.is_retryable());
        assert!(!FailureKind::NotFound.is_retryable());
    }

    #[test]
    fn test_truncate_message() {
        assert_eq!(FailedItem::truncate_message("short"), "short");

        let long = "x".repeat(ERROR_MESSAGE_MAX + 100);
        assert_eq!(FailedItem::truncate_message(&long).len(), ERROR_MESSAGE_MAX);

        // Multibyte boundaries are respected
        let multibyte = "é".repeat(ERROR_MESSAGE_MAX);
        let truncated = FailedItem::truncate_message(&multibyte);
        assert!(truncated.len() <= ERROR_MESSAGE_MAX);
        assert!(truncated.chars().all(|c| c == 'é'));
    }
}
