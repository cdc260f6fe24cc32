//! Completeness scoring for normalized records.
//!
//! The score is a monitoring heuristic, never a write gate: every deduction
//! is a fixed penalty for a missing tracked field, so filling a field can
//! only raise the score.

#![allow(dead_code)]

use serde::{Deserialize, Serialize};

use crate::models::CanonicalRecord;

/// Score threshold for the "high quality" tier.
pub const HIGH_QUALITY_THRESHOLD: i32 = 80;

/// Score threshold for the "medium quality" tier.
pub const MEDIUM_QUALITY_THRESHOLD: i32 = 60;

/// Completeness score for one record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityScore {
    /// 0-100, higher is more complete.
    pub score: i32,
    /// Which tracked fields were missing.
    pub reasons: Vec<String>,
}

impl QualityScore {
    pub fn is_high(&self) -> bool {
        self.score >= HIGH_QUALITY_THRESHOLD
    }

    pub fn is_low(&self) -> bool {
        self.score < MEDIUM_QUALITY_THRESHOLD
    }
}

/// Score a record's completeness: start at 100, deduct per missing field.
pub fn score(record: &CanonicalRecord) -> QualityScore {
    let mut score = 100;
    let mut reasons = Vec::new();

    let mut deduct = |points: i32, reason: &str| {
        score -= points;
        reasons.push(reason.to_string());
    };

    if is_blank(&record.title) {
        deduct(30, "missing title");
    }
    if is_blank(&record.code) {
        deduct(30, "missing identifying code");
    }
    if record.open_date.is_none() && record.close_date.is_none() {
        deduct(10, "no usable dates");
    }
    if is_blank(&record.description) && is_blank(&record.objective) {
        deduct(10, "missing description");
    }
    if is_blank(&record.organization) {
        deduct(5, "missing organization");
    }
    if record.amount.is_none() {
        deduct(5, "missing amount");
    }
    if is_blank(&record.naics_code) {
        deduct(5, "missing classification code");
    }
    if is_blank(&record.contacts) {
        deduct(5, "missing contact");
    }

    QualityScore {
        score: score.max(0),
        reasons,
    }
}

fn is_blank(field: &Option<String>) -> bool {
    field.as_deref().map(str::trim).unwrap_or("").is_empty()
}

/// A normalized record paired with its completeness score, ready to write.
#[derive(Debug, Clone)]
pub struct ScoredRecord {
    pub record: CanonicalRecord,
    pub quality: QualityScore,
}

impl ScoredRecord {
    pub fn new(record: CanonicalRecord) -> Self {
        let quality = score(&record);
        Self { record, quality }
    }
}

/// Aggregate quality statistics for one batch of scored records.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchQuality {
    /// Records observed.
    pub total: u32,
    /// Lowest score seen.
    pub min: i32,
    /// Highest score seen.
    pub max: i32,
    /// Records at or above the high threshold.
    pub high: u32,
    /// Records between the medium and high thresholds.
    pub medium: u32,
    /// Records below the medium threshold.
    pub low: u32,
    sum: i64,
}

impl BatchQuality {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one score into the aggregate.
    pub fn observe(&mut self, quality: &QualityScore) {
        if self.total == 0 {
            self.min = quality.score;
            self.max = quality.score;
        } else {
            self.min = self.min.min(quality.score);
            self.max = self.max.max(quality.score);
        }
        self.total += 1;
        self.sum += quality.score as i64;

        if quality.score >= HIGH_QUALITY_THRESHOLD {
            self.high += 1;
        } else if quality.score >= MEDIUM_QUALITY_THRESHOLD {
            self.medium += 1;
        } else {
            self.low += 1;
        }
    }

    /// Mean score across the batch.
    pub fn average(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.sum as f64 / self.total as f64
    }
}
