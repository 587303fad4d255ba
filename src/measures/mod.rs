//! Measure registry: which admin measures are tracked and how.
//!
//! A measure is either a *counter* (one value per day; today and
//! yesterday are published) or *unique* (distinct occurrences over a
//! window, so each window has to be queried on its own).

use chrono::{Days, NaiveDate, Utc};
use std::collections::HashSet;

use crate::error::MeasureError;

pub mod counter;
pub mod unique;

pub use counter::CounterMeasure;
pub use unique::UniqueMeasure;

// ── Spec ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MeasureKind {
    Counter,
    Unique,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeasureSpec {
    pub name: String,
    pub kind: MeasureKind,
}

impl MeasureSpec {
    pub fn counter(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: MeasureKind::Counter,
        }
    }

    pub fn unique(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: MeasureKind::Unique,
        }
    }
}

/// Counters are fetched as one batch for the last two days.
const COUNTER_MEASURES: &[&str] = &[
    "interactions",
    "new_users",
    "opened_reports",
    "resolved_reports",
];

/// Unique measures need their own query per window.
const UNIQUE_MEASURES: &[&str] = &["active_users"];

/// The measure set exported by default.
pub fn default_specs() -> Vec<MeasureSpec> {
    COUNTER_MEASURES
        .iter()
        .map(|name| MeasureSpec::counter(name))
        .chain(UNIQUE_MEASURES.iter().map(|name| MeasureSpec::unique(name)))
        .collect()
}

/// Names must be unique across both kinds.
pub fn validate_specs(specs: &[MeasureSpec]) -> Result<(), MeasureError> {
    let mut seen = HashSet::new();
    for spec in specs {
        if !seen.insert(spec.name.as_str()) {
            return Err(MeasureError::DuplicateMeasure(spec.name.clone()));
        }
    }
    Ok(())
}

// ── Clock ───────────────────────────────────────────────────────────

/// Source of the current UTC calendar date. Read on every update so a
/// long-running poller rolls over at midnight.
pub trait Clock: Send + Sync {
    fn today(&self) -> NaiveDate;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Utc::now().date_naive()
    }
}

pub(crate) fn days_before(date: NaiveDate, days: u64) -> NaiveDate {
    date - Days::new(days)
}

pub(crate) fn day_after(date: NaiveDate) -> NaiveDate {
    date + Days::new(1)
}
