//! Remote measure source: the one operation the update engine needs
//! from the Mastodon admin API.
//!
//! The engine only ever sees the typed results defined here; parsing of
//! the loosely shaped JSON happens inside the concrete client.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};

use crate::error::MeasureError;

pub mod mastodon;

// ── Core Types ──────────────────────────────────────────────────────

/// One day-bucket of a measure series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailyDataPoint {
    pub date: NaiveDate,
    pub value: u64,
}

/// Result for a single measure key over the requested window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeasureResult {
    pub key: String,
    /// Aggregate over the whole window as reported by the server.
    pub total: u64,
    pub data: Vec<DailyDataPoint>,
}

// ── Source Trait ────────────────────────────────────────────────────

#[async_trait]
pub trait MeasureSource: Send + Sync {
    /// Fetch measures for `keys` over the half-open window `[start, end)`.
    ///
    /// Returns one result per requested key. Transport and server
    /// failures surface as remote errors (see [`MeasureError::is_remote`]).
    async fn query(
        &self,
        keys: &[String],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<MeasureResult>, MeasureError>;
}

/// Midnight UTC at the start of `date`.
pub fn day_start(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}
