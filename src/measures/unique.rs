//! Unique measures: distinct occurrences over a window.
//!
//! Unique counts do not add up across days, so every window is its own
//! query:
//! - today and yesterday: single-day queries, exactly one bucket expected
//! - last 7 / 30 days: ranged queries whose aggregate `total` is used once
//!   the returned buckets are shown to span the requested range
//!
//! Each window is updated independently. A data-shape failure in one
//! window keeps that window's previous value and the rest still update.
//! A remote error stops the refresh; windows already updated stay updated.

use chrono::NaiveDate;
use prometheus::IntGauge;
use tracing::{debug, warn};

use super::{day_after, days_before};
use crate::api::{day_start, DailyDataPoint, MeasureResult, MeasureSource};
use crate::error::MeasureError;
use crate::metrics::{gauge_value, MetricsRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Window {
    Today,
    Yesterday,
    Last7Days,
    Last30Days,
}

impl Window {
    pub const ALL: [Window; 4] = [
        Window::Today,
        Window::Yesterday,
        Window::Last7Days,
        Window::Last30Days,
    ];

    fn index(self) -> usize {
        match self {
            Window::Today => 0,
            Window::Yesterday => 1,
            Window::Last7Days => 2,
            Window::Last30Days => 3,
        }
    }

    fn suffix(self) -> &'static str {
        match self {
            Window::Today => "unique_today",
            Window::Yesterday => "unique_yesterday",
            Window::Last7Days => "unique_last_7d",
            Window::Last30Days => "unique_last_30d",
        }
    }

    fn describe(self) -> &'static str {
        match self {
            Window::Today => "the current UTC day",
            Window::Yesterday => "the previous UTC day",
            Window::Last7Days => "the 7 days before yesterday through yesterday",
            Window::Last30Days => "the 30 days before yesterday through yesterday",
        }
    }
}

/// Last accepted value per window; `None` until that window first updates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UniqueState {
    pub today: Option<u64>,
    pub yesterday: Option<u64>,
    pub last_7d: Option<u64>,
    pub last_30d: Option<u64>,
}

impl UniqueState {
    fn slot(&mut self, window: Window) -> &mut Option<u64> {
        match window {
            Window::Today => &mut self.today,
            Window::Yesterday => &mut self.yesterday,
            Window::Last7Days => &mut self.last_7d,
            Window::Last30Days => &mut self.last_30d,
        }
    }
}

pub struct UniqueMeasure {
    name: String,
    state: UniqueState,
    gauges: [IntGauge; 4],
}

impl UniqueMeasure {
    pub fn new(name: &str, metrics: &MetricsRegistry) -> Result<Self, MeasureError> {
        let gauge = |window: Window| {
            metrics.gauge(
                &format!("{name}_{}", window.suffix()),
                &format!("Unique {name} over {}", window.describe()),
            )
        };
        Ok(Self {
            name: name.to_string(),
            state: UniqueState::default(),
            gauges: [
                gauge(Window::Today)?,
                gauge(Window::Yesterday)?,
                gauge(Window::Last7Days)?,
                gauge(Window::Last30Days)?,
            ],
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> UniqueState {
        self.state
    }

    /// Refresh all four windows relative to `today`.
    ///
    /// Returns the data-shape failures (already logged) when the remote
    /// side answered every query, or the first remote error.
    pub async fn refresh(
        &mut self,
        source: &dyn MeasureSource,
        today: NaiveDate,
    ) -> Result<Vec<MeasureError>, MeasureError> {
        let yesterday = days_before(today, 1);
        let mut failures = Vec::new();

        for window in Window::ALL {
            let outcome = match window {
                Window::Today => self.update_day(source, window, today).await,
                Window::Yesterday => self.update_day(source, window, yesterday).await,
                Window::Last7Days => {
                    self.update_range(source, window, days_before(yesterday, 7), yesterday)
                        .await
                }
                Window::Last30Days => {
                    self.update_range(source, window, days_before(yesterday, 30), yesterday)
                        .await
                }
            };

            match outcome {
                Ok(()) => {}
                Err(e) if !e.is_data_shape() => return Err(e),
                Err(e) => {
                    warn!(
                        measure = %self.name,
                        window = window.suffix(),
                        error = %e,
                        "Keeping previous value"
                    );
                    failures.push(e);
                }
            }
        }

        Ok(failures)
    }

    /// Single-day query for `date` into `window`.
    async fn update_day(
        &mut self,
        source: &dyn MeasureSource,
        window: Window,
        date: NaiveDate,
    ) -> Result<(), MeasureError> {
        let result = self.fetch(source, date, date).await?;
        let value = single_day_value(&self.name, &result.data, date)?;
        self.store(window, value);
        Ok(())
    }

    /// Ranged query over `start..=end` into `window`.
    async fn update_range(
        &mut self,
        source: &dyn MeasureSource,
        window: Window,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<(), MeasureError> {
        let result = self.fetch(source, start, end).await?;
        check_coverage(&self.name, &result.data, start, end)?;
        self.store(window, result.total);
        Ok(())
    }

    async fn fetch(
        &self,
        source: &dyn MeasureSource,
        first: NaiveDate,
        last: NaiveDate,
    ) -> Result<MeasureResult, MeasureError> {
        let keys = std::slice::from_ref(&self.name);
        source
            .query(keys, day_start(first), day_start(day_after(last)))
            .await?
            .into_iter()
            .find(|r| r.key == self.name)
            .ok_or_else(|| MeasureError::MissingResult {
                measure: self.name.clone(),
            })
    }

    fn store(&mut self, window: Window, value: u64) {
        debug!(measure = %self.name, window = window.suffix(), value, "Updated");
        *self.state.slot(window) = Some(value);
        self.gauges[window.index()].set(gauge_value(value));
    }
}

/// Value of the only bucket, which must be dated `date`.
pub fn single_day_value(
    measure: &str,
    data: &[DailyDataPoint],
    date: NaiveDate,
) -> Result<u64, MeasureError> {
    match data {
        [point] if point.date == date => Ok(point.value),
        [point] => Err(MeasureError::UnexpectedDataShape {
            measure: measure.to_string(),
            date,
            found: format!("one point dated {}", point.date),
        }),
        _ => Err(MeasureError::UnexpectedDataShape {
            measure: measure.to_string(),
            date,
            found: format!("{} points", data.len()),
        }),
    }
}

/// The earliest and latest buckets must be exactly `start` and `end`.
pub fn check_coverage(
    measure: &str,
    data: &[DailyDataPoint],
    start: NaiveDate,
    end: NaiveDate,
) -> Result<(), MeasureError> {
    let first = data.iter().map(|p| p.date).min();
    let last = data.iter().map(|p| p.date).max();

    match (first, last) {
        (Some(first), Some(last)) if first == start && last == end => Ok(()),
        (Some(first), Some(last)) => Err(MeasureError::RangeCoverage {
            measure: measure.to_string(),
            start,
            end,
            found: format!("{first}..={last}"),
        }),
        _ => Err(MeasureError::RangeCoverage {
            measure: measure.to_string(),
            start,
            end,
            found: "no data".to_string(),
        }),
    }
}
