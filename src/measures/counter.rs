//! Counter measures: one value per UTC day.
//!
//! The batch response carries a short day-bucketed series; we pick out
//! today and yesterday. Both must be present or nothing is written.

use chrono::NaiveDate;
use prometheus::IntGauge;

use super::days_before;
use crate::api::DailyDataPoint;
use crate::error::MeasureError;
use crate::metrics::{gauge_value, MetricsRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterState {
    pub today: u64,
    pub yesterday: u64,
}

pub struct CounterMeasure {
    name: String,
    state: Option<CounterState>,
    today_gauge: IntGauge,
    yesterday_gauge: IntGauge,
}

impl CounterMeasure {
    pub fn new(name: &str, metrics: &MetricsRegistry) -> Result<Self, MeasureError> {
        Ok(Self {
            name: name.to_string(),
            state: None,
            today_gauge: metrics.gauge(
                &format!("{name}_today"),
                &format!("Count of {name} for the current UTC day"),
            )?,
            yesterday_gauge: metrics.gauge(
                &format!("{name}_yesterday"),
                &format!("Count of {name} for the previous UTC day"),
            )?,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Last successfully applied values, `None` before the first one.
    pub fn state(&self) -> Option<CounterState> {
        self.state
    }

    /// Apply a day-bucketed series. Order of `series` does not matter and
    /// unrelated dates are ignored. If either today or yesterday is
    /// missing the previous state stays as it was.
    pub fn update_with_data(
        &mut self,
        series: &[DailyDataPoint],
        today: NaiveDate,
    ) -> Result<(), MeasureError> {
        let yesterday = days_before(today, 1);

        let today_value = self.value_on(series, today)?;
        let yesterday_value = self.value_on(series, yesterday)?;

        let state = CounterState {
            today: today_value,
            yesterday: yesterday_value,
        };
        self.today_gauge.set(gauge_value(state.today));
        self.yesterday_gauge.set(gauge_value(state.yesterday));
        self.state = Some(state);
        Ok(())
    }

    fn value_on(&self, series: &[DailyDataPoint], date: NaiveDate) -> Result<u64, MeasureError> {
        series
            .iter()
            .find(|p| p.date == date)
            .map(|p| p.value)
            .ok_or_else(|| MeasureError::MissingData {
                measure: self.name.clone(),
                date,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn point(date: NaiveDate, value: u64) -> DailyDataPoint {
        DailyDataPoint { date, value }
    }

    fn measure(metrics: &MetricsRegistry) -> CounterMeasure {
        CounterMeasure::new("new_users", metrics).unwrap()
    }

    #[test]
    fn test_update_picks_today_and_yesterday() {
        let metrics = MetricsRegistry::new("m_");
        let mut m = measure(&metrics);
        let today = date(2024, 1, 7);

        m.update_with_data(&[point(date(2024, 1, 6), 4), point(today, 9)], today)
            .unwrap();

        assert_eq!(m.state(), Some(CounterState { today: 9, yesterday: 4 }));
        let text = metrics.encode().unwrap();
        assert!(text.contains("m_new_users_today 9"));
        assert!(text.contains("m_new_users_yesterday 4"));
    }

    #[test]
    fn test_update_ignores_order_and_extra_dates() {
        let metrics = MetricsRegistry::new("m_");
        let mut m = measure(&metrics);
        let today = date(2024, 3, 1);

        let series = [
            point(date(2024, 3, 2), 100),
            point(today, 7),
            point(date(2024, 2, 27), 50),
            point(date(2024, 2, 29), 3),
        ];
        m.update_with_data(&series, today).unwrap();

        assert_eq!(m.state(), Some(CounterState { today: 7, yesterday: 3 }));
    }

    #[test]
    fn test_missing_today_keeps_previous_state() {
        let metrics = MetricsRegistry::new("m_");
        let mut m = measure(&metrics);
        let today = date(2024, 1, 7);
        m.update_with_data(&[point(date(2024, 1, 6), 1), point(today, 2)], today)
            .unwrap();

        let err = m
            .update_with_data(&[point(date(2024, 1, 6), 10)], today)
            .unwrap_err();

        assert!(matches!(err, MeasureError::MissingData { date: d, .. } if d == today));
        assert_eq!(m.state(), Some(CounterState { today: 2, yesterday: 1 }));
        assert!(metrics.encode().unwrap().contains("m_new_users_yesterday 1"));
    }

    #[test]
    fn test_missing_yesterday_writes_nothing() {
        let metrics = MetricsRegistry::new("m_");
        let mut m = measure(&metrics);
        let today = date(2024, 1, 7);

        let err = m.update_with_data(&[point(today, 5)], today).unwrap_err();

        assert!(matches!(
            err,
            MeasureError::MissingData { date: d, .. } if d == date(2024, 1, 6)
        ));
        assert_eq!(m.state(), None);
        assert!(metrics.encode().unwrap().contains("m_new_users_today 0"));
    }

    #[test]
    fn test_same_series_twice_is_stable() {
        let metrics = MetricsRegistry::new("m_");
        let mut m = measure(&metrics);
        let today = date(2024, 1, 7);
        let series = [point(today, 8), point(date(2024, 1, 6), 6)];

        m.update_with_data(&series, today).unwrap();
        let first = (m.state(), metrics.encode().unwrap());
        m.update_with_data(&series, today).unwrap();
        let second = (m.state(), metrics.encode().unwrap());

        assert_eq!(first, second);
    }

    #[test]
    fn test_year_boundary() {
        let metrics = MetricsRegistry::new("m_");
        let mut m = measure(&metrics);
        let today = date(2025, 1, 1);

        m.update_with_data(&[point(today, 1), point(date(2024, 12, 31), 2)], today)
            .unwrap();

        assert_eq!(m.state(), Some(CounterState { today: 1, yesterday: 2 }));
    }
}
