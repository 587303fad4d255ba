//! Freshness gate: a single 0/1 gauge saying whether the last poll
//! cycle succeeded. Measure gauges keep their last good values either
//! way; this is how a scraper tells live data from stale data.

use clap::ValueEnum;
use prometheus::IntGauge;

use crate::error::MeasureError;
use crate::metrics::MetricsRegistry;
use crate::orchestrator::CycleReport;

/// How per-measure data-shape failures affect the gate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum FreshnessPolicy {
    /// Any failure in the cycle clears the gate.
    #[default]
    Strict,
    /// Only remote errors clear the gate.
    RemoteOnly,
}

impl FreshnessPolicy {
    pub fn is_fresh(self, outcome: &Result<CycleReport, MeasureError>) -> bool {
        match (self, outcome) {
            (_, Err(_)) => false,
            (FreshnessPolicy::Strict, Ok(report)) => report.is_clean(),
            (FreshnessPolicy::RemoteOnly, Ok(_)) => true,
        }
    }
}

pub struct FreshnessGate {
    gauge: IntGauge,
    policy: FreshnessPolicy,
}

impl FreshnessGate {
    pub fn new(metrics: &MetricsRegistry, policy: FreshnessPolicy) -> Result<Self, MeasureError> {
        Ok(Self {
            gauge: metrics.gauge(
                "fresh",
                "1 if the most recent poll of Mastodon admin measures succeeded, else 0",
            )?,
            policy,
        })
    }

    /// Evaluate a finished cycle and publish the result.
    pub fn record(&self, outcome: &Result<CycleReport, MeasureError>) -> bool {
        let fresh = self.policy.is_fresh(outcome);
        self.gauge.set(i64::from(fresh));
        fresh
    }

    pub fn is_open(&self) -> bool {
        self.gauge.get() == 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn shape_failure() -> MeasureError {
        MeasureError::MissingData {
            measure: "new_users".into(),
            date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        }
    }

    fn remote_failure() -> MeasureError {
        MeasureError::Server {
            endpoint: "/api/v1/admin/measures".into(),
            status: 500,
            body: String::new(),
        }
    }

    #[test]
    fn test_gate_starts_closed() {
        let metrics = MetricsRegistry::new("m_");
        let gate = FreshnessGate::new(&metrics, FreshnessPolicy::Strict).unwrap();
        assert!(!gate.is_open());
        assert!(metrics.encode().unwrap().contains("m_fresh 0"));
    }

    #[test]
    fn test_clean_cycle_opens_gate() {
        let metrics = MetricsRegistry::new("m_");
        let gate = FreshnessGate::new(&metrics, FreshnessPolicy::Strict).unwrap();
        assert!(gate.record(&Ok(CycleReport::default())));
        assert!(gate.is_open());
        assert!(metrics.encode().unwrap().contains("m_fresh 1"));
    }

    #[test]
    fn test_remote_error_closes_gate_under_both_policies() {
        for policy in [FreshnessPolicy::Strict, FreshnessPolicy::RemoteOnly] {
            let metrics = MetricsRegistry::new("m_");
            let gate = FreshnessGate::new(&metrics, policy).unwrap();
            gate.record(&Ok(CycleReport::default()));
            assert!(!gate.record(&Err(remote_failure())));
            assert!(!gate.is_open());
        }
    }

    #[test]
    fn test_shape_failure_depends_on_policy() {
        let report = || CycleReport {
            updated: 4,
            failures: vec![shape_failure()],
        };
        assert!(!FreshnessPolicy::Strict.is_fresh(&Ok(report())));
        assert!(FreshnessPolicy::RemoteOnly.is_fresh(&Ok(report())));
    }
}
