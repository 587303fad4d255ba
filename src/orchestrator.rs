//! Update orchestrator: one poll cycle over every tracked measure.
//!
//! Counters are fetched in a single batched query covering yesterday and
//! today, then each series goes to its measure (all-or-nothing per
//! measure, independent across measures). Unique measures are refreshed
//! one after another since each needs its own windows.
//!
//! Remote errors end the cycle and are returned; data-shape errors are
//! collected in the [`CycleReport`] and the cycle goes on.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::api::{day_start, MeasureSource};
use crate::error::MeasureError;
use crate::measures::{
    day_after, days_before, validate_specs, Clock, CounterMeasure, MeasureKind, MeasureSpec,
    UniqueMeasure,
};
use crate::metrics::MetricsRegistry;

/// Per-measure failures from a cycle the remote side fully answered.
#[derive(Debug, Default)]
pub struct CycleReport {
    pub updated: usize,
    pub failures: Vec<MeasureError>,
}

impl CycleReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct Orchestrator {
    source: Arc<dyn MeasureSource>,
    clock: Arc<dyn Clock>,
    counters: Vec<CounterMeasure>,
    uniques: Vec<UniqueMeasure>,
}

impl Orchestrator {
    /// Build every measure in `specs` and register its gauges.
    pub fn new(
        specs: &[MeasureSpec],
        source: Arc<dyn MeasureSource>,
        clock: Arc<dyn Clock>,
        metrics: &MetricsRegistry,
    ) -> Result<Self, MeasureError> {
        validate_specs(specs)?;

        let mut counters = Vec::new();
        let mut uniques = Vec::new();
        for spec in specs {
            match spec.kind {
                MeasureKind::Counter => counters.push(CounterMeasure::new(&spec.name, metrics)?),
                MeasureKind::Unique => uniques.push(UniqueMeasure::new(&spec.name, metrics)?),
            }
        }

        info!(
            counters = counters.len(),
            unique = uniques.len(),
            "Measures registered"
        );

        Ok(Self {
            source,
            clock,
            counters,
            uniques,
        })
    }

    pub fn counters(&self) -> &[CounterMeasure] {
        &self.counters
    }

    pub fn uniques(&self) -> &[UniqueMeasure] {
        &self.uniques
    }

    /// Run one full cycle: counters first, then each unique measure.
    pub async fn update_all(&mut self) -> Result<CycleReport, MeasureError> {
        let mut report = CycleReport::default();

        self.update_counters(&mut report).await?;

        for unique in &mut self.uniques {
            let today = self.clock.today();
            let failures = unique.refresh(self.source.as_ref(), today).await?;
            if failures.is_empty() {
                report.updated += 1;
            }
            report.failures.extend(failures);
        }

        Ok(report)
    }

    async fn update_counters(&mut self, report: &mut CycleReport) -> Result<(), MeasureError> {
        if self.counters.is_empty() {
            return Ok(());
        }

        let today = self.clock.today();
        let keys: Vec<String> = self.counters.iter().map(|c| c.name().to_string()).collect();
        let results = self
            .source
            .query(&keys, day_start(days_before(today, 1)), day_start(day_after(today)))
            .await?;

        let mut by_key: HashMap<String, _> = HashMap::with_capacity(results.len());
        for result in results {
            if keys.contains(&result.key) {
                by_key.insert(result.key.clone(), result);
            } else {
                debug!(key = %result.key, "Ignoring untracked measure in response");
            }
        }

        for counter in &mut self.counters {
            let outcome = match by_key.get(counter.name()) {
                Some(result) => counter.update_with_data(&result.data, today),
                None => Err(MeasureError::MissingResult {
                    measure: counter.name().to_string(),
                }),
            };

            match outcome {
                Ok(()) => report.updated += 1,
                Err(e) => {
                    warn!(measure = %counter.name(), error = %e, "Keeping previous value");
                    report.failures.push(e);
                }
            }
        }

        Ok(())
    }
}
