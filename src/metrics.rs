//! Gauge registry exposed on the scrape endpoint.
//!
//! Wraps a `prometheus::Registry` owned by the process (not a global).
//! `IntGauge` is an atomic cell, so the poll task writes and the scrape
//! handler reads without any extra locking.

use prometheus::{Encoder, IntGauge, Opts, Registry, TextEncoder};

use crate::error::MeasureError;

pub const DEFAULT_PREFIX: &str = "mastodon_measure_";

#[derive(Clone)]
pub struct MetricsRegistry {
    registry: Registry,
    prefix: String,
}

impl MetricsRegistry {
    pub fn new(prefix: &str) -> Self {
        Self {
            registry: Registry::new(),
            prefix: prefix.to_string(),
        }
    }

    /// Full exported name for `suffix`.
    pub fn metric_name(&self, suffix: &str) -> String {
        format!("{}{}", self.prefix, suffix)
    }

    /// Create and register a gauge named `<prefix><suffix>`.
    pub fn gauge(&self, suffix: &str, help: &str) -> Result<IntGauge, MeasureError> {
        let gauge = IntGauge::with_opts(Opts::new(self.metric_name(suffix), help))?;
        self.registry.register(Box::new(gauge.clone()))?;
        Ok(gauge)
    }

    /// Render every registered gauge in the Prometheus text format.
    pub fn encode(&self) -> Result<String, MeasureError> {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| {
            MeasureError::Registry(prometheus::Error::Msg(format!(
                "exposition is not valid UTF-8: {e}"
            )))
        })
    }
}

/// Gauges are signed; clamp counts that would not fit.
pub fn gauge_value(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
