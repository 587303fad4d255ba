//! Poll loop: bootstrap once, then refresh on a fixed interval forever.
//!
//! The bootstrap cycle runs before the scrape endpoint is opened so a
//! scraper never sees the zero values gauges start with. After that, a
//! failed cycle only clears the freshness gate; the next tick is the
//! retry.

use tokio::time::{self, Duration, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::error::MeasureError;
use crate::freshness::FreshnessGate;
use crate::orchestrator::{CycleReport, Orchestrator};

/// Run the first cycle. A remote error is returned so the caller can
/// refuse to start serving.
pub async fn bootstrap(
    orchestrator: &mut Orchestrator,
    gate: &FreshnessGate,
) -> Result<(), MeasureError> {
    info!("📡 Fetching initial measures...");
    let outcome = orchestrator.update_all().await;
    if let Err(e) = &outcome {
        error!(error = %e, "Initial fetch failed");
    }
    let fresh = gate.record(&outcome);
    let report = outcome?;
    log_report(&report, fresh);
    log_values(orchestrator);
    Ok(())
}

/// Run one scheduled cycle and publish its freshness.
pub async fn run_cycle(orchestrator: &mut Orchestrator, gate: &FreshnessGate) -> bool {
    let started = Instant::now();
    let outcome = orchestrator.update_all().await;
    let fresh = gate.record(&outcome);

    match &outcome {
        Ok(report) => log_report(report, fresh),
        Err(e) => error!(
            error = %e,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Poll failed, serving previous values"
        ),
    }
    fresh
}

/// Tick every `interval` and run a cycle. Never returns.
///
/// Cycles never overlap. If one overruns the interval the next starts as
/// soon as it finishes, without a burst of catch-up ticks.
pub async fn run_poller(mut orchestrator: Orchestrator, gate: FreshnessGate, interval: Duration) {
    let mut ticker = time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        run_cycle(&mut orchestrator, &gate).await;
    }
}

fn log_report(report: &CycleReport, fresh: bool) {
    if report.is_clean() {
        info!(updated = report.updated, fresh, "📡 Measures updated");
    } else {
        let failed: Vec<&str> = report.failures.iter().filter_map(|e| e.measure()).collect();
        warn!(
            updated = report.updated,
            failed = ?failed,
            fresh,
            "📡 Measures partially updated"
        );
    }
}

fn log_values(orchestrator: &Orchestrator) {
    for counter in orchestrator.counters() {
        if let Some(state) = counter.state() {
            debug!(
                measure = counter.name(),
                today = state.today,
                yesterday = state.yesterday,
                "Counter"
            );
        }
    }
    for unique in orchestrator.uniques() {
        let state = unique.state();
        debug!(
            measure = unique.name(),
            today = ?state.today,
            yesterday = ?state.yesterday,
            last_7d = ?state.last_7d,
            last_30d = ?state.last_30d,
            "Unique"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::fake::FakeSource;
    use crate::api::{MeasureResult, MeasureSource};
    use crate::freshness::FreshnessPolicy;
    use crate::measures::testing::ManualClock;
    use crate::measures::{days_before, MeasureSpec};
    use crate::metrics::MetricsRegistry;
    use async_trait::async_trait;
    use chrono::{DateTime, NaiveDate, Utc};
    use std::sync::{Arc, Mutex};

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 7, 1).unwrap()
    }

    fn setup(
        policy: FreshnessPolicy,
    ) -> (Arc<FakeSource>, MetricsRegistry, Orchestrator, FreshnessGate) {
        let source = Arc::new(FakeSource::new());
        let metrics = MetricsRegistry::new("m_");
        let orchestrator = Orchestrator::new(
            &[
                MeasureSpec::counter("new_users"),
                MeasureSpec::unique("active_users"),
            ],
            source.clone(),
            Arc::new(ManualClock::new(today())),
            &metrics,
        )
        .unwrap();
        let gate = FreshnessGate::new(&metrics, policy).unwrap();
        (source, metrics, orchestrator, gate)
    }

    fn seed(source: &FakeSource, value: u64) {
        source.fill("new_users", days_before(today(), 1), today(), value);
        source.fill("active_users", days_before(today(), 40), today(), value);
    }

    #[tokio::test]
    async fn test_stale_values_survive_server_error() {
        let (source, metrics, mut orchestrator, gate) = setup(FreshnessPolicy::Strict);

        seed(&source, 5);
        bootstrap(&mut orchestrator, &gate).await.unwrap();
        assert!(gate.is_open());
        let populated = metrics.encode().unwrap();
        assert!(populated.contains("m_new_users_today 5"));
        assert!(populated.contains("m_active_users_unique_last_30d 155"));

        seed(&source, 9);
        source.fail_with(Some(503));
        assert!(!run_cycle(&mut orchestrator, &gate).await);
        let stale = metrics.encode().unwrap();
        assert_eq!(
            stale.replace("m_fresh 0", "m_fresh 1"),
            populated,
            "only the gate may change on a failed cycle"
        );

        source.fail_with(None);
        assert!(run_cycle(&mut orchestrator, &gate).await);
        let refreshed = metrics.encode().unwrap();
        assert!(refreshed.contains("m_fresh 1"));
        assert!(refreshed.contains("m_new_users_today 9"));
        assert!(refreshed.contains("m_active_users_unique_today 9"));
    }

    #[tokio::test]
    async fn test_bootstrap_remote_error_is_fatal() {
        let (source, _metrics, mut orchestrator, gate) = setup(FreshnessPolicy::Strict);
        source.fail_with(Some(502));

        let err = bootstrap(&mut orchestrator, &gate).await.unwrap_err();

        assert!(err.is_remote());
        assert!(!gate.is_open());
    }

    #[tokio::test]
    async fn test_shape_failure_gate_follows_policy() {
        for (policy, expected) in [
            (FreshnessPolicy::Strict, false),
            (FreshnessPolicy::RemoteOnly, true),
        ] {
            let (source, _metrics, mut orchestrator, gate) = setup(policy);
            seed(&source, 1);
            source.omit("new_users");

            bootstrap(&mut orchestrator, &gate).await.unwrap();
            assert_eq!(gate.is_open(), expected, "{policy:?}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_poller_waits_one_interval_between_cycles() {
        let (source, _metrics, orchestrator, gate) = setup(FreshnessPolicy::Strict);
        seed(&source, 1);

        let handle = tokio::spawn(run_poller(orchestrator, gate, Duration::from_secs(30)));

        time::sleep(Duration::from_secs(29)).await;
        assert!(source.calls().is_empty(), "no cycle before the first interval");

        time::sleep(Duration::from_secs(2)).await;
        // One counter batch plus four unique windows.
        assert_eq!(source.calls().len(), 5);

        time::sleep(Duration::from_secs(30)).await;
        assert_eq!(source.calls().len(), 10);

        handle.abort();
    }

    /// Stalls every counter batch by `delay` and records when each one began.
    struct SlowSource {
        inner: FakeSource,
        delay: Duration,
        origin: Instant,
        started: Mutex<Vec<Duration>>,
    }

    #[async_trait]
    impl MeasureSource for SlowSource {
        async fn query(
            &self,
            keys: &[String],
            start: DateTime<Utc>,
            end: DateTime<Utc>,
        ) -> Result<Vec<MeasureResult>, MeasureError> {
            if keys.iter().any(|k| k == "new_users") {
                self.started.lock().unwrap().push(self.origin.elapsed());
                time::sleep(self.delay).await;
            }
            self.inner.query(keys, start, end).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_overrunning_cycle_delays_next_without_catch_up() {
        let source = Arc::new(SlowSource {
            inner: FakeSource::new(),
            delay: Duration::from_secs(45),
            origin: Instant::now(),
            started: Mutex::new(Vec::new()),
        });
        seed(&source.inner, 1);
        let metrics = MetricsRegistry::new("m_");
        let orchestrator = Orchestrator::new(
            &[
                MeasureSpec::counter("new_users"),
                MeasureSpec::unique("active_users"),
            ],
            source.clone(),
            Arc::new(ManualClock::new(today())),
            &metrics,
        )
        .unwrap();
        let gate = FreshnessGate::new(&metrics, FreshnessPolicy::Strict).unwrap();

        let handle = tokio::spawn(run_poller(orchestrator, gate, Duration::from_secs(30)));
        time::sleep(Duration::from_secs(200)).await;
        handle.abort();

        // Each cycle takes 45s against a 30s interval: the next one starts
        // as soon as the previous finishes, with no burst of missed ticks.
        let started: Vec<u64> = source
            .started
            .lock()
            .unwrap()
            .iter()
            .map(|d| d.as_secs())
            .collect();
        assert_eq!(started, vec![30, 75, 120, 165]);
    }
}
