//! Scheduler module for running health checks on a timer.

mod retention;

pub use retention::*;

use crate::clock::Clock;
use crate::db::{
    CheckResult, Endpoint, HealthStatus, HistoryEntry, Store, StoreError, StoreEvent, MAX_CHECK_INTERVAL_SECONDS,
};
use crate::probe::Checker;

use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Default global polling cadence.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);
/// Lowest accepted polling cadence.
pub const MIN_INTERVAL: Duration = Duration::from_secs(10);
/// Highest accepted polling cadence.
pub const MAX_INTERVAL: Duration = Duration::from_secs(MAX_CHECK_INTERVAL_SECONDS);

/// Scheduler error types.
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("endpoint not found: {0}")]
    NotFound(String),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Emitted when an endpoint goes from healthy to unhealthy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub endpoint_id: String,
    pub endpoint_name: String,
    pub from: HealthStatus,
    pub to: HealthStatus,
}

/// What happened to a single requested check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    /// The check ran and its result was stored.
    Checked(CheckResult),
    /// A check for this endpoint was already in flight.
    Skipped,
    /// The check ran but its result was dropped: the endpoint was deleted,
    /// a newer result was already stored, or the monitor was shut down.
    Discarded,
}

/// Tally of one pass over the endpoint set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleSummary {
    pub checked: usize,
    pub skipped: usize,
    pub discarded: usize,
    pub failed: usize,
}

struct Timer {
    stop: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

/// Owns the polling timer and runs checks against the store's endpoints.
///
/// At most one check per endpoint is in flight at any time, whichever
/// trigger (timer, manual single check, manual check-all) started it.
pub struct Monitor {
    inner: Arc<MonitorInner>,
    timer: tokio::sync::Mutex<Option<Timer>>,
}

struct MonitorInner {
    store: Arc<Store>,
    checker: Arc<dyn Checker>,
    clock: Arc<dyn Clock>,
    in_flight: Mutex<HashSet<String>>,
    alive: AtomicBool,
    enabled: AtomicBool,
    interval_ms: AtomicU64,
    notifications: broadcast::Sender<StatusChange>,
}

impl Monitor {
    pub fn new(store: Arc<Store>, checker: Arc<dyn Checker>, clock: Arc<dyn Clock>) -> Self {
        let (notifications, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(MonitorInner {
                store,
                checker,
                clock,
                in_flight: Mutex::new(HashSet::new()),
                alive: AtomicBool::new(true),
                enabled: AtomicBool::new(true),
                interval_ms: AtomicU64::new(DEFAULT_INTERVAL.as_millis() as u64),
                notifications,
            }),
            timer: tokio::sync::Mutex::new(None),
        }
    }

    /// Subscribe to healthy → unhealthy transitions.
    pub fn subscribe(&self) -> broadcast::Receiver<StatusChange> {
        self.inner.notifications.subscribe()
    }

    /// Enable or disable checking. While disabled every trigger is a no-op.
    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Current polling cadence.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.inner.interval_ms.load(Ordering::SeqCst))
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }

    pub async fn is_running(&self) -> bool {
        self.timer.lock().await.is_some()
    }

    /// Start the timer: one immediate full check, then a due-check every `interval`.
    pub async fn start(&self, interval: Duration) {
        let mut timer = self.timer.lock().await;
        if timer.is_some() || !self.inner.alive.load(Ordering::SeqCst) {
            return;
        }

        let interval = interval.clamp(MIN_INTERVAL, MAX_INTERVAL);
        tracing::info!("Monitor: starting with interval {:?}", interval);
        *timer = Some(self.spawn_timer(interval, true));
    }

    /// Replace the timer with one at the new cadence.
    ///
    /// The old timer is fully stopped before the new one is armed, and the
    /// new one waits a full period before its first tick. If the monitor is
    /// not running only the stored cadence changes.
    pub async fn reconfigure(&self, interval: Duration) {
        let interval = interval.clamp(MIN_INTERVAL, MAX_INTERVAL);
        let mut timer = self.timer.lock().await;

        let Some(old) = timer.take() else {
            self.inner.interval_ms.store(interval.as_millis() as u64, Ordering::SeqCst);
            return;
        };

        if interval == self.interval() {
            *timer = Some(old);
            return;
        }

        halt(old).await;
        if !self.inner.alive.load(Ordering::SeqCst) {
            return;
        }

        tracing::info!("Monitor: interval changed to {:?}", interval);
        *timer = Some(self.spawn_timer(interval, false));
    }

    /// Stop the timer, cancelling any cycle it is running.
    pub async fn stop(&self) {
        let old = self.timer.lock().await.take();
        if let Some(old) = old {
            halt(old).await;
            tracing::info!("Monitor: stopped");
        }
    }

    /// Stop the timer and dispose the monitor. Checks still running after
    /// this point have their results dropped.
    pub async fn shutdown(&self) {
        self.inner.alive.store(false, Ordering::SeqCst);
        self.stop().await;
    }

    /// Check every endpoint once, sequentially.
    pub async fn check_all(&self) -> CycleSummary {
        self.inner.check_all().await
    }

    /// Check a single endpoint now.
    pub async fn check_endpoint(&self, id: &str) -> Result<CheckOutcome, MonitorError> {
        if !self.inner.is_active() {
            return Ok(CheckOutcome::Skipped);
        }
        match self.inner.store.get_endpoint(id)? {
            Some(endpoint) => self.inner.run_check(endpoint).await,
            None => Err(MonitorError::NotFound(id.to_string())),
        }
    }

    /// Follow settings changes and retime the monitor when the cadence moves.
    pub fn watch_settings(self: Arc<Self>) -> JoinHandle<()> {
        let mut events = self.inner.store.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(StoreEvent::SettingsChanged(settings)) => {
                        if !self.inner.alive.load(Ordering::SeqCst) {
                            break;
                        }
                        self.reconfigure(Duration::from_secs(settings.auto_refresh_interval_seconds))
                            .await;
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("Monitor: missed {} store events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    fn spawn_timer(&self, interval: Duration, immediate: bool) -> Timer {
        self.inner.interval_ms.store(interval.as_millis() as u64, Ordering::SeqCst);

        let (stop, stop_rx) = broadcast::channel(1);
        let task = tokio::spawn(run_timer(self.inner.clone(), interval, immediate, stop_rx));
        Timer { stop, task }
    }
}

async fn halt(timer: Timer) {
    let _ = timer.stop.send(());
    if let Err(e) = timer.task.await {
        tracing::error!("Monitor: timer task failed: {}", e);
    }
}

/// Drive checks until told to stop. A stop request also cancels the
/// cycle in progress.
async fn run_timer(
    inner: Arc<MonitorInner>,
    period: Duration,
    immediate: bool,
    mut stop_rx: broadcast::Receiver<()>,
) {
    let now = Instant::now();
    let first_at = if immediate {
        now
    } else {
        now.checked_add(period).unwrap_or(now)
    };
    let mut interval = tokio::time::interval_at(first_at, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut full_pass = immediate;

    loop {
        tokio::select! {
            _ = stop_rx.recv() => break,
            _ = interval.tick() => {
                let full = std::mem::replace(&mut full_pass, false);
                let cycle = async {
                    if full {
                        inner.check_all().await
                    } else {
                        inner.run_due().await
                    }
                };

                tokio::select! {
                    _ = stop_rx.recv() => break,
                    summary = cycle => {
                        if summary.checked + summary.skipped + summary.discarded + summary.failed > 0 {
                            tracing::debug!("Monitor: cycle finished {:?}", summary);
                        }
                    }
                }
            }
        }
    }
}

impl MonitorInner {
    fn is_active(&self) -> bool {
        self.alive.load(Ordering::SeqCst) && self.enabled.load(Ordering::SeqCst)
    }

    async fn check_all(&self) -> CycleSummary {
        if !self.is_active() {
            return CycleSummary::default();
        }
        match self.store.list_endpoints() {
            Ok(endpoints) => self.run_batch(endpoints).await,
            Err(e) => {
                tracing::error!("Monitor: failed to list endpoints: {}", e);
                CycleSummary::default()
            }
        }
    }

    async fn run_due(&self) -> CycleSummary {
        if !self.is_active() {
            return CycleSummary::default();
        }
        let endpoints = match self.store.list_endpoints() {
            Ok(endpoints) => endpoints,
            Err(e) => {
                tracing::error!("Monitor: failed to list endpoints: {}", e);
                return CycleSummary::default();
            }
        };

        let now = self.clock.now_millis();
        let tick_ms = self.interval_ms.load(Ordering::SeqCst);
        let due = endpoints
            .into_iter()
            .filter(|e| is_due(e, now, tick_ms))
            .collect();
        self.run_batch(due).await
    }

    async fn run_batch(&self, endpoints: Vec<Endpoint>) -> CycleSummary {
        let mut summary = CycleSummary::default();
        if endpoints.is_empty() {
            return summary;
        }

        tracing::debug!("Monitor: checking {} endpoints", endpoints.len());
        for endpoint in endpoints {
            if !self.is_active() {
                break;
            }
            let name = endpoint.name.clone();
            match self.run_check(endpoint).await {
                Ok(CheckOutcome::Checked(_)) => summary.checked += 1,
                Ok(CheckOutcome::Skipped) => summary.skipped += 1,
                Ok(CheckOutcome::Discarded) => summary.discarded += 1,
                Err(e) => {
                    tracing::error!("Monitor: failed to record check for {}: {}", name, e);
                    summary.failed += 1;
                }
            }
        }
        summary
    }

    async fn run_check(&self, snapshot: Endpoint) -> Result<CheckOutcome, MonitorError> {
        let Some(_guard) = InFlight::acquire(&self.in_flight, &snapshot.id) else {
            tracing::warn!("Skipping check for {}: previous check still running", snapshot.name);
            return Ok(CheckOutcome::Skipped);
        };

        // Re-read under the guard so the baseline status is the latest stored one.
        let Some(endpoint) = self.store.get_endpoint(&snapshot.id)? else {
            return Ok(CheckOutcome::Discarded);
        };
        let previous = endpoint.last_check.as_ref().map(|c| c.status);
        let floor = endpoint.last_check.as_ref().map(|c| c.timestamp.saturating_add(1));

        let mut result = self.checker.check(&endpoint).await;
        // Keep history strictly increasing when checks land in the same millisecond.
        if let Some(floor) = floor {
            result.timestamp = result.timestamp.max(floor);
        }

        if !self.alive.load(Ordering::SeqCst) {
            return Ok(CheckOutcome::Discarded);
        }
        if !self.store.upsert_check_result(&endpoint.id, &result)? {
            tracing::debug!("Dropping result for {}: endpoint gone or newer result stored", endpoint.name);
            return Ok(CheckOutcome::Discarded);
        }
        if !self
            .store
            .append_history(&HistoryEntry::from_result(&endpoint.id, &result))?
        {
            tracing::debug!("Dropping history for {}: endpoint deleted", endpoint.name);
            return Ok(CheckOutcome::Discarded);
        }

        tracing::debug!(
            "Checked {}: {} in {}ms",
            endpoint.name,
            result.status,
            result.latency_ms
        );

        if previous == Some(HealthStatus::Healthy) && result.status == HealthStatus::Unhealthy {
            self.notify(&endpoint, result.status);
        }

        Ok(CheckOutcome::Checked(result))
    }

    fn notify(&self, endpoint: &Endpoint, to: HealthStatus) {
        let enabled = match self.store.settings() {
            Ok(settings) => settings.notifications_enabled,
            Err(e) => {
                tracing::error!("Monitor: failed to read settings: {}", e);
                true
            }
        };
        if !enabled {
            return;
        }

        // No subscribers is fine.
        let _ = self.notifications.send(StatusChange {
            endpoint_id: endpoint.id.clone(),
            endpoint_name: endpoint.name.clone(),
            from: HealthStatus::Healthy,
            to,
        });
    }
}

/// Whether an endpoint's own interval has elapsed, rounded to the nearest tick.
fn is_due(endpoint: &Endpoint, now: i64, tick_ms: u64) -> bool {
    match &endpoint.last_check {
        None => true,
        Some(last) => {
            let interval_ms = i64::try_from(endpoint.check_interval_seconds)
                .unwrap_or(i64::MAX)
                .saturating_mul(1000);
            let next = last.timestamp.saturating_add(interval_ms);
            let slack = i64::try_from(tick_ms / 2).unwrap_or(i64::MAX);
            now.saturating_add(slack) >= next
        }
    }
}

/// Marks an endpoint as being checked until dropped.
struct InFlight<'a> {
    set: &'a Mutex<HashSet<String>>,
    id: String,
}

impl<'a> InFlight<'a> {
    fn acquire(set: &'a Mutex<HashSet<String>>, id: &str) -> Option<Self> {
        let mut ids = set.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if !ids.insert(id.to_string()) {
            return None;
        }
        Some(Self {
            set,
            id: id.to_string(),
        })
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut ids = self.set.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        ids.remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::db::{CheckFormat, EndpointInput, SettingsUpdate};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::{Notify, Semaphore};

    /// Checker returning scripted statuses, optionally held open by a gate.
    struct ScriptedChecker {
        clock: Arc<dyn Clock>,
        script: Mutex<VecDeque<HealthStatus>>,
        gate: Option<Arc<Semaphore>>,
        started: Notify,
        calls: AtomicUsize,
        active: AtomicUsize,
        max_active: AtomicUsize,
    }

    impl ScriptedChecker {
        fn new(clock: Arc<dyn Clock>) -> Self {
            Self {
                clock,
                script: Mutex::new(VecDeque::new()),
                gate: None,
                started: Notify::new(),
                calls: AtomicUsize::new(0),
                active: AtomicUsize::new(0),
                max_active: AtomicUsize::new(0),
            }
        }

        fn gated(clock: Arc<dyn Clock>, gate: Arc<Semaphore>) -> Self {
            Self {
                gate: Some(gate),
                ..Self::new(clock)
            }
        }

        fn script(self, statuses: &[HealthStatus]) -> Self {
            self.script.lock().unwrap().extend(statuses.iter().copied());
            self
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Checker for ScriptedChecker {
        async fn check(&self, _endpoint: &Endpoint) -> CheckResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(active, Ordering::SeqCst);
            self.started.notify_one();

            if let Some(gate) = &self.gate {
                gate.acquire().await.unwrap().forget();
            }

            let status = self.script.lock().unwrap().pop_front().unwrap_or(HealthStatus::Healthy);
            self.active.fetch_sub(1, Ordering::SeqCst);

            let error = (status == HealthStatus::Unhealthy).then(|| "HTTP 500: Internal Server Error".to_string());
            CheckResult {
                status,
                latency_ms: 3,
                timestamp: self.clock.now_millis(),
                dependencies: None,
                error,
            }
        }
    }

    /// Epoch clock that follows tokio's (possibly paused) time.
    struct TokioClock {
        origin: Instant,
    }

    impl Clock for TokioClock {
        fn now_millis(&self) -> i64 {
            self.origin.elapsed().as_millis() as i64
        }
    }

    fn setup(checker: ScriptedChecker, clock: Arc<dyn Clock>) -> (Arc<Store>, Arc<ScriptedChecker>, Arc<Monitor>) {
        let store = Arc::new(Store::open_in_memory().unwrap().with_clock(clock.clone()));
        let checker = Arc::new(checker);
        let monitor = Arc::new(Monitor::new(store.clone(), checker.clone(), clock));
        (store, checker, monitor)
    }

    fn add(store: &Store, name: &str) -> Endpoint {
        store
            .add_endpoint(EndpointInput::new(name, "http://example.com/health", CheckFormat::PlainOkText))
            .unwrap()
    }

    #[tokio::test]
    async fn test_check_all_twice_appends_ordered_history() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::stepping(1_000, 10));
        let (store, checker, monitor) = setup(ScriptedChecker::new(clock.clone()), clock);
        let endpoint = add(&store, "api");

        for _ in 0..2 {
            let summary = monitor.check_all().await;
            assert_eq!(summary.checked, 1);
            let stored = store.get_endpoint(&endpoint.id).unwrap().unwrap();
            assert_eq!(stored.last_check.unwrap().status, HealthStatus::Healthy);
        }

        assert_eq!(checker.calls(), 2);
        let history = store.endpoint_history(&endpoint.id, 10).unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[0].timestamp < history[1].timestamp);
    }

    #[tokio::test]
    async fn test_unhealthy_results_do_not_abort_batch() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::stepping(1_000, 10));
        let checker = ScriptedChecker::new(clock.clone()).script(&[
            HealthStatus::Unhealthy,
            HealthStatus::Unknown,
            HealthStatus::Healthy,
        ]);
        let (store, _, monitor) = setup(checker, clock);
        let a = add(&store, "a");
        let b = add(&store, "b");
        let c = add(&store, "c");

        let summary = monitor.check_all().await;
        assert_eq!(summary.checked, 3);

        let status = |id: &str| store.get_endpoint(id).unwrap().unwrap().last_check.unwrap().status;
        assert_eq!(status(&a.id), HealthStatus::Unhealthy);
        assert_eq!(status(&b.id), HealthStatus::Unknown);
        assert_eq!(status(&c.id), HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn test_disabled_or_empty_is_noop() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::stepping(1_000, 10));
        let (store, checker, monitor) = setup(ScriptedChecker::new(clock.clone()), clock);

        assert_eq!(monitor.check_all().await, CycleSummary::default());

        add(&store, "api");
        monitor.set_enabled(false);
        assert_eq!(monitor.check_all().await, CycleSummary::default());
        assert_eq!(checker.calls(), 0);

        monitor.set_enabled(true);
        assert_eq!(monitor.check_all().await.checked, 1);
    }

    #[tokio::test]
    async fn test_healthy_to_unhealthy_notifies() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::stepping(1_000, 10));
        let checker = ScriptedChecker::new(clock.clone()).script(&[
            HealthStatus::Healthy,
            HealthStatus::Unhealthy,
            HealthStatus::Unhealthy,
            HealthStatus::Unknown,
            HealthStatus::Unhealthy,
        ]);
        let (store, _, monitor) = setup(checker, clock);
        let endpoint = add(&store, "payments");
        let mut rx = monitor.subscribe();

        monitor.check_all().await;
        monitor.check_all().await;
        let change = rx.try_recv().unwrap();
        assert_eq!(change.endpoint_name, "payments");
        assert_eq!(change.endpoint_id, endpoint.id);
        assert_eq!(change.from, HealthStatus::Healthy);
        assert_eq!(change.to, HealthStatus::Unhealthy);

        // Unhealthy → Unhealthy and Unknown → Unhealthy stay quiet.
        monitor.check_all().await;
        monitor.check_all().await;
        monitor.check_all().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_notifications_respect_settings() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::stepping(1_000, 10));
        let checker = ScriptedChecker::new(clock.clone()).script(&[HealthStatus::Healthy, HealthStatus::Unhealthy]);
        let (store, _, monitor) = setup(checker, clock);
        add(&store, "api");
        store
            .update_settings(&SettingsUpdate {
                notifications_enabled: Some(false),
                ..Default::default()
            })
            .unwrap();
        let mut rx = monitor.subscribe();

        monitor.check_all().await;
        monitor.check_all().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_manual_check_skipped_while_in_flight() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::stepping(1_000, 10));
        let gate = Arc::new(Semaphore::new(0));
        let (store, checker, monitor) = setup(ScriptedChecker::gated(clock.clone(), gate.clone()), clock);
        let endpoint = add(&store, "api");

        let running = tokio::spawn({
            let monitor = monitor.clone();
            async move { monitor.check_all().await }
        });
        checker.started.notified().await;

        let outcome = monitor.check_endpoint(&endpoint.id).await.unwrap();
        assert_eq!(outcome, CheckOutcome::Skipped);

        gate.add_permits(1);
        let summary = running.await.unwrap();
        assert_eq!(summary.checked, 1);
        assert_eq!(checker.calls(), 1);
        assert_eq!(checker.max_active.load(Ordering::SeqCst), 1);

        // The guard is released once the check completes.
        gate.add_permits(1);
        let outcome = monitor.check_endpoint(&endpoint.id).await.unwrap();
        assert!(matches!(outcome, CheckOutcome::Checked(_)));
    }

    #[tokio::test]
    async fn test_delete_mid_check_does_not_resurrect() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::stepping(1_000, 10));
        let gate = Arc::new(Semaphore::new(0));
        let (store, checker, monitor) = setup(ScriptedChecker::gated(clock.clone(), gate.clone()), clock);
        let endpoint = add(&store, "api");

        let running = tokio::spawn({
            let monitor = monitor.clone();
            let id = endpoint.id.clone();
            async move { monitor.check_endpoint(&id).await }
        });
        checker.started.notified().await;

        store.delete_endpoint(&endpoint.id).unwrap();
        gate.add_permits(1);

        assert_eq!(running.await.unwrap().unwrap(), CheckOutcome::Discarded);
        assert!(store.get_endpoint(&endpoint.id).unwrap().is_none());
        assert_eq!(store.history_len().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_discards_late_completion() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::stepping(1_000, 10));
        let gate = Arc::new(Semaphore::new(0));
        let (store, checker, monitor) = setup(ScriptedChecker::gated(clock.clone(), gate.clone()), clock);
        let endpoint = add(&store, "api");

        let running = tokio::spawn({
            let monitor = monitor.clone();
            let id = endpoint.id.clone();
            async move { monitor.check_endpoint(&id).await }
        });
        checker.started.notified().await;

        monitor.shutdown().await;
        gate.add_permits(1);

        assert_eq!(running.await.unwrap().unwrap(), CheckOutcome::Discarded);
        assert!(store.get_endpoint(&endpoint.id).unwrap().unwrap().last_check.is_none());
        assert_eq!(monitor.check_all().await, CycleSummary::default());
    }

    #[tokio::test]
    async fn test_check_endpoint_not_found() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(0));
        let (_, _, monitor) = setup(ScriptedChecker::new(clock.clone()), clock);
        assert!(matches!(
            monitor.check_endpoint("missing").await,
            Err(MonitorError::NotFound(_))
        ));
    }

    #[test]
    fn test_is_due_rounds_to_nearest_tick() {
        let mut endpoint = Endpoint {
            id: "a".to_string(),
            name: "a".to_string(),
            url: "http://example.com".to_string(),
            format: CheckFormat::PlainOkText,
            environment: Default::default(),
            group: None,
            description: None,
            check_interval_seconds: 120,
            timeout_ms: 1000,
            headers: Default::default(),
            public_visible: false,
            webhook_url: None,
            created_at: 0,
            updated_at: 0,
            last_check: None,
        };
        assert!(is_due(&endpoint, 0, 60_000));

        endpoint.last_check = Some(CheckResult {
            status: HealthStatus::Healthy,
            latency_ms: 250,
            timestamp: 250,
            dependencies: None,
            error: None,
        });
        assert!(!is_due(&endpoint, 60_000, 60_000));
        assert!(is_due(&endpoint, 120_000, 60_000));

        endpoint.check_interval_seconds = 60;
        assert!(is_due(&endpoint, 60_000, 60_000));

        // Out-of-range intervals saturate instead of overflowing.
        endpoint.check_interval_seconds = 10_000_000_000_000_000;
        assert!(!is_due(&endpoint, 60_000, 60_000));
        assert!(!is_due(&endpoint, i64::MAX / 2, 60_000));
    }

    #[tokio::test]
    async fn test_same_millisecond_checks_keep_history_increasing() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(5_000));
        let (store, _, monitor) = setup(ScriptedChecker::new(clock.clone()), clock);
        let endpoint = add(&store, "api");

        for _ in 0..3 {
            assert_eq!(monitor.check_all().await.checked, 1);
        }

        let timestamps: Vec<i64> = store
            .endpoint_history(&endpoint.id, 10)
            .unwrap()
            .iter()
            .map(|h| h.timestamp)
            .collect();
        assert_eq!(timestamps, vec![5_000, 5_001, 5_002]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_interval_is_capped_and_timer_keeps_running() {
        let clock: Arc<dyn Clock> = Arc::new(TokioClock { origin: Instant::now() });
        let (store, checker, monitor) = setup(ScriptedChecker::new(clock.clone()), clock);
        add(&store, "api");

        monitor.start(Duration::from_secs(60)).await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(checker.calls(), 1);

        monitor.reconfigure(Duration::from_secs(u64::MAX / 2)).await;
        assert_eq!(monitor.interval(), MAX_INTERVAL);
        tokio::time::sleep(Duration::from_secs(1)).await;

        let finished = monitor
            .timer
            .lock()
            .await
            .as_ref()
            .map(|t| t.task.is_finished());
        assert_eq!(finished, Some(false));

        monitor.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_start_reconfigure_stop() {
        let clock: Arc<dyn Clock> = Arc::new(TokioClock { origin: Instant::now() });
        let (store, checker, monitor) = setup(ScriptedChecker::new(clock.clone()), clock);
        let mut input = EndpointInput::new("api", "http://example.com", CheckFormat::PlainOkText);
        input.check_interval_seconds = 10;
        store.add_endpoint(input).unwrap();

        // Immediate pass on activation.
        monitor.start(Duration::from_secs(60)).await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(checker.calls(), 1);

        // First tick at t=60.
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(checker.calls(), 2);

        // t=61: retime to 10s. No immediate extra pass; next tick at t=71.
        monitor.reconfigure(Duration::from_secs(10)).await;
        assert_eq!(monitor.interval(), Duration::from_secs(10));
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(checker.calls(), 2);
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(checker.calls(), 3);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(checker.calls(), 4);

        monitor.stop().await;
        assert!(!monitor.is_running().await);
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(checker.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_is_clamped_and_start_is_idempotent() {
        let clock: Arc<dyn Clock> = Arc::new(TokioClock { origin: Instant::now() });
        let (store, checker, monitor) = setup(ScriptedChecker::new(clock.clone()), clock);
        add(&store, "api");

        monitor.start(Duration::from_secs(1)).await;
        monitor.start(Duration::from_secs(1)).await;
        assert_eq!(monitor.interval(), MIN_INTERVAL);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(checker.calls(), 1);
        monitor.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_settings_change_retimes_monitor() {
        let clock: Arc<dyn Clock> = Arc::new(TokioClock { origin: Instant::now() });
        let (store, _, monitor) = setup(ScriptedChecker::new(clock.clone()), clock);

        monitor.start(Duration::from_secs(60)).await;
        let watcher = monitor.clone().watch_settings();

        store
            .update_settings(&SettingsUpdate {
                auto_refresh_interval_seconds: Some(30),
                ..Default::default()
            })
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(monitor.interval(), Duration::from_secs(30));
        assert!(monitor.is_running().await);

        monitor.shutdown().await;
        watcher.abort();
    }
}
