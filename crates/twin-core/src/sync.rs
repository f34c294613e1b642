//! Periodic synchronization of backend state into the engine.
//!
//! A [`SyncLoop`] runs at most one [`PollingSession`]. Each tick fetches a
//! snapshot scoped to the session's context and pushes one
//! [`EntityUpdate`](twin_types::EntityUpdate) per entity present, plus the
//! production line overview when the backend reports one.
//!
//! # Semantics
//!
//! - The first tick runs immediately, then one per interval.
//! - A failed fetch is logged and the loop keeps going.
//! - With no engine loaded the push is skipped; nothing is queued.
//! - Entities missing from a snapshot are left alone (absence is not
//!   deletion).
//! - [`SyncLoop::stop`] cancels future ticks. A fetch already in flight is
//!   allowed to finish, but its result is discarded.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use twin_types::ContextKey;

use crate::bridge::MessageBridge;
use crate::config::{MIN_SYNC_INTERVAL_MS, SyncConfig};
use crate::lock;
use crate::registry::SessionRegistry;
use crate::sources::SnapshotSource;

/// Errors returned when starting a polling session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    /// The requested interval is below the accepted minimum.
    #[error("sync interval {requested_ms}ms is below the {MIN_SYNC_INTERVAL_MS}ms minimum")]
    IntervalTooShort {
        /// Interval that was requested, in milliseconds.
        requested_ms: u128,
    },

    /// The context key is empty.
    #[error("context key must not be blank")]
    BlankContext,
}

/// Why a tick did not push anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The snapshot fetch failed.
    FetchFailed(String),
    /// No engine instance is loaded.
    EngineNotLoaded,
    /// The session was stopped while the fetch was in flight.
    Stopped,
}

/// Outcome of one tick.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TickSummary {
    /// Entities in the fetched snapshot.
    pub fetched: usize,
    /// Messages the engine accepted.
    pub pushed: usize,
    /// Why nothing was pushed, if so.
    pub skipped_reason: Option<SkipReason>,
}

/// Stop signal shared between a session handle and its task.
#[derive(Debug, Default)]
struct StopSignal {
    stopped: AtomicBool,
    notify: Notify,
}

impl StopSignal {
    fn stop(&self) -> bool {
        let was_running = !self.stopped.swap(true, Ordering::AcqRel);
        // notify_one stores a permit when the task is not waiting yet.
        self.notify.notify_one();
        was_running
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

/// One running poll: a context, an interval and the task driving it.
#[derive(Debug)]
pub struct PollingSession {
    context: ContextKey,
    interval: Duration,
    signal: Arc<StopSignal>,
    ticks: Arc<AtomicU64>,
    task: JoinHandle<()>,
}

impl PollingSession {
    /// Context the session polls for.
    pub const fn context(&self) -> &ContextKey {
        &self.context
    }

    /// Interval between ticks.
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Ticks completed so far.
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Acquire)
    }

    fn halt(&self) -> bool {
        self.signal.stop()
    }
}

impl Drop for PollingSession {
    fn drop(&mut self) {
        self.signal.stop();
    }
}

struct SyncInner {
    source: Arc<dyn SnapshotSource>,
    bridge: Arc<MessageBridge>,
    registry: Arc<SessionRegistry>,
}

/// Drives polling sessions.
pub struct SyncLoop {
    inner: Arc<SyncInner>,
    session: Mutex<Option<PollingSession>>,
}

impl SyncLoop {
    /// Create an idle loop.
    pub fn new(
        source: Arc<dyn SnapshotSource>,
        bridge: Arc<MessageBridge>,
        registry: Arc<SessionRegistry>,
    ) -> Self {
        Self {
            inner: Arc::new(SyncInner {
                source,
                bridge,
                registry,
            }),
            session: Mutex::new(None),
        }
    }

    /// Start polling `context` every `interval`.
    ///
    /// A running session is stopped first. The context command is sent
    /// when the key differs from the bridge's active context.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::IntervalTooShort`] or [`SyncError::BlankContext`].
    pub fn start(&self, context: ContextKey, interval: Duration) -> Result<(), SyncError> {
        if interval < Duration::from_millis(MIN_SYNC_INTERVAL_MS) {
            return Err(SyncError::IntervalTooShort {
                requested_ms: interval.as_millis(),
            });
        }
        if context.is_blank() {
            return Err(SyncError::BlankContext);
        }

        let mut slot = lock::lock(&self.session);
        if let Some(previous) = slot.take() {
            previous.halt();
            info!(context = %previous.context, "replacing polling session");
        }

        if self.inner.bridge.context().as_ref() != Some(&context) {
            self.inner.bridge.set_context(context.clone());
        }

        let signal = Arc::new(StopSignal::default());
        let ticks = Arc::new(AtomicU64::new(0));
        let task = tokio::spawn(run_session(
            Arc::clone(&self.inner),
            context.clone(),
            interval,
            Arc::clone(&signal),
            Arc::clone(&ticks),
        ));

        info!(
            context = %context,
            interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
            "polling session started"
        );
        *slot = Some(PollingSession {
            context,
            interval,
            signal,
            ticks,
            task,
        });
        Ok(())
    }

    /// Start from configuration.
    ///
    /// # Errors
    ///
    /// Same as [`SyncLoop::start`].
    pub fn start_with(&self, config: &SyncConfig) -> Result<(), SyncError> {
        self.start(ContextKey::new(config.context_key.as_str()), config.interval())
    }

    /// Stop the running session, if any. Idempotent.
    ///
    /// Returns whether a session was running.
    pub fn stop(&self) -> bool {
        let Some(session) = lock::lock(&self.session).take() else {
            return false;
        };
        let stopped = session.halt();
        info!(context = %session.context, ticks = session.ticks(), "polling session stopped");
        stopped
    }

    /// Whether a session is running.
    pub fn is_running(&self) -> bool {
        lock::lock(&self.session)
            .as_ref()
            .is_some_and(|s| !s.task.is_finished())
    }

    /// Context of the running session.
    pub fn context(&self) -> Option<ContextKey> {
        lock::lock(&self.session).as_ref().map(|s| s.context.clone())
    }

    /// Interval of the running session.
    pub fn interval(&self) -> Option<Duration> {
        lock::lock(&self.session).as_ref().map(PollingSession::interval)
    }

    /// Run one tick for `context` outside any session.
    pub async fn tick_once(&self, context: &ContextKey) -> TickSummary {
        let signal = StopSignal::default();
        self.inner.tick(context, &signal).await
    }
}

impl std::fmt::Debug for SyncLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncLoop")
            .field("session", &*lock::lock(&self.session))
            .finish_non_exhaustive()
    }
}

async fn run_session(
    inner: Arc<SyncInner>,
    context: ContextKey,
    interval: Duration,
    signal: Arc<StopSignal>,
    ticks: Arc<AtomicU64>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = signal.notify.notified() => break,
            _ = ticker.tick() => {}
        }
        if signal.is_stopped() {
            break;
        }
        inner.tick(&context, &signal).await;
        ticks.fetch_add(1, Ordering::AcqRel);
    }

    debug!(context = %context, "polling task exited");
}

impl SyncInner {
    async fn tick(&self, context: &ContextKey, signal: &StopSignal) -> TickSummary {
        let fetched = self.source.fetch_snapshot(context).await;

        if signal.is_stopped() {
            debug!(context = %context, "session stopped during fetch, snapshot discarded");
            return TickSummary {
                skipped_reason: Some(SkipReason::Stopped),
                ..TickSummary::default()
            };
        }

        let snapshot = match fetched {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(context = %context, error = %e, "snapshot fetch failed");
                return TickSummary {
                    skipped_reason: Some(SkipReason::FetchFailed(e.to_string())),
                    ..TickSummary::default()
                };
            }
        };

        let mut summary = TickSummary {
            fetched: snapshot.entity_count(),
            ..TickSummary::default()
        };

        if !self.registry.is_loaded() {
            summary.skipped_reason = Some(SkipReason::EngineNotLoaded);
            debug!(context = %context, fetched = summary.fetched, "engine not loaded, push skipped");
            return summary;
        }

        for update in snapshot.to_updates(Utc::now()) {
            if self.bridge.send_update(&update) {
                summary.pushed = summary.pushed.saturating_add(1);
            }
        }
        if let Some(line_status) = snapshot.line_status.as_ref().filter(|v| !v.is_null())
            && self.bridge.send_production_data(line_status)
        {
            summary.pushed = summary.pushed.saturating_add(1);
        }

        debug!(
            context = %context,
            fetched = summary.fetched,
            pushed = summary.pushed,
            "sync tick complete"
        );
        summary
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use twin_types::{ContainerId, Rect};

    use super::*;
    use crate::engine::EngineHandle;
    use crate::sources::{BackendSnapshot, SourceError};
    use crate::surface::{Layout, SharedLayout};
    use crate::testing::{RecordingEngine, ScriptedSnapshots};

    const INTERVAL: Duration = Duration::from_millis(3000);

    struct Fixture {
        registry: Arc<SessionRegistry>,
        source: Arc<ScriptedSnapshots>,
        sync: SyncLoop,
    }

    fn fixture(source: ScriptedSnapshots) -> Fixture {
        let layout = Arc::new(SharedLayout::new());
        layout.set(ContainerId::new("canvasA"), Rect::new(0.0, 0.0, 800.0, 600.0));
        let registry = Arc::new(SessionRegistry::new(layout as Arc<dyn Layout>));
        let bridge = Arc::new(MessageBridge::new(Arc::clone(&registry), "GameManager"));
        let source = Arc::new(source);
        let sync = SyncLoop::new(
            Arc::clone(&source) as Arc<dyn SnapshotSource>,
            bridge,
            Arc::clone(&registry),
        );
        Fixture {
            registry,
            source,
            sync,
        }
    }

    fn load_engine(registry: &SessionRegistry) -> Arc<RecordingEngine> {
        let engine = Arc::new(RecordingEngine::new());
        registry.set(EngineHandle::new(Arc::clone(&engine) as _), &ContainerId::new("canvasA"));
        engine
    }

    fn snapshot(value: serde_json::Value) -> BackendSnapshot {
        serde_json::from_value(value).unwrap()
    }

    fn ctx(key: &str) -> ContextKey {
        ContextKey::new(key)
    }

    #[tokio::test]
    async fn absent_entities_are_not_deleted() {
        let f = fixture(ScriptedSnapshots::new());
        let engine = load_engine(&f.registry);
        f.source
            .push(Ok(snapshot(json!({"robots": {"R1": {"status": "active"}}}))));
        f.source.push(Ok(snapshot(json!({}))));

        let first = f.sync.tick_once(&ctx("1")).await;
        assert_eq!(first.fetched, 1);
        assert_eq!(first.pushed, 1);
        assert_eq!(engine.methods(), vec!["UpdateRobotStatus"]);

        let second = f.sync.tick_once(&ctx("1")).await;
        assert_eq!(second, TickSummary::default());
        assert_eq!(engine.delivered().len(), 1, "no removal message for R1");
    }

    #[tokio::test]
    async fn line_status_goes_to_production_data() {
        let f = fixture(ScriptedSnapshots::new());
        let engine = load_engine(&f.registry);
        f.source.push(Ok(snapshot(json!({
            "stations": {"DoorStation": {"status": "OPERATING"}},
            "lineStatus": {"lineId": "LINE_A", "status": "OPERATING"}
        }))));

        let summary = f.sync.tick_once(&ctx("1")).await;
        assert_eq!(summary.pushed, 2);
        assert_eq!(engine.methods(), vec!["UpdateStationStatus", "UpdateProductionData"]);
    }

    #[tokio::test]
    async fn unloaded_engine_skips_push_without_queueing() {
        let f = fixture(ScriptedSnapshots::new());
        f.source
            .push(Ok(snapshot(json!({"robots": {"R1": {"status": "active"}}}))));

        let summary = f.sync.tick_once(&ctx("1")).await;
        assert_eq!(summary.skipped_reason, Some(SkipReason::EngineNotLoaded));
        assert_eq!(summary.fetched, 1);

        let engine = load_engine(&f.registry);
        let summary = f.sync.tick_once(&ctx("1")).await;
        assert_eq!(summary.fetched, 0);
        assert!(engine.delivered().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn first_tick_is_immediate() {
        let f = fixture(ScriptedSnapshots::new());
        f.sync.start(ctx("1"), INTERVAL).unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(f.source.fetches(), 1);

        tokio::time::sleep(INTERVAL).await;
        assert_eq!(f.source.fetches(), 2);
        assert!(f.sync.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_failure_does_not_stop_the_loop() {
        let f = fixture(ScriptedSnapshots::new());
        let engine = load_engine(&f.registry);
        f.source
            .push(Err(SourceError::Request("connection refused".to_owned())));
        f.source
            .set_fallback(snapshot(json!({"robots": {"R1": {"status": "active"}}})));

        f.sync.start(ctx("1"), INTERVAL).unwrap();
        tokio::time::sleep(Duration::from_millis(3_100)).await;

        assert_eq!(f.source.fetches(), 2);
        assert_eq!(engine.methods(), vec!["SetContext", "UpdateRobotStatus"]);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_discards_in_flight_fetch() {
        let f = fixture(ScriptedSnapshots::new().with_delay(Duration::from_millis(500)));
        let engine = load_engine(&f.registry);
        f.source
            .set_fallback(snapshot(json!({"robots": {"R1": {"status": "active"}}})));

        f.sync.start(ctx("1"), INTERVAL).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(f.source.fetches(), 1, "fetch is in flight");

        assert!(f.sync.stop());
        assert!(!f.sync.stop(), "second stop is a no-op");
        assert!(!f.sync.is_running());

        tokio::time::sleep(Duration::from_millis(9_000)).await;
        assert_eq!(f.source.fetches(), 1, "no ticks after stop");
        assert_eq!(engine.methods(), vec!["SetContext"]);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_replaces_session_and_sends_new_context() {
        let f = fixture(ScriptedSnapshots::new());
        let engine = load_engine(&f.registry);

        f.sync.start(ctx("1"), INTERVAL).unwrap();
        f.sync.start(ctx("1"), INTERVAL).unwrap();
        f.sync.start(ctx("2"), INTERVAL).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let contexts: Vec<String> = engine
            .delivered()
            .iter()
            .filter(|m| m.method == "SetContext")
            .map(|m| m.payload.clone())
            .collect();
        assert_eq!(
            contexts,
            vec![r#"{"contextKey":"1"}"#, r#"{"contextKey":"2"}"#]
        );
        assert_eq!(f.sync.context(), Some(ctx("2")));
        assert_eq!(f.source.contexts().last(), Some(&ctx("2")));
    }

    #[tokio::test]
    async fn start_validates_arguments() {
        let f = fixture(ScriptedSnapshots::new());
        assert_eq!(
            f.sync.start(ctx("1"), Duration::from_millis(10)),
            Err(SyncError::IntervalTooShort { requested_ms: 10 })
        );
        assert_eq!(f.sync.start(ctx("  "), INTERVAL), Err(SyncError::BlankContext));
        assert!(!f.sync.is_running());
    }
}
