//! In-memory fakes for the engine and backend seams.
//!
//! Compiled for this crate's tests and, through the `test-support` feature,
//! for downstream crates' tests.

#![allow(clippy::missing_panics_doc)]

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use twin_types::{ContainerId, ContextKey, EntityId, EntityKind};

use crate::bridge::{InboundPort, OutboundMessage};
use crate::engine::{
    Artifact, ArtifactFetcher, EngineError, EngineFactory, EngineInstance, FetchError,
    LoadedArtifacts,
};
use crate::lock;
use crate::progress::ProgressSink;
use crate::sources::{BackendSnapshot, DetailSource, SnapshotSource, SourceError};

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Engine instance that records every call.
#[derive(Debug, Default)]
pub struct RecordingEngine {
    delivered: Mutex<Vec<OutboundMessage>>,
    resizes: Mutex<Vec<(u32, u32)>>,
    inbound: Mutex<Option<InboundPort>>,
    resumes: AtomicUsize,
    quits: AtomicUsize,
    fail_delivery: AtomicBool,
}

impl RecordingEngine {
    /// Create an engine with no recorded calls.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent deliveries fail (or succeed again).
    pub fn set_fail_delivery(&self, fail: bool) {
        self.fail_delivery.store(fail, Ordering::SeqCst);
    }

    /// Every delivered message, in delivery order.
    pub fn delivered(&self) -> Vec<OutboundMessage> {
        lock::lock(&self.delivered).clone()
    }

    /// Method names of every delivered message.
    pub fn methods(&self) -> Vec<String> {
        lock::lock(&self.delivered).iter().map(|m| m.method.clone()).collect()
    }

    /// Forget delivered messages.
    pub fn clear_delivered(&self) {
        lock::lock(&self.delivered).clear();
    }

    /// Every resize, in order.
    pub fn resizes(&self) -> Vec<(u32, u32)> {
        lock::lock(&self.resizes).clone()
    }

    /// Inbound port installed by the loader.
    pub fn inbound(&self) -> Option<InboundPort> {
        lock::lock(&self.inbound).clone()
    }

    /// Number of resume calls.
    pub fn resume_count(&self) -> usize {
        self.resumes.load(Ordering::SeqCst)
    }

    /// Number of quit calls.
    pub fn quit_count(&self) -> usize {
        self.quits.load(Ordering::SeqCst)
    }
}

impl EngineInstance for RecordingEngine {
    fn bind_inbound(&self, port: InboundPort) {
        *lock::lock(&self.inbound) = Some(port);
    }

    fn deliver(&self, message: &OutboundMessage) -> Result<(), EngineError> {
        if self.fail_delivery.load(Ordering::SeqCst) {
            return Err(EngineError::Delivery("receiver not ready".to_owned()));
        }
        lock::lock(&self.delivered).push(message.clone());
        Ok(())
    }

    fn resize(&self, width: u32, height: u32) -> Result<(), EngineError> {
        lock::lock(&self.resizes).push((width, height));
        Ok(())
    }

    fn resume(&self) -> Result<(), EngineError> {
        self.resumes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn quit(&self) -> BoxFuture<'static, Result<(), EngineError>> {
        self.quits.fetch_add(1, Ordering::SeqCst);
        async { Ok(()) }.boxed()
    }
}

/// Factory producing [`RecordingEngine`]s.
#[derive(Debug, Default)]
pub struct RecordingFactory {
    fail: bool,
    instantiations: AtomicUsize,
    last: Arc<Mutex<Option<Arc<RecordingEngine>>>>,
}

impl RecordingFactory {
    /// Create a factory that always succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every instantiation fail.
    #[must_use]
    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    /// Number of instantiate calls.
    pub fn instantiations(&self) -> usize {
        self.instantiations.load(Ordering::SeqCst)
    }

    /// The most recently created engine.
    pub fn last_engine(&self) -> Option<Arc<RecordingEngine>> {
        lock::lock(&self.last).clone()
    }
}

impl EngineFactory for RecordingFactory {
    fn instantiate(
        &self,
        _artifacts: Arc<LoadedArtifacts>,
        _surface: ContainerId,
        progress: ProgressSink,
    ) -> BoxFuture<'static, Result<Arc<dyn EngineInstance>, EngineError>> {
        self.instantiations.fetch_add(1, Ordering::SeqCst);
        let fail = self.fail;
        let last = Arc::clone(&self.last);
        async move {
            progress.report(0.5);
            if fail {
                return Err(EngineError::Instantiation("runtime aborted".to_owned()));
            }
            progress.report(1.0);
            let engine = Arc::new(RecordingEngine::new());
            *lock::lock(&last) = Some(Arc::clone(&engine));
            Ok(engine as Arc<dyn EngineInstance>)
        }
        .boxed()
    }
}

/// Fetcher returning each artifact's name as its bytes.
#[derive(Debug, Default)]
pub struct StaticFetcher {
    failing: Mutex<Option<String>>,
    delay: Duration,
    calls: AtomicUsize,
}

impl StaticFetcher {
    /// Create a fetcher that always succeeds immediately.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every fetch.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fail fetches of the artifact named `name`.
    #[must_use]
    pub fn failing(self, name: &str) -> Self {
        *lock::lock(&self.failing) = Some(name.to_owned());
        self
    }

    /// Stop failing.
    pub fn clear_failure(&self) {
        *lock::lock(&self.failing) = None;
    }

    /// Number of fetch calls.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ArtifactFetcher for StaticFetcher {
    fn fetch<'a>(&'a self, artifact: &'a Artifact) -> BoxFuture<'a, Result<Vec<u8>, FetchError>> {
        async move {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.calls.fetch_add(1, Ordering::SeqCst);
            if lock::lock(&self.failing).as_deref() == Some(artifact.name.as_str()) {
                return Err(FetchError("404 Not Found".to_owned()));
            }
            Ok(artifact.name.as_bytes().to_vec())
        }
        .boxed()
    }
}

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

/// Snapshot source replaying a script, then repeating its fallback.
#[derive(Debug, Default)]
pub struct ScriptedSnapshots {
    script: Mutex<VecDeque<Result<BackendSnapshot, SourceError>>>,
    fallback: Mutex<BackendSnapshot>,
    contexts: Mutex<Vec<ContextKey>>,
    delay: Duration,
}

impl ScriptedSnapshots {
    /// Create a source answering with an empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every fetch.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Queue one answer.
    pub fn push(&self, answer: Result<BackendSnapshot, SourceError>) {
        lock::lock(&self.script).push_back(answer);
    }

    /// Answer used once the script is exhausted.
    pub fn set_fallback(&self, snapshot: BackendSnapshot) {
        *lock::lock(&self.fallback) = snapshot;
    }

    /// Contexts requested so far, in order.
    pub fn contexts(&self) -> Vec<ContextKey> {
        lock::lock(&self.contexts).clone()
    }

    /// Number of fetches so far.
    pub fn fetches(&self) -> usize {
        lock::lock(&self.contexts).len()
    }
}

impl SnapshotSource for ScriptedSnapshots {
    fn fetch_snapshot<'a>(
        &'a self,
        context: &'a ContextKey,
    ) -> BoxFuture<'a, Result<BackendSnapshot, SourceError>> {
        async move {
            lock::lock(&self.contexts).push(context.clone());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let scripted = lock::lock(&self.script).pop_front();
            scripted.unwrap_or_else(|| Ok(lock::lock(&self.fallback).clone()))
        }
        .boxed()
    }
}

/// Detail source answering from a fixed table.
#[derive(Debug, Default)]
pub struct StaticDetails {
    records: Mutex<BTreeMap<(EntityKind, String), Value>>,
    failure: Mutex<Option<SourceError>>,
    delay: Duration,
    calls: AtomicUsize,
}

impl StaticDetails {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every fetch.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Add a record.
    #[must_use]
    pub fn with(self, kind: EntityKind, id: &str, record: Value) -> Self {
        lock::lock(&self.records).insert((kind, id.to_owned()), record);
        self
    }

    /// Fail every fetch with `error` until cleared.
    pub fn fail_with(&self, error: Option<SourceError>) {
        *lock::lock(&self.failure) = error;
    }

    /// Number of fetch calls.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl DetailSource for StaticDetails {
    fn fetch_detail<'a>(
        &'a self,
        kind: EntityKind,
        id: &'a EntityId,
    ) -> BoxFuture<'a, Result<Value, SourceError>> {
        async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if let Some(error) = lock::lock(&self.failure).clone() {
                return Err(error);
            }
            lock::lock(&self.records)
                .get(&(kind, id.as_str().to_owned()))
                .cloned()
                .ok_or(SourceError::Status { status: 404 })
        }
        .boxed()
    }
}
