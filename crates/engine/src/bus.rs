// SPDX-License-Identifier: MIT

//! The event bus (spec.md §4.1): persist-then-dispatch over the event log,
//! typed subscriptions, bounded retries for publishes whose loss would
//! break the pipeline.
//!
//! Replaces the teacher's dynamic method-receiver dispatch with a
//! registry (spec.md §9): `subscribe` stores a typed closure per
//! `event_type` name; `dispatch` looks it up by `Event::name()`. Each
//! subscription owns a dedicated worker task draining an unbounded
//! channel, so handler invocations are serialised per subscription while
//! distinct subscriptions run concurrently with each other and with the
//! publisher. A handler is run inside its own `tokio::spawn`, so a panic
//! inside it only fails that one invocation — the worker loop observes a
//! `JoinError`, logs it, and moves on to the next event.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use healarr_core::{AggregateId, AggregateType, Clock, Event, EventType};
use healarr_storage::{CorruptionStatus, EventDraft, MaterializedState, StorageError, Wal};

use crate::error::EngineError;
use crate::shutdown::Shutdown;

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type Handler = Arc<dyn Fn(Event) -> BoxFuture + Send + Sync>;

/// Events whose loss would break the pipeline (spec.md §4.1) and must go
/// through [`EventBus::publish_with_retry`] rather than plain `publish`.
pub fn is_critical(event_type: &EventType) -> bool {
    matches!(
        event_type,
        EventType::DeletionCompleted { .. }
            | EventType::SearchCompleted { .. }
            | EventType::VerificationSuccess { .. }
            | EventType::VerificationFailed { .. }
            | EventType::FileDetected { .. }
    ) || event_type.is_terminal()
}

struct Subscription {
    tx: mpsc::UnboundedSender<Event>,
}

/// In-process pub/sub over the append-only event log. Owns the log and its
/// folded projection; every mutation goes through `publish`/`publish_with_retry`.
pub struct EventBus<C: Clock> {
    wal: Mutex<Wal>,
    state: RwLock<MaterializedState>,
    subscribers: RwLock<HashMap<&'static str, Vec<Subscription>>>,
    shutdown: Shutdown,
    clock: C,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<C: Clock> EventBus<C> {
    pub fn new(wal: Wal, state: MaterializedState, clock: C) -> Arc<Self> {
        Arc::new(Self {
            wal: Mutex::new(wal),
            state: RwLock::new(state),
            subscribers: RwLock::new(HashMap::new()),
            shutdown: Shutdown::new(),
            clock,
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn shutdown_signal(&self) -> Shutdown {
        self.shutdown.clone()
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Events appended since the WAL's last flush — see
    /// [`healarr_storage::Wal::unflushed_count`]. Read by the health
    /// monitor's "database pool exhausted" analogue (spec.md §4.6).
    pub fn wal_backlog(&self) -> usize {
        self.wal.lock().unflushed_count()
    }

    /// Cheap storage reachability probe (spec.md §6's `GetHealthStatus`):
    /// true if the WAL's backing file can still be stat'd, false if it has
    /// gone missing or the underlying filesystem has become unreachable.
    pub fn storage_reachable(&self) -> bool {
        self.wal.lock().probe().is_ok()
    }

    /// Append durably, fold into the projection, then dispatch. Fails only
    /// when the durable append itself fails (spec.md §4.1).
    pub async fn publish(
        &self,
        aggregate_type: AggregateType,
        aggregate_id: AggregateId,
        event_type: EventType,
    ) -> Result<Event, EngineError> {
        let event = self.append(aggregate_type, aggregate_id, event_type)?;
        self.dispatch(&event);
        Ok(event)
    }

    /// Retries the durable append with bounded exponential backoff
    /// (3 attempts, 100/200/400 ms per spec.md §4.1); dispatch happens once,
    /// after the append that finally succeeds.
    pub async fn publish_with_retry(
        &self,
        aggregate_type: AggregateType,
        aggregate_id: AggregateId,
        event_type: EventType,
    ) -> Result<Event, EngineError> {
        let delays = [Duration::from_millis(100), Duration::from_millis(200), Duration::from_millis(400)];
        let last_attempt = delays.len() - 1;
        for (attempt, delay) in delays.iter().enumerate() {
            match self.append(aggregate_type, aggregate_id, event_type.clone()) {
                Ok(event) => {
                    self.dispatch(&event);
                    return Ok(event);
                }
                Err(err) => {
                    tracing::warn!(attempt, error = %err, "durable append failed, retrying");
                    if attempt == last_attempt {
                        return Err(EngineError::PublishExhausted(err));
                    }
                    tokio::time::sleep(*delay).await;
                }
            }
        }
        unreachable!("delays is non-empty, loop always returns on its last iteration")
    }

    /// [`Self::publish_with_retry`], but instead of handing
    /// `EngineError::PublishExhausted` back to the caller to be silently
    /// dropped, degrades: logs the failure and emits `SystemHealthDegraded`
    /// on the same aggregate via a single plain `publish` (never itself
    /// retried, so a degradation notice can't recurse into another retry
    /// loop). Returns `None` in that case so callers can still tell whether
    /// the original event actually landed (spec.md §7: "Database fatal...
    /// publish `SystemHealthDegraded` where possible, do not crash the
    /// process").
    pub async fn publish_with_retry_or_degrade(
        &self,
        aggregate_type: AggregateType,
        aggregate_id: AggregateId,
        event_type: EventType,
    ) -> Option<Event> {
        let name = event_type.name();
        match self.publish_with_retry(aggregate_type, aggregate_id, event_type).await {
            Ok(event) => Some(event),
            Err(EngineError::PublishExhausted(err)) => {
                tracing::error!(
                    aggregate_id = %aggregate_id,
                    event_type = name,
                    error = %err,
                    "durable append exhausted its retries, degrading instead of losing the event"
                );
                let _ = self
                    .publish(
                        aggregate_type,
                        aggregate_id,
                        EventType::SystemHealthDegraded {
                            reason: "publish_exhausted".into(),
                            detail: Some(format!("failed to persist {name}: {err}")),
                        },
                    )
                    .await;
                None
            }
            Err(EngineError::Storage(_)) => None,
        }
    }

    fn append(
        &self,
        aggregate_type: AggregateType,
        aggregate_id: AggregateId,
        event_type: EventType,
    ) -> Result<Event, StorageError> {
        let draft = EventDraft::new(aggregate_type, aggregate_id, event_type);
        let mut wal = self.wal.lock();
        let event = wal.append(draft, Utc::now())?;
        if wal.needs_flush() {
            wal.flush()?;
        }
        self.state.write().apply(&event);
        Ok(event)
    }

    fn dispatch(&self, event: &Event) {
        let subscribers = self.subscribers.read();
        if let Some(subs) = subscribers.get(event.name()) {
            for sub in subs {
                // Best-effort: a full/closed channel never blocks persistence.
                let _ = sub.tx.send(event.clone());
            }
        }
    }

    /// Register `handler` to run, serially with respect to other events on
    /// this same subscription, for every event whose `name()` is `event_type`.
    pub fn subscribe<F, Fut>(self: &Arc<Self>, event_type: &'static str, handler: F)
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |event| Box::pin(handler(event)) as BoxFuture);
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.write().entry(event_type).or_default().push(Subscription { tx });

        let shutdown = self.shutdown.clone();
        let task = tokio::spawn(subscriber_loop(rx, handler, shutdown));
        self.tasks.lock().push(task);
    }

    pub fn status(&self, aggregate_id: &AggregateId) -> Option<CorruptionStatus> {
        self.state.read().status(aggregate_id).cloned()
    }

    pub fn with_state<R>(&self, f: impl FnOnce(&MaterializedState) -> R) -> R {
        f(&self.state.read())
    }

    /// A point-in-time `(wal_seq, projection)` pair suitable for writing a
    /// snapshot: the sequence the projection is caught up to, so recovery
    /// knows to replay only what comes after it (spec.md §4.6's
    /// crash-recovery sweep).
    pub fn snapshot_state(&self) -> (u64, MaterializedState) {
        let seq = self.wal.lock().write_seq();
        let state = self.state.read().clone();
        (seq, state)
    }

    /// Close the shutdown signal and join every subscriber worker task.
    pub async fn shutdown(&self) {
        self.shutdown.trigger();
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            let _ = task.await;
        }
    }
}

async fn subscriber_loop(mut rx: mpsc::UnboundedReceiver<Event>, handler: Handler, shutdown: Shutdown) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                // Drain whatever is already queued before exiting so a
                // shutdown racing a publish doesn't silently drop events.
                while let Ok(event) = rx.try_recv() {
                    run_handler(&handler, event).await;
                }
                break;
            }
            maybe_event = rx.recv() => {
                match maybe_event {
                    Some(event) => run_handler(&handler, event).await,
                    None => break,
                }
            }
        }
    }
}

async fn run_handler(handler: &Handler, event: Event) {
    let handler = handler.clone();
    let name = event.name();
    if let Err(join_err) = tokio::spawn(async move { (handler)(event).await }).await {
        tracing::error!(event_type = name, error = %join_err, "event handler panicked");
    }
}

#[cfg(test)]
#[path = "bus_tests.rs"]
mod tests;
