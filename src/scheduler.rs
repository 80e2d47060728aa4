//! Reconciliation Scheduler
//!
//! One [`Controller`] per kind and hierarchy. Each controller owns a
//! [`WorkQueue`] of object names fed by three sources:
//!
//! - watch events on its kind (optionally ignoring generation-preserving updates)
//! - a periodic re-list of every object of its kind
//! - delayed re-queues requested by reconcilers or caused by errors
//!
//! A fixed pool of workers drains the queue. The queue dedupes pending names
//! and never hands out a name that is already being processed, so one object
//! is never reconciled by two workers at once.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::StreamExt;
use graph_types::Hierarchy;
use tokio::sync::{watch, Notify};
use tokio::task::JoinSet;
use tokio::time::interval;
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

use crate::config::ControllerConfig;
use crate::controller::{Context, Reconciled, Reconciler};
use crate::error::ReconcileError;
use crate::store::{ChangeKind, Selector, WatchEvent};

// ── Work queue ──

#[derive(Default)]
struct QueueState {
    order: VecDeque<String>,
    /// Names waiting to be processed (queued, or re-added while processing).
    dirty: HashSet<String>,
    processing: HashSet<String>,
    shut_down: bool,
}

/// Deduplicating queue with per-name exclusivity.
#[derive(Default)]
pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl WorkQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add(&self, name: &str) {
        let mut state = self.lock();
        if state.shut_down || !state.dirty.insert(name.to_string()) {
            return;
        }
        // A name being processed is re-queued by `done`.
        if state.processing.contains(name) {
            return;
        }
        state.order.push_back(name.to_string());
        drop(state);
        self.notify.notify_one();
    }

    pub fn add_after(self: &Arc<Self>, name: &str, delay: Duration) {
        let queue = Arc::clone(self);
        let name = name.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(&name);
        });
    }

    /// Next name to process, or `None` once shut down and drained.
    pub async fn get(&self) -> Option<String> {
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.lock();
                if let Some(name) = state.order.pop_front() {
                    state.dirty.remove(&name);
                    state.processing.insert(name.clone());
                    return Some(name);
                }
                if state.shut_down {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Mark `name` finished; re-queue it if it was added meanwhile.
    pub fn done(&self, name: &str) {
        let mut state = self.lock();
        state.processing.remove(name);
        if state.dirty.contains(name) {
            state.order.push_back(name.to_string());
            drop(state);
            self.notify.notify_one();
        }
    }

    pub fn shut_down(&self) {
        self.lock().shut_down = true;
        self.notify.notify_waiters();
    }

    pub fn len(&self) -> usize {
        self.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ── Controller ──

/// Control loop for one kind in one hierarchy.
pub struct Controller {
    reconciler: Arc<dyn Reconciler>,
    hierarchy: Hierarchy,
    ctx: Context,
    config: ControllerConfig,
    queue: Arc<WorkQueue>,
}

impl Controller {
    pub fn new(reconciler: Arc<dyn Reconciler>, hierarchy: Hierarchy, ctx: Context) -> Self {
        let config = ctx.config.controller(reconciler.kind());
        Self {
            reconciler,
            hierarchy,
            ctx,
            config,
            queue: WorkQueue::new(),
        }
    }

    pub fn queue(&self) -> Arc<WorkQueue> {
        self.queue.clone()
    }

    /// Run until `shutdown` flips to true, then drain in-flight work.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let kind = self.reconciler.kind();
        info!(
            kind = %kind.display_name(self.hierarchy),
            workers = self.config.workers,
            resync_secs = self.config.resync_secs,
            "Controller started"
        );

        let mut workers = JoinSet::new();
        for _ in 0..self.config.workers.max(1) {
            let this = Arc::clone(&self);
            workers.spawn(async move { this.work().await });
        }

        let mut events = self.ctx.store.watch(kind);
        // First tick fires immediately and performs the initial list.
        let mut resync = interval(Duration::from_secs(self.config.resync_secs.max(1)));

        loop {
            tokio::select! {
                _ = resync.tick() => self.enqueue_all().await,
                event = events.next() => match event {
                    Some(Ok(event)) => self.on_event(event),
                    Some(Err(e)) => {
                        warn!(error = %e, "Watch interrupted, re-listing");
                        self.enqueue_all().await;
                    }
                    None => {
                        warn!("Watch stream closed");
                        break;
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.queue.shut_down();
        while workers.join_next().await.is_some() {}
        info!(kind = %kind.display_name(self.hierarchy), "Controller stopped");
    }

    fn on_event(&self, event: WatchEvent) {
        if event.key.hierarchy != self.hierarchy {
            return;
        }
        if self.config.generation_filter
            && event.change == ChangeKind::Updated
            && !event.generation_changed
        {
            trace!(object = %event.key, "Ignoring status-only update");
            return;
        }
        self.queue.add(&event.key.name);
    }

    async fn enqueue_all(&self) {
        let kind = self.reconciler.kind();
        match self
            .ctx
            .store
            .list(kind, self.hierarchy, &Selector::all())
            .await
        {
            Ok(objects) => {
                for object in objects {
                    self.queue.add(&object.meta().name);
                }
            }
            Err(e) => error!(error = %e, "Re-list failed"),
        }
    }

    async fn work(&self) {
        while let Some(name) = self.queue.get().await {
            if let Some(delay) = self.process(&name).await {
                self.queue.add_after(&name, delay);
            }
            self.queue.done(&name);
        }
    }

    /// Reconcile one object; returns the delay before it should be looked at again.
    async fn process(&self, name: &str) -> Option<Duration> {
        let backoff = self.ctx.config.error_backoff();
        match reconcile_once(&self.ctx, self.reconciler.as_ref(), self.hierarchy, name).await {
            Ok(reconciled) => reconciled.requeue_after,
            Err(e) if e.is_not_found() => {
                debug!(name, "Object gone");
                None
            }
            Err(e) if e.is_retryable() => {
                warn!(name, error = %e, "Reconcile failed, retrying");
                Some(backoff)
            }
            Err(e) => {
                error!(name, error = %e, "Reconcile failed");
                Some(backoff)
            }
        }
    }
}

/// One bounded, traced reconcile call.
pub async fn reconcile_once(
    ctx: &Context,
    reconciler: &dyn Reconciler,
    hierarchy: Hierarchy,
    name: &str,
) -> Result<Reconciled, ReconcileError> {
    let timeout = ctx.config.reconcile_timeout();
    let span = info_span!(
        "reconcile",
        kind = %reconciler.kind().display_name(hierarchy),
        name = %name
    );
    tokio::time::timeout(timeout, reconciler.reconcile(ctx, hierarchy, name))
        .instrument(span)
        .await
        .unwrap_or(Err(ReconcileError::TimedOut(timeout)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_queue_dedupes_pending_names() {
        let queue = WorkQueue::new();
        queue.add("a");
        queue.add("a");
        queue.add("b");
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.get().await.as_deref(), Some("a"));
        assert_eq!(queue.get().await.as_deref(), Some("b"));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_queue_holds_back_names_in_flight() {
        let queue = WorkQueue::new();
        queue.add("a");
        let name = queue.get().await.unwrap();

        // Re-added while processing: not handed to another worker yet.
        queue.add("a");
        assert!(queue.is_empty());

        queue.done(&name);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.get().await.as_deref(), Some("a"));
        queue.done("a");
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_releases_waiting_workers() {
        let queue = WorkQueue::new();
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.get().await })
        };
        tokio::task::yield_now().await;
        queue.shut_down();
        assert_eq!(waiter.await.unwrap(), None);

        queue.add("late");
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_add_after_delays() {
        let queue = WorkQueue::new();
        queue.add_after("a", Duration::from_millis(20));
        assert!(queue.is_empty());

        let got = tokio::time::timeout(Duration::from_secs(5), queue.get())
            .await
            .unwrap();
        assert_eq!(got.as_deref(), Some("a"));
    }
}
