//! Per-resource debounce and serialization
//!
//! Every unit of rebuild work is scheduled under a [`ResourceKey`]. For each
//! key the scheduler guarantees:
//!
//! - events arriving while the key is pending restart its debounce timer
//! - at most one action runs at a time
//! - an event arriving while the action runs marks the key dirty, and exactly
//!   one more cycle (debounce, then run) follows the current run
//! - every [`Ticket`] resolves once the run that covers it has finished
//!
//! Keys are independent: there is no ordering between different keys.
//! Actions read file state when they run, not when they were scheduled.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::{oneshot, Notify};

/// Work run for a key. Called afresh for every cycle.
pub type Action = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Whole-target keys, one per coarse unit of work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TargetKey {
    /// Full script build
    Scripts,
    /// Full stylesheet compilation
    Styles,
    /// CSS post-processing over the output tree
    PostProcess,
    /// Regeneration of the n-th stylesheet index
    StyleIndex(usize),
    /// Lint over the script sources
    Lint,
    /// Full image reconciliation
    Images,
}

/// What a unit of work is serialized on
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKey {
    Path(PathBuf),
    Target(TargetKey),
}

impl From<TargetKey> for ResourceKey {
    fn from(target: TargetKey) -> Self {
        ResourceKey::Target(target)
    }
}

impl std::fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceKey::Path(path) => write!(f, "{}", path.display()),
            ResourceKey::Target(TargetKey::StyleIndex(i)) => write!(f, "style-index[{}]", i),
            ResourceKey::Target(target) => write!(f, "{:?}", target),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Pending,
    Running,
}

struct Slot {
    state: SlotState,
    /// Bumped whenever the timer is re-armed; stale timers see a mismatch
    generation: u64,
    window: Duration,
    action: Action,
    waiters: Vec<oneshot::Sender<()>>,
    dirty: bool,
}

#[derive(Default)]
struct Inner {
    slots: Mutex<HashMap<ResourceKey, Slot>>,
    idle: Notify,
}

/// Resolves when the run covering a [`Scheduler::schedule`] call completes
#[must_use = "dropping a ticket does not cancel the work, but nothing waits for it"]
pub struct Ticket(oneshot::Receiver<()>);

impl Future for Ticket {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        // a dropped sender means the runtime is shutting down
        Pin::new(&mut self.0).poll(cx).map(|_| ())
    }
}

/// Shared handle to the per-key state
#[derive(Clone, Default)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("active", &self.inner.slots.lock().len())
            .finish()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `action` for `key` after `window` of quiet.
    ///
    /// The most recently scheduled action for a key is the one that runs.
    /// Must be called from within a Tokio runtime.
    pub fn schedule<F, Fut>(&self, key: impl Into<ResourceKey>, window: Duration, action: F) -> Ticket
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let action: Action = Arc::new(move || action().boxed());
        self.schedule_action(key.into(), window, action)
    }

    fn schedule_action(&self, key: ResourceKey, window: Duration, action: Action) -> Ticket {
        let (tx, rx) = oneshot::channel();
        let mut slots = self.inner.slots.lock();

        match slots.get_mut(&key) {
            Some(slot) => {
                slot.waiters.push(tx);
                slot.action = action;
                slot.window = window;
                match slot.state {
                    SlotState::Pending => {
                        slot.generation += 1;
                        self.arm(key, slot.generation, window);
                    }
                    SlotState::Running => {
                        tracing::trace!(key = %key, "event during run, marking dirty");
                        slot.dirty = true;
                    }
                }
            }
            None => {
                slots.insert(
                    key.clone(),
                    Slot {
                        state: SlotState::Pending,
                        generation: 0,
                        window,
                        action,
                        waiters: vec![tx],
                        dirty: false,
                    },
                );
                self.arm(key, 0, window);
            }
        }

        Ticket(rx)
    }

    fn arm(&self, key: ResourceKey, generation: u64, window: Duration) {
        let scheduler = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            scheduler.fire(key, generation).await;
        });
    }

    async fn fire(&self, key: ResourceKey, generation: u64) {
        let (action, waiters) = {
            let mut slots = self.inner.slots.lock();
            let slot = match slots.get_mut(&key) {
                Some(slot) => slot,
                None => return,
            };
            if slot.state != SlotState::Pending || slot.generation != generation {
                // superseded by a later event
                return;
            }
            slot.state = SlotState::Running;
            (Arc::clone(&slot.action), std::mem::take(&mut slot.waiters))
        };

        tracing::debug!(key = %key, "running");
        if AssertUnwindSafe(action()).catch_unwind().await.is_err() {
            tracing::error!(key = %key, "action panicked");
        }

        let went_idle = {
            let mut slots = self.inner.slots.lock();
            if let Some(slot) = slots.get_mut(&key).filter(|slot| slot.dirty) {
                slot.dirty = false;
                slot.state = SlotState::Pending;
                slot.generation += 1;
                self.arm(key.clone(), slot.generation, slot.window);
                false
            } else {
                slots.remove(&key);
                slots.is_empty()
            }
        };

        for waiter in waiters {
            let _ = waiter.send(());
        }
        if went_idle {
            self.inner.idle.notify_waiters();
        }
    }

    /// Whether `key` has no pending or running work.
    pub fn is_idle(&self, key: &ResourceKey) -> bool {
        !self.inner.slots.lock().contains_key(key)
    }

    /// Number of keys with pending or running work.
    pub fn active(&self) -> usize {
        self.inner.slots.lock().len()
    }

    /// Wait until no key has pending or running work.
    ///
    /// Work scheduled by a running action (e.g. a follow-up pass) is waited
    /// for as well.
    pub async fn settle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            if self.inner.slots.lock().is_empty() {
                return;
            }
            notified.await;
        }
    }
}
