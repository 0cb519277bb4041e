//! Priority-ordered admission of download work under a concurrency cap.
//!
//! # Overview
//!
//! [`DownloadScheduler`] admits opaque units of work keyed by identity. At
//! most one unit per key is scheduled or running at a time. Whenever a slot
//! may have opened, a scheduling pass:
//!
//! 1. re-queries every scheduled item's priority evaluator,
//! 2. orders items by priority, newest first within a priority,
//! 3. starts items while fewer than the limit are running.
//!
//! Only one pass runs at a time. Calls that arrive while a pass is running
//! are absorbed by it: the running pass keeps looping until nothing more
//! can start.
//!
//! Each started unit receives a [`Completion`]. Completing it, or dropping
//! it, frees the slot and triggers another pass, in the same way a
//! semaphore permit is released when it goes out of scope.
//!
//! # Locking
//!
//! Priority evaluators run while the scheduler's state lock is held. They
//! must not call back into the scheduler, and callers must not hold a lock
//! that an evaluator takes while calling scheduler methods or dropping a
//! [`Completion`].
//!
//! # Example
//!
//! ```
//! use imageloader_core::request::{Priority, QueuePriority};
//! use imageloader_core::scheduler::{Completion, DownloadScheduler};
//!
//! let scheduler = DownloadScheduler::new(Some(2));
//! scheduler.add(
//!     "a".to_string(),
//!     Box::new(|| QueuePriority::Preset(Priority::Normal)),
//!     Box::new(|completion: Completion<String>| completion.complete()),
//! );
//! assert_eq!(scheduler.stats().finished, 1);
//! ```

mod item;

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::{debug, trace};

pub use item::{PriorityEvaluator, StartUnit, UnitState};
use item::QueueItem;

/// Bounds required of scheduler keys.
pub trait SchedulerKey: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static {}

impl<T> SchedulerKey for T where T: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static {}

/// Counters and sizes captured at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Items waiting for a slot.
    pub scheduled: usize,
    /// Items currently holding a slot.
    pub running: usize,
    /// Units started since creation.
    pub started: usize,
    /// Units that completed normally.
    pub finished: usize,
    /// Units removed by [`DownloadScheduler::cancel`].
    pub canceled: usize,
}

/// Priority queue plus concurrency-bounded runner.
///
/// Cheap to clone; clones share the same queue.
pub struct DownloadScheduler<K: SchedulerKey> {
    inner: Arc<Inner<K>>,
}

impl<K: SchedulerKey> Clone for DownloadScheduler<K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<K: SchedulerKey> {
    limit: Option<usize>,
    state: Mutex<State<K>>,
    started: AtomicUsize,
    finished: AtomicUsize,
    canceled: AtomicUsize,
}

struct State<K: SchedulerKey> {
    scheduled: Vec<QueueItem<K>>,
    /// Running keys mapped to the ticket of the completion that owns the slot.
    running: HashMap<K, u64>,
    scheduling: bool,
    next_enqueued: u64,
    next_ticket: u64,
}

impl<K: SchedulerKey> DownloadScheduler<K> {
    /// Creates a scheduler running at most `limit` units at once.
    ///
    /// `None` means unbounded. A limit of zero never starts anything; the
    /// coordinator rejects it before it gets here.
    #[must_use]
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            inner: Arc::new(Inner {
                limit,
                state: Mutex::new(State {
                    scheduled: Vec::new(),
                    running: HashMap::new(),
                    scheduling: false,
                    next_enqueued: 0,
                    next_ticket: 0,
                }),
                started: AtomicUsize::new(0),
                finished: AtomicUsize::new(0),
                canceled: AtomicUsize::new(0),
            }),
        }
    }

    /// The concurrency limit.
    #[must_use]
    pub fn limit(&self) -> Option<usize> {
        self.inner.limit
    }

    /// Admits a unit of work for `key`.
    ///
    /// Returns `false` without touching the queue when `key` is already
    /// scheduled or running. Either way a scheduling pass follows.
    pub fn add(&self, key: K, evaluator: PriorityEvaluator, start: StartUnit<K>) -> bool {
        let admitted = {
            let mut state = self.inner.lock();
            if state.contains(&key) {
                trace!(key = ?key, "already admitted");
                false
            } else {
                let enqueued = state.next_enqueued;
                state.next_enqueued += 1;
                debug!(key = ?key, enqueued, "admitted");
                state.scheduled.push(QueueItem {
                    key,
                    evaluator,
                    start,
                    enqueued,
                });
                true
            }
        };
        schedule(&self.inner);
        admitted
    }

    /// Stops tracking `key`.
    ///
    /// A scheduled item is dropped. A running unit loses its slot; the work
    /// itself is not interrupted, and its later completion is ignored.
    /// Returns whether anything was removed.
    pub fn cancel(&self, key: &K) -> bool {
        let removed = {
            let mut state = self.inner.lock();
            if let Some(index) = state.scheduled.iter().position(|item| &item.key == key) {
                state.scheduled.remove(index);
                debug!(key = ?key, "canceled scheduled item");
                true
            } else if state.running.remove(key).is_some() {
                debug!(key = ?key, "canceled running item");
                true
            } else {
                false
            }
        };
        if removed {
            self.inner.canceled.fetch_add(1, Ordering::SeqCst);
            schedule(&self.inner);
        }
        removed
    }

    /// Where `key` is in its lifecycle, if admitted.
    #[must_use]
    pub fn state(&self, key: &K) -> Option<UnitState> {
        let state = self.inner.lock();
        if state.running.contains_key(key) {
            Some(UnitState::Running)
        } else if state.scheduled.iter().any(|item| &item.key == key) {
            Some(UnitState::Scheduled)
        } else {
            None
        }
    }

    /// Snapshot of queue sizes and counters.
    #[must_use]
    pub fn stats(&self) -> SchedulerStats {
        let (scheduled, running) = {
            let state = self.inner.lock();
            (state.scheduled.len(), state.running.len())
        };
        SchedulerStats {
            scheduled,
            running,
            started: self.inner.started.load(Ordering::SeqCst),
            finished: self.inner.finished.load(Ordering::SeqCst),
            canceled: self.inner.canceled.load(Ordering::SeqCst),
        }
    }
}

impl<K: SchedulerKey> fmt::Debug for DownloadScheduler<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadScheduler")
            .field("limit", &self.inner.limit)
            .field("stats", &self.stats())
            .finish()
    }
}

impl<K: SchedulerKey> Inner<K> {
    fn lock(&self) -> MutexGuard<'_, State<K>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<K: SchedulerKey> State<K> {
    fn contains(&self, key: &K) -> bool {
        self.running.contains_key(key) || self.scheduled.iter().any(|item| &item.key == key)
    }

    fn has_capacity(&self, limit: Option<usize>) -> bool {
        limit.is_none_or(|limit| self.running.len() < limit)
    }

    /// Orders scheduled items and moves as many as fit into `running`.
    fn take_runnable(&mut self, inner: &Arc<Inner<K>>) -> Vec<(StartUnit<K>, Completion<K>)> {
        if self.scheduled.is_empty() || !self.has_capacity(inner.limit) {
            return Vec::new();
        }

        let mut ranked: Vec<_> = self
            .scheduled
            .drain(..)
            .map(|item| ((item.evaluator)(), item))
            .collect();
        // Highest priority first; newest first within a priority. Pop from the back.
        ranked.sort_by(|(a_priority, a), (b_priority, b)| {
            a_priority
                .cmp(b_priority)
                .then(a.enqueued.cmp(&b.enqueued))
        });

        let mut batch = Vec::new();
        while self.has_capacity(inner.limit) {
            let Some((priority, item)) = ranked.pop() else {
                break;
            };
            let ticket = self.next_ticket;
            self.next_ticket += 1;
            trace!(key = ?item.key, %priority, ticket, "starting");
            self.running.insert(item.key.clone(), ticket);
            batch.push((
                item.start,
                Completion {
                    scheduler: Arc::downgrade(inner),
                    key: item.key,
                    ticket,
                },
            ));
        }
        self.scheduled = ranked.into_iter().map(|(_, item)| item).collect();
        batch
    }
}

/// Runs scheduling passes until nothing more can start.
fn schedule<K: SchedulerKey>(inner: &Arc<Inner<K>>) {
    {
        let mut state = inner.lock();
        if state.scheduling {
            return;
        }
        state.scheduling = true;
    }

    loop {
        let batch = {
            let mut state = inner.lock();
            let batch = state.take_runnable(inner);
            if batch.is_empty() {
                state.scheduling = false;
                return;
            }
            debug!(
                starting = batch.len(),
                running = state.running.len(),
                scheduled = state.scheduled.len(),
                "scheduling pass"
            );
            batch
        };

        inner.started.fetch_add(batch.len(), Ordering::SeqCst);
        for (start, completion) in batch {
            start(completion);
        }
    }
}

/// Slot held by a started unit.
///
/// Completing or dropping it releases the slot and triggers a scheduling
/// pass. If the unit was canceled in the meantime this is a no-op apart
/// from the pass.
#[must_use = "dropping a completion releases its slot immediately"]
pub struct Completion<K: SchedulerKey> {
    scheduler: Weak<Inner<K>>,
    key: K,
    ticket: u64,
}

impl<K: SchedulerKey> Completion<K> {
    /// The key this slot was granted for.
    #[must_use]
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Marks the unit finished.
    pub fn complete(self) {
        drop(self);
    }
}

impl<K: SchedulerKey> Drop for Completion<K> {
    fn drop(&mut self) {
        let Some(inner) = self.scheduler.upgrade() else {
            return;
        };
        let released = {
            let mut state = inner.lock();
            if state.running.get(&self.key) == Some(&self.ticket) {
                state.running.remove(&self.key);
                true
            } else {
                false
            }
        };
        if released {
            inner.finished.fetch_add(1, Ordering::SeqCst);
            trace!(key = ?self.key, ticket = self.ticket, "finished");
        }
        schedule(&inner);
    }
}

impl<K: SchedulerKey> fmt::Debug for Completion<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("key", &self.key)
            .field("ticket", &self.ticket)
            .finish()
    }
}
