//! Per-key pending state: merged request info and subscriber lists.
//!
//! Everything here runs under the coordinator's lock. Work that must not
//! happen under it (scheduler calls, task cancellation, dropping user
//! callbacks) is collected into [`AfterUnlock`].

use std::collections::HashMap;
use std::mem;
use std::sync::{Arc, Weak};
use std::time::Duration;

use super::LoadCallback;
use super::binding::{BindingId, ImageAnimation, ImageBinding};
use crate::network::NetworkTask;
use crate::process::ImageProcessor;
use crate::request::{CachePolicy, Priority, QueuePriority, Request, ResourceKey};

/// Highest priority and most recent parameters seen for a key.
#[derive(Clone)]
pub(crate) struct MergedInfo {
    pub(crate) priority: Priority,
    pub(crate) cache_policy: CachePolicy,
    pub(crate) timeout: Duration,
    pub(crate) processors: Vec<Arc<dyn ImageProcessor>>,
}

impl MergedInfo {
    fn from_request(request: &Request) -> Self {
        Self {
            priority: request.priority(),
            cache_policy: request.cache_policy(),
            timeout: request.timeout(),
            processors: request.processors().to_vec(),
        }
    }

    fn merge(&mut self, request: &Request) {
        self.priority = self.priority.max(request.priority());
        self.cache_policy = request.cache_policy();
        self.timeout = request.timeout();
        self.processors = request.processors().to_vec();
    }
}

pub(crate) struct BindingSubscriber {
    pub(crate) id: BindingId,
    pub(crate) binding: Weak<dyn ImageBinding>,
    pub(crate) animation: ImageAnimation,
    pub(crate) on_result: Option<LoadCallback>,
}

impl BindingSubscriber {
    fn is_alive(&self) -> bool {
        self.binding.strong_count() > 0
    }
}

pub(crate) struct ClosureSubscriber {
    pub(crate) token: u64,
    pub(crate) on_result: LoadCallback,
}

/// Everything waiting on one key.
pub(crate) struct PendingEntry {
    pub(crate) generation: u64,
    pub(crate) info: MergedInfo,
    pub(crate) bindings: Vec<BindingSubscriber>,
    pub(crate) closures: Vec<ClosureSubscriber>,
    pub(crate) task: Option<Arc<dyn NetworkTask>>,
}

impl PendingEntry {
    /// Drops subscribers whose binding is gone.
    fn sweep(&mut self, after: &mut AfterUnlock) {
        let (live, dead): (Vec<_>, Vec<_>) = mem::take(&mut self.bindings)
            .into_iter()
            .partition(BindingSubscriber::is_alive);
        self.bindings = live;
        after.garbage.extend(dead);
    }

    fn is_empty(&self) -> bool {
        self.bindings.is_empty() && self.closures.is_empty()
    }

    /// Queue priority as the scheduler should see it right now.
    pub(crate) fn queue_priority(&self) -> QueuePriority {
        if self.bindings.iter().any(BindingSubscriber::is_alive) {
            QueuePriority::HasVisibleBinding
        } else {
            QueuePriority::Preset(self.info.priority)
        }
    }
}

/// An entry whose download must stop.
pub(crate) struct Abandoned {
    pub(crate) key: ResourceKey,
    pub(crate) generation: u64,
    pub(crate) task: Option<Arc<dyn NetworkTask>>,
}

/// Side effects deferred until the coordinator lock is released.
#[derive(Default)]
pub(crate) struct AfterUnlock {
    pub(crate) abandoned: Vec<Abandoned>,
    pub(crate) garbage: Vec<BindingSubscriber>,
    pub(crate) dropped_closures: Vec<ClosureSubscriber>,
}

/// The coordinator's shared map.
#[derive(Default)]
pub(crate) struct PendingMap {
    entries: HashMap<ResourceKey, PendingEntry>,
    /// Key each binding was most recently bound to. The weak reference
    /// keeps the binding's address from being reused while recorded.
    bound: HashMap<BindingId, (Weak<dyn ImageBinding>, ResourceKey)>,
    next_generation: u64,
    next_token: u64,
}

impl PendingMap {
    pub(crate) fn get(&self, key: &ResourceKey) -> Option<&PendingEntry> {
        self.entries.get(key)
    }

    pub(crate) fn get_mut(&mut self, key: &ResourceKey) -> Option<&mut PendingEntry> {
        self.entries.get_mut(key)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns the entry for the request's key, merging the request in.
    pub(crate) fn entry_for(&mut self, request: &Request) -> &mut PendingEntry {
        let next_generation = &mut self.next_generation;
        self.entries
            .entry(request.key().clone())
            .and_modify(|entry| entry.info.merge(request))
            .or_insert_with(|| {
                *next_generation += 1;
                PendingEntry {
                    generation: *next_generation,
                    info: MergedInfo::from_request(request),
                    bindings: Vec::new(),
                    closures: Vec::new(),
                    task: None,
                }
            })
    }

    pub(crate) fn next_token(&mut self) -> u64 {
        self.next_token += 1;
        self.next_token
    }

    /// Removes the entry if its generation matches.
    pub(crate) fn take_if_current(
        &mut self,
        key: &ResourceKey,
        generation: u64,
    ) -> Option<PendingEntry> {
        if self.entries.get(key)?.generation == generation {
            self.entries.remove(key)
        } else {
            None
        }
    }

    /// Records the binding's new target and removes its subscriptions for
    /// every other key.
    ///
    /// Within `key`'s own entry an older subscription by the same binding is
    /// replaced by the caller, so it is removed here too without abandoning
    /// the entry.
    pub(crate) fn rebind(
        &mut self,
        binding: &Weak<dyn ImageBinding>,
        key: &ResourceKey,
        after: &mut AfterUnlock,
    ) {
        let id = BindingId::of_weak(binding);
        self.bound
            .retain(|_, (recorded, _)| recorded.strong_count() > 0);
        self.bound.insert(id, (Weak::clone(binding), key.clone()));
        self.detach(id, Some(key), after);
        if let Some(entry) = self.entries.get_mut(key) {
            let (removed, kept): (Vec<_>, Vec<_>) = mem::take(&mut entry.bindings)
                .into_iter()
                .partition(|subscriber| subscriber.id == id);
            entry.bindings = kept;
            after.garbage.extend(removed);
        }
    }

    /// Removes every subscription held by the binding.
    pub(crate) fn unbind(&mut self, id: BindingId, after: &mut AfterUnlock) {
        self.bound.remove(&id);
        self.detach(id, None, after);
    }

    /// Drops dead bindings from `key`'s entry before it gains a subscriber.
    pub(crate) fn sweep(&mut self, key: &ResourceKey, after: &mut AfterUnlock) {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.sweep(after);
        }
    }

    /// Whether the binding is still bound to `key`.
    pub(crate) fn is_bound_to(&self, id: BindingId, key: &ResourceKey) -> bool {
        self.bound
            .get(&id)
            .is_some_and(|(_, bound_key)| bound_key == key)
    }

    /// Removes one closure subscriber; abandons the entry if nobody is left.
    ///
    /// Returns whether the token was found.
    pub(crate) fn remove_closure(
        &mut self,
        key: &ResourceKey,
        token: u64,
        after: &mut AfterUnlock,
    ) -> bool {
        let Some(entry) = self.entries.get_mut(key) else {
            return false;
        };
        let Some(index) = entry.closures.iter().position(|c| c.token == token) else {
            return false;
        };
        after.dropped_closures.push(entry.closures.remove(index));
        entry.sweep(after);
        if entry.is_empty() {
            self.abandon(key, after);
        }
        true
    }

    fn detach(&mut self, id: BindingId, except: Option<&ResourceKey>, after: &mut AfterUnlock) {
        let mut emptied = Vec::new();
        for (key, entry) in &mut self.entries {
            if except == Some(key) {
                entry.sweep(after);
                continue;
            }
            let before = entry.bindings.len();
            let (removed, kept): (Vec<_>, Vec<_>) = mem::take(&mut entry.bindings)
                .into_iter()
                .partition(|subscriber| subscriber.id == id);
            entry.bindings = kept;
            after.garbage.extend(removed);
            entry.sweep(after);
            if entry.bindings.len() < before && entry.is_empty() {
                emptied.push(key.clone());
            }
        }
        for key in emptied {
            self.abandon(&key, after);
        }
    }

    fn abandon(&mut self, key: &ResourceKey, after: &mut AfterUnlock) {
        if let Some(entry) = self.entries.remove(key) {
            after.garbage.extend(entry.bindings);
            after.dropped_closures.extend(entry.closures);
            after.abandoned.push(Abandoned {
                key: key.clone(),
                generation: entry.generation,
                task: entry.task,
            });
        }
    }
}
