//! Single entry point for loading remote images.
//!
//! # Overview
//!
//! [`DownloadCoordinator`] deduplicates requests by [`ResourceKey`], keeps
//! every subscriber for a key in one pending entry, and fans a single
//! result out to all of them.
//!
//! - [`DownloadCoordinator::bind_and_load`] subscribes a weakly held
//!   [`ImageBinding`]; binding deliveries run on the configured
//!   [`Presenter`].
//! - [`DownloadCoordinator::load`] subscribes a callback and returns a
//!   [`LoadHandle`] that retracts only that subscription.
//! - [`DownloadCoordinator::prefetch`] subscribes a callback that cannot be
//!   retracted.
//!
//! A request first probes the cache (unless its policy forbids cached
//! data). On a miss the key is admitted to the [`DownloadScheduler`] with a
//! priority evaluator that reports [`QueuePriority::HasVisibleBinding`]
//! while any live binding waits on the key. When the last subscriber for a
//! key goes away, the queued work and the network task are canceled.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use imageloader_core::Image;
//! use imageloader_core::coordinator::{CoordinatorConfig, DownloadCoordinator, LoadError};
//! use imageloader_core::decode::DecoderChain;
//! use imageloader_core::network::HttpNetwork;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let network = Arc::new(HttpNetwork::new(tokio::runtime::Handle::current())?);
//! let coordinator = DownloadCoordinator::new(
//!     network,
//!     None,
//!     DecoderChain::default(),
//!     CoordinatorConfig::default(),
//! )?;
//! coordinator.prefetch_url("https://example.com/cat.png", Box::new(|result: Result<Image, LoadError>| {
//!     println!("loaded: {}", result.is_ok());
//! }))?;
//! # Ok(())
//! # }
//! ```

mod binding;
mod delivery;
mod subscribers;

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use bytes::Bytes;
use thiserror::Error;
use tokio::runtime::{Handle, TryCurrentError};
use tracing::{debug, info, instrument, trace};

pub use binding::{ImageAnimation, ImageBinding, ImageSlot, Placeholder, SourceTag};
pub use delivery::LoadError;

use crate::Image;
use crate::cache::ByteCache;
use crate::decode::DecoderChain;
use crate::network::{Network, NetworkCallback, NetworkError};
use crate::presentation::{ImmediatePresenter, Presenter};
use crate::request::{KeyError, Priority, QueuePriority, Request, ResourceKey};
use crate::scheduler::{
    Completion, DownloadScheduler, PriorityEvaluator, SchedulerStats, StartUnit,
};
use binding::BindingId;
use delivery::Fetched;
use subscribers::{
    Abandoned, AfterUnlock, BindingSubscriber, ClosureSubscriber, PendingEntry, PendingMap,
};

/// Receives the outcome of a load. Called at most once.
pub type LoadCallback = Box<dyn FnOnce(Result<Image, LoadError>) + Send>;

/// Error type for coordinator construction.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// A concurrency limit of zero would never start anything.
    #[error("invalid concurrency limit {value}: must be at least 1")]
    InvalidConcurrency {
        /// The rejected limit.
        value: usize,
    },

    /// Construction happened outside a tokio runtime.
    #[error("no tokio runtime available: {source}")]
    NoRuntime {
        /// Why the current runtime could not be found.
        #[source]
        source: TryCurrentError,
    },
}

/// Where the cache probe runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CacheProbe {
    /// On the calling thread, before the call returns.
    #[default]
    Inline,
    /// On the blocking thread pool.
    Background,
}

/// Coordinator settings.
///
/// The default presenter is [`ImmediatePresenter`], which runs binding
/// deliveries on whichever blocking-pool thread finished decoding. That
/// gives up UI affinity and is only sound for thread-safe bindings such as
/// [`ImageSlot`]. Set `presenter` to a
/// [`SerialPresenter`](crate::presentation::SerialPresenter), or a presenter
/// that forwards to the UI thread, when every binding update must happen on
/// one context.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Most downloads running at once; `None` means unbounded.
    pub concurrency_limit: Option<usize>,
    /// Where cache probes run.
    pub cache_probe: CacheProbe,
    /// Context that runs binding deliveries. Defaults to running them inline.
    pub presenter: Arc<dyn Presenter>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: None,
            cache_probe: CacheProbe::default(),
            presenter: Arc::new(ImmediatePresenter),
        }
    }
}

/// Counters captured at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoordinatorStats {
    /// Cache probes that found data.
    pub cache_hits: usize,
    /// Cache probes that found nothing.
    pub cache_misses: usize,
    /// Network tasks requested.
    pub network_requests: usize,
    /// Load cycles that produced an image.
    pub succeeded: usize,
    /// Load cycles that failed.
    pub failed: usize,
    /// Load cycles abandoned because every subscriber left.
    pub abandoned: usize,
    /// Keys with subscribers waiting.
    pub pending_keys: usize,
    /// Scheduler queue state.
    pub scheduler: SchedulerStats,
}

/// Scheduler identity of one load cycle for a key.
///
/// Cancels and completions name the generation they belong to, so a stale
/// cancel never touches the slot of a newer cycle for the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Cycle {
    key: ResourceKey,
    generation: u64,
}

impl Cycle {
    fn new(key: &ResourceKey, generation: u64) -> Self {
        Self {
            key: key.clone(),
            generation,
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    cache_hits: AtomicUsize,
    cache_misses: AtomicUsize,
    network_requests: AtomicUsize,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
    abandoned: AtomicUsize,
}

impl Counters {
    fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::SeqCst);
    }
}

/// Deduplicating, prioritizing image loader.
///
/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct DownloadCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    network: Arc<dyn Network>,
    cache: Option<Arc<dyn ByteCache>>,
    decoders: DecoderChain,
    scheduler: DownloadScheduler<Cycle>,
    pending: Mutex<PendingMap>,
    presenter: Arc<dyn Presenter>,
    cache_probe: CacheProbe,
    runtime: Handle,
    counters: Counters,
}

impl DownloadCoordinator {
    /// Creates a coordinator bound to the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::InvalidConcurrency`] for a limit of zero
    /// and [`CoordinatorError::NoRuntime`] outside a tokio runtime.
    pub fn new(
        network: Arc<dyn Network>,
        cache: Option<Arc<dyn ByteCache>>,
        decoders: DecoderChain,
        config: CoordinatorConfig,
    ) -> Result<Self, CoordinatorError> {
        let runtime = Handle::try_current().map_err(|source| CoordinatorError::NoRuntime { source })?;
        Self::with_runtime(runtime, network, cache, decoders, config)
    }

    /// Creates a coordinator that runs decoding on `runtime`.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::InvalidConcurrency`] for a limit of zero.
    pub fn with_runtime(
        runtime: Handle,
        network: Arc<dyn Network>,
        cache: Option<Arc<dyn ByteCache>>,
        decoders: DecoderChain,
        config: CoordinatorConfig,
    ) -> Result<Self, CoordinatorError> {
        if config.concurrency_limit == Some(0) {
            return Err(CoordinatorError::InvalidConcurrency { value: 0 });
        }
        info!(
            concurrency_limit = ?config.concurrency_limit,
            cache = cache.is_some(),
            decoders = ?decoders.names(),
            cache_probe = ?config.cache_probe,
            "image coordinator created"
        );
        Ok(Self {
            inner: Arc::new(Inner {
                network,
                cache,
                decoders,
                scheduler: DownloadScheduler::new(config.concurrency_limit),
                pending: Mutex::new(PendingMap::default()),
                presenter: config.presenter,
                cache_probe: config.cache_probe,
                runtime,
                counters: Counters::default(),
            }),
        })
    }

    /// Loads `request` into `binding`.
    ///
    /// Returns immediately when the binding already shows this key's image
    /// and the cache policy allows reuse. Otherwise applies `placeholder`
    /// synchronously, moves the binding's subscription to this key and
    /// starts resolution. On failure the placeholder stays in place.
    #[instrument(skip_all, fields(key = %request.key()))]
    pub fn bind_and_load(
        &self,
        request: Request,
        binding: Arc<dyn ImageBinding>,
        placeholder: Placeholder,
        animation: ImageAnimation,
        on_result: Option<LoadCallback>,
    ) {
        let key = request.key().clone();
        if request.cache_policy().can_use_cached_data()
            && binding
                .displayed_source()
                .is_some_and(|source| source.key() == &key)
        {
            trace!("binding already displays this resource");
            return;
        }

        placeholder.apply(binding.as_ref());

        let weak = Arc::downgrade(&binding);
        let mut after = AfterUnlock::default();
        {
            let mut pending = self.inner.lock();
            pending.rebind(&weak, &key, &mut after);
            pending.entry_for(&request).bindings.push(BindingSubscriber {
                id: BindingId::of(&binding),
                binding: weak,
                animation,
                on_result,
            });
        }
        self.inner.run_after(after);
        self.inner.resolve(key);
    }

    /// Loads `request` for a callback.
    ///
    /// Dropping or canceling the returned handle removes only this
    /// subscription; the download stops only if nobody else is waiting.
    #[instrument(skip_all, fields(key = %request.key()))]
    pub fn load(&self, request: Request, on_result: LoadCallback) -> LoadHandle {
        let token = self.subscribe(&request, on_result);
        self.inner.resolve(request.key().clone());
        LoadHandle {
            coordinator: Arc::downgrade(&self.inner),
            key: request.key().clone(),
            token,
            armed: true,
        }
    }

    /// Loads `request` for a callback that stays subscribed until delivery.
    #[instrument(skip_all, fields(key = %request.key()))]
    pub fn prefetch(&self, request: Request, on_result: LoadCallback) {
        self.subscribe(&request, on_result);
        self.inner.resolve(request.key().clone());
    }

    /// [`load`](Self::load) with default request settings.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError`] if `url` does not parse.
    pub fn load_url(&self, url: &str, on_result: LoadCallback) -> Result<LoadHandle, KeyError> {
        let key = ResourceKey::parse_url(url)?;
        Ok(self.load(Request::new(key), on_result))
    }

    /// [`prefetch`](Self::prefetch) at prefetch priority.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError`] if `url` does not parse.
    pub fn prefetch_url(&self, url: &str, on_result: LoadCallback) -> Result<(), KeyError> {
        let key = ResourceKey::parse_url(url)?;
        self.prefetch(
            Request::new(key).with_priority(Priority::PREFETCH),
            on_result,
        );
        Ok(())
    }

    /// Removes every subscription held by `binding`.
    ///
    /// Keys left with no subscribers are canceled. The displayed image is
    /// not touched.
    pub fn unbind<B: ImageBinding + ?Sized>(&self, binding: &Arc<B>) {
        let id = BindingId::of(binding);
        let mut after = AfterUnlock::default();
        self.inner.lock().unbind(id, &mut after);
        self.inner.run_after(after);
    }

    /// The byte cache, if any.
    #[must_use]
    pub fn cache(&self) -> Option<&Arc<dyn ByteCache>> {
        self.inner.cache.as_ref()
    }

    /// Snapshot of counters and queue state.
    #[must_use]
    pub fn stats(&self) -> CoordinatorStats {
        let counters = &self.inner.counters;
        let pending_keys = self.inner.lock().len();
        CoordinatorStats {
            cache_hits: counters.cache_hits.load(Ordering::SeqCst),
            cache_misses: counters.cache_misses.load(Ordering::SeqCst),
            network_requests: counters.network_requests.load(Ordering::SeqCst),
            succeeded: counters.succeeded.load(Ordering::SeqCst),
            failed: counters.failed.load(Ordering::SeqCst),
            abandoned: counters.abandoned.load(Ordering::SeqCst),
            pending_keys,
            scheduler: self.inner.scheduler.stats(),
        }
    }

    fn subscribe(&self, request: &Request, on_result: LoadCallback) -> u64 {
        let mut after = AfterUnlock::default();
        let token = {
            let mut pending = self.inner.lock();
            pending.sweep(request.key(), &mut after);
            let token = pending.next_token();
            pending
                .entry_for(request)
                .closures
                .push(ClosureSubscriber { token, on_result });
            token
        };
        self.inner.run_after(after);
        token
    }
}

impl fmt::Debug for DownloadCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadCoordinator")
            .field("decoders", &self.inner.decoders)
            .field("cache_probe", &self.inner.cache_probe)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

// Lock order: the scheduler's lock may be held while the coordinator lock is
// taken (priority evaluators), never the reverse. Nothing below calls the
// scheduler, cancels a task or drops a completion while holding `pending`.
impl Inner {
    fn lock(&self) -> MutexGuard<'_, PendingMap> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn run_after(self: &Arc<Self>, after: AfterUnlock) {
        let AfterUnlock {
            abandoned,
            garbage,
            dropped_closures,
        } = after;
        drop(garbage);
        drop(dropped_closures);

        for Abandoned {
            key,
            generation,
            task,
        } in abandoned
        {
            Counters::bump(&self.counters.abandoned);
            debug!(key = %key, generation, "no subscribers left, canceling");
            self.scheduler.cancel(&Cycle::new(&key, generation));
            if let Some(task) = task {
                task.cancel();
            }
        }
    }

    /// Cache probe, then scheduler admission on a miss.
    fn resolve(self: &Arc<Self>, key: ResourceKey) {
        let (policy, generation) = match self.lock().get(&key) {
            Some(entry) => (entry.info.cache_policy, entry.generation),
            None => return,
        };
        let cycle = Cycle { key, generation };

        if self.cache.is_none() || !policy.can_use_cached_data() {
            self.admit(cycle);
            return;
        }
        match self.cache_probe {
            CacheProbe::Inline => self.probe_cache(cycle),
            CacheProbe::Background => {
                let inner = Arc::clone(self);
                self.runtime
                    .spawn_blocking(move || inner.probe_cache(cycle));
            }
        }
    }

    fn probe_cache(self: &Arc<Self>, cycle: Cycle) {
        let cached = self.cache.as_ref().and_then(|cache| cache.get(&cycle.key));
        match cached {
            Some(bytes) => {
                Counters::bump(&self.counters.cache_hits);
                debug!(key = %cycle.key, bytes = bytes.len(), "cache hit");
                self.finish_from_cache(cycle, bytes);
            }
            None => {
                Counters::bump(&self.counters.cache_misses);
                trace!(key = %cycle.key, "cache miss");
                self.admit(cycle);
            }
        }
    }

    fn finish_from_cache(self: &Arc<Self>, cycle: Cycle, bytes: Bytes) {
        let Some(mut entry) = self.lock().take_if_current(&cycle.key, cycle.generation) else {
            return;
        };
        // An earlier miss may have queued or started a download for this entry.
        self.scheduler.cancel(&cycle);
        if let Some(task) = entry.task.take() {
            task.cancel();
        }

        let key = cycle.key;
        let inner = Arc::clone(self);
        self.runtime
            .spawn_blocking(move || inner.deliver(key, entry, Fetched::Cached(bytes)));
    }

    fn admit(self: &Arc<Self>, cycle: Cycle) {
        let weak = Arc::downgrade(self);
        let evaluated = cycle.clone();
        let evaluator: PriorityEvaluator = Box::new(move || {
            let fallback = QueuePriority::Preset(Priority::VeryLow);
            let Some(inner) = weak.upgrade() else {
                return fallback;
            };
            let priority = inner
                .lock()
                .get(&evaluated.key)
                .filter(|entry| entry.generation == evaluated.generation)
                .map(PendingEntry::queue_priority);
            priority.unwrap_or(fallback)
        });

        let weak = Arc::downgrade(self);
        let start: StartUnit<Cycle> = Box::new(move |completion: Completion<Cycle>| {
            if let Some(inner) = weak.upgrade() {
                inner.start_unit(completion);
            }
        });

        let Cycle { key, generation } = cycle.clone();
        if self.scheduler.add(cycle, evaluator, start) {
            trace!(key = %key, generation, "admitted to scheduler");
        }
    }

    /// Starts the download for the cycle `completion` was granted to.
    ///
    /// A slot granted to a cycle that has since ended is released unused.
    fn start_unit(self: &Arc<Self>, completion: Completion<Cycle>) {
        let Cycle { key, generation } = completion.key().clone();
        let prepared = self
            .lock()
            .get(&key)
            .filter(|entry| entry.generation == generation && entry.task.is_none())
            .map(|entry| (entry.info.cache_policy, entry.info.timeout));
        let Some((cache_policy, timeout)) = prepared else {
            trace!(key = %key, generation, "cycle ended before start");
            drop(completion);
            return;
        };

        Counters::bump(&self.counters.network_requests);
        let weak = Arc::downgrade(self);
        let callback_key = key.clone();
        let on_complete: NetworkCallback = Box::new(move |result| {
            if let Some(inner) = weak.upgrade() {
                inner.finish_network(callback_key, generation, completion, result);
            }
        });
        let task = self
            .network
            .request(&key, cache_policy, timeout, on_complete);

        let stored = {
            let mut pending = self.lock();
            match pending.get_mut(&key) {
                Some(entry) if entry.generation == generation && entry.task.is_none() => {
                    entry.task = Some(Arc::clone(&task));
                    true
                }
                _ => false,
            }
        };
        if stored {
            debug!(key = %key, generation, %cache_policy, "starting download");
            task.start();
        } else {
            trace!(key = %key, generation, "entry changed before start");
            task.cancel();
        }
    }

    fn finish_network(
        self: &Arc<Self>,
        key: ResourceKey,
        generation: u64,
        completion: Completion<Cycle>,
        result: Result<Bytes, NetworkError>,
    ) {
        let entry = self.lock().take_if_current(&key, generation);
        completion.complete();
        let Some(entry) = entry else {
            debug!(key = %key, generation, "discarding result for a finished entry");
            return;
        };

        let inner = Arc::clone(self);
        self.runtime
            .spawn_blocking(move || inner.deliver(key, entry, Fetched::Downloaded(result)));
    }

    /// Produces the outcome and notifies the snapshotted subscribers.
    fn deliver(self: &Arc<Self>, key: ResourceKey, entry: PendingEntry, fetched: Fetched) {
        let PendingEntry {
            generation,
            info,
            bindings,
            closures,
            task: _,
        } = entry;

        let outcome = delivery::produce(
            &key,
            fetched,
            &self.decoders,
            self.cache.as_deref(),
            &info.processors,
        );
        match &outcome {
            Ok(image) => {
                Counters::bump(&self.counters.succeeded);
                debug!(
                    key = %key,
                    generation,
                    width = image.width(),
                    height = image.height(),
                    subscribers = bindings.len() + closures.len(),
                    "delivering image"
                );
            }
            Err(error) => {
                Counters::bump(&self.counters.failed);
                debug!(key = %key, generation, error = %error, "delivering failure");
            }
        }

        if !bindings.is_empty() {
            let inner = Arc::clone(self);
            let tag = SourceTag::new(key.clone(), generation);
            let outcome = outcome.clone();
            self.presenter.present(Box::new(move || {
                inner.present_to_bindings(&tag, &outcome, bindings);
            }));
        }
        for closure in closures {
            (closure.on_result)(outcome.clone());
        }
    }

    /// Runs on the presentation context.
    fn present_to_bindings(
        &self,
        tag: &SourceTag,
        outcome: &Result<Image, LoadError>,
        bindings: Vec<BindingSubscriber>,
    ) {
        for subscriber in bindings {
            let Some(binding) = subscriber.binding.upgrade() else {
                continue;
            };
            if !self.lock().is_bound_to(subscriber.id, tag.key()) {
                trace!(key = %tag.key(), "binding moved on, skipping");
                continue;
            }
            if let Ok(image) = outcome {
                subscriber
                    .animation
                    .present(binding.as_ref(), image.clone(), tag.clone());
            }
            if let Some(on_result) = subscriber.on_result {
                on_result(outcome.clone());
            }
        }
    }
}

/// Subscription returned by [`DownloadCoordinator::load`].
///
/// Dropping the handle cancels the subscription; call
/// [`detach`](Self::detach) to keep it alive without the handle.
#[must_use = "dropping a LoadHandle cancels its subscription"]
pub struct LoadHandle {
    coordinator: Weak<Inner>,
    key: ResourceKey,
    token: u64,
    armed: bool,
}

impl LoadHandle {
    /// The key this subscription waits on.
    #[must_use]
    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    /// Removes this subscription. No notification follows.
    pub fn cancel(self) {
        drop(self);
    }

    /// Keeps the subscription alive until delivery.
    pub fn detach(mut self) {
        self.armed = false;
    }
}

impl Drop for LoadHandle {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Some(inner) = self.coordinator.upgrade() else {
            return;
        };
        let mut after = AfterUnlock::default();
        let removed = inner.lock().remove_closure(&self.key, self.token, &mut after);
        if removed {
            debug!(key = %self.key, token = self.token, "subscription canceled");
        }
        inner.run_after(after);
    }
}

impl fmt::Debug for LoadHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadHandle")
            .field("key", &self.key)
            .field("token", &self.token)
            .field("armed", &self.armed)
            .finish()
    }
}
