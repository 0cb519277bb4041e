//! Integration tests for `DownloadCoordinator` with a scripted network.

#![allow(clippy::unwrap_used)]

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use image::{DynamicImage, ImageFormat};
use imageloader_core::network::{NetworkCallback, NetworkError};
use imageloader_core::{
    ByteCache, CachePolicy, CacheProbe, CoordinatorConfig, CoordinatorError, DecoderChain,
    DownloadCoordinator, Image, ImageAnimation, ImageBinding, ImageSlot, LoadError, MemoryCache,
    Network, NetworkTask, Placeholder, Priority, Request, Resize, ResourceKey, SerialPresenter,
};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

// ==================== Test Doubles ====================

/// Task whose completion is driven by the test.
struct FakeTask {
    key: ResourceKey,
    policy: CachePolicy,
    callback: Mutex<Option<NetworkCallback>>,
    started: AtomicBool,
    canceled: AtomicBool,
}

impl NetworkTask for FakeTask {
    fn start(&self) {
        self.started.store(true, Ordering::SeqCst);
    }

    fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
        let callback = self.callback.lock().unwrap().take();
        drop(callback);
    }
}

#[derive(Default)]
struct FakeNetwork {
    tasks: Mutex<Vec<Arc<FakeTask>>>,
}

impl FakeNetwork {
    fn count(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }

    fn task(&self, index: usize) -> Arc<FakeTask> {
        Arc::clone(&self.tasks.lock().unwrap()[index])
    }

    fn keys(&self) -> Vec<String> {
        self.tasks
            .lock()
            .unwrap()
            .iter()
            .map(|task| task.key.as_str().to_string())
            .collect()
    }

    /// Keys of tasks started and still waiting for a result.
    fn in_flight(&self) -> Vec<String> {
        self.tasks
            .lock()
            .unwrap()
            .iter()
            .filter(|task| {
                task.started.load(Ordering::SeqCst)
                    && !task.canceled.load(Ordering::SeqCst)
                    && task.callback.lock().unwrap().is_some()
            })
            .map(|task| task.key.as_str().to_string())
            .collect()
    }

    /// Fires task `index`'s callback on the calling thread.
    fn complete(&self, index: usize, result: Result<Bytes, NetworkError>) {
        let task = self.task(index);
        assert!(task.started.load(Ordering::SeqCst), "task {index} never started");
        let callback = task.callback.lock().unwrap().take();
        if let Some(callback) = callback {
            callback(result);
        }
    }
}

impl Network for FakeNetwork {
    fn request(
        &self,
        key: &ResourceKey,
        cache_policy: CachePolicy,
        _timeout: Duration,
        on_complete: NetworkCallback,
    ) -> Arc<dyn NetworkTask> {
        let task = Arc::new(FakeTask {
            key: key.clone(),
            policy: cache_policy,
            callback: Mutex::new(Some(on_complete)),
            started: AtomicBool::new(false),
            canceled: AtomicBool::new(false),
        });
        self.tasks.lock().unwrap().push(Arc::clone(&task));
        task
    }
}

/// Memory cache that counts every call made to it.
struct CountingCache {
    inner: MemoryCache,
    gets: AtomicUsize,
    puts: AtomicUsize,
    removes: AtomicUsize,
}

impl CountingCache {
    fn new() -> Self {
        Self {
            inner: MemoryCache::new(1 << 20),
            gets: AtomicUsize::new(0),
            puts: AtomicUsize::new(0),
            removes: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> (usize, usize, usize) {
        (
            self.gets.load(Ordering::SeqCst),
            self.puts.load(Ordering::SeqCst),
            self.removes.load(Ordering::SeqCst),
        )
    }
}

impl ByteCache for CountingCache {
    fn get(&self, key: &ResourceKey) -> Option<Bytes> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get(key)
    }

    fn put(&self, key: &ResourceKey, bytes: Bytes) {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.inner.put(key, bytes);
    }

    fn remove(&self, key: &ResourceKey) {
        self.removes.fetch_add(1, Ordering::SeqCst);
        self.inner.remove(key);
    }

    fn clear(&self) {
        self.inner.clear();
    }
}

/// Runs a hook when dropped.
struct OnDrop(Option<Box<dyn FnOnce() + Send>>);

impl Drop for OnDrop {
    fn drop(&mut self) {
        if let Some(hook) = self.0.take() {
            hook();
        }
    }
}

// ==================== Helpers ====================

type Outcome = Result<Image, LoadError>;

fn png(width: u32, height: u32) -> Bytes {
    let mut out = Cursor::new(Vec::new());
    DynamicImage::new_rgba8(width, height)
        .write_to(&mut out, ImageFormat::Png)
        .unwrap();
    Bytes::from(out.into_inner())
}

fn key(name: &str) -> ResourceKey {
    ResourceKey::new(format!("https://img.test/{name}.png"))
}

fn coordinator(
    network: &Arc<FakeNetwork>,
    cache: Option<Arc<MemoryCache>>,
    config: CoordinatorConfig,
) -> DownloadCoordinator {
    let cache = cache.map(|cache| cache as Arc<dyn ByteCache>);
    DownloadCoordinator::new(
        Arc::clone(network) as Arc<dyn Network>,
        cache,
        DecoderChain::default(),
        config,
    )
    .unwrap()
}

fn limited(limit: usize) -> CoordinatorConfig {
    CoordinatorConfig {
        concurrency_limit: Some(limit),
        ..CoordinatorConfig::default()
    }
}

fn callback(tx: &UnboundedSender<Outcome>) -> Box<dyn FnOnce(Outcome) + Send> {
    let tx = tx.clone();
    Box::new(move |result| {
        let _ = tx.send(result);
    })
}

async fn next(rx: &mut UnboundedReceiver<Outcome>) -> Option<Outcome> {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
}

// ==================== Deduplication Tests ====================

#[tokio::test]
async fn test_concurrent_requests_share_one_download() {
    let network = Arc::new(FakeNetwork::default());
    let coordinator = coordinator(&network, None, CoordinatorConfig::default());
    let (tx, mut rx) = unbounded_channel();

    let handles: Vec<_> = (0..3)
        .map(|_| coordinator.load(Request::new(key("a")), callback(&tx)))
        .collect();
    assert_eq!(network.count(), 1);

    network.complete(0, Ok(png(4, 3)));

    let first = next(&mut rx).await.unwrap().unwrap();
    for _ in 0..2 {
        let other = next(&mut rx).await.unwrap().unwrap();
        assert!(first.shares_pixels_with(&other));
    }
    assert_eq!((first.width(), first.height()), (4, 3));

    let stats = coordinator.stats();
    assert_eq!(stats.network_requests, 1);
    assert_eq!(stats.succeeded, 1);
    assert_eq!(stats.pending_keys, 0);
    drop(handles);
}

#[tokio::test]
async fn test_new_cycle_after_delivery_downloads_again() {
    let network = Arc::new(FakeNetwork::default());
    let coordinator = coordinator(&network, None, CoordinatorConfig::default());
    let (tx, mut rx) = unbounded_channel();

    coordinator.prefetch(Request::new(key("a")), callback(&tx));
    network.complete(0, Ok(png(1, 1)));
    next(&mut rx).await.unwrap().unwrap();

    coordinator.prefetch(Request::new(key("a")), callback(&tx));
    assert_eq!(network.count(), 2);
}

// ==================== Cancellation Tests ====================

#[tokio::test]
async fn test_canceling_one_of_two_subscribers_keeps_download() {
    let network = Arc::new(FakeNetwork::default());
    let coordinator = coordinator(&network, None, CoordinatorConfig::default());
    let (tx_a, mut rx_a) = unbounded_channel();
    let (tx_b, mut rx_b) = unbounded_channel();

    let handle_a = coordinator.load(Request::new(key("a")), callback(&tx_a));
    let handle_b = coordinator.load(Request::new(key("a")), callback(&tx_b));
    drop(tx_a);
    drop(tx_b);

    handle_a.cancel();
    assert!(!network.task(0).canceled.load(Ordering::SeqCst));

    network.complete(0, Ok(png(2, 2)));
    assert!(next(&mut rx_b).await.unwrap().is_ok());
    assert!(next(&mut rx_a).await.is_none(), "canceled subscriber heard back");
    drop(handle_b);
}

#[tokio::test]
async fn test_canceling_only_subscriber_cancels_download() {
    let network = Arc::new(FakeNetwork::default());
    let coordinator = coordinator(&network, None, CoordinatorConfig::default());
    let (tx, mut rx) = unbounded_channel();

    let handle = coordinator.load(Request::new(key("a")), callback(&tx));
    drop(tx);
    drop(handle);

    assert!(network.task(0).canceled.load(Ordering::SeqCst));
    assert!(next(&mut rx).await.is_none());

    let stats = coordinator.stats();
    assert_eq!(stats.abandoned, 1);
    assert_eq!(stats.pending_keys, 0);
    assert_eq!(stats.scheduler.running, 0);
}

#[tokio::test]
async fn test_detached_handle_still_delivers() {
    let network = Arc::new(FakeNetwork::default());
    let coordinator = coordinator(&network, None, CoordinatorConfig::default());
    let (tx, mut rx) = unbounded_channel();

    coordinator
        .load(Request::new(key("a")), callback(&tx))
        .detach();
    network.complete(0, Ok(png(1, 1)));
    assert!(next(&mut rx).await.unwrap().is_ok());
}

#[tokio::test]
async fn test_cancel_frees_slot_for_queued_work() {
    let network = Arc::new(FakeNetwork::default());
    let coordinator = coordinator(&network, None, limited(1));
    let (tx, _rx) = unbounded_channel();

    let first = coordinator.load(Request::new(key("a")), callback(&tx));
    coordinator.prefetch(Request::new(key("b")), callback(&tx));
    assert_eq!(network.count(), 1);

    drop(first);
    assert_eq!(network.keys(), vec![key("a").to_string(), key("b").to_string()]);
}

#[tokio::test]
async fn test_resubscribe_during_cancel_keeps_concurrency_limit() {
    let network = Arc::new(FakeNetwork::default());
    let coordinator = coordinator(&network, None, limited(1));
    let (tx, _rx) = unbounded_channel();

    coordinator.prefetch(Request::new(key("blocker")), callback(&tx));

    // Dropping the only subscriber of "k" drops its callback, which
    // subscribes "k" again and frees the blocker's slot before the
    // canceled cycle's cleanup has run.
    let hook = {
        let coordinator = coordinator.clone();
        let network = Arc::clone(&network);
        let tx = tx.clone();
        OnDrop(Some(Box::new(move || {
            coordinator.prefetch(Request::new(key("k")), callback(&tx));
            network.complete(0, Ok(png(1, 1)));
        })))
    };
    let handle = coordinator.load(
        Request::new(key("k")),
        Box::new(move |_result| drop(hook)),
    );
    assert_eq!(network.count(), 1);
    drop(handle);

    assert_eq!(network.in_flight(), vec![key("k").to_string()]);
    assert_eq!(coordinator.stats().scheduler.running, 1);

    coordinator.prefetch(Request::new(key("other")), callback(&tx));
    assert_eq!(network.in_flight(), vec![key("k").to_string()]);
    assert_eq!(coordinator.stats().scheduler.scheduled, 1);

    let k = network.count() - 1;
    network.complete(k, Ok(png(1, 1)));
    assert_eq!(network.in_flight(), vec![key("other").to_string()]);
}

// ==================== Scheduling Tests ====================

#[tokio::test]
async fn test_concurrency_limit_holds_back_work() {
    let network = Arc::new(FakeNetwork::default());
    let coordinator = coordinator(&network, None, limited(2));
    let (tx, _rx) = unbounded_channel();

    for name in ["a", "b", "c"] {
        coordinator.prefetch(Request::new(key(name)), callback(&tx));
    }
    assert_eq!(network.count(), 2);
    assert_eq!(coordinator.stats().scheduler.scheduled, 1);

    network.complete(0, Ok(png(1, 1)));
    assert_eq!(network.count(), 3);
}

#[tokio::test]
async fn test_visible_binding_outranks_presets() {
    let network = Arc::new(FakeNetwork::default());
    let coordinator = coordinator(&network, None, limited(1));
    let (tx, _rx) = unbounded_channel();

    coordinator.prefetch(Request::new(key("busy")), callback(&tx));
    coordinator.prefetch(
        Request::new(key("low")).with_priority(Priority::VeryLow),
        callback(&tx),
    );
    coordinator.prefetch(
        Request::new(key("high")).with_priority(Priority::High),
        callback(&tx),
    );
    let slot = Arc::new(ImageSlot::new());
    coordinator.bind_and_load(
        Request::new(key("shown")),
        slot.clone(),
        Placeholder::None,
        ImageAnimation::None,
        None,
    );

    for index in 0..3 {
        network.complete(index, Ok(png(1, 1)));
    }
    let expected: Vec<String> = ["busy", "shown", "high", "low"]
        .into_iter()
        .map(|name| key(name).to_string())
        .collect();
    assert_eq!(network.keys(), expected);
}

#[tokio::test]
async fn test_zero_concurrency_is_rejected() {
    let network = Arc::new(FakeNetwork::default());
    let result = DownloadCoordinator::new(
        network as Arc<dyn Network>,
        None,
        DecoderChain::default(),
        limited(0),
    );
    assert!(matches!(
        result,
        Err(CoordinatorError::InvalidConcurrency { value: 0 })
    ));
}

// ==================== Binding Tests ====================

#[tokio::test]
async fn test_bind_displays_image_with_source_tag() {
    let network = Arc::new(FakeNetwork::default());
    let coordinator = coordinator(&network, None, CoordinatorConfig::default());
    let (tx, mut rx) = unbounded_channel();
    let slot = Arc::new(ImageSlot::new());

    coordinator.bind_and_load(
        Request::new(key("a")),
        slot.clone(),
        Placeholder::Clear,
        ImageAnimation::None,
        Some(callback(&tx)),
    );
    assert_eq!(slot.updates(), 1);
    network.complete(0, Ok(png(6, 2)));
    assert!(next(&mut rx).await.unwrap().is_ok());

    assert_eq!(slot.image().unwrap().width(), 6);
    assert_eq!(slot.displayed_source().unwrap().key(), &key("a"));
}

#[tokio::test]
async fn test_rebinding_same_key_is_idempotent() {
    let network = Arc::new(FakeNetwork::default());
    let coordinator = coordinator(&network, None, CoordinatorConfig::default());
    let (tx, mut rx) = unbounded_channel();
    let slot = Arc::new(ImageSlot::new());

    coordinator.bind_and_load(
        Request::new(key("a")),
        slot.clone(),
        Placeholder::None,
        ImageAnimation::None,
        Some(callback(&tx)),
    );
    network.complete(0, Ok(png(1, 1)));
    next(&mut rx).await.unwrap().unwrap();
    let updates = slot.updates();

    coordinator.bind_and_load(
        Request::new(key("a")),
        slot.clone(),
        Placeholder::Clear,
        ImageAnimation::None,
        None,
    );
    assert_eq!(slot.updates(), updates);
    assert_eq!(network.count(), 1);
}

#[tokio::test]
async fn test_rebinding_cached_image_makes_no_cache_or_network_calls() {
    let network = Arc::new(FakeNetwork::default());
    let cache = Arc::new(CountingCache::new());
    cache.inner.put(&key("a"), png(4, 4));
    let coordinator = DownloadCoordinator::new(
        Arc::clone(&network) as Arc<dyn Network>,
        Some(Arc::clone(&cache) as Arc<dyn ByteCache>),
        DecoderChain::default(),
        CoordinatorConfig::default(),
    )
    .unwrap();
    let (tx, mut rx) = unbounded_channel();
    let slot = Arc::new(ImageSlot::new());

    coordinator.bind_and_load(
        Request::new(key("a")),
        slot.clone(),
        Placeholder::None,
        ImageAnimation::None,
        Some(callback(&tx)),
    );
    next(&mut rx).await.unwrap().unwrap();
    assert_eq!(slot.displayed_source().unwrap().key(), &key("a"));
    let calls = cache.calls();
    assert_eq!(calls.0, 1);
    let updates = slot.updates();

    coordinator.bind_and_load(
        Request::new(key("a")),
        slot.clone(),
        Placeholder::Clear,
        ImageAnimation::None,
        Some(callback(&tx)),
    );
    assert_eq!(cache.calls(), calls);
    assert_eq!(network.count(), 0);
    assert_eq!(slot.updates(), updates);
    assert_eq!(coordinator.stats().pending_keys, 0);
}

#[tokio::test]
async fn test_serial_presenter_delivers_to_bindings() {
    let network = Arc::new(FakeNetwork::default());
    let config = CoordinatorConfig {
        presenter: Arc::new(SerialPresenter::new(&tokio::runtime::Handle::current())),
        ..CoordinatorConfig::default()
    };
    let coordinator = coordinator(&network, None, config);
    let (tx, mut rx) = unbounded_channel();
    let first = Arc::new(ImageSlot::new());
    let second = Arc::new(ImageSlot::new());

    for (name, slot) in [("a", &first), ("b", &second)] {
        coordinator.bind_and_load(
            Request::new(key(name)),
            slot.clone(),
            Placeholder::None,
            ImageAnimation::None,
            Some(callback(&tx)),
        );
    }
    network.complete(0, Ok(png(2, 1)));
    network.complete(1, Ok(png(3, 1)));
    assert!(next(&mut rx).await.unwrap().is_ok());
    assert!(next(&mut rx).await.unwrap().is_ok());

    assert_eq!(first.image().unwrap().width(), 2);
    assert_eq!(second.image().unwrap().width(), 3);
}

#[tokio::test]
async fn test_rebinding_to_new_key_cancels_old_load() {
    let network = Arc::new(FakeNetwork::default());
    let coordinator = coordinator(&network, None, CoordinatorConfig::default());
    let (tx, mut rx) = unbounded_channel();
    let slot = Arc::new(ImageSlot::new());

    coordinator.bind_and_load(
        Request::new(key("a")),
        slot.clone(),
        Placeholder::None,
        ImageAnimation::None,
        None,
    );
    coordinator.bind_and_load(
        Request::new(key("b")),
        slot.clone(),
        Placeholder::None,
        ImageAnimation::None,
        Some(callback(&tx)),
    );
    assert!(network.task(0).canceled.load(Ordering::SeqCst));

    network.complete(1, Ok(png(3, 3)));
    assert!(next(&mut rx).await.unwrap().is_ok());
    assert_eq!(slot.displayed_source().unwrap().key(), &key("b"));
}

#[tokio::test]
async fn test_unbind_cancels_unshared_load() {
    let network = Arc::new(FakeNetwork::default());
    let coordinator = coordinator(&network, None, CoordinatorConfig::default());
    let slot = Arc::new(ImageSlot::new());

    coordinator.bind_and_load(
        Request::new(key("a")),
        slot.clone(),
        Placeholder::None,
        ImageAnimation::None,
        None,
    );
    coordinator.unbind(&slot);

    assert!(network.task(0).canceled.load(Ordering::SeqCst));
    assert_eq!(coordinator.stats().pending_keys, 0);
}

#[tokio::test]
async fn test_failed_load_keeps_placeholder() {
    let network = Arc::new(FakeNetwork::default());
    let coordinator = coordinator(&network, None, CoordinatorConfig::default());
    let (tx, mut rx) = unbounded_channel();
    let slot = Arc::new(ImageSlot::new());
    let placeholder = Image::new(DynamicImage::new_rgba8(1, 1));

    coordinator.bind_and_load(
        Request::new(key("a")),
        slot.clone(),
        Placeholder::Image(placeholder),
        ImageAnimation::None,
        Some(callback(&tx)),
    );
    network.complete(
        0,
        Err(NetworkError::http_status(key("a").as_str(), 503)),
    );

    assert!(next(&mut rx).await.unwrap().is_err());
    assert_eq!(slot.updates(), 1);
    assert_eq!(slot.image().unwrap().width(), 1);
    assert!(slot.displayed_source().is_none());
}

#[tokio::test]
async fn test_dropped_binding_is_not_notified() {
    let network = Arc::new(FakeNetwork::default());
    let coordinator = coordinator(&network, None, CoordinatorConfig::default());
    let (tx_bound, mut rx_bound) = unbounded_channel();
    let (tx_closure, mut rx_closure) = unbounded_channel();

    let slot = Arc::new(ImageSlot::new());
    coordinator.bind_and_load(
        Request::new(key("a")),
        slot.clone(),
        Placeholder::None,
        ImageAnimation::None,
        Some(callback(&tx_bound)),
    );
    coordinator.prefetch(Request::new(key("a")), callback(&tx_closure));
    drop(tx_bound);
    drop(slot);

    network.complete(0, Ok(png(1, 1)));
    assert!(next(&mut rx_closure).await.unwrap().is_ok());
    assert!(next(&mut rx_bound).await.is_none());
}

// ==================== Cache Tests ====================

#[tokio::test]
async fn test_cache_hit_skips_network() {
    let network = Arc::new(FakeNetwork::default());
    let cache = Arc::new(MemoryCache::new(1 << 20));
    cache.put(&key("a"), png(2, 5));
    let coordinator = coordinator(&network, Some(cache), CoordinatorConfig::default());
    let (tx, mut rx) = unbounded_channel();

    coordinator.prefetch(Request::new(key("a")), callback(&tx));

    let image = next(&mut rx).await.unwrap().unwrap();
    assert_eq!(image.height(), 5);
    assert_eq!(network.count(), 0);
    assert_eq!(coordinator.stats().cache_hits, 1);
}

#[tokio::test]
async fn test_background_probe_serves_cache_hit() {
    let network = Arc::new(FakeNetwork::default());
    let cache = Arc::new(MemoryCache::new(1 << 20));
    cache.put(&key("a"), png(2, 2));
    let config = CoordinatorConfig {
        cache_probe: CacheProbe::Background,
        ..CoordinatorConfig::default()
    };
    let coordinator = coordinator(&network, Some(cache), config);
    let (tx, mut rx) = unbounded_channel();

    coordinator.prefetch(Request::new(key("a")), callback(&tx));
    assert!(next(&mut rx).await.unwrap().is_ok());
    assert_eq!(network.count(), 0);
}

#[tokio::test]
async fn test_download_fills_cache() {
    let network = Arc::new(FakeNetwork::default());
    let cache = Arc::new(MemoryCache::new(1 << 20));
    let coordinator = coordinator(&network, Some(Arc::clone(&cache)), CoordinatorConfig::default());
    let (tx, mut rx) = unbounded_channel();

    coordinator.prefetch(Request::new(key("a")), callback(&tx));
    network.complete(0, Ok(png(1, 1)));
    next(&mut rx).await.unwrap().unwrap();

    assert_eq!(cache.get(&key("a")), Some(png(1, 1)));
    assert_eq!(coordinator.stats().cache_misses, 1);
}

#[tokio::test]
async fn test_reload_policy_bypasses_cache_and_failure_evicts() {
    let network = Arc::new(FakeNetwork::default());
    let cache = Arc::new(MemoryCache::new(1 << 20));
    cache.put(&key("a"), png(1, 1));
    let coordinator = coordinator(&network, Some(Arc::clone(&cache)), CoordinatorConfig::default());
    let (tx, mut rx) = unbounded_channel();

    coordinator.prefetch(
        Request::new(key("a")).with_cache_policy(CachePolicy::ReloadIgnoringLocalCacheData),
        callback(&tx),
    );
    assert_eq!(network.count(), 1);
    assert_eq!(
        network.task(0).policy,
        CachePolicy::ReloadIgnoringLocalCacheData
    );

    network.complete(0, Err(NetworkError::http_status(key("a").as_str(), 500)));
    let error = next(&mut rx).await.unwrap().unwrap_err();
    assert!(matches!(error, LoadError::Network { .. }));
    assert!(cache.get(&key("a")).is_none());
    assert_eq!(coordinator.stats().failed, 1);
}

#[tokio::test]
async fn test_undecodable_download_reports_decode_error() {
    let network = Arc::new(FakeNetwork::default());
    let coordinator = coordinator(&network, None, CoordinatorConfig::default());
    let (tx, mut rx) = unbounded_channel();

    coordinator.prefetch(Request::new(key("a")), callback(&tx));
    network.complete(0, Ok(Bytes::from_static(b"<html>not an image</html>")));

    let error = next(&mut rx).await.unwrap().unwrap_err();
    assert!(matches!(error, LoadError::Decode { .. }));
}

// ==================== Processing Tests ====================

#[tokio::test]
async fn test_processors_apply_before_delivery() {
    let network = Arc::new(FakeNetwork::default());
    let coordinator = coordinator(&network, None, CoordinatorConfig::default());
    let (tx, mut rx) = unbounded_channel();

    coordinator.prefetch(
        Request::new(key("a")).with_processor(Arc::new(Resize {
            width: 2,
            height: 2,
        })),
        callback(&tx),
    );
    network.complete(0, Ok(png(8, 8)));

    let image = next(&mut rx).await.unwrap().unwrap();
    assert_eq!((image.width(), image.height()), (2, 2));
}
