//! reqwest-backed [`Network`] implementation.
//!
//! Each task is a tokio task spawned on the runtime handle given at
//! construction. Bodies are streamed into memory with a size cap.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use reqwest::header::{CACHE_CONTROL, HeaderValue, PRAGMA};
use reqwest::{Client, ClientBuilder};
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tracing::{debug, instrument, trace};
use url::Url;

use super::{Network, NetworkCallback, NetworkError, NetworkTask};
use crate::request::{CachePolicy, ResourceKey};
use crate::user_agent;

/// Default TCP connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default cap on a response body (64 MiB).
pub const DEFAULT_MAX_BODY_BYTES: u64 = 64 * 1024 * 1024;

/// Client settings for [`HttpNetwork`].
#[derive(Debug, Clone)]
pub struct HttpOptions {
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// User-Agent header value.
    pub user_agent: String,
    /// Largest accepted body in bytes.
    pub max_body_bytes: u64,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            user_agent: user_agent::default_user_agent(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

/// HTTP network collaborator.
///
/// # Example
///
/// ```no_run
/// use imageloader_core::network::HttpNetwork;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let network = HttpNetwork::new(tokio::runtime::Handle::current())?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HttpNetwork {
    client: Client,
    runtime: Handle,
    max_body_bytes: u64,
}

impl HttpNetwork {
    /// Creates a network with default options.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::Client`] if the HTTP client cannot be built.
    pub fn new(runtime: Handle) -> Result<Self, NetworkError> {
        Self::with_options(runtime, HttpOptions::default())
    }

    /// Creates a network with explicit options.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::Client`] if the HTTP client cannot be built.
    pub fn with_options(runtime: Handle, options: HttpOptions) -> Result<Self, NetworkError> {
        let client = base_client_builder(&options)
            .build()
            .map_err(|source| NetworkError::Client { source })?;
        Ok(Self {
            client,
            runtime,
            max_body_bytes: options.max_body_bytes,
        })
    }

    /// Access to the underlying reqwest client.
    #[must_use]
    pub fn inner(&self) -> &Client {
        &self.client
    }
}

impl Network for HttpNetwork {
    fn request(
        &self,
        key: &ResourceKey,
        cache_policy: CachePolicy,
        timeout: Duration,
        on_complete: NetworkCallback,
    ) -> Arc<dyn NetworkTask> {
        Arc::new(HttpTask {
            fetch: Mutex::new(Some(Fetch {
                client: self.client.clone(),
                key: key.clone(),
                cache_policy,
                timeout,
                max_body_bytes: self.max_body_bytes,
            })),
            callback: Arc::new(Mutex::new(Some(on_complete))),
            abort: Mutex::new(None),
            canceled: AtomicBool::new(false),
            runtime: self.runtime.clone(),
        })
    }
}

fn base_client_builder(options: &HttpOptions) -> ClientBuilder {
    Client::builder()
        .connect_timeout(options.connect_timeout)
        .gzip(true)
        .user_agent(options.user_agent.clone())
}

/// `Cache-Control` request header for a policy; `None` leaves caching to HTTP defaults.
fn cache_control(policy: CachePolicy) -> Option<&'static str> {
    match policy {
        CachePolicy::UseProtocolCachePolicy | CachePolicy::ReloadIgnoringLocalCacheData => None,
        CachePolicy::ReloadIgnoringLocalAndRemoteCacheData => Some("no-cache"),
        CachePolicy::ReturnCacheDataElseLoad => Some("max-stale"),
        CachePolicy::ReturnCacheDataDontLoad => Some("only-if-cached"),
        CachePolicy::ReloadRevalidatingCacheData => Some("max-age=0"),
    }
}

/// Everything needed to perform one GET.
struct Fetch {
    client: Client,
    key: ResourceKey,
    cache_policy: CachePolicy,
    timeout: Duration,
    max_body_bytes: u64,
}

impl Fetch {
    #[instrument(level = "debug", skip(self), fields(key = %self.key, policy = %self.cache_policy))]
    async fn run(self) -> Result<Bytes, NetworkError> {
        let url =
            Url::parse(self.key.as_str()).map_err(|_| NetworkError::invalid_url(self.key.as_str()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(NetworkError::invalid_url(self.key.as_str()));
        }

        let mut request = self.client.get(url.clone()).timeout(self.timeout);
        if let Some(value) = cache_control(self.cache_policy) {
            request = request.header(CACHE_CONTROL, HeaderValue::from_static(value));
            if self.cache_policy == CachePolicy::ReloadIgnoringLocalAndRemoteCacheData {
                request = request.header(PRAGMA, HeaderValue::from_static("no-cache"));
            }
        }

        let response = request
            .send()
            .await
            .map_err(|e| NetworkError::transport(url.as_str(), e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(NetworkError::http_status(url.as_str(), status.as_u16()));
        }
        if response
            .content_length()
            .is_some_and(|len| len > self.max_body_bytes)
        {
            return Err(NetworkError::too_large(url.as_str(), self.max_body_bytes));
        }

        let mut body = BytesMut::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| NetworkError::transport(url.as_str(), e))?;
            if (body.len() + chunk.len()) as u64 > self.max_body_bytes {
                return Err(NetworkError::too_large(url.as_str(), self.max_body_bytes));
            }
            body.extend_from_slice(&chunk);
        }
        debug!(bytes = body.len(), "response received");
        Ok(body.freeze())
    }
}

/// Handle for one spawned GET.
struct HttpTask {
    fetch: Mutex<Option<Fetch>>,
    callback: Arc<Mutex<Option<NetworkCallback>>>,
    abort: Mutex<Option<AbortHandle>>,
    canceled: AtomicBool,
    runtime: Handle,
}

impl NetworkTask for HttpTask {
    fn start(&self) {
        if self.canceled.load(Ordering::SeqCst) {
            return;
        }
        let Some(fetch) = self
            .fetch
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return;
        };

        let callback = Arc::clone(&self.callback);
        let handle = self.runtime.spawn(async move {
            let result = fetch.run().await;
            let callback = callback
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            if let Some(callback) = callback {
                callback(result);
            }
        });
        *self.abort.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle.abort_handle());

        // A cancel that raced the spawn has already dropped the callback; stop the transfer too.
        if self.canceled.load(Ordering::SeqCst) {
            handle.abort();
        }
    }

    fn cancel(&self) {
        if self.canceled.swap(true, Ordering::SeqCst) {
            return;
        }
        let callback = self
            .callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(callback);
        if let Some(abort) = self
            .abort
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            abort.abort();
        }
        trace!("network task canceled");
    }
}
