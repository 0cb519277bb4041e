//! Image requests and the value types they are built from.
//!
//! A [`Request`] is immutable once built. Several requests for the same
//! [`ResourceKey`] may be in flight at once; the coordinator merges them.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use imageloader_core::request::{CachePolicy, Priority, Request, ResourceKey};
//!
//! let request = Request::new(ResourceKey::new("https://example.com/cat.png"))
//!     .with_priority(Priority::High)
//!     .with_cache_policy(CachePolicy::ReturnCacheDataElseLoad)
//!     .with_timeout(Duration::from_secs(15));
//! assert_eq!(request.priority(), Priority::High);
//! ```

mod cache_policy;
mod key;
mod priority;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub use cache_policy::CachePolicy;
pub use key::{KeyError, ResourceKey};
pub use priority::{Priority, QueuePriority};

use crate::process::ImageProcessor;

/// Default network timeout for a request.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// A request to load one remote image.
#[derive(Clone)]
pub struct Request {
    key: ResourceKey,
    cache_policy: CachePolicy,
    timeout: Duration,
    priority: Priority,
    processors: Vec<Arc<dyn ImageProcessor>>,
}

impl Request {
    /// Creates a request with default policy, timeout and priority.
    #[must_use]
    pub fn new(key: impl Into<ResourceKey>) -> Self {
        Self {
            key: key.into(),
            cache_policy: CachePolicy::default(),
            timeout: DEFAULT_TIMEOUT,
            priority: Priority::default(),
            processors: Vec::new(),
        }
    }

    /// Sets the cache policy.
    #[must_use]
    pub fn with_cache_policy(mut self, cache_policy: CachePolicy) -> Self {
        self.cache_policy = cache_policy;
        self
    }

    /// Sets the network timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the preset priority.
    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Appends a post-decode processor. Processors run in insertion order.
    #[must_use]
    pub fn with_processor(mut self, processor: Arc<dyn ImageProcessor>) -> Self {
        self.processors.push(processor);
        self
    }

    /// Replaces the processor list.
    #[must_use]
    pub fn with_processors(mut self, processors: Vec<Arc<dyn ImageProcessor>>) -> Self {
        self.processors = processors;
        self
    }

    /// The resource identity.
    #[must_use]
    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    /// The cache policy.
    #[must_use]
    pub fn cache_policy(&self) -> CachePolicy {
        self.cache_policy
    }

    /// The network timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The preset priority.
    #[must_use]
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// The processors applied after decoding.
    #[must_use]
    pub fn processors(&self) -> &[Arc<dyn ImageProcessor>] {
        &self.processors
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("key", &self.key)
            .field("cache_policy", &self.cache_policy)
            .field("timeout", &self.timeout)
            .field("priority", &self.priority)
            .field(
                "processors",
                &self.processors.iter().map(|p| p.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}
