//! Network collaborator contract and its HTTP implementation.
//!
//! The coordinator only talks to [`Network`]: it asks for a task, stores
//! the handle, then calls [`NetworkTask::start`]. [`NetworkTask::cancel`] is
//! called only when the last subscriber for a key goes away. After `cancel`
//! the completion callback must not fire; implementations drop it instead.

mod error;
mod http;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

pub use error::NetworkError;
pub use http::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_MAX_BODY_BYTES, HttpNetwork, HttpOptions,
};

use crate::request::{CachePolicy, ResourceKey};

/// Receives the outcome of one network task. Called at most once.
pub type NetworkCallback = Box<dyn FnOnce(Result<Bytes, NetworkError>) + Send>;

/// A cancellable unit of network work.
pub trait NetworkTask: Send + Sync {
    /// Begins the transfer. Calls after the first are ignored.
    fn start(&self);

    /// Abandons the transfer; the callback will not be invoked.
    fn cancel(&self);
}

/// Produces network tasks for resource keys.
pub trait Network: Send + Sync {
    /// Prepares a task that loads `key` and reports through `on_complete`.
    ///
    /// Nothing is transferred until [`NetworkTask::start`] is called.
    fn request(
        &self,
        key: &ResourceKey,
        cache_policy: CachePolicy,
        timeout: Duration,
        on_complete: NetworkCallback,
    ) -> Arc<dyn NetworkTask>;
}
