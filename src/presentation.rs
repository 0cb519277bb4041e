//! Execution contexts for deliveries that touch an [`ImageBinding`].
//!
//! Binding updates must all happen on one consistent context, the way GUI
//! toolkits require every view mutation on their main thread. A
//! [`Presenter`] is that context. Closure subscribers are not routed
//! through it.
//!
//! [`ImageBinding`]: crate::coordinator::ImageBinding

use std::fmt;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Work queued onto a presentation context.
pub type PresentJob = Box<dyn FnOnce() + Send>;

/// Runs binding deliveries on a single consistent context.
pub trait Presenter: Send + Sync + fmt::Debug {
    /// Runs `job` on this context. Jobs submitted from one thread run in
    /// submission order.
    fn present(&self, job: PresentJob);
}

/// Runs jobs on the calling thread.
///
/// Suitable when bindings are themselves thread-safe, like
/// [`ImageSlot`](crate::coordinator::ImageSlot).
#[derive(Debug, Default, Clone, Copy)]
pub struct ImmediatePresenter;

impl Presenter for ImmediatePresenter {
    fn present(&self, job: PresentJob) {
        job();
    }
}

/// Forwards jobs to one tokio task that runs them in order.
#[derive(Debug, Clone)]
pub struct SerialPresenter {
    sender: mpsc::UnboundedSender<PresentJob>,
}

impl SerialPresenter {
    /// Spawns the presentation task on `handle`.
    ///
    /// The task ends once every clone of this presenter is dropped.
    #[must_use]
    pub fn new(handle: &Handle) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<PresentJob>();
        handle.spawn(async move {
            while let Some(job) = receiver.recv().await {
                job();
            }
            debug!("presentation task stopped");
        });
        Self { sender }
    }
}

impl Presenter for SerialPresenter {
    fn present(&self, job: PresentJob) {
        if let Err(mpsc::error::SendError(job)) = self.sender.send(job) {
            warn!("presentation task is gone, running delivery inline");
            job();
        }
    }
}
