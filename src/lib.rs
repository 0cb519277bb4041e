//! Image Loader Core Library
//!
//! Coordinates remote image loading for UI code: one download per resource
//! no matter how many views ask for it, prioritized toward what is on
//! screen, with every waiting subscriber served from a single result.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`request`] - Resource keys, priorities, cache policies and load requests
//! - [`scheduler`] - Bounded-concurrency queue with dynamic priorities
//! - [`coordinator`] - Deduplication, subscriptions, bindings and fan-out delivery
//! - [`network`] - Network collaborator contract and the reqwest implementation
//! - [`cache`] - Byte stores (memory, disk, layered)
//! - [`decode`] - Ordered decoder chain
//! - [`process`] - Post-decode image processors
//! - [`presentation`] - Contexts that run binding updates

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cache;
pub mod coordinator;
pub mod decode;
mod image_data;
pub mod network;
pub mod presentation;
pub mod process;
pub mod request;
pub mod scheduler;
mod user_agent;

// Re-export commonly used types
pub use cache::{ByteCache, CacheConfig, DiskCache, LayeredCache, MemoryCache};
pub use coordinator::{
    CacheProbe, CoordinatorConfig, CoordinatorError, CoordinatorStats, DownloadCoordinator,
    ImageAnimation, ImageBinding, ImageSlot, LoadCallback, LoadError, LoadHandle, Placeholder,
    SourceTag,
};
pub use decode::{DecoderChain, DefaultDecoder, ImageDecoder};
pub use image_data::Image;
pub use network::{HttpNetwork, HttpOptions, Network, NetworkError, NetworkTask};
pub use presentation::{ImmediatePresenter, Presenter, SerialPresenter};
pub use process::{Grayscale, ImageProcessor, ProcessorChain, Resize};
pub use request::{CachePolicy, KeyError, Priority, QueuePriority, Request, ResourceKey};
pub use scheduler::{Completion, DownloadScheduler, SchedulerStats};
