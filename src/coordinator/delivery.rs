//! Turning fetched bytes into the outcome every subscriber receives.

use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;
use tracing::{debug, trace};

use crate::Image;
use crate::cache::ByteCache;
use crate::decode::DecoderChain;
use crate::network::NetworkError;
use crate::process::{ImageProcessor, ProcessorChain};
use crate::request::ResourceKey;

/// Why a load produced no image.
///
/// Cancellation is never reported: a canceled subscriber simply hears nothing.
#[derive(Debug, Clone, Error)]
pub enum LoadError {
    /// The network collaborator failed.
    #[error("failed to load {key}: {source}")]
    Network {
        /// The resource that failed.
        key: ResourceKey,
        /// The network error, shared between all subscribers.
        #[source]
        source: Arc<NetworkError>,
    },

    /// No decoder recognized the bytes.
    #[error("no decoder recognized the data for {key}")]
    Decode {
        /// The resource that failed.
        key: ResourceKey,
    },
}

impl LoadError {
    /// Creates a network failure.
    pub fn network(key: ResourceKey, source: NetworkError) -> Self {
        Self::Network {
            key,
            source: Arc::new(source),
        }
    }

    /// Creates a decode failure.
    pub fn decode(key: ResourceKey) -> Self {
        Self::Decode { key }
    }

    /// The resource that failed.
    #[must_use]
    pub fn key(&self) -> &ResourceKey {
        match self {
            Self::Network { key, .. } | Self::Decode { key } => key,
        }
    }
}

/// Bytes obtained for a key, and where they came from.
pub(crate) enum Fetched {
    Cached(Bytes),
    Downloaded(Result<Bytes, NetworkError>),
}

/// Decodes, updates the cache and processes.
///
/// Freshly downloaded bytes are cached only once they decode. Any failure
/// evicts the key so stale data does not outlive a failed refresh.
pub(crate) fn produce(
    key: &ResourceKey,
    fetched: Fetched,
    decoders: &DecoderChain,
    cache: Option<&dyn ByteCache>,
    processors: &[Arc<dyn ImageProcessor>],
) -> Result<Image, LoadError> {
    let (bytes, downloaded) = match fetched {
        Fetched::Cached(bytes) => (bytes, false),
        Fetched::Downloaded(Ok(bytes)) => (bytes, true),
        Fetched::Downloaded(Err(error)) => {
            debug!(key = %key, error = %error, "network failure, evicting cache entry");
            if let Some(cache) = cache {
                cache.remove(key);
            }
            return Err(LoadError::network(key.clone(), error));
        }
    };

    let Some(image) = decoders.decode(&bytes) else {
        debug!(key = %key, bytes = bytes.len(), "undecodable data, evicting cache entry");
        if let Some(cache) = cache {
            cache.remove(key);
        }
        return Err(LoadError::decode(key.clone()));
    };

    if downloaded && let Some(cache) = cache {
        cache.put(key, bytes);
    }

    if processors.is_empty() {
        return Ok(image);
    }
    trace!(key = %key, processors = processors.len(), "processing");
    Ok(ProcessorChain::new(processors.to_vec()).process(image))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::io::Cursor;

    use image::{DynamicImage, ImageFormat};

    use super::*;
    use crate::cache::MemoryCache;
    use crate::process::Resize;

    fn png() -> Bytes {
        let mut out = Cursor::new(Vec::new());
        DynamicImage::new_rgba8(4, 4)
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        Bytes::from(out.into_inner())
    }

    #[test]
    fn test_downloaded_image_is_cached_and_processed() {
        let cache = MemoryCache::new(1 << 20);
        let key = ResourceKey::new("k");
        let processors: Vec<Arc<dyn ImageProcessor>> = vec![Arc::new(Resize {
            width: 2,
            height: 1,
        })];

        let image = produce(
            &key,
            Fetched::Downloaded(Ok(png())),
            &DecoderChain::default(),
            Some(&cache),
            &processors,
        )
        .unwrap();

        assert_eq!((image.width(), image.height()), (2, 1));
        assert_eq!(cache.get(&key), Some(png()));
    }

    #[test]
    fn test_cached_bytes_are_not_rewritten() {
        let cache = MemoryCache::new(1 << 20);
        let key = ResourceKey::new("k");
        let image = produce(
            &key,
            Fetched::Cached(png()),
            &DecoderChain::default(),
            Some(&cache),
            &[],
        )
        .unwrap();
        assert_eq!(image.width(), 4);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_undecodable_bytes_evict_and_fail() {
        let cache = MemoryCache::new(1 << 20);
        let key = ResourceKey::new("k");
        cache.put(&key, Bytes::from_static(b"stale"));

        let error = produce(
            &key,
            Fetched::Cached(Bytes::from_static(b"stale")),
            &DecoderChain::default(),
            Some(&cache),
            &[],
        )
        .unwrap_err();

        assert!(matches!(error, LoadError::Decode { .. }));
        assert!(cache.get(&key).is_none());
    }

    #[test]
    fn test_network_failure_evicts_and_fails() {
        let cache = MemoryCache::new(1 << 20);
        let key = ResourceKey::new("https://example.com/a.png");
        cache.put(&key, png());

        let error = produce(
            &key,
            Fetched::Downloaded(Err(NetworkError::http_status(key.as_str(), 500))),
            &DecoderChain::default(),
            Some(&cache),
            &[],
        )
        .unwrap_err();

        assert_eq!(error.key(), &key);
        assert!(error.to_string().contains("HTTP 500"));
        assert!(cache.get(&key).is_none());
    }
}
