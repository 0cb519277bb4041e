//! Byte decoders and the ordered chain that runs them.
//!
//! Decoders are tried in registration order and the first one that
//! recognizes the bytes wins. [`DecoderChain::new`] appends a
//! [`DefaultDecoder`] unless one is already present, so the common raster
//! formats are always supported.

use std::fmt;
use std::sync::Arc;

use tracing::trace;

use crate::Image;

/// Turns encoded bytes into an [`Image`].
pub trait ImageDecoder: Send + Sync {
    /// Stable identifier used in logs and to detect the default decoder.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Decodes `bytes`, returning `None` if the format is not recognized.
    fn decode(&self, bytes: &[u8]) -> Option<Image>;
}

/// Decoder for the formats supported by the `image` crate (PNG, JPEG, GIF,
/// WebP, BMP).
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultDecoder;

impl DefaultDecoder {
    /// Name reported by [`ImageDecoder::name`].
    pub const NAME: &'static str = "default";
}

impl ImageDecoder for DefaultDecoder {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn decode(&self, bytes: &[u8]) -> Option<Image> {
        match image::load_from_memory(bytes) {
            Ok(pixels) => Some(Image::new(pixels)),
            Err(e) => {
                trace!(error = %e, len = bytes.len(), "default decoder rejected bytes");
                None
            }
        }
    }
}

/// Ordered list of decoders; first success wins.
#[derive(Clone)]
pub struct DecoderChain {
    decoders: Vec<Arc<dyn ImageDecoder>>,
}

impl DecoderChain {
    /// Builds a chain from `decoders`, appending [`DefaultDecoder`] unless a
    /// decoder named [`DefaultDecoder::NAME`] is already registered.
    #[must_use]
    pub fn new(mut decoders: Vec<Arc<dyn ImageDecoder>>) -> Self {
        if !decoders.iter().any(|d| d.name() == DefaultDecoder::NAME) {
            decoders.push(Arc::new(DefaultDecoder));
        }
        Self { decoders }
    }

    /// Runs the decoders in order and returns the first decoded image.
    #[must_use]
    pub fn decode(&self, bytes: &[u8]) -> Option<Image> {
        self.decoders.iter().find_map(|decoder| {
            let image = decoder.decode(bytes);
            trace!(decoder = decoder.name(), hit = image.is_some(), "decode attempt");
            image
        })
    }

    /// Number of registered decoders, including the appended default.
    #[must_use]
    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    /// Always false: a chain holds at least the default decoder.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }

    /// Decoder names in evaluation order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.decoders.iter().map(|d| d.name()).collect()
    }
}

impl Default for DecoderChain {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl fmt::Debug for DecoderChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecoderChain")
            .field("decoders", &self.names())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::io::Cursor;
    use std::sync::Mutex;

    use image::{DynamicImage, ImageFormat};

    use super::*;

    /// Records every call into a shared log and answers with a fixed result.
    struct ScriptedDecoder {
        name: &'static str,
        answer: Option<(u32, u32)>,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl ImageDecoder for ScriptedDecoder {
        fn name(&self) -> &str {
            self.name
        }

        fn decode(&self, _bytes: &[u8]) -> Option<Image> {
            self.log.lock().unwrap().push(self.name);
            self.answer
                .map(|(w, h)| Image::new(DynamicImage::new_rgba8(w, h)))
        }
    }

    fn scripted(
        name: &'static str,
        answer: Option<(u32, u32)>,
        log: &Arc<Mutex<Vec<&'static str>>>,
    ) -> Arc<dyn ImageDecoder> {
        Arc::new(ScriptedDecoder {
            name,
            answer,
            log: Arc::clone(log),
        })
    }

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        DynamicImage::new_rgba8(width, height)
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    #[test]
    fn test_chain_falls_through_to_second_decoder() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = DecoderChain::new(vec![
            scripted("first", None, &log),
            scripted("second", Some((2, 3)), &log),
        ]);

        let image = chain.decode(b"anything").unwrap();
        assert_eq!((image.width(), image.height()), (2, 3));
        assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn test_chain_stops_at_first_success() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = DecoderChain::new(vec![
            scripted("first", Some((1, 1)), &log),
            scripted("second", Some((9, 9)), &log),
        ]);

        let image = chain.decode(b"anything").unwrap();
        assert_eq!(image.width(), 1);
        assert_eq!(*log.lock().unwrap(), vec!["first"]);
    }

    #[test]
    fn test_default_decoder_appended_once() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = DecoderChain::new(vec![scripted("custom", None, &log)]);
        assert_eq!(chain.names(), vec!["custom", DefaultDecoder::NAME]);

        let chain = DecoderChain::new(vec![
            Arc::new(DefaultDecoder),
            scripted("custom", None, &log),
        ]);
        assert_eq!(chain.names(), vec![DefaultDecoder::NAME, "custom"]);
    }

    #[test]
    fn test_default_chain_decodes_png() {
        let chain = DecoderChain::default();
        let image = chain.decode(&png_bytes(5, 4)).unwrap();
        assert_eq!((image.width(), image.height()), (5, 4));
    }

    #[test]
    fn test_default_chain_rejects_garbage() {
        assert!(DecoderChain::default().decode(b"definitely not an image").is_none());
        assert!(!DecoderChain::default().is_empty());
    }
}
