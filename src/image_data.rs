//! Decoded image value shared between decoders, processors and subscribers.

use std::fmt;
use std::sync::Arc;

use image::DynamicImage;

/// A decoded image.
///
/// Cloning shares the pixel buffer; processors that transform the image
/// produce a new buffer.
#[derive(Clone)]
pub struct Image {
    pixels: Arc<DynamicImage>,
}

impl Image {
    /// Wraps a decoded pixel buffer.
    #[must_use]
    pub fn new(pixels: DynamicImage) -> Self {
        Self {
            pixels: Arc::new(pixels),
        }
    }

    /// Width in pixels.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    /// Height in pixels.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// Borrows the pixel buffer.
    #[must_use]
    pub fn pixels(&self) -> &DynamicImage {
        &self.pixels
    }

    /// Takes the pixel buffer, copying it only if it is shared.
    #[must_use]
    pub fn into_pixels(self) -> DynamicImage {
        Arc::unwrap_or_clone(self.pixels)
    }

    /// Whether both values share the same pixel buffer.
    #[must_use]
    pub fn shares_pixels_with(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.pixels, &other.pixels)
    }
}

impl From<DynamicImage> for Image {
    fn from(pixels: DynamicImage) -> Self {
        Self::new(pixels)
    }
}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Image")
            .field("width", &self.width())
            .field("height", &self.height())
            .field("color", &self.pixels.color())
            .finish()
    }
}
