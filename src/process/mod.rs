//! Post-decode image transforms.
//!
//! A request carries an ordered list of processors; [`ProcessorChain`]
//! applies them as a left fold, each receiving the previous output.

use std::fmt;
use std::sync::Arc;

use image::DynamicImage;
use image::imageops::FilterType;

use crate::Image;

/// Transforms a decoded image.
pub trait ImageProcessor: Send + Sync {
    /// Identifier used in logs and `Debug` output.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Produces the transformed image.
    fn process(&self, image: Image) -> Image;
}

/// Applies processors in order.
#[derive(Clone, Default)]
pub struct ProcessorChain {
    processors: Vec<Arc<dyn ImageProcessor>>,
}

impl ProcessorChain {
    /// Creates a chain over `processors`.
    #[must_use]
    pub fn new(processors: Vec<Arc<dyn ImageProcessor>>) -> Self {
        Self { processors }
    }

    /// Whether the chain has no processors.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }
}

impl ImageProcessor for ProcessorChain {
    fn name(&self) -> &str {
        "chain"
    }

    fn process(&self, image: Image) -> Image {
        self.processors
            .iter()
            .fold(image, |image, processor| processor.process(image))
    }
}

impl fmt::Debug for ProcessorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.processors.iter().map(|p| p.name()))
            .finish()
    }
}

/// Resizes to exact dimensions, ignoring aspect ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resize {
    /// Target width in pixels.
    pub width: u32,
    /// Target height in pixels.
    pub height: u32,
}

impl ImageProcessor for Resize {
    fn name(&self) -> &str {
        "resize"
    }

    fn process(&self, image: Image) -> Image {
        if image.width() == self.width && image.height() == self.height {
            return image;
        }
        Image::new(
            image
                .pixels()
                .resize_exact(self.width, self.height, FilterType::Triangle),
        )
    }
}

/// Converts to 8-bit luma.
#[derive(Debug, Clone, Copy, Default)]
pub struct Grayscale;

impl ImageProcessor for Grayscale {
    fn name(&self) -> &str {
        "grayscale"
    }

    fn process(&self, image: Image) -> Image {
        Image::new(DynamicImage::ImageLuma8(image.pixels().to_luma8()))
    }
}
