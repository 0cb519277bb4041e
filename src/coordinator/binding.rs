//! UI-side collaborator types: bindings, placeholders and animations.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use crate::Image;
use crate::request::ResourceKey;

/// Identifies which delivery produced a displayed image.
///
/// The generation distinguishes successive load cycles for the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceTag {
    key: ResourceKey,
    generation: u64,
}

impl SourceTag {
    pub(crate) fn new(key: ResourceKey, generation: u64) -> Self {
        Self { key, generation }
    }

    /// The resource the image was loaded from.
    #[must_use]
    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    /// The load cycle that produced the image.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Something that displays one image at a time, such as an image view.
///
/// The coordinator holds bindings weakly. A binding that has been dropped
/// is silently removed from every pending load.
pub trait ImageBinding: Send + Sync {
    /// Replaces the displayed image. `source` is `None` for placeholders.
    fn display(&self, image: Option<Image>, source: Option<SourceTag>);

    /// Tag of the image currently displayed, if it came from a load.
    fn displayed_source(&self) -> Option<SourceTag>;
}

/// Stable identity of a binding for bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct BindingId(usize);

impl BindingId {
    pub(crate) fn of<B: ImageBinding + ?Sized>(binding: &Arc<B>) -> Self {
        Self(Arc::as_ptr(binding).cast::<()>().addr())
    }

    pub(crate) fn of_weak(binding: &Weak<dyn ImageBinding>) -> Self {
        Self(binding.as_ptr().cast::<()>().addr())
    }
}

/// Shown while a bound load is in progress.
#[derive(Clone, Default)]
pub enum Placeholder {
    /// Leave the binding untouched.
    #[default]
    None,
    /// Clear the binding.
    Clear,
    /// Show a fixed image.
    Image(Image),
    /// Run a custom hook against the binding.
    Custom(Arc<dyn Fn(&dyn ImageBinding) + Send + Sync>),
}

impl Placeholder {
    pub(crate) fn apply(&self, binding: &dyn ImageBinding) {
        match self {
            Self::None => {}
            Self::Clear => binding.display(None, None),
            Self::Image(image) => binding.display(Some(image.clone()), None),
            Self::Custom(hook) => hook(binding),
        }
    }
}

impl fmt::Debug for Placeholder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Clear => f.write_str("Clear"),
            Self::Image(image) => f.debug_tuple("Image").field(image).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// How a successfully loaded image reaches its binding.
#[derive(Clone, Default)]
pub enum ImageAnimation {
    /// Display the image directly.
    #[default]
    None,
    /// Hand the image to a hook, which is responsible for calling
    /// [`ImageBinding::display`] when its transition finishes.
    Custom(Arc<dyn Fn(&dyn ImageBinding, Image, SourceTag) + Send + Sync>),
}

impl ImageAnimation {
    pub(crate) fn present(&self, binding: &dyn ImageBinding, image: Image, source: SourceTag) {
        match self {
            Self::None => binding.display(Some(image), Some(source)),
            Self::Custom(hook) => hook(binding, image, source),
        }
    }
}

impl fmt::Debug for ImageAnimation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Thread-safe binding that just remembers what it was given.
///
/// Useful headless, in tests, and as a model for real view adapters.
#[derive(Debug, Default)]
pub struct ImageSlot {
    current: Mutex<(Option<Image>, Option<SourceTag>)>,
    updates: AtomicUsize,
}

impl ImageSlot {
    /// Creates an empty slot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The displayed image.
    #[must_use]
    pub fn image(&self) -> Option<Image> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .0
            .clone()
    }

    /// How many times [`ImageBinding::display`] has been called.
    #[must_use]
    pub fn updates(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }
}

impl ImageBinding for ImageSlot {
    fn display(&self, image: Option<Image>, source: Option<SourceTag>) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = (image, source);
        self.updates.fetch_add(1, Ordering::SeqCst);
    }

    fn displayed_source(&self) -> Option<SourceTag> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .1
            .clone()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use image::DynamicImage;

    use super::*;

    fn sample() -> Image {
        Image::new(DynamicImage::new_rgba8(2, 2))
    }

    #[test]
    fn test_placeholder_none_leaves_binding_untouched() {
        let slot = ImageSlot::new();
        Placeholder::None.apply(&slot);
        assert_eq!(slot.updates(), 0);
    }

    #[test]
    fn test_placeholder_image_has_no_source() {
        let slot = ImageSlot::new();
        slot.display(Some(sample()), Some(SourceTag::new(ResourceKey::new("k"), 1)));
        Placeholder::Image(sample()).apply(&slot);
        assert!(slot.image().is_some());
        assert!(slot.displayed_source().is_none());
    }

    #[test]
    fn test_placeholder_clear_and_custom() {
        let slot = ImageSlot::new();
        slot.display(Some(sample()), None);
        Placeholder::Clear.apply(&slot);
        assert!(slot.image().is_none());

        let hook = Placeholder::Custom(Arc::new(|binding: &dyn ImageBinding| {
            binding.display(Some(Image::new(DynamicImage::new_rgba8(7, 7))), None);
        }));
        hook.apply(&slot);
        assert_eq!(slot.image().unwrap().width(), 7);
    }

    #[test]
    fn test_animation_none_displays_with_source() {
        let slot = ImageSlot::new();
        let tag = SourceTag::new(ResourceKey::new("k"), 3);
        ImageAnimation::None.present(&slot, sample(), tag.clone());
        assert_eq!(slot.displayed_source(), Some(tag));
    }

    #[test]
    fn test_animation_custom_receives_image_and_tag() {
        let seen = Arc::new(Mutex::new(None));
        let captured = Arc::clone(&seen);
        let animation = ImageAnimation::Custom(Arc::new(
            move |binding: &dyn ImageBinding, image: Image, tag: SourceTag| {
                *captured.lock().unwrap() = Some(tag.generation());
                binding.display(Some(image), Some(tag));
            },
        ));
        let slot = ImageSlot::new();
        animation.present(&slot, sample(), SourceTag::new(ResourceKey::new("k"), 9));
        assert_eq!(*seen.lock().unwrap(), Some(9));
        assert_eq!(slot.displayed_source().unwrap().generation(), 9);
    }

    #[test]
    fn test_binding_id_matches_between_strong_and_weak() {
        let slot: Arc<dyn ImageBinding> = Arc::new(ImageSlot::new());
        let weak = Arc::downgrade(&slot);
        assert_eq!(BindingId::of(&slot), BindingId::of_weak(&weak));
        let other: Arc<dyn ImageBinding> = Arc::new(ImageSlot::new());
        assert_ne!(BindingId::of(&slot), BindingId::of(&other));
    }
}
