//! Primary-image selection and the content-addressed image cache.

mod cache;
mod pick;

pub use cache::{CachedImage, ImageCache, ImageError, ImageMeta, RejectEntry, RejectLog};
pub use pick::{normalize_image_url, pick_primary_image, ImageCandidate, ImageOrigin};
