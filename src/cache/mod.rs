mod image;
mod key;

pub use image::{CacheEntry, ImageCache, DEFAULT_SWEEP_PROBABILITY};
pub use key::CacheKey;
