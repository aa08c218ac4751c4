pub mod fetch;
pub mod params;
pub mod proxy;
pub mod tools;

use std::time::Duration;

use thiserror::Error;

pub use fetch::{HttpOrigin, OriginFetcher};
pub use params::{OutputFormat, RawTransformQuery, TransformRequest};
pub use proxy::ImageProxy;

#[derive(Error, Debug)]
pub enum ImageProxyError {
    #[error("Invalid source URL: {0}")]
    InvalidSource(String),

    #[error("Invalid dimension: {0}")]
    InvalidDimension(String),

    #[error("Upstream content is not an image (content-type: {0})")]
    NotAnImage(String),

    #[error("Upstream did not respond within {0:?}")]
    UpstreamTimeout(Duration),

    #[error("Upstream responded with status {0}")]
    UpstreamError(u16),

    #[error("Upstream request failed: {0}")]
    UpstreamUnavailable(#[from] reqwest::Error),

    #[error("Source image exceeds {max} bytes")]
    SourceTooLarge { max: usize },

    #[error("Image is {width}x{height} ({pixels} pixels), limit is {max} pixels")]
    ImageTooLarge {
        width: u32,
        height: u32,
        pixels: u64,
        max: u64,
    },

    #[error("Image transform failed: {0}")]
    TransformFailed(#[source] image::ImageError),

    #[error("Internal error: {0}")]
    InternalError(String),
}
