use std::sync::Arc;

use crate::images::tools::{self, TransformedImage};
use crate::images::{ImageProxyError, OriginFetcher, TransformRequest};

pub struct ImageProxy {
    origin: Arc<dyn OriginFetcher>,
    max_pixels: u64,
}

impl ImageProxy {
    pub fn new(origin: Arc<dyn OriginFetcher>, max_pixels: u64) -> Self {
        Self { origin, max_pixels }
    }

    // Fetch the source and transform it. Only the fetch is cancellable; once
    // the pipeline starts it runs to completion on the blocking pool.
    pub async fn fetch_and_convert_image(
        &self,
        request: &TransformRequest,
    ) -> Result<TransformedImage, ImageProxyError> {
        let fetched = self.origin.fetch(request.source_url()).await?;

        log::info!(
            "Fetched {} ({} bytes, {}), transforming",
            request.source_url(),
            fetched.bytes.len(),
            fetched.content_type
        );

        let request = request.clone();
        let max_pixels = self.max_pixels;
        tokio::task::spawn_blocking(move || {
            tools::convert_image(&fetched.bytes, &fetched.content_type, &request, max_pixels)
        })
        .await
        .map_err(|e| ImageProxyError::InternalError(format!("Transform task failed: {}", e)))?
    }
}
