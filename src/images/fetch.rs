use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Url};

use crate::images::ImageProxyError;

const ACCEPT_IMAGES: &str = "image/avif,image/webp,image/apng,image/*;q=0.8,*/*;q=0.5";

#[derive(Debug, Clone)]
pub struct FetchedImage {
    pub bytes: Bytes,
    pub content_type: String,
}

/// Where source images come from.
#[async_trait]
pub trait OriginFetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<FetchedImage, ImageProxyError>;
}

pub struct HttpOrigin {
    client: Client,
    timeout: Duration,
    max_bytes: usize,
}

impl HttpOrigin {
    pub fn new(timeout: Duration, user_agent: &str, max_bytes: usize) -> Result<Self, ImageProxyError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(|e| ImageProxyError::InternalError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            timeout,
            max_bytes,
        })
    }

    async fn request(&self, url: &Url) -> Result<FetchedImage, ImageProxyError> {
        let response = self
            .client
            .get(url.clone())
            .header(ACCEPT, ACCEPT_IMAGES)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|h| h.to_str().ok())
            .unwrap_or("")
            .trim()
            .to_string();

        // Content type is checked first: an HTML error page is "not an image"
        // whatever its status.
        if !content_type.to_ascii_lowercase().starts_with("image/") {
            log::warn!("Origin {} answered {} with content-type '{}'", url, status, content_type);
            return Err(ImageProxyError::NotAnImage(content_type));
        }

        if !status.is_success() {
            log::warn!("Origin {} answered with status {}", url, status);
            return Err(ImageProxyError::UpstreamError(status.as_u16()));
        }

        if let Some(length) = response.content_length() {
            if length > self.max_bytes as u64 {
                return Err(ImageProxyError::SourceTooLarge { max: self.max_bytes });
            }
        }

        let mut body = BytesMut::with_capacity(8192);
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| self.classify(e))?;
            if body.len() + chunk.len() > self.max_bytes {
                return Err(ImageProxyError::SourceTooLarge { max: self.max_bytes });
            }
            body.extend_from_slice(&chunk);
        }

        log::debug!("Fetched {} bytes ({}) from {}", body.len(), content_type, url);

        Ok(FetchedImage {
            bytes: body.freeze(),
            content_type,
        })
    }

    fn classify(&self, error: reqwest::Error) -> ImageProxyError {
        if error.is_timeout() {
            ImageProxyError::UpstreamTimeout(self.timeout)
        } else {
            ImageProxyError::UpstreamUnavailable(error)
        }
    }
}

#[async_trait]
impl OriginFetcher for HttpOrigin {
    async fn fetch(&self, url: &Url) -> Result<FetchedImage, ImageProxyError> {
        // Dropping the request future on expiry cancels the connection.
        match tokio::time::timeout(self.timeout, self.request(url)).await {
            Ok(result) => result,
            Err(_) => {
                log::warn!("Origin {} did not respond within {:?}", url, self.timeout);
                Err(ImageProxyError::UpstreamTimeout(self.timeout))
            }
        }
    }
}
