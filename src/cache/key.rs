use std::fmt;

use sha2::{Digest, Sha256};

use crate::images::TransformRequest;

/// Hex SHA-256 of the effective transform parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn derive(request: &TransformRequest) -> Self {
        let width = request.width().map_or_else(|| "auto".to_string(), |w| w.to_string());
        let height = request.height().map_or_else(|| "auto".to_string(), |h| h.to_string());

        // The URL goes last so separators inside it cannot shift other fields.
        let canonical = format!(
            "w={};h={};q={};f={};url={}",
            width,
            height,
            request.quality(),
            request.format().as_str(),
            request.source_url().as_str(),
        );

        CacheKey(hex::encode(Sha256::digest(canonical.as_bytes())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
