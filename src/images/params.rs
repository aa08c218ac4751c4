use reqwest::Url;

use crate::images::ImageProxyError;

pub const MAX_DIMENSION: u32 = 3840;
pub const MIN_QUALITY: u8 = 10;
pub const MAX_QUALITY: u8 = 100;
pub const DEFAULT_QUALITY: u8 = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OutputFormat {
    #[default]
    Webp,
    Avif,
    Jpeg,
    Png,
}

impl OutputFormat {
    /// Lenient parse: anything unrecognized becomes the default format.
    pub fn from_param(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            Some("webp") => OutputFormat::Webp,
            Some("avif") => OutputFormat::Avif,
            Some("jpeg") | Some("jpg") => OutputFormat::Jpeg,
            Some("png") => OutputFormat::Png,
            _ => OutputFormat::default(),
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            OutputFormat::Webp => "image/webp",
            OutputFormat::Avif => "image/avif",
            OutputFormat::Jpeg => "image/jpeg",
            OutputFormat::Png => "image/png",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Webp => "webp",
            OutputFormat::Avif => "avif",
            OutputFormat::Jpeg => "jpeg",
            OutputFormat::Png => "png",
        }
    }
}

/// Query parameters exactly as received, before any validation.
#[derive(Debug, Clone, Default, FromForm)]
pub struct RawTransformQuery {
    pub url: Option<String>,
    pub w: Option<String>,
    pub h: Option<String>,
    pub q: Option<String>,
    pub f: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformRequest {
    source_url: Url,
    width: Option<u32>,
    height: Option<u32>,
    quality: u8,
    format: OutputFormat,
}

impl TransformRequest {
    pub fn source_url(&self) -> &Url {
        &self.source_url
    }

    pub fn width(&self) -> Option<u32> {
        self.width
    }

    pub fn height(&self) -> Option<u32> {
        self.height
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }
}

impl TryFrom<&RawTransformQuery> for TransformRequest {
    type Error = ImageProxyError;

    fn try_from(raw: &RawTransformQuery) -> Result<Self, Self::Error> {
        Ok(TransformRequest {
            source_url: parse_source_url(raw.url.as_deref())?,
            width: parse_dimension("w", raw.w.as_deref())?,
            height: parse_dimension("h", raw.h.as_deref())?,
            quality: parse_quality(raw.q.as_deref()),
            format: OutputFormat::from_param(raw.f.as_deref()),
        })
    }
}

fn parse_source_url(value: Option<&str>) -> Result<Url, ImageProxyError> {
    let value = match value.map(str::trim) {
        Some(v) if !v.is_empty() => v,
        _ => return Err(ImageProxyError::InvalidSource("missing url parameter".to_string())),
    };

    let url = Url::parse(value)
        .map_err(|e| ImageProxyError::InvalidSource(format!("'{}' is not an absolute URL: {}", value, e)))?;

    if url.scheme() != "https" {
        return Err(ImageProxyError::InvalidSource(format!(
            "scheme '{}' is not allowed, only https",
            url.scheme()
        )));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(ImageProxyError::InvalidSource(format!("'{}' has no host", value)));
    }

    Ok(url)
}

fn parse_dimension(name: &str, value: Option<&str>) -> Result<Option<u32>, ImageProxyError> {
    let value = match value.map(str::trim) {
        Some(v) if !v.is_empty() => v,
        _ => return Ok(None),
    };

    match value.parse::<u32>() {
        Ok(n) if (1..=MAX_DIMENSION).contains(&n) => Ok(Some(n)),
        _ => Err(ImageProxyError::InvalidDimension(format!(
            "{} must be an integer between 1 and {}, got '{}'",
            name, MAX_DIMENSION, value
        ))),
    }
}

// Out-of-range quality is corrected, never rejected. Parsed as a float so
// integers of any length saturate; fractions are truncated.
fn parse_quality(value: Option<&str>) -> u8 {
    value
        .map(str::trim)
        .and_then(|v| v.parse::<f64>().ok())
        .filter(|q| !q.is_nan())
        .map(|q| q.clamp(MIN_QUALITY as f64, MAX_QUALITY as f64) as u8)
        .unwrap_or(DEFAULT_QUALITY)
}
