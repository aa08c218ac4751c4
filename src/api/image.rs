use std::io::Cursor;

use bytes::Bytes;
use rocket::http::{ContentType, Header, Status};
use rocket::State;
use rocket::{request::Request, response::{self, Responder, Response}};

use crate::api::ApiError;
use crate::cache::{CacheEntry, CacheKey, ImageCache};
use crate::images::{ImageProxy, RawTransformQuery, TransformRequest};

/// A day at the edge, a year in the browser.
const CACHE_CONTROL: &str = "public, max-age=31536000, s-maxage=86400";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
}

impl CacheStatus {
    fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
        }
    }
}

// Responder for transformed image data
pub struct ImageResponse {
    pub data: Bytes,
    pub content_type: String,
    pub cache_status: CacheStatus,
}

impl ImageResponse {
    fn etag(&self) -> String {
        format!("\"{:x}\"", md5::compute(&self.data))
    }
}

fn etag_matches(if_none_match: &str, etag: &str) -> bool {
    if_none_match
        .split(',')
        .map(|candidate| candidate.trim().trim_start_matches("W/"))
        .any(|candidate| candidate == "*" || candidate == etag)
}

impl<'r> Responder<'r, 'static> for ImageResponse {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'static> {
        let etag = self.etag();
        let cache_header = Header::new("X-Cache", self.cache_status.as_str());

        if let Some(if_none_match) = req.headers().get_one("If-None-Match") {
            if etag_matches(if_none_match, &etag) {
                return Response::build()
                    .status(Status::NotModified)
                    .header(Header::new("ETag", etag))
                    .header(Header::new("Cache-Control", CACHE_CONTROL))
                    .header(Header::new("Vary", "Accept"))
                    .header(cache_header)
                    .ok();
            }
        }

        let content_type = ContentType::parse_flexible(&self.content_type).unwrap_or(ContentType::Binary);
        let length = self.data.len();
        Response::build()
            .header(content_type)
            .header(Header::new("Cache-Control", CACHE_CONTROL))
            .header(Header::new("Vary", "Accept"))
            .header(Header::new("ETag", etag))
            .header(cache_header)
            .sized_body(length, Cursor::new(self.data))
            .ok()
    }
}

#[get("/image-proxy?<query..>")]
pub async fn proxy_image(
    query: RawTransformQuery,
    image_cache: &State<ImageCache>,
    image_proxy: &State<ImageProxy>,
) -> Result<ImageResponse, ApiError> {
    let request = TransformRequest::try_from(&query)?;
    let key = CacheKey::derive(&request);

    image_cache.maybe_sweep();

    if let Some(entry) = image_cache.lookup(&key) {
        log::debug!("Image cache hit for {} ({})", request.source_url(), key);
        return Ok(ImageResponse {
            data: entry.bytes.clone(),
            content_type: entry.content_type.clone(),
            cache_status: CacheStatus::Hit,
        });
    }

    log::debug!("Image cache miss for {} ({})", request.source_url(), key);

    let transformed = image_proxy.fetch_and_convert_image(&request).await?;
    let data = Bytes::from(transformed.bytes);
    let content_type = transformed.content_type.to_string();

    image_cache.store(CacheEntry::new(key, data.clone(), content_type.clone()));

    Ok(ImageResponse {
        data,
        content_type,
        cache_status: CacheStatus::Miss,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use reqwest::Url;
    use rocket::figment::Figment;
    use rocket::local::asynchronous::{Client, LocalResponse};

    use crate::images::tools::tests::png_bytes;
    use crate::images::fetch::FetchedImage;
    use crate::images::{ImageProxyError, OriginFetcher};

    type Respond = Box<dyn Fn() -> Result<FetchedImage, ImageProxyError> + Send + Sync>;

    struct FakeOrigin {
        calls: AtomicUsize,
        delay: Duration,
        respond: Respond,
    }

    impl FakeOrigin {
        fn new(respond: Respond) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                delay: Duration::ZERO,
                respond,
            })
        }

        fn serving_png(width: u32, height: u32) -> Arc<Self> {
            let png = Bytes::from(png_bytes(width, height));
            Self::new(Box::new(move || {
                Ok(FetchedImage {
                    bytes: png.clone(),
                    content_type: "image/png".to_string(),
                })
            }))
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl OriginFetcher for FakeOrigin {
        async fn fetch(&self, _url: &Url) -> Result<FetchedImage, ImageProxyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            (self.respond)()
        }
    }

    async fn client_with(origin: Arc<FakeOrigin>, ttl: Duration, max_pixels: u64) -> Client {
        let rocket = crate::build_rocket(
            Figment::from(rocket::Config::debug_default()),
            ImageCache::new(ttl, 0.0),
            ImageProxy::new(origin, max_pixels),
        );
        Client::tracked(rocket).await.expect("valid rocket instance")
    }

    async fn client(origin: Arc<FakeOrigin>) -> Client {
        client_with(origin, Duration::from_secs(3600), 50_000_000).await
    }

    fn header<'a>(response: &'a LocalResponse<'_>, name: &str) -> Option<&'a str> {
        response.headers().get_one(name)
    }

    const SRC: &str = "https%3A%2F%2Fcdn.example.com%2Fproducts%2F1.png";

    #[rocket::async_test]
    async fn miss_then_hit_serves_identical_bytes() {
        let origin = FakeOrigin::serving_png(80, 40);
        let client = client(origin.clone()).await;
        let uri = format!("/image-proxy?url={}&w=40", SRC);

        let first = client.get(uri.clone()).dispatch().await;
        assert_eq!(first.status(), Status::Ok);
        assert_eq!(header(&first, "X-Cache"), Some("MISS"));
        assert_eq!(header(&first, "Content-Type"), Some("image/webp"));
        assert_eq!(header(&first, "Vary"), Some("Accept"));
        assert_eq!(header(&first, "Cache-Control"), Some(CACHE_CONTROL));
        let first_etag = header(&first, "ETag").map(String::from);
        let first_body = first.into_bytes().await.unwrap();
        assert!(!first_body.is_empty());

        let second = client.get(uri).dispatch().await;
        assert_eq!(second.status(), Status::Ok);
        assert_eq!(header(&second, "X-Cache"), Some("HIT"));
        assert_eq!(header(&second, "ETag").map(String::from), first_etag);
        assert_eq!(second.into_bytes().await.unwrap(), first_body);

        assert_eq!(origin.calls(), 1);
    }

    #[rocket::async_test]
    async fn expired_entry_is_refetched() {
        let origin = FakeOrigin::serving_png(20, 20);
        let client = client_with(origin.clone(), Duration::from_millis(50), 50_000_000).await;
        let uri = format!("/image-proxy?url={}", SRC);

        let first = client.get(uri.clone()).dispatch().await;
        assert_eq!(header(&first, "X-Cache"), Some("MISS"));

        tokio::time::sleep(Duration::from_millis(120)).await;

        let second = client.get(uri).dispatch().await;
        assert_eq!(second.status(), Status::Ok);
        assert_eq!(header(&second, "X-Cache"), Some("MISS"));
        assert_eq!(origin.calls(), 2);
    }

    #[rocket::async_test]
    async fn insecure_url_is_rejected_before_fetching() {
        let origin = FakeOrigin::serving_png(20, 20);
        let client = client(origin.clone()).await;

        let response = client
            .get("/image-proxy?url=http%3A%2F%2Fcdn.example.com%2F1.png")
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::BadRequest);
        assert_eq!(header(&response, "Cache-Control"), Some("no-store"));

        let response = client.get("/image-proxy").dispatch().await;
        assert_eq!(response.status(), Status::BadRequest);

        assert_eq!(origin.calls(), 0);
    }

    #[rocket::async_test]
    async fn out_of_range_width_is_rejected() {
        let origin = FakeOrigin::serving_png(20, 20);
        let client = client(origin.clone()).await;

        let response = client.get(format!("/image-proxy?url={}&w=5000", SRC)).dispatch().await;
        assert_eq!(response.status(), Status::BadRequest);
        assert!(response.into_string().await.unwrap().contains("3840"));
        assert_eq!(origin.calls(), 0);
    }

    #[rocket::async_test]
    async fn out_of_range_quality_is_clamped_not_rejected() {
        let client = client(FakeOrigin::serving_png(20, 20)).await;

        for q in ["5", "500"] {
            let response = client.get(format!("/image-proxy?url={}&q={}&f=jpeg", SRC, q)).dispatch().await;
            assert_eq!(response.status(), Status::Ok, "q={}", q);
        }
    }

    #[rocket::async_test]
    async fn jpg_alias_is_served_as_image_jpeg() {
        let client = client(FakeOrigin::serving_png(20, 20)).await;

        let response = client.get(format!("/image-proxy?url={}&f=jpg", SRC)).dispatch().await;
        assert_eq!(response.status(), Status::Ok);
        assert_eq!(header(&response, "Content-Type"), Some("image/jpeg"));
    }

    #[rocket::async_test]
    async fn unknown_format_falls_back_to_webp() {
        let client = client(FakeOrigin::serving_png(20, 20)).await;

        let response = client.get(format!("/image-proxy?url={}&f=tiff", SRC)).dispatch().await;
        assert_eq!(response.status(), Status::Ok);
        assert_eq!(header(&response, "Content-Type"), Some("image/webp"));
    }

    #[rocket::async_test]
    async fn upstream_failures_map_to_statuses_and_are_not_cached() {
        let cases: Vec<(fn() -> ImageProxyError, Status)> = vec![
            (|| ImageProxyError::NotAnImage("text/html".into()), Status::BadRequest),
            (|| ImageProxyError::UpstreamTimeout(Duration::from_secs(10)), Status::GatewayTimeout),
            (|| ImageProxyError::UpstreamError(404), Status::NotFound),
        ];

        for (make_error, expected) in cases {
            let origin = FakeOrigin::new(Box::new(move || Err(make_error())));
            let client = client(origin.clone()).await;

            let response = client.get(format!("/image-proxy?url={}", SRC)).dispatch().await;
            assert_eq!(response.status(), expected);
            assert_eq!(header(&response, "Content-Type"), Some("text/plain; charset=utf-8"));

            let cache = client.rocket().state::<ImageCache>().unwrap();
            assert!(cache.is_empty());
        }
    }

    #[rocket::async_test]
    async fn oversized_image_is_refused_with_413() {
        let origin = FakeOrigin::serving_png(100, 100);
        let client = client_with(origin, Duration::from_secs(3600), 9_999).await;

        let response = client.get(format!("/image-proxy?url={}&w=10", SRC)).dispatch().await;
        assert_eq!(response.status(), Status::PayloadTooLarge);
        assert!(client.rocket().state::<ImageCache>().unwrap().is_empty());
    }

    #[rocket::async_test]
    async fn undecodable_image_is_a_server_error() {
        let origin = FakeOrigin::new(Box::new(|| {
            Ok(FetchedImage {
                bytes: Bytes::from_static(b"not really a png"),
                content_type: "image/png".to_string(),
            })
        }));
        let client = client(origin).await;

        let response = client.get(format!("/image-proxy?url={}", SRC)).dispatch().await;
        assert_eq!(response.status(), Status::InternalServerError);
        assert!(client.rocket().state::<ImageCache>().unwrap().is_empty());
    }

    #[rocket::async_test]
    async fn matching_etag_yields_not_modified() {
        let client = client(FakeOrigin::serving_png(20, 20)).await;
        let uri = format!("/image-proxy?url={}", SRC);

        let first = client.get(uri.clone()).dispatch().await;
        let etag = header(&first, "ETag").unwrap().to_string();

        let second = client
            .get(uri)
            .header(Header::new("If-None-Match", etag.clone()))
            .dispatch()
            .await;
        assert_eq!(second.status(), Status::NotModified);
        assert_eq!(header(&second, "ETag"), Some(etag.as_str()));
    }

    #[rocket::async_test]
    async fn concurrent_cold_misses_converge_on_one_entry() {
        let png = Bytes::from(png_bytes(30, 30));
        let origin = Arc::new(FakeOrigin {
            calls: AtomicUsize::new(0),
            delay: Duration::from_millis(50),
            respond: Box::new(move || {
                Ok(FetchedImage {
                    bytes: png.clone(),
                    content_type: "image/png".to_string(),
                })
            }),
        });
        let client = client(origin.clone()).await;
        let uri = format!("/image-proxy?url={}&w=10&h=10", SRC);

        let responses = futures::future::join_all((0..4).map(|_| client.get(uri.clone()).dispatch())).await;
        for response in &responses {
            assert_eq!(response.status(), Status::Ok);
        }

        // No single-flight: every cold miss may fetch on its own.
        assert!((1..=4).contains(&origin.calls()));
        assert_eq!(client.rocket().state::<ImageCache>().unwrap().len(), 1);

        let after = client.get(uri).dispatch().await;
        assert_eq!(header(&after, "X-Cache"), Some("HIT"));
    }

    #[test]
    fn if_none_match_handles_lists_and_weak_tags() {
        assert!(etag_matches("\"abc\"", "\"abc\""));
        assert!(etag_matches("\"x\", W/\"abc\"", "\"abc\""));
        assert!(etag_matches("*", "\"abc\""));
        assert!(!etag_matches("\"abd\"", "\"abc\""));
    }
}
