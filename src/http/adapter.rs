//! Turns a `(key, fetcher, ttl)` triple into a JSON response.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{
        HeaderMap, HeaderValue, StatusCode,
        header::{CACHE_CONTROL, CONTENT_TYPE, ETAG, IF_NONE_MATCH, VARY},
    },
    response::{IntoResponse, Response},
};
use metrics::counter;
use time::OffsetDateTime;
use tower_http::compression::{CompressionLayer, predicate::SizeAbove};
use tracing::{debug, instrument};

use crate::cache::{SharedFetcher, ViewCache};

use super::error::HttpError;
use super::validator::{ValidatorScheme, content_etag, if_none_match, time_bucket_etag};

const METRIC_NOT_MODIFIED: &str = "viewcache_http_not_modified_total";

const DEFAULT_CACHE_CONTROL_MARGIN_SECS: u64 = 10;
const DEFAULT_STALE_WHILE_REVALIDATE_SECS: u64 = 60;
const MIN_STALE_WHILE_REVALIDATE_SECS: u64 = 30;
const MAX_STALE_WHILE_REVALIDATE_SECS: u64 = 60;
const DEFAULT_COMPRESSION_MIN_BYTES: usize = 1024;

/// Response shaping shared by every view route.
#[derive(Debug, Clone)]
pub struct HttpOptions {
    pub cache_control_margin: Duration,
    pub stale_while_revalidate: Duration,
    pub compression_min_bytes: usize,
    pub validator: ValidatorScheme,
    pub build_tag: String,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            cache_control_margin: Duration::from_secs(DEFAULT_CACHE_CONTROL_MARGIN_SECS),
            stale_while_revalidate: Duration::from_secs(DEFAULT_STALE_WHILE_REVALIDATE_SECS),
            compression_min_bytes: DEFAULT_COMPRESSION_MIN_BYTES,
            validator: ValidatorScheme::ContentHash,
            build_tag: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl From<&crate::config::HttpSettings> for HttpOptions {
    fn from(settings: &crate::config::HttpSettings) -> Self {
        Self {
            cache_control_margin: settings.cache_control_margin,
            stale_while_revalidate: settings.stale_while_revalidate,
            compression_min_bytes: settings.compression_min_bytes,
            validator: settings.validator,
            build_tag: settings.build_tag.clone(),
        }
    }
}

impl HttpOptions {
    /// `public, max-age=<ttl - margin>, stale-while-revalidate=<window>`.
    pub fn cache_control(&self, ttl: Duration) -> String {
        let max_age = ttl.saturating_sub(self.cache_control_margin).as_secs();
        let swr = self.stale_while_revalidate.as_secs().clamp(
            MIN_STALE_WHILE_REVALIDATE_SECS,
            MAX_STALE_WHILE_REVALIDATE_SECS,
        );
        format!("public, max-age={max_age}, stale-while-revalidate={swr}")
    }

    /// gzip/deflate for bodies of at least `compression_min_bytes`.
    pub fn compression_layer(&self) -> CompressionLayer<SizeAbove> {
        CompressionLayer::new()
            .gzip(true)
            .deflate(true)
            .compress_when(SizeAbove::new(self.compression_threshold()))
    }

    /// `SizeAbove` compresses strictly larger bodies and counts in `u16`.
    fn compression_threshold(&self) -> u16 {
        let inclusive = self.compression_min_bytes.saturating_sub(1);
        u16::try_from(inclusive).unwrap_or(u16::MAX)
    }

    fn etag(&self, key: &str, ttl: Duration, body: &[u8]) -> String {
        match self.validator {
            ValidatorScheme::ContentHash => content_etag(body),
            ValidatorScheme::TimeBucket => {
                let now = u64::try_from(OffsetDateTime::now_utc().unix_timestamp()).unwrap_or(0);
                time_bucket_etag(key, ttl, now, &self.build_tag)
            }
        }
    }
}

/// One cached view as served over HTTP.
#[derive(Clone)]
pub struct ViewRoute {
    pub key: String,
    pub fetcher: SharedFetcher,
    pub ttl: Duration,
}

impl std::fmt::Debug for ViewRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewRoute")
            .field("key", &self.key)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

/// Resolve `route` through the cache and render it for a request carrying
/// `headers`.
#[instrument(skip_all, fields(key = %route.key))]
pub async fn serve_view(
    cache: &Arc<ViewCache>,
    options: &HttpOptions,
    route: ViewRoute,
    headers: &HeaderMap,
) -> Response {
    match render_view(cache, options, route, headers).await {
        Ok(response) => response,
        Err(error) => error.into_response(),
    }
}

async fn render_view(
    cache: &Arc<ViewCache>,
    options: &HttpOptions,
    route: ViewRoute,
    headers: &HeaderMap,
) -> Result<Response, HttpError> {
    let ViewRoute { key, fetcher, ttl } = route;
    let data = cache.get(&key, fetcher, ttl).await?;
    let body = serde_json::to_vec(&*data)
        .map_err(|err| HttpError::internal("http::adapter::serialize", &err))?;

    let etag = options.etag(&key, ttl, &body);
    let mut response_headers = HeaderMap::new();
    insert_header(&mut response_headers, ETAG, &etag)?;
    insert_header(&mut response_headers, CACHE_CONTROL, &options.cache_control(ttl))?;
    response_headers.insert(VARY, HeaderValue::from_static("accept-encoding"));

    let not_modified = headers
        .get(IF_NONE_MATCH)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| if_none_match(value, &etag));
    if not_modified {
        counter!(METRIC_NOT_MODIFIED).increment(1);
        debug!(key = %key, "validator matched");
        return Ok((StatusCode::NOT_MODIFIED, response_headers).into_response());
    }

    response_headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    Ok((StatusCode::OK, response_headers, Body::from(body)).into_response())
}

fn insert_header(
    headers: &mut HeaderMap,
    name: axum::http::HeaderName,
    value: &str,
) -> Result<(), HttpError> {
    let value = HeaderValue::from_str(value)
        .map_err(|err| HttpError::internal("http::adapter::header", &err))?;
    headers.insert(name, value);
    Ok(())
}
