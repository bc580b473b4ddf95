use std::{collections::HashMap, sync::Arc};

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cache::{CacheStats, CacheWarmer, ViewCache, valid_family_id};

use super::{
    adapter::{HttpOptions, ViewRoute, serve_view},
    error::HttpError,
    middleware::{log_responses, set_request_context},
};

#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<ViewCache>,
    pub warmer: Arc<CacheWarmer>,
    pub options: Arc<HttpOptions>,
}

impl AppState {
    pub fn new(warmer: Arc<CacheWarmer>, options: HttpOptions) -> Self {
        Self {
            cache: Arc::clone(warmer.cache()),
            warmer,
            options: Arc::new(options),
        }
    }
}

/// A fixed view mounted at `path`.
#[derive(Debug, Clone)]
pub struct ViewEndpoint {
    pub path: String,
    pub route: ViewRoute,
}

/// A view family mounted at `path`, which carries an `{id}` segment.
#[derive(Debug, Clone)]
pub struct FamilyEndpoint {
    pub name: String,
    pub path: String,
}

pub fn build_router(
    state: AppState,
    views: &[ViewEndpoint],
    families: &[FamilyEndpoint],
) -> Router {
    let mut view_routes = Router::new();
    for endpoint in views {
        let route = endpoint.route.clone();
        view_routes = view_routes.route(
            &endpoint.path,
            get(move |State(state): State<AppState>, headers: HeaderMap| {
                let route = route.clone();
                async move { serve_view(&state.cache, &state.options, route, &headers).await }
            }),
        );
    }
    for endpoint in families {
        let name = endpoint.name.clone();
        view_routes = view_routes.route(
            &endpoint.path,
            get(
                move |State(state): State<AppState>, Path(id): Path<String>, headers: HeaderMap| {
                    let name = name.clone();
                    async move { family_view(state, &name, &id, &headers).await }
                },
            ),
        );
    }

    let view_routes = view_routes.layer(state.options.compression_layer());

    let control_routes = Router::new()
        .route("/_cache/invalidate", post(invalidate_and_refresh))
        .route("/_cache/views/{key}", delete(invalidate_view))
        .route("/_cache/stats", get(cache_stats))
        .route("/_health", get(health));

    view_routes
        .merge(control_routes)
        .with_state(state)
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}

async fn family_view(state: AppState, name: &str, id: &str, headers: &HeaderMap) -> Response {
    if !valid_family_id(id) {
        return HttpError::bad_request("http::router::family_view", format!("invalid id `{id}`"))
            .into_response();
    }
    match state.warmer.family_view(name, id) {
        Some((key, fetcher, ttl)) => {
            let route = ViewRoute { key, fetcher, ttl };
            serve_view(&state.cache, &state.options, route, headers).await
        }
        None => HttpError::not_found("http::router::family_view", format!("family `{name}`"))
            .into_response(),
    }
}

/// Body of `POST /_cache/invalidate`. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct InvalidateRequest {
    /// New top-N warm parameters per family.
    pub families: HashMap<String, Vec<String>>,
}

#[derive(Debug, Serialize)]
struct InvalidateAccepted {
    scheduled: bool,
    families: HashMap<String, usize>,
}

async fn invalidate_and_refresh(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Response, HttpError> {
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        InvalidateRequest::default()
    } else {
        serde_json::from_slice::<InvalidateRequest>(&body)
            .map_err(|err| HttpError::bad_request("http::router::invalidate", err.to_string()))?
    };

    let mut families = HashMap::new();
    for (name, ids) in &request.families {
        let kept = state
            .warmer
            .set_family_parameters(name, ids)
            .map_err(|err| HttpError::bad_request("http::router::invalidate", err.to_string()))?;
        families.insert(name.clone(), kept);
    }

    let scheduled = state.warmer.spawn_invalidate_and_refresh();
    info!(
        target = "viewcache::http::control",
        scheduled,
        families = families.len(),
        "invalidate-and-refresh requested"
    );
    Ok((
        StatusCode::ACCEPTED,
        Json(InvalidateAccepted {
            scheduled,
            families,
        }),
    )
        .into_response())
}

async fn invalidate_view(State(state): State<AppState>, Path(key): Path<String>) -> StatusCode {
    let removed = state.cache.invalidate(&key);
    info!(target = "viewcache::http::control", key = %key, removed, "view invalidated");
    StatusCode::NO_CONTENT
}

async fn cache_stats(State(state): State<AppState>) -> Json<CacheStats> {
    Json(state.cache.stats())
}

async fn health() -> StatusCode {
    StatusCode::NO_CONTENT
}
