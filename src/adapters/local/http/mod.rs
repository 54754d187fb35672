//! HTTP inbound adapter: catalog, upload and HLS streaming endpoints.

mod error;
pub mod stream;
pub mod videos;

pub use error::ApiError;

use crate::adapters::local::events::hub::EventHub;
use crate::adapters::local::json_store::JsonFileRepository;
use crate::adapters::local::queue::BoundedQueue;
use crate::application::ingest::IngestService;
use crate::application::streaming::StreamService;
use crate::domain::av::cmd::MediaToolchain;
use crate::ports::access::{AccessGate, Principal};
use axum::extract::DefaultBodyLimit;
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, HeaderValue};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub struct AppState<E> {
    pub ingest: Arc<IngestService<JsonFileRepository, BoundedQueue, E>>,
    pub streams: Arc<StreamService<JsonFileRepository>>,
    pub events: Arc<EventHub>,
    pub gate: Arc<dyn AccessGate>,
    pub max_upload_bytes: usize,
    pub client_url: Option<String>,
}

impl<E> Clone for AppState<E> {
    fn clone(&self) -> Self {
        Self {
            ingest: self.ingest.clone(),
            streams: self.streams.clone(),
            events: self.events.clone(),
            gate: self.gate.clone(),
            max_upload_bytes: self.max_upload_bytes,
            client_url: self.client_url.clone(),
        }
    }
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

impl<E> AppState<E> {
    fn authenticate(&self, headers: &HeaderMap) -> Result<Principal, ApiError> {
        let token =
            bearer(headers).ok_or_else(|| ApiError::unauthorized("Not authorized, no token"))?;
        match self.gate.resolve(Some(token)) {
            Principal::Anonymous => Err(ApiError::unauthorized("Not authorized, token failed")),
            principal => Ok(principal),
        }
    }

    pub fn require_admin(&self, headers: &HeaderMap) -> Result<Principal, ApiError> {
        let principal = self.authenticate(headers)?;
        if !principal.is_admin() {
            return Err(ApiError::forbidden("Admin access required"));
        }
        Ok(principal)
    }

    /// Admins, or subscribers with an active subscription.
    pub fn require_stream_access(&self, headers: &HeaderMap) -> Result<Principal, ApiError> {
        let principal = self.authenticate(headers)?;
        if !principal.can_stream() {
            return Err(ApiError::forbidden("Active subscription required"));
        }
        Ok(principal)
    }
}

fn cors(client_url: Option<&str>) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    match client_url.map(HeaderValue::from_str) {
        Some(Ok(origin)) => layer.allow_origin(origin),
        Some(Err(e)) => {
            tracing::warn!(error = %e, "Invalid CLIENT_URL, allowing any origin");
            layer.allow_origin(Any)
        }
        None => layer.allow_origin(Any),
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "timestamp": chrono::Utc::now() }))
}

pub fn router<E: MediaToolchain + 'static>(state: AppState<E>) -> Router {
    let cors = cors(state.client_url.as_deref());
    let body_limit = DefaultBodyLimit::max(state.max_upload_bytes);

    Router::new()
        .route("/api/health", get(health))
        .route("/api/videos", get(videos::list::<E>))
        .route("/api/videos/upload", axum::routing::post(videos::upload::<E>))
        .route("/api/videos/genres/list", get(videos::genres::<E>))
        .route(
            "/api/videos/:id",
            get(videos::get_one::<E>)
                .put(videos::update::<E>)
                .delete(videos::remove::<E>),
        )
        .route("/api/videos/:id/status", get(videos::status::<E>))
        .route("/api/videos/:id/events", get(videos::events::<E>))
        .route("/api/stream/thumbnail/:filename", get(stream::thumbnail::<E>))
        .route("/api/stream/:id/:file", get(stream::media::<E>))
        .layer(body_limit)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
