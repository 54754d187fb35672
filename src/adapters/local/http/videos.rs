use super::{ApiError, AppState};
use crate::adapters::local::events::AssetEvent;
use crate::application::ingest::{CatalogQuery, DetailsPatch, NewAsset};
use crate::domain::asset::{
    parse_tags, Asset, AssetDetails, AssetId, ProcessingStatus, Resolution, Visibility,
    DEFAULT_GENRE,
};
use crate::domain::av::cmd::MediaToolchain;
use crate::domain::layout::{generate_source_name, is_accepted_video_file};
use axum::extract::multipart::Field;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use futures::{Stream, TryStreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::convert::Infallible;
use std::future::Future;
use std::path::Path as FsPath;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::io::StreamReader;

/// Public shape of an asset.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoView {
    pub id: AssetId,
    pub title: String,
    pub description: String,
    pub genre: String,
    pub tags: Vec<String>,
    pub duration: u64,
    pub file_size: u64,
    pub resolution: Resolution,
    pub codec: String,
    pub thumbnail: Option<String>,
    pub hls_path: Option<String>,
    pub ready: bool,
    pub processing_status: ProcessingStatus,
    pub processing_error: Option<String>,
    pub progress: u8,
    pub is_public: bool,
    pub requires_subscription: bool,
    pub views: u64,
    pub uploaded_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Asset> for VideoView {
    fn from(a: Asset) -> Self {
        Self {
            id: a.id,
            title: a.details.title,
            description: a.details.description,
            genre: a.details.genre,
            tags: a.details.tags,
            duration: a.metadata.duration,
            file_size: a.metadata.file_size,
            resolution: a.metadata.resolution,
            codec: a.metadata.codec,
            thumbnail: a
                .thumbnail
                .map(|name| format!("/api/stream/thumbnail/{}", name)),
            hls_path: a.hls_path,
            ready: a.ready,
            processing_status: a.status,
            processing_error: a.processing_error,
            progress: a.progress,
            is_public: a.visibility.public,
            requires_subscription: a.visibility.requires_gated_access,
            views: a.views,
            uploaded_by: a.owner,
            created_at: a.created_at,
            updated_at: a.updated_at,
        }
    }
}

fn parse_id(raw: &str) -> Result<AssetId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::not_found("Video not found"))
}

/// Text fields and the stored file of an upload form.
#[derive(Default)]
struct UploadForm {
    source_file: Option<String>,
    fields: HashMap<String, String>,
}

impl UploadForm {
    async fn read(&mut self, multipart: &mut Multipart, uploads: &FsPath) -> Result<(), ApiError> {
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::bad_request(format!("Invalid upload: {}", e)))?
        {
            let name = field.name().unwrap_or_default().to_string();
            match field.file_name().map(str::to_string) {
                Some(original) if self.source_file.is_none() => {
                    if !is_accepted_video_file(&original) {
                        return Err(ApiError::bad_request(
                            "Only video files are allowed (mp4, mpeg, mov, avi, webm, mkv)",
                        ));
                    }
                    let stored = generate_source_name(&original);
                    self.source_file = Some(stored.clone());
                    let written = stream_to_file(&uploads.join(&stored), field)
                        .await
                        .map_err(|e| ApiError::bad_request(format!("Upload failed: {}", e)))?;
                    tracing::info!(file = %stored, bytes = written, "Upload stored");
                }
                Some(_) => {}
                None => {
                    let value = field
                        .text()
                        .await
                        .map_err(|e| ApiError::bad_request(format!("Invalid upload: {}", e)))?;
                    self.fields.insert(name, value);
                }
            }
        }
        Ok(())
    }

    async fn discard(&self, uploads: &FsPath) {
        if let Some(stored) = &self.source_file {
            let _ = tokio::fs::remove_file(uploads.join(stored)).await;
        }
    }

    fn text(&self, key: &str) -> Option<&str> {
        self.fields
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }
}

async fn stream_to_file(path: &FsPath, field: Field<'_>) -> std::io::Result<u64> {
    let body = field.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
    let body_reader = StreamReader::new(body);
    futures::pin_mut!(body_reader);
    let mut file_writer = BufWriter::new(File::create(path).await?);
    let written = tokio::io::copy(&mut body_reader, &mut file_writer).await?;
    file_writer.flush().await?;
    Ok(written)
}

pub async fn upload<E: MediaToolchain + 'static>(
    State(state): State<AppState<E>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let principal = state.require_admin(&headers)?;
    let uploads = state.ingest.store().uploads_dir();
    tokio::fs::create_dir_all(&uploads)
        .await
        .map_err(ApiError::internal)?;

    let mut form = UploadForm::default();
    if let Err(e) = form.read(&mut multipart, &uploads).await {
        form.discard(&uploads).await;
        return Err(e);
    }
    let Some(source_file) = form.source_file.clone() else {
        return Err(ApiError::bad_request("No video file provided"));
    };

    let details = AssetDetails {
        title: form.text("title").unwrap_or_default().to_string(),
        description: form.text("description").unwrap_or_default().to_string(),
        genre: form.text("genre").unwrap_or(DEFAULT_GENRE).to_string(),
        tags: form.text("tags").map(parse_tags).unwrap_or_default(),
    };
    let visibility = Visibility {
        public: form.text("isPublic") == Some("true"),
        requires_gated_access: form.text("requiresSubscription") != Some("false"),
    };

    let asset = state
        .ingest
        .create(NewAsset {
            source_file,
            owner: principal.id().unwrap_or_default().to_string(),
            visibility,
            details,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "Video uploaded successfully. Processing started.",
            "video": VideoView::from(asset),
        })),
    ))
}

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub page: Option<usize>,
    pub limit: Option<usize>,
    pub genre: Option<String>,
    pub search: Option<String>,
}

pub async fn list<E: MediaToolchain + 'static>(
    State(state): State<AppState<E>>,
    Query(params): Query<ListParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let page = state
        .ingest
        .list_catalog(CatalogQuery {
            page: params.page,
            limit: params.limit,
            genre: params.genre,
            search: params.search,
        })
        .await?;
    let videos: Vec<VideoView> = page.videos.into_iter().map(VideoView::from).collect();
    Ok(Json(json!({
        "success": true,
        "videos": videos,
        "pagination": {
            "total": page.total,
            "page": page.page,
            "pages": page.pages,
            "limit": page.limit,
        },
    })))
}

pub async fn genres<E: MediaToolchain + 'static>(
    State(state): State<AppState<E>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let genres = state.ingest.genres().await?;
    Ok(Json(json!({ "success": true, "genres": genres })))
}

pub async fn get_one<E: MediaToolchain + 'static>(
    State(state): State<AppState<E>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let id = parse_id(&id)?;
    let asset = state.ingest.record_view(&id).await?;
    Ok(Json(json!({ "success": true, "video": VideoView::from(asset) })))
}

pub async fn status<E: MediaToolchain + 'static>(
    State(state): State<AppState<E>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let id = parse_id(&id)?;
    let status = state.ingest.status(&id).await?;
    Ok(Json(json!({
        "success": true,
        "status": status.status,
        "progress": status.progress,
        "ready": status.ready,
        "error": status.error,
    })))
}

fn sse_event(event: &AssetEvent) -> Event {
    Event::default()
        .event(event.name())
        .data(serde_json::to_string(event).unwrap_or_default())
}

fn is_terminal(event: &AssetEvent) -> bool {
    matches!(event, AssetEvent::Status { status, .. } if status.is_terminal())
}

fn status_event(asset: &Asset) -> AssetEvent {
    AssetEvent::Status {
        asset_id: asset.id,
        status: asset.status,
        error: asset.processing_error.clone(),
    }
}

/// Current state first, then live updates until the asset settles. A lagged
/// receiver may have missed the terminal event, so `refresh` re-reads the record.
fn asset_events<F, Fut>(
    snapshot: AssetEvent,
    receiver: broadcast::Receiver<AssetEvent>,
    refresh: F,
) -> impl Stream<Item = Result<Event, Infallible>>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Option<AssetEvent>>,
{
    let id = *snapshot.asset_id();
    let state = (!is_terminal(&snapshot)).then_some((receiver, refresh));
    let initial = futures::stream::once(async move { Ok::<_, Infallible>(sse_event(&snapshot)) });
    let live = futures::stream::unfold(state, move |state| async move {
        let (mut receiver, refresh) = state?;
        let event = loop {
            match receiver.recv().await {
                Ok(event) if event.asset_id() == &id => break event,
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(asset_id = %id, skipped, "Event stream lagged, re-reading status");
                    break refresh().await?;
                }
                Err(RecvError::Closed) => return None,
            }
        };
        let next = (!is_terminal(&event)).then_some((receiver, refresh));
        Some((Ok::<_, Infallible>(sse_event(&event)), next))
    });
    futures::StreamExt::chain(initial, live)
}

pub async fn events<E: MediaToolchain + 'static>(
    State(state): State<AppState<E>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_id(&id)?;
    // Subscribe before reading the record so no transition slips between the two
    let receiver = state.events.subscribe();
    let snapshot = status_event(&state.ingest.get(&id).await?);
    let ingest = state.ingest.clone();
    let refresh = move || {
        let ingest = ingest.clone();
        async move { ingest.get(&id).await.ok().map(|asset| status_event(&asset)) }
    };
    Ok(Sse::new(asset_events(snapshot, receiver, refresh)).keep_alive(KeepAlive::default()))
}

/// `tags` may come as a list or as a comma separated string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum TagsInput {
    List(Vec<String>),
    Text(String),
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateVideoBody {
    pub title: Option<String>,
    pub description: Option<String>,
    pub genre: Option<String>,
    pub tags: Option<TagsInput>,
    pub is_public: Option<bool>,
    pub requires_subscription: Option<bool>,
}

pub async fn update<E: MediaToolchain + 'static>(
    State(state): State<AppState<E>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<UpdateVideoBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.require_admin(&headers)?;
    let id = parse_id(&id)?;
    let tags = body.tags.map(|tags| match tags {
        TagsInput::List(list) => list
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect(),
        TagsInput::Text(text) => parse_tags(&text),
    });
    let asset = state
        .ingest
        .update_details(
            &id,
            DetailsPatch {
                title: body.title.map(|t| t.trim().to_string()),
                description: body.description,
                genre: body.genre,
                tags,
                public: body.is_public,
                requires_gated_access: body.requires_subscription,
            },
        )
        .await?;
    Ok(Json(json!({ "success": true, "video": VideoView::from(asset) })))
}

pub async fn remove<E: MediaToolchain + 'static>(
    State(state): State<AppState<E>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.require_admin(&headers)?;
    let id = parse_id(&id)?;
    state.ingest.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}
