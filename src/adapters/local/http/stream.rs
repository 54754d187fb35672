use super::{ApiError, AppState};
use crate::application::streaming::ServedFile;
use crate::domain::asset::AssetId;
use crate::domain::av::cmd::MediaToolchain;
use crate::domain::layout::PLAYLIST_NAME;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::HeaderMap;
use axum::response::Response;
use tokio_util::io::ReaderStream;

/// Streams a file from disk without buffering it.
async fn serve(file: ServedFile) -> Result<Response, ApiError> {
    let handle = match tokio::fs::File::open(&file.path).await {
        Ok(handle) => handle,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::not_found("File not found"))
        }
        Err(e) => return Err(ApiError::internal(e)),
    };
    Response::builder()
        .header(CONTENT_TYPE, file.content_type)
        .header(CACHE_CONTROL, file.cache_control)
        .header(CONTENT_LENGTH, file.size.to_string())
        .body(Body::from_stream(ReaderStream::new(handle)))
        .map_err(ApiError::internal)
}

/// `index.m3u8` or one `segment###.ts` of an asset.
pub async fn media<E: MediaToolchain + 'static>(
    State(state): State<AppState<E>>,
    headers: HeaderMap,
    Path((id, file)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    state.require_stream_access(&headers)?;
    let id: AssetId = id
        .parse()
        .map_err(|_| ApiError::not_found("Video not found"))?;

    let served = if file == PLAYLIST_NAME {
        state.streams.get_playlist(&id).await?
    } else {
        state.streams.get_segment(&id, &file).await?
    };
    serve(served).await
}

/// Public, no credentials needed.
pub async fn thumbnail<E: MediaToolchain + 'static>(
    State(state): State<AppState<E>>,
    Path(filename): Path<String>,
) -> Result<Response, ApiError> {
    let served = state.streams.get_thumbnail(&filename).await?;
    serve(served).await
}

#[cfg(test)]
mod tests {
    use super::super::tests::{json_body, request, test_app, TestApp, ADMIN, SUBSCRIBER};
    use crate::domain::asset::{Asset, AssetDetails, AssetId, Visibility};
    use crate::domain::av::encoder::tests::write_fake_output;
    use crate::domain::layout::{hls_public_path, thumbnail_file_name};
    use crate::ports::repository::{asset_update, AssetRepository};
    use axum::body::Body;
    use axum::http::StatusCode;
    use chrono::Utc;

    async fn processing(app: &TestApp) -> Asset {
        let mut asset = Asset::new(
            AssetId::new(),
            String::from("video-1-1.mp4"),
            String::from("admin"),
            Visibility::default(),
            AssetDetails::titled("Clip"),
            Default::default(),
            Utc::now(),
        );
        asset.start_processing(Utc::now()).unwrap();
        app.repo.insert(&asset).await.unwrap();
        write_fake_output(&app.store.hls_dir(&asset.id), 30.0, 10.0);
        asset
    }

    async fn get(app: &TestApp, uri: &str, token: Option<&str>) -> axum::http::Response<Body> {
        app.send(request("GET", uri, token).body(Body::empty()).unwrap())
            .await
    }

    #[tokio::test]
    async fn test_stream_requires_subscription() {
        let app = test_app().await;
        let asset = processing(&app).await;
        let uri = format!("/api/stream/{}/index.m3u8", asset.id);

        assert_eq!(get(&app, &uri, None).await.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            get(&app, &uri, Some("expired")).await.status(),
            StatusCode::UNAUTHORIZED
        );
    }

    #[tokio::test]
    async fn test_playlist_too_early_until_completed() {
        let app = test_app().await;
        let asset = processing(&app).await;
        let uri = format!("/api/stream/{}/index.m3u8", asset.id);

        let response = get(&app, &uri, Some(SUBSCRIBER)).await;
        assert_eq!(response.status().as_u16(), 425);
        assert_eq!(json_body(response).await["status"], "processing");

        let path = hls_public_path(&asset.id);
        app.repo
            .update(&asset.id, asset_update(move |a| a.complete(1, path, Utc::now())))
            .await
            .unwrap();

        let response = get(&app, &uri, Some(SUBSCRIBER)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()["content-type"],
            "application/vnd.apple.mpegurl"
        );
        assert_eq!(
            response.headers()["cache-control"],
            "no-cache, no-store, must-revalidate"
        );
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert!(String::from_utf8_lossy(&body).contains("segment002.ts"));

        let segment_uri = format!("/api/stream/{}/segment001.ts", asset.id);
        let response = get(&app, &segment_uri, Some(ADMIN)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "video/mp2t");
        assert_eq!(response.headers()["cache-control"], "public, max-age=3600");
        let length: u64 = response.headers()["content-length"]
            .to_str()
            .unwrap()
            .parse()
            .unwrap();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(body.len() as u64, length);
    }

    #[tokio::test]
    async fn test_segment_name_validation() {
        let app = test_app().await;
        let asset = processing(&app).await;

        for name in ["segment004.ts;rm", "segment1.ts", "passwd"] {
            let uri = format!("/api/stream/{}/{}", asset.id, name);
            assert_eq!(
                get(&app, &uri, Some(SUBSCRIBER)).await.status(),
                StatusCode::BAD_REQUEST,
                "{name}"
            );
        }

        let response = get(&app, "/api/stream/..%2F..%2Fetc/segment000.ts", Some(SUBSCRIBER)).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_thumbnail_is_public() {
        let app = test_app().await;
        let id = AssetId::new();
        std::fs::write(app.store.thumbnail_path_for(&id), b"\xff\xd8jpeg").unwrap();

        let response = get(
            &app,
            &format!("/api/stream/thumbnail/{}", thumbnail_file_name(&id)),
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "image/jpeg");
        assert_eq!(response.headers()["cache-control"], "public, max-age=86400");

        let response = get(&app, "/api/stream/thumbnail/..assets.json", None).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = get(&app, "/api/stream/thumbnail/thumb-gone.jpg", None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
