use crate::application::ingest::IngestError;
use crate::application::streaming::StreamError;
use crate::domain::asset::ProcessingStatus;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Error body shared by every endpoint: `{"success": false, "message": ...}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub processing_status: Option<ProcessingStatus>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            processing_status: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn internal(error: impl std::fmt::Display) -> Self {
        tracing::error!(error = %error, "Request failed");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Server error")
    }
}

/// 425, which `http` has no constant for.
fn too_early() -> StatusCode {
    StatusCode::from_u16(425).unwrap_or(StatusCode::CONFLICT)
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = json!({ "success": false, "message": self.message });
        if let Some(status) = self.processing_status {
            body["status"] = json!(status);
        }
        (self.status, Json(body)).into_response()
    }
}

impl From<IngestError> for ApiError {
    fn from(e: IngestError) -> Self {
        match e {
            IngestError::MissingTitle => ApiError::bad_request(e.to_string()),
            IngestError::NotFound(_) => ApiError::not_found("Video not found"),
            IngestError::Busy(_) => ApiError::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "Too many videos are being processed, try again later",
            ),
            IngestError::Lifecycle(_) | IngestError::Repository(_) => ApiError::internal(e),
        }
    }
}

impl From<StreamError> for ApiError {
    fn from(e: StreamError) -> Self {
        match e {
            StreamError::InvalidName => ApiError::bad_request(e.to_string()),
            StreamError::NotFound => ApiError::not_found("File not found"),
            StreamError::NotReady { status } => ApiError {
                status: too_early(),
                message: e.to_string(),
                processing_status: Some(status),
            },
            StreamError::Repository(_) => ApiError::internal(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::queue::QueueError;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError::from(StreamError::NotReady {
                status: ProcessingStatus::Processing
            })
            .status
            .as_u16(),
            425
        );
        assert_eq!(
            ApiError::from(StreamError::InvalidName).status,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(IngestError::Busy(QueueError::Full { capacity: 1 })).status,
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::from(IngestError::MissingTitle).message,
            "Title is required"
        );
    }
}
