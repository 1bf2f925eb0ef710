use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Failures produced by the catalog, selection, pipeline and store layers.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("{message}")]
    ExtractionFailed { message: String },

    #[error("Video or audio URL not found")]
    StreamNotFound,

    #[error("Failed to merge streams: {message}")]
    MergeFailed { message: String },

    #[error("File not found")]
    FileNotFound,

    #[error("Storage error: {message}")]
    Storage { message: String },
}

impl MediaError {
    pub fn extraction(message: impl Into<String>) -> Self {
        Self::ExtractionFailed {
            message: message.into(),
        }
    }

    pub fn merge(message: impl Into<String>) -> Self {
        Self::MergeFailed {
            message: message.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::ExtractionFailed { .. } => "EXTRACTION_FAILED",
            Self::StreamNotFound => "STREAM_NOT_FOUND",
            Self::MergeFailed { .. } => "MERGE_FAILED",
            Self::FileNotFound => "FILE_NOT_FOUND",
            Self::Storage { .. } => "STORAGE_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::ExtractionFailed { .. } | Self::StreamNotFound | Self::MergeFailed { .. } => {
                StatusCode::BAD_REQUEST
            }
            Self::FileNotFound => StatusCode::NOT_FOUND,
            Self::Storage { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'static str>,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub code: Option<&'static str>,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
            code: Some("INVALID_REQUEST"),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
            code: None,
        }
    }

    /// Keeps the status and code of `error` but replaces the public message.
    pub fn with_message(error: MediaError, message: impl Into<String>) -> Self {
        Self {
            status: error.status(),
            message: message.into(),
            code: Some(error.code()),
        }
    }
}

impl From<MediaError> for ApiError {
    fn from(error: MediaError) -> Self {
        Self {
            status: error.status(),
            message: error.to_string(),
            code: Some(error.code()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.message,
            code: self.code,
        });

        (self.status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_maps_to_status_and_code() {
        let cases = [
            (MediaError::extraction("boom"), StatusCode::BAD_REQUEST, "EXTRACTION_FAILED"),
            (MediaError::StreamNotFound, StatusCode::BAD_REQUEST, "STREAM_NOT_FOUND"),
            (MediaError::merge("exit 1"), StatusCode::BAD_REQUEST, "MERGE_FAILED"),
            (MediaError::FileNotFound, StatusCode::NOT_FOUND, "FILE_NOT_FOUND"),
            (MediaError::storage("disk"), StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR"),
        ];

        for (error, status, code) in cases {
            let api: ApiError = error.into();
            assert_eq!(api.status, status);
            assert_eq!(api.code, Some(code));
        }
    }

    #[test]
    fn extraction_message_is_passed_through_verbatim() {
        let api: ApiError = MediaError::extraction("Unsupported URL: nope").into();
        assert_eq!(api.message, "Unsupported URL: nope");
    }

    #[test]
    fn with_message_overrides_only_the_text() {
        let api = ApiError::with_message(MediaError::merge("exit 1"), "Failed to generate video");
        assert_eq!(api.status, StatusCode::BAD_REQUEST);
        assert_eq!(api.message, "Failed to generate video");
        assert_eq!(api.code, Some("MERGE_FAILED"));
    }
}
