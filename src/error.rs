use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

/// Application code carried by every failure envelope except timeouts.
pub const SEGMENTATION_FAILED: u16 = 8001;

pub type SegmentResult<T> = Result<T, SegmentError>;

/// Everything a segmentation request can fail with.
#[derive(Debug, thiserror::Error)]
pub enum SegmentError {
    #[error("Only .gz or .zip files are supported, got {0}")]
    UnsupportedUpload(String),

    #[error("Uploaded file has no filename")]
    MissingFileName,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Failed to fetch input: {0}")]
    Download(String),

    #[error("totalsegmentator failed.\n{0}")]
    Segmentation(String),

    #[error("totalsegmentator failed.")]
    MissingOutput,

    #[error("Segmentation processing timed out.")]
    Timeout,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// The `{code, message}` body returned for failures and path-based runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub code: u16,
    pub message: String,
}

impl Envelope {
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl SegmentError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            SegmentError::UnsupportedUpload(_)
            | SegmentError::MissingFileName
            | SegmentError::BadRequest(_) => StatusCode::BAD_REQUEST,
            SegmentError::Download(_) => StatusCode::BAD_GATEWAY,
            SegmentError::Timeout => StatusCode::REQUEST_TIMEOUT,
            SegmentError::Segmentation(_) | SegmentError::MissingOutput | SegmentError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Application code placed in the envelope.
    pub fn code(&self) -> u16 {
        match self {
            SegmentError::Timeout => StatusCode::REQUEST_TIMEOUT.as_u16(),
            _ => SEGMENTATION_FAILED,
        }
    }

    pub fn envelope(&self) -> Envelope {
        Envelope::new(self.code(), self.to_string())
    }
}

impl IntoResponse for SegmentError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "segmentation request failed");
        } else {
            tracing::warn!(error = %self, "segmentation request rejected");
        }

        (status, Json(self.envelope())).into_response()
    }
}

impl From<axum::extract::multipart::MultipartError> for SegmentError {
    fn from(err: axum::extract::multipart::MultipartError) -> Self {
        SegmentError::BadRequest(format!("Malformed multipart body: {err}"))
    }
}

impl From<axum::extract::multipart::MultipartRejection> for SegmentError {
    fn from(err: axum::extract::multipart::MultipartRejection) -> Self {
        SegmentError::BadRequest(err.body_text())
    }
}

impl From<axum::extract::rejection::JsonRejection> for SegmentError {
    fn from(err: axum::extract::rejection::JsonRejection) -> Self {
        SegmentError::BadRequest(err.body_text())
    }
}

impl From<reqwest::Error> for SegmentError {
    fn from(err: reqwest::Error) -> Self {
        SegmentError::Download(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_keeps_its_own_code() {
        let err = SegmentError::Timeout;
        assert_eq!(err.status_code(), StatusCode::REQUEST_TIMEOUT);
        assert_eq!(
            err.envelope(),
            Envelope::new(408, "Segmentation processing timed out.")
        );
    }

    #[test]
    fn engine_failures_embed_the_detail() {
        let err = SegmentError::Segmentation("CUDA out of memory".to_string());
        let envelope = err.envelope();
        assert_eq!(envelope.code, SEGMENTATION_FAILED);
        assert_eq!(envelope.message, "totalsegmentator failed.\nCUDA out of memory");
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn validation_errors_are_client_errors() {
        let err = SegmentError::UnsupportedUpload("scan.txt".to_string());
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.code(), SEGMENTATION_FAILED);
    }
}
