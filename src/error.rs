//! Error taxonomy shared by the resolver, the orchestrator and the file route.

use axum::http::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Invalid YouTube URL or ID: {0}")]
    InvalidReference(String),

    #[error("Failed to get video information: {0}")]
    MetadataFetchFailed(String),

    #[error("Download failed: could not find downloaded file in {0}")]
    DownloadArtifactMissing(String),

    #[error("Failed to download video: {0}")]
    DownloadFailed(String),

    #[error("Invalid file path: {0}")]
    InvalidPath(String),

    #[error("File not found or expired")]
    FileNotFound,
}

impl ServiceError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServiceError::InvalidReference(_) | ServiceError::InvalidPath(_) => {
                StatusCode::BAD_REQUEST
            }
            ServiceError::FileNotFound => StatusCode::NOT_FOUND,
            ServiceError::MetadataFetchFailed(_)
            | ServiceError::DownloadArtifactMissing(_)
            | ServiceError::DownloadFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;
