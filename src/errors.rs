use crate::models::ProgressKey;
use axum::http::StatusCode;
use thiserror::Error;

#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::FORBIDDEN,
            message: message.into(),
        }
    }

    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_GATEWAY,
            message: message.into(),
        }
    }

    pub fn internal(err: impl std::error::Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: err.to_string(),
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::internal(err)
    }
}

impl From<RequestFailed> for AppError {
    fn from(err: RequestFailed) -> Self {
        Self::bad_gateway(err.message)
    }
}

impl From<SyncError> for AppError {
    fn from(err: SyncError) -> Self {
        Self::bad_gateway(err.message())
    }
}

impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::PermissionDenied | SessionError::NotSignedIn => {
                Self::forbidden(err.to_string())
            }
            SessionError::Request(err) => err.into(),
        }
    }
}

impl From<PreferenceError> for AppError {
    fn from(err: PreferenceError) -> Self {
        match err {
            PreferenceError::Remote(err) => err.into(),
            other => Self::internal(other),
        }
    }
}

impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        (self.status, self.message).into_response()
    }
}

/// Failure below the HTTP layer: the request never produced a response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("refusing cross-origin request to {0}")]
    CrossOrigin(String),
    #[error("invalid request path {0:?}")]
    InvalidPath(String),
    #[error("network failure: {0}")]
    Network(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCause {
    /// The anti-forgery token could not be obtained.
    TokenFetch,
    Transport,
    /// The backend answered with `success: false` (or without a flag).
    Rejected,
    Decode,
}

/// The single error kind the authenticated client surfaces. Callers must assume
/// nothing was applied server-side.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct RequestFailed {
    pub message: String,
    pub cause: FailureCause,
}

impl RequestFailed {
    pub fn new(cause: FailureCause, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            cause,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum SyncError {
    #[error(transparent)]
    Request(#[from] RequestFailed),
    #[error("update for {key} was rejected and rolled back: {source}")]
    ReconciliationDrift {
        key: ProgressKey,
        #[source]
        source: RequestFailed,
    },
}

impl SyncError {
    /// Message suitable for a user-facing notification.
    pub fn message(&self) -> String {
        match self {
            SyncError::Request(err) | SyncError::ReconciliationDrift { source: err, .. } => {
                err.message.clone()
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("precache of {path} failed: {reason}")]
    Precache { path: String, reason: String },
    #[error("cache layer is not installed")]
    NotInstalled,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("task {id} appears twice in category {category}")]
    DuplicateTask { category: String, id: String },
    #[error("task {id} is filed under {actual} but listed in {expected}")]
    CategoryMismatch {
        id: String,
        expected: String,
        actual: String,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum PreferenceError {
    #[error("preference store unavailable")]
    Unavailable,
    #[error(transparent)]
    Remote(#[from] RequestFailed),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("not signed in")]
    NotSignedIn,
    #[error("you do not have permission to access this resource")]
    PermissionDenied,
    #[error(transparent)]
    Request(#[from] RequestFailed),
}
