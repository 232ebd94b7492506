//! Error types for the client subsystem

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Result type for client subsystem operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for client subsystem operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The request handle needed to resolve a client was missing or unusable
    #[error("bad request: {0}")]
    BadRequest(String),

    /// No usable credentials were found in the request
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// No usable connection parameters (neither explicit nor in-cluster)
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Error from the cluster API, propagated unchanged
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True when this error is a Forbidden response from the cluster.
    ///
    /// Forbidden responses propagate verbatim but the access probe inspects
    /// them to recover the acting username.
    pub fn is_forbidden(&self) -> bool {
        matches!(self, Error::Kube(kube::Error::Api(ae)) if ae.code == 403)
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Error::InvalidConfig(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Kube(kube::Error::Api(ae)) => {
                StatusCode::from_u16(ae.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            Error::Kube(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Return K8s-style Status response so the routing layer can hand
        // errors straight back to API-shaped callers
        let body = serde_json::json!({
            "kind": "Status",
            "apiVersion": "v1",
            "status": "Failure",
            "message": self.to_string(),
            "code": status.as_u16()
        });

        (status, axum::Json(body)).into_response()
    }
}
