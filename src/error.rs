use serde::Deserialize;
use thiserror::Error;

/// Errors surfaced by the backend client.
///
/// Composables never propagate these to their callers; they land in the
/// reactive error field instead. The typed variants exist for the server
/// routes and the sync helpers, which do care about the distinction.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The backend answered with a non-success status. `message` is the
    /// first error reported in the response envelope, or the raw body
    /// when the envelope could not be decoded.
    #[error("backend returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("failed to decode backend response: {0}")]
    Decode(String),

    #[error("no backend URL configured")]
    MissingUrl,

    #[error("not authenticated")]
    NotAuthenticated,
}

impl ClientError {
    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Api { status, .. } => Some(*status),
            ClientError::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Error envelope the backend wraps failures in: `{"errors": [{"message": ...}]}`.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    errors: Vec<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

/// Map a non-success response body to a [`ClientError::Api`], pulling the
/// first backend-reported message out of the envelope when present.
pub(crate) fn api_error(status: u16, body: &str) -> ClientError {
    let message = serde_json::from_str::<ErrorEnvelope>(body)
        .ok()
        .and_then(|envelope| envelope.errors.into_iter().next())
        .map(|e| e.message)
        .unwrap_or_else(|| {
            if body.trim().is_empty() {
                format!("HTTP {status}")
            } else {
                body.to_string()
            }
        });

    ClientError::Api { status, message }
}
