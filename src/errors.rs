//! Error types shared across the console bridge.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::io;
use thiserror::Error;

use crate::console::ChannelId;

pub type ConsoleResult<T> = Result<T, ConsoleError>;

/// Errors produced by the console bridge.
///
/// Only `Resource` and `Process` cross the session boundary as the run
/// outcome; the rest are local to a single handshake request or to the API
/// surface. Socket-level failures on an established channel are logged where
/// they occur and end that pump, never the session.
#[derive(Debug, Error)]
pub enum ConsoleError {
    /// The handshake request carried no secret.
    #[error("missing secret")]
    MissingSecret,

    /// The secret matches no registered channel. The session exists, the
    /// credential is wrong, so this maps to 403 rather than 404.
    #[error("secret does not match any console channel")]
    Authorization,

    /// A valid secret was presented for a channel that already has a
    /// connection bound. The first connection is never displaced.
    #[error("console channel {0} is already connected")]
    AlreadyConnected(ChannelId),

    #[error("workload is not running")]
    NotRunning,

    #[error("workload is frozen")]
    Frozen,

    #[error("not found")]
    NotFound,

    /// Socket failure in a place where the orchestrator has to give up on a
    /// channel entirely.
    #[error("console transport error: {0}")]
    Transport(String),

    /// Pty allocation or ownership-shift failure. Fatal to the session.
    #[error("failed to set up console pty: {0}")]
    Resource(#[from] io::Error),

    /// The attached process failed to start or exited with an error. This is
    /// the session outcome; cleanup still runs.
    #[error("{0}")]
    Process(String),
}

impl ConsoleError {
    fn status(&self) -> StatusCode {
        match self {
            ConsoleError::MissingSecret | ConsoleError::Authorization => StatusCode::FORBIDDEN,
            ConsoleError::AlreadyConnected(_) => StatusCode::CONFLICT,
            ConsoleError::NotRunning | ConsoleError::Frozen => StatusCode::BAD_REQUEST,
            ConsoleError::NotFound => StatusCode::NOT_FOUND,
            ConsoleError::Transport(_) | ConsoleError::Resource(_) | ConsoleError::Process(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// JSON body returned for API errors.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

impl IntoResponse for ConsoleError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorBody {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_failures_map_to_permission_denied() {
        assert_eq!(ConsoleError::MissingSecret.status(), StatusCode::FORBIDDEN);
        assert_eq!(ConsoleError::Authorization.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn duplicate_bind_maps_to_conflict() {
        let err = ConsoleError::AlreadyConnected(ChannelId::Data(0));
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert_eq!(err.to_string(), "console channel 0 is already connected");
    }
}
