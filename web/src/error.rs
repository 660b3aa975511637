use std::error::Error as StdError;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use sse::Error as SseError;

extern crate log;
use log::*;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug)]
pub struct Error(SseError);

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(&self.0)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> core::result::Result<(), std::fmt::Error> {
        write!(fmt, "{}", self.0)
    }
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match &self.0 {
            SseError::ConnectionNotFound(_) => StatusCode::NOT_FOUND,
            SseError::DuplicateConnection(_) => StatusCode::CONFLICT,
            SseError::InvalidEventType(_) => StatusCode::UNPROCESSABLE_ENTITY,
            SseError::ConnectionClosed(_) | SseError::Serialization(_) | SseError::Bus(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

// List of possible StatusCode variants https://docs.rs/http/latest/http/status/struct.StatusCode.html
impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = if status.is_server_error() {
            error!("Request failed: {self}");
            status
                .canonical_reason()
                .unwrap_or("INTERNAL SERVER ERROR")
                .to_string()
        } else {
            self.to_string()
        };

        (
            status,
            Json(json!({"status_code": status.as_u16(), "error": message})),
        )
            .into_response()
    }
}

impl<E> From<E> for Error
where
    E: Into<SseError>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sse::ConnectionId;

    #[test]
    fn test_status_codes() {
        let not_found = Error::from(SseError::ConnectionNotFound(ConnectionId::from("c")));
        let duplicate = Error::from(SseError::DuplicateConnection(ConnectionId::from("c")));
        let closed = Error::from(SseError::ConnectionClosed(ConnectionId::from("c")));

        assert_eq!(not_found.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(duplicate.status_code(), StatusCode::CONFLICT);
        assert_eq!(closed.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_server_errors_hide_details() {
        let response = Error::from(SseError::ConnectionClosed(ConnectionId::from("secret"))).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
