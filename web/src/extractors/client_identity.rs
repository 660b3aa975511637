use crate::extractors::RejectionType;
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap, StatusCode},
};
use log::*;

pub(crate) const USER_ID_HEADER: &str = "x-user-id";
pub(crate) const WORKSPACE_ID_HEADER: &str = "x-workspace-id";

/// Caller identity as established by the authentication proxy in front of
/// this service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ClientIdentity {
    pub(crate) user_id: String,
    pub(crate) workspace_id: Option<String>,
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

#[async_trait]
impl<S> FromRequestParts<S> for ClientIdentity
where
    S: Send + Sync,
{
    type Rejection = RejectionType;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match header_value(&parts.headers, USER_ID_HEADER) {
            Some(user_id) => Ok(ClientIdentity {
                user_id,
                workspace_id: header_value(&parts.headers, WORKSPACE_ID_HEADER),
            }),
            None => {
                debug!("Rejecting request to {} without {USER_ID_HEADER}", parts.uri);
                Err((StatusCode::UNAUTHORIZED, "Unauthorized".to_string()))
            }
        }
    }
}
