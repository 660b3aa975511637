pub(crate) mod client_identity;

use axum::http::StatusCode;

type RejectionType = (StatusCode, String);
