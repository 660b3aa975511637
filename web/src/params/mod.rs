//! This module holds typed parameters for various endpoint inputs.
//!
//! Each parameter type is a struct deserialized from a query string or a JSON
//! body, so malformed input is rejected by the extractor before any handler runs.

pub(crate) mod realtime;
