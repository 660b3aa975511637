//! SSE HTTP handler for the web layer.
//!
//! Connection state, routing and liveness live in the `sse` crate; this
//! module only adapts an HTTP request into a registered stream.

pub mod handler;
