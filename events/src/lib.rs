//! Event system infrastructure for the realtime service.
//!
//! This crate provides the event model and the event bus that carries events
//! between the code that produces them (background operations completing on
//! a cloud provider) and the SSE layer that pushes them to browsers.
//!
//! # Architecture
//!
//! - **Event**: an immutable, typed notification with an optional routing scope
//!   (workspace or user) and optional resource tags used for filtering
//! - **EventHandler**: trait for anything that reacts to delivered events
//! - **EventBus**: trait for the transport; publishing is scoped to a workspace
//!   or a user so that whichever process holds the relevant connection sees it
//! - **LocalBus**: in-process transport, handlers called in registration order
//! - **RedisBus** (`redis` feature): cross-process transport over Redis pub/sub
//!
//! This crate has no dependencies on other internal crates.

pub mod bus;
pub mod event;

#[cfg(feature = "redis")]
pub mod redis_bus;

pub use bus::{BusError, EventBus, EventHandler, LocalBus};
pub use event::{
    event_types, resource_types, ConnectedPayload, Event, EventPayload, Notification,
    NotificationLevel, ResourceChange, ResourceRef,
};

#[cfg(feature = "redis")]
pub use redis_bus::RedisBus;
