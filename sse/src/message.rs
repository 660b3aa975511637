use crate::error::Error;
use axum::response::sse::Event as SseEvent;
use serde::Serialize;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::mpsc::Sender;

/// Item type of the SSE response stream.
pub type SseStreamItem = Result<SseEvent, Infallible>;

const HEARTBEAT_COMMENT: &str = "heartbeat";

/// Rejects values that would break out of a single SSE field line.
pub fn validate_event_type(event_type: &str) -> Result<(), Error> {
    if event_type.is_empty() || event_type.contains(['\n', '\r']) {
        return Err(Error::InvalidEventType(event_type.to_string()));
    }
    Ok(())
}

/// One unit written to a client stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// `id: <id>` + `event: <type>` + `data: <json>`
    Event {
        id: String,
        event_type: String,
        data: String,
    },
    /// `: heartbeat`, ignored by clients, keeps proxies from closing the socket
    Heartbeat,
    /// `retry: <ms>`, the client's reconnection delay
    Retry(Duration),
}

impl Frame {
    /// Serializes `payload` to compact JSON and frames it under `event_type`
    /// with a freshly generated id.
    pub fn event<P>(event_type: &str, payload: &P) -> Result<Self, Error>
    where
        P: Serialize + ?Sized,
    {
        let id = uuid::Uuid::new_v4().simple().to_string();
        Self::event_with_id(&id, event_type, payload)
    }

    /// Like `event`, reusing an id the event already carries so every
    /// process sends the same id for it.
    pub fn event_with_id<P>(id: &str, event_type: &str, payload: &P) -> Result<Self, Error>
    where
        P: Serialize + ?Sized,
    {
        validate_event_type(event_type)?;
        if id.is_empty() || id.contains(['\n', '\r', '\0']) {
            return Err(Error::InvalidEventType(format!("{event_type} (bad id {id:?})")));
        }

        Ok(Frame::Event {
            id: id.to_string(),
            event_type: event_type.to_string(),
            data: serde_json::to_string(payload)?,
        })
    }

    pub fn event_type(&self) -> Option<&str> {
        match self {
            Frame::Event { event_type, .. } => Some(event_type),
            _ => None,
        }
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            Frame::Event { id, .. } => Some(id),
            _ => None,
        }
    }

    pub fn data(&self) -> Option<&str> {
        match self {
            Frame::Event { data, .. } => Some(data),
            _ => None,
        }
    }

    /// Wire representation, terminated by the blank line.
    pub fn encode(&self) -> String {
        match self {
            Frame::Event {
                id,
                event_type,
                data,
            } => format!("id: {id}\nevent: {event_type}\ndata: {data}\n\n"),
            Frame::Heartbeat => format!(": {HEARTBEAT_COMMENT}\n\n"),
            Frame::Retry(interval) => format!("retry: {}\n\n", interval.as_millis()),
        }
    }

    pub fn into_sse_event(self) -> SseEvent {
        match self {
            Frame::Event {
                id,
                event_type,
                data,
            } => SseEvent::default().id(id).event(event_type).data(data),
            Frame::Heartbeat => SseEvent::default().comment(HEARTBEAT_COMMENT),
            Frame::Retry(interval) => SseEvent::default().retry(interval),
        }
    }
}

/// The sink could no longer accept frames; the client is gone or stalled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkClosed;

/// Output side of a client connection.
///
/// `send` must not block; it is only ever called with no registry lock held.
pub trait FrameSink: Send + Sync {
    fn send(&self, frame: Frame) -> Result<(), SinkClosed>;
}

/// The HTTP handler holds the receiving half and streams it as the response
/// body. A dropped receiver means the client went away; a full buffer means
/// the client stopped reading. Both end the connection.
impl FrameSink for Sender<SseStreamItem> {
    fn send(&self, frame: Frame) -> Result<(), SinkClosed> {
        self.try_send(Ok(frame.into_sse_event()))
            .map_err(|_| SinkClosed)
    }
}
