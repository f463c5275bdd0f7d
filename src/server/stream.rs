// Incremental delivery: pipeline events framed as server-sent events

use crate::enrich::{EnrichEvent, EventSink};
use crate::error::{IpScopeError, Result};
use async_trait::async_trait;
use axum::response::sse::Event;
use chrono::Utc;
use std::convert::Infallible;
use tokio::sync::mpsc;

/// Events buffered between the pipeline task and the response body
pub const STREAM_BUFFER: usize = 16;

/// Frame type carried by the response stream
pub type SseFrame = std::result::Result<Event, Infallible>;

/// Sink that forwards each event to the HTTP response.
///
/// A dropped receiver means the client went away; the pipeline sees
/// `StreamClosed` on the next emit and stops.
pub struct ChannelSink {
    tx: mpsc::Sender<SseFrame>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<SseFrame>) -> Self {
        Self { tx }
    }

    /// Close the stream with an `error` event carrying no address, for
    /// failures that abort the whole run. Best effort: the client may be gone.
    pub async fn fail(&mut self, message: &str) {
        let payload = serde_json::json!({
            "error": message,
            "timestamp": Utc::now().to_rfc3339(),
        });
        let frame = Event::default().event("error").data(payload.to_string());
        if self.tx.send(Ok(frame)).await.is_err() {
            tracing::debug!("Stream already closed, dropping failure event");
        }
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn emit(&mut self, event: EnrichEvent) -> Result<()> {
        let frame = to_sse_event(&event)?;
        self.tx
            .send(Ok(frame))
            .await
            .map_err(|_| IpScopeError::StreamClosed)
    }
}

/// Event name goes in the `event:` field, the rest as timestamped JSON data
pub fn sse_payload(event: &EnrichEvent) -> Result<serde_json::Value> {
    let mut payload = serde_json::to_value(event).map_err(|e| IpScopeError::Json {
        source: e,
        context: format!("Failed to serialize {} event", event.name()),
    })?;

    if let Some(fields) = payload.as_object_mut() {
        fields.remove("event");
        fields.insert(
            "timestamp".to_string(),
            serde_json::Value::String(Utc::now().to_rfc3339()),
        );
    }

    Ok(payload)
}

fn to_sse_event(event: &EnrichEvent) -> Result<Event> {
    let payload = sse_payload(event)?;
    Ok(Event::default()
        .event(event.name())
        .data(payload.to_string()))
}
