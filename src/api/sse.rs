//! Server-Sent Events support

use crate::event_bus::{BusMessage, Subscription};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{self, Stream, StreamExt};
use serde_json::json;
use std::convert::Infallible;
use std::time::Duration;

/// Convert a bus subscription to an SSE stream.
///
/// The stream opens with a `connected` acknowledgment carrying the backlog
/// size, then yields the backlog and live events in publish order.
pub fn sse_stream(
    subscription: Subscription,
    keep_alive: Duration,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let ack = json!({
        "type": "connected",
        "bufferedCount": subscription.buffered_count(),
    });
    let init = stream::once(async move {
        Ok(Event::default().event("connected").data(ack.to_string()))
    });

    let events = subscription
        .into_stream()
        .map(|message| Ok(bus_message_to_axum(message)));

    Sse::new(init.chain(events)).keep_alive(KeepAlive::new().interval(keep_alive).text("ping"))
}

fn bus_message_to_axum(message: BusMessage) -> Event {
    match message {
        BusMessage::Event(event) => {
            let mut data = serde_json::to_value(&event).unwrap_or_else(|_| json!({}));
            if let Some(object) = data.as_object_mut() {
                object.insert("type".to_string(), json!("status"));
            }
            Event::default()
                .event("status")
                .id(event.id)
                .data(data.to_string())
        }
        BusMessage::Heartbeat => Event::default().comment("heartbeat"),
    }
}
