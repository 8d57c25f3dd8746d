//! Message body encoding.
//!
//! The body of every message on the product topic is the JSON form of a
//! committed [`Event`]: `{event_id, aggregate_id, event_type, version,
//! payload, created_at}`.

use event_store::Event;

use crate::Result;

/// Encodes an event as a message body.
pub fn encode_event(event: &Event) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(event)?)
}

/// Decodes a message body into an event.
pub fn decode_event(body: &[u8]) -> Result<Event> {
    Ok(serde_json::from_slice(body)?)
}
