//! Response structures for the Matrix client-server API.
//!
//! This module contains structures for deserializing JSON responses from
//! the homeserver. Unknown fields are ignored so the bot keeps working when
//! the server sends more than we consume.

use std::collections::HashMap;

use serde::Deserialize;

/// Response of `POST /_matrix/client/v3/login`.
#[derive(Deserialize, Debug)]
pub struct LoginResponse {
    /// Access token issued for the session.
    pub access_token: String,
}

/// Response of `GET /_matrix/client/v3/sync`.
#[derive(Deserialize, Debug, Default)]
pub struct SyncResponse {
    /// Resumption cursor for the next sync call. The server may omit it.
    pub next_batch: Option<String>,
    /// Room updates, grouped by membership.
    #[serde(default)]
    pub rooms: Rooms,
}

/// Room updates from a sync response.
#[derive(Deserialize, Debug, Default)]
pub struct Rooms {
    /// Updates for rooms the account has joined, keyed by room id.
    #[serde(default)]
    pub join: HashMap<String, JoinedRoom>,
}

/// Updates for a single joined room.
#[derive(Deserialize, Debug, Default)]
pub struct JoinedRoom {
    #[serde(default)]
    pub timeline: Timeline,
}

/// Timeline section of a joined room.
#[derive(Deserialize, Debug, Default)]
pub struct Timeline {
    /// Events in the order delivered by the server.
    #[serde(default)]
    pub events: Vec<Event>,
}

/// A single event from a room timeline.
///
/// The wire format nests events under their room key, so `room_id` is not
/// part of the serialized event; the sync loop injects it before dispatch.
/// Apart from that injection an event is never mutated.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct Event {
    /// Event type, e.g. `m.room.message`.
    #[serde(default, rename = "type")]
    pub event_type: String,
    pub event_id: Option<String>,
    pub sender: Option<String>,
    /// Injected from the surrounding room key, absent on the wire.
    #[serde(default)]
    pub room_id: Option<String>,
    #[serde(default)]
    pub content: Content,
    pub origin_server_ts: Option<u64>,
    #[serde(default)]
    pub unsigned: Option<UnsignedData>,
}

impl Event {
    /// The plain text body of the event, or an empty string when absent.
    pub fn body(&self) -> &str {
        self.content.body.as_deref().unwrap_or_default()
    }

    /// Identifier used for deduplication: `event_id`, falling back to
    /// `unsigned.event_id`.
    pub fn dedup_id(&self) -> Option<&str> {
        self.event_id
            .as_deref()
            .or_else(|| self.unsigned.as_ref()?.event_id.as_deref())
    }
}

/// Content section of a message event.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct Content {
    pub msgtype: Option<String>,
    pub body: Option<String>,
}

/// Unsigned metadata attached to an event by the server.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct UnsignedData {
    pub event_id: Option<String>,
}
