use crate::event::container::{EventContainer, EventKind};
use crate::event::types::{
    Event, QueryEvent, QueryPreambleEvent, QueryRequestEvent, QueryResponseEvent, StorageEvent,
    StorageRequestEvent,
};
use crate::net::shared::NetworkResult;
use crate::serial;
use hashbrown::HashMap;

/// Turns a container body into a typed event.
pub type Decoder = fn(&[u8]) -> NetworkResult<Event>;

/// Result of demultiplexing one framed payload.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedEvent {
    Known(Event),
    /// The tag has no registered decoder; the payload is dropped by the
    /// caller.
    Unknown(i32),
}

/// Registry mapping event type tags to deserializers. The tag set is closed;
/// unknown tags are reported rather than failed so a node keeps running when
/// a newer peer speaks an extended protocol.
pub struct EventMap {
    decoders: HashMap<i32, Decoder>,
}

impl EventMap {
    pub fn new() -> EventMap {
        EventMap {
            decoders: HashMap::new(),
        }
    }

    /// The full standard tag set.
    pub fn standard() -> EventMap {
        let mut map = EventMap::new();

        map.register(EventKind::Storage, |body| {
            Ok(Event::Storage(serial::from_bytes::<StorageEvent>(body)?))
        });
        map.register(EventKind::StorageRequest, |body| {
            Ok(Event::StorageRequest(serial::from_bytes::<StorageRequestEvent>(body)?))
        });
        map.register(EventKind::Query, |body| {
            Ok(Event::Query(serial::from_bytes::<QueryEvent>(body)?))
        });
        map.register(EventKind::QueryRequest, |body| {
            Ok(Event::QueryRequest(serial::from_bytes::<QueryRequestEvent>(body)?))
        });
        map.register(EventKind::QueryResponse, |body| {
            Ok(Event::QueryResponse(serial::from_bytes::<QueryResponseEvent>(body)?))
        });
        map.register(EventKind::QueryPreamble, |body| {
            Ok(Event::QueryPreamble(serial::from_bytes::<QueryPreambleEvent>(body)?))
        });

        map
    }

    /// Registers a decoder, replacing any previous registration for the tag.
    pub fn register(&mut self, kind: EventKind, decoder: Decoder) {
        self.decoders.insert(kind.tag(), decoder);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    /// Deserializes a framed payload into a typed event: first the container,
    /// then the body through the decoder registered for the tag.
    pub fn decode(&self, payload: &[u8]) -> NetworkResult<DecodedEvent> {
        let container: EventContainer = serial::from_bytes(payload)?;

        match self.decoders.get(&container.tag) {
            Some(decoder) => Ok(DecodedEvent::Known(decoder(&container.body)?)),
            None => Ok(DecodedEvent::Unknown(container.tag)),
        }
    }
}
