use crate::dht::data::{Block, Metadata};
use crate::dht::network::NodeInfo;
use crate::event::container::{EventContainer, EventKind};
use crate::net::shared::NetworkResult;
use crate::serial;
use crate::serial::{Deserialize, Serialize, SizedRead, SizedWrite};

/// Instructs a node to persist the block locally. No reply.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageEvent {
    pub block: Block,
}

/// Asks a node to route the block to whichever peer owns it.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageRequestEvent {
    pub block: Block,
}

/// A query forwarded to one peer as part of a fan-out.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct QueryEvent {
    pub query_id: String,
    pub query: String,
}

/// A client query arriving at the coordinating node.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct QueryRequestEvent {
    pub query: String,
}

/// One peer's result set for an in-flight query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResponseEvent {
    pub query_id: String,
    pub results: Vec<Metadata>,
}

/// Tells the originating client which peers were queried and under which id,
/// before any responses are relayed.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct QueryPreambleEvent {
    pub query_id: String,
    pub peers: Vec<NodeInfo>,
}

macro_rules! event_wire {
    ($event: ty, $kind: expr) => {
        impl $event {
            /// The container wire bytes for this event.
            #[inline]
            pub fn encode(&self) -> NetworkResult<Vec<u8>> {
                EventContainer::wrap($kind, self)
            }
        }
    };
}

event_wire!(StorageEvent, EventKind::Storage);
event_wire!(StorageRequestEvent, EventKind::StorageRequest);
event_wire!(QueryEvent, EventKind::Query);
event_wire!(QueryRequestEvent, EventKind::QueryRequest);
event_wire!(QueryResponseEvent, EventKind::QueryResponse);
event_wire!(QueryPreambleEvent, EventKind::QueryPreamble);

impl Serialize for StorageEvent {
    fn serialize<W: SizedWrite>(&self, stream: &mut W) -> NetworkResult<()> {
        self.block.serialize(stream)
    }
}

impl Deserialize for StorageEvent {
    fn deserialize<R: SizedRead>(stream: &mut R) -> NetworkResult<StorageEvent> {
        Ok(StorageEvent {
            block: Block::deserialize(stream)?,
        })
    }
}

impl Serialize for StorageRequestEvent {
    fn serialize<W: SizedWrite>(&self, stream: &mut W) -> NetworkResult<()> {
        self.block.serialize(stream)
    }
}

impl Deserialize for StorageRequestEvent {
    fn deserialize<R: SizedRead>(stream: &mut R) -> NetworkResult<StorageRequestEvent> {
        Ok(StorageRequestEvent {
            block: Block::deserialize(stream)?,
        })
    }
}

impl Serialize for QueryEvent {
    fn serialize<W: SizedWrite>(&self, stream: &mut W) -> NetworkResult<()> {
        serial::write_string(stream, &self.query_id)?;
        serial::write_string(stream, &self.query)
    }
}

impl Deserialize for QueryEvent {
    fn deserialize<R: SizedRead>(stream: &mut R) -> NetworkResult<QueryEvent> {
        Ok(QueryEvent {
            query_id: serial::read_string(stream)?,
            query: serial::read_string(stream)?,
        })
    }
}

impl Serialize for QueryRequestEvent {
    fn serialize<W: SizedWrite>(&self, stream: &mut W) -> NetworkResult<()> {
        serial::write_string(stream, &self.query)
    }
}

impl Deserialize for QueryRequestEvent {
    fn deserialize<R: SizedRead>(stream: &mut R) -> NetworkResult<QueryRequestEvent> {
        Ok(QueryRequestEvent {
            query: serial::read_string(stream)?,
        })
    }
}

impl Serialize for QueryResponseEvent {
    fn serialize<W: SizedWrite>(&self, stream: &mut W) -> NetworkResult<()> {
        serial::write_string(stream, &self.query_id)?;
        serial::write_list(stream, &self.results)
    }
}

impl Deserialize for QueryResponseEvent {
    fn deserialize<R: SizedRead>(stream: &mut R) -> NetworkResult<QueryResponseEvent> {
        Ok(QueryResponseEvent {
            query_id: serial::read_string(stream)?,
            results: serial::read_list(stream)?,
        })
    }
}

impl Serialize for QueryPreambleEvent {
    fn serialize<W: SizedWrite>(&self, stream: &mut W) -> NetworkResult<()> {
        serial::write_string(stream, &self.query_id)?;
        serial::write_list(stream, &self.peers)
    }
}

impl Deserialize for QueryPreambleEvent {
    fn deserialize<R: SizedRead>(stream: &mut R) -> NetworkResult<QueryPreambleEvent> {
        Ok(QueryPreambleEvent {
            query_id: serial::read_string(stream)?,
            peers: serial::read_list(stream)?,
        })
    }
}

/// A deserialized event ready for handler dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Storage(StorageEvent),
    StorageRequest(StorageRequestEvent),
    Query(QueryEvent),
    QueryRequest(QueryRequestEvent),
    QueryResponse(QueryResponseEvent),
    QueryPreamble(QueryPreambleEvent),
}

impl Event {
    #[inline]
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Storage(_) => EventKind::Storage,
            Event::StorageRequest(_) => EventKind::StorageRequest,
            Event::Query(_) => EventKind::Query,
            Event::QueryRequest(_) => EventKind::QueryRequest,
            Event::QueryResponse(_) => EventKind::QueryResponse,
            Event::QueryPreamble(_) => EventKind::QueryPreamble,
        }
    }
}
