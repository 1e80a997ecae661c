//! Blocking client for originating storage requests and queries against a
//! node. Used by the operator tools and the end-to-end tests; replies arrive
//! over the same socket the request was sent on.

use crate::dht::data::Block;
use crate::event::map::{DecodedEvent, EventMap};
use crate::event::types::{Event, QueryPreambleEvent, QueryRequestEvent, QueryResponseEvent, StorageRequestEvent};
use crate::net::frame;
use crate::net::shared::{Destination, ErrorType, NetworkError, NetworkResult};
use byteorder::{BigEndian, ByteOrder};
use orbit::logging;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

pub struct Client {
    stream: TcpStream,
    map: EventMap,
    log: logging::Logger,
}

impl Client {
    /// Connects to the node. A read timeout bounds how long response reads
    /// block; a timed-out read surfaces as `NetworkError::Wait`.
    pub fn connect(
        dest: &Destination,
        read_timeout: Option<Duration>,
        log: &logging::Logger,
    ) -> NetworkResult<Client> {
        let addr = dest.resolve()?;
        let stream = TcpStream::connect(addr)?;

        stream.set_read_timeout(read_timeout)?;
        stream.set_nodelay(true)?;

        logging::debug!(log, "client connected"; "dest" => %dest);

        Ok(Client {
            stream,
            map: EventMap::standard(),
            log: log.new(logging::o!()),
        })
    }

    /// Submits a block for storage. Fire and forget: the protocol carries no
    /// acknowledgement, a follow-up query is the way to verify placement.
    pub fn store(&mut self, block: Block) -> NetworkResult<()> {
        let payload = StorageRequestEvent { block }.encode()?;
        self.write_frame(&payload)
    }

    /// Submits a query and reads the preamble naming the peers that will
    /// answer. Responses are then pulled from the returned session.
    pub fn query(&mut self, expression: &str) -> NetworkResult<QuerySession> {
        let payload = QueryRequestEvent {
            query: expression.to_string(),
        }
        .encode()?;
        self.write_frame(&payload)?;

        match self.read_event()? {
            Event::QueryPreamble(preamble) => {
                logging::debug!(self.log, "query accepted";
                                "query_id" => &preamble.query_id,
                                "peers" => preamble.peers.len());

                Ok(QuerySession {
                    expected: preamble.peers.len(),
                    received: 0,
                    preamble,
                    client: self,
                })
            }
            other => {
                logging::warn!(self.log, "expected a query preamble";
                               "received" => ?other.kind());
                Err(NetworkError::Fatal(ErrorType::Serialization))
            }
        }
    }

    fn write_frame(&mut self, payload: &[u8]) -> NetworkResult<()> {
        let frame = frame::encode(payload)?;
        self.stream.write_all(&frame)?;
        Ok(())
    }

    fn read_frame(&mut self) -> NetworkResult<Vec<u8>> {
        let mut prefix = [0u8; frame::PREFIX_SIZE];
        self.stream.read_exact(&mut prefix)?;

        let declared = BigEndian::read_u32(&prefix) as usize;

        if declared == 0 {
            return Err(NetworkError::Fatal(ErrorType::EmptyPayload));
        }

        if declared > frame::MAX_FRAME_SIZE {
            return Err(NetworkError::Fatal(ErrorType::PayloadTooLarge));
        }

        let mut payload = vec![0u8; declared];
        self.stream.read_exact(&mut payload)?;

        Ok(payload)
    }

    fn read_event(&mut self) -> NetworkResult<Event> {
        let payload = self.read_frame()?;

        match self.map.decode(&payload)? {
            DecodedEvent::Known(event) => Ok(event),
            DecodedEvent::Unknown(_) => Err(NetworkError::Fatal(ErrorType::UnknownTag)),
        }
    }
}

/// An in-flight query: the preamble already received, responses pending.
pub struct QuerySession<'a> {
    client: &'a mut Client,
    pub preamble: QueryPreambleEvent,
    expected: usize,
    received: usize,
}

impl<'a> QuerySession<'a> {
    /// Number of peer responses the preamble promised.
    #[inline]
    pub fn expected(&self) -> usize {
        self.expected
    }

    /// Blocks for the next response; `None` once every expected peer has
    /// answered. A timed-out read surfaces as `NetworkError::Wait`.
    pub fn next_response(&mut self) -> NetworkResult<Option<QueryResponseEvent>> {
        if self.received >= self.expected {
            return Ok(None);
        }

        match self.client.read_event()? {
            Event::QueryResponse(response) => {
                self.received += 1;
                Ok(Some(response))
            }
            other => {
                logging::warn!(self.client.log, "expected a query response";
                               "received" => ?other.kind());
                Err(NetworkError::Fatal(ErrorType::Serialization))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dht::data::{Feature, Metadata};
    use crate::dht::network::NodeInfo;
    use crate::serial;
    use std::net::TcpListener;
    use std::thread;

    /// Accepts one connection, records every inbound frame and plays back the
    /// canned response frames.
    fn stub_server(responses: Vec<Vec<u8>>) -> (Destination, thread::JoinHandle<Vec<Vec<u8>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut inbound = Vec::new();

            let mut prefix = [0u8; frame::PREFIX_SIZE];
            stream.read_exact(&mut prefix).unwrap();
            let declared = BigEndian::read_u32(&prefix) as usize;
            let mut payload = vec![0u8; declared];
            stream.read_exact(&mut payload).unwrap();
            inbound.push(payload);

            for response in responses {
                let framed = frame::encode(&response).unwrap();
                stream.write_all(&framed).unwrap();
            }

            inbound
        });

        (Destination::new("127.0.0.1", port), handle)
    }

    #[test]
    fn test_store_sends_storage_request() {
        let (dest, server) = stub_server(Vec::new());
        let mut client = Client::connect(&dest, None, &logging::discard()).unwrap();

        let block = Block::new(
            Metadata::new("sensor-1", vec![Feature::new("temperature", 300.0)]),
            vec![7, 7, 7],
        );
        client.store(block.clone()).unwrap();
        drop(client);

        let inbound = server.join().unwrap();
        let decoded = EventMap::standard().decode(&inbound[0]).unwrap();

        match decoded {
            DecodedEvent::Known(Event::StorageRequest(event)) => assert_eq!(event.block, block),
            other => panic!("Unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_query_reads_preamble_then_responses() {
        let preamble = QueryPreambleEvent {
            query_id: "s5555:0".to_string(),
            peers: vec![NodeInfo::new("beta", 5556, 0)],
        };
        let response = QueryResponseEvent {
            query_id: "s5555:0".to_string(),
            results: vec![Metadata::new("sensor-1", Vec::new())],
        };

        let (dest, server) = stub_server(vec![
            preamble.encode().unwrap(),
            response.encode().unwrap(),
        ]);

        let mut client = Client::connect(&dest, Some(Duration::from_secs(5)), &logging::discard()).unwrap();
        let mut session = client.query("temperature<300").unwrap();

        assert_eq!(session.preamble.query_id, "s5555:0");
        assert_eq!(session.expected(), 1);

        let first = session.next_response().unwrap().unwrap();
        assert_eq!(first.results.len(), 1);

        assert!(session.next_response().unwrap().is_none());

        let inbound = server.join().unwrap();
        let decoded: crate::event::container::EventContainer = serial::from_bytes(&inbound[0]).unwrap();
        assert_eq!(decoded.tag, crate::event::container::EventKind::QueryRequest.tag());
    }

    #[test]
    fn test_query_unexpected_reply_is_error() {
        let stray = QueryResponseEvent {
            query_id: "s5555:9".to_string(),
            results: Vec::new(),
        };
        let (dest, _server) = stub_server(vec![stray.encode().unwrap()]);

        let mut client = Client::connect(&dest, Some(Duration::from_secs(5)), &logging::discard()).unwrap();
        let result = client.query("temperature<300");

        assert!(result.is_err());
    }
}
