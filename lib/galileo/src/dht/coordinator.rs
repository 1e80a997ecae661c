use crate::dht::network::{NetworkInfo, NodeInfo};
use crate::dht::partition::Partitioner;
use crate::dht::tracker::TrackerTable;
use crate::event::reactor::{EventHandler, HandlerError};
use crate::event::types::{
    Event, QueryEvent, QueryPreambleEvent, QueryRequestEvent, QueryResponseEvent, StorageEvent,
    StorageRequestEvent,
};
use crate::fs::FileSystem;
use crate::net::router::DualRouter;
use crate::net::shared::{Destination, RouterMessage};
use orbit::logging;
use std::sync::Arc;
use std::time::Instant;

/// The glue between transport, tracking, partitioning and storage: one
/// handler per event type, each running on a reactor worker.
pub struct Coordinator<F: FileSystem, P: Partitioner> {
    routers: Arc<DualRouter>,
    trackers: Arc<TrackerTable>,
    network: Arc<NetworkInfo>,
    partitioner: P,
    fs: Arc<F>,
    self_dest: Destination,
    log: logging::Logger,
}

impl<F: FileSystem, P: Partitioner> Coordinator<F, P> {
    pub fn new(
        routers: Arc<DualRouter>,
        trackers: Arc<TrackerTable>,
        network: Arc<NetworkInfo>,
        partitioner: P,
        fs: Arc<F>,
        self_dest: Destination,
        log: &logging::Logger,
    ) -> Coordinator<F, P> {
        Coordinator {
            routers,
            trackers,
            network,
            partitioner,
            fs,
            self_dest,
            log: log.new(logging::o!()),
        }
    }

    /// Sweeps the tracker table, closing queries past their deadline. No
    /// error reaches the client; late responses are dropped on arrival.
    pub fn expire_trackers(&self) {
        for (query_id, tracker) in self.trackers.expire(Instant::now()) {
            logging::warn!(self.log, "query deadline expired";
                           "query_id" => &query_id,
                           "responded" => tracker.responded.len(),
                           "missing" => tracker.missing());
        }
    }

    /// Routes the block to the peer that owns it. Partitioner exhaustion is
    /// fatal for the request, not for the node.
    fn handle_storage_request(&self, event: StorageRequestEvent) -> Result<(), HandlerError> {
        let node = match self.partitioner.locate(&event.block.metadata, &self.network) {
            Ok(node) => node,
            Err(err) => {
                logging::error!(self.log, "partitioner failed, dropping storage request";
                                "block" => &event.block.metadata.name,
                                "error" => %err);
                return Ok(());
            }
        };

        logging::debug!(self.log, "routing block";
                        "block" => &event.block.metadata.name,
                        "owner" => %node.destination());

        let payload = StorageEvent { block: event.block }.encode()?;
        self.routers.send(&node.destination(), &payload)?;

        Ok(())
    }

    /// Persists a block routed to this node. No acknowledgement exists in
    /// the protocol; failures are logged and the client verifies via query.
    fn handle_storage(&self, event: StorageEvent) -> Result<(), HandlerError> {
        match self.fs.store_block(&event.block) {
            Ok(path) => {
                logging::debug!(self.log, "block persisted";
                                "block" => &event.block.metadata.name,
                                "path" => %path.display());
            }
            Err(err) => {
                logging::warn!(self.log, "block store failed";
                               "block" => &event.block.metadata.name,
                               "error" => %err);
            }
        }

        Ok(())
    }

    /// Fans a client query out across the overlay. The preamble naming the
    /// target set goes back to the originator before any query leaves this
    /// node, so the client always learns the expected peer count first.
    fn handle_query_request(
        &self,
        event: QueryRequestEvent,
        message: &RouterMessage,
    ) -> Result<(), HandlerError> {
        let peers: Vec<NodeInfo> = self
            .partitioner
            .targets(&event.query, &self.network)
            .into_iter()
            .filter(|node| node.destination() != self.self_dest)
            .collect();

        let expected: Vec<Destination> = peers.iter().map(NodeInfo::destination).collect();
        let query_id = self.trackers.open(message.origin, expected);

        let preamble = QueryPreambleEvent {
            query_id: query_id.clone(),
            peers: peers.clone(),
        }
        .encode()?;
        self.routers.send_to(message.origin, &preamble)?;

        if peers.is_empty() {
            logging::debug!(self.log, "query has no targets";
                            "query_id" => &query_id);
            self.trackers.close(&query_id);
            return Ok(());
        }

        let query = QueryEvent {
            query_id: query_id.clone(),
            query: event.query,
        }
        .encode()?;

        for peer in &peers {
            if let Err(err) = self.routers.send(&peer.destination(), &query) {
                logging::warn!(self.log, "query forward failed";
                               "query_id" => &query_id,
                               "peer" => %peer.destination(),
                               "error" => ?err);
            }
        }

        logging::debug!(self.log, "query fanned out";
                        "query_id" => &query_id,
                        "peers" => peers.len());

        Ok(())
    }

    /// Evaluates a forwarded query locally and answers over the connection it
    /// arrived on. Evaluation failures yield an empty result set so the
    /// coordinating node still sees this peer complete.
    fn handle_query(&self, event: QueryEvent, message: &RouterMessage) -> Result<(), HandlerError> {
        let results = match self.fs.query(&event.query) {
            Ok(results) => results,
            Err(err) => {
                logging::warn!(self.log, "query evaluation failed";
                               "query_id" => &event.query_id,
                               "query" => &event.query,
                               "error" => %err);
                Vec::new()
            }
        };

        let response = QueryResponseEvent {
            query_id: event.query_id,
            results,
        }
        .encode()?;

        self.routers.send_to(message.origin, &response)?;

        Ok(())
    }

    /// Relays one peer's response to the originating client and closes the
    /// tracker once every expected peer has answered. Responses for unknown
    /// ids are expected after a deadline and dropped.
    fn handle_query_response(
        &self,
        event: QueryResponseEvent,
        message: &RouterMessage,
    ) -> Result<(), HandlerError> {
        let peer = message.dest.clone().unwrap_or_else(|| {
            Destination::new(message.peer.ip().to_string(), message.peer.port())
        });

        match self.trackers.record(&event.query_id, &peer, &message.payload) {
            None => {
                logging::warn!(self.log, "response for unknown query id dropped";
                               "query_id" => &event.query_id,
                               "peer" => %peer);
                Ok(())
            }
            Some((done, origin)) => {
                // The frame is relayed as received; this node adds nothing
                self.routers.send_to(origin, &message.payload)?;

                if done {
                    self.trackers.close(&event.query_id);
                    logging::debug!(self.log, "query complete";
                                    "query_id" => &event.query_id);
                }

                Ok(())
            }
        }
    }
}

impl<F: FileSystem, P: Partitioner> EventHandler for Coordinator<F, P> {
    fn handle(&self, event: Event, message: &RouterMessage) -> Result<(), HandlerError> {
        match event {
            Event::Storage(event) => self.handle_storage(event),
            Event::StorageRequest(event) => self.handle_storage_request(event),
            Event::Query(event) => self.handle_query(event, message),
            Event::QueryRequest(event) => self.handle_query_request(event, message),
            Event::QueryResponse(event) => self.handle_query_response(event, message),
            Event::QueryPreamble(preamble) => {
                // Preambles terminate at clients; a node receiving one drops it
                logging::warn!(self.log, "stray query preamble dropped";
                               "query_id" => &preamble.query_id);
                Ok(())
            }
        }
    }
}
